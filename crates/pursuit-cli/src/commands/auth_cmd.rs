use std::path::PathBuf;

use pursuit_core::auth::{AuthSession, SessionPersistence};

use crate::auth::{SessionStore, DEFAULT_SESSION_TTL_SECONDS};
use crate::commands::common::open_tracker;
use crate::error::CliError;

pub fn run_login(
    session_id: &str,
    access_token: &str,
    expires_at: Option<i64>,
    email: Option<String>,
    sessions: &SessionStore,
) -> Result<(), CliError> {
    let session = build_session(session_id, access_token, expires_at, email, chrono::Utc::now().timestamp())?;
    sessions.save_session(&session)?;
    let label = session.email.as_deref().unwrap_or(&session.session_id);
    println!("Signed in as {label}");
    Ok(())
}

pub fn build_session(
    session_id: &str,
    access_token: &str,
    expires_at: Option<i64>,
    email: Option<String>,
    now_seconds: i64,
) -> Result<AuthSession, CliError> {
    let session_id = session_id.trim();
    if session_id.is_empty() {
        return Err(CliError::EmptySessionId);
    }
    let access_token = access_token.trim();
    if access_token.is_empty() {
        return Err(CliError::EmptyAccessToken);
    }
    Ok(AuthSession {
        session_id: session_id.to_string(),
        access_token: access_token.to_string(),
        expires_at: expires_at.unwrap_or(now_seconds + DEFAULT_SESSION_TTL_SECONDS),
        email: email
            .map(|email| email.trim().to_string())
            .filter(|email| !email.is_empty()),
    })
}

/// Sign out: the identity and cached results go, local records and queued
/// changes stay.
pub async fn run_logout(db_path: Option<PathBuf>, sessions: &SessionStore) -> Result<(), CliError> {
    let tracker = open_tracker(db_path, sessions).await?;
    let result = tracker.sign_out().await;
    tracker.teardown().await;
    result?;
    sessions.clear_session()?;
    println!("Signed out");
    Ok(())
}
