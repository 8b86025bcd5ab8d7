//! Session handoff from the auth subsystem and the observable auth state.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::{Subscribers, Subscription};

const EXPIRY_SKEW_SECONDS: i64 = 60;

/// A signed-in session, as issued by the auth subsystem.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    /// Stable external identity of the signed-in user
    pub session_id: String,
    pub access_token: String,
    /// Expiry as Unix seconds
    pub expires_at: i64,
    #[serde(default)]
    pub email: Option<String>,
}

impl AuthSession {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= chrono::Utc::now().timestamp() + EXPIRY_SKEW_SECONDS
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthSession")
            .field("session_id", &self.session_id)
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("email", &self.email)
            .finish()
    }
}

/// Current authentication state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AuthState {
    SignedOut,
    SignedIn { session_id: String },
    /// The remote rejected the session; sync is paused until sign-in.
    ReauthRequired { session_id: String },
}

impl AuthState {
    /// Session usable for sync, if any.
    pub fn active_session(&self) -> Option<&str> {
        match self {
            Self::SignedIn { session_id } => Some(session_id),
            Self::SignedOut | Self::ReauthRequired { .. } => None,
        }
    }

    pub const fn needs_reauth(&self) -> bool {
        matches!(self, Self::ReauthRequired { .. })
    }
}

/// Single current auth-state snapshot plus change subscriptions.
#[derive(Clone)]
pub struct AuthStateHub {
    state: Arc<RwLock<AuthState>>,
    subscribers: Subscribers<AuthState>,
}

impl AuthStateHub {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(AuthState::SignedOut)),
            subscribers: Subscribers::new(),
        }
    }

    pub fn current(&self) -> AuthState {
        self.state.read().clone()
    }

    pub fn subscribe(&self, handler: impl Fn(&AuthState) + Send + Sync + 'static) -> Subscription {
        self.subscribers.subscribe(handler)
    }

    /// Replace the state, notifying subscribers if it changed.
    pub fn set(&self, next: AuthState) {
        {
            let mut state = self.state.write();
            if *state == next {
                return;
            }
            *state = next.clone();
        }
        tracing::info!(state = ?next, "Auth state changed");
        self.subscribers.emit(&next);
    }

    /// Flag the active session as rejected by the remote.
    pub fn require_reauth(&self) {
        let current = self.current();
        if let AuthState::SignedIn { session_id } = current {
            tracing::warn!("Remote rejected the session; re-authentication required");
            self.set(AuthState::ReauthRequired { session_id });
        }
    }
}

impl Default for AuthStateHub {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to parse JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Secure storage error: {0}")]
    SecureStorage(String),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Durable storage for the handed-off session.
pub trait SessionPersistence: Clone + Send + Sync + 'static {
    fn load_session(&self) -> SessionResult<Option<AuthSession>>;
    fn save_session(&self, session: &AuthSession) -> SessionResult<()>;
    fn clear_session(&self) -> SessionResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn debug_redacts_token() {
        let session = AuthSession {
            session_id: "s1".to_string(),
            access_token: "secret-token".to_string(),
            expires_at: 0,
            email: None,
        };
        let debug = format!("{session:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
        assert!(session.is_expired());
    }

    #[test]
    fn hub_notifies_on_change_only() {
        let hub = AuthStateHub::new();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _subscription = hub.subscribe(move |state| sink.lock().push(state.clone()));

        hub.set(AuthState::SignedIn {
            session_id: "s1".to_string(),
        });
        hub.set(AuthState::SignedIn {
            session_id: "s1".to_string(),
        });
        hub.require_reauth();

        assert_eq!(
            *seen.lock(),
            vec![
                AuthState::SignedIn {
                    session_id: "s1".to_string()
                },
                AuthState::ReauthRequired {
                    session_id: "s1".to_string()
                },
            ]
        );
        assert_eq!(hub.current().active_session(), None);
        assert!(hub.current().needs_reauth());
    }

    #[test]
    fn require_reauth_is_ignored_when_signed_out() {
        let hub = AuthStateHub::new();
        hub.require_reauth();
        assert_eq!(hub.current(), AuthState::SignedOut);
    }
}
