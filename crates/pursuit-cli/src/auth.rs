//! Keychain persistence for the session handed over by the auth subsystem.

#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::sync::{Mutex, OnceLock};

#[cfg(not(test))]
use keyring::Entry;

use pursuit_core::auth::{AuthSession, SessionError, SessionPersistence, SessionResult};

#[cfg(not(test))]
const KEYRING_SERVICE_NAME: &str = "pursuit-cli";
pub const DEFAULT_SESSION_TTL_SECONDS: i64 = 60 * 60;

#[derive(Clone)]
pub struct SessionStore {
    username: String,
}

impl SessionStore {
    pub fn new(slot: &str) -> Self {
        Self {
            username: format!("tracker_session:{slot}"),
        }
    }

    #[cfg(test)]
    fn test_store() -> &'static Mutex<HashMap<String, String>> {
        static STORE: OnceLock<Mutex<HashMap<String, String>>> = OnceLock::new();
        STORE.get_or_init(|| Mutex::new(HashMap::new()))
    }

    #[cfg(not(test))]
    fn entry(&self) -> SessionResult<Entry> {
        Entry::new(KEYRING_SERVICE_NAME, &self.username)
            .map_err(|error| SessionError::SecureStorage(error.to_string()))
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new("default")
    }
}

impl SessionPersistence for SessionStore {
    #[cfg(not(test))]
    fn load_session(&self) -> SessionResult<Option<AuthSession>> {
        match self.entry()?.get_password() {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(SessionError::SecureStorage(error.to_string())),
        }
    }

    #[cfg(test)]
    fn load_session(&self) -> SessionResult<Option<AuthSession>> {
        let guard = Self::test_store()
            .lock()
            .map_err(|error| SessionError::SecureStorage(error.to_string()))?;
        guard
            .get(&self.username)
            .map(|raw| serde_json::from_str(raw))
            .transpose()
            .map_err(SessionError::from)
    }

    #[cfg(not(test))]
    fn save_session(&self, session: &AuthSession) -> SessionResult<()> {
        let raw = serde_json::to_string(session)?;
        self.entry()?
            .set_password(&raw)
            .map_err(|error| SessionError::SecureStorage(error.to_string()))
    }

    #[cfg(test)]
    fn save_session(&self, session: &AuthSession) -> SessionResult<()> {
        let raw = serde_json::to_string(session)?;
        let mut guard = Self::test_store()
            .lock()
            .map_err(|error| SessionError::SecureStorage(error.to_string()))?;
        guard.insert(self.username.clone(), raw);
        Ok(())
    }

    #[cfg(not(test))]
    fn clear_session(&self) -> SessionResult<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(SessionError::SecureStorage(error.to_string())),
        }
    }

    #[cfg(test)]
    fn clear_session(&self) -> SessionResult<()> {
        let mut guard = Self::test_store()
            .lock()
            .map_err(|error| SessionError::SecureStorage(error.to_string()))?;
        guard.remove(&self.username);
        Ok(())
    }
}

/// Session from `PURSUIT_SESSION_ID` and `PURSUIT_ACCESS_TOKEN`.
///
/// Both must be set. `PURSUIT_SESSION_EXPIRES_AT` (Unix seconds) is optional.
pub fn session_from_lookup(lookup: impl Fn(&str) -> Option<String>, now_seconds: i64) -> Option<AuthSession> {
    let read = |key: &str| {
        lookup(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };
    let session_id = read("PURSUIT_SESSION_ID")?;
    let access_token = read("PURSUIT_ACCESS_TOKEN")?;
    let expires_at = read("PURSUIT_SESSION_EXPIRES_AT")
        .and_then(|value| value.parse().ok())
        .unwrap_or(now_seconds + DEFAULT_SESSION_TTL_SECONDS);

    Some(AuthSession {
        session_id,
        access_token,
        expires_at,
        email: None,
    })
}

/// Stored session, falling back to the environment. Expired sessions are
/// ignored.
pub fn resolve_session(store: &impl SessionPersistence) -> SessionResult<Option<AuthSession>> {
    let stored = store.load_session()?;
    let session = stored.or_else(|| {
        session_from_lookup(
            |key| std::env::var(key).ok(),
            chrono::Utc::now().timestamp(),
        )
    });

    match session {
        Some(session) if session.is_expired() => {
            tracing::warn!(session_id = %session.session_id, "Stored session expired; sync stays paused");
            Ok(None)
        }
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn session(id: &str) -> AuthSession {
        AuthSession {
            session_id: id.to_string(),
            access_token: "token".to_string(),
            expires_at: 4_102_444_800,
            email: Some("me@example.com".to_string()),
        }
    }

    #[test]
    fn session_store_round_trips_and_clears() {
        let store = SessionStore::new("auth-round-trip");
        assert_eq!(store.load_session().unwrap(), None);

        store.save_session(&session("s1")).unwrap();
        assert_eq!(store.load_session().unwrap(), Some(session("s1")));

        store.clear_session().unwrap();
        assert_eq!(store.load_session().unwrap(), None);
        store.clear_session().unwrap();
    }

    fn lookup(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value).to_string())
        }
    }

    #[test]
    fn env_session_requires_both_values() {
        assert!(session_from_lookup(lookup(&[("PURSUIT_SESSION_ID", "s1")]), 0).is_none());
        assert!(session_from_lookup(
            lookup(&[("PURSUIT_SESSION_ID", " "), ("PURSUIT_ACCESS_TOKEN", "t")]),
            0
        )
        .is_none());

        let session = session_from_lookup(
            lookup(&[("PURSUIT_SESSION_ID", " s1 "), ("PURSUIT_ACCESS_TOKEN", "t")]),
            100,
        )
        .unwrap();
        assert_eq!(session.session_id, "s1");
        assert_eq!(session.expires_at, 100 + DEFAULT_SESSION_TTL_SECONDS);

        let session = session_from_lookup(
            lookup(&[
                ("PURSUIT_SESSION_ID", "s1"),
                ("PURSUIT_ACCESS_TOKEN", "t"),
                ("PURSUIT_SESSION_EXPIRES_AT", "5000"),
            ]),
            100,
        )
        .unwrap();
        assert_eq!(session.expires_at, 5000);
    }

    #[test]
    fn expired_stored_session_is_ignored() {
        let store = SessionStore::new("auth-expired");
        let mut expired = session("s1");
        expired.expires_at = 0;
        store.save_session(&expired).unwrap();

        assert_eq!(resolve_session(&store).unwrap(), None);
        store.clear_session().unwrap();
    }
}
