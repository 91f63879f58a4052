//! Process-wide authentication session.
//!
//! [`SessionStore`] is a cheap-to-clone handle to the single current
//! [`AuthSession`]. Every read and write takes one short critical section on
//! a plain mutex; nothing holds the lock across an `.await`, so readers and
//! the poll loop never wait on each other for longer than a field copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One cookie value as set by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieValue {
    pub value: String,
    pub expires: Option<DateTime<Utc>>,
}

/// A named cookie observed on a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub expires: Option<DateTime<Utc>>,
}

impl SessionCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            expires: None,
        }
    }

    pub fn expiring(mut self, at: DateTime<Utc>) -> Self {
        self.expires = Some(at);
        self
    }
}

/// An authenticated session: bearer token, cookie set and expiry.
///
/// `is_valid` is derived from the token on construction and can never be
/// `true` with an absent or empty token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SessionRecord")]
pub struct AuthSession {
    token: Option<String>,
    cookies: BTreeMap<String, CookieValue>,
    expires_at: Option<DateTime<Utc>>,
    is_valid: bool,
}

impl AuthSession {
    pub fn new(
        token: Option<String>,
        cookies: impl IntoIterator<Item = SessionCookie>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        let token = token.filter(|t| !t.trim().is_empty());
        let cookies = cookies
            .into_iter()
            .map(|c| {
                (
                    c.name,
                    CookieValue {
                        value: c.value,
                        expires: c.expires,
                    },
                )
            })
            .collect();

        Self {
            is_valid: token.is_some(),
            token,
            cookies,
            expires_at,
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn cookies(&self) -> &BTreeMap<String, CookieValue> {
        &self.cookies
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Cookies in `Cookie:` header form, `name=value` pairs joined by `"; "`.
    pub fn cookies_as_string(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, c)| format!("{}={}", name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Stored form of a session. Validity is recomputed on load.
#[derive(Deserialize)]
struct SessionRecord {
    token: Option<String>,
    #[serde(default)]
    cookies: BTreeMap<String, CookieValue>,
    expires_at: Option<DateTime<Utc>>,
}

impl From<SessionRecord> for AuthSession {
    fn from(record: SessionRecord) -> Self {
        let cookies = record.cookies.into_iter().map(|(name, c)| SessionCookie {
            name,
            value: c.value,
            expires: c.expires,
        });
        AuthSession::new(record.token, cookies, record.expires_at)
    }
}

/// Snapshot handed to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub is_logged_in: bool,
    pub token: Option<String>,
    pub cookies: BTreeMap<String, String>,
    pub cookies_as_string: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct StoreState {
    logged_in: bool,
    session: Option<AuthSession>,
}

/// Thread-safe holder of the current session.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<StoreState>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Every critical section leaves the state consistent, so a poisoned lock
    // still guards valid data.
    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_status(&self, logged_in: bool) {
        self.lock().logged_in = logged_in;
    }

    pub fn status(&self) -> bool {
        self.lock().logged_in
    }

    /// Replace the current session. The logged-in flag follows the new
    /// session's validity, so committing a tokenless session logs out.
    pub fn set_session(&self, session: AuthSession) {
        let mut state = self.lock();
        state.logged_in = session.is_valid();
        state.session = Some(session);
    }

    pub fn session(&self) -> Option<AuthSession> {
        self.lock().session.clone()
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.logged_in = false;
        state.session = None;
    }

    /// Flag and session read under the same lock.
    pub fn info(&self) -> SessionInfo {
        let (logged_in, session) = {
            let state = self.lock();
            (state.logged_in, state.session.clone())
        };

        match session {
            Some(s) => SessionInfo {
                is_logged_in: logged_in,
                cookies_as_string: s.cookies_as_string(),
                cookies: s
                    .cookies
                    .iter()
                    .map(|(k, v)| (k.clone(), v.value.clone()))
                    .collect(),
                token: s.token,
                expires_at: s.expires_at,
            },
            None => SessionInfo {
                is_logged_in: logged_in,
                token: None,
                cookies: BTreeMap::new(),
                cookies_as_string: String::new(),
                expires_at: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_session() -> AuthSession {
        AuthSession::new(
            Some("1788989385".to_string()),
            vec![
                SessionCookie::new("slave_sid", "abc"),
                SessionCookie::new("data_ticket", "xyz"),
            ],
            None,
        )
    }

    #[test]
    fn test_validity_follows_token() {
        assert!(valid_session().is_valid());
        assert!(!AuthSession::new(None, vec![], None).is_valid());
        assert!(!AuthSession::new(Some("  ".to_string()), vec![], None).is_valid());
        assert_eq!(AuthSession::new(Some(String::new()), vec![], None).token(), None);
    }

    #[test]
    fn test_stored_validity_is_recomputed() {
        let forged = r#"{"token":"","cookies":{},"expires_at":null,"is_valid":true}"#;
        let session: AuthSession = serde_json::from_str(forged).unwrap();
        assert!(!session.is_valid());

        let json = serde_json::to_string(&valid_session()).unwrap();
        let back: AuthSession = serde_json::from_str(&json).unwrap();
        assert_eq!(back, valid_session());
    }

    #[test]
    fn test_cookies_as_string() {
        assert_eq!(
            valid_session().cookies_as_string(),
            "data_ticket=xyz; slave_sid=abc"
        );
        assert_eq!(AuthSession::new(None, vec![], None).cookies_as_string(), "");
    }

    #[test]
    fn test_set_session_sets_status() {
        let store = SessionStore::new();
        assert!(!store.status());
        assert!(store.session().is_none());

        store.set_session(valid_session());
        assert!(store.status());

        store.set_session(AuthSession::new(None, vec![SessionCookie::new("a", "b")], None));
        assert!(!store.status());
        assert!(store.session().is_some());
    }

    #[test]
    fn test_repeated_reads_are_stable() {
        let store = SessionStore::new();
        store.set_session(valid_session());
        let first = store.session();
        let second = store.session();
        assert_eq!(first, second);
        assert_eq!(store.info(), store.info());
    }

    #[test]
    fn test_clones_share_state() {
        let store = SessionStore::new();
        let reader = store.clone();
        store.set_session(valid_session());
        assert!(reader.status());
        reader.clear();
        assert!(!store.status());
        assert!(store.session().is_none());
    }

    #[test]
    fn test_info_snapshot() {
        let store = SessionStore::new();
        let empty = store.info();
        assert!(!empty.is_logged_in);
        assert!(empty.token.is_none());
        assert!(empty.cookies.is_empty());

        store.set_session(valid_session());
        let info = store.info();
        assert!(info.is_logged_in);
        assert_eq!(info.token.as_deref(), Some("1788989385"));
        assert_eq!(info.cookies.get("slave_sid").map(String::as_str), Some("abc"));
        assert_eq!(info.cookies_as_string, "data_ticket=xyz; slave_sid=abc");
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let store = SessionStore::new();
        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    if i % 2 == 0 {
                        store.set_session(valid_session());
                    } else {
                        store.clear();
                    }
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let info = store.info();
                        // flag and session are read together
                        assert_eq!(info.is_logged_in, info.token.is_some());
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
    }
}
