//! On-disk cache of the last good session, so separate runs share a login.
//!
//! One JSON file, readable by the owner only on Unix. An expired or tokenless
//! entry is deleted on load.

use crate::error::LoginError;
use crate::remote::config::get_config_dir;
use crate::session::AuthSession;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};

const CACHE_FILE_NAME: &str = ".session";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCache {
    path: PathBuf,
}

impl SessionCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.config/wxlogin/.session`, if a config directory can be found.
    pub fn default_location() -> Option<Self> {
        get_config_dir().map(|dir| Self::new(dir.join(CACHE_FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, session: &AuthSession) -> Result<(), LoginError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| LoginError::Storage(format!("create {:?}: {}", dir, e)))?;
        }
        let json = serde_json::to_string(session)
            .map_err(|e| LoginError::Storage(format!("serialize session: {}", e)))?;

        // Set restrictive permissions on Unix before writing
        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600) // Owner read/write only
                .open(&self.path)
                .map_err(|e| LoginError::Storage(format!("open {:?}: {}", self.path, e)))?;
            file.write_all(json.as_bytes())
                .map_err(|e| LoginError::Storage(format!("write {:?}: {}", self.path, e)))?;
        }

        #[cfg(not(unix))]
        {
            fs::write(&self.path, &json)
                .map_err(|e| LoginError::Storage(format!("write {:?}: {}", self.path, e)))?;
        }

        tracing::debug!("Session cached at {:?}", self.path);
        Ok(())
    }

    pub fn load(&self) -> Result<Option<AuthSession>, LoginError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)
            .map_err(|e| LoginError::Storage(format!("read {:?}: {}", self.path, e)))?;
        let session: AuthSession = match serde_json::from_str(&content) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Discarding unreadable session cache {:?}: {}", self.path, e);
                self.delete();
                return Ok(None);
            }
        };

        if !session.is_valid() {
            tracing::info!("Cached session has no token, deleting");
            self.delete();
            return Ok(None);
        }
        if session.is_expired(Utc::now()) {
            tracing::info!("Cached session expired, deleting");
            self.delete();
            return Ok(None);
        }

        tracing::debug!("Session loaded from {:?}", self.path);
        Ok(Some(session))
    }

    pub fn delete(&self) {
        if self.path.exists() {
            if let Err(e) = fs::remove_file(&self.path) {
                tracing::warn!("Failed to delete session cache: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionCookie;
    use chrono::Duration;

    fn session(expires_in: Duration) -> AuthSession {
        AuthSession::new(
            Some("1788989385".to_string()),
            vec![SessionCookie::new("slave_sid", "abc")],
            Some(Utc::now() + expires_in),
        )
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SessionCache::new(dir.path().join("wxlogin").join(".session"));
        assert_eq!(cache.load().unwrap(), None);

        let s = session(Duration::hours(5));
        cache.save(&s).unwrap();
        assert_eq!(cache.load().unwrap(), Some(s));

        cache.delete();
        assert!(!cache.path().exists());
        assert_eq!(cache.load().unwrap(), None);
    }

    #[test]
    fn test_expired_entry_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SessionCache::new(dir.path().join(".session"));
        cache.save(&session(-Duration::minutes(1))).unwrap();
        assert_eq!(cache.load().unwrap(), None);
        assert!(!cache.path().exists());
    }

    #[test]
    fn test_garbage_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SessionCache::new(dir.path().join(".session"));
        fs::write(cache.path(), "not json").unwrap();
        assert_eq!(cache.load().unwrap(), None);
        assert!(!cache.path().exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_cache_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let cache = SessionCache::new(dir.path().join(".session"));
        cache.save(&session(Duration::hours(1))).unwrap();
        let mode = fs::metadata(cache.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
