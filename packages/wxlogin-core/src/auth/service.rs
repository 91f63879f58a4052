//! Consumer-facing login API.
//!
//! [`LoginService`] ties the pieces together: it issues tickets, runs one
//! poll loop at a time, injects sessions from an existing token and logs
//! out. Everything else reads the shared [`SessionStore`].

use crate::auth::cache::SessionCache;
use crate::auth::materialize::compute_expiry;
use crate::auth::notifier::{LoginObserver, Notifier};
use crate::auth::poller::{PollHandle, PollOutcome, PollSchedule, StatusPoller};
use crate::auth::ticket::{issue_ticket, QrArtifact};
use crate::error::{LoginError, RemoteError};
use crate::remote::{load_endpoint_config, load_login_config, HomePage, LoginConfig, MpBackend, MpClient};
use crate::session::{AuthSession, SessionInfo, SessionStore};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// What a caller needs to show the QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrTicket {
    /// Image path with a cache-busting suffix
    pub image_ref: String,
    pub image_path: PathBuf,
    pub ticket_id: String,
}

pub struct LoginService<B: MpBackend = MpClient> {
    backend: Arc<B>,
    store: SessionStore,
    config: LoginConfig,
    cache: Option<SessionCache>,
    active: Mutex<Option<PollHandle>>,
    /// Held while a ticket is issued or the service logs out, so at most
    /// one poll loop is ever installed.
    issuing: tokio::sync::Mutex<()>,
}

impl LoginService<MpClient> {
    /// Service against the platform configured by environment and config
    /// file, with a fresh session store.
    pub fn from_env() -> Result<Self, RemoteError> {
        let endpoint = load_endpoint_config();
        let config = load_login_config();
        let cache = if config.persist_session {
            SessionCache::default_location()
        } else {
            None
        };
        let backend = MpClient::with_endpoint(&endpoint)?;
        Ok(Self::new(Arc::new(backend), SessionStore::new(), config).with_cache(cache))
    }
}

/// The home page probe passes if the platform kept us on the home page
/// instead of bouncing back to the login screen.
fn probe_accepted(home: &HomePage) -> bool {
    home.url.contains("/cgi-bin/home")
}

impl<B: MpBackend> LoginService<B> {
    pub fn new(backend: Arc<B>, store: SessionStore, config: LoginConfig) -> Self {
        Self {
            backend,
            store,
            config,
            cache: None,
            active: Mutex::new(None),
            issuing: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_cache(mut self, cache: Option<SessionCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn config(&self) -> &LoginConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&SessionCache> {
        self.cache.as_ref()
    }

    fn active(&self) -> MutexGuard<'_, Option<PollHandle>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn artifact(&self) -> QrArtifact {
        QrArtifact::new(&self.config.qr_code_path)
    }

    /// Request a QR code and start watching it in the background.
    ///
    /// Any poll loop still running for an earlier ticket is cancelled first.
    /// Concurrent calls are served one after the other; the last one wins.
    pub async fn issue_ticket(
        &self,
        observer: Option<Arc<dyn LoginObserver>>,
    ) -> Result<QrTicket, LoginError> {
        let _issuing = self.issuing.lock().await;
        if let Some(PollOutcome::Cancelled) = self.cancel_active().await {
            tracing::info!("Replaced the previous login attempt");
        }

        let issued = issue_ticket(self.backend.as_ref()).await?;
        let artifact = self.artifact();
        artifact
            .write(&issued.image)
            .map_err(|e| LoginError::issue(format!("save QR code: {}", e)))?;

        let notifier = observer.map(Notifier::new).unwrap_or_default();
        let mut poller = StatusPoller::new(
            self.backend.clone(),
            self.store.clone(),
            PollSchedule::from(&self.config),
        )
        .with_notifier(notifier)
        .with_artifact(artifact.clone());
        if let Some(cache) = &self.cache {
            poller = poller.with_cache(cache.clone());
        }

        let ticket_id = issued.ticket.id.clone();
        let handle = poller.spawn(issued.ticket);
        *self.active() = Some(handle);

        Ok(QrTicket {
            image_ref: artifact.image_ref(Utc::now()),
            image_path: artifact.path().to_path_buf(),
            ticket_id,
        })
    }

    /// Wait for the current poll loop to finish. `None` if there is none.
    pub async fn wait_for_login(&self) -> Option<PollOutcome> {
        let handle = self.active().clone()?;
        Some(handle.wait().await)
    }

    /// Stop the current poll loop, if any, and wait for it to wind down.
    /// The QR image of a cancelled ticket is removed.
    pub async fn cancel_active(&self) -> Option<PollOutcome> {
        let handle = self.active().take()?;
        let outcome = handle.cancel().await;
        if outcome == PollOutcome::Cancelled {
            self.artifact().remove();
        }
        Some(outcome)
    }

    pub fn session_info(&self) -> SessionInfo {
        self.store.info()
    }

    /// Log in with a token (and cookies) from an earlier session, skipping
    /// the QR flow. The token is checked against the home page first; if it
    /// is rejected the stored session and the client's cookies are left as
    /// they were and the logged-in flag is cleared.
    pub async fn login_with_token(&self, token: &str, cookies: &BTreeMap<String, String>) -> bool {
        let token = token.trim();
        if token.is_empty() {
            tracing::warn!("Token login attempted with an empty token");
            self.store.set_status(false);
            return false;
        }

        let previous = (!cookies.is_empty()).then(|| {
            let snapshot = self.backend.cookies();
            self.backend.inject_cookies(cookies);
            snapshot
        });

        let rejected = |reason: &dyn std::fmt::Display| {
            tracing::warn!("Token login failed: {}", reason);
            if let Some(previous) = &previous {
                self.backend.replace_cookies(previous);
            }
            self.store.set_status(false);
            false
        };

        match self.backend.home_page(Some(token)).await {
            Ok(home) if probe_accepted(&home) => {
                let cookies = self.backend.cookies();
                let expires_at = compute_expiry(&cookies, Utc::now());
                let session = AuthSession::new(Some(token.to_string()), cookies, Some(expires_at));
                self.commit(session);
                tracing::info!("Token login succeeded");
                true
            }
            Ok(home) => rejected(&format!("rejected, redirected to {}", home.url)),
            Err(e) => rejected(&e),
        }
    }

    /// Whether the stored session is still accepted by the platform.
    pub async fn is_login_valid(&self) -> bool {
        if !self.store.status() {
            return false;
        }
        let Some(token) = self.store.session().and_then(|s| s.token().map(str::to_string)) else {
            return false;
        };

        match self.backend.home_page(Some(&token)).await {
            Ok(home) => probe_accepted(&home),
            Err(e) => {
                tracing::debug!("Login check failed: {}", e);
                false
            }
        }
    }

    /// Load a cached session into the store. Returns whether one was found.
    pub fn restore(&self) -> Result<bool, LoginError> {
        let Some(cache) = &self.cache else {
            return Ok(false);
        };
        let Some(session) = cache.load()? else {
            return Ok(false);
        };

        let cookies: BTreeMap<String, String> = session
            .cookies()
            .iter()
            .map(|(name, c)| (name.clone(), c.value.clone()))
            .collect();
        self.backend.inject_cookies(&cookies);
        self.store.set_session(session);
        tracing::info!("Restored cached session");
        Ok(true)
    }

    /// Forget everything: poll loop, session, cookies, QR image and cache.
    pub async fn logout(&self) {
        let _issuing = self.issuing.lock().await;
        self.cancel_active().await;
        self.store.clear();
        self.backend.clear_cookies();
        self.artifact().remove();
        if let Some(cache) = &self.cache {
            cache.delete();
        }
        tracing::info!("Logged out");
    }

    fn commit(&self, session: AuthSession) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.save(&session) {
                tracing::warn!("Failed to cache session: {}", e);
            }
        }
        self.store.set_session(session);
    }
}
