//! The scan status poll loop.
//!
//! One loop per ticket. Each cycle sends a single status query, classifies
//! the reply, reports the transition and then sleeps before the next query,
//! so queries for a ticket never overlap. The loop ends at `Authenticated`
//! or `Expired`, or when its [`CancellationToken`] fires.
//!
//! ```text
//! Waiting ──┬──> Waiting / Scanned / TransientError ──┬──> Authenticated
//!           │            (repeats)                    └──> Expired
//! ```

use crate::auth::cache::SessionCache;
use crate::auth::materialize::{materialize, AuthenticatedContext};
use crate::auth::notifier::{LoginEvent, Notifier};
use crate::auth::status::{classify, PollState};
use crate::auth::ticket::{LoginTicket, QrArtifact};
use crate::error::LoginError;
use crate::remote::{LoginConfig, MpBackend};
use crate::session::{AuthSession, SessionStore};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// How long to wait between queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    /// After `Waiting` or `Scanned`
    pub interval: Duration,
    /// After a failed query
    pub backoff: Duration,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            backoff: Duration::from_secs(5),
        }
    }
}

impl From<&LoginConfig> for PollSchedule {
    fn from(config: &LoginConfig) -> Self {
        Self {
            interval: config.poll_interval,
            backoff: config.backoff,
        }
    }
}

/// How a poll loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Logged in; the session has been committed to the store.
    Authenticated(AuthSession),
    /// The platform confirmed the scan but no usable session could be
    /// extracted. The store was left alone.
    MaterializationFailed(String),
    /// The ticket expired before anyone confirmed it.
    Expired,
    /// Stopped from outside.
    Cancelled,
}

/// Drives one ticket from issuance to a terminal state.
pub struct StatusPoller<B: MpBackend> {
    backend: Arc<B>,
    store: SessionStore,
    notifier: Notifier,
    schedule: PollSchedule,
    artifact: Option<QrArtifact>,
    cache: Option<SessionCache>,
}

impl<B: MpBackend> StatusPoller<B> {
    pub fn new(backend: Arc<B>, store: SessionStore, schedule: PollSchedule) -> Self {
        Self {
            backend,
            store,
            notifier: Notifier::silent(),
            schedule,
            artifact: None,
            cache: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// QR image to delete once the ticket reaches a terminal state.
    pub fn with_artifact(mut self, artifact: QrArtifact) -> Self {
        self.artifact = Some(artifact);
        self
    }

    /// Cache to write a successful session to.
    pub fn with_cache(mut self, cache: SessionCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Send one status query and classify the reply.
    pub async fn poll_once(&self, ticket: &LoginTicket) -> PollState {
        match self.backend.ask_status(&ticket.fingerprint).await {
            Ok(reply) => {
                tracing::debug!("Status reply for {}: {}", ticket.id, reply.body);
                classify(&reply)
            }
            Err(e) => PollState::TransientError(e.to_string()),
        }
    }

    /// Poll until a terminal state or until `cancel` fires.
    ///
    /// A reply that arrives after cancellation is dropped unseen.
    pub async fn run(self, ticket: LoginTicket, cancel: CancellationToken) -> PollOutcome {
        tracing::info!("Waiting for QR code {} to be scanned", ticket.id);
        let mut last = PollState::Waiting;

        loop {
            let state = self.poll_once(&ticket).await;
            if cancel.is_cancelled() {
                tracing::debug!("Poll for {} cancelled, discarding reply", ticket.id);
                return PollOutcome::Cancelled;
            }

            let wait = match &state {
                PollState::Waiting => self.schedule.interval,
                PollState::Scanned => {
                    if last != PollState::Scanned {
                        tracing::info!("QR code {} scanned, waiting for confirmation", ticket.id);
                        self.notifier.notify(LoginEvent::Scanned);
                    }
                    self.schedule.interval
                }
                PollState::TransientError(msg) => {
                    tracing::warn!("Status query for {} failed: {}", ticket.id, msg);
                    self.notifier.notify(LoginEvent::Error(msg.clone()));
                    self.schedule.backoff
                }
                PollState::Authenticated => return self.finish(&ticket, &cancel).await,
                PollState::Expired => {
                    tracing::info!("QR code {} expired", ticket.id);
                    self.discard_artifact();
                    self.notifier.notify(LoginEvent::Expired);
                    return PollOutcome::Expired;
                }
            };
            // a failed query says nothing about the scan
            if !matches!(state, PollState::TransientError(_)) {
                last = state;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Poll for {} cancelled", ticket.id);
                    return PollOutcome::Cancelled;
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Extract and commit the session once the scan is confirmed.
    async fn finish(&self, ticket: &LoginTicket, cancel: &CancellationToken) -> PollOutcome {
        let home = self.backend.home_page(None).await;
        if cancel.is_cancelled() {
            tracing::debug!("Poll for {} cancelled during session extraction", ticket.id);
            return PollOutcome::Cancelled;
        }

        let session = home
            .map_err(|e| LoginError::Materialization(format!("home page: {}", e)))
            .and_then(|home| {
                let ctx = AuthenticatedContext {
                    home,
                    cookies: self.backend.cookies(),
                };
                materialize(&ctx, Utc::now())
            });
        self.discard_artifact();

        match session {
            Ok(session) => {
                self.store.set_session(session.clone());
                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.save(&session) {
                        tracing::warn!("Failed to cache session: {}", e);
                    }
                }
                tracing::info!("Login succeeded for ticket {}", ticket.id);
                self.notifier.notify(LoginEvent::Authenticated);
                PollOutcome::Authenticated(session)
            }
            Err(e) => {
                tracing::error!("Scan confirmed but {}", e);
                self.notifier.notify(LoginEvent::Error(e.to_string()));
                PollOutcome::MaterializationFailed(e.to_string())
            }
        }
    }

    fn discard_artifact(&self) {
        if let Some(artifact) = &self.artifact {
            artifact.remove();
        }
    }

    /// Run the loop on its own task.
    pub fn spawn(self, ticket: LoginTicket) -> PollHandle {
        let cancel = CancellationToken::new();
        let (tx, rx) = watch::channel(None);
        let ticket_id = ticket.id.clone();

        let token = cancel.clone();
        tokio::spawn(async move {
            let outcome = self.run(ticket, token).await;
            // Nobody listening is fine.
            let _ = tx.send(Some(outcome));
        });

        PollHandle {
            ticket_id,
            cancel,
            outcome: rx,
        }
    }
}

/// Handle to a spawned poll loop. Clones observe the same loop.
#[derive(Debug, Clone)]
pub struct PollHandle {
    ticket_id: String,
    cancel: CancellationToken,
    outcome: watch::Receiver<Option<PollOutcome>>,
}

impl PollHandle {
    pub fn ticket_id(&self) -> &str {
        &self.ticket_id
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// Wait for the loop to end.
    pub async fn wait(&self) -> PollOutcome {
        let mut rx = self.outcome.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(PollOutcome::Cancelled),
            Err(_) => {
                tracing::warn!("Poll task for {} ended without an outcome", self.ticket_id);
                PollOutcome::Cancelled
            }
        }
    }

    /// Stop the loop and wait for it to wind down. Once this returns the
    /// loop will not notify again.
    pub async fn cancel(&self) -> PollOutcome {
        self.cancel.cancel();
        self.wait().await
    }
}
