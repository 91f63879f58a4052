//! Login progress notifications.

use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Something the person holding the phone should know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "message", rename_all = "snake_case")]
pub enum LoginEvent {
    Scanned,
    Authenticated,
    Expired,
    Error(String),
}

impl LoginEvent {
    pub fn message(&self) -> String {
        match self {
            LoginEvent::Scanned => "QR code scanned, confirm the login on your phone".to_string(),
            LoginEvent::Authenticated => "Login confirmed".to_string(),
            LoginEvent::Expired => "QR code expired, request a new one".to_string(),
            LoginEvent::Error(msg) => format!("Login check failed: {}", msg),
        }
    }
}

impl std::fmt::Display for LoginEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message())
    }
}

/// Receives login events. Called on the poll loop's task, so it must return
/// quickly.
pub trait LoginObserver: Send + Sync {
    fn on_event(&self, event: &LoginEvent);
}

impl<F> LoginObserver for F
where
    F: Fn(&LoginEvent) + Send + Sync,
{
    fn on_event(&self, event: &LoginEvent) {
        self(event)
    }
}

/// Observer that forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<LoginEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LoginEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl LoginObserver for ChannelObserver {
    fn on_event(&self, event: &LoginEvent) {
        if self.tx.send(event.clone()).is_err() {
            tracing::debug!("Login event receiver dropped: {:?}", event);
        }
    }
}

/// Dispatches events to an optional observer. Never fails and never panics.
#[derive(Clone, Default)]
pub struct Notifier {
    observer: Option<Arc<dyn LoginObserver>>,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl Notifier {
    pub fn new(observer: Arc<dyn LoginObserver>) -> Self {
        Self {
            observer: Some(observer),
        }
    }

    /// A notifier that drops every event.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn notify(&self, event: LoginEvent) {
        tracing::debug!("Login event: {}", event);
        let Some(observer) = &self.observer else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| observer.on_event(&event))).is_err() {
            tracing::warn!("Login observer panicked handling {:?}, ignoring", event);
        }
    }
}
