//! QR scan login.
//!
//! Ticket issuance, the scan status state machine, session extraction,
//! progress notifications and the on-disk session cache.

mod cache;
mod materialize;
mod notifier;
mod poller;
mod service;
mod status;
mod ticket;

pub use cache::SessionCache;
pub use materialize::{
    compute_expiry, extract_token, materialize, AuthenticatedContext,
    DEFAULT_SESSION_LIFETIME_HOURS,
};
pub use notifier::{ChannelObserver, LoginEvent, LoginObserver, Notifier};
pub use poller::{PollHandle, PollOutcome, PollSchedule, StatusPoller};
pub use service::{LoginService, QrTicket};
pub use status::{classify, PollState};
pub use ticket::{issue_ticket, IssuedTicket, LoginTicket, QrArtifact};
