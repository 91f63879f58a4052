//! Scan status classification.
//!
//! The only place raw status codes from the platform are interpreted.

use crate::remote::StatusReply;
use serde::Deserialize;

/// Text the platform puts in a status reply once the login attempt is gone.
const INVALID_SESSION_MARKER: &str = "invalid session";

/// Logical state of one login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    /// Nobody has scanned the code yet.
    Waiting,
    /// Scanned, waiting for confirmation on the phone.
    Scanned,
    /// Confirmed. Terminal.
    Authenticated,
    /// The ticket is no longer valid. Terminal.
    Expired,
    /// The query failed; retry after the backoff interval.
    TransientError(String),
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PollState::Authenticated | PollState::Expired)
    }
}

#[derive(Debug, Deserialize)]
struct AskResponse {
    #[serde(default)]
    status: i64,
}

/// Map a status reply to a [`PollState`].
///
/// | raw `status` | state |
/// |---|---|
/// | 1, 3 | `Authenticated` |
/// | 2, 4 | `Scanned` |
/// | anything else, or absent | `Waiting` |
///
/// A body carrying the invalid-session marker is `Expired` whatever its
/// status says; a body that is not JSON is a `TransientError`.
pub fn classify(reply: &StatusReply) -> PollState {
    if reply.body.contains(INVALID_SESSION_MARKER) {
        return PollState::Expired;
    }
    if !reply.json {
        return PollState::TransientError("status reply is not JSON".to_string());
    }

    match serde_json::from_str::<AskResponse>(&reply.body) {
        Ok(resp) => match resp.status {
            1 | 3 => PollState::Authenticated,
            2 | 4 => PollState::Scanned,
            _ => PollState::Waiting,
        },
        Err(e) => PollState::TransientError(format!("failed to parse status reply: {}", e)),
    }
}
