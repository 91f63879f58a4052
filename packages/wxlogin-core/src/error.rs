//! Error types for the login flow.

/// A single request to the remote platform failed.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned status {0}")]
    Status(u16),
    #[error("unexpected response: {0}")]
    Parse(String),
}

/// Failure kinds surfaced by the login flow.
///
/// Every I/O failure is converted into one of these at the point where it
/// happens; nothing else escapes the state machine.
#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    /// The login ticket could not be obtained. Not retried.
    #[error("failed to issue login ticket: {cause}")]
    Issue { cause: String },
    /// A status query could not reach or parse the remote response.
    #[error("status query failed: {0}")]
    Transient(String),
    /// The platform rejected the fingerprint or ticket.
    #[error("login session was invalidated by the platform")]
    SessionInvalidated,
    /// Token or cookie extraction failed after the platform reported success.
    #[error("failed to extract session: {0}")]
    Materialization(String),
    /// Reading or writing the on-disk session cache failed.
    #[error("session cache error: {0}")]
    Storage(String),
}

impl LoginError {
    pub(crate) fn issue(cause: impl std::fmt::Display) -> Self {
        Self::Issue {
            cause: cause.to_string(),
        }
    }
}

impl From<RemoteError> for LoginError {
    fn from(e: RemoteError) -> Self {
        Self::Transient(e.to_string())
    }
}
