//! wxlogin Core Library
//!
//! This crate logs a process into the WeChat official account platform by
//! QR code and keeps the resulting session:
//! - Login tickets and their QR code images
//! - Scan status polling with backoff and cancellation
//! - Session extraction (token, cookies, expiry) into a shared store
//! - Token login, validity checks and logout
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wxlogin_core::{LoginEvent, LoginObserver, LoginService, PollOutcome};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let service = LoginService::from_env()?;
//!
//!     let observer: Arc<dyn LoginObserver> = Arc::new(|event: &LoginEvent| println!("{}", event));
//!     let qr = service.issue_ticket(Some(observer)).await?;
//!     println!("Scan the QR code at {}", qr.image_path.display());
//!
//!     if let Some(PollOutcome::Authenticated(_)) = service.wait_for_login().await {
//!         println!("Cookies: {}", service.session_info().cookies_as_string);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod error;
pub mod remote;
pub mod session;

// Re-export commonly used types
pub use auth::{
    LoginEvent, LoginObserver, LoginService, LoginTicket, PollOutcome, PollState, QrTicket,
    SessionCache,
};
pub use error::{LoginError, RemoteError};
pub use remote::{ConfigSource, EndpointConfig, LoginConfig, MpBackend, MpClient};
pub use session::{AuthSession, SessionCookie, SessionInfo, SessionStore};
