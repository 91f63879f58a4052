//! Remote platform access.
//!
//! [`MpBackend`] is everything the login flow needs from the platform.
//! [`MpClient`] implements it over HTTP; tests script their own.

mod client;
pub mod config;

use crate::error::RemoteError;
use crate::session::SessionCookie;
use std::collections::BTreeMap;
use std::future::Future;

pub use client::MpClient;
pub use config::{load_endpoint_config, load_login_config, ConfigSource, EndpointConfig, LoginConfig};

/// Raw reply to a status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReply {
    /// Whether the response declared a JSON content type.
    pub json: bool,
    pub body: String,
}

impl StatusReply {
    pub fn json(body: impl Into<String>) -> Self {
        Self {
            json: true,
            body: body.into(),
        }
    }
}

/// The platform home page after following redirects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomePage {
    /// Final URL once redirects settled.
    pub url: String,
    pub body: String,
}

/// Operations the login flow performs against the platform.
pub trait MpBackend: Send + Sync + 'static {
    /// HTML of the login page.
    fn login_page(&self) -> impl Future<Output = Result<String, RemoteError>> + Send;

    /// Start a scan login bound to `fingerprint`. Returns the ticket id the
    /// platform assigned, if it sent one back.
    fn start_login(
        &self,
        fingerprint: &str,
    ) -> impl Future<Output = Result<Option<String>, RemoteError>> + Send;

    /// Download the QR code image at `url`.
    fn qr_image(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, RemoteError>> + Send;

    /// Ask for the scan status of the login bound to `fingerprint`.
    fn ask_status(
        &self,
        fingerprint: &str,
    ) -> impl Future<Output = Result<StatusReply, RemoteError>> + Send;

    /// Fetch the home page, optionally with an explicit token.
    fn home_page(
        &self,
        token: Option<&str>,
    ) -> impl Future<Output = Result<HomePage, RemoteError>> + Send;

    /// Cookies the platform currently has set on this client.
    fn cookies(&self) -> Vec<SessionCookie>;

    /// Add cookies to the client's jar.
    fn inject_cookies(&self, cookies: &BTreeMap<String, String>);

    /// Forget every cookie.
    fn clear_cookies(&self);

    /// Replace the whole cookie set, e.g. with a snapshot taken by
    /// [`cookies`](MpBackend::cookies).
    fn replace_cookies(&self, cookies: &[SessionCookie]) {
        self.clear_cookies();
        let cookies: BTreeMap<String, String> = cookies
            .iter()
            .map(|c| (c.name.clone(), c.value.clone()))
            .collect();
        self.inject_cookies(&cookies);
    }
}
