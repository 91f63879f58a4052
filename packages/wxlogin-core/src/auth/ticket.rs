//! Login ticket issuance and the QR code image written for it.

use crate::error::LoginError;
use crate::remote::MpBackend;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static QR_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(https?://mp\.weixin\.qq\.com/cgi-bin/loginqrcode\?action=getqrcode&param=\d+)")
        .expect("qr url pattern is valid")
});

static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"["']uuid["']\s*:\s*["']([^"']+)["']"#).expect("uuid pattern is valid")
});

/// One QR login attempt. Consumed by the poller that watches it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginTicket {
    /// Identifier the platform assigned to this attempt
    pub id: String,
    /// Locally generated id sent with every status query
    pub fingerprint: String,
    pub issued_at: DateTime<Utc>,
    /// Where the QR image was downloaded from
    pub qr_url: String,
}

/// A freshly issued ticket together with its QR image.
#[derive(Debug, Clone)]
pub struct IssuedTicket {
    pub ticket: LoginTicket,
    pub image: Vec<u8>,
}

/// QR code location embedded in the login page, if the page carries one.
fn qr_from_login_page(html: &str) -> Option<(String, String)> {
    let url = QR_URL_RE.captures(html)?.get(1)?.as_str().to_string();
    let id = UUID_RE.captures(html)?.get(1)?.as_str().to_string();
    Some((url, id))
}

fn api_qr_url(id: &str, now: DateTime<Utc>) -> String {
    format!(
        "/cgi-bin/scanloginqrcode?action=getqrcode&uuid={}&random={}",
        id,
        now.timestamp_millis()
    )
}

/// Request a login ticket and download its QR code.
///
/// The login page is tried first; when it does not embed a QR code the
/// ticket is started through the login API instead.
pub async fn issue_ticket<B: MpBackend>(backend: &B) -> Result<IssuedTicket, LoginError> {
    let fingerprint = uuid::Uuid::new_v4().to_string();

    let html = backend
        .login_page()
        .await
        .map_err(|e| LoginError::issue(format!("login page: {}", e)))?;

    let (qr_url, id) = match qr_from_login_page(&html) {
        Some(found) => {
            tracing::debug!("QR code found on the login page");
            found
        }
        None => {
            tracing::debug!("No QR code on the login page, starting login through the API");
            let id = backend
                .start_login(&fingerprint)
                .await
                .map_err(|e| LoginError::issue(format!("start login: {}", e)))?
                .unwrap_or_else(|| {
                    tracing::debug!("Platform sent no ticket id, generating one");
                    uuid::Uuid::new_v4().to_string()
                });
            (api_qr_url(&id, Utc::now()), id)
        }
    };

    let image = backend
        .qr_image(&qr_url)
        .await
        .map_err(|e| LoginError::issue(format!("QR image: {}", e)))?;
    if image.is_empty() {
        return Err(LoginError::issue("QR image is empty"));
    }

    tracing::info!("Login ticket issued: {}", id);

    Ok(IssuedTicket {
        ticket: LoginTicket {
            id,
            fingerprint,
            issued_at: Utc::now(),
            qr_url,
        },
        image,
    })
}

/// The QR code image on disk. Removed once the ticket is finished with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrArtifact {
    path: PathBuf,
}

impl QrArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn write(&self, image: &[u8]) -> io::Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&self.path, image)?;
        tracing::info!("QR code saved to {:?}", self.path);
        Ok(())
    }

    /// Path with a cache-busting timestamp, for handing to a viewer.
    pub fn image_ref(&self, now: DateTime<Utc>) -> String {
        format!("{}?t={}", self.path.display(), now.timestamp())
    }

    pub fn remove(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Removed QR code {:?}", self.path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove QR code {:?}: {}", self.path, e),
        }
    }
}
