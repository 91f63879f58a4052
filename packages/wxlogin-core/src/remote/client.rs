use crate::error::RemoteError;
use crate::remote::config::EndpointConfig;
use crate::remote::{HomePage, MpBackend, StatusReply};
use crate::session::SessionCookie;
use chrono::{DateTime, Utc};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Url;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, SystemTime};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// HTTP client for the official account platform.
///
/// Cookies persist across requests in a shared jar; that jar is what turns
/// into the authenticated session once a scan is confirmed.
#[derive(Debug)]
pub struct MpClient {
    base_url: String,
    http: RwLock<HttpState>,
    /// Expiry of each cookie, as last announced by a `Set-Cookie`.
    expiries: Mutex<BTreeMap<String, DateTime<Utc>>>,
}

#[derive(Debug, Clone)]
struct HttpState {
    client: reqwest::Client,
    jar: Arc<Jar>,
}

impl HttpState {
    fn build() -> Result<Self, RemoteError> {
        let jar = Arc::new(Jar::default());

        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"),
        );
        headers.insert(
            header::REFERER,
            HeaderValue::from_static("https://mp.weixin.qq.com/"),
        );

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .cookie_provider(jar.clone())
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self { client, jar })
    }
}

impl MpClient {
    pub fn with_endpoint(endpoint: &EndpointConfig) -> Result<Self, RemoteError> {
        Ok(Self {
            base_url: endpoint.base_url.clone(),
            http: RwLock::new(HttpState::build()?),
            expiries: Mutex::new(BTreeMap::new()),
        })
    }

    fn http(&self) -> HttpState {
        self.http
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn url(&self, path: &str) -> Result<Url, RemoteError> {
        Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| RemoteError::Parse(format!("bad url {}: {}", path, e)))
    }

    /// Remember expiry data from a response's `Set-Cookie` headers.
    fn record_cookies(&self, resp: &reqwest::Response) {
        let now = SystemTime::now();
        let mut expiries = self.expiries.lock().unwrap_or_else(PoisonError::into_inner);
        for cookie in resp.cookies() {
            let at = match (cookie.max_age(), cookie.expires()) {
                (Some(max_age), _) => Some(now + max_age),
                (None, Some(expires)) => Some(expires),
                (None, None) => None,
            };
            match at {
                Some(at) => {
                    expiries.insert(cookie.name().to_string(), DateTime::<Utc>::from(at));
                }
                None => {
                    expiries.remove(cookie.name());
                }
            }
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, RemoteError> {
        let resp = req.send().await?;
        self.record_cookies(&resp);
        if !resp.status().is_success() {
            return Err(RemoteError::Status(resp.status().as_u16()));
        }
        Ok(resp)
    }
}

fn content_type(resp: &reqwest::Response) -> String {
    resp.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Split a `Cookie:` header value into name/value pairs.
fn parse_cookie_header(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
        })
        .collect()
}

impl MpBackend for MpClient {
    async fn login_page(&self) -> Result<String, RemoteError> {
        let http = self.http();
        let resp = self.send(http.client.get(self.url("/")?)).await?;
        Ok(resp.text().await?)
    }

    async fn start_login(&self, fingerprint: &str) -> Result<Option<String>, RemoteError> {
        let http = self.http();

        // The platform expects a uuid cookie before it will start a login.
        let seed = uuid::Uuid::new_v4().to_string();
        let base = self.url("/")?;
        http.jar.add_cookie_str(&format!("uuid={}; Path=/", seed), &base);

        let form = [
            ("fingerprint", fingerprint),
            ("token", ""),
            ("lang", "zh_CN"),
            ("f", "json"),
            ("ajax", "1"),
            ("login_type", "3"),
        ];
        let resp = self
            .send(
                http.client
                    .post(self.url("/cgi-bin/bizlogin?action=startlogin")?)
                    .form(&form),
            )
            .await?;

        let from_cookie = resp
            .cookies()
            .find(|c| c.name() == "uuid")
            .map(|c| c.value().to_string());
        let from_header = resp
            .headers()
            .get("X-UUID")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(from_cookie.or(from_header).filter(|id| !id.is_empty()))
    }

    async fn qr_image(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        let http = self.http();
        let url = if url.starts_with("http") {
            Url::parse(url).map_err(|e| RemoteError::Parse(format!("bad url {}: {}", url, e)))?
        } else {
            self.url(url)?
        };

        let resp = self.send(http.client.get(url)).await?;
        let ct = content_type(&resp);
        if !ct.starts_with("image/") {
            return Err(RemoteError::Parse(format!(
                "expected an image, got content type {:?}",
                ct
            )));
        }
        Ok(resp.bytes().await?.to_vec())
    }

    async fn ask_status(&self, fingerprint: &str) -> Result<StatusReply, RemoteError> {
        let http = self.http();
        let resp = self
            .send(
                http.client
                    .get(self.url("/cgi-bin/scanloginqrcode")?)
                    .query(&[
                        ("action", "ask"),
                        ("fingerprint", fingerprint),
                        ("lang", "zh_CN"),
                        ("f", "json"),
                        ("ajax", "1"),
                    ]),
            )
            .await?;

        let json = content_type(&resp).starts_with("application/json");
        let body = resp.text().await?;
        Ok(StatusReply { json, body })
    }

    async fn home_page(&self, token: Option<&str>) -> Result<HomePage, RemoteError> {
        let http = self.http();
        let mut req = http.client.get(self.url("/cgi-bin/home")?);
        if let Some(token) = token {
            req = req.query(&[("token", token)]);
        }
        let resp = self.send(req).await?;
        let url = resp.url().to_string();
        let body = resp.text().await?;
        Ok(HomePage { url, body })
    }

    fn cookies(&self) -> Vec<SessionCookie> {
        let http = self.http();
        let Ok(base) = self.url("/") else {
            return Vec::new();
        };
        let Some(header) = http.jar.cookies(&base) else {
            return Vec::new();
        };
        let Ok(raw) = header.to_str() else {
            tracing::warn!("Cookie jar returned a non-ASCII cookie header");
            return Vec::new();
        };

        let expiries = self.expiries.lock().unwrap_or_else(PoisonError::into_inner);
        parse_cookie_header(raw)
            .into_iter()
            .map(|(name, value)| SessionCookie {
                expires: expiries.get(&name).copied(),
                name,
                value,
            })
            .collect()
    }

    fn inject_cookies(&self, cookies: &BTreeMap<String, String>) {
        let http = self.http();
        let Ok(base) = self.url("/") else {
            return;
        };
        for (name, value) in cookies {
            http.jar
                .add_cookie_str(&format!("{}={}; Path=/", name, value), &base);
        }
        tracing::debug!("Injected {} cookies", cookies.len());
    }

    fn clear_cookies(&self) {
        // A jar cannot be emptied in place, so start over with a fresh client.
        match HttpState::build() {
            Ok(fresh) => {
                *self.http.write().unwrap_or_else(PoisonError::into_inner) = fresh;
                self.expiries
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clear();
            }
            Err(e) => tracing::warn!("Failed to rebuild HTTP client, cookies kept: {}", e),
        }
    }

    fn replace_cookies(&self, cookies: &[SessionCookie]) {
        self.clear_cookies();
        let values: BTreeMap<String, String> = cookies
            .iter()
            .map(|c| (c.name.clone(), c.value.clone()))
            .collect();
        self.inject_cookies(&values);

        let mut expiries = self.expiries.lock().unwrap_or_else(PoisonError::into_inner);
        for cookie in cookies {
            if let Some(at) = cookie.expires {
                expiries.insert(cookie.name.clone(), at);
            }
        }
    }
}
