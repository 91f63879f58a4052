use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Default platform URL
const DEFAULT_BASE_URL: &str = "https://mp.weixin.qq.com";

/// Environment variable name for platform URL override
const ENV_BASE_URL: &str = "WXLOGIN_BASE_URL";

const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
const DEFAULT_BACKOFF_SECS: u64 = 5;

/// Configuration file structure
#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    platform: Option<PlatformSection>,
    login: Option<LoginSection>,
}

#[derive(Debug, Deserialize, Default)]
struct PlatformSection {
    /// Platform URL (e.g., "https://mp.weixin.qq.com")
    base_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginSection {
    poll_interval_secs: Option<u64>,
    backoff_secs: Option<u64>,
    qr_code_path: Option<PathBuf>,
    persist_session: Option<bool>,
}

/// Where requests go
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Base URL without trailing slash
    pub base_url: String,
    /// Source of the configuration (for logging)
    pub source: ConfigSource,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            source: ConfigSource::Default,
        }
    }
}

/// Where the configuration came from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    /// Using default hardcoded values
    Default,
    /// Loaded from environment variable
    Environment,
    /// Loaded from config file
    ConfigFile,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::ConfigFile => write!(f, "config file"),
        }
    }
}

/// Login flow settings
#[derive(Debug, Clone, PartialEq)]
pub struct LoginConfig {
    /// Wait between status queries while waiting for a scan
    pub poll_interval: Duration,
    /// Wait after a failed status query. Always longer than `poll_interval`.
    pub backoff: Duration,
    /// Where the QR code image is written
    pub qr_code_path: PathBuf,
    /// Cache a successful session on disk
    pub persist_session: bool,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            backoff: Duration::from_secs(DEFAULT_BACKOFF_SECS),
            qr_code_path: default_qr_code_path(),
            persist_session: true,
        }
    }
}

impl LoginConfig {
    /// Force `backoff` to be strictly longer than `poll_interval`.
    pub fn validated(mut self) -> Self {
        if self.poll_interval.is_zero() {
            self.poll_interval = Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS);
        }
        if self.backoff <= self.poll_interval {
            let fixed = self.poll_interval + Duration::from_secs(1);
            tracing::warn!(
                "backoff ({:?}) must exceed poll interval ({:?}), using {:?}",
                self.backoff,
                self.poll_interval,
                fixed
            );
            self.backoff = fixed;
        }
        self
    }
}

/// Get the wxlogin config directory
pub(crate) fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|p| p.join("wxlogin"))
}

fn default_qr_code_path() -> PathBuf {
    dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
        .unwrap_or_else(std::env::temp_dir)
        .join("wxlogin")
        .join("wx_qrcode.png")
}

/// Get the path to the configuration file
fn get_config_file_path() -> Option<PathBuf> {
    get_config_dir().map(|p| p.join("config.toml"))
}

/// Load configuration from the config file
fn load_config_file() -> Option<ConfigFile> {
    let path = get_config_file_path()?;

    if !path.exists() {
        return None;
    }

    match fs::read_to_string(&path) {
        Ok(content) => match parse_config(&content) {
            Ok(config) => {
                tracing::debug!("Loaded config from {:?}", path);
                Some(config)
            }
            Err(e) => {
                tracing::warn!("Failed to parse config file {:?}: {}", path, e);
                None
            }
        },
        Err(e) => {
            tracing::warn!("Failed to read config file {:?}: {}", path, e);
            None
        }
    }
}

fn parse_config(content: &str) -> Result<ConfigFile, toml::de::Error> {
    toml::from_str(content)
}

fn normalize_url(url: &str) -> Option<String> {
    let url = url.trim().trim_end_matches('/');
    (!url.is_empty()).then(|| url.to_string())
}

fn endpoint_from(env: Option<String>, file: Option<&ConfigFile>) -> EndpointConfig {
    // Priority 1: Environment variable
    if let Some(url) = env.as_deref().and_then(normalize_url) {
        tracing::info!("Using platform URL from environment variable: {}", url);
        return EndpointConfig {
            base_url: url,
            source: ConfigSource::Environment,
        };
    }

    // Priority 2: Config file
    if let Some(url) = file
        .and_then(|f| f.platform.as_ref())
        .and_then(|p| p.base_url.as_deref())
        .and_then(normalize_url)
    {
        tracing::info!("Using platform URL from config file: {}", url);
        return EndpointConfig {
            base_url: url,
            source: ConfigSource::ConfigFile,
        };
    }

    // Priority 3: Default values
    tracing::debug!("Using default platform URL: {}", DEFAULT_BASE_URL);
    EndpointConfig::default()
}

fn login_from(file: Option<&ConfigFile>) -> LoginConfig {
    let mut config = LoginConfig::default();
    if let Some(section) = file.and_then(|f| f.login.as_ref()) {
        if let Some(secs) = section.poll_interval_secs {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = section.backoff_secs {
            config.backoff = Duration::from_secs(secs);
        }
        if let Some(path) = &section.qr_code_path {
            config.qr_code_path = path.clone();
        }
        if let Some(persist) = section.persist_session {
            config.persist_session = persist;
        }
    }
    config.validated()
}

/// Load platform endpoint configuration with priority:
/// 1. Environment variable (WXLOGIN_BASE_URL)
/// 2. Config file (~/.config/wxlogin/config.toml)
/// 3. Default values
pub fn load_endpoint_config() -> EndpointConfig {
    endpoint_from(std::env::var(ENV_BASE_URL).ok(), load_config_file().as_ref())
}

/// Load the `[login]` table of the config file over the defaults.
pub fn load_login_config() -> LoginConfig {
    login_from(load_config_file().as_ref())
}

/// Get the path to the config file for documentation purposes
pub fn get_config_file_path_string() -> String {
    get_config_file_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "~/.config/wxlogin/config.toml".to_string())
}

/// Generate example config file content
pub fn generate_example_config() -> String {
    r#"# wxlogin configuration
# Place this file at: ~/.config/wxlogin/config.toml

[platform]
# Platform URL, override for a proxy or a test server
# Default: https://mp.weixin.qq.com
# base_url = "https://mp.weixin.qq.com"

[login]
# Seconds between status queries while waiting for a scan
# poll_interval_secs = 2
# Seconds to wait after a failed status query (must exceed poll_interval_secs)
# backoff_secs = 5
# Where the QR code image is written
# qr_code_path = "/tmp/wx_qrcode.png"
# Keep the session between runs
# persist_session = true
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_priority() {
        let file = parse_config("[platform]\nbase_url = \"http://file.local/\"\n").unwrap();

        let env = endpoint_from(Some(" http://env.local/ ".to_string()), Some(&file));
        assert_eq!(env.base_url, "http://env.local");
        assert_eq!(env.source, ConfigSource::Environment);

        let from_file = endpoint_from(Some("  ".to_string()), Some(&file));
        assert_eq!(from_file.base_url, "http://file.local");
        assert_eq!(from_file.source, ConfigSource::ConfigFile);

        let default = endpoint_from(None, None);
        assert_eq!(default.base_url, DEFAULT_BASE_URL);
        assert_eq!(default.source, ConfigSource::Default);
    }

    #[test]
    fn test_login_section() {
        let file = parse_config(
            "[login]\npoll_interval_secs = 3\nbackoff_secs = 10\nqr_code_path = \"/tmp/qr.png\"\npersist_session = false\n",
        )
        .unwrap();
        let config = login_from(Some(&file));
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.backoff, Duration::from_secs(10));
        assert_eq!(config.qr_code_path, PathBuf::from("/tmp/qr.png"));
        assert!(!config.persist_session);
    }

    #[test]
    fn test_defaults() {
        let config = login_from(None);
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.backoff, Duration::from_secs(5));
        assert!(config.persist_session);
        assert!(config.qr_code_path.ends_with("wx_qrcode.png"));
    }

    #[test]
    fn test_backoff_must_exceed_interval() {
        let file = parse_config("[login]\npoll_interval_secs = 4\nbackoff_secs = 4\n").unwrap();
        let config = login_from(Some(&file));
        assert!(config.backoff > config.poll_interval);
        assert_eq!(config.backoff, Duration::from_secs(5));
    }

    #[test]
    fn test_example_config_parses() {
        assert!(parse_config(&generate_example_config()).is_ok());
    }
}
