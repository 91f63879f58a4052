//! wxlogin CLI - Log into the WeChat official account platform from a terminal
//!
//! This binary can:
//! - Log in by scanning a QR code with the WeChat app
//! - Log in with a token and cookies from an earlier session
//! - Show and check the cached session
//! - Log out and forget the session

use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use clap::{Parser, Subcommand, ValueEnum};
use wxlogin_core::remote::config::{self, load_endpoint_config, load_login_config};
use wxlogin_core::{LoginEvent, LoginObserver, LoginService, PollOutcome, SessionCache};

#[derive(Parser)]
#[command(name = "wxlogin")]
#[command(version)]
#[command(about = "QR code login for the WeChat official account platform")]
#[command(long_about = "
wxlogin logs into the WeChat official account platform (mp.weixin.qq.com)
by QR code and keeps the resulting token and cookies for other tools.

Quick start:
  1. Log in:            wxlogin login
  2. Scan the QR code with the WeChat app and confirm
  3. Print the session: wxlogin status --format json
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log in by scanning a QR code
    #[command(alias = "connect")]
    Login,

    /// Show the current session
    Status,

    /// Log in with a token from an earlier session
    Token {
        /// Session token
        token: String,

        /// Session cookie as name=value (repeatable)
        #[arg(short, long = "cookie", value_parser = parse_cookie)]
        cookies: Vec<(String, String)>,
    },

    /// Check whether the session is still accepted by the platform
    Check,

    /// Log out and delete the cached session
    #[command(alias = "disconnect")]
    Logout,

    /// Show configuration paths and settings
    Config,
}

fn parse_cookie(s: &str) -> Result<(String, String)> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected name=value, got '{}'", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(anyhow!("cookie name is empty in '{}'", s));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("wxlogin={},wxlogin_core={}", log_level, log_level).into()),
        )
        .with_target(false)
        .init();

    match &cli.command {
        Commands::Login => cmd_login(&cli).await,
        Commands::Status => cmd_status(&cli).await,
        Commands::Token { token, cookies } => {
            let cookies: BTreeMap<String, String> = cookies.iter().cloned().collect();
            cmd_token(&cli, token, &cookies).await
        }
        Commands::Check => cmd_check(&cli).await,
        Commands::Logout => cmd_logout(&cli).await,
        Commands::Config => cmd_config(&cli).await,
    }
}

/// Service with any cached session already loaded.
fn open_service() -> Result<LoginService> {
    let service = LoginService::from_env().context("Failed to create HTTP client")?;
    if let Err(e) = service.restore() {
        tracing::warn!("Ignoring session cache: {}", e);
    }
    Ok(service)
}

fn event_printer(format: OutputFormat) -> Arc<dyn LoginObserver> {
    Arc::new(move |event: &LoginEvent| match format {
        OutputFormat::Text => println!("  {}", event.message()),
        OutputFormat::Json => println!("{}", serde_json::json!(event)),
    })
}

async fn cmd_login(cli: &Cli) -> Result<()> {
    let service = open_service()?;

    if service.session_info().is_logged_in && service.is_login_valid().await {
        match cli.format {
            OutputFormat::Text => {
                println!("Already logged in.");
                println!("Use 'wxlogin logout' to sign out first.");
            }
            OutputFormat::Json => {
                println!("{}", serde_json::json!({
                    "status": "already_logged_in",
                    "session": service.session_info(),
                }));
            }
        }
        return Ok(());
    }

    match cli.format {
        OutputFormat::Text => println!("Requesting QR code..."),
        OutputFormat::Json => {}
    }

    let qr = service.issue_ticket(Some(event_printer(cli.format))).await?;

    match cli.format {
        OutputFormat::Text => {
            println!();
            println!("Scan the QR code with the WeChat app:\n\n  {}\n", qr.image_path.display());
            println!("Waiting for confirmation (Ctrl+C to cancel)...");
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "status": "awaiting_scan",
                "qr": qr,
            }));
        }
    }

    let outcome = tokio::select! {
        outcome = service.wait_for_login() => outcome,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, cancelling login");
            service.cancel_active().await
        }
    };

    let (status, error) = match outcome {
        Some(PollOutcome::Authenticated(_)) => ("logged_in", None),
        Some(PollOutcome::Expired) => ("expired", Some("QR code expired, run 'wxlogin login' again".to_string())),
        Some(PollOutcome::MaterializationFailed(e)) => ("failed", Some(e)),
        Some(PollOutcome::Cancelled) | None => ("cancelled", Some("Login cancelled".to_string())),
    };

    match cli.format {
        OutputFormat::Text => match &error {
            None => {
                let info = service.session_info();
                println!();
                println!("Logged in.");
                println!("Token:   {}", info.token.as_deref().unwrap_or("-"));
                if let Some(expires_at) = info.expires_at {
                    println!("Expires: {}", expires_at.to_rfc3339());
                }
            }
            Some(e) => eprintln!("{}", e),
        },
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "status": status,
                "error": error,
                "session": service.session_info(),
            }));
        }
    }

    match error {
        None => Ok(()),
        Some(e) => Err(anyhow!(e)),
    }
}

async fn cmd_status(cli: &Cli) -> Result<()> {
    let service = open_service()?;
    let info = service.session_info();

    match cli.format {
        OutputFormat::Text => {
            if info.is_logged_in {
                println!("Status:  Logged in");
                println!("Token:   {}", info.token.as_deref().unwrap_or("-"));
                println!(
                    "Expires: {}",
                    info.expires_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string())
                );
                println!("Cookies: {}", info.cookies.len());
                for (name, value) in &info.cookies {
                    println!("  {} = {}", name, value);
                }
            } else {
                println!("Status: Not logged in");
                println!();
                println!("Run 'wxlogin login' to scan a QR code.");
            }
            if let Some(cache) = service.cache() {
                println!();
                println!("Session cache: {}", cache.path().display());
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!(info));
        }
    }

    Ok(())
}

async fn cmd_token(cli: &Cli, token: &str, cookies: &BTreeMap<String, String>) -> Result<()> {
    let service = LoginService::from_env().context("Failed to create HTTP client")?;
    let accepted = service.login_with_token(token, cookies).await;

    match cli.format {
        OutputFormat::Text => {
            if accepted {
                println!("Token accepted, session saved.");
            } else {
                eprintln!("Token rejected by the platform.");
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "status": if accepted { "logged_in" } else { "rejected" },
                "session": service.session_info(),
            }));
        }
    }

    if accepted {
        Ok(())
    } else {
        Err(anyhow!("token login failed"))
    }
}

async fn cmd_check(cli: &Cli) -> Result<()> {
    let service = open_service()?;
    let valid = service.is_login_valid().await;

    match cli.format {
        OutputFormat::Text => {
            if valid {
                println!("Session is valid.");
            } else {
                println!("Session is not valid. Run 'wxlogin login' to log in again.");
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "valid": valid }));
        }
    }

    Ok(())
}

async fn cmd_logout(cli: &Cli) -> Result<()> {
    let service = open_service()?;
    let was_logged_in = service.session_info().is_logged_in;

    service.logout().await;

    match cli.format {
        OutputFormat::Text => {
            if was_logged_in {
                println!("Logged out.");
            } else {
                println!("Not logged in.");
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "status": if was_logged_in { "logged_out" } else { "not_logged_in" },
            }));
        }
    }

    Ok(())
}

async fn cmd_config(cli: &Cli) -> Result<()> {
    let endpoint = load_endpoint_config();
    let login = load_login_config();
    let config_path = config::get_config_file_path_string();
    let cache_path = SessionCache::default_location()
        .map(|c| c.path().display().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    match cli.format {
        OutputFormat::Text => {
            println!("Configuration");
            println!("=============");
            println!();
            println!("Config file:     {}", config_path);
            println!("Platform:        {} (from {})", endpoint.base_url, endpoint.source);
            println!("Poll interval:   {}s", login.poll_interval.as_secs());
            println!("Error backoff:   {}s", login.backoff.as_secs());
            println!("QR code image:   {}", login.qr_code_path.display());
            println!("Session cache:   {} ({})", cache_path, if login.persist_session { "enabled" } else { "disabled" });
            println!();
            println!("Environment variables:");
            println!("  WXLOGIN_BASE_URL - Override platform URL");
            println!();
            println!("Example config.toml:");
            println!();
            println!("{}", config::generate_example_config());
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "config_file": config_path,
                "base_url": endpoint.base_url,
                "base_url_source": format!("{}", endpoint.source),
                "poll_interval_secs": login.poll_interval.as_secs(),
                "backoff_secs": login.backoff.as_secs(),
                "qr_code_path": login.qr_code_path,
                "session_cache": cache_path,
                "persist_session": login.persist_session,
            }));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cookie() {
        assert_eq!(
            parse_cookie("slave_sid=abc=").unwrap(),
            ("slave_sid".to_string(), "abc=".to_string())
        );
        assert!(parse_cookie("novalue").is_err());
        assert!(parse_cookie("=x").is_err());
    }

    #[test]
    fn test_cli_parses_commands() {
        let cli = Cli::try_parse_from([
            "wxlogin", "token", "42", "--cookie", "a=1", "-c", "b=2", "--format", "json",
        ])
        .unwrap();
        match cli.command {
            Commands::Token { token, cookies } => {
                assert_eq!(token, "42");
                assert_eq!(cookies.len(), 2);
            }
            _ => panic!("expected token command"),
        }

        assert!(matches!(
            Cli::try_parse_from(["wxlogin", "connect"]).unwrap().command,
            Commands::Login
        ));
        assert!(matches!(
            Cli::try_parse_from(["wxlogin", "disconnect"]).unwrap().command,
            Commands::Logout
        ));
    }
}
