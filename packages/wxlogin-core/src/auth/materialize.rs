//! Turning an authenticated HTTP context into an [`AuthSession`].

use crate::error::LoginError;
use crate::remote::HomePage;
use crate::session::{AuthSession, SessionCookie};
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::sync::LazyLock;

/// Session lifetime assumed when no cookie announces an expiry.
pub const DEFAULT_SESSION_LIFETIME_HOURS: i64 = 24;

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"token=([^&\s"']+)"#).expect("token pattern is valid"));

/// What the platform handed back once the scan was confirmed.
#[derive(Debug, Clone)]
pub struct AuthenticatedContext {
    pub home: HomePage,
    pub cookies: Vec<SessionCookie>,
}

/// Find the `token=` parameter in a URL or page.
pub fn extract_token(text: &str) -> Option<String> {
    TOKEN_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Earliest expiry still in the future, or `now` plus a day if no cookie
/// has one.
pub fn compute_expiry(cookies: &[SessionCookie], now: DateTime<Utc>) -> DateTime<Utc> {
    cookies
        .iter()
        .filter_map(|c| c.expires)
        .filter(|at| *at > now)
        .min()
        .unwrap_or(now + Duration::hours(DEFAULT_SESSION_LIFETIME_HOURS))
}

/// Build a session from the home page reached after login.
///
/// The token is taken from the final URL when the platform redirected to
/// `...?token=`, otherwise from the first `token=` in the page.
pub fn materialize(
    ctx: &AuthenticatedContext,
    now: DateTime<Utc>,
) -> Result<AuthSession, LoginError> {
    let token = extract_token(&ctx.home.url)
        .or_else(|| extract_token(&ctx.home.body))
        .ok_or_else(|| LoginError::Materialization("no token on the home page".to_string()))?;

    let expires_at = compute_expiry(&ctx.cookies, now);
    tracing::debug!(
        "Materialized session: token of {} chars, {} cookies, expires {}",
        token.len(),
        ctx.cookies.len(),
        expires_at
    );

    let session = AuthSession::new(Some(token), ctx.cookies.clone(), Some(expires_at));
    if !session.is_valid() {
        return Err(LoginError::Materialization("empty token".to_string()));
    }
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 12, 0, 0).unwrap()
    }

    fn home(url: &str, body: &str) -> HomePage {
        HomePage {
            url: url.to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_extract_token() {
        assert_eq!(
            extract_token("https://mp.weixin.qq.com/cgi-bin/home?t=home/index&lang=zh_CN&token=1788989385"),
            Some("1788989385".to_string())
        );
        assert_eq!(
            extract_token(r#"<a href="/cgi-bin/appmsg?token=42&lang=zh_CN">"#),
            Some("42".to_string())
        );
        assert_eq!(extract_token("data.t = 'token=abc'"), Some("abc".to_string()));
        assert_eq!(extract_token("<html>no session</html>"), None);
        assert_eq!(extract_token("token=&x=1"), None);
    }

    #[test]
    fn test_expiry_from_cookie() {
        let t = now() + Duration::days(4);
        let cookies = vec![
            SessionCookie::new("a", "1"),
            SessionCookie::new("b", "2").expiring(t),
        ];
        assert_eq!(compute_expiry(&cookies, now()), t);
    }

    #[test]
    fn test_expiry_takes_earliest_future() {
        let cookies = vec![
            SessionCookie::new("past", "0").expiring(now() - Duration::hours(1)),
            SessionCookie::new("late", "1").expiring(now() + Duration::days(30)),
            SessionCookie::new("soon", "2").expiring(now() + Duration::hours(3)),
        ];
        assert_eq!(compute_expiry(&cookies, now()), now() + Duration::hours(3));
    }

    #[test]
    fn test_expiry_defaults_to_a_day() {
        let cookies = vec![SessionCookie::new("a", "1")];
        assert_eq!(compute_expiry(&cookies, now()), now() + Duration::hours(24));
        assert_eq!(compute_expiry(&[], now()), now() + Duration::hours(24));
    }

    #[test]
    fn test_materialize() {
        let ctx = AuthenticatedContext {
            home: home(
                "https://mp.weixin.qq.com/cgi-bin/home?t=home/index&token=555",
                "<html>token=999</html>",
            ),
            cookies: vec![
                SessionCookie::new("slave_sid", "abc"),
                SessionCookie::new("data_ticket", "xyz").expiring(now() + Duration::days(2)),
            ],
        };
        let session = materialize(&ctx, now()).unwrap();
        assert!(session.is_valid());
        assert_eq!(session.token(), Some("555"));
        assert_eq!(session.expires_at(), Some(now() + Duration::days(2)));
        assert_eq!(session.cookies_as_string(), "data_ticket=xyz; slave_sid=abc");
    }

    #[test]
    fn test_materialize_token_from_body() {
        let ctx = AuthenticatedContext {
            home: home(
                "https://mp.weixin.qq.com/cgi-bin/home",
                r#"<script>wx.cgiData = {"url": "/cgi-bin/home?token=321"}</script>"#,
            ),
            cookies: vec![],
        };
        let session = materialize(&ctx, now()).unwrap();
        assert_eq!(session.token(), Some("321"));
        assert_eq!(session.expires_at(), Some(now() + Duration::hours(24)));
    }

    #[test]
    fn test_materialize_without_token_fails() {
        let ctx = AuthenticatedContext {
            home: home("https://mp.weixin.qq.com/", "<html>please log in</html>"),
            cookies: vec![SessionCookie::new("slave_sid", "abc")],
        };
        assert!(matches!(
            materialize(&ctx, now()),
            Err(LoginError::Materialization(_))
        ));
    }
}
