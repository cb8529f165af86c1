//! `Set-Cookie` values for session tokens.

use axum::http::{header::InvalidHeaderValue, HeaderValue};
use chrono::{DateTime, Utc};
use std::fmt::Write;

use crate::security::{CookieConfig, SessionKind};

const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Cookie carrying `token` for `kind`.
///
/// `Expires` and `Max-Age` are only emitted when the configuration mirrors
/// the session expiration on the client; otherwise the cookie lives for the
/// browser session and the server remains the only authority.
///
/// # Errors
/// Returns an error if the token contains bytes not allowed in a header.
pub fn set_cookie(
    config: &CookieConfig,
    kind: SessionKind,
    token: &str,
    expires_at: Option<DateTime<Utc>>,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{}={token}", config.name(kind));
    push_attributes(&mut cookie, config);
    if config.expires_on_client {
        if let Some(expires_at) = expires_at {
            let max_age = (expires_at - Utc::now()).num_seconds().max(0);
            let _ = write!(
                cookie,
                "; Expires={}; Max-Age={max_age}",
                expires_at.format(HTTP_DATE)
            );
        }
    }
    HeaderValue::from_str(&cookie)
}

/// Cookie that removes the stored token for `kind`.
///
/// # Errors
/// Returns an error if the configured domain is not a valid header value.
pub fn clear_cookie(
    config: &CookieConfig,
    kind: SessionKind,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{}=", config.name(kind));
    push_attributes(&mut cookie, config);
    cookie.push_str("; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Max-Age=0");
    HeaderValue::from_str(&cookie)
}

fn push_attributes(cookie: &mut String, config: &CookieConfig) {
    let _ = write!(cookie, "; Path=/; SameSite={}", config.same_site);
    if config.http_only {
        cookie.push_str("; HttpOnly");
    }
    if config.secure {
        cookie.push_str("; Secure");
    }
    if let Some(domain) = &config.domain {
        let _ = write!(cookie, "; Domain={domain}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::SameSite;
    use chrono::Duration;

    fn render(value: &HeaderValue) -> &str {
        value.to_str().unwrap_or_default()
    }

    #[test]
    fn default_cookie_is_strict_secure_and_session_scoped() -> anyhow::Result<()> {
        let value = set_cookie(
            &CookieConfig::default(),
            SessionKind::Authentication,
            "abc.def.ghi",
            Some(Utc::now() + Duration::hours(1)),
        )?;
        let cookie = render(&value);
        assert!(cookie.starts_with("token_authentication=abc.def.ghi; Path=/"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.contains("; HttpOnly"));
        assert!(cookie.contains("; Secure"));
        assert!(!cookie.contains("Expires="));
        assert!(!cookie.contains("Max-Age="));
        Ok(())
    }

    #[test]
    fn expires_on_client_mirrors_session() -> anyhow::Result<()> {
        let config = CookieConfig {
            prefix: "app".to_string(),
            same_site: SameSite::Lax,
            secure: false,
            http_only: false,
            domain: Some("example.com".to_string()),
            expires_on_client: true,
        };
        let expires_at = Utc::now() + Duration::seconds(200);
        let value = set_cookie(&config, SessionKind::TwoStep, "tok", Some(expires_at))?;
        let cookie = render(&value);
        assert!(cookie.starts_with("app_two-step=tok"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(!cookie.contains("HttpOnly"));
        assert!(!cookie.contains("Secure"));
        assert!(cookie.contains("; Domain=example.com"));
        assert!(cookie.contains(&format!("Expires={}", expires_at.format(HTTP_DATE))));
        assert!(cookie.ends_with("Max-Age=199") || cookie.ends_with("Max-Age=200"));
        Ok(())
    }

    #[test]
    fn never_expiring_session_has_no_expiry() -> anyhow::Result<()> {
        let config = CookieConfig {
            expires_on_client: true,
            ..CookieConfig::default()
        };
        let value = set_cookie(&config, SessionKind::Captcha, "tok", None)?;
        assert!(!render(&value).contains("Max-Age"));
        Ok(())
    }

    #[test]
    fn clear_cookie_expires_immediately() -> anyhow::Result<()> {
        let value = clear_cookie(&CookieConfig::default(), SessionKind::Authentication)?;
        let cookie = render(&value);
        assert!(cookie.starts_with("token_authentication=;"));
        assert!(cookie.ends_with("Max-Age=0"));
        Ok(())
    }

    #[test]
    fn rejects_tokens_with_control_bytes() {
        assert!(set_cookie(
            &CookieConfig::default(),
            SessionKind::Captcha,
            "bad\ntoken",
            None
        )
        .is_err());
    }
}
