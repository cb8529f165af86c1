//! Security configuration assembled once at startup.
//!
//! Every field is typed and has a documented default; `validate` rejects
//! combinations that would silently weaken sessions instead of coercing them.

use jsonwebtoken::Algorithm;
use secrecy::{ExposeSecret, SecretString};
use std::{fmt, str::FromStr};
use thiserror::Error;

use super::model::SessionKind;

pub const DEFAULT_SESSION_PREFIX: &str = "token";
pub const DEFAULT_MAX_CHALLENGE_ATTEMPTS: u32 = 5;
pub const DEFAULT_CAPTCHA_SESSION_EXPIRATION: i64 = 60;
pub const DEFAULT_TWO_STEP_SESSION_EXPIRATION: i64 = 200;
pub const DEFAULT_AUTHENTICATION_SESSION_EXPIRATION: i64 = 30 * 24 * 60 * 60;
/// Upper bound for any session expiration, ten years in seconds.
pub const MAX_SESSION_EXPIRATION: i64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("session secret must not be empty")]
    EmptySecret,
    #[error("algorithm {0:?} requires a public secret for verification")]
    MissingPublicSecret(Algorithm),
    #[error("max challenge attempts must be at least 1")]
    ZeroAttempts,
    #[error("{0} session expiration must not be negative")]
    NegativeExpiration(SessionKind),
    #[error("{0} session expiration must not exceed {MAX_SESSION_EXPIRATION} seconds")]
    ExpirationTooLarge(SessionKind),
    #[error("session prefix {0:?} must be non-empty and contain only [A-Za-z0-9_-]")]
    InvalidPrefix(String),
    #[error("SameSite=None requires the Secure attribute")]
    InsecureSameSiteNone,
    #[error("invalid SameSite value {0:?}, expected strict, lax or none")]
    InvalidSameSite(String),
}

/// `SameSite` attribute of session cookies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => write!(f, "Strict"),
            Self::Lax => write!(f, "Lax"),
            Self::None => write!(f, "None"),
        }
    }
}

impl FromStr for SameSite {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "lax" => Ok(Self::Lax),
            "none" => Ok(Self::None),
            _ => Err(ConfigError::InvalidSameSite(value.to_string())),
        }
    }
}

/// Attributes of the cookie carrying a session token.
#[derive(Clone, Debug)]
pub struct CookieConfig {
    pub prefix: String,
    pub same_site: SameSite,
    pub secure: bool,
    pub http_only: bool,
    pub domain: Option<String>,
    /// Mirror the session expiration on the cookie so the client drops it too.
    pub expires_on_client: bool,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_SESSION_PREFIX.to_string(),
            same_site: SameSite::Strict,
            secure: true,
            http_only: true,
            domain: None,
            expires_on_client: false,
        }
    }
}

impl CookieConfig {
    /// Cookie (or header) name for a session kind: `{prefix}_{kind}`.
    #[must_use]
    pub fn name(&self, kind: SessionKind) -> String {
        format!("{}_{}", self.prefix, kind.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct SecurityConfig {
    secret: SecretString,
    public_secret: Option<SecretString>,
    algorithm: Algorithm,
    cookie: CookieConfig,
    max_challenge_attempts: u32,
    captcha_session_expiration: i64,
    two_step_session_expiration: i64,
    authentication_session_expiration: i64,
    authentication_session_refresh: bool,
    allow_login_with_username: bool,
    trust_forwarded_for: bool,
}

impl SecurityConfig {
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            public_secret: None,
            algorithm: Algorithm::HS256,
            cookie: CookieConfig::default(),
            max_challenge_attempts: DEFAULT_MAX_CHALLENGE_ATTEMPTS,
            captcha_session_expiration: DEFAULT_CAPTCHA_SESSION_EXPIRATION,
            two_step_session_expiration: DEFAULT_TWO_STEP_SESSION_EXPIRATION,
            authentication_session_expiration: DEFAULT_AUTHENTICATION_SESSION_EXPIRATION,
            authentication_session_refresh: true,
            allow_login_with_username: false,
            trust_forwarded_for: false,
        }
    }

    #[must_use]
    pub fn with_public_secret(mut self, public_secret: Option<SecretString>) -> Self {
        self.public_secret = public_secret;
        self
    }

    #[must_use]
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    #[must_use]
    pub fn with_cookie(mut self, cookie: CookieConfig) -> Self {
        self.cookie = cookie;
        self
    }

    #[must_use]
    pub fn with_max_challenge_attempts(mut self, attempts: u32) -> Self {
        self.max_challenge_attempts = attempts;
        self
    }

    /// Seconds until a captcha session expires; 0 disables expiration.
    #[must_use]
    pub fn with_captcha_session_expiration(mut self, seconds: i64) -> Self {
        self.captcha_session_expiration = seconds;
        self
    }

    /// Seconds until a two-step session expires; 0 disables expiration.
    #[must_use]
    pub fn with_two_step_session_expiration(mut self, seconds: i64) -> Self {
        self.two_step_session_expiration = seconds;
        self
    }

    /// Seconds until an authentication session expires; 0 disables expiration.
    #[must_use]
    pub fn with_authentication_session_expiration(mut self, seconds: i64) -> Self {
        self.authentication_session_expiration = seconds;
        self
    }

    #[must_use]
    pub fn with_authentication_session_refresh(mut self, refresh: bool) -> Self {
        self.authentication_session_refresh = refresh;
        self
    }

    #[must_use]
    pub fn with_allow_login_with_username(mut self, allow: bool) -> Self {
        self.allow_login_with_username = allow;
        self
    }

    /// Take the client address from `X-Forwarded-For`. Only safe behind a
    /// proxy that overwrites the header.
    #[must_use]
    pub fn with_trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    /// Reject malformed or unsafe settings.
    ///
    /// # Errors
    /// Returns the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret.expose_secret().trim().is_empty() {
            return Err(ConfigError::EmptySecret);
        }
        if !is_hmac(self.algorithm) && self.public_secret.is_none() {
            return Err(ConfigError::MissingPublicSecret(self.algorithm));
        }
        if self.max_challenge_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        for kind in SessionKind::ALL {
            let seconds = self.expiration_seconds(kind);
            if seconds < 0 {
                return Err(ConfigError::NegativeExpiration(kind));
            }
            if seconds > MAX_SESSION_EXPIRATION {
                return Err(ConfigError::ExpirationTooLarge(kind));
            }
        }
        let prefix = &self.cookie.prefix;
        if prefix.is_empty()
            || !prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConfigError::InvalidPrefix(prefix.clone()));
        }
        if self.cookie.same_site == SameSite::None && !self.cookie.secure {
            return Err(ConfigError::InsecureSameSiteNone);
        }
        Ok(())
    }

    pub(crate) fn secret(&self) -> &SecretString {
        &self.secret
    }

    pub(crate) fn public_secret(&self) -> Option<&SecretString> {
        self.public_secret.as_ref()
    }

    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    #[must_use]
    pub fn cookie(&self) -> &CookieConfig {
        &self.cookie
    }

    #[must_use]
    pub fn max_challenge_attempts(&self) -> u32 {
        self.max_challenge_attempts
    }

    /// Configured lifetime of a session kind in seconds (0 = never expires).
    #[must_use]
    pub fn expiration_seconds(&self, kind: SessionKind) -> i64 {
        match kind {
            SessionKind::Authentication => self.authentication_session_expiration,
            SessionKind::TwoStep => self.two_step_session_expiration,
            SessionKind::Captcha => self.captcha_session_expiration,
        }
    }

    #[must_use]
    pub fn authentication_session_refresh(&self) -> bool {
        self.authentication_session_refresh
    }

    #[must_use]
    pub fn allow_login_with_username(&self) -> bool {
        self.allow_login_with_username
    }

    #[must_use]
    pub fn trust_forwarded_for(&self) -> bool {
        self.trust_forwarded_for
    }
}

pub(crate) fn is_hmac(algorithm: Algorithm) -> bool {
    matches!(
        algorithm,
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
    )
}
