//! Accounts, roles and session records.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, net::IpAddr, str::FromStr};
use uuid::Uuid;

/// Kind tag carried by every session record and token.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionKind {
    /// Logged-in client.
    Authentication,
    /// One-time code delivered out-of-band.
    TwoStep,
    /// Human-verification code.
    Captcha,
}

impl SessionKind {
    pub const ALL: [Self; 3] = [Self::Authentication, Self::TwoStep, Self::Captcha];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::TwoStep => "two-step",
            Self::Captcha => "captcha",
        }
    }

    /// Whether sessions of this kind carry a challenge code.
    #[must_use]
    pub fn is_challenge(self) -> bool {
        !matches!(self, Self::Authentication)
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| format!("unknown session kind: {value}"))
    }
}

/// Code state of a two-step or captcha session. The plaintext code is never kept.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Challenge {
    pub code_hash: String,
    pub attempts: u32,
    pub max_attempts: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub kind: SessionKind,
    pub created_at: DateTime<Utc>,
    /// `None` never expires.
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
    /// Set by storage housekeeping, never by the session lifecycle itself.
    pub deleted: bool,
    /// Account the session is issued for; anonymous captcha sessions have none.
    pub bearer: Option<Uuid>,
    pub ip: Option<IpAddr>,
    pub challenge: Option<Challenge>,
}

impl Session {
    /// New active record expiring `ttl_seconds` after `now` (0 = never).
    ///
    /// # Errors
    /// When the expiration falls outside the representable time range.
    pub fn new(
        kind: SessionKind,
        bearer: Option<Uuid>,
        ip: Option<IpAddr>,
        ttl_seconds: i64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            kind,
            created_at: now,
            expires_at: expiration_from(now, ttl_seconds)?,
            active: true,
            deleted: false,
            bearer,
            ip,
            challenge: None,
        })
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.challenge.as_ref().map_or(0, |challenge| challenge.attempts)
    }
}

pub(crate) fn expiration_from(
    now: DateTime<Utc>,
    ttl_seconds: i64,
) -> anyhow::Result<Option<DateTime<Utc>>> {
    if ttl_seconds <= 0 {
        return Ok(None);
    }
    Duration::try_seconds(ttl_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .map(Some)
        .ok_or_else(|| anyhow::anyhow!("session expiration of {ttl_seconds}s is out of range"))
}

/// Session columns a caller may persist through `SessionStore::save_session`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionField {
    Active,
    ExpiresAt,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub permissions: Vec<String>,
}

impl Role {
    #[must_use]
    pub fn new(name: impl Into<String>, permissions: &[&str]) -> Self {
        Self {
            name: name.into(),
            permissions: permissions.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub username: Option<String>,
    /// PHC formatted credential hash.
    pub password_hash: String,
    pub verified: bool,
    pub disabled: bool,
    /// Soft-delete marker.
    pub deleted: bool,
    pub roles: Vec<Role>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    #[must_use]
    pub fn new(email: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            username: None,
            password_hash: password_hash.into(),
            verified: false,
            disabled: false,
            deleted: false,
            roles: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// Account columns a caller may persist through `AccountStore::save_account`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccountField {
    Verified,
    Disabled,
    Deleted,
}
