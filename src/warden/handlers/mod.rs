pub mod auth;
pub mod captcha;
pub mod health;
pub mod verification;

// common types and functions for the handlers
use axum::{
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;
use uuid::Uuid;

use super::cookie;
use crate::security::{Account, CookieConfig, IssuedSession, Session, SessionKind, ValidatedSession};

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AccountResponse {
    pub id: Uuid,
    pub email: String,
    pub username: Option<String>,
    pub verified: bool,
    pub roles: Vec<String>,
}

impl From<&Account> for AccountResponse {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            email: account.email.clone(),
            username: account.username.clone(),
            verified: account.verified,
            roles: account.roles.iter().map(|role| role.name.clone()).collect(),
        }
    }
}

/// Public view of a session. Tokens travel in cookies, never in bodies.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionResponse {
    pub id: Uuid,
    /// `authentication`, `two-step` or `captcha`
    pub kind: String,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub bearer: Option<AccountResponse>,
}

impl SessionResponse {
    fn new(session: &Session, bearer: Option<&Account>) -> Self {
        Self {
            id: session.id,
            kind: session.kind.to_string(),
            active: session.active,
            expires_at: session.expires_at,
            attempts: session.attempts(),
            bearer: bearer.map(AccountResponse::from),
        }
    }
}

impl From<&ValidatedSession> for SessionResponse {
    fn from(validated: &ValidatedSession) -> Self {
        Self::new(&validated.session, validated.bearer.as_ref())
    }
}

impl From<&Session> for SessionResponse {
    fn from(session: &Session) -> Self {
        Self::new(session, None)
    }
}

/// Body submitted to challenge endpoints.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Default)]
pub struct CodeRequest {
    #[serde(default)]
    pub code: String,
}

#[must_use]
pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").map_or(false, |re| re.is_match(email))
}

/// Response for a newly issued session: the token goes in `Set-Cookie`.
fn issued_response(
    config: &CookieConfig,
    issued: &IssuedSession,
    status: StatusCode,
) -> Response {
    let mut headers = HeaderMap::new();
    match cookie::set_cookie(
        config,
        issued.session.kind,
        &issued.token,
        issued.session.expires_at,
    ) {
        Ok(value) => {
            headers.insert(SET_COOKIE, value);
        }
        Err(err) => {
            error!("failed to build session cookie: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }
    (
        status,
        headers,
        Json(SessionResponse::from(&issued.session)),
    )
        .into_response()
}

/// Response that also drops the cookie of a consumed session.
fn consumed_response(config: &CookieConfig, kind: SessionKind, validated: &ValidatedSession) -> Response {
    let mut headers = HeaderMap::new();
    if let Ok(value) = cookie::clear_cookie(config, kind) {
        headers.insert(SET_COOKIE, value);
    }
    (headers, Json(SessionResponse::from(validated))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::Role;

    #[test]
    fn test_valid_email() {
        assert!(valid_email("a@example.com"));
        assert!(valid_email("first.last+tag@sub.example.org"));
        assert!(!valid_email("a@example"));
        assert!(!valid_email("not an email"));
        assert!(!valid_email("@example.com"));
    }

    #[test]
    fn session_response_hides_credentials() -> anyhow::Result<()> {
        let mut account = Account::new("a@example.com", "$argon2id$v=19$secret");
        account.roles.push(Role::new("Root", &["*:*"]));
        let session = Session::new(
            SessionKind::Authentication,
            Some(account.id),
            None,
            60,
            Utc::now(),
        )?;
        let validated = ValidatedSession {
            session,
            bearer: Some(account),
        };
        let value = serde_json::to_value(SessionResponse::from(&validated))?;
        assert_eq!(value["kind"], "authentication");
        assert_eq!(value["bearer"]["email"], "a@example.com");
        assert_eq!(value["bearer"]["roles"][0], "Root");
        assert!(!value.to_string().contains("argon2"));
        Ok(())
    }
}
