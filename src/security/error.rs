//! Error taxonomy for session and challenge validation.
//!
//! Expected validation outcomes (wrong code, expired session, disabled account)
//! are [`SecurityError`] values and always carry their own status. Faults that
//! are not the client's doing (storage unavailable, unusable signing key) are
//! [`Error::Internal`] and are reported without detail.

use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use utoipa::ToSchema;

/// Validation outcomes a client can trigger.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum SecurityError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Deleted(String),
    #[error("{0}")]
    InvalidToken(String),
    #[error("Session is invalid.")]
    Invalid,
    #[error("Session has expired.")]
    Expired,
    #[error("This account has been disabled.")]
    Disabled,
    #[error("Account requires verification.")]
    Unverified,
    #[error("Your code does not match verification session code.")]
    Challenge,
    #[error("The maximum amount of attempts has been reached.")]
    MaxedOutChallenge,
    #[error("{message}")]
    Account { message: String, code: u16 },
    #[error("Incorrect password.")]
    Credentials,
    #[error("Insufficient roles required for this action.")]
    InsufficientRoles,
    #[error("Insufficient permissions required for this action.")]
    InsufficientPermissions,
}

impl SecurityError {
    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub(crate) fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken(message.into())
    }

    pub(crate) fn account(message: impl Into<String>, code: u16) -> Self {
        Self::Account {
            message: message.into(),
            code,
        }
    }

    /// Name reported as `error_type` in error responses.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFoundError",
            Self::Deleted(_) => "DeletedError",
            Self::InvalidToken(_) => "InvalidTokenError",
            Self::Invalid => "InvalidError",
            Self::Expired => "ExpiredError",
            Self::Disabled => "DisabledError",
            Self::Unverified => "UnverifiedError",
            Self::Challenge => "ChallengeError",
            Self::MaxedOutChallenge => "MaxedOutChallengeError",
            Self::Account { .. } => "AccountError",
            Self::Credentials => "CredentialsError",
            Self::InsufficientRoles => "InsufficientRolesError",
            Self::InsufficientPermissions => "InsufficientPermissionsError",
        }
    }

    /// HTTP-style status associated with the kind.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::NotFound(_) | Self::Deleted(_) => 404,
            Self::InvalidToken(_) => 400,
            Self::Invalid
            | Self::Expired
            | Self::Disabled
            | Self::Unverified
            | Self::Challenge
            | Self::MaxedOutChallenge
            | Self::Credentials => 401,
            Self::Account { code, .. } => *code,
            Self::InsufficientRoles | Self::InsufficientPermissions => 403,
        }
    }

    #[must_use]
    pub fn response(&self) -> ErrorResponse {
        ErrorResponse {
            message: self.to_string(),
            error_type: self.kind().to_string(),
            code: self.status(),
        }
    }
}

/// Error returned by every security operation.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error(transparent)]
    Security(#[from] SecurityError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// The validation outcome, if this is not an internal fault.
    #[must_use]
    pub fn security(&self) -> Option<&SecurityError> {
        match self {
            Self::Security(err) => Some(err),
            Self::Internal(_) => None,
        }
    }

    #[must_use]
    pub fn response(&self) -> ErrorResponse {
        match self {
            Self::Security(err) => err.response(),
            Self::Internal(_) => ErrorResponse {
                message: "An internal server error occurred.".to_string(),
                error_type: "ServerError".to_string(),
                code: 500,
            },
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// JSON body returned for every failed request.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub message: String,
    pub error_type: String,
    pub code: u16,
}
