//! Login, per-request authentication, refresh and logout.
//!
//! Flow Overview:
//! - `login` resolves the account, checks the password, gates the account and
//!   creates (or reissues) an authentication session.
//! - `authenticate` validates the presented session and its bearer.
//! - `refresh` extends a live session when refresh is enabled.
//! - `logout` deactivates the presented session.
//! - `seed_initial_admin` creates the root account on first start.

use secrecy::{ExposeSecret, SecretString};
use tracing::{info, instrument, warn};

use super::error::{Result, SecurityError};
use super::factory::{IssuedSession, RequestContext};
use super::guard::Verification;
use super::model::{Account, Role, Session, SessionKind};
use super::validator::ValidatedSession;
use super::Security;

pub const ROOT_ROLE: &str = "Root";
pub const ROOT_PERMISSION: &str = "*:*";

impl Security {
    /// Authenticate with an email (or username, when allowed) and password.
    ///
    /// # Errors
    /// `NotFound` for unknown or deleted accounts, `Credentials` on password
    /// mismatch, then account guard errors.
    #[instrument(skip(self, context, password))]
    pub async fn login(
        &self,
        context: &RequestContext,
        identifier: &str,
        password: &SecretString,
    ) -> Result<IssuedSession> {
        let found = if self.config.allow_login_with_username() && !identifier.contains('@') {
            self.accounts.get_account_by_username(identifier).await?
        } else {
            self.accounts.get_account_by_email(identifier).await?
        };
        let account =
            found.ok_or_else(|| SecurityError::not_found("Account could not be found."))?;

        if !self
            .passwords
            .verify(password.expose_secret(), &account.password_hash)?
        {
            warn!(account_id = %account.id, "password mismatch");
            return Err(SecurityError::Credentials.into());
        }
        account.validate(Verification::Required)?;

        self.factory
            .create(SessionKind::Authentication, context, Some(account))
            .await
    }

    /// Validate the presented authentication session and its bearer.
    ///
    /// # Errors
    /// Token, session and account guard errors.
    pub async fn authenticate(&self, context: &RequestContext) -> Result<ValidatedSession> {
        let token = context.token(SessionKind::Authentication).unwrap_or_default();
        let session = self
            .validator
            .validate(SessionKind::Authentication, token)
            .await?;
        let bearer = self
            .validator
            .bearer(&session)
            .await?
            .ok_or_else(|| SecurityError::not_found("Account could not be found."))?;
        bearer.validate(Verification::Required)?;
        Ok(ValidatedSession {
            session,
            bearer: Some(bearer),
        })
    }

    /// Extend the presented authentication session and sign a new token.
    ///
    /// # Errors
    /// `AccountError` (403) when refresh is disabled, otherwise as
    /// [`Security::authenticate`].
    #[instrument(skip(self, context))]
    pub async fn refresh(&self, context: &RequestContext) -> Result<IssuedSession> {
        if !self.config.authentication_session_refresh() {
            return Err(SecurityError::account("Session refresh is disabled.", 403).into());
        }
        let validated = self.authenticate(context).await?;
        self.factory.reissue(validated.session).await
    }

    /// Deactivate the presented authentication session.
    ///
    /// The bearer is not gated so disabled accounts can still sign out.
    ///
    /// # Errors
    /// Token and session errors.
    #[instrument(skip(self, context))]
    pub async fn logout(&self, context: &RequestContext) -> Result<Session> {
        let token = context.token(SessionKind::Authentication).unwrap_or_default();
        let mut session = self
            .validator
            .validate(SessionKind::Authentication, token)
            .await?;
        self.sessions.deactivate_session(session.id).await?;
        session.active = false;
        info!(session_id = %session.id, "logged out");
        Ok(session)
    }

    /// Create the root account unless a live account already uses `email`.
    ///
    /// The password is hashed by the configured [`PasswordVerifier`] so the
    /// account can log in through the same verifier. Returns the account when
    /// it was created.
    ///
    /// [`PasswordVerifier`]: super::password::PasswordVerifier
    ///
    /// # Errors
    /// Internal errors from hashing or storage.
    pub async fn seed_initial_admin(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Option<Account>> {
        if self.accounts.get_account_by_email(email).await?.is_some() {
            return Ok(None);
        }
        let hash = self.passwords.hash(password.expose_secret())?;
        let mut account = Account::new(email.trim(), hash);
        account.verified = true;
        account.roles.push(Role::new(ROOT_ROLE, &[ROOT_PERMISSION]));
        self.accounts.insert_account(&account).await?;
        info!(account_id = %account.id, "initial admin account created");
        Ok(Some(account))
    }
}
