//! Two-step verification flow.
//!
//! Flow Overview:
//! - `request_two_step_verification` retires the client's prior two-step
//!   session, creates a new one for the account named by the request and
//!   hands the code to the delivery channel.
//! - `two_step_verification` checks a code for a verified bearer.
//! - `verify_account` checks a code and marks the bearer verified. The
//!   session is consumed only after the account write lands, so a failed
//!   write leaves the code usable for a retry.
//!
//! Session state is checked before bearer state, so a dead session never
//! reveals anything about its account. Terminal states (consumed, maxed out,
//! expired) are final; an expired session is deactivated when next presented.

use tracing::{info, instrument};

use super::error::{Result, SecurityError};
use super::factory::{IssuedSession, RequestContext};
use super::guard::Verification;
use super::model::{Account, AccountField, Session, SessionKind};
use super::validator::ValidatedSession;
use super::Security;

impl Security {
    /// Create and deliver a two-step session.
    ///
    /// # Errors
    /// `NotFound` when no live account matches, `Disabled` for disabled
    /// accounts, `Unverified` when `verification` demands it.
    #[instrument(skip(self, context, account))]
    pub async fn request_two_step_verification(
        &self,
        context: &RequestContext,
        account: Option<Account>,
        verification: Verification,
    ) -> Result<IssuedSession> {
        let account = match account {
            Some(account) => account,
            None => self
                .factory
                .resolve_account(SessionKind::TwoStep, context)
                .await?
                .ok_or_else(|| SecurityError::not_found("Account could not be found."))?,
        };
        account.validate(verification)?;

        let issued = self
            .factory
            .create(SessionKind::TwoStep, context, Some(account.clone()))
            .await?;
        self.deliver(&issued, Some(account.email)).await?;
        Ok(issued)
    }

    /// Check a two-step code. The bearer must be verified.
    ///
    /// # Errors
    /// Token, session, account and challenge errors, first failure wins.
    #[instrument(skip(self, context, code))]
    pub async fn two_step_verification(
        &self,
        context: &RequestContext,
        code: &str,
    ) -> Result<ValidatedSession> {
        let (mut session, bearer) = self.load_two_step(context).await?;
        bearer.validate(Verification::Required)?;
        self.engine.check(&session, code).await?;
        session.active = false;
        Ok(ValidatedSession {
            session,
            bearer: Some(bearer),
        })
    }

    /// Check a two-step code and mark the bearer verified.
    ///
    /// # Errors
    /// `AccountError` (403) when the bearer is already verified, otherwise as
    /// [`Security::two_step_verification`].
    #[instrument(skip(self, context, code))]
    pub async fn verify_account(
        &self,
        context: &RequestContext,
        code: &str,
    ) -> Result<ValidatedSession> {
        let (mut session, mut bearer) = self.load_two_step(context).await?;
        bearer.validate(Verification::NotRequired)?;
        if bearer.verified {
            return Err(SecurityError::account("Account already verified.", 403).into());
        }
        self.engine.verify(&session, code).await?;

        bearer.verified = true;
        self.accounts
            .save_account(&bearer, &[AccountField::Verified])
            .await?;
        self.engine.consume(&session).await?;
        session.active = false;
        info!(account_id = %bearer.id, "account verified");
        Ok(ValidatedSession {
            session,
            bearer: Some(bearer),
        })
    }

    /// Load a live two-step session, then its bearer.
    async fn load_two_step(&self, context: &RequestContext) -> Result<(Session, Account)> {
        let token = context.token(SessionKind::TwoStep).unwrap_or_default();
        let session = self.validator.validate(SessionKind::TwoStep, token).await?;
        let bearer = self
            .validator
            .bearer(&session)
            .await?
            .ok_or_else(|| SecurityError::not_found("Account could not be found."))?;
        Ok((session, bearer))
    }
}
