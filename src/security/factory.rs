//! Session creation.
//!
//! Flow Overview:
//! - Resolve the bearer: explicit, by email, or by username when allowed.
//!   Captcha sessions may be anonymous.
//! - Challenge kinds retire the presented prior token of the same kind, so a
//!   client holds at most one live challenge per kind.
//! - Authentication reissues a live prior session of the same bearer when
//!   refresh is enabled, otherwise deactivates it and starts a new one.

use chrono::Utc;
use std::{collections::HashMap, net::IpAddr, sync::Arc};
use tracing::{debug, info, instrument};

use super::challenge::ChallengeEngine;
use super::config::SecurityConfig;
use super::error::{Error, Result, SecurityError};
use super::model::{expiration_from, Account, Session, SessionField, SessionKind};
use super::store::{AccountStore, SessionStore};
use super::token::TokenCodec;
use super::validator::SessionValidator;

/// What a request brings to a session operation.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub ip: Option<IpAddr>,
    pub email: Option<String>,
    pub username: Option<String>,
    tokens: HashMap<SessionKind, String>,
}

impl RequestContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_ip(mut self, ip: Option<IpAddr>) -> Self {
        self.ip = ip;
        self
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    #[must_use]
    pub fn with_token(mut self, kind: SessionKind, token: impl Into<String>) -> Self {
        self.tokens.insert(kind, token.into());
        self
    }

    /// Token presented for a kind, if any.
    #[must_use]
    pub fn token(&self, kind: SessionKind) -> Option<&str> {
        self.tokens.get(&kind).map(String::as_str)
    }
}

/// A freshly created or reissued session with its signed token.
#[derive(Clone, Debug)]
pub struct IssuedSession {
    pub session: Session,
    pub token: String,
    /// Plaintext challenge code, handed out once for delivery.
    pub code: Option<String>,
}

/// Errors that only mean "the prior token is already unusable".
fn is_stale(err: &Error) -> bool {
    matches!(
        err.security(),
        Some(
            SecurityError::NotFound(_)
                | SecurityError::Deleted(_)
                | SecurityError::InvalidToken(_)
                | SecurityError::Expired
        )
    )
}

#[derive(Clone)]
pub struct SessionFactory {
    config: Arc<SecurityConfig>,
    codec: Arc<TokenCodec>,
    validator: SessionValidator,
    engine: ChallengeEngine,
    sessions: Arc<dyn SessionStore>,
    accounts: Arc<dyn AccountStore>,
}

impl SessionFactory {
    #[must_use]
    pub fn new(
        config: Arc<SecurityConfig>,
        codec: Arc<TokenCodec>,
        sessions: Arc<dyn SessionStore>,
        accounts: Arc<dyn AccountStore>,
    ) -> Self {
        let validator = SessionValidator::new(
            Arc::clone(&codec),
            Arc::clone(&sessions),
            Arc::clone(&accounts),
        );
        let engine = ChallengeEngine::new(Arc::clone(&sessions));
        Self {
            config,
            codec,
            validator,
            engine,
            sessions,
            accounts,
        }
    }

    /// Find the account a new session of `kind` is for.
    ///
    /// # Errors
    /// `NotFound` when an identifier is given but matches no live account, or
    /// when none is given for a kind that needs a bearer.
    pub async fn resolve_account(
        &self,
        kind: SessionKind,
        context: &RequestContext,
    ) -> Result<Option<Account>> {
        let found = if let Some(email) = context.email.as_deref() {
            self.accounts.get_account_by_email(email).await?
        } else if let Some(username) = context
            .username
            .as_deref()
            .filter(|_| self.config.allow_login_with_username())
        {
            self.accounts.get_account_by_username(username).await?
        } else if kind == SessionKind::Captcha {
            return Ok(None);
        } else {
            None
        };
        found
            .map(Some)
            .ok_or_else(|| SecurityError::not_found("Account could not be found.").into())
    }

    /// Create a session of `kind` for `account`, or the account named by `context`.
    ///
    /// # Errors
    /// `NotFound` when the bearer cannot be resolved; internal errors from
    /// storage or signing.
    #[instrument(skip(self, context, account), fields(kind = %kind))]
    pub async fn create(
        &self,
        kind: SessionKind,
        context: &RequestContext,
        account: Option<Account>,
    ) -> Result<IssuedSession> {
        let account = match account {
            Some(account) => Some(account),
            None => self.resolve_account(kind, context).await?,
        };

        match kind {
            SessionKind::Authentication => {
                let account = account
                    .ok_or_else(|| SecurityError::not_found("Account could not be found."))?;
                self.create_authentication(context, &account).await
            }
            SessionKind::TwoStep | SessionKind::Captcha => {
                if kind == SessionKind::TwoStep && account.is_none() {
                    return Err(SecurityError::not_found("Account could not be found.").into());
                }
                self.retire_prior(kind, context).await?;
                self.create_challenge(kind, context, account.as_ref()).await
            }
        }
    }

    /// Push the expiration of a live session forward and sign a new token.
    ///
    /// # Errors
    /// Internal errors from storage, signing, or an out of range expiration.
    pub async fn reissue(&self, mut session: Session) -> Result<IssuedSession> {
        session.expires_at =
            expiration_from(Utc::now(), self.config.expiration_seconds(session.kind))?;
        self.sessions
            .save_session(&session, &[SessionField::ExpiresAt])
            .await?;
        let token = self.codec.encode(&session)?;
        debug!(session_id = %session.id, "session reissued");
        Ok(IssuedSession {
            session,
            token,
            code: None,
        })
    }

    async fn create_authentication(
        &self,
        context: &RequestContext,
        account: &Account,
    ) -> Result<IssuedSession> {
        let kind = SessionKind::Authentication;
        if let Some(token) = context.token(kind) {
            match self.validator.load(kind, token).await {
                Ok(prior) => {
                    if self.config.authentication_session_refresh()
                        && prior.bearer == Some(account.id)
                        && prior.validate().is_ok()
                    {
                        return self.reissue(prior).await;
                    }
                    self.sessions.deactivate_session(prior.id).await?;
                }
                Err(err) if is_stale(&err) => debug!("ignoring unusable prior session: {err}"),
                Err(err) => return Err(err),
            }
        }

        let session = Session::new(
            kind,
            Some(account.id),
            context.ip,
            self.config.expiration_seconds(kind),
            Utc::now(),
        )?;
        self.sessions.insert_session(&session).await?;
        let token = self.codec.encode(&session)?;
        info!(session_id = %session.id, account_id = %account.id, "authentication session created");
        Ok(IssuedSession {
            session,
            token,
            code: None,
        })
    }

    async fn retire_prior(&self, kind: SessionKind, context: &RequestContext) -> Result<()> {
        let Some(token) = context.token(kind) else {
            return Ok(());
        };
        match self.validator.load(kind, token).await {
            Ok(prior) => {
                if self.sessions.deactivate_session(prior.id).await? {
                    debug!(session_id = %prior.id, "prior {kind} session retired");
                }
                Ok(())
            }
            Err(err) if is_stale(&err) => {
                debug!("ignoring unusable prior {kind} session: {err}");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn create_challenge(
        &self,
        kind: SessionKind,
        context: &RequestContext,
        account: Option<&Account>,
    ) -> Result<IssuedSession> {
        let mut session = Session::new(
            kind,
            account.map(|account| account.id),
            context.ip,
            self.config.expiration_seconds(kind),
            Utc::now(),
        )?;
        let code = self
            .engine
            .arm(&mut session, self.config.max_challenge_attempts());
        self.sessions.insert_session(&session).await?;
        let token = self.codec.encode(&session)?;
        info!(session_id = %session.id, "{kind} session created");
        Ok(IssuedSession {
            session,
            token,
            code: Some(code),
        })
    }
}
