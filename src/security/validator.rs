//! Per-request session validation.
//!
//! Flow Overview: decode the presented token, load the record it references,
//! then check the record itself. Bearer state is a separate step (see
//! `guard`) because some flows accept an unverified bearer.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, instrument};

use super::error::{Result, SecurityError};
use super::model::{Account, Session, SessionKind};
use super::store::{AccountStore, SessionStore};
use super::token::TokenCodec;

impl Session {
    /// Check the record is usable now.
    ///
    /// # Errors
    /// `Deleted`, `Invalid` (inactive) or `Expired`, in that order.
    pub fn validate(&self) -> Result<(), SecurityError> {
        self.validate_at(Utc::now())
    }

    /// Same as [`Session::validate`] against an explicit clock.
    ///
    /// # Errors
    /// See [`Session::validate`].
    pub fn validate_at(&self, now: DateTime<Utc>) -> Result<(), SecurityError> {
        if self.deleted {
            return Err(SecurityError::Deleted("Session has been deleted.".to_string()));
        }
        if !self.active {
            return Err(SecurityError::Invalid);
        }
        if self.is_expired_at(now) {
            return Err(SecurityError::Expired);
        }
        Ok(())
    }
}

/// Validate a stored record, deactivating it when it has expired so it reads
/// as terminal from then on.
///
/// # Errors
/// See [`Session::validate`].
pub(crate) async fn validate_stored(
    sessions: &dyn SessionStore,
    session: &Session,
) -> Result<()> {
    match session.validate() {
        Err(SecurityError::Expired) => {
            if sessions.deactivate_session(session.id).await? {
                debug!(session_id = %session.id, "expired session deactivated");
            }
            Err(SecurityError::Expired.into())
        }
        result => Ok(result?),
    }
}

/// A session that passed validation, with its bearer when it has one.
#[derive(Clone, Debug)]
pub struct ValidatedSession {
    pub session: Session,
    pub bearer: Option<Account>,
}

impl ValidatedSession {
    /// Bearer of a session kind that always has one.
    ///
    /// # Errors
    /// `NotFound` for anonymous sessions.
    pub fn require_bearer(&self) -> Result<&Account, SecurityError> {
        self.bearer
            .as_ref()
            .ok_or_else(|| SecurityError::not_found("Account could not be found."))
    }
}

#[derive(Clone)]
pub struct SessionValidator {
    codec: Arc<TokenCodec>,
    sessions: Arc<dyn SessionStore>,
    accounts: Arc<dyn AccountStore>,
}

impl SessionValidator {
    #[must_use]
    pub fn new(
        codec: Arc<TokenCodec>,
        sessions: Arc<dyn SessionStore>,
        accounts: Arc<dyn AccountStore>,
    ) -> Self {
        Self {
            codec,
            sessions,
            accounts,
        }
    }

    /// Decode a token and load the record it references, without checking it.
    ///
    /// An elapsed token whose record has expired too deactivates the record.
    ///
    /// # Errors
    /// Token errors from the codec; `Deleted` when the record is gone;
    /// `InvalidToken` when the record disagrees with the token.
    #[instrument(skip(self, token))]
    pub async fn load(&self, kind: SessionKind, token: &str) -> Result<Session> {
        let claims = self.codec.decode_signed(kind, token)?;
        let now = Utc::now();
        if claims.is_expired_at(now) {
            // A refreshed record outlives its older tokens and stays live.
            let stored = self.sessions.get_session(claims.id).await?;
            if let Some(session) = stored.filter(|s| s.active && s.is_expired_at(now)) {
                if self.sessions.deactivate_session(session.id).await? {
                    debug!(session_id = %session.id, "expired session deactivated");
                }
            }
            return Err(SecurityError::Expired.into());
        }
        let Some(session) = self.sessions.get_session(claims.id).await? else {
            debug!(session_id = %claims.id, "token references a missing session");
            return Err(SecurityError::Deleted("Session has been deleted.".to_string()).into());
        };
        if session.kind != claims.kind {
            return Err(SecurityError::invalid_token("Session token does not match its record.").into());
        }
        Ok(session)
    }

    /// Decode, load and validate the session referenced by `token`.
    ///
    /// # Errors
    /// See [`SessionValidator::load`] and [`SessionValidator::check`].
    pub async fn validate(&self, kind: SessionKind, token: &str) -> Result<Session> {
        let session = self.load(kind, token).await?;
        self.check(&session).await?;
        Ok(session)
    }

    /// Validate a loaded record; an expired one is deactivated in storage.
    ///
    /// # Errors
    /// See [`Session::validate`].
    pub async fn check(&self, session: &Session) -> Result<()> {
        validate_stored(self.sessions.as_ref(), session).await
    }

    /// Load the bearer of a session, if it has one.
    ///
    /// # Errors
    /// `NotFound` when the referenced account no longer exists.
    pub async fn bearer(&self, session: &Session) -> Result<Option<Account>> {
        let Some(bearer_id) = session.bearer else {
            return Ok(None);
        };
        match self.accounts.get_account(bearer_id).await? {
            Some(account) => Ok(Some(account)),
            None => Err(SecurityError::not_found("Account could not be found.").into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::config::SecurityConfig;
    use crate::security::error::Error;
    use crate::security::model::SessionField;
    use crate::security::store::MemoryStore;
    use chrono::Duration;
    use secrecy::SecretString;

    fn validator(store: &Arc<MemoryStore>) -> anyhow::Result<(SessionValidator, Arc<TokenCodec>)> {
        let config = SecurityConfig::new(SecretString::from("validator-secret".to_string()));
        let codec = Arc::new(TokenCodec::from_config(&config)?);
        let validator = SessionValidator::new(
            Arc::clone(&codec),
            Arc::clone(store) as Arc<dyn SessionStore>,
            Arc::clone(store) as Arc<dyn AccountStore>,
        );
        Ok((validator, codec))
    }

    #[test]
    fn validate_checks_deleted_then_inactive_then_expired() -> anyhow::Result<()> {
        let now = Utc::now();
        let mut session = Session::new(SessionKind::TwoStep, None, None, 10, now)?;
        assert_eq!(session.validate_at(now), Ok(()));
        assert_eq!(
            session.validate_at(now + Duration::seconds(11)),
            Err(SecurityError::Expired)
        );

        session.active = false;
        assert_eq!(
            session.validate_at(now + Duration::seconds(11)),
            Err(SecurityError::Invalid)
        );

        session.deleted = true;
        assert!(matches!(
            session.validate_at(now + Duration::seconds(11)),
            Err(SecurityError::Deleted(_))
        ));
        Ok(())
    }

    #[test]
    fn validation_is_monotonic_past_expiration() -> anyhow::Result<()> {
        let now = Utc::now();
        let session = Session::new(SessionKind::Authentication, None, None, 30, now)?;
        assert!(session.validate_at(now + Duration::seconds(29)).is_ok());
        for offset in [30, 31, 3600, 86_400] {
            assert_eq!(
                session.validate_at(now + Duration::seconds(offset)),
                Err(SecurityError::Expired)
            );
        }
        Ok(())
    }

    #[tokio::test]
    async fn validate_loads_active_session() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let (validator, codec) = validator(&store)?;
        let session = Session::new(SessionKind::Captcha, None, None, 60, Utc::now())?;
        store.insert_session(&session).await?;

        let token = codec.encode(&session)?;
        let loaded = validator.validate(SessionKind::Captcha, &token).await?;
        assert_eq!(loaded.id, session.id);
        assert!(validator.bearer(&loaded).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn missing_record_is_deleted() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let (validator, codec) = validator(&store)?;
        let session = Session::new(SessionKind::Captcha, None, None, 60, Utc::now())?;

        let token = codec.encode(&session)?;
        let result = validator.validate(SessionKind::Captcha, &token).await;
        assert!(matches!(
            result,
            Err(Error::Security(SecurityError::Deleted(_)))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn inactive_record_is_invalid() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let (validator, codec) = validator(&store)?;
        let session = Session::new(SessionKind::TwoStep, None, None, 60, Utc::now())?;
        store.insert_session(&session).await?;
        store.deactivate_session(session.id).await?;

        let token = codec.encode(&session)?;
        let result = validator.validate(SessionKind::TwoStep, &token).await;
        assert!(matches!(result, Err(Error::Security(SecurityError::Invalid))));
        Ok(())
    }

    #[tokio::test]
    async fn missing_bearer_is_not_found() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let (validator, _) = validator(&store)?;
        let session = Session::new(
            SessionKind::Authentication,
            Some(uuid::Uuid::new_v4()),
            None,
            60,
            Utc::now(),
        )?;
        let result = validator.bearer(&session).await;
        assert!(matches!(
            result,
            Err(Error::Security(SecurityError::NotFound(_)))
        ));
        Ok(())
    }

    fn elapsed(kind: SessionKind) -> anyhow::Result<Session> {
        Session::new(kind, None, None, 60, Utc::now() - Duration::seconds(120))
    }

    async fn active(store: &MemoryStore, id: uuid::Uuid) -> anyhow::Result<bool> {
        store
            .get_session(id)
            .await?
            .map(|s| s.active)
            .ok_or_else(|| anyhow::anyhow!("missing session"))
    }

    #[tokio::test]
    async fn expired_record_is_deactivated_when_presented() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let (validator, codec) = validator(&store)?;
        let session = elapsed(SessionKind::TwoStep)?;
        store.insert_session(&session).await?;

        let token = codec.encode(&session)?;
        let result = validator.validate(SessionKind::TwoStep, &token).await;
        assert!(matches!(result, Err(Error::Security(SecurityError::Expired))));
        assert!(!active(&store, session.id).await?);
        Ok(())
    }

    #[tokio::test]
    async fn check_deactivates_expired_record() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let (validator, _) = validator(&store)?;
        let session = elapsed(SessionKind::Captcha)?;
        store.insert_session(&session).await?;

        let result = validator.check(&session).await;
        assert!(matches!(result, Err(Error::Security(SecurityError::Expired))));
        assert!(!active(&store, session.id).await?);

        let reloaded = store
            .get_session(session.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("missing session"))?;
        let result = validator.check(&reloaded).await;
        assert!(matches!(result, Err(Error::Security(SecurityError::Invalid))));
        Ok(())
    }

    #[tokio::test]
    async fn old_token_of_refreshed_record_leaves_it_live() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let (validator, codec) = validator(&store)?;
        let mut session = elapsed(SessionKind::Authentication)?;
        store.insert_session(&session).await?;
        let old_token = codec.encode(&session)?;

        session.expires_at = Some(Utc::now() + Duration::seconds(60));
        store
            .save_session(&session, &[SessionField::ExpiresAt])
            .await?;

        let result = validator.validate(SessionKind::Authentication, &old_token).await;
        assert!(matches!(result, Err(Error::Security(SecurityError::Expired))));
        assert!(active(&store, session.id).await?);

        let fresh = codec.encode(&session)?;
        assert!(validator
            .validate(SessionKind::Authentication, &fresh)
            .await
            .is_ok());
        Ok(())
    }
}
