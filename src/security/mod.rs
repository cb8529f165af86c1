//! Session lifecycle and challenge verification.
//!
//! Flow Overview:
//! - A request presents a signed token (`token`), which references a stored
//!   session record (`store`).
//! - `validator` checks token then record; `guard` checks the bearer account.
//! - Two-step and captcha sessions carry a one-time code checked by
//!   `challenge` under an attempt ceiling.
//! - `factory` creates sessions; `verification`, `captcha` and
//!   `authentication` compose the steps into request flows.
//!
//! Expected failures are [`SecurityError`] values; storage and signing
//! faults are [`Error::Internal`].

use std::sync::Arc;

pub mod authentication;
pub mod authorization;
pub mod captcha;
pub mod challenge;
pub mod config;
pub mod delivery;
pub mod error;
pub mod factory;
pub mod guard;
pub mod model;
pub mod password;
pub mod store;
pub mod token;
pub mod validator;
pub mod verification;

pub use config::{ConfigError, CookieConfig, SameSite, SecurityConfig};
pub use error::{Error, ErrorResponse, Result, SecurityError};
pub use factory::{IssuedSession, RequestContext};
pub use guard::Verification;
pub use model::{Account, Role, Session, SessionKind};
pub use validator::ValidatedSession;

use challenge::ChallengeEngine;
use delivery::{ChallengeDelivery, ChallengeMessage, LogDelivery};
use factory::SessionFactory;
use password::{Argon2Verifier, PasswordVerifier};
use store::{AccountStore, SessionStore};
use token::TokenCodec;
use validator::SessionValidator;

/// Shared entry point wiring configuration, storage and collaborators.
#[derive(Clone)]
pub struct Security {
    config: Arc<SecurityConfig>,
    codec: Arc<TokenCodec>,
    validator: SessionValidator,
    engine: ChallengeEngine,
    factory: SessionFactory,
    sessions: Arc<dyn SessionStore>,
    accounts: Arc<dyn AccountStore>,
    delivery: Arc<dyn ChallengeDelivery>,
    passwords: Arc<dyn PasswordVerifier>,
}

impl Security {
    /// Validate `config` and wire the core around the given stores.
    ///
    /// Codes go to the log and passwords are checked with Argon2 until
    /// replaced with [`Security::with_delivery`] and
    /// [`Security::with_password_verifier`].
    ///
    /// # Errors
    /// Returns an error for invalid configuration or unusable keys.
    pub fn new(
        config: SecurityConfig,
        sessions: Arc<dyn SessionStore>,
        accounts: Arc<dyn AccountStore>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let codec = Arc::new(TokenCodec::from_config(&config)?);
        let validator = SessionValidator::new(
            Arc::clone(&codec),
            Arc::clone(&sessions),
            Arc::clone(&accounts),
        );
        let engine = ChallengeEngine::new(Arc::clone(&sessions));
        let factory = SessionFactory::new(
            Arc::clone(&config),
            Arc::clone(&codec),
            Arc::clone(&sessions),
            Arc::clone(&accounts),
        );
        Ok(Self {
            config,
            codec,
            validator,
            engine,
            factory,
            sessions,
            accounts,
            delivery: Arc::new(LogDelivery),
            passwords: Arc::new(Argon2Verifier::new()),
        })
    }

    #[must_use]
    pub fn with_delivery(mut self, delivery: Arc<dyn ChallengeDelivery>) -> Self {
        self.delivery = delivery;
        self
    }

    #[must_use]
    pub fn with_password_verifier(mut self, passwords: Arc<dyn PasswordVerifier>) -> Self {
        self.passwords = passwords;
        self
    }

    #[must_use]
    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    #[must_use]
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    #[must_use]
    pub fn validator(&self) -> &SessionValidator {
        &self.validator
    }

    #[must_use]
    pub fn factory(&self) -> &SessionFactory {
        &self.factory
    }

    #[must_use]
    pub fn engine(&self) -> &ChallengeEngine {
        &self.engine
    }

    async fn deliver(&self, issued: &IssuedSession, recipient: Option<String>) -> Result<()> {
        let Some(code) = issued.code.clone() else {
            return Ok(());
        };
        let message = ChallengeMessage {
            session_id: issued.session.id,
            kind: issued.session.kind,
            recipient,
            code,
            expires_at: issued.session.expires_at,
        };
        self.delivery.deliver(&message).await?;
        Ok(())
    }
}
