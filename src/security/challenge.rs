//! One-time challenge codes for two-step and captcha sessions.
//!
//! Only a salted SHA-256 of a code is stored. Every submission first claims an
//! attempt slot through the store's atomic conditional increment, so two
//! concurrent submissions can never both see "attempts remain" for the last
//! slot.

use base64ct::{Base64, Encoding};
use rand::{rngs::OsRng, Rng};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::error::{Result, SecurityError};
use super::model::{Challenge, Session, SessionKind};
use super::store::SessionStore;
use super::validator::validate_stored;

pub const CODE_LENGTH: usize = 6;

const DIGITS: &[u8] = b"0123456789";
const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Random code for a session kind: digits for two-step, upper-case
/// alphanumerics for captcha.
#[must_use]
pub fn generate_code(kind: SessionKind) -> String {
    let alphabet = match kind {
        SessionKind::Captcha => ALPHANUMERIC,
        SessionKind::TwoStep | SessionKind::Authentication => DIGITS,
    };
    let mut rng = OsRng;
    (0..CODE_LENGTH)
        .map(|_| char::from(alphabet[rng.gen_range(0..alphabet.len())]))
        .collect()
}

/// Hash a code bound to its session so equal codes never share a hash.
#[must_use]
pub fn hash_code(session_id: Uuid, code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.update(code.as_bytes());
    Base64::encode_string(&hasher.finalize())
}

/// Captcha codes are case-insensitive; two-step codes are compared as typed.
fn normalize_code(kind: SessionKind, code: &str) -> String {
    let code = code.trim();
    match kind {
        SessionKind::Captcha => code.to_uppercase(),
        SessionKind::TwoStep | SessionKind::Authentication => code.to_string(),
    }
}

#[derive(Clone)]
pub struct ChallengeEngine {
    sessions: Arc<dyn SessionStore>,
}

impl ChallengeEngine {
    #[must_use]
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self { sessions }
    }

    /// Generate a code for `kind`, returning `(plaintext, hash)` for a session id.
    #[must_use]
    pub fn generate(&self, kind: SessionKind, session_id: Uuid) -> (String, String) {
        let code = generate_code(kind);
        let hash = hash_code(session_id, &code);
        (code, hash)
    }

    /// Attach a fresh challenge to a not yet persisted session and return the
    /// plaintext code for out-of-band delivery.
    pub fn arm(&self, session: &mut Session, max_attempts: u32) -> String {
        let (code, code_hash) = self.generate(session.kind, session.id);
        session.challenge = Some(Challenge {
            code_hash,
            attempts: 0,
            max_attempts,
        });
        code
    }

    /// Verify a submitted code and consume the session.
    ///
    /// # Errors
    /// As [`ChallengeEngine::verify`] and [`ChallengeEngine::consume`].
    #[instrument(skip(self, session, code), fields(session_id = %session.id, kind = %session.kind))]
    pub async fn check(&self, session: &Session, code: &str) -> Result<()> {
        self.verify(session, code).await?;
        self.consume(session).await
    }

    /// Verify a submitted code without consuming the session.
    ///
    /// A dead session fails with its own error before any attempt is claimed;
    /// an expired one is deactivated on the way. Once the ceiling is reached
    /// the session is deactivated and every further submission, correct or
    /// not, is `MaxedOutChallenge`.
    ///
    /// # Errors
    /// Session validation errors, `MaxedOutChallenge` or `Challenge`.
    pub async fn verify(&self, session: &Session, code: &str) -> Result<()> {
        validate_stored(self.sessions.as_ref(), session).await?;
        let Some(challenge) = session.challenge.as_ref() else {
            return Err(SecurityError::Invalid.into());
        };

        if !self
            .sessions
            .increment_attempts_if_below(session.id, challenge.max_attempts)
            .await?
        {
            if self.sessions.deactivate_session(session.id).await? {
                warn!("challenge attempts exhausted, session deactivated");
            }
            return Err(SecurityError::MaxedOutChallenge.into());
        }

        let submitted = hash_code(session.id, &normalize_code(session.kind, code));
        if !bool::from(submitted.as_bytes().ct_eq(challenge.code_hash.as_bytes())) {
            return Err(SecurityError::Challenge.into());
        }
        Ok(())
    }

    /// Deactivate a session whose code was verified.
    ///
    /// # Errors
    /// `Invalid` when a concurrent request consumed the session first.
    pub async fn consume(&self, session: &Session) -> Result<()> {
        if !self.sessions.deactivate_session(session.id).await? {
            return Err(SecurityError::Invalid.into());
        }
        info!("challenge passed, session consumed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::error::Error;
    use crate::security::store::MemoryStore;
    use chrono::Utc;

    async fn armed(
        store: &Arc<MemoryStore>,
        kind: SessionKind,
        max_attempts: u32,
    ) -> anyhow::Result<(ChallengeEngine, Session, String)> {
        let engine = ChallengeEngine::new(Arc::clone(store) as Arc<dyn SessionStore>);
        let mut session = Session::new(kind, None, None, 60, Utc::now())?;
        let code = engine.arm(&mut session, max_attempts);
        store.insert_session(&session).await?;
        Ok((engine, session, code))
    }

    fn wrong(code: &str) -> String {
        if code == "000000" {
            "111111".to_string()
        } else {
            "000000".to_string()
        }
    }

    fn kind_of(result: Result<()>) -> Option<SecurityError> {
        match result {
            Err(Error::Security(err)) => Some(err),
            _ => None,
        }
    }

    #[test]
    fn codes_follow_kind_alphabet() {
        let code = generate_code(SessionKind::TwoStep);
        assert_eq!(code.len(), CODE_LENGTH);
        assert!(code.chars().all(|c| c.is_ascii_digit()));

        let code = generate_code(SessionKind::Captcha);
        assert_eq!(code.len(), CODE_LENGTH);
        assert!(code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn hash_is_salted_by_session() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        assert_eq!(hash_code(first, "123456"), hash_code(first, "123456"));
        assert_ne!(hash_code(first, "123456"), hash_code(second, "123456"));
        assert_ne!(hash_code(first, "123456"), "123456");
    }

    #[tokio::test]
    async fn correct_code_consumes_session() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let (engine, session, code) = armed(&store, SessionKind::TwoStep, 5).await?;

        engine.check(&session, &code).await?;
        let stored = store.get_session(session.id).await?;
        assert_eq!(stored.as_ref().map(|s| s.active), Some(false));

        // A second check with the reloaded record is rejected as inactive.
        let reloaded = stored.ok_or_else(|| anyhow::anyhow!("missing session"))?;
        assert_eq!(
            kind_of(engine.check(&reloaded, &code).await),
            Some(SecurityError::Invalid)
        );
        Ok(())
    }

    #[tokio::test]
    async fn stale_copy_cannot_be_consumed_twice() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let (engine, session, code) = armed(&store, SessionKind::TwoStep, 5).await?;

        engine.check(&session, &code).await?;
        assert_eq!(
            kind_of(engine.check(&session, &code).await),
            Some(SecurityError::Invalid)
        );
        Ok(())
    }

    #[tokio::test]
    async fn attempt_ceiling_locks_out_even_correct_code() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let (engine, session, code) = armed(&store, SessionKind::TwoStep, 5).await?;

        for _ in 0..5 {
            assert_eq!(
                kind_of(engine.check(&session, &wrong(&code)).await),
                Some(SecurityError::Challenge)
            );
        }
        assert_eq!(
            kind_of(engine.check(&session, &code).await),
            Some(SecurityError::MaxedOutChallenge)
        );

        let stored = store
            .get_session(session.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("missing session"))?;
        assert!(!stored.active);
        assert_eq!(stored.attempts(), 5);
        Ok(())
    }

    #[tokio::test]
    async fn captcha_codes_are_case_insensitive() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let (engine, session, code) = armed(&store, SessionKind::Captcha, 5).await?;
        engine.check(&session, &format!(" {} ", code.to_lowercase())).await?;
        Ok(())
    }

    #[tokio::test]
    async fn expired_session_fails_before_consuming_attempts() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let engine = ChallengeEngine::new(Arc::clone(&store) as Arc<dyn SessionStore>);
        let mut session = Session::new(
            SessionKind::TwoStep,
            None,
            None,
            60,
            Utc::now() - chrono::Duration::seconds(120),
        )?;
        let code = engine.arm(&mut session, 5);
        store.insert_session(&session).await?;

        assert_eq!(
            kind_of(engine.check(&session, &code).await),
            Some(SecurityError::Expired)
        );
        let stored = store
            .get_session(session.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("missing session"))?;
        assert_eq!(stored.attempts(), 0);
        assert!(!stored.active);

        // Once retired the record reads as inactive, not expired.
        assert_eq!(
            kind_of(engine.check(&stored, &code).await),
            Some(SecurityError::Invalid)
        );
        Ok(())
    }

    #[tokio::test]
    async fn verified_code_stays_usable_until_consumed() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let (engine, session, code) = armed(&store, SessionKind::TwoStep, 5).await?;

        engine.verify(&session, &code).await?;
        let stored = store.get_session(session.id).await?;
        assert_eq!(stored.as_ref().map(|s| s.active), Some(true));
        assert_eq!(stored.map(|s| s.attempts()), Some(1));

        engine.consume(&session).await?;
        assert_eq!(
            kind_of(engine.consume(&session).await),
            Some(SecurityError::Invalid)
        );
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_wrong_submissions_deactivate_once() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let engine = ChallengeEngine::new(Arc::clone(&store) as Arc<dyn SessionStore>);
        let mut session = Session::new(SessionKind::TwoStep, None, None, 60, Utc::now())?;
        let code = engine.arm(&mut session, 3);
        if let Some(challenge) = session.challenge.as_mut() {
            challenge.attempts = 2;
        }
        store.insert_session(&session).await?;

        let mut handles = Vec::new();
        for _ in 0..12 {
            let engine = engine.clone();
            let session = session.clone();
            let submitted = wrong(&code);
            handles.push(tokio::spawn(async move {
                kind_of(engine.check(&session, &submitted).await)
            }));
        }

        let mut challenge_errors = 0;
        let mut maxed_out = 0;
        for handle in handles {
            match handle.await? {
                Some(SecurityError::Challenge) => challenge_errors += 1,
                Some(SecurityError::MaxedOutChallenge) => maxed_out += 1,
                other => anyhow::bail!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(challenge_errors, 1);
        assert_eq!(maxed_out, 11);

        let stored = store
            .get_session(session.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("missing session"))?;
        assert_eq!(stored.attempts(), 3);
        assert!(!stored.active);
        // The transition already happened, so no later request can claim it.
        assert!(!store.deactivate_session(session.id).await?);
        Ok(())
    }
}
