//! Captcha flow. Sessions may be anonymous; the code is handed to the
//! delivery channel, which owns rendering.

use tracing::instrument;

use super::error::Result;
use super::factory::{IssuedSession, RequestContext};
use super::model::SessionKind;
use super::validator::ValidatedSession;
use super::Security;

impl Security {
    /// # Errors
    /// `NotFound` when the request names an unknown account; internal errors
    /// from storage, signing or delivery.
    #[instrument(skip(self, context))]
    pub async fn request_captcha(&self, context: &RequestContext) -> Result<IssuedSession> {
        let issued = self
            .factory
            .create(SessionKind::Captcha, context, None)
            .await?;
        let recipient = match self.validator.bearer(&issued.session).await? {
            Some(account) => Some(account.email),
            None => None,
        };
        self.deliver(&issued, recipient).await?;
        Ok(issued)
    }

    /// # Errors
    /// Token, session and challenge errors.
    #[instrument(skip(self, context, code))]
    pub async fn captcha(&self, context: &RequestContext, code: &str) -> Result<ValidatedSession> {
        let token = context.token(SessionKind::Captcha).unwrap_or_default();
        let mut session = self.validator.load(SessionKind::Captcha, token).await?;
        self.engine.check(&session, code).await?;
        session.active = false;
        let bearer = self.validator.bearer(&session).await?;
        Ok(ValidatedSession { session, bearer })
    }
}
