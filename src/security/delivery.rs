//! Out-of-band delivery of challenge codes.
//!
//! The core hands a plaintext code to a [`ChallengeDelivery`] exactly once and
//! never stores it. Rendering captcha images or sending mail is the receiver's
//! business.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument};
use url::Url;
use uuid::Uuid;

use super::model::SessionKind;

/// Payload handed to a delivery channel.
#[derive(Clone, Debug, Serialize)]
pub struct ChallengeMessage {
    pub session_id: Uuid,
    pub kind: SessionKind,
    /// Bearer email; anonymous captcha sessions have none.
    pub recipient: Option<String>,
    pub code: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ChallengeDelivery: Send + Sync {
    async fn deliver(&self, message: &ChallengeMessage) -> Result<()>;
}

/// Writes codes to the log. Meant for local development.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogDelivery;

#[async_trait]
impl ChallengeDelivery for LogDelivery {
    async fn deliver(&self, message: &ChallengeMessage) -> Result<()> {
        info!(
            session_id = %message.session_id,
            kind = %message.kind,
            recipient = message.recipient.as_deref().unwrap_or("-"),
            "challenge issued"
        );
        debug!(session_id = %message.session_id, code = %message.code, "challenge code");
        Ok(())
    }
}

/// POSTs each challenge as JSON to a configured endpoint.
#[derive(Clone, Debug)]
pub struct WebhookDelivery {
    url: Url,
    client: reqwest::Client,
}

impl WebhookDelivery {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: Url, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self { url, client })
    }
}

#[async_trait]
impl ChallengeDelivery for WebhookDelivery {
    #[instrument(skip(self, message), fields(url = %self.url, session_id = %message.session_id))]
    async fn deliver(&self, message: &ChallengeMessage) -> Result<()> {
        self.client
            .post(self.url.clone())
            .json(message)
            .send()
            .await
            .context("failed to reach challenge webhook")?
            .error_for_status()
            .context("challenge webhook rejected delivery")?;
        debug!("challenge delivered");
        Ok(())
    }
}
