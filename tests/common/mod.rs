#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use secrecy::SecretString;
use std::sync::Arc;
use tokio::sync::Mutex;
use warden::security::{
    delivery::{ChallengeDelivery, ChallengeMessage},
    password::{Argon2Verifier, PasswordVerifier},
    store::{AccountStore, MemoryStore, SessionStore},
    Account, Security, SecurityConfig,
};

pub const PASSWORD: &str = "correct horse battery staple";

/// Delivery channel that keeps every message for inspection.
#[derive(Clone, Default)]
pub struct Outbox(Arc<Mutex<Vec<ChallengeMessage>>>);

impl Outbox {
    pub async fn last_code(&self) -> Option<String> {
        self.0.lock().await.last().map(|message| message.code.clone())
    }

    pub async fn messages(&self) -> Vec<ChallengeMessage> {
        self.0.lock().await.clone()
    }
}

#[async_trait]
impl ChallengeDelivery for Outbox {
    async fn deliver(&self, message: &ChallengeMessage) -> Result<()> {
        self.0.lock().await.push(message.clone());
        Ok(())
    }
}

pub struct Harness {
    pub security: Security,
    pub store: Arc<MemoryStore>,
    pub outbox: Outbox,
}

pub fn config() -> SecurityConfig {
    SecurityConfig::new(SecretString::from("integration-secret".to_string()))
}

pub fn harness(config: SecurityConfig) -> Result<Harness> {
    let store = Arc::new(MemoryStore::new());
    let outbox = Outbox::default();
    let security = Security::new(
        config,
        Arc::clone(&store) as Arc<dyn SessionStore>,
        Arc::clone(&store) as Arc<dyn AccountStore>,
    )?
    .with_delivery(Arc::new(outbox.clone()));
    Ok(Harness {
        security,
        store,
        outbox,
    })
}

impl Harness {
    pub async fn account(&self, email: &str, verified: bool) -> Result<Account> {
        let hash = Argon2Verifier::new().hash(PASSWORD)?;
        let mut account = Account::new(email, hash);
        account.verified = verified;
        self.store.insert_account(&account).await?;
        Ok(account)
    }
}

/// A code guaranteed to differ from `code`.
pub fn wrong_code(code: &str) -> String {
    if code == "000000" {
        "111111".to_string()
    } else {
        "000000".to_string()
    }
}
