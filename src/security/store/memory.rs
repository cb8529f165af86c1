//! In-process store. Each conditional update runs inside one critical section.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{normalize_email, AccountStore, SessionStore};
use crate::security::model::{Account, AccountField, Session, SessionField};

#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<Uuid, Session>>,
    accounts: Mutex<HashMap<Uuid, Account>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        Ok(self.sessions.lock().await.get(&id).cloned())
    }

    async fn insert_session(&self, session: &Session) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&session.id) {
            return Err(anyhow!("session {} already exists", session.id));
        }
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn save_session(&self, session: &Session, fields: &[SessionField]) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let stored = sessions
            .get_mut(&session.id)
            .ok_or_else(|| anyhow!("session {} not found", session.id))?;
        for field in fields {
            match field {
                SessionField::Active => stored.active = stored.active && session.active,
                SessionField::ExpiresAt => stored.expires_at = session.expires_at,
            }
        }
        Ok(())
    }

    async fn increment_attempts_if_below(&self, id: Uuid, ceiling: u32) -> Result<bool> {
        let mut sessions = self.sessions.lock().await;
        let challenge = sessions
            .get_mut(&id)
            .and_then(|session| session.challenge.as_mut())
            .ok_or_else(|| anyhow!("challenge session {id} not found"))?;
        if challenge.attempts < ceiling {
            challenge.attempts += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn deactivate_session(&self, id: Uuid) -> Result<bool> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| anyhow!("session {id} not found"))?;
        let transitioned = session.active;
        session.active = false;
        Ok(transitioned)
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn get_account(&self, id: Uuid) -> Result<Option<Account>> {
        Ok(self.accounts.lock().await.get(&id).cloned())
    }

    async fn get_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let email = normalize_email(email);
        Ok(self
            .accounts
            .lock()
            .await
            .values()
            .find(|account| !account.deleted && normalize_email(&account.email) == email)
            .cloned())
    }

    async fn get_account_by_username(&self, username: &str) -> Result<Option<Account>> {
        let username = username.trim();
        Ok(self
            .accounts
            .lock()
            .await
            .values()
            .find(|account| !account.deleted && account.username.as_deref() == Some(username))
            .cloned())
    }

    async fn insert_account(&self, account: &Account) -> Result<()> {
        let mut accounts = self.accounts.lock().await;
        let email = normalize_email(&account.email);
        if accounts
            .values()
            .any(|existing| !existing.deleted && normalize_email(&existing.email) == email)
        {
            return Err(anyhow!("account with email {email} already exists"));
        }
        accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn save_account(&self, account: &Account, fields: &[AccountField]) -> Result<()> {
        let mut accounts = self.accounts.lock().await;
        let stored = accounts
            .get_mut(&account.id)
            .ok_or_else(|| anyhow!("account {} not found", account.id))?;
        for field in fields {
            match field {
                AccountField::Verified => stored.verified = account.verified,
                AccountField::Disabled => stored.disabled = account.disabled,
                AccountField::Deleted => stored.deleted = account.deleted,
            }
        }
        Ok(())
    }
}
