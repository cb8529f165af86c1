//! Storage seams for sessions and accounts.
//!
//! The core only needs CRUD by id plus two conditional updates; a concrete
//! backend is picked explicitly at startup and injected as a trait object.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use super::model::{Account, AccountField, Session, SessionField};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session by id, including inactive and soft-deleted records.
    async fn get_session(&self, id: Uuid) -> Result<Option<Session>>;

    async fn insert_session(&self, session: &Session) -> Result<()>;

    /// Persist the listed fields of an existing session.
    ///
    /// Saving `Active` can only clear the flag; an inactive record is never
    /// reactivated.
    async fn save_session(&self, session: &Session, fields: &[SessionField]) -> Result<()>;

    /// Increment the challenge attempts counter only while it is below
    /// `ceiling`, as a single atomic step.
    ///
    /// Returns `true` when this call claimed an attempt.
    async fn increment_attempts_if_below(&self, id: Uuid, ceiling: u32) -> Result<bool>;

    /// Clear the active flag.
    ///
    /// Returns `true` only for the call that performed the transition.
    async fn deactivate_session(&self, id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Load an account by id, including soft-deleted ones.
    async fn get_account(&self, id: Uuid) -> Result<Option<Account>>;

    /// Look up a live account by email; soft-deleted accounts are never returned.
    async fn get_account_by_email(&self, email: &str) -> Result<Option<Account>>;

    /// Look up a live account by username; soft-deleted accounts are never returned.
    async fn get_account_by_username(&self, username: &str) -> Result<Option<Account>>;

    async fn insert_account(&self, account: &Account) -> Result<()>;

    async fn save_account(&self, account: &Account, fields: &[AccountField]) -> Result<()>;
}

/// Backend used for sessions and accounts, chosen at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "memory" => Ok(Self::Memory),
            "postgres" => Ok(Self::Postgres),
            _ => Err(format!("unknown store backend: {value}")),
        }
    }
}

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
