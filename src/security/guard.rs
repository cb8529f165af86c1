//! Account state checks applied to the bearer of a session.
//!
//! Checks run deleted → disabled → unverified. A deleted account is reported as
//! not found so that no later check can disclose that it ever existed.

use super::error::SecurityError;
use super::model::Account;

/// Whether the calling flow needs a verified bearer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verification {
    Required,
    NotRequired,
}

impl Account {
    /// Validate the account state for the calling flow.
    ///
    /// # Errors
    /// `NotFound` when deleted, `Disabled` when disabled, `Unverified` when
    /// verification is required and missing.
    pub fn validate(&self, verification: Verification) -> Result<(), SecurityError> {
        if self.deleted {
            return Err(SecurityError::not_found("Account could not be found."));
        }
        if self.disabled {
            return Err(SecurityError::Disabled);
        }
        if verification == Verification::Required && !self.verified {
            return Err(SecurityError::Unverified);
        }
        Ok(())
    }
}
