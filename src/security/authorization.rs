//! Role and permission checks.
//!
//! Permissions are `resource:action` strings. A granted segment of `*`
//! matches any value in that position, so `*:*` grants everything and
//! `account:*` grants every action on accounts.

use super::error::SecurityError;
use super::model::Account;

/// Whether a granted permission covers a required one.
#[must_use]
pub fn permission_matches(granted: &str, required: &str) -> bool {
    let granted: Vec<&str> = granted.trim().split(':').collect();
    let required: Vec<&str> = required.trim().split(':').collect();
    granted.len() == required.len()
        && granted
            .iter()
            .zip(&required)
            .all(|(granted, required)| *granted == "*" || granted == required)
}

impl Account {
    #[must_use]
    pub fn has_role(&self, name: &str) -> bool {
        self.roles.iter().any(|role| role.name == name)
    }

    /// Passes when the account holds any of `roles`.
    ///
    /// # Errors
    /// `InsufficientRoles` otherwise.
    pub fn check_roles(&self, roles: &[&str]) -> Result<(), SecurityError> {
        if roles.iter().any(|role| self.has_role(role)) {
            Ok(())
        } else {
            Err(SecurityError::InsufficientRoles)
        }
    }

    /// Passes when any granted permission covers any of `required`.
    ///
    /// # Errors
    /// `InsufficientPermissions` otherwise.
    pub fn check_permissions(&self, required: &[&str]) -> Result<(), SecurityError> {
        let granted = self.roles.iter().flat_map(|role| role.permissions.iter());
        for permission in granted {
            if required
                .iter()
                .any(|required| permission_matches(permission, required))
            {
                return Ok(());
            }
        }
        Err(SecurityError::InsufficientPermissions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::model::Role;

    fn account(roles: Vec<Role>) -> Account {
        let mut account = Account::new("a@example.com", "hash");
        account.roles = roles;
        account
    }

    #[test]
    fn wildcards_match_per_segment() {
        assert!(permission_matches("*:*", "account:delete"));
        assert!(permission_matches("account:*", "account:read"));
        assert!(permission_matches("*:read", "channel:read"));
        assert!(permission_matches("account:read", "account:read"));
        assert!(!permission_matches("account:*", "channel:read"));
        assert!(!permission_matches("account:read", "account:write"));
        assert!(!permission_matches("*:*", "account"));
    }

    #[test]
    fn roles_are_any_of() {
        let account = account(vec![Role::new("Moderator", &["channel:*"])]);
        assert!(account.check_roles(&["Admin", "Moderator"]).is_ok());
        assert_eq!(
            account.check_roles(&["Admin"]),
            Err(SecurityError::InsufficientRoles)
        );
        assert_eq!(account.check_roles(&[]), Err(SecurityError::InsufficientRoles));
    }

    #[test]
    fn permissions_are_any_of() {
        let account = account(vec![
            Role::new("Reader", &["account:read"]),
            Role::new("Moderator", &["channel:*"]),
        ]);
        assert!(account.check_permissions(&["channel:ban"]).is_ok());
        assert!(account
            .check_permissions(&["account:write", "account:read"])
            .is_ok());
        assert_eq!(
            account.check_permissions(&["account:write"]),
            Err(SecurityError::InsufficientPermissions)
        );
    }

    #[test]
    fn root_permission_covers_everything() {
        let account = account(vec![Role::new("Root", &["*:*"])]);
        assert!(account.check_permissions(&["billing:refund"]).is_ok());
        assert!(account.check_roles(&["Root"]).is_ok());
    }
}
