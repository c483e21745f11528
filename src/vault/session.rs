//! The ephemeral user session attached to an open vault.
//!
//! Sessions are never persisted.  They carry who authenticated, their
//! role, and any gates that must clear before the vault's payload can
//! be modified.

use crate::format::slot::Role;

/// Who is logged in to an open vault, and what they may do.
#[derive(Debug, Clone)]
pub struct UserSession {
    pub username: String,
    pub role: Role,
    /// Set when the slot carries `must_change_password`; payload writes
    /// are blocked until a password change succeeds.
    pub password_change_required: bool,
    /// Set when the policy requires a token but this slot has none
    /// enrolled yet.
    pub token_enrollment_required: bool,
    pub session_started_at: i64,
}

impl UserSession {
    pub fn new(
        username: impl Into<String>,
        role: Role,
        password_change_required: bool,
        token_enrollment_required: bool,
    ) -> Self {
        Self {
            username: username.into(),
            role,
            password_change_required,
            token_enrollment_required,
            session_started_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn is_administrator(&self) -> bool {
        self.role == Role::Administrator
    }

    /// Whether payload access is currently permitted.
    pub fn can_access_vault(&self) -> bool {
        !self.password_change_required && !self.token_enrollment_required
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_gates_block_vault_access() {
        let clear = UserSession::new("alice", Role::Standard, false, false);
        assert!(clear.can_access_vault());

        let pw_gate = UserSession::new("bob", Role::Standard, true, false);
        assert!(!pw_gate.can_access_vault());

        let token_gate = UserSession::new("carol", Role::Administrator, false, true);
        assert!(!token_gate.can_access_vault());
        assert!(token_gate.is_administrator());
    }
}
