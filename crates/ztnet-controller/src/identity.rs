//! Caller identity
//!
//! Identities come from the session collaborator already authenticated; the
//! engine only checks the role before mutating policy.

use std::fmt;

use ztnet_core::{Role, ZtError, ZtResult};

/// Authenticated caller of a mutating operation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Actor {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Actor::new(user_id, Role::Admin)
    }

    /// Engine-internal actor for system-driven changes
    pub fn system() -> Self {
        Actor::new("system", Role::Admin)
    }

    /// Fail with [`ZtError::Forbidden`] unless the role may modify policy
    pub fn ensure_can_modify(&self) -> ZtResult<()> {
        if self.role.can_modify() {
            Ok(())
        } else {
            Err(ZtError::Forbidden(self.to_string()))
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.user_id, self.role)
    }
}
