//! Invitation lookup contract

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use ztnet_core::{unix_millis, Role};

/// Resolved invitation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InviteResolution {
    pub valid: bool,
    pub role: Role,
}

/// Invitation lookup failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InviteError {
    #[error("Invitation not found")]
    NotFound,

    #[error("Invitation expired")]
    Expired,

    #[error("Invitation service unavailable: {0}")]
    Unavailable(String),
}

/// Resolves invite codes presented at registration
#[async_trait]
pub trait InvitationResolver: Send + Sync {
    async fn resolve_invite(&self, code: &str) -> Result<InviteResolution, InviteError>;
}

#[derive(Debug, Clone)]
struct InviteEntry {
    role: Role,
    /// Milliseconds since the epoch
    expires_at: Option<i64>,
    uses_left: Option<u32>,
}

/// In-memory invitation codes
#[derive(Debug, Default)]
pub struct MemoryInvites {
    codes: RwLock<HashMap<String, InviteEntry>>,
}

impl MemoryInvites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an open-ended invite
    pub fn insert(&self, code: impl Into<String>, role: Role) {
        self.codes.write().insert(
            code.into(),
            InviteEntry {
                role,
                expires_at: None,
                uses_left: None,
            },
        );
    }

    /// Add an invite that lapses at `expires_at` (ms since the epoch)
    pub fn insert_expiring(&self, code: impl Into<String>, role: Role, expires_at: i64) {
        self.codes.write().insert(
            code.into(),
            InviteEntry {
                role,
                expires_at: Some(expires_at),
                uses_left: None,
            },
        );
    }

    /// Limit how many times a code resolves
    pub fn limit_uses(&self, code: &str, uses: u32) {
        if let Some(entry) = self.codes.write().get_mut(code) {
            entry.uses_left = Some(uses);
        }
    }

    pub fn revoke(&self, code: &str) -> bool {
        self.codes.write().remove(code).is_some()
    }
}

#[async_trait]
impl InvitationResolver for MemoryInvites {
    async fn resolve_invite(&self, code: &str) -> Result<InviteResolution, InviteError> {
        let mut codes = self.codes.write();
        let entry = codes.get_mut(code).ok_or(InviteError::NotFound)?;

        if entry.expires_at.is_some_and(|at| at <= unix_millis()) {
            return Err(InviteError::Expired);
        }
        match entry.uses_left {
            Some(0) => return Err(InviteError::Expired),
            Some(ref mut n) => *n -= 1,
            None => {}
        }

        Ok(InviteResolution {
            valid: true,
            role: entry.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_invite() {
        let invites = MemoryInvites::new();
        invites.insert("WELCOME", Role::User);

        let resolved = invites.resolve_invite("WELCOME").await.unwrap();
        assert!(resolved.valid);
        assert_eq!(resolved.role, Role::User);
        assert_eq!(invites.resolve_invite("nope").await, Err(InviteError::NotFound));
    }

    #[tokio::test]
    async fn test_expired_invite() {
        let invites = MemoryInvites::new();
        invites.insert_expiring("OLD", Role::User, 1);

        assert_eq!(invites.resolve_invite("OLD").await, Err(InviteError::Expired));
    }

    #[tokio::test]
    async fn test_single_use_invite() {
        let invites = MemoryInvites::new();
        invites.insert("ONCE", Role::Admin);
        invites.limit_uses("ONCE", 1);

        assert!(invites.resolve_invite("ONCE").await.is_ok());
        assert_eq!(invites.resolve_invite("ONCE").await, Err(InviteError::Expired));
    }
}
