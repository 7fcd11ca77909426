//! Account roles
//!
//! Roles arrive as strings from the session and invitation collaborators
//! (`"ADMIN"`, `"USER"`, `"READ_ONLY"`) and are parsed once at the boundary.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Role of an account or an invitation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    #[serde(alias = "MEMBER")]
    User,
    ReadOnly,
}

impl Role {
    /// Roles allowed to change network policy or membership
    pub fn can_modify(self) -> bool {
        matches!(self, Role::Admin | Role::User)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Admin => "ADMIN",
            Role::User => "USER",
            Role::ReadOnly => "READ_ONLY",
        })
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "ADMIN" => Ok(Role::Admin),
            "USER" | "MEMBER" => Ok(Role::User),
            "READ_ONLY" | "READONLY" => Ok(Role::ReadOnly),
            _ => Err(format!("unknown role {:?}", s)),
        }
    }
}
