//! ZTNet Core - Fundamental types for the policy engine
//!
//! This crate defines the types shared by every other ZTNet crate:
//! - Identifiers (NetworkId, MemberId)
//! - Desired network and member records
//! - Controller-observed records
//! - Mutation intents sent to the controller
//! - Account roles
//! - The error taxonomy (validation, allocation, convergence)

pub mod id;
pub mod network;
pub mod member;
pub mod observed;
pub mod intent;
pub mod role;
pub mod error;

pub use id::*;
pub use network::*;
pub use member::*;
pub use observed::*;
pub use intent::*;
pub use role::*;
pub use error::*;
