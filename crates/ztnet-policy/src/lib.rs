//! ZTNet Policy - Catalog validation and capability resolution
//!
//! This crate implements the pure half of the policy engine:
//! - Network catalog validation (tags, capabilities, pools)
//! - Member validation against its network
//! - Effective tag values and capability grants per member
//!
//! Nothing here performs I/O; every function is deterministic over its inputs.

pub mod validate;
pub mod resolve;

pub use validate::*;
pub use resolve::*;
