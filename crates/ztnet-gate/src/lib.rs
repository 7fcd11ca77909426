//! ZTNet Gate - Member authorization decisions
//!
//! The gate decides whether a member may be authorized and is the only code
//! that writes a member's `authorized` flag.

pub mod decision;

pub use decision::*;
