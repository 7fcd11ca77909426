//! ZTNet State - Controller reconciliation
//!
//! This crate implements the Controller Reconciler:
//! - Per-member phase machine (pending, authorized, drifted, orphaned)
//! - Field-by-field diff of desired against last-observed records
//! - Ordered intent batches for members and networks
//! - The per-network observed snapshot, updated only from confirmed reads

pub mod phase;
pub mod diff;
pub mod observed;
pub mod reconcile;

pub use phase::*;
pub use diff::*;
pub use observed::*;
pub use reconcile::*;
