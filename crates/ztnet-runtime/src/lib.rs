//! ZTNet Runtime - Engine wiring and pass scheduling
//!
//! A reconciliation pass over one network runs in stages:
//! 1. Load the desired network and members from the store
//! 2. Validate the catalog and settle addressing
//! 3. Read the controller and record the snapshot
//! 4. Plan network intents and per-member batches
//! 5. Apply network intents, then member batches in order
//! 6. Re-read the controller and confirm phases
//!
//! Passes are serialized per network and run concurrently across networks.

pub mod config;
pub mod engine;
pub mod scheduler;
pub mod telemetry;

pub use config::*;
pub use engine::*;
pub use scheduler::*;
pub use telemetry::*;
