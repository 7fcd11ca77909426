//! ZTNet Test Harness - Chaos testing and policy validation
//!
//! This crate provides:
//! - A fault-injecting controller
//! - Engine simulation against that controller
//! - Capability policy fuzzing
//! - End-to-end scenarios

pub mod chaos;
pub mod simulator;
pub mod policy_fuzzer;
pub mod integration;

pub use chaos::*;
pub use simulator::*;
pub use policy_fuzzer::*;
pub use integration::*;
