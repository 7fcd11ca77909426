//! ZTNet Alloc - Addressing for virtual networks
//!
//! - [`allocate_address`]: deterministic lowest-free selection over pools
//! - [`validate_routes`] / [`validate_pools`]: pairwise overlap detection
//! - [`NetworkAllocator`]: per-network exclusive section around allocation

pub mod pool;
pub mod routes;
pub mod allocator;

pub use pool::*;
pub use routes::*;
pub use allocator::*;
