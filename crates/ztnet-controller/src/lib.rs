//! ZTNet Controller - External collaborator contracts
//!
//! The engine never speaks a wire protocol itself. Everything outside the
//! process is reached through these traits:
//! - [`ControllerApi`]: reads and writes against the network controller
//! - [`InvitationResolver`]: invite code lookup
//! - [`PolicyStore`]: durable network and member records
//! - [`Actor`]: the authenticated identity behind a mutating call
//!
//! [`TimedController`] bounds every controller call with a timeout.
//! [`MemoryController`], [`MemoryStore`] and [`MemoryInvites`] are in-process
//! implementations.

pub mod api;
pub mod invite;
pub mod identity;
pub mod memory;
pub mod store;
pub mod timed;

pub use api::*;
pub use invite::*;
pub use identity::*;
pub use memory::*;
pub use store::*;
pub use timed::*;
