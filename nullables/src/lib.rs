//! Nullable infrastructure for deterministic testing.
//!
//! The control plane reaches the outside world only through the link,
//! bearer and upcall traits. This crate provides implementations that:
//! - Never touch a network or a timer
//! - Record every call for later assertions
//! - Can be scripted from the test through a shared handle
//!
//! Usage: wire a `NodeManager` to these instead of real collaborators.

pub mod bearer;
pub mod factory;
pub mod link;
pub mod upcalls;

pub use bearer::{NullBearer, SentFrames};
pub use factory::NullLinkFactory;
pub use link::{NullLink, NullLinkHandle};
pub use upcalls::{NullUpcalls, Upcall};
