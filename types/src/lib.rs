//! Fundamental types for the peerlink node control plane.
//!
//! This crate defines the core types shared across every other crate in the workspace:
//! node addresses, bearer and link identities, and modular sequence numbers.

pub mod address;
pub mod bearer;
pub mod error;
pub mod seqno;

pub use address::NodeAddr;
pub use bearer::{BearerId, LinkId, MAX_BEARERS};
pub use error::TypesError;
pub use seqno::SeqNo;
