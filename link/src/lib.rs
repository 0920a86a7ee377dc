//! Interface boundary between the node control plane and the layers around it.
//!
//! The link layer frames, sequences and acknowledges packets on one bearer
//! towards one peer; the bearer layer moves frames on the wire; the socket,
//! name table and broadcast layers consume what the control plane delivers.
//! None of them is implemented here: this crate only fixes the shapes the
//! control plane drives them through, plus the packet header fields it
//! inspects.

pub mod bearer;
pub mod error;
pub mod link;
pub mod msg;
pub mod queue;
pub mod upcall;

pub use bearer::{Bearer, MediaAddr, MEDIA_ADDR_LEN};
pub use error::LinkError;
pub use link::{ExecMode, Link, LinkEvents, LinkFactory, RcvQueues};
pub use msg::{Importance, MsgError, MsgHeader, MsgUser, Packet, TunnelKind, MAX_MSG_SIZE, TUNNEL_HDR_SIZE};
pub use queue::InputQueue;
pub use upcall::Upcalls;
