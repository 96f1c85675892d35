//! Replication Module
//!
//! Keeps independent cache instances loosely in sync over broadcast datagrams.
//!
//! - [`Sender`] turns local mutations into outbound [`WireMessage`]s
//! - [`Listener`] applies inbound messages from peers, skipping other cache
//!   names and this node's own echoes

mod listener;
mod message;
mod sender;

pub use listener::{apply_message, handle_datagram, ApplyOutcome, Listener, ReplicaTarget};
pub use message::{NodeId, WireMessage, CLEAN_KEY};
pub use sender::Sender;
