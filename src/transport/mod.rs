//! Client side of the bidirectional stream transport
//!
//! One TCP connection carries one call. Writes go through a bounded channel
//! and a background task; reads are pulled lazily from the socket. A failure
//! on either direction is recorded in the call's [`CallContext`], which moves
//! the call to [`CallState::Failed`] and wakes every pending operation.

pub mod call;
pub mod config;
pub mod connection;
pub mod context;
mod tests;

pub use call::{Call, CallDetails, Inbound, Outbound};
pub use config::{ClientConfig, ClientConfigBuilder};
pub use connection::Transport;
pub use context::{CallContext, CallState};
