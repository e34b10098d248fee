//! Protocol implementations.
//!
//! Each protocol plugs into the acceptor as a `SessionHandler`:
//! - `echo`: writes every frame back to its sender
//! - `broker`: channel handshake plus command dispatch
//!   (broadcast to channel, reply to sender)

pub mod broker;
pub mod echo;
