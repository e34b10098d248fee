//! framewire: length-prefixed TCP sessions
//!
//! Layers, leaves first:
//! - `runtime`: frame codec, sessions with ordered writes and idle timeout
//! - `server`: acceptor that wraps inbound connections in sessions
//! - `client`: reconnecting client with handshake and keep-alive
//! - `protocols`: echo service and channel broker built on sessions

pub mod client;
pub mod config;
pub mod error;
pub mod protocols;
pub mod runtime;
pub mod server;
