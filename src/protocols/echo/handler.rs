//! Echo protocol handler.

use bytes::Bytes;
use std::sync::Arc;
use tracing::trace;

use crate::runtime::Session;
use crate::server::SessionHandler;

/// Writes every message back to its sender.
#[derive(Debug, Default)]
pub struct EchoHandler;

impl SessionHandler for EchoHandler {
    fn on_message(&self, session: &Arc<Session>, message: Bytes) {
        trace!(peer = %session.address(), len = message.len(), "Echoing message");
        session.write(&message);
    }
}
