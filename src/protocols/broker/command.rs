//! Command dispatch table.
//!
//! After the handshake, the first byte of every message selects a handler.
//! The table is plain data: an ordered list of `(byte, handler)` pairs,
//! searched front to back, first match wins.

use bytes::Bytes;
use std::sync::Arc;

use super::handler::Broker;
use crate::runtime::Session;

/// Broadcast the payload to every other member of the sender's channel.
pub const CMD_BROADCAST: u8 = b'1';
/// Reply to the sender only.
pub const CMD_REPLY: u8 = b'2';
/// Reply to the sender only.
pub const CMD_REPLY_ALT: u8 = b'3';

/// Uniform handler signature: broker, sender, payload (command byte stripped).
pub type CommandFn = fn(&Broker, &Arc<Session>, Bytes);

#[derive(Clone, Default)]
pub struct CommandTable {
    entries: Vec<(u8, CommandFn)>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broadcast on `'1'`, reply to sender on `'2'` and `'3'`.
    pub fn standard() -> Self {
        let mut table = Self::new();
        table
            .register(CMD_BROADCAST, broadcast)
            .register(CMD_REPLY, reply)
            .register(CMD_REPLY_ALT, reply);
        table
    }

    /// Append an entry. An earlier entry for the same byte shadows this one.
    pub fn register(&mut self, command: u8, handler: CommandFn) -> &mut Self {
        self.entries.push((command, handler));
        self
    }

    pub fn lookup(&self, command: u8) -> Option<CommandFn> {
        self.entries
            .iter()
            .find(|(byte, _)| *byte == command)
            .map(|(_, handler)| *handler)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(byte, _)| *byte as char))
            .finish()
    }
}

fn broadcast(broker: &Broker, sender: &Arc<Session>, payload: Bytes) {
    broker.broadcast_from(sender, &payload);
}

fn reply(_broker: &Broker, sender: &Arc<Session>, payload: Bytes) {
    sender.write(&payload);
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::runtime::SessionOptions;

    fn first(_: &Broker, session: &Arc<Session>, _: Bytes) {
        let _ = session.set_context("first".to_string());
    }

    fn second(_: &Broker, session: &Arc<Session>, _: Bytes) {
        let _ = session.set_context("second".to_string());
    }

    #[test]
    fn test_standard_table() {
        let table = CommandTable::standard();
        assert_eq!(table.len(), 3);
        assert!(table.lookup(CMD_BROADCAST).is_some());
        assert!(table.lookup(CMD_REPLY).is_some());
        assert!(table.lookup(CMD_REPLY_ALT).is_some());
        assert!(table.lookup(b'9').is_none());
    }

    #[test]
    fn test_first_match_wins() {
        let mut table = CommandTable::new();
        assert!(table.is_empty());
        table.register(b'x', first).register(b'x', second);
        assert_eq!(format!("{table:?}"), "['x', 'x']");

        let (local, _peer) = tokio::io::duplex(16);
        let session = Session::new(local, "peer", SessionOptions::default());
        let handler = table.lookup(b'x').unwrap();
        handler(&Broker::new(), &session, Bytes::new());
        assert_eq!(session.context(), Some("first"));
    }
}
