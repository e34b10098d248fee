//! Channel broker handler.
//!
//! Owns the channel table. Every join, leave and broadcast goes through a
//! single mutex, so membership changes and forwarding on a channel never
//! interleave. Forwarding only queues frames on the target sessions, so the
//! lock is never held across I/O.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, trace};

use super::command::CommandTable;
use super::handshake;
use crate::error::{CloseReason, HandshakeError};
use crate::runtime::{lock, Session};
use crate::server::SessionHandler;

/// A named group of sessions, keyed by session id.
#[derive(Default)]
struct Channel {
    members: HashMap<u64, Arc<Session>>,
}

/// Groups sessions into channels and dispatches their commands.
pub struct Broker {
    channels: Mutex<HashMap<String, Channel>>,
    commands: CommandTable,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker {
    /// Broker with the standard command table.
    pub fn new() -> Self {
        Self::with_commands(CommandTable::standard())
    }

    pub fn with_commands(commands: CommandTable) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            commands,
        }
    }

    /// Number of non-empty channels.
    pub fn channel_count(&self) -> usize {
        lock(&self.channels).len()
    }

    /// Session ids joined to `channel`, or `None` if the channel does not exist.
    pub fn members(&self, channel: &str) -> Option<Vec<u64>> {
        lock(&self.channels)
            .get(channel)
            .map(|c| c.members.keys().copied().collect())
    }

    /// Queue `payload` on every member of the sender's channel except the sender.
    pub fn broadcast_from(&self, sender: &Arc<Session>, payload: &[u8]) {
        let Some(channel_id) = sender.context() else {
            return;
        };

        let channels = lock(&self.channels);
        let Some(channel) = channels.get(channel_id) else {
            return;
        };
        let mut delivered = 0usize;
        for (id, member) in &channel.members {
            if *id != sender.id() {
                member.write(payload);
                delivered += 1;
            }
        }
        trace!(channel = channel_id, delivered, len = payload.len(), "Broadcast");
    }

    /// Interpret the first message of an unjoined session.
    fn join(&self, session: &Arc<Session>, message: &Bytes) -> Result<(), HandshakeError> {
        let (id, _) = handshake::parse(message)?;
        let channel_id = String::from_utf8_lossy(id).into_owned();

        // Join and leave both run under the table lock. A session that closed
        // first has already run `leave`, so it must not be added.
        let mut channels = lock(&self.channels);
        if !session.is_open() {
            debug!(peer = %session.address(), channel = %channel_id, "Handshake on closed session");
            return Ok(());
        }
        if session.set_context(channel_id.clone()).is_err() {
            return Ok(());
        }

        // Ack under the table lock so it precedes any broadcast the new member sees.
        let channel = channels.entry(channel_id.clone()).or_default();
        channel.members.insert(session.id(), Arc::clone(session));
        session.write(message);
        info!(
            peer = %session.address(),
            channel = %channel_id,
            members = channel.members.len(),
            "Session joined channel"
        );
        Ok(())
    }

    fn leave(&self, session: &Arc<Session>) {
        let mut channels = lock(&self.channels);
        let Some(channel_id) = session.context() else {
            return;
        };
        let Some(channel) = channels.get_mut(channel_id) else {
            return;
        };
        channel.members.remove(&session.id());
        info!(
            peer = %session.address(),
            channel = channel_id,
            members = channel.members.len(),
            "Session left channel"
        );
        if channel.members.is_empty() {
            channels.remove(channel_id);
            debug!(channel = channel_id, "Channel removed");
        }
    }

    fn dispatch(&self, session: &Arc<Session>, message: Bytes) {
        let Some(&command) = message.first() else {
            trace!(peer = %session.address(), "Dropping empty message");
            return;
        };
        match self.commands.lookup(command) {
            Some(handler) => handler(self, session, message.slice(1..)),
            None => trace!(
                peer = %session.address(),
                command = %(command as char),
                "Dropping unknown command"
            ),
        }
    }
}

impl SessionHandler for Broker {
    fn on_message(&self, session: &Arc<Session>, message: Bytes) {
        if session.context().is_some() {
            self.dispatch(session, message);
        } else if let Err(e) = self.join(session, &message) {
            debug!(peer = %session.address(), error = %e, "Handshake ignored");
        }
    }

    fn on_close(&self, session: &Arc<Session>, _reason: CloseReason) {
        self.leave(session);
    }
}
