//! Handshake parsing.
//!
//! A handshake message is `<id><'$'><optional trailing bytes>`. The broker
//! uses the id as a channel name; the client uses it as its assigned id.

use crate::error::HandshakeError;

/// Separates the id from anything that follows it.
pub const HANDSHAKE_DELIMITER: u8 = b'$';

/// Split a handshake message into its id and the bytes after the delimiter.
pub fn parse(message: &[u8]) -> Result<(&[u8], &[u8]), HandshakeError> {
    let pos = message
        .iter()
        .position(|&b| b == HANDSHAKE_DELIMITER)
        .ok_or(HandshakeError::MissingDelimiter)?;
    Ok((&message[..pos], &message[pos + 1..]))
}

/// Build a handshake message for `id`.
pub fn request(id: &str) -> Vec<u8> {
    let mut message = Vec::with_capacity(id.len() + 1);
    message.extend_from_slice(id.as_bytes());
    message.push(HANDSHAKE_DELIMITER);
    message
}
