//! Error taxonomy for framed sessions.
//!
//! Nothing here is ever thrown past a session boundary: transport, framing
//! and timeout failures are folded into a [`CloseReason`] and handed to the
//! owner's close callback exactly once.

use std::fmt;
use std::io;

/// The declared frame length disagrees with what the frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingError {
    /// Header says `declared` bytes but the body holds `actual`.
    LengthMismatch { declared: usize, actual: usize },
    /// Length cannot be represented or exceeds the configured maximum.
    TooLarge { len: usize, max: usize },
    /// Header bytes are not a valid length (e.g. non-digits in a decimal header).
    InvalidHeader,
}

impl fmt::Display for FramingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FramingError::LengthMismatch { declared, actual } => {
                write!(f, "frame declares {declared} bytes but carries {actual}")
            }
            FramingError::TooLarge { len, max } => {
                write!(f, "frame length {len} exceeds maximum {max}")
            }
            FramingError::InvalidHeader => write!(f, "invalid frame header"),
        }
    }
}

impl std::error::Error for FramingError {}

/// Transport-level failure, classified from the underlying I/O error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// Peer closed the stream, possibly mid-frame.
    PeerClosed,
    /// Peer reset or aborted the connection.
    ConnectionReset,
    /// Anything else the OS reported.
    Other(io::ErrorKind),
}

impl From<&io::Error> for TransportError {
    fn from(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe => TransportError::PeerClosed,
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                TransportError::ConnectionReset
            }
            kind => TransportError::Other(kind),
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        TransportError::from(&err)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::PeerClosed => write!(f, "peer closed"),
            TransportError::ConnectionReset => write!(f, "connection reset"),
            TransportError::Other(kind) => write!(f, "transport error: {kind}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Why a session closed. Delivered once to the close callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Transport(TransportError),
    Framing(FramingError),
    /// No frame header arrived within the idle window.
    Timeout,
    /// Closed deliberately by the local owner.
    Shutdown,
}

impl From<TransportError> for CloseReason {
    fn from(err: TransportError) -> Self {
        CloseReason::Transport(err)
    }
}

impl From<FramingError> for CloseReason {
    fn from(err: FramingError) -> Self {
        CloseReason::Framing(err)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Transport(e) => write!(f, "{e}"),
            CloseReason::Framing(e) => write!(f, "framing error: {e}"),
            CloseReason::Timeout => write!(f, "idle timeout"),
            CloseReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// A handshake message arrived without its delimiter. Never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    MissingDelimiter,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::MissingDelimiter => write!(f, "handshake delimiter not found"),
        }
    }
}

impl std::error::Error for HandshakeError {}
