//! Channel broker protocol.
//!
//! Sessions join named channels and exchange messages within them:
//!
//! ```text
//! Handshake (first message):  <channel>$<optional bytes>   echoed back verbatim
//! Broadcast:                  1<payload>   -> every other channel member gets <payload>
//! Reply:                      2<payload>   -> sender gets <payload>
//!                             3<payload>   -> sender gets <payload>
//! ```
//!
//! Unknown command bytes are dropped silently. A handshake without `$` is
//! ignored and may be retried. A channel disappears as soon as its last
//! member leaves.

pub mod command;
pub mod handler;
pub mod handshake;

pub use command::{CommandFn, CommandTable};
pub use handler::Broker;
pub use handshake::HANDSHAKE_DELIMITER;
