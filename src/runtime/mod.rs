//! Session runtime shared by the server and the client.
//!
//! - `codec`: length-prefixed frame encoding (binary or decimal header)
//! - `session`: one framed transport with ordered writes and idle timeout
//! - `registry`: bounded set of live sessions owned by the acceptor

pub mod codec;
pub mod registry;
pub mod session;

pub use codec::{Codec, HeaderEncoding, HEADER_SIZE};
pub use registry::SessionRegistry;
pub use session::{Session, SessionOptions, SessionState, Transport};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a callback panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
