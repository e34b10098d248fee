//! Echo protocol implementation.
//!
//! A simple echo service for throughput and I/O testing: every frame a
//! client sends is written back to that client unchanged.
//!
//! ## Protocol Format
//!
//! Both directions use the session's length-prefixed framing:
//!
//! ```text
//! Request:  [len][data of exactly len bytes]
//! Response: [len][data of exactly len bytes]
//!
//! Example (binary header):
//! Request:  00 00 00 05 hello
//! Response: 00 00 00 05 hello
//! ```

pub mod handler;

pub use handler::EchoHandler;
