//! rigstream transport layer - line-oriented TCP
//!
//! This crate provides:
//! - TCP listener with ephemeral-port fallback
//! - Length-bounded line framing
//! - Bounded inbound queue shared between the I/O tasks and the tick
//! - Per-connection outbound channel
//!
//! The transport performs no JSON decoding. It accepts every connection,
//! but only the first live one may fill the inbound queue; the session
//! closes the others.

pub mod codec;
pub mod queue;
pub mod tcp;

pub use codec::*;
pub use queue::*;
pub use tcp::*;
