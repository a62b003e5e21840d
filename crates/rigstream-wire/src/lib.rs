//! rigstream wire protocol - JSON messages, one per line
//!
//! Inbound (peer to receiver):
//! - `{"type":"state","isRunning":bool}`
//! - `{"type":"frame","ts":...,"hands":{...}}` or the `bones` variant
//! - `{"type":"error","message":string}`
//!
//! Outbound (receiver to peer):
//! - `{"type":"command","command":"start"|"stop"}`

pub mod command;
pub mod frame;
pub mod message;

pub use command::*;
pub use frame::*;
pub use message::*;
