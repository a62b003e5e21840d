//! rigstream core - Fundamental types and primitives
//!
//! This crate defines the types shared by every rigstream crate:
//! - Error taxonomy (transport, decode, schema, remote, initialization)
//! - Receiver configuration
//! - Frame timestamps and the time-cursor delta policy
//! - Unit quaternion helpers

pub mod config;
pub mod error;
pub mod rotation;
pub mod time;

pub use config::*;
pub use error::*;
pub use rotation::*;
pub use time::*;
