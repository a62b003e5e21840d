//! rigstream runtime - receiver session and its scheduler
//!
//! This crate provides:
//! - `Session`: start/stop state machine, per-tick frame processing
//! - `ErrorDebouncer`: stable, UI-visible fault state
//! - `Host`: the scene/timeline collaborator, plus an in-memory host
//! - `driver::run`: fixed-rate tick loop on a tokio interval
//! - `telemetry::init_logging`: tracing subscriber setup

pub mod debounce;
pub mod driver;
pub mod host;
pub mod session;
pub mod telemetry;

pub use debounce::*;
pub use host::*;
pub use session::*;
