//! rigstream retargeting engine
//!
//! Pure function of (frame, skeleton) to target joint poses. The engine
//! keeps no state of its own: everything it needs is the reference cache
//! captured by `Skeleton::save_pose`.

pub mod engine;
pub mod pose;

pub use engine::*;
pub use pose::*;
