//! rigstream skeleton model
//!
//! A `Skeleton` pairs a source joint hierarchy (the capture device's joint
//! order) with a live target rig. `save_pose` captures, once per session,
//! the rig's rest orientation and bone length for every joint; joints the
//! rig does not have inherit their parent's reference so that descendants
//! keep a valid reference chain.

pub mod hierarchy;
pub mod layout;
pub mod memory;
pub mod rig;
pub mod skeleton;

pub use hierarchy::*;
pub use memory::*;
pub use rig::*;
pub use skeleton::*;
