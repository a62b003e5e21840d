//! Target rig collaborator
//!
//! The rig lives in the host application's scene. The core only needs to
//! read rest geometry once and write local rotation/scale per frame.

use rigstream_core::{Position, Rotation};

/// Opaque handle to a bone of a live rig, resolved once per session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoneHandle(pub usize);

/// Rest (bind) geometry of one bone
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestBone {
    /// Orientation relative to the parent bone's rest orientation
    pub local_rotation: Rotation,
    pub length: f64,
}

impl RestBone {
    pub fn new(local_rotation: Rotation, length: f64) -> Self {
        RestBone {
            local_rotation,
            length,
        }
    }
}

impl Default for RestBone {
    fn default() -> Self {
        RestBone::new(Rotation::identity(), 1.0)
    }
}

/// Animation channel a keyframe is inserted on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Rotation,
    Scale,
    Location,
}

/// Live target rig
pub trait Rig {
    /// Scene object name
    fn name(&self) -> &str;

    /// Resolve a bone by its (prefixed) name
    fn resolve_bone(&self, name: &str) -> Option<BoneHandle>;

    /// Rest geometry of a bone
    fn rest_bone(&self, bone: BoneHandle) -> Option<RestBone>;

    fn set_local_rotation(&mut self, bone: BoneHandle, rotation: Rotation);

    fn set_local_scale(&mut self, bone: BoneHandle, scale: f64);

    fn set_root_position(&mut self, position: Position);

    /// Key the channel's current value at `frame`
    fn insert_keyframe(&mut self, bone: BoneHandle, channel: Channel, frame: i64);
}
