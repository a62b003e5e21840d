//! Retargeted poses and their application onto a rig

use rigstream_core::{Position, RigError, Rotation};
use rigstream_skeleton::{BoneHandle, Channel, Rig};
use rigstream_wire::Actor;

/// Target pose of one joint
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointPose {
    /// Source joint index
    pub joint: usize,
    pub bone: BoneHandle,
    /// New local rotation
    pub rotation: Rotation,
    /// Uniform local scale
    pub scale: f64,
}

/// Target pose of one actor for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct ActorPose {
    pub actor: Actor,
    pub joints: Vec<JointPose>,
    pub root_position: Option<Position>,
    /// Per-joint problems that were skipped without rejecting the frame
    pub skipped: Vec<RigError>,
}

impl ActorPose {
    pub fn new(actor: Actor) -> Self {
        ActorPose {
            actor,
            joints: Vec::new(),
            root_position: None,
            skipped: Vec::new(),
        }
    }

    pub fn joint(&self, idx: usize) -> Option<&JointPose> {
        self.joints.iter().find(|j| j.joint == idx)
    }

    /// Write the pose to the rig, keying rotations at `keyframe` if set
    pub fn apply<R: Rig + ?Sized>(&self, rig: &mut R, keyframe: Option<i64>) {
        if let Some(position) = self.root_position {
            rig.set_root_position(position);
        }
        for joint in &self.joints {
            rig.set_local_rotation(joint.bone, joint.rotation);
            rig.set_local_scale(joint.bone, joint.scale);
            if let Some(frame) = keyframe {
                rig.insert_keyframe(joint.bone, Channel::Rotation, frame);
            }
        }
    }
}
