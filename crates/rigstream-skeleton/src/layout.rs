//! Bundled source layouts
//!
//! Frames carry rotations in the capture device's joint order. These are
//! the orders the bundled rigs and the streaming peer agree on.

use rigstream_core::RigResult;

use crate::{Hierarchy, JointDef};

/// MPII hand joints, in wire order
pub const HAND_JOINTS: [(&str, Option<&str>); 21] = [
    ("root", None),
    ("thumb1", Some("root")),
    ("thumb2", Some("thumb1")),
    ("thumb3", Some("thumb2")),
    ("thumb_tip", Some("thumb3")),
    ("point1", Some("root")),
    ("point2", Some("point1")),
    ("point3", Some("point2")),
    ("point_tip", Some("point3")),
    ("middle1", Some("root")),
    ("middle2", Some("middle1")),
    ("middle3", Some("middle2")),
    ("middle_tip", Some("middle3")),
    ("ring1", Some("root")),
    ("ring2", Some("ring1")),
    ("ring3", Some("ring2")),
    ("ring_tip", Some("ring3")),
    ("pinky1", Some("root")),
    ("pinky2", Some("pinky1")),
    ("pinky3", Some("pinky2")),
    ("pinky_tip", Some("pinky3")),
];

/// Humanoid body joints, in wire order
pub const BODY_JOINTS: [(&str, Option<&str>); 21] = [
    ("root", None),
    ("spine", Some("root")),
    ("chest", Some("spine")),
    ("neck", Some("chest")),
    ("head", Some("neck")),
    ("left_shoulder", Some("chest")),
    ("left_upper_arm", Some("left_shoulder")),
    ("left_forearm", Some("left_upper_arm")),
    ("left_hand", Some("left_forearm")),
    ("right_shoulder", Some("chest")),
    ("right_upper_arm", Some("right_shoulder")),
    ("right_forearm", Some("right_upper_arm")),
    ("right_hand", Some("right_forearm")),
    ("left_thigh", Some("root")),
    ("left_shin", Some("left_thigh")),
    ("left_foot", Some("left_shin")),
    ("left_toe", Some("left_foot")),
    ("right_thigh", Some("root")),
    ("right_shin", Some("right_thigh")),
    ("right_foot", Some("right_shin")),
    ("right_toe", Some("right_foot")),
];

fn defs(table: &[(&str, Option<&str>)]) -> Vec<JointDef> {
    table
        .iter()
        .map(|(name, parent)| match parent {
            Some(parent) => JointDef::child(*name, *parent),
            None => JointDef::root(*name),
        })
        .collect()
}

/// 21-joint MPII hand
pub fn hand() -> RigResult<Hierarchy> {
    Hierarchy::new(defs(&HAND_JOINTS))
}

/// 21-joint humanoid body
pub fn body() -> RigResult<Hierarchy> {
    Hierarchy::new(defs(&BODY_JOINTS))
}
