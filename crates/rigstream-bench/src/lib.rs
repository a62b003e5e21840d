//! Shared fixtures for the rigstream benchmarks

use rigstream_core::{RigResult, Rotation};
use rigstream_skeleton::{layout, MemoryRig, RestBone, Skeleton};

/// A `hands` frame with both hands, every joint slightly rotated
pub fn hands_frame_json(ts: f64) -> String {
    let theta = vec!["[0.9961947,0.0871557,0,0]"; layout::HAND_JOINTS.len()].join(",");
    let scales = vec!["1.01"; layout::HAND_JOINTS.len() - 1].join(",");
    let xyz = vec!["[0.1,0.2,0.3]"; layout::HAND_JOINTS.len()].join(",");
    let hand = format!(r#"{{"theta":[{theta}],"scales":[{scales}],"xyz":[{xyz}]}}"#);
    format!(r#"{{"type":"frame","ts":{ts},"hands":{{"Left":{hand},"Right":{hand}}}}}"#)
}

/// A hand rig whose rest pose is not the identity, and its captured skeleton
pub fn bound_hand(prefix: &str, enable_scale: bool) -> RigResult<(Skeleton, MemoryRig)> {
    let hierarchy = layout::hand()?;
    let mut rig = MemoryRig::new(format!("{prefix}hand"));
    for (idx, joint) in hierarchy.iter() {
        let parent = joint.parent.and_then(|p| hierarchy.name(p)).map(|p| format!("{prefix}{p}"));
        let rest = RestBone::new(
            Rotation::from_euler_angles(0.05 * idx as f64, 0.0, 0.02),
            1.0 + 0.1 * idx as f64,
        );
        rig.add_bone(format!("{prefix}{}", joint.name), parent.as_deref(), rest);
    }
    let mut skeleton = Skeleton::new(format!("{prefix}hand"), hierarchy, prefix).with_scale(enable_scale);
    skeleton.save_pose(&rig)?;
    Ok((skeleton, rig))
}
