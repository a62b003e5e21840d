//! Retargeting engine
//!
//! For each source joint `J` with relative rotation `q_rel`:
//!
//! ```text
//! local(J) = T[J] ∘ q_rel          T[J] = ref[J]⁻¹ ∘ ref[parent(J)]
//! scale(J) = s_rel · len[parent(J)] / len[J]    (only with enable_scale)
//! ```
//!
//! An identity `q_rel` therefore always lands on the target's own rest
//! mapping, whatever the capture rig's bind pose was. Composition order
//! matters: quaternion products do not commute.

use rigstream_core::{RigError, RigResult, Rotation};
use rigstream_skeleton::Skeleton;
use rigstream_wire::{Actor, ActorSample, JointRotations, MotionFrame};

use crate::{ActorPose, JointPose};

/// Stateless retargeting engine
pub struct RetargetEngine;

impl RetargetEngine {
    /// Local rotation for a joint given its source-relative rotation
    #[inline]
    pub fn joint_rotation(skeleton: &Skeleton, joint: usize, q_rel: &Rotation) -> Option<Rotation> {
        let rest_to_parent = skeleton.rest_to_parent(joint)?;
        // Renormalize: q_rel may have drifted if it was composed upstream
        let q_rel = Rotation::new_normalize(q_rel.into_inner());
        Some(rest_to_parent * q_rel)
    }

    /// Uniform scale for a joint given its source-relative bone scale
    #[inline]
    pub fn joint_scale(skeleton: &Skeleton, joint: usize, s_rel: f64) -> f64 {
        if !skeleton.enable_scale {
            return 1.0;
        }
        let Some(reference) = skeleton.reference(joint) else {
            return 1.0;
        };
        let parent = skeleton.parent_reference(joint);
        s_rel * parent.length / reference.length
    }

    /// Retarget one actor's sample onto its skeleton.
    ///
    /// Count mismatches reject the whole sample; unknown joint names are
    /// collected in `ActorPose::skipped` and the remaining joints still
    /// apply. Joints without a rig bone produce no pose.
    pub fn retarget(sample: &ActorSample, skeleton: &Skeleton) -> RigResult<ActorPose> {
        if !skeleton.is_captured() {
            return Err(RigError::Initialization(format!(
                "rest pose of {} was never captured",
                skeleton.name()
            )));
        }

        let joint_count = skeleton.joint_count();
        let mut pose = ActorPose::new(sample.actor);
        pose.root_position = sample.root_position;

        match &sample.rotations {
            JointRotations::Positional(rotations) => {
                if rotations.len() != joint_count {
                    return Err(RigError::JointCountMismatch {
                        actor: sample.actor.to_string(),
                        expected: joint_count,
                        actual: rotations.len(),
                    });
                }
                let scales = Self::checked_scales(sample, joint_count)?;

                for (joint, q_rel) in rotations.iter().enumerate() {
                    let s_rel = match (joint, scales) {
                        (0, _) | (_, None) => 1.0,
                        (j, Some(scales)) => scales[j - 1],
                    };
                    Self::push_joint(&mut pose, skeleton, joint, q_rel, s_rel);
                }
            }
            JointRotations::Named(rotations) => {
                if sample.scales.is_some() {
                    tracing::debug!("Ignoring positional scales on named {} sample", sample.actor);
                }
                for (name, q_rel) in rotations {
                    match skeleton.joint_index(name) {
                        Some(joint) => Self::push_joint(&mut pose, skeleton, joint, q_rel, 1.0),
                        None => {
                            tracing::warn!("Unknown joint {} for {}, skipping", name, sample.actor);
                            pose.skipped.push(RigError::UnknownJoint(name.clone()));
                        }
                    }
                }
            }
        }

        Ok(pose)
    }

    /// Retarget every actor of a frame.
    ///
    /// All actors are validated before anything is returned, so a frame
    /// that fails for one actor mutates none of them.
    pub fn retarget_frame<'a, F>(frame: &MotionFrame, skeleton_for: F) -> RigResult<Vec<ActorPose>>
    where
        F: Fn(Actor) -> Option<&'a Skeleton>,
    {
        let mut poses = Vec::with_capacity(frame.actors.len());
        for sample in &frame.actors {
            match skeleton_for(sample.actor) {
                Some(skeleton) => poses.push(Self::retarget(sample, skeleton)?),
                None => tracing::warn!("No skeleton for {}, skipping actor", sample.actor),
            }
        }
        Ok(poses)
    }

    fn checked_scales(sample: &ActorSample, joint_count: usize) -> RigResult<Option<&[f64]>> {
        let Some(scales) = sample.scales.as_deref() else {
            return Ok(None);
        };
        let expected = joint_count.saturating_sub(1);
        if scales.len() != expected {
            return Err(RigError::ScaleCountMismatch {
                actor: sample.actor.to_string(),
                expected,
                actual: scales.len(),
            });
        }
        if let Some(bad) = scales.iter().position(|s| !s.is_finite() || *s <= 0.0) {
            return Err(RigError::Decode(format!(
                "unusable scale at index {} for {}",
                bad, sample.actor
            )));
        }
        Ok(Some(scales))
    }

    fn push_joint(
        pose: &mut ActorPose,
        skeleton: &Skeleton,
        joint: usize,
        q_rel: &Rotation,
        s_rel: f64,
    ) {
        // Joints the rig lacks only exist to keep the reference chain intact
        let Some(bone) = skeleton.bone(joint) else {
            return;
        };
        let Some(rotation) = Self::joint_rotation(skeleton, joint, q_rel) else {
            return;
        };
        pose.joints.push(JointPose {
            joint,
            bone,
            rotation,
            scale: Self::joint_scale(skeleton, joint, s_rel),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;
    use proptest::prelude::*;
    use rigstream_core::{rotations_close, FrameTimestamp};
    use rigstream_skeleton::{layout, Hierarchy, JointDef, MemoryRig, RestBone, Rig};
    use std::f64::consts::FRAC_PI_2;

    fn arm_hierarchy() -> Hierarchy {
        Hierarchy::new(vec![
            JointDef::root("root"),
            JointDef::child("shoulder", "root"),
            JointDef::child("elbow", "shoulder"),
        ])
        .unwrap()
    }

    fn identity_arm() -> (Skeleton, MemoryRig) {
        let rig = MemoryRig::from_layout("arm", &arm_hierarchy(), "");
        let mut skeleton = Skeleton::new("arm", arm_hierarchy(), "");
        skeleton.save_pose(&rig).unwrap();
        (skeleton, rig)
    }

    fn quarter_z() -> Rotation {
        Rotation::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2)
    }

    #[test]
    fn test_shoulder_quarter_turn_example() {
        let (skeleton, mut rig) = identity_arm();
        let sample = ActorSample::positional(
            Actor::Body,
            vec![Rotation::identity(), quarter_z(), Rotation::identity()],
        );

        let pose = RetargetEngine::retarget(&sample, &skeleton).unwrap();
        pose.apply(&mut rig, None);

        let root = rig.pose_rotation("root").unwrap();
        let shoulder = rig.pose_rotation("shoulder").unwrap();
        let elbow = rig.pose_rotation("elbow").unwrap();
        assert!(rotations_close(&root, &Rotation::identity(), 1e-12));
        assert!(rotations_close(&shoulder, &quarter_z(), 1e-12));
        assert!(rotations_close(&elbow, &Rotation::identity(), 1e-12));
        assert!(rig.keyframes().is_empty());
    }

    #[test]
    fn test_composition_order() {
        // ref[shoulder] = quarter turn about Z, ref[root] = identity
        let rig = MemoryRig::new("arm")
            .with_bone("root", None, RestBone::default())
            .with_bone("shoulder", Some("root"), RestBone::new(quarter_z(), 1.0))
            .with_bone("elbow", Some("shoulder"), RestBone::default());
        let mut skeleton = Skeleton::new("arm", arm_hierarchy(), "");
        skeleton.save_pose(&rig).unwrap();

        let q_rel = Rotation::from_axis_angle(&Vector3::x_axis(), FRAC_PI_2);
        let got = RetargetEngine::joint_rotation(&skeleton, 1, &q_rel).unwrap();
        let expected = quarter_z().inverse() * q_rel;
        let reversed = q_rel * quarter_z().inverse();
        assert!(rotations_close(&got, &expected, 1e-12));
        assert!(!rotations_close(&got, &reversed, 1e-6));
    }

    #[test]
    fn test_identity_frame_yields_rest_mapping_and_is_idempotent() {
        let rig_template = MemoryRig::new("arm")
            .with_bone("root", None, RestBone::new(Rotation::from_euler_angles(0.2, 0.0, 0.1), 1.0))
            .with_bone("shoulder", Some("root"), RestBone::new(quarter_z(), 2.0))
            .with_bone(
                "elbow",
                Some("shoulder"),
                RestBone::new(Rotation::from_euler_angles(0.0, 0.4, 0.0), 1.0),
            );
        let mut rig = rig_template.clone();
        let mut skeleton = Skeleton::new("arm", arm_hierarchy(), "");
        skeleton.save_pose(&rig).unwrap();

        let sample = ActorSample::positional(Actor::Body, vec![Rotation::identity(); 3]);
        RetargetEngine::retarget(&sample, &skeleton)
            .unwrap()
            .apply(&mut rig, None);
        let first: Vec<_> = ["root", "shoulder", "elbow"]
            .iter()
            .map(|n| rig.pose_rotation(n).unwrap())
            .collect();

        for (idx, rotation) in first.iter().enumerate() {
            let rest = skeleton.rest_to_parent(idx).unwrap();
            assert!(rotations_close(rotation, &rest, 1e-12));
        }

        RetargetEngine::retarget(&sample, &skeleton)
            .unwrap()
            .apply(&mut rig, None);
        for (idx, name) in ["root", "shoulder", "elbow"].iter().enumerate() {
            assert!(rotations_close(&rig.pose_rotation(name).unwrap(), &first[idx], 1e-12));
        }
    }

    #[test]
    fn test_joint_count_mismatch_rejects_sample() {
        let (skeleton, _) = identity_arm();
        let sample = ActorSample::positional(Actor::LeftHand, vec![Rotation::identity(); 2]);
        let err = RetargetEngine::retarget(&sample, &skeleton).unwrap_err();
        assert_eq!(
            err,
            RigError::JointCountMismatch {
                actor: "Left".into(),
                expected: 3,
                actual: 2,
            }
        );
    }

    #[test]
    fn test_scale_count_mismatch() {
        let (skeleton, _) = identity_arm();
        let sample = ActorSample::positional(Actor::Body, vec![Rotation::identity(); 3])
            .with_scales(vec![1.0, 1.0, 1.0]);
        assert!(matches!(
            RetargetEngine::retarget(&sample, &skeleton),
            Err(RigError::ScaleCountMismatch { expected: 2, actual: 3, .. })
        ));
    }

    #[test]
    fn test_scale_ratio_when_enabled() {
        let rig = MemoryRig::new("arm")
            .with_bone("root", None, RestBone::new(Rotation::identity(), 2.0))
            .with_bone("shoulder", Some("root"), RestBone::new(Rotation::identity(), 4.0))
            .with_bone("elbow", Some("shoulder"), RestBone::new(Rotation::identity(), 1.0));
        let mut skeleton = Skeleton::new("arm", arm_hierarchy(), "").with_scale(true);
        skeleton.save_pose(&rig).unwrap();

        let sample = ActorSample::positional(Actor::Body, vec![Rotation::identity(); 3])
            .with_scales(vec![1.5, 0.5]);
        let pose = RetargetEngine::retarget(&sample, &skeleton).unwrap();

        // root has no incoming bone: s_rel = 1, parent is the world (length 1)
        assert!((pose.joint(0).unwrap().scale - 0.5).abs() < 1e-12);
        // shoulder: 1.5 * 2 / 4
        assert!((pose.joint(1).unwrap().scale - 0.75).abs() < 1e-12);
        // elbow: 0.5 * 4 / 1
        assert!((pose.joint(2).unwrap().scale - 2.0).abs() < 1e-12);

        skeleton.enable_scale = false;
        let pose = RetargetEngine::retarget(&sample, &skeleton).unwrap();
        assert!(pose.joints.iter().all(|j| j.scale == 1.0));
    }

    #[test]
    fn test_missing_rig_joint_is_noop() {
        let rig = MemoryRig::new("coarse")
            .with_bone("root", None, RestBone::default())
            .with_bone("elbow", Some("root"), RestBone::default());
        let mut skeleton = Skeleton::new("arm", arm_hierarchy(), "");
        skeleton.save_pose(&rig).unwrap();

        let sample = ActorSample::positional(Actor::Body, vec![quarter_z(); 3]);
        let pose = RetargetEngine::retarget(&sample, &skeleton).unwrap();
        assert_eq!(pose.joints.len(), 2);
        assert!(pose.joint(1).is_none());
    }

    #[test]
    fn test_unknown_named_joint_skipped_per_joint() {
        let (skeleton, mut rig) = identity_arm();
        let sample = ActorSample {
            actor: Actor::Body,
            rotations: JointRotations::Named(vec![
                ("tail".to_string(), quarter_z()),
                ("elbow".to_string(), quarter_z()),
            ]),
            scales: None,
            root_position: None,
        };
        let pose = RetargetEngine::retarget(&sample, &skeleton).unwrap();
        assert_eq!(pose.skipped, vec![RigError::UnknownJoint("tail".into())]);
        pose.apply(&mut rig, Some(12));
        assert!(rotations_close(&rig.pose_rotation("elbow").unwrap(), &quarter_z(), 1e-12));
        let keys = rig.keyframes_for("elbow");
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].frame, 12);
    }

    #[test]
    fn test_uncaptured_skeleton_rejected() {
        let skeleton = Skeleton::new("arm", arm_hierarchy(), "");
        let sample = ActorSample::positional(Actor::Body, vec![Rotation::identity(); 3]);
        assert!(RetargetEngine::retarget(&sample, &skeleton).is_err());
    }

    #[test]
    fn test_frame_validated_before_any_pose() {
        let hierarchy = layout::hand().unwrap();
        let left_rig = MemoryRig::from_layout("left", &hierarchy, "left_");
        let mut left = Skeleton::new("left", hierarchy.clone(), "left_");
        left.save_pose(&left_rig).unwrap();
        let right_rig = MemoryRig::from_layout("right", &hierarchy, "right_");
        let mut right = Skeleton::new("right", hierarchy, "right_");
        right.save_pose(&right_rig).unwrap();

        let frame = MotionFrame::new(FrameTimestamp(0.0))
            .with_actor(ActorSample::positional(Actor::LeftHand, vec![quarter_z(); 21]))
            .with_actor(ActorSample::positional(Actor::RightHand, vec![quarter_z(); 20]));

        let result = RetargetEngine::retarget_frame(&frame, |actor| match actor {
            Actor::LeftHand => Some(&left),
            Actor::RightHand => Some(&right),
            Actor::Body => None,
        });
        assert!(matches!(result, Err(RigError::JointCountMismatch { .. })));
    }

    #[test]
    fn test_root_position_applied() {
        let (skeleton, mut rig) = identity_arm();
        let sample = ActorSample::positional(Actor::Body, vec![Rotation::identity(); 3])
            .with_root_position(rigstream_core::Position::new(1.0, 2.0, 3.0));
        RetargetEngine::retarget(&sample, &skeleton)
            .unwrap()
            .apply(&mut rig, None);
        assert_eq!(rig.root_position(), rigstream_core::Position::new(1.0, 2.0, 3.0));
        assert_eq!(rig.name(), "arm");
    }

    fn arb_rotation() -> impl Strategy<Value = Rotation> {
        (-3.0f64..3.0, -3.0f64..3.0, -3.0f64..3.0)
            .prop_map(|(r, p, y)| Rotation::from_euler_angles(r, p, y))
    }

    proptest! {
        #[test]
        fn prop_inverse_reference_transform_round_trips(
            root in arb_rotation(),
            shoulder in arb_rotation(),
            elbow in arb_rotation(),
        ) {
            let rig = MemoryRig::new("arm")
                .with_bone("root", None, RestBone::new(root, 1.0))
                .with_bone("shoulder", Some("root"), RestBone::new(shoulder, 1.0))
                .with_bone("elbow", Some("shoulder"), RestBone::new(elbow, 1.0));
            let mut skeleton = Skeleton::new("arm", arm_hierarchy(), "");
            skeleton.save_pose(&rig).unwrap();

            for joint in 0..3 {
                let t = skeleton.rest_to_parent(joint).unwrap();
                let q_rel = t.inverse();
                let local = RetargetEngine::joint_rotation(&skeleton, joint, &q_rel).unwrap();
                prop_assert!(rotations_close(&local, &Rotation::identity(), 1e-9));
            }
        }

        #[test]
        fn prop_output_rotations_stay_unit(q in arb_rotation()) {
            let (skeleton, _) = identity_arm();
            let sample = ActorSample::positional(Actor::Body, vec![q, q, q]);
            let pose = RetargetEngine::retarget(&sample, &skeleton).unwrap();
            for joint in &pose.joints {
                prop_assert!((joint.rotation.quaternion().norm() - 1.0).abs() < 1e-9);
            }
        }
    }
}
