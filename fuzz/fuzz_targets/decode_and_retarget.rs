#![no_main]

use libfuzzer_sys::fuzz_target;
use rigstream_retarget::RetargetEngine;
use rigstream_skeleton::{layout, MemoryRig, Skeleton};
use rigstream_wire::{decode_message, Actor, DecodeOptions, InboundMessage};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(InboundMessage::Frame(frame)) = decode_message(text, &DecodeOptions::default()) else {
        return;
    };
    let (Ok(hand), Ok(body)) = (layout::hand(), layout::body()) else {
        return;
    };

    let mut left_rig = MemoryRig::from_layout("left_hand", &hand, "left_");
    let mut left = Skeleton::new("left_hand", hand, "left_").with_scale(true);
    let mut body_rig = MemoryRig::from_layout("root", &body, "");
    let mut body_skeleton = Skeleton::new("root", body, "").with_scale(true);
    if left.save_pose(&left_rig).is_err() || body_skeleton.save_pose(&body_rig).is_err() {
        return;
    }

    // Errors are fine, panics and non-finite output are not
    if let Ok(poses) = RetargetEngine::retarget_frame(&frame, |actor| match actor {
        Actor::LeftHand => Some(&left),
        Actor::Body => Some(&body_skeleton),
        Actor::RightHand => None,
    }) {
        for pose in &poses {
            for joint in &pose.joints {
                assert!(joint.scale.is_finite());
            }
            match pose.actor {
                Actor::Body => pose.apply(&mut body_rig, Some(0)),
                _ => pose.apply(&mut left_rig, Some(0)),
            }
        }
    }
});
