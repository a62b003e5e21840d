#![no_main]

use libfuzzer_sys::fuzz_target;
use rigstream_wire::{decode_message, DecodeOptions, InboundMessage};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let options = DecodeOptions {
        root_position_index: data.len() % 4,
    };
    // Must never panic; every decoded rotation must be a unit quaternion
    if let Ok(InboundMessage::Frame(frame)) = decode_message(text, &options) {
        for sample in &frame.actors {
            if let rigstream_wire::JointRotations::Positional(rotations) = &sample.rotations {
                for r in rotations {
                    assert!((r.quaternion().norm() - 1.0).abs() < 1e-9);
                }
            }
        }
    }
});
