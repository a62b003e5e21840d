//! Inbound message decoding
//!
//! Decoding happens in two steps: the payload is parsed as a generic JSON
//! value so that the `type` tag can be classified (an unknown tag is a
//! schema error, not a decode error), then the body is deserialized into
//! the raw wire structs and converted to typed frames.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use rigstream_core::{rotation_from_wxyz, FrameTimestamp, Position, RigError, RigResult, Rotation};

use crate::{Actor, ActorSample, JointRotations, MotionFrame};

/// Decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Peer announces its capture run state
    State { is_running: bool },
    /// Motion-capture sample
    Frame(MotionFrame),
    /// Peer-reported fatal fault
    Error { message: String },
}

impl InboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::State { .. } => "state",
            InboundMessage::Frame(_) => "frame",
            InboundMessage::Error { .. } => "error",
        }
    }
}

/// Knobs that affect decoding
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeOptions {
    /// Index into a hand's `xyz` array supplying the root position
    pub root_position_index: usize,
}

#[derive(Deserialize)]
struct RawState {
    #[serde(rename = "isRunning")]
    is_running: bool,
}

#[derive(Deserialize)]
struct RawError {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Seconds(f64),
    Text(String),
}

#[derive(Deserialize)]
struct RawHand {
    #[serde(alias = "relative_rotations")]
    theta: Vec<[f64; 4]>,
    #[serde(default, alias = "relative_scales")]
    scales: Option<Vec<f64>>,
    #[serde(default)]
    xyz: Option<Vec<[f64; 3]>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawBones {
    Positional(Vec<[f64; 4]>),
    Named(BTreeMap<String, [f64; 4]>),
}

#[derive(Deserialize)]
struct RawFrame {
    ts: RawTimestamp,
    #[serde(default)]
    hands: Option<BTreeMap<String, RawHand>>,
    #[serde(default)]
    bones: Option<RawBones>,
    #[serde(default)]
    position: Option<[f64; 3]>,
}

/// Decode one inbound text payload
pub fn decode_message(text: &str, options: &DecodeOptions) -> RigResult<InboundMessage> {
    let value: Value = serde_json::from_str(text)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| RigError::Decode("missing \"type\" field".into()))?
        .to_string();

    match kind.as_str() {
        "state" => {
            let raw: RawState = serde_json::from_value(value)?;
            Ok(InboundMessage::State {
                is_running: raw.is_running,
            })
        }
        "frame" => {
            let raw: RawFrame = serde_json::from_value(value)?;
            Ok(InboundMessage::Frame(convert_frame(raw, options)?))
        }
        "error" => {
            let raw: RawError = serde_json::from_value(value)?;
            Ok(InboundMessage::Error {
                message: raw.message,
            })
        }
        other => Err(RigError::UnknownMessageType(other.to_string())),
    }
}

fn convert_frame(raw: RawFrame, options: &DecodeOptions) -> RigResult<MotionFrame> {
    let timestamp = match raw.ts {
        RawTimestamp::Seconds(secs) => FrameTimestamp::from_epoch_secs(secs)?,
        RawTimestamp::Text(text) => FrameTimestamp::parse_iso8601(&text)?,
    };
    let mut frame = MotionFrame::new(timestamp);

    if let Some(bones) = raw.bones {
        let rotations = match bones {
            RawBones::Positional(quats) => JointRotations::Positional(convert_rotations(&quats)?),
            RawBones::Named(named) => {
                let mut rotations = Vec::with_capacity(named.len());
                for (index, (name, wxyz)) in named.into_iter().enumerate() {
                    let rotation =
                        rotation_from_wxyz(wxyz).ok_or(RigError::InvalidRotation(index))?;
                    rotations.push((name, rotation));
                }
                JointRotations::Named(rotations)
            }
        };
        frame.actors.push(ActorSample {
            actor: Actor::Body,
            rotations,
            scales: None,
            root_position: raw.position.map(Position::from),
        });
    }

    if let Some(hands) = raw.hands {
        for (key, hand) in hands {
            let Some(actor) = Actor::from_hand_key(&key) else {
                tracing::warn!("Ignoring unknown hand actor {:?}", key);
                continue;
            };
            let root_position = hand.xyz.as_ref().and_then(|xyz| {
                let position = xyz.get(options.root_position_index).copied();
                if position.is_none() {
                    tracing::warn!(
                        "{} hand has {} positions, no root at index {}",
                        key,
                        xyz.len(),
                        options.root_position_index
                    );
                }
                position.map(Position::from)
            });
            frame.actors.push(ActorSample {
                actor,
                rotations: JointRotations::Positional(convert_rotations(&hand.theta)?),
                scales: hand.scales,
                root_position,
            });
        }
    }

    if frame.actors.is_empty() {
        return Err(RigError::Decode(
            "frame carries neither \"hands\" nor \"bones\"".into(),
        ));
    }

    Ok(frame)
}

fn convert_rotations(quats: &[[f64; 4]]) -> RigResult<Vec<Rotation>> {
    quats
        .iter()
        .enumerate()
        .map(|(index, wxyz)| rotation_from_wxyz(*wxyz).ok_or(RigError::InvalidRotation(index)))
        .collect()
}
