//! Typed motion-capture frames

use rigstream_core::{FrameTimestamp, Position, Rotation};

/// Tracked actor carried by a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Actor {
    LeftHand,
    RightHand,
    Body,
}

impl Actor {
    /// Key used on the wire (`hands.Left`, `hands.Right`) or `Body`
    pub fn wire_name(self) -> &'static str {
        match self {
            Actor::LeftHand => "Left",
            Actor::RightHand => "Right",
            Actor::Body => "Body",
        }
    }

    pub fn from_hand_key(key: &str) -> Option<Actor> {
        match key {
            "Left" => Some(Actor::LeftHand),
            "Right" => Some(Actor::RightHand),
            _ => None,
        }
    }

    pub fn is_hand(self) -> bool {
        matches!(self, Actor::LeftHand | Actor::RightHand)
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Per-joint relative rotations of one actor
#[derive(Debug, Clone, PartialEq)]
pub enum JointRotations {
    /// One rotation per source joint, in source-skeleton joint order
    Positional(Vec<Rotation>),
    /// Rotations addressed by joint name
    Named(Vec<(String, Rotation)>),
}

impl JointRotations {
    pub fn len(&self) -> usize {
        match self {
            JointRotations::Positional(r) => r.len(),
            JointRotations::Named(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One actor's share of a frame
#[derive(Debug, Clone, PartialEq)]
pub struct ActorSample {
    pub actor: Actor,
    pub rotations: JointRotations,
    /// Relative bone-length scales, one per non-root joint
    pub scales: Option<Vec<f64>>,
    pub root_position: Option<Position>,
}

impl ActorSample {
    pub fn positional(actor: Actor, rotations: Vec<Rotation>) -> Self {
        ActorSample {
            actor,
            rotations: JointRotations::Positional(rotations),
            scales: None,
            root_position: None,
        }
    }

    pub fn with_scales(mut self, scales: Vec<f64>) -> Self {
        self.scales = Some(scales);
        self
    }

    pub fn with_root_position(mut self, position: Position) -> Self {
        self.root_position = Some(position);
        self
    }
}

/// One timestamped motion-capture update
#[derive(Debug, Clone, PartialEq)]
pub struct MotionFrame {
    pub timestamp: FrameTimestamp,
    pub actors: Vec<ActorSample>,
}

impl MotionFrame {
    pub fn new(timestamp: FrameTimestamp) -> Self {
        MotionFrame {
            timestamp,
            actors: Vec::new(),
        }
    }

    pub fn with_actor(mut self, sample: ActorSample) -> Self {
        self.actors.push(sample);
        self
    }

    pub fn actor(&self, actor: Actor) -> Option<&ActorSample> {
        self.actors.iter().find(|s| s.actor == actor)
    }
}
