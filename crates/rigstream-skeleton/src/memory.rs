//! In-memory rig
//!
//! Used by the headless receiver and by tests. Also provides the bundled
//! rigs: every bone points along the parent's +Y axis with unit length and
//! identity rest rotation.

use std::collections::HashMap;

use rigstream_core::{Position, Rotation};

use crate::{BoneHandle, Channel, Hierarchy, RestBone, Rig};

/// Bone of an in-memory rig
#[derive(Debug, Clone)]
pub struct MemoryBone {
    pub name: String,
    pub parent: Option<usize>,
    pub rest: RestBone,
    pub pose_rotation: Rotation,
    pub pose_scale: f64,
}

/// Keyed value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyValue {
    Rotation(Rotation),
    Scale(f64),
    Location(Position),
}

/// Recorded keyframe
#[derive(Debug, Clone, PartialEq)]
pub struct KeyframeRecord {
    pub bone: BoneHandle,
    pub frame: i64,
    pub value: KeyValue,
}

/// Rig held entirely in memory
#[derive(Debug, Clone)]
pub struct MemoryRig {
    name: String,
    bones: Vec<MemoryBone>,
    index: HashMap<String, usize>,
    root_position: Position,
    keyframes: Vec<KeyframeRecord>,
}

impl MemoryRig {
    pub fn new(name: impl Into<String>) -> Self {
        MemoryRig {
            name: name.into(),
            bones: Vec::new(),
            index: HashMap::new(),
            root_position: Position::zeros(),
            keyframes: Vec::new(),
        }
    }

    /// Build the bundled rig for a layout, bone names prefixed with `prefix`
    pub fn from_layout(name: impl Into<String>, hierarchy: &Hierarchy, prefix: &str) -> Self {
        let mut rig = MemoryRig::new(name);
        for (_, joint) in hierarchy.iter() {
            let parent = joint
                .parent
                .and_then(|p| hierarchy.name(p))
                .map(|p| format!("{prefix}{p}"));
            rig.add_bone(
                format!("{prefix}{}", joint.name),
                parent.as_deref(),
                RestBone::default(),
            );
        }
        rig
    }

    /// Add a bone; an unknown parent name attaches the bone at the top level
    pub fn add_bone(
        &mut self,
        name: impl Into<String>,
        parent: Option<&str>,
        rest: RestBone,
    ) -> BoneHandle {
        let name = name.into();
        let idx = self.bones.len();
        let parent = parent.and_then(|p| self.index.get(p).copied());
        self.index.insert(name.clone(), idx);
        self.bones.push(MemoryBone {
            name,
            parent,
            rest,
            pose_rotation: Rotation::identity(),
            pose_scale: 1.0,
        });
        BoneHandle(idx)
    }

    /// Builder form of `add_bone`
    pub fn with_bone(mut self, name: &str, parent: Option<&str>, rest: RestBone) -> Self {
        self.add_bone(name, parent, rest);
        self
    }

    pub fn bone(&self, name: &str) -> Option<&MemoryBone> {
        self.index.get(name).map(|&i| &self.bones[i])
    }

    pub fn bones(&self) -> &[MemoryBone] {
        &self.bones
    }

    pub fn pose_rotation(&self, name: &str) -> Option<Rotation> {
        self.bone(name).map(|b| b.pose_rotation)
    }

    pub fn pose_scale(&self, name: &str) -> Option<f64> {
        self.bone(name).map(|b| b.pose_scale)
    }

    pub fn root_position(&self) -> Position {
        self.root_position
    }

    pub fn keyframes(&self) -> &[KeyframeRecord] {
        &self.keyframes
    }

    /// Keyframes recorded for a named bone
    pub fn keyframes_for(&self, name: &str) -> Vec<&KeyframeRecord> {
        match self.index.get(name) {
            Some(&idx) => self
                .keyframes
                .iter()
                .filter(|k| k.bone == BoneHandle(idx))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn clear_keyframes(&mut self) {
        self.keyframes.clear();
    }
}

impl Rig for MemoryRig {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve_bone(&self, name: &str) -> Option<BoneHandle> {
        self.index.get(name).map(|&i| BoneHandle(i))
    }

    fn rest_bone(&self, bone: BoneHandle) -> Option<RestBone> {
        self.bones.get(bone.0).map(|b| b.rest)
    }

    fn set_local_rotation(&mut self, bone: BoneHandle, rotation: Rotation) {
        if let Some(b) = self.bones.get_mut(bone.0) {
            b.pose_rotation = rotation;
        }
    }

    fn set_local_scale(&mut self, bone: BoneHandle, scale: f64) {
        if let Some(b) = self.bones.get_mut(bone.0) {
            b.pose_scale = scale;
        }
    }

    fn set_root_position(&mut self, position: Position) {
        self.root_position = position;
    }

    fn insert_keyframe(&mut self, bone: BoneHandle, channel: Channel, frame: i64) {
        let Some(b) = self.bones.get(bone.0) else {
            return;
        };
        let value = match channel {
            Channel::Rotation => KeyValue::Rotation(b.pose_rotation),
            Channel::Scale => KeyValue::Scale(b.pose_scale),
            Channel::Location => KeyValue::Location(self.root_position),
        };
        self.keyframes.push(KeyframeRecord { bone, frame, value });
    }
}
