//! Skeleton model - reference pose cache for one actor
//!
//! Reference rotations are world (rig-space) orientations accumulated down
//! the hierarchy at capture time. From them the per-joint rest-to-parent
//! transform `T[J] = ref[J]⁻¹ ∘ ref[parent(J)]` is precomputed, so the
//! per-frame work is a single quaternion product per joint.

use rigstream_core::{RigError, RigResult, Rotation};

use crate::{BoneHandle, Hierarchy, Rig};

/// Cached rest reference of one joint
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointReference {
    /// Rest orientation relative to the world
    pub rotation: Rotation,
    /// Rest bone length
    pub length: f64,
}

impl Default for JointReference {
    fn default() -> Self {
        JointReference {
            rotation: Rotation::identity(),
            length: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
struct JointSlot {
    /// Bound rig bone; `None` when the rig is coarser than the source
    bone: Option<BoneHandle>,
    reference: JointReference,
    rest_to_parent: Rotation,
}

impl Default for JointSlot {
    fn default() -> Self {
        JointSlot {
            bone: None,
            reference: JointReference::default(),
            rest_to_parent: Rotation::identity(),
        }
    }
}

/// Skeleton of one tracked actor bound to a target rig
#[derive(Debug, Clone)]
pub struct Skeleton {
    name: String,
    /// Prefix prepended to joint names to find rig bones
    prefix: String,
    hierarchy: Hierarchy,
    slots: Vec<JointSlot>,
    captured: bool,
    /// Apply bone-length rescaling
    pub enable_scale: bool,
}

impl Skeleton {
    pub fn new(name: impl Into<String>, hierarchy: Hierarchy, prefix: impl Into<String>) -> Self {
        let slots = vec![JointSlot::default(); hierarchy.len()];
        Skeleton {
            name: name.into(),
            prefix: prefix.into(),
            hierarchy,
            slots,
            captured: false,
            enable_scale: false,
        }
    }

    pub fn with_scale(mut self, enable_scale: bool) -> Self {
        self.enable_scale = enable_scale;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    /// Number of source joints
    pub fn joint_count(&self) -> usize {
        self.hierarchy.len()
    }

    pub fn joint_index(&self, name: &str) -> Option<usize> {
        self.hierarchy.index_of(name)
    }

    pub fn is_captured(&self) -> bool {
        self.captured
    }

    /// Rig bone bound to a joint, if the rig has one
    pub fn bone(&self, idx: usize) -> Option<BoneHandle> {
        self.slots.get(idx).and_then(|s| s.bone)
    }

    pub fn reference(&self, idx: usize) -> Option<&JointReference> {
        self.slots.get(idx).map(|s| &s.reference)
    }

    /// Reference of a joint's parent; the root's parent is the world
    pub fn parent_reference(&self, idx: usize) -> JointReference {
        self.hierarchy
            .parent(idx)
            .and_then(|p| self.reference(p).copied())
            .unwrap_or_default()
    }

    /// Precomputed `ref[J]⁻¹ ∘ ref[parent(J)]`
    pub fn rest_to_parent(&self, idx: usize) -> Option<Rotation> {
        self.slots.get(idx).map(|s| s.rest_to_parent)
    }

    /// Number of joints bound to a rig bone
    pub fn bound_joint_count(&self) -> usize {
        self.slots.iter().filter(|s| s.bone.is_some()).count()
    }

    /// Capture the rig's rest pose.
    ///
    /// Walks the hierarchy parent-before-child. A joint present in the rig
    /// records `ref[parent] ∘ rest_local` and its bone length; a joint the
    /// rig lacks inherits its parent's reference verbatim. The rig must
    /// have the root joint.
    pub fn save_pose<R: Rig + ?Sized>(&mut self, rig: &R) -> RigResult<()> {
        let mut slots: Vec<JointSlot> = Vec::with_capacity(self.hierarchy.len());

        for (idx, joint) in self.hierarchy.iter() {
            let parent_reference = joint
                .parent
                .map(|p| slots[p].reference)
                .unwrap_or_default();

            let bone_name = format!("{}{}", self.prefix, joint.name);
            let bound = rig
                .resolve_bone(&bone_name)
                .and_then(|bone| rig.rest_bone(bone).map(|rest| (bone, rest)));

            let slot = match bound {
                Some((bone, rest)) => {
                    let length = if rest.length.is_finite() && rest.length > 0.0 {
                        rest.length
                    } else {
                        tracing::warn!(
                            "Bone {} of {} has unusable length {}, using 1.0",
                            bone_name,
                            rig.name(),
                            rest.length
                        );
                        1.0
                    };
                    JointSlot {
                        bone: Some(bone),
                        reference: JointReference {
                            rotation: parent_reference.rotation * rest.local_rotation,
                            length,
                        },
                        rest_to_parent: Rotation::identity(),
                    }
                }
                None if idx == self.hierarchy.root() => {
                    return Err(RigError::Initialization(format!(
                        "rig {} has no root joint {}",
                        rig.name(),
                        bone_name
                    )));
                }
                None => {
                    tracing::debug!(
                        "Rig {} has no bone {}, inheriting parent reference",
                        rig.name(),
                        bone_name
                    );
                    JointSlot {
                        bone: None,
                        reference: parent_reference,
                        rest_to_parent: Rotation::identity(),
                    }
                }
            };
            slots.push(slot);
        }

        for (idx, joint) in self.hierarchy.iter() {
            let parent_rotation = joint
                .parent
                .map(|p| slots[p].reference.rotation)
                .unwrap_or_else(Rotation::identity);
            slots[idx].rest_to_parent = slots[idx].reference.rotation.inverse() * parent_rotation;
        }

        self.slots = slots;
        self.captured = true;
        tracing::debug!(
            "Captured rest pose of {} ({}/{} joints bound)",
            self.name,
            self.bound_joint_count(),
            self.joint_count()
        );
        Ok(())
    }

    /// Set every bound joint back to identity rotation and unit scale
    pub fn reset_pose<R: Rig + ?Sized>(&self, rig: &mut R) {
        for slot in &self.slots {
            if let Some(bone) = slot.bone {
                rig.set_local_rotation(bone, Rotation::identity());
                rig.set_local_scale(bone, 1.0);
            }
        }
    }
}
