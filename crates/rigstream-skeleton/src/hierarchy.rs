//! Joint hierarchy
//!
//! INVARIANT: joints are stored parent-before-child. A joint's parent must
//! be defined earlier in the list, which also rules out cycles.

use std::collections::HashMap;

use rigstream_core::{RigError, RigResult};

/// Joint definition as supplied by a layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JointDef {
    pub name: String,
    pub parent: Option<String>,
}

impl JointDef {
    pub fn root(name: impl Into<String>) -> Self {
        JointDef {
            name: name.into(),
            parent: None,
        }
    }

    pub fn child(name: impl Into<String>, parent: impl Into<String>) -> Self {
        JointDef {
            name: name.into(),
            parent: Some(parent.into()),
        }
    }
}

/// Resolved joint
#[derive(Debug, Clone)]
pub struct JointNode {
    pub name: String,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

/// Validated single-rooted joint tree
#[derive(Debug, Clone)]
pub struct Hierarchy {
    joints: Vec<JointNode>,
    index: HashMap<String, usize>,
}

impl Hierarchy {
    /// Build a hierarchy from definitions in parent-before-child order
    pub fn new(defs: Vec<JointDef>) -> RigResult<Self> {
        if defs.is_empty() {
            return Err(RigError::InvalidHierarchy("no joints".into()));
        }

        let mut joints: Vec<JointNode> = Vec::with_capacity(defs.len());
        let mut index: HashMap<String, usize> = HashMap::with_capacity(defs.len());
        let mut root_count = 0;

        for def in defs {
            if index.contains_key(&def.name) {
                return Err(RigError::InvalidHierarchy(format!(
                    "duplicate joint {:?}",
                    def.name
                )));
            }

            let parent = match &def.parent {
                None => {
                    root_count += 1;
                    None
                }
                Some(parent_name) => match index.get(parent_name) {
                    Some(&p) => Some(p),
                    None => {
                        return Err(RigError::InvalidHierarchy(format!(
                            "parent {:?} of {:?} is not defined before it",
                            parent_name, def.name
                        )))
                    }
                },
            };

            let idx = joints.len();
            if let Some(p) = parent {
                joints[p].children.push(idx);
            }
            index.insert(def.name.clone(), idx);
            joints.push(JointNode {
                name: def.name,
                parent,
                children: Vec::new(),
            });
        }

        if root_count != 1 {
            return Err(RigError::InvalidHierarchy(format!(
                "expected exactly one root, found {}",
                root_count
            )));
        }

        Ok(Hierarchy { joints, index })
    }

    /// Number of joints
    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    /// Index of the root joint (always 0)
    pub fn root(&self) -> usize {
        0
    }

    pub fn joint(&self, idx: usize) -> Option<&JointNode> {
        self.joints.get(idx)
    }

    pub fn parent(&self, idx: usize) -> Option<usize> {
        self.joints.get(idx).and_then(|j| j.parent)
    }

    /// Resolve a joint name to its index
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn name(&self, idx: usize) -> Option<&str> {
        self.joints.get(idx).map(|j| j.name.as_str())
    }

    /// Joints in parent-before-child order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &JointNode)> {
        self.joints.iter().enumerate()
    }
}
