//! Skeleton definition and joint hierarchy

use std::collections::{BTreeMap, HashSet};

use super::Transform;
use crate::smf::format::ROOT_PARENT_ID;
use crate::{CaptureError, Result};

/// Joint names used by the 27-bone mocopi rig.
const MOCOPI_JOINT_NAMES: [&str; 27] = [
    "root",
    "torso_1",
    "torso_2",
    "torso_3",
    "torso_4",
    "torso_5",
    "torso_6",
    "torso_7",
    "neck_1",
    "neck_2",
    "head",
    "l_shoulder",
    "l_up_arm",
    "l_low_arm",
    "l_hand",
    "r_shoulder",
    "r_up_arm",
    "r_low_arm",
    "r_hand",
    "l_up_leg",
    "l_low_leg",
    "l_foot",
    "l_toes",
    "r_up_leg",
    "r_low_leg",
    "r_foot",
    "r_toes",
];

/// Display name of a joint; unknown ids become `skel_<id>`.
pub fn joint_name(id: u16) -> String {
    MOCOPI_JOINT_NAMES
        .get(id as usize)
        .map(|name| (*name).to_string())
        .unwrap_or_else(|| format!("skel_{id}"))
}

/// One `bndt` entry of a skeleton definition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bone {
    pub id: u16,
    /// Parent bone id, [`ROOT_PARENT_ID`] for the root
    pub parent: u16,
    /// Rest pose relative to the parent
    pub rest: Transform,
}

impl Bone {
    pub fn new(id: u16, parent: u16, rest: Transform) -> Self {
        Self { id, parent, rest }
    }

    pub fn is_root(&self) -> bool {
        self.parent == ROOT_PARENT_ID
    }
}

/// A validated, fully connected bone tree.
///
/// Construction rejects duplicate ids, anything other than exactly one root,
/// and bones whose parent is missing. A dropped bone would silently shift every
/// positional joint index downstream, so orphans are errors.
#[derive(Debug, Clone, PartialEq)]
pub struct Skeleton {
    /// Bones in wire order
    bones: Vec<Bone>,
    /// Bones in depth-first order from the root, siblings by ascending id
    order: Vec<Bone>,
    /// Index into `order` of each bone's parent
    parents: Vec<Option<usize>>,
}

impl Skeleton {
    pub fn new(bones: Vec<Bone>) -> Result<Self> {
        if bones.is_empty() {
            return Err(CaptureError::invalid_skeleton("skeleton has no bones"));
        }

        let mut seen = HashSet::with_capacity(bones.len());
        for bone in &bones {
            if !seen.insert(bone.id) {
                return Err(CaptureError::invalid_skeleton(format!("duplicate bone id {}", bone.id)));
            }
            if bone.id == ROOT_PARENT_ID {
                return Err(CaptureError::invalid_skeleton("bone id 65535 is reserved for root parent"));
            }
        }

        let mut roots = bones.iter().filter(|b| b.is_root());
        let root = match (roots.next(), roots.next()) {
            (Some(root), None) => *root,
            (None, _) => return Err(CaptureError::invalid_skeleton("no root bone")),
            (Some(_), Some(_)) => return Err(CaptureError::invalid_skeleton("more than one root bone")),
        };

        if let Some(orphan) = bones.iter().find(|b| !b.is_root() && !seen.contains(&b.parent)) {
            return Err(CaptureError::OrphanBone { bone: orphan.id, parent: orphan.parent });
        }

        let mut children: BTreeMap<u16, Vec<Bone>> = BTreeMap::new();
        for bone in bones.iter().filter(|b| !b.is_root()) {
            children.entry(bone.parent).or_default().push(*bone);
        }
        for list in children.values_mut() {
            list.sort_by_key(|b| b.id);
        }

        let mut order = Vec::with_capacity(bones.len());
        let mut parents = Vec::with_capacity(bones.len());
        let mut stack = vec![(root, None)];
        while let Some((bone, parent)) = stack.pop() {
            let index = order.len();
            order.push(bone);
            parents.push(parent);
            if let Some(kids) = children.get(&bone.id) {
                stack.extend(kids.iter().rev().map(|kid| (*kid, Some(index))));
            }
        }

        // Every parent exists, so anything unreached sits on a cycle.
        if order.len() != bones.len() {
            return Err(CaptureError::invalid_skeleton(format!(
                "{} bones are not reachable from the root",
                bones.len() - order.len()
            )));
        }

        Ok(Self { bones, order, parents })
    }

    /// Bones in the order they were received.
    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    /// Bones in depth-first hierarchy order. Positional joint arrays use this order.
    pub fn joint_order(&self) -> &[Bone] {
        &self.order
    }

    pub fn root(&self) -> &Bone {
        &self.order[0]
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Position of the parent of the joint at `index` in [`Self::joint_order`].
    pub fn parent_index(&self, index: usize) -> Option<usize> {
        self.parents.get(index).copied().flatten()
    }

    /// Positions of the direct children of the joint at `index`.
    pub fn child_indices(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.parents
            .iter()
            .enumerate()
            .filter(move |(_, parent)| **parent == Some(index))
            .map(|(i, _)| i)
    }

    /// Slash-separated path of a joint, e.g. `/root/torso_1/torso_2`.
    pub fn joint_path(&self, index: usize) -> String {
        let mut segments = Vec::new();
        let mut current = Some(index);
        while let Some(i) = current {
            segments.push(joint_name(self.order[i].id));
            current = self.parent_index(i);
        }
        segments.iter().rev().fold(String::new(), |mut path, name| {
            path.push('/');
            path.push_str(name);
            path
        })
    }
}
