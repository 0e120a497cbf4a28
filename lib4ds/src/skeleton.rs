//! Bone lookups and bind-pose composition over a scene graph.
//!
//! Three numbering schemes meet here: frame ids (file order), file bone ids
//! (stored on joints and skin bones) and skin bone indices (position inside
//! one skin binding). Each lookup is an explicit table.

use crate::error::*;
use crate::frame::{FrameKind, Parent};
use crate::scene::SceneGraph;
use crate::skin::SkinBinding;
use crate::types::*;
use cgmath::SquareMatrix;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct SkeletonBone {
    pub node: NodeIndex,
    pub bone_id: BoneId,
    /// Position of the parent bone in [`Skeleton::bones`]; `None` for bones
    /// hanging off the synthetic root.
    pub parent: Option<usize>,
    pub world: MatrixF,
}

/// The joints under one frame, in frame order.
#[derive(Debug, Clone, PartialEq)]
pub struct Skeleton {
    pub owner: NodeIndex,
    pub bones: Vec<SkeletonBone>,
}

/// World matrices of every joint in a scene.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoneWorlds {
    pub matrices: HashMap<NodeIndex, MatrixF>,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoneTables {
    pub frame_nodes: HashMap<FrameId, NodeIndex>,
    pub bone_nodes: HashMap<BoneId, NodeIndex>,
    /// Per skin binding of the owner: skin bone index -> file bone id.
    pub skin_bones: Vec<Vec<BoneId>>,
}

impl Skeleton {
    pub fn bone(&self, bone_id: BoneId) -> Option<&SkeletonBone> {
        self.bones.iter().find(|b| b.bone_id == bone_id)
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }
}

impl BoneTables {
    /// Joint driving bone `index` of skin binding `skin`.
    pub fn skin_bone_node(&self, skin: usize, index: SkinBoneIndex) -> Option<NodeIndex> {
        let bone_id = self.skin_bones.get(skin)?.get(index.into_inner())?;
        self.bone_nodes.get(bone_id).copied()
    }
}

impl SceneGraph {
    /// Frame id each node had in the file it was read from (arena order).
    pub fn frame_id_of(&self, node: NodeIndex) -> FrameId {
        FrameId::new((node.into_inner() + 1) as u16)
    }

    /// Composes bone world matrices (parent world * local TRS) for every
    /// joint, in frame order. Joints whose parent is not a joint hang off an
    /// identity root. A parent joint that comes later in the file cannot
    /// have been composed yet; such joints are anchored to the root and
    /// reported.
    pub fn bone_world_matrices(&self) -> BoneWorlds {
        let mut worlds = BoneWorlds::default();
        for (index, frame) in self.frames.iter().enumerate() {
            if !frame.is_joint() {
                continue;
            }
            let node = NodeIndex::new(index);
            let local = frame.transform.matrix();
            let parent_world = match frame.parent {
                Parent::Bone(parent) if parent < node => worlds.matrices.get(&parent).copied(),
                Parent::Bone(parent) => {
                    worlds.warnings.push(Warning::Reference {
                        frame: self.frame_id_of(node),
                        kind: ReferenceKind::Parent,
                        target: self.frame_id_of(parent).into_inner() as u32,
                        action: "parent joint comes later, anchored to the root bone",
                    });
                    None
                }
                _ => None,
            };
            let world = parent_world.unwrap_or_else(MatrixF::identity) * local;
            worlds.matrices.insert(node, world);
        }
        worlds
    }

    /// The joints whose chain of joint parents ends at `owner`.
    pub fn skeleton(&self, owner: NodeIndex) -> Skeleton {
        let worlds = self.bone_world_matrices();
        let mut bones: Vec<SkeletonBone> = vec![];
        let mut positions: HashMap<NodeIndex, usize> = HashMap::new();

        for (index, frame) in self.frames.iter().enumerate() {
            let joint = match &frame.kind {
                FrameKind::Joint(joint) => joint,
                _ => continue,
            };
            let node = NodeIndex::new(index);
            let parent = match frame.parent {
                Parent::Bone(parent) => match positions.get(&parent) {
                    Some(position) => Some(*position),
                    None => continue,
                },
                Parent::Frame(parent) if parent == owner => None,
                _ => continue,
            };
            positions.insert(node, bones.len());
            bones.push(SkeletonBone {
                node,
                bone_id: joint.bone_id,
                parent,
                world: worlds
                    .matrices
                    .get(&node)
                    .copied()
                    .unwrap_or_else(MatrixF::identity),
            });
        }

        Skeleton { owner, bones }
    }

    /// Skeleton deforming a skinned mesh: the joints under the mesh itself,
    /// or under its nearest ancestor that has any.
    pub fn skeleton_for(&self, mesh: NodeIndex) -> Skeleton {
        let mut current = Some(mesh);
        let mut steps = 0;
        while let Some(node) = current {
            let skeleton = self.skeleton(node);
            if !skeleton.is_empty() || steps > self.frames.len() {
                return skeleton;
            }
            current = self
                .frames
                .get(node.into_inner())
                .and_then(|f| match f.parent {
                    Parent::Frame(parent) => Some(parent),
                    _ => None,
                });
            steps += 1;
        }
        self.skeleton(mesh)
    }

    pub fn bone_tables(&self, mesh: NodeIndex) -> BoneTables {
        let skeleton = self.skeleton_for(mesh);
        let frame_nodes = (0..self.frames.len())
            .map(|i| (self.frame_id_of(NodeIndex::new(i)), NodeIndex::new(i)))
            .collect();
        let bone_nodes = skeleton
            .bones
            .iter()
            .map(|b| (b.bone_id, b.node))
            .collect();
        let skin_bones = self
            .frames
            .get(mesh.into_inner())
            .and_then(|f| f.visual())
            .map(|v| {
                v.body
                    .skins()
                    .iter()
                    .map(|skin: &SkinBinding| skin.bones.iter().map(|b| b.bone_id).collect())
                    .collect()
            })
            .unwrap_or_default();
        BoneTables {
            frame_nodes,
            bone_nodes,
            skin_bones,
        }
    }

    /// Warnings for skin bones that name no joint of their skeleton.
    pub fn check_skin_bones(&self) -> Vec<Warning> {
        let mut warnings = vec![];
        for (index, frame) in self.frames.iter().enumerate() {
            let skins = match frame.visual() {
                Some(visual) if !visual.body.skins().is_empty() => visual.body.skins(),
                _ => continue,
            };
            let node = NodeIndex::new(index);
            let tables = self.bone_tables(node);
            for (skin_index, skin) in skins.iter().enumerate() {
                for (bone, skin_bone) in skin.bones.iter().enumerate() {
                    if tables
                        .skin_bone_node(skin_index, SkinBoneIndex::new(bone))
                        .is_none()
                    {
                        let warning = Warning::Reference {
                            frame: self.frame_id_of(node),
                            kind: ReferenceKind::SkinBone,
                            target: skin_bone.bone_id.into_inner(),
                            action: ReferenceKind::SkinBone.fallback(),
                        };
                        if !warnings.contains(&warning) {
                            warnings.push(warning);
                        }
                    }
                }
            }
        }
        warnings
    }
}
