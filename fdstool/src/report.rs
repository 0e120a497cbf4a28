use std::fmt::Write as _;

use anyhow::{bail, Context, Result};
use fourds::frame::{Frame, FrameKind, Parent};
use fourds::types::NodeIndex;
use fourds::{decode_file, encode_file, Decoded, SceneGraph};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneSummary {
    pub timestamp: u64,
    pub animated: bool,
    pub materials: Vec<MaterialSummary>,
    pub frames: Vec<FrameSummary>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaterialSummary {
    pub id: usize,
    pub flags: u32,
    pub diffuse_texture: String,
    pub alpha_texture: Option<String>,
    pub environment_texture: Option<String>,
    pub opacity: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LodSummary {
    pub fade_distance: f32,
    pub vertices: usize,
    pub triangles: usize,
    pub face_groups: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameSummary {
    pub id: u16,
    pub name: String,
    pub kind: &'static str,
    pub visual: Option<String>,
    /// Frame id of the parent, 0 for the root.
    pub parent: u16,
    pub parent_is_bone: bool,
    pub position: [f32; 3],
    pub lods: Vec<LodSummary>,
    pub instance_of: Option<u16>,
    pub skin_bones: usize,
    pub morph_targets: usize,
    pub user_props: String,
}

impl SceneSummary {
    pub fn new(decoded: &Decoded) -> SceneSummary {
        let scene = &decoded.scene;
        SceneSummary {
            timestamp: scene.timestamp,
            animated: scene.is_animated(),
            materials: scene
                .materials
                .iter()
                .enumerate()
                .map(|(i, m)| MaterialSummary {
                    id: i + 1,
                    flags: m.flags.bits(),
                    diffuse_texture: m.diffuse_texture.clone(),
                    alpha_texture: m.alpha_texture.clone(),
                    environment_texture: m.environment.as_ref().map(|e| e.texture.clone()),
                    opacity: m.opacity,
                })
                .collect(),
            frames: scene
                .frames
                .iter()
                .enumerate()
                .map(|(i, frame)| summarize_frame(scene, NodeIndex::new(i), frame))
                .collect(),
            warnings: decoded.warnings.iter().map(|w| w.to_string()).collect(),
        }
    }

    /// Frame counts per kind, in first-seen order.
    pub fn kind_counts(&self) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> = vec![];
        for frame in &self.frames {
            let label = match &frame.visual {
                Some(visual) => format!("{}/{}", frame.kind, visual),
                None => frame.kind.to_owned(),
            };
            match counts.iter_mut().find(|(l, _)| *l == label) {
                Some((_, count)) => *count += 1,
                None => counts.push((label, 1)),
            }
        }
        counts
    }
}

fn summarize_frame(scene: &SceneGraph, node: NodeIndex, frame: &Frame) -> FrameSummary {
    let id_of = |node: NodeIndex| scene.frame_id_of(node).into_inner();
    let visual = frame.visual();
    let mesh = visual.and_then(|v| v.body.mesh());
    FrameSummary {
        id: id_of(node),
        name: frame.name.clone(),
        kind: frame.kind.frame_type().name(),
        visual: visual.map(|v| format!("{:?}", v.body.visual_type())),
        parent: frame.parent.node().map(id_of).unwrap_or(0),
        parent_is_bone: matches!(frame.parent, Parent::Bone(_)),
        position: frame.transform.position.into(),
        lods: mesh
            .map(|m| {
                m.lods
                    .iter()
                    .map(|lod| LodSummary {
                        fade_distance: lod.fade_distance,
                        vertices: lod.vertices.len(),
                        triangles: lod.triangle_count(),
                        face_groups: lod.face_groups.len(),
                    })
                    .collect()
            })
            .unwrap_or_default(),
        instance_of: mesh.and_then(|m| m.instance).map(id_of),
        skin_bones: visual
            .and_then(|v| v.body.skins().first())
            .map_or(0, |s| s.bones.len()),
        morph_targets: visual
            .and_then(|v| v.body.morph())
            .map_or(0, |m| m.target_count as usize),
        user_props: frame.user_props.clone(),
    }
}

fn frame_label(frame: &Frame) -> String {
    match &frame.kind {
        FrameKind::Visual(visual) => format!("{:?}", visual.body.visual_type()),
        other => other.frame_type().name().to_owned(),
    }
}

/// Indented outline of the frame hierarchy. Bone-parented frames are
/// marked with `@`.
pub fn render_tree(scene: &SceneGraph) -> String {
    fn walk(scene: &SceneGraph, node: NodeIndex, depth: usize, out: &mut String, seen: &mut Vec<bool>) {
        if std::mem::replace(&mut seen[node.into_inner()], true) {
            return;
        }
        let frame = &scene.frames[node.into_inner()];
        let marker = if matches!(frame.parent, Parent::Bone(_)) { "@" } else { "" };
        let _ = writeln!(
            out,
            "{}{}{} [{}]",
            "  ".repeat(depth),
            marker,
            frame.name,
            frame_label(frame)
        );
        for child in scene.children(Some(node)) {
            walk(scene, child, depth + 1, out, seen);
        }
    }

    let mut out = String::new();
    let mut seen = vec![false; scene.frames.len()];
    for root in scene.children(None) {
        walk(scene, root, 0, &mut out, &mut seen);
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoundTrip {
    pub frames: usize,
    pub warnings: usize,
    /// The re-encoded file is byte for byte the input.
    pub identical: bool,
}

/// Decodes, re-encodes and decodes again; fails unless the two decoded
/// scenes agree.
pub fn round_trip(bytes: &[u8]) -> Result<RoundTrip> {
    let first = decode_file(bytes).context("decoding the input")?;
    let encoded = encode_file(&first.scene).context("re-encoding the scene")?;
    let second = decode_file(&encoded).context("decoding the re-encoded scene")?;
    if second.scene != first.scene {
        bail!("the re-encoded scene differs from the input");
    }
    Ok(RoundTrip {
        frames: first.scene.frames.len(),
        warnings: first.warnings.len(),
        identical: encoded.as_slice() == bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fourds::frame::{Dummy, Joint};
    use fourds::types::{BoneId, BoxF, JointMatrix};

    fn scene() -> SceneGraph {
        let mut scene = SceneGraph::new();
        let root = scene.add_frame(Frame::new("root", FrameKind::Dummy(Dummy { bounds: BoxF::zero() })));
        let mut bone = Frame::new(
            "bone",
            FrameKind::Joint(Joint {
                matrix: JointMatrix { rows: [[0.0; 3]; 4] },
                bone_id: BoneId::new(0),
            }),
        );
        bone.parent = Parent::Frame(root);
        let bone = scene.add_frame(bone);
        let mut held = Frame::new("held", FrameKind::Dummy(Dummy { bounds: BoxF::zero() }));
        held.parent = Parent::Bone(bone);
        scene.add_frame(held);
        scene.add_frame(Frame::new("other", FrameKind::Dummy(Dummy { bounds: BoxF::zero() })));
        scene
    }

    #[test]
    fn tree_indents_children_and_marks_bones() {
        assert_eq!(
            render_tree(&scene()),
            "root [dummy]\n  bone [joint]\n    @held [dummy]\nother [dummy]\n"
        );
    }

    #[test]
    fn summary_uses_file_ids() {
        let bytes = encode_file(&scene()).unwrap();
        let decoded = decode_file(&bytes).unwrap();
        let summary = SceneSummary::new(&decoded);
        assert_eq!(summary.frames[2].parent, 2);
        assert!(summary.frames[2].parent_is_bone);
        assert_eq!(summary.frames[3].parent, 0);
        assert_eq!(
            summary.kind_counts(),
            vec![("dummy".to_owned(), 3), ("joint".to_owned(), 1)]
        );
    }

    #[test]
    fn round_trip_reports_identical_files() {
        let bytes = encode_file(&scene()).unwrap();
        let report = round_trip(&bytes).unwrap();
        assert_eq!(report.frames, 4);
        assert_eq!(report.warnings, 0);
        assert!(report.identical);
    }

    #[test]
    fn round_trip_fails_on_garbage() {
        assert!(round_trip(b"not a 4ds file").is_err());
    }
}
