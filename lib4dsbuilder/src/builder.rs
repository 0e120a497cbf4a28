use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;

use crate::source::*;
use cgmath::InnerSpace;
use cgmath::SquareMatrix;
use fourds::coords::axis_swap_matrix;
use fourds::frame::*;
use fourds::geometry::*;
use fourds::io::count_of;
use fourds::material::*;
use fourds::morph::*;
use fourds::scene::SceneGraph;
use fourds::sector::*;
use fourds::skin::*;
use fourds::types::*;
use fourds::visual::*;
use fourds::EncodeError;
use itertools::Itertools;
use thiserror::Error;
use tracing::{debug, info, trace};

pub trait ProgressEventListener {
    fn progress(&mut self, current: u32, total: u32, status: String, finish_status: String);
}

/// Listener for callers that do not display progress.
pub struct SilentProgress;

impl ProgressEventListener for SilentProgress {
    fn progress(&mut self, _current: u32, _total: u32, _status: String, _finish_status: String) {}
}

pub type BuildResult<T> = Result<T, BuildError>;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("object name {0:?} is used more than once")]
    DuplicateName(String),
    #[error("object {object:?} has parent {parent:?}, which is not in the scene")]
    UnknownParent { object: String, parent: String },
    #[error("objects {0:?} are part of a parent cycle")]
    ParentCycle(Vec<String>),
    #[error("object {object:?} refers to {armature:?}, which is not an armature")]
    UnknownArmature { object: String, armature: String },
    #[error("object {object:?} refers to bone {bone:?}, which armature {armature:?} does not have")]
    UnknownBone {
        object: String,
        armature: String,
        bone: String,
    },
    #[error("bones {bones:?} of armature {armature:?} are part of a parent cycle")]
    BoneCycle { armature: String, bones: Vec<String> },
    #[error("object {object:?} uses material {material:?}, which is not defined")]
    UnknownMaterial { object: String, material: String },
    #[error("object {object:?} refers to {target:?}, which is not a written frame")]
    UnknownLink { object: String, target: String },
    #[error("the transform of {0:?} cannot be inverted")]
    Singular(String),
    #[error("shape key {key:?} of {object:?} has {found} positions, the mesh has {expected}")]
    ShapeKey {
        object: String,
        key: String,
        found: usize,
        expected: usize,
    },
    #[error("object {object:?}: {reason}")]
    Unsupported { object: String, reason: &'static str },
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildOptions {
    /// Steps per unit when merging corners into vertices.
    pub quantization: f32,
    pub thresholds: SkinThresholds,
    pub uppercase_textures: bool,
    /// Store `1 - v`; authoring tools put the UV origin at the bottom left.
    pub flip_v: bool,
    pub render_flags: RenderFlags,
    pub render_flags2: RenderFlags2,
    pub cull_flags: CullFlags,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            quantization: DEFAULT_QUANTIZATION,
            thresholds: SkinThresholds::default(),
            uppercase_textures: true,
            flip_v: true,
            render_flags: RenderFlags::default(),
            render_flags2: RenderFlags2::default(),
            cull_flags: CullFlags::default(),
        }
    }
}

enum Fixup<'a> {
    Links {
        node: NodeIndex,
        object: &'a str,
        names: &'a [String],
    },
    Instance {
        node: NodeIndex,
        object: &'a str,
        source: &'a str,
    },
}

/// Assembles a [`SceneGraph`] from a [`SourceScene`].
///
/// Objects are written depth first, roots and siblings sorted by name, so
/// every parent gets a lower frame id than its children. Objects named
/// `<base>_lod<N>` are folded into the mesh `<base>` as extra LODs instead
/// of becoming frames. Armatures are not written; their bones become joint
/// frames hanging from the armature's own parent.
pub struct SceneBuilder<'a> {
    source: &'a SourceScene,
    options: BuildOptions,
    by_name: HashMap<&'a str, usize>,
    lods: HashMap<usize, Vec<usize>>,
    lod_members: HashSet<usize>,
    scene: SceneGraph,
    worlds: Vec<MatrixF>,
    nodes: HashMap<&'a str, NodeIndex>,
    armatures: HashMap<&'a str, (Parent, MatrixF)>,
    joints: HashMap<(&'a str, &'a str), NodeIndex>,
    materials: HashMap<&'a str, MaterialId>,
    fixups: Vec<Fixup<'a>>,
}

impl<'a> SceneBuilder<'a> {
    pub fn new(source: &'a SourceScene, options: BuildOptions) -> SceneBuilder<'a> {
        SceneBuilder {
            source,
            options,
            by_name: HashMap::new(),
            lods: HashMap::new(),
            lod_members: HashSet::new(),
            scene: SceneGraph::new(),
            worlds: vec![],
            nodes: HashMap::new(),
            armatures: HashMap::new(),
            joints: HashMap::new(),
            materials: HashMap::new(),
            fixups: vec![],
        }
    }

    pub fn build(mut self, progress: &mut dyn ProgressEventListener) -> BuildResult<SceneGraph> {
        self.index_names()?;
        self.collect_lods();
        let order = self.hierarchy_order()?;
        info!(
            "building {} objects ({} folded into lods)",
            order.len(),
            self.lod_members.len()
        );

        let source = self.source;
        let total = order.len() as u32;
        for (i, index) in order.iter().enumerate() {
            let object = &source.objects[*index];
            progress.progress(
                i as u32 + 1,
                total,
                "Building frames".to_owned(),
                "Built frames".to_owned(),
            );
            self.emit(*index, object)?;
        }
        self.apply_fixups()?;

        debug!(
            "built {} frames and {} materials",
            self.scene.frames.len(),
            self.scene.materials.len()
        );
        Ok(self.scene)
    }

    fn index_names(&mut self) -> BuildResult<()> {
        for (index, object) in self.source.objects.iter().enumerate() {
            if self.by_name.insert(object.name.as_str(), index).is_some() {
                return Err(BuildError::DuplicateName(object.name.clone()));
            }
        }
        Ok(())
    }

    fn collect_lods(&mut self) {
        let mut chains: HashMap<usize, Vec<(u32, usize)>> = HashMap::new();
        for (index, object) in self.source.objects.iter().enumerate() {
            if object.mesh().is_none() {
                continue;
            }
            let (base, level) = match split_lod_name(&object.name) {
                Some(split) => split,
                None => continue,
            };
            let base = match self.by_name.get(base) {
                Some(base) if self.source.objects[*base].mesh().is_some() => *base,
                _ => continue,
            };
            chains.entry(base).or_default().push((level, index));
        }
        for (base, chain) in chains {
            let chain = chain
                .into_iter()
                .sorted()
                .map(|(_, index)| index)
                .collect::<Vec<_>>();
            self.lod_members.extend(chain.iter().copied());
            trace!(
                "{} has {} extra lods",
                self.source.objects[base].name,
                chain.len()
            );
            self.lods.insert(base, chain);
        }
    }

    fn hierarchy_order(&self) -> BuildResult<Vec<usize>> {
        let mut roots: Vec<usize> = vec![];
        let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
        for (index, object) in self.source.objects.iter().enumerate() {
            if self.lod_members.contains(&index) {
                continue;
            }
            match &object.parent {
                None => roots.push(index),
                Some(parent) => match self.by_name.get(parent.as_str()) {
                    Some(parent) if !self.lod_members.contains(parent) => {
                        children.entry(*parent).or_default().push(index)
                    }
                    _ => {
                        return Err(BuildError::UnknownParent {
                            object: object.name.clone(),
                            parent: parent.clone(),
                        })
                    }
                },
            }
        }

        let by_name = |list: &mut Vec<usize>| {
            list.sort_by(|a, b| {
                self.source.objects[*a]
                    .name
                    .cmp(&self.source.objects[*b].name)
            })
        };
        by_name(&mut roots);
        for list in children.values_mut() {
            by_name(list);
        }

        let mut order = vec![];
        let mut stack = roots.into_iter().rev().collect::<Vec<_>>();
        while let Some(index) = stack.pop() {
            order.push(index);
            if let Some(list) = children.get(&index) {
                stack.extend(list.iter().rev().copied());
            }
        }

        let expected = self.source.objects.len() - self.lod_members.len();
        if order.len() != expected {
            let seen = order.iter().copied().collect::<HashSet<_>>();
            let stuck = (0..self.source.objects.len())
                .filter(|i| !seen.contains(i) && !self.lod_members.contains(i))
                .map(|i| self.source.objects[i].name.clone())
                .collect();
            return Err(BuildError::ParentCycle(stuck));
        }
        Ok(order)
    }

    /// Frame parent of an object and that parent's world matrix.
    fn frame_parent(&self, object: &'a SourceObject) -> BuildResult<(Parent, MatrixF)> {
        let parent = match &object.parent {
            Some(parent) => parent.as_str(),
            None => return Ok((Parent::Root, MatrixF::identity())),
        };

        if let Some(bone) = &object.parent_bone {
            let node = self.joint(&object.name, parent, bone)?;
            return Ok((Parent::Bone(node), self.worlds[node.into_inner()]));
        }
        if let Some(armature) = self.armatures.get(parent) {
            return Ok(*armature);
        }
        match self.nodes.get(parent) {
            Some(node) => Ok((Parent::Frame(*node), self.worlds[node.into_inner()])),
            None => Err(BuildError::UnknownParent {
                object: object.name.clone(),
                parent: parent.to_owned(),
            }),
        }
    }

    fn joint(&self, object: &str, armature: &str, bone: &str) -> BuildResult<NodeIndex> {
        if !self.armatures.contains_key(armature) {
            return Err(BuildError::UnknownArmature {
                object: object.to_owned(),
                armature: armature.to_owned(),
            });
        }
        self.joints
            .get(&(armature, bone))
            .copied()
            .ok_or_else(|| BuildError::UnknownBone {
                object: object.to_owned(),
                armature: armature.to_owned(),
                bone: bone.to_owned(),
            })
    }

    fn push_frame(&mut self, mut frame: Frame, parent: Parent, parent_world: MatrixF, world: MatrixF, name: &str) -> BuildResult<NodeIndex> {
        let inverse = parent_world
            .invert()
            .ok_or_else(|| BuildError::Singular(name.to_owned()))?;
        frame.parent = parent;
        frame.transform = Transform::from_matrix(&(inverse * world));
        self.worlds.push(world);
        Ok(self.scene.add_frame(frame))
    }

    fn emit(&mut self, index: usize, object: &'a SourceObject) -> BuildResult<()> {
        let (parent, parent_world) = self.frame_parent(object)?;
        let world = MatrixF::from(object.world);

        let kind = match &object.data {
            ObjectData::Armature { bones } => {
                self.armatures
                    .insert(object.name.as_str(), (parent, parent_world));
                return self.emit_joints(object, bones, parent, parent_world, world);
            }
            ObjectData::Mesh(mesh) => FrameKind::Visual(self.visual(index, object, mesh)?),
            ObjectData::Dummy { min, max } => FrameKind::Dummy(Dummy {
                bounds: BoxF {
                    min: Point3F::from(*min),
                    max: Point3F::from(*max),
                },
            }),
            ObjectData::Target { .. } => FrameKind::Target(Target::default()),
            ObjectData::Sector(sector) => FrameKind::Sector(self.sector(object, sector)?),
            ObjectData::Occluder(mesh) => FrameKind::Occluder(Occluder {
                mesh: simple_mesh(mesh)?,
            }),
        };

        let mut frame = Frame::new(&object.name, kind);
        frame.cull_flags = object
            .cull_flags
            .map(CullFlags::from_bits_retain)
            .unwrap_or(self.options.cull_flags);
        frame.user_props = object.user_props.clone();
        let node = self.push_frame(frame, parent, parent_world, world, &object.name)?;
        self.nodes.insert(object.name.as_str(), node);

        match &object.data {
            ObjectData::Target { links } => self.fixups.push(Fixup::Links {
                node,
                object: &object.name,
                names: links,
            }),
            ObjectData::Mesh(SourceMesh {
                instance_of: Some(source),
                ..
            }) => self.fixups.push(Fixup::Instance {
                node,
                object: &object.name,
                source,
            }),
            _ => {}
        }
        Ok(())
    }

    fn emit_joints(
        &mut self,
        armature: &'a SourceObject,
        bones: &'a [SourceBone],
        parent: Parent,
        parent_world: MatrixF,
        armature_world: MatrixF,
    ) -> BuildResult<()> {
        let name = armature.name.as_str();
        let by_name = bones
            .iter()
            .enumerate()
            .map(|(i, bone)| (bone.name.as_str(), i))
            .collect::<HashMap<_, _>>();

        let mut roots = vec![];
        let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
        for (index, bone) in bones.iter().enumerate() {
            match &bone.parent {
                None => roots.push(index),
                Some(parent) => match by_name.get(parent.as_str()) {
                    Some(parent) => children.entry(*parent).or_default().push(index),
                    None => {
                        return Err(BuildError::UnknownBone {
                            object: bone.name.clone(),
                            armature: name.to_owned(),
                            bone: parent.clone(),
                        })
                    }
                },
            }
        }

        let mut visited = 0;
        let mut stack = roots.into_iter().rev().collect::<Vec<_>>();
        while let Some(index) = stack.pop() {
            visited += 1;
            let bone = &bones[index];
            let matrix_local = MatrixF::from(bone.matrix_local);
            let (joint_parent, joint_parent_world) = match &bone.parent {
                Some(parent) => {
                    let node = self.joint(&bone.name, name, parent)?;
                    (Parent::Bone(node), self.worlds[node.into_inner()])
                }
                None => (parent, parent_world),
            };

            let mut frame = Frame::new(
                &bone.name,
                FrameKind::Joint(Joint {
                    matrix: JointMatrix::from_matrix(&matrix_local),
                    bone_id: BoneId::new(index as u32),
                }),
            );
            frame.cull_flags = CullFlags::empty();
            let node = self.push_frame(
                frame,
                joint_parent,
                joint_parent_world,
                armature_world * matrix_local,
                &bone.name,
            )?;
            self.joints.insert((name, bone.name.as_str()), node);

            if let Some(list) = children.get(&index) {
                stack.extend(list.iter().rev().copied());
            }
        }

        if visited != bones.len() {
            let stuck = bones
                .iter()
                .filter(|b| !self.joints.contains_key(&(name, b.name.as_str())))
                .map(|b| b.name.clone())
                .collect();
            return Err(BuildError::BoneCycle {
                armature: name.to_owned(),
                bones: stuck,
            });
        }
        debug!("armature {}: {} joints", name, bones.len());
        Ok(())
    }

    fn material_id(&mut self, object: &str, name: &'a str) -> BuildResult<MaterialId> {
        if let Some(id) = self.materials.get(name) {
            return Ok(*id);
        }
        let source = self
            .source
            .materials
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| BuildError::UnknownMaterial {
                object: object.to_owned(),
                material: name.to_owned(),
            })?;
        let mut material = convert_material(source);
        if self.options.uppercase_textures {
            material.uppercase_textures();
        }
        self.scene.materials.push(material);
        let id = MaterialId::new(count_of::<u16>(self.scene.materials.len(), "materials")?);
        self.materials.insert(name, id);
        Ok(id)
    }

    fn source_triangles(&mut self, object: &str, mesh: &'a SourceMesh) -> BuildResult<Vec<SourceTriangle>> {
        let flip_v = self.options.flip_v;
        let mut triangles = Vec::with_capacity(mesh.faces.len());
        for face in &mesh.faces {
            let material = match mesh.material_slots.get(face.material_slot) {
                Some(Some(name)) => Some(self.material_id(object, name)?),
                _ => None,
            };
            let corner = |c: &SourceCorner| Corner {
                vertex: c.vertex,
                normal: Point3F::from(c.normal),
                uv: if flip_v {
                    Point2F::new(c.uv[0], 1.0 - c.uv[1])
                } else {
                    Point2F::from(c.uv)
                },
            };
            triangles.push(SourceTriangle {
                corners: [
                    corner(&face.corners[0]),
                    corner(&face.corners[1]),
                    corner(&face.corners[2]),
                ],
                material,
            });
        }
        Ok(triangles)
    }

    fn visual(&mut self, index: usize, object: &'a SourceObject, mesh: &'a SourceMesh) -> BuildResult<Visual> {
        let (render_flags, render_flags2) = match object.render_flags {
            Some([first, second]) => (
                RenderFlags::from_bits_retain(first),
                RenderFlags2::from_bits_retain(second),
            ),
            None => (self.options.render_flags, self.options.render_flags2),
        };
        let visual = |body| Visual {
            render_flags,
            render_flags2,
            body,
        };

        if mesh.instance_of.is_some() {
            if mesh.skin.is_some() || !mesh.shape_keys.is_empty() {
                return Err(BuildError::Unsupported {
                    object: object.name.clone(),
                    reason: "an instance cannot carry its own skin or shape keys",
                });
            }
            return Ok(visual(VisualBody::Object(Mesh {
                instance: None,
                lods: vec![],
            })));
        }

        let mut chain: Vec<&'a SourceMesh> = vec![mesh];
        if let Some(lods) = self.lods.get(&index) {
            chain.extend(lods.iter().filter_map(|i| self.source.objects[*i].mesh()));
        }

        let mut deduped = Vec::with_capacity(chain.len());
        for &lod_mesh in &chain {
            let positions = lod_mesh
                .positions
                .iter()
                .map(|p| Point3F::from(*p))
                .collect::<Vec<_>>();
            let triangles = self.source_triangles(&object.name, lod_mesh)?;
            let lod = LodBuilder::new(&positions)
                .with_quantization(self.options.quantization)
                .build(lod_mesh.fade_distance, &triangles)?;
            trace!(
                "{}: lod {} has {} vertices from {} source vertices",
                object.name,
                deduped.len(),
                lod.lod.vertices.len(),
                positions.len()
            );
            deduped.push(lod);
        }

        if let Some(billboard) = &mesh.billboard {
            if mesh.skin.is_some() || !mesh.shape_keys.is_empty() {
                return Err(BuildError::Unsupported {
                    object: object.name.clone(),
                    reason: "a billboard cannot be skinned or morphed",
                });
            }
            return Ok(visual(VisualBody::Billboard {
                mesh: into_mesh(deduped),
                billboard: Billboard {
                    axis: billboard.axis,
                    mode: billboard.mode,
                },
            }));
        }

        let skins = match &mesh.skin {
            Some(skin) => Some(self.skins(object, skin, &chain, &mut deduped)?),
            None => None,
        };
        let morph = build_morph(object, mesh, &chain, &deduped)?;
        let lods = into_mesh(deduped);

        Ok(visual(match (skins, morph) {
            (Some(skins), None) => VisualBody::SingleMesh { mesh: lods, skins },
            (Some(skins), Some(morph)) => VisualBody::SingleMorph {
                mesh: lods,
                skins,
                morph: Some(morph),
            },
            (None, Some(morph)) => VisualBody::Morph {
                mesh: lods,
                morph: Some(morph),
            },
            (None, None) => VisualBody::Object(lods),
        }))
    }

    fn skins(
        &self,
        object: &SourceObject,
        skin: &SourceSkin,
        chain: &[&SourceMesh],
        deduped: &mut [DedupedLod],
    ) -> BuildResult<Vec<SkinBinding>> {
        let bones = match self
            .by_name
            .get(skin.armature.as_str())
            .map(|i| &self.source.objects[*i].data)
        {
            Some(ObjectData::Armature { bones }) => bones,
            _ => {
                return Err(BuildError::UnknownArmature {
                    object: object.name.clone(),
                    armature: skin.armature.clone(),
                })
            }
        };

        let swap = axis_swap_matrix();
        let mut inverse_binds = Vec::with_capacity(bones.len());
        for bone in bones {
            let bind = MatrixF::from(bone.matrix_local) * swap;
            inverse_binds.push(
                bind.invert()
                    .ok_or_else(|| BuildError::Singular(bone.name.clone()))?,
            );
        }

        let mut skins = Vec::with_capacity(deduped.len());
        for (lod, (source, built)) in chain.iter().zip(deduped.iter_mut()).enumerate() {
            // Every lod object carries its own vertex groups.
            let groups = match &source.skin {
                Some(lod_skin) => lod_skin.groups.as_slice(),
                None => &[][..],
            };
            for group in groups {
                if !bones.iter().any(|b| b.name == group.bone) {
                    debug!(
                        "{}: vertex group {:?} names no bone of {}, ignored",
                        object.name, group.bone, skin.armature
                    );
                }
            }
            let weights = bones
                .iter()
                .zip(inverse_binds.iter())
                .enumerate()
                .map(|(i, (bone, inverse_bind))| BoneWeights {
                    bone_id: BoneId::new(i as u32),
                    inverse_bind: *inverse_bind,
                    weights: groups
                        .iter()
                        .filter(|g| g.bone == bone.name)
                        .flat_map(|g| g.weights.iter().copied())
                        .collect(),
                })
                .collect::<Vec<_>>();

            let binding = SkinBinding::build(
                &mut built.lod,
                &mut built.vertex_map,
                &weights,
                &self.options.thresholds,
            )?;
            trace!(
                "{}: lod {} skin covers {} of {} vertices",
                object.name,
                lod,
                binding.covered(),
                built.lod.vertices.len()
            );
            skins.push(binding);
        }
        Ok(skins)
    }

    fn sector(&self, object: &SourceObject, source: &SourceSector) -> BuildResult<Sector> {
        let mut sector = Sector::new(simple_mesh(&source.mesh)?);
        if let Some([flags1, flags2]) = source.flags {
            sector.flags1 = flags1;
            sector.flags2 = flags2;
        }
        for portal in &source.portals {
            let mut built = Portal::new(portal.vertices.iter().map(|v| Point3F::from(*v)).collect());
            if let Some(flags) = portal.flags {
                built.flags = PortalFlags::from_bits_retain(flags);
            }
            built.near = portal.near.unwrap_or(built.near);
            built.far = portal.far.unwrap_or(built.far);
            sector.portals.push(built);
        }
        trace!("sector {}: {} portals", object.name, sector.portals.len());
        Ok(sector)
    }

    fn resolve_name(&self, object: &str, target: &str) -> BuildResult<NodeIndex> {
        self.nodes
            .get(target)
            .copied()
            .ok_or_else(|| BuildError::UnknownLink {
                object: object.to_owned(),
                target: target.to_owned(),
            })
    }

    fn apply_fixups(&mut self) -> BuildResult<()> {
        let fixups = std::mem::take(&mut self.fixups);
        for fixup in fixups {
            match fixup {
                Fixup::Links {
                    node,
                    object,
                    names,
                } => {
                    let links = names
                        .iter()
                        .map(|name| self.resolve_name(object, name))
                        .collect::<BuildResult<Vec<_>>>()?;
                    if let FrameKind::Target(target) = &mut self.scene.frames[node.into_inner()].kind {
                        target.links = links;
                    }
                }
                Fixup::Instance {
                    node,
                    object,
                    source,
                } => {
                    let source_node = self.resolve_name(object, source)?;
                    let has_geometry = self
                        .scene
                        .frame(source_node)
                        .and_then(|f| f.visual())
                        .and_then(|v| v.body.mesh())
                        .map_or(false, |m| m.instance.is_none());
                    if !has_geometry {
                        return Err(BuildError::UnknownLink {
                            object: object.to_owned(),
                            target: source.to_owned(),
                        });
                    }
                    if let FrameKind::Visual(visual) = &mut self.scene.frames[node.into_inner()].kind {
                        if let Some(mesh) = visual.body.mesh_mut() {
                            mesh.instance = Some(source_node);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Splits `name_lod3` into `("name", 3)`. Level 0 is the base itself.
fn split_lod_name(name: &str) -> Option<(&str, u32)> {
    let (base, level) = name.rsplit_once("_lod")?;
    if base.is_empty() || level.is_empty() || !level.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match level.parse::<u32>() {
        Ok(0) | Err(_) => None,
        Ok(level) => Some((base, level)),
    }
}

fn into_mesh(deduped: Vec<DedupedLod>) -> Mesh {
    Mesh {
        instance: None,
        lods: deduped.into_iter().map(|d| d.lod).collect(),
    }
}

fn simple_mesh(source: &SourcePolyMesh) -> BuildResult<SimpleMesh> {
    if source.positions.len() > u16::MAX as usize + 1 {
        return Err(EncodeError::Capacity {
            what: "simple mesh vertices",
            count: source.positions.len(),
            limit: u16::MAX as usize + 1,
        }
        .into());
    }
    let faces = source
        .triangles
        .iter()
        .map(|t| {
            match t.iter().find(|i| **i as usize >= source.positions.len()) {
                Some(bad) => Err(EncodeError::Invalid(format!(
                    "triangle refers to vertex {} but the mesh has {}",
                    bad,
                    source.positions.len()
                ))),
                None => Ok(Triangle([t[0] as u16, t[1] as u16, t[2] as u16])),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(SimpleMesh {
        vertices: source.positions.iter().map(|p| Point3F::from(*p)).collect(),
        faces,
    })
}

fn color(rgb: Vec3) -> ColorF {
    ColorF {
        r: rgb[0],
        g: rgb[1],
        b: rgb[2],
    }
}

pub fn convert_material(source: &SourceMaterial) -> Material {
    let mut material = Material::new();
    if let Some(bits) = source.flags {
        material.flags = MaterialFlags::from_bits_retain(bits);
    }
    material.ambient = color(source.ambient);
    material.diffuse = color(source.diffuse);
    material.emission = color(source.emission);
    material.opacity = source.opacity;
    material.diffuse_texture = source.diffuse_texture.clone();
    material
        .flags
        .set(MaterialFlags::DIFFUSE_TEX, !source.diffuse_texture.is_empty());
    material.set_environment(source.environment_texture.as_ref().map(|texture| {
        EnvironmentMap {
            intensity: source.environment_intensity,
            texture: texture.clone(),
        }
    }));
    material.set_alpha_texture(source.alpha_texture.clone());
    material.set_animation(source.animation.map(|a| TextureAnimation {
        frame_count: a.frame_count,
        period: a.period,
        ..Default::default()
    }));
    material
}

/// Morph targets from shape keys named `Target_<t>_LOD<l>_Channel<c>`.
/// Key positions index the source vertices of the mesh used for LOD `l`.
/// Channels are dense: every LOD vertex is listed, untouched vertices at
/// their rest position. Channels without any key stay empty.
fn build_morph(
    object: &SourceObject,
    base: &SourceMesh,
    chain: &[&SourceMesh],
    deduped: &[DedupedLod],
) -> BuildResult<Option<Morph>> {
    let mut keys: BTreeMap<MorphKey, &SourceShapeKey> = BTreeMap::new();
    for shape_key in &base.shape_keys {
        match shape_key.name.parse::<MorphKey>() {
            Ok(key) if key.lod < deduped.len() => {
                let expected = chain[key.lod].positions.len();
                if shape_key.positions.len() != expected {
                    return Err(BuildError::ShapeKey {
                        object: object.name.clone(),
                        key: shape_key.name.clone(),
                        found: shape_key.positions.len(),
                        expected,
                    });
                }
                keys.insert(key, shape_key);
            }
            Ok(key) => debug!(
                "{}: shape key {} is for lod {} but the mesh has {}",
                object.name,
                shape_key.name,
                key.lod,
                deduped.len()
            ),
            Err(_) => trace!("{}: shape key {:?} ignored", object.name, shape_key.name),
        }
    }
    if keys.is_empty() {
        return Ok(None);
    }

    let target_count = keys.keys().map(|k| k.target).max().unwrap_or(0) + 1;
    let channel_count = keys.keys().map(|k| k.channel).max().unwrap_or(0) + 1;
    let target_count = count_of::<u8>(target_count, "morph targets")?;
    let channel_count = count_of::<u8>(channel_count, "morph channels")?;

    let mut lods = Vec::with_capacity(deduped.len());
    for (lod, built) in deduped.iter().enumerate() {
        let mut owners = vec![0usize; built.lod.vertices.len()];
        for source in 0..built.vertex_map.len() {
            for index in built.vertex_map.expansions(source) {
                owners[*index as usize] = source;
            }
        }

        let channels = (0..channel_count as usize)
            .map(|channel| {
                let in_channel = (0..target_count as usize)
                    .map(|target| {
                        keys.get(&MorphKey {
                            target,
                            lod,
                            channel,
                        })
                    })
                    .collect::<Vec<_>>();
                if in_channel.iter().all(|k| k.is_none()) {
                    return MorphChannel::default();
                }
                let vertices = built
                    .lod
                    .vertices
                    .iter()
                    .zip(owners.iter())
                    .map(|(vertex, owner)| {
                        in_channel
                            .iter()
                            .map(|key| MorphPoint {
                                position: key
                                    .map(|k| Point3F::from(k.positions[*owner]))
                                    .unwrap_or(vertex.position),
                                normal: vertex.normal,
                            })
                            .collect()
                    })
                    .collect();
                MorphChannel {
                    vertices,
                    indices: None,
                }
            })
            .collect();

        let bounds = built.lod.bounds();
        lods.push(MorphLod {
            channels,
            bounds,
            center: bounds.center(),
            radius: bounds.extent().magnitude(),
        });
    }

    debug!(
        "{}: morph with {} targets over {} channels",
        object.name, target_count, channel_count
    );
    Ok(Some(Morph {
        target_count,
        channel_count,
        lods,
    }))
}
