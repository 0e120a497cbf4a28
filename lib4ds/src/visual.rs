use crate::error::*;
use crate::geometry::{Lod, SimpleMesh};
use crate::io::*;
use crate::morph::{read_morph, write_morph, Morph};
use crate::skin::SkinBinding;
use crate::types::*;
use bytes::{Buf, BufMut};
use fds_derive::{Readable, Writable};
use std::convert::TryFrom;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VisualType {
    Object = 0,
    LitObject = 1,
    SingleMesh = 2,
    SingleMorph = 3,
    Billboard = 4,
    Morph = 5,
    Lens = 6,
    Projector = 7,
    Mirror = 8,
    Emitor = 9,
    Shadow = 10,
    LandPatch = 11,
}

impl TryFrom<u8> for VisualType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => VisualType::Object,
            1 => VisualType::LitObject,
            2 => VisualType::SingleMesh,
            3 => VisualType::SingleMorph,
            4 => VisualType::Billboard,
            5 => VisualType::Morph,
            6 => VisualType::Lens,
            7 => VisualType::Projector,
            8 => VisualType::Mirror,
            9 => VisualType::Emitor,
            10 => VisualType::Shadow,
            11 => VisualType::LandPatch,
            _ => return Err(DecodeError::Format(format!("unknown visual type {}", value))),
        })
    }
}

impl VisualType {
    /// Subtypes whose body is only the common mesh.
    pub fn is_plain_mesh(&self) -> bool {
        matches!(
            self,
            VisualType::Lens
                | VisualType::Projector
                | VisualType::Emitor
                | VisualType::Shadow
                | VisualType::LandPatch
        )
    }
}

/// The geometry every mesh-based visual starts with. A mesh either owns its
/// LODs or reuses the LODs of another frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Mesh {
    pub instance: Option<NodeIndex>,
    pub lods: Vec<Lod>,
}

/// Rotation axis and mode, both 1-based as the engine numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Readable, Writable)]
pub struct Billboard {
    pub axis: u32,
    pub mode: u8,
}

#[derive(Debug, Clone, PartialEq, Readable, Writable)]
pub struct Mirror {
    pub bounds: BoxF,
    pub center: Point3F,
    pub radius: f32,
    pub matrix: MatrixF,
    pub color: ColorF,
    pub distance: f32,
    pub mesh: SimpleMesh,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VisualBody {
    Object(Mesh),
    LitObject(Mesh),
    /// One skin binding per LOD.
    SingleMesh {
        mesh: Mesh,
        skins: Vec<SkinBinding>,
    },
    SingleMorph {
        mesh: Mesh,
        skins: Vec<SkinBinding>,
        morph: Option<Morph>,
    },
    Billboard {
        mesh: Mesh,
        billboard: Billboard,
    },
    Morph {
        mesh: Mesh,
        morph: Option<Morph>,
    },
    Mirror(Mirror),
    /// Lens, projector, emitor, shadow and landpatch visuals.
    Other {
        kind: VisualType,
        mesh: Mesh,
    },
}

impl VisualBody {
    pub fn visual_type(&self) -> VisualType {
        match self {
            VisualBody::Object(_) => VisualType::Object,
            VisualBody::LitObject(_) => VisualType::LitObject,
            VisualBody::SingleMesh { .. } => VisualType::SingleMesh,
            VisualBody::SingleMorph { .. } => VisualType::SingleMorph,
            VisualBody::Billboard { .. } => VisualType::Billboard,
            VisualBody::Morph { .. } => VisualType::Morph,
            VisualBody::Mirror(_) => VisualType::Mirror,
            VisualBody::Other { kind, .. } => *kind,
        }
    }

    pub fn mesh(&self) -> Option<&Mesh> {
        match self {
            VisualBody::Object(mesh) | VisualBody::LitObject(mesh) => Some(mesh),
            VisualBody::SingleMesh { mesh, .. }
            | VisualBody::SingleMorph { mesh, .. }
            | VisualBody::Billboard { mesh, .. }
            | VisualBody::Morph { mesh, .. }
            | VisualBody::Other { mesh, .. } => Some(mesh),
            VisualBody::Mirror(_) => None,
        }
    }

    pub fn mesh_mut(&mut self) -> Option<&mut Mesh> {
        match self {
            VisualBody::Object(mesh) | VisualBody::LitObject(mesh) => Some(mesh),
            VisualBody::SingleMesh { mesh, .. }
            | VisualBody::SingleMorph { mesh, .. }
            | VisualBody::Billboard { mesh, .. }
            | VisualBody::Morph { mesh, .. }
            | VisualBody::Other { mesh, .. } => Some(mesh),
            VisualBody::Mirror(_) => None,
        }
    }

    pub fn skins(&self) -> &[SkinBinding] {
        match self {
            VisualBody::SingleMesh { skins, .. } | VisualBody::SingleMorph { skins, .. } => skins,
            _ => &[],
        }
    }

    pub fn morph(&self) -> Option<&Morph> {
        match self {
            VisualBody::SingleMorph { morph, .. } | VisualBody::Morph { morph, .. } => {
                morph.as_ref()
            }
            _ => None,
        }
    }
}

fn read_mesh(from: &mut dyn Buf, ctx: &mut Context) -> DecodeResult<Mesh> {
    let instance = FrameId::read(from, ctx)?;
    let lods = if instance.into_inner() > 0 {
        ctx.defer(ReferenceKind::Instance, instance);
        vec![]
    } else {
        read_vec::<u8, Lod>(from, ctx)?
    };
    ctx.lod_vertex_counts = lods.iter().map(|lod| lod.vertices.len()).collect();
    Ok(Mesh {
        instance: None,
        lods,
    })
}

fn write_mesh(mesh: &Mesh, node: NodeIndex, to: &mut dyn BufMut, ctx: &Context) -> EncodeResult<()> {
    match mesh.instance {
        Some(source) => {
            if !mesh.lods.is_empty() {
                return Err(EncodeError::Invalid(format!(
                    "frame {} is an instance but also has {} lods",
                    node,
                    mesh.lods.len()
                )));
            }
            ctx.frame_id(node, source)?.write(to, ctx)
        }
        None => {
            0u16.write(to, ctx)?;
            write_vec::<u8, Lod>(&mesh.lods, to, ctx, "mesh lods")
        }
    }
}

fn read_skins(from: &mut dyn Buf, ctx: &mut Context) -> DecodeResult<Vec<SkinBinding>> {
    let lod_vertex_counts = ctx.lod_vertex_counts.clone();
    let mut skins = Vec::with_capacity(lod_vertex_counts.len());
    for (lod, vertices) in lod_vertex_counts.into_iter().enumerate() {
        let skin = SkinBinding::read(from, ctx)?;
        let covered = skin.covered();
        if covered > vertices as u64 {
            let warning = Warning::SkinRange {
                frame: ctx.current,
                lod,
                covered,
                vertices,
            };
            ctx.warn(warning);
        }
        skins.push(skin);
    }
    Ok(skins)
}

fn write_skins(
    mesh: &Mesh,
    skins: &[SkinBinding],
    node: NodeIndex,
    to: &mut dyn BufMut,
    ctx: &Context,
) -> EncodeResult<()> {
    if skins.len() != mesh.lods.len() {
        return Err(EncodeError::Invalid(format!(
            "frame {} has {} lods but {} skin bindings",
            node,
            mesh.lods.len(),
            skins.len()
        )));
    }
    write_all(skins, to, ctx)
}

fn write_mesh_morph(
    mesh: &Mesh,
    morph: &Option<Morph>,
    node: NodeIndex,
    to: &mut dyn BufMut,
    ctx: &Context,
) -> EncodeResult<()> {
    // Readers drop morph lods past the mesh's own.
    if let Some(morph) = morph {
        if morph.lods.len() > mesh.lods.len() {
            return Err(EncodeError::Invalid(format!(
                "frame {} has {} lods but {} morph lods",
                node,
                mesh.lods.len(),
                morph.lods.len()
            )));
        }
    }
    write_morph(morph, to, ctx)
}

pub fn read_visual_body(
    from: &mut dyn Buf,
    ctx: &mut Context,
    kind: VisualType,
) -> DecodeResult<VisualBody> {
    if kind == VisualType::Mirror {
        return Ok(VisualBody::Mirror(Mirror::read(from, ctx)?));
    }

    let mesh = read_mesh(from, ctx)?;
    let lods = mesh.lods.len();
    Ok(match kind {
        VisualType::Object => VisualBody::Object(mesh),
        VisualType::LitObject => VisualBody::LitObject(mesh),
        VisualType::SingleMesh => {
            let skins = read_skins(from, ctx)?;
            VisualBody::SingleMesh { mesh, skins }
        }
        VisualType::SingleMorph => {
            let skins = read_skins(from, ctx)?;
            let morph = read_morph(from, ctx, lods)?;
            VisualBody::SingleMorph { mesh, skins, morph }
        }
        VisualType::Billboard => {
            let billboard = Billboard::read(from, ctx)?;
            VisualBody::Billboard { mesh, billboard }
        }
        VisualType::Morph => {
            let morph = read_morph(from, ctx, lods)?;
            VisualBody::Morph { mesh, morph }
        }
        _ => VisualBody::Other { kind, mesh },
    })
}

pub fn write_visual_body(
    body: &VisualBody,
    node: NodeIndex,
    to: &mut dyn BufMut,
    ctx: &Context,
) -> EncodeResult<()> {
    match body {
        VisualBody::Object(mesh) | VisualBody::LitObject(mesh) => write_mesh(mesh, node, to, ctx),
        VisualBody::SingleMesh { mesh, skins } => {
            write_mesh(mesh, node, to, ctx)?;
            write_skins(mesh, skins, node, to, ctx)
        }
        VisualBody::SingleMorph { mesh, skins, morph } => {
            write_mesh(mesh, node, to, ctx)?;
            write_skins(mesh, skins, node, to, ctx)?;
            write_mesh_morph(mesh, morph, node, to, ctx)
        }
        VisualBody::Billboard { mesh, billboard } => {
            write_mesh(mesh, node, to, ctx)?;
            billboard.write(to, ctx)
        }
        VisualBody::Morph { mesh, morph } => {
            write_mesh(mesh, node, to, ctx)?;
            write_mesh_morph(mesh, morph, node, to, ctx)
        }
        VisualBody::Mirror(mirror) => mirror.write(to, ctx),
        VisualBody::Other { kind, mesh } => {
            if !kind.is_plain_mesh() {
                return Err(EncodeError::Invalid(format!(
                    "frame {}: {:?} visuals need their own body",
                    node, kind
                )));
            }
            write_mesh(mesh, node, to, ctx)
        }
    }
}
