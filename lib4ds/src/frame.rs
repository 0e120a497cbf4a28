use crate::error::*;
use crate::geometry::SimpleMesh;
use crate::io::*;
use crate::sector::Sector;
use crate::types::*;
use crate::visual::*;
use bytes::{Buf, BufMut};
use fds_derive::{Readable, Writable};
use std::convert::TryFrom;

bitflags! {
    /// Culling and collision switches of a frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CullFlags: u8 {
        const VISIBLE = 1 << 0;
        const COLLIDE_PLAYER = 1 << 1;
        const COLLIDE_AI = 1 << 2;
        const COLLIDE_VEHICLE = 1 << 3;
        const COLLIDE_CAMERA = 1 << 4;
        const COLLIDE_PROJECTILE = 1 << 5;
        const COLLIDE_ITEM = 1 << 6;
        const LIGHT_INTERACTION = 1 << 7;

        const _ = !0;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RenderFlags: u8 {
        const CAST_SHADOW = 1 << 0;
        const RECEIVE_SHADOW = 1 << 1;
        const DRAW_LAST = 1 << 2;
        const Z_BIAS = 1 << 3;
        const ACTIVE = 1 << 7;

        const _ = !0;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RenderFlags2: u8 {
        const DECAL = 1 << 0;
        const SHADOW_VOLUME = 1 << 1;
        const MIRRORABLE = 1 << 2;
        const RECEIVES_PROJECTION = 1 << 5;
        const NO_FOG = 1 << 7;

        const _ = !0;
    }
}

flags_codec!(CullFlags, u8);
flags_codec!(RenderFlags, u8);
flags_codec!(RenderFlags2, u8);

impl Default for CullFlags {
    fn default() -> Self {
        CullFlags::LIGHT_INTERACTION
    }
}

impl Default for RenderFlags {
    fn default() -> Self {
        RenderFlags::ACTIVE
    }
}

impl Default for RenderFlags2 {
    fn default() -> Self {
        RenderFlags2::from_bits_retain(42)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Visual = 1,
    Light = 2,
    Camera = 3,
    Sound = 4,
    Sector = 5,
    Dummy = 6,
    Target = 7,
    User = 8,
    Model = 9,
    Joint = 10,
    Volume = 11,
    Occluder = 12,
    Scene = 13,
    Area = 14,
    Landscape = 15,
}

impl TryFrom<u8> for FrameType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => FrameType::Visual,
            2 => FrameType::Light,
            3 => FrameType::Camera,
            4 => FrameType::Sound,
            5 => FrameType::Sector,
            6 => FrameType::Dummy,
            7 => FrameType::Target,
            8 => FrameType::User,
            9 => FrameType::Model,
            10 => FrameType::Joint,
            11 => FrameType::Volume,
            12 => FrameType::Occluder,
            13 => FrameType::Scene,
            14 => FrameType::Area,
            15 => FrameType::Landscape,
            _ => return Err(DecodeError::Format(format!("unknown frame type {}", value))),
        })
    }
}

impl FrameType {
    pub fn name(&self) -> &'static str {
        match self {
            FrameType::Visual => "visual",
            FrameType::Light => "light",
            FrameType::Camera => "camera",
            FrameType::Sound => "sound",
            FrameType::Sector => "sector",
            FrameType::Dummy => "dummy",
            FrameType::Target => "target",
            FrameType::User => "user",
            FrameType::Model => "model",
            FrameType::Joint => "joint",
            FrameType::Volume => "volume",
            FrameType::Occluder => "occluder",
            FrameType::Scene => "scene",
            FrameType::Area => "area",
            FrameType::Landscape => "landscape",
        }
    }

    /// Whether the body layout of this frame type is known.
    pub fn is_supported(&self) -> bool {
        matches!(
            self,
            FrameType::Visual
                | FrameType::Sector
                | FrameType::Dummy
                | FrameType::Target
                | FrameType::Joint
                | FrameType::Occluder
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parent {
    Root,
    Frame(NodeIndex),
    /// Parented to a joint: the transform is in the bone's space.
    Bone(NodeIndex),
}

impl Parent {
    pub fn node(&self) -> Option<NodeIndex> {
        match self {
            Parent::Root => None,
            Parent::Frame(node) | Parent::Bone(node) => Some(*node),
        }
    }
}

impl Default for Parent {
    fn default() -> Self {
        Parent::Root
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Visual {
    pub render_flags: RenderFlags,
    pub render_flags2: RenderFlags2,
    pub body: VisualBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Readable, Writable)]
pub struct Dummy {
    pub bounds: BoxF,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Target {
    pub flags: u16,
    pub links: Vec<NodeIndex>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Occluder {
    pub mesh: SimpleMesh,
}

#[derive(Debug, Clone, Copy, PartialEq, Readable, Writable)]
pub struct Joint {
    pub matrix: JointMatrix,
    /// Numbering used by skin bindings; unrelated to frame ids.
    pub bone_id: BoneId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameKind {
    Visual(Visual),
    Sector(Sector),
    Dummy(Dummy),
    Target(Target),
    Occluder(Occluder),
    Joint(Joint),
}

impl FrameKind {
    pub fn frame_type(&self) -> FrameType {
        match self {
            FrameKind::Visual(_) => FrameType::Visual,
            FrameKind::Sector(_) => FrameType::Sector,
            FrameKind::Dummy(_) => FrameType::Dummy,
            FrameKind::Target(_) => FrameType::Target,
            FrameKind::Occluder(_) => FrameType::Occluder,
            FrameKind::Joint(_) => FrameType::Joint,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub parent: Parent,
    pub transform: Transform,
    pub cull_flags: CullFlags,
    pub name: String,
    pub user_props: String,
    pub kind: FrameKind,
}

impl Frame {
    pub fn new(name: &str, kind: FrameKind) -> Frame {
        Frame {
            parent: Parent::Root,
            transform: Transform::identity(),
            cull_flags: CullFlags::default(),
            name: name.to_owned(),
            user_props: String::new(),
            kind,
        }
    }

    pub fn is_joint(&self) -> bool {
        matches!(self.kind, FrameKind::Joint(_))
    }

    pub fn joint(&self) -> Option<&Joint> {
        match &self.kind {
            FrameKind::Joint(joint) => Some(joint),
            _ => None,
        }
    }

    pub fn visual(&self) -> Option<&Visual> {
        match &self.kind {
            FrameKind::Visual(visual) => Some(visual),
            _ => None,
        }
    }

    /// Every other frame this one refers to, parent first.
    pub fn references(&self) -> Vec<NodeIndex> {
        let mut refs: Vec<NodeIndex> = self.parent.node().into_iter().collect();
        match &self.kind {
            FrameKind::Target(target) => refs.extend(target.links.iter().copied()),
            FrameKind::Visual(visual) => {
                if let Some(source) = visual.body.mesh().and_then(|m| m.instance) {
                    refs.push(source);
                }
            }
            _ => {}
        }
        refs
    }
}

/// Reads one frame record. References to other frames are queued in `ctx`
/// and filled in once the whole file has been read.
impl Readable<Frame> for Frame {
    fn read(from: &mut dyn Buf, ctx: &mut Context) -> DecodeResult<Self> {
        let (id, _node) = ctx.begin_frame();
        let tag = u8::read(from, ctx)?;
        let frame_type = FrameType::try_from(tag)?;
        if !frame_type.is_supported() {
            return Err(DecodeError::UnsupportedFrame {
                frame: id,
                kind: tag,
                name: frame_type.name(),
            });
        }

        let visual_header = if frame_type == FrameType::Visual {
            let visual_type = VisualType::try_from(u8::read(from, ctx)?)?;
            let render_flags = RenderFlags::read(from, ctx)?;
            let render_flags2 = RenderFlags2::read(from, ctx)?;
            Some((visual_type, render_flags, render_flags2))
        } else {
            None
        };

        let parent = FrameId::read(from, ctx)?;
        if parent.into_inner() > 0 {
            ctx.defer(ReferenceKind::Parent, parent);
        }
        let transform = Transform::read(from, ctx)?;
        let cull_flags = CullFlags::read(from, ctx)?;
        let name = String::read(from, ctx)?;
        let user_props = String::read(from, ctx)?;
        tracing::debug!("frame {}: {} {:?}", id, frame_type.name(), name);

        let kind = match frame_type {
            FrameType::Visual => {
                let (visual_type, render_flags, render_flags2) = visual_header
                    .ok_or_else(|| DecodeError::Format("visual frame without subtype".into()))?;
                FrameKind::Visual(Visual {
                    render_flags,
                    render_flags2,
                    body: read_visual_body(from, ctx, visual_type)?,
                })
            }
            FrameType::Sector => FrameKind::Sector(Sector::read(from, ctx)?),
            FrameType::Dummy => FrameKind::Dummy(Dummy::read(from, ctx)?),
            FrameType::Target => {
                let flags = u16::read(from, ctx)?;
                let links = read_vec::<u8, FrameId>(from, ctx)?;
                for link in links {
                    ctx.defer(ReferenceKind::TargetLink, link);
                }
                FrameKind::Target(Target {
                    flags,
                    links: vec![],
                })
            }
            FrameType::Occluder => FrameKind::Occluder(Occluder {
                mesh: SimpleMesh::read(from, ctx)?,
            }),
            FrameType::Joint => {
                ctx.register_joint(&name);
                FrameKind::Joint(Joint::read(from, ctx)?)
            }
            _ => {
                return Err(DecodeError::UnsupportedFrame {
                    frame: id,
                    kind: tag,
                    name: frame_type.name(),
                })
            }
        };

        Ok(Frame {
            parent: Parent::Root,
            transform,
            cull_flags,
            name,
            user_props,
            kind,
        })
    }
}

impl Frame {
    /// Writes the record of arena node `node`, translating references to
    /// the frame ids in `ctx`.
    pub fn write_frame(&self, node: NodeIndex, to: &mut dyn BufMut, ctx: &Context) -> EncodeResult<()> {
        (self.kind.frame_type() as u8).write(to, ctx)?;
        if let FrameKind::Visual(visual) = &self.kind {
            (visual.body.visual_type() as u8).write(to, ctx)?;
            visual.render_flags.write(to, ctx)?;
            visual.render_flags2.write(to, ctx)?;
        }

        let parent = match self.parent.node() {
            Some(target) => ctx.frame_id(node, target)?,
            None => FrameId::new(0),
        };
        parent.write(to, ctx)?;
        self.transform.write(to, ctx)?;
        self.cull_flags.write(to, ctx)?;
        self.name.write(to, ctx)?;
        self.user_props.write(to, ctx)?;

        match &self.kind {
            FrameKind::Visual(visual) => write_visual_body(&visual.body, node, to, ctx),
            FrameKind::Sector(sector) => sector.write(to, ctx),
            FrameKind::Dummy(dummy) => dummy.write(to, ctx),
            FrameKind::Target(target) => {
                target.flags.write(to, ctx)?;
                count_of::<u8>(target.links.len(), "target links")?.write(to, ctx)?;
                for link in &target.links {
                    ctx.frame_id(node, *link)?.write(to, ctx)?;
                }
                Ok(())
            }
            FrameKind::Occluder(occluder) => occluder.mesh.write(to, ctx),
            FrameKind::Joint(joint) => joint.write(to, ctx),
        }
    }
}
