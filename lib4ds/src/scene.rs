use crate::error::*;
use crate::frame::{Frame, Parent};
use crate::io::*;
use crate::material::Material;
use crate::resolve::resolve_references;
use crate::types::*;
use bytes::{Buf, BufMut};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

pub const MAGIC: &[u8; 4] = b"4DS\0";

/// 100ns intervals between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_EPOCH: u64 = 116_444_736_000_000_000;

/// A whole 4DS file: the material table and the frame arena. Frames refer
/// to each other by arena index; file ids only exist on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneGraph {
    /// Windows FILETIME.
    pub timestamp: u64,
    pub materials: Vec<Material>,
    pub frames: Vec<Frame>,
    /// Bytes after the animation flag, kept uninterpreted. `Some` iff the
    /// flag was set.
    pub animation: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub scene: SceneGraph,
    pub warnings: Vec<Warning>,
}

/// How frames are numbered on encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOrder {
    /// Depth-first from the roots, siblings in arena order, so every parent
    /// precedes its children.
    Hierarchy,
    /// Arena order as is; forward references are written as they are.
    Preserve,
}

impl Default for FrameOrder {
    fn default() -> Self {
        FrameOrder::Hierarchy
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncodeOptions {
    pub order: FrameOrder,
}

pub fn decode_file(bytes: &[u8]) -> DecodeResult<Decoded> {
    let mut from: &[u8] = bytes;
    let mut ctx = Context::new();
    let scene = SceneGraph::read(&mut from, &mut ctx)?;

    let mut warnings = ctx.warnings;
    for warning in scene
        .bone_world_matrices()
        .warnings
        .into_iter()
        .chain(scene.check_skin_bones())
    {
        tracing::warn!("{}", warning);
        warnings.push(warning);
    }
    Ok(Decoded { scene, warnings })
}

pub fn encode_file(scene: &SceneGraph) -> EncodeResult<Vec<u8>> {
    encode_file_with(scene, &EncodeOptions::default())
}

pub fn encode_file_with(scene: &SceneGraph, options: &EncodeOptions) -> EncodeResult<Vec<u8>> {
    let order = scene.frame_order(options.order)?;
    let mut frame_ids = vec![FrameId::new(0); scene.frames.len()];
    for (position, node) in order.iter().enumerate() {
        frame_ids[node.into_inner()] = FrameId::new((position + 1) as u16);
    }
    let material_count = count_of::<u16>(scene.materials.len(), "materials")?;
    let ctx = Context::for_encode(material_count, frame_ids);

    let mut out = vec![];
    scene.write_ordered(&order, &mut out, &ctx)?;
    Ok(out)
}

impl SceneGraph {
    /// An empty scene stamped with the current time.
    pub fn new() -> SceneGraph {
        SceneGraph {
            timestamp: filetime_now(),
            materials: vec![],
            frames: vec![],
            animation: None,
        }
    }

    pub fn is_animated(&self) -> bool {
        self.animation.is_some()
    }

    pub fn add_frame(&mut self, frame: Frame) -> NodeIndex {
        self.frames.push(frame);
        NodeIndex::new(self.frames.len() - 1)
    }

    pub fn frame(&self, node: NodeIndex) -> Option<&Frame> {
        self.frames.get(node.into_inner())
    }

    pub fn find(&self, name: &str) -> Option<NodeIndex> {
        self.frames
            .iter()
            .position(|f| f.name == name)
            .map(NodeIndex::new)
    }

    /// Direct children of `parent` (or the roots for `None`), arena order.
    pub fn children(&self, parent: Option<NodeIndex>) -> Vec<NodeIndex> {
        self.frames
            .iter()
            .enumerate()
            .filter(|(_, f)| f.parent.node() == parent)
            .map(|(i, _)| NodeIndex::new(i))
            .collect()
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> DecodeResult<Decoded> {
        let bytes = std::fs::read(path)?;
        decode_file(&bytes)
    }

    pub fn to_path<P: AsRef<Path>>(&self, path: P) -> EncodeResult<()> {
        let bytes = encode_file(self)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Checks every link and returns the nodes in the order they will be
    /// numbered.
    pub fn frame_order(&self, order: FrameOrder) -> EncodeResult<Vec<NodeIndex>> {
        count_of::<u16>(self.frames.len(), "frames")?;
        self.check_links()?;

        match order {
            FrameOrder::Preserve => Ok((0..self.frames.len()).map(NodeIndex::new).collect()),
            FrameOrder::Hierarchy => {
                let mut children: Vec<Vec<NodeIndex>> = vec![vec![]; self.frames.len()];
                let mut roots = vec![];
                for (index, frame) in self.frames.iter().enumerate() {
                    match frame.parent.node() {
                        Some(parent) => children[parent.into_inner()].push(NodeIndex::new(index)),
                        None => roots.push(NodeIndex::new(index)),
                    }
                }

                let mut order = Vec::with_capacity(self.frames.len());
                let mut stack: Vec<NodeIndex> = roots.into_iter().rev().collect();
                while let Some(node) = stack.pop() {
                    order.push(node);
                    stack.extend(children[node.into_inner()].iter().rev().copied());
                }
                Ok(order)
            }
        }
    }

    fn check_links(&self) -> EncodeResult<()> {
        let count = self.frames.len();
        for (index, frame) in self.frames.iter().enumerate() {
            let node = NodeIndex::new(index);
            for target in frame.references() {
                if target.into_inner() >= count {
                    return Err(EncodeError::DanglingReference { node, target });
                }
            }
            if let Parent::Bone(target) = frame.parent {
                if !self.frames[target.into_inner()].is_joint() {
                    return Err(EncodeError::NotAJoint { node, target });
                }
            }
        }

        // Walking up from any frame must reach a root within `count` steps.
        for index in 0..count {
            let mut current = self.frames[index].parent.node();
            let mut steps = 0;
            while let Some(parent) = current {
                steps += 1;
                if steps > count {
                    return Err(EncodeError::Cycle(NodeIndex::new(index)));
                }
                current = self.frames[parent.into_inner()].parent.node();
            }
        }
        Ok(())
    }

    fn write_ordered(&self, order: &[NodeIndex], to: &mut dyn BufMut, ctx: &Context) -> EncodeResult<()> {
        to.put_slice(MAGIC);
        FORMAT_VERSION.write(to, ctx)?;
        self.timestamp.write(to, ctx)?;
        write_vec::<u16, Material>(&self.materials, to, ctx, "materials")?;

        count_of::<u16>(order.len(), "frames")?.write(to, ctx)?;
        for node in order {
            self.frames[node.into_inner()].write_frame(*node, to, ctx)?;
        }

        match &self.animation {
            Some(payload) => {
                true.write(to, ctx)?;
                to.put_slice(payload);
            }
            None => false.write(to, ctx)?,
        }
        Ok(())
    }
}

impl Default for SceneGraph {
    fn default() -> Self {
        SceneGraph::new()
    }
}

impl Readable<SceneGraph> for SceneGraph {
    fn read(from: &mut dyn Buf, ctx: &mut Context) -> DecodeResult<Self> {
        let magic = read_fixed(from, MAGIC.len())?;
        if magic != MAGIC {
            return Err(DecodeError::Format(format!(
                "bad magic {:02x?}, expected {:02x?}",
                magic, MAGIC
            )));
        }
        let version = u16::read(from, ctx)?;
        if version != FORMAT_VERSION {
            return Err(DecodeError::UnsupportedVersion {
                found: version,
                expected: FORMAT_VERSION,
            });
        }
        ctx.version = version;
        let timestamp = u64::read(from, ctx)?;

        let materials = read_vec::<u16, Material>(from, ctx)?;
        ctx.material_count = materials.len() as u16;
        tracing::debug!("{} materials", materials.len());

        let frame_count = u16::read(from, ctx)? as usize;
        tracing::debug!("{} frames", frame_count);
        let mut frames = read_n(from, ctx, frame_count, |from, ctx| Frame::read(from, ctx))?;

        let animation = if bool::read(from, ctx)? {
            let rest = from.remaining();
            let payload = read_fixed(from, rest)?;
            tracing::warn!(
                "file carries {} bytes of animation data, which is kept but not interpreted",
                payload.len()
            );
            Some(payload)
        } else {
            if from.remaining() > 0 {
                tracing::debug!("ignoring {} trailing bytes", from.remaining());
            }
            None
        };

        resolve_references(&mut frames, ctx);

        Ok(SceneGraph {
            timestamp,
            materials,
            frames,
            animation,
        })
    }
}

fn filetime_now() -> u64 {
    let since_unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    FILETIME_UNIX_EPOCH + since_unix.as_secs() * 10_000_000 + u64::from(since_unix.subsec_nanos() / 100)
}
