use crate::types::{FrameId, NodeIndex};
use thiserror::Error;

pub type DecodeResult<T> = Result<T, DecodeError>;
pub type EncodeResult<T> = Result<T, EncodeError>;

/// Fatal problems while reading a file. No partial scene is returned.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed 4DS data: {0}")]
    Format(String),
    #[error("unsupported 4DS version {found} (only {expected} is supported)")]
    UnsupportedVersion { found: u16, expected: u16 },
    #[error("unexpected end of data: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("frame {frame} has type {kind} ({name}) whose layout is not supported")]
    UnsupportedFrame {
        frame: FrameId,
        kind: u8,
        name: &'static str,
    },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Structures the format cannot represent. Encoding never drops data to
/// make a scene fit.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("{what} holds {count} entries but the format allows at most {limit}")]
    Capacity {
        what: &'static str,
        count: usize,
        limit: usize,
    },
    #[error("material {texture:?}: {reason}")]
    InconsistentMaterial {
        texture: String,
        reason: &'static str,
    },
    #[error("string {text:?} cannot be stored: {reason}")]
    String { text: String, reason: &'static str },
    #[error("frame {node} references frame {target}, which does not exist")]
    DanglingReference { node: NodeIndex, target: NodeIndex },
    #[error("frame {0} is part of a parent cycle")]
    Cycle(NodeIndex),
    #[error("frame {node} is bone-parented to frame {target}, which is not a joint")]
    NotAJoint { node: NodeIndex, target: NodeIndex },
    #[error("face group uses material {id} but only {count} materials exist")]
    MaterialOutOfRange { id: u16, count: usize },
    #[error("{0}")]
    Invalid(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which kind of link a reference warning is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Parent,
    TargetLink,
    Instance,
    SkinBone,
}

/// Problems the decoder recovers from. They are collected in
/// [`crate::scene::Decoded::warnings`] and also logged.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Warning {
    #[error("frame {frame}: {kind:?} reference to {target} cannot be resolved, {action}")]
    Reference {
        frame: FrameId,
        kind: ReferenceKind,
        target: u32,
        action: &'static str,
    },
    #[error("frame {frame}: face group uses material {material} but only {count} materials exist")]
    MaterialRange {
        frame: FrameId,
        material: u16,
        count: u16,
    },
    #[error("frame {frame}: skin of lod {lod} covers {covered} vertices but the lod has {vertices}")]
    SkinRange {
        frame: FrameId,
        lod: usize,
        covered: u64,
        vertices: usize,
    },
    #[error("frame {frame}: morph index {index} in lod {lod} is past the {vertices} lod vertices")]
    MorphIndex {
        frame: FrameId,
        lod: usize,
        index: u16,
        vertices: usize,
    },
}
