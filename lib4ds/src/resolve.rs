//! Second decode phase: turns the frame ids queued while reading into arena
//! links once every frame exists.

use crate::error::*;
use crate::frame::{Frame, FrameKind, Parent};
use crate::io::{Context, FrameTable};
use crate::types::*;

/// A reference read from the frame at `node` (id `from`) to frame id
/// `target`, not yet known to exist.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingReference {
    pub node: NodeIndex,
    pub from: FrameId,
    pub target: FrameId,
    pub kind: ReferenceKind,
}

impl ReferenceKind {
    pub(crate) fn fallback(&self) -> &'static str {
        match self {
            ReferenceKind::Parent => "attached to the root",
            ReferenceKind::TargetLink => "link dropped",
            ReferenceKind::Instance => "instance dropped",
            ReferenceKind::SkinBone => "bone left unbound",
        }
    }
}

/// Resolves every queued reference in read order. Missing ids and
/// references to the frame itself become warnings, and parent loops are
/// broken afterwards.
pub fn resolve_references(frames: &mut [Frame], ctx: &mut Context) {
    let pending = std::mem::take(&mut ctx.pending);
    tracing::debug!("resolving {} frame references", pending.len());

    for reference in pending {
        let slot = ctx
            .slot(reference.target)
            .copied()
            .filter(|slot| slot.node != reference.node);

        let frame = match frames.get_mut(reference.node.into_inner()) {
            Some(frame) => frame,
            None => continue,
        };

        let resolved = match (reference.kind, slot) {
            (ReferenceKind::Parent, Some(slot)) => {
                frame.parent = match slot.table {
                    FrameTable::Joint => Parent::Bone(slot.node),
                    FrameTable::Frame => Parent::Frame(slot.node),
                };
                true
            }
            (ReferenceKind::TargetLink, Some(slot)) => match &mut frame.kind {
                FrameKind::Target(target) => {
                    target.links.push(slot.node);
                    true
                }
                _ => false,
            },
            (ReferenceKind::Instance, Some(slot)) => {
                let mesh = match &mut frame.kind {
                    FrameKind::Visual(visual) => visual.body.mesh_mut(),
                    _ => None,
                };
                match mesh {
                    Some(mesh) => {
                        mesh.instance = Some(slot.node);
                        true
                    }
                    None => false,
                }
            }
            _ => false,
        };

        if !resolved {
            ctx.warn(Warning::Reference {
                frame: reference.from,
                kind: reference.kind,
                target: reference.target.into_inner() as u32,
                action: reference.kind.fallback(),
            });
        }
    }

    break_parent_cycles(frames, ctx);
}

/// Every parent chain must end at the root. The lowest-id frame on a loop
/// is detached to the root with a warning, like a missing parent.
fn break_parent_cycles(frames: &mut [Frame], ctx: &mut Context) {
    for index in 0..frames.len() {
        let start = NodeIndex::new(index);
        let mut current = frames[index].parent.node();
        let mut steps = 0;
        while let Some(node) = current {
            if node == start {
                break;
            }
            steps += 1;
            if steps > frames.len() {
                // Loops elsewhere are broken at their own lowest frame.
                current = None;
                break;
            }
            current = frames.get(node.into_inner()).and_then(|f| f.parent.node());
        }
        if current != Some(start) {
            continue;
        }

        let closing = frames[index].parent.node().unwrap_or(start);
        frames[index].parent = Parent::Root;
        ctx.warn(Warning::Reference {
            frame: FrameId::new((index + 1) as u16),
            kind: ReferenceKind::Parent,
            target: (closing.into_inner() + 1) as u32,
            action: ReferenceKind::Parent.fallback(),
        });
    }
}
