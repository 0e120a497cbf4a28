use crate::error::*;
use crate::io::*;
use crate::types::*;
use bytes::{Buf, BufMut};
use fds_derive::{Readable, Writable};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Readable, Writable)]
pub struct MorphPoint {
    pub position: Point3F,
    pub normal: Point3F,
}

/// Displaced vertices of one channel. `vertices[i][t]` is vertex `i` as
/// target `t` moves it; `indices` says which LOD vertex `i` is, and is
/// `None` when the channel covers vertices 0..n in order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MorphChannel {
    pub vertices: Vec<Vec<MorphPoint>>,
    pub indices: Option<Vec<u16>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MorphLod {
    pub channels: Vec<MorphChannel>,
    pub bounds: BoxF,
    pub center: Point3F,
    pub radius: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Morph {
    pub target_count: u8,
    pub channel_count: u8,
    pub lods: Vec<MorphLod>,
}

/// Address of one morph target: (target, LOD, channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MorphKey {
    pub target: usize,
    pub lod: usize,
    pub channel: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0:?} is not a morph target name (expected Target_<t>_LOD<l>_Channel<c>)")]
pub struct ParseMorphKeyError(pub String);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MorphEntry {
    pub vertex: u16,
    pub position: Point3F,
    pub normal: Point3F,
}

impl Display for MorphKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Target_{}_LOD{}_Channel{}",
            self.target, self.lod, self.channel
        )
    }
}

impl FromStr for MorphKey {
    type Err = ParseMorphKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseMorphKeyError(s.to_owned());
        let rest = s.strip_prefix("Target_").ok_or_else(err)?;
        let (target, rest) = rest.split_once("_LOD").ok_or_else(err)?;
        let (lod, channel) = rest.split_once("_Channel").ok_or_else(err)?;
        let number = |text: &str| -> Result<usize, ParseMorphKeyError> {
            if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
                return Err(err());
            }
            text.parse().map_err(|_| err())
        };
        Ok(MorphKey {
            target: number(target)?,
            lod: number(lod)?,
            channel: number(channel)?,
        })
    }
}

impl MorphChannel {
    /// LOD vertex index of the `position`th displaced vertex.
    pub fn vertex_index(&self, position: usize) -> Option<u16> {
        match &self.indices {
            Some(indices) => indices.get(position).copied(),
            None => Some(position as u16),
        }
    }
}

impl Morph {
    /// Every addressable target, LOD by LOD. Empty channels have none.
    pub fn keys(&self) -> Vec<MorphKey> {
        let mut keys = vec![];
        for (lod, morph_lod) in self.lods.iter().enumerate() {
            for (channel, data) in morph_lod.channels.iter().enumerate() {
                if data.vertices.is_empty() {
                    continue;
                }
                for target in 0..self.target_count as usize {
                    keys.push(MorphKey {
                        target,
                        lod,
                        channel,
                    });
                }
            }
        }
        keys
    }

    /// The displaced vertices of one target, with LOD vertex indices.
    pub fn target(&self, key: &MorphKey) -> Option<Vec<MorphEntry>> {
        if key.target >= self.target_count as usize {
            return None;
        }
        let channel = self.lods.get(key.lod)?.channels.get(key.channel)?;
        if channel.vertices.is_empty() {
            return None;
        }
        channel
            .vertices
            .iter()
            .enumerate()
            .map(|(i, targets)| {
                let point = targets.get(key.target)?;
                Some(MorphEntry {
                    vertex: channel.vertex_index(i)?,
                    position: point.position,
                    normal: point.normal,
                })
            })
            .collect()
    }

    fn check(&self) -> EncodeResult<()> {
        if self.target_count == 0 {
            return Err(EncodeError::Invalid(
                "a morph needs at least one target".into(),
            ));
        }
        for morph_lod in &self.lods {
            if morph_lod.channels.len() != self.channel_count as usize {
                return Err(EncodeError::Invalid(format!(
                    "morph lod has {} channels, expected {}",
                    morph_lod.channels.len(),
                    self.channel_count
                )));
            }
            for channel in &morph_lod.channels {
                if channel
                    .vertices
                    .iter()
                    .any(|targets| targets.len() != self.target_count as usize)
                {
                    return Err(EncodeError::Invalid(format!(
                        "morph vertex does not have {} targets",
                        self.target_count
                    )));
                }
                if let Some(indices) = &channel.indices {
                    if indices.len() != channel.vertices.len() {
                        return Err(EncodeError::Invalid(format!(
                            "morph channel has {} vertices but {} indices",
                            channel.vertices.len(),
                            indices.len()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Reads the morph block of a mesh with `mesh_lods` LODs. A zero target
/// count means the mesh has no morph and ends the block.
pub fn read_morph(
    from: &mut dyn Buf,
    ctx: &mut Context,
    mesh_lods: usize,
) -> DecodeResult<Option<Morph>> {
    let target_count = u8::read(from, ctx)?;
    if target_count == 0 {
        return Ok(None);
    }
    let channel_count = u8::read(from, ctx)?;
    let lod_count = (u8::read(from, ctx)? as usize).min(mesh_lods);

    let mut lods = Vec::with_capacity(lod_count);
    for lod in 0..lod_count {
        let mut channels = Vec::with_capacity(channel_count as usize);
        for _ in 0..channel_count {
            let vertex_count = u16::read(from, ctx)? as usize;
            if vertex_count == 0 {
                channels.push(MorphChannel::default());
                continue;
            }
            let vertices = read_n(from, ctx, vertex_count, |from, ctx| {
                read_n(from, ctx, target_count as usize, |from, ctx| {
                    MorphPoint::read(from, ctx)
                })
            })?;
            let indices = if bool::read(from, ctx)? {
                let indices = read_n(from, ctx, vertex_count, |from, ctx| u16::read(from, ctx))?;
                check_indices(ctx, lod, &indices);
                Some(indices)
            } else {
                None
            };
            channels.push(MorphChannel { vertices, indices });
        }
        let bounds = BoxF::read(from, ctx)?;
        let center = Point3F::read(from, ctx)?;
        let radius = f32::read(from, ctx)?;
        lods.push(MorphLod {
            channels,
            bounds,
            center,
            radius,
        });
    }

    tracing::trace!(
        "morph: {} targets, {} channels, {} lods",
        target_count,
        channel_count,
        lods.len()
    );
    Ok(Some(Morph {
        target_count,
        channel_count,
        lods,
    }))
}

fn check_indices(ctx: &mut Context, lod: usize, indices: &[u16]) {
    let vertices = match ctx.lod_vertex_counts.get(lod) {
        Some(count) => *count,
        None => return,
    };
    if let Some(index) = indices.iter().find(|i| **i as usize >= vertices) {
        let warning = Warning::MorphIndex {
            frame: ctx.current,
            lod,
            index: *index,
            vertices,
        };
        ctx.warn(warning);
    }
}

pub fn write_morph(morph: &Option<Morph>, to: &mut dyn BufMut, ctx: &Context) -> EncodeResult<()> {
    let morph = match morph {
        Some(morph) => morph,
        None => return 0u8.write(to, ctx),
    };
    morph.check()?;

    morph.target_count.write(to, ctx)?;
    morph.channel_count.write(to, ctx)?;
    count_of::<u8>(morph.lods.len(), "morph lods")?.write(to, ctx)?;
    for morph_lod in &morph.lods {
        for channel in &morph_lod.channels {
            count_of::<u16>(channel.vertices.len(), "morph vertices")?.write(to, ctx)?;
            if channel.vertices.is_empty() {
                continue;
            }
            for targets in &channel.vertices {
                write_all(targets, to, ctx)?;
            }
            match &channel.indices {
                Some(indices) => {
                    true.write(to, ctx)?;
                    write_all(indices, to, ctx)?;
                }
                None => false.write(to, ctx)?,
            }
        }
        morph_lod.bounds.write(to, ctx)?;
        morph_lod.center.write(to, ctx)?;
        morph_lod.radius.write(to, ctx)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(x: f32) -> MorphPoint {
        MorphPoint {
            position: Point3F::new(x, 2.0 * x, 0.5),
            normal: Point3F::new(0.0, 1.0, 0.0),
        }
    }

    fn sample() -> Morph {
        Morph {
            target_count: 2,
            channel_count: 2,
            lods: vec![MorphLod {
                channels: vec![
                    MorphChannel {
                        vertices: vec![vec![point(1.0), point(2.0)], vec![point(3.0), point(4.0)]],
                        indices: Some(vec![4, 7]),
                    },
                    MorphChannel {
                        vertices: vec![vec![point(5.0), point(6.0)]],
                        indices: None,
                    },
                ],
                bounds: BoxF {
                    min: Point3F::new(-1.0, -1.0, -1.0),
                    max: Point3F::new(1.0, 1.0, 1.0),
                },
                center: Point3F::new(0.0, 0.0, 0.0),
                radius: 2.0,
            }],
        }
    }

    #[test]
    fn keys_format_and_parse() {
        let key = MorphKey {
            target: 3,
            lod: 0,
            channel: 12,
        };
        assert_eq!(key.to_string(), "Target_3_LOD0_Channel12");
        assert_eq!("Target_3_LOD0_Channel12".parse::<MorphKey>(), Ok(key));
        assert!("Target_3_LOD0".parse::<MorphKey>().is_err());
        assert!("Target_x_LOD0_Channel1".parse::<MorphKey>().is_err());
        assert!("Target_1_LOD+2_Channel1".parse::<MorphKey>().is_err());
    }

    #[test]
    fn sparse_and_dense_targets() {
        let morph = sample();
        let sparse = morph
            .target(&MorphKey {
                target: 1,
                lod: 0,
                channel: 0,
            })
            .unwrap();
        assert_eq!(sparse.iter().map(|e| e.vertex).collect::<Vec<_>>(), vec![4, 7]);
        assert_eq!(sparse[1].position, point(4.0).position);

        let dense = morph
            .target(&MorphKey {
                target: 0,
                lod: 0,
                channel: 1,
            })
            .unwrap();
        assert_eq!(dense[0].vertex, 0);
        assert!(morph
            .target(&MorphKey {
                target: 2,
                lod: 0,
                channel: 0
            })
            .is_none());
        assert_eq!(morph.keys().len(), 4);
    }

    #[test]
    fn block_round_trips() {
        let morph = Some(sample());
        let ctx = Context::new();
        let mut out = vec![];
        write_morph(&morph, &mut out, &ctx).unwrap();

        let mut ctx = Context::new();
        ctx.lod_vertex_counts = vec![8];
        let mut data: &[u8] = &out;
        let back = read_morph(&mut data, &mut ctx, 1).unwrap();
        assert_eq!(back, morph);
        assert_eq!(data.remaining(), 0);
        assert!(ctx.warnings.is_empty());

        let mut again = vec![];
        write_morph(&back, &mut again, &Context::new()).unwrap();
        assert_eq!(again, out);
    }

    #[test]
    fn out_of_range_indices_warn() {
        let ctx = Context::new();
        let mut out = vec![];
        write_morph(&Some(sample()), &mut out, &ctx).unwrap();
        let mut ctx = Context::new();
        ctx.lod_vertex_counts = vec![5];
        read_morph(&mut &out[..], &mut ctx, 1).unwrap();
        assert!(matches!(
            ctx.warnings[..],
            [Warning::MorphIndex { index: 7, .. }]
        ));
    }

    #[test]
    fn zero_targets_is_a_single_byte() {
        let ctx = Context::new();
        let mut out = vec![];
        write_morph(&None, &mut out, &ctx).unwrap();
        assert_eq!(out, vec![0]);
        let mut ctx = Context::new();
        assert_eq!(read_morph(&mut &out[..], &mut ctx, 3).unwrap(), None);
    }

    #[test]
    fn lod_count_is_clamped_to_the_mesh() {
        let mut morph = sample();
        morph.lods.push(morph.lods[0].clone());
        let ctx = Context::new();
        let mut out = vec![];
        write_morph(&Some(morph), &mut out, &ctx).unwrap();
        let mut ctx = Context::new();
        let back = read_morph(&mut &out[..], &mut ctx, 1).unwrap().unwrap();
        assert_eq!(back.lods.len(), 1);
    }

    #[test]
    fn ragged_targets_are_rejected() {
        let mut morph = sample();
        morph.lods[0].channels[1].vertices[0].pop();
        let ctx = Context::new();
        let mut out = vec![];
        assert!(write_morph(&Some(morph), &mut out, &ctx).is_err());
    }
}
