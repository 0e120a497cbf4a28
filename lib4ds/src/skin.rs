use crate::error::*;
use crate::geometry::{Lod, VertexMap};
use crate::io::*;
use crate::types::*;
use bytes::{Buf, BufMut};
use typed_ints::TypedEnum;

/// One bone of a skinned LOD. Its vertices are a positional run of the LOD
/// vertex buffer: `locked` vertices at full weight followed by one vertex
/// per entry of `weights`.
#[derive(Debug, Clone, PartialEq)]
pub struct SkinBone {
    pub inverse_bind: MatrixF,
    pub locked: u32,
    pub weights: Vec<f32>,
    pub bone_id: BoneId,
    pub bounds: BoxF,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkinBinding {
    /// Informational count of vertices left to the root bone.
    pub unweighted: u32,
    pub bounds: BoxF,
    pub bones: Vec<SkinBone>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Influence {
    Bone(SkinBoneIndex),
    /// The synthetic root bone that owns everything no bone claimed.
    Root,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VertexWeight {
    pub influence: Influence,
    pub weight: f32,
}

/// Weights of one armature bone, keyed by source vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct BoneWeights {
    pub bone_id: BoneId,
    pub inverse_bind: MatrixF,
    pub weights: Vec<(u32, f32)>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkinThresholds {
    /// Weights at or above this are stored as locked.
    pub locked: f32,
    /// Weights above this (and below `locked`) are stored explicitly.
    pub weighted: f32,
}

impl Default for SkinThresholds {
    fn default() -> Self {
        SkinThresholds {
            locked: 0.999,
            weighted: 0.001,
        }
    }
}

impl SkinBinding {
    /// Number of vertices the bone runs claim.
    pub fn covered(&self) -> u64 {
        self.bones
            .iter()
            .map(|b| b.locked as u64 + b.weights.len() as u64)
            .sum()
    }

    /// Expands the bone runs into per-vertex weights. Every returned list
    /// sums to 1.0; the part of a weighted vertex no bone claims goes to
    /// the root. Runs past `vertex_count` are ignored.
    pub fn vertex_weights(&self, vertex_count: usize) -> Vec<Vec<VertexWeight>> {
        let mut result: Vec<Vec<VertexWeight>> = vec![vec![]; vertex_count];
        let mut cursor = 0usize;

        for (index, bone) in self.bones.iter().typed_enumerate(SkinBoneIndex::new(0)) {
            for _ in 0..bone.locked {
                if let Some(slot) = result.get_mut(cursor) {
                    slot.push(VertexWeight {
                        influence: Influence::Bone(index),
                        weight: 1.0,
                    });
                }
                cursor += 1;
            }
            for weight in &bone.weights {
                if let Some(slot) = result.get_mut(cursor) {
                    slot.push(VertexWeight {
                        influence: Influence::Bone(index),
                        weight: *weight,
                    });
                    if *weight < 1.0 {
                        slot.push(VertexWeight {
                            influence: Influence::Root,
                            weight: 1.0 - *weight,
                        });
                    }
                }
                cursor += 1;
            }
        }

        for slot in result.iter_mut().skip(cursor) {
            slot.push(VertexWeight {
                influence: Influence::Root,
                weight: 1.0,
            });
        }
        result
    }

    /// Builds the binding for a freshly deduplicated LOD. Each LOD vertex is
    /// given to the bone with its greatest weight (the earlier bone on a
    /// tie), then the LOD vertex buffer is reordered into contiguous bone
    /// runs. Triangle indices and `map` follow the reorder.
    pub fn build(
        lod: &mut Lod,
        map: &mut VertexMap,
        bones: &[BoneWeights],
        thresholds: &SkinThresholds,
    ) -> EncodeResult<SkinBinding> {
        count_of::<u8>(bones.len(), "skin bones")?;
        let vertex_count = lod.vertices.len();

        let mut best: Vec<Option<(usize, f32)>> = vec![None; vertex_count];
        for (bone, weights) in bones.iter().enumerate() {
            for &(source, weight) in &weights.weights {
                for &index in map.expansions(source as usize) {
                    let slot = &mut best[index as usize];
                    let replace = match *slot {
                        Some((_, current)) => weight > current,
                        None => true,
                    };
                    if replace {
                        *slot = Some((bone, weight));
                    }
                }
            }
        }

        let split = split_vertex_count(map, bones, vertex_count, thresholds);
        if split > 0 {
            tracing::debug!(
                "{} of {} vertices have more than one bone influence; only the strongest is kept",
                split,
                vertex_count
            );
        }

        let mut locked_runs: Vec<Vec<usize>> = vec![vec![]; bones.len()];
        let mut weighted_runs: Vec<Vec<(usize, f32)>> = vec![vec![]; bones.len()];
        let mut root: Vec<usize> = vec![];
        for (vertex, assignment) in best.iter().enumerate() {
            match *assignment {
                Some((bone, weight)) if weight >= thresholds.locked => {
                    locked_runs[bone].push(vertex)
                }
                Some((bone, weight)) if weight > thresholds.weighted => {
                    weighted_runs[bone].push((vertex, weight))
                }
                _ => root.push(vertex),
            }
        }

        let mut order: Vec<usize> = Vec::with_capacity(vertex_count);
        for (locked, weighted) in locked_runs.iter().zip(weighted_runs.iter()) {
            order.extend(locked.iter().copied());
            order.extend(weighted.iter().map(|(vertex, _)| *vertex));
        }
        order.extend(root.iter().copied());

        let mut new_index = vec![0u16; vertex_count];
        for (position, old) in order.iter().enumerate() {
            new_index[*old] = position as u16;
        }
        lod.reorder(&new_index);
        map.remap(&new_index);

        let lod_bounds = lod.bounds();
        let mut cursor = 0usize;
        let mut skin_bones = Vec::with_capacity(bones.len());
        for ((source, locked), weighted) in bones.iter().zip(locked_runs).zip(weighted_runs) {
            let run = locked.len() + weighted.len();
            let bounds = if run == 0 {
                lod_bounds
            } else {
                BoxF::from_vertices(lod.vertices[cursor..cursor + run].iter().map(|v| &v.position))
            };
            cursor += run;
            skin_bones.push(SkinBone {
                inverse_bind: source.inverse_bind,
                locked: count_of::<u32>(locked.len(), "locked vertices")?,
                weights: weighted.into_iter().map(|(_, weight)| weight).collect(),
                bone_id: source.bone_id,
                bounds,
            });
        }

        Ok(SkinBinding {
            unweighted: count_of::<u32>(root.len(), "unweighted vertices")?,
            bounds: lod_bounds,
            bones: skin_bones,
        })
    }
}

impl Readable<SkinBone> for SkinBone {
    fn read(from: &mut dyn Buf, ctx: &mut Context) -> DecodeResult<Self> {
        let inverse_bind = MatrixF::read(from, ctx)?;
        let locked = u32::read(from, ctx)?;
        let weighted = u32::read(from, ctx)? as usize;
        let bone_id = BoneId::read(from, ctx)?;
        let bounds = BoxF::read(from, ctx)?;
        let weights = read_n(from, ctx, weighted, |from, ctx| f32::read(from, ctx))?;
        Ok(SkinBone {
            inverse_bind,
            locked,
            weights,
            bone_id,
            bounds,
        })
    }
}

impl Writable<SkinBone> for SkinBone {
    fn write(&self, to: &mut dyn BufMut, ctx: &Context) -> EncodeResult<()> {
        self.inverse_bind.write(to, ctx)?;
        self.locked.write(to, ctx)?;
        count_of::<u32>(self.weights.len(), "weighted vertices")?.write(to, ctx)?;
        self.bone_id.write(to, ctx)?;
        self.bounds.write(to, ctx)?;
        write_all(&self.weights, to, ctx)?;
        Ok(())
    }
}

impl Readable<SkinBinding> for SkinBinding {
    fn read(from: &mut dyn Buf, ctx: &mut Context) -> DecodeResult<Self> {
        let bone_count = u8::read(from, ctx)? as usize;
        let unweighted = u32::read(from, ctx)?;
        let bounds = BoxF::read(from, ctx)?;
        let bones = read_n(from, ctx, bone_count, |from, ctx| SkinBone::read(from, ctx))?;
        Ok(SkinBinding {
            unweighted,
            bounds,
            bones,
        })
    }
}

impl Writable<SkinBinding> for SkinBinding {
    fn write(&self, to: &mut dyn BufMut, ctx: &Context) -> EncodeResult<()> {
        count_of::<u8>(self.bones.len(), "skin bones")?.write(to, ctx)?;
        self.unweighted.write(to, ctx)?;
        self.bounds.write(to, ctx)?;
        write_all(&self.bones, to, ctx)?;
        Ok(())
    }
}

/// LOD vertices influenced by more than one bone. The run layout keeps a
/// single bone per vertex, so the weaker influences fall to the root.
fn split_vertex_count(
    map: &VertexMap,
    bones: &[BoneWeights],
    vertex_count: usize,
    thresholds: &SkinThresholds,
) -> usize {
    let mut influences = vec![0u32; vertex_count];
    for weights in bones {
        for &(source, weight) in &weights.weights {
            if weight <= thresholds.weighted {
                continue;
            }
            for &index in map.expansions(source as usize) {
                if let Some(count) = influences.get_mut(index as usize) {
                    *count += 1;
                }
            }
        }
    }
    influences.iter().filter(|&&count| count > 1).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Corner, LodBuilder, SourceTriangle};
    use cgmath::SquareMatrix;

    fn strip() -> (Vec<Point3F>, Vec<SourceTriangle>) {
        let positions = (0..5)
            .map(|i| Point3F::new(i as f32, (i % 2) as f32, 0.0))
            .collect::<Vec<_>>();
        let corner = |vertex: u32| Corner {
            vertex,
            normal: Point3F::new(0.0, 0.0, 1.0),
            uv: Point2F::new(0.0, 0.0),
        };
        let triangles = (0..3)
            .map(|i| SourceTriangle {
                corners: [corner(i), corner(i + 1), corner(i + 2)],
                material: None,
            })
            .collect();
        (positions, triangles)
    }

    fn bone(id: u32, weights: Vec<(u32, f32)>) -> BoneWeights {
        BoneWeights {
            bone_id: BoneId::new(id),
            inverse_bind: MatrixF::identity(),
            weights,
        }
    }

    #[test]
    fn reconstructed_weights_sum_to_one() {
        let skin = SkinBinding {
            unweighted: 1,
            bounds: BoxF::zero(),
            bones: vec![
                SkinBone {
                    inverse_bind: MatrixF::identity(),
                    locked: 2,
                    weights: vec![0.25, 0.7],
                    bone_id: BoneId::new(0),
                    bounds: BoxF::zero(),
                },
                SkinBone {
                    inverse_bind: MatrixF::identity(),
                    locked: 0,
                    weights: vec![0.5],
                    bone_id: BoneId::new(3),
                    bounds: BoxF::zero(),
                },
            ],
        };
        let weights = skin.vertex_weights(6);
        assert_eq!(weights.len(), 6);
        for vertex in &weights {
            let sum: f32 = vertex.iter().map(|w| w.weight).sum();
            assert!((sum - 1.0).abs() < 1e-6);
        }
        assert_eq!(weights[0][0].influence, Influence::Bone(SkinBoneIndex::new(0)));
        assert_eq!(weights[2][1].influence, Influence::Root);
        assert_eq!(weights[4][0].influence, Influence::Bone(SkinBoneIndex::new(1)));
        assert_eq!(weights[5], vec![VertexWeight {
            influence: Influence::Root,
            weight: 1.0
        }]);
    }

    #[test]
    fn runs_past_the_lod_are_ignored() {
        let skin = SkinBinding {
            unweighted: 0,
            bounds: BoxF::zero(),
            bones: vec![SkinBone {
                inverse_bind: MatrixF::identity(),
                locked: 10,
                weights: vec![],
                bone_id: BoneId::new(0),
                bounds: BoxF::zero(),
            }],
        };
        assert_eq!(skin.covered(), 10);
        assert_eq!(skin.vertex_weights(3).len(), 3);
    }

    #[test]
    fn build_orders_vertices_into_runs() {
        let (positions, triangles) = strip();
        let mut built = LodBuilder::new(&positions).build(0.0, &triangles).unwrap();
        let before = built.lod.clone();

        let bones = vec![
            bone(0, vec![(3, 1.0), (4, 0.6)]),
            bone(1, vec![(0, 1.0), (4, 0.4), (1, 0.0005)]),
        ];
        let skin = SkinBinding::build(
            &mut built.lod,
            &mut built.vertex_map,
            &bones,
            &SkinThresholds::default(),
        )
        .unwrap();

        assert_eq!(skin.bones[0].locked, 1);
        assert_eq!(skin.bones[0].weights, vec![0.6]);
        assert_eq!(skin.bones[1].locked, 1);
        assert!(skin.bones[1].weights.is_empty());
        assert_eq!(skin.unweighted, 2);

        // run order: bone 0 locked (3), bone 0 weighted (4), bone 1 locked (0), root (1, 2)
        let xs = built
            .lod
            .vertices
            .iter()
            .map(|v| v.position.x)
            .collect::<Vec<_>>();
        assert_eq!(xs, vec![3.0, 4.0, 0.0, 1.0, 2.0]);
        assert_eq!(built.vertex_map.expansions(3), &[0]);
        assert_eq!(built.vertex_map.expansions(0), &[2]);

        // the triangles still reference the same positions
        for (a, b) in before.face_groups[0]
            .triangles
            .iter()
            .zip(built.lod.face_groups[0].triangles.iter())
        {
            for (ia, ib) in a.0.iter().zip(b.0.iter()) {
                assert_eq!(
                    before.vertices[*ia as usize].position,
                    built.lod.vertices[*ib as usize].position
                );
            }
        }
    }

    #[test]
    fn shared_vertices_are_counted() {
        let (positions, triangles) = strip();
        let built = LodBuilder::new(&positions).build(0.0, &triangles).unwrap();
        let bones = vec![
            bone(0, vec![(3, 1.0), (4, 0.6), (2, 0.5)]),
            bone(1, vec![(0, 1.0), (4, 0.4), (2, 0.5), (3, 0.0005)]),
        ];
        let count = split_vertex_count(
            &built.vertex_map,
            &bones,
            built.lod.vertices.len(),
            &SkinThresholds::default(),
        );
        assert_eq!(count, 2);
    }

    #[test]
    fn ties_go_to_the_earlier_bone() {
        let (positions, triangles) = strip();
        let mut built = LodBuilder::new(&positions).build(0.0, &triangles).unwrap();
        let bones = vec![bone(0, vec![(2, 0.5)]), bone(1, vec![(2, 0.5)])];
        let skin = SkinBinding::build(
            &mut built.lod,
            &mut built.vertex_map,
            &bones,
            &SkinThresholds::default(),
        )
        .unwrap();
        assert_eq!(skin.bones[0].weights, vec![0.5]);
        assert!(skin.bones[1].weights.is_empty());
    }

    #[test]
    fn empty_bone_gets_lod_bounds() {
        let (positions, triangles) = strip();
        let mut built = LodBuilder::new(&positions).build(0.0, &triangles).unwrap();
        let bones = vec![bone(0, vec![(1, 1.0)]), bone(1, vec![])];
        let skin = SkinBinding::build(
            &mut built.lod,
            &mut built.vertex_map,
            &bones,
            &SkinThresholds::default(),
        )
        .unwrap();
        assert_eq!(skin.bones[1].locked, 0);
        assert!(skin.bones[1].weights.is_empty());
        assert_eq!(skin.bones[1].bounds, built.lod.bounds());
        assert_eq!(skin.bones[0].bounds.min, Point3F::new(1.0, 1.0, 0.0));
        assert_eq!(skin.bones[0].bounds.max, Point3F::new(1.0, 1.0, 0.0));

        let ctx = Context::new();
        let mut out = vec![];
        skin.write(&mut out, &ctx).unwrap();
        let mut ctx = Context::new();
        let back = SkinBinding::read(&mut &out[..], &mut ctx).unwrap();
        assert_eq!(back, skin);
    }
}
