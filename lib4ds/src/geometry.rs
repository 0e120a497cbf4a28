use crate::error::*;
use crate::io::*;
use crate::types::*;
use bytes::{Buf, BufMut};
use fds_derive::{Readable, Writable};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Readable, Writable)]
pub struct Vertex {
    pub position: Point3F,
    pub normal: Point3F,
    /// Kept in file texture space.
    pub uv: Point2F,
}

/// Three vertex indices in natural (model) winding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Triangle(pub [u16; 3]);

// Stored as (first, third, second) relative to the model's winding.
impl Readable<Triangle> for Triangle {
    fn read(from: &mut dyn Buf, ctx: &mut Context) -> DecodeResult<Self> {
        let a = u16::read(from, ctx)?;
        let c = u16::read(from, ctx)?;
        let b = u16::read(from, ctx)?;
        Ok(Triangle([a, b, c]))
    }
}

impl Writable<Triangle> for Triangle {
    fn write(&self, to: &mut dyn BufMut, ctx: &Context) -> EncodeResult<()> {
        let [a, b, c] = self.0;
        a.write(to, ctx)?;
        c.write(to, ctx)?;
        b.write(to, ctx)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FaceGroup {
    pub triangles: Vec<Triangle>,
    /// `None` is written as material id 0.
    pub material: Option<MaterialId>,
}

impl Readable<FaceGroup> for FaceGroup {
    fn read(from: &mut dyn Buf, ctx: &mut Context) -> DecodeResult<Self> {
        let triangles = read_vec::<u16, Triangle>(from, ctx)?;
        let material = MaterialId::read(from, ctx)?;
        if material.into_inner() > ctx.material_count {
            let warning = Warning::MaterialRange {
                frame: ctx.current,
                material: material.into_inner(),
                count: ctx.material_count,
            };
            ctx.warn(warning);
        }
        Ok(FaceGroup {
            triangles,
            material: match material.into_inner() {
                0 => None,
                _ => Some(material),
            },
        })
    }
}

impl Writable<FaceGroup> for FaceGroup {
    fn write(&self, to: &mut dyn BufMut, ctx: &Context) -> EncodeResult<()> {
        let id = self.material.map(|m| m.into_inner()).unwrap_or(0);
        if id > ctx.material_count {
            return Err(EncodeError::MaterialOutOfRange {
                id,
                count: ctx.material_count as usize,
            });
        }
        write_vec::<u16, Triangle>(&self.triangles, to, ctx, "face group triangles")?;
        id.write(to, ctx)?;
        Ok(())
    }
}

/// One level of detail: a vertex buffer and its material-partitioned faces.
#[derive(Debug, Clone, PartialEq)]
pub struct Lod {
    pub fade_distance: f32,
    pub vertices: Vec<Vertex>,
    pub face_groups: Vec<FaceGroup>,
}

impl Lod {
    pub fn bounds(&self) -> BoxF {
        BoxF::from_vertices(self.vertices.iter().map(|v| &v.position))
    }

    pub fn triangle_count(&self) -> usize {
        self.face_groups.iter().map(|g| g.triangles.len()).sum()
    }

    /// Applies a vertex permutation: `new_index[old]` is where vertex `old`
    /// ends up.
    pub fn reorder(&mut self, new_index: &[u16]) {
        let mut vertices = self.vertices.clone();
        for (old, vertex) in self.vertices.iter().enumerate() {
            vertices[new_index[old] as usize] = *vertex;
        }
        self.vertices = vertices;
        for group in self.face_groups.iter_mut() {
            for triangle in group.triangles.iter_mut() {
                for index in triangle.0.iter_mut() {
                    *index = new_index[*index as usize];
                }
            }
        }
    }
}

impl Readable<Lod> for Lod {
    fn read(from: &mut dyn Buf, ctx: &mut Context) -> DecodeResult<Self> {
        let fade_distance = f32::read(from, ctx)?;
        let vertices = read_vec::<u16, Vertex>(from, ctx)?;
        let face_groups = read_vec::<u8, FaceGroup>(from, ctx)?;
        tracing::trace!(
            "lod: {} vertices, {} face groups, fade at {}",
            vertices.len(),
            face_groups.len(),
            fade_distance
        );
        Ok(Lod {
            fade_distance,
            vertices,
            face_groups,
        })
    }
}

impl Writable<Lod> for Lod {
    fn write(&self, to: &mut dyn BufMut, ctx: &Context) -> EncodeResult<()> {
        self.fade_distance.write(to, ctx)?;
        write_vec::<u16, Vertex>(&self.vertices, to, ctx, "lod vertices")?;
        write_vec::<u8, FaceGroup>(&self.face_groups, to, ctx, "lod face groups")?;
        Ok(())
    }
}

/// Position-only mesh with 32-bit counts, used by sectors, occluders and
/// mirrors.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SimpleMesh {
    pub vertices: Vec<Point3F>,
    pub faces: Vec<Triangle>,
}

impl Readable<SimpleMesh> for SimpleMesh {
    fn read(from: &mut dyn Buf, ctx: &mut Context) -> DecodeResult<Self> {
        let vertex_count = u32::read(from, ctx)? as usize;
        let face_count = u32::read(from, ctx)? as usize;
        let vertices = read_n(from, ctx, vertex_count, |from, ctx| Point3F::read(from, ctx))?;
        let faces = read_n(from, ctx, face_count, |from, ctx| Triangle::read(from, ctx))?;
        Ok(SimpleMesh { vertices, faces })
    }
}

impl Writable<SimpleMesh> for SimpleMesh {
    fn write(&self, to: &mut dyn BufMut, ctx: &Context) -> EncodeResult<()> {
        count_of::<u32>(self.vertices.len(), "mesh vertices")?.write(to, ctx)?;
        count_of::<u32>(self.faces.len(), "mesh faces")?.write(to, ctx)?;
        write_all(&self.vertices, to, ctx)?;
        write_all(&self.faces, to, ctx)?;
        Ok(())
    }
}

/// One corner of a source polygon: the source vertex it sits on plus the
/// per-corner normal and UV.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corner {
    pub vertex: u32,
    pub normal: Point3F,
    pub uv: Point2F,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceTriangle {
    pub corners: [Corner; 3],
    pub material: Option<MaterialId>,
}

/// For every source vertex, the LOD vertices it was split into.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VertexMap {
    expansions: Vec<Vec<u16>>,
}

impl VertexMap {
    pub fn new(source_vertices: usize) -> VertexMap {
        VertexMap {
            expansions: vec![vec![]; source_vertices],
        }
    }

    pub fn expansions(&self, source: usize) -> &[u16] {
        self.expansions
            .get(source)
            .map(|e| e.as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.expansions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expansions.is_empty()
    }

    fn insert(&mut self, source: usize, index: u16) {
        let entry = &mut self.expansions[source];
        if !entry.contains(&index) {
            entry.push(index);
        }
    }

    /// Follows a vertex permutation applied to the LOD.
    pub fn remap(&mut self, new_index: &[u16]) {
        for entry in self.expansions.iter_mut() {
            for index in entry.iter_mut() {
                *index = new_index[*index as usize];
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DedupedLod {
    pub lod: Lod,
    pub vertex_map: VertexMap,
}

pub const DEFAULT_QUANTIZATION: f32 = 100_000.0;

/// Builds a LOD from per-corner source data, merging corners whose
/// position, normal and UV agree after quantisation.
pub struct LodBuilder<'a> {
    positions: &'a [Point3F],
    scale: f32,
}

type VertexKey = [i64; 8];

impl<'a> LodBuilder<'a> {
    pub fn new(positions: &'a [Point3F]) -> LodBuilder<'a> {
        LodBuilder {
            positions,
            scale: DEFAULT_QUANTIZATION,
        }
    }

    /// Steps per unit used when comparing corners. Values closer to zero
    /// than one step snap to 0, others truncate toward zero.
    pub fn with_quantization(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    fn quantize(&self, value: f32) -> i64 {
        if value.abs() < 1.0 / self.scale {
            0
        } else {
            (value * self.scale) as i64
        }
    }

    fn key(&self, position: &Point3F, corner: &Corner) -> VertexKey {
        [
            self.quantize(position.x),
            self.quantize(position.y),
            self.quantize(position.z),
            self.quantize(corner.normal.x),
            self.quantize(corner.normal.y),
            self.quantize(corner.normal.z),
            self.quantize(corner.uv.x),
            self.quantize(corner.uv.y),
        ]
    }

    pub fn build(
        &self,
        fade_distance: f32,
        triangles: &[SourceTriangle],
    ) -> EncodeResult<DedupedLod> {
        let mut vertices: Vec<Vertex> = vec![];
        let mut lookup: HashMap<VertexKey, u16> = HashMap::new();
        let mut vertex_map = VertexMap::new(self.positions.len());
        let mut face_groups: Vec<FaceGroup> = vec![];

        for triangle in triangles {
            let mut indices = [0u16; 3];
            for (slot, corner) in indices.iter_mut().zip(triangle.corners.iter()) {
                let source = corner.vertex as usize;
                let position = self.positions.get(source).ok_or_else(|| {
                    EncodeError::Invalid(format!(
                        "corner refers to vertex {} but the mesh has {}",
                        source,
                        self.positions.len()
                    ))
                })?;

                let key = self.key(position, corner);
                let index = match lookup.get(&key) {
                    Some(index) => *index,
                    None => {
                        if vertices.len() >= u16::MAX as usize {
                            return Err(EncodeError::Capacity {
                                what: "lod vertices",
                                count: vertices.len() + 1,
                                limit: u16::MAX as usize,
                            });
                        }
                        let index = vertices.len() as u16;
                        vertices.push(Vertex {
                            position: *position,
                            normal: corner.normal,
                            uv: corner.uv,
                        });
                        lookup.insert(key, index);
                        index
                    }
                };
                vertex_map.insert(source, index);
                *slot = index;
            }

            let group = match face_groups
                .iter()
                .position(|g| g.material == triangle.material)
            {
                Some(group) => group,
                None => {
                    face_groups.push(FaceGroup {
                        triangles: vec![],
                        material: triangle.material,
                    });
                    face_groups.len() - 1
                }
            };
            face_groups[group].triangles.push(Triangle(indices));
        }

        count_of::<u8>(face_groups.len(), "lod face groups")?;
        for group in &face_groups {
            count_of::<u16>(group.triangles.len(), "face group triangles")?;
        }

        Ok(DedupedLod {
            lod: Lod {
                fade_distance,
                vertices,
                face_groups,
            },
            vertex_map,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corner(vertex: u32, uv: (f32, f32)) -> Corner {
        Corner {
            vertex,
            normal: Point3F::new(0.0, 0.0, 1.0),
            uv: Point2F::new(uv.0, uv.1),
        }
    }

    fn quad() -> Vec<Point3F> {
        vec![
            Point3F::new(0.0, 0.0, 0.0),
            Point3F::new(1.0, 0.0, 0.0),
            Point3F::new(1.0, 1.0, 0.0),
            Point3F::new(0.0, 1.0, 0.0),
        ]
    }

    #[test]
    fn single_triangle() {
        let positions = quad();
        let tri = SourceTriangle {
            corners: [corner(0, (0.0, 0.0)), corner(1, (1.0, 0.0)), corner(2, (1.0, 1.0))],
            material: Some(MaterialId::new(1)),
        };
        let built = LodBuilder::new(&positions).build(0.0, &[tri]).unwrap();
        assert_eq!(built.lod.vertices.len(), 3);
        assert_eq!(built.lod.face_groups.len(), 1);
        assert_eq!(built.lod.face_groups[0].triangles, vec![Triangle([0, 1, 2])]);
        assert_eq!(built.vertex_map.expansions(0), &[0]);
        assert_eq!(built.vertex_map.expansions(1), &[1]);
        assert_eq!(built.vertex_map.expansions(2), &[2]);
        assert!(built.vertex_map.expansions(3).is_empty());
    }

    #[test]
    fn shared_corners_merge_and_seams_split() {
        let positions = quad();
        let tris = [
            SourceTriangle {
                corners: [corner(0, (0.0, 0.0)), corner(1, (1.0, 0.0)), corner(2, (1.0, 1.0))],
                material: None,
            },
            SourceTriangle {
                // vertex 0 repeats with a different UV: a seam
                corners: [corner(0, (0.5, 0.5)), corner(2, (1.0, 1.0)), corner(3, (0.0, 1.0))],
                material: Some(MaterialId::new(2)),
            },
        ];
        let built = LodBuilder::new(&positions).build(10.0, &tris).unwrap();
        assert_eq!(built.lod.vertices.len(), 5);
        assert_eq!(built.vertex_map.expansions(0), &[0, 3]);
        assert_eq!(built.vertex_map.expansions(2), &[2]);
        assert_eq!(built.lod.face_groups.len(), 2);
        assert_eq!(built.lod.face_groups[0].material, None);
        assert_eq!(built.lod.face_groups[1].material, Some(MaterialId::new(2)));
        assert_eq!(built.lod.fade_distance, 10.0);
    }

    #[test]
    fn dedup_preserves_corner_data() {
        let positions = quad();
        let tris = [
            SourceTriangle {
                corners: [corner(0, (0.0, 0.0)), corner(1, (1.0, 0.0)), corner(2, (1.0, 1.0))],
                material: None,
            },
            SourceTriangle {
                corners: [corner(0, (0.0, 0.0)), corner(2, (1.0, 1.0)), corner(3, (0.0, 1.0))],
                material: None,
            },
        ];
        let built = LodBuilder::new(&positions).build(0.0, &tris).unwrap();
        let triangles = &built.lod.face_groups[0].triangles;
        for (source, built_tri) in tris.iter().zip(triangles.iter()) {
            for (corner, index) in source.corners.iter().zip(built_tri.0.iter()) {
                let v = built.lod.vertices[*index as usize];
                assert_eq!(v.position, positions[corner.vertex as usize]);
                assert_eq!(v.normal, corner.normal);
                assert_eq!(v.uv, corner.uv);
            }
        }
    }

    #[test]
    fn tiny_differences_snap_together() {
        let positions = vec![
            Point3F::new(0.000001, 0.0, 0.0),
            Point3F::new(-0.000002, 0.0, 0.0),
            Point3F::new(1.0, 0.0, 0.0),
        ];
        let tri = SourceTriangle {
            corners: [corner(0, (0.0, 0.0)), corner(1, (0.0, 0.0)), corner(2, (0.0, 0.0))],
            material: None,
        };
        let built = LodBuilder::new(&positions).build(0.0, &[tri]).unwrap();
        assert_eq!(built.lod.vertices.len(), 2);
        assert_eq!(built.lod.face_groups[0].triangles[0], Triangle([0, 0, 1]));
    }

    #[test]
    fn bad_corner_index_is_rejected() {
        let positions = quad();
        let tri = SourceTriangle {
            corners: [corner(0, (0.0, 0.0)), corner(1, (0.0, 0.0)), corner(9, (0.0, 0.0))],
            material: None,
        };
        assert!(LodBuilder::new(&positions).build(0.0, &[tri]).is_err());
    }

    #[test]
    fn triangle_winding_on_disk() {
        let ctx = Context::new();
        let mut out = vec![];
        Triangle([1, 2, 3]).write(&mut out, &ctx).unwrap();
        assert_eq!(out, vec![1, 0, 3, 0, 2, 0]);
        let mut ctx = Context::new();
        assert_eq!(
            Triangle::read(&mut &out[..], &mut ctx).unwrap(),
            Triangle([1, 2, 3])
        );
    }

    #[test]
    fn material_ids_are_range_checked() {
        let group = FaceGroup {
            triangles: vec![Triangle([0, 1, 2])],
            material: Some(MaterialId::new(3)),
        };
        let mut out = vec![];
        let ctx = Context::for_encode(2, vec![]);
        assert!(matches!(
            group.write(&mut out, &ctx),
            Err(EncodeError::MaterialOutOfRange { id: 3, count: 2 })
        ));

        let ctx = Context::for_encode(3, vec![]);
        out.clear();
        group.write(&mut out, &ctx).unwrap();
        let mut ctx = Context::new();
        ctx.material_count = 1;
        let back = FaceGroup::read(&mut &out[..], &mut ctx).unwrap();
        assert_eq!(back, group);
        assert_eq!(ctx.warnings.len(), 1);
    }

    #[test]
    fn reorder_moves_vertices_and_indices() {
        let v = |x: f32| Vertex {
            position: Point3F::new(x, 0.0, 0.0),
            normal: Point3F::new(0.0, 0.0, 1.0),
            uv: Point2F::new(0.0, 0.0),
        };
        let mut lod = Lod {
            fade_distance: 0.0,
            vertices: vec![v(0.0), v(1.0), v(2.0)],
            face_groups: vec![FaceGroup {
                triangles: vec![Triangle([0, 1, 2])],
                material: None,
            }],
        };
        lod.reorder(&[2, 0, 1]);
        assert_eq!(lod.vertices[2].position.x, 0.0);
        assert_eq!(lod.vertices[0].position.x, 1.0);
        assert_eq!(lod.face_groups[0].triangles[0], Triangle([2, 0, 1]));
    }
}
