use crate::error::*;
use crate::geometry::SimpleMesh;
use crate::io::*;
use crate::types::*;
use bytes::{Buf, BufMut};
use fds_derive::{Readable, Writable};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PortalFlags: u32 {
        const ENABLED = 1 << 2;

        const _ = !0;
    }
}

flags_codec!(PortalFlags, u32);

#[derive(Debug, Clone, Copy, PartialEq, Readable, Writable)]
pub struct PlaneF {
    pub normal: Point3F,
    pub distance: f32,
}

/// A convex opening between two sectors.
#[derive(Debug, Clone, PartialEq)]
pub struct Portal {
    pub flags: PortalFlags,
    pub near: f32,
    pub far: f32,
    pub plane: PlaneF,
    pub vertices: Vec<Point3F>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sector {
    pub flags1: u32,
    pub flags2: u32,
    pub mesh: SimpleMesh,
    pub bounds: BoxF,
    pub portals: Vec<Portal>,
}

impl Portal {
    pub const DEFAULT_FLAGS: u32 = 4;
    pub const DEFAULT_NEAR: f32 = 0.0;
    pub const DEFAULT_FAR: f32 = 100.0;

    /// A portal with the engine's usual settings, its plane taken from the
    /// first three vertices.
    pub fn new(vertices: Vec<Point3F>) -> Portal {
        use cgmath::InnerSpace;

        let plane = match vertices.as_slice() {
            [a, b, c, ..] => {
                let normal = (b - a).cross(c - a);
                if normal.magnitude2() > 0.0 {
                    let normal = normal.normalize();
                    PlaneF {
                        normal,
                        distance: -normal.dot(*a),
                    }
                } else {
                    PlaneF {
                        normal,
                        distance: 0.0,
                    }
                }
            }
            _ => PlaneF {
                normal: Point3F::new(0.0, 0.0, 0.0),
                distance: 0.0,
            },
        };
        Portal {
            flags: PortalFlags::from_bits_retain(Portal::DEFAULT_FLAGS),
            near: Portal::DEFAULT_NEAR,
            far: Portal::DEFAULT_FAR,
            plane,
            vertices,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.flags.contains(PortalFlags::ENABLED)
    }
}

impl Sector {
    pub const DEFAULT_FLAGS: (u32, u32) = (2049, 0);

    pub fn new(mesh: SimpleMesh) -> Sector {
        let bounds = BoxF::from_vertices(mesh.vertices.iter());
        Sector {
            flags1: Sector::DEFAULT_FLAGS.0,
            flags2: Sector::DEFAULT_FLAGS.1,
            mesh,
            bounds,
            portals: vec![],
        }
    }
}

impl Readable<Portal> for Portal {
    fn read(from: &mut dyn Buf, ctx: &mut Context) -> DecodeResult<Self> {
        let vertex_count = u8::read(from, ctx)? as usize;
        let flags = PortalFlags::read(from, ctx)?;
        let near = f32::read(from, ctx)?;
        let far = f32::read(from, ctx)?;
        let plane = PlaneF::read(from, ctx)?;
        let vertices = read_n(from, ctx, vertex_count, |from, ctx| Point3F::read(from, ctx))?;
        Ok(Portal {
            flags,
            near,
            far,
            plane,
            vertices,
        })
    }
}

impl Writable<Portal> for Portal {
    fn write(&self, to: &mut dyn BufMut, ctx: &Context) -> EncodeResult<()> {
        count_of::<u8>(self.vertices.len(), "portal vertices")?.write(to, ctx)?;
        self.flags.write(to, ctx)?;
        self.near.write(to, ctx)?;
        self.far.write(to, ctx)?;
        self.plane.write(to, ctx)?;
        write_all(&self.vertices, to, ctx)?;
        Ok(())
    }
}

impl Readable<Sector> for Sector {
    fn read(from: &mut dyn Buf, ctx: &mut Context) -> DecodeResult<Self> {
        let flags1 = u32::read(from, ctx)?;
        let flags2 = u32::read(from, ctx)?;
        let mesh = SimpleMesh::read(from, ctx)?;
        let bounds = BoxF::read(from, ctx)?;
        let portals = read_vec::<u8, Portal>(from, ctx)?;
        Ok(Sector {
            flags1,
            flags2,
            mesh,
            bounds,
            portals,
        })
    }
}

impl Writable<Sector> for Sector {
    fn write(&self, to: &mut dyn BufMut, ctx: &Context) -> EncodeResult<()> {
        self.flags1.write(to, ctx)?;
        self.flags2.write(to, ctx)?;
        self.mesh.write(to, ctx)?;
        self.bounds.write(to, ctx)?;
        write_vec::<u8, Portal>(&self.portals, to, ctx, "sector portals")?;
        Ok(())
    }
}
