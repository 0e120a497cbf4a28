use crate::coords::AxisSwap;
use crate::error::*;
use crate::io::*;
use bytes::{Buf, BufMut};
use cgmath::{InnerSpace, Matrix, Matrix3, Matrix4, Quaternion, SquareMatrix, Vector2, Vector3};
use fds_derive::{Readable, Writable};
use typed_ints::TypedInt;

pub type Point2F = Vector2<f32>;

pub type Point3F = Vector3<f32>;

pub type QuatF = Quaternion<f32>;

pub type MatrixF = Matrix4<f32>;

typed_int!(FrameId, _FrameId, u16);
typed_int!(NodeIndex, _NodeIndex, usize);
typed_int!(BoneId, _BoneId, u32);
typed_int!(SkinBoneIndex, _SkinBoneIndex, usize);
typed_int!(MaterialId, _MaterialId, u16);

#[derive(Debug, Readable, Writable, Clone, Copy, PartialEq)]
pub struct BoxF {
    pub min: Point3F,
    pub max: Point3F,
}

#[derive(Debug, Readable, Writable, Clone, Copy, PartialEq, Default)]
pub struct ColorF {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

/// The 3 columns by 4 rows matrix stored with every joint, in model axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointMatrix {
    pub rows: [[f32; 3]; 4],
}

/// Translation, non-uniform scale and rotation relative to the parent.
#[derive(Debug, Clone, Copy, PartialEq, Readable, Writable)]
pub struct Transform {
    pub position: Point3F,
    pub scale: Point3F,
    pub rotation: QuatF,
}

impl BoxF {
    pub fn zero() -> BoxF {
        BoxF {
            min: Point3F::new(0.0, 0.0, 0.0),
            max: Point3F::new(0.0, 0.0, 0.0),
        }
    }

    pub fn center(&self) -> Point3F {
        (self.min + self.max) / 2.0
    }

    pub fn extent(&self) -> Point3F {
        self.max - self.min
    }

    pub fn union_point(&self, other: &Point3F) -> BoxF {
        BoxF {
            min: Vector3 {
                x: self.min.x.min(other.x),
                y: self.min.y.min(other.y),
                z: self.min.z.min(other.z),
            },
            max: Vector3 {
                x: self.max.x.max(other.x),
                y: self.max.y.max(other.y),
                z: self.max.z.max(other.z),
            },
        }
    }

    pub fn contains(&self, point: &Point3F) -> bool {
        point.x >= self.min.x
            && point.y >= self.min.y
            && point.z >= self.min.z
            && point.x <= self.max.x
            && point.y <= self.max.y
            && point.z <= self.max.z
    }

    /// Bounds of a point set; an empty set gives the zero box.
    pub fn from_vertices<'a, I>(vertices: I) -> Self
    where
        I: IntoIterator<Item = &'a Point3F>,
    {
        let mut iter = vertices.into_iter();
        match iter.next() {
            None => BoxF::zero(),
            Some(first) => iter.fold(
                BoxF {
                    min: *first,
                    max: *first,
                },
                |b, v| b.union_point(v),
            ),
        }
    }
}

impl Transform {
    pub fn identity() -> Transform {
        Transform {
            position: Point3F::new(0.0, 0.0, 0.0),
            scale: Point3F::new(1.0, 1.0, 1.0),
            rotation: QuatF::new(1.0, 0.0, 0.0, 0.0),
        }
    }

    /// Translation * rotation * scale.
    pub fn matrix(&self) -> MatrixF {
        MatrixF::from_translation(self.position)
            * MatrixF::from(self.rotation)
            * MatrixF::from_nonuniform_scale(self.scale.x, self.scale.y, self.scale.z)
    }

    /// Splits an affine matrix back into translation, rotation and scale.
    /// Shear is lost. A mirrored basis is reported as a negative X scale.
    pub fn from_matrix(m: &MatrixF) -> Transform {
        let columns = [m.x.truncate(), m.y.truncate(), m.z.truncate()];
        let mut scale = Point3F::new(
            columns[0].magnitude(),
            columns[1].magnitude(),
            columns[2].magnitude(),
        );
        if Matrix3::from_cols(columns[0], columns[1], columns[2]).determinant() < 0.0 {
            scale.x = -scale.x;
        }
        let unit = |column: Point3F, length: f32| {
            if length == 0.0 {
                column
            } else {
                column / length
            }
        };
        let basis = Matrix3::from_cols(
            unit(columns[0], scale.x),
            unit(columns[1], scale.y),
            unit(columns[2], scale.z),
        );
        Transform {
            position: m.w.truncate(),
            scale,
            rotation: Quaternion::from(basis).normalize(),
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Transform::identity()
    }
}

impl JointMatrix {
    pub fn from_matrix(m: &MatrixF) -> JointMatrix {
        // cgmath indexes column first
        let mut rows = [[0.0f32; 3]; 4];
        for (r, row) in rows.iter_mut().enumerate() {
            for (c, value) in row.iter_mut().enumerate() {
                *value = m[c][r];
            }
        }
        JointMatrix { rows }
    }
}

impl Readable<Point2F> for Point2F {
    fn read(from: &mut dyn Buf, ctx: &mut Context) -> DecodeResult<Self> {
        Ok(Point2F {
            x: f32::read(from, ctx)?,
            y: f32::read(from, ctx)?,
        })
    }
}

impl Writable<Point2F> for Point2F {
    fn write(&self, to: &mut dyn BufMut, ctx: &Context) -> EncodeResult<()> {
        self.x.write(to, ctx)?;
        self.y.write(to, ctx)?;
        Ok(())
    }
}

// Points are converted to model axes as they are read and back as they are
// written, so nothing above this layer sees file axes.
impl Readable<Point3F> for Point3F {
    fn read(from: &mut dyn Buf, ctx: &mut Context) -> DecodeResult<Self> {
        let file = Point3F {
            x: f32::read(from, ctx)?,
            y: f32::read(from, ctx)?,
            z: f32::read(from, ctx)?,
        };
        Ok(file.swap_axes())
    }
}

impl Writable<Point3F> for Point3F {
    fn write(&self, to: &mut dyn BufMut, ctx: &Context) -> EncodeResult<()> {
        let file = self.swap_axes();
        file.x.write(to, ctx)?;
        file.y.write(to, ctx)?;
        file.z.write(to, ctx)?;
        Ok(())
    }
}

impl Readable<QuatF> for QuatF {
    fn read(from: &mut dyn Buf, ctx: &mut Context) -> DecodeResult<Self> {
        let file = QuatF::new(
            f32::read(from, ctx)?,
            f32::read(from, ctx)?,
            f32::read(from, ctx)?,
            f32::read(from, ctx)?,
        );
        Ok(file.swap_axes())
    }
}

impl Writable<QuatF> for QuatF {
    fn write(&self, to: &mut dyn BufMut, ctx: &Context) -> EncodeResult<()> {
        let file = self.swap_axes();
        file.s.write(to, ctx)?;
        file.v.x.write(to, ctx)?;
        file.v.y.write(to, ctx)?;
        file.v.z.write(to, ctx)?;
        Ok(())
    }
}

// 4x4 matrices are row-major on disk and are not axis converted.
impl Readable<MatrixF> for MatrixF {
    fn read(from: &mut dyn Buf, ctx: &mut Context) -> DecodeResult<MatrixF> {
        let mut values = [0.0f32; 16];
        for value in values.iter_mut() {
            *value = f32::read(from, ctx)?;
        }
        let m = MatrixF::new(
            values[0], values[1], values[2], values[3], values[4], values[5], values[6],
            values[7], values[8], values[9], values[10], values[11], values[12], values[13],
            values[14], values[15],
        );
        Ok(m.transpose())
    }
}

impl Writable<MatrixF> for MatrixF {
    fn write(&self, to: &mut dyn BufMut, ctx: &Context) -> EncodeResult<()> {
        let rows = self.transpose();
        for column in [rows.x, rows.y, rows.z, rows.w].iter() {
            column.x.write(to, ctx)?;
            column.y.write(to, ctx)?;
            column.z.write(to, ctx)?;
            column.w.write(to, ctx)?;
        }
        Ok(())
    }
}

impl Readable<JointMatrix> for JointMatrix {
    fn read(from: &mut dyn Buf, ctx: &mut Context) -> DecodeResult<Self> {
        let mut rows = [[0.0f32; 3]; 4];
        for row in rows.iter_mut() {
            for value in row.iter_mut() {
                *value = f32::read(from, ctx)?;
            }
        }
        Ok(JointMatrix { rows }.swap_axes())
    }
}

impl Writable<JointMatrix> for JointMatrix {
    fn write(&self, to: &mut dyn BufMut, ctx: &Context) -> EncodeResult<()> {
        for row in self.swap_axes().rows.iter() {
            for value in row.iter() {
                value.write(to, ctx)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{AbsDiffEq, Deg, Rotation3};

    #[test]
    fn transform_survives_matrix_round_trip() {
        let transform = Transform {
            position: Point3F::new(1.0, -2.0, 0.5),
            scale: Point3F::new(2.0, 1.0, 0.5),
            rotation: QuatF::from_angle_z(Deg(30.0)),
        };
        let back = Transform::from_matrix(&transform.matrix());
        assert!(back.position.abs_diff_eq(&transform.position, 1e-5));
        assert!(back.scale.abs_diff_eq(&transform.scale, 1e-5));
        assert!(back.matrix().abs_diff_eq(&transform.matrix(), 1e-5));
    }

    #[test]
    fn points_are_swapped_on_disk() {
        let ctx = Context::new();
        let mut out = vec![];
        Point3F::new(1.0, 2.0, 3.0).write(&mut out, &ctx).unwrap();
        let mut file: &[u8] = &out;
        let mut raw = vec![];
        while file.remaining() > 0 {
            raw.push(file.get_f32_le());
        }
        assert_eq!(raw, vec![1.0, 3.0, 2.0]);

        let mut ctx = Context::new();
        let back = Point3F::read(&mut &out[..], &mut ctx).unwrap();
        assert_eq!(back, Point3F::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn quaternion_is_w_x_z_y_on_disk() {
        let ctx = Context::new();
        let mut out = vec![];
        QuatF::new(1.0, 2.0, 3.0, 4.0).write(&mut out, &ctx).unwrap();
        let mut file: &[u8] = &out;
        let raw = (0..4).map(|_| file.get_f32_le()).collect::<Vec<_>>();
        assert_eq!(raw, vec![1.0, 2.0, 4.0, 3.0]);
    }

    #[test]
    fn matrices_are_row_major() {
        let ctx = Context::new();
        let mut out = vec![];
        let m = MatrixF::from_translation(Point3F::new(5.0, 6.0, 7.0));
        m.write(&mut out, &ctx).unwrap();
        let mut file: &[u8] = &out;
        let raw = (0..16).map(|_| file.get_f32_le()).collect::<Vec<_>>();
        assert_eq!(raw[3], 5.0);
        assert_eq!(raw[7], 6.0);
        assert_eq!(raw[11], 7.0);

        let mut ctx = Context::new();
        let back = MatrixF::read(&mut &out[..], &mut ctx).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn joint_matrix_reads_model_rows() {
        let m = JointMatrix::from_matrix(&MatrixF::identity());
        assert_eq!(m.rows[0], [1.0, 0.0, 0.0]);
        assert_eq!(m.rows[1], [0.0, 1.0, 0.0]);
        assert_eq!(m.rows[3], [0.0, 0.0, 0.0]);

        let ctx = Context::new();
        let mut out = vec![];
        m.write(&mut out, &ctx).unwrap();
        let mut file: &[u8] = &out;
        let raw = (0..12).map(|_| file.get_f32_le()).collect::<Vec<_>>();
        assert_eq!(&raw[3..6], &[0.0, 0.0, 1.0]);

        let mut ctx = Context::new();
        assert_eq!(JointMatrix::read(&mut &out[..], &mut ctx).unwrap(), m);
    }

    #[test]
    fn bounds_of_points() {
        let points = [
            Point3F::new(1.0, -1.0, 0.0),
            Point3F::new(-2.0, 4.0, 3.0),
        ];
        let b = BoxF::from_vertices(points.iter());
        assert_eq!(b.min, Point3F::new(-2.0, -1.0, 0.0));
        assert_eq!(b.max, Point3F::new(1.0, 4.0, 3.0));
        assert!(b.contains(&Point3F::new(0.0, 0.0, 1.0)));
        assert_eq!(BoxF::from_vertices(std::iter::empty()), BoxF::zero());
    }

    #[test]
    fn transform_composes_trs() {
        let t = Transform {
            position: Point3F::new(1.0, 0.0, 0.0),
            scale: Point3F::new(2.0, 2.0, 2.0),
            rotation: QuatF::new(1.0, 0.0, 0.0, 0.0),
        };
        let p = t.matrix() * cgmath::Vector4::new(1.0, 1.0, 1.0, 1.0);
        assert_eq!(p, cgmath::Vector4::new(3.0, 2.0, 2.0, 1.0));
    }
}
