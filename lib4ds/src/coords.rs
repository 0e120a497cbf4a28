//! Conversion between the file's axis convention and the model's.
//!
//! The file stores the model's Z in its second component and the model's Y
//! in its third. Every conversion here is its own inverse, so the same call
//! is used on the way in and on the way out.

use crate::types::*;

pub trait AxisSwap {
    fn swap_axes(&self) -> Self;
}

/// Matrix that exchanges the Y and Z axes. Symmetric and its own inverse.
pub fn axis_swap_matrix() -> MatrixF {
    MatrixF::new(
        1.0, 0.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    )
}

impl AxisSwap for Point3F {
    fn swap_axes(&self) -> Self {
        Point3F::new(self.x, self.z, self.y)
    }
}

impl AxisSwap for QuatF {
    fn swap_axes(&self) -> Self {
        QuatF::new(self.s, self.v.x, self.v.z, self.v.y)
    }
}

impl AxisSwap for BoxF {
    fn swap_axes(&self) -> Self {
        BoxF {
            min: self.min.swap_axes(),
            max: self.max.swap_axes(),
        }
    }
}

impl AxisSwap for JointMatrix {
    fn swap_axes(&self) -> Self {
        let mut rows = self.rows;
        rows.swap(1, 2);
        JointMatrix { rows }
    }
}
