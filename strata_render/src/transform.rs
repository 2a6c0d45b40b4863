use crate::error::{Result, StateStackUnderflowErr};
use crate::math::{Mat4, Unit, Vec3};
use snafu::OptionExt;

/// CPU copy of the model matrix stack.
///
/// The backend only ever sees the result through the model-view matrix uploaded with each draw,
/// so the model transform can be queried here without any readback.
#[derive(Debug, Clone)]
pub struct MatrixStack {
    current: Mat4,
    saved: Vec<Mat4>,
}

impl Default for MatrixStack {
    fn default() -> Self {
        Self::new()
    }
}

impl MatrixStack {
    pub fn new() -> Self {
        Self {
            current: Mat4::identity(),
            saved: Vec::new(),
        }
    }

    pub fn push(&mut self) {
        self.saved.push(self.current);
    }

    pub fn pop(&mut self) -> Result<()> {
        self.current = self
            .saved
            .pop()
            .context(StateStackUnderflowErr { stack: "matrix" })?;
        Ok(())
    }

    pub fn load_identity(&mut self) {
        self.current = Mat4::identity();
    }

    pub fn load(&mut self, matrix: Mat4) {
        self.current = matrix;
    }

    /// Post-multiplies, so `matrix` applies to vertices before everything already on the stack.
    pub fn multiply(&mut self, matrix: &Mat4) {
        self.current *= matrix;
    }

    pub fn translate(&mut self, offset: Vec3) {
        self.multiply(&Mat4::new_translation(&offset));
    }

    /// Rotates by `angle_deg` degrees around `axis`. A zero axis leaves the matrix untouched.
    pub fn rotate(&mut self, angle_deg: f32, axis: Vec3) {
        let Some(axis) = Unit::try_new(axis, f32::EPSILON) else {
            return;
        };
        let rotation = Mat4::from_axis_angle(&axis, angle_deg.to_radians());
        self.multiply(&rotation);
    }

    pub fn scale(&mut self, factors: Vec3) {
        self.multiply(&Mat4::new_nonuniform_scaling(&factors));
    }

    pub fn current(&self) -> &Mat4 {
        &self.current
    }

    pub fn depth(&self) -> usize {
        self.saved.len()
    }
}
