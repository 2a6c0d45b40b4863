pub use ::nalgebra;
pub use ::nalgebra::{Matrix4, Orthographic3, Perspective3, Point3, Rotation3, Unit};
pub use ::nalgebra::{Vector2, Vector3, Vector4};

pub type Mat4 = Matrix4<f32>;
pub type Vec2 = Vector2<f32>;
pub type Vec3 = Vector3<f32>;
pub type Vec4 = Vector4<f32>;
pub type Point = Point3<f32>;

/// Column-major array layout, as uploaded to uniform buffers.
pub fn mat4_to_cols(m: &Mat4) -> [[f32; 4]; 4] {
    (*m).into()
}
