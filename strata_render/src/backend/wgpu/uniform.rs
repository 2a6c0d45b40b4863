use crate::light::{Light, LightKind, MAX_LIGHTS};
use crate::material::Material;
use crate::math::{Mat4, mat4_to_cols};
use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;

/// Maps GL clip depth `[-w, w]` to wgpu's `[0, w]`.
#[rustfmt::skip]
fn depth_correction() -> Mat4 {
    Mat4::new(
        1.0, 0.0, 0.0, 0.0,
        0.0, 1.0, 0.0, 0.0,
        0.0, 0.0, 0.5, 0.5,
        0.0, 0.0, 0.0, 1.0,
    )
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub(super) struct LightUniform {
    ambient: [f32; 4],
    diffuse: [f32; 4],
    specular: [f32; 4],
    position: [f32; 4],
    direction: [f32; 4],
    attenuation: [f32; 4],
    spot: [f32; 4],
}

impl From<&Light> for LightUniform {
    fn from(light: &Light) -> Self {
        let (is_spot, cos_cutoff, exponent) = match light.kind {
            LightKind::Point => (0.0, -1.0, 0.0),
            LightKind::Spot {
                cutoff_deg,
                exponent,
            } => (1.0, cutoff_deg.to_radians().cos(), exponent),
        };
        let a = light.attenuation;
        LightUniform {
            ambient: light.ambient.into(),
            diffuse: light.diffuse.into(),
            specular: light.specular.into(),
            position: light.position.push(1.0).into(),
            direction: light.direction.push(0.0).into(),
            attenuation: [a.x, a.y, a.z, 0.0],
            spot: [1.0, is_spot, cos_cutoff, exponent],
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub(super) struct DrawUniform {
    projection: [[f32; 4]; 4],
    model_view: [[f32; 4]; 4],
    ambient: [f32; 4],
    diffuse: [f32; 4],
    specular: [f32; 4],
    emissive: [f32; 4],
    flags: [f32; 4],
    lights: [LightUniform; MAX_LIGHTS],
}

const_assert_eq!(size_of::<LightUniform>(), 112);
const_assert_eq!(size_of::<DrawUniform>(), 1104);

/// Fixed-function state captured at draw time.
#[derive(Debug, Clone)]
pub(super) struct FixedState {
    pub projection: Mat4,
    pub model_view: Mat4,
    pub material: Material,
    pub lights: [Option<LightUniform>; MAX_LIGHTS],
}

impl Default for FixedState {
    fn default() -> Self {
        FixedState {
            projection: Mat4::identity(),
            model_view: Mat4::identity(),
            material: Material::default(),
            lights: [None; MAX_LIGHTS],
        }
    }
}

impl FixedState {
    pub fn uniform(&self, use_normal: bool, use_color: bool, use_texture: bool) -> DrawUniform {
        let flag = |on: bool| if on { 1.0 } else { 0.0 };
        let m = &self.material;
        DrawUniform {
            projection: mat4_to_cols(&(depth_correction() * self.projection)),
            model_view: mat4_to_cols(&self.model_view),
            ambient: m.ambient.into(),
            diffuse: m.diffuse.into(),
            specular: m.specular.into(),
            emissive: m.emissive.into(),
            flags: [m.shininess, flag(use_normal), flag(use_color), flag(use_texture)],
            lights: self.lights.map(|l| l.unwrap_or_else(LightUniform::zeroed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{Perspective3, Vec3, Vec4};

    #[test]
    fn depth_correction_maps_near_and_far() {
        let projection = Perspective3::new(1.0, 1.0, 1.0, 10.0).to_homogeneous();
        let corrected = depth_correction() * projection;

        let near = corrected * Vec4::new(0.0, 0.0, -1.0, 1.0);
        let far = corrected * Vec4::new(0.0, 0.0, -10.0, 1.0);
        assert!((near.z / near.w).abs() < 1e-5);
        assert!((far.z / far.w - 1.0).abs() < 1e-5);
    }

    #[test]
    fn disabled_lights_are_zeroed() {
        let mut state = FixedState::default();
        state.lights[2] = Some(LightUniform::from(&Light::spot(
            Vec3::zeros(),
            -Vec3::z(),
            60.0,
            2.0,
        )));

        let uniform = state.uniform(true, false, false);
        assert_eq!(uniform.lights[0].spot, [0.0; 4]);
        assert_eq!(uniform.lights[2].spot[0], 1.0);
        assert_eq!(uniform.lights[2].spot[1], 1.0);
        assert!((uniform.lights[2].spot[2] - 0.5).abs() < 1e-6);
        assert_eq!(uniform.flags[1], 1.0);
    }
}
