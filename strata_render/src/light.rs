use crate::math::{Mat4, Point, Vec3, Vec4};

/// Number of light slots a frame can have enabled at once.
pub const MAX_LIGHTS: usize = 8;

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum LightKind {
    Point,
    /// Cone with half-angle `cutoff_deg` and falloff `exponent`.
    Spot { cutoff_deg: f32, exponent: f32 },
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Light {
    pub ambient: Vec4,
    pub diffuse: Vec4,
    pub specular: Vec4,
    pub position: Vec3,
    pub direction: Vec3,
    /// Constant, linear and quadratic terms.
    pub attenuation: Vec3,
    pub kind: LightKind,
}

impl Default for Light {
    fn default() -> Self {
        Light {
            ambient: Vec4::new(0.0, 0.0, 0.0, 1.0),
            diffuse: Vec4::new(1.0, 1.0, 1.0, 1.0),
            specular: Vec4::new(1.0, 1.0, 1.0, 1.0),
            position: Vec3::zeros(),
            direction: -Vec3::z(),
            attenuation: Vec3::new(1.0, 0.0, 0.0),
            kind: LightKind::Point,
        }
    }
}

impl Light {
    pub fn point(position: Vec3, diffuse: Vec4) -> Self {
        Light {
            position,
            diffuse,
            ..Light::default()
        }
    }

    pub fn spot(position: Vec3, direction: Vec3, cutoff_deg: f32, exponent: f32) -> Self {
        Light {
            position,
            direction: direction.try_normalize(f32::EPSILON).unwrap_or(-Vec3::z()),
            kind: LightKind::Spot {
                cutoff_deg: cutoff_deg.clamp(0.0, 90.0),
                exponent: exponent.clamp(0.0, 128.0),
            },
            ..Light::default()
        }
    }

    pub fn with_attenuation(mut self, constant: f32, linear: f32, quadratic: f32) -> Self {
        self.attenuation = Vec3::new(constant, linear, quadratic);
        self
    }

    /// Attenuation factor at `distance` from the light.
    pub fn falloff(&self, distance: f32) -> f32 {
        let a = self.attenuation;
        let denom = a.x + a.y * distance + a.z * distance * distance;
        if denom > 0.0 { 1.0 / denom } else { 1.0 }
    }

    /// The same light with position and direction moved by `view`.
    pub fn in_view_space(&self, view: &Mat4) -> Light {
        let position = view.transform_point(&Point::from(self.position)).coords;
        let direction = view
            .transform_vector(&self.direction)
            .try_normalize(f32::EPSILON)
            .unwrap_or(self.direction);
        Light {
            position,
            direction,
            ..*self
        }
    }
}
