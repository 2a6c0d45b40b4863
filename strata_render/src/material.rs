use crate::math::Vec4;
use strata_utils::color::{Hsv, hsv_to_rgb};

/// Fixed-function style surface description. Colours are RGBA.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Material {
    pub ambient: Vec4,
    pub diffuse: Vec4,
    pub specular: Vec4,
    pub emissive: Vec4,
    pub shininess: f32,
}

impl Default for Material {
    fn default() -> Self {
        Material {
            ambient: Vec4::new(0.2, 0.2, 0.2, 1.0),
            diffuse: Vec4::new(0.8, 0.8, 0.8, 1.0),
            specular: Vec4::new(0.0, 0.0, 0.0, 1.0),
            emissive: Vec4::new(0.0, 0.0, 0.0, 1.0),
            shininess: 0.0,
        }
    }
}

impl Material {
    pub fn new(ambient: Vec4, diffuse: Vec4, specular: Vec4, emissive: Vec4, shininess: f32) -> Self {
        Material {
            ambient,
            diffuse,
            specular,
            emissive,
            shininess: shininess.clamp(0.0, 128.0),
        }
    }

    /// Diffuse from `hsv`, ambient a quarter of it.
    pub fn from_hsv(hsv: Hsv) -> Self {
        let [r, g, b] = hsv_to_rgb(hsv);
        Material {
            ambient: Vec4::new(r * 0.25, g * 0.25, b * 0.25, 1.0),
            diffuse: Vec4::new(r, g, b, 1.0),
            ..Material::default()
        }
    }

    pub fn with_shininess(mut self, shininess: f32) -> Self {
        self.shininess = shininess.clamp(0.0, 128.0);
        self
    }

    pub fn with_specular(mut self, specular: Vec4) -> Self {
        self.specular = specular;
        self
    }

    pub fn with_emissive(mut self, emissive: Vec4) -> Self {
        self.emissive = emissive;
        self
    }
}
