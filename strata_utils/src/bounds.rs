use nalgebra::{Matrix4, Vector3, Vector4};
use std::ops::Mul;

/// AABB
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BoundingBox {
    pub min: Vector3<f32>,
    pub max: Vector3<f32>,
}

impl<F: Into<f32>> Mul<F> for BoundingBox {
    type Output = BoundingBox;

    fn mul(self, rhs: F) -> Self::Output {
        let s = rhs.into();
        let a = self.min * s;
        let b = self.max * s;
        BoundingBox {
            min: a.inf(&b),
            max: a.sup(&b),
        }
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::empty()
    }
}

impl BoundingBox {
    pub fn empty() -> Self {
        Self {
            min: Vector3::repeat(f32::INFINITY),
            max: Vector3::repeat(f32::NEG_INFINITY),
        }
    }

    pub fn from_min_max(min: Vector3<f32>, max: Vector3<f32>) -> Self {
        Self { min, max }
    }

    /// Smallest box containing every point in `points`.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Vector3<f32>>) -> Self {
        points.into_iter().fold(Self::empty(), |mut bounds, p| {
            bounds.min = bounds.min.inf(p);
            bounds.max = bounds.max.sup(p);
            bounds
        })
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn center(&self) -> Vector3<f32> {
        (self.min + self.max) * 0.5
    }

    pub fn corners(&self) -> [Vector3<f32>; 8] {
        std::array::from_fn(|i| {
            Vector3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            )
        })
    }

    /// The matrix is guaranteed to be affine
    pub fn transformed_affine(&self, transform: &Matrix4<f32>) -> Self {
        let corners = self.corners().map(|c| {
            let t = transform * Vector4::new(c.x, c.y, c.z, 1.0);
            t.xyz()
        });
        Self::from_points(&corners)
    }

    pub fn to_sphere(&self) -> BoundingSphere {
        BoundingSphere::from_corners(&self.corners())
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BoundingSphere {
    pub center: Vector3<f32>,
    pub radius: f32,
}

impl<F: Into<f32>> Mul<F> for BoundingSphere {
    type Output = BoundingSphere;

    fn mul(self, rhs: F) -> Self::Output {
        BoundingSphere {
            center: self.center,
            radius: self.radius * rhs.into(),
        }
    }
}

impl Default for BoundingSphere {
    fn default() -> Self {
        Self {
            center: Vector3::zeros(),
            radius: 1.0,
        }
    }
}

impl BoundingSphere {
    pub fn new(center: Vector3<f32>, radius: f32) -> Self {
        Self { center, radius }
    }

    pub fn transformed(&self, transform: &Matrix4<f32>) -> Self {
        let pos = transform * Vector4::new(self.center.x, self.center.y, self.center.z, 1.0);
        let w = if pos.w.abs() > f32::EPSILON {
            pos.w
        } else {
            1.0
        };

        let center = pos.xyz() / w;

        let column_length =
            |c: usize| Vector3::new(transform[(0, c)], transform[(1, c)], transform[(2, c)]).norm();
        let scale = column_length(0).max(column_length(1)).max(column_length(2));

        Self {
            center,
            radius: self.radius * scale,
        }
    }

    pub fn from_corners(corners: &[Vector3<f32>; 8]) -> Self {
        let finite: Vec<&Vector3<f32>> = corners
            .iter()
            .filter(|c| c.iter().all(|v| v.is_finite()))
            .collect();
        if finite.is_empty() {
            return BoundingSphere::default();
        }

        let center = finite
            .iter()
            .fold(Vector3::zeros(), |acc: Vector3<f32>, c| acc + **c)
            / finite.len() as f32;

        let radius = finite
            .iter()
            .map(|c| (**c - center).norm())
            .fold(0.0f32, f32::max);

        Self {
            center,
            radius: if radius.is_finite() { radius } else { 1.0 },
        }
    }
}
