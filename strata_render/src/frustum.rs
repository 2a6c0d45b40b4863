use crate::math::{Mat4, Vec3, Vec4};
use strata_utils::{BoundingBox, BoundingSphere};
use tracing::instrument;

/// Plane in Hessian normal form. The normal points into the frustum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrustumPlane {
    normal: Vec3,
    d: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrustumParams {
    /// Vertical field of view in degrees.
    pub fov_deg: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraBasis {
    pub position: Vec3,
    pub direction: Vec3,
    pub up: Vec3,
}

impl Default for CameraBasis {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            direction: -Vec3::z(),
            up: Vec3::y(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    planes: [FrustumPlane; 6],
    params: Option<FrustumParams>,
    basis: CameraBasis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrustumSide {
    Left,
    Right,
    Bottom,
    Top,
    Near,
    Far,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Outside,
    Intersecting,
    Inside,
}

impl FrustumPlane {
    fn through(point: Vec3, normal: Vec3) -> Self {
        let normal = normal.normalize();
        FrustumPlane {
            normal,
            d: -normal.dot(&point),
        }
    }

    pub fn normal(&self) -> Vec3 {
        self.normal
    }

    pub fn distance(&self, point: &Vec3) -> f32 {
        self.normal.dot(point) + self.d
    }

    pub fn distance_to(&self, sphere: &BoundingSphere) -> f32 {
        self.distance(&sphere.center)
    }
}

impl Frustum {
    /// Builds the frustum for a camera at the origin looking down `-z`.
    pub fn new(fov_deg: f32, aspect: f32, near: f32, far: f32) -> Self {
        let params = FrustumParams {
            fov_deg,
            aspect,
            near,
            far,
        };
        let basis = CameraBasis::default();
        Frustum {
            planes: Self::planes_from(&params, &basis),
            params: Some(params),
            basis,
        }
    }

    /// Extracts the planes of a combined projection * view matrix.
    ///
    /// The result has no projection parameters, so [`Frustum::set_camera`] only records the basis.
    #[instrument(skip_all)]
    pub fn from_matrix(m: &Mat4) -> Self {
        let row = |i: usize| -> Vec4 { m.row(i).transpose() };
        let (row0, row1, row2, row3) = (row(0), row(1), row(2), row(3));

        let plane_from = |v: Vec4| {
            let normal = Vec3::new(v.x, v.y, v.z);
            let len = normal.norm();
            if len > 0.0 {
                FrustumPlane {
                    normal: normal / len,
                    d: v.w / len,
                }
            } else {
                FrustumPlane { normal, d: v.w }
            }
        };

        let planes = [
            plane_from(row3 + row0), // left
            plane_from(row3 - row0), // right
            plane_from(row3 + row1), // bottom
            plane_from(row3 - row1), // top
            plane_from(row3 + row2), // near
            plane_from(row3 - row2), // far
        ];

        Frustum {
            planes,
            params: None,
            basis: CameraBasis::default(),
        }
    }

    pub fn set_projection(&mut self, fov_deg: f32, aspect: f32, near: f32, far: f32) {
        let params = FrustumParams {
            fov_deg,
            aspect,
            near,
            far,
        };
        self.planes = Self::planes_from(&params, &self.basis);
        self.params = Some(params);
    }

    /// Moves the apex to `position`, looking at `target`.
    pub fn set_camera(&mut self, position: Vec3, target: Vec3, up: Vec3) {
        let direction = (target - position).try_normalize(f32::EPSILON).unwrap_or(-Vec3::z());
        self.basis = CameraBasis {
            position,
            direction,
            up,
        };
        if let Some(params) = &self.params {
            self.planes = Self::planes_from(params, &self.basis);
        }
    }

    fn planes_from(params: &FrustumParams, basis: &CameraBasis) -> [FrustumPlane; 6] {
        let p = basis.position;
        let z = -basis.direction;
        let x = basis
            .up
            .cross(&z)
            .try_normalize(f32::EPSILON)
            .unwrap_or_else(Vec3::x);
        let y = z.cross(&x);

        let half_h = (params.fov_deg.to_radians() * 0.5).tan() * params.near;
        let half_w = half_h * params.aspect;

        let near_center = p - z * params.near;
        let far_center = p - z * params.far;

        let top = near_center + y * half_h;
        let bottom = near_center - y * half_h;
        let left = near_center - x * half_w;
        let right = near_center + x * half_w;

        let towards = |point: Vec3| (point - p).normalize();

        [
            FrustumPlane::through(left, towards(left).cross(&y)),
            FrustumPlane::through(right, y.cross(&towards(right))),
            FrustumPlane::through(bottom, x.cross(&towards(bottom))),
            FrustumPlane::through(top, towards(top).cross(&x)),
            FrustumPlane::through(near_center, -z),
            FrustumPlane::through(far_center, z),
        ]
    }

    pub fn side(&self, side: FrustumSide) -> &FrustumPlane {
        match side {
            FrustumSide::Left => &self.planes[0],
            FrustumSide::Right => &self.planes[1],
            FrustumSide::Bottom => &self.planes[2],
            FrustumSide::Top => &self.planes[3],
            FrustumSide::Near => &self.planes[4],
            FrustumSide::Far => &self.planes[5],
        }
    }

    pub fn params(&self) -> Option<&FrustumParams> {
        self.params.as_ref()
    }

    pub fn basis(&self) -> &CameraBasis {
        &self.basis
    }

    pub fn point(&self, point: &Vec3) -> Visibility {
        if self.planes.iter().any(|p| p.distance(point) < 0.0) {
            Visibility::Outside
        } else {
            Visibility::Inside
        }
    }

    pub fn sphere(&self, sphere: &BoundingSphere) -> Visibility {
        let mut result = Visibility::Inside;
        for plane in &self.planes {
            let distance = plane.distance_to(sphere);
            if distance < -sphere.radius {
                return Visibility::Outside;
            }
            if distance < sphere.radius {
                result = Visibility::Intersecting;
            }
        }
        result
    }

    /// Tests the box corner furthest along each plane normal, then the nearest one.
    pub fn aabb(&self, bounds: &BoundingBox) -> Visibility {
        let mut result = Visibility::Inside;
        for plane in &self.planes {
            let n = plane.normal;
            let pick = |positive: bool, axis: usize| {
                if positive {
                    bounds.max[axis]
                } else {
                    bounds.min[axis]
                }
            };
            let positive = Vec3::new(
                pick(n.x >= 0.0, 0),
                pick(n.y >= 0.0, 1),
                pick(n.z >= 0.0, 2),
            );
            let negative = Vec3::new(
                pick(n.x < 0.0, 0),
                pick(n.y < 0.0, 1),
                pick(n.z < 0.0, 2),
            );

            if plane.distance(&positive) < 0.0 {
                return Visibility::Outside;
            }
            if plane.distance(&negative) < 0.0 {
                result = Visibility::Intersecting;
            }
        }
        result
    }

    #[instrument(skip_all)]
    pub fn intersects_sphere(&self, sphere: &BoundingSphere) -> bool {
        self.planes
            .iter()
            .all(|p| p.distance_to(sphere) >= -sphere.radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{Perspective3, Point};

    fn frustum() -> Frustum {
        Frustum::new(60.0, 4.0 / 3.0, 0.1, 100.0)
    }

    #[test]
    fn points_in_front_are_inside() {
        let f = frustum();
        assert_eq!(f.point(&Vec3::new(0.0, 0.0, -10.0)), Visibility::Inside);
        assert_eq!(f.point(&Vec3::new(0.0, 0.0, 10.0)), Visibility::Outside);
        assert_eq!(f.point(&Vec3::new(0.0, 0.0, -200.0)), Visibility::Outside);
        assert_eq!(f.point(&Vec3::new(50.0, 0.0, -10.0)), Visibility::Outside);
        assert_eq!(f.point(&Vec3::new(0.0, -50.0, -10.0)), Visibility::Outside);
    }

    #[test]
    fn spheres_report_intersection_on_boundary() {
        let f = frustum();
        let inside = BoundingSphere::new(Vec3::new(0.0, 0.0, -20.0), 1.0);
        let crossing_far = BoundingSphere::new(Vec3::new(0.0, 0.0, -100.0), 5.0);
        let behind = BoundingSphere::new(Vec3::new(0.0, 0.0, 20.0), 1.0);

        assert_eq!(f.sphere(&inside), Visibility::Inside);
        assert_eq!(f.sphere(&crossing_far), Visibility::Intersecting);
        assert_eq!(f.sphere(&behind), Visibility::Outside);
        assert!(f.intersects_sphere(&crossing_far));
        assert!(!f.intersects_sphere(&behind));
    }

    #[test]
    fn boxes_use_positive_and_negative_vertices() {
        let f = frustum();
        let inside = BoundingBox::from_min_max(Vec3::new(-1.0, -1.0, -11.0), Vec3::new(1.0, 1.0, -9.0));
        let straddling =
            BoundingBox::from_min_max(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(1.0, 1.0, 1.0));
        let outside =
            BoundingBox::from_min_max(Vec3::new(-1.0, -1.0, 5.0), Vec3::new(1.0, 1.0, 6.0));

        assert_eq!(f.aabb(&inside), Visibility::Inside);
        assert_eq!(f.aabb(&straddling), Visibility::Intersecting);
        assert_eq!(f.aabb(&outside), Visibility::Outside);
    }

    #[test]
    fn camera_moves_the_apex() {
        let mut f = frustum();
        f.set_camera(Vec3::new(0.0, 0.0, 50.0), Vec3::new(0.0, 0.0, 60.0), Vec3::y());

        assert_eq!(f.point(&Vec3::new(0.0, 0.0, 70.0)), Visibility::Inside);
        assert_eq!(f.point(&Vec3::new(0.0, 0.0, -10.0)), Visibility::Outside);
        assert_eq!(f.basis().position, Vec3::new(0.0, 0.0, 50.0));
        assert_eq!(f.basis().direction, Vec3::z());
    }

    #[test]
    fn geometric_planes_agree_with_projection_matrix() {
        let geometric = frustum();
        let projection = Perspective3::new(4.0 / 3.0, 60f32.to_radians(), 0.1, 100.0);
        let extracted = Frustum::from_matrix(projection.as_matrix());

        let samples = [
            Point::new(0.0, 0.0, -5.0),
            Point::new(3.0, 2.0, -5.0),
            Point::new(-4.0, 0.0, -5.0),
            Point::new(0.0, 3.5, -5.0),
            Point::new(0.0, 0.0, -99.0),
            Point::new(0.0, 0.0, -101.0),
        ];
        for sample in samples {
            assert_eq!(
                geometric.point(&sample.coords),
                extracted.point(&sample.coords),
                "{sample:?}"
            );
        }

        for side in [FrustumSide::Left, FrustumSide::Near, FrustumSide::Far] {
            let a = geometric.side(side).normal();
            let b = extracted.side(side).normal();
            assert!((a - b).norm() < 1e-4, "{side:?}: {a:?} vs {b:?}");
        }
    }
}
