use crate::backend::ViewportRect;
use crate::frustum::Frustum;
use crate::math::{Mat4, Orthographic3, Perspective3};
use tracing::{trace, warn};

pub const DEFAULT_NEAR: f32 = 0.1;
pub const DEFAULT_FAR: f32 = 1000.0;

/// Whether `near` and `far` bound a depth range the projections can be built from.
pub fn valid_clip_planes(near: f32, far: f32) -> bool {
    near.is_finite() && far.is_finite() && near > 0.0 && far > near
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ProjectionMode {
    Perspective,
    Orthographic,
    /// Pixel space, origin bottom-left.
    Screen2D,
}

/// One render target region with its three projections and paired frustum.
///
/// Every matrix and the frustum are derived from the same parameter set, in [`Viewport::resize`].
#[derive(Debug, Clone)]
pub struct Viewport {
    bottom: i32,
    left: i32,
    width: u32,
    height: u32,
    fov_deg: f32,
    aspect: f32,
    near: f32,
    far: f32,
    perspective: Mat4,
    orthographic: Mat4,
    screen: Mat4,
    frustum: Frustum,
}

impl Viewport {
    pub fn new(
        bottom: i32,
        left: i32,
        width: u32,
        height: u32,
        fov_deg: f32,
        near: f32,
        far: f32,
    ) -> Self {
        let (near, far) = if valid_clip_planes(near, far) {
            (near, far)
        } else {
            warn!(near, far, "Unusable clip planes, using {DEFAULT_NEAR}..{DEFAULT_FAR}");
            (DEFAULT_NEAR, DEFAULT_FAR)
        };
        let mut viewport = Viewport {
            bottom,
            left,
            width: 1,
            height: 1,
            fov_deg,
            aspect: 1.0,
            near,
            far,
            perspective: Mat4::identity(),
            orthographic: Mat4::identity(),
            screen: Mat4::identity(),
            frustum: Frustum::new(fov_deg, 1.0, near, far),
        };
        viewport.resize(bottom, left, width, height, fov_deg);
        viewport
    }

    pub fn resize(&mut self, bottom: i32, left: i32, width: u32, height: u32, fov_deg: f32) {
        let width = width.max(1);
        let height = height.max(1);
        let aspect = width as f32 / height as f32;

        self.bottom = bottom;
        self.left = left;
        self.width = width;
        self.height = height;
        self.fov_deg = fov_deg;
        self.aspect = aspect;

        self.perspective =
            Perspective3::new(aspect, fov_deg.to_radians(), self.near, self.far).to_homogeneous();
        self.orthographic =
            Orthographic3::new(-1.0, 1.0, -1.0, 1.0, self.near, self.far).to_homogeneous();
        self.screen =
            Orthographic3::new(0.0, width as f32, 0.0, height as f32, -1.0, 1.0).to_homogeneous();
        self.frustum
            .set_projection(fov_deg, aspect, self.near, self.far);

        trace!(width, height, fov_deg, "Viewport projections rebuilt");
    }

    pub fn projection(&self, mode: ProjectionMode) -> &Mat4 {
        match mode {
            ProjectionMode::Perspective => &self.perspective,
            ProjectionMode::Orthographic => &self.orthographic,
            ProjectionMode::Screen2D => &self.screen,
        }
    }

    pub fn rect(&self) -> ViewportRect {
        ViewportRect {
            x: self.left,
            y: self.bottom,
            width: self.width,
            height: self.height,
        }
    }

    pub fn frustum(&self) -> &Frustum {
        &self.frustum
    }

    pub fn frustum_mut(&mut self) -> &mut Frustum {
        &mut self.frustum
    }

    pub fn bottom(&self) -> i32 {
        self.bottom
    }

    pub fn left(&self) -> i32 {
        self.left
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn fov(&self) -> f32 {
        self.fov_deg
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn near(&self) -> f32 {
        self.near
    }

    pub fn far(&self) -> f32 {
        self.far
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec4;

    fn approx(a: &Mat4, b: &Mat4) -> bool {
        (a - b).abs().max() < 1e-5
    }

    #[test]
    fn projections_share_one_parameter_set() {
        let viewport = Viewport::new(0, 0, 800, 600, 60.0, 0.1, 1000.0);
        let expected = Perspective3::new(800.0 / 600.0, 60f32.to_radians(), 0.1, 1000.0);

        assert!(approx(viewport.projection(ProjectionMode::Perspective), expected.as_matrix()));
        assert_eq!(viewport.aspect(), 800.0 / 600.0);

        let params = viewport.frustum().params().unwrap();
        assert_eq!(params.aspect, viewport.aspect());
        assert_eq!(params.fov_deg, 60.0);
        assert_eq!(params.near, 0.1);
        assert_eq!(params.far, 1000.0);
    }

    #[test]
    fn screen_projection_maps_pixels_to_clip_space() {
        let viewport = Viewport::new(0, 0, 800, 600, 60.0, 0.1, 1000.0);
        let screen = viewport.projection(ProjectionMode::Screen2D);

        let corner = screen * Vec4::new(800.0, 600.0, 0.0, 1.0);
        assert!((corner.x - 1.0).abs() < 1e-5);
        assert!((corner.y - 1.0).abs() < 1e-5);

        let origin = screen * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!((origin.x + 1.0).abs() < 1e-5);
        assert!((origin.y + 1.0).abs() < 1e-5);
    }

    #[test]
    fn resize_recomputes_every_matrix() {
        let mut viewport = Viewport::new(0, 0, 800, 600, 60.0, 0.1, 1000.0);
        viewport.resize(10, 20, 1024, 512, 45.0);

        let fresh = Viewport::new(10, 20, 1024, 512, 45.0, 0.1, 1000.0);
        for mode in [
            ProjectionMode::Perspective,
            ProjectionMode::Orthographic,
            ProjectionMode::Screen2D,
        ] {
            assert!(approx(viewport.projection(mode), fresh.projection(mode)));
        }
        assert_eq!(viewport.frustum(), fresh.frustum());
        assert_eq!(
            viewport.rect(),
            ViewportRect {
                x: 20,
                y: 10,
                width: 1024,
                height: 512
            }
        );
    }

    #[test]
    fn zero_sized_viewport_is_clamped() {
        let viewport = Viewport::new(0, 0, 0, 0, 60.0, 0.1, 1000.0);
        assert_eq!(viewport.width(), 1);
        assert_eq!(viewport.height(), 1);
        assert!(viewport.aspect().is_finite());
    }

    #[test]
    fn degenerate_clip_planes_fall_back() {
        let flat = Viewport::new(0, 0, 800, 600, 60.0, 5.0, 5.0);
        assert_eq!((flat.near(), flat.far()), (DEFAULT_NEAR, DEFAULT_FAR));

        let inverted = Viewport::new(0, 0, 800, 600, 60.0, 10.0, 1.0);
        assert_eq!((inverted.near(), inverted.far()), (DEFAULT_NEAR, DEFAULT_FAR));
        assert!(inverted.projection(ProjectionMode::Perspective).iter().all(|v| v.is_finite()));
    }
}
