use strata::math::{Mat4, Orthographic3, Perspective3, Vec3};
use strata::{FrustumSide, GpuCommand, HeadlessBackend, ProjectionMode, Renderer, Visibility};

fn approx_eq(a: &Mat4, b: &Mat4) -> bool {
    (a - b).abs().max() < 1e-6
}

#[test]
fn perspective_projection_for_800_by_600() {
    let mut r = Renderer::new(HeadlessBackend::new());
    let viewport = r.create_viewport(0, 0, 800, 600, 60.0);
    r.set_projection_mode(ProjectionMode::Perspective, viewport)
        .unwrap();

    let expected =
        Perspective3::new(800.0 / 600.0, 60f32.to_radians(), 0.1, 1000.0).to_homogeneous();
    assert!(approx_eq(r.projection_matrix(), &expected));
    assert!(
        r.backend()
            .commands()
            .iter()
            .any(|c| matches!(c, GpuCommand::SetProjection(m) if approx_eq(m, &expected)))
    );
    assert_eq!(r.backend().viewport().unwrap().width, 800);
}

#[test]
fn resize_keeps_handle_and_rebuilds_everything() {
    let mut r = Renderer::new(HeadlessBackend::new());
    let viewport = r.create_viewport(0, 0, 800, 600, 60.0);
    r.resize_viewport(viewport, 10, 20, 1024, 256, 90.0).unwrap();

    let v = r.viewport(viewport).unwrap();
    assert_eq!((v.bottom(), v.left(), v.width(), v.height()), (10, 20, 1024, 256));
    assert_eq!(v.aspect(), 4.0);
    assert!(approx_eq(
        v.projection(ProjectionMode::Perspective),
        &Perspective3::new(4.0, 90f32.to_radians(), v.near(), v.far()).to_homogeneous()
    ));
    assert!(approx_eq(
        v.projection(ProjectionMode::Orthographic),
        &Orthographic3::new(-1.0, 1.0, -1.0, 1.0, v.near(), v.far()).to_homogeneous()
    ));
    assert!(approx_eq(
        v.projection(ProjectionMode::Screen2D),
        &Orthographic3::new(0.0, 1024.0, 0.0, 256.0, -1.0, 1.0).to_homogeneous()
    ));

    let params = v.frustum().params().unwrap();
    assert_eq!(params.fov_deg, 90.0);
    assert_eq!(params.aspect, 4.0);
    assert_eq!((params.near, params.far), (v.near(), v.far()));
}

#[test]
fn zero_sized_viewport_keeps_a_finite_aspect() {
    let mut r = Renderer::new(HeadlessBackend::new());
    let viewport = r.create_viewport(0, 0, 0, 0, 60.0);
    let v = r.viewport(viewport).unwrap();
    assert_eq!((v.width(), v.height()), (1, 1));
    assert!(v.aspect().is_finite());
}

#[test]
fn culling_follows_the_active_viewport() {
    let mut r = Renderer::new(HeadlessBackend::new());
    let viewport = r.create_viewport(0, 0, 800, 600, 60.0);
    r.set_projection_mode(ProjectionMode::Perspective, viewport)
        .unwrap();

    assert_eq!(
        r.point_in_frustum(&Vec3::new(0.0, 0.0, -5.0)),
        Visibility::Inside
    );
    assert_eq!(
        r.sphere_in_frustum(&strata::BoundingSphere::new(Vec3::new(0.0, 0.0, -0.1), 0.5)),
        Visibility::Intersecting
    );
    assert_eq!(
        r.box_in_frustum(&strata::BoundingBox::from_min_max(
            Vec3::new(-1.0, -1.0, 5.0),
            Vec3::new(1.0, 1.0, 6.0)
        )),
        Visibility::Outside
    );

    let near = r.viewport(viewport).unwrap().frustum().side(FrustumSide::Near);
    assert!(near.distance(&Vec3::new(0.0, 0.0, -1.0)) > 0.0);
}
