use std::thread;
use strata::math::Vec4;
use strata::{
    ClientStates, GpuCommand, HeadlessBackend, Material, PrimitiveMode, RenderError, Renderer,
    StaticBufferDesc, VertexLayout,
};

/// Textured quad, PositionNormalUvColor, as two indexed triangles.
const QUAD: [f32; 40] = [
    -1.0, -1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, //
    1.0, -1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, //
    1.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, //
    -1.0, 1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0,
];
const QUAD_UVS: [f32; 8] = [0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0];
const QUAD_INDICES: [u32; 6] = [0, 1, 2, 0, 2, 3];

#[test]
fn textured_quad_counts_four_vertices_two_faces() {
    strata::init_logging();

    let mut r = Renderer::new(HeadlessBackend::new());
    let material = r.create_material(
        Material::default().with_emissive(Vec4::new(0.2, 0.2, 0.2, 1.0)),
    );
    let texture = r.create_texture("checker", 2, 2, vec![200; 16]).unwrap();
    let texture_id = r.texture(texture).unwrap().gpu_id();

    let quad = r
        .create_static_buffer(
            &StaticBufferDesc::new(VertexLayout::PositionNormalUvColor, &QUAD)
                .with_uvs(&QUAD_UVS)
                .with_indices(&QUAD_INDICES)
                .with_material(material)
                .with_texture(texture),
        )
        .unwrap();

    r.begin_frame();
    r.render_static_buffer(quad).unwrap();
    r.end_frame().unwrap();

    let stats = r.render_stats();
    assert_eq!(stats.vertices, 4);
    assert_eq!(stats.faces, 2);

    let commands = r.backend().commands();
    assert!(commands.contains(&GpuCommand::BindTexture(texture_id)));
    assert!(
        commands
            .iter()
            .any(|c| matches!(c, GpuCommand::BindMaterial(m) if m.emissive.x == 0.2))
    );

    let draw = r.backend().draws().next().unwrap();
    assert_eq!(draw.index_count, 6);
    assert!(draw.uvs.is_some());
    assert_eq!(r.backend().client_states(), ClientStates::empty());
}

#[test]
fn counters_follow_the_primitive_mode() {
    let mut r = Renderer::new(HeadlessBackend::new());
    let strip: Vec<f32> = (0..6).flat_map(|i| [i as f32, (i % 2) as f32, 0.0]).collect();
    let buffer = r
        .create_static_buffer(&StaticBufferDesc::new(VertexLayout::Position, &strip))
        .unwrap();

    let cases = [
        (PrimitiveMode::Triangles, 2),
        (PrimitiveMode::TriangleStrip, 4),
        (PrimitiveMode::TriangleFan, 4),
        (PrimitiveMode::Quads, 1),
        (PrimitiveMode::LineStrip, 0),
        (PrimitiveMode::Points, 0),
    ];
    for (mode, faces) in cases {
        r.reset_render_stats();
        r.set_primitive_mode(mode);
        r.render_static_buffer(buffer).unwrap();
        r.render_static_buffer(buffer).unwrap();

        let stats = r.render_stats();
        assert_eq!(stats.vertices, 12, "{mode:?}");
        assert_eq!(stats.faces, faces * 2, "{mode:?}");
    }
}

#[test]
fn failed_render_leaves_counters_alone() {
    let mut r = Renderer::new(HeadlessBackend::new());
    let material = r.create_material(Material::default());
    let buffer = r
        .create_static_buffer(
            &StaticBufferDesc::new(VertexLayout::PositionNormal, &[0.0; 18])
                .with_material(material),
        )
        .unwrap();
    r.delete_material(material).unwrap();

    assert!(r.render_static_buffer(buffer).unwrap_err().is_invalid_handle());
    assert_eq!(r.render_stats().vertices, 0);
}

#[test]
fn malformed_geometry_is_rejected() {
    let r = Renderer::new(HeadlessBackend::new());
    let partial = r.create_static_buffer(&StaticBufferDesc::new(VertexLayout::Position, &[0.0; 4]));
    assert!(matches!(partial, Err(RenderError::InvalidGeometry { .. })));

    let out_of_range = r.create_static_buffer(
        &StaticBufferDesc::new(VertexLayout::Position, &[0.0; 9]).with_indices(&[0, 1, 3]),
    );
    assert!(matches!(out_of_range, Err(RenderError::InvalidGeometry { .. })));

    let missing_uvs =
        r.create_static_buffer(&StaticBufferDesc::new(VertexLayout::PositionNormalUvColor, &QUAD));
    assert!(matches!(missing_uvs, Err(RenderError::InvalidGeometry { .. })));
}

#[test]
fn out_of_memory_surfaces_on_first_draw() {
    let mut r = Renderer::new(HeadlessBackend::with_memory_limit(16));
    let buffer = r
        .create_static_buffer(&StaticBufferDesc::new(VertexLayout::Position, &[0.0; 9]))
        .unwrap();

    assert!(matches!(
        r.render_static_buffer(buffer),
        Err(RenderError::OutOfMemory { .. })
    ));
    assert_eq!(r.render_stats().vertices, 0);
}

#[test]
fn worker_threads_build_while_the_render_thread_draws() {
    let mut r = Renderer::new(HeadlessBackend::new());
    let store = r.static_buffers();

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let store = store.clone();
            thread::spawn(move || {
                (0..8)
                    .map(|chunk| {
                        let y = (worker * 8 + chunk) as f32;
                        let vertices = [0.0, y, 0.0, 1.0, y, 0.0, 0.0, y + 1.0, 0.0];
                        store
                            .create(&StaticBufferDesc::new(VertexLayout::Position, &vertices))
                            .unwrap()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let handles: Vec<_> = workers
        .into_iter()
        .flat_map(|w| w.join().unwrap())
        .collect();
    assert_eq!(store.len(), 32);

    for &handle in &handles {
        r.render_static_buffer(handle).unwrap();
    }
    assert_eq!(r.render_stats().vertices, 96);
    assert_eq!(r.render_stats().faces, 32);

    // a worker retires half the chunks, the render thread frees their device buffers
    let retire = handles[..16].to_vec();
    thread::spawn(move || {
        for handle in retire {
            store.delete(handle).unwrap();
        }
    })
    .join()
    .unwrap();

    r.render_static_buffer(handles[16]).unwrap();
    assert_eq!(r.backend().live_objects(), 16);
}

#[test]
fn recreate_from_a_worker_reuploads_on_next_draw() {
    let mut r = Renderer::new(HeadlessBackend::new());
    let buffer = r
        .create_static_buffer(&StaticBufferDesc::new(VertexLayout::Position, &[0.0; 9]))
        .unwrap();
    r.render_static_buffer(buffer).unwrap();

    let store = r.static_buffers();
    thread::spawn(move || {
        store
            .recreate(buffer, &StaticBufferDesc::new(VertexLayout::Position, &[1.0; 18]))
            .unwrap();
    })
    .join()
    .unwrap();

    r.reset_render_stats();
    r.render_static_buffer(buffer).unwrap();
    assert_eq!(r.render_stats().vertices, 6);
    assert_eq!(r.backend().live_objects(), 1);
}
