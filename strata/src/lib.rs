//! Handle-indexed GPU resources for a fixed-function style render loop.
//!
//! ```no_run
//! use strata::{HeadlessBackend, ProjectionMode, Renderer, StaticBufferDesc, VertexLayout};
//!
//! let mut renderer = Renderer::new(HeadlessBackend::new());
//! let viewport = renderer.create_viewport(0, 0, 800, 600, 60.0);
//! renderer.set_projection_mode(ProjectionMode::Perspective, viewport)?;
//!
//! let triangle = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
//! let buffer = renderer.create_static_buffer(&StaticBufferDesc::new(VertexLayout::Position, &triangle))?;
//!
//! renderer.begin_frame();
//! renderer.render_static_buffer(buffer)?;
//! renderer.end_frame()?;
//! # Ok::<(), strata::RenderError>(())
//! ```

pub use strata_render::*;
pub use strata_utils as utils;
pub use strata_utils::{BoundingBox, BoundingSphere, RenderArgs, debug_panic, init_logging};

pub use ::tracing;
