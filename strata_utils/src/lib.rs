mod bounds;
pub mod color;
mod logging;
mod render_args;

pub use bounds::{BoundingBox, BoundingSphere};
pub use logging::init_logging;
pub use render_args::RenderArgs;

pub use tracing;
