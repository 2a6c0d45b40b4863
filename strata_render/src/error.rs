use crate::backend::FramebufferStatus;
use snafu::Snafu;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub type Result<T, E = RenderError> = std::result::Result<T, E>;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    StaticBuffer,
    Texture,
    Material,
    Light,
    Shader,
    FrameBuffer,
    Viewport,
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResourceKind::StaticBuffer => "static buffer",
            ResourceKind::Texture => "texture",
            ResourceKind::Material => "material",
            ResourceKind::Light => "light",
            ResourceKind::Shader => "shader",
            ResourceKind::FrameBuffer => "frame buffer",
            ResourceKind::Viewport => "viewport",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Snafu)]
#[snafu(context(suffix(Err)))]
#[snafu(visibility(pub(crate)))]
pub enum RenderError {
    #[snafu(display("Invalid {kind} handle {handle:#x}"))]
    InvalidHandle { kind: ResourceKind, handle: u64 },

    #[snafu(display("Shader {name:?} failed to compile: {message}"))]
    ShaderCompile { name: String, message: String },

    #[snafu(display("Frame buffer {name:?} is incomplete: {status:?}"))]
    FramebufferIncomplete {
        name: String,
        status: FramebufferStatus,
    },

    #[snafu(display("Out of GPU memory: requested {requested} bytes, {available} available"))]
    OutOfMemory { requested: u64, available: u64 },

    #[snafu(display("Invalid geometry: {reason}"))]
    InvalidGeometry { reason: String },

    #[snafu(display("Texture data has {actual} bytes, expected {expected}"))]
    InvalidTextureData { expected: usize, actual: usize },

    #[snafu(display("Unable to load texture {}: {source}", path.display()))]
    TextureLoad {
        path: PathBuf,
        source: image::ImageError,
    },

    #[snafu(display("The {stack} stack was popped more often than pushed"))]
    StateStackUnderflow { stack: &'static str },

    #[snafu(display("No name picking pass is active"))]
    PickingInactive,

    #[snafu(display("Light slot {slot} is out of range, there are {max} slots"))]
    LightSlotOutOfRange { slot: usize, max: usize },
}

impl RenderError {
    pub fn is_invalid_handle(&self) -> bool {
        matches!(self, RenderError::InvalidHandle { .. })
    }
}
