//! Resource and pipeline management for the Strata renderer.
//!
//! Everything the render loop touches lives behind a typed handle: static vertex buffers,
//! textures, materials, lights, shaders, frame buffers and viewports. Handles are
//! generational keys, so a handle that outlived its resource is reported as
//! [`RenderError::InvalidHandle`] instead of aliasing whatever took its slot.
//!
//! The [`Renderer`] owns the thread-bound [`RenderBackend`] and all render-thread registries.
//! Static buffers are the exception: their [`StaticBufferStore`] is shared with worker threads
//! (chunk mesh builders) through an `Arc`, and only the upload and draw happen on the render
//! thread.
//!
//! Two backends ship with the crate: [`HeadlessBackend`], an in-memory device that records
//! every call, and [`WgpuBackend`].

pub mod backend;
pub mod error;
pub mod frame_buffer;
pub mod frustum;
pub mod light;
pub mod material;
pub mod math;
pub mod picking;
pub mod primitive;
pub mod registry;
pub mod renderer;
pub mod shader;
pub mod static_buffer;
pub mod texture;
pub mod transform;
pub mod vertex_layout;
pub mod viewport;

pub use backend::headless::{GpuCommand, HeadlessBackend};
pub use backend::wgpu::{WgpuBackend, WgpuInitError};
pub use backend::{
    AttachmentSlot, BufferUsage, ClearChannels, ClientStates, DrawCall, FramebufferStatus, GpuId,
    RenderBackend, TextureDesc, TextureKind, ViewportRect,
};
pub use error::{RenderError, ResourceKind, Result};
pub use frame_buffer::{FrameBuffer, FrameBufferDesc};
pub use frustum::{Frustum, FrustumSide, Visibility};
pub use light::{Light, LightKind, MAX_LIGHTS};
pub use material::Material;
pub use picking::{HitRecord, NO_NAME, PickName, PickingContext, decode_pick_name, encode_pick_name};
pub use primitive::PrimitiveMode;
pub use registry::{
    FrameBufferHandle, LightHandle, MaterialHandle, Registry, ResourceHandle, ShaderHandle,
    StaticBufferHandle, TextureHandle, ViewportHandle,
};
pub use renderer::{RenderStats, Renderer, RendererConfig};
pub use shader::Shader;
pub use static_buffer::{StaticBufferDesc, StaticBufferStore, StaticGeometry};
pub use texture::Texture;
pub use transform::MatrixStack;
pub use vertex_layout::VertexLayout;
pub use viewport::{ProjectionMode, Viewport};
