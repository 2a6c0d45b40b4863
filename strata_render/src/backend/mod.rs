//! The thread-bound graphics device.
//!
//! Everything the renderer does on the GPU goes through [`RenderBackend`]. Implementations are
//! expected to be owned by a single thread; the trait has no `Send`/`Sync` bounds.

use crate::error::Result;
use crate::light::Light;
use crate::material::Material;
use crate::math::Mat4;
use crate::primitive::PrimitiveMode;
use crate::vertex_layout::VertexLayout;
use bitflags::bitflags;
use std::fmt::{Display, Formatter};
use std::num::NonZeroU32;

pub mod headless;
pub mod wgpu;

/// Device object name. Zero is never a valid id.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuId(NonZeroU32);

impl GpuId {
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(GpuId)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl Display for GpuId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex(VertexLayout),
    /// `u32` indices.
    Index,
    /// Two floats per vertex.
    TexCoord,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TextureKind {
    Rgba8,
    /// Floating point colour target.
    ColorFloat,
    Depth,
}

impl TextureKind {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            TextureKind::Rgba8 | TextureKind::Depth => 4,
            TextureKind::ColorFloat => 8,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TextureDesc<'a> {
    pub label: &'a str,
    pub width: u32,
    pub height: u32,
    pub kind: TextureKind,
    /// Tightly packed initial contents, only used for `Rgba8`.
    pub pixels: Option<&'a [u8]>,
}

impl TextureDesc<'_> {
    pub fn byte_size(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.kind.bytes_per_pixel() as u64
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttachmentSlot {
    Color0,
    Color1,
    Color2,
    Depth,
}

impl AttachmentSlot {
    pub const COLORS: [AttachmentSlot; 3] = [
        AttachmentSlot::Color0,
        AttachmentSlot::Color1,
        AttachmentSlot::Color2,
    ];

    pub fn color_index(self) -> Option<usize> {
        match self {
            AttachmentSlot::Color0 => Some(0),
            AttachmentSlot::Color1 => Some(1),
            AttachmentSlot::Color2 => Some(2),
            AttachmentSlot::Depth => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FramebufferStatus {
    Complete,
    MissingAttachment,
    IncompleteAttachment,
    MismatchedDimensions,
    IncompleteDrawBuffer,
    IncompleteReadBuffer,
    Unsupported,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Attachment {
    pub texture: GpuId,
    pub kind: TextureKind,
    pub size: (u32, u32),
}

/// Attachment bookkeeping shared by the backends, including the completeness rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FramebufferAttachments {
    pub colors: [Option<Attachment>; 3],
    pub depth: Option<Attachment>,
    pub draw_buffers: Vec<AttachmentSlot>,
    pub read_buffer: Option<AttachmentSlot>,
}

impl Default for FramebufferAttachments {
    fn default() -> Self {
        // a fresh frame buffer draws to and reads from colour 0
        Self {
            colors: [None; 3],
            depth: None,
            draw_buffers: vec![AttachmentSlot::Color0],
            read_buffer: Some(AttachmentSlot::Color0),
        }
    }
}

impl FramebufferAttachments {
    pub fn attach(&mut self, slot: AttachmentSlot, attachment: Attachment) {
        match slot.color_index() {
            Some(i) => self.colors[i] = Some(attachment),
            None => self.depth = Some(attachment),
        }
    }

    pub fn get(&self, slot: AttachmentSlot) -> Option<&Attachment> {
        match slot.color_index() {
            Some(i) => self.colors[i].as_ref(),
            None => self.depth.as_ref(),
        }
    }

    /// Removes every attachment that samples `texture`.
    pub fn detach_texture(&mut self, texture: GpuId) {
        for slot in self.colors.iter_mut().chain(std::iter::once(&mut self.depth)) {
            if slot.is_some_and(|a| a.texture == texture) {
                *slot = None;
            }
        }
    }

    pub fn status(&self) -> FramebufferStatus {
        let all = || self.colors.iter().flatten().chain(self.depth.iter());

        if all().next().is_none() {
            return FramebufferStatus::MissingAttachment;
        }
        if self.colors.iter().flatten().any(|a| a.kind == TextureKind::Depth)
            || self.depth.is_some_and(|a| a.kind != TextureKind::Depth)
        {
            return FramebufferStatus::IncompleteAttachment;
        }
        let mut sizes = all().map(|a| a.size);
        if let Some(first) = sizes.next()
            && sizes.any(|s| s != first)
        {
            return FramebufferStatus::MismatchedDimensions;
        }
        if self.draw_buffers.iter().any(|slot| self.get(*slot).is_none()) {
            return FramebufferStatus::IncompleteDrawBuffer;
        }
        if self.read_buffer.is_some_and(|slot| self.get(slot).is_none()) {
            return FramebufferStatus::IncompleteReadBuffer;
        }
        FramebufferStatus::Complete
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct ClearChannels: u8 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
    }
}

bitflags! {
    /// Vertex streams read by the next draw.
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct ClientStates: u8 {
        const VERTEX = 1 << 0;
        const NORMAL = 1 << 1;
        const TEXCOORD = 1 << 2;
        const COLOR = 1 << 3;
    }
}

/// Viewport rectangle with a bottom-left origin.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ViewportRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DrawCall {
    pub vertices: GpuId,
    pub layout: VertexLayout,
    pub uvs: Option<GpuId>,
    pub indices: Option<GpuId>,
    pub vertex_count: u32,
    pub index_count: u32,
    pub mode: PrimitiveMode,
}

impl DrawCall {
    /// Number of elements the primitive assembler walks.
    pub fn element_count(&self) -> u32 {
        if self.indices.is_some() {
            self.index_count
        } else {
            self.vertex_count
        }
    }
}

pub trait RenderBackend {
    fn create_buffer(&mut self, usage: BufferUsage, data: &[u8]) -> Result<GpuId>;
    fn delete_buffer(&mut self, buffer: GpuId);

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<GpuId>;
    fn delete_texture(&mut self, texture: GpuId);

    fn create_framebuffer(&mut self, label: &str) -> Result<GpuId>;
    fn attach_texture(&mut self, framebuffer: GpuId, slot: AttachmentSlot, texture: GpuId);
    /// An empty list means "none".
    fn set_draw_buffers(&mut self, framebuffer: GpuId, slots: &[AttachmentSlot]);
    fn set_read_buffer(&mut self, framebuffer: GpuId, slot: Option<AttachmentSlot>);
    fn framebuffer_status(&self, framebuffer: GpuId) -> FramebufferStatus;
    fn delete_framebuffer(&mut self, framebuffer: GpuId);
    /// `None` binds the default target.
    fn bind_framebuffer(&mut self, framebuffer: Option<GpuId>);

    fn create_program(&mut self, label: &str, vertex: &str, fragment: &str) -> Result<GpuId>;
    fn use_program(&mut self, program: Option<GpuId>);
    fn delete_program(&mut self, program: GpuId);

    fn set_viewport(&mut self, rect: ViewportRect);
    fn clear(&mut self, channels: ClearChannels);

    fn set_projection(&mut self, projection: &Mat4);
    fn set_model_view(&mut self, model_view: &Mat4);
    fn bind_material(&mut self, material: &Material);
    fn bind_texture(&mut self, texture: Option<GpuId>);
    /// `light` is already in view space. `None` switches the slot off.
    fn set_light(&mut self, slot: usize, light: Option<&Light>);

    fn enable_client_states(&mut self, states: ClientStates);
    fn disable_client_states(&mut self, states: ClientStates);
    fn draw(&mut self, call: &DrawCall) -> Result<()>;

    /// Submits everything recorded since the last flush.
    fn flush(&mut self) -> Result<()>;

    /// Pops the oldest device diagnostic, if any.
    fn take_error(&mut self) -> Option<String>;
}
