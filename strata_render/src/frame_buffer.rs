use crate::backend::{
    AttachmentSlot, ClearChannels, FramebufferStatus, GpuId, RenderBackend, TextureDesc,
    TextureKind, ViewportRect,
};
use crate::error::{FramebufferIncompleteErr, Result};
use snafu::ensure;
use tracing::{debug, instrument};

/// Which G-buffer channels a frame buffer gets, and how large they are.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBufferDesc {
    pub name: String,
    pub diffuse: bool,
    pub position: bool,
    pub normal: bool,
    pub depth: bool,
    pub width: u32,
    pub height: u32,
    /// Attachments are `round(width * viewport_scale)` by `round(height * viewport_scale)`.
    pub viewport_scale: f32,
}

impl FrameBufferDesc {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        FrameBufferDesc {
            name: name.into(),
            diffuse: false,
            position: false,
            normal: false,
            depth: false,
            width,
            height,
            viewport_scale: 1.0,
        }
    }

    pub fn with_diffuse(mut self) -> Self {
        self.diffuse = true;
        self
    }

    pub fn with_position(mut self) -> Self {
        self.position = true;
        self
    }

    pub fn with_normal(mut self) -> Self {
        self.normal = true;
        self
    }

    pub fn with_depth(mut self) -> Self {
        self.depth = true;
        self
    }

    pub fn with_viewport_scale(mut self, scale: f32) -> Self {
        self.viewport_scale = scale;
        self
    }

    pub fn scaled_size(&self) -> (u32, u32) {
        let scale = |v: u32| ((v as f32 * self.viewport_scale).round() as u32).max(1);
        (scale(self.width), scale(self.height))
    }

    fn requested_colors(&self) -> impl Iterator<Item = AttachmentSlot> {
        [self.diffuse, self.position, self.normal]
            .into_iter()
            .zip(AttachmentSlot::COLORS)
            .filter_map(|(wanted, slot)| wanted.then_some(slot))
    }

    fn is_depth_only(&self) -> bool {
        self.depth && !self.diffuse && !self.position && !self.normal
    }
}

/// Off-screen target with up to three colour attachments and a depth attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBuffer {
    desc: FrameBufferDesc,
    fbo: GpuId,
    colors: [Option<GpuId>; 3],
    depth: Option<GpuId>,
    width: u32,
    height: u32,
}

impl FrameBuffer {
    /// Allocates the frame buffer and its attachments, then checks completeness.
    ///
    /// Nothing stays allocated when this fails.
    #[instrument(skip_all, fields(name = %desc.name))]
    pub(crate) fn build<B: RenderBackend>(desc: &FrameBufferDesc, backend: &mut B) -> Result<Self> {
        let (width, height) = desc.scaled_size();
        let fbo = backend.create_framebuffer(&desc.name)?;
        let mut fb = FrameBuffer {
            desc: desc.clone(),
            fbo,
            colors: [None; 3],
            depth: None,
            width,
            height,
        };

        if let Err(e) = fb.attach_all(backend) {
            fb.release(backend);
            return Err(e);
        }

        let status = backend.framebuffer_status(fbo);
        if status != FramebufferStatus::Complete {
            fb.release(backend);
        }
        ensure!(
            status == FramebufferStatus::Complete,
            FramebufferIncompleteErr {
                name: &desc.name,
                status
            }
        );

        debug!(width, height, "Frame buffer ready");
        Ok(fb)
    }

    fn attach_all<B: RenderBackend>(&mut self, backend: &mut B) -> Result<()> {
        if self.desc.is_depth_only() {
            backend.set_draw_buffers(self.fbo, &[]);
            backend.set_read_buffer(self.fbo, None);
        }

        let slots: Vec<_> = self.desc.requested_colors().collect();
        for &slot in &slots {
            let texture = self.create_attachment(backend, slot, TextureKind::ColorFloat)?;
            if let Some(i) = slot.color_index() {
                self.colors[i] = Some(texture);
            }
        }
        if self.desc.depth {
            let texture = self.create_attachment(backend, AttachmentSlot::Depth, TextureKind::Depth)?;
            self.depth = Some(texture);
        }

        if let Some(&first) = slots.first() {
            backend.set_draw_buffers(self.fbo, &slots);
            backend.set_read_buffer(self.fbo, Some(first));
        }
        Ok(())
    }

    fn create_attachment<B: RenderBackend>(
        &self,
        backend: &mut B,
        slot: AttachmentSlot,
        kind: TextureKind,
    ) -> Result<GpuId> {
        let label = format!("{} {slot:?}", self.desc.name);
        let texture = backend.create_texture(&TextureDesc {
            label: &label,
            width: self.width,
            height: self.height,
            kind,
            pixels: None,
        })?;
        backend.attach_texture(self.fbo, slot, texture);
        Ok(texture)
    }

    pub(crate) fn release<B: RenderBackend>(&self, backend: &mut B) {
        for texture in self.colors.iter().chain(std::iter::once(&self.depth)).flatten() {
            backend.delete_texture(*texture);
        }
        backend.delete_framebuffer(self.fbo);
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub fn desc(&self) -> &FrameBufferDesc {
        &self.desc
    }

    pub fn fbo(&self) -> GpuId {
        self.fbo
    }

    pub fn diffuse_texture(&self) -> Option<GpuId> {
        self.colors[0]
    }

    pub fn position_texture(&self) -> Option<GpuId> {
        self.colors[1]
    }

    pub fn normal_texture(&self) -> Option<GpuId> {
        self.colors[2]
    }

    pub fn depth_texture(&self) -> Option<GpuId> {
        self.depth
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Existing colour attachments in slot order.
    pub fn color_slots(&self) -> Vec<AttachmentSlot> {
        AttachmentSlot::COLORS
            .into_iter()
            .zip(self.colors)
            .filter_map(|(slot, texture)| texture.map(|_| slot))
            .collect()
    }

    pub fn clear_channels(&self) -> ClearChannels {
        let mut channels = ClearChannels::empty();
        channels.set(ClearChannels::COLOR, self.colors.iter().any(Option::is_some));
        channels.set(ClearChannels::DEPTH, self.depth.is_some());
        channels
    }

    pub fn viewport_rect(&self) -> ViewportRect {
        ViewportRect {
            x: 0,
            y: 0,
            width: self.width,
            height: self.height,
        }
    }
}
