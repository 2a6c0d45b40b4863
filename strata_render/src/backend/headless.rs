//! In-memory device.
//!
//! Allocates ids, tracks bound state and frame buffer completeness like a real driver would, and
//! records every call so tests can inspect exactly what the renderer asked for.

use crate::backend::{
    Attachment, AttachmentSlot, BufferUsage, ClearChannels, ClientStates, DrawCall,
    FramebufferAttachments, FramebufferStatus, GpuId, RenderBackend, TextureDesc, TextureKind,
    ViewportRect,
};
use crate::error::{OutOfMemoryErr, Result};
use crate::light::Light;
use crate::material::Material;
use crate::math::Mat4;
use snafu::ensure;
use std::collections::{HashMap, VecDeque};
use std::num::NonZeroU32;
use tracing::trace;

#[derive(Debug, Clone, PartialEq)]
pub enum GpuCommand {
    CreateBuffer { id: GpuId, usage: BufferUsage, bytes: usize },
    DeleteBuffer(GpuId),
    CreateTexture { id: GpuId, kind: TextureKind, width: u32, height: u32 },
    DeleteTexture(GpuId),
    CreateFramebuffer(GpuId),
    AttachTexture { framebuffer: GpuId, slot: AttachmentSlot, texture: GpuId },
    SetDrawBuffers { framebuffer: GpuId, slots: Vec<AttachmentSlot> },
    SetReadBuffer { framebuffer: GpuId, slot: Option<AttachmentSlot> },
    DeleteFramebuffer(GpuId),
    BindFramebuffer(Option<GpuId>),
    CreateProgram(GpuId),
    UseProgram(Option<GpuId>),
    DeleteProgram(GpuId),
    SetViewport(ViewportRect),
    Clear(ClearChannels),
    SetProjection(Mat4),
    SetModelView(Mat4),
    BindMaterial(Material),
    BindTexture(Option<GpuId>),
    SetLight { slot: usize, enabled: bool },
    EnableClientStates(ClientStates),
    DisableClientStates(ClientStates),
    Draw(DrawCall),
    Flush,
}

#[derive(Debug)]
struct BufferObject {
    bytes: u64,
}

#[derive(Debug)]
struct TextureObject {
    kind: TextureKind,
    size: (u32, u32),
    bytes: u64,
}

#[derive(Debug, Default)]
pub struct HeadlessBackend {
    next_id: u32,
    buffers: HashMap<GpuId, BufferObject>,
    textures: HashMap<GpuId, TextureObject>,
    framebuffers: HashMap<GpuId, FramebufferAttachments>,
    programs: HashMap<GpuId, String>,

    bound_framebuffer: Option<GpuId>,
    program: Option<GpuId>,
    texture: Option<GpuId>,
    viewport: Option<ViewportRect>,
    client_states: ClientStates,
    lights: [bool; crate::light::MAX_LIGHTS],

    memory_limit: Option<u64>,
    memory_used: u64,

    commands: Vec<GpuCommand>,
    errors: VecDeque<String>,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails allocations once buffers and textures would exceed `bytes`.
    pub fn with_memory_limit(bytes: u64) -> Self {
        Self {
            memory_limit: Some(bytes),
            ..Self::default()
        }
    }

    fn allocate_id(&mut self) -> GpuId {
        let id = GpuId(NonZeroU32::MIN.saturating_add(self.next_id));
        self.next_id += 1;
        id
    }

    fn reserve(&mut self, bytes: u64) -> Result<()> {
        if let Some(limit) = self.memory_limit {
            let available = limit.saturating_sub(self.memory_used);
            ensure!(
                bytes <= available,
                OutOfMemoryErr {
                    requested: bytes,
                    available
                }
            );
        }
        self.memory_used += bytes;
        Ok(())
    }

    fn report(&mut self, message: String) {
        trace!("{message}");
        self.errors.push_back(message);
    }

    pub fn commands(&self) -> &[GpuCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<GpuCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn draws(&self) -> impl Iterator<Item = &DrawCall> {
        self.commands.iter().filter_map(|c| match c {
            GpuCommand::Draw(call) => Some(call),
            _ => None,
        })
    }

    pub fn client_states(&self) -> ClientStates {
        self.client_states
    }

    pub fn bound_framebuffer(&self) -> Option<GpuId> {
        self.bound_framebuffer
    }

    pub fn bound_program(&self) -> Option<GpuId> {
        self.program
    }

    pub fn bound_texture(&self) -> Option<GpuId> {
        self.texture
    }

    pub fn viewport(&self) -> Option<ViewportRect> {
        self.viewport
    }

    pub fn draw_buffers(&self, framebuffer: GpuId) -> Option<&[AttachmentSlot]> {
        self.framebuffers
            .get(&framebuffer)
            .map(|fb| fb.draw_buffers.as_slice())
    }

    pub fn read_buffer(&self, framebuffer: GpuId) -> Option<Option<AttachmentSlot>> {
        self.framebuffers.get(&framebuffer).map(|fb| fb.read_buffer)
    }

    pub fn light_enabled(&self, slot: usize) -> bool {
        self.lights.get(slot).copied().unwrap_or(false)
    }

    pub fn is_buffer(&self, id: GpuId) -> bool {
        self.buffers.contains_key(&id)
    }

    pub fn is_texture(&self, id: GpuId) -> bool {
        self.textures.contains_key(&id)
    }

    pub fn is_framebuffer(&self, id: GpuId) -> bool {
        self.framebuffers.contains_key(&id)
    }

    pub fn live_objects(&self) -> usize {
        self.buffers.len() + self.textures.len() + self.framebuffers.len() + self.programs.len()
    }

    pub fn memory_used(&self) -> u64 {
        self.memory_used
    }
}

impl RenderBackend for HeadlessBackend {
    fn create_buffer(&mut self, usage: BufferUsage, data: &[u8]) -> Result<GpuId> {
        let bytes = data.len() as u64;
        self.reserve(bytes)?;
        let id = self.allocate_id();
        self.buffers.insert(id, BufferObject { bytes });
        self.commands.push(GpuCommand::CreateBuffer {
            id,
            usage,
            bytes: data.len(),
        });
        Ok(id)
    }

    fn delete_buffer(&mut self, buffer: GpuId) {
        match self.buffers.remove(&buffer) {
            Some(object) => {
                self.memory_used -= object.bytes;
                self.commands.push(GpuCommand::DeleteBuffer(buffer));
            }
            None => self.report(format!("delete of unknown buffer {buffer}")),
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<GpuId> {
        let bytes = desc.byte_size();
        self.reserve(bytes)?;
        let id = self.allocate_id();
        self.textures.insert(
            id,
            TextureObject {
                kind: desc.kind,
                size: (desc.width, desc.height),
                bytes,
            },
        );
        self.commands.push(GpuCommand::CreateTexture {
            id,
            kind: desc.kind,
            width: desc.width,
            height: desc.height,
        });
        Ok(id)
    }

    fn delete_texture(&mut self, texture: GpuId) {
        let Some(object) = self.textures.remove(&texture) else {
            self.report(format!("delete of unknown texture {texture}"));
            return;
        };
        self.memory_used -= object.bytes;
        for fb in self.framebuffers.values_mut() {
            fb.detach_texture(texture);
        }
        if self.texture == Some(texture) {
            self.texture = None;
        }
        self.commands.push(GpuCommand::DeleteTexture(texture));
    }

    fn create_framebuffer(&mut self, _label: &str) -> Result<GpuId> {
        let id = self.allocate_id();
        self.framebuffers
            .insert(id, FramebufferAttachments::default());
        self.commands.push(GpuCommand::CreateFramebuffer(id));
        Ok(id)
    }

    fn attach_texture(&mut self, framebuffer: GpuId, slot: AttachmentSlot, texture: GpuId) {
        let Some(object) = self.textures.get(&texture) else {
            self.report(format!("attach of unknown texture {texture}"));
            return;
        };
        let attachment = Attachment {
            texture,
            kind: object.kind,
            size: object.size,
        };
        let Some(fb) = self.framebuffers.get_mut(&framebuffer) else {
            self.report(format!("attach to unknown frame buffer {framebuffer}"));
            return;
        };
        fb.attach(slot, attachment);
        self.commands.push(GpuCommand::AttachTexture {
            framebuffer,
            slot,
            texture,
        });
    }

    fn set_draw_buffers(&mut self, framebuffer: GpuId, slots: &[AttachmentSlot]) {
        let Some(fb) = self.framebuffers.get_mut(&framebuffer) else {
            self.report(format!("draw buffers of unknown frame buffer {framebuffer}"));
            return;
        };
        fb.draw_buffers = slots.to_vec();
        self.commands.push(GpuCommand::SetDrawBuffers {
            framebuffer,
            slots: slots.to_vec(),
        });
    }

    fn set_read_buffer(&mut self, framebuffer: GpuId, slot: Option<AttachmentSlot>) {
        let Some(fb) = self.framebuffers.get_mut(&framebuffer) else {
            self.report(format!("read buffer of unknown frame buffer {framebuffer}"));
            return;
        };
        fb.read_buffer = slot;
        self.commands
            .push(GpuCommand::SetReadBuffer { framebuffer, slot });
    }

    fn framebuffer_status(&self, framebuffer: GpuId) -> FramebufferStatus {
        self.framebuffers
            .get(&framebuffer)
            .map_or(FramebufferStatus::Unsupported, |fb| fb.status())
    }

    fn delete_framebuffer(&mut self, framebuffer: GpuId) {
        if self.framebuffers.remove(&framebuffer).is_none() {
            self.report(format!("delete of unknown frame buffer {framebuffer}"));
            return;
        }
        if self.bound_framebuffer == Some(framebuffer) {
            self.bound_framebuffer = None;
        }
        self.commands.push(GpuCommand::DeleteFramebuffer(framebuffer));
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<GpuId>) {
        if let Some(id) = framebuffer
            && !self.framebuffers.contains_key(&id)
        {
            self.report(format!("bind of unknown frame buffer {id}"));
            return;
        }
        self.bound_framebuffer = framebuffer;
        self.commands.push(GpuCommand::BindFramebuffer(framebuffer));
    }

    fn create_program(&mut self, label: &str, _vertex: &str, _fragment: &str) -> Result<GpuId> {
        let id = self.allocate_id();
        self.programs.insert(id, label.to_string());
        self.commands.push(GpuCommand::CreateProgram(id));
        Ok(id)
    }

    fn use_program(&mut self, program: Option<GpuId>) {
        self.program = program;
        self.commands.push(GpuCommand::UseProgram(program));
    }

    fn delete_program(&mut self, program: GpuId) {
        if self.programs.remove(&program).is_none() {
            self.report(format!("delete of unknown program {program}"));
            return;
        }
        if self.program == Some(program) {
            self.program = None;
        }
        self.commands.push(GpuCommand::DeleteProgram(program));
    }

    fn set_viewport(&mut self, rect: ViewportRect) {
        self.viewport = Some(rect);
        self.commands.push(GpuCommand::SetViewport(rect));
    }

    fn clear(&mut self, channels: ClearChannels) {
        self.commands.push(GpuCommand::Clear(channels));
    }

    fn set_projection(&mut self, projection: &Mat4) {
        self.commands.push(GpuCommand::SetProjection(*projection));
    }

    fn set_model_view(&mut self, model_view: &Mat4) {
        self.commands.push(GpuCommand::SetModelView(*model_view));
    }

    fn bind_material(&mut self, material: &Material) {
        self.commands.push(GpuCommand::BindMaterial(*material));
    }

    fn bind_texture(&mut self, texture: Option<GpuId>) {
        if let Some(id) = texture
            && !self.textures.contains_key(&id)
        {
            self.report(format!("bind of unknown texture {id}"));
        }
        self.texture = texture;
        self.commands.push(GpuCommand::BindTexture(texture));
    }

    fn set_light(&mut self, slot: usize, light: Option<&Light>) {
        let Some(enabled) = self.lights.get_mut(slot) else {
            self.report(format!("light slot {slot} out of range"));
            return;
        };
        *enabled = light.is_some();
        self.commands.push(GpuCommand::SetLight {
            slot,
            enabled: light.is_some(),
        });
    }

    fn enable_client_states(&mut self, states: ClientStates) {
        self.client_states |= states;
        self.commands.push(GpuCommand::EnableClientStates(states));
    }

    fn disable_client_states(&mut self, states: ClientStates) {
        self.client_states &= !states;
        self.commands.push(GpuCommand::DisableClientStates(states));
    }

    fn draw(&mut self, call: &DrawCall) -> Result<()> {
        let referenced = [Some(call.vertices), call.uvs, call.indices];
        for id in referenced.into_iter().flatten() {
            if !self.buffers.contains_key(&id) {
                self.report(format!("draw references unknown buffer {id}"));
            }
        }
        if !self.client_states.contains(ClientStates::VERTEX) {
            self.report("draw without an enabled vertex array".to_string());
        }
        self.commands.push(GpuCommand::Draw(*call));
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.commands.push(GpuCommand::Flush);
        Ok(())
    }

    fn take_error(&mut self) -> Option<String> {
        self.errors.pop_front()
    }
}
