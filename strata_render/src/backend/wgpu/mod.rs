//! [`RenderBackend`] on top of wgpu.
//!
//! wgpu has no immediate mode, so calls are recorded into pass plans and only encoded on
//! [`flush`](RenderBackend::flush). A plan snapshots its target views when it is opened, and a new
//! plan starts whenever the target changes or a clear follows draws. Fixed-function state is
//! captured per draw into a slot of a dynamic-offset uniform arena.

mod pipeline;
mod uniform;
mod vertex;

use self::pipeline::{DEPTH_FORMAT, PipelineKey, list_topology};
use self::uniform::{DrawUniform, FixedState, LightUniform};
use self::vertex::UV_STRIDE;
use crate::backend::{
    Attachment, AttachmentSlot, BufferUsage, ClearChannels, ClientStates, DrawCall,
    FramebufferAttachments, FramebufferStatus, GpuId, RenderBackend, TextureDesc, TextureKind,
    ViewportRect,
};
use crate::error::{InvalidGeometryErr, InvalidTextureDataErr, OutOfMemoryErr, Result};
use crate::light::{Light, MAX_LIGHTS};
use crate::material::Material;
use crate::math::Mat4;
use crate::primitive::{Primitive, PrimitiveMode};
use crate::shader::DEFAULT_SHADER;
use ::wgpu::util::{BufferInitDescriptor, DeviceExt};
use ::wgpu::{
    AddressMode, BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout,
    BindGroupLayoutDescriptor, BindGroupLayoutEntry, BindingResource, BindingType, Buffer,
    BufferBinding, BufferBindingType, BufferDescriptor, BufferUsages, Color,
    CommandEncoderDescriptor, Device, DeviceDescriptor, Extent3d, ExperimentalFeatures, FilterMode,
    IndexFormat, Instance, InstanceDescriptor, LoadOp, MemoryHints, MipmapFilterMode, Operations,
    Origin3d, PipelineLayout, PipelineLayoutDescriptor, PowerPreference, Queue,
    RenderPassColorAttachment, RenderPassDepthStencilAttachment, RenderPassDescriptor,
    RenderPipeline, RequestAdapterError, RequestAdapterOptions, RequestDeviceError, Sampler,
    SamplerBindingType, SamplerDescriptor, ShaderModule, ShaderModuleDescriptor, ShaderSource,
    ShaderStages, StoreOp, TexelCopyBufferLayout, TexelCopyTextureInfo, Texture, TextureAspect,
    TextureDescriptor, TextureDimension, TextureFormat, TextureSampleType, TextureUsages,
    TextureView, TextureViewDescriptor, TextureViewDimension,
};
use futures::executor::block_on;
use parking_lot::Mutex;
use snafu::{ResultExt, Snafu, ensure};
use std::borrow::Cow;
use std::collections::{HashMap, VecDeque};
use std::num::{NonZeroU32, NonZeroU64};
use std::sync::Arc;
use tracing::{debug, info, trace};

const UNIFORM_SIZE: u64 = size_of::<DrawUniform>() as u64;
const DEFAULT_COLOR_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

#[derive(Debug, Snafu)]
#[snafu(context(suffix(Err)))]
pub enum WgpuInitError {
    #[snafu(display("No suitable graphics adapter: {source}"))]
    RequestAdapter { source: RequestAdapterError },

    #[snafu(display("Unable to get device: {source}"))]
    RequestDevice { source: RequestDeviceError },
}

fn texture_format(kind: TextureKind) -> TextureFormat {
    match kind {
        TextureKind::Rgba8 => TextureFormat::Rgba8Unorm,
        TextureKind::ColorFloat => TextureFormat::Rgba16Float,
        TextureKind::Depth => DEPTH_FORMAT,
    }
}

struct GpuBuffer {
    buffer: Buffer,
    /// Vertices, indices or texture coordinates held.
    elements: u32,
    /// Index buffers keep a host copy for unrolling strips, fans, loops and quads.
    host_indices: Option<Vec<u32>>,
}

struct GpuTexture {
    texture: Texture,
    view: TextureView,
    kind: TextureKind,
    format: TextureFormat,
    size: (u32, u32),
}

struct DefaultTarget {
    color: Texture,
    color_view: TextureView,
    depth_view: TextureView,
    size: (u32, u32),
}

impl DefaultTarget {
    fn new(device: &Device, width: u32, height: u32) -> Self {
        let (width, height) = (width.max(1), height.max(1));
        let color = create_texture(
            device,
            "Strata Default Color",
            width,
            height,
            DEFAULT_COLOR_FORMAT,
        );
        let depth = create_texture(device, "Strata Default Depth", width, height, DEPTH_FORMAT);
        DefaultTarget {
            color_view: color.create_view(&TextureViewDescriptor::default()),
            depth_view: depth.create_view(&TextureViewDescriptor::default()),
            color,
            size: (width, height),
        }
    }
}

fn create_texture(
    device: &Device,
    label: &str,
    width: u32,
    height: u32,
    format: TextureFormat,
) -> Texture {
    let mut usage = TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING;
    if format != DEPTH_FORMAT {
        usage |= TextureUsages::COPY_SRC | TextureUsages::COPY_DST;
    }
    device.create_texture(&TextureDescriptor {
        label: Some(label),
        size: Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format,
        usage,
        view_formats: &[],
    })
}

/// Attachments a pass renders into, fixed when the pass is planned.
struct PassPlan {
    colors: Vec<Option<(TextureView, TextureFormat)>>,
    depth: Option<TextureView>,
    size: (u32, u32),
    clear: ClearChannels,
    draws: Vec<RecordedDraw>,
}

impl PassPlan {
    fn color_formats(&self) -> Vec<Option<TextureFormat>> {
        self.colors
            .iter()
            .map(|c| c.as_ref().map(|(_, format)| *format))
            .collect()
    }

    fn is_empty(&self) -> bool {
        self.draws.is_empty() && self.clear.is_empty()
    }
}

struct RecordedDraw {
    pipeline: PipelineKey,
    uniform: DrawUniform,
    texture: Option<(GpuId, TextureView)>,
    vertices: Buffer,
    uvs: Buffer,
    indices: Option<Buffer>,
    count: u32,
    viewport: [f32; 4],
}

/// Index list and element count a draw ends up submitting.
struct Elements {
    indices: Option<Buffer>,
    count: u32,
}

pub struct WgpuBackend {
    device: Arc<Device>,
    queue: Arc<Queue>,

    next_id: u32,
    buffers: HashMap<GpuId, GpuBuffer>,
    textures: HashMap<GpuId, GpuTexture>,
    framebuffers: HashMap<GpuId, FramebufferAttachments>,
    programs: HashMap<GpuId, ShaderModule>,

    default_program: ShaderModule,
    default_target: DefaultTarget,
    bind_group_layout: BindGroupLayout,
    pipeline_layout: PipelineLayout,
    sampler: Sampler,
    white_view: TextureView,
    pipelines: HashMap<PipelineKey, RenderPipeline>,
    unrolled: HashMap<(GpuId, PrimitiveMode, u32), Buffer>,
    zero_uvs: Option<(Buffer, u32)>,
    uniform_arena: Option<(Buffer, u64)>,

    bound_framebuffer: Option<GpuId>,
    program: Option<GpuId>,
    texture: Option<GpuId>,
    viewport: Option<ViewportRect>,
    client_states: ClientStates,
    fixed: FixedState,

    open_pass: Option<PassPlan>,
    passes: Vec<PassPlan>,
    errors: Arc<Mutex<VecDeque<String>>>,
}

impl WgpuBackend {
    /// Renders into an owned default target of `width` x `height` when no frame buffer is bound.
    pub fn new(device: Arc<Device>, queue: Arc<Queue>, width: u32, height: u32) -> Self {
        let errors = Arc::new(Mutex::new(VecDeque::new()));
        let sink = errors.clone();
        device.on_uncaptured_error(Arc::new(move |e: ::wgpu::Error| {
            sink.lock().push_back(e.to_string());
        }));

        let default_program = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("Strata Default Shader"),
            source: ShaderSource::Wgsl(Cow::Borrowed(DEFAULT_SHADER)),
        });
        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("Strata Draw Bind Group Layout"),
            entries: &[
                BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::VERTEX_FRAGMENT,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: NonZeroU64::new(UNIFORM_SIZE),
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 1,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Float { filterable: true },
                        view_dimension: TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 2,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Sampler(SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Strata Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });
        let sampler = device.create_sampler(&SamplerDescriptor {
            label: Some("Strata Diffuse Sampler"),
            address_mode_u: AddressMode::Repeat,
            address_mode_v: AddressMode::Repeat,
            address_mode_w: AddressMode::Repeat,
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mipmap_filter: MipmapFilterMode::Nearest,
            ..SamplerDescriptor::default()
        });

        let white = create_texture(&device, "Strata White", 1, 1, TextureFormat::Rgba8Unorm);
        write_rgba8(&queue, &white, 1, 1, &[255; 4]);
        let white_view = white.create_view(&TextureViewDescriptor::default());

        let default_target = DefaultTarget::new(&device, width, height);

        WgpuBackend {
            device,
            queue,
            next_id: 0,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            default_program,
            default_target,
            bind_group_layout,
            pipeline_layout,
            sampler,
            white_view,
            pipelines: HashMap::new(),
            unrolled: HashMap::new(),
            zero_uvs: None,
            uniform_arena: None,
            bound_framebuffer: None,
            program: None,
            texture: None,
            viewport: None,
            client_states: ClientStates::empty(),
            fixed: FixedState::default(),
            open_pass: None,
            passes: Vec::new(),
            errors,
        }
    }

    /// Picks an adapter on its own and renders without a surface.
    pub fn new_offscreen(width: u32, height: u32) -> Result<Self, WgpuInitError> {
        let instance = Instance::new(&InstanceDescriptor::from_env_or_default());
        let adapter = block_on(instance.request_adapter(&RequestAdapterOptions {
            power_preference: PowerPreference::HighPerformance,
            compatible_surface: None,
            ..RequestAdapterOptions::default()
        }))
        .context(RequestAdapterErr)?;
        info!("Selected adapter: {}", adapter.get_info().name);

        let (device, queue) = block_on(adapter.request_device(&DeviceDescriptor {
            label: Some("Strata Device"),
            required_features: ::wgpu::Features::empty(),
            required_limits: adapter.limits(),
            experimental_features: ExperimentalFeatures::disabled(),
            memory_hints: MemoryHints::default(),
            trace: ::wgpu::Trace::Off,
        }))
        .context(RequestDeviceErr)?;

        Ok(Self::new(Arc::new(device), Arc::new(queue), width, height))
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    /// Colour target used while no frame buffer is bound.
    pub fn default_target(&self) -> &Texture {
        &self.default_target.color
    }

    pub fn texture(&self, id: GpuId) -> Option<&Texture> {
        self.textures.get(&id).map(|t| &t.texture)
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.close_pass();
        self.default_target = DefaultTarget::new(&self.device, width, height);
    }

    fn allocate_id(&mut self) -> GpuId {
        let id = GpuId(NonZeroU32::MIN.saturating_add(self.next_id));
        self.next_id += 1;
        id
    }

    fn report(&self, message: String) {
        trace!("{message}");
        self.errors.lock().push_back(message);
    }

    fn close_pass(&mut self) {
        if let Some(plan) = self.open_pass.take()
            && !plan.is_empty()
        {
            self.passes.push(plan);
        }
    }

    /// Snapshots the bound target. `None` if it can't be rendered to.
    fn plan_pass(&self) -> Option<PassPlan> {
        let Some(fbo) = self.bound_framebuffer else {
            let target = &self.default_target;
            return Some(PassPlan {
                colors: vec![Some((target.color_view.clone(), DEFAULT_COLOR_FORMAT))],
                depth: Some(target.depth_view.clone()),
                size: target.size,
                clear: ClearChannels::empty(),
                draws: Vec::new(),
            });
        };

        let fb = self.framebuffers.get(&fbo)?;
        let status = fb.status();
        if status != FramebufferStatus::Complete {
            self.report(format!("render to frame buffer {fbo} that is {status:?}"));
            return None;
        }

        let resolve = |attachment: &Attachment| {
            self.textures
                .get(&attachment.texture)
                .map(|t| (t.view.clone(), t.format))
        };
        let mut colors: Vec<_> = AttachmentSlot::COLORS
            .into_iter()
            .map(|slot| {
                fb.draw_buffers
                    .contains(&slot)
                    .then(|| fb.get(slot).and_then(resolve))
                    .flatten()
            })
            .collect();
        while colors.last().is_some_and(Option::is_none) {
            colors.pop();
        }
        let depth = fb
            .depth
            .as_ref()
            .and_then(|a| self.textures.get(&a.texture))
            .map(|t| t.view.clone());
        let size = fb
            .colors
            .iter()
            .flatten()
            .chain(fb.depth.iter())
            .map(|a| a.size)
            .next()?;

        if colors.is_empty() && depth.is_none() {
            return None;
        }
        Some(PassPlan {
            colors,
            depth,
            size,
            clear: ClearChannels::empty(),
            draws: Vec::new(),
        })
    }

    fn pass(&mut self) -> Option<&mut PassPlan> {
        if self.open_pass.is_none() {
            self.open_pass = self.plan_pass();
        }
        self.open_pass.as_mut()
    }

    /// Resolves which indices a draw submits, unrolling modes wgpu can't draw natively.
    fn elements(&mut self, call: &DrawCall) -> Option<Elements> {
        let native = matches!(
            call.mode,
            PrimitiveMode::Points | PrimitiveMode::Lines | PrimitiveMode::Triangles
        );

        let (source, count, host) = match call.indices {
            Some(id) => {
                let Some(buffer) = self.buffers.get(&id) else {
                    self.report(format!("draw references unknown buffer {id}"));
                    return None;
                };
                let count = call.index_count.min(buffer.elements);
                if native {
                    return Some(Elements {
                        indices: Some(buffer.buffer.clone()),
                        count,
                    });
                }
                (id, count, buffer.host_indices.clone())
            }
            None => {
                if native {
                    return Some(Elements {
                        indices: None,
                        count: call.vertex_count,
                    });
                }
                (call.vertices, call.vertex_count, None)
            }
        };

        let key = (source, call.mode, count);
        if let Some(buffer) = self.unrolled.get(&key) {
            return Some(Elements {
                indices: Some(buffer.clone()),
                count: (buffer.size() / 4) as u32,
            });
        }

        let list = unroll(call.mode, count, |e| match &host {
            Some(indices) => indices.get(e as usize).copied().unwrap_or(0),
            None => e,
        });
        if list.is_empty() {
            return None;
        }
        let buffer = self.device.create_buffer_init(&BufferInitDescriptor {
            label: Some("Strata Unrolled Indices"),
            contents: bytemuck::cast_slice(&list),
            usage: BufferUsages::INDEX,
        });
        self.unrolled.insert(key, buffer.clone());
        Some(Elements {
            indices: Some(buffer),
            count: list.len() as u32,
        })
    }

    /// Stand-in texture coordinate stream for draws without one.
    fn zero_uvs(&mut self, vertices: u32) -> Buffer {
        if let Some((buffer, capacity)) = &self.zero_uvs
            && *capacity >= vertices
        {
            return buffer.clone();
        }
        let capacity = vertices.max(1).next_power_of_two();
        let buffer = self.device.create_buffer(&BufferDescriptor {
            label: Some("Strata Zero UVs"),
            size: capacity as u64 * UV_STRIDE,
            usage: BufferUsages::VERTEX,
            mapped_at_creation: false,
        });
        self.zero_uvs = Some((buffer.clone(), capacity));
        buffer
    }

    fn bound_texture_view(&self) -> Option<(GpuId, TextureView)> {
        let id = self.texture?;
        let texture = self.textures.get(&id)?;
        if texture.kind == TextureKind::Depth {
            self.report(format!("depth texture {id} can't be sampled as a diffuse map"));
            return None;
        }
        Some((id, texture.view.clone()))
    }

    fn ensure_pipeline(&mut self, key: &PipelineKey) {
        if self.pipelines.contains_key(key) {
            return;
        }
        let module = key
            .program
            .and_then(|p| self.programs.get(&p))
            .unwrap_or(&self.default_program);
        let pipeline = key.build(&self.device, &self.pipeline_layout, module);
        debug!(?key, "Built render pipeline");
        self.pipelines.insert(key.clone(), pipeline);
    }

    /// Writes every draw's uniform into the arena and returns the stride between them.
    fn upload_uniforms(&mut self, passes: &[PassPlan]) -> Option<(Buffer, u64)> {
        let draws = passes.iter().map(|p| p.draws.len() as u64).sum::<u64>();
        if draws == 0 {
            return None;
        }
        let align = self.device.limits().min_uniform_buffer_offset_alignment as u64;
        let stride = UNIFORM_SIZE.div_ceil(align) * align;
        let needed = draws * stride;

        let arena = match &self.uniform_arena {
            Some((buffer, capacity)) if *capacity >= needed => buffer.clone(),
            _ => {
                let capacity = needed.next_power_of_two();
                let buffer = self.device.create_buffer(&BufferDescriptor {
                    label: Some("Strata Uniform Arena"),
                    size: capacity,
                    usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                self.uniform_arena = Some((buffer.clone(), capacity));
                buffer
            }
        };

        let mut bytes = vec![0u8; needed as usize];
        let uniforms = passes.iter().flat_map(|p| p.draws.iter().map(|d| &d.uniform));
        for (slot, uniform) in bytes.chunks_exact_mut(stride as usize).zip(uniforms) {
            slot[..UNIFORM_SIZE as usize].copy_from_slice(bytemuck::bytes_of(uniform));
        }
        self.queue.write_buffer(&arena, 0, &bytes);
        Some((arena, stride))
    }

    fn bind_group(&self, arena: &Buffer, texture: Option<&TextureView>) -> BindGroup {
        self.device.create_bind_group(&BindGroupDescriptor {
            label: Some("Strata Draw Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::Buffer(BufferBinding {
                        buffer: arena,
                        offset: 0,
                        size: NonZeroU64::new(UNIFORM_SIZE),
                    }),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::TextureView(texture.unwrap_or(&self.white_view)),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: BindingResource::Sampler(&self.sampler),
                },
            ],
        })
    }
}

fn write_rgba8(queue: &Queue, texture: &Texture, width: u32, height: u32, pixels: &[u8]) {
    queue.write_texture(
        TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: Origin3d::ZERO,
            aspect: TextureAspect::All,
        },
        pixels,
        TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4 * width),
            rows_per_image: Some(height),
        },
        Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
}

/// Flattens the primitives of `mode` over `count` elements into a list, mapping each element to
/// a vertex index through `vertex_of`.
fn unroll(mode: PrimitiveMode, count: u32, vertex_of: impl Fn(u32) -> u32) -> Vec<u32> {
    let mut list = Vec::new();
    for primitive in mode.assemble(count) {
        match primitive {
            Primitive::Point(a) => list.push(vertex_of(a)),
            Primitive::Line(a, b) => list.extend([vertex_of(a), vertex_of(b)]),
            Primitive::Triangle(a, b, c) => list.extend([vertex_of(a), vertex_of(b), vertex_of(c)]),
        }
    }
    list
}

/// Converts a bottom-left viewport into wgpu's top-left one, clipped to the target.
fn pass_viewport(rect: ViewportRect, (width, height): (u32, u32)) -> Option<[f32; 4]> {
    let (w, h) = (width as i64, height as i64);
    let x0 = (rect.x as i64).clamp(0, w);
    let x1 = (rect.x as i64 + rect.width as i64).clamp(0, w);
    let y0 = (rect.y as i64).clamp(0, h);
    let y1 = (rect.y as i64 + rect.height as i64).clamp(0, h);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some([x0 as f32, (h - y1) as f32, (x1 - x0) as f32, (y1 - y0) as f32])
}

impl RenderBackend for WgpuBackend {
    fn create_buffer(&mut self, usage: BufferUsage, data: &[u8]) -> Result<GpuId> {
        let max = self.device.limits().max_buffer_size;

        let (contents, elements, host_indices, usages): (Cow<[u8]>, u32, _, _) = match usage {
            BufferUsage::Vertex(layout) => {
                let floats: Vec<f32> = bytemuck::pod_collect_to_vec(data);
                let vertices = vertex::expand(layout, &floats)?;
                let bytes = bytemuck::cast_slice(&vertices).to_vec();
                (
                    Cow::Owned(bytes),
                    vertices.len() as u32,
                    None,
                    BufferUsages::VERTEX,
                )
            }
            BufferUsage::Index => {
                ensure!(
                    data.len().is_multiple_of(4),
                    InvalidGeometryErr {
                        reason: format!("{} bytes is not a whole number of u32 indices", data.len())
                    }
                );
                let indices: Vec<u32> = bytemuck::pod_collect_to_vec(data);
                (
                    Cow::Borrowed(data),
                    indices.len() as u32,
                    Some(indices),
                    BufferUsages::INDEX,
                )
            }
            BufferUsage::TexCoord => {
                ensure!(
                    (data.len() as u64).is_multiple_of(UV_STRIDE),
                    InvalidGeometryErr {
                        reason: format!("{} bytes is not a whole number of uv pairs", data.len())
                    }
                );
                (
                    Cow::Borrowed(data),
                    (data.len() as u64 / UV_STRIDE) as u32,
                    None,
                    BufferUsages::VERTEX,
                )
            }
        };

        let requested = contents.len() as u64;
        ensure!(
            requested <= max,
            OutOfMemoryErr {
                requested,
                available: max
            }
        );

        let buffer = self.device.create_buffer_init(&BufferInitDescriptor {
            label: Some("Strata Static Buffer"),
            contents: &contents,
            usage: usages,
        });
        let id = self.allocate_id();
        self.buffers.insert(
            id,
            GpuBuffer {
                buffer,
                elements,
                host_indices,
            },
        );
        Ok(id)
    }

    fn delete_buffer(&mut self, buffer: GpuId) {
        // dropped, not destroyed: draws recorded this frame still hold the buffer
        match self.buffers.remove(&buffer) {
            Some(_) => {
                self.unrolled.retain(|(source, ..), _| *source != buffer);
            }
            None => self.report(format!("delete of unknown buffer {buffer}")),
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<GpuId> {
        let max = self.device.limits().max_texture_dimension_2d;
        if desc.width > max || desc.height > max {
            return OutOfMemoryErr {
                requested: desc.byte_size(),
                available: max as u64 * max as u64 * desc.kind.bytes_per_pixel() as u64,
            }
            .fail();
        }
        if let Some(pixels) = desc.pixels {
            ensure!(
                pixels.len() as u64 == desc.byte_size(),
                InvalidTextureDataErr {
                    expected: desc.byte_size() as usize,
                    actual: pixels.len()
                }
            );
        }

        let format = texture_format(desc.kind);
        let texture = create_texture(&self.device, desc.label, desc.width, desc.height, format);
        if let Some(pixels) = desc.pixels
            && desc.kind == TextureKind::Rgba8
        {
            write_rgba8(&self.queue, &texture, desc.width, desc.height, pixels);
        }

        let id = self.allocate_id();
        self.textures.insert(
            id,
            GpuTexture {
                view: texture.create_view(&TextureViewDescriptor::default()),
                texture,
                kind: desc.kind,
                format,
                size: (desc.width, desc.height),
            },
        );
        Ok(id)
    }

    fn delete_texture(&mut self, texture: GpuId) {
        // recorded passes keep their own views until submitted
        if self.textures.remove(&texture).is_none() {
            self.report(format!("delete of unknown texture {texture}"));
            return;
        }
        for fb in self.framebuffers.values_mut() {
            fb.detach_texture(texture);
        }
        if self.texture == Some(texture) {
            self.texture = None;
        }
    }

    fn create_framebuffer(&mut self, label: &str) -> Result<GpuId> {
        let id = self.allocate_id();
        trace!(label, %id, "Created frame buffer");
        self.framebuffers
            .insert(id, FramebufferAttachments::default());
        Ok(id)
    }

    fn attach_texture(&mut self, framebuffer: GpuId, slot: AttachmentSlot, texture: GpuId) {
        let Some(gpu) = self.textures.get(&texture) else {
            self.report(format!("attach of unknown texture {texture}"));
            return;
        };
        let attachment = Attachment {
            texture,
            kind: gpu.kind,
            size: gpu.size,
        };
        let Some(fb) = self.framebuffers.get_mut(&framebuffer) else {
            self.report(format!("attach to unknown frame buffer {framebuffer}"));
            return;
        };
        fb.attach(slot, attachment);
        if self.bound_framebuffer == Some(framebuffer) {
            self.close_pass();
        }
    }

    fn set_draw_buffers(&mut self, framebuffer: GpuId, slots: &[AttachmentSlot]) {
        let Some(fb) = self.framebuffers.get_mut(&framebuffer) else {
            self.report(format!("draw buffers of unknown frame buffer {framebuffer}"));
            return;
        };
        fb.draw_buffers = slots.to_vec();
        if self.bound_framebuffer == Some(framebuffer) {
            self.close_pass();
        }
    }

    fn set_read_buffer(&mut self, framebuffer: GpuId, slot: Option<AttachmentSlot>) {
        match self.framebuffers.get_mut(&framebuffer) {
            Some(fb) => fb.read_buffer = slot,
            None => self.report(format!("read buffer of unknown frame buffer {framebuffer}")),
        }
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
            self.close_pass();
            self.bound_framebuffer = None;
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<GpuId>) {
        if let Some(id) = framebuffer
            && !self.framebuffers.contains_key(&id)
        {
            self.report(format!("bind of unknown frame buffer {id}"));
            return;
        }
        self.close_pass();
        self.bound_framebuffer = framebuffer;
    }

    fn create_program(&mut self, label: &str, vertex: &str, fragment: &str) -> Result<GpuId> {
        let source = if vertex == fragment {
            vertex.to_string()
        } else {
            format!("{vertex}\n{fragment}")
        };
        let module = self.device.create_shader_module(ShaderModuleDescriptor {
            label: Some(label),
            source: ShaderSource::Wgsl(Cow::Owned(source)),
        });
        let id = self.allocate_id();
        self.programs.insert(id, module);
        Ok(id)
    }

    fn use_program(&mut self, program: Option<GpuId>) {
        if let Some(id) = program
            && !self.programs.contains_key(&id)
        {
            self.report(format!("use of unknown program {id}"));
            return;
        }
        self.program = program;
    }

    fn delete_program(&mut self, program: GpuId) {
        if self.programs.remove(&program).is_none() {
            self.report(format!("delete of unknown program {program}"));
            return;
        }
        self.pipelines.retain(|key, _| key.program != Some(program));
        if self.program == Some(program) {
            self.program = None;
        }
    }

    fn set_viewport(&mut self, rect: ViewportRect) {
        self.viewport = Some(rect);
    }

    fn clear(&mut self, channels: ClearChannels) {
        if self.open_pass.as_ref().is_some_and(|p| !p.draws.is_empty()) {
            self.close_pass();
        }
        if let Some(pass) = self.pass() {
            pass.clear |= channels;
        }
    }

    fn set_projection(&mut self, projection: &Mat4) {
        self.fixed.projection = *projection;
    }

    fn set_model_view(&mut self, model_view: &Mat4) {
        self.fixed.model_view = *model_view;
    }

    fn bind_material(&mut self, material: &Material) {
        self.fixed.material = *material;
    }

    fn bind_texture(&mut self, texture: Option<GpuId>) {
        if let Some(id) = texture
            && !self.textures.contains_key(&id)
        {
            self.report(format!("bind of unknown texture {id}"));
            self.texture = None;
            return;
        }
        self.texture = texture;
    }

    fn set_light(&mut self, slot: usize, light: Option<&Light>) {
        if slot >= MAX_LIGHTS {
            self.report(format!("light slot {slot} out of range"));
            return;
        }
        self.fixed.lights[slot] = light.map(LightUniform::from);
    }

    fn enable_client_states(&mut self, states: ClientStates) {
        self.client_states |= states;
    }

    fn disable_client_states(&mut self, states: ClientStates) {
        self.client_states &= !states;
    }

    fn draw(&mut self, call: &DrawCall) -> Result<()> {
        if !self.client_states.contains(ClientStates::VERTEX) {
            self.report("draw without an enabled vertex array".to_string());
            return Ok(());
        }
        let Some(vertices) = self.buffers.get(&call.vertices) else {
            self.report(format!("draw references unknown buffer {}", call.vertices));
            return Ok(());
        };
        let vertex_buffer = vertices.buffer.clone();
        let vertex_count = vertices.elements;

        let Some(mut elements) = self.elements(call) else {
            return Ok(());
        };
        if elements.indices.is_none() {
            elements.count = elements.count.min(vertex_count);
        }
        if elements.count == 0 {
            return Ok(());
        }

        let layout = call.layout;
        let states = self.client_states;
        let wants_uvs = layout.has_uv() && states.contains(ClientStates::TEXCOORD);
        let uvs = match call.uvs.filter(|_| wants_uvs) {
            Some(id) => match self.buffers.get(&id) {
                Some(uvs) if uvs.elements >= vertex_count => uvs.buffer.clone(),
                Some(_) => {
                    self.report(format!("uv buffer {id} is shorter than its vertices"));
                    self.zero_uvs(vertex_count)
                }
                None => {
                    self.report(format!("draw references unknown buffer {id}"));
                    self.zero_uvs(vertex_count)
                }
            },
            None => self.zero_uvs(vertex_count),
        };
        let texture = if wants_uvs {
            self.bound_texture_view()
        } else {
            None
        };

        let uniform = self.fixed.uniform(
            layout.has_normal() && states.contains(ClientStates::NORMAL),
            layout.has_color() && states.contains(ClientStates::COLOR),
            texture.is_some(),
        );
        let program = self.program;
        let viewport = self.viewport;
        let Some(pass) = self.pass() else {
            return Ok(());
        };

        let rect = viewport.unwrap_or(ViewportRect {
            x: 0,
            y: 0,
            width: pass.size.0,
            height: pass.size.1,
        });
        let Some(viewport) = pass_viewport(rect, pass.size) else {
            return Ok(());
        };

        let pipeline = PipelineKey {
            program,
            colors: pass.color_formats(),
            depth: pass.depth.is_some(),
            topology: list_topology(call.mode),
        };
        pass.draws.push(RecordedDraw {
            pipeline,
            uniform,
            texture,
            vertices: vertex_buffer,
            uvs,
            indices: elements.indices,
            count: elements.count,
            viewport,
        });
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.close_pass();
        let passes = std::mem::take(&mut self.passes);
        if passes.is_empty() {
            return Ok(());
        }

        for pass in &passes {
            for draw in &pass.draws {
                self.ensure_pipeline(&draw.pipeline);
            }
        }

        let arena = self.upload_uniforms(&passes);
        let mut bind_groups: HashMap<Option<GpuId>, BindGroup> = HashMap::new();
        if let Some((arena, _)) = &arena {
            for draw in passes.iter().flat_map(|p| &p.draws) {
                let id = draw.texture.as_ref().map(|(id, _)| *id);
                if !bind_groups.contains_key(&id) {
                    let view = draw.texture.as_ref().map(|(_, view)| view);
                    bind_groups.insert(id, self.bind_group(arena, view));
                }
            }
        }

        let mut encoder = self.device.create_command_encoder(&CommandEncoderDescriptor {
            label: Some("Strata Frame"),
        });
        let stride = arena.as_ref().map_or(0, |(_, stride)| *stride);
        let mut slot = 0u64;

        for plan in &passes {
            let color_load = if plan.clear.contains(ClearChannels::COLOR) {
                LoadOp::Clear(Color::TRANSPARENT)
            } else {
                LoadOp::Load
            };
            let depth_load = if plan.clear.contains(ClearChannels::DEPTH) {
                LoadOp::Clear(1.0)
            } else {
                LoadOp::Load
            };

            let color_attachments: Vec<_> = plan
                .colors
                .iter()
                .map(|color| {
                    color.as_ref().map(|(view, _)| RenderPassColorAttachment {
                        view,
                        depth_slice: None,
                        resolve_target: None,
                        ops: Operations {
                            load: color_load,
                            store: StoreOp::Store,
                        },
                    })
                })
                .collect();
            let depth_stencil_attachment =
                plan.depth
                    .as_ref()
                    .map(|view| RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(Operations {
                            load: depth_load,
                            store: StoreOp::Store,
                        }),
                        stencil_ops: None,
                    });

            let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("Strata Pass"),
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                ..RenderPassDescriptor::default()
            });

            for draw in &plan.draws {
                let offset = (slot * stride) as u32;
                slot += 1;

                let texture = draw.texture.as_ref().map(|(id, _)| *id);
                let (Some(pipeline), Some(bind_group)) =
                    (self.pipelines.get(&draw.pipeline), bind_groups.get(&texture))
                else {
                    strata_utils::debug_panic!("Draw recorded without a pipeline or bind group");
                    continue;
                };

                let [x, y, w, h] = draw.viewport;
                pass.set_viewport(x, y, w, h, 0.0, 1.0);
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, bind_group, &[offset]);
                pass.set_vertex_buffer(0, draw.vertices.slice(..));
                pass.set_vertex_buffer(1, draw.uvs.slice(..));
                match &draw.indices {
                    Some(indices) => {
                        pass.set_index_buffer(indices.slice(..), IndexFormat::Uint32);
                        pass.draw_indexed(0..draw.count, 0, 0..1);
                    }
                    None => pass.draw(0..draw.count, 0..1),
                }
            }
        }

        self.queue.submit([encoder.finish()]);
        Ok(())
    }

    fn take_error(&mut self) -> Option<String> {
        self.errors.lock().pop_front()
    }
}
