//! The render-thread facade over every registry and the backend.

use crate::backend::{ClearChannels, DrawCall, GpuId, RenderBackend, ViewportRect};
use crate::error::{LightSlotOutOfRangeErr, PickingInactiveErr, Result, StateStackUnderflowErr};
use crate::frame_buffer::{FrameBuffer, FrameBufferDesc};
use crate::frustum::{Frustum, Visibility};
use crate::light::{Light, MAX_LIGHTS};
use crate::material::Material;
use crate::math::{Mat4, Point, Vec3};
use crate::picking::{NameStack, PickName, PickingContext};
use crate::primitive::PrimitiveMode;
use crate::registry::{
    FrameBufferHandle, LightHandle, MaterialHandle, Registry, ShaderHandle, StaticBufferHandle,
    TextureHandle, ViewportHandle,
};
use crate::shader::Shader;
use crate::static_buffer::{Residency, StaticBufferDesc, StaticBufferStore};
use crate::texture::Texture;
use crate::transform::MatrixStack;
use crate::viewport::{DEFAULT_FAR, DEFAULT_NEAR, ProjectionMode, Viewport, valid_clip_planes};
use snafu::{OptionExt, ensure};
use std::path::Path;
use std::sync::Arc;
use strata_utils::{BoundingBox, BoundingSphere, RenderArgs};
use tracing::{debug, instrument, trace, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    pub near: f32,
    pub far: f32,
    /// Side of the square pick region, in pixels.
    pub pick_region: f32,
    pub hit_capacity: usize,
    pub frustum_culling: bool,
    /// Drain backend diagnostics in release builds too.
    pub gpu_diagnostics: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        RendererConfig {
            near: DEFAULT_NEAR,
            far: DEFAULT_FAR,
            pick_region: 1.0,
            hit_capacity: 64,
            frustum_culling: true,
            gpu_diagnostics: false,
        }
    }
}

impl RendererConfig {
    /// Defaults overridden by the process arguments.
    pub fn from_args() -> Self {
        Self::from(RenderArgs::get())
    }

    /// Replaces clip planes that don't satisfy `0 < near < far` with the defaults.
    pub fn validated(mut self) -> Self {
        if !valid_clip_planes(self.near, self.far) {
            warn!(
                near = self.near,
                far = self.far,
                "Clip planes must satisfy 0 < near < far, using defaults"
            );
            self.near = DEFAULT_NEAR;
            self.far = DEFAULT_FAR;
        }
        self
    }
}

impl From<&RenderArgs> for RendererConfig {
    fn from(args: &RenderArgs) -> Self {
        let defaults = RendererConfig::default();
        RendererConfig {
            near: args.near.unwrap_or(defaults.near),
            far: args.far.unwrap_or(defaults.far),
            pick_region: args.pick_region.unwrap_or(defaults.pick_region),
            hit_capacity: args.hit_capacity.unwrap_or(defaults.hit_capacity),
            frustum_culling: !args.no_frustum_culling,
            gpu_diagnostics: args.gpu_diagnostics,
        }
        .validated()
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct RenderStats {
    pub vertices: u64,
    pub faces: u64,
}

/// Render target state saved by [`Renderer::start_rendering_to_frame_buffer`].
#[derive(Debug, Copy, Clone)]
struct SavedTarget {
    viewport: Option<ViewportRect>,
    frame_buffer: Option<GpuId>,
}

pub struct Renderer<B: RenderBackend> {
    config: RendererConfig,
    backend: B,

    static_buffers: Arc<StaticBufferStore>,
    residency: Residency,
    textures: Registry<TextureHandle, Texture>,
    materials: Registry<MaterialHandle, Material>,
    lights: Registry<LightHandle, Light>,
    shaders: Registry<ShaderHandle, Shader>,
    frame_buffers: Registry<FrameBufferHandle, FrameBuffer>,
    viewports: Registry<ViewportHandle, Viewport>,

    active_viewport: Option<ViewportHandle>,
    projection_mode: ProjectionMode,
    projection: Mat4,
    view: Mat4,
    camera: Option<(Vec3, Vec3, Vec3)>,
    /// Culling volume for projections without a perspective frustum.
    flat_frustum: Option<Frustum>,
    matrices: MatrixStack,

    targets: Vec<SavedTarget>,
    bound_frame_buffer: Option<GpuId>,
    viewport_rect: Option<ViewportRect>,

    light_slots: [Option<LightHandle>; MAX_LIGHTS],
    primitive_mode: PrimitiveMode,
    stats: RenderStats,

    names: NameStack,
    picking: Option<PickingContext>,
}

impl<B: RenderBackend> Renderer<B> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, RendererConfig::default())
    }

    pub fn with_config(backend: B, config: RendererConfig) -> Self {
        let config = config.validated();
        debug!(?config, "Renderer created");
        Renderer {
            config,
            backend,
            static_buffers: StaticBufferStore::new(),
            residency: Residency::default(),
            textures: Registry::new(),
            materials: Registry::new(),
            lights: Registry::new(),
            shaders: Registry::new(),
            frame_buffers: Registry::new(),
            viewports: Registry::new(),
            active_viewport: None,
            projection_mode: ProjectionMode::Perspective,
            projection: Mat4::identity(),
            view: Mat4::identity(),
            camera: None,
            flat_frustum: None,
            matrices: MatrixStack::new(),
            targets: Vec::new(),
            bound_frame_buffer: None,
            viewport_rect: None,
            light_slots: [None; MAX_LIGHTS],
            primitive_mode: PrimitiveMode::default(),
            stats: RenderStats::default(),
            names: NameStack::default(),
            picking: None,
        }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Releases every device object the renderer still owns and hands the backend back.
    pub fn into_backend(mut self) -> B {
        self.release_all();
        self.backend
    }

    fn release_all(&mut self) {
        self.residency.release_all(&mut self.backend);
        for (_, mut texture) in self.textures.drain() {
            if let Some(id) = texture.take_gpu_id() {
                self.backend.delete_texture(id);
            }
        }
        for (_, frame_buffer) in self.frame_buffers.drain() {
            frame_buffer.release(&mut self.backend);
        }
        for (_, mut shader) in self.shaders.drain() {
            if let Some(id) = shader.take_program() {
                self.backend.delete_program(id);
            }
        }
    }

    // Frame

    pub fn begin_frame(&mut self) {
        self.stats = RenderStats::default();
        self.residency
            .reclaim(&self.static_buffers, &mut self.backend);
    }

    /// Submits the frame, then logs whatever the device complained about.
    #[instrument(skip_all)]
    pub fn end_frame(&mut self) -> Result<()> {
        self.backend.flush()?;
        if cfg!(debug_assertions) || self.config.gpu_diagnostics {
            while let Some(message) = self.backend.take_error() {
                warn!("GPU: {message}");
            }
        }
        Ok(())
    }

    pub fn set_primitive_mode(&mut self, mode: PrimitiveMode) {
        self.primitive_mode = mode;
    }

    pub fn primitive_mode(&self) -> PrimitiveMode {
        self.primitive_mode
    }

    pub fn render_stats(&self) -> RenderStats {
        self.stats
    }

    pub fn reset_render_stats(&mut self) {
        self.stats = RenderStats::default();
    }

    // Viewports

    pub fn create_viewport(
        &mut self,
        bottom: i32,
        left: i32,
        width: u32,
        height: u32,
        fov_deg: f32,
    ) -> ViewportHandle {
        let mut viewport = Viewport::new(
            bottom,
            left,
            width,
            height,
            fov_deg,
            self.config.near,
            self.config.far,
        );
        if let Some((position, target, up)) = self.camera {
            viewport.frustum_mut().set_camera(position, target, up);
        }
        self.viewports.insert(viewport)
    }

    pub fn viewport(&self, handle: ViewportHandle) -> Result<&Viewport> {
        self.viewports.get(handle)
    }

    /// Recomputes projections and frustum of `handle`. The active viewport is re-applied.
    pub fn resize_viewport(
        &mut self,
        handle: ViewportHandle,
        bottom: i32,
        left: i32,
        width: u32,
        height: u32,
        fov_deg: f32,
    ) -> Result<()> {
        self.viewports
            .get_mut(handle)?
            .resize(bottom, left, width, height, fov_deg);
        if self.active_viewport == Some(handle) {
            self.set_projection_mode(self.projection_mode, handle)?;
        }
        Ok(())
    }

    pub fn delete_viewport(&mut self, handle: ViewportHandle) -> Result<()> {
        self.viewports.remove(handle)?;
        if self.active_viewport == Some(handle) {
            self.active_viewport = None;
            self.flat_frustum = None;
        }
        Ok(())
    }

    /// Makes `handle` the active viewport with the projection of `mode`. While picking, the
    /// projection is narrowed by the pick matrix.
    pub fn set_projection_mode(&mut self, mode: ProjectionMode, handle: ViewportHandle) -> Result<()> {
        let viewport = self.viewports.get(handle)?;
        let rect = viewport.rect();
        let mut projection = *viewport.projection(mode);

        self.backend.set_viewport(rect);
        self.viewport_rect = Some(rect);
        self.flat_frustum = (mode != ProjectionMode::Perspective)
            .then(|| Frustum::from_matrix(&(projection * self.view)));

        if let Some(picking) = &self.picking {
            projection = picking.pick_matrix() * projection;
        }
        self.backend.set_projection(&projection);
        self.projection = projection;
        self.projection_mode = mode;
        self.active_viewport = Some(handle);
        Ok(())
    }

    pub fn projection_mode(&self) -> ProjectionMode {
        self.projection_mode
    }

    pub fn projection_matrix(&self) -> &Mat4 {
        &self.projection
    }

    /// Places the eye at `position` looking at `target`, and moves every viewport's frustum
    /// along with it.
    pub fn set_camera(&mut self, position: Vec3, target: Vec3, up: Vec3) {
        self.view = Mat4::look_at_rh(&Point::from(position), &Point::from(target), &up);
        self.camera = Some((position, target, up));

        for (_, viewport) in self.viewports.iter_mut() {
            viewport.frustum_mut().set_camera(position, target, up);
        }
        if self.flat_frustum.is_some() {
            let projection = self
                .active_viewport
                .and_then(|h| self.viewports.get(h).ok())
                .map(|v| *v.projection(self.projection_mode));
            if let Some(projection) = projection {
                self.flat_frustum = Some(Frustum::from_matrix(&(projection * self.view)));
            }
        }
    }

    pub fn view_matrix(&self) -> &Mat4 {
        &self.view
    }

    fn culling_frustum(&self) -> Option<&Frustum> {
        if !self.config.frustum_culling {
            return None;
        }
        if let Some(frustum) = &self.flat_frustum {
            return Some(frustum);
        }
        let viewport = self.viewports.get(self.active_viewport?).ok()?;
        Some(viewport.frustum())
    }

    /// Visibility against the active viewport. Everything is inside when culling is off or no
    /// viewport is active.
    pub fn point_in_frustum(&self, point: &Vec3) -> Visibility {
        self.culling_frustum()
            .map_or(Visibility::Inside, |f| f.point(point))
    }

    pub fn sphere_in_frustum(&self, sphere: &BoundingSphere) -> Visibility {
        self.culling_frustum()
            .map_or(Visibility::Inside, |f| f.sphere(sphere))
    }

    pub fn box_in_frustum(&self, bounds: &BoundingBox) -> Visibility {
        self.culling_frustum()
            .map_or(Visibility::Inside, |f| f.aabb(bounds))
    }

    // Static buffers

    /// Store shared with threads that build geometry.
    pub fn static_buffers(&self) -> Arc<StaticBufferStore> {
        self.static_buffers.clone()
    }

    pub fn create_static_buffer(&self, desc: &StaticBufferDesc) -> Result<StaticBufferHandle> {
        self.static_buffers.create(desc)
    }

    pub fn recreate_static_buffer(
        &self,
        handle: StaticBufferHandle,
        desc: &StaticBufferDesc,
    ) -> Result<()> {
        self.static_buffers.recreate(handle, desc)
    }

    pub fn delete_static_buffer(&mut self, handle: StaticBufferHandle) -> Result<()> {
        self.static_buffers.delete(handle)?;
        self.residency
            .reclaim(&self.static_buffers, &mut self.backend);
        Ok(())
    }

    /// Draws `handle` with the current transform, or records its hits while picking.
    ///
    /// The texture handle is only resolved for layouts with texture coordinates.
    pub fn render_static_buffer(&mut self, handle: StaticBufferHandle) -> Result<()> {
        // retirements queued before the snapshot are consumed first, later ones stay queued
        self.residency
            .reclaim(&self.static_buffers, &mut self.backend);
        let snapshot = self.static_buffers.snapshot(handle)?;

        let geometry = &snapshot.geometry;
        let layout = geometry.layout();

        let material = match snapshot.material {
            Some(material) => Some(*self.materials.get(material)?),
            None => None,
        };
        let texture = match snapshot.texture {
            Some(texture) if layout.has_uv() => self.textures.get(texture)?.gpu_id(),
            _ => None,
        };

        let mode = self.primitive_mode;

        if let Some(picking) = &mut self.picking {
            let mvp = self.projection * self.view * self.matrices.current();
            let hits = picking.record_geometry(geometry, &mvp, mode, &self.names);
            trace!(hits, name = self.names.top(), "Pick geometry recorded");
        } else {
            let resident = self
                .residency
                .ensure(&self.static_buffers, handle, &snapshot, &mut self.backend)?;

            if layout.binds_material() {
                self.backend
                    .bind_material(&material.unwrap_or_default());
            }
            if layout.has_uv() {
                self.backend.bind_texture(texture);
            }
            let model_view = self.view * self.matrices.current();
            self.backend.set_model_view(&model_view);

            let states = layout.client_states();
            self.backend.enable_client_states(states);
            let drawn = self.backend.draw(&DrawCall {
                vertices: resident.vertices,
                layout,
                uvs: resident.uvs,
                indices: resident.indices,
                vertex_count: geometry.vertex_count(),
                index_count: geometry.index_count(),
                mode,
            });
            self.backend.disable_client_states(states);
            drawn?;
        }

        self.stats.vertices += geometry.vertex_count() as u64;
        self.stats.faces += mode.face_count(geometry.element_count()) as u64;
        Ok(())
    }

    // Frame buffers

    /// Builds a frame buffer, or rebuilds `resetup` in place. A failed rebuild also removes
    /// `resetup`.
    #[instrument(skip_all, fields(name = %desc.name))]
    pub fn create_frame_buffer(
        &mut self,
        resetup: Option<FrameBufferHandle>,
        desc: &FrameBufferDesc,
    ) -> Result<FrameBufferHandle> {
        let Some(handle) = resetup else {
            let frame_buffer = FrameBuffer::build(desc, &mut self.backend)?;
            return Ok(self.frame_buffers.insert(frame_buffer));
        };

        self.frame_buffers
            .get(handle)?
            .release(&mut self.backend);
        match FrameBuffer::build(desc, &mut self.backend) {
            Ok(frame_buffer) => {
                self.frame_buffers.replace(handle, frame_buffer)?;
                Ok(handle)
            }
            Err(e) => {
                self.frame_buffers.remove(handle)?;
                Err(e)
            }
        }
    }

    pub fn frame_buffer(&self, handle: FrameBufferHandle) -> Result<&FrameBuffer> {
        self.frame_buffers.get(handle)
    }

    pub fn delete_frame_buffer(&mut self, handle: FrameBufferHandle) -> Result<()> {
        self.frame_buffers
            .remove(handle)?
            .release(&mut self.backend);
        Ok(())
    }

    /// Redirects drawing into `handle` and clears its attachments.
    pub fn start_rendering_to_frame_buffer(&mut self, handle: FrameBufferHandle) -> Result<()> {
        let frame_buffer = self.frame_buffers.get(handle)?;
        let fbo = frame_buffer.fbo();
        let rect = frame_buffer.viewport_rect();
        let slots = frame_buffer.color_slots();
        let channels = frame_buffer.clear_channels();

        self.targets.push(SavedTarget {
            viewport: self.viewport_rect,
            frame_buffer: self.bound_frame_buffer,
        });

        self.backend.bind_framebuffer(Some(fbo));
        self.backend.set_viewport(rect);
        self.backend.set_draw_buffers(fbo, &slots);
        self.backend.clear(channels);

        self.bound_frame_buffer = Some(fbo);
        self.viewport_rect = Some(rect);
        Ok(())
    }

    pub fn stop_rendering_to_frame_buffer(&mut self) -> Result<()> {
        let saved = self.targets.pop().context(StateStackUnderflowErr {
            stack: "frame buffer",
        })?;

        self.backend.bind_framebuffer(saved.frame_buffer);
        if let Some(rect) = saved.viewport {
            self.backend.set_viewport(rect);
        }
        self.bound_frame_buffer = saved.frame_buffer;
        self.viewport_rect = saved.viewport;
        Ok(())
    }

    pub fn diffuse_texture(&self, handle: FrameBufferHandle) -> Result<Option<GpuId>> {
        Ok(self.frame_buffers.get(handle)?.diffuse_texture())
    }

    pub fn position_texture(&self, handle: FrameBufferHandle) -> Result<Option<GpuId>> {
        Ok(self.frame_buffers.get(handle)?.position_texture())
    }

    pub fn normal_texture(&self, handle: FrameBufferHandle) -> Result<Option<GpuId>> {
        Ok(self.frame_buffers.get(handle)?.normal_texture())
    }

    pub fn depth_texture(&self, handle: FrameBufferHandle) -> Result<Option<GpuId>> {
        Ok(self.frame_buffers.get(handle)?.depth_texture())
    }

    pub fn frame_buffer_size(&self, handle: FrameBufferHandle) -> Result<(u32, u32)> {
        Ok(self.frame_buffers.get(handle)?.size())
    }

    /// Binds a frame buffer attachment for sampling in a composite pass.
    pub fn bind_frame_buffer_texture(&mut self, texture: Option<GpuId>) {
        self.backend.bind_texture(texture);
    }

    // Name picking

    fn flush_hits(&mut self) {
        if let Some(picking) = &mut self.picking {
            picking.flush();
        }
    }

    pub fn init_name_stack(&mut self) {
        self.flush_hits();
        self.names.init();
    }

    pub fn load_name_onto_stack(&mut self, name: PickName) {
        self.flush_hits();
        self.names.load(name);
    }

    pub fn push_name(&mut self, name: PickName) {
        self.flush_hits();
        self.names.push(name);
    }

    pub fn pop_name(&mut self) -> Result<PickName> {
        self.flush_hits();
        self.names.pop()
    }

    pub fn end_name_stack(&mut self) {
        self.flush_hits();
        self.names.end();
    }

    pub fn is_picking(&self) -> bool {
        self.picking.is_some()
    }

    /// Starts a picking pass at window position (`x`, `y`), origin top-left, with a hit buffer
    /// sized from the configuration.
    pub fn start_name_picking(&mut self, viewport: ViewportHandle, x: f32, y: f32) -> Result<()> {
        let context = PickingContext::with_capacity(self.config.hit_capacity);
        self.start_name_picking_with(context, viewport, x, y)
    }

    /// Like [`start_name_picking`](Self::start_name_picking), recording into `context`.
    #[instrument(skip(self, context))]
    pub fn start_name_picking_with(
        &mut self,
        mut context: PickingContext,
        viewport: ViewportHandle,
        x: f32,
        y: f32,
    ) -> Result<()> {
        let rect = self.viewports.get(viewport)?.rect();
        self.backend
            .clear(ClearChannels::COLOR | ClearChannels::DEPTH);

        context.begin(rect, x, y, self.config.pick_region);
        self.picking = Some(context);
        self.set_projection_mode(self.projection_mode, viewport)
    }

    /// Ends the picking pass and hands back its hit records.
    pub fn end_name_picking(&mut self) -> Result<PickingContext> {
        let mut context = self.picking.take().context(PickingInactiveErr)?;
        context.flush();
        if let Some(viewport) = self.active_viewport {
            self.set_projection_mode(self.projection_mode, viewport)?;
        }
        debug!(records = context.records().len(), "Name picking finished");
        Ok(context)
    }

    /// Ends picking and returns the nearest named object, `-1` if there is none.
    pub fn get_picked_object(&mut self) -> Result<PickName> {
        Ok(self.end_name_picking()?.picked_object())
    }

    // Matrices

    pub fn push_matrix(&mut self) {
        self.matrices.push();
    }

    pub fn pop_matrix(&mut self) -> Result<()> {
        self.matrices.pop()
    }

    pub fn load_identity(&mut self) {
        self.matrices.load_identity();
    }

    pub fn multiply_world_matrix(&mut self, matrix: &Mat4) {
        self.matrices.multiply(matrix);
    }

    pub fn translate(&mut self, offset: Vec3) {
        self.matrices.translate(offset);
    }

    pub fn rotate(&mut self, angle_deg: f32, axis: Vec3) {
        self.matrices.rotate(angle_deg, axis);
    }

    pub fn scale(&mut self, factors: Vec3) {
        self.matrices.scale(factors);
    }

    pub fn model_matrix(&self) -> Mat4 {
        *self.matrices.current()
    }

    pub fn model_view_matrix(&self) -> Mat4 {
        self.view * self.matrices.current()
    }

    // Materials

    pub fn create_material(&mut self, material: Material) -> MaterialHandle {
        self.materials.insert(material)
    }

    pub fn material(&self, handle: MaterialHandle) -> Result<&Material> {
        self.materials.get(handle)
    }

    pub fn update_material(&mut self, handle: MaterialHandle, material: Material) -> Result<()> {
        self.materials.replace(handle, material)?;
        Ok(())
    }

    pub fn delete_material(&mut self, handle: MaterialHandle) -> Result<()> {
        self.materials.remove(handle)?;
        Ok(())
    }

    // Lights

    pub fn create_light(&mut self, light: Light) -> LightHandle {
        self.lights.insert(light)
    }

    pub fn light(&self, handle: LightHandle) -> Result<&Light> {
        self.lights.get(handle)
    }

    pub fn update_light(&mut self, handle: LightHandle, light: Light) -> Result<()> {
        self.lights.replace(handle, light)?;
        Ok(())
    }

    /// Removes the light and switches off every slot it occupied.
    pub fn delete_light(&mut self, handle: LightHandle) -> Result<()> {
        self.lights.remove(handle)?;
        for slot in 0..MAX_LIGHTS {
            if self.light_slots[slot] == Some(handle) {
                self.light_slots[slot] = None;
                self.backend.set_light(slot, None);
            }
        }
        Ok(())
    }

    pub fn enable_light(&mut self, handle: LightHandle, slot: usize) -> Result<()> {
        ensure!(
            slot < MAX_LIGHTS,
            LightSlotOutOfRangeErr {
                slot,
                max: MAX_LIGHTS
            }
        );
        self.lights.get(handle)?;
        self.light_slots[slot] = Some(handle);
        Ok(())
    }

    pub fn disable_light(&mut self, slot: usize) -> Result<()> {
        ensure!(
            slot < MAX_LIGHTS,
            LightSlotOutOfRangeErr {
                slot,
                max: MAX_LIGHTS
            }
        );
        self.light_slots[slot] = None;
        self.backend.set_light(slot, None);
        Ok(())
    }

    /// Sends every slot to the backend, enabled lights in view space. Run once the camera for
    /// the frame is set.
    pub fn apply_lights(&mut self) -> Result<()> {
        for slot in 0..MAX_LIGHTS {
            match self.light_slots[slot] {
                Some(handle) => {
                    let light = self.lights.get(handle)?.in_view_space(&self.view);
                    self.backend.set_light(slot, Some(&light));
                }
                None => self.backend.set_light(slot, None),
            }
        }
        Ok(())
    }

    // Textures

    pub fn create_texture(
        &mut self,
        name: impl Into<String>,
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    ) -> Result<TextureHandle> {
        let texture = Texture::from_pixels(name, width, height, pixels)?;
        self.upload_texture(texture)
    }

    /// Decodes any format the `image` crate understands.
    pub fn load_texture(&mut self, path: impl AsRef<Path>) -> Result<TextureHandle> {
        let texture = Texture::load(path)?;
        self.upload_texture(texture)
    }

    fn upload_texture(&mut self, mut texture: Texture) -> Result<TextureHandle> {
        let id = self.backend.create_texture(&texture.desc())?;
        texture.set_gpu_id(id);
        debug!(name = texture.name(), %id, "Texture uploaded");
        Ok(self.textures.insert(texture))
    }

    pub fn texture(&self, handle: TextureHandle) -> Result<&Texture> {
        self.textures.get(handle)
    }

    pub fn delete_texture(&mut self, handle: TextureHandle) -> Result<()> {
        let mut texture = self.textures.remove(handle)?;
        if let Some(id) = texture.take_gpu_id() {
            self.backend.delete_texture(id);
        }
        Ok(())
    }

    pub fn bind_texture(&mut self, handle: Option<TextureHandle>) -> Result<()> {
        let id = match handle {
            Some(handle) => self.textures.get(handle)?.gpu_id(),
            None => None,
        };
        self.backend.bind_texture(id);
        Ok(())
    }

    // Shaders

    pub fn create_shader(
        &mut self,
        name: impl Into<String>,
        vertex: impl Into<String>,
        fragment: impl Into<String>,
    ) -> Result<ShaderHandle> {
        let mut shader = Shader::new(name, vertex, fragment)?;
        let program = self.backend.create_program(
            shader.name(),
            shader.vertex_source(),
            shader.fragment_source(),
        )?;
        shader.set_program(program);
        Ok(self.shaders.insert(shader))
    }

    pub fn shader(&self, handle: ShaderHandle) -> Result<&Shader> {
        self.shaders.get(handle)
    }

    /// `None` returns to the built-in program.
    pub fn use_shader(&mut self, handle: Option<ShaderHandle>) -> Result<()> {
        let program = match handle {
            Some(handle) => self.shaders.get(handle)?.program(),
            None => None,
        };
        self.backend.use_program(program);
        Ok(())
    }

    pub fn delete_shader(&mut self, handle: ShaderHandle) -> Result<()> {
        let mut shader = self.shaders.remove(handle)?;
        if let Some(program) = shader.take_program() {
            self.backend.delete_program(program);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{GpuCommand, HeadlessBackend};
    use crate::backend::{AttachmentSlot, ClientStates};
    use crate::error::RenderError;
    use crate::math::Vec4;
    use crate::picking::NO_NAME;
    use crate::vertex_layout::VertexLayout;

    fn renderer() -> Renderer<HeadlessBackend> {
        Renderer::new(HeadlessBackend::new())
    }

    const QUAD: [f32; 12] = [
        -1.0, -1.0, 0.0, //
        1.0, -1.0, 0.0, //
        1.0, 1.0, 0.0, //
        -1.0, 1.0, 0.0,
    ];
    const QUAD_INDICES: [u32; 6] = [0, 1, 2, 0, 2, 3];

    fn quad(renderer: &Renderer<HeadlessBackend>) -> StaticBufferHandle {
        renderer
            .create_static_buffer(
                &StaticBufferDesc::new(VertexLayout::Position, &QUAD).with_indices(&QUAD_INDICES),
            )
            .unwrap()
    }

    #[test]
    fn render_uploads_once_and_balances_client_states() {
        let mut r = renderer();
        let handle = quad(&r);

        r.render_static_buffer(handle).unwrap();
        r.render_static_buffer(handle).unwrap();

        let uploads = r
            .backend()
            .commands()
            .iter()
            .filter(|c| matches!(c, GpuCommand::CreateBuffer { .. }))
            .count();
        assert_eq!(uploads, 2, "vertices and indices, uploaded once");
        assert_eq!(r.backend().draws().count(), 2);
        assert_eq!(r.backend().client_states(), ClientStates::empty());
        assert_eq!(
            r.render_stats(),
            RenderStats {
                vertices: 8,
                faces: 4
            }
        );
    }

    #[test]
    fn recreate_reuploads_on_next_render() {
        let mut r = renderer();
        let handle = quad(&r);
        r.render_static_buffer(handle).unwrap();
        r.backend_mut().take_commands();

        r.recreate_static_buffer(handle, &StaticBufferDesc::new(VertexLayout::Position, &QUAD[..9]))
            .unwrap();
        r.render_static_buffer(handle).unwrap();

        let commands = r.backend().commands();
        assert!(commands.iter().any(|c| matches!(c, GpuCommand::DeleteBuffer(_))));
        let draw = r.backend().draws().next().unwrap();
        assert_eq!(draw.vertex_count, 3);
        assert_eq!(draw.indices, None);
    }

    #[test]
    fn stale_material_fails_before_touching_state() {
        let mut r = renderer();
        let material = r.create_material(Material::default());
        let handle = r
            .create_static_buffer(
                &StaticBufferDesc::new(VertexLayout::Position, &QUAD).with_material(material),
            )
            .unwrap();
        r.delete_material(material).unwrap();

        let err = r.render_static_buffer(handle).unwrap_err();
        assert!(err.is_invalid_handle());
        assert!(r.backend().commands().is_empty());
    }

    #[test]
    fn colour_layouts_skip_material() {
        let mut r = renderer();
        let vertices = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0];
        let handle = r
            .create_static_buffer(&StaticBufferDesc::new(
                VertexLayout::PositionDiffuse,
                &vertices,
            ))
            .unwrap();
        r.render_static_buffer(handle).unwrap();

        assert!(
            !r.backend()
                .commands()
                .iter()
                .any(|c| matches!(c, GpuCommand::BindMaterial(_)))
        );
    }

    #[test]
    fn stale_texture_only_matters_for_uv_layouts() {
        let mut r = renderer();
        let texture = r.create_texture("gone", 1, 1, vec![255; 4]).unwrap();
        let plain = r
            .create_static_buffer(
                &StaticBufferDesc::new(VertexLayout::Position, &QUAD).with_texture(texture),
            )
            .unwrap();
        let uvs = [0.0; 4];
        let textured = r
            .create_static_buffer(
                &StaticBufferDesc::new(VertexLayout::PositionNormalUv, &[0.0; 12])
                    .with_uvs(&uvs)
                    .with_texture(texture),
            )
            .unwrap();
        r.delete_texture(texture).unwrap();

        r.render_static_buffer(plain).unwrap();
        assert!(r.render_static_buffer(textured).unwrap_err().is_invalid_handle());
    }

    #[test]
    fn unusable_clip_planes_fall_back_to_defaults() {
        for (near, far) in [(1.0, 1.0), (10.0, 1.0), (0.0, 100.0), (f32::NAN, 10.0)] {
            let config = RendererConfig {
                near,
                far,
                ..RendererConfig::default()
            };
            let mut r = Renderer::with_config(HeadlessBackend::new(), config);
            assert_eq!((r.config().near, r.config().far), (DEFAULT_NEAR, DEFAULT_FAR));

            let viewport = r.create_viewport(0, 0, 800, 600, 60.0);
            r.set_projection_mode(ProjectionMode::Orthographic, viewport)
                .unwrap();
        }

        let args = RenderArgs {
            near: Some(5.0),
            far: Some(5.0),
            ..RenderArgs::default()
        };
        let config = RendererConfig::from(&args);
        assert_eq!((config.near, config.far), (DEFAULT_NEAR, DEFAULT_FAR));
    }

    #[test]
    fn deleted_buffers_are_released_on_the_render_thread() {
        let mut r = renderer();
        let handle = quad(&r);
        r.render_static_buffer(handle).unwrap();
        assert_eq!(r.backend().live_objects(), 2);

        r.static_buffers().delete(handle).unwrap();
        r.begin_frame();
        assert_eq!(r.backend().live_objects(), 0);
        assert!(r.render_static_buffer(handle).unwrap_err().is_invalid_handle());
    }

    #[test]
    fn frame_buffer_target_is_restored() {
        let mut r = renderer();
        let viewport = r.create_viewport(0, 0, 800, 600, 60.0);
        r.set_projection_mode(ProjectionMode::Perspective, viewport)
            .unwrap();
        let fb = r
            .create_frame_buffer(
                None,
                &FrameBufferDesc::new("gpass", 512, 512)
                    .with_diffuse()
                    .with_normal()
                    .with_depth(),
            )
            .unwrap();
        let fbo = r.frame_buffer(fb).unwrap().fbo();

        r.start_rendering_to_frame_buffer(fb).unwrap();
        assert_eq!(r.backend().bound_framebuffer(), Some(fbo));
        assert_eq!(r.backend().viewport().unwrap().width, 512);
        assert_eq!(
            r.backend().draw_buffers(fbo),
            Some(&[AttachmentSlot::Color0, AttachmentSlot::Color2][..])
        );
        assert!(
            r.backend()
                .commands()
                .contains(&GpuCommand::Clear(ClearChannels::all()))
        );

        r.stop_rendering_to_frame_buffer().unwrap();
        assert_eq!(r.backend().bound_framebuffer(), None);
        assert_eq!(r.backend().viewport().unwrap().width, 800);

        assert!(matches!(
            r.stop_rendering_to_frame_buffer(),
            Err(RenderError::StateStackUnderflow { stack: "frame buffer" })
        ));
    }

    #[test]
    fn failed_resetup_removes_the_slot() {
        let mut r = renderer();
        let fb = r
            .create_frame_buffer(None, &FrameBufferDesc::new("fb", 64, 64).with_diffuse())
            .unwrap();

        let err = r
            .create_frame_buffer(Some(fb), &FrameBufferDesc::new("fb", 64, 64))
            .unwrap_err();
        assert!(matches!(err, RenderError::FramebufferIncomplete { .. }));
        assert!(r.frame_buffer_size(fb).unwrap_err().is_invalid_handle());
        assert_eq!(r.backend().live_objects(), 0);
    }

    #[test]
    fn resetup_keeps_the_handle() {
        let mut r = renderer();
        let fb = r
            .create_frame_buffer(None, &FrameBufferDesc::new("fb", 64, 64).with_diffuse())
            .unwrap();
        let again = r
            .create_frame_buffer(
                Some(fb),
                &FrameBufferDesc::new("fb", 128, 128)
                    .with_diffuse()
                    .with_depth(),
            )
            .unwrap();

        assert_eq!(again, fb);
        assert_eq!(r.frame_buffer_size(fb).unwrap(), (128, 128));
        assert!(r.depth_texture(fb).unwrap().is_some());
        // fbo plus two attachments
        assert_eq!(r.backend().live_objects(), 3);
    }

    #[test]
    fn picking_records_instead_of_drawing() {
        let mut r = renderer();
        let viewport = r.create_viewport(0, 0, 100, 100, 60.0);
        r.set_projection_mode(ProjectionMode::Perspective, viewport)
            .unwrap();
        let handle = quad(&r);

        r.start_name_picking(viewport, 50.0, 50.0).unwrap();
        r.init_name_stack();
        r.load_name_onto_stack(7);
        r.translate(Vec3::new(0.0, 0.0, -5.0));
        r.render_static_buffer(handle).unwrap();
        r.end_name_stack();

        assert_eq!(r.backend().draws().count(), 0);
        assert_eq!(r.get_picked_object().unwrap(), 7);
        assert!(!r.is_picking());
        assert!(matches!(
            r.get_picked_object(),
            Err(RenderError::PickingInactive)
        ));
    }

    #[test]
    fn picking_off_target_finds_nothing() {
        let mut r = renderer();
        let viewport = r.create_viewport(0, 0, 100, 100, 60.0);
        r.set_projection_mode(ProjectionMode::Perspective, viewport)
            .unwrap();
        let handle = quad(&r);

        r.start_name_picking(viewport, 2.0, 2.0).unwrap();
        r.init_name_stack();
        r.load_name_onto_stack(3);
        r.translate(Vec3::new(0.0, 0.0, -50.0));
        r.render_static_buffer(handle).unwrap();

        assert_eq!(r.get_picked_object().unwrap(), NO_NAME);
    }

    #[test]
    fn pick_projection_is_removed_afterwards() {
        let mut r = renderer();
        let viewport = r.create_viewport(0, 0, 100, 100, 60.0);
        r.set_projection_mode(ProjectionMode::Perspective, viewport)
            .unwrap();
        let plain = *r.projection_matrix();

        r.start_name_picking(viewport, 10.0, 10.0).unwrap();
        assert_ne!(*r.projection_matrix(), plain);
        r.end_name_picking().unwrap();
        assert_eq!(*r.projection_matrix(), plain);
    }

    #[test]
    fn lights_follow_their_slots() {
        let mut r = renderer();
        let light = r.create_light(Light::point(Vec3::new(0.0, 5.0, 0.0), Vec4::repeat(1.0)));
        r.enable_light(light, 3).unwrap();
        r.apply_lights().unwrap();
        assert!(r.backend().light_enabled(3));

        r.delete_light(light).unwrap();
        assert!(!r.backend().light_enabled(3));
        assert!(matches!(
            r.enable_light(light, 0),
            Err(RenderError::InvalidHandle { .. })
        ));
        assert!(matches!(
            r.disable_light(MAX_LIGHTS),
            Err(RenderError::LightSlotOutOfRange { .. })
        ));
    }

    #[test]
    fn culling_can_be_disabled() {
        let config = RendererConfig {
            frustum_culling: false,
            ..RendererConfig::default()
        };
        let mut r = Renderer::with_config(HeadlessBackend::new(), config);
        let viewport = r.create_viewport(0, 0, 100, 100, 60.0);
        r.set_projection_mode(ProjectionMode::Perspective, viewport)
            .unwrap();

        assert_eq!(
            r.point_in_frustum(&Vec3::new(0.0, 0.0, 50.0)),
            Visibility::Inside
        );
    }

    #[test]
    fn camera_moves_the_frustum() {
        let mut r = renderer();
        let viewport = r.create_viewport(0, 0, 100, 100, 60.0);
        r.set_projection_mode(ProjectionMode::Perspective, viewport)
            .unwrap();
        let ahead = Vec3::new(0.0, 0.0, -10.0);
        assert_eq!(r.point_in_frustum(&ahead), Visibility::Inside);

        r.set_camera(Vec3::zeros(), Vec3::z(), Vec3::y());
        assert_eq!(r.point_in_frustum(&ahead), Visibility::Outside);
    }

    #[test]
    fn into_backend_releases_everything() {
        let mut r = renderer();
        let handle = quad(&r);
        r.render_static_buffer(handle).unwrap();
        r.create_texture("white", 1, 1, vec![255; 4]).unwrap();
        r.create_frame_buffer(None, &FrameBufferDesc::new("fb", 8, 8).with_depth())
            .unwrap();

        let backend = r.into_backend();
        assert_eq!(backend.live_objects(), 0);
    }

    #[test]
    fn config_reads_arguments() {
        let args = RenderArgs {
            near: Some(1.0),
            no_frustum_culling: true,
            ..RenderArgs::default()
        };
        let config = RendererConfig::from(&args);
        assert_eq!(config.near, 1.0);
        assert_eq!(config.far, 1000.0);
        assert!(!config.frustum_culling);
    }
}
