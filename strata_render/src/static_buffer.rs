//! Static vertex buffers shared with worker threads.
//!
//! [`StaticBufferStore`] is the only registry that leaves the render thread. Its lock only guards
//! slot metadata: the render thread takes a [`StaticBufferSnapshot`], releases the lock, then
//! uploads and draws. GPU buffers are owned by the render thread's [`Residency`], which re-uploads
//! whenever the snapshot revision moves and frees buffers of deleted slots when their retirement
//! message arrives.

use crate::backend::{BufferUsage, GpuId, RenderBackend};
use crate::error::{InvalidGeometryErr, Result};
use crate::math::Vec3;
use crate::registry::{MaterialHandle, Registry, StaticBufferHandle, TextureHandle, invalid};
use crate::vertex_layout::{UV_COMPONENTS, VertexLayout};
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use slotmap::SecondaryMap;
use snafu::ensure;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy)]
pub struct StaticBufferDesc<'a> {
    pub layout: VertexLayout,
    pub vertices: &'a [f32],
    pub indices: Option<&'a [u32]>,
    pub uvs: Option<&'a [f32]>,
    pub material: Option<MaterialHandle>,
    pub texture: Option<TextureHandle>,
}

impl<'a> StaticBufferDesc<'a> {
    pub fn new(layout: VertexLayout, vertices: &'a [f32]) -> Self {
        StaticBufferDesc {
            layout,
            vertices,
            indices: None,
            uvs: None,
            material: None,
            texture: None,
        }
    }

    pub fn with_indices(mut self, indices: &'a [u32]) -> Self {
        self.indices = Some(indices);
        self
    }

    pub fn with_uvs(mut self, uvs: &'a [f32]) -> Self {
        self.uvs = Some(uvs);
        self
    }

    pub fn with_material(mut self, material: MaterialHandle) -> Self {
        self.material = Some(material);
        self
    }

    pub fn with_texture(mut self, texture: TextureHandle) -> Self {
        self.texture = Some(texture);
        self
    }
}

/// Validated copy of a buffer's contents.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticGeometry {
    layout: VertexLayout,
    vertices: Box<[f32]>,
    indices: Option<Box<[u32]>>,
    uvs: Option<Box<[f32]>>,
    vertex_count: u32,
    index_count: u32,
}

impl StaticGeometry {
    pub fn from_desc(desc: &StaticBufferDesc) -> Result<Self> {
        let layout = desc.layout;
        let stride = layout.stride();

        ensure!(
            !desc.vertices.is_empty(),
            InvalidGeometryErr {
                reason: "no vertex data"
            }
        );
        ensure!(
            desc.vertices.len() % stride == 0,
            InvalidGeometryErr {
                reason: format!(
                    "{} floats is not a whole number of {layout:?} vertices ({stride} floats each)",
                    desc.vertices.len()
                )
            }
        );
        let vertex_count = u32::try_from(desc.vertices.len() / stride).map_err(|_| {
            InvalidGeometryErr {
                reason: "too many vertices",
            }
            .build()
        })?;

        let uvs = match (layout.has_uv(), desc.uvs) {
            (true, Some(uvs)) => {
                let expected = vertex_count as usize * UV_COMPONENTS;
                ensure!(
                    uvs.len() == expected,
                    InvalidGeometryErr {
                        reason: format!("expected {expected} uv floats, got {}", uvs.len())
                    }
                );
                Some(uvs.into())
            }
            (true, None) => {
                return InvalidGeometryErr {
                    reason: format!("{layout:?} needs a uv stream"),
                }
                .fail();
            }
            (false, Some(_)) => {
                return InvalidGeometryErr {
                    reason: format!("{layout:?} has no texture coordinates"),
                }
                .fail();
            }
            (false, None) => None,
        };

        let indices = match desc.indices {
            Some(indices) if !indices.is_empty() => {
                if let Some(bad) = indices.iter().find(|&&i| i >= vertex_count) {
                    return InvalidGeometryErr {
                        reason: format!("index {bad} out of range for {vertex_count} vertices"),
                    }
                    .fail();
                }
                Some(Box::<[u32]>::from(indices))
            }
            _ => None,
        };
        let index_count = match &indices {
            Some(indices) => u32::try_from(indices.len()).map_err(|_| {
                InvalidGeometryErr {
                    reason: "too many indices",
                }
                .build()
            })?,
            None => 0,
        };

        Ok(StaticGeometry {
            layout,
            vertices: desc.vertices.into(),
            indices,
            uvs,
            vertex_count,
            index_count,
        })
    }

    pub fn layout(&self) -> VertexLayout {
        self.layout
    }

    pub fn vertices(&self) -> &[f32] {
        &self.vertices
    }

    pub fn indices(&self) -> Option<&[u32]> {
        self.indices.as_deref()
    }

    pub fn uvs(&self) -> Option<&[f32]> {
        self.uvs.as_deref()
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn is_indexed(&self) -> bool {
        self.indices.is_some()
    }

    /// Index count for indexed geometry, vertex count otherwise.
    pub fn element_count(&self) -> u32 {
        if self.is_indexed() {
            self.index_count
        } else {
            self.vertex_count
        }
    }

    /// Vertex index of the `element`th element of a draw.
    pub fn element(&self, element: u32) -> u32 {
        match &self.indices {
            Some(indices) => indices[element as usize],
            None => element,
        }
    }

    pub fn position(&self, vertex: u32) -> Vec3 {
        let base = vertex as usize * self.layout.stride();
        Vec3::new(
            self.vertices[base],
            self.vertices[base + 1],
            self.vertices[base + 2],
        )
    }
}

#[derive(Debug)]
struct StaticBuffer {
    geometry: Arc<StaticGeometry>,
    material: Option<MaterialHandle>,
    texture: Option<TextureHandle>,
    revision: u64,
}

/// Draw parameters of one buffer, copied out under the store lock.
#[derive(Debug, Clone)]
pub struct StaticBufferSnapshot {
    pub geometry: Arc<StaticGeometry>,
    pub material: Option<MaterialHandle>,
    pub texture: Option<TextureHandle>,
    pub revision: u64,
}

#[derive(Debug, Default)]
struct Slots {
    buffers: Registry<StaticBufferHandle, StaticBuffer>,
    next_revision: u64,
}

impl Slots {
    fn bump(&mut self) -> u64 {
        self.next_revision += 1;
        self.next_revision
    }
}

#[derive(Debug)]
pub struct StaticBufferStore {
    slots: Mutex<Slots>,
    retired_tx: Sender<StaticBufferHandle>,
    retired_rx: Receiver<StaticBufferHandle>,
}

impl StaticBufferStore {
    pub fn new() -> Arc<Self> {
        let (retired_tx, retired_rx) = unbounded();
        Arc::new(StaticBufferStore {
            slots: Mutex::new(Slots::default()),
            retired_tx,
            retired_rx,
        })
    }

    /// Copies `desc` into the store. Callable from any thread.
    pub fn create(&self, desc: &StaticBufferDesc) -> Result<StaticBufferHandle> {
        let geometry = Arc::new(StaticGeometry::from_desc(desc)?);

        let mut slots = self.slots.lock();
        let revision = slots.bump();
        let handle = slots.buffers.insert(StaticBuffer {
            geometry,
            material: desc.material,
            texture: desc.texture,
            revision,
        });
        drop(slots);

        trace!(?handle, "Created static buffer");
        Ok(handle)
    }

    /// Replaces the contents of `handle` in place.
    pub fn recreate(&self, handle: StaticBufferHandle, desc: &StaticBufferDesc) -> Result<()> {
        let geometry = Arc::new(StaticGeometry::from_desc(desc)?);

        let mut slots = self.slots.lock();
        let revision = slots.bump();
        let buffer = slots.buffers.get_mut(handle)?;
        buffer.geometry = geometry;
        buffer.material = desc.material;
        buffer.texture = desc.texture;
        buffer.revision = revision;
        Ok(())
    }

    pub fn delete(&self, handle: StaticBufferHandle) -> Result<()> {
        let mut slots = self.slots.lock();
        slots.buffers.remove(handle)?;
        // sent under the lock, so the message is queued before the slot can be handed out again
        let _ = self.retired_tx.send(handle);
        Ok(())
    }

    pub fn snapshot(&self, handle: StaticBufferHandle) -> Result<StaticBufferSnapshot> {
        let slots = self.slots.lock();
        let buffer = slots.buffers.get(handle)?;
        Ok(StaticBufferSnapshot {
            geometry: buffer.geometry.clone(),
            material: buffer.material,
            texture: buffer.texture,
            revision: buffer.revision,
        })
    }

    pub fn geometry(&self, handle: StaticBufferHandle) -> Result<Arc<StaticGeometry>> {
        Ok(self.slots.lock().buffers.get(handle)?.geometry.clone())
    }

    pub fn contains(&self, handle: StaticBufferHandle) -> bool {
        self.slots.lock().buffers.contains(handle)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn drain_retired(&self) -> impl Iterator<Item = StaticBufferHandle> + '_ {
        self.retired_rx.try_iter()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct ResidentBuffer {
    pub revision: u64,
    pub vertices: GpuId,
    pub indices: Option<GpuId>,
    pub uvs: Option<GpuId>,
}

impl ResidentBuffer {
    fn release<B: RenderBackend>(&self, backend: &mut B) {
        backend.delete_buffer(self.vertices);
        if let Some(id) = self.indices {
            backend.delete_buffer(id);
        }
        if let Some(id) = self.uvs {
            backend.delete_buffer(id);
        }
    }
}

/// Device copies of static buffers. Render thread only.
#[derive(Debug, Default)]
pub(crate) struct Residency {
    buffers: SecondaryMap<StaticBufferHandle, ResidentBuffer>,
}

impl Residency {
    /// Frees device buffers of every slot deleted since the last call.
    pub fn reclaim<B: RenderBackend>(&mut self, store: &StaticBufferStore, backend: &mut B) -> usize {
        let mut released = 0;
        for handle in store.drain_retired() {
            if let Some(resident) = self.buffers.remove(handle) {
                resident.release(backend);
                released += 1;
            }
        }
        if released > 0 {
            debug!("Released {released} retired static buffers");
        }
        released
    }

    /// Uploads `snapshot` unless the resident copy already has its revision.
    ///
    /// A handle deleted after `snapshot` was taken is not uploaded: its retirement message may
    /// already be consumed, and nothing would free the copy again.
    pub fn ensure<B: RenderBackend>(
        &mut self,
        store: &StaticBufferStore,
        handle: StaticBufferHandle,
        snapshot: &StaticBufferSnapshot,
        backend: &mut B,
    ) -> Result<ResidentBuffer> {
        if let Some(resident) = self.buffers.get(handle)
            && resident.revision == snapshot.revision
        {
            return Ok(*resident);
        }
        // deletion removes the slot before queueing, so a live slot's retirement is still pending
        if !store.contains(handle) {
            return invalid(handle).fail();
        }

        let resident = upload(&snapshot.geometry, snapshot.revision, backend)?;
        if let Some(stale) = self.buffers.insert(handle, resident) {
            stale.release(backend);
        }
        Ok(resident)
    }

    pub fn release_all<B: RenderBackend>(&mut self, backend: &mut B) {
        for (_, resident) in self.buffers.drain() {
            resident.release(backend);
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }
}

fn upload<B: RenderBackend>(
    geometry: &StaticGeometry,
    revision: u64,
    backend: &mut B,
) -> Result<ResidentBuffer> {
    let vertices = backend.create_buffer(
        BufferUsage::Vertex(geometry.layout()),
        bytemuck::cast_slice(geometry.vertices()),
    )?;

    let indices = match geometry.indices() {
        Some(indices) => {
            match backend.create_buffer(BufferUsage::Index, bytemuck::cast_slice(indices)) {
                Ok(id) => Some(id),
                Err(e) => {
                    backend.delete_buffer(vertices);
                    return Err(e);
                }
            }
        }
        None => None,
    };

    let uvs = match geometry.uvs() {
        Some(uvs) => match backend.create_buffer(BufferUsage::TexCoord, bytemuck::cast_slice(uvs)) {
            Ok(id) => Some(id),
            Err(e) => {
                backend.delete_buffer(vertices);
                if let Some(id) = indices {
                    backend.delete_buffer(id);
                }
                return Err(e);
            }
        },
        None => None,
    };

    Ok(ResidentBuffer {
        revision,
        vertices,
        indices,
        uvs,
    })
}
