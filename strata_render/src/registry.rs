//! Generational handle registries.
//!
//! Each resource kind gets its own key type so a texture handle can never be passed where a
//! material is expected. Keys carry a slot index and a generation: deleting a resource frees the
//! slot for reuse, and any handle issued before the deletion stops resolving.

use crate::error::{InvalidHandleErr, ResourceKind, Result};
use slotmap::{Key, KeyData, SlotMap, new_key_type};
use snafu::OptionExt;

new_key_type! {
    pub struct StaticBufferHandle;
    pub struct TextureHandle;
    pub struct MaterialHandle;
    pub struct LightHandle;
    pub struct ShaderHandle;
    pub struct FrameBufferHandle;
    pub struct ViewportHandle;
}

pub trait ResourceHandle: Key {
    const KIND: ResourceKind;

    /// Packs index and generation into one integer for callers that store plain ids.
    fn to_raw(self) -> u64 {
        self.data().as_ffi()
    }

    fn from_raw(raw: u64) -> Self {
        KeyData::from_ffi(raw).into()
    }
}

macro_rules! resource_handle {
    ($($handle:ident => $kind:ident),* $(,)?) => {
        $(
            impl ResourceHandle for $handle {
                const KIND: ResourceKind = ResourceKind::$kind;
            }
        )*
    };
}

resource_handle! {
    StaticBufferHandle => StaticBuffer,
    TextureHandle => Texture,
    MaterialHandle => Material,
    LightHandle => Light,
    ShaderHandle => Shader,
    FrameBufferHandle => FrameBuffer,
    ViewportHandle => Viewport,
}

pub(crate) fn invalid<K: ResourceHandle>(handle: K) -> InvalidHandleErr<ResourceKind, u64> {
    InvalidHandleErr {
        kind: K::KIND,
        handle: handle.to_raw(),
    }
}

#[derive(Debug)]
pub struct Registry<K: ResourceHandle, V> {
    slots: SlotMap<K, V>,
}

impl<K: ResourceHandle, V> Default for Registry<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ResourceHandle, V> Registry<K, V> {
    pub fn new() -> Self {
        Self {
            slots: SlotMap::with_key(),
        }
    }

    pub fn insert(&mut self, value: V) -> K {
        self.slots.insert(value)
    }

    /// Inserts a value that needs to know its own handle.
    pub fn insert_with_key(&mut self, f: impl FnOnce(K) -> V) -> K {
        self.slots.insert_with_key(f)
    }

    pub fn get(&self, handle: K) -> Result<&V> {
        self.slots.get(handle).context(invalid(handle))
    }

    pub fn get_mut(&mut self, handle: K) -> Result<&mut V> {
        self.slots.get_mut(handle).context(invalid(handle))
    }

    /// Swaps the stored value, keeping the handle. Returns the previous value.
    pub fn replace(&mut self, handle: K, value: V) -> Result<V> {
        let slot = self.get_mut(handle)?;
        Ok(std::mem::replace(slot, value))
    }

    pub fn remove(&mut self, handle: K) -> Result<V> {
        self.slots.remove(handle).context(invalid(handle))
    }

    pub fn contains(&self, handle: K) -> bool {
        self.slots.contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> {
        self.slots.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (K, &mut V)> {
        self.slots.iter_mut()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (K, V)> + '_ {
        self.slots.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;

    #[test]
    fn get_yields_inserted_value_until_removed() {
        let mut registry: Registry<MaterialHandle, &str> = Registry::new();
        let handle = registry.insert("brick");

        assert_eq!(*registry.get(handle).unwrap(), "brick");
        assert_eq!(registry.replace(handle, "stone").unwrap(), "brick");
        assert_eq!(*registry.get(handle).unwrap(), "stone");

        assert_eq!(registry.remove(handle).unwrap(), "stone");
        let err = registry.get(handle).unwrap_err();
        assert!(matches!(
            err,
            RenderError::InvalidHandle {
                kind: ResourceKind::Material,
                ..
            }
        ));
        assert!(registry.remove(handle).is_err());
    }

    #[test]
    fn stale_handle_is_rejected_after_slot_reuse() {
        let mut registry: Registry<TextureHandle, u32> = Registry::new();
        let old = registry.insert(1);
        registry.remove(old).unwrap();

        let new = registry.insert(2);
        assert_ne!(old, new);
        assert!(!registry.contains(old));
        assert!(registry.get(old).is_err());
        assert_eq!(*registry.get(new).unwrap(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn raw_handles_round_trip() {
        let mut registry: Registry<ShaderHandle, ()> = Registry::new();
        let handle = registry.insert(());
        let raw = handle.to_raw();

        assert_eq!(ShaderHandle::from_raw(raw), handle);
        assert!(registry.contains(ShaderHandle::from_raw(raw)));
    }
}
