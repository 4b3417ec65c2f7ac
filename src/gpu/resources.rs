//! GPU Resource Manager
//!
//! Owns every GPU object created by the crate. Objects are addressed by
//! generational slotmap handles, so a handle that outlives its object is
//! detected (`GpuError::AlreadyDeleted`) instead of reaching the device.
//!
//! Each object is tagged with a [`ResourceOwner`]. A reverse index from owner
//! to handles makes cascade release a single call ([`release_owner`]), which
//! is how failed loads roll back and how models are unloaded.
//!
//! The manager is `!Send`: all allocation, release and submission happen on
//! the thread that owns the device.
//!
//! [`release_owner`]: GpuResourceManager::release_owner

use std::marker::PhantomData;

use rustc_hash::FxHashMap;
use slotmap::{SlotMap, new_key_type};

use crate::assets::model::ModelId;
use crate::errors::{GpuError, ResourceKind};
use crate::gpu::{
    BufferDesc, BufferUsage, DrawCall, DrawUniforms, GpuDevice, ProgramDesc, RawId, TextureDesc,
    VertexArrayDesc, VertexSlot,
};

new_key_type! {
    pub struct BufferHandle;
    pub struct TextureHandle;
    pub struct VertexArrayHandle;
    pub struct ProgramHandle;
}

const DEFAULT_SHADER_SOURCE: &str = include_str!("shaders/default.wgsl");

/// Who a GPU object belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceOwner {
    /// Geometry, textures and materials of a loaded model
    Model(ModelId),
    /// Instance buffer of a model's instance group
    Group(ModelId),
    /// Shared objects such as the default shader
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AnyHandle {
    Buffer(BufferHandle),
    Texture(TextureHandle),
    VertexArray(VertexArrayHandle),
    Program(ProgramHandle),
}

#[derive(Debug)]
struct TrackedBuffer {
    raw: RawId,
    owner: ResourceOwner,
    size: u64,
}

#[derive(Debug)]
struct Tracked {
    raw: RawId,
    owner: ResourceOwner,
}

/// One instanced draw, expressed in handles.
#[derive(Debug, Clone, Copy)]
pub struct Draw {
    pub program: ProgramHandle,
    pub vertex_array: VertexArrayHandle,
    pub index_buffer: Option<BufferHandle>,
    pub element_count: u32,
    pub instance_count: u32,
    pub instance_buffer: BufferHandle,
    pub base_color_texture: Option<TextureHandle>,
    pub uniforms: DrawUniforms,
}

pub struct GpuResourceManager<D: GpuDevice> {
    device: D,

    buffers: SlotMap<BufferHandle, TrackedBuffer>,
    textures: SlotMap<TextureHandle, Tracked>,
    vertex_arrays: SlotMap<VertexArrayHandle, Tracked>,
    programs: SlotMap<ProgramHandle, Tracked>,

    /// Reverse index for cascade release
    owned: FxHashMap<ResourceOwner, Vec<AnyHandle>>,

    default_shader: Option<ProgramHandle>,
    creation_count: u64,

    _not_send: PhantomData<*const ()>,
}

impl<D: GpuDevice> GpuResourceManager<D> {
    #[must_use]
    pub fn new(device: D) -> Self {
        Self {
            device,
            buffers: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            vertex_arrays: SlotMap::with_key(),
            programs: SlotMap::with_key(),
            owned: FxHashMap::default(),
            default_shader: None,
            creation_count: 0,
            _not_send: PhantomData,
        }
    }

    #[inline]
    pub fn device(&self) -> &D {
        &self.device
    }

    #[inline]
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Number of creation calls that reached the device (successful or not).
    #[inline]
    #[must_use]
    pub fn creation_count(&self) -> u64 {
        self.creation_count
    }

    /// Number of live tracked objects of all kinds.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.buffers.len() + self.textures.len() + self.vertex_arrays.len() + self.programs.len()
    }

    /// Number of live objects tagged with `owner`.
    #[must_use]
    pub fn owned_count(&self, owner: ResourceOwner) -> usize {
        self.owned.get(&owner).map_or(0, Vec::len)
    }

    fn track(&mut self, owner: ResourceOwner, handle: AnyHandle) {
        self.owned.entry(owner).or_default().push(handle);
    }

    fn untrack(&mut self, owner: ResourceOwner, handle: AnyHandle) {
        if let Some(list) = self.owned.get_mut(&owner) {
            if let Some(pos) = list.iter().position(|h| *h == handle) {
                list.swap_remove(pos);
            }
            if list.is_empty() {
                self.owned.remove(&owner);
            }
        }
    }

    // ========================================================================
    // Buffers
    // ========================================================================

    /// Creates a buffer initialised with `contents`.
    pub fn create_buffer(
        &mut self,
        owner: ResourceOwner,
        label: &str,
        usage: BufferUsage,
        contents: &[u8],
    ) -> Result<BufferHandle, GpuError> {
        self.create_buffer_sized(owner, label, usage, contents.len() as u64, contents)
    }

    /// Creates a zero-filled buffer of `size` bytes.
    pub fn create_buffer_zeroed(
        &mut self,
        owner: ResourceOwner,
        label: &str,
        usage: BufferUsage,
        size: u64,
    ) -> Result<BufferHandle, GpuError> {
        self.create_buffer_sized(owner, label, usage, size, &[])
    }

    /// Creates a `u32` index buffer.
    pub fn create_index_buffer(
        &mut self,
        owner: ResourceOwner,
        label: &str,
        indices: &[u32],
    ) -> Result<BufferHandle, GpuError> {
        self.create_buffer(
            owner,
            label,
            BufferUsage::INDEX | BufferUsage::COPY_DST,
            bytemuck::cast_slice(indices),
        )
    }

    fn create_buffer_sized(
        &mut self,
        owner: ResourceOwner,
        label: &str,
        usage: BufferUsage,
        size: u64,
        contents: &[u8],
    ) -> Result<BufferHandle, GpuError> {
        let size = size.max(contents.len() as u64);
        self.creation_count += 1;
        let raw = self.device.create_buffer(&BufferDesc {
            label,
            usage,
            size,
            contents,
        })?;
        let handle = self.buffers.insert(TrackedBuffer { raw, owner, size });
        self.track(owner, AnyHandle::Buffer(handle));
        log::debug!("Created buffer '{label}' ({size} bytes) for {owner:?}");
        Ok(handle)
    }

    pub fn write_buffer(
        &mut self,
        handle: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GpuError> {
        let buffer = self.buffers.get(handle).ok_or(GpuError::AlreadyDeleted {
            kind: ResourceKind::Buffer,
        })?;
        if offset + data.len() as u64 > buffer.size {
            return Err(GpuError::Submission(format!(
                "write of {} bytes at offset {offset} overflows a {}-byte buffer",
                data.len(),
                buffer.size
            )));
        }
        self.device.write_buffer(buffer.raw, offset, data)
    }

    #[must_use]
    pub fn buffer_size(&self, handle: BufferHandle) -> Option<u64> {
        self.buffers.get(handle).map(|b| b.size)
    }

    #[must_use]
    pub fn contains_buffer(&self, handle: BufferHandle) -> bool {
        self.buffers.contains_key(handle)
    }

    pub fn delete_buffer(&mut self, handle: BufferHandle) -> Result<(), GpuError> {
        let buffer = self.buffers.remove(handle).ok_or(GpuError::AlreadyDeleted {
            kind: ResourceKind::Buffer,
        })?;
        self.untrack(buffer.owner, AnyHandle::Buffer(handle));
        self.device.destroy_buffer(buffer.raw);
        log::debug!("Deleted buffer {:?}", buffer.raw);
        Ok(())
    }

    // ========================================================================
    // Textures
    // ========================================================================

    /// Uploads an RGBA8 image.
    pub fn create_texture(
        &mut self,
        owner: ResourceOwner,
        label: &str,
        width: u32,
        height: u32,
        rgba: &[u8],
        srgb: bool,
    ) -> Result<TextureHandle, GpuError> {
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected || expected == 0 {
            return Err(GpuError::CreationFailed {
                kind: ResourceKind::Texture,
                reason: format!(
                    "'{label}': {width}x{height} RGBA8 needs {expected} bytes, got {}",
                    rgba.len()
                ),
            });
        }
        self.creation_count += 1;
        let raw = self.device.create_texture(&TextureDesc {
            label,
            width,
            height,
            srgb,
            rgba,
        })?;
        let handle = self.textures.insert(Tracked { raw, owner });
        self.track(owner, AnyHandle::Texture(handle));
        log::debug!("Created texture '{label}' ({width}x{height}) for {owner:?}");
        Ok(handle)
    }

    #[must_use]
    pub fn contains_texture(&self, handle: TextureHandle) -> bool {
        self.textures.contains_key(handle)
    }

    pub fn delete_texture(&mut self, handle: TextureHandle) -> Result<(), GpuError> {
        let texture = self.textures.remove(handle).ok_or(GpuError::AlreadyDeleted {
            kind: ResourceKind::Texture,
        })?;
        self.untrack(texture.owner, AnyHandle::Texture(handle));
        self.device.destroy_texture(texture.raw);
        log::debug!("Deleted texture {:?}", texture.raw);
        Ok(())
    }

    // ========================================================================
    // Vertex arrays
    // ========================================================================

    /// Binds attribute buffers at their fixed slots. Position is required.
    pub fn create_vertex_array(
        &mut self,
        owner: ResourceOwner,
        label: &str,
        slots: [Option<BufferHandle>; VertexSlot::COUNT],
        vertex_count: u32,
    ) -> Result<VertexArrayHandle, GpuError> {
        if slots[VertexSlot::Position.index()].is_none() {
            return Err(GpuError::CreationFailed {
                kind: ResourceKind::VertexArray,
                reason: format!("'{label}' has no position buffer"),
            });
        }

        let mut raw_slots = [None; VertexSlot::COUNT];
        for (raw, handle) in raw_slots.iter_mut().zip(slots) {
            if let Some(handle) = handle {
                let buffer = self.buffers.get(handle).ok_or(GpuError::AlreadyDeleted {
                    kind: ResourceKind::Buffer,
                })?;
                *raw = Some(buffer.raw);
            }
        }

        self.creation_count += 1;
        let raw = self.device.create_vertex_array(&VertexArrayDesc {
            label: label.to_string(),
            slots: raw_slots,
            vertex_count,
        })?;
        let handle = self.vertex_arrays.insert(Tracked { raw, owner });
        self.track(owner, AnyHandle::VertexArray(handle));
        log::debug!("Created vertex array '{label}' ({vertex_count} vertices) for {owner:?}");
        Ok(handle)
    }

    #[must_use]
    pub fn contains_vertex_array(&self, handle: VertexArrayHandle) -> bool {
        self.vertex_arrays.contains_key(handle)
    }

    pub fn delete_vertex_array(&mut self, handle: VertexArrayHandle) -> Result<(), GpuError> {
        let vao = self
            .vertex_arrays
            .remove(handle)
            .ok_or(GpuError::AlreadyDeleted {
                kind: ResourceKind::VertexArray,
            })?;
        self.untrack(vao.owner, AnyHandle::VertexArray(handle));
        self.device.destroy_vertex_array(vao.raw);
        log::debug!("Deleted vertex array {:?}", vao.raw);
        Ok(())
    }

    // ========================================================================
    // Programs
    // ========================================================================

    /// The baseline shader program, compiled on first use and cached.
    ///
    /// Compilation failure is returned every time it is attempted; there is
    /// no fallback program.
    pub fn get_default_shader(&mut self) -> Result<ProgramHandle, GpuError> {
        if let Some(handle) = self.default_shader {
            if self.programs.contains_key(handle) {
                return Ok(handle);
            }
        }
        let handle = self.compile_program(ResourceOwner::System, "default", DEFAULT_SHADER_SOURCE)?;
        self.default_shader = Some(handle);
        Ok(handle)
    }

    pub fn compile_program(
        &mut self,
        owner: ResourceOwner,
        label: &str,
        source: &str,
    ) -> Result<ProgramHandle, GpuError> {
        self.creation_count += 1;
        let raw = self
            .device
            .compile_program(&ProgramDesc { label, source })
            .inspect_err(|e| log::error!("Shader '{label}' failed to compile: {e}"))?;
        let handle = self.programs.insert(Tracked { raw, owner });
        self.track(owner, AnyHandle::Program(handle));
        log::debug!("Compiled shader program '{label}'");
        Ok(handle)
    }

    pub fn delete_program(&mut self, handle: ProgramHandle) -> Result<(), GpuError> {
        let program = self.programs.remove(handle).ok_or(GpuError::AlreadyDeleted {
            kind: ResourceKind::Program,
        })?;
        self.untrack(program.owner, AnyHandle::Program(handle));
        self.device.destroy_program(program.raw);
        if self.default_shader == Some(handle) {
            self.default_shader = None;
        }
        Ok(())
    }

    // ========================================================================
    // Bulk release
    // ========================================================================

    /// Releases every object tagged with `owner` and returns how many were
    /// released. Vertex arrays go before the buffers they reference.
    pub fn release_owner(&mut self, owner: ResourceOwner) -> usize {
        let Some(mut handles) = self.owned.remove(&owner) else {
            return 0;
        };
        handles.sort_by_key(|h| match h {
            AnyHandle::VertexArray(_) => 0,
            AnyHandle::Program(_) => 1,
            AnyHandle::Texture(_) => 2,
            AnyHandle::Buffer(_) => 3,
        });

        let count = handles.len();
        for handle in handles {
            self.release_untracked(handle);
        }
        log::debug!("Released {count} GPU objects owned by {owner:?}");
        count
    }

    fn release_untracked(&mut self, handle: AnyHandle) {
        match handle {
            AnyHandle::Buffer(h) => {
                if let Some(b) = self.buffers.remove(h) {
                    self.device.destroy_buffer(b.raw);
                }
            }
            AnyHandle::Texture(h) => {
                if let Some(t) = self.textures.remove(h) {
                    self.device.destroy_texture(t.raw);
                }
            }
            AnyHandle::VertexArray(h) => {
                if let Some(v) = self.vertex_arrays.remove(h) {
                    self.device.destroy_vertex_array(v.raw);
                }
            }
            AnyHandle::Program(h) => {
                if let Some(p) = self.programs.remove(h) {
                    self.device.destroy_program(p.raw);
                    if self.default_shader == Some(h) {
                        self.default_shader = None;
                    }
                }
            }
        }
    }

    /// Releases every tracked object.
    pub fn dispose(&mut self) {
        let owners: Vec<ResourceOwner> = self.owned.keys().copied().collect();
        let mut released = 0;
        for owner in owners {
            released += self.release_owner(owner);
        }
        self.default_shader = None;
        log::debug!("Disposed GPU resource manager ({released} objects)");
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Resolves handles and submits one pass.
    pub fn submit(&mut self, draws: &[Draw]) -> Result<(), GpuError> {
        let mut calls = Vec::with_capacity(draws.len());
        for draw in draws {
            calls.push(DrawCall {
                program: self.programs.get(draw.program).map(|p| p.raw).ok_or(
                    GpuError::AlreadyDeleted {
                        kind: ResourceKind::Program,
                    },
                )?,
                vertex_array: self.vertex_arrays.get(draw.vertex_array).map(|v| v.raw).ok_or(
                    GpuError::AlreadyDeleted {
                        kind: ResourceKind::VertexArray,
                    },
                )?,
                index_buffer: draw
                    .index_buffer
                    .map(|h| self.raw_buffer(h))
                    .transpose()?,
                element_count: draw.element_count,
                instance_count: draw.instance_count,
                instance_buffer: self.raw_buffer(draw.instance_buffer)?,
                base_color_texture: draw
                    .base_color_texture
                    .map(|h| {
                        self.textures.get(h).map(|t| t.raw).ok_or(GpuError::AlreadyDeleted {
                            kind: ResourceKind::Texture,
                        })
                    })
                    .transpose()?,
                uniforms: draw.uniforms,
            });
        }
        self.device.submit(&calls)
    }

    fn raw_buffer(&self, handle: BufferHandle) -> Result<RawId, GpuError> {
        self.buffers
            .get(handle)
            .map(|b| b.raw)
            .ok_or(GpuError::AlreadyDeleted {
                kind: ResourceKind::Buffer,
            })
    }
}

impl<D: GpuDevice> Drop for GpuResourceManager<D> {
    fn drop(&mut self) {
        if self.live_count() > 0 {
            self.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessDevice;

    #[test]
    fn stale_handle_reports_already_deleted() {
        let mut resources = GpuResourceManager::new(HeadlessDevice::new());
        let buffer = resources
            .create_buffer(ResourceOwner::System, "b", BufferUsage::VERTEX, &[0u8; 16])
            .unwrap();
        resources.delete_buffer(buffer).unwrap();
        assert_eq!(
            resources.delete_buffer(buffer),
            Err(GpuError::AlreadyDeleted {
                kind: ResourceKind::Buffer
            })
        );
        assert_eq!(resources.device().live_buffers(), 0);
    }

    #[test]
    fn default_shader_is_cached() {
        let mut resources = GpuResourceManager::new(HeadlessDevice::new());
        let a = resources.get_default_shader().unwrap();
        let b = resources.get_default_shader().unwrap();
        assert_eq!(a, b);
        assert_eq!(resources.creation_count(), 1);
    }
}
