//! Instance Groups
//!
//! All instances of one model share a group. The group owns a single
//! storage buffer holding one fixed-size record per instance:
//!
//! ```text
//! record = [draw-node matrix; draw_nodes.len()] [joint matrix; joints.len()]
//! buffer = record[0] record[1] ... record[capacity - 1]
//! ```
//!
//! Live instances occupy records `0..len` contiguously, so every primitive
//! of the model is drawn with one instanced call of `len` instances.

use std::sync::Arc;

use glam::{Mat4, Vec4};

use crate::assets::Model;
use crate::assets::model::TextureSlot;
use crate::errors::GpuError;
use crate::gpu::{
    BufferHandle, BufferUsage, Draw, DrawUniforms, GpuDevice, GpuResourceManager, ResourceOwner,
};

pub struct InstanceGroup {
    model: Arc<Model>,
    /// Numeric instance ids, indexed by record slot
    members: Vec<u64>,
    buffer: Option<BufferHandle>,
    /// Records the current buffer can hold
    capacity: usize,
    initial_capacity: usize,
}

impl InstanceGroup {
    #[must_use]
    pub fn new(model: Arc<Model>, initial_capacity: usize) -> Self {
        Self {
            model,
            members: Vec::new(),
            buffer: None,
            capacity: 0,
            initial_capacity: initial_capacity.max(1),
        }
    }

    #[inline]
    #[must_use]
    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Instance ids in record order.
    #[inline]
    #[must_use]
    pub fn members(&self) -> &[u64] {
        &self.members
    }

    #[inline]
    #[must_use]
    pub fn buffer(&self) -> Option<BufferHandle> {
        self.buffer
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends an instance and returns its record slot.
    pub(crate) fn push(&mut self, id: u64) -> usize {
        self.members.push(id);
        self.members.len() - 1
    }

    /// Removes the record at `slot` by moving the last record into it.
    /// Returns the id of the moved instance, if one was moved.
    pub(crate) fn swap_remove(&mut self, slot: usize) -> Option<u64> {
        if slot >= self.members.len() {
            return None;
        }
        self.members.swap_remove(slot);
        self.members.get(slot).copied()
    }

    /// Makes sure the buffer holds `len()` records. Returns `true` when a new
    /// buffer was allocated, in which case every record must be rewritten.
    pub(crate) fn ensure_capacity<D: GpuDevice>(
        &mut self,
        resources: &mut GpuResourceManager<D>,
    ) -> Result<bool, GpuError> {
        let needed = self.members.len();
        if self.buffer.is_some_and(|b| resources.contains_buffer(b)) && self.capacity >= needed {
            return Ok(false);
        }

        let mut capacity = self.capacity.max(self.initial_capacity);
        while capacity < needed {
            capacity *= 2;
        }

        let label = format!("{}/instances", self.model.source);
        let size = capacity as u64 * self.model.record_size();
        let buffer = resources.create_buffer_zeroed(
            ResourceOwner::Group(self.model.id),
            &label,
            BufferUsage::STORAGE | BufferUsage::COPY_DST,
            size,
        )?;

        // The old buffer goes only after the new one exists.
        if let Some(old) = self.buffer.replace(buffer) {
            if resources.contains_buffer(old) {
                resources.delete_buffer(old)?;
            }
        }
        log::debug!(
            "Instance buffer for '{}' grown {} -> {capacity} records",
            self.model.source,
            self.capacity
        );
        self.capacity = capacity;
        Ok(true)
    }

    /// Releases the instance buffer.
    pub(crate) fn release<D: GpuDevice>(&mut self, resources: &mut GpuResourceManager<D>) {
        if let Some(buffer) = self.buffer.take() {
            if let Err(e) = resources.delete_buffer(buffer) {
                log::warn!("Instance buffer for '{}': {e}", self.model.source);
            }
        }
        self.capacity = 0;
    }

    /// One instanced draw per primitive of the model.
    #[must_use]
    pub fn draws(&self, view_proj: Mat4) -> Vec<Draw> {
        let Some(instance_buffer) = self.buffer else {
            return Vec::new();
        };
        if self.members.is_empty() {
            return Vec::new();
        }

        let model = &self.model;
        let stride = model.record_len() as u32;
        let joints_start = model.draw_nodes.len() as u32;

        model
            .primitives
            .iter()
            .filter_map(|primitive| {
                let material = model.materials.get(primitive.material)?;
                let texture = material.texture(TextureSlot::BaseColor);
                Some(Draw {
                    program: material.program,
                    vertex_array: primitive.vertex_array,
                    index_buffer: primitive.index_buffer,
                    element_count: primitive.element_count(),
                    instance_count: self.members.len() as u32,
                    instance_buffer,
                    base_color_texture: texture,
                    uniforms: DrawUniforms {
                        view_proj,
                        base_color: material.base_color,
                        emissive: material.emissive.extend(0.0),
                        params: Vec4::new(
                            material.metallic,
                            material.roughness,
                            if texture.is_some() { 1.0 } else { 0.0 },
                            0.0,
                        ),
                        layout: [
                            stride,
                            primitive.draw_slot,
                            joints_start + primitive.joint_offset,
                            u32::from(primitive.has_skin()),
                        ],
                    },
                })
            })
            .collect()
    }
}
