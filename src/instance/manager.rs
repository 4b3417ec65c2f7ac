//! Instance Manager
//!
//! Owns every [`Instance`], groups them by model and drives the per-frame
//! work:
//!
//! - [`tick`](InstanceManager::tick): advance playback, sample clips, flush
//!   dirty poses and recompute joint matrices.
//! - [`render`](InstanceManager::render): rewrite the records of dirty
//!   instances only, then submit one instanced draw per primitive per group.
//!
//! A render pass that fails on the GPU side leaves every dirty flag set, so
//! the next pass retries the same uploads.

use std::sync::Arc;

use glam::{Mat4, Quat, Vec3};
use rustc_hash::FxHashMap;

use crate::animation::PlayOptions;
use crate::assets::{Model, ModelId, ModelLoader};
use crate::errors::{Error, ResourceKind, Result};
use crate::gpu::{GpuDevice, GpuResourceManager};
use crate::instance::batch::InstanceGroup;
use crate::instance::state::{Instance, InstanceCommand, InstanceId};
use crate::scene::Transform;
use crate::settings::RuntimeSettings;

/// Counters for one render pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub draw_calls: usize,
    pub instances_drawn: usize,
    /// Instance records written to GPU memory
    pub records_uploaded: usize,
}

pub struct InstanceManager {
    instances: FxHashMap<u64, Instance>,
    groups: FxHashMap<ModelId, InstanceGroup>,
    next_id: u64,
    initial_capacity: usize,
    scratch: Vec<Mat4>,
}

impl InstanceManager {
    #[must_use]
    pub fn new(settings: &RuntimeSettings) -> Self {
        Self {
            instances: FxHashMap::default(),
            groups: FxHashMap::default(),
            next_id: 1,
            initial_capacity: settings.instance_capacity(),
            scratch: Vec::new(),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Creates an instance at the origin in bind pose. Fails with
    /// `ResourceNotFound` if the model is not loaded.
    pub fn create_instance(&mut self, models: &ModelLoader, model: ModelId) -> Result<InstanceId> {
        let model_ref = models.get(model)?;

        let id = InstanceId {
            id: self.next_id,
            model,
        };
        self.next_id += 1;

        let initial_capacity = self.initial_capacity;
        let group = self
            .groups
            .entry(model)
            .or_insert_with(|| InstanceGroup::new(Arc::clone(&model_ref), initial_capacity));
        let slot = group.push(id.id);
        self.instances
            .insert(id.id, Instance::new(id, &model_ref, slot));

        log::debug!("Created instance {id}");
        Ok(id)
    }

    /// Destroys an instance and removes it from its group. The group's
    /// instance buffer is released when the group becomes empty.
    pub fn delete_instance<D: GpuDevice>(
        &mut self,
        id: InstanceId,
        resources: &mut GpuResourceManager<D>,
    ) -> Result<()> {
        if !self.contains(id) {
            return Err(Error::not_found(ResourceKind::Instance, id));
        }
        let Some(instance) = self.instances.remove(&id.id) else {
            return Err(Error::not_found(ResourceKind::Instance, id));
        };

        if let Some(group) = self.groups.get_mut(&id.model) {
            if let Some(moved) = group.swap_remove(instance.slot) {
                if let Some(moved) = self.instances.get_mut(&moved) {
                    moved.slot = instance.slot;
                    moved.mark_dirty();
                }
            }
            if group.is_empty() {
                group.release(resources);
                self.groups.remove(&id.model);
            }
        }

        log::debug!("Deleted instance {id}");
        Ok(())
    }

    /// Destroys every instance of `model` and returns how many there were.
    pub fn release_model<D: GpuDevice>(
        &mut self,
        model: ModelId,
        resources: &mut GpuResourceManager<D>,
    ) -> usize {
        let Some(mut group) = self.groups.remove(&model) else {
            return 0;
        };
        for id in group.members() {
            self.instances.remove(id);
        }
        group.release(resources);
        group.len()
    }

    /// Destroys every instance.
    pub fn clear<D: GpuDevice>(&mut self, resources: &mut GpuResourceManager<D>) {
        for (_, mut group) in self.groups.drain() {
            group.release(resources);
        }
        self.instances.clear();
    }

    // ========================================================================
    // Queries
    // ========================================================================

    #[must_use]
    pub fn get(&self, id: InstanceId) -> Option<&Instance> {
        self.instances.get(&id.id).filter(|i| i.id == id)
    }

    #[must_use]
    pub fn contains(&self, id: InstanceId) -> bool {
        self.get(id).is_some()
    }

    #[inline]
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    #[must_use]
    pub fn group(&self, model: ModelId) -> Option<&InstanceGroup> {
        self.groups.get(&model)
    }

    #[inline]
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Live instances of `model` in record order.
    #[must_use]
    pub fn instances_of(&self, model: ModelId) -> Vec<InstanceId> {
        self.groups.get(&model).map_or_else(Vec::new, |group| {
            group
                .members()
                .iter()
                .map(|&id| InstanceId { id, model })
                .collect()
        })
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Applies one command to one instance.
    pub fn apply(&mut self, id: InstanceId, command: InstanceCommand) -> Result<()> {
        let model = self.model_of(id)?;
        let instance = self
            .instances
            .get_mut(&id.id)
            .filter(|i| i.id == id)
            .ok_or_else(|| Error::not_found(ResourceKind::Instance, id))?;
        instance.apply(&model, command)
    }

    fn model_of(&self, id: InstanceId) -> Result<Arc<Model>> {
        self.groups
            .get(&id.model)
            .map(|group| Arc::clone(group.model()))
            .ok_or_else(|| Error::not_found(ResourceKind::Instance, id))
    }

    pub fn set_position(&mut self, id: InstanceId, position: Vec3) -> Result<()> {
        self.apply(id, InstanceCommand::SetPosition(position))
    }

    pub fn set_rotation(&mut self, id: InstanceId, rotation: Quat) -> Result<()> {
        self.apply(id, InstanceCommand::SetRotation(rotation))
    }

    pub fn set_scale(&mut self, id: InstanceId, scale: Vec3) -> Result<()> {
        self.apply(id, InstanceCommand::SetScale(scale))
    }

    pub fn set_node_transform(
        &mut self,
        id: InstanceId,
        node: usize,
        transform: Transform,
    ) -> Result<()> {
        self.apply(id, InstanceCommand::SetNodeTransform { node, transform })
    }

    pub fn play_animation(
        &mut self,
        id: InstanceId,
        clip: impl Into<String>,
        options: PlayOptions,
    ) -> Result<()> {
        self.apply(
            id,
            InstanceCommand::PlayAnimation {
                clip: clip.into(),
                options,
            },
        )
    }

    pub fn stop_animation(&mut self, id: InstanceId) -> Result<()> {
        self.apply(id, InstanceCommand::StopAnimation)
    }

    // ========================================================================
    // Frame
    // ========================================================================

    /// Advances every playing instance by `dt` seconds.
    pub fn tick(&mut self, dt: f32) {
        for group in self.groups.values() {
            let model = group.model();
            for id in group.members() {
                if let Some(instance) = self.instances.get_mut(id) {
                    instance.tick(model, dt);
                }
            }
        }
    }

    /// Uploads dirty instance records and submits one pass.
    ///
    /// A GPU failure aborts this pass only; dirty state is kept so the next
    /// pass retries.
    pub fn render<D: GpuDevice>(
        &mut self,
        resources: &mut GpuResourceManager<D>,
        view_proj: Mat4,
    ) -> Result<RenderStats> {
        self.render_pass(resources, view_proj)
            .inspect_err(|e| log::error!("Render pass aborted: {e}"))
    }

    fn render_pass<D: GpuDevice>(
        &mut self,
        resources: &mut GpuResourceManager<D>,
        view_proj: Mat4,
    ) -> Result<RenderStats> {
        let mut stats = RenderStats::default();
        let mut draws = Vec::new();
        let mut uploaded: Vec<u64> = Vec::new();

        // Stable submission order across frames
        let mut models: Vec<ModelId> = self.groups.keys().copied().collect();
        models.sort_unstable();

        for model_id in models {
            let Some(group) = self.groups.get_mut(&model_id) else {
                continue;
            };
            if group.is_empty() || group.model().primitives.is_empty() {
                continue;
            }

            // A fresh buffer is zeroed, so every record is rewritten. The
            // flags stay set until a pass succeeds.
            if group.ensure_capacity(resources)? {
                for id in group.members() {
                    if let Some(instance) = self.instances.get_mut(id) {
                        instance.mark_dirty();
                    }
                }
            }
            let Some(buffer) = group.buffer() else {
                continue;
            };
            let model = Arc::clone(group.model());
            let record_size = model.record_size();

            for (slot, id) in group.members().iter().enumerate() {
                let Some(instance) = self.instances.get(id) else {
                    continue;
                };
                if !instance.is_dirty() {
                    continue;
                }
                instance.write_record(&model, &mut self.scratch);
                resources.write_buffer(
                    buffer,
                    slot as u64 * record_size,
                    bytemuck::cast_slice(&self.scratch),
                )?;
                uploaded.push(*id);
            }

            let group_draws = group.draws(view_proj);
            stats.draw_calls += group_draws.len();
            stats.instances_drawn += group.len();
            draws.extend(group_draws);
        }

        resources.submit(&draws)?;

        stats.records_uploaded = uploaded.len();
        for id in uploaded {
            if let Some(instance) = self.instances.get_mut(&id) {
                instance.clear_dirty();
            }
        }
        Ok(stats)
    }
}
