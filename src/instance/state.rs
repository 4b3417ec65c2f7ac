use std::fmt;

use glam::{Mat4, Quat, Vec3};

use crate::animation::{AnimationState, PlayOptions, TrackCursor, sample_clip};
use crate::assets::{Model, ModelId};
use crate::errors::{Error, ResourceKind, Result};
use crate::scene::{Pose, Transform, compute_all_joint_matrices};

/// Instance identifier. Numeric ids are assigned in increasing order and
/// never reused by the same manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId {
    pub id: u64,
    pub model: ModelId,
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} of {}", self.id, self.model)
    }
}

/// Every mutation an instance accepts, dispatched through
/// [`InstanceManager::apply`](crate::instance::InstanceManager::apply).
#[derive(Debug, Clone, PartialEq)]
pub enum InstanceCommand {
    SetPosition(Vec3),
    SetRotation(Quat),
    SetScale(Vec3),
    /// Overrides one node's local transform; only that subtree is recomputed.
    SetNodeTransform { node: usize, transform: Transform },
    PlayAnimation { clip: String, options: PlayOptions },
    StopAnimation,
}

/// One placed, independently animated copy of a model.
///
/// Holds only CPU-side state. GPU data for the instance lives in its
/// group's instance buffer, at record `slot`.
#[derive(Debug)]
pub struct Instance {
    pub(crate) id: InstanceId,
    pub(crate) slot: usize,

    transform: Transform,
    world: Mat4,
    animation: AnimationState,

    pose: Pose,
    cursors: Vec<TrackCursor>,
    joint_matrices: Vec<Mat4>,

    dirty: bool,
}

impl Instance {
    pub(crate) fn new(id: InstanceId, model: &Model, slot: usize) -> Self {
        let pose = Pose::new(&model.hierarchy, model.bind_pose.clone());
        let mut joint_matrices = Vec::new();
        compute_all_joint_matrices(pose.worlds(), &model.joints, &model.skins, &mut joint_matrices);

        Self {
            id,
            slot,
            transform: Transform::IDENTITY,
            world: Mat4::IDENTITY,
            animation: AnimationState::default(),
            pose,
            cursors: Vec::new(),
            joint_matrices,
            dirty: true,
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> InstanceId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Placement matrix composed from the instance transform.
    #[inline]
    #[must_use]
    pub fn world_matrix(&self) -> Mat4 {
        self.world
    }

    #[inline]
    #[must_use]
    pub fn animation(&self) -> &AnimationState {
        &self.animation
    }

    #[inline]
    #[must_use]
    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    /// Skinning matrices by canonical joint index.
    #[inline]
    #[must_use]
    pub fn joint_matrices(&self) -> &[Mat4] {
        &self.joint_matrices
    }

    /// Skinning matrices as `joint_count * 16` column-major floats.
    #[must_use]
    pub fn joint_matrices_flat(&self) -> &[f32] {
        bytemuck::cast_slice(&self.joint_matrices)
    }

    /// Whether the GPU record is stale.
    #[inline]
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    fn refresh_world(&mut self) {
        self.world = self.transform.to_mat4();
        self.dirty = true;
    }

    pub(crate) fn apply(&mut self, model: &Model, command: InstanceCommand) -> Result<()> {
        match command {
            InstanceCommand::SetPosition(position) => {
                self.transform.position = position;
                self.refresh_world();
            }
            InstanceCommand::SetRotation(rotation) => {
                self.transform.rotation = rotation.normalize();
                self.refresh_world();
            }
            InstanceCommand::SetScale(scale) => {
                self.transform.scale = scale;
                self.refresh_world();
            }
            InstanceCommand::SetNodeTransform { node, transform } => {
                if !self.pose.set_local(&model.hierarchy, node, transform) {
                    return Err(Error::not_found(ResourceKind::Node, node));
                }
                self.update_pose(model);
            }
            InstanceCommand::PlayAnimation { clip, options } => {
                // Unknown clips are accepted here and stopped on the next tick.
                self.animation.play(clip, options);
                self.cursors.clear();
                self.dirty = true;
            }
            InstanceCommand::StopAnimation => self.animation.stop(),
        }
        Ok(())
    }

    /// Advances playback, samples the current clip and refreshes joint
    /// matrices when the pose changed.
    pub(crate) fn tick(&mut self, model: &Model, dt: f32) {
        if self.animation.playing {
            let clip = self
                .animation
                .clip
                .as_deref()
                .and_then(|name| model.clip(name));
            match clip {
                Some(clip) => {
                    let time = self.animation.advance(dt, clip.duration);
                    sample_clip(
                        clip,
                        time,
                        &model.joints,
                        &model.hierarchy,
                        &mut self.pose,
                        &mut self.cursors,
                    );
                    self.dirty = true;
                }
                None => {
                    log::warn!(
                        "Instance {} plays unknown clip {:?}; stopping",
                        self.id,
                        self.animation.clip
                    );
                    self.animation.stop();
                }
            }
        }
        self.update_pose(model);
    }

    fn update_pose(&mut self, model: &Model) {
        if self.pose.has_pending() {
            self.pose.flush(&model.hierarchy);
            compute_all_joint_matrices(
                self.pose.worlds(),
                &model.joints,
                &model.skins,
                &mut self.joint_matrices,
            );
            self.dirty = true;
        }
    }

    /// Writes this instance's GPU record into `out`: one matrix per draw
    /// node (instance world times node world), then the joint matrices.
    pub(crate) fn write_record(&self, model: &Model, out: &mut Vec<Mat4>) {
        out.clear();
        for &node in &model.draw_nodes {
            let node_world = self.pose.world(node).copied().map_or(Mat4::IDENTITY, Mat4::from);
            out.push(self.world * node_world);
        }
        out.extend_from_slice(&self.joint_matrices);
    }
}
