//! Model
//!
//! The immutable, draw-ready record produced by the Model Loader and shared
//! (through `Arc`) by every instance of it. A model never holds CPU copies
//! of vertex data; geometry lives in GPU buffers owned by
//! [`ResourceOwner::Model`](crate::gpu::ResourceOwner::Model).

use std::fmt;

use glam::{Vec3, Vec4};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use uuid::Uuid;

use crate::animation::AnimationClip;
use crate::gpu::{BufferHandle, ProgramHandle, TextureHandle, VertexArrayHandle, VertexSlot};
use crate::scene::{Hierarchy, Joint, Skin, Transform};

/// Stable model identifier: a UUID v5 of the source path in the URL
/// namespace. The same path always yields the same id, across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(Uuid);

impl ModelId {
    #[must_use]
    pub fn from_source(source: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_URL, source.as_bytes()))
    }

    #[inline]
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Load progress as seen by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Pending,
    Loaded,
    Failed(String),
}

/// Why part of a source asset was left out of the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// Channel target is not a joint of any skin
    ChannelUnresolved,
    /// Morph-target weights or another path the sampler does not drive
    UnsupportedPath,
    /// Keyframe data failed validation
    MalformedChannel,
    /// Non-triangle primitive, skipped
    UnsupportedPrimitive,
    /// JOINTS_0 on a node without a skin; the primitive is drawn unskinned
    UnboundSkinAttributes,
}

/// A non-fatal load problem. Recorded on the model and logged at `warn`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// Clip or mesh name the problem belongs to
    pub context: String,
    /// Channel or primitive index within `context`
    pub index: usize,
    pub reason: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} in '{}' #{}: {}",
            self.kind, self.context, self.index, self.reason
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSlot {
    BaseColor,
}

#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    pub program: ProgramHandle,
    /// Bound textures; absent slots stay unbound
    pub textures: SmallVec<[(TextureSlot, TextureHandle); 2]>,
    pub base_color: Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub emissive: Vec3,
}

impl Material {
    #[must_use]
    pub fn texture(&self, slot: TextureSlot) -> Option<TextureHandle> {
        self.textures
            .iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, handle)| *handle)
    }
}

/// One draw-ready primitive.
#[derive(Debug, Clone)]
pub struct Primitive {
    pub vertex_array: VertexArrayHandle,
    /// Attribute buffers by [`VertexSlot`]
    pub attributes: [Option<BufferHandle>; VertexSlot::COUNT],
    pub index_buffer: Option<BufferHandle>,
    pub vertex_count: u32,
    pub index_count: u32,
    pub material: usize,
    /// Node the mesh is attached to
    pub node: usize,
    /// Skin index when the primitive carries joint indices
    pub skin: Option<usize>,
    /// First canonical joint index of `skin`
    pub joint_offset: u32,
    /// Index into [`Model::draw_nodes`] of the node whose world matrix
    /// places the primitive
    pub draw_slot: u32,
}

impl Primitive {
    #[inline]
    #[must_use]
    pub fn has_skin(&self) -> bool {
        self.skin.is_some()
    }

    /// Elements per draw: index count when indexed, vertex count otherwise.
    #[inline]
    #[must_use]
    pub fn element_count(&self) -> u32 {
        if self.index_buffer.is_some() {
            self.index_count
        } else {
            self.vertex_count
        }
    }
}

#[derive(Debug)]
pub struct Model {
    pub id: ModelId,
    pub source: String,

    pub hierarchy: Hierarchy,
    pub node_names: Vec<String>,
    /// Local TRS of every node as authored
    pub bind_pose: Vec<Transform>,

    pub primitives: Vec<Primitive>,
    pub materials: Vec<Material>,

    /// Canonical joint table, all skins concatenated in skin order
    pub joints: Vec<Joint>,
    pub skins: Vec<Skin>,
    /// Distinct nodes whose world matrices primitives are drawn with
    pub draw_nodes: Vec<usize>,

    pub clips: FxHashMap<String, AnimationClip>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Model {
    #[inline]
    #[must_use]
    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.hierarchy.len()
    }

    #[must_use]
    pub fn clip(&self, name: &str) -> Option<&AnimationClip> {
        self.clips.get(name)
    }

    /// Clip names in sorted order.
    #[must_use]
    pub fn clip_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.clips.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn find_node(&self, name: &str) -> Option<usize> {
        self.node_names.iter().position(|n| n == name)
    }

    #[must_use]
    pub fn find_joint(&self, name: &str) -> Option<usize> {
        self.joints.iter().position(|j| j.name == name)
    }

    /// Matrices in one instance record: draw-node matrices, then joints.
    #[inline]
    #[must_use]
    pub fn record_len(&self) -> usize {
        self.draw_nodes.len() + self.joints.len()
    }

    /// Byte size of one instance record.
    #[inline]
    #[must_use]
    pub fn record_size(&self) -> u64 {
        (self.record_len() * std::mem::size_of::<glam::Mat4>()) as u64
    }
}
