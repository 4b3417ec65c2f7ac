//! GPU Device Seam
//!
//! [`GpuDevice`] is the injected device context: the only surface through
//! which anything in the crate allocates, writes, releases or draws. Two
//! implementations ship with the crate:
//!
//! - [`HeadlessDevice`](headless::HeadlessDevice): CPU-side recording device
//!   used by tests and by hosts that animate without presenting.
//! - [`WgpuDevice`](wgpu_device::WgpuDevice): real GPU backend on `wgpu`.
//!
//! Devices deal in raw `u64` ids. Only the
//! [`GpuResourceManager`](resources::GpuResourceManager) sees those; the rest
//! of the crate holds generational handles.
//!
//! # Vertex layout
//!
//! Every vertex array uses the same fixed semantic-to-slot mapping, so one
//! pipeline layout serves all models:
//!
//! | Slot | Semantic      | Format        |
//! |------|---------------|---------------|
//! | 0    | position      | `f32 x 3`     |
//! | 1    | normal        | `f32 x 3`     |
//! | 2    | uv            | `f32 x 2`     |
//! | 3    | joint indices | `u16 x 4`     |
//! | 4    | joint weights | `f32 x 4`     |

pub mod headless;
pub mod resources;
pub mod wgpu_device;

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

use crate::errors::GpuError;

pub use headless::HeadlessDevice;
pub use resources::{
    BufferHandle, Draw, GpuResourceManager, ProgramHandle, ResourceOwner, TextureHandle,
    VertexArrayHandle,
};
pub use wgpu_device::WgpuDevice;

/// Device-assigned object id.
pub type RawId = u64;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct BufferUsage: u32 {
        const VERTEX   = 1 << 0;
        const INDEX    = 1 << 1;
        const STORAGE  = 1 << 2;
        const UNIFORM  = 1 << 3;
        const COPY_DST = 1 << 4;
    }
}

/// Fixed vertex attribute slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexSlot {
    Position = 0,
    Normal = 1,
    TexCoord = 2,
    Joints = 3,
    Weights = 4,
}

impl VertexSlot {
    pub const COUNT: usize = 5;

    pub const ALL: [Self; Self::COUNT] = [
        Self::Position,
        Self::Normal,
        Self::TexCoord,
        Self::Joints,
        Self::Weights,
    ];

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Bytes per vertex in this slot.
    #[must_use]
    pub const fn stride(self) -> u64 {
        match self {
            Self::Position | Self::Normal => 12,
            Self::TexCoord | Self::Joints => 8,
            Self::Weights => 16,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Position => "position",
            Self::Normal => "normal",
            Self::TexCoord => "uv",
            Self::Joints => "joints",
            Self::Weights => "weights",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BufferDesc<'a> {
    pub label: &'a str,
    pub usage: BufferUsage,
    /// Buffer size in bytes; at least `contents.len()`
    pub size: u64,
    /// Initial contents, zero-extended to `size`
    pub contents: &'a [u8],
}

/// RGBA8 2D texture.
#[derive(Debug, Clone, Copy)]
pub struct TextureDesc<'a> {
    pub label: &'a str,
    pub width: u32,
    pub height: u32,
    pub srgb: bool,
    pub rgba: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexArrayDesc {
    pub label: String,
    /// Raw buffer ids by [`VertexSlot`]
    pub slots: [Option<RawId>; VertexSlot::COUNT],
    pub vertex_count: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct ProgramDesc<'a> {
    pub label: &'a str,
    pub source: &'a str,
}

/// Per-draw uniform block, mirrored by `DrawUniforms` in the default shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DrawUniforms {
    pub view_proj: Mat4,
    pub base_color: Vec4,
    /// rgb emissive, a unused
    pub emissive: Vec4,
    /// metallic, roughness, has base-color texture, unused
    pub params: Vec4,
    /// matrices per instance record, draw slot, first joint matrix, skinned
    pub layout: [u32; 4],
}

impl Default for DrawUniforms {
    fn default() -> Self {
        Self {
            view_proj: Mat4::IDENTITY,
            base_color: Vec4::ONE,
            emissive: Vec4::ZERO,
            params: Vec4::new(1.0, 1.0, 0.0, 0.0),
            layout: [0; 4],
        }
    }
}

/// One instanced draw, in raw device ids.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub program: RawId,
    pub vertex_array: RawId,
    pub index_buffer: Option<RawId>,
    /// Index count when indexed, vertex count otherwise
    pub element_count: u32,
    pub instance_count: u32,
    /// Storage buffer holding the per-instance matrix records
    pub instance_buffer: RawId,
    pub base_color_texture: Option<RawId>,
    pub uniforms: DrawUniforms,
}

/// The device context injected into the resource manager.
///
/// Implementations are used from a single thread; none of the methods are
/// expected to be re-entrant.
pub trait GpuDevice {
    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<RawId, GpuError>;

    fn write_buffer(&mut self, buffer: RawId, offset: u64, data: &[u8]) -> Result<(), GpuError>;

    fn destroy_buffer(&mut self, buffer: RawId);

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<RawId, GpuError>;

    fn destroy_texture(&mut self, texture: RawId);

    fn create_vertex_array(&mut self, desc: &VertexArrayDesc) -> Result<RawId, GpuError>;

    fn destroy_vertex_array(&mut self, vertex_array: RawId);

    /// Compiles and links a shader program. Failures carry the native
    /// compiler output in [`GpuError::ShaderCompilation`].
    fn compile_program(&mut self, desc: &ProgramDesc<'_>) -> Result<RawId, GpuError>;

    fn destroy_program(&mut self, program: RawId);

    /// Runs one submission pass.
    fn submit(&mut self, draws: &[DrawCall]) -> Result<(), GpuError>;
}
