//! Headless Device
//!
//! A [`GpuDevice`] that keeps every object in host memory and records what
//! was asked of it. Buffer writes land in real byte vectors, so tests can
//! read back instance records; submissions are validated against live ids,
//! so a draw that references a released object fails exactly like it would
//! on a real device.

use rustc_hash::FxHashMap;

use crate::errors::{GpuError, ResourceKind};
use crate::gpu::{
    BufferDesc, BufferUsage, DrawCall, GpuDevice, ProgramDesc, RawId, TextureDesc,
    VertexArrayDesc,
};

#[derive(Debug, Clone)]
pub struct HeadlessBuffer {
    pub label: String,
    pub usage: BufferUsage,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct HeadlessTexture {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub srgb: bool,
}

/// Running totals of device calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceCounters {
    pub buffers_created: usize,
    pub textures_created: usize,
    pub vertex_arrays_created: usize,
    pub programs_compiled: usize,
    pub buffer_writes: usize,
    pub objects_destroyed: usize,
    pub submissions: usize,
}

/// One recorded `write_buffer` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferWrite {
    pub buffer: RawId,
    pub offset: u64,
    pub len: usize,
}

#[derive(Debug, Default)]
pub struct HeadlessDevice {
    next_id: RawId,

    buffers: FxHashMap<RawId, HeadlessBuffer>,
    textures: FxHashMap<RawId, HeadlessTexture>,
    vertex_arrays: FxHashMap<RawId, VertexArrayDesc>,
    programs: FxHashMap<RawId, String>,

    counters: DeviceCounters,
    writes: Vec<BufferWrite>,
    last_submission: Vec<DrawCall>,

    // Failure injection
    buffer_budget: Option<usize>,
    write_budget: Option<usize>,
    shader_failure: Option<String>,
}

impl HeadlessDevice {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Default::default()
        }
    }

    /// Lets `successes` more buffer creations through, then fails every
    /// following one until cleared with `None`.
    pub fn set_buffer_budget(&mut self, successes: Option<usize>) {
        self.buffer_budget = successes;
    }

    /// Lets `successes` more buffer writes through, then fails every
    /// following one until cleared with `None`.
    pub fn set_write_budget(&mut self, successes: Option<usize>) {
        self.write_budget = successes;
    }

    /// Makes every shader compilation fail with `diagnostics`.
    pub fn set_shader_failure(&mut self, diagnostics: Option<String>) {
        self.shader_failure = diagnostics;
    }

    #[must_use]
    pub fn counters(&self) -> DeviceCounters {
        self.counters
    }

    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    #[must_use]
    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    #[must_use]
    pub fn live_vertex_arrays(&self) -> usize {
        self.vertex_arrays.len()
    }

    #[must_use]
    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    /// Total live objects of all kinds.
    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.live_buffers() + self.live_textures() + self.live_vertex_arrays() + self.live_programs()
    }

    #[must_use]
    pub fn buffer(&self, id: RawId) -> Option<&HeadlessBuffer> {
        self.buffers.get(&id)
    }

    #[must_use]
    pub fn texture(&self, id: RawId) -> Option<&HeadlessTexture> {
        self.textures.get(&id)
    }

    #[must_use]
    pub fn vertex_array(&self, id: RawId) -> Option<&VertexArrayDesc> {
        self.vertex_arrays.get(&id)
    }

    /// Draws of the most recent successful submission.
    #[must_use]
    pub fn last_submission(&self) -> &[DrawCall] {
        &self.last_submission
    }

    /// Writes recorded since the last [`take_writes`](Self::take_writes).
    #[must_use]
    pub fn writes(&self) -> &[BufferWrite] {
        &self.writes
    }

    pub fn take_writes(&mut self) -> Vec<BufferWrite> {
        std::mem::take(&mut self.writes)
    }

    fn allocate_id(&mut self) -> RawId {
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        id
    }

    fn check_live(&self, kind: ResourceKind, live: bool) -> Result<(), GpuError> {
        if live {
            Ok(())
        } else {
            Err(GpuError::Submission(format!("draw references a released {kind}")))
        }
    }
}

impl GpuDevice for HeadlessDevice {
    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<RawId, GpuError> {
        if let Some(budget) = self.buffer_budget.as_mut() {
            if *budget == 0 {
                return Err(GpuError::CreationFailed {
                    kind: ResourceKind::Buffer,
                    reason: format!("out of memory allocating '{}'", desc.label),
                });
            }
            *budget -= 1;
        }

        let size = usize::try_from(desc.size)
            .map_err(|e| GpuError::CreationFailed {
                kind: ResourceKind::Buffer,
                reason: e.to_string(),
            })?
            .max(desc.contents.len());
        let mut data = vec![0u8; size];
        data[..desc.contents.len()].copy_from_slice(desc.contents);

        let id = self.allocate_id();
        self.buffers.insert(
            id,
            HeadlessBuffer {
                label: desc.label.to_string(),
                usage: desc.usage,
                data,
            },
        );
        self.counters.buffers_created += 1;
        Ok(id)
    }

    fn write_buffer(&mut self, buffer: RawId, offset: u64, data: &[u8]) -> Result<(), GpuError> {
        if let Some(budget) = self.write_budget.as_mut() {
            if *budget == 0 {
                return Err(GpuError::Submission(format!(
                    "device lost while writing buffer {buffer}"
                )));
            }
            *budget -= 1;
        }
        let target = self
            .buffers
            .get_mut(&buffer)
            .ok_or(GpuError::AlreadyDeleted {
                kind: ResourceKind::Buffer,
            })?;
        let start = usize::try_from(offset).map_err(|e| GpuError::Submission(e.to_string()))?;
        let end = start + data.len();
        if end > target.data.len() {
            return Err(GpuError::Submission(format!(
                "write [{start}, {end}) exceeds buffer '{}' of {} bytes",
                target.label,
                target.data.len()
            )));
        }
        target.data[start..end].copy_from_slice(data);
        self.counters.buffer_writes += 1;
        self.writes.push(BufferWrite {
            buffer,
            offset,
            len: data.len(),
        });
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: RawId) {
        if self.buffers.remove(&buffer).is_some() {
            self.counters.objects_destroyed += 1;
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<RawId, GpuError> {
        let id = self.allocate_id();
        self.textures.insert(
            id,
            HeadlessTexture {
                label: desc.label.to_string(),
                width: desc.width,
                height: desc.height,
                srgb: desc.srgb,
            },
        );
        self.counters.textures_created += 1;
        Ok(id)
    }

    fn destroy_texture(&mut self, texture: RawId) {
        if self.textures.remove(&texture).is_some() {
            self.counters.objects_destroyed += 1;
        }
    }

    fn create_vertex_array(&mut self, desc: &VertexArrayDesc) -> Result<RawId, GpuError> {
        for raw in desc.slots.iter().flatten() {
            if !self.buffers.contains_key(raw) {
                return Err(GpuError::CreationFailed {
                    kind: ResourceKind::VertexArray,
                    reason: format!("'{}' references unknown buffer {raw}", desc.label),
                });
            }
        }
        let id = self.allocate_id();
        self.vertex_arrays.insert(id, desc.clone());
        self.counters.vertex_arrays_created += 1;
        Ok(id)
    }

    fn destroy_vertex_array(&mut self, vertex_array: RawId) {
        if self.vertex_arrays.remove(&vertex_array).is_some() {
            self.counters.objects_destroyed += 1;
        }
    }

    fn compile_program(&mut self, desc: &ProgramDesc<'_>) -> Result<RawId, GpuError> {
        if let Some(diagnostics) = &self.shader_failure {
            return Err(GpuError::ShaderCompilation {
                diagnostics: diagnostics.clone(),
            });
        }
        if desc.source.trim().is_empty() {
            return Err(GpuError::ShaderCompilation {
                diagnostics: format!("shader '{}' has an empty source", desc.label),
            });
        }
        let id = self.allocate_id();
        self.programs.insert(id, desc.label.to_string());
        self.counters.programs_compiled += 1;
        Ok(id)
    }

    fn destroy_program(&mut self, program: RawId) {
        if self.programs.remove(&program).is_some() {
            self.counters.objects_destroyed += 1;
        }
    }

    fn submit(&mut self, draws: &[DrawCall]) -> Result<(), GpuError> {
        for draw in draws {
            self.check_live(ResourceKind::Program, self.programs.contains_key(&draw.program))?;
            self.check_live(
                ResourceKind::VertexArray,
                self.vertex_arrays.contains_key(&draw.vertex_array),
            )?;
            self.check_live(
                ResourceKind::Buffer,
                self.buffers.contains_key(&draw.instance_buffer),
            )?;
            if let Some(index) = draw.index_buffer {
                self.check_live(ResourceKind::Buffer, self.buffers.contains_key(&index))?;
            }
            if let Some(texture) = draw.base_color_texture {
                self.check_live(ResourceKind::Texture, self.textures.contains_key(&texture))?;
            }
        }
        self.counters.submissions += 1;
        self.last_submission = draws.to_vec();
        Ok(())
    }
}
