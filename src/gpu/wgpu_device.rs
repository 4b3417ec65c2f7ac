//! `wgpu` Device
//!
//! [`GpuDevice`] on top of a host-provided `wgpu::Device` and `wgpu::Queue`.
//!
//! - Buffers are plain `wgpu::Buffer`s created initialised.
//! - Textures are RGBA8 2D textures sampled through one shared linear sampler.
//! - A vertex array is a table of per-slot buffers. Absent optional slots are
//!   backed by zero-filled buffers owned by the vertex array.
//! - A program is a render pipeline built from WGSL against the fixed
//!   vertex layout and bind-group layout.
//! - `submit` encodes every draw into a single render pass against the
//!   target set with [`WgpuDevice::set_render_target`].
//!
//! Creation and compilation run inside error scopes, so validation and
//! out-of-memory failures come back as [`GpuError`] values instead of
//! reaching the uncaptured-error handler.

use std::borrow::Cow;

use rustc_hash::FxHashMap;
use wgpu::util::DeviceExt;

use crate::errors::{GpuError, ResourceKind};
use crate::gpu::{
    BufferDesc, BufferUsage, DrawCall, GpuDevice, ProgramDesc, RawId, TextureDesc,
    VertexArrayDesc, VertexSlot,
};

const VERTEX_ATTRIBUTES: [[wgpu::VertexAttribute; 1]; VertexSlot::COUNT] = [
    wgpu::vertex_attr_array![0 => Float32x3],
    wgpu::vertex_attr_array![1 => Float32x3],
    wgpu::vertex_attr_array![2 => Float32x2],
    wgpu::vertex_attr_array![3 => Uint16x4],
    wgpu::vertex_attr_array![4 => Float32x4],
];

/// Where `submit` draws to.
pub struct RenderTarget {
    pub color: wgpu::TextureView,
    pub depth: Option<wgpu::TextureView>,
    pub clear_color: wgpu::Color,
}

struct WgpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct WgpuVertexArray {
    slots: [RawId; VertexSlot::COUNT],
    /// Ids of zero-filled stand-ins for absent optional slots
    fallbacks: Vec<RawId>,
}

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,

    color_format: wgpu::TextureFormat,
    depth_format: Option<wgpu::TextureFormat>,

    frame_layout: wgpu::BindGroupLayout,
    material_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    sampler: wgpu::Sampler,
    white_texture: WgpuTexture,

    next_id: RawId,
    buffers: FxHashMap<RawId, wgpu::Buffer>,
    textures: FxHashMap<RawId, WgpuTexture>,
    vertex_arrays: FxHashMap<RawId, WgpuVertexArray>,
    programs: FxHashMap<RawId, wgpu::RenderPipeline>,

    target: Option<RenderTarget>,
}

impl WgpuDevice {
    /// Wraps an existing device. Pipelines are built for `color_format` and,
    /// when given, a depth attachment of `depth_format`.
    #[must_use]
    pub fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        color_format: wgpu::TextureFormat,
        depth_format: Option<wgpu::TextureFormat>,
    ) -> Self {
        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Draw BindGroupLayout"),
            entries: &[
                // Binding 0: DrawUniforms
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // Binding 1: instance records
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let material_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Material BindGroupLayout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Default Pipeline Layout"),
            bind_group_layouts: &[Some(&frame_layout), Some(&material_layout)],
            immediate_size: 0,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Base Color Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let white_texture = upload_rgba(
            &device,
            &queue,
            &TextureDesc {
                label: "White 1x1",
                width: 1,
                height: 1,
                srgb: false,
                rgba: &[255, 255, 255, 255],
            },
        );

        Self {
            device,
            queue,
            color_format,
            depth_format,
            frame_layout,
            material_layout,
            pipeline_layout,
            sampler,
            white_texture,
            next_id: 1,
            buffers: FxHashMap::default(),
            textures: FxHashMap::default(),
            vertex_arrays: FxHashMap::default(),
            programs: FxHashMap::default(),
            target: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    #[inline]
    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Sets the attachments the next `submit` draws into.
    pub fn set_render_target(&mut self, target: RenderTarget) {
        self.target = Some(target);
    }

    pub fn clear_render_target(&mut self) {
        self.target = None;
    }

    fn allocate_id(&mut self) -> RawId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Runs `f` inside validation and out-of-memory error scopes.
    fn scoped<T>(&self, f: impl FnOnce(&wgpu::Device) -> T) -> (T, Option<wgpu::Error>) {
        let validation = self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let memory = self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let value = f(&self.device);
        let memory_error = pollster::block_on(memory.pop());
        let validation_error = pollster::block_on(validation.pop());
        (value, memory_error.or(validation_error))
    }
}

fn buffer_usages(usage: BufferUsage) -> wgpu::BufferUsages {
    let mut out = wgpu::BufferUsages::empty();
    if usage.contains(BufferUsage::VERTEX) {
        out |= wgpu::BufferUsages::VERTEX;
    }
    if usage.contains(BufferUsage::INDEX) {
        out |= wgpu::BufferUsages::INDEX;
    }
    if usage.contains(BufferUsage::STORAGE) {
        out |= wgpu::BufferUsages::STORAGE;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        out |= wgpu::BufferUsages::UNIFORM;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        out |= wgpu::BufferUsages::COPY_DST;
    }
    out
}

fn upload_rgba(device: &wgpu::Device, queue: &wgpu::Queue, desc: &TextureDesc<'_>) -> WgpuTexture {
    let format = if desc.srgb {
        wgpu::TextureFormat::Rgba8UnormSrgb
    } else {
        wgpu::TextureFormat::Rgba8Unorm
    };
    let texture = device.create_texture_with_data(
        queue,
        &wgpu::TextureDescriptor {
            label: Some(desc.label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        },
        wgpu::util::TextureDataOrder::LayerMajor,
        desc.rgba,
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    WgpuTexture { texture, view }
}

/// Buffer contents zero-extended to `size`, rounded up to the copy alignment.
fn padded_contents(contents: &[u8], size: u64) -> Cow<'_, [u8]> {
    let align = wgpu::COPY_BUFFER_ALIGNMENT;
    let size = size.max(contents.len() as u64).max(align);
    let padded = size.div_ceil(align) * align;
    if padded == contents.len() as u64 {
        Cow::Borrowed(contents)
    } else {
        let mut bytes = contents.to_vec();
        bytes.resize(padded as usize, 0);
        Cow::Owned(bytes)
    }
}

impl GpuDevice for WgpuDevice {
    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<RawId, GpuError> {
        let contents = padded_contents(desc.contents, desc.size);
        let usage = buffer_usages(desc.usage);
        let (buffer, error) = self.scoped(|device| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(desc.label),
                contents: &contents,
                usage,
            })
        });
        if let Some(error) = error {
            return Err(GpuError::CreationFailed {
                kind: ResourceKind::Buffer,
                reason: error.to_string(),
            });
        }
        let id = self.allocate_id();
        self.buffers.insert(id, buffer);
        Ok(id)
    }

    fn write_buffer(&mut self, buffer: RawId, offset: u64, data: &[u8]) -> Result<(), GpuError> {
        let target = self.buffers.get(&buffer).ok_or(GpuError::AlreadyDeleted {
            kind: ResourceKind::Buffer,
        })?;
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0
            || data.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT != 0
        {
            return Err(GpuError::Submission(format!(
                "unaligned buffer write ({} bytes at offset {offset})",
                data.len()
            )));
        }
        self.queue.write_buffer(target, offset, data);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: RawId) {
        if let Some(buffer) = self.buffers.remove(&buffer) {
            buffer.destroy();
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<RawId, GpuError> {
        let (texture, error) = self.scoped(|device| upload_rgba(device, &self.queue, desc));
        if let Some(error) = error {
            return Err(GpuError::CreationFailed {
                kind: ResourceKind::Texture,
                reason: error.to_string(),
            });
        }
        let id = self.allocate_id();
        self.textures.insert(id, texture);
        Ok(id)
    }

    fn destroy_texture(&mut self, texture: RawId) {
        if let Some(texture) = self.textures.remove(&texture) {
            texture.texture.destroy();
        }
    }

    fn create_vertex_array(&mut self, desc: &VertexArrayDesc) -> Result<RawId, GpuError> {
        let mut slots = [0; VertexSlot::COUNT];
        let mut fallbacks = Vec::new();

        for slot in VertexSlot::ALL {
            match desc.slots[slot.index()] {
                Some(raw) if self.buffers.contains_key(&raw) => slots[slot.index()] = raw,
                Some(raw) => {
                    return Err(GpuError::CreationFailed {
                        kind: ResourceKind::VertexArray,
                        reason: format!("'{}' references unknown buffer {raw}", desc.label),
                    });
                }
                None => {
                    let size = u64::from(desc.vertex_count.max(1)) * slot.stride();
                    let zeros = vec![0u8; size as usize];
                    let label = format!("{} {} (zero)", desc.label, slot.label());
                    let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some(&label),
                        contents: &zeros,
                        usage: wgpu::BufferUsages::VERTEX,
                    });
                    let id = self.allocate_id();
                    self.buffers.insert(id, buffer);
                    slots[slot.index()] = id;
                    fallbacks.push(id);
                }
            }
        }

        let id = self.allocate_id();
        self.vertex_arrays.insert(id, WgpuVertexArray { slots, fallbacks });
        Ok(id)
    }

    fn destroy_vertex_array(&mut self, vertex_array: RawId) {
        let Some(vao) = self.vertex_arrays.remove(&vertex_array) else {
            return;
        };
        for id in vao.fallbacks {
            self.destroy_buffer(id);
        }
    }

    fn compile_program(&mut self, desc: &ProgramDesc<'_>) -> Result<RawId, GpuError> {
        let vertex_buffers: Vec<wgpu::VertexBufferLayout<'_>> = VertexSlot::ALL
            .iter()
            .map(|slot| wgpu::VertexBufferLayout {
                array_stride: slot.stride(),
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &VERTEX_ATTRIBUTES[slot.index()],
            })
            .collect();

        let depth_stencil = self.depth_format.map(|format| wgpu::DepthStencilState {
            format,
            depth_write_enabled: Some(true),
            depth_compare: Some(wgpu::CompareFunction::Less),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        let (pipeline, error) = self.scoped(|device| {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(desc.label),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(desc.source)),
            });
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(desc.label),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs_main"),
                    buffers: &vertex_buffers,
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: self.color_format,
                        blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    cull_mode: Some(wgpu::Face::Back),
                    ..Default::default()
                },
                depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                multiview_mask: None,
                cache: None,
            })
        });

        if let Some(error) = error {
            return Err(GpuError::ShaderCompilation {
                diagnostics: error.to_string(),
            });
        }
        let id = self.allocate_id();
        self.programs.insert(id, pipeline);
        Ok(id)
    }

    fn destroy_program(&mut self, program: RawId) {
        self.programs.remove(&program);
    }

    fn submit(&mut self, draws: &[DrawCall]) -> Result<(), GpuError> {
        let target = self.target.as_ref().ok_or(GpuError::NoRenderTarget)?;
        let missing = |what: &str, id: RawId| GpuError::Submission(format!("unknown {what} {id}"));

        // Bind groups must outlive the pass.
        let mut bindings = Vec::with_capacity(draws.len());
        for draw in draws {
            let instances = self
                .buffers
                .get(&draw.instance_buffer)
                .ok_or_else(|| missing("instance buffer", draw.instance_buffer))?;
            let uniforms = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("DrawUniforms"),
                contents: bytemuck::bytes_of(&draw.uniforms),
                usage: wgpu::BufferUsages::UNIFORM,
            });
            let frame = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Draw BindGroup"),
                layout: &self.frame_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: uniforms.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: instances.as_entire_binding(),
                    },
                ],
            });

            let view = match draw.base_color_texture {
                Some(id) => &self.textures.get(&id).ok_or_else(|| missing("texture", id))?.view,
                None => &self.white_texture.view,
            };
            let material = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Material BindGroup"),
                layout: &self.material_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                ],
            });
            bindings.push((frame, material));
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Instanced Draw Encoder"),
            });

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Instanced Draw Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.color,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(target.clear_color),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: target.depth.as_ref().map(|view| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Clear(1.0),
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            for (draw, (frame, material)) in draws.iter().zip(&bindings) {
                let pipeline = self
                    .programs
                    .get(&draw.program)
                    .ok_or_else(|| missing("program", draw.program))?;
                let vao = self
                    .vertex_arrays
                    .get(&draw.vertex_array)
                    .ok_or_else(|| missing("vertex array", draw.vertex_array))?;

                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, frame, &[]);
                pass.set_bind_group(1, material, &[]);
                for (slot, raw) in vao.slots.iter().enumerate() {
                    let buffer = self
                        .buffers
                        .get(raw)
                        .ok_or_else(|| missing("vertex buffer", *raw))?;
                    pass.set_vertex_buffer(slot as u32, buffer.slice(..));
                }

                let instances = 0..draw.instance_count;
                match draw.index_buffer {
                    Some(raw) => {
                        let index = self
                            .buffers
                            .get(&raw)
                            .ok_or_else(|| missing("index buffer", raw))?;
                        pass.set_index_buffer(index.slice(..), wgpu::IndexFormat::Uint32);
                        pass.draw_indexed(0..draw.element_count, 0, instances);
                    }
                    None => pass.draw(0..draw.element_count, instances),
                }
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_rounds_to_copy_alignment() {
        assert_eq!(padded_contents(&[1, 2, 3], 0).len(), 4);
        assert_eq!(padded_contents(&[1, 2, 3, 4], 4).len(), 4);
        assert_eq!(padded_contents(&[], 10).len(), 12);
        assert!(matches!(padded_contents(&[0; 8], 8), Cow::Borrowed(_)));
    }

    #[test]
    fn usage_flags_translate() {
        let usages = buffer_usages(BufferUsage::STORAGE | BufferUsage::COPY_DST);
        assert_eq!(
            usages,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST
        );
    }
}
