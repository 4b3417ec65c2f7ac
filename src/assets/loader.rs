//! Model Loader
//!
//! Two stages connected by the parse worker:
//!
//! 1. **Parse** (any thread): source file -> [`SceneDocument`].
//! 2. **Materialise** (owning thread): [`SceneSource`] -> GPU buffers,
//!    textures and vertex arrays, plus the CPU-side joint table, hierarchy
//!    and animation clips, packed into one immutable [`Model`].
//!
//! Loads are keyed by [`ModelId::from_source`]; loading a known source is a
//! table lookup. Materialisation is all-or-nothing: every GPU object it
//! creates is owned by `ResourceOwner::Model(id)` and released in one call
//! if any fatal error occurs.

use std::sync::Arc;

use glam::{Vec3, Vec4};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::animation::{AnimationClip, Channel, Track};
use crate::assets::document::{
    ElementType, MaterialData, PrimitiveData, PrimitiveMode, SamplerData, SceneDocument,
    SceneSource, Semantic, TargetPath,
};
use crate::assets::gltf::parse_file;
use crate::assets::model::{
    Diagnostic, DiagnosticKind, LoadState, Material, Model, ModelId, Primitive, TextureSlot,
};
use crate::assets::worker::ParseWorker;
use crate::errors::{Error, ResourceKind, Result};
use crate::gpu::{
    BufferHandle, BufferUsage, GpuDevice, GpuResourceManager, ResourceOwner, TextureHandle,
    VertexSlot,
};
use crate::scene::{Hierarchy, Joint, Skin, Transform};
use crate::settings::RuntimeSettings;

pub struct ModelLoader {
    models: FxHashMap<ModelId, Arc<Model>>,
    states: FxHashMap<ModelId, LoadState>,
    worker: Option<ParseWorker>,
    queue_capacity: usize,
}

impl ModelLoader {
    #[must_use]
    pub fn new(settings: &RuntimeSettings) -> Self {
        Self {
            models: FxHashMap::default(),
            states: FxHashMap::default(),
            worker: None,
            queue_capacity: settings.queue_capacity(),
        }
    }

    /// Parses and materialises `source` on the calling thread.
    ///
    /// Idempotent: a source that is already loaded returns its id without
    /// parsing or allocating anything.
    pub fn load<D: GpuDevice>(
        &mut self,
        source: &str,
        resources: &mut GpuResourceManager<D>,
    ) -> Result<ModelId> {
        let id = ModelId::from_source(source);
        if self.models.contains_key(&id) {
            return Ok(id);
        }
        let document = parse_file(source).inspect_err(|e| {
            self.states.insert(id, LoadState::Failed(e.to_string()));
        })?;
        self.materialize(id, source, &document, resources)
    }

    /// Queues `source` for parsing on the worker thread and returns its id
    /// right away. Requests for loaded or pending sources are no-ops.
    pub fn request_load(&mut self, source: &str) -> ModelId {
        let id = ModelId::from_source(source);
        if matches!(
            self.states.get(&id),
            Some(LoadState::Loaded | LoadState::Pending)
        ) {
            return id;
        }

        let submitted = self.worker().and_then(|worker| worker.submit(id, source));
        match submitted {
            Ok(()) => {
                self.states.insert(id, LoadState::Pending);
            }
            Err(e) => {
                log::warn!("Could not queue '{source}': {e}");
                self.states.insert(id, LoadState::Failed(e.to_string()));
            }
        }
        id
    }

    fn worker(&mut self) -> Result<&ParseWorker> {
        if self.worker.is_none() {
            self.worker = Some(ParseWorker::spawn(self.queue_capacity)?);
        }
        self.worker
            .as_ref()
            .ok_or_else(|| Error::load_failed("<parse worker>", "worker unavailable"))
    }

    /// Materialises up to `limit` parsed documents (all ready ones when
    /// `None`) and returns how many were taken off the queue.
    ///
    /// Each document is fully materialised before the next one is taken.
    pub fn drain_pending<D: GpuDevice>(
        &mut self,
        resources: &mut GpuResourceManager<D>,
        limit: Option<usize>,
    ) -> usize {
        let mut drained = 0;
        while limit.is_none_or(|max| drained < max) {
            let Some(parsed) = self.worker.as_ref().and_then(ParseWorker::try_recv) else {
                break;
            };
            drained += 1;

            let outcome = parsed
                .result
                .and_then(|doc| self.materialize(parsed.id, &parsed.source, &doc, resources));
            if let Err(e) = outcome {
                log::info!("Queued load of '{}' failed: {e}", parsed.source);
                self.states
                    .insert(parsed.id, LoadState::Failed(e.to_string()));
            }
        }
        drained
    }

    /// Runs the GPU-materialisation stage for an already parsed document.
    pub fn materialize<D: GpuDevice>(
        &mut self,
        id: ModelId,
        source_label: &str,
        source: &dyn SceneSource,
        resources: &mut GpuResourceManager<D>,
    ) -> Result<ModelId> {
        if self.models.contains_key(&id) {
            return Ok(id);
        }

        match ModelBuilder::new(id, source_label, source, resources).build() {
            Ok(model) => {
                log::info!(
                    "Loaded model {id} from '{source_label}': {} primitives, {} joints, {} clips",
                    model.primitives.len(),
                    model.joints.len(),
                    model.clips.len()
                );
                self.models.insert(id, Arc::new(model));
                self.states.insert(id, LoadState::Loaded);
                Ok(id)
            }
            Err(e) => {
                let released = resources.release_owner(ResourceOwner::Model(id));
                log::warn!(
                    "Load of '{source_label}' failed ({e}); released {released} GPU objects"
                );
                self.states.insert(id, LoadState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Materialises a hand-built document under the id of `source_label`.
    pub fn load_document<D: GpuDevice>(
        &mut self,
        source_label: &str,
        document: &SceneDocument,
        resources: &mut GpuResourceManager<D>,
    ) -> Result<ModelId> {
        self.materialize(ModelId::from_source(source_label), source_label, document, resources)
    }

    /// Releases every GPU resource of the model and forgets it. Instances of
    /// the model must be destroyed first.
    pub fn unload<D: GpuDevice>(
        &mut self,
        id: ModelId,
        resources: &mut GpuResourceManager<D>,
    ) -> Result<()> {
        let model = self
            .models
            .remove(&id)
            .ok_or_else(|| Error::not_found(ResourceKind::Model, id))?;
        self.states.remove(&id);
        let released = resources.release_owner(ResourceOwner::Model(id));
        log::info!("Unloaded model {id} ('{}'), {released} GPU objects", model.source);
        Ok(())
    }

    /// `None` for sources that were never requested.
    #[must_use]
    pub fn load_state(&self, id: ModelId) -> Option<&LoadState> {
        self.states.get(&id)
    }

    #[must_use]
    pub fn contains(&self, id: ModelId) -> bool {
        self.models.contains_key(&id)
    }

    #[must_use]
    pub fn model(&self, id: ModelId) -> Option<&Arc<Model>> {
        self.models.get(&id)
    }

    pub fn get(&self, id: ModelId) -> Result<Arc<Model>> {
        self.models
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(ResourceKind::Model, id))
    }

    pub fn models(&self) -> impl Iterator<Item = &Arc<Model>> {
        self.models.values()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.states
            .values()
            .filter(|s| matches!(s, LoadState::Pending))
            .count()
    }

    /// Forgets every model and stops the parse worker, dropping queued
    /// and finished parses. GPU resources are released by the caller
    /// through the resource manager.
    ///
    /// A later `request_load` starts a fresh worker.
    pub fn clear(&mut self) {
        self.worker.take();
        self.models.clear();
        self.states.clear();
    }
}

// ============================================================================
// Materialisation
// ============================================================================

#[derive(Hash, PartialEq, Eq, Clone, Copy)]
struct TextureCacheKey {
    texture_index: usize,
    is_srgb: bool,
}

struct ModelBuilder<'a, D: GpuDevice> {
    id: ModelId,
    label: &'a str,
    source: &'a dyn SceneSource,
    resources: &'a mut GpuResourceManager<D>,

    textures: FxHashMap<TextureCacheKey, TextureHandle>,
    materials: Vec<Material>,
    default_material: Option<usize>,
    joints: Vec<Joint>,
    skins: Vec<Skin>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a, D: GpuDevice> ModelBuilder<'a, D> {
    fn new(
        id: ModelId,
        label: &'a str,
        source: &'a dyn SceneSource,
        resources: &'a mut GpuResourceManager<D>,
    ) -> Self {
        Self {
            id,
            label,
            source,
            resources,
            textures: FxHashMap::default(),
            materials: Vec::new(),
            default_material: None,
            joints: Vec::new(),
            skins: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    fn owner(&self) -> ResourceOwner {
        ResourceOwner::Model(self.id)
    }

    fn invalid(&self, reason: impl Into<String>) -> Error {
        Error::invalid_data(self.label, reason)
    }

    fn diagnose(&mut self, kind: DiagnosticKind, context: &str, index: usize, reason: String) {
        let diagnostic = Diagnostic {
            kind,
            context: context.to_string(),
            index,
            reason,
        };
        log::warn!("'{}': {diagnostic}", self.label);
        self.diagnostics.push(diagnostic);
    }

    fn build(mut self) -> Result<Model> {
        let nodes = self.source.nodes();
        let node_count = nodes.len();

        // Hierarchy
        let mut children = Vec::with_capacity(node_count);
        for (index, node) in nodes.iter().enumerate() {
            if let Some(bad) = node.children.iter().find(|&&c| c >= node_count) {
                return Err(self.invalid(format!("node {index} has out-of-range child {bad}")));
            }
            children.push(node.children.clone());
        }
        let hierarchy = Hierarchy::from_children(children).map_err(|e| self.invalid(e))?;
        let bind_pose: Vec<Transform> = nodes.iter().map(|n| n.transform).collect();
        let node_names: Vec<String> = nodes.iter().map(|n| n.name.clone()).collect();

        self.load_skins(&hierarchy)?;
        self.load_materials()?;
        let (primitives, draw_nodes) = self.load_meshes(&hierarchy)?;
        let clips = self.load_animations();

        Ok(Model {
            id: self.id,
            source: self.label.to_string(),
            hierarchy,
            node_names,
            bind_pose,
            primitives,
            materials: self.materials,
            joints: self.joints,
            skins: self.skins,
            draw_nodes,
            clips,
            diagnostics: self.diagnostics,
        })
    }

    // ------------------------------------------------------------------------
    // Skins
    // ------------------------------------------------------------------------

    fn load_skins(&mut self, hierarchy: &Hierarchy) -> Result<()> {
        let source = self.source;
        let nodes = source.nodes();

        for (skin_index, skin) in source.skins().iter().enumerate() {
            let skin_name = if skin.name.is_empty() {
                format!("skin_{skin_index}")
            } else {
                skin.name.clone()
            };
            if skin.joints.is_empty() {
                return Err(self.invalid(format!("skin '{skin_name}' has no joints")));
            }
            if let Some(bad) = skin.joints.iter().find(|&&j| j >= nodes.len()) {
                return Err(self.invalid(format!("skin '{skin_name}' references node {bad}")));
            }

            let ibm_index = skin.inverse_bind_matrices.ok_or_else(|| {
                self.invalid(format!(
                    "skin '{skin_name}' has joints but no inverse-bind matrices"
                ))
            })?;
            let ibms = source
                .accessor(ibm_index)
                .ok_or_else(|| self.invalid(format!("missing accessor {ibm_index}")))?
                .read_mat4()
                .map_err(|e| self.invalid(format!("skin '{skin_name}' inverse-bind matrices: {e}")))?;
            if ibms.len() != skin.joints.len() {
                return Err(self.invalid(format!(
                    "skin '{skin_name}' has {} joints but {} inverse-bind matrices",
                    skin.joints.len(),
                    ibms.len()
                )));
            }

            let offset = self.joints.len();
            for (&node, inverse_bind) in skin.joints.iter().zip(ibms) {
                let children = nodes[node]
                    .children
                    .iter()
                    .filter_map(|child| skin.joints.iter().position(|j| j == child))
                    .map(|local| offset + local)
                    .collect();
                self.joints.push(Joint {
                    name: nodes[node].name.clone(),
                    node,
                    inverse_bind,
                    children,
                });
            }

            let skeleton_root = match skin.skeleton {
                Some(root) if root < nodes.len() => root,
                Some(root) => {
                    return Err(self.invalid(format!(
                        "skin '{skin_name}' skeleton node {root} is out of range"
                    )));
                }
                // First joint whose parent is not a joint of this skin
                None => skin
                    .joints
                    .iter()
                    .copied()
                    .find(|&j| hierarchy.parent(j).is_none_or(|p| !skin.joints.contains(&p)))
                    .unwrap_or(skin.joints[0]),
            };

            self.skins.push(Skin {
                name: skin_name,
                joints: offset..self.joints.len(),
                skeleton_root,
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Materials
    // ------------------------------------------------------------------------

    fn load_materials(&mut self) -> Result<()> {
        for index in 0..self.source.material_count() {
            let data = self
                .source
                .material(index)
                .ok_or_else(|| self.invalid(format!("missing material {index}")))?
                .clone();
            let material = self.build_material(&data, index)?;
            self.materials.push(material);
        }
        Ok(())
    }

    fn build_material(&mut self, data: &MaterialData, index: usize) -> Result<Material> {
        let program = self.resources.get_default_shader()?;
        let mut textures = SmallVec::new();
        if let Some(texture_index) = data.base_color_texture {
            let handle = self.texture(texture_index, true)?;
            textures.push((TextureSlot::BaseColor, handle));
        }
        Ok(Material {
            name: if data.name.is_empty() {
                format!("material_{index}")
            } else {
                data.name.clone()
            },
            program,
            textures,
            base_color: Vec4::from_array(data.base_color_factor),
            metallic: data.metallic_factor,
            roughness: data.roughness_factor,
            emissive: Vec3::from_array(data.emissive_factor),
        })
    }

    fn default_material(&mut self) -> Result<usize> {
        if let Some(index) = self.default_material {
            return Ok(index);
        }
        let material = self.build_material(
            &MaterialData {
                name: "default".to_string(),
                ..Default::default()
            },
            self.materials.len(),
        )?;
        self.materials.push(material);
        let index = self.materials.len() - 1;
        self.default_material = Some(index);
        Ok(index)
    }

    /// Uploads a source texture once per colour space.
    fn texture(&mut self, texture_index: usize, is_srgb: bool) -> Result<TextureHandle> {
        let key = TextureCacheKey {
            texture_index,
            is_srgb,
        };
        if let Some(handle) = self.textures.get(&key) {
            return Ok(*handle);
        }

        let source = self.source;
        let texture = source
            .texture(texture_index)
            .ok_or_else(|| self.invalid(format!("missing texture {texture_index}")))?;
        let image = source.image(texture.image).ok_or_else(|| {
            self.invalid(format!(
                "texture {texture_index} references missing image {}",
                texture.image
            ))
        })?;
        let label = format!("{}/texture_{texture_index}", self.label);
        let owner = self.owner();
        let handle = self.resources.create_texture(
            owner,
            &label,
            image.width,
            image.height,
            &image.rgba,
            is_srgb,
        )?;
        self.textures.insert(key, handle);
        Ok(handle)
    }

    // ------------------------------------------------------------------------
    // Meshes
    // ------------------------------------------------------------------------

    fn load_meshes(&mut self, hierarchy: &Hierarchy) -> Result<(Vec<Primitive>, Vec<usize>)> {
        let source = self.source;
        let nodes = source.nodes();

        // Only nodes under the default scene's roots are drawn.
        let roots = source.scene_roots();
        let mut in_scene = vec![roots.is_empty(); nodes.len()];
        for &node in hierarchy.order() {
            in_scene[node] = match hierarchy.parent(node) {
                Some(parent) => in_scene[parent],
                None => roots.is_empty() || roots.contains(&node),
            };
        }

        let mut primitives = Vec::new();
        let mut draw_nodes: Vec<usize> = Vec::new();

        for &node_index in hierarchy.order() {
            let node = &nodes[node_index];
            let Some(mesh_index) = node.mesh else {
                continue;
            };
            if !in_scene[node_index] {
                continue;
            }
            let mesh = source.mesh(mesh_index).ok_or_else(|| {
                self.invalid(format!("node '{}' references missing mesh {mesh_index}", node.name))
            })?;
            let mesh_name = if mesh.name.is_empty() {
                format!("mesh_{mesh_index}")
            } else {
                mesh.name.clone()
            };

            let skin = match node.skin {
                Some(s) if s < self.skins.len() => Some(s),
                Some(s) => {
                    return Err(self.invalid(format!(
                        "node '{}' references missing skin {s}",
                        node.name
                    )));
                }
                None => None,
            };

            for (prim_index, prim) in mesh.primitives.iter().enumerate() {
                if prim.mode != PrimitiveMode::Triangles {
                    self.diagnose(
                        DiagnosticKind::UnsupportedPrimitive,
                        &mesh_name,
                        prim_index,
                        format!("{:?} primitives are not drawn", prim.mode),
                    );
                    continue;
                }

                let mut primitive =
                    self.load_primitive(&mesh_name, prim_index, prim, node_index, skin)?;

                let draw_node = match primitive.skin {
                    Some(s) => self.skins[s].skeleton_root,
                    None => node_index,
                };
                let slot = match draw_nodes.iter().position(|&n| n == draw_node) {
                    Some(slot) => slot,
                    None => {
                        draw_nodes.push(draw_node);
                        draw_nodes.len() - 1
                    }
                };
                primitive.draw_slot = slot as u32;
                primitives.push(primitive);
            }
        }
        Ok((primitives, draw_nodes))
    }

    fn load_primitive(
        &mut self,
        mesh_name: &str,
        prim_index: usize,
        prim: &PrimitiveData,
        node: usize,
        skin: Option<usize>,
    ) -> Result<Primitive> {
        if skin.is_none() && prim.attribute(&Semantic::Joints(0)).is_some() {
            self.diagnose(
                DiagnosticKind::UnboundSkinAttributes,
                mesh_name,
                prim_index,
                "JOINTS_0 on a node without a skin, drawn unskinned".to_string(),
            );
        }

        let source = self.source;
        let what = format!("primitive {prim_index} of mesh '{mesh_name}'");
        let accessor = |index: usize| {
            source
                .accessor(index)
                .ok_or_else(|| self.invalid(format!("{what}: missing accessor {index}")))
        };

        // POSITION is the only required attribute
        let position_index = prim
            .attribute(&Semantic::Position)
            .ok_or_else(|| self.invalid(format!("{what} has no POSITION attribute")))?;
        let positions = accessor(position_index)?
            .read_vec3()
            .map_err(|e| self.invalid(format!("{what} POSITION: {e}")))?;
        let vertex_count = positions.len();
        if vertex_count == 0 {
            return Err(self.invalid(format!("{what} has no vertices")));
        }

        let check_count = |name: &str, len: usize| {
            if len == vertex_count {
                Ok(())
            } else {
                Err(self.invalid(format!(
                    "{what} {name} has {len} elements, POSITION has {vertex_count}"
                )))
            }
        };

        let normals = match prim.attribute(&Semantic::Normal) {
            Some(i) => {
                let v = accessor(i)?
                    .read_vec3()
                    .map_err(|e| self.invalid(format!("{what} NORMAL: {e}")))?;
                check_count("NORMAL", v.len())?;
                Some(v)
            }
            None => None,
        };

        let uvs = match prim.attribute(&Semantic::TexCoord(0)) {
            Some(i) => {
                let v = accessor(i)?
                    .read_vec2()
                    .map_err(|e| self.invalid(format!("{what} TEXCOORD_0: {e}")))?;
                check_count("TEXCOORD_0", v.len())?;
                Some(v)
            }
            None => None,
        };

        let joints = match prim.attribute(&Semantic::Joints(0)).zip(skin) {
            Some((i, skin)) => {
                let joint_count = self.skins[skin].joints.len();
                let acc = accessor(i)?;
                if acc.element_type != ElementType::Vec4 {
                    return Err(self.invalid(format!(
                        "{what} JOINTS_0 must be VEC4, found {:?}",
                        acc.element_type
                    )));
                }
                let flat = acc
                    .read_u32()
                    .map_err(|e| self.invalid(format!("{what} JOINTS_0: {e}")))?;
                if let Some(bad) = flat.iter().find(|&&j| j as usize >= joint_count) {
                    return Err(self.invalid(format!(
                        "{what} references joint {bad}, skin has {joint_count}"
                    )));
                }
                let packed: Vec<[u16; 4]> = flat
                    .chunks_exact(4)
                    .map(|c| [c[0] as u16, c[1] as u16, c[2] as u16, c[3] as u16])
                    .collect();
                check_count("JOINTS_0", packed.len())?;
                Some(packed)
            }
            None => None,
        };

        // Weights without a bound skin are dropped with the joints.
        let weights = match prim.attribute(&Semantic::Weights(0)).filter(|_| skin.is_some()) {
            Some(i) => {
                let v = accessor(i)?
                    .read_vec4()
                    .map_err(|e| self.invalid(format!("{what} WEIGHTS_0: {e}")))?;
                check_count("WEIGHTS_0", v.len())?;
                Some(v)
            }
            None => None,
        };
        if joints.is_some() && weights.is_none() {
            return Err(self.invalid(format!("{what} has JOINTS_0 without WEIGHTS_0")));
        }

        let indices = match prim.indices {
            Some(i) => {
                let acc = accessor(i)?;
                if acc.element_type != ElementType::Scalar {
                    return Err(self.invalid(format!("{what} indices must be SCALAR")));
                }
                let v = acc
                    .read_u32()
                    .map_err(|e| self.invalid(format!("{what} indices: {e}")))?;
                if let Some(bad) = v.iter().find(|&&x| x as usize >= vertex_count) {
                    return Err(self.invalid(format!(
                        "{what} index {bad} exceeds vertex count {vertex_count}"
                    )));
                }
                Some(v)
            }
            None => None,
        };

        // Upload
        let owner = self.owner();
        let base_label = format!("{}/{mesh_name}#{prim_index}", self.label);
        let streams: [Option<&[u8]>; VertexSlot::COUNT] = [
            Some(bytemuck::cast_slice(&positions)),
            normals.as_deref().map(bytemuck::cast_slice::<[f32; 3], u8>),
            uvs.as_deref().map(bytemuck::cast_slice::<[f32; 2], u8>),
            joints.as_deref().map(bytemuck::cast_slice::<[u16; 4], u8>),
            weights.as_deref().map(bytemuck::cast_slice::<[f32; 4], u8>),
        ];
        let mut attributes: [Option<BufferHandle>; VertexSlot::COUNT] = [None; VertexSlot::COUNT];
        for (slot, stream) in VertexSlot::ALL.iter().zip(streams) {
            if let Some(bytes) = stream {
                let label = format!("{base_label}/{}", slot.label());
                attributes[slot.index()] = Some(self.resources.create_buffer(
                    owner,
                    &label,
                    BufferUsage::VERTEX | BufferUsage::COPY_DST,
                    bytes,
                )?);
            }
        }

        let index_buffer = match &indices {
            Some(v) => Some(self.resources.create_index_buffer(
                owner,
                &format!("{base_label}/indices"),
                v,
            )?),
            None => None,
        };

        let vertex_array = self.resources.create_vertex_array(
            owner,
            &base_label,
            attributes,
            vertex_count as u32,
        )?;

        let material = match prim.material {
            Some(m) if m < self.materials.len() => m,
            Some(m) => return Err(self.invalid(format!("{what} references missing material {m}"))),
            None => self.default_material()?,
        };

        let skin = skin.filter(|_| joints.is_some());
        Ok(Primitive {
            vertex_array,
            attributes,
            index_buffer,
            vertex_count: vertex_count as u32,
            index_count: indices.as_ref().map_or(0, |v| v.len() as u32),
            material,
            node,
            skin,
            joint_offset: skin.map_or(0, |s| self.skins[s].joints.start as u32),
            draw_slot: 0,
        })
    }

    // ------------------------------------------------------------------------
    // Animations
    // ------------------------------------------------------------------------

    fn load_animations(&mut self) -> FxHashMap<String, AnimationClip> {
        let source = self.source;
        let nodes = source.nodes();
        let mut clips = FxHashMap::default();

        for (anim_index, animation) in source.animations().iter().enumerate() {
            let mut name = if animation.name.is_empty() {
                format!("anim_{anim_index}")
            } else {
                animation.name.clone()
            };
            if clips.contains_key(&name) {
                let base = name;
                let mut suffix = anim_index;
                name = format!("{base}_{suffix}");
                while clips.contains_key(&name) {
                    suffix += 1;
                    name = format!("{base}_{suffix}");
                }
            }

            let mut tracks = Vec::with_capacity(animation.channels.len());
            for (channel_index, channel) in animation.channels.iter().enumerate() {
                let target = match channel.path {
                    TargetPath::Translation => Channel::Translation,
                    TargetPath::Rotation => Channel::Rotation,
                    TargetPath::Scale => Channel::Scale,
                    TargetPath::Weights => {
                        self.diagnose(
                            DiagnosticKind::UnsupportedPath,
                            &name,
                            channel_index,
                            "morph-target weights are not animated".to_string(),
                        );
                        continue;
                    }
                };

                // Resolve by node, then by joint name
                let joint = channel.target_node.and_then(|node| {
                    self.joints.iter().position(|j| j.node == node).or_else(|| {
                        let node_name = &nodes.get(node)?.name;
                        self.joints.iter().position(|j| &j.name == node_name)
                    })
                });
                let Some(joint) = joint else {
                    let reason = match channel.target_node {
                        Some(node) => format!("node {node} is not a joint"),
                        None => "channel has no target node".to_string(),
                    };
                    self.diagnose(DiagnosticKind::ChannelUnresolved, &name, channel_index, reason);
                    continue;
                };

                match self.read_track(joint, target, channel.sampler, &animation.samplers) {
                    Ok(track) => tracks.push(track),
                    Err(reason) => {
                        self.diagnose(DiagnosticKind::MalformedChannel, &name, channel_index, reason);
                    }
                }
            }

            clips.insert(name.clone(), AnimationClip::new(name, tracks));
        }
        clips
    }

    fn read_track(
        &self,
        joint: usize,
        channel: Channel,
        sampler: usize,
        samplers: &[SamplerData],
    ) -> std::result::Result<Track, String> {
        let sampler = samplers
            .get(sampler)
            .ok_or_else(|| format!("missing sampler {sampler}"))?;
        let input = self
            .source
            .accessor(sampler.input)
            .ok_or_else(|| format!("missing input accessor {}", sampler.input))?;
        if input.element_type != ElementType::Scalar {
            return Err(format!("input accessor must be SCALAR, found {:?}", input.element_type));
        }
        let times = input.read_f32()?;
        let values = self
            .source
            .accessor(sampler.output)
            .ok_or_else(|| format!("missing output accessor {}", sampler.output))?
            .read_f32()?;
        Track::new(joint, channel, sampler.interpolation, times, values)
    }
}
