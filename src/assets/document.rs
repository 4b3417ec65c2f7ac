//! Scene-Asset Source
//!
//! [`SceneDocument`] is the inert intermediate produced by the parse stage:
//! plain owned data, `Send`, with no GPU state. The Model Loader reads it
//! only through the [`SceneSource`] query trait, so hand-built documents and
//! parsed glTF files take the same materialisation path.
//!
//! Accessors are stored tightly packed. De-striding and sparse substitution
//! happen once in the parse stage; the typed `read_*` helpers only validate
//! element type and byte length and decode components.

use glam::{Mat4, Quat, Vec3};

use crate::animation::Interpolation;
use crate::scene::Transform;

// ============================================================================
// Accessors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Scalar,
    Vec2,
    Vec3,
    Vec4,
    Mat2,
    Mat3,
    Mat4,
}

impl ElementType {
    #[must_use]
    pub const fn component_count(self) -> usize {
        match self {
            Self::Scalar => 1,
            Self::Vec2 => 2,
            Self::Vec3 => 3,
            Self::Vec4 | Self::Mat2 => 4,
            Self::Mat3 => 9,
            Self::Mat4 => 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentType {
    I8,
    U8,
    I16,
    U16,
    U32,
    F32,
}

impl ComponentType {
    /// Width of one component in bytes.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::U32 | Self::F32 => 4,
        }
    }

    #[must_use]
    pub const fn is_integer(self) -> bool {
        !matches!(self, Self::F32)
    }
}

/// A typed, tightly packed array of little-endian components.
#[derive(Debug, Clone, PartialEq)]
pub struct Accessor {
    pub element_type: ElementType,
    pub component_type: ComponentType,
    /// Integer components map to `[0, 1]` / `[-1, 1]` when read as floats
    pub normalized: bool,
    pub count: usize,
    pub bytes: Vec<u8>,
}

impl Accessor {
    /// Float accessor from flat components.
    #[must_use]
    pub fn from_f32(element_type: ElementType, components: &[f32]) -> Self {
        Self {
            element_type,
            component_type: ComponentType::F32,
            normalized: false,
            count: components.len() / element_type.component_count(),
            bytes: bytemuck::cast_slice(components).to_vec(),
        }
    }

    #[must_use]
    pub fn from_u16(element_type: ElementType, components: &[u16]) -> Self {
        Self {
            element_type,
            component_type: ComponentType::U16,
            normalized: false,
            count: components.len() / element_type.component_count(),
            bytes: bytemuck::cast_slice(components).to_vec(),
        }
    }

    #[must_use]
    pub fn from_u32(element_type: ElementType, components: &[u32]) -> Self {
        Self {
            element_type,
            component_type: ComponentType::U32,
            normalized: false,
            count: components.len() / element_type.component_count(),
            bytes: bytemuck::cast_slice(components).to_vec(),
        }
    }

    /// Bytes per element.
    #[must_use]
    pub const fn element_size(&self) -> usize {
        self.element_type.component_count() * self.component_type.size()
    }

    fn check_length(&self) -> Result<(), String> {
        let expected = self.count * self.element_size();
        if self.bytes.len() == expected {
            Ok(())
        } else {
            Err(format!(
                "accessor of {} {:?}<{:?}> holds {} bytes, expected {expected}",
                self.count,
                self.element_type,
                self.component_type,
                self.bytes.len()
            ))
        }
    }

    fn expect_element(&self, element_type: ElementType) -> Result<(), String> {
        if self.element_type == element_type {
            self.check_length()
        } else {
            Err(format!(
                "expected {element_type:?} elements, found {:?}",
                self.element_type
            ))
        }
    }

    /// Component `index` of the flat component array, as a float.
    fn component(&self, index: usize) -> f32 {
        let b = &self.bytes;
        match self.component_type {
            ComponentType::F32 => {
                let o = index * 4;
                f32::from_le_bytes([b[o], b[o + 1], b[o + 2], b[o + 3]])
            }
            ComponentType::U32 => {
                let o = index * 4;
                u32::from_le_bytes([b[o], b[o + 1], b[o + 2], b[o + 3]]) as f32
            }
            ComponentType::U16 => {
                let v = f32::from(u16::from_le_bytes([b[index * 2], b[index * 2 + 1]]));
                if self.normalized { v / 65535.0 } else { v }
            }
            ComponentType::I16 => {
                let v = f32::from(i16::from_le_bytes([b[index * 2], b[index * 2 + 1]]));
                if self.normalized { (v / 32767.0).max(-1.0) } else { v }
            }
            ComponentType::U8 => {
                let v = f32::from(b[index]);
                if self.normalized { v / 255.0 } else { v }
            }
            ComponentType::I8 => {
                let v = f32::from(i8::from_le_bytes([b[index]]));
                if self.normalized { (v / 127.0).max(-1.0) } else { v }
            }
        }
    }

    /// Every component as a float, normalised integers mapped per glTF.
    pub fn read_f32(&self) -> Result<Vec<f32>, String> {
        self.check_length()?;
        let total = self.count * self.element_type.component_count();
        Ok((0..total).map(|i| self.component(i)).collect())
    }

    /// Every component as an unsigned integer. Float and signed accessors
    /// are rejected.
    pub fn read_u32(&self) -> Result<Vec<u32>, String> {
        self.check_length()?;
        let b = &self.bytes;
        match self.component_type {
            ComponentType::U8 => Ok(b.iter().map(|&v| u32::from(v)).collect()),
            ComponentType::U16 => Ok(b
                .chunks_exact(2)
                .map(|c| u32::from(u16::from_le_bytes([c[0], c[1]])))
                .collect()),
            ComponentType::U32 => Ok(b
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()),
            other => Err(format!("expected unsigned integer components, found {other:?}")),
        }
    }

    pub fn read_vec2(&self) -> Result<Vec<[f32; 2]>, String> {
        self.expect_element(ElementType::Vec2)?;
        let flat = self.read_f32()?;
        Ok(flat.chunks_exact(2).map(|c| [c[0], c[1]]).collect())
    }

    pub fn read_vec3(&self) -> Result<Vec<[f32; 3]>, String> {
        self.expect_element(ElementType::Vec3)?;
        let flat = self.read_f32()?;
        Ok(flat.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect())
    }

    pub fn read_vec4(&self) -> Result<Vec<[f32; 4]>, String> {
        self.expect_element(ElementType::Vec4)?;
        let flat = self.read_f32()?;
        Ok(flat.chunks_exact(4).map(|c| [c[0], c[1], c[2], c[3]]).collect())
    }

    /// Column-major 4x4 matrices.
    pub fn read_mat4(&self) -> Result<Vec<Mat4>, String> {
        self.expect_element(ElementType::Mat4)?;
        let flat = self.read_f32()?;
        Ok(flat.chunks_exact(16).map(Mat4::from_cols_slice).collect())
    }
}

// ============================================================================
// Document items
// ============================================================================

/// Vertex attribute semantics the loader understands. Everything else is
/// carried as `Other` and ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Semantic {
    Position,
    Normal,
    TexCoord(u32),
    Joints(u32),
    Weights(u32),
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimitiveMode {
    Points,
    Lines,
    #[default]
    Triangles,
    Other,
}

#[derive(Debug, Clone, Default)]
pub struct NodeData {
    pub name: String,
    pub transform: Transform,
    pub children: Vec<usize>,
    pub mesh: Option<usize>,
    pub skin: Option<usize>,
}

impl NodeData {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_trs(mut self, translation: Vec3, rotation: Quat, scale: Vec3) -> Self {
        self.transform = Transform::from_trs(translation, rotation, scale);
        self
    }

    #[must_use]
    pub fn with_children(mut self, children: Vec<usize>) -> Self {
        self.children = children;
        self
    }

    #[must_use]
    pub fn with_mesh(mut self, mesh: usize, skin: Option<usize>) -> Self {
        self.mesh = Some(mesh);
        self.skin = skin;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct PrimitiveData {
    /// Semantic -> accessor index
    pub attributes: Vec<(Semantic, usize)>,
    pub indices: Option<usize>,
    pub material: Option<usize>,
    pub mode: PrimitiveMode,
}

impl PrimitiveData {
    #[must_use]
    pub fn attribute(&self, semantic: &Semantic) -> Option<usize> {
        self.attributes
            .iter()
            .find(|(s, _)| s == semantic)
            .map(|(_, accessor)| *accessor)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub name: String,
    pub primitives: Vec<PrimitiveData>,
}

#[derive(Debug, Clone)]
pub struct MaterialData {
    pub name: String,
    pub base_color_factor: [f32; 4],
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub emissive_factor: [f32; 3],
    /// Texture index of the base colour map
    pub base_color_texture: Option<usize>,
}

impl Default for MaterialData {
    fn default() -> Self {
        Self {
            name: String::new(),
            base_color_factor: [1.0; 4],
            metallic_factor: 1.0,
            roughness_factor: 1.0,
            emissive_factor: [0.0; 3],
            base_color_texture: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TextureData {
    pub name: String,
    pub image: usize,
}

/// Decoded RGBA8 image.
#[derive(Debug, Clone, Default)]
pub struct ImageData {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct SkinData {
    pub name: String,
    /// Joint node indices in canonical order
    pub joints: Vec<usize>,
    pub inverse_bind_matrices: Option<usize>,
    pub skeleton: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetPath {
    Translation,
    Rotation,
    Scale,
    Weights,
}

#[derive(Debug, Clone, Copy)]
pub struct ChannelData {
    pub sampler: usize,
    pub target_node: Option<usize>,
    pub path: TargetPath,
}

#[derive(Debug, Clone, Copy)]
pub struct SamplerData {
    /// Keyframe times
    pub input: usize,
    /// Keyframe values
    pub output: usize,
    pub interpolation: Interpolation,
}

#[derive(Debug, Clone, Default)]
pub struct AnimationData {
    pub name: String,
    pub channels: Vec<ChannelData>,
    pub samplers: Vec<SamplerData>,
}

// ============================================================================
// Query interface
// ============================================================================

/// Read-only view of a parsed scene asset.
///
/// Lookups return `None` for out-of-range indices; the loader turns those
/// into `InvalidData`.
pub trait SceneSource {
    fn nodes(&self) -> &[NodeData];

    /// Root nodes of the default scene.
    fn scene_roots(&self) -> &[usize];

    fn mesh(&self, index: usize) -> Option<&MeshData>;

    fn material(&self, index: usize) -> Option<&MaterialData>;

    fn material_count(&self) -> usize;

    fn texture(&self, index: usize) -> Option<&TextureData>;

    fn image(&self, index: usize) -> Option<&ImageData>;

    fn skins(&self) -> &[SkinData];

    fn animations(&self) -> &[AnimationData];

    fn accessor(&self, index: usize) -> Option<&Accessor>;

    fn node(&self, index: usize) -> Option<&NodeData> {
        self.nodes().get(index)
    }
}

/// Owned scene document. Built by [`crate::assets::gltf`] or by hand.
#[derive(Debug, Clone, Default)]
pub struct SceneDocument {
    pub nodes: Vec<NodeData>,
    pub scene_roots: Vec<usize>,
    pub meshes: Vec<MeshData>,
    pub materials: Vec<MaterialData>,
    pub textures: Vec<TextureData>,
    pub images: Vec<ImageData>,
    pub skins: Vec<SkinData>,
    pub animations: Vec<AnimationData>,
    pub accessors: Vec<Accessor>,
}

impl SceneDocument {
    /// Appends an accessor and returns its index.
    pub fn push_accessor(&mut self, accessor: Accessor) -> usize {
        self.accessors.push(accessor);
        self.accessors.len() - 1
    }

    /// Nodes that are nobody's child, in index order. Used when the source
    /// names no default scene.
    #[must_use]
    pub fn parentless_nodes(&self) -> Vec<usize> {
        let mut has_parent = vec![false; self.nodes.len()];
        for node in &self.nodes {
            for &child in &node.children {
                if let Some(flag) = has_parent.get_mut(child) {
                    *flag = true;
                }
            }
        }
        (0..self.nodes.len()).filter(|&i| !has_parent[i]).collect()
    }
}

impl SceneSource for SceneDocument {
    fn nodes(&self) -> &[NodeData] {
        &self.nodes
    }

    fn scene_roots(&self) -> &[usize] {
        &self.scene_roots
    }

    fn mesh(&self, index: usize) -> Option<&MeshData> {
        self.meshes.get(index)
    }

    fn material(&self, index: usize) -> Option<&MaterialData> {
        self.materials.get(index)
    }

    fn material_count(&self) -> usize {
        self.materials.len()
    }

    fn texture(&self, index: usize) -> Option<&TextureData> {
        self.textures.get(index)
    }

    fn image(&self, index: usize) -> Option<&ImageData> {
        self.images.get(index)
    }

    fn skins(&self) -> &[SkinData] {
        &self.skins
    }

    fn animations(&self) -> &[AnimationData] {
        &self.animations
    }

    fn accessor(&self, index: usize) -> Option<&Accessor> {
        self.accessors.get(index)
    }
}
