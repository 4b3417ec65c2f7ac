//! glTF / GLB parse stage.
//!
//! Turns a `.gltf` or `.glb` file into an inert [`SceneDocument`]. Nothing
//! here touches GPU state, so it runs on the parse worker thread.

use std::fs;
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use glam::{Quat, Vec3};

use crate::animation::Interpolation;
use crate::assets::document::{
    Accessor, AnimationData, ChannelData, ComponentType, ElementType, ImageData, MaterialData,
    MeshData, NodeData, PrimitiveData, PrimitiveMode, SamplerData, SceneDocument, Semantic,
    SkinData, TargetPath, TextureData,
};
use crate::errors::{Error, Result};
use crate::scene::Transform;

/// Reads and parses a glTF or GLB file. External buffers and images are
/// resolved relative to the file's directory.
pub fn parse_file(path: impl AsRef<Path>) -> Result<SceneDocument> {
    let path = path.as_ref();
    let label = path.display().to_string();
    let bytes = fs::read(path).map_err(|e| Error::load_failed(&label, e))?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("./"));
    parse_labeled(&bytes, Some(base_dir), &label)
}

/// Parses an in-memory glTF or GLB. Without `base_dir` only embedded and
/// data-URI buffers can be resolved.
pub fn parse_slice(bytes: &[u8], base_dir: Option<&Path>) -> Result<SceneDocument> {
    parse_labeled(bytes, base_dir, "<memory>")
}

fn parse_labeled(bytes: &[u8], base_dir: Option<&Path>, label: &str) -> Result<SceneDocument> {
    let gltf = gltf::Gltf::from_slice(bytes).map_err(|e| Error::load_failed(label, e))?;
    let fail = |reason: String| Error::load_failed(label, reason);

    let buffers = load_buffers(&gltf, base_dir).map_err(fail)?;

    let mut doc = SceneDocument::default();

    for accessor in gltf.accessors() {
        let bytes = accessor_bytes(&accessor, &buffers)
            .map_err(|e| fail(format!("accessor {}: {e}", accessor.index())))?;
        doc.accessors.push(Accessor {
            element_type: element_type(accessor.dimensions()),
            component_type: component_type(accessor.data_type()),
            normalized: accessor.normalized(),
            count: accessor.count(),
            bytes,
        });
    }

    for image in gltf.images() {
        doc.images
            .push(load_image(&image, &buffers, base_dir).map_err(fail)?);
    }

    for texture in gltf.textures() {
        doc.textures.push(TextureData {
            name: texture.name().unwrap_or_default().to_string(),
            image: texture.source().index(),
        });
    }

    for material in gltf.materials() {
        let pbr = material.pbr_metallic_roughness();
        doc.materials.push(MaterialData {
            name: material.name().unwrap_or_default().to_string(),
            base_color_factor: pbr.base_color_factor(),
            metallic_factor: pbr.metallic_factor(),
            roughness_factor: pbr.roughness_factor(),
            emissive_factor: material.emissive_factor(),
            base_color_texture: pbr.base_color_texture().map(|info| info.texture().index()),
        });
    }

    for mesh in gltf.meshes() {
        let primitives = mesh
            .primitives()
            .map(|primitive| PrimitiveData {
                attributes: primitive
                    .attributes()
                    .map(|(semantic, accessor)| (map_semantic(&semantic), accessor.index()))
                    .collect(),
                indices: primitive.indices().map(|a| a.index()),
                material: primitive.material().index(),
                mode: match primitive.mode() {
                    gltf::mesh::Mode::Triangles => PrimitiveMode::Triangles,
                    gltf::mesh::Mode::Points => PrimitiveMode::Points,
                    gltf::mesh::Mode::Lines => PrimitiveMode::Lines,
                    _ => PrimitiveMode::Other,
                },
            })
            .collect();
        doc.meshes.push(MeshData {
            name: mesh.name().unwrap_or_default().to_string(),
            primitives,
        });
    }

    for node in gltf.nodes() {
        let (t, r, s) = node.transform().decomposed();
        doc.nodes.push(NodeData {
            name: node
                .name()
                .map_or_else(|| format!("Node_{}", node.index()), str::to_string),
            transform: Transform::from_trs(
                Vec3::from_array(t),
                Quat::from_array(r),
                Vec3::from_array(s),
            ),
            children: node.children().map(|c| c.index()).collect(),
            mesh: node.mesh().map(|m| m.index()),
            skin: node.skin().map(|s| s.index()),
        });
    }

    for skin in gltf.skins() {
        doc.skins.push(SkinData {
            name: skin.name().unwrap_or_default().to_string(),
            joints: skin.joints().map(|j| j.index()).collect(),
            inverse_bind_matrices: skin.inverse_bind_matrices().map(|a| a.index()),
            skeleton: skin.skeleton().map(|n| n.index()),
        });
    }

    for (index, animation) in gltf.animations().enumerate() {
        let mut data = AnimationData {
            name: animation
                .name()
                .map_or_else(|| format!("anim_{index}"), str::to_string),
            ..Default::default()
        };
        for channel in animation.channels() {
            let sampler = channel.sampler();
            let target = channel.target();
            data.samplers.push(SamplerData {
                input: sampler.input().index(),
                output: sampler.output().index(),
                interpolation: match sampler.interpolation() {
                    gltf::animation::Interpolation::Step => Interpolation::Step,
                    gltf::animation::Interpolation::Linear => Interpolation::Linear,
                    gltf::animation::Interpolation::CubicSpline => Interpolation::CubicSpline,
                },
            });
            data.channels.push(ChannelData {
                sampler: data.samplers.len() - 1,
                target_node: target.node().map(|n| n.index()),
                path: match target.property() {
                    gltf::animation::Property::Translation => TargetPath::Translation,
                    gltf::animation::Property::Rotation => TargetPath::Rotation,
                    gltf::animation::Property::Scale => TargetPath::Scale,
                    gltf::animation::Property::MorphTargetWeights => TargetPath::Weights,
                },
            });
        }
        doc.animations.push(data);
    }

    let default_scene = gltf.default_scene().or_else(|| gltf.scenes().next());
    doc.scene_roots = match default_scene {
        Some(scene) => scene.nodes().map(|n| n.index()).collect(),
        None => doc.parentless_nodes(),
    };

    log::debug!(
        "Parsed '{label}': {} nodes, {} meshes, {} skins, {} animations",
        doc.nodes.len(),
        doc.meshes.len(),
        doc.skins.len(),
        doc.animations.len()
    );
    Ok(doc)
}

// ============================================================================
// Buffers and images
// ============================================================================

fn load_buffers(gltf: &gltf::Gltf, base_dir: Option<&Path>) -> std::result::Result<Vec<Vec<u8>>, String> {
    let mut buffer_data = Vec::new();
    for buffer in gltf.buffers() {
        let data = match buffer.source() {
            gltf::buffer::Source::Bin => gltf
                .blob
                .as_deref()
                .map(<[u8]>::to_vec)
                .ok_or_else(|| "missing GLB binary chunk".to_string())?,
            gltf::buffer::Source::Uri(uri) => read_uri(uri, base_dir)?,
        };
        if data.len() < buffer.length() {
            return Err(format!(
                "buffer {} holds {} bytes, declared {}",
                buffer.index(),
                data.len(),
                buffer.length()
            ));
        }
        buffer_data.push(data);
    }
    Ok(buffer_data)
}

/// Resolves a `data:` URI or a path relative to `base_dir`.
fn read_uri(uri: &str, base_dir: Option<&Path>) -> std::result::Result<Vec<u8>, String> {
    if let Some(rest) = uri.strip_prefix("data:") {
        let (_, payload) = rest
            .split_once(";base64,")
            .ok_or_else(|| "only base64 data URIs are supported".to_string())?;
        return BASE64
            .decode(payload)
            .map_err(|e| format!("bad data URI: {e}"));
    }
    let base_dir = base_dir.ok_or_else(|| format!("cannot resolve '{uri}' without a base directory"))?;
    let path = base_dir.join(uri);
    fs::read(&path).map_err(|e| format!("failed to read '{}': {e}", path.display()))
}

fn load_image(
    image: &gltf::Image<'_>,
    buffers: &[Vec<u8>],
    base_dir: Option<&Path>,
) -> std::result::Result<ImageData, String> {
    let decoded = match image.source() {
        gltf::image::Source::Uri { uri, .. } => {
            let bytes = read_uri(uri, base_dir)?;
            image::load_from_memory(&bytes)
        }
        gltf::image::Source::View { view, .. } => {
            let bytes = view_slice(&view, buffers)?;
            image::load_from_memory(bytes)
        }
    }
    .map_err(|e| format!("image {}: {e}", image.index()))?
    .to_rgba8();

    Ok(ImageData {
        name: image.name().unwrap_or_default().to_string(),
        width: decoded.width(),
        height: decoded.height(),
        rgba: decoded.into_raw(),
    })
}

fn view_slice<'b>(
    view: &gltf::buffer::View<'_>,
    buffers: &'b [Vec<u8>],
) -> std::result::Result<&'b [u8], String> {
    let buffer = buffers
        .get(view.buffer().index())
        .ok_or_else(|| format!("view {} references a missing buffer", view.index()))?;
    buffer
        .get(view.offset()..view.offset() + view.length())
        .ok_or_else(|| format!("view {} exceeds its buffer", view.index()))
}

// ============================================================================
// Accessors
// ============================================================================

/// Copies an accessor's elements into a packed array, applying sparse
/// substitutions. Accessors without a view start zero-filled.
fn accessor_bytes(
    accessor: &gltf::Accessor<'_>,
    buffers: &[Vec<u8>],
) -> std::result::Result<Vec<u8>, String> {
    let elem_size = accessor.size();
    let count = accessor.count();
    let mut data = vec![0u8; count * elem_size];

    if let Some(view) = accessor.view() {
        let src = view_slice(&view, buffers)?;
        let stride = view.stride().unwrap_or(elem_size);
        for i in 0..count {
            let start = accessor.offset() + i * stride;
            let element = src
                .get(start..start + elem_size)
                .ok_or_else(|| format!("element {i} lies outside view {}", view.index()))?;
            data[i * elem_size..(i + 1) * elem_size].copy_from_slice(element);
        }
    }

    if let Some(sparse) = accessor.sparse() {
        let indices = sparse.indices();
        let index_bytes = view_slice(&indices.view(), buffers)?;
        let index_size = match indices.index_type() {
            gltf::accessor::sparse::IndexType::U8 => 1,
            gltf::accessor::sparse::IndexType::U16 => 2,
            gltf::accessor::sparse::IndexType::U32 => 4,
            #[allow(unreachable_patterns)]
            _ => return Err("unsupported sparse index type".to_string()),
        };

        let values = sparse.values();
        let value_bytes = view_slice(&values.view(), buffers)?;

        for i in 0..sparse.count() {
            let at = indices.offset() + i * index_size;
            let raw = index_bytes
                .get(at..at + index_size)
                .ok_or_else(|| format!("sparse index {i} out of bounds"))?;
            let target = match *raw {
                [a] => usize::from(a),
                [a, b] => usize::from(u16::from_le_bytes([a, b])),
                [a, b, c, d] => u32::from_le_bytes([a, b, c, d]) as usize,
                _ => return Err(format!("sparse index {i} has width {index_size}")),
            };
            if target >= count {
                return Err(format!("sparse index {target} exceeds count {count}"));
            }
            let from = values.offset() + i * elem_size;
            let value = value_bytes
                .get(from..from + elem_size)
                .ok_or_else(|| format!("sparse value {i} out of bounds"))?;
            data[target * elem_size..(target + 1) * elem_size].copy_from_slice(value);
        }
    }

    Ok(data)
}

fn element_type(dimensions: gltf::accessor::Dimensions) -> ElementType {
    match dimensions {
        gltf::accessor::Dimensions::Scalar => ElementType::Scalar,
        gltf::accessor::Dimensions::Vec2 => ElementType::Vec2,
        gltf::accessor::Dimensions::Vec3 => ElementType::Vec3,
        gltf::accessor::Dimensions::Vec4 => ElementType::Vec4,
        gltf::accessor::Dimensions::Mat2 => ElementType::Mat2,
        gltf::accessor::Dimensions::Mat3 => ElementType::Mat3,
        gltf::accessor::Dimensions::Mat4 => ElementType::Mat4,
    }
}

fn component_type(data_type: gltf::accessor::DataType) -> ComponentType {
    match data_type {
        gltf::accessor::DataType::I8 => ComponentType::I8,
        gltf::accessor::DataType::U8 => ComponentType::U8,
        gltf::accessor::DataType::I16 => ComponentType::I16,
        gltf::accessor::DataType::U16 => ComponentType::U16,
        gltf::accessor::DataType::U32 => ComponentType::U32,
        gltf::accessor::DataType::F32 => ComponentType::F32,
    }
}

fn map_semantic(semantic: &gltf::Semantic) -> Semantic {
    match semantic {
        gltf::Semantic::Positions => Semantic::Position,
        gltf::Semantic::Normals => Semantic::Normal,
        gltf::Semantic::TexCoords(set) => Semantic::TexCoord(*set),
        gltf::Semantic::Joints(set) => Semantic::Joints(*set),
        gltf::Semantic::Weights(set) => Semantic::Weights(*set),
        other => Semantic::Other(format!("{other:?}")),
    }
}
