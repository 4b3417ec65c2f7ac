//! Headless playback demo.
//!
//! Loads a glTF/GLB given on the command line (or builds a small swinging
//! tail rig in memory), spawns a grid of instances, plays the first clip on
//! every other instance and ticks/renders two seconds of frames against the
//! headless device.
//!
//! ```text
//! RUST_LOG=info cargo run --example headless_playback -- path/to/model.glb
//! ```

use glam::{Mat4, Quat, Vec3};

use skinstance::assets::document::{
    Accessor, AnimationData, ChannelData, ElementType, MeshData, NodeData, PrimitiveData,
    SamplerData, Semantic, SkinData, TargetPath,
};
use skinstance::{
    HeadlessDevice, InstanceCommand, Interpolation, Runtime, RuntimeSettings, SceneDocument,
};

const GRID: i32 = 4;
const FRAMES: u32 = 120;
const DT: f32 = 1.0 / 60.0;

/// A three-joint tail: a quad strip skinned to a chain of joints, with a
/// looping "Swing" clip rotating the middle joint about Z.
fn tail_rig() -> SceneDocument {
    let mut doc = SceneDocument::default();

    let mut positions = Vec::new();
    let mut joints = Vec::new();
    let mut weights = Vec::new();
    for row in 0..3_u16 {
        for x in [-0.1_f32, 0.1] {
            positions.extend_from_slice(&[x, f32::from(row), 0.0]);
            joints.extend_from_slice(&[row, 0, 0, 0]);
            weights.extend_from_slice(&[1.0, 0.0, 0.0, 0.0]);
        }
    }
    let indices: Vec<u16> = vec![0, 1, 3, 0, 3, 2, 2, 3, 5, 2, 5, 4];

    let pos = doc.push_accessor(Accessor::from_f32(ElementType::Vec3, &positions));
    let joints = doc.push_accessor(Accessor::from_u16(ElementType::Vec4, &joints));
    let weights = doc.push_accessor(Accessor::from_f32(ElementType::Vec4, &weights));
    let indices = doc.push_accessor(Accessor::from_u16(ElementType::Scalar, &indices));
    let ibms: Vec<f32> = (0..3)
        .flat_map(|i| Mat4::from_translation(Vec3::new(0.0, -(i as f32), 0.0)).to_cols_array())
        .collect();
    let ibms = doc.push_accessor(Accessor::from_f32(ElementType::Mat4, &ibms));

    let swing = |angle: f32| Quat::from_rotation_z(angle).to_array();
    let times = doc.push_accessor(Accessor::from_f32(ElementType::Scalar, &[0.0, 0.5, 1.0]));
    let rotations = doc.push_accessor(Accessor::from_f32(
        ElementType::Vec4,
        &[swing(-0.6), swing(0.6), swing(-0.6)].concat(),
    ));

    doc.meshes.push(MeshData {
        name: "tail".into(),
        primitives: vec![PrimitiveData {
            attributes: vec![
                (Semantic::Position, pos),
                (Semantic::Joints(0), joints),
                (Semantic::Weights(0), weights),
            ],
            indices: Some(indices),
            ..Default::default()
        }],
    });
    doc.nodes = vec![
        NodeData::new("tail").with_mesh(0, Some(0)),
        NodeData::new("base").with_children(vec![2]),
        NodeData::new("mid")
            .with_trs(Vec3::Y, Quat::IDENTITY, Vec3::ONE)
            .with_children(vec![3]),
        NodeData::new("tip").with_trs(Vec3::Y, Quat::IDENTITY, Vec3::ONE),
    ];
    doc.scene_roots = vec![0, 1];
    doc.skins.push(SkinData {
        name: "tail".into(),
        joints: vec![1, 2, 3],
        inverse_bind_matrices: Some(ibms),
        skeleton: Some(1),
    });
    doc.animations.push(AnimationData {
        name: "Swing".into(),
        channels: vec![ChannelData {
            sampler: 0,
            target_node: Some(2),
            path: TargetPath::Rotation,
        }],
        samplers: vec![SamplerData {
            input: times,
            output: rotations,
            interpolation: Interpolation::Linear,
        }],
    });
    doc
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut runtime = Runtime::new(HeadlessDevice::new(), RuntimeSettings::default());

    let model = match std::env::args().nth(1) {
        Some(path) => {
            let id = runtime.request_load(&path);
            while runtime.load_state(id).is_some_and(|s| *s == skinstance::LoadState::Pending) {
                runtime.tick(0.0);
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
            if let Some(skinstance::LoadState::Failed(reason)) = runtime.load_state(id) {
                anyhow::bail!("failed to load {path}: {reason}");
            }
            id
        }
        None => runtime.load_document("tail-rig", &tail_rig())?,
    };

    let clip = runtime
        .models()
        .model(model)
        .and_then(|m| m.clip_names().first().map(|name| (*name).to_string()));
    log::info!(
        "Model {model} ready; playing {}",
        clip.as_deref().unwrap_or("<no clips>")
    );

    for z in 0..GRID {
        for x in 0..GRID {
            let id = runtime.create_instance(model)?;
            let position = Vec3::new(x as f32 * 2.0, 0.0, z as f32 * -2.0);
            runtime.apply(id, InstanceCommand::SetPosition(position))?;
            if let Some(clip) = clip.as_deref().filter(|_| (x + z) % 2 == 0) {
                runtime.play_animation(id, clip)?;
            }
        }
    }

    let view_proj = Mat4::perspective_rh(45_f32.to_radians(), 16.0 / 9.0, 0.1, 100.0)
        * Mat4::look_at_rh(Vec3::new(3.0, 6.0, 10.0), Vec3::new(3.0, 0.0, -3.0), Vec3::Y);

    for frame in 0..FRAMES {
        runtime.tick(DT);
        let stats = runtime.render(view_proj)?;
        if frame % 30 == 0 {
            log::info!(
                "frame {frame}: {} draws, {} instances, {} records uploaded",
                stats.draw_calls,
                stats.instances_drawn,
                stats.records_uploaded
            );
        }
    }

    let counters = runtime.device().counters();
    log::info!(
        "{} buffers, {} textures, {} programs created; {} writes over {} submissions",
        counters.buffers_created,
        counters.textures_created,
        counters.programs_compiled,
        counters.buffer_writes,
        counters.submissions
    );

    runtime.dispose();
    log::info!("{} GPU objects alive after dispose", runtime.device().live_objects());
    Ok(())
}
