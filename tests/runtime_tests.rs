//! Host Runtime Tests
//!
//! Tests for:
//! - request_load + tick materialising models within the per-tick bound
//! - Instance lifecycle and playback through the runtime
//! - Unload and dispose leaving no GPU objects behind
//! - Settings loaded from JSON

use std::f32::consts::FRAC_1_SQRT_2;
use std::path::PathBuf;
use std::time::Duration;

use base64::Engine as _;
use glam::Mat4;
use serde_json::json;

use skinstance::gpu::{HeadlessDevice, ResourceOwner};
use skinstance::{Error, LoadState, ModelId, Runtime, RuntimeSettings};

fn runtime(settings: RuntimeSettings) -> Runtime<HeadlessDevice> {
    let _ = env_logger::builder().is_test(true).try_init();
    Runtime::new(HeadlessDevice::new(), settings)
}

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("skinstance-rt-{name}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// A skinned triangle on a two-joint rig with a one-second "Wave" clip
/// rotating the child joint, written as `.gltf` with a data-URI buffer.
fn write_rig(dir: &std::path::Path, file: &str) -> String {
    let positions: [f32; 9] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
    let weights: [f32; 12] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0];
    let joints: [u16; 12] = [0, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0];
    let ibms = [Mat4::IDENTITY, Mat4::from_translation(-glam::Vec3::Y)];
    let times: [f32; 2] = [0.0, 1.0];
    let rotations: [f32; 8] = [0.0, 0.0, 0.0, 1.0, FRAC_1_SQRT_2, 0.0, 0.0, FRAC_1_SQRT_2];

    let mut bin = Vec::new();
    let mut views = Vec::new();
    for bytes in [
        bytemuck::cast_slice::<f32, u8>(&positions),
        bytemuck::cast_slice(&weights),
        bytemuck::cast_slice(&joints),
        bytemuck::cast_slice(&ibms),
        bytemuck::cast_slice(&times),
        bytemuck::cast_slice(&rotations),
    ] {
        views.push(json!({ "buffer": 0, "byteOffset": bin.len(), "byteLength": bytes.len() }));
        bin.extend_from_slice(bytes);
        while bin.len() % 4 != 0 {
            bin.push(0);
        }
    }
    let encoded = base64::engine::general_purpose::STANDARD.encode(&bin);

    let gltf = json!({
        "asset": { "version": "2.0" },
        "scene": 0,
        "scenes": [ { "nodes": [0, 1] } ],
        "nodes": [
            { "name": "arm", "mesh": 0, "skin": 0 },
            { "name": "shoulder", "children": [2] },
            { "name": "elbow", "translation": [0.0, 1.0, 0.0] }
        ],
        "meshes": [ { "primitives": [ {
            "attributes": { "POSITION": 0, "WEIGHTS_0": 1, "JOINTS_0": 2 }
        } ] } ],
        "skins": [ { "joints": [1, 2], "inverseBindMatrices": 3 } ],
        "animations": [ {
            "name": "Wave",
            "channels": [ { "sampler": 0, "target": { "node": 2, "path": "rotation" } } ],
            "samplers": [ { "input": 4, "output": 5 } ]
        } ],
        "accessors": [
            { "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
              "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0] },
            { "bufferView": 1, "componentType": 5126, "count": 3, "type": "VEC4" },
            { "bufferView": 2, "componentType": 5123, "count": 3, "type": "VEC4" },
            { "bufferView": 3, "componentType": 5126, "count": 2, "type": "MAT4" },
            { "bufferView": 4, "componentType": 5126, "count": 2, "type": "SCALAR",
              "min": [0.0], "max": [1.0] },
            { "bufferView": 5, "componentType": 5126, "count": 2, "type": "VEC4" }
        ],
        "bufferViews": views,
        "buffers": [ {
            "byteLength": bin.len(),
            "uri": format!("data:application/octet-stream;base64,{encoded}")
        } ]
    });

    let path = dir.join(file);
    std::fs::write(&path, serde_json::to_vec(&gltf).unwrap()).unwrap();
    path.to_string_lossy().into_owned()
}

/// Ticks until `id` leaves the pending state.
fn tick_until_settled(runtime: &mut Runtime<HeadlessDevice>, id: ModelId) -> LoadState {
    for _ in 0..1000 {
        runtime.tick(0.0);
        match runtime.load_state(id) {
            Some(LoadState::Pending) => std::thread::sleep(Duration::from_millis(5)),
            Some(state) => return state.clone(),
            None => panic!("{id} was never requested"),
        }
    }
    panic!("{id} did not settle");
}

// ============================================================================
// Loading
// ============================================================================

#[test]
fn request_load_materialises_during_tick() {
    let mut runtime = runtime(RuntimeSettings::default());
    let path = write_rig(&temp_dir("request"), "rig.gltf");

    let id = runtime.request_load(&path);
    assert!(!runtime.is_loaded(id));
    assert!(runtime.create_instance(id).is_err());

    assert_eq!(tick_until_settled(&mut runtime, id), LoadState::Loaded);
    assert!(runtime.is_loaded(id));
    assert!(runtime.resources().owned_count(ResourceOwner::Model(id)) > 0);
}

#[test]
fn tick_respects_max_loads_per_tick() {
    let mut runtime = runtime(RuntimeSettings::default());
    let dir = temp_dir("bound");
    let ids = [
        runtime.request_load(&write_rig(&dir, "a.gltf")),
        runtime.request_load(&write_rig(&dir, "b.gltf")),
        runtime.request_load(&write_rig(&dir, "c.gltf")),
    ];

    let mut loaded_before = 0;
    for _ in 0..1000 {
        runtime.tick(0.0);
        let loaded = ids.iter().filter(|&&id| runtime.is_loaded(id)).count();
        assert!(loaded - loaded_before <= 1, "{loaded} loaded after {loaded_before}");
        loaded_before = loaded;
        if loaded == ids.len() {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(loaded_before, ids.len());
}

#[test]
fn failed_request_reports_through_load_state() {
    let mut runtime = runtime(RuntimeSettings::default());
    let missing = temp_dir("missing").join("nothing.glb");
    let id = runtime.request_load(&missing.to_string_lossy());

    let LoadState::Failed(reason) = tick_until_settled(&mut runtime, id) else {
        panic!("expected a failed load");
    };
    assert!(!reason.is_empty());
    assert_eq!(runtime.resources().live_count(), 0);
}

// ============================================================================
// Instances
// ============================================================================

#[test]
fn instances_play_and_render() {
    let mut runtime = runtime(RuntimeSettings::default());
    let model = runtime
        .load(&write_rig(&temp_dir("play"), "rig.gltf"))
        .unwrap();

    let a = runtime.create_instance(model).unwrap();
    let b = runtime.create_instance(model).unwrap();
    runtime.play_animation(a, "Wave").unwrap();

    runtime.tick(0.5);
    let stats = runtime.render(Mat4::IDENTITY).unwrap();
    assert_eq!(stats.draw_calls, 1);
    assert_eq!(stats.instances_drawn, 2);
    assert_eq!(stats.records_uploaded, 2);

    let playing = runtime.instances().get(a).unwrap().animation();
    assert!(playing.playing);
    assert!(playing.looping);
    assert!((playing.time - 0.5).abs() < 1e-6);
    assert!(!runtime.instances().get(b).unwrap().animation().playing);

    // Only the animated instance changes on the next frame.
    runtime.tick(0.1);
    let stats = runtime.render(Mat4::IDENTITY).unwrap();
    assert_eq!(stats.records_uploaded, 1);

    assert_eq!(runtime.frame_count(), 2);
    assert!((runtime.time() - 0.6).abs() < 1e-6);
}

#[test]
fn playing_an_unknown_clip_is_not_an_error() {
    let mut runtime = runtime(RuntimeSettings::default());
    let model = runtime
        .load(&write_rig(&temp_dir("unknown-clip"), "rig.gltf"))
        .unwrap();
    let id = runtime.create_instance(model).unwrap();

    runtime.play_animation(id, "Dance").unwrap();
    runtime.tick(0.1);
    assert!(!runtime.instances().get(id).unwrap().animation().playing);
}

#[test]
fn deleted_instance_is_resource_not_found() {
    let mut runtime = runtime(RuntimeSettings::default());
    let model = runtime
        .load(&write_rig(&temp_dir("delete"), "rig.gltf"))
        .unwrap();
    let id = runtime.create_instance(model).unwrap();
    runtime.delete_instance(id).unwrap();

    assert!(matches!(
        runtime.delete_instance(id),
        Err(Error::ResourceNotFound { .. })
    ));
    assert!(matches!(
        runtime.play_animation(id, "Wave"),
        Err(Error::ResourceNotFound { .. })
    ));
}

// ============================================================================
// Teardown
// ============================================================================

#[test]
fn unload_destroys_instances_and_model_resources() {
    let mut runtime = runtime(RuntimeSettings::default());
    let model = runtime
        .load(&write_rig(&temp_dir("unload"), "rig.gltf"))
        .unwrap();
    let id = runtime.create_instance(model).unwrap();
    runtime.render(Mat4::IDENTITY).unwrap();

    runtime.unload_model(model).unwrap();
    assert!(!runtime.instances().contains(id));
    assert_eq!(runtime.resources().owned_count(ResourceOwner::Model(model)), 0);
    assert_eq!(runtime.resources().owned_count(ResourceOwner::Group(model)), 0);
    assert!(matches!(
        runtime.unload_model(model),
        Err(Error::ResourceNotFound { .. })
    ));

    // Nothing left to draw.
    let stats = runtime.render(Mat4::IDENTITY).unwrap();
    assert_eq!(stats.draw_calls, 0);
}

#[test]
fn dispose_leaves_no_live_gpu_objects() {
    let mut runtime = runtime(RuntimeSettings::default());
    let model = runtime
        .load(&write_rig(&temp_dir("dispose"), "rig.gltf"))
        .unwrap();
    for _ in 0..3 {
        runtime.create_instance(model).unwrap();
    }
    runtime.render(Mat4::IDENTITY).unwrap();
    assert!(runtime.device().live_objects() > 0);

    runtime.dispose();
    assert_eq!(runtime.device().live_objects(), 0);
    assert_eq!(runtime.instances().instance_count(), 0);
    assert!(!runtime.is_loaded(model));
}

#[test]
fn dispose_drops_loads_still_in_flight() {
    let mut runtime = runtime(RuntimeSettings::default());
    let dir = temp_dir("dispose-pending");
    let ids = [
        runtime.request_load(&write_rig(&dir, "a.gltf")),
        runtime.request_load(&write_rig(&dir, "b.gltf")),
    ];
    runtime.dispose();

    for _ in 0..20 {
        runtime.tick(0.0);
        std::thread::sleep(Duration::from_millis(5));
    }
    for id in ids {
        assert!(!runtime.is_loaded(id));
        assert!(runtime.load_state(id).is_none());
    }
    assert_eq!(runtime.device().live_objects(), 0);

    // The runtime still accepts new work afterwards.
    let id = runtime.request_load(&write_rig(&dir, "c.gltf"));
    assert_eq!(tick_until_settled(&mut runtime, id), LoadState::Loaded);
}

// ============================================================================
// Settings
// ============================================================================

#[test]
fn settings_from_json_fill_defaults() {
    let settings =
        RuntimeSettings::from_json_str(r#"{ "max_loads_per_tick": null, "default_loop": false }"#)
            .unwrap();
    assert_eq!(settings.max_loads_per_tick, None);
    assert!(!settings.default_loop);
    assert_eq!(settings.initial_instance_capacity, 16);

    let mut runtime = runtime(settings);
    let model = runtime
        .load(&write_rig(&temp_dir("settings"), "rig.gltf"))
        .unwrap();
    let id = runtime.create_instance(model).unwrap();
    runtime.play_animation(id, "Wave").unwrap();
    assert!(!runtime.instances().get(id).unwrap().animation().looping);
}

#[test]
fn malformed_settings_are_load_failed() {
    assert!(matches!(
        RuntimeSettings::from_json_str("{ not json"),
        Err(Error::LoadFailed { .. })
    ));
}
