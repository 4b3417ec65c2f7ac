//! Instance Manager Tests
//!
//! Tests for:
//! - Instance creation, commands and playback ticks
//! - Skinning of a two-joint rig against the skeleton root
//! - Instance-buffer packing, regrowth and swap-remove deletion
//! - Dirty-only uploads and retry after a failed render pass

use std::f32::consts::{FRAC_1_SQRT_2, FRAC_PI_4};

use glam::{Mat4, Quat, Vec3};

use skinstance::animation::PlayOptions;
use skinstance::assets::document::{
    Accessor, AnimationData, ChannelData, ElementType, MeshData, NodeData, PrimitiveData,
    SamplerData, Semantic, SkinData, TargetPath,
};
use skinstance::assets::{ModelId, ModelLoader, SceneDocument};
use skinstance::gpu::headless::HeadlessDevice;
use skinstance::gpu::{GpuResourceManager, RawId};
use skinstance::instance::{InstanceCommand, InstanceId, InstanceManager};
use skinstance::scene::Transform;
use skinstance::{Error, Interpolation, ResourceKind, RuntimeSettings};

const EPSILON: f32 = 1e-5;

fn mat_approx(a: Mat4, b: Mat4) -> bool {
    a.abs_diff_eq(b, EPSILON)
}

// ============================================================================
// Fixtures
// ============================================================================

/// Node 0 carries a skinned triangle; node 1 is the root joint, node 2 the
/// child joint one unit above it. Clip "Bend" turns the child from identity
/// to 90° about Y over one second.
fn two_joint_doc() -> SceneDocument {
    let mut doc = SceneDocument::default();
    let pos = doc.push_accessor(Accessor::from_f32(
        ElementType::Vec3,
        &[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
    ));
    let joints = doc.push_accessor(Accessor::from_u16(
        ElementType::Vec4,
        &[0, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0],
    ));
    let weights = doc.push_accessor(Accessor::from_f32(
        ElementType::Vec4,
        &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0],
    ));
    let ibm = doc.push_accessor(Accessor::from_f32(
        ElementType::Mat4,
        &[
            Mat4::IDENTITY.to_cols_array(),
            Mat4::from_translation(-Vec3::Y).to_cols_array(),
        ]
        .concat(),
    ));
    let times = doc.push_accessor(Accessor::from_f32(ElementType::Scalar, &[0.0, 1.0]));
    let rotations = doc.push_accessor(Accessor::from_f32(
        ElementType::Vec4,
        &[0.0, 0.0, 0.0, 1.0, 0.0, FRAC_1_SQRT_2, 0.0, FRAC_1_SQRT_2],
    ));

    doc.meshes.push(MeshData {
        name: "body".into(),
        primitives: vec![PrimitiveData {
            attributes: vec![
                (Semantic::Position, pos),
                (Semantic::Joints(0), joints),
                (Semantic::Weights(0), weights),
            ],
            ..Default::default()
        }],
    });
    doc.nodes = vec![
        NodeData::new("body").with_mesh(0, Some(0)),
        NodeData::new("root").with_children(vec![2]),
        NodeData::new("child").with_trs(Vec3::Y, Quat::IDENTITY, Vec3::ONE),
    ];
    doc.scene_roots = vec![0, 1];
    doc.skins.push(SkinData {
        name: "rig".into(),
        joints: vec![1, 2],
        inverse_bind_matrices: Some(ibm),
        skeleton: None,
    });
    doc.animations.push(AnimationData {
        name: "Bend".into(),
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

struct Fixture {
    resources: GpuResourceManager<HeadlessDevice>,
    loader: ModelLoader,
    instances: InstanceManager,
    model: ModelId,
}

fn fixture_with(settings: &RuntimeSettings) -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut resources = GpuResourceManager::new(HeadlessDevice::new());
    let mut loader = ModelLoader::new(settings);
    let model = loader
        .load_document("two_joint", &two_joint_doc(), &mut resources)
        .unwrap();
    Fixture {
        resources,
        loader,
        instances: InstanceManager::new(settings),
        model,
    }
}

fn fixture() -> Fixture {
    fixture_with(&RuntimeSettings::default())
}

impl Fixture {
    fn spawn(&mut self) -> InstanceId {
        self.instances.create_instance(&self.loader, self.model).unwrap()
    }

    fn render(&mut self) -> skinstance::RenderStats {
        self.instances
            .render(&mut self.resources, Mat4::IDENTITY)
            .unwrap()
    }

    fn instance_buffer(&self) -> RawId {
        self.resources.device().last_submission()[0].instance_buffer
    }

    /// Reads record `slot` back from the headless device.
    fn record(&self, slot: usize) -> Vec<Mat4> {
        let record_len = self.loader.get(self.model).unwrap().record_len();
        let data = &self
            .resources
            .device()
            .buffer(self.instance_buffer())
            .unwrap()
            .data;
        let floats: Vec<f32> = data
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        floats[slot * record_len * 16..(slot + 1) * record_len * 16]
            .chunks_exact(16)
            .map(Mat4::from_cols_slice)
            .collect()
    }
}

// ============================================================================
// Creation and commands
// ============================================================================

#[test]
fn unknown_model_is_resource_not_found() {
    let mut f = fixture();
    let err = f
        .instances
        .create_instance(&f.loader, ModelId::from_source("nowhere"))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::ResourceNotFound {
            kind: ResourceKind::Model,
            ..
        }
    ));
}

#[test]
fn new_instance_starts_in_bind_pose() {
    let mut f = fixture();
    let id = f.spawn();
    let instance = f.instances.get(id).unwrap();

    assert_eq!(id.model, f.model);
    assert_eq!(instance.transform(), &Transform::IDENTITY);
    assert!(instance.is_dirty());
    assert_eq!(instance.joint_matrices().len(), 2);
    for m in instance.joint_matrices() {
        assert!(mat_approx(*m, Mat4::IDENTITY));
    }
    assert_eq!(instance.joint_matrices_flat().len(), 32);
}

#[test]
fn ids_are_unique_and_increasing() {
    let mut f = fixture();
    let a = f.spawn();
    let b = f.spawn();
    assert!(b.id > a.id);
    assert_eq!(f.instances.instances_of(f.model), vec![a, b]);
}

#[test]
fn placement_commands_compose_trs() {
    let mut f = fixture();
    let id = f.spawn();
    f.instances.set_position(id, Vec3::new(1.0, 2.0, 3.0)).unwrap();
    f.instances.set_rotation(id, Quat::from_rotation_z(0.5)).unwrap();
    f.instances.set_scale(id, Vec3::splat(2.0)).unwrap();

    let expected = Mat4::from_scale_rotation_translation(
        Vec3::splat(2.0),
        Quat::from_rotation_z(0.5),
        Vec3::new(1.0, 2.0, 3.0),
    );
    assert!(mat_approx(f.instances.get(id).unwrap().world_matrix(), expected));
}

#[test]
fn node_transform_out_of_range_is_rejected() {
    let mut f = fixture();
    let id = f.spawn();
    let err = f
        .instances
        .set_node_transform(id, 42, Transform::IDENTITY)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::ResourceNotFound {
            kind: ResourceKind::Node,
            ..
        }
    ));
}

#[test]
fn node_transform_updates_joint_matrices() {
    let mut f = fixture();
    let id = f.spawn();
    let lifted = Transform::from_translation(Vec3::new(0.0, 3.0, 0.0));
    f.instances.set_node_transform(id, 2, lifted).unwrap();

    let instance = f.instances.get(id).unwrap();
    // root^-1 * child * ibm = T(0,3,0) * T(0,-1,0)
    assert!(mat_approx(
        instance.joint_matrices()[1],
        Mat4::from_translation(Vec3::new(0.0, 2.0, 0.0))
    ));
}

#[test]
fn commands_on_deleted_instance_fail() {
    let mut f = fixture();
    let id = f.spawn();
    f.instances.delete_instance(id, &mut f.resources).unwrap();

    let err = f
        .instances
        .apply(id, InstanceCommand::SetPosition(Vec3::ONE))
        .unwrap_err();
    assert!(matches!(err, Error::ResourceNotFound { .. }));
    assert!(f.instances.delete_instance(id, &mut f.resources).is_err());
}

// ============================================================================
// Playback
// ============================================================================

#[test]
fn two_joint_bend_skins_about_the_child_joint() {
    let mut f = fixture();
    let id = f.spawn();
    f.instances
        .play_animation(id, "Bend", PlayOptions::default())
        .unwrap();
    f.instances.tick(0.5);

    let instance = f.instances.get(id).unwrap();
    let midpoint = Quat::from_rotation_y(FRAC_PI_4);

    let local = instance.pose().local(2).unwrap().rotation;
    assert!(local.abs_diff_eq(midpoint, EPSILON), "got {local:?}");

    // inverse(IBM[1]) * R * IBM[1]: rotation about the joint's own pivot
    let ibm = Mat4::from_translation(-Vec3::Y);
    let expected = ibm.inverse() * Mat4::from_quat(midpoint) * ibm;
    let actual = instance.joint_matrices()[1];
    assert!(mat_approx(actual, expected), "got {actual:?}");

    // Not a rotation about the skeleton origin
    let naive = Mat4::from_quat(midpoint) * ibm;
    assert!(!mat_approx(actual, naive));

    // Root joint untouched
    assert!(mat_approx(instance.joint_matrices()[0], Mat4::IDENTITY));
}

#[test]
fn looping_wraps_past_duration() {
    let mut f = fixture();
    let a = f.spawn();
    let b = f.spawn();
    f.instances.play_animation(a, "Bend", PlayOptions::default()).unwrap();
    f.instances.play_animation(b, "Bend", PlayOptions::default()).unwrap();

    f.instances.tick(0.1);
    let reference = f.instances.get(a).unwrap().joint_matrices().to_vec();
    let time_a = f.instances.get(a).unwrap().animation().time;

    // One full duration later the pose repeats.
    f.instances.tick(1.0);
    let time_b = f.instances.get(b).unwrap().animation().time;
    assert!((time_a - time_b).abs() < 1e-4, "{time_a} vs {time_b}");
    for (x, y) in reference
        .iter()
        .zip(f.instances.get(b).unwrap().joint_matrices())
    {
        assert!(x.abs_diff_eq(*y, 1e-4));
    }
}

#[test]
fn non_looped_playback_holds_last_pose() {
    let mut f = fixture();
    let id = f.spawn();
    f.instances
        .play_animation(id, "Bend", PlayOptions::default().with_looping(false))
        .unwrap();
    for _ in 0..5 {
        f.instances.tick(0.4);
        let state = f.instances.get(id).unwrap().animation();
        assert!(state.time <= 1.0);
    }

    let instance = f.instances.get(id).unwrap();
    assert!(!instance.animation().playing);
    let end = Quat::from_rotation_y(std::f32::consts::FRAC_PI_2);
    assert!(instance.pose().local(2).unwrap().rotation.abs_diff_eq(end, EPSILON));
}

#[test]
fn unknown_clip_stops_on_tick() {
    let mut f = fixture();
    let id = f.spawn();
    f.instances
        .play_animation(id, "Dance", PlayOptions::default())
        .unwrap();
    assert!(f.instances.get(id).unwrap().animation().playing);

    f.instances.tick(0.1);
    let instance = f.instances.get(id).unwrap();
    assert!(!instance.animation().playing);
    assert!(mat_approx(instance.joint_matrices()[1], Mat4::IDENTITY));
}

#[test]
fn stop_keeps_current_pose() {
    let mut f = fixture();
    let id = f.spawn();
    f.instances.play_animation(id, "Bend", PlayOptions::default()).unwrap();
    f.instances.tick(0.5);
    f.instances.stop_animation(id).unwrap();
    let held = f.instances.get(id).unwrap().joint_matrices().to_vec();

    f.instances.tick(0.3);
    assert_eq!(f.instances.get(id).unwrap().joint_matrices(), held.as_slice());
}

// ============================================================================
// Rendering
// ============================================================================

#[test]
fn one_draw_per_primitive_for_all_instances() {
    let mut f = fixture();
    for _ in 0..3 {
        f.spawn();
    }
    let stats = f.render();
    assert_eq!(stats.draw_calls, 1);
    assert_eq!(stats.instances_drawn, 3);
    assert_eq!(stats.records_uploaded, 3);

    let draws = f.resources.device().last_submission();
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].instance_count, 3);
    assert_eq!(draws[0].element_count, 3);
    // record = [skeleton-root matrix][2 joints]
    assert_eq!(draws[0].uniforms.layout, [3, 0, 1, 1]);
}

#[test]
fn record_holds_draw_node_then_joint_matrices() {
    let mut f = fixture();
    let id = f.spawn();
    f.instances.set_position(id, Vec3::new(5.0, 0.0, 0.0)).unwrap();
    f.instances.play_animation(id, "Bend", PlayOptions::default()).unwrap();
    f.instances.tick(0.5);
    f.render();

    let record = f.record(0);
    let instance = f.instances.get(id).unwrap();
    assert_eq!(record.len(), 3);
    assert!(mat_approx(record[0], Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0))));
    assert_eq!(&record[1..], instance.joint_matrices());
}

#[test]
fn only_dirty_records_are_uploaded() {
    let mut f = fixture();
    let a = f.spawn();
    let _b = f.spawn();
    assert_eq!(f.render().records_uploaded, 2);
    assert_eq!(f.render().records_uploaded, 0);

    f.instances.set_position(a, Vec3::X).unwrap();
    f.resources.device_mut().take_writes();
    assert_eq!(f.render().records_uploaded, 1);

    let writes = f.resources.device().writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].offset, 0);
    assert!(!f.instances.get(a).unwrap().is_dirty());
}

#[test]
fn buffer_grows_and_rewrites_every_record() {
    let settings = RuntimeSettings {
        initial_instance_capacity: 2,
        ..Default::default()
    };
    let mut f = fixture_with(&settings);
    let a = f.spawn();
    let b = f.spawn();
    f.render();
    let group = f.instances.group(f.model).unwrap();
    assert_eq!(group.capacity(), 2);
    let old = group.buffer().unwrap();

    let c = f.spawn();
    f.instances.set_position(c, Vec3::Z).unwrap();
    let stats = f.render();
    let group = f.instances.group(f.model).unwrap();
    assert_eq!(group.capacity(), 4);
    assert!(!f.resources.contains_buffer(old));
    assert_eq!(stats.records_uploaded, 3);

    assert!(mat_approx(f.record(2)[0], Mat4::from_translation(Vec3::Z)));
    for id in [a, b, c] {
        assert!(!f.instances.get(id).unwrap().is_dirty());
    }
}

#[test]
fn delete_swaps_last_record_into_the_gap() {
    let mut f = fixture();
    let a = f.spawn();
    let b = f.spawn();
    let c = f.spawn();
    for (i, id) in [a, b, c].into_iter().enumerate() {
        f.instances.set_position(id, Vec3::new(i as f32, 0.0, 0.0)).unwrap();
    }
    f.render();

    f.instances.delete_instance(b, &mut f.resources).unwrap();
    assert_eq!(f.instances.instances_of(f.model), vec![a, c]);
    assert!(f.instances.get(c).unwrap().is_dirty());

    let stats = f.render();
    assert_eq!(stats.instances_drawn, 2);
    assert_eq!(stats.records_uploaded, 1);
    assert!(mat_approx(f.record(1)[0], Mat4::from_translation(Vec3::new(2.0, 0.0, 0.0))));
}

#[test]
fn deleting_last_instance_issues_no_draws() {
    let mut f = fixture();
    let id = f.spawn();
    f.render();
    let buffers_before = f.resources.device().live_buffers();

    f.instances.delete_instance(id, &mut f.resources).unwrap();
    assert!(f.instances.group(f.model).is_none());
    assert_eq!(f.resources.device().live_buffers(), buffers_before - 1);

    // The submission validates every referenced buffer; a freed instance
    // buffer would fail here.
    let stats = f.render();
    assert_eq!(stats.draw_calls, 0);
    assert!(f.resources.device().last_submission().is_empty());
}

#[test]
fn failed_render_keeps_dirty_state_for_retry() {
    let mut f = fixture();
    let id = f.spawn();
    f.resources.device_mut().set_buffer_budget(Some(0));

    let err = f
        .instances
        .render(&mut f.resources, Mat4::IDENTITY)
        .unwrap_err();
    assert!(matches!(err, Error::Gpu(_)));
    assert!(f.instances.get(id).unwrap().is_dirty());

    f.resources.device_mut().set_buffer_budget(None);
    assert_eq!(f.render().records_uploaded, 1);
    assert!(!f.instances.get(id).unwrap().is_dirty());
}

#[test]
fn failed_upload_after_regrow_rewrites_every_record_on_retry() {
    let settings = RuntimeSettings {
        initial_instance_capacity: 2,
        ..Default::default()
    };
    let mut f = fixture_with(&settings);
    let ids: Vec<InstanceId> = (0..2).map(|_| f.spawn()).collect();
    for (i, &id) in ids.iter().enumerate() {
        f.instances.set_position(id, Vec3::new(i as f32 + 1.0, 0.0, 0.0)).unwrap();
    }
    f.render();

    // Growing to four records; only the first upload into the new buffer
    // gets through.
    f.spawn();
    f.resources.device_mut().set_write_budget(Some(1));
    assert!(f.instances.render(&mut f.resources, Mat4::IDENTITY).is_err());
    for id in f.instances.instances_of(f.model) {
        assert!(f.instances.get(id).unwrap().is_dirty());
    }

    f.resources.device_mut().set_write_budget(None);
    assert_eq!(f.render().records_uploaded, 3);
    assert!(mat_approx(
        f.record(1)[0],
        Mat4::from_translation(Vec3::new(2.0, 0.0, 0.0))
    ));
}

#[test]
fn release_model_destroys_its_instances() {
    let mut f = fixture();
    let a = f.spawn();
    let b = f.spawn();
    f.render();

    assert_eq!(f.instances.release_model(f.model, &mut f.resources), 2);
    assert!(!f.instances.contains(a));
    assert!(!f.instances.contains(b));
    assert_eq!(f.instances.instance_count(), 0);
    assert_eq!(f.instances.group_count(), 0);
}
