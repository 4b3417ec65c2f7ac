//! Animation Sampler Tests
//!
//! Tests for:
//! - Step / linear / slerp / cubic Hermite evaluation
//! - Clamping outside the keyframe range and exact keyframe hits
//! - TrackCursor agreement with the stateless binary search
//! - Playback time wrapping, reverse playback and non-looped stop
//! - sample_clip writing into a pose

use std::f32::consts::FRAC_PI_2;

use glam::{Quat, Vec3};

use skinstance::animation::{
    AnimationClip, AnimationState, Channel, ChannelValue, Interpolation, PlayOptions, Track,
    TrackCursor, evaluate, evaluate_with_cursor, find_keyframe, sample_clip, wrap_time,
};
use skinstance::scene::{Hierarchy, Joint, Pose, Transform};

const EPSILON: f32 = 1e-5;

fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < EPSILON
}

fn translation_track(interpolation: Interpolation, times: Vec<f32>, xs: &[f32]) -> Track {
    let values = xs.iter().flat_map(|&x| [x, 0.0, 0.0]).collect();
    Track::new(0, Channel::Translation, interpolation, times, values).unwrap()
}

fn translation(value: ChannelValue) -> Vec3 {
    match value {
        ChannelValue::Translation(v) => v,
        other => panic!("expected translation, got {other:?}"),
    }
}

fn rotation(value: ChannelValue) -> Quat {
    match value {
        ChannelValue::Rotation(q) => q,
        other => panic!("expected rotation, got {other:?}"),
    }
}

// ============================================================================
// Keyframe lookup
// ============================================================================

#[test]
fn find_keyframe_brackets_and_clamps() {
    let times = [0.0, 1.0, 2.0];
    assert_eq!(find_keyframe(&times, -3.0), (0, 0.0));
    assert_eq!(find_keyframe(&times, 0.5), (0, 0.5));
    assert_eq!(find_keyframe(&times, 1.0), (1, 0.0));
    assert_eq!(find_keyframe(&times, 2.0), (1, 1.0));
    assert_eq!(find_keyframe(&times, 9.0), (1, 1.0));
}

#[test]
fn find_keyframe_single_key() {
    assert_eq!(find_keyframe(&[0.7], 0.0), (0, 0.0));
    assert_eq!(find_keyframe(&[0.7], 5.0), (0, 0.0));
}

#[test]
fn cursor_matches_binary_search_over_a_sweep() {
    let times: Vec<f32> = (0..40).map(|i| i as f32 * 0.25).collect();
    let mut cursor = TrackCursor::default();

    // Forward playback, a jump back and a reverse sweep
    let mut sample_times: Vec<f32> = (0..200).map(|i| i as f32 * 0.05).collect();
    sample_times.push(0.1);
    sample_times.extend((0..200).rev().map(|i| i as f32 * 0.05));

    for time in sample_times {
        assert_eq!(
            cursor.find(&times, time),
            find_keyframe(&times, time),
            "t = {time}"
        );
    }
}

// ============================================================================
// Evaluation
// ============================================================================

#[test]
fn linear_midpoint() {
    let track = translation_track(Interpolation::Linear, vec![0.0, 1.0], &[0.0, 10.0]);
    let v = translation(evaluate(&track, 0.5));
    assert!(approx(v.x, 5.0), "Expected 5.0, got {}", v.x);
}

#[test]
fn step_holds_previous_value() {
    let track = translation_track(Interpolation::Step, vec![0.0, 1.0, 2.0], &[1.0, 2.0, 3.0]);
    assert_eq!(translation(evaluate(&track, 0.99)).x, 1.0);
    assert_eq!(translation(evaluate(&track, 1.5)).x, 2.0);
}

#[test]
fn sampling_outside_range_clamps_to_end_values() {
    for interpolation in [
        Interpolation::Step,
        Interpolation::Linear,
    ] {
        let track = translation_track(interpolation, vec![1.0, 2.0], &[10.0, 20.0]);
        assert_eq!(translation(evaluate(&track, -5.0)).x, 10.0);
        assert_eq!(translation(evaluate(&track, 0.0)).x, 10.0);
        assert_eq!(translation(evaluate(&track, 2.0)).x, 20.0);
        assert_eq!(translation(evaluate(&track, 100.0)).x, 20.0);
    }
}

#[test]
fn exact_keyframe_hits_are_bit_exact() {
    let xs = [0.1_f32, 0.7, -3.3];
    let times = vec![0.0, 0.4, 1.3];

    for interpolation in [Interpolation::Step, Interpolation::Linear] {
        let track = translation_track(interpolation, times.clone(), &xs);
        for (t, x) in times.iter().zip(xs) {
            assert_eq!(translation(evaluate(&track, *t)).x.to_bits(), x.to_bits());
        }
    }

    // Cubic: [in, value, out] per key
    let values: Vec<f32> = xs
        .iter()
        .flat_map(|&x| [5.0, 0.0, 0.0, x, 0.0, 0.0, -5.0, 0.0, 0.0])
        .collect();
    let track = Track::new(
        0,
        Channel::Translation,
        Interpolation::CubicSpline,
        times.clone(),
        values,
    )
    .unwrap();
    for (t, x) in times.iter().zip(xs) {
        assert_eq!(translation(evaluate(&track, *t)).x.to_bits(), x.to_bits());
    }
}

#[test]
fn rotation_slerps_and_stays_normalized() {
    let start = Quat::IDENTITY;
    let end = Quat::from_rotation_y(FRAC_PI_2);
    let values = [start.to_array(), end.to_array()].concat();
    let track = Track::new(
        0,
        Channel::Rotation,
        Interpolation::Linear,
        vec![0.0, 1.0],
        values,
    )
    .unwrap();

    let q = rotation(evaluate(&track, 0.5));
    let expected = Quat::from_rotation_y(FRAC_PI_2 * 0.5);
    assert!(approx(q.length(), 1.0));
    assert!(q.abs_diff_eq(expected, EPSILON), "got {q:?}");
}

#[test]
fn cubic_hermite_scales_tangents_by_interval() {
    // v0 = 0, out0 = 8, in1 = 0, v1 = 10 over a 2 second interval.
    // At t = 0.5: 0.5 * 0 + 0.125 * (8 * 2) + 0.5 * 10 - 0.125 * 0 = 7
    let values = vec![
        0.0, 0.0, 0.0, /* value */ 0.0, 0.0, 0.0, /* out */ 8.0, 0.0, 0.0, //
        0.0, 0.0, 0.0, /* value */ 10.0, 0.0, 0.0, /* out */ 0.0, 0.0, 0.0,
    ];
    let track = Track::new(
        0,
        Channel::Translation,
        Interpolation::CubicSpline,
        vec![0.0, 2.0],
        values,
    )
    .unwrap();

    let v = translation(evaluate(&track, 1.0));
    assert!(approx(v.x, 7.0), "Expected 7.0, got {}", v.x);
}

#[test]
fn cubic_with_flat_tangents_is_smoothstep() {
    let values = vec![
        0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, //
        0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0,
    ];
    let track = Track::new(
        0,
        Channel::Translation,
        Interpolation::CubicSpline,
        vec![0.0, 1.0],
        values,
    )
    .unwrap();

    for t in [0.25_f32, 0.5, 0.75] {
        let smooth = t * t * (3.0 - 2.0 * t);
        assert!(approx(translation(evaluate(&track, t)).x, smooth));
    }
}

#[test]
fn cursor_and_stateless_evaluation_agree() {
    let track = translation_track(
        Interpolation::Linear,
        vec![0.0, 0.5, 1.0, 1.5, 2.0],
        &[0.0, 4.0, -1.0, 2.0, 8.0],
    );
    let mut cursor = TrackCursor::default();
    for i in 0..50 {
        let t = i as f32 * 0.047;
        assert_eq!(
            evaluate_with_cursor(&track, t, &mut cursor),
            evaluate(&track, t)
        );
    }
}

#[test]
fn malformed_tracks_are_rejected() {
    let linear = Interpolation::Linear;
    assert!(Track::new(0, Channel::Scale, linear, vec![], vec![]).is_err());
    assert!(Track::new(0, Channel::Scale, linear, vec![1.0, 0.5], vec![0.0; 6]).is_err());
    assert!(Track::new(0, Channel::Scale, linear, vec![0.0, f32::NAN], vec![0.0; 6]).is_err());
    assert!(Track::new(0, Channel::Rotation, linear, vec![0.0, 1.0], vec![0.0; 6]).is_err());
    assert!(
        Track::new(0, Channel::Scale, Interpolation::CubicSpline, vec![0.0], vec![0.0; 3])
            .is_err()
    );
}

// ============================================================================
// Playback
// ============================================================================

#[test]
fn clip_duration_is_latest_keyframe() {
    let clip = AnimationClip::new(
        "walk",
        vec![
            translation_track(Interpolation::Linear, vec![0.0, 1.5], &[0.0, 1.0]),
            translation_track(Interpolation::Linear, vec![0.0, 2.0], &[0.0, 1.0]),
        ],
    );
    assert!(approx(clip.duration, 2.0));
}

#[test]
fn looped_time_wraps_just_past_duration() {
    let duration = 2.0;
    let epsilon = 0.01;
    let wrapped = wrap_time(duration + epsilon, duration, true);
    assert!(approx(wrapped, epsilon), "got {wrapped}");

    // Sampling the wrapped time equals sampling epsilon directly.
    let track = translation_track(Interpolation::Linear, vec![0.0, duration], &[0.0, 10.0]);
    assert_eq!(evaluate(&track, wrapped), evaluate(&track, epsilon));
}

#[test]
fn reverse_playback_wraps_to_end() {
    let mut state = AnimationState::default();
    state.play("spin", PlayOptions::default().with_speed(-1.0));
    let t = state.advance(0.25, 1.0);
    assert!(approx(t, 0.75), "got {t}");
}

#[test]
fn zero_duration_clip_stays_at_zero() {
    assert_eq!(wrap_time(3.0, 0.0, true), 0.0);
    assert_eq!(wrap_time(3.0, 0.0, false), 0.0);
}

#[test]
fn non_looped_playback_clamps_then_stops() {
    let mut state = AnimationState::default();
    state.play("jump", PlayOptions::default().with_looping(false));

    assert!(approx(state.advance(0.6, 1.0), 0.6));
    assert!(approx(state.advance(0.6, 1.0), 1.0));
    assert!(state.playing, "first clamped tick keeps playing");
    assert!(approx(state.advance(0.6, 1.0), 1.0));
    assert!(!state.playing);
    assert_eq!(state.clip.as_deref(), Some("jump"));
}

#[test]
fn play_options_follow_settings() {
    let settings = skinstance::RuntimeSettings {
        default_playback_speed: 0.5,
        default_loop: false,
        ..Default::default()
    };
    let options = PlayOptions::default_from(&settings);
    assert!(approx(options.speed, 0.5));
    assert!(!options.looping);
}

// ============================================================================
// sample_clip
// ============================================================================

#[test]
fn sample_clip_writes_only_targeted_nodes() {
    // 0 -> 1, and 2 on its own
    let hierarchy = Hierarchy::from_children(vec![vec![1], vec![], vec![]]).unwrap();
    let mut pose = Pose::new(&hierarchy, vec![Transform::IDENTITY; 3]);
    let joints = vec![Joint {
        name: "bone".into(),
        node: 1,
        inverse_bind: glam::Mat4::IDENTITY,
        children: vec![],
    }];

    let clip = AnimationClip::new(
        "lift",
        vec![translation_track(Interpolation::Linear, vec![0.0, 1.0], &[0.0, 4.0])],
    );
    let mut cursors = Vec::new();
    sample_clip(&clip, 0.5, &joints, &hierarchy, &mut pose, &mut cursors);

    assert_eq!(cursors.len(), 1);
    assert!(pose.is_dirty(1));
    assert!(!pose.is_dirty(0));
    assert!(!pose.is_dirty(2));

    pose.flush(&hierarchy);
    assert!(approx(pose.world(1).unwrap().translation.x, 2.0));
    assert_eq!(pose.local(0), Some(&Transform::IDENTITY));
}
