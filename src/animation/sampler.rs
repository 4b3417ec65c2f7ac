//! Animation Sampler
//!
//! Stateless evaluation of keyframe tracks at an arbitrary time.
//!
//! # Keyframe lookup
//!
//! A binary search finds the bracketing pair `[i, i + 1]` with
//! `times[i] <= time < times[i + 1]`. Times before the first key clamp to the
//! first key (factor 0); times at or after the last key use the final two
//! keys with factor 1. Single-key tracks always return their only value.
//!
//! Factors of exactly 0 and 1 return the stored keyframe value unchanged, for
//! every interpolation mode.
//!
//! # Cursors
//!
//! [`TrackCursor`] caches the last bracket. During normal playback the next
//! bracket is almost always the same one or a neighbour, so a short linear
//! scan replaces the binary search. The result is always identical to
//! [`find_keyframe`].

use glam::{Quat, Vec3, Vec4};

use crate::animation::clip::{AnimationClip, Channel, Interpolation, Track};
use crate::scene::hierarchy::{Hierarchy, Pose};
use crate::scene::skinning::Joint;
use crate::scene::transform::Transform;

const MAX_SCAN_OFFSET: usize = 3;

/// One sampled channel value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChannelValue {
    Translation(Vec3),
    Rotation(Quat),
    Scale(Vec3),
}

impl ChannelValue {
    /// Raw components, `arity` of them.
    #[must_use]
    pub fn to_vec(self) -> Vec<f32> {
        match self {
            Self::Translation(v) | Self::Scale(v) => v.to_array().to_vec(),
            Self::Rotation(q) => q.to_array().to_vec(),
        }
    }
}

trait Interpolatable: Copy {
    fn from_slice(values: &[f32]) -> Self;

    fn interpolate_linear(start: Self, end: Self, t: f32) -> Self;

    fn interpolate_cubic(
        v0: Self,
        out_tangent0: Self,
        in_tangent1: Self,
        v1: Self,
        t: f32,
        dt: f32,
    ) -> Self;
}

/// Hermite basis weights for `(v0, m0, v1, m1)`.
#[inline]
fn hermite_basis(t: f32) -> (f32, f32, f32, f32) {
    let t2 = t * t;
    let t3 = t2 * t;
    let s2 = -2.0 * t3 + 3.0 * t2;
    let s3 = t3 - t2;
    let s0 = 1.0 - s2;
    let s1 = s3 - t2 + t;
    (s0, s1, s2, s3)
}

impl Interpolatable for Vec3 {
    fn from_slice(values: &[f32]) -> Self {
        Vec3::from_slice(values)
    }

    fn interpolate_linear(start: Self, end: Self, t: f32) -> Self {
        start.lerp(end, t)
    }

    fn interpolate_cubic(v0: Self, out_tangent0: Self, in_tangent1: Self, v1: Self, t: f32, dt: f32) -> Self {
        let (s0, s1, s2, s3) = hermite_basis(t);
        let m0 = out_tangent0 * dt;
        let m1 = in_tangent1 * dt;
        v0 * s0 + m0 * s1 + v1 * s2 + m1 * s3
    }
}

impl Interpolatable for Quat {
    fn from_slice(values: &[f32]) -> Self {
        Quat::from_slice(values)
    }

    fn interpolate_linear(start: Self, end: Self, t: f32) -> Self {
        // Slerp drifts off the unit sphere over many frames.
        start.slerp(end, t).normalize()
    }

    fn interpolate_cubic(v0: Self, out_tangent0: Self, in_tangent1: Self, v1: Self, t: f32, dt: f32) -> Self {
        let (s0, s1, s2, s3) = hermite_basis(t);
        let m0 = Vec4::from(out_tangent0) * dt;
        let m1 = Vec4::from(in_tangent1) * dt;
        let result = Vec4::from(v0) * s0 + m0 * s1 + Vec4::from(v1) * s2 + m1 * s3;
        Quat::from_vec4(result).normalize()
    }
}

/// Finds the bracketing keyframe pair for `time`.
///
/// Returns `(i, factor)`, where the bracket is `[i, i + 1]` and `factor` lies
/// in `[0, 1]`. For single-key tracks the result is `(0, 0.0)`.
#[must_use]
pub fn find_keyframe(times: &[f32], time: f32) -> (usize, f32) {
    let len = times.len();
    if len < 2 || time.is_nan() || time < times[0] {
        return (0, 0.0);
    }
    if time >= times[len - 1] {
        return (len - 2, 1.0);
    }
    // First index with t > time; always in 1..len here.
    let next = times.partition_point(|&t| t <= time);
    let index = next - 1;
    (index, segment_factor(times, index, time))
}

fn segment_factor(times: &[f32], index: usize, time: f32) -> f32 {
    let t0 = times[index];
    let dt = times[index + 1] - t0;
    let t = if dt > 1e-6 { (time - t0) / dt } else { 0.0 };
    t.clamp(0.0, 1.0)
}

/// Remembers the last bracket of one track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackCursor {
    pub last_index: usize,
}

impl TrackCursor {
    /// Same result as [`find_keyframe`], with a short local scan first.
    pub fn find(&mut self, times: &[f32], time: f32) -> (usize, f32) {
        let len = times.len();
        if len < 2 || time.is_nan() || time < times[0] {
            self.last_index = 0;
            return (0, 0.0);
        }
        if time >= times[len - 1] {
            self.last_index = len - 2;
            return (len - 2, 1.0);
        }

        // Segment index range is 0..=len-2.
        let last_segment = len - 2;
        let start = self.last_index.min(last_segment);
        let contains = |i: usize| times[i] <= time && time < times[i + 1];

        let local = if time >= times[start] {
            (start..=last_segment.min(start + MAX_SCAN_OFFSET)).find(|&i| contains(i))
        } else {
            (start.saturating_sub(MAX_SCAN_OFFSET)..start)
                .rev()
                .find(|&i| contains(i))
        };

        // The bracket is unique, so a local hit equals the binary search.
        let index = local.unwrap_or_else(|| times.partition_point(|&t| t <= time) - 1);

        self.last_index = index;
        (index, segment_factor(times, index, time))
    }
}

/// Samples `track` at `time`.
#[must_use]
pub fn evaluate(track: &Track, time: f32) -> ChannelValue {
    let (index, factor) = find_keyframe(&track.times, time);
    sample_segment(track, index, factor)
}

/// Samples `track` at `time` using a bracket cursor.
pub fn evaluate_with_cursor(track: &Track, time: f32, cursor: &mut TrackCursor) -> ChannelValue {
    let (index, factor) = cursor.find(&track.times, time);
    sample_segment(track, index, factor)
}

fn sample_segment(track: &Track, index: usize, factor: f32) -> ChannelValue {
    match track.channel {
        Channel::Translation => ChannelValue::Translation(interpolate(track, index, factor)),
        Channel::Rotation => ChannelValue::Rotation(interpolate(track, index, factor)),
        Channel::Scale => ChannelValue::Scale(interpolate(track, index, factor)),
    }
}

fn interpolate<T: Interpolatable>(track: &Track, index: usize, factor: f32) -> T {
    if track.keyframe_count() < 2 || factor <= 0.0 {
        return T::from_slice(track.value(index));
    }
    let next = index + 1;
    if factor >= 1.0 {
        return T::from_slice(track.value(next));
    }

    match track.interpolation {
        Interpolation::Step => T::from_slice(track.value(index)),
        Interpolation::Linear => T::interpolate_linear(
            T::from_slice(track.value(index)),
            T::from_slice(track.value(next)),
            factor,
        ),
        Interpolation::CubicSpline => {
            let dt = track.times[next] - track.times[index];
            T::interpolate_cubic(
                T::from_slice(track.value(index)),
                T::from_slice(track.out_tangent(index)),
                T::from_slice(track.in_tangent(next)),
                T::from_slice(track.value(next)),
                factor,
                dt,
            )
        }
    }
}

/// Writes one sampled value into a local transform.
pub fn apply_channel(local: &mut Transform, value: ChannelValue) {
    match value {
        ChannelValue::Translation(v) => local.position = v,
        ChannelValue::Rotation(q) => local.rotation = q,
        ChannelValue::Scale(v) => local.scale = v,
    }
}

/// Samples every track of `clip` at `time` and writes the results into the
/// local transforms of the targeted joints' nodes.
///
/// `cursors` is resized to one entry per track. Touched nodes are marked
/// dirty; call [`Pose::flush`] afterwards.
pub fn sample_clip(
    clip: &AnimationClip,
    time: f32,
    joints: &[Joint],
    hierarchy: &Hierarchy,
    pose: &mut Pose,
    cursors: &mut Vec<TrackCursor>,
) {
    cursors.resize(clip.tracks.len(), TrackCursor::default());

    for (track, cursor) in clip.tracks.iter().zip(cursors.iter_mut()) {
        let Some(joint) = joints.get(track.joint) else {
            continue;
        };
        let Some(mut local) = pose.local(joint.node).copied() else {
            continue;
        };
        apply_channel(&mut local, evaluate_with_cursor(track, time, cursor));
        pose.set_local(hierarchy, joint.node, local);
    }
}
