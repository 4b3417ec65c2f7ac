//! Keyframe clips, the track sampler and per-instance playback state.

pub mod clip;
pub mod playback;
pub mod sampler;

pub use clip::{AnimationClip, Channel, Interpolation, Track};
pub use playback::{AnimationState, PlayOptions, wrap_time};
pub use sampler::{
    ChannelValue, TrackCursor, apply_channel, evaluate, evaluate_with_cursor, find_keyframe,
    sample_clip,
};
