use std::fmt;

/// Which component of a joint's local transform a track drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Translation,
    Rotation,
    Scale,
}

impl Channel {
    /// Number of floats per keyframe value.
    #[inline]
    #[must_use]
    pub const fn arity(self) -> usize {
        match self {
            Self::Translation | Self::Scale => 3,
            Self::Rotation => 4,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Translation => "translation",
            Self::Rotation => "rotation",
            Self::Scale => "scale",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interpolation {
    Step,
    Linear,
    /// Cubic Hermite spline; every keyframe stores `[in_tangent, value, out_tangent]`.
    CubicSpline,
}

/// Keyframes for one channel of one joint.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    /// Canonical joint index into the owning model's joint table
    pub joint: usize,
    pub channel: Channel,
    pub interpolation: Interpolation,
    pub times: Vec<f32>,
    /// Flat keyframe values, `arity` floats per element
    pub values: Vec<f32>,
}

impl Track {
    /// Builds a track, checking the keyframe layout.
    ///
    /// Times must be non-empty, finite and non-decreasing, and `values` must
    /// hold exactly `times.len() * arity` floats (three times that for cubic
    /// splines).
    pub fn new(
        joint: usize,
        channel: Channel,
        interpolation: Interpolation,
        times: Vec<f32>,
        values: Vec<f32>,
    ) -> Result<Self, String> {
        if times.is_empty() {
            return Err("track has no keyframes".to_string());
        }
        if let Some(bad) = times.iter().find(|t| !t.is_finite()) {
            return Err(format!("keyframe time {bad} is not finite"));
        }
        if let Some(i) = times.windows(2).position(|w| w[1] < w[0]) {
            return Err(format!(
                "keyframe times decrease at index {} ({} -> {})",
                i + 1,
                times[i],
                times[i + 1]
            ));
        }

        let per_key = match interpolation {
            Interpolation::CubicSpline => channel.arity() * 3,
            Interpolation::Step | Interpolation::Linear => channel.arity(),
        };
        let expected = times.len() * per_key;
        if values.len() != expected {
            return Err(format!(
                "{channel} track has {} values, expected {expected} for {} keyframes",
                values.len(),
                times.len()
            ));
        }

        Ok(Self {
            joint,
            channel,
            interpolation,
            times,
            values,
        })
    }

    #[inline]
    #[must_use]
    pub fn keyframe_count(&self) -> usize {
        self.times.len()
    }

    #[inline]
    #[must_use]
    pub fn end_time(&self) -> f32 {
        self.times.last().copied().unwrap_or(0.0)
    }

    /// The keyframe value (not a tangent) of keyframe `index`.
    #[must_use]
    pub fn value(&self, index: usize) -> &[f32] {
        self.element(self.value_element(index))
    }

    /// Out tangent of keyframe `index`. Cubic splines only.
    #[must_use]
    pub(crate) fn out_tangent(&self, index: usize) -> &[f32] {
        self.element(index * 3 + 2)
    }

    /// In tangent of keyframe `index`. Cubic splines only.
    #[must_use]
    pub(crate) fn in_tangent(&self, index: usize) -> &[f32] {
        self.element(index * 3)
    }

    fn value_element(&self, index: usize) -> usize {
        match self.interpolation {
            Interpolation::CubicSpline => index * 3 + 1,
            Interpolation::Step | Interpolation::Linear => index,
        }
    }

    fn element(&self, element: usize) -> &[f32] {
        let arity = self.channel.arity();
        &self.values[element * arity..(element + 1) * arity]
    }
}

/// A named set of tracks played together.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationClip {
    pub name: String,
    /// Latest keyframe time over all tracks
    pub duration: f32,
    pub tracks: Vec<Track>,
}

impl AnimationClip {
    #[must_use]
    pub fn new(name: impl Into<String>, tracks: Vec<Track>) -> Self {
        let duration = tracks.iter().map(Track::end_time).fold(0.0_f32, f32::max);
        Self {
            name: name.into(),
            duration,
            tracks,
        }
    }
}
