use crate::settings::RuntimeSettings;

/// Options accepted by `PlayAnimation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayOptions {
    /// Time scale; negative values play backwards
    pub speed: f32,
    pub looping: bool,
    /// Initial local time in seconds
    pub start_time: f32,
}

impl PlayOptions {
    /// Options using the configured playback defaults.
    #[must_use]
    pub fn default_from(settings: &RuntimeSettings) -> Self {
        Self {
            speed: settings.default_playback_speed,
            looping: settings.default_loop,
            start_time: 0.0,
        }
    }

    #[must_use]
    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    #[must_use]
    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    #[must_use]
    pub fn with_start_time(mut self, start_time: f32) -> Self {
        self.start_time = start_time;
        self
    }
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            speed: 1.0,
            looping: true,
            start_time: 0.0,
        }
    }
}

/// Maps accumulated playback time into the clip's local time.
///
/// Looped time wraps with a Euclidean remainder so reverse playback stays in
/// `[0, duration)`. Non-looped time clamps into `[0, duration]`.
#[must_use]
pub fn wrap_time(time: f32, duration: f32, looping: bool) -> f32 {
    if duration <= 0.0 || !time.is_finite() {
        return 0.0;
    }
    if looping {
        time.rem_euclid(duration)
    } else {
        time.clamp(0.0, duration)
    }
}

/// Per-instance playback state.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationState {
    pub clip: Option<String>,
    /// Local clip time in seconds
    pub time: f32,
    pub speed: f32,
    pub looping: bool,
    pub playing: bool,
    /// Consecutive ticks on which non-looped time sat at a clamp bound
    clamped_ticks: u8,
}

impl Default for AnimationState {
    fn default() -> Self {
        Self {
            clip: None,
            time: 0.0,
            speed: 1.0,
            looping: true,
            playing: false,
            clamped_ticks: 0,
        }
    }
}

impl AnimationState {
    pub fn play(&mut self, clip: impl Into<String>, options: PlayOptions) {
        self.clip = Some(clip.into());
        self.time = options.start_time;
        self.speed = options.speed;
        self.looping = options.looping;
        self.playing = true;
        self.clamped_ticks = 0;
    }

    /// Stops playback. The clip name and time are kept so the last sampled
    /// pose stays in place.
    pub fn stop(&mut self) {
        self.playing = false;
        self.clamped_ticks = 0;
    }

    /// Advances time by `dt * speed` for a clip of `duration` seconds and
    /// returns the new local time.
    ///
    /// Non-looped playback stops once the clamped end has been observed on
    /// two consecutive ticks.
    pub fn advance(&mut self, dt: f32, duration: f32) -> f32 {
        if !self.playing {
            return self.time;
        }

        let raw = self.time + dt * self.speed;
        self.time = wrap_time(raw, duration, self.looping);

        if !self.looping {
            let at_bound = if self.speed >= 0.0 {
                self.time >= duration
            } else {
                self.time <= 0.0
            };
            if at_bound {
                self.clamped_ticks = self.clamped_ticks.saturating_add(1);
                if self.clamped_ticks >= 2 {
                    self.stop();
                }
            } else {
                self.clamped_ticks = 0;
            }
        }

        self.time
    }
}
