//! Runtime Settings
//!
//! Tunables for the loading pipeline, instance batching and default animation
//! playback. Settings are passed explicitly into [`Runtime`](crate::runtime::Runtime);
//! nothing is read from global state.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use skinstance::settings::RuntimeSettings;
//!
//! // Defaults: one pending load materialised per tick
//! let settings = RuntimeSettings::default();
//!
//! // Drain every completed parse each tick
//! let settings = RuntimeSettings {
//!     max_loads_per_tick: None,
//!     ..Default::default()
//! };
//!
//! // From a JSON file; missing fields fall back to defaults
//! let settings = RuntimeSettings::from_json_file("skinstance.json")?;
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Configuration for a [`Runtime`](crate::runtime::Runtime).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Upper bound on parsed documents materialised per tick.
    ///
    /// Every materialisation allocates GPU buffers and textures on the owning
    /// thread, so this bounds per-tick allocation latency. `None` drains the
    /// whole queue every tick.
    pub max_loads_per_tick: Option<usize>,

    /// Capacity of the queue between the parse worker and the owning thread.
    ///
    /// The worker blocks once this many parsed documents are waiting.
    pub pending_queue_capacity: usize,

    /// Instance-buffer capacity (in instances) allocated for a new group.
    /// Groups double their capacity on overflow.
    pub initial_instance_capacity: usize,

    /// Playback speed used by [`PlayOptions::default_from`](crate::animation::PlayOptions::default_from).
    pub default_playback_speed: f32,

    /// Loop flag used by [`PlayOptions::default_from`](crate::animation::PlayOptions::default_from).
    pub default_loop: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_loads_per_tick: Some(1),
            pending_queue_capacity: 8,
            initial_instance_capacity: 16,
            default_playback_speed: 1.0,
            default_loop: true,
        }
    }
}

impl RuntimeSettings {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::load_failed("<settings>", e))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::load_failed(path.display().to_string(), e))?;
        serde_json::from_str(&text).map_err(|e| Error::load_failed(path.display().to_string(), e))
    }

    /// Per-group starting capacity, never zero.
    #[inline]
    #[must_use]
    pub fn instance_capacity(&self) -> usize {
        self.initial_instance_capacity.max(1)
    }

    /// Worker queue capacity, never zero.
    #[inline]
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.pending_queue_capacity.max(1)
    }
}
