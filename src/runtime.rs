//! Host Runtime Bridge
//!
//! [`Runtime`] ties the Model Loader, the Instance Manager and the GPU
//! Resource Manager together behind the two calls a host drives every frame:
//!
//! - [`request_load`](Runtime::request_load): start loading a model by path.
//!   The id comes back immediately; parsing runs off-thread.
//! - [`tick`](Runtime::tick): materialise finished parses within the
//!   configured bound, then advance every instance's animation.
//!
//! # Example
//!
//! ```rust,ignore
//! use skinstance::{Runtime, RuntimeSettings, gpu::HeadlessDevice};
//!
//! let mut runtime = Runtime::new(HeadlessDevice::new(), RuntimeSettings::default());
//! let model = runtime.request_load("assets/fox.glb");
//!
//! loop {
//!     runtime.tick(dt);
//!     if runtime.is_loaded(model) && instance.is_none() {
//!         instance = Some(runtime.create_instance(model)?);
//!     }
//!     runtime.render(view_proj)?;
//! }
//! ```
//!
//! # Lifecycle
//!
//! 1. Create with [`Runtime::new`], injecting the device.
//! 2. Load models with [`request_load`](Runtime::request_load) or
//!    [`load`](Runtime::load).
//! 3. Each frame: [`tick`](Runtime::tick), then [`render`](Runtime::render).
//! 4. [`dispose`](Runtime::dispose) releases every GPU object.

use glam::Mat4;

use crate::animation::PlayOptions;
use crate::assets::{LoadState, ModelId, ModelLoader, SceneDocument};
use crate::errors::Result;
use crate::gpu::{GpuDevice, GpuResourceManager};
use crate::instance::{InstanceCommand, InstanceId, InstanceManager, RenderStats};
use crate::settings::RuntimeSettings;

/// Owns every subsystem for one device. Lives on the thread that owns the
/// device; only glTF parsing leaves it.
pub struct Runtime<D: GpuDevice> {
    settings: RuntimeSettings,
    resources: GpuResourceManager<D>,
    models: ModelLoader,
    instances: InstanceManager,

    time: f32,
    frame_count: u64,
}

impl<D: GpuDevice> Runtime<D> {
    #[must_use]
    pub fn new(device: D, settings: RuntimeSettings) -> Self {
        Self {
            resources: GpuResourceManager::new(device),
            models: ModelLoader::new(&settings),
            instances: InstanceManager::new(&settings),
            settings,
            time: 0.0,
            frame_count: 0,
        }
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Queues a model for loading and returns its id. Poll
    /// [`load_state`](Self::load_state) or [`is_loaded`](Self::is_loaded)
    /// to see when it becomes usable.
    pub fn request_load(&mut self, source: &str) -> ModelId {
        self.models.request_load(source)
    }

    /// Loads a model on the calling thread.
    pub fn load(&mut self, source: &str) -> Result<ModelId> {
        self.models.load(source, &mut self.resources)
    }

    /// Materialises an in-memory document under `label`.
    pub fn load_document(&mut self, label: &str, document: &SceneDocument) -> Result<ModelId> {
        self.models
            .load_document(label, document, &mut self.resources)
    }

    #[must_use]
    pub fn load_state(&self, id: ModelId) -> Option<&LoadState> {
        self.models.load_state(id)
    }

    #[must_use]
    pub fn is_loaded(&self, id: ModelId) -> bool {
        self.models.contains(id)
    }

    /// Destroys every instance of the model, then releases the model's GPU
    /// resources.
    pub fn unload_model(&mut self, id: ModelId) -> Result<()> {
        let destroyed = self.instances.release_model(id, &mut self.resources);
        if destroyed > 0 {
            log::debug!("Destroyed {destroyed} instances of {id} before unload");
        }
        self.models.unload(id, &mut self.resources)
    }

    // ========================================================================
    // Instances
    // ========================================================================

    pub fn create_instance(&mut self, model: ModelId) -> Result<InstanceId> {
        self.instances.create_instance(&self.models, model)
    }

    pub fn delete_instance(&mut self, id: InstanceId) -> Result<()> {
        self.instances.delete_instance(id, &mut self.resources)
    }

    pub fn apply(&mut self, id: InstanceId, command: InstanceCommand) -> Result<()> {
        self.instances.apply(id, command)
    }

    /// Starts `clip` with the configured default speed and loop flag.
    pub fn play_animation(&mut self, id: InstanceId, clip: &str) -> Result<()> {
        let options = PlayOptions::default_from(&self.settings);
        self.instances.play_animation(id, clip, options)
    }

    // ========================================================================
    // Frame
    // ========================================================================

    /// Per-frame update: drains finished loads (at most
    /// `max_loads_per_tick`), then advances animations by `dt` seconds.
    pub fn tick(&mut self, dt: f32) {
        let drained = self
            .models
            .drain_pending(&mut self.resources, self.settings.max_loads_per_tick);
        if drained > 0 {
            log::debug!("Materialised {drained} queued loads");
        }

        self.instances.tick(dt);
        self.time += dt;
        self.frame_count += 1;
    }

    /// Uploads dirty instance records and submits one draw pass.
    pub fn render(&mut self, view_proj: Mat4) -> Result<RenderStats> {
        self.instances.render(&mut self.resources, view_proj)
    }

    /// Destroys every instance and model and releases all GPU objects.
    pub fn dispose(&mut self) {
        self.instances.clear(&mut self.resources);
        self.models.clear();
        self.resources.dispose();
        log::info!("Runtime disposed");
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    #[inline]
    #[must_use]
    pub fn resources(&self) -> &GpuResourceManager<D> {
        &self.resources
    }

    #[inline]
    pub fn resources_mut(&mut self) -> &mut GpuResourceManager<D> {
        &mut self.resources
    }

    #[inline]
    #[must_use]
    pub fn models(&self) -> &ModelLoader {
        &self.models
    }

    #[inline]
    #[must_use]
    pub fn instances(&self) -> &InstanceManager {
        &self.instances
    }

    /// Total time passed to [`tick`](Self::tick), in seconds.
    #[inline]
    #[must_use]
    pub fn time(&self) -> f32 {
        self.time
    }

    #[inline]
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// The injected device.
    #[inline]
    #[must_use]
    pub fn device(&self) -> &D {
        self.resources.device()
    }
}
