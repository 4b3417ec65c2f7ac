//! # skinstance
//!
//! Runtime glTF model loading, skeletal animation and instanced skinned
//! rendering.
//!
//! A model is loaded once: its buffers, textures and shader programs live
//! on the GPU a single time. Any number of instances of it can then be
//! placed and animated independently, and all instances of one model are
//! drawn with one instanced draw per primitive.
//!
//! # Modules
//!
//! - [`assets`]: glTF/GLB parsing, the immutable [`Model`](assets::Model)
//!   and the [`ModelLoader`](assets::ModelLoader)
//! - [`animation`]: keyframe clips, the track sampler and playback state
//! - [`scene`]: node hierarchies, dirty-flag world evaluation and skinning
//! - [`gpu`]: the injected device seam and the GPU Resource Manager
//! - [`instance`]: instances, model groups and instanced draws
//! - [`runtime`]: the [`Runtime`] a host drives each frame
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use skinstance::{Runtime, RuntimeSettings, gpu::HeadlessDevice};
//!
//! let mut runtime = Runtime::new(HeadlessDevice::new(), RuntimeSettings::default());
//! let model = runtime.load("assets/fox.glb")?;
//! let fox = runtime.create_instance(model)?;
//! runtime.play_animation(fox, "Run")?;
//!
//! runtime.tick(1.0 / 60.0);
//! runtime.render(view_proj)?;
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod animation;
pub mod assets;
pub mod errors;
pub mod gpu;
pub mod instance;
pub mod runtime;
pub mod scene;
pub mod settings;

pub use animation::{AnimationClip, AnimationState, Interpolation, PlayOptions};
pub use assets::{LoadState, Model, ModelId, ModelLoader, SceneDocument};
pub use errors::{Error, GpuError, ResourceKind, Result};
pub use gpu::{GpuDevice, GpuResourceManager, HeadlessDevice, WgpuDevice};
pub use instance::{InstanceCommand, InstanceId, InstanceManager, RenderStats};
pub use runtime::Runtime;
pub use scene::Transform;
pub use settings::RuntimeSettings;
