//! Instances of loaded models: per-instance state, model groups and the
//! manager that ticks and draws them.

pub mod batch;
pub mod state;
pub mod manager;

pub use batch::InstanceGroup;
pub use state::{Instance, InstanceCommand, InstanceId};
pub use manager::{InstanceManager, RenderStats};
