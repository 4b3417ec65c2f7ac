//! Node transforms, hierarchy evaluation and joint-matrix composition.

pub mod hierarchy;
pub mod skinning;
pub mod transform;

pub use hierarchy::{Hierarchy, Pose, compose_world, evaluate_world_matrices};
pub use skinning::{Joint, Skin, compute_all_joint_matrices, compute_joint_matrices};
pub use transform::Transform;
