//! Error Types
//!
//! This module defines the error types used throughout the crate.
//!
//! # Overview
//!
//! The main error type [`Error`] covers every fatal failure mode:
//! - Asset fetch and parse failures ([`Error::LoadFailed`])
//! - Structurally broken asset data ([`Error::InvalidData`])
//! - Lookups of unknown models, instances or GPU handles ([`Error::ResourceNotFound`])
//! - GPU allocation and shader compilation failures ([`Error::Gpu`])
//!
//! Animation channels that cannot be bound are *not* errors: they are
//! recorded as [`Diagnostic`](crate::assets::model::Diagnostic) values on the
//! loaded model and reported through the `log` facade.
//!
//! # Usage
//!
//! All fallible public APIs return [`Result<T>`], an alias for
//! `std::result::Result<T, Error>`.
//!
//! ```rust,ignore
//! use skinstance::errors::{Error, Result};
//!
//! fn load() -> Result<()> {
//!     Ok(())
//! }
//! ```

use std::fmt;

use thiserror::Error;

/// The kind of resource an operation referred to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Model,
    Instance,
    AnimationClip,
    Node,
    Buffer,
    Texture,
    VertexArray,
    Program,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Model => "model",
            Self::Instance => "instance",
            Self::AnimationClip => "animation clip",
            Self::Node => "node",
            Self::Buffer => "buffer",
            Self::Texture => "texture",
            Self::VertexArray => "vertex array",
            Self::Program => "shader program",
        };
        f.write_str(name)
    }
}

/// The main error type of the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Asset Loading Errors
    // ========================================================================
    /// The source could not be fetched or parsed. Fatal to that load attempt.
    #[error("Failed to load '{source_url}': {reason}")]
    LoadFailed {
        /// Path or URL of the asset
        source_url: String,
        /// Underlying error text
        reason: String,
    },

    /// Structurally required data is missing or malformed.
    #[error("Invalid data in '{model}': {reason}")]
    InvalidData {
        /// Source path (or label) of the offending model
        model: String,
        /// What was wrong
        reason: String,
    },

    // ========================================================================
    // Lookup Errors
    // ========================================================================
    /// An operation referenced an unknown resource.
    #[error("{kind} not found: {id}")]
    ResourceNotFound {
        /// What kind of resource was looked up
        kind: ResourceKind,
        /// The identifier that failed to resolve
        id: String,
    },

    // ========================================================================
    // GPU Errors
    // ========================================================================
    /// GPU allocation, compilation or submission failure.
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

impl Error {
    pub(crate) fn load_failed(source_url: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::LoadFailed {
            source_url: source_url.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid_data(model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidData {
            model: model.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(kind: ResourceKind, id: impl fmt::Display) -> Self {
        Self::ResourceNotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// GPU-side failures.
///
/// `CreationFailed` and `AlreadyDeleted` are kept apart so callers can tell a
/// failed allocation from a double release.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GpuError {
    /// The device refused to create a resource.
    #[error("Failed to create {kind}: {reason}")]
    CreationFailed { kind: ResourceKind, reason: String },

    /// Shader compilation or pipeline linking failed. Carries the native
    /// compiler diagnostics verbatim.
    #[error("Shader compilation failed:\n{diagnostics}")]
    ShaderCompilation { diagnostics: String },

    /// The handle was valid once but its resource has already been released.
    #[error("{kind} has already been deleted")]
    AlreadyDeleted { kind: ResourceKind },

    /// A write or draw submission was rejected by the device.
    #[error("GPU submission failed: {0}")]
    Submission(String),

    /// `submit` was called before the host provided a render target.
    #[error("No render target has been set for this frame")]
    NoRenderTarget,
}

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_errors_convert_transparently() {
        let err: Error = GpuError::AlreadyDeleted {
            kind: ResourceKind::Buffer,
        }
        .into();
        assert_eq!(err.to_string(), "buffer has already been deleted");
        assert!(matches!(err, Error::Gpu(GpuError::AlreadyDeleted { .. })));
    }

    #[test]
    fn not_found_carries_identifier() {
        let err = Error::not_found(ResourceKind::Instance, 42);
        assert_eq!(err.to_string(), "instance not found: 42");
    }
}
