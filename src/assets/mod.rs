//! Asset ingestion: scene documents, the glTF parse stage, the Model data
//! model and the Model Loader.

pub mod document;
pub mod gltf;
pub mod loader;
pub mod model;
pub mod worker;

pub use document::{Accessor, SceneDocument, SceneSource};
pub use loader::ModelLoader;
pub use model::{Diagnostic, DiagnosticKind, LoadState, Material, Model, ModelId, Primitive};
