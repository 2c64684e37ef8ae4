//! Engine error type.
//!
//! Everything the engine itself can reject is an [`EngineError`]. User supplied
//! callbacks (mutations, resource factories, flows, frame sinks) report their own
//! failures as `anyhow::Error`; where such an error crosses back into the engine it
//! is wrapped in the matching variant.

use thiserror::Error;

use crate::data_structures::scene_graph::ObjectId;

/// Errors raised by the scene, resource and mutation machinery.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A precondition on an argument was violated at the call site.
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    /// A resource was accessed after its device unloaded it.
    #[error("`{0}` was accessed after it had been disposed")]
    Disposed(String),

    /// Fewer than two distinct points were given to a bounding box accumulator.
    #[error("a bounding box needs at least two distinct points, got {distinct}")]
    DegenerateBoundingBox { distinct: usize },

    #[error("object {0} is not part of this scene")]
    UnknownObject(ObjectId),

    #[error("layer `{0}` does not exist")]
    UnknownLayer(String),

    #[error("layer `{0}` already exists")]
    DuplicateLayer(String),

    #[error("layer `{name}` still holds {members} object(s)")]
    LayerNotEmpty { name: String, members: usize },

    #[error("parenting {child} under {parent} would create a cycle")]
    HierarchyCycle { child: ObjectId, parent: ObjectId },

    /// No factory is registered for the requested key.
    #[error("no factory is registered for resource `{0}`")]
    UnknownResource(String),

    /// A factory requested its own key while it was still loading.
    #[error("resource `{0}` was requested while the same thread was loading it")]
    CyclicLoad(String),

    #[error("failed to load resource `{key}`: {source}")]
    ResourceLoad {
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("resource `{0}` was released more often than it was retained")]
    ResourceRefUnderflow(String),

    /// The mutation callback returned an error; its edits were rolled back.
    #[error("mutation #{seq} failed and was rolled back: {reason}")]
    MutationFailed { seq: u64, reason: String },

    /// The mutation callback panicked; its edits were rolled back.
    #[error("mutation #{seq} panicked and was rolled back: {reason}")]
    MutationPanicked { seq: u64, reason: String },

    /// The render side went away before the mutation could run.
    #[error("the mutation queue was closed before the mutation could run")]
    QueueClosed,
}

impl EngineError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    pub(crate) fn load(key: impl ToString, source: anyhow::Error) -> Self {
        Self::ResourceLoad {
            key: key.to_string(),
            source: source.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
