//! Serialised scene edits.
//!
//! Nothing outside the render thread touches a [`Scene`] directly. Other threads
//! (and flows) submit mutation callbacks through a [`MutationSender`]; the engine
//! drains the queue once per frame, before anything reads the scene, and runs
//! every callback in submission order against a [`SceneManipulator`].
//!
//! Each callback is a transaction. The manipulator journals every edit, and a
//! callback that returns an error or panics has its edits undone before the next
//! callback runs. Committed edits are summarised in a [`MutationReport`] that is
//! handed to the submitter's [`MutationTicket`] and to every [`SceneObserver`].
//!
//! - `queue` holds the channel, the tickets and the per-frame drain
//! - `manipulator` holds the edit operations and their undo journal

use crate::{
    data_structures::scene_graph::{ObjectId, Scene},
    error::EngineError,
    resources::ResourceKey,
};

mod manipulator;
mod queue;

pub use manipulator::SceneManipulator;
pub use queue::{Applied, MutationReceiver, MutationSender, MutationTicket, channel};

/// A mutation callback without a result value, as flows hand them to the engine.
pub type Mutation = Box<dyn FnOnce(&mut SceneManipulator<'_>) -> anyhow::Result<()> + Send>;

/// One committed edit.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneChange {
    ObjectAdded {
        id: ObjectId,
        parent: Option<ObjectId>,
        resources: Vec<ResourceKey>,
    },
    /// Emitted for every object of a removed subtree, parents first.
    ObjectRemoved {
        id: ObjectId,
        resources: Vec<ResourceKey>,
    },
    Reparented {
        id: ObjectId,
        parent: Option<ObjectId>,
    },
    TransformChanged(ObjectId),
    ColorChanged(ObjectId),
    VisibilityChanged {
        id: ObjectId,
        visible: bool,
    },
    LayerChanged {
        id: ObjectId,
        layer: String,
    },
    LayerAdded {
        name: String,
        order: i32,
    },
    LayerRemoved(String),
    LayerReordered {
        name: String,
        order: i32,
    },
    ResourceAttached {
        id: ObjectId,
        key: ResourceKey,
    },
    ResourceDetached {
        id: ObjectId,
        key: ResourceKey,
    },
    AnimationStarted(ObjectId),
    AnimationStopped(ObjectId),
    CameraChanged,
}

/// The edits one mutation committed, in the order they were made.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationReport {
    changes: Vec<SceneChange>,
}

impl MutationReport {
    pub(crate) fn new(changes: Vec<SceneChange>) -> Self {
        Self { changes }
    }

    pub fn changes(&self) -> &[SceneChange] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Resource references the mutation gained (`true`) or dropped (`false`), in order.
    pub fn resource_references(&self) -> impl Iterator<Item = (&ResourceKey, bool)> {
        self.changes.iter().flat_map(|change| {
            let (keys, gained): (Vec<&ResourceKey>, bool) = match change {
                SceneChange::ObjectAdded { resources, .. } => (resources.iter().collect(), true),
                SceneChange::ObjectRemoved { resources, .. } => (resources.iter().collect(), false),
                SceneChange::ResourceAttached { key, .. } => (vec![key], true),
                SceneChange::ResourceDetached { key, .. } => (vec![key], false),
                _ => (Vec::new(), false),
            };
            keys.into_iter().map(move |key| (key, gained))
        })
    }
}

/// Receives the outcome of every mutation the engine applies.
///
/// Observers are registered when the engine is built and run on the render
/// thread during the mutation phase of a frame. Each call happens right after
/// its mutation ran, so `scene` is the scene as that mutation left it; later
/// mutations of the same frame have not been applied yet.
pub trait SceneObserver {
    fn on_mutation(&mut self, scene: &Scene, seq: u64, report: &MutationReport);

    fn on_mutation_aborted(&mut self, _seq: u64, _error: &EngineError) {}
}
