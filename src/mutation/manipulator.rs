use super::{MutationReport, SceneChange};
use crate::{
    animation::{AnimationSequence, Sequencer},
    camera::{Camera, Projection, ViewPoint},
    data_structures::{
        instance::Instance,
        scene_graph::{Color, DEFAULT_LAYER, DetachedSubtree, Layer, ObjectId, Scene, SceneObject},
    },
    error::{EngineError, Result},
    resources::ResourceKey,
};

/// Reverts one edit.
enum Undo {
    Added(ObjectId),
    Removed(DetachedSubtree),
    Relinked {
        id: ObjectId,
        parent: Option<ObjectId>,
        index: usize,
    },
    Transform {
        id: ObjectId,
        local: Instance,
    },
    Color {
        id: ObjectId,
        color: Color,
    },
    Visible {
        id: ObjectId,
        visible: bool,
    },
    Layer {
        id: ObjectId,
        layer: String,
    },
    LayerAdded(String),
    LayerRemoved(Layer),
    LayerOrder {
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
        index: usize,
    },
    Animation {
        id: ObjectId,
        previous: Option<Sequencer>,
    },
    Camera(Camera),
}

/// Edits a scene on behalf of one mutation.
///
/// Every operation validates its arguments before it touches the scene, so a
/// rejected operation changes nothing. Successful operations are journaled; if
/// the mutation fails afterwards the journal is replayed backwards.
pub struct SceneManipulator<'s> {
    scene: &'s mut Scene,
    journal: Vec<Undo>,
    changes: Vec<SceneChange>,
}

impl<'s> SceneManipulator<'s> {
    pub(crate) fn new(scene: &'s mut Scene) -> Self {
        Self {
            scene,
            journal: Vec::new(),
            changes: Vec::new(),
        }
    }

    /// Read access to the scene, including this mutation's edits so far.
    pub fn scene(&self) -> &Scene {
        &*self.scene
    }

    pub fn get(&self, id: ObjectId) -> Result<&SceneObject> {
        self.scene.get(id).ok_or(EngineError::UnknownObject(id))
    }

    /// Adds a root object.
    pub fn add(&mut self, object: SceneObject) -> Result<ObjectId> {
        self.insert(None, object)
    }

    pub fn add_child(&mut self, parent: ObjectId, object: SceneObject) -> Result<ObjectId> {
        self.get(parent)?;
        self.insert(Some(parent), object)
    }

    fn insert(&mut self, parent: Option<ObjectId>, mut object: SceneObject) -> Result<ObjectId> {
        let id = object.id();
        if self.scene.contains(id) {
            return Err(EngineError::invalid("object", format!("{} is already part of the scene", id)));
        }
        if self.scene.layer(object.layer()).is_none() {
            return Err(EngineError::UnknownLayer(object.layer().to_string()));
        }
        object.parent = parent;
        self.changes.push(SceneChange::ObjectAdded {
            id,
            parent,
            resources: object.resources().to_vec(),
        });
        self.scene.attach(object);
        self.journal.push(Undo::Added(id));
        Ok(id)
    }

    /// Removes an object together with all of its descendants.
    ///
    /// Returns the number of removed objects.
    pub fn remove(&mut self, id: ObjectId) -> Result<usize> {
        let detached = self
            .scene
            .detach_subtree(id)
            .ok_or(EngineError::UnknownObject(id))?;
        self.changes
            .extend(detached.objects.iter().map(|object| SceneChange::ObjectRemoved {
                id: object.id(),
                resources: object.resources().to_vec(),
            }));
        let removed = detached.objects.len();
        self.journal.push(Undo::Removed(detached));
        Ok(removed)
    }

    /// Moves `id` under `parent`, or makes it a root for `None`.
    pub fn reparent(&mut self, id: ObjectId, parent: Option<ObjectId>) -> Result<()> {
        let current = self.get(id)?.parent();
        if let Some(parent) = parent {
            self.get(parent)?;
            if parent == id || self.scene.is_ancestor(id, parent) {
                return Err(EngineError::HierarchyCycle { child: id, parent });
            }
        }
        if current == parent {
            return Ok(());
        }
        let (old_parent, index) = self
            .scene
            .relink(id, parent, None)
            .ok_or(EngineError::UnknownObject(id))?;
        self.journal.push(Undo::Relinked {
            id,
            parent: old_parent,
            index,
        });
        self.changes.push(SceneChange::Reparented { id, parent });
        Ok(())
    }

    pub fn set_transform(&mut self, id: ObjectId, local: Instance) -> Result<()> {
        self.update_transform(id, |current| *current = local)
    }

    pub fn update_transform(&mut self, id: ObjectId, update: impl FnOnce(&mut Instance)) -> Result<()> {
        let object = self.object_mut(id)?;
        let old = object.local_transform().clone();
        let mut local = old.clone();
        update(&mut local);
        object.set_local_transform(local);
        self.journal.push(Undo::Transform { id, local: old });
        self.changes.push(SceneChange::TransformChanged(id));
        Ok(())
    }

    pub fn set_color(&mut self, id: ObjectId, color: Color) -> Result<()> {
        let object = self.object_mut(id)?;
        let old = object.color();
        object.set_color(color);
        self.journal.push(Undo::Color { id, color: old });
        self.changes.push(SceneChange::ColorChanged(id));
        Ok(())
    }

    /// Hiding an object also hides its descendants from the next frame on.
    pub fn set_visible(&mut self, id: ObjectId, visible: bool) -> Result<()> {
        let object = self.object_mut(id)?;
        let old = object.is_visible();
        if old == visible {
            return Ok(());
        }
        object.set_visible(visible);
        self.journal.push(Undo::Visible { id, visible: old });
        self.changes.push(SceneChange::VisibilityChanged { id, visible });
        Ok(())
    }

    pub fn move_to_layer(&mut self, id: ObjectId, layer: &str) -> Result<()> {
        if self.scene.layer(layer).is_none() {
            return Err(EngineError::UnknownLayer(layer.to_string()));
        }
        if self.get(id)?.layer() == layer {
            return Ok(());
        }
        let old = self
            .scene
            .set_object_layer(id, layer)
            .ok_or(EngineError::UnknownObject(id))?;
        self.journal.push(Undo::Layer { id, layer: old });
        self.changes.push(SceneChange::LayerChanged {
            id,
            layer: layer.to_string(),
        });
        Ok(())
    }

    pub fn add_layer(&mut self, name: &str, order: i32) -> Result<()> {
        if name.is_empty() {
            return Err(EngineError::invalid("name", "layer names must not be empty"));
        }
        if self.scene.layer(name).is_some() {
            return Err(EngineError::DuplicateLayer(name.to_string()));
        }
        self.scene.insert_layer(name.to_string(), order);
        self.journal.push(Undo::LayerAdded(name.to_string()));
        self.changes.push(SceneChange::LayerAdded {
            name: name.to_string(),
            order,
        });
        Ok(())
    }

    /// Removes an empty layer. The default layer cannot be removed.
    pub fn remove_layer(&mut self, name: &str) -> Result<()> {
        if name == DEFAULT_LAYER {
            return Err(EngineError::invalid("name", "the default layer cannot be removed"));
        }
        let members = self
            .scene
            .layer(name)
            .ok_or_else(|| EngineError::UnknownLayer(name.to_string()))?
            .len();
        if members > 0 {
            return Err(EngineError::LayerNotEmpty {
                name: name.to_string(),
                members,
            });
        }
        let layer = self
            .scene
            .take_layer(name)
            .ok_or_else(|| EngineError::UnknownLayer(name.to_string()))?;
        self.journal.push(Undo::LayerRemoved(layer));
        self.changes.push(SceneChange::LayerRemoved(name.to_string()));
        Ok(())
    }

    pub fn reorder_layer(&mut self, name: &str, order: i32) -> Result<()> {
        let old = self
            .scene
            .set_layer_order(name, order)
            .ok_or_else(|| EngineError::UnknownLayer(name.to_string()))?;
        self.journal.push(Undo::LayerOrder {
            name: name.to_string(),
            order: old,
        });
        self.changes.push(SceneChange::LayerReordered {
            name: name.to_string(),
            order,
        });
        Ok(())
    }

    /// Returns `false` if the object already referenced `key`.
    pub fn attach_resource(&mut self, id: ObjectId, key: ResourceKey) -> Result<bool> {
        let object = self.object_mut(id)?;
        if object.resources.contains(&key) {
            return Ok(false);
        }
        object.resources.push(key.clone());
        self.journal.push(Undo::ResourceAttached {
            id,
            key: key.clone(),
        });
        self.changes.push(SceneChange::ResourceAttached { id, key });
        Ok(true)
    }

    /// Returns `false` if the object did not reference `key`.
    pub fn detach_resource(&mut self, id: ObjectId, key: &ResourceKey) -> Result<bool> {
        let object = self.object_mut(id)?;
        let Some(index) = object.resources.iter().position(|attached| attached == key) else {
            return Ok(false);
        };
        object.resources.remove(index);
        self.journal.push(Undo::ResourceDetached {
            id,
            key: key.clone(),
            index,
        });
        self.changes.push(SceneChange::ResourceDetached {
            id,
            key: key.clone(),
        });
        Ok(true)
    }

    /// Starts `sequence` on the object, replacing a running animation.
    ///
    /// The sequence begins on the first frame after the mutation.
    pub fn start_animation(&mut self, id: ObjectId, sequence: AnimationSequence) -> Result<()> {
        self.get(id)?;
        let previous = self.scene.replace_animation(id, Some(Sequencer::new(sequence)));
        self.journal.push(Undo::Animation { id, previous });
        self.changes.push(SceneChange::AnimationStarted(id));
        Ok(())
    }

    /// Returns `false` if the object had no animation.
    pub fn stop_animation(&mut self, id: ObjectId) -> Result<bool> {
        self.get(id)?;
        match self.scene.replace_animation(id, None) {
            Some(previous) => {
                self.journal.push(Undo::Animation {
                    id,
                    previous: Some(previous),
                });
                self.changes.push(SceneChange::AnimationStopped(id));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn set_camera(&mut self, camera: Camera) {
        let old = std::mem::replace(self.scene.camera_mut(), camera);
        self.journal.push(Undo::Camera(old));
        self.changes.push(SceneChange::CameraChanged);
    }

    pub fn set_view_point(&mut self, view: ViewPoint) {
        let mut camera = self.scene.camera().clone();
        camera.set_view_point(view);
        self.set_camera(camera);
    }

    pub fn set_projection(&mut self, projection: Projection) -> Result<()> {
        let mut camera = self.scene.camera().clone();
        camera.set_projection(projection)?;
        self.set_camera(camera);
        Ok(())
    }

    /// Points the camera at the visible scene so all of it fits the view.
    ///
    /// Uses the world transforms of the last frame.
    pub fn zoom_to_fit(&mut self) -> Result<()> {
        let bounds = self.scene.bounds()?;
        let mut camera = self.scene.camera().clone();
        camera.frame_bounds(&bounds);
        self.set_camera(camera);
        Ok(())
    }

    pub(crate) fn commit(self) -> MutationReport {
        MutationReport::new(self.changes)
    }

    pub(crate) fn rollback(self) {
        let SceneManipulator { scene, journal, .. } = self;
        for undo in journal.into_iter().rev() {
            revert(scene, undo);
        }
    }

    fn object_mut(&mut self, id: ObjectId) -> Result<&mut SceneObject> {
        self.scene.object_mut(id).ok_or(EngineError::UnknownObject(id))
    }
}

fn revert(scene: &mut Scene, undo: Undo) {
    match undo {
        Undo::Added(id) => {
            scene.detach_subtree(id);
        }
        Undo::Removed(detached) => scene.reattach_subtree(detached),
        Undo::Relinked { id, parent, index } => {
            scene.relink(id, parent, Some(index));
        }
        Undo::Transform { id, local } => {
            if let Some(object) = scene.object_mut(id) {
                object.set_local_transform(local);
            }
        }
        Undo::Color { id, color } => {
            if let Some(object) = scene.object_mut(id) {
                object.set_color(color);
            }
        }
        Undo::Visible { id, visible } => {
            if let Some(object) = scene.object_mut(id) {
                object.set_visible(visible);
            }
        }
        Undo::Layer { id, layer } => {
            scene.set_object_layer(id, &layer);
        }
        Undo::LayerAdded(name) => {
            scene.take_layer(&name);
        }
        Undo::LayerRemoved(layer) => scene.restore_layer(layer),
        Undo::LayerOrder { name, order } => {
            scene.set_layer_order(&name, order);
        }
        Undo::ResourceAttached { id, key } => {
            if let Some(object) = scene.object_mut(id) {
                object.resources.retain(|attached| *attached != key);
            }
        }
        Undo::ResourceDetached { id, key, index } => {
            if let Some(object) = scene.object_mut(id) {
                let index = index.min(object.resources.len());
                object.resources.insert(index, key);
            }
        }
        Undo::Animation { id, previous } => {
            scene.replace_animation(id, previous);
        }
        Undo::Camera(camera) => *scene.camera_mut() = camera,
    }
}
