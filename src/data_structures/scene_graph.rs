//! Scene graph and hierarchical scene organization.
//!
//! A [`Scene`] owns its [`SceneObject`]s, sorts them into ordered [`Layer`]s and
//! keeps the parent/child tree between them. Objects are moved into exactly one
//! scene and cannot be cloned, so membership stays exclusive.
//!
//! Reading a scene is unrestricted. Structural edits go through a
//! [`SceneManipulator`](crate::mutation::SceneManipulator) inside a mutation, which
//! journals every edit so a failing mutation can be rolled back.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use cgmath::{EuclideanSpace, Point3};

use crate::{
    animation::{SequenceState, Sequencer},
    camera::Camera,
    data_structures::{
        bounding_box::{BoundingBox, BoundingBoxBuilder},
        instance::Instance,
    },
    error::Result,
    resources::ResourceKey,
};

/// Every scene starts with this layer at order `0`; it cannot be removed.
pub const DEFAULT_LAYER: &str = "default";

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    fn next() -> Self {
        Self(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Linear RGBA colour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const TRANSPARENT: Self = Self::rgba(0.0, 0.0, 0.0, 0.0);
    pub const BLACK: Self = Self::rgba(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Self = Self::rgba(1.0, 1.0, 1.0, 1.0);
    pub const RED: Self = Self::rgba(1.0, 0.0, 0.0, 1.0);
    pub const GREEN: Self = Self::rgba(0.0, 1.0, 0.0, 1.0);
    pub const BLUE: Self = Self::rgba(0.0, 0.0, 1.0, 1.0);

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

/// A node of the scene graph.
///
/// Build objects with the `with_*` methods, then add them to a scene through a
/// mutation. Once added, the hierarchy (parent, children, layer, resources) can
/// only change through the manipulator; the remaining properties may also be
/// changed by animation callbacks.
#[derive(Debug)]
pub struct SceneObject {
    id: ObjectId,
    name: String,
    local: Instance,
    pub(crate) world: Instance,
    color: Color,
    visible: bool,
    pub(crate) world_visible: bool,
    pub(crate) parent: Option<ObjectId>,
    pub(crate) children: Vec<ObjectId>,
    pub(crate) layer: String,
    pub(crate) resources: Vec<ResourceKey>,
}

impl SceneObject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ObjectId::next(),
            name: name.into(),
            local: Instance::new(),
            world: Instance::new(),
            color: Color::WHITE,
            visible: true,
            world_visible: true,
            parent: None,
            children: Vec::new(),
            layer: DEFAULT_LAYER.to_string(),
            resources: Vec::new(),
        }
    }

    pub fn with_transform(mut self, local: Instance) -> Self {
        self.world = local.clone();
        self.local = local;
        self
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn with_resource(mut self, key: ResourceKey) -> Self {
        if !self.resources.contains(&key) {
            self.resources.push(key);
        }
        self
    }

    pub fn on_layer(mut self, layer: impl Into<String>) -> Self {
        self.layer = layer.into();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self.world_visible = false;
        self
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Transform relative to the parent.
    pub fn local_transform(&self) -> &Instance {
        &self.local
    }

    pub fn set_local_transform(&mut self, local: Instance) {
        self.local = local;
    }

    /// Transform in scene space as of the last world transform pass.
    pub fn world_transform(&self) -> &Instance {
        &self.world
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn set_color(&mut self, color: Color) {
        self.color = color;
    }

    /// The object's own visibility flag.
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// `false` if the object or any of its ancestors is hidden.
    pub fn is_world_visible(&self) -> bool {
        self.world_visible
    }

    pub fn parent(&self) -> Option<ObjectId> {
        self.parent
    }

    pub fn children(&self) -> &[ObjectId] {
        &self.children
    }

    pub fn layer(&self) -> &str {
        &self.layer
    }

    pub fn resources(&self) -> &[ResourceKey] {
        &self.resources
    }
}

/// A named group of objects rendered together.
///
/// Layers render by ascending `order`; layers with equal order render in the
/// order they were added.
#[derive(Debug)]
pub struct Layer {
    name: String,
    order: i32,
    seq: u64,
    pub(crate) members: HashSet<ObjectId>,
}

impl Layer {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.members.contains(&id)
    }

    /// Members sorted by id.
    pub fn members(&self) -> Vec<ObjectId> {
        let mut members: Vec<_> = self.members.iter().copied().collect();
        members.sort();
        members
    }
}

/// A subtree taken out of the scene, kept so it can be put back unchanged.
pub(crate) struct DetachedSubtree {
    root: ObjectId,
    parent: Option<(ObjectId, usize)>,
    /// Pre-order, root first.
    pub(crate) objects: Vec<SceneObject>,
    animations: Vec<(ObjectId, Sequencer)>,
}

#[derive(Debug)]
pub struct Scene {
    layers: Vec<Layer>,
    next_layer_seq: u64,
    objects: BTreeMap<ObjectId, SceneObject>,
    animations: HashMap<ObjectId, Sequencer>,
    camera: Camera,
}

impl Scene {
    pub fn new(camera: Camera) -> Self {
        let mut scene = Self {
            layers: Vec::new(),
            next_layer_seq: 0,
            objects: BTreeMap::new(),
            animations: HashMap::new(),
            camera,
        };
        scene.insert_layer(DEFAULT_LAYER.to_string(), 0);
        scene
    }

    pub fn get(&self, id: ObjectId) -> Option<&SceneObject> {
        self.objects.get(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    /// The object with the lowest id among those called `name`.
    pub fn find_by_name(&self, name: &str) -> Option<&SceneObject> {
        self.objects.values().find(|object| object.name == name)
    }

    /// All objects, ordered by id.
    pub fn objects(&self) -> impl Iterator<Item = &SceneObject> {
        self.objects.values()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Layers in render order.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.name == name)
    }

    /// Objects without a parent, ordered by id.
    pub fn roots(&self) -> Vec<ObjectId> {
        self.objects
            .values()
            .filter(|object| object.parent.is_none())
            .map(|object| object.id)
            .collect()
    }

    pub fn children(&self, id: ObjectId) -> Option<&[ObjectId]> {
        self.objects.get(&id).map(|object| object.children.as_slice())
    }

    /// `true` if `ancestor` lies on the path from `id` up to its root.
    pub fn is_ancestor(&self, ancestor: ObjectId, id: ObjectId) -> bool {
        let mut current = self.objects.get(&id).and_then(|object| object.parent);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.objects.get(&parent).and_then(|object| object.parent);
        }
        false
    }

    /// `id` and all of its descendants, parents before children.
    pub fn subtree(&self, id: ObjectId) -> Vec<ObjectId> {
        let mut ids = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(object) = self.objects.get(&current) {
                ids.push(current);
                stack.extend(object.children.iter().rev());
            }
        }
        ids
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn animation_state(&self, id: ObjectId) -> Option<SequenceState> {
        self.animations.get(&id).map(|sequencer| sequencer.state())
    }

    /// Bounding box around the world positions of all visible objects.
    pub fn bounds(&self) -> Result<BoundingBox> {
        let mut builder = BoundingBoxBuilder::new();
        for object in self.objects.values().filter(|object| object.world_visible) {
            builder.add(Point3::from_vec(object.world.position))?;
        }
        builder.build()
    }

    /// Recomputes world transforms and inherited visibility, parents first.
    pub(crate) fn update_world_transforms(&mut self) {
        let mut stack: Vec<(ObjectId, Instance, bool)> = self
            .roots()
            .into_iter()
            .map(|id| (id, Instance::new(), true))
            .collect();
        while let Some((id, parent_world, parent_visible)) = stack.pop() {
            let Some(object) = self.objects.get_mut(&id) else {
                log::warn!("Object {} is linked into the hierarchy but missing", id);
                continue;
            };
            object.world = &parent_world * &object.local;
            object.world_visible = parent_visible && object.visible;
            let (world, visible) = (object.world.clone(), object.world_visible);
            stack.extend(
                object
                    .children
                    .iter()
                    .map(|child| (*child, world.clone(), visible)),
            );
        }
    }

    /// Advances every running animation to `now`.
    pub(crate) fn tick_animations(&mut self, now: instant::Duration) {
        let Scene {
            animations,
            objects,
            ..
        } = self;
        for (id, sequencer) in animations.iter_mut() {
            match objects.get_mut(id) {
                Some(object) => sequencer.tick(now, object),
                None => log::warn!("Animation target {} is not part of the scene", id),
            }
        }
    }

    pub(crate) fn object_mut(&mut self, id: ObjectId) -> Option<&mut SceneObject> {
        self.objects.get_mut(&id)
    }

    pub(crate) fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub(crate) fn replace_animation(
        &mut self,
        id: ObjectId,
        sequencer: Option<Sequencer>,
    ) -> Option<Sequencer> {
        match sequencer {
            Some(sequencer) => self.animations.insert(id, sequencer),
            None => self.animations.remove(&id),
        }
    }

    /// Links an object into the scene. Its parent and layer must exist.
    pub(crate) fn attach(&mut self, object: SceneObject) {
        let id = object.id;
        if let Some(layer) = self.layer_mut(&object.layer) {
            layer.members.insert(id);
        }
        if let Some(parent) = object.parent.and_then(|parent| self.objects.get_mut(&parent)) {
            parent.children.push(id);
        }
        self.objects.insert(id, object);
    }

    pub(crate) fn detach_subtree(&mut self, id: ObjectId) -> Option<DetachedSubtree> {
        let ids = self.subtree(id);
        let parent = self.objects.get(&id)?.parent;
        let parent = parent.and_then(|parent| {
            let siblings = &mut self.objects.get_mut(&parent)?.children;
            let index = siblings.iter().position(|child| *child == id)?;
            siblings.remove(index);
            Some((parent, index))
        });
        let mut objects = Vec::with_capacity(ids.len());
        let mut animations = Vec::new();
        for id in ids {
            if let Some(object) = self.objects.remove(&id) {
                if let Some(layer) = self.layer_mut(&object.layer) {
                    layer.members.remove(&id);
                }
                if let Some(sequencer) = self.animations.remove(&id) {
                    animations.push((id, sequencer));
                }
                objects.push(object);
            }
        }
        Some(DetachedSubtree {
            root: id,
            parent,
            objects,
            animations,
        })
    }

    pub(crate) fn reattach_subtree(&mut self, detached: DetachedSubtree) {
        for object in detached.objects {
            if let Some(layer) = self.layer_mut(&object.layer) {
                layer.members.insert(object.id);
            }
            self.objects.insert(object.id, object);
        }
        self.animations.extend(detached.animations);
        if let Some((parent, index)) = detached.parent {
            if let Some(parent) = self.objects.get_mut(&parent) {
                let index = index.min(parent.children.len());
                parent.children.insert(index, detached.root);
            }
        }
    }

    /// Moves `id` under `parent` (at `index` among its children, or last).
    ///
    /// Returns the previous parent and the position the object had there.
    pub(crate) fn relink(
        &mut self,
        id: ObjectId,
        parent: Option<ObjectId>,
        index: Option<usize>,
    ) -> Option<(Option<ObjectId>, usize)> {
        let old_parent = self.objects.get(&id)?.parent;
        let old_index = match old_parent.and_then(|old| self.objects.get_mut(&old)) {
            Some(old) => {
                let index = old.children.iter().position(|child| *child == id).unwrap_or(0);
                old.children.retain(|child| *child != id);
                index
            }
            None => 0,
        };
        if let Some(new) = parent.and_then(|parent| self.objects.get_mut(&parent)) {
            let index = index.unwrap_or(new.children.len()).min(new.children.len());
            new.children.insert(index, id);
        }
        self.objects.get_mut(&id)?.parent = parent;
        Some((old_parent, old_index))
    }

    /// Moves an object to another (existing) layer, returning the old layer's name.
    pub(crate) fn set_object_layer(&mut self, id: ObjectId, layer: &str) -> Option<String> {
        let object = self.objects.get_mut(&id)?;
        let old = std::mem::replace(&mut object.layer, layer.to_string());
        if let Some(old) = self.layer_mut(&old) {
            old.members.remove(&id);
        }
        if let Some(new) = self.layer_mut(layer) {
            new.members.insert(id);
        }
        Some(old)
    }

    pub(crate) fn insert_layer(&mut self, name: String, order: i32) {
        let seq = self.next_layer_seq;
        self.next_layer_seq += 1;
        self.layers.push(Layer {
            name,
            order,
            seq,
            members: HashSet::new(),
        });
        self.sort_layers();
    }

    pub(crate) fn take_layer(&mut self, name: &str) -> Option<Layer> {
        let index = self.layers.iter().position(|layer| layer.name == name)?;
        Some(self.layers.remove(index))
    }

    pub(crate) fn restore_layer(&mut self, layer: Layer) {
        self.layers.push(layer);
        self.sort_layers();
    }

    /// Returns the previous order.
    pub(crate) fn set_layer_order(&mut self, name: &str, order: i32) -> Option<i32> {
        let layer = self.layer_mut(name)?;
        let old = std::mem::replace(&mut layer.order, order);
        self.sort_layers();
        Some(old)
    }

    fn layer_mut(&mut self, name: &str) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|layer| layer.name == name)
    }

    fn sort_layers(&mut self) {
        self.layers.sort_by_key(|layer| (layer.order, layer.seq));
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new(Camera::default())
    }
}
