//! Device-scoped resources and the keys scene objects use to reference them.
//!
//! - `dictionary` caches lazily loaded instances per `(device, key)` pair and
//!   tracks reference counts and unload marks
//!
//! Scene objects never own GPU data. They name what they need with a
//! [`ResourceKey`]; the engine resolves keys against the context's
//! [`ResourceRegistry`] while building a frame.

use std::{fmt, sync::Arc};

use crate::context::DeviceResource;

pub mod dictionary;

pub use dictionary::{Factory, Loaded, ResourceDictionary, ResourceHandle};

/// The dictionary type the engine context uses: any device resource behind a [`ResourceKey`].
pub type ResourceRegistry = ResourceDictionary<ResourceKey, Box<dyn DeviceResource>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Geometry,
    Material,
    Texture,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceKind::Geometry => "geometry",
            ResourceKind::Material => "material",
            ResourceKind::Texture => "texture",
        })
    }
}

/// Names a resource independent of any device, e.g. `geometry:cube`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    kind: ResourceKind,
    name: Arc<str>,
}

impl ResourceKey {
    pub fn new(kind: ResourceKind, name: impl AsRef<str>) -> Self {
        Self {
            kind,
            name: Arc::from(name.as_ref()),
        }
    }

    pub fn geometry(name: impl AsRef<str>) -> Self {
        Self::new(ResourceKind::Geometry, name)
    }

    pub fn material(name: impl AsRef<str>) -> Self {
        Self::new(ResourceKind::Material, name)
    }

    pub fn texture(name: impl AsRef<str>) -> Self {
        Self::new(ResourceKind::Texture, name)
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}
