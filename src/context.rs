use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

use instant::Duration;

use crate::{
    camera::Camera,
    data_structures::scene_graph::Color,
    mutation::MutationSender,
    resources::{ResourceKey, ResourceRegistry},
};

static NEXT_DEVICE_ID: AtomicU32 = AtomicU32::new(0);

/// Identifies a graphics device for as long as the process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(u32);

impl DeviceId {
    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device#{}", self.0)
    }
}

/// A graphics device resources are loaded on.
///
/// The engine does not talk to a native API itself; a device is the identity
/// that scopes resource lifetimes. Factories and unload hooks receive it so
/// they can look up their native counterpart.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Device {
    id: DeviceId,
    label: String,
}

impl Device {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: DeviceId(NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed)),
            label: label.into(),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.id)
    }
}

/// Anything that lives on a device and must be released there.
pub trait DeviceResource: Send + Sync + 'static {
    /// Releases the native side of the resource. Called once, on the device's flush.
    fn unload(&self, _device: &Device) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<T: DeviceResource + ?Sized> DeviceResource for Box<T> {
    fn unload(&self, device: &Device) -> anyhow::Result<()> {
        (**self).unload(device)
    }
}

/// Start-up configuration of an [`Engine`](crate::flow::Engine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub device_label: String,
    pub clear_colour: Color,
    pub tick_duration_millis: u64,
    /// Target time between two frames when driven by [`run`](crate::flow::run).
    pub frame_interval: Duration,
    pub camera: Camera,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_label: "default".to_string(),
            clear_colour: Color {
                r: 0.1,
                g: 0.2,
                b: 0.3,
                a: 1.0,
            },
            tick_duration_millis: 100,
            frame_interval: Duration::from_millis(16),
            camera: Camera::default(),
        }
    }
}

/// Live engine state shared with flows and frame sinks.
///
/// Flows may change the public fields at runtime through
/// [`Out::Configure`](crate::flow::Out::Configure).
#[derive(Debug)]
pub struct Context {
    pub device: Arc<Device>,
    pub resources: Arc<ResourceRegistry>,
    pub clear_colour: Color,
    pub tick_duration_millis: u64,
    pub frame_interval: Duration,
}

impl Context {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            device: Arc::new(Device::new(config.device_label.clone())),
            resources: Arc::new(ResourceRegistry::new()),
            clear_colour: config.clear_colour,
            tick_duration_millis: config.tick_duration_millis,
            frame_interval: config.frame_interval,
        }
    }

    /// Registers a typed resource factory under `key`.
    pub fn register_resource<R, F>(&self, key: ResourceKey, factory: F)
    where
        R: DeviceResource,
        F: Fn(&Device) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let replaced = self.resources.register(key.clone(), move |device| {
            Ok(Box::new(factory(device)?) as Box<dyn DeviceResource>)
        });
        if replaced.is_some() {
            log::debug!("Factory for {} was replaced", key);
        }
    }

    /// Unloads the resources of this context's device that are marked for unloading.
    pub fn flush_resources(&self) -> usize {
        self.resources.flush(&self.device)
    }
}

/// What a flow constructor gets to prepare itself before the first frame.
///
/// Cloning is cheap: everything inside is shared.
#[derive(Debug, Clone)]
pub struct InitContext {
    pub device: Arc<Device>,
    pub resources: Arc<ResourceRegistry>,
    pub mutations: MutationSender,
}

impl InitContext {
    pub(crate) fn new(ctx: &Context, mutations: MutationSender) -> Self {
        Self {
            device: ctx.device.clone(),
            resources: ctx.resources.clone(),
            mutations,
        }
    }
}
