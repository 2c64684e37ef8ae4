//! Frame composition.
//!
//! The engine turns the scene into a [`Frame`] once per render: one
//! [`LayerPass`] per layer in render order, followed by the overlay draws of
//! every flow in registration order. A [`FrameSink`] presents the frame on the
//! native graphics API.
//!
//! # Key types
//!
//! - [`Render`] is what a flow returns from `on_render` to draw overlays
//! - [`Instanced`] draws one resource set at one or more transforms
//! - [`DrawCommand`] is a single resolved draw inside a frame
//!

use instant::Duration;

use crate::{
    context::{Context, DeviceResource},
    data_structures::{
        instance::{Instance, InstanceRaw},
        scene_graph::{Color, ObjectId},
    },
    resources::{ResourceHandle, ResourceKey},
};

pub type DeviceHandle = ResourceHandle<Box<dyn DeviceResource>>;

/// Data for instanced overlay rendering: resources drawn at every transform.
///
/// `id` is chosen by the flow and ends up in every resulting [`DrawCommand`].
#[derive(Debug, Clone)]
pub struct Instanced {
    pub id: u32,
    pub transforms: Vec<Instance>,
    pub colour: Color,
    pub resources: Vec<ResourceKey>,
}

/// Specifies what a flow draws on top of the scene.
///
/// - `None` draws nothing
/// - `Instanced(Instanced)` draws one resource set
/// - `Batch(Vec<Instanced>)` draws several resource sets
/// - `Composed(Vec<Render>)` recursively draws a composition of renders
/// - `Custom(...)` appends draw commands built by a closure
///
pub enum Render<'a> {
    None,
    Instanced(Instanced),
    Batch(Vec<Instanced>),
    Composed(Vec<Render<'a>>),
    Custom(Box<dyn 'a + FnOnce(&Context, &mut Vec<DrawCommand>)>),
}

impl<'a> Render<'a> {
    /// Resolves the render into draw commands appended to `draws`.
    ///
    /// Instanced renders whose resources cannot be loaded are skipped with a
    /// warning. Returns the number of skipped renders.
    pub(crate) fn collect(self, ctx: &Context, flow: usize, draws: &mut Vec<DrawCommand>) -> usize {
        match self {
            Render::None => 0,
            Render::Instanced(instanced) => collect_instanced(ctx, flow, instanced, draws),
            Render::Batch(batch) => batch
                .into_iter()
                .map(|instanced| collect_instanced(ctx, flow, instanced, draws))
                .sum(),
            Render::Composed(renders) => renders
                .into_iter()
                .map(|render| render.collect(ctx, flow, draws))
                .sum(),
            Render::Custom(f) => {
                f(ctx, draws);
                0
            }
        }
    }
}

impl Default for Render<'_> {
    fn default() -> Self {
        Self::None
    }
}

impl From<Instanced> for Render<'_> {
    fn from(instanced: Instanced) -> Self {
        Render::Instanced(instanced)
    }
}

fn collect_instanced(
    ctx: &Context,
    flow: usize,
    instanced: Instanced,
    draws: &mut Vec<DrawCommand>,
) -> usize {
    if instanced.transforms.is_empty() {
        log::warn!("Flow {} attempted to render {} with zero instances", flow, instanced.id);
        return 1;
    }
    let resources = match resolve(ctx, &instanced.resources) {
        Ok(resources) => resources,
        Err(e) => {
            log::warn!("Skipping overlay {} of flow {}: {}", instanced.id, flow, e);
            return 1;
        }
    };
    draws.extend(instanced.transforms.iter().map(|transform| DrawCommand {
        source: DrawSource::Overlay {
            flow,
            id: instanced.id,
        },
        instance: transform.to_raw(),
        colour: instanced.colour,
        resources: resources.clone(),
    }));
    0
}

/// Loads (or fetches the cached) instances of `keys` on the context's device.
pub(crate) fn resolve(ctx: &Context, keys: &[ResourceKey]) -> crate::error::Result<Vec<DeviceHandle>> {
    keys.iter()
        .map(|key| ctx.resources.get(&ctx.device, key))
        .collect()
}

/// Who asked for a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawSource {
    Object(ObjectId),
    Overlay { flow: usize, id: u32 },
}

/// A single draw: one transform with its resolved resources.
#[derive(Debug, Clone)]
pub struct DrawCommand {
    pub source: DrawSource,
    pub instance: InstanceRaw,
    pub colour: Color,
    pub resources: Vec<DeviceHandle>,
}

/// The draws of one scene layer.
///
/// Draw lists are recycled between frames, so `draws` is boxed to keep its
/// allocation when it returns to the engine's pool.
#[derive(Debug)]
pub struct LayerPass {
    pub name: String,
    pub order: i32,
    pub draws: Box<Vec<DrawCommand>>,
}

#[derive(Debug)]
pub struct Frame {
    pub number: u64,
    /// Time since engine start.
    pub time: Duration,
    pub clear_colour: Color,
    pub view_projection: [[f32; 4]; 4],
    pub layers: Vec<LayerPass>,
    pub overlays: Vec<DrawCommand>,
}

impl Frame {
    /// Number of draws over all layers and overlays.
    pub fn draw_count(&self) -> usize {
        self.layers.iter().map(|pass| pass.draws.len()).sum::<usize>() + self.overlays.len()
    }

    pub fn layer(&self, name: &str) -> Option<&LayerPass> {
        self.layers.iter().find(|pass| pass.name == name)
    }
}

/// Presents frames on the native graphics API.
pub trait FrameSink {
    fn present(&mut self, ctx: &Context, frame: &Frame) -> anyhow::Result<()>;
}

/// Discards every frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn present(&mut self, _ctx: &Context, _frame: &Frame) -> anyhow::Result<()> {
        Ok(())
    }
}
