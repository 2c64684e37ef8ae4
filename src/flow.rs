//! Flow control and the per-frame engine loop.
//!
//! A "flow" is a render-loop participant: it keeps its own state, reacts to
//! frame updates and periodic ticks, edits the scene through mutations and may
//! draw overlays on top of the scene's layers.
//!
//! # User-facing types
//!
//! - [`GraphicsFlow<S>`] is the trait for render-loop participants
//! - [`Out<S>`] is the output type for mutations, async work and context configuration
//! - [`EngineBuilder`] and [`Engine`] own the scene and drive frames
//!
//! # Lifecycle Flow
//!
//! [`Engine::render_frame`] follows this pattern each frame:
//! 1. Apply pending mutations in submission order
//! 2. Count resource references and notify observers after each mutation
//! 3. Advance animations to the current time
//! 4. Call `on_update` on all flows, and `on_tick` every `tick_duration_millis`
//! 5. Propagate world transforms
//! 6. Build the frame: scene layers in order, then flow overlays
//! 7. Present the frame to the sink
//! 8. Flush the device: unload resources nobody references anymore

use std::{
    fmt::Debug,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use instant::{Duration, Instant};

use crate::{
    context::{Context, Device, DeviceResource, EngineConfig, InitContext},
    data_structures::{pool::ObjectPool, scene_graph::Scene},
    mutation::{
        Applied, Mutation, MutationReceiver, MutationReport, MutationSender, MutationTicket,
        SceneManipulator, SceneObserver, channel,
    },
    render::{DrawCommand, DrawSource, Frame, FrameSink, LayerPass, NullSink, Render, resolve},
    resources::{ResourceKey, ResourceRegistry},
};

const DRAW_LIST_POOL_CAPACITY: usize = 32;

///
/// This is the Output Type for every lifecycle hook where the user can hand work back to the engine.
///
/// `Out::Mutate` queues scene mutations. They run at the start of the next frame.
///
/// `Out::FutMutation` resolves futures of mutations on the engine's runtime and queues the results.
///
/// `Out::FutFn` resolves futures of state updates and applies them to the flow state directly.
///
/// `Out::Configure` can be used to modify the Context during runtime for instance to change the tick
/// speed or the clear colour.
///
/// `Empty` is the default output used when nothing needs to be handled.
///
pub enum Out<S> {
    Mutate(Vec<Mutation>),
    FutMutation(Vec<Box<dyn Future<Output = Mutation>>>),
    FutFn(Vec<Box<dyn Future<Output = Box<dyn FnOnce(&mut S)>>>>),
    Configure(Box<dyn FnOnce(&mut Context)>),
    Empty,
}

impl<S> Default for Out<S> {
    fn default() -> Self {
        Self::Empty
    }
}

/// Trait for implementing a render-loop participant.
///
/// # Lifecycle
///
/// 1. `on_init()` is called once when the flow is registered; configure the context here
/// 2. `on_update()` is called every frame, after mutations and animations ran
/// 3. `on_tick()` is called every `tick_duration_millis`
/// 4. `on_render()` is called each frame and returns the overlays to draw
///
pub trait GraphicsFlow<S> {
    /// Initialize the flow and configure the context.
    fn on_init(&mut self, ctx: &mut Context, state: &mut S) -> Out<S>;

    /// Called every frame with the time `dt` since the previous frame.
    fn on_update(&mut self, _ctx: &Context, _scene: &Scene, _state: &mut S, _dt: Duration) -> Out<S> {
        Out::Empty
    }

    /// Called every `tick_duration_millis` milliseconds (configurable via context).
    fn on_tick(&mut self, _ctx: &Context, _scene: &Scene, _state: &mut S) -> Out<S> {
        Out::Empty
    }

    /// Overlays drawn after all scene layers.
    fn on_render(&self, scene: &Scene) -> Render<'_>;
}

impl<S> Debug for dyn GraphicsFlow<S> + 'static {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GraphicsFlow")
    }
}

/// Type alias for a flow constructor (factory function).
///
/// A flow constructor takes an `InitContext` and asynchronously returns a
/// boxed `GraphicsFlow`. This allows lazy initialization and resource loading.
pub type FlowConstructor<S> =
    Box<dyn FnOnce(InitContext) -> Pin<Box<dyn Future<Output = Box<dyn GraphicsFlow<S>>>>>>;

/// What happened during one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub number: u64,
    pub committed: usize,
    pub aborted: usize,
    pub ticked: bool,
    pub draws: usize,
    /// Draws dropped because their resources could not be loaded.
    pub skipped: usize,
    pub presented: bool,
    pub unloaded: usize,
}

pub struct EngineBuilder<S: 'static> {
    config: EngineConfig,
    state: S,
    sink: Box<dyn FrameSink>,
    observers: Vec<Box<dyn SceneObserver>>,
    constructors: Vec<FlowConstructor<S>>,
    resources: Vec<Box<dyn FnOnce(&Context)>>,
    mutations: Option<MutationReceiver>,
}

impl<S: Default + 'static> EngineBuilder<S> {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: S::default(),
            sink: Box::new(NullSink),
            observers: Vec::new(),
            constructors: Vec::new(),
            resources: Vec::new(),
            mutations: None,
        }
    }
}

impl<S: 'static> EngineBuilder<S> {
    pub fn with_state(mut self, state: S) -> Self {
        self.state = state;
        self
    }

    pub fn with_sink(mut self, sink: impl FrameSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn with_observer(mut self, observer: impl SceneObserver + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    pub fn with_flow(mut self, constructor: FlowConstructor<S>) -> Self {
        self.constructors.push(constructor);
        self
    }

    pub fn with_resource<R, F>(mut self, key: ResourceKey, factory: F) -> Self
    where
        R: DeviceResource,
        F: Fn(&Device) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        self.resources
            .push(Box::new(move |ctx: &Context| ctx.register_resource(key, factory)));
        self
    }

    /// Uses an existing queue, so senders can be handed out before the engine exists.
    pub fn with_mutations(mut self, receiver: MutationReceiver) -> Self {
        self.mutations = Some(receiver);
        self
    }

    /// Creates the context, resolves all flow constructors and runs their `on_init`.
    ///
    /// Must not be called from within an async runtime.
    pub fn build(self) -> anyhow::Result<Engine<S>> {
        let async_runtime = tokio::runtime::Runtime::new()?;
        let ctx = Context::new(&self.config);
        self.resources.into_iter().for_each(|register| register(&ctx));
        let (sender, mutations) = match self.mutations {
            Some(receiver) => (receiver.sender(), receiver),
            None => channel(),
        };
        let draw_lists = ObjectPool::new(DRAW_LIST_POOL_CAPACITY, Vec::new)?
            .with_reset(|draws: &mut Vec<DrawCommand>| draws.clear());

        let mut engine = Engine {
            async_runtime,
            ctx,
            state: self.state,
            scene: Scene::new(self.config.camera),
            mutations,
            sender,
            flows: Vec::new(),
            observers: self.observers,
            sink: self.sink,
            draw_lists,
            started: Instant::now(),
            last_frame: Duration::ZERO,
            time_since_tick: Duration::ZERO,
            frame_number: 0,
            shut_down: false,
        };
        let init = InitContext::new(&engine.ctx, engine.sender.clone());
        let flow_futures: Vec<_> = self
            .constructors
            .into_iter()
            // InitContext only clones the Arcs of device and resources
            .map(|constructor| constructor(init.clone()))
            .collect();
        let flows = engine
            .async_runtime
            .block_on(futures::future::join_all(flow_futures));
        flows.into_iter().for_each(|flow| engine.init_flow(flow));
        log::info!(
            "Engine started on {} with {} flow(s)",
            engine.ctx.device,
            engine.flows.len()
        );
        Ok(engine)
    }
}

/// Owns the scene and everything that renders it.
pub struct Engine<S: 'static> {
    async_runtime: tokio::runtime::Runtime,
    ctx: Context,
    state: S,
    scene: Scene,
    mutations: MutationReceiver,
    sender: MutationSender,
    flows: Vec<Box<dyn GraphicsFlow<S>>>,
    observers: Vec<Box<dyn SceneObserver>>,
    sink: Box<dyn FrameSink>,
    draw_lists: ObjectPool<Vec<DrawCommand>>,
    started: Instant,
    last_frame: Duration,
    time_since_tick: Duration,
    frame_number: u64,
    shut_down: bool,
}

impl<S: 'static> Engine<S> {
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    /// Number of the next frame.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// A sender for the engine's mutation queue.
    pub fn mutations(&self) -> MutationSender {
        self.sender.clone()
    }

    /// Queues a mutation to run at the start of the next frame.
    pub fn manipulate<F>(&self, mutation: F) -> MutationTicket<()>
    where
        F: FnOnce(&mut SceneManipulator<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        self.sender.submit(mutation)
    }

    /// Adds a flow at runtime. It takes part in rendering from the next frame on.
    pub fn register_flow(&mut self, constructor: FlowConstructor<S>) {
        let init = InitContext::new(&self.ctx, self.sender.clone());
        let flow = self.async_runtime.block_on(constructor(init));
        self.init_flow(flow);
    }

    fn init_flow(&mut self, mut flow: Box<dyn GraphicsFlow<S>>) {
        let out = flow.on_init(&mut self.ctx, &mut self.state);
        handle_flow_output(
            &self.async_runtime,
            &mut self.state,
            &mut self.ctx,
            &self.sender,
            out,
        );
        self.flows.push(flow);
    }

    /// Renders a frame at the current time.
    pub fn render_frame(&mut self) -> FrameStats {
        let now = self.started.elapsed();
        self.render_frame_at(now)
    }

    /// Renders a frame at `now`, the time since engine start.
    ///
    /// Times must not go backwards; an earlier time is treated as no time passing.
    pub fn render_frame_at(&mut self, now: Duration) -> FrameStats {
        let mut stats = FrameStats {
            number: self.frame_number,
            ..Default::default()
        };
        if self.shut_down {
            log::warn!("Frame {} requested after shutdown", self.frame_number);
            return stats;
        }
        let now = now.max(self.last_frame);
        let dt = now - self.last_frame;
        self.last_frame = now;
        self.time_since_tick += dt;

        let resources = &self.ctx.resources;
        let observers = &mut self.observers;
        self.mutations.drain(&mut self.scene, |scene, applied| match applied {
            Applied::Committed { seq, report } => {
                stats.committed += 1;
                count_references(resources, &report);
                observers
                    .iter_mut()
                    .for_each(|observer| observer.on_mutation(scene, seq, &report));
            }
            Applied::Aborted { seq, error } => {
                stats.aborted += 1;
                log::warn!("{}", error);
                observers
                    .iter_mut()
                    .for_each(|observer| observer.on_mutation_aborted(seq, &error));
            }
        });

        self.scene.tick_animations(now);

        self.flows.iter_mut().for_each(|flow| {
            let out = flow.on_update(&self.ctx, &self.scene, &mut self.state, dt);
            handle_flow_output(
                &self.async_runtime,
                &mut self.state,
                &mut self.ctx,
                &self.sender,
                out,
            );
        });
        if self.time_since_tick >= Duration::from_millis(self.ctx.tick_duration_millis) {
            self.flows.iter_mut().for_each(|flow| {
                let out = flow.on_tick(&self.ctx, &self.scene, &mut self.state);
                handle_flow_output(
                    &self.async_runtime,
                    &mut self.state,
                    &mut self.ctx,
                    &self.sender,
                    out,
                );
            });
            self.time_since_tick = Duration::ZERO;
            stats.ticked = true;
        }

        self.scene.update_world_transforms();

        let frame = self.build_frame(now, &mut stats);
        stats.draws = frame.draw_count();
        match self.sink.present(&self.ctx, &frame) {
            Ok(()) => stats.presented = true,
            Err(e) => log::error!("Unable to present frame {}: {:#}", frame.number, e),
        }
        for pass in frame.layers {
            self.draw_lists.give_back(pass.draws);
        }

        stats.unloaded = self.ctx.flush_resources();
        if stats.unloaded > 0 {
            log::debug!("Frame {} unloaded {} resource(s)", self.frame_number, stats.unloaded);
        }
        self.frame_number += 1;
        stats
    }

    fn build_frame(&mut self, now: Duration, stats: &mut FrameStats) -> Frame {
        let mut layers = Vec::with_capacity(self.scene.layers().len());
        for layer in self.scene.layers() {
            let mut draws = self.draw_lists.rent();
            for id in layer.members() {
                let Some(object) = self.scene.get(id) else {
                    continue;
                };
                if !object.is_world_visible() {
                    continue;
                }
                match resolve(&self.ctx, object.resources()) {
                    Ok(resources) => draws.push(DrawCommand {
                        source: DrawSource::Object(id),
                        instance: object.world_transform().to_raw(),
                        colour: object.color(),
                        resources,
                    }),
                    Err(e) => {
                        log::warn!("Skipping {} ({}): {}", id, object.name(), e);
                        stats.skipped += 1;
                    }
                }
            }
            layers.push(LayerPass {
                name: layer.name().to_string(),
                order: layer.order(),
                draws,
            });
        }

        let mut overlays = Vec::new();
        for (index, flow) in self.flows.iter().enumerate() {
            stats.skipped += flow
                .on_render(&self.scene)
                .collect(&self.ctx, index, &mut overlays);
        }

        Frame {
            number: self.frame_number,
            time: now,
            clear_colour: self.ctx.clear_colour,
            view_projection: self.scene.camera().view_projection().into(),
            layers,
            overlays,
        }
    }

    /// Drops still queued mutations and unloads every resource of the device, newest first.
    ///
    /// Returns the number of unloaded resources. Called on drop if not called before.
    pub fn shutdown(&mut self) -> usize {
        if self.shut_down {
            return 0;
        }
        self.shut_down = true;
        let dropped = self.mutations.close();
        let unloaded = self.ctx.resources.unload_all(&self.ctx.device);
        log::info!(
            "Engine on {} shut down after {} frame(s): {} mutation(s) dropped, {} resource(s) unloaded",
            self.ctx.device,
            self.frame_number,
            dropped,
            unloaded
        );
        unloaded
    }
}

impl<S: 'static> Drop for Engine<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn count_references(resources: &ResourceRegistry, report: &MutationReport) {
    for (key, gained) in report.resource_references() {
        if gained {
            resources.retain(key);
        } else if let Err(e) = resources.release(key) {
            log::warn!("{}", e);
        }
    }
}

fn handle_flow_output<S>(
    async_runtime: &tokio::runtime::Runtime,
    state: &mut S,
    ctx: &mut Context,
    sender: &MutationSender,
    out: Out<S>,
) {
    match out {
        Out::Mutate(mutations) => mutations.into_iter().for_each(|mutation| {
            sender.submit(mutation);
        }),
        // Queue the mutations once the futures resolved
        Out::FutMutation(futures) => {
            let futures: Vec<Pin<Box<dyn Future<Output = Mutation>>>> =
                futures.into_iter().map(Pin::from).collect();
            let resolved = async_runtime.block_on(futures::future::join_all(futures));
            resolved.into_iter().for_each(|mutation| {
                sender.submit(mutation);
            });
        }
        Out::FutFn(futures) => {
            let futures: Vec<Pin<Box<dyn Future<Output = Box<dyn FnOnce(&mut S)>>>>> =
                futures.into_iter().map(Pin::from).collect();
            let resolved = async_runtime.block_on(futures::future::join_all(futures));
            resolved.into_iter().for_each(|mutation| mutation(state));
        }
        Out::Configure(f) => f(ctx),
        Out::Empty => (),
    }
}

/// Builds the engine and renders frames every `frame_interval` until `stop` is raised.
///
/// Shuts the engine down before returning.
pub fn run<S: 'static>(builder: EngineBuilder<S>, stop: Arc<AtomicBool>) -> anyhow::Result<()> {
    if let Err(e) = env_logger::try_init() {
        println!("Warning: Could not initialize logger: {}", e);
    };

    let mut engine = builder.build()?;
    while !stop.load(Ordering::Acquire) {
        let frame_start = Instant::now();
        let stats = engine.render_frame();
        log::trace!("{:?}", stats);
        if let Some(rest) = engine.context().frame_interval.checked_sub(frame_start.elapsed()) {
            std::thread::sleep(rest);
        }
    }
    engine.shutdown();
    Ok(())
}
