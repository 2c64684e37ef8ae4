#![allow(dead_code)]

use std::{
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use parking_lot::Mutex;
use scene_ngin::{
    context::{Context, Device, DeviceResource, InitContext},
    data_structures::scene_graph::{Color, Scene},
    error::EngineError,
    flow::{FlowConstructor, GraphicsFlow},
    mutation::{MutationReport, SceneChange, SceneObserver},
    render::{DrawSource, Frame, FrameSink},
};

pub const EPSILON: f32 = 1e-4;

pub fn assert_close(actual: f32, expected: f32) {
    assert!(
        (actual - expected).abs() <= EPSILON,
        "expected {} to be close to {}",
        actual,
        expected
    );
}

pub fn assert_vec_close(actual: cgmath::Vector3<f32>, expected: cgmath::Vector3<f32>) {
    assert_close(actual.x, expected.x);
    assert_close(actual.y, expected.y);
    assert_close(actual.z, expected.z);
}

/// Labels of unloaded dummies, in unload order.
pub type UnloadLog = Arc<Mutex<Vec<String>>>;

/// A device resource that records when it is unloaded.
#[derive(Debug)]
pub struct Dummy {
    pub label: String,
    pub generation: usize,
    unloads: UnloadLog,
}

impl DeviceResource for Dummy {
    fn unload(&self, _device: &Device) -> anyhow::Result<()> {
        self.unloads.lock().push(self.label.clone());
        Ok(())
    }
}

/// Counts loads and records unloads of the dummies it creates.
#[derive(Debug, Clone, Default)]
pub struct DummyFactory {
    pub loads: Arc<AtomicUsize>,
    pub unloads: UnloadLog,
}

impl DummyFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factory(
        &self,
        label: &str,
    ) -> impl Fn(&Device) -> anyhow::Result<Dummy> + Send + Sync + 'static {
        let label = label.to_string();
        let loads = self.loads.clone();
        let unloads = self.unloads.clone();
        move |_device: &Device| {
            let generation = loads.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Dummy {
                label: label.clone(),
                generation,
                unloads: unloads.clone(),
            })
        }
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn unloaded(&self) -> Vec<String> {
        self.unloads.lock().clone()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPass {
    pub name: String,
    pub sources: Vec<DrawSource>,
    pub translations: Vec<[f32; 3]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedFrame {
    pub number: u64,
    pub clear_colour: Color,
    pub layers: Vec<RecordedPass>,
    pub overlays: Vec<DrawSource>,
}

impl RecordedFrame {
    pub fn layer(&self, name: &str) -> &RecordedPass {
        self.layers
            .iter()
            .find(|pass| pass.name == name)
            .unwrap_or_else(|| panic!("frame {} has no layer {}", self.number, name))
    }
}

/// Keeps a summary of every presented frame.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    pub frames: Arc<Mutex<Vec<RecordedFrame>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> RecordedFrame {
        self.frames.lock().last().cloned().expect("no frame was presented")
    }

    pub fn count(&self) -> usize {
        self.frames.lock().len()
    }
}

impl FrameSink for RecordingSink {
    fn present(&mut self, _ctx: &Context, frame: &Frame) -> anyhow::Result<()> {
        let layers = frame
            .layers
            .iter()
            .map(|pass| RecordedPass {
                name: pass.name.clone(),
                sources: pass.draws.iter().map(|draw| draw.source).collect(),
                translations: pass.draws.iter().map(|draw| draw.instance.translation()).collect(),
            })
            .collect();
        self.frames.lock().push(RecordedFrame {
            number: frame.number,
            clear_colour: frame.clear_colour,
            layers,
            overlays: frame.overlays.iter().map(|draw| draw.source).collect(),
        });
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    Committed { seq: u64, changes: Vec<SceneChange> },
    Aborted { seq: u64, message: String },
}

#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    pub events: Arc<Mutex<Vec<Observed>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Observed> {
        self.events.lock().clone()
    }
}

impl SceneObserver for RecordingObserver {
    fn on_mutation(&mut self, _scene: &Scene, seq: u64, report: &MutationReport) {
        self.events.lock().push(Observed::Committed {
            seq,
            changes: report.changes().to_vec(),
        });
    }

    fn on_mutation_aborted(&mut self, seq: u64, error: &EngineError) {
        self.events.lock().push(Observed::Aborted {
            seq,
            message: error.to_string(),
        });
    }
}

/// Wraps an already constructed flow into a constructor.
pub fn constructor<S: 'static, F: GraphicsFlow<S> + 'static>(flow: F) -> FlowConstructor<S> {
    Box::new(
        move |_init: InitContext| -> Pin<Box<dyn Future<Output = Box<dyn GraphicsFlow<S>>>>> {
            Box::pin(async move { Box::new(flow) as Box<dyn GraphicsFlow<S>> })
        },
    )
}
