//! Step-based animation of a single scene object.
//!
//! An [`AnimationSequence`] is an ordered list of [`Step`]s. Once started on an
//! object (see [`SceneManipulator::start_animation`](crate::mutation::SceneManipulator::start_animation))
//! the engine drives a [`Sequencer`] with the time since engine start on every
//! frame.
//!
//! Timed steps interpolate from the value the object had when the step began to
//! the step's target and end exactly on the target. A step that finishes between
//! two frames hands its surplus time to the next step, so step boundaries stay
//! on the sequence's own timeline no matter how frames are spaced.

use std::fmt;

use cgmath::{Quaternion, Vector3, VectorSpace};
use instant::Duration;

use crate::data_structures::{instance::Instance, scene_graph::SceneObject};

pub type StepCallback = Box<dyn FnMut(&mut SceneObject) + Send>;

pub enum Step {
    Move { to: Vector3<f32>, over: Duration },
    Rotate { to: Quaternion<f32>, over: Duration },
    Scale { to: Vector3<f32>, over: Duration },
    Wait(Duration),
    /// Runs once per pass over the sequence and takes no time.
    Invoke(StepCallback),
}

impl Step {
    fn duration(&self) -> Duration {
        match self {
            Step::Move { over, .. } | Step::Rotate { over, .. } | Step::Scale { over, .. } => *over,
            Step::Wait(duration) => *duration,
            Step::Invoke(_) => Duration::ZERO,
        }
    }

    /// Writes the interpolated value for `t` in `0.0..1.0` into `local`.
    fn interpolate(&self, source: &Instance, local: &mut Instance, t: f32) {
        match self {
            Step::Move { to, .. } => local.position = source.position.lerp(*to, t),
            Step::Rotate { to, .. } => local.rotation = source.rotation.slerp(*to, t),
            Step::Scale { to, .. } => local.scale = source.scale.lerp(*to, t),
            Step::Wait(_) | Step::Invoke(_) => (),
        }
    }

    fn snap(&self, local: &mut Instance) {
        match self {
            Step::Move { to, .. } => local.position = *to,
            Step::Rotate { to, .. } => local.rotation = *to,
            Step::Scale { to, .. } => local.scale = *to,
            Step::Wait(_) | Step::Invoke(_) => (),
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Move { to, over } => f.debug_struct("Move").field("to", to).field("over", over).finish(),
            Step::Rotate { to, over } => f.debug_struct("Rotate").field("to", to).field("over", over).finish(),
            Step::Scale { to, over } => f.debug_struct("Scale").field("to", to).field("over", over).finish(),
            Step::Wait(duration) => f.debug_tuple("Wait").field(duration).finish(),
            Step::Invoke(_) => f.write_str("Invoke(|&mut SceneObject| {...})"),
        }
    }
}

/// Builder for the steps of an animation.
#[derive(Debug, Default)]
pub struct AnimationSequence {
    steps: Vec<Step>,
    looped: bool,
}

impl AnimationSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn move_to(mut self, to: impl Into<Vector3<f32>>, over: Duration) -> Self {
        self.steps.push(Step::Move { to: to.into(), over });
        self
    }

    pub fn rotate_to(mut self, to: Quaternion<f32>, over: Duration) -> Self {
        self.steps.push(Step::Rotate { to, over });
        self
    }

    pub fn scale_to(mut self, to: impl Into<Vector3<f32>>, over: Duration) -> Self {
        self.steps.push(Step::Scale { to: to.into(), over });
        self
    }

    pub fn wait(mut self, duration: Duration) -> Self {
        self.steps.push(Step::Wait(duration));
        self
    }

    pub fn invoke(mut self, callback: impl FnMut(&mut SceneObject) + Send + 'static) -> Self {
        self.steps.push(Step::Invoke(Box::new(callback)));
        self
    }

    /// Replay from the first step after the last one completed.
    pub fn looped(mut self) -> Self {
        self.looped = true;
        self
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn is_looped(&self) -> bool {
        self.looped
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceState {
    /// Started but not ticked yet.
    Idle,
    /// Interpolating step `i`.
    Running(usize),
    /// Inside the wait step `i`.
    Waiting(usize),
    Finished,
}

/// Drives one [`AnimationSequence`] on one object.
pub struct Sequencer {
    sequence: AnimationSequence,
    state: SequenceState,
    /// Time the current step began on the sequence's timeline.
    step_started: Duration,
    cycle_started: Duration,
    source: Instance,
}

impl Sequencer {
    pub fn new(sequence: AnimationSequence) -> Self {
        Self {
            sequence,
            state: SequenceState::Idle,
            step_started: Duration::ZERO,
            cycle_started: Duration::ZERO,
            source: Instance::new(),
        }
    }

    pub fn state(&self) -> SequenceState {
        self.state
    }

    pub fn sequence(&self) -> &AnimationSequence {
        &self.sequence
    }

    /// Advances the animation of `target` to `now` (time since engine start).
    pub fn tick(&mut self, now: Duration, target: &mut SceneObject) {
        let mut index = match self.state {
            SequenceState::Finished => return,
            SequenceState::Idle => {
                if self.sequence.is_empty() {
                    self.state = SequenceState::Finished;
                    return;
                }
                self.step_started = now;
                self.cycle_started = now;
                self.enter(0, target);
                0
            }
            SequenceState::Running(index) | SequenceState::Waiting(index) => index,
        };

        loop {
            let step = &mut self.sequence.steps[index];
            let duration = step.duration();
            let elapsed = now.saturating_sub(self.step_started);
            if let Step::Invoke(callback) = step {
                callback(&mut *target);
            } else if elapsed < duration {
                if !matches!(step, Step::Wait(_)) {
                    let t = elapsed.as_secs_f32() / duration.as_secs_f32();
                    let mut local = target.local_transform().clone();
                    step.interpolate(&self.source, &mut local, t);
                    target.set_local_transform(local);
                }
                return;
            } else {
                let mut local = target.local_transform().clone();
                step.snap(&mut local);
                target.set_local_transform(local);
            }
            self.step_started += duration;

            index += 1;
            if index == self.sequence.steps.len() {
                if !self.sequence.looped {
                    self.state = SequenceState::Finished;
                    return;
                }
                index = 0;
                let idle_cycle = self.step_started == self.cycle_started;
                self.cycle_started = self.step_started;
                if idle_cycle {
                    // a cycle that takes no time would spin forever within this tick
                    self.enter(0, target);
                    return;
                }
            }
            self.enter(index, target);
        }
    }

    fn enter(&mut self, index: usize, target: &SceneObject) {
        self.source = target.local_transform().clone();
        self.state = match self.sequence.steps[index] {
            Step::Wait(_) => SequenceState::Waiting(index),
            _ => SequenceState::Running(index),
        };
    }
}

impl fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequencer")
            .field("steps", &self.sequence.len())
            .field("looped", &self.sequence.looped)
            .field("state", &self.state)
            .finish()
    }
}
