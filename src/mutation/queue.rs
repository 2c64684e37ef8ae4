use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use futures::channel::mpsc;
use futures_intrusive::channel::shared::{OneshotReceiver, oneshot_channel};
use parking_lot::Mutex;

use super::{MutationReport, SceneManipulator};
use crate::{
    data_structures::scene_graph::Scene,
    error::{EngineError, Result},
};

type Job = Box<dyn FnOnce(&mut Scene) -> Applied + Send>;

struct Queued {
    seq: u64,
    job: Job,
}

/// Sequence numbers are handed out and sent under the same lock, so the
/// channel order always equals the sequence order.
struct Tail {
    next_seq: u64,
    tx: mpsc::UnboundedSender<Queued>,
}

/// Creates a mutation queue.
pub fn channel() -> (MutationSender, MutationReceiver) {
    let (tx, rx) = mpsc::unbounded();
    let tail = Arc::new(Mutex::new(Tail { next_seq: 0, tx }));
    let receiver = MutationReceiver {
        tail: tail.clone(),
        rx,
        held: None,
    };
    (MutationSender { tail }, receiver)
}

/// Submits mutations from any thread.
#[derive(Clone)]
pub struct MutationSender {
    tail: Arc<Mutex<Tail>>,
}

impl MutationSender {
    /// Queues `mutation` to run before the next frame.
    pub fn submit<F>(&self, mutation: F) -> MutationTicket<()>
    where
        F: FnOnce(&mut SceneManipulator<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        self.submit_with(mutation)
    }

    /// Queues `mutation` and hands its return value to the ticket.
    pub fn submit_with<T, F>(&self, mutation: F) -> MutationTicket<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SceneManipulator<'_>) -> anyhow::Result<T> + Send + 'static,
    {
        let (done, receiver) = oneshot_channel();
        let mut tail = self.tail.lock();
        let seq = tail.next_seq;
        tail.next_seq += 1;
        let job: Job = Box::new(move |scene: &mut Scene| {
            let (applied, outcome) = match transaction(scene, mutation) {
                Ok((value, report)) => (
                    Applied::Committed {
                        seq,
                        report: report.clone(),
                    },
                    Ok((value, report)),
                ),
                Err(abort) => (
                    Applied::Aborted {
                        seq,
                        error: abort.to_error(seq),
                    },
                    Err(abort.to_error(seq)),
                ),
            };
            if done.send(outcome).is_err() {
                log::debug!("Nobody waits for mutation #{}", seq);
            }
            applied
        });
        if tail.tx.unbounded_send(Queued { seq, job }).is_err() {
            // dropping the job drops `done`, which resolves the ticket as closed
            log::warn!("Mutation #{} was submitted after the queue closed", seq);
        }
        MutationTicket { seq, receiver }
    }

    pub fn is_closed(&self) -> bool {
        self.tail.lock().tx.is_closed()
    }
}

impl fmt::Debug for MutationSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tail = self.tail.lock();
        f.debug_struct("MutationSender")
            .field("next_seq", &tail.next_seq)
            .field("closed", &tail.tx.is_closed())
            .finish()
    }
}

/// Completion signal of one submitted mutation.
///
/// Resolves once the render thread ran the mutation, or with
/// [`EngineError::QueueClosed`] if it never will.
pub struct MutationTicket<T: 'static> {
    seq: u64,
    receiver: OneshotReceiver<Result<(T, MutationReport)>>,
}

impl<T: 'static> MutationTicket<T> {
    /// Position of the mutation in submission order.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub async fn wait(self) -> Result<(T, MutationReport)> {
        self.receiver
            .receive()
            .await
            .unwrap_or_else(|| Err(EngineError::QueueClosed))
    }

    /// Blocks the current thread until the mutation ran.
    ///
    /// Never call this on the thread that renders frames: it would wait for itself.
    pub fn wait_blocking(self) -> Result<(T, MutationReport)> {
        futures::executor::block_on(self.wait())
    }
}

impl<T: 'static> fmt::Debug for MutationTicket<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationTicket").field("seq", &self.seq).finish()
    }
}

/// What happened to one mutation during a drain.
#[derive(Debug)]
pub enum Applied {
    Committed { seq: u64, report: MutationReport },
    Aborted { seq: u64, error: EngineError },
}

impl Applied {
    pub fn seq(&self) -> u64 {
        match self {
            Applied::Committed { seq, .. } | Applied::Aborted { seq, .. } => *seq,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Applied::Committed { .. })
    }
}

/// The render thread's end of the queue.
pub struct MutationReceiver {
    tail: Arc<Mutex<Tail>>,
    rx: mpsc::UnboundedReceiver<Queued>,
    /// First mutation of the next drain, pulled out of the channel too early.
    held: Option<Queued>,
}

impl MutationReceiver {
    pub fn sender(&self) -> MutationSender {
        MutationSender {
            tail: self.tail.clone(),
        }
    }

    /// Runs every mutation submitted before the call, in order.
    ///
    /// Mutations submitted while the drain is running (including from inside a
    /// mutation) wait for the next call.
    pub fn apply_pending(&mut self, scene: &mut Scene) -> Vec<Applied> {
        let mut applied = Vec::new();
        self.drain(scene, |_, outcome| applied.push(outcome));
        applied
    }

    /// Like [`apply_pending`](Self::apply_pending), but hands every outcome to
    /// `on_applied` right after its mutation ran, together with the scene as
    /// that mutation left it. Returns the number of mutations that ran.
    pub fn drain<F>(&mut self, scene: &mut Scene, mut on_applied: F) -> usize
    where
        F: FnMut(&Scene, Applied),
    {
        let cutoff = self.tail.lock().next_seq;
        let mut count = 0;
        loop {
            let queued = match self.held.take() {
                Some(queued) => queued,
                None => match self.rx.try_recv() {
                    Ok(queued) => queued,
                    // empty or closed
                    Err(_) => break,
                },
            };
            if queued.seq >= cutoff {
                self.held = Some(queued);
                break;
            }
            let outcome = (queued.job)(scene);
            on_applied(scene, outcome);
            count += 1;
        }
        count
    }

    /// Stops accepting mutations and drops the ones still queued.
    ///
    /// Tickets of dropped mutations resolve with [`EngineError::QueueClosed`].
    /// Returns the number of dropped mutations.
    pub fn close(&mut self) -> usize {
        self.rx.close();
        let mut dropped = usize::from(self.held.take().is_some());
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            log::warn!("Dropped {} mutation(s) that never ran", dropped);
        }
        dropped
    }
}

impl Drop for MutationReceiver {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for MutationReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationReceiver")
            .field("next_seq", &self.tail.lock().next_seq)
            .field("held", &self.held.as_ref().map(|queued| queued.seq))
            .finish()
    }
}

enum Abort {
    Failed(String),
    Panicked(String),
}

impl Abort {
    fn to_error(&self, seq: u64) -> EngineError {
        match self {
            Abort::Failed(reason) => EngineError::MutationFailed {
                seq,
                reason: reason.clone(),
            },
            Abort::Panicked(reason) => EngineError::MutationPanicked {
                seq,
                reason: reason.clone(),
            },
        }
    }
}

fn transaction<T, F>(scene: &mut Scene, mutation: F) -> std::result::Result<(T, MutationReport), Abort>
where
    F: FnOnce(&mut SceneManipulator<'_>) -> anyhow::Result<T>,
{
    let mut manipulator = SceneManipulator::new(scene);
    match panic::catch_unwind(AssertUnwindSafe(|| mutation(&mut manipulator))) {
        Ok(Ok(value)) => Ok((value, manipulator.commit())),
        Ok(Err(e)) => {
            manipulator.rollback();
            Err(Abort::Failed(format!("{:#}", e)))
        }
        Err(payload) => {
            manipulator.rollback();
            Err(Abort::Panicked(panic_message(payload.as_ref())))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
