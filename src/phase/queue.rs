//! Tokio-backed single task queue for driving a phase.
//!
//! [`TaskQueue`] is a clonable [`PhaseDriver`]: watch callbacks and timers
//! hold clones and push tasks into one unbounded channel; the owning loop
//! pulls them out one at a time, so reactions are serialized without any
//! lock inside the phase. Sends after the receiver is gone are dropped —
//! once the phase is terminal the driver no longer delivers tasks.

use std::time::Duration;

use tokio::sync::mpsc;

use super::{PhaseDriver, PhaseTask, Transition};
use crate::error::{Error, Result};
use crate::phase::ClosingPhase;

/// Sending half of the task queue. Clonable; hand clones to watch
/// callbacks via the phase driver seam.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<PhaseTask>,
}

/// Receiving half of the task queue, owned by the driving loop.
pub struct TaskReceiver {
    rx: mpsc::UnboundedReceiver<PhaseTask>,
}

impl TaskQueue {
    /// Create a connected queue pair.
    pub fn new() -> (TaskQueue, TaskReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TaskQueue { tx }, TaskReceiver { rx })
    }
}

impl PhaseDriver for TaskQueue {
    fn enqueue(&self, task: PhaseTask) {
        // Receiver gone means the phase is terminal; late tasks are dropped.
        let _ = self.tx.send(task);
    }

    fn schedule(&self, task: PhaseTask, delay: Duration) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(task);
        });
    }
}

impl TaskReceiver {
    /// Wait for the next task. `None` once all senders are gone.
    pub async fn recv(&mut self) -> Option<PhaseTask> {
        self.rx.recv().await
    }
}

/// Drive a closing phase from entry until it requests its terminal
/// transition.
///
/// The caller is still responsible for invoking
/// [`ClosingPhase::on_exit`] afterwards, exactly as the enclosing state
/// machine would when switching phases.
pub async fn run_until_transition(
    phase: &mut ClosingPhase,
    receiver: &mut TaskReceiver,
) -> Result<Transition> {
    if let Some(transition) = phase.on_enter().await? {
        return Ok(transition);
    }
    while let Some(task) = receiver.recv().await {
        if let Some(transition) = phase.on_task(task).await? {
            return Ok(transition);
        }
    }
    Err(Error::QueueClosed)
}
