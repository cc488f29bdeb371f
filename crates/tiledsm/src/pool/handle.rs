use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// Lifecycle of one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Submitted,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_finished(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

/// Failure of a single task. The label names the pair and tile involved.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskError {
    #[error("task {label} failed: {reason}")]
    Failed { label: String, reason: String },
    #[error("task {label} panicked: {message}")]
    Panicked { label: String, message: String },
    #[error("task {label} exceeded its {seconds:.1}s budget")]
    Timeout { label: String, seconds: f64 },
    #[error("task {label} not run: {dependency}")]
    DependencyFailed { label: String, dependency: String },
    #[error("result of task {label} was already consumed")]
    Consumed { label: String },
}

impl TaskError {
    pub fn label(&self) -> &str {
        match self {
            TaskError::Failed { label, .. }
            | TaskError::Panicked { label, .. }
            | TaskError::Timeout { label, .. }
            | TaskError::DependencyFailed { label, .. }
            | TaskError::Consumed { label } => label,
        }
    }
}

struct Slot<T> {
    state: TaskState,
    outcome: Option<Result<T, TaskError>>,
    taken: bool,
    watchers: Vec<(usize, Sender<usize>)>,
}

struct TaskCell<T> {
    id: u64,
    label: String,
    slot: Mutex<Slot<T>>,
    done: Condvar,
}

/// Handle to a submitted task. Cloning shares the same task.
pub struct TaskHandle<T> {
    cell: Arc<TaskCell<T>>,
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.cell.id)
            .field("label", &self.cell.label)
            .field("state", &self.state())
            .finish()
    }
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(id: u64, label: String) -> Self {
        Self {
            cell: Arc::new(TaskCell {
                id,
                label,
                slot: Mutex::new(Slot {
                    state: TaskState::Pending,
                    outcome: None,
                    taken: false,
                    watchers: Vec::new(),
                }),
                done: Condvar::new(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.cell.id
    }

    pub fn label(&self) -> &str {
        &self.cell.label
    }

    pub fn state(&self) -> TaskState {
        self.cell.slot.lock().state
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        let mut slot = self.cell.slot.lock();
        if !slot.state.is_finished() {
            slot.state = state;
        }
    }

    /// Store the outcome and wake every waiter. Later calls are ignored.
    pub(crate) fn complete(&self, outcome: Result<T, TaskError>) {
        let watchers = {
            let mut slot = self.cell.slot.lock();
            if slot.state.is_finished() {
                return;
            }
            slot.state = if outcome.is_ok() {
                TaskState::Completed
            } else {
                TaskState::Failed
            };
            slot.outcome = Some(outcome);
            std::mem::take(&mut slot.watchers)
        };
        self.cell.done.notify_all();
        for (index, tx) in watchers {
            let _ = tx.send(index);
        }
    }

    /// Send `index` on `tx` once the task finishes (immediately if it
    /// already has).
    pub(crate) fn subscribe(&self, index: usize, tx: Sender<usize>) {
        let mut slot = self.cell.slot.lock();
        if slot.state.is_finished() {
            drop(slot);
            let _ = tx.send(index);
        } else {
            slot.watchers.push((index, tx));
        }
    }

    /// Block until the task finishes and clone its result.
    pub fn wait(&self, timeout: Duration) -> Result<T, TaskError>
    where
        T: Clone,
    {
        self.wait_until(Instant::now() + timeout, timeout)
    }

    /// [`Self::wait`] against an absolute deadline; `budget` is the timeout
    /// the deadline was derived from, reported on expiry.
    pub fn wait_until(&self, deadline: Instant, budget: Duration) -> Result<T, TaskError>
    where
        T: Clone,
    {
        let mut slot = self.cell.slot.lock();
        self.block_until_finished(&mut slot, deadline, budget)?;
        match &slot.outcome {
            Some(outcome) => outcome.clone(),
            None => Err(self.consumed()),
        }
    }

    /// Block until the task finishes and move its result out.
    pub fn take(&self, timeout: Duration) -> Result<T, TaskError> {
        let mut slot = self.cell.slot.lock();
        self.block_until_finished(&mut slot, Instant::now() + timeout, timeout)?;
        slot.taken = true;
        slot.outcome.take().unwrap_or_else(|| Err(self.consumed()))
    }

    fn block_until_finished(
        &self,
        slot: &mut parking_lot::MutexGuard<'_, Slot<T>>,
        deadline: Instant,
        budget: Duration,
    ) -> Result<(), TaskError> {
        if slot.taken {
            return Err(self.consumed());
        }
        while !slot.state.is_finished() {
            if self.cell.done.wait_until(slot, deadline).timed_out() && !slot.state.is_finished() {
                return Err(TaskError::Timeout {
                    label: self.cell.label.clone(),
                    seconds: budget.as_secs_f64(),
                });
            }
        }
        Ok(())
    }

    fn consumed(&self) -> TaskError {
        TaskError::Consumed {
            label: self.cell.label.clone(),
        }
    }
}
