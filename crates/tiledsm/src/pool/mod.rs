//! Generic "submit task, await result" worker pool.
//!
//! Tasks are closures returning `Result<T, DsmError>`. A task that fails
//! because one of the handles it waited on failed is reported as
//! [`TaskError::DependencyFailed`]; any other error or a panic fails the
//! task itself. Timeouts bound the time spent *waiting* on a task; the
//! worker running it is not interrupted and its late result is dropped.

mod executor;
mod handle;

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use crate::config::PoolConfig;
use crate::error::DsmError;

pub use executor::{Executor, PoolMode, SequentialExecutor, ThreadPoolExecutor};
pub use handle::{TaskError, TaskHandle, TaskState};

pub struct WorkerPool {
    executor: Box<dyn Executor>,
    next_id: AtomicU64,
    broadcasts: AtomicUsize,
    task_timeout: Duration,
}

impl WorkerPool {
    pub fn new(mode: PoolMode, task_timeout: Duration) -> Result<Self, DsmError> {
        Ok(Self::with_executor(mode.build()?, task_timeout))
    }

    /// Parse the mode string first so an unknown mode fails before any
    /// thread is started.
    pub fn from_config(cfg: &PoolConfig) -> Result<Self, DsmError> {
        let mode = PoolMode::parse(&cfg.mode, cfg.workers)?;
        Self::new(mode, Duration::from_secs(cfg.task_timeout_secs))
    }

    pub fn with_executor(executor: Box<dyn Executor>, task_timeout: Duration) -> Self {
        tracing::info!(
            "worker pool: mode={} workers={} task timeout={:.0}s",
            executor.name(),
            executor.workers(),
            task_timeout.as_secs_f64()
        );
        Self {
            executor,
            next_id: AtomicU64::new(0),
            broadcasts: AtomicUsize::new(0),
            task_timeout,
        }
    }

    pub fn task_timeout(&self) -> Duration {
        self.task_timeout
    }

    /// Number of values broadcast so far.
    pub fn broadcast_count(&self) -> usize {
        self.broadcasts.load(Ordering::Relaxed)
    }

    /// Submit a pure task. The returned handle is already `Submitted`.
    pub fn submit<T, F>(&self, label: impl Into<String>, task: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, DsmError> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = TaskHandle::new(id, label.into());
        handle.set_state(TaskState::Submitted);

        let worker_handle = handle.clone();
        self.executor.spawn(Box::new(move || {
            worker_handle.set_state(TaskState::Running);
            let label = worker_handle.label().to_string();
            let outcome = match catch_unwind(AssertUnwindSafe(task)) {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(DsmError::Task(dep))) => Err(TaskError::DependencyFailed {
                    label,
                    dependency: dep.to_string(),
                }),
                Ok(Err(e)) => Err(TaskError::Failed {
                    label,
                    reason: e.to_string(),
                }),
                Err(payload) => Err(TaskError::Panicked {
                    label,
                    message: panic_message(payload.as_ref()),
                }),
            };
            if let Err(e) = &outcome {
                tracing::debug!("{e}");
            }
            worker_handle.complete(outcome);
        }));
        handle
    }

    /// Share a read-only value with every task. Sent once per call; tasks
    /// clone the `Arc`, never the value.
    pub fn broadcast<T: Send + Sync + 'static>(&self, name: &str, value: T) -> Arc<T> {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        tracing::info!("broadcasting {name} to {} workers", self.executor.workers());
        Arc::new(value)
    }

    /// Results in submission order. Each task gets the per-task timeout.
    pub fn await_all<T>(&self, handles: Vec<TaskHandle<T>>) -> Vec<Result<T, TaskError>> {
        handles
            .into_iter()
            .map(|h| h.take(self.task_timeout))
            .collect()
    }

    /// Results in completion order.
    pub fn as_completed<T>(&self, handles: Vec<TaskHandle<T>>) -> AsCompleted<T> {
        let (tx, rx) = crossbeam_channel::unbounded();
        for (index, h) in handles.iter().enumerate() {
            h.subscribe(index, tx.clone());
        }
        AsCompleted {
            remaining: handles.len(),
            handles: handles.into_iter().map(Some).collect(),
            expired: VecDeque::new(),
            rx,
            timeout: self.task_timeout,
        }
    }
}

/// Clone the results of `handles` in order. All of them share one deadline
/// `timeout` from now.
pub fn wait_all<T: Clone>(handles: &[TaskHandle<T>], timeout: Duration) -> Result<Vec<T>, TaskError> {
    let deadline = Instant::now() + timeout;
    handles.iter().map(|h| h.wait_until(deadline, timeout)).collect()
}

/// Iterator over `(handle, result)` pairs as tasks finish.
///
/// When no task finishes within the timeout, every outstanding task is
/// reported as timed out, running tasks first.
pub struct AsCompleted<T> {
    handles: Vec<Option<TaskHandle<T>>>,
    expired: VecDeque<TaskHandle<T>>,
    rx: Receiver<usize>,
    remaining: usize,
    timeout: Duration,
}

impl<T> AsCompleted<T> {
    fn expire_outstanding(&mut self) {
        let mut outstanding: Vec<TaskHandle<T>> = self.handles.iter_mut().filter_map(Option::take).collect();
        // Stable: submission order within each group.
        outstanding.sort_by_key(|h| h.state() != TaskState::Running);
        let running = outstanding.iter().filter(|h| h.state() == TaskState::Running).count();
        tracing::warn!(
            "no task finished within {:.1}s; {} outstanding tasks ({running} running) timed out",
            self.timeout.as_secs_f64(),
            outstanding.len()
        );
        self.remaining = outstanding.len();
        self.expired = outstanding.into();
    }
}

impl<T> Iterator for AsCompleted<T> {
    type Item = (TaskHandle<T>, Result<T, TaskError>);

    fn next(&mut self) -> Option<Self::Item> {
        while self.remaining > 0 {
            if let Some(h) = self.expired.pop_front() {
                self.remaining -= 1;
                let err = TaskError::Timeout {
                    label: h.label().to_string(),
                    seconds: self.timeout.as_secs_f64(),
                };
                return Some((h, Err(err)));
            }
            match self.rx.recv_timeout(self.timeout) {
                Ok(index) => {
                    if let Some(h) = self.handles.get_mut(index).and_then(Option::take) {
                        self.remaining -= 1;
                        let result = h.take(Duration::ZERO);
                        return Some((h, result));
                    }
                }
                Err(_) => self.expire_outstanding(),
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn pools() -> Vec<WorkerPool> {
        vec![
            WorkerPool::new(PoolMode::Sequential, Duration::from_secs(5)).unwrap(),
            WorkerPool::new(PoolMode::Local { workers: 3 }, Duration::from_secs(5)).unwrap(),
        ]
    }

    #[test]
    fn await_all_keeps_submission_order() {
        for pool in pools() {
            let handles: Vec<_> = (0..20u64)
                .map(|k| {
                    pool.submit(format!("sq{k}"), move || {
                        std::thread::sleep(Duration::from_millis((20 - k) % 4));
                        Ok(k * k)
                    })
                })
                .collect();
            let got: Vec<u64> = pool
                .await_all(handles)
                .into_iter()
                .map(|r| r.unwrap())
                .collect();
            assert_eq!(got, (0..20u64).map(|k| k * k).collect::<Vec<_>>());
        }
    }

    #[test]
    fn as_completed_yields_every_task_once() {
        for pool in pools() {
            let handles: Vec<_> = (0..16usize).map(|k| pool.submit(format!("t{k}"), move || Ok(k))).collect();
            let seen: HashSet<usize> = pool
                .as_completed(handles)
                .map(|(h, r)| {
                    assert_eq!(h.state(), TaskState::Completed);
                    r.unwrap()
                })
                .collect();
            assert_eq!(seen, (0..16).collect());
        }
    }

    #[test]
    fn panics_and_errors_become_task_failures() {
        for pool in pools() {
            let boom: TaskHandle<()> = pool.submit("boom", || panic!("kaboom"));
            let bad: TaskHandle<()> =
                pool.submit("bad", || Err(DsmError::Geometry("no model".into())));
            let results = pool.await_all(vec![boom.clone(), bad.clone()]);
            match &results[0] {
                Err(TaskError::Panicked { label, message }) => {
                    assert_eq!(label, "boom");
                    assert!(message.contains("kaboom"));
                }
                other => panic!("unexpected {other:?}"),
            }
            assert!(matches!(&results[1], Err(TaskError::Failed { reason, .. }) if reason.contains("no model")));
            assert_eq!(boom.state(), TaskState::Failed);
            assert_eq!(bad.state(), TaskState::Failed);
        }
    }

    #[test]
    fn dependent_tasks_see_failed_dependencies() {
        for pool in pools() {
            let upstream: TaskHandle<u32> = pool.submit("upstream", || Err(DsmError::Raster("x".into())));
            let timeout = pool.task_timeout();
            let dep = upstream.clone();
            let downstream = pool.submit("downstream", move || Ok(dep.wait(timeout)? + 1));
            match downstream.take(timeout) {
                Err(TaskError::DependencyFailed { label, dependency }) => {
                    assert_eq!(label, "downstream");
                    assert!(dependency.contains("upstream"));
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn blocked_consumers_do_not_starve_producers() {
        let pool = WorkerPool::new(PoolMode::Local { workers: 2 }, Duration::from_secs(10)).unwrap();
        let timeout = pool.task_timeout();
        let producers: Vec<TaskHandle<u64>> = (0..8u64)
            .map(|k| {
                pool.submit(format!("p{k}"), move || {
                    std::thread::sleep(Duration::from_millis(5));
                    Ok(k)
                })
            })
            .collect();
        let consumers: Vec<TaskHandle<u64>> = (0..4)
            .map(|c| {
                let deps = producers.clone();
                pool.submit(format!("c{c}"), move || {
                    let mut sum = 0;
                    for d in &deps {
                        sum += d.wait(timeout)?;
                    }
                    Ok(sum)
                })
            })
            .collect();
        for r in pool.await_all(consumers) {
            assert_eq!(r.unwrap(), 28);
        }
    }

    #[test]
    fn wait_all_shares_one_deadline() {
        // Each dependency finishes 150ms after the previous one, well inside
        // a per-handle budget of 380ms but not inside one shared deadline.
        let deps: Vec<TaskHandle<u32>> = (0..4).map(|k| TaskHandle::new(k, format!("d{k}"))).collect();
        let producer = {
            let deps = deps.clone();
            std::thread::spawn(move || {
                for (k, h) in deps.iter().enumerate() {
                    if k > 0 {
                        std::thread::sleep(Duration::from_millis(150));
                    }
                    h.complete(Ok(k as u32));
                }
            })
        };
        let start = Instant::now();
        let err = wait_all(&deps, Duration::from_millis(380)).expect_err("last one is late");
        let elapsed = start.elapsed();
        assert_eq!(err.label(), "d3");
        assert!(matches!(err, TaskError::Timeout { .. }));
        assert!(elapsed < Duration::from_millis(440), "waited {elapsed:?}");
        producer.join().unwrap();
        assert_eq!(wait_all(&deps, Duration::ZERO), Ok(vec![0, 1, 2, 3]));
    }

    #[test]
    fn as_completed_times_out_every_outstanding_task() {
        let pool = WorkerPool::new(PoolMode::Local { workers: 1 }, Duration::from_millis(150)).unwrap();
        let fast = pool.submit("fast", || Ok(0u32));
        let slow = pool.submit("slow", || {
            std::thread::sleep(Duration::from_millis(600));
            Ok(1u32)
        });
        let queued = pool.submit("queued", || Ok(2u32));
        let results: Vec<_> = pool
            .as_completed(vec![queued, slow, fast])
            .map(|(h, r)| (h.label().to_string(), r))
            .collect();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0], ("fast".to_string(), Ok(0)));
        // The running task is reported before the one that never started.
        let labels: Vec<&str> = results[1..].iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(labels, ["slow", "queued"]);
        for (label, r) in &results[1..] {
            assert!(matches!(r, Err(TaskError::Timeout { label: l, .. }) if l == label));
        }
    }

    #[test]
    fn broadcast_is_counted_once_per_value() {
        let pool = WorkerPool::new(PoolMode::Sequential, Duration::from_secs(1)).unwrap();
        let grid = pool.broadcast("geoid", vec![1.0f32; 1024]);
        let handles: Vec<_> = (0..5)
            .map(|_| {
                let g = Arc::clone(&grid);
                pool.submit("reader", move || Ok(g.len()))
            })
            .collect();
        assert!(pool.await_all(handles).into_iter().all(|r| r == Ok(1024)));
        assert_eq!(pool.broadcast_count(), 1);
    }

    #[test]
    fn unknown_mode_fails_before_pool_exists() {
        let cfg = PoolConfig {
            mode: "pbs_dask".into(),
            ..PoolConfig::default()
        };
        assert!(matches!(
            WorkerPool::from_config(&cfg),
            Err(DsmError::UnsupportedMode(_))
        ));
    }
}
