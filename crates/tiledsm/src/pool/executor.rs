use std::str::FromStr;

use crate::error::DsmError;

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Backend that runs jobs. The pool never branches on which one is active.
pub trait Executor: Send + Sync {
    fn name(&self) -> &'static str;
    fn workers(&self) -> usize;
    fn spawn(&self, job: Box<dyn FnOnce() + Send + 'static>);
}

/// Worker-pool backend selected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolMode {
    /// Run every job in the submitting thread.
    Sequential,
    /// Rayon thread pool with the given number of workers.
    Local { workers: usize },
}

impl PoolMode {
    pub fn parse(mode: &str, workers: usize) -> Result<Self, DsmError> {
        match mode.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(PoolMode::Sequential),
            "local" => Ok(PoolMode::Local {
                workers: workers.max(1),
            }),
            _ => Err(DsmError::UnsupportedMode(mode.to_string())),
        }
    }

    pub(crate) fn build(self) -> Result<Box<dyn Executor>, DsmError> {
        match self {
            PoolMode::Sequential => Ok(Box::new(SequentialExecutor)),
            PoolMode::Local { workers } => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .thread_name(|i| format!("tiledsm-worker-{i}"))
                    .build()
                    .map_err(|e| DsmError::WorkerPool(e.to_string()))?;
                Ok(Box::new(ThreadPoolExecutor { pool, workers }))
            }
        }
    }
}

impl FromStr for PoolMode {
    type Err = DsmError;

    /// Parses the mode name with a single worker for `local`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PoolMode::parse(s, 1)
    }
}

pub struct SequentialExecutor;

impl Executor for SequentialExecutor {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn workers(&self) -> usize {
        1
    }

    fn spawn(&self, job: Job) {
        job();
    }
}

/// FIFO rayon pool: jobs start in submission order, so every job submitted
/// before a blocking job has already been picked up by a worker.
pub struct ThreadPoolExecutor {
    pool: rayon::ThreadPool,
    workers: usize,
}

impl Executor for ThreadPoolExecutor {
    fn name(&self) -> &'static str {
        "local"
    }

    fn workers(&self) -> usize {
        self.workers
    }

    fn spawn(&self, job: Job) {
        self.pool.spawn_fifo(job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_modes() {
        assert_eq!(PoolMode::parse("sequential", 8).unwrap(), PoolMode::Sequential);
        assert_eq!(
            PoolMode::parse(" Local ", 3).unwrap(),
            PoolMode::Local { workers: 3 }
        );
        assert_eq!(
            "local".parse::<PoolMode>().unwrap(),
            PoolMode::Local { workers: 1 }
        );
    }

    #[test]
    fn unknown_mode_is_rejected() {
        for mode in ["pbs_dask", "mp", ""] {
            match PoolMode::parse(mode, 4) {
                Err(DsmError::UnsupportedMode(m)) => assert_eq!(m, mode),
                other => panic!("expected UnsupportedMode, got {other:?}"),
            }
        }
    }
}
