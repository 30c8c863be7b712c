//! Bounded pool for background post-processing (buffer compression).
//!
//! The traversal thread spawns tasks and, before touching arena metadata,
//! blocks in [`BackgroundTasks::wait_until_quiescent`] until every task
//! spawned so far has finished.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::engine_error::EngineError;

#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

/// Decrements the in-flight counter when dropped, including on panic.
struct Completion(Arc<InFlight>);

impl Drop for Completion {
    fn drop(&mut self) {
        let mut count = self.0.count.lock();
        *count -= 1;
        if *count == 0 {
            self.0.idle.notify_all();
        }
    }
}

pub struct BackgroundTasks {
    pool: Option<rayon::ThreadPool>,
    in_flight: Arc<InFlight>,
}

impl BackgroundTasks {
    /// Pool with `threads` workers; `0` runs every task inline on the caller.
    pub fn new(threads: usize) -> Result<Self, EngineError> {
        let pool = if threads == 0 {
            None
        } else {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("amr-background-{i}"))
                    .build()
                    .map_err(|e| EngineError::TaskPool(e.to_string()))?,
            )
        };
        Ok(Self {
            pool,
            in_flight: Arc::new(InFlight::default()),
        })
    }

    /// Tasks run synchronously inside [`spawn`](Self::spawn).
    pub fn inline() -> Self {
        Self {
            pool: None,
            in_flight: Arc::new(InFlight::default()),
        }
    }

    pub fn threads(&self) -> usize {
        self.pool.as_ref().map_or(0, |p| p.current_num_threads())
    }

    pub fn spawn<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.in_flight.count.lock() += 1;
        let done = Completion(Arc::clone(&self.in_flight));
        match &self.pool {
            Some(pool) => pool.spawn(move || {
                let _done = done;
                task();
            }),
            None => {
                let _done = done;
                task();
            }
        }
    }

    /// Number of spawned tasks that have not finished yet.
    pub fn in_flight(&self) -> usize {
        *self.in_flight.count.lock()
    }

    /// Block until no spawned task is running or queued.
    pub fn wait_until_quiescent(&self) {
        let mut count = self.in_flight.count.lock();
        while *count > 0 {
            self.in_flight.idle.wait(&mut count);
        }
    }
}

impl std::fmt::Debug for BackgroundTasks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTasks")
            .field("threads", &self.threads())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
