//! Compaction worker pool.
//!
//! Rewrite units wait in two FIFO lanes, one per [`TaskPriority`]. A worker
//! always empties the minor lane before taking from the major lane. All
//! bookkeeping lives under a single mutex, so a unit is counted exactly once
//! as queued, then running, then completed.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::error;

/// Priority of a queued compaction task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskPriority {
    /// Segment-merging rewrites
    Major = 0,
    /// Per-segment rewrites
    Minor = 1,
}

/// Error returned when a task cannot be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// The queue is at capacity
    #[error("compaction queue is full")]
    QueueFull,
    /// The pool has been shut down
    #[error("compaction pool is shut down")]
    ShutDown,
}

/// Pool metrics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Tasks waiting in the queue
    pub queue_depth: usize,
    /// Tasks currently running
    pub active_tasks: usize,
    /// Tasks finished since creation
    pub tasks_completed: u64,
    /// Worker threads
    pub worker_count: usize,
}

type Task = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Lanes {
    minor: VecDeque<Task>,
    major: VecDeque<Task>,
    running: usize,
    completed: u64,
    closed: bool,
}

impl Lanes {
    fn depth(&self) -> usize {
        self.minor.len() + self.major.len()
    }

    fn next(&mut self) -> Option<Task> {
        self.minor.pop_front().or_else(|| self.major.pop_front())
    }
}

struct Shared {
    lanes: Mutex<Lanes>,
    ready: Condvar,
    capacity: usize,
}

/// Fixed-size pool running compaction rewrites.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl WorkerPool {
    /// Start `worker_count` threads named `replog-compact-N`. At most
    /// `capacity` tasks may wait at once.
    pub fn new(worker_count: usize, capacity: usize) -> io::Result<Self> {
        let pool = WorkerPool {
            shared: Arc::new(Shared {
                lanes: Mutex::new(Lanes::default()),
                ready: Condvar::new(),
                capacity,
            }),
            workers: Mutex::new(Vec::with_capacity(worker_count)),
            worker_count,
        };
        for n in 0..worker_count {
            let shared = Arc::clone(&pool.shared);
            let spawned = std::thread::Builder::new()
                .name(format!("replog-compact-{}", n))
                .spawn(move || run_worker(&shared));
            match spawned {
                Ok(handle) => pool.workers.lock().push(handle),
                Err(e) => {
                    pool.shutdown();
                    return Err(e);
                }
            }
        }
        Ok(pool)
    }

    /// Queue a task behind others of the same priority.
    pub fn submit(
        &self,
        priority: TaskPriority,
        work: impl FnOnce() + Send + 'static,
    ) -> Result<(), SubmitError> {
        let mut lanes = self.shared.lanes.lock();
        if lanes.closed {
            return Err(SubmitError::ShutDown);
        }
        if lanes.depth() >= self.shared.capacity {
            return Err(SubmitError::QueueFull);
        }
        match priority {
            TaskPriority::Minor => lanes.minor.push_back(Box::new(work)),
            TaskPriority::Major => lanes.major.push_back(Box::new(work)),
        }
        drop(lanes);
        self.shared.ready.notify_one();
        Ok(())
    }

    /// Refuse new tasks, let the workers finish what is queued, and join
    /// them. Safe to call more than once.
    pub fn shutdown(&self) {
        self.shared.lanes.lock().closed = true;
        self.shared.ready.notify_all();
        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
    }

    /// Snapshot of pool metrics
    pub fn stats(&self) -> PoolStats {
        let lanes = self.shared.lanes.lock();
        PoolStats {
            queue_depth: lanes.depth(),
            active_tasks: lanes.running,
            tasks_completed: lanes.completed,
            worker_count: self.worker_count,
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(shared: &Shared) {
    let mut lanes = shared.lanes.lock();
    loop {
        let task = match lanes.next() {
            Some(task) => task,
            None if lanes.closed => return,
            None => {
                shared.ready.wait(&mut lanes);
                continue;
            }
        };
        lanes.running += 1;

        let outcome = parking_lot::MutexGuard::unlocked(&mut lanes, || {
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(task))
        });
        if let Err(panic) = outcome {
            let message = panic
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("(non-string panic)");
            error!(target: "replog::compaction", "compaction task panicked: {}", message);
        }

        lanes.running -= 1;
        lanes.completed += 1;
    }
}
