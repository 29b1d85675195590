//! Background compaction cadence.
//!
//! A timer thread wakes at the minor and major intervals, plans a pass and
//! hands its rewrite units to the worker pool. Only one pass runs at a
//! time; a pass that finds the slot busy retries shortly after.

use super::{plan, run_unit, CompactionKind, PoolStats, WorkerPool};
use crate::log::LogShared;
use parking_lot::{Condvar, Mutex};
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const BUSY_RETRY: Duration = Duration::from_secs(1);
const MAX_QUEUED_UNITS: usize = 4096;

/// Ends the pass once the last submitted unit has run or been dropped.
struct UnitGuard(Arc<LogShared>);

impl Drop for UnitGuard {
    fn drop(&mut self) {
        self.0.passes.finish_unit();
    }
}

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    /// Sleep until `deadline`; true if stopped.
    fn wait_until(&self, deadline: Instant) -> bool {
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.cond.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }

    fn stop(&self) {
        *self.stopped.lock() = true;
        self.cond.notify_all();
    }
}

/// Owns the compaction timer thread and worker pool of one log.
pub(crate) struct Compactor {
    pool: Arc<WorkerPool>,
    signal: Arc<StopSignal>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Compactor {
    /// Start the pool and timer for `shared`.
    pub(crate) fn start(shared: Arc<LogShared>) -> io::Result<Self> {
        let pool = Arc::new(WorkerPool::new(
            shared.config.compaction_threads,
            MAX_QUEUED_UNITS,
        )?);
        let signal = Arc::new(StopSignal::default());

        let timer = {
            let pool = Arc::clone(&pool);
            let signal = Arc::clone(&signal);
            std::thread::Builder::new()
                .name(format!("replog-timer-{}", shared.name))
                .spawn(move || timer_loop(&shared, &pool, &signal))
        };
        let timer = match timer {
            Ok(handle) => handle,
            Err(e) => {
                pool.shutdown();
                return Err(e);
            }
        };

        Ok(Compactor {
            pool,
            signal,
            timer: Mutex::new(Some(timer)),
        })
    }

    /// Worker pool metrics
    pub(crate) fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Stop the timer and wait for queued rewrites to finish or cancel.
    pub(crate) fn shutdown(&self) {
        self.signal.stop();
        if let Some(handle) = self.timer.lock().take() {
            let _ = handle.join();
        }
        self.pool.shutdown();
    }
}

impl Drop for Compactor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn timer_loop(shared: &Arc<LogShared>, pool: &WorkerPool, signal: &StopSignal) {
    let minor_interval = shared.config.minor_compaction_interval;
    let major_interval = shared.config.major_compaction_interval;
    let started = Instant::now();
    let mut next_minor = started + minor_interval;
    let mut next_major = started + major_interval;

    loop {
        if signal.wait_until(next_minor.min(next_major)) {
            return;
        }
        let now = Instant::now();
        // Major first so a frequent minor cadence cannot starve it
        if now >= next_major {
            next_major = now + retry_delay(schedule(shared, pool, CompactionKind::Major), major_interval);
        }
        if now >= next_minor {
            next_minor = now + retry_delay(schedule(shared, pool, CompactionKind::Minor), minor_interval);
        }
    }
}

fn retry_delay(scheduled: bool, interval: Duration) -> Duration {
    if scheduled {
        interval
    } else {
        BUSY_RETRY.min(interval)
    }
}

/// Plan a pass and queue its units; false if another pass holds the slot.
fn schedule(shared: &Arc<LogShared>, pool: &WorkerPool, kind: CompactionKind) -> bool {
    if shared.passes.is_cancelled() {
        return true;
    }
    if !shared.passes.try_begin() {
        debug!(target: "replog::compaction", kind = %kind, "Pass busy; retrying");
        return false;
    }

    let units = plan(shared, kind);
    if units.is_empty() {
        shared.passes.end();
        return true;
    }
    debug!(target: "replog::compaction", kind = %kind, units = units.len(), "Scheduling compaction pass");

    shared.passes.set_outstanding(units.len());
    for unit in units {
        let guard = UnitGuard(Arc::clone(shared));
        // A rejected task is dropped with its guard, which counts it finished
        let submitted = pool.submit(kind.priority(), move || run_unit(&guard.0, unit));
        if let Err(e) = submitted {
            warn!(target: "replog::compaction", kind = %kind, error = %e, "Failed to queue rewrite");
        }
    }
    true
}
