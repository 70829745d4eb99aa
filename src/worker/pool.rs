//! Worker pool with exclusive checkout.
//!
//! Holds a fixed number of slots, each owning at most one [`WorkerHandle`].
//! A slot is either idle in the pool or checked out inside exactly one
//! [`WorkerLease`]; the semaphore has one permit per slot, so a permit holder
//! always finds an idle slot.

use super::handle::{LivePid, WorkerHandle, WorkerState};
use super::protocol::{Document, ExtractRequest};
use super::spawn::WorkerCommand;
use crate::error::{ArticleError, Result};
use nix::sys::signal::Signal;
use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// Default restart budget per slot.
pub const DEFAULT_MAX_RESTART_ATTEMPTS: usize = 3;

/// Pool size when none is configured: one worker per available core.
pub fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Configuration for the worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Number of worker processes.
    pub size: usize,
    /// How many times a slot may be replaced before it is treated as degraded.
    pub max_restart_attempts: usize,
    /// How each worker is launched.
    pub command: WorkerCommand,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
            max_restart_attempts: DEFAULT_MAX_RESTART_ATTEMPTS,
            command: WorkerCommand::default(),
        }
    }
}

/// One position in the pool. Restart state travels with the handle.
struct Slot {
    id: usize,
    handle: Option<WorkerHandle>,
    /// A launch has been attempted here; later launches are replacements.
    launched: bool,
    restarts: usize,
    jobs_completed: usize,
}

impl Slot {
    fn new(id: usize) -> Self {
        Self {
            id,
            handle: None,
            launched: false,
            restarts: 0,
            jobs_completed: 0,
        }
    }

    fn is_live(&mut self) -> bool {
        self.handle.as_mut().is_some_and(WorkerHandle::is_running)
    }

    fn spawn(&mut self, command: &WorkerCommand) -> Result<()> {
        self.launched = true;
        let mut handle = WorkerHandle::new(self.id, self.restarts, command.clone());
        handle.start()?;
        self.handle = Some(handle);
        Ok(())
    }

    fn stats(&mut self, in_flight: bool) -> SlotStats {
        SlotStats {
            id: self.id,
            restarts: self.restarts,
            jobs_completed: self.jobs_completed,
            pid: self.handle.as_ref().and_then(WorkerHandle::pid),
            running: in_flight || self.is_live(),
            in_flight,
        }
    }

    fn live_pid(&self) -> LivePid {
        self.handle
            .as_ref()
            .map(WorkerHandle::live_pid)
            .unwrap_or_default()
    }
}

/// What the pool still knows about a checked-out slot.
struct InFlight {
    stats: SlotStats,
    live: LivePid,
}

struct PoolState {
    idle: VecDeque<Slot>,
    /// Every checked-out slot, keyed by slot id.
    in_flight: HashMap<usize, InFlight>,
    initialized: bool,
    closed: bool,
}

impl PoolState {
    fn check_in(&mut self, slot: Slot) {
        self.in_flight.remove(&slot.id);
        self.idle.push_back(slot);
    }
}

fn lock(state: &Mutex<PoolState>) -> MutexGuard<'_, PoolState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A fixed-size pool of worker subprocesses.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    state: Arc<Mutex<PoolState>>,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    /// Create a pool of `config.size` unstarted slots.
    ///
    /// Nothing is spawned until [`initialize`](Self::initialize) or the first
    /// [`acquire`](Self::acquire).
    pub fn new(config: WorkerPoolConfig) -> Self {
        let size = config.size.max(1);
        let state = PoolState {
            idle: (0..size).map(Slot::new).collect(),
            in_flight: HashMap::with_capacity(size),
            initialized: false,
            closed: false,
        };
        Self {
            config: WorkerPoolConfig { size, ..config },
            state: Arc::new(Mutex::new(state)),
            permits: Arc::new(Semaphore::new(size)),
        }
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Number of slots in the pool.
    pub fn size(&self) -> usize {
        self.config.size
    }

    pub fn is_initialized(&self) -> bool {
        lock(&self.state).initialized
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Start a worker in every slot.
    ///
    /// If any worker fails to spawn, the ones already started are stopped,
    /// the pool stays uninitialized and the spawn error is returned.
    /// Calling this on an initialized pool does nothing.
    pub async fn initialize(&self) -> Result<()> {
        info!(
            workers = self.config.size,
            program = %self.config.command.program,
            max_restart_attempts = self.config.max_restart_attempts,
            "Initializing worker pool"
        );

        // Holding every permit means every slot is idle and nobody else can
        // check one out while we work on them.
        let permits = self
            .permits
            .clone()
            .acquire_many_owned(self.config.size as u32)
            .await
            .map_err(|_| ArticleError::PoolClosed)?;

        let mut slots: Vec<Slot> = {
            let mut state = lock(&self.state);
            if state.closed {
                return Err(ArticleError::PoolClosed);
            }
            if state.initialized {
                return Ok(());
            }
            state.idle.drain(..).collect()
        };

        let mut failure = None;
        let mut launched_here = Vec::new();
        for (index, slot) in slots.iter_mut().enumerate() {
            if slot.is_live() {
                continue;
            }
            if let Err(e) = slot.spawn(&self.config.command) {
                failure = Some(e);
                break;
            }
            launched_here.push(index);
        }

        // Workers torn down here were never used, so their next launch is
        // not a replacement either.
        let started: Vec<WorkerHandle> = match failure {
            Some(_) => launched_here
                .into_iter()
                .filter_map(|index| {
                    let slot = &mut slots[index];
                    slot.launched = false;
                    slot.handle.take()
                })
                .collect(),
            None => Vec::new(),
        };

        {
            let mut state = lock(&self.state);
            state.idle.extend(slots);
            state.initialized = failure.is_none();
        }
        drop(permits);

        match failure {
            Some(e) => {
                warn!(error = %e, "Worker pool failed to initialize, stopping started workers");
                for mut handle in started {
                    if let Err(stop_err) = handle.stop().await {
                        warn!(worker_id = handle.id(), error = %stop_err, "Failed to stop worker");
                    }
                }
                Err(e)
            }
            None => {
                info!(workers = self.config.size, "All workers ready");
                Ok(())
            }
        }
    }

    /// Check out a worker for exclusive use, waiting while all are busy.
    ///
    /// A slot without a live process is launched here. Its first launch is
    /// free; relaunching a dead worker counts against the restart budget.
    /// Fails with `PoolDegraded` when the only slot on offer has exhausted
    /// that budget, and with `PoolClosed` after shutdown.
    pub async fn acquire(&self) -> Result<WorkerLease> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ArticleError::PoolClosed)?;

        // One critical section, so shutdown sees the slot either idle or in
        // flight and never in between.
        let slot = {
            let mut state = lock(&self.state);
            if state.closed {
                return Err(ArticleError::PoolClosed);
            }
            let index = state.idle.iter_mut().position(Slot::is_live).unwrap_or(0);
            let mut slot = state.idle.remove(index).ok_or(ArticleError::PoolClosed)?;

            if !slot.is_live()
                && let Err(e) = self.revive(&mut slot)
            {
                state.check_in(slot);
                return Err(e);
            }

            let stats = slot.stats(true);
            debug!(
                slot = slot.id,
                pid = stats.pid.unwrap_or_default(),
                "Worker checked out"
            );
            let live = slot.live_pid();
            state.in_flight.insert(slot.id, InFlight { stats, live });
            slot
        };

        Ok(WorkerLease {
            slot: Some(slot),
            state: Arc::clone(&self.state),
            _permit: permit,
        })
    }

    /// Launch a worker in a slot without a live one.
    ///
    /// Only relaunches are charged to the restart budget.
    fn revive(&self, slot: &mut Slot) -> Result<()> {
        // A dead handle still owns its reaped or dying process; drop it.
        slot.handle = None;
        if !slot.launched {
            slot.spawn(&self.config.command)?;
            debug!(slot = slot.id, "Launched worker on demand");
            return Ok(());
        }
        if slot.restarts >= self.config.max_restart_attempts {
            warn!(
                slot = slot.id,
                restarts = slot.restarts,
                "Worker slot degraded, not respawning"
            );
            return Err(ArticleError::PoolDegraded {
                slot: slot.id,
                restarts: slot.restarts,
            });
        }
        slot.restarts += 1;
        slot.spawn(&self.config.command)?;
        info!(slot = slot.id, restarts = slot.restarts, "Respawned worker");
        Ok(())
    }

    /// Return a worker to the pool.
    ///
    /// A healthy worker goes straight back. An unhealthy one is stopped and
    /// replaced by a fresh process; once the slot has used its restart budget
    /// it is returned empty and `PoolDegraded` is reported instead. The slot
    /// itself always goes back into circulation.
    pub async fn release(&self, mut lease: WorkerLease, healthy: bool) -> Result<()> {
        let Some(slot) = lease.slot.as_mut() else {
            return Ok(());
        };
        let id = slot.id;

        // Never trust a handle that is no longer running, whatever the caller says
        let healthy = healthy
            && slot
                .handle
                .as_ref()
                .is_some_and(|h| h.state() == WorkerState::Running);

        if healthy {
            let mut state = lock(&self.state);
            if !state.closed {
                if let Some(mut slot) = lease.slot.take() {
                    slot.jobs_completed += 1;
                    state.check_in(slot);
                }
                return Ok(());
            }
        }

        let handle = lease.slot.as_mut().and_then(|s| s.handle.take());
        if let Some(mut handle) = handle
            && let Err(e) = handle.stop().await
        {
            warn!(slot = id, error = %e, "Failed to stop worker");
        }

        let Some(mut slot) = lease.slot.take() else {
            return Ok(());
        };

        // Shutdown may have run while the old worker was stopping; decide
        // and check in under one lock so a closed pool never gets a new one.
        let mut state = lock(&self.state);
        let outcome = if state.closed {
            Ok(())
        } else if slot.restarts >= self.config.max_restart_attempts {
            warn!(
                slot = id,
                restarts = slot.restarts,
                "Worker slot exhausted its restart budget"
            );
            Err(ArticleError::PoolDegraded {
                slot: id,
                restarts: slot.restarts,
            })
        } else {
            slot.restarts += 1;
            match slot.spawn(&self.config.command) {
                Ok(()) => {
                    info!(slot = id, restarts = slot.restarts, "Replaced worker");
                    Ok(())
                }
                Err(e) => {
                    warn!(slot = id, error = %e, "Failed to replace worker");
                    Err(e)
                }
            }
        };
        state.check_in(slot);
        outcome
    }

    /// Stop every worker and refuse further checkouts.
    ///
    /// Idle workers are stopped here. Checked-out workers get SIGTERM, which
    /// ends their exchange; their leases stop them on release.
    pub async fn shutdown(&self) {
        self.permits.close();

        let (handles, busy): (Vec<WorkerHandle>, Vec<LivePid>) = {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            state.closed = true;
            let handles = state
                .idle
                .iter_mut()
                .filter_map(|slot| slot.handle.take())
                .collect();
            let busy = state.in_flight.values().map(|f| f.live.clone()).collect();
            (handles, busy)
        };

        let signalled = busy
            .iter()
            .filter(|live| live.signal(Signal::SIGTERM))
            .count();
        for mut handle in handles {
            if let Err(e) = handle.stop().await {
                warn!(worker_id = handle.id(), error = %e, "Failed to stop worker");
            }
        }

        info!(in_flight = busy.len(), signalled, "Worker pool shut down");
    }

    /// Get statistics about the worker pool.
    pub fn stats(&self) -> WorkerPoolStats {
        let mut state = lock(&self.state);
        let mut slots: Vec<SlotStats> = state.idle.iter_mut().map(|s| s.stats(false)).collect();
        slots.extend(state.in_flight.values().map(|f| f.stats.clone()));
        slots.sort_by_key(|s| s.id);

        WorkerPoolStats {
            worker_count: self.config.size,
            idle: state.idle.len(),
            in_flight: state.in_flight.len(),
            total_jobs_completed: slots.iter().map(|s| s.jobs_completed).sum(),
            total_restarts: slots.iter().map(|s| s.restarts).sum(),
            slots,
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("available", &self.permits.available_permits())
            .finish()
    }
}

/// Exclusive checkout of one pooled worker.
///
/// Hand it back with [`WorkerPool::release`]. A lease dropped without
/// release (for example because the caller was cancelled mid-exchange) puts
/// its slot back with the worker discarded, so pool capacity is never lost.
pub struct WorkerLease {
    slot: Option<Slot>,
    state: Arc<Mutex<PoolState>>,
    _permit: OwnedSemaphorePermit,
}

impl WorkerLease {
    /// Slot the worker belongs to.
    pub fn slot_id(&self) -> usize {
        self.slot.as_ref().map_or(usize::MAX, |s| s.id)
    }

    /// Process ID of the leased worker.
    pub fn pid(&self) -> Option<u32> {
        self.slot
            .as_ref()
            .and_then(|s| s.handle.as_ref())
            .and_then(WorkerHandle::pid)
    }

    /// Restarts the slot has gone through so far.
    pub fn restarts(&self) -> usize {
        self.slot.as_ref().map_or(0, |s| s.restarts)
    }

    /// Run one request/response exchange on the leased worker.
    pub async fn exchange(
        &mut self,
        request: &ExtractRequest,
        deadline: Duration,
    ) -> Result<Document> {
        let worker_id = self.slot_id();
        let handle = self
            .slot
            .as_mut()
            .and_then(|s| s.handle.as_mut())
            .ok_or(ArticleError::NotRunning { worker_id })?;
        handle.exchange(request, deadline).await
    }

    fn check_in(&mut self) {
        if let Some(slot) = self.slot.take() {
            lock(&self.state).check_in(slot);
        }
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.as_mut()
            && slot.handle.take().is_some()
        {
            warn!(
                slot = slot.id,
                "Worker lease dropped without release, discarding worker"
            );
        }
        // The slot is back in the idle queue before the permit is released.
        self.check_in();
    }
}

impl std::fmt::Debug for WorkerLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerLease")
            .field("slot", &self.slot_id())
            .field("pid", &self.pid())
            .finish()
    }
}

/// Statistics about one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotStats {
    pub id: usize,
    /// Times this slot's worker has been replaced.
    pub restarts: usize,
    pub jobs_completed: usize,
    pub pid: Option<u32>,
    pub running: bool,
    pub in_flight: bool,
}

/// Statistics about the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolStats {
    /// Number of slots in the pool.
    pub worker_count: usize,
    pub idle: usize,
    pub in_flight: usize,
    /// Total jobs completed by all workers.
    pub total_jobs_completed: usize,
    /// Total number of worker restarts.
    pub total_restarts: usize,
    pub slots: Vec<SlotStats>,
}
