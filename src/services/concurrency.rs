//! Concurrency controller.
//!
//! Four admission gates bound the work a process and a mission may do at
//! once:
//!
//! ```text
//! ┌────────────────────────────── process ──────────────────────────────┐
//! │  worker pool (fetch, library search)   search budget (web search)   │
//! │  global model-call budget                                           │
//! │     ┌──────── mission A ────────┐   ┌──────── mission B ────────┐   │
//! │     │ per-mission model budget  │   │ per-mission model budget  │   │
//! │     └───────────────────────────┘   └───────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every slot is held as a [`ConcurrencyToken`]; dropping the token frees the
//! slot, so slots are released on success, error, cancellation, and panic
//! unwinding alike. A model call holds a global token and a mission token,
//! acquired in that order.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::errors::InvocationError;
use crate::domain::models::ConcurrencyLimits;

/// Which admission gate a token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateKind {
    /// Concurrent agent invocations.
    WorkerPool,
    /// Model calls across all missions.
    GlobalModelCalls,
    /// Model calls within one mission.
    MissionModelCalls,
    /// Search and fetch calls.
    SearchCalls,
}

impl GateKind {
    /// Gate name used in logs and errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkerPool => "worker_pool",
            Self::GlobalModelCalls => "global_model_calls",
            Self::MissionModelCalls => "mission_model_calls",
            Self::SearchCalls => "search_calls",
        }
    }
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a gate could not be entered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AcquireError {
    #[error("timed out after {waited:?} waiting for the {gate} gate")]
    Timeout { gate: GateKind, waited: Duration },

    #[error("cancelled while waiting for the {gate} gate")]
    Cancelled { gate: GateKind },

    #[error("the {gate} gate is closed")]
    Closed { gate: GateKind },
}

impl From<AcquireError> for InvocationError {
    fn from(err: AcquireError) -> Self {
        match err {
            AcquireError::Timeout { .. } => Self::Retryable(err.to_string()),
            AcquireError::Cancelled { .. } => Self::Cancelled,
            AcquireError::Closed { .. } => Self::Fatal(err.to_string()),
        }
    }
}

#[derive(Debug, Default)]
struct GateStats {
    acquired: AtomicU64,
    released: AtomicU64,
}

/// One admission gate backed by a semaphore.
#[derive(Debug, Clone)]
pub struct Gate {
    kind: GateKind,
    capacity: usize,
    semaphore: Arc<Semaphore>,
    stats: Arc<GateStats>,
}

impl Gate {
    /// Create a gate. Capacity is floored at 1.
    pub fn new(kind: GateKind, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            kind,
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
            stats: Arc::new(GateStats::default()),
        }
    }

    /// Kind of this gate.
    pub fn kind(&self) -> GateKind {
        self.kind
    }

    /// Total slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots free right now.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots handed out since creation.
    pub fn acquired_count(&self) -> u64 {
        self.stats.acquired.load(Ordering::SeqCst)
    }

    /// Slots returned since creation.
    pub fn released_count(&self) -> u64 {
        self.stats.released.load(Ordering::SeqCst)
    }

    /// Tokens currently held.
    pub fn in_use(&self) -> u64 {
        self.acquired_count() - self.released_count()
    }

    /// Wait for a slot.
    ///
    /// Fails with `Cancelled` when `cancel` fires first (checked before the
    /// slot, so an already-cancelled caller never takes one) and with
    /// `Timeout` when `wait` elapses.
    pub async fn acquire(
        &self,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<ConcurrencyToken, AcquireError> {
        let gate = self.kind;
        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AcquireError::Cancelled { gate }),
            result = tokio::time::timeout(wait, Arc::clone(&self.semaphore).acquire_owned()) => {
                match result {
                    Err(_) => {
                        warn!(gate = %gate, waited_ms = wait.as_millis() as u64, "gate wait timed out");
                        return Err(AcquireError::Timeout { gate, waited: wait });
                    }
                    Ok(Err(_)) => return Err(AcquireError::Closed { gate }),
                    Ok(Ok(permit)) => permit,
                }
            }
        };

        self.stats.acquired.fetch_add(1, Ordering::SeqCst);
        debug!(gate = %gate, available = self.available(), "gate slot acquired");
        Ok(ConcurrencyToken {
            gate,
            permit: Some(permit),
            stats: Arc::clone(&self.stats),
        })
    }

    /// Reject all current and future waiters.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

/// A held slot in one gate. The slot is freed exactly once, when the token is
/// released or dropped.
#[derive(Debug)]
#[must_use = "dropping the token frees the slot immediately"]
pub struct ConcurrencyToken {
    gate: GateKind,
    permit: Option<OwnedSemaphorePermit>,
    stats: Arc<GateStats>,
}

impl ConcurrencyToken {
    /// Gate the slot belongs to.
    pub fn gate(&self) -> GateKind {
        self.gate
    }

    /// Free the slot now. Consumes the token.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for ConcurrencyToken {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            drop(permit);
            self.stats.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Tokens held for one model call.
///
/// Fields drop in declaration order, so the mission slot is freed before the
/// global slot.
#[derive(Debug)]
#[must_use = "dropping the permit frees both slots immediately"]
pub struct ModelCallPermit {
    _mission: ConcurrencyToken,
    _global: ConcurrencyToken,
}

/// Process-wide gates, sized once at startup.
#[derive(Debug, Clone)]
pub struct ConcurrencyController {
    worker: Gate,
    global_model: Gate,
    search: Gate,
}

impl ConcurrencyController {
    /// Process-wide gates sized from `limits`.
    pub fn new(limits: &ConcurrencyLimits) -> Self {
        Self {
            worker: Gate::new(GateKind::WorkerPool, limits.worker_pool_limit),
            global_model: Gate::new(GateKind::GlobalModelCalls, limits.global_model_call_limit),
            search: Gate::new(GateKind::SearchCalls, limits.search_call_limit),
        }
    }

    /// Gate on concurrently running invocations.
    pub fn worker_gate(&self) -> &Gate {
        &self.worker
    }

    /// Gate on model calls across all missions.
    pub fn global_model_gate(&self) -> &Gate {
        &self.global_model
    }

    /// Gate on search and fetch calls.
    pub fn search_gate(&self) -> &Gate {
        &self.search
    }

    /// Gates for one mission: the shared process gates plus a fresh
    /// per-mission model gate sized from the mission's settings.
    pub fn for_mission(&self, limits: &ConcurrencyLimits) -> MissionGates {
        MissionGates {
            process: self.clone(),
            mission_model: Gate::new(
                GateKind::MissionModelCalls,
                limits.per_mission_model_call_limit,
            ),
            wait: limits.gate_wait_timeout(),
        }
    }
}

/// The gates a single mission acquires through.
#[derive(Debug, Clone)]
pub struct MissionGates {
    process: ConcurrencyController,
    mission_model: Gate,
    wait: Duration,
}

impl MissionGates {
    /// Gate on this mission's model calls.
    pub fn mission_model_gate(&self) -> &Gate {
        &self.mission_model
    }

    /// The shared process gates.
    pub fn process(&self) -> &ConcurrencyController {
        &self.process
    }

    /// Global slot first, then the mission slot. If the mission slot cannot be
    /// had, the global slot is given back before returning.
    pub async fn model_call(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ModelCallPermit, AcquireError> {
        let global = self.process.global_model.acquire(self.wait, cancel).await?;
        match self.mission_model.acquire(self.wait, cancel).await {
            Ok(mission) => Ok(ModelCallPermit {
                _mission: mission,
                _global: global,
            }),
            Err(err) => {
                global.release();
                Err(err)
            }
        }
    }

    /// Hold a search slot.
    pub async fn search(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ConcurrencyToken, AcquireError> {
        self.process.search.acquire(self.wait, cancel).await
    }

    /// Hold a worker slot.
    pub async fn worker(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ConcurrencyToken, AcquireError> {
        self.process.worker.acquire(self.wait, cancel).await
    }
}

/// Run an external call under a timeout, abandoning it if `cancel` fires.
///
/// A timeout is classified Retryable.
pub async fn bounded<T, E, F>(
    cancel: &CancellationToken,
    timeout: Duration,
    what: &str,
    call: F,
) -> Result<T, InvocationError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<InvocationError>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(InvocationError::Cancelled),
        result = tokio::time::timeout(timeout, call) => match result {
            Ok(inner) => inner.map_err(Into::into),
            Err(_) => Err(InvocationError::retryable(format!(
                "{what} timed out after {}ms",
                timeout.as_millis()
            ))),
        },
    }
}
