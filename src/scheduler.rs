//! The scheduler registry (§4.7): durable references to deferred
//! invocations per task/work item, cancelled proactively on state change.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::EngineResult;
use crate::ids::{TaskInstanceKey, TraceId, WorkItemId, WorkflowId};

/// Who a scheduled invocation belongs to — used to cancel every pending
/// invocation for an owner on terminal transition (§4.7).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScheduleOwner {
    Task(TaskInstanceKey),
    WorkItem(WorkItemId),
    Trace { trace_id: TraceId },
}

/// The deferred work itself. `Custom` covers user-scheduled follow-ups
/// (spec.md §5: "user code may schedule its own"); `FlushTrace` and
/// `ComputeSnapshot` are the two invocations the engine schedules itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScheduledInvocation {
    FlushTrace { trace_id: TraceId },
    ComputeSnapshot { workflow_id: WorkflowId, trace_id: TraceId, at: chrono::DateTime<chrono::Utc> },
    Custom { function_ref: String, args: serde_json::Value },
}

/// A handle returned by [`Scheduler::schedule_after`]; opaque to callers,
/// used only to cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScheduleHandle(u64);

/// Receives invocations when their delay elapses. The engine implements
/// this once and wires it to the scheduler after construction, because the
/// scheduler and the tracer/engine are mutually referential (DESIGN NOTES:
/// cyclic references resolved through a central registry, here a
/// `Dispatcher` set post-construction rather than a raw back-pointer).
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, invocation: ScheduledInvocation);
}

#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn schedule_after(
        &self,
        owner: ScheduleOwner,
        delay: Duration,
        invocation: ScheduledInvocation,
    ) -> EngineResult<ScheduleHandle>;

    /// Cancels every invocation still pending for `owner` (§4.7, §5
    /// "explicitly cancelled by the scheduler registry on owner
    /// termination").
    async fn cancel_owner(&self, owner: &ScheduleOwner);

    async fn cancel(&self, owner: &ScheduleOwner, handle: ScheduleHandle);
}

struct Entry {
    handle: ScheduleHandle,
    join: JoinHandle<()>,
}

/// In-memory scheduler backed by `tokio::time::sleep`. Matches the
/// teacher's `CancellationRegistry` shape (`Mutex`-guarded map keyed by
/// owner, cancellation by dropping/aborting the underlying task) from
/// `cancellation.rs`, generalised from task-cancellation flags to
/// arbitrary deferred invocations.
pub struct InMemoryScheduler {
    next_id: std::sync::atomic::AtomicU64,
    entries: Mutex<HashMap<ScheduleOwner, Vec<Entry>>>,
    dispatcher: OnceLock<Arc<dyn Dispatcher>>,
}

impl InMemoryScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: std::sync::atomic::AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
            dispatcher: OnceLock::new(),
        })
    }

    /// Two-phase init: the dispatcher (usually the engine's tracer/snapshot
    /// wiring) is constructed *after* the scheduler since it may itself
    /// hold an `Arc<dyn Scheduler>`.
    pub fn set_dispatcher(&self, dispatcher: Arc<dyn Dispatcher>) {
        let _ = self.dispatcher.set(dispatcher);
    }
}

impl Default for InMemoryScheduler {
    fn default() -> Self {
        Self {
            next_id: std::sync::atomic::AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
            dispatcher: OnceLock::new(),
        }
    }
}

#[async_trait]
impl Scheduler for InMemoryScheduler {
    async fn schedule_after(
        &self,
        owner: ScheduleOwner,
        delay: Duration,
        invocation: ScheduledInvocation,
    ) -> EngineResult<ScheduleHandle> {
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let handle = ScheduleHandle(id);
        let dispatcher = self.dispatcher.get().cloned();
        let join = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Some(dispatcher) = dispatcher {
                dispatcher.dispatch(invocation).await;
            }
        });
        self.entries.lock().await.entry(owner).or_default().push(Entry { handle, join });
        Ok(handle)
    }

    async fn cancel_owner(&self, owner: &ScheduleOwner) {
        if let Some(entries) = self.entries.lock().await.remove(owner) {
            for entry in entries {
                entry.join.abort();
            }
        }
    }

    async fn cancel(&self, owner: &ScheduleOwner, handle: ScheduleHandle) {
        let mut guard = self.entries.lock().await;
        if let Some(entries) = guard.get_mut(owner) {
            if let Some(pos) = entries.iter().position(|e| e.handle == handle) {
                let entry = entries.remove(pos);
                entry.join.abort();
            }
        }
    }
}
