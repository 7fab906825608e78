//! # Task Runner
//!
//! Single-slot background lane. One dedicated worker thread executes
//! submitted [`IngestTask`]s in order; at most one [`RunHandle`] is live at
//! a time and a second submission is refused instead of replacing it.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, unbounded};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::task::{IngestResult, IngestTask};

static LANE_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunnerError {
    #[error("run {0} is still in flight")]
    TaskAlreadyRunning(u64),
    #[error("cancellation was requested; reset before submitting again")]
    CancelPending,
    #[error("worker lane has shut down")]
    Shutdown,
}

/// The in-flight identity of one submitted task.
#[derive(Debug, Clone)]
pub struct RunHandle {
    id: u64,
    cancel: CancelToken,
}

impl RunHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Debug, Default)]
struct Slot {
    live: Option<RunHandle>,
    cancel_pending: bool,
    next_id: u64,
}

struct Job {
    id: u64,
    task: IngestTask,
    cancel: CancelToken,
}

pub struct TaskRunner {
    slot: Arc<Mutex<Slot>>,
    tx: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner")
            .field("slot", &*lock(&self.slot))
            .field(
                "worker",
                &self.worker.as_ref().and_then(|w| w.thread().name().map(str::to_string)),
            )
            .finish()
    }
}

impl TaskRunner {
    /// Spawn the worker thread, named `<thread_name>-<n>`.
    pub fn new(thread_name: &str) -> std::io::Result<Self> {
        let slot = Arc::new(Mutex::new(Slot::default()));
        let (tx, rx) = unbounded::<Job>();
        let name = format!(
            "{thread_name}-{}",
            LANE_COUNTER.fetch_add(1, Ordering::Relaxed)
        );

        let worker_slot = Arc::clone(&slot);
        let worker = thread::Builder::new().name(name).spawn(move || {
            for job in rx {
                let Job {
                    id,
                    mut task,
                    cancel,
                } = job;
                debug!("run {id} started");
                let result = catch_unwind(AssertUnwindSafe(|| task.execute(&cancel)))
                    .unwrap_or_else(|_| {
                        error!("run {id} panicked");
                        IngestResult::failed(vec!["ingest task panicked".to_string()])
                    });
                release(&worker_slot, id);
                debug!("run {id} finished with {:?}", result.status);
                task.deliver(result);
            }
        })?;

        Ok(Self {
            slot,
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    /// Queue `task` on the lane. Returns immediately.
    pub fn submit(&self, task: IngestTask) -> Result<RunHandle, RunnerError> {
        let mut slot = lock(&self.slot);
        if slot.cancel_pending {
            return Err(RunnerError::CancelPending);
        }
        if let Some(live) = &slot.live {
            return Err(RunnerError::TaskAlreadyRunning(live.id));
        }
        let tx = self.tx.as_ref().ok_or(RunnerError::Shutdown)?;

        let handle = RunHandle {
            id: slot.next_id + 1,
            cancel: CancelToken::new(),
        };
        tx.send(Job {
            id: handle.id,
            task,
            cancel: handle.cancel.clone(),
        })
        .map_err(|_| RunnerError::Shutdown)?;

        slot.next_id = handle.id;
        slot.live = Some(handle.clone());
        info!("run {} submitted", handle.id);
        Ok(handle)
    }

    /// Request cancellation of the live run. Returns `false` when nothing
    /// was in flight, in which case the runner is left untouched.
    pub fn cancel(&self) -> bool {
        let mut slot = lock(&self.slot);
        match slot.live.take() {
            Some(handle) => {
                handle.cancel.cancel();
                slot.cancel_pending = true;
                info!("cancellation requested for run {}", handle.id);
                true
            }
            None => false,
        }
    }

    /// Reopen the slot after a cancellation.
    pub fn reset(&self) {
        lock(&self.slot).cancel_pending = false;
    }

    pub fn is_busy(&self) -> bool {
        lock(&self.slot).live.is_some()
    }

    pub fn current(&self) -> Option<RunHandle> {
        lock(&self.slot).live.clone()
    }
}

impl Drop for TaskRunner {
    fn drop(&mut self) {
        self.cancel();
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() == thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                warn!("task runner worker panicked");
            }
        }
    }
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

fn release(slot: &Mutex<Slot>, id: u64) {
    let mut slot = lock(slot);
    if slot.live.as_ref().is_some_and(|h| h.id == id) {
        slot.live = None;
    }
}
