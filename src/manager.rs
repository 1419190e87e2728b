//! Worker Manager (C5): spawns one OS thread per secondary hart, collects
//! their status messages, and tears them down within a bounded grace period.
//!
//! Safe Rust has no way to forcibly kill a running `std::thread`, so
//! "force-terminate" here means: wait `grace` for the worker's own `Done`
//! message, and if it hasn't arrived, abandon the `JoinHandle` (drop it
//! without joining) and log a warning. The thread keeps running until its
//! own batch loop next checks `HALT_REQUESTED`, but the manager no longer
//! waits on it.

use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{info, warn};

use crate::error::VmError;
use crate::shared_mem::SharedRegion;
use crate::stepper::StepperFactory;
use crate::uart::UartQueue;
use crate::worker::{self, WorkerInit, WorkerMessage};

struct WorkerRecord {
    hart_id: u32,
    handle: Option<JoinHandle<()>>,
}

/// Owns every secondary hart's thread handle and the receiving end of the
/// shared status channel.
pub struct WorkerManager {
    workers: Vec<WorkerRecord>,
    rx: Receiver<WorkerMessage>,
    tx: mpsc::Sender<WorkerMessage>,
}

impl WorkerManager {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { workers: Vec::new(), rx, tx }
    }

    /// Spawns one worker thread for `hart_id`, running the full hart worker
    /// contract against a stepper built by `factory`. A spawn failure is
    /// returned rather than panicking: per the error handling design, it is
    /// the coordinator's job to recover by downgrading to single-threaded
    /// mode, not this manager's to crash the host process.
    pub fn start_worker(
        &mut self,
        hart_id: u32,
        shared: Arc<SharedRegion>,
        entry_pc: u64,
        uart: Arc<UartQueue>,
        factory: Arc<dyn StepperFactory>,
    ) -> Result<(), VmError> {
        let tx = self.tx.clone();
        let init = WorkerInit { hart_id, shared, entry_pc, uart };
        let handle = thread::Builder::new()
            .name(format!("hart-{hart_id}"))
            .spawn(move || worker::run_worker(init, factory.as_ref(), &tx))
            .map_err(|e| VmError::WorkerSpawnFailed { hart_id, reason: e.to_string() })?;
        self.workers.push(WorkerRecord { hart_id, handle: Some(handle) });
        Ok(())
    }

    /// Non-blocking drain of whatever status messages have arrived so far.
    pub fn try_recv_all(&self) -> Vec<WorkerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Requests halt via `shared.control`, then waits up to `grace` for each
    /// worker to post `Done` before abandoning any stragglers.
    pub fn terminate_all(&mut self, shared: &SharedRegion, grace: Duration) {
        shared.control.request_halt();

        let deadline = std::time::Instant::now() + grace;
        let mut done: std::collections::HashSet<u32> = std::collections::HashSet::new();

        while done.len() < self.workers.len() {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.rx.recv_timeout(remaining) {
                Ok(WorkerMessage::Done { hart_id }) => {
                    done.insert(hart_id);
                }
                Ok(WorkerMessage::Error { hart_id, error }) => {
                    warn!("hart {hart_id} reported error during shutdown: {error}");
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }

        for record in &mut self.workers {
            if done.contains(&record.hart_id) {
                if let Some(handle) = record.handle.take() {
                    let _ = handle.join();
                }
            } else {
                warn!(
                    "hart {} did not report done within the grace period; abandoning its thread handle",
                    record.hart_id
                );
                record.handle.take();
            }
        }
        info!("terminate_all: {}/{} workers joined cleanly", done.len(), self.num_workers());
    }
}

impl Default for WorkerManager {
    fn default() -> Self {
        Self::new()
    }
}
