//! Hart Worker Runtime (C3): the contract a secondary hart's thread runs —
//! construct from an init payload, post `ready`, then batch-step until
//! halt, shutdown, or error.

use std::sync::mpsc::Sender;
use std::sync::Arc;

use crate::shared_mem::SharedRegion;
use crate::stepper::{Stepper, StepperFactory, WorkerStepResult};
use crate::uart::UartQueue;

/// Instructions stepped per batch without any host interaction.
pub const BATCH_SIZE: u64 = 100_000;
/// Batches between yield-hint checks of `HALT_REQUESTED`.
pub const BATCHES_PER_YIELD: u32 = 10;

/// Init payload sent from the coordinator to a newly spawned worker thread.
pub struct WorkerInit {
    pub hart_id: u32,
    pub shared: Arc<SharedRegion>,
    pub entry_pc: u64,
    pub uart: Arc<UartQueue>,
}

/// Status messages a worker posts back to the Worker Manager. Exactly three
/// semantic variants per the design notes (`ready`/`halted`/`error`), plus
/// an internal `Done` the manager uses to implement a bounded-grace join
/// without a method to truly kill an OS thread.
#[derive(Debug, Clone)]
pub enum WorkerMessage {
    Ready { hart_id: u32 },
    Halted { hart_id: u32, step_count: u64 },
    Error { hart_id: u32, error: String },
    Done { hart_id: u32 },
}

/// Runs the full hart worker contract to completion. Intended to be the
/// entire body of a spawned worker thread's closure.
pub fn run_worker(init: WorkerInit, factory: &dyn StepperFactory, tx: &Sender<WorkerMessage>) {
    let WorkerInit { hart_id, shared, entry_pc, uart } = init;
    let mut stepper = factory.create(hart_id, Arc::clone(&shared), entry_pc, uart);

    let _ = tx.send(WorkerMessage::Ready { hart_id });

    run_loop(hart_id, stepper.as_mut(), &shared, tx);

    // Cleanup: stepper and shared-region handles are dropped here as the
    // function returns, releasing this thread's references.
    let _ = tx.send(WorkerMessage::Done { hart_id });
}

/// The batched run-loop algorithm itself, factored out so it can be unit
/// tested against a fake stepper without spawning a thread.
pub fn run_loop(
    hart_id: u32,
    stepper: &mut dyn Stepper,
    shared: &Arc<SharedRegion>,
    tx: &Sender<WorkerMessage>,
) {
    let mut batches_since_yield: u32 = 0;
    loop {
        match stepper.step_batch(BATCH_SIZE) {
            WorkerStepResult::Continue => {
                batches_since_yield += 1;
                if batches_since_yield >= BATCHES_PER_YIELD {
                    batches_since_yield = 0;
                    if shared.control.poll_halt_requested() {
                        let _ = tx.send(WorkerMessage::Halted {
                            hart_id,
                            step_count: stepper.step_count(),
                        });
                        return;
                    }
                }
            }
            WorkerStepResult::Halted | WorkerStepResult::Shutdown => {
                let _ = tx.send(WorkerMessage::Halted {
                    hart_id,
                    step_count: stepper.step_count(),
                });
                return;
            }
            WorkerStepResult::Error(message) => {
                let _ = tx.send(WorkerMessage::Error { hart_id, error: message });
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    /// Minimal fake stepper used only by this module's own tests.
    struct FakeStepper {
        batches_left_before_result: u32,
        result: WorkerStepResult,
        count: u64,
    }

    impl Stepper for FakeStepper {
        fn step(&mut self) -> bool {
            self.count += 1;
            true
        }

        fn step_batch(&mut self, n: u64) -> WorkerStepResult {
            self.count += n;
            if self.batches_left_before_result == 0 {
                self.result.clone_result()
            } else {
                self.batches_left_before_result -= 1;
                WorkerStepResult::Continue
            }
        }

        fn step_count(&self) -> u64 {
            self.count
        }
    }

    impl WorkerStepResult {
        fn clone_result(&self) -> Self {
            match self {
                WorkerStepResult::Continue => WorkerStepResult::Continue,
                WorkerStepResult::Halted => WorkerStepResult::Halted,
                WorkerStepResult::Shutdown => WorkerStepResult::Shutdown,
                WorkerStepResult::Error(e) => WorkerStepResult::Error(e.clone()),
            }
        }
    }

    #[test]
    fn test_run_loop_reports_halted() {
        let shared = SharedRegion::new(1, 4096);
        let mut stepper =
            FakeStepper { batches_left_before_result: 2, result: WorkerStepResult::Halted, count: 0 };
        let (tx, rx) = mpsc::channel();
        run_loop(1, &mut stepper, &shared, &tx);
        match rx.recv().unwrap() {
            WorkerMessage::Halted { hart_id, step_count } => {
                assert_eq!(hart_id, 1);
                assert_eq!(step_count, BATCH_SIZE * 3);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_run_loop_reports_error() {
        let shared = SharedRegion::new(1, 4096);
        let mut stepper = FakeStepper {
            batches_left_before_result: 0,
            result: WorkerStepResult::Error("divide by zero".into()),
            count: 0,
        };
        let (tx, rx) = mpsc::channel();
        run_loop(1, &mut stepper, &shared, &tx);
        match rx.recv().unwrap() {
            WorkerMessage::Error { hart_id, error } => {
                assert_eq!(hart_id, 1);
                assert_eq!(error, "divide by zero");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_run_loop_stops_on_halt_requested() {
        let shared = SharedRegion::new(1, 4096);
        shared.control.request_halt();
        let mut stepper =
            FakeStepper { batches_left_before_result: u32::MAX, result: WorkerStepResult::Continue, count: 0 };
        let (tx, rx) = mpsc::channel();
        run_loop(3, &mut stepper, &shared, &tx);
        match rx.recv().unwrap() {
            WorkerMessage::Halted { hart_id, .. } => assert_eq!(hart_id, 3),
            other => panic!("unexpected message: {other:?}"),
        }
        // I4: terminated within one batch of observing HALT_REQUESTED==1.
        assert!(stepper.step_count() <= BATCH_SIZE * BATCHES_PER_YIELD as u64);
    }
}
