//! External Collaborators (C9): the thin interfaces this core consumes
//! rather than implements. The RISC-V instruction decoder, MMU/CSR state,
//! and device models beyond UART/CLINT all live on the other side of this
//! seam, in a crate the host links in.

use std::sync::Arc;

use crate::shared_mem::SharedRegion;
use crate::uart::UartQueue;

/// Outcome of stepping one batch of instructions. Exactly four variants —
/// no fifth "waiting for interrupt" state: a stepper that needs to sleep
/// folds that into `Continue` and lets the next batch re-check interrupts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerStepResult {
    /// The hart may continue; the run loop should step another batch.
    Continue,
    /// The ISA signalled a defined end-of-execution condition.
    Halted,
    /// The control word requested halt; the hart observed it mid-batch.
    Shutdown,
    /// A fault the worker cannot recover from.
    Error(String),
}

/// Per-hart instruction execution, implemented by a concrete RISC-V decoder
/// outside this crate. Not `new` here — construction goes through
/// [`StepperFactory`] since a constructor cannot live on a `dyn` trait.
pub trait Stepper: Send {
    /// Steps exactly one instruction. Returns `false` once the hart halts.
    fn step(&mut self) -> bool;

    /// Steps up to `n` instructions without host interaction, stopping early
    /// on halt, shutdown, or fault.
    fn step_batch(&mut self, n: u64) -> WorkerStepResult;

    /// Monotonic count of instructions retired by this hart so far.
    fn step_count(&self) -> u64;

    /// Exposes this stepper's [`BlockDevice`] facet, if it serves the guest's
    /// block-device MMIO. The default `None` suits steppers with no block
    /// device model (or secondary harts, which never touch it); hart 0's
    /// stepper overrides this when `Vm::load_disk` needs somewhere to route
    /// the attached image.
    fn as_block_device(&mut self) -> Option<&mut dyn BlockDevice> {
        None
    }
}

/// Constructs a [`Stepper`] bound to one hart, the Shared Memory Region, and
/// an entry program counter. Implemented by the collaborator crate that
/// supplies the actual ISA; this core ships only a deterministic test fake.
pub trait StepperFactory: Send + Sync {
    fn create(
        &self,
        hart_id: u32,
        shared: Arc<SharedRegion>,
        entry_pc: u64,
        uart: Arc<UartQueue>,
    ) -> Box<dyn Stepper>;
}

/// Satisfied by `Vm::load_disk`: the raw bytes of an attached SD-card image,
/// handed to the stepper so MMIO reads against the block device return
/// real data. The core itself never interprets the bytes past C6's boot
/// parse; interpreting them as a live block device is the stepper's job.
pub trait BlockDevice: Send + Sync {
    fn attach(&mut self, image: Arc<[u8]>);
}
