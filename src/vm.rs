//! VM Coordinator (C4): owns the Shared Memory Region, drives the primary
//! hart synchronously on the host's call stack, and manages secondary-hart
//! workers through the Worker Manager.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::capability::detect_hart_count;
use crate::error::VmError;
use crate::loader;
use crate::manager::WorkerManager;
use crate::sdboot::{self, SdBootInfo};
use crate::shared_mem::SharedRegion;
use crate::stepper::{Stepper, StepperFactory};
use crate::uart::UartQueue;

/// Default DRAM size backing the shared region when the caller doesn't
/// otherwise size it; large enough for the kernel images this core is
/// meant to boot, small enough to allocate freely in tests.
pub const DEFAULT_DRAM_SIZE: usize = 128 * 1024 * 1024;

/// Grace period `terminate_workers` allows each worker to report `Done`
/// before its handle is abandoned.
pub const TERMINATE_GRACE: Duration = Duration::from_millis(500);

pub struct Vm {
    shared: Arc<SharedRegion>,
    uart: Arc<UartQueue>,
    primary: Box<dyn Stepper>,
    factory: Arc<dyn StepperFactory>,
    manager: WorkerManager,
    entry_pc: u64,
    num_harts: u32,
    workers_started: bool,
    disk: Option<SdBootInfo>,
}

impl Vm {
    /// Builds a VM with `num_harts = max(1, floor(cpu/2))`, auto-detected.
    pub fn new(kernel: &[u8], factory: Arc<dyn StepperFactory>) -> Result<Self, VmError> {
        let num_harts = detect_hart_count(None);
        Self::new_with_harts(kernel, num_harts, factory)
    }

    /// Builds a VM with exactly `num_harts` harts, subject to capability
    /// downgrade: per §4.7 the coordinator must fall back to a single hart
    /// whenever the host lacks shared-memory/atomics support, regardless of
    /// what the caller requested. `num_harts = 0` is an error. `kernel` may
    /// be an ELF image or a flat raw binary — see
    /// [`loader::load_kernel_into_dram`].
    pub fn new_with_harts(
        kernel: &[u8],
        num_harts: u32,
        factory: Arc<dyn StepperFactory>,
    ) -> Result<Self, VmError> {
        if num_harts == 0 {
            return Err(VmError::InvalidHartCount(num_harts));
        }
        let num_harts = detect_hart_count(Some(num_harts));

        let shared = SharedRegion::new(num_harts as usize, DEFAULT_DRAM_SIZE);
        let entry_pc =
            loader::load_kernel_into_dram(kernel, &shared.dram).map_err(VmError::InvalidKernel)?;
        Self::from_loaded(shared, entry_pc, num_harts, factory)
    }

    /// Assembles a VM whose kernel has already been copied into `shared`'s
    /// DRAM at `entry_pc` — the tail shared by every constructor once the
    /// kernel-loading step (ELF, raw, or SD-card extraction) differs.
    fn from_loaded(
        shared: Arc<SharedRegion>,
        entry_pc: u64,
        num_harts: u32,
        factory: Arc<dyn StepperFactory>,
    ) -> Result<Self, VmError> {
        let uart = Arc::new(UartQueue::new());
        let primary = factory.create(0, Arc::clone(&shared), entry_pc, Arc::clone(&uart));

        info!("VM constructed: {num_harts} hart(s), entry_pc=0x{entry_pc:x}");

        Ok(Self {
            shared,
            uart,
            primary,
            factory,
            manager: WorkerManager::new(),
            entry_pc,
            num_harts,
            workers_started: false,
            disk: None,
        })
    }

    /// Steps the primary hart (hart 0) by one instruction, advancing the
    /// shared CLINT's `mtime` by one tick per instruction so timer compares
    /// set by any hart stay live. Returns `false` once hart 0 halts, at
    /// which point `HALTED` is set for observers.
    pub fn step(&mut self) -> bool {
        self.shared.clint.tick(1);
        let advanced = self.primary.step();
        if !advanced {
            self.shared.control.signal_halted(0);
        }
        advanced
    }

    /// Pops the next queued UART output byte, if any.
    pub fn get_output(&self) -> Option<u8> {
        self.uart.pop()
    }

    /// Spawns one worker thread per secondary hart (harts `1..num_harts`).
    /// A no-op when `num_harts == 1`. Per §7, a worker spawn failure is
    /// recovered rather than propagated: already-spawned workers for this
    /// VM are halted and reaped, `num_harts` drops to 1, and the downgrade
    /// is logged rather than returned as an error.
    pub fn start_workers(&mut self) {
        if self.num_harts <= 1 {
            self.workers_started = true;
            return;
        }
        for hart_id in 1..self.num_harts {
            if let Err(e) = self.manager.start_worker(
                hart_id,
                Arc::clone(&self.shared),
                self.entry_pc,
                Arc::clone(&self.uart),
                Arc::clone(&self.factory),
            ) {
                warn!("{e}; downgrading to single-threaded mode");
                self.manager.terminate_all(&self.shared, TERMINATE_GRACE);
                self.num_harts = 1;
                self.workers_started = true;
                return;
            }
        }
        self.workers_started = true;
    }

    /// Requests halt, wakes every waiter, and joins workers within a bounded
    /// grace period. Stragglers are logged and abandoned, not killed.
    pub fn terminate_workers(&mut self) {
        self.manager.terminate_all(&self.shared, TERMINATE_GRACE);
        self.workers_started = false;
    }

    /// Parses the image's boot info, then hands the raw bytes to hart 0's
    /// stepper as its block device, if it exposes one. Parse failures are
    /// fatal and returned directly; they are never silently downgraded.
    pub fn load_disk(&mut self, image: &[u8]) -> Result<(), VmError> {
        let info = sdboot::parse_sdcard(image)?;
        self.attach_block_device(image);
        self.disk = Some(info);
        Ok(())
    }

    fn attach_block_device(&mut self, image: &[u8]) {
        if let Some(device) = self.primary.as_block_device() {
            device.attach(Arc::from(image));
        }
    }

    /// `createVMFromSDCard`: parses `image` for its `KERNEL.BIN`, builds a VM
    /// around the extracted kernel with auto-detected hart count, then
    /// attaches `image` itself as the block device — exactly `parse image →
    /// createVM(kernel) → load_disk(image)`, so the kernel can mount its own
    /// filesystem partition once running. The extracted bytes are raw (not
    /// ELF-wrapped), so they are copied verbatim to the boot info's
    /// `kernel_load_addr` rather than parsed as an ELF image.
    pub fn from_sdcard(image: &[u8], factory: Arc<dyn StepperFactory>) -> Result<Self, VmError> {
        Self::from_sdcard_with_harts(image, detect_hart_count(None), factory)
    }

    /// As [`Vm::from_sdcard`], but with an explicit hart count rather than
    /// auto-detection. Still subject to the same capability downgrade as
    /// [`Vm::new_with_harts`].
    pub fn from_sdcard_with_harts(
        image: &[u8],
        num_harts: u32,
        factory: Arc<dyn StepperFactory>,
    ) -> Result<Self, VmError> {
        if num_harts == 0 {
            return Err(VmError::InvalidHartCount(num_harts));
        }
        let num_harts = detect_hart_count(Some(num_harts));

        let boot = sdboot::parse_sdcard(image)?;
        let shared = SharedRegion::new(num_harts as usize, DEFAULT_DRAM_SIZE);
        let entry_pc = loader::load_raw_into_dram(&boot.kernel_data, &shared.dram, boot.kernel_load_addr)
            .map_err(VmError::InvalidKernel)?;

        let mut vm = Self::from_loaded(shared, entry_pc, num_harts, factory)?;
        vm.attach_block_device(image);
        vm.disk = Some(boot);
        Ok(vm)
    }

    /// The LBA of the non-boot partition the kernel mounts its filesystem
    /// from, if an SD-card image has been attached via [`Vm::load_disk`] or
    /// [`Vm::from_sdcard`].
    pub fn fs_partition_start(&self) -> Option<u32> {
        self.disk.as_ref().map(|d| d.fs_partition_start)
    }

    pub fn is_smp(&self) -> bool {
        self.num_harts > 1 && self.workers_started
    }

    pub fn num_harts(&self) -> u32 {
        self.num_harts
    }

    /// Drains any secondary-hart error reports without blocking. The
    /// coordinator marks the offending hart dead and halts the VM, per the
    /// documented fault-handling contract; it never panics on a worker
    /// fault.
    pub fn poll_worker_faults(&mut self) -> Vec<(u32, String)> {
        let mut faults = Vec::new();
        for message in self.manager.try_recv_all() {
            if let crate::worker::WorkerMessage::Error { hart_id, error } = message {
                warn!("hart {hart_id} faulted: {error}; halting VM");
                self.shared.control.request_halt();
                self.shared.control.signal_halted(1);
                faults.push((hart_id, error));
            }
        }
        faults
    }
}
