//! Command-line harness for the VM core.
//!
//! This binary has no ISA decoder of its own — the real instruction
//! execution is an external collaborator (see `stepper::StepperFactory`)
//! that a host links in. What ships here is a no-op demo factory so the
//! coordinator's own machinery (ELF loading, SD-card bootstrap, worker
//! lifecycle, output draining) can be smoke-tested end to end without a
//! real decoder attached.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};

use riscv_vm_core::stepper::{Stepper, StepperFactory, WorkerStepResult};
use riscv_vm_core::{SharedRegion, Vm};
use riscv_vm_core::uart::UartQueue;

#[derive(Parser, Debug)]
#[command(author, version, about = "RISC-V SMP VM coordination core", long_about = None)]
struct Args {
    /// Path to the kernel ELF image.
    #[arg(short, long)]
    kernel: PathBuf,

    /// Number of harts to run. Omit to auto-detect from host parallelism.
    #[arg(long)]
    harts: Option<u32>,

    /// Optional path to a raw SD-card disk image (MBR + FAT32).
    #[arg(long)]
    disk: Option<PathBuf>,

    /// Informational only: an ELF kernel's entry PC comes from its own
    /// header, and a raw (non-ELF) kernel always loads at DRAM's base; an
    /// explicit load address is for a future external stepper that wants
    /// to override either.
    #[arg(long)]
    load_addr: Option<u64>,
}

/// Demo [`Stepper`]: immediately reports halted on its first batch. Stands
/// in for a real ISA decoder, which lives outside this crate.
struct NoopStepper {
    step_count: u64,
}

impl Stepper for NoopStepper {
    fn step(&mut self) -> bool {
        false
    }

    fn step_batch(&mut self, _n: u64) -> WorkerStepResult {
        WorkerStepResult::Halted
    }

    fn step_count(&self) -> u64 {
        self.step_count
    }
}

struct NoopStepperFactory;

impl StepperFactory for NoopStepperFactory {
    fn create(
        &self,
        hart_id: u32,
        _shared: Arc<SharedRegion>,
        entry_pc: u64,
        _uart: Arc<UartQueue>,
    ) -> Box<dyn Stepper> {
        info!("hart {hart_id}: no-op stepper bound at entry 0x{entry_pc:x}");
        Box::new(NoopStepper { step_count: 0 })
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Some(addr) = args.load_addr {
        warn!("--load-addr=0x{addr:x} is informational; entry PC comes from the kernel image itself");
    }

    let kernel = match fs::read(&args.kernel) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("failed to read kernel image {:?}: {e}", args.kernel);
            std::process::exit(1);
        }
    };

    let factory: Arc<dyn StepperFactory> = Arc::new(NoopStepperFactory);
    let mut vm = match args.harts {
        Some(n) => Vm::new_with_harts(&kernel, n, factory),
        None => Vm::new(&kernel, factory),
    }
    .unwrap_or_else(|e| {
        error!("failed to construct VM: {e}");
        std::process::exit(1);
    });

    if let Some(disk_path) = &args.disk {
        match fs::read(disk_path) {
            Ok(image) => {
                if let Err(e) = vm.load_disk(&image) {
                    error!("failed to parse disk image {disk_path:?}: {e}");
                    std::process::exit(1);
                }
                info!("attached disk image {disk_path:?}");
            }
            Err(e) => {
                error!("failed to read disk image {disk_path:?}: {e}");
                std::process::exit(1);
            }
        }
    }

    info!("starting VM with {} hart(s), smp={}", vm.num_harts(), vm.num_harts() > 1);
    vm.start_workers();

    while vm.step() {
        while let Some(byte) = vm.get_output() {
            print!("{}", byte as char);
        }
    }
    while let Some(byte) = vm.get_output() {
        print!("{}", byte as char);
    }

    vm.terminate_workers();
    info!("VM halted");
}
