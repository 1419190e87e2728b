//! Coordination core of a RISC-V 64-bit SMP virtual machine: the Shared
//! Memory Region, Control Protocol, Hart Worker Runtime, VM Coordinator,
//! Worker Manager, SD-Card Bootstrap, Capability Detection, and UART Output
//! Queue. The instruction decoder, MMU/CSR state, and any device model
//! beyond UART/CLINT are external collaborators plugged in through the
//! `stepper` module's trait seam.

pub mod capability;
pub mod clint;
pub mod error;
pub mod loader;
pub mod manager;
pub mod sdboot;
pub mod shared_mem;
pub mod stepper;
pub mod uart;
pub mod vm;
pub mod worker;

pub use capability::detect_hart_count;
pub use error::{BootError, VmError};
pub use sdboot::{parse_sdcard, SdBootInfo};
pub use shared_mem::SharedRegion;
pub use stepper::{BlockDevice, Stepper, StepperFactory, WorkerStepResult};
pub use vm::Vm;
