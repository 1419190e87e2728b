//! Error taxonomy for the VM core.
//!
//! One variant per failure mode named in the error handling design: boot
//! parsing failures (`BootError`) convert into the umbrella `VmError` that
//! every host-facing operation returns.

use thiserror::Error;

/// Failures raised while parsing an SD-card image (MBR + FAT32).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BootError {
    #[error("disk image too small: {0} bytes, need at least 512")]
    ImageTooSmall(usize),

    #[error("invalid MBR signature (expected 0x55 0xAA at bytes 510-511)")]
    InvalidMBR,

    #[error("no FAT32 boot partition found (type 0x0B or 0x0C)")]
    NoBootPartition,

    #[error("KERNEL.BIN file size {file_size} extends past image length {image_len}")]
    TruncatedFile { file_size: u64, image_len: usize },

    #[error("no KERNEL.BIN entry found in boot partition root directory")]
    KernelNotFound,
}

/// Errors returned by the VM Coordinator's public operations.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("invalid kernel image: {0}")]
    InvalidKernel(String),

    #[error("invalid hart count: {0}")]
    InvalidHartCount(u32),

    #[error("shared memory unavailable: {0}")]
    SharedMemoryUnavailable(String),

    #[error("failed to spawn worker for hart {hart_id}: {reason}")]
    WorkerSpawnFailed { hart_id: u32, reason: String },

    #[error(transparent)]
    Boot(#[from] BootError),

    #[error("execution error on hart {hart_id}: {message}")]
    ExecutionError { hart_id: u32, message: String },
}
