//! Shared Memory Region (C1): the fixed-layout buffer — control words, CLINT,
//! DRAM — addressable by every hart, plus the two Control Protocol (C2)
//! operations defined on it.
//!
//! I1: sub-region offsets/sizes are fixed for the VM's lifetime (`const` and
//! computed once at construction, never mutated). I2: the region is shared
//! by `Arc` reference, never copied. I3/I4/P5: `HALT_REQUESTED` is
//! write-once monotonic — see [`Control::request_halt`].

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::clint::Clint;

/// Size of the control sub-region in bytes (one 4 KiB page, sized so
/// per-hart IPI/run-state words stay cache-line separated from
/// `HALT_REQUESTED`/`HALTED`).
pub const CONTROL_REGION_SIZE: usize = 4096;
pub const CLINT_REGION_SIZE: usize = 0x10000;
pub const HEADER_SIZE: usize = CONTROL_REGION_SIZE + CLINT_REGION_SIZE;
pub const DRAM_BASE: u64 = 0x8000_0000;

pub fn dram_offset() -> usize {
    HEADER_SIZE
}

pub fn total_shared_size(dram_size: usize) -> usize {
    HEADER_SIZE + dram_size
}

/// Control sub-region: index 0 = `HALT_REQUESTED`, index 1 = `HALTED`.
/// `#[repr(align(64))]` keeps the two hot words off the same cache line as
/// anything allocated immediately after it.
#[repr(align(64))]
pub struct Control {
    halt_requested: AtomicU32,
    halted: AtomicU32,
    halt_code: AtomicU32,
    notify_lock: Mutex<()>,
    notify: Condvar,
}

impl Control {
    pub fn new() -> Self {
        Self {
            halt_requested: AtomicU32::new(0),
            halted: AtomicU32::new(0),
            halt_code: AtomicU32::new(0),
            notify_lock: Mutex::new(()),
            notify: Condvar::new(),
        }
    }

    /// Atomically stores 1 into `HALT_REQUESTED` and wakes any hart blocked
    /// in a wait on that word. Idempotent: a second call is a no-op store of
    /// the same value, preserving I3 (write-once monotonic 0 → 1).
    pub fn request_halt(&self) {
        self.halt_requested.store(1, Ordering::Release);
        let _guard = self.notify_lock.lock().unwrap();
        self.notify.notify_all();
    }

    pub fn is_halt_requested(&self) -> bool {
        self.halt_requested.load(Ordering::Acquire) != 0
    }

    /// Zero-timeout yield hint: a non-blocking check of `HALT_REQUESTED`,
    /// used by the worker runtime every `BATCHES_PER_YIELD` batches. Not a
    /// real sleep — matches an `Atomics.wait` call with `timeout=0`.
    pub fn poll_halt_requested(&self) -> bool {
        std::thread::yield_now();
        self.is_halt_requested()
    }

    /// Blocks until `HALT_REQUESTED` becomes 1 or `timeout` elapses. Used by
    /// hosts that want to sleep rather than spin while waiting for shutdown.
    pub fn wait_halt_requested(&self, timeout: std::time::Duration) {
        if self.is_halt_requested() {
            return;
        }
        let guard = self.notify_lock.lock().unwrap();
        let _ = self.notify.wait_timeout_while(guard, timeout, |_| !self.is_halt_requested());
    }

    pub fn signal_halted(&self, code: u32) {
        self.halt_code.store(code, Ordering::Relaxed);
        self.halted.store(1, Ordering::Release);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire) != 0
    }

    pub fn halt_code(&self) -> u32 {
        self.halt_code.load(Ordering::Acquire)
    }
}

impl Default for Control {
    fn default() -> Self {
        Self::new()
    }
}

/// DRAM sub-region: kernel code/data/heap. Unsynchronised by default — the
/// kernel is responsible for its own fences, matching real RISC-V hardware,
/// where ordinary loads/stores carry no cross-hart ordering guarantee.
pub struct Dram {
    base: u64,
    size: usize,
    data: UnsafeCell<Box<[u8]>>,
}

// SAFETY: concurrent unsynchronised byte access from multiple hart threads
// is exactly the memory model this region models (plain RISC-V loads/stores
// are unordered between harts; only the kernel's own fences, executed by the
// external ISA stepper, establish ordering). No Rust-level aliasing of `&mut`
// ever escapes this type; all access is through raw pointers within bounds
// checked against `size`.
unsafe impl Sync for Dram {}
unsafe impl Send for Dram {}

impl Dram {
    pub fn new(base: u64, size: usize) -> Self {
        Self { base, size, data: UnsafeCell::new(vec![0u8; size].into_boxed_slice()) }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn offset(&self, addr: u64) -> Option<usize> {
        let off = addr.wrapping_sub(self.base) as usize;
        if off < self.size { Some(off) } else { None }
    }

    /// Raw pointer to the backing bytes, for an external stepper's own
    /// load/store implementation. Caller must respect `size()`.
    ///
    /// # Safety
    /// The pointer is valid for the lifetime of `self` and aliases whatever
    /// other hart threads are doing to the same region; callers must not
    /// construct a Rust reference with exclusive-access assumptions from it.
    pub unsafe fn as_mut_ptr(&self) -> *mut u8 {
        unsafe { (*self.data.get()).as_mut_ptr() }
    }

    pub fn write_bytes(&self, offset: usize, bytes: &[u8]) -> Result<(), &'static str> {
        if offset + bytes.len() > self.size {
            return Err("write out of bounds");
        }
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.as_mut_ptr().add(offset), bytes.len());
        }
        Ok(())
    }

    pub fn zero_range(&self, offset: usize, len: usize) -> Result<(), &'static str> {
        if offset + len > self.size {
            return Err("zero range out of bounds");
        }
        unsafe {
            std::ptr::write_bytes(self.as_mut_ptr().add(offset), 0, len);
        }
        Ok(())
    }

    pub fn read_range(&self, offset: usize, len: usize) -> Result<Vec<u8>, &'static str> {
        if offset + len > self.size {
            return Err("read out of bounds");
        }
        unsafe { Ok((*self.data.get())[offset..offset + len].to_vec()) }
    }
}

/// The Shared Memory Region itself: one `Arc<SharedRegion>` cloned into every
/// hart's thread. Bundles Control + CLINT + DRAM behind the fixed offsets
/// described in the external interfaces.
pub struct SharedRegion {
    pub control: Control,
    pub clint: Clint,
    pub dram: Dram,
}

impl SharedRegion {
    pub fn new(num_harts: usize, dram_size: usize) -> Arc<Self> {
        Arc::new(Self {
            control: Control::new(),
            clint: Clint::new(num_harts),
            dram: Dram::new(DRAM_BASE, dram_size),
        })
    }

    pub fn total_size(&self) -> usize {
        total_shared_size(self.dram.size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets() {
        assert_eq!(CONTROL_REGION_SIZE, 4096);
        assert_eq!(CLINT_REGION_SIZE, 0x10000);
        assert_eq!(HEADER_SIZE, CONTROL_REGION_SIZE + CLINT_REGION_SIZE);
        assert_eq!(dram_offset(), HEADER_SIZE);
    }

    #[test]
    fn test_control_alignment() {
        assert_eq!(std::mem::align_of::<Control>(), 64);
    }

    #[test]
    fn test_halt_requested_monotonic() {
        let control = Control::new();
        assert!(!control.is_halt_requested());
        control.request_halt();
        assert!(control.is_halt_requested());
        control.request_halt();
        assert!(control.is_halt_requested());
    }

    #[test]
    fn test_halted_independent_of_halt_requested() {
        let control = Control::new();
        assert!(!control.is_halted());
        control.signal_halted(7);
        assert!(control.is_halted());
        assert_eq!(control.halt_code(), 7);
        assert!(!control.is_halt_requested());
    }

    #[test]
    fn test_wait_wakes_on_notify() {
        use std::thread;
        use std::time::Duration;
        let region = SharedRegion::new(1, 4096);
        let waiter = Arc::clone(&region);
        let handle = thread::spawn(move || {
            waiter.control.wait_halt_requested(Duration::from_secs(5));
            waiter.control.is_halt_requested()
        });
        thread::sleep(Duration::from_millis(20));
        region.control.request_halt();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_dram_bounds() {
        let dram = Dram::new(DRAM_BASE, 1024);
        assert_eq!(dram.offset(DRAM_BASE), Some(0));
        assert_eq!(dram.offset(DRAM_BASE + 1023), Some(1023));
        assert_eq!(dram.offset(DRAM_BASE + 1024), None);
        dram.write_bytes(0, &[1, 2, 3]).unwrap();
        assert_eq!(dram.read_range(0, 3).unwrap(), vec![1, 2, 3]);
        assert!(dram.write_bytes(1022, &[0; 10]).is_err());
    }

    #[test]
    fn test_shared_region_total_size() {
        let region = SharedRegion::new(2, 1 << 20);
        assert_eq!(region.total_size(), HEADER_SIZE + (1 << 20));
    }
}
