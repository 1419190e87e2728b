//! Core-Local Interruptor (CLINT): per-hart timer compares, software-interrupt
//! bits, and a global `mtime`, forming the CLINT sub-region of the Shared
//! Memory Region (C1).
//!
//! Layout and atomics mirror a standard SiFive-style CLINT: `msip` registers
//! at the base, `mtimecmp` registers at `+0x4000`, `mtime` at `+0xBFF8`.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

pub const CLINT_BASE: u64 = 0x0200_0000;
pub const CLINT_SIZE: u64 = 0x10000;
pub const MSIP_OFFSET: u64 = 0x0000;
pub const MTIMECMP_OFFSET: u64 = 0x4000;
pub const MTIME_OFFSET: u64 = 0xBFF8;
pub const MAX_HARTS: usize = 128;

/// CLINT device state, shared by reference across every hart.
///
/// All fields are atomics so the struct can live inside the Shared Memory
/// Region and be touched concurrently without a lock.
pub struct Clint {
    mtime: AtomicU64,
    msip: [AtomicU32; MAX_HARTS],
    mtimecmp: [AtomicU64; MAX_HARTS],
    num_harts: AtomicUsize,
}

impl Clint {
    pub fn new(num_harts: usize) -> Self {
        Self {
            mtime: AtomicU64::new(0),
            msip: std::array::from_fn(|_| AtomicU32::new(0)),
            mtimecmp: std::array::from_fn(|_| AtomicU64::new(u64::MAX)),
            num_harts: AtomicUsize::new(num_harts),
        }
    }

    pub fn num_harts(&self) -> usize {
        self.num_harts.load(Ordering::Relaxed)
    }

    pub fn mtime(&self) -> u64 {
        self.mtime.load(Ordering::SeqCst)
    }

    /// Advance `mtime`; the coordinator calls this from the primary pump.
    pub fn tick(&self, delta: u64) {
        self.mtime.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn msip(&self, hart_id: usize) -> bool {
        self.msip.get(hart_id).is_some_and(|m| m.load(Ordering::Acquire) & 1 != 0)
    }

    pub fn set_msip(&self, hart_id: usize, value: bool) {
        if let Some(m) = self.msip.get(hart_id) {
            m.store(value as u32, Ordering::Release);
        }
    }

    pub fn mtimecmp(&self, hart_id: usize) -> u64 {
        self.mtimecmp.get(hart_id).map_or(u64::MAX, |c| c.load(Ordering::SeqCst))
    }

    pub fn set_mtimecmp(&self, hart_id: usize, value: u64) {
        if let Some(c) = self.mtimecmp.get(hart_id) {
            c.store(value, Ordering::SeqCst);
        }
    }

    pub fn is_timer_pending(&self, hart_id: usize) -> bool {
        self.mtime() >= self.mtimecmp(hart_id)
    }

    /// Memory-mapped load keyed to a byte offset within the CLINT region.
    /// Returns `None` for an offset outside any defined register.
    pub fn load(&self, offset: u64, size: u8) -> Option<u64> {
        if offset == MTIME_OFFSET && size == 8 {
            return Some(self.mtime());
        }
        if (MSIP_OFFSET..MSIP_OFFSET + (MAX_HARTS as u64) * 4).contains(&offset) && size == 4 {
            let hart = ((offset - MSIP_OFFSET) / 4) as usize;
            return Some(self.msip(hart) as u64);
        }
        if (MTIMECMP_OFFSET..MTIMECMP_OFFSET + (MAX_HARTS as u64) * 8).contains(&offset)
            && size == 8
        {
            let hart = ((offset - MTIMECMP_OFFSET) / 8) as usize;
            return Some(self.mtimecmp(hart));
        }
        None
    }

    pub fn store(&self, offset: u64, size: u8, value: u64) -> bool {
        if offset == MTIME_OFFSET && size == 8 {
            self.mtime.store(value, Ordering::SeqCst);
            return true;
        }
        if (MSIP_OFFSET..MSIP_OFFSET + (MAX_HARTS as u64) * 4).contains(&offset) && size == 4 {
            let hart = ((offset - MSIP_OFFSET) / 4) as usize;
            self.set_msip(hart, value & 1 != 0);
            return true;
        }
        if (MTIMECMP_OFFSET..MTIMECMP_OFFSET + (MAX_HARTS as u64) * 8).contains(&offset)
            && size == 8
        {
            let hart = ((offset - MTIMECMP_OFFSET) / 8) as usize;
            self.set_mtimecmp(hart, value);
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_msip_roundtrip() {
        let clint = Clint::new(4);
        assert!(!clint.msip(1));
        clint.set_msip(1, true);
        assert!(clint.msip(1));
    }

    #[test]
    fn test_timer_pending() {
        let clint = Clint::new(1);
        clint.set_mtimecmp(0, 100);
        assert!(!clint.is_timer_pending(0));
        clint.tick(150);
        assert!(clint.is_timer_pending(0));
    }

    #[test]
    fn test_mmio_load_store() {
        let clint = Clint::new(2);
        assert!(clint.store(MSIP_OFFSET, 4, 1));
        assert_eq!(clint.load(MSIP_OFFSET, 4), Some(1));
        assert!(clint.store(MTIMECMP_OFFSET + 8, 8, 0x1234));
        assert_eq!(clint.load(MTIMECMP_OFFSET + 8, 8), Some(0x1234));
        assert_eq!(clint.load(CLINT_SIZE + 1, 4), None);
    }

    #[test]
    fn test_concurrent_msip() {
        let clint = Arc::new(Clint::new(4));
        let handles: Vec<_> = (0..4)
            .map(|h| {
                let c = Arc::clone(&clint);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        c.set_msip(h, true);
                        c.set_msip(h, false);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
