//! Capability Detection (C7): decides up front how many harts the host can
//! actually run, the native analogue of a browser checking
//! `crossOriginIsolated` before trusting `SharedArrayBuffer`.
//!
//! Native hosts have no such flag; the nearest real failure mode is
//! `std::thread::available_parallelism()` itself returning `Err` (sandboxed
//! containers, restricted scheduling affinities, some embedded targets). We
//! treat that failure exactly like a browser's cross-origin-isolation
//! failure: fall back to a single hart.

use std::num::NonZeroUsize;

/// Result of probing the host's parallelism support.
#[derive(Debug, Clone)]
pub struct Capability {
    pub supported: bool,
    /// Kept for interface parity with the browser-host record this mirrors;
    /// natively there is no such gate, so it is always `true`.
    pub cross_origin_isolated: bool,
    pub message: String,
}

/// Probes whether multi-hart execution is supported on this host.
pub fn probe() -> Capability {
    match std::thread::available_parallelism() {
        Ok(n) => Capability {
            supported: true,
            cross_origin_isolated: true,
            message: format!("available_parallelism reports {n} logical CPUs"),
        },
        Err(e) => Capability {
            supported: false,
            cross_origin_isolated: true,
            message: format!("available_parallelism unavailable, falling back to one hart: {e}"),
        },
    }
}

/// P4: `max(1, requested ?? floor(cpu_count / 2))`. A caller-requested hart
/// count always wins; absent a request, half the detected CPUs (rounded
/// down), never less than one. Capability failure forces a single hart
/// regardless of what was requested.
pub fn detect_hart_count(requested: Option<u32>) -> u32 {
    let cap = probe();
    if !cap.supported {
        return 1;
    }
    if let Some(n) = requested {
        return n.max(1);
    }
    let cpus: NonZeroUsize = std::thread::available_parallelism().unwrap_or(NonZeroUsize::new(2).unwrap());
    ((cpus.get() / 2).max(1)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requested_count_wins() {
        assert_eq!(detect_hart_count(Some(3)), 3);
    }

    #[test]
    fn test_requested_zero_clamped_to_one() {
        assert_eq!(detect_hart_count(Some(0)), 1);
    }

    #[test]
    fn test_probe_never_panics() {
        let cap = probe();
        assert!(!cap.message.is_empty());
    }

    #[test]
    fn test_default_count_is_at_least_one() {
        assert!(detect_hart_count(None) >= 1);
    }
}
