//! # clock
//!
//! Monotonic milliseconds since boot. The runtime uses [`MonotonicClock`];
//! tests drive time by hand with [`ManualClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use sft_types::Millis;

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Millis;
}

// ── Monotonic ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MonotonicClock {
    boot: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { boot: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> Millis {
        self.boot.elapsed().as_millis() as Millis
    }
}

// ── Manual ────────────────────────────────────────────────────────────────────

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn starting_at(ms: Millis) -> Self {
        Self { now: Arc::new(AtomicU64::new(ms)) }
    }

    pub fn set(&self, ms: Millis) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: Millis) -> Millis {
        self.now.fetch_add(ms, Ordering::SeqCst) + ms
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Millis {
        self.now.load(Ordering::SeqCst)
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now_ms(&self) -> Millis {
        (**self).now_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let a = ManualClock::starting_at(100);
        let b = a.clone();
        assert_eq!(a.advance(50), 150);
        assert_eq!(b.now_ms(), 150);
        b.set(7);
        assert_eq!(a.now_ms(), 7);
    }

    #[test]
    fn monotonic_clock_never_goes_back() {
        let c = MonotonicClock::new();
        let t0 = c.now_ms();
        let t1 = c.now_ms();
        assert!(t1 >= t0);
    }
}
