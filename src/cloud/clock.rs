//! Clock abstraction for the cloud environment.
//!
//! Manifest upload periodicity and deletion delays are time-gated; tests must
//! control time instead of sleeping through it. All time reads in this module
//! tree go through `CloudClock`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Monotonic-ish microsecond clock.
///
/// Implementations:
/// - `SystemClock`: wall-clock anchored, monotonic after construction
/// - `SimulatedClock`: virtual time, advanced explicitly by tests
pub trait CloudClock: Send + Sync {
    /// Current time in microseconds
    fn now_micros(&self) -> u64;
}

/// Production clock: anchors the Unix epoch once, then advances on `Instant`
/// so time never goes backwards under NTP adjustments.
pub struct SystemClock {
    start: Instant,
    start_micros: u64,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        let start_micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before Unix epoch")
            .as_micros() as u64;
        SystemClock {
            start: Instant::now(),
            start_micros,
        }
    }
}

impl CloudClock for SystemClock {
    fn now_micros(&self) -> u64 {
        self.start_micros + self.start.elapsed().as_micros() as u64
    }
}

/// Simulated clock for tests. Time only moves via `advance_*` or `set`.
pub struct SimulatedClock {
    micros: AtomicU64,
}

impl Default for SimulatedClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SimulatedClock {
    pub fn new(start_micros: u64) -> Self {
        SimulatedClock {
            micros: AtomicU64::new(start_micros),
        }
    }

    pub fn advance_micros(&self, micros: u64) {
        self.micros.fetch_add(micros, Ordering::SeqCst);
    }

    pub fn advance_millis(&self, millis: u64) {
        self.advance_micros(millis.saturating_mul(1000));
    }

    pub fn set_micros(&self, micros: u64) {
        self.micros.store(micros, Ordering::SeqCst);
    }
}

impl CloudClock for SimulatedClock {
    fn now_micros(&self) -> u64 {
        self.micros.load(Ordering::SeqCst)
    }
}

/// Shared clock handle used across file handles and workers
pub type SharedClock = Arc<dyn CloudClock>;
