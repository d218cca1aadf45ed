//! Instrumentation for cloud operations.
//!
//! Every outbound cloud call runs under an `OpTimer` guard. The guard records
//! the operation kind and a size hint at entry, and on drop — every exit path,
//! including errors and panics unwinding through the caller — emits one
//! `(kind, bytes, elapsed_micros, success)` sample to the optional request
//! callback. Successful reads overwrite the bytes field with the payload
//! length before the guard drops.
//!
//! The callback is invoked from many tasks concurrently and from guard drops;
//! it must be cheap, non-blocking and must not panic.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Kind of cloud operation, reported to the instrumentation hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudOpKind {
    Read,
    Write,
    List,
    Create,
    Delete,
    Copy,
    Info,
}

/// Per-operation instrumentation hook: `(kind, bytes, elapsed_micros, ok)`
pub type CloudRequestCallback = Arc<dyn Fn(CloudOpKind, u64, u64, bool) + Send + Sync>;

/// A completed-operation sample, returned to callers that need the numbers
/// directly (e.g. manifest upload latency) instead of fishing them out of a
/// side channel.
#[derive(Debug, Clone, Copy)]
pub struct OpSample {
    pub kind: CloudOpKind,
    pub bytes: u64,
    pub micros: u64,
    pub ok: bool,
}

/// Scoped timer for one cloud call attempt.
///
/// Construct at entry; call `set_bytes` / `succeed` as the outcome becomes
/// known; the drop impl emits the sample. `sample()` reads the current state
/// for callers that consume it directly.
pub struct OpTimer {
    kind: CloudOpKind,
    bytes: u64,
    ok: bool,
    start: Instant,
    callback: Option<CloudRequestCallback>,
}

impl OpTimer {
    pub fn new(kind: CloudOpKind, size_hint: u64, callback: Option<CloudRequestCallback>) -> Self {
        OpTimer {
            kind,
            bytes: size_hint,
            ok: false,
            start: Instant::now(),
            callback,
        }
    }

    /// Update the byte count once the real payload size is known
    pub fn set_bytes(&mut self, bytes: u64) {
        self.bytes = bytes;
    }

    pub fn succeed(&mut self) {
        self.ok = true;
    }

    pub fn elapsed_micros(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    pub fn sample(&self) -> OpSample {
        OpSample {
            kind: self.kind,
            bytes: self.bytes,
            micros: self.elapsed_micros(),
            ok: self.ok,
        }
    }
}

impl Drop for OpTimer {
    fn drop(&mut self) {
        if let Some(cb) = &self.callback {
            cb(self.kind, self.bytes, self.elapsed_micros(), self.ok);
        }
    }
}

// ============================================================================
// CloudStatistics - counters and latency histograms
// ============================================================================

/// Counter tickers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ticker {
    ManifestWrites = 0,
}

const TICKER_COUNT: usize = 1;

/// Latency histograms (millisecond samples)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistogramKind {
    ManifestWriteMillis = 0,
}

const HISTOGRAM_COUNT: usize = 1;

/// Aggregate over recorded samples
#[derive(Debug, Clone, Default)]
pub struct HistogramData {
    pub count: u64,
    pub sum: u64,
    pub min: u64,
    pub max: u64,
}

impl HistogramData {
    fn record(&mut self, value: u64) {
        if self.count == 0 || value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
        self.count += 1;
        self.sum = self.sum.saturating_add(value);
    }

    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum as f64 / self.count as f64
        }
    }
}

/// Counter/histogram sink for cloud environment operations.
/// Safe to share across tasks; recording is lock-free for tickers.
pub struct CloudStatistics {
    tickers: [AtomicU64; TICKER_COUNT],
    histograms: [Mutex<HistogramData>; HISTOGRAM_COUNT],
}

impl Default for CloudStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl CloudStatistics {
    pub fn new() -> Self {
        CloudStatistics {
            tickers: [AtomicU64::new(0)],
            histograms: [Mutex::new(HistogramData::default())],
        }
    }

    pub fn record_tick(&self, ticker: Ticker, count: u64) {
        self.tickers[ticker as usize].fetch_add(count, Ordering::Relaxed);
    }

    pub fn ticker_count(&self, ticker: Ticker) -> u64 {
        self.tickers[ticker as usize].load(Ordering::Relaxed)
    }

    pub fn measure_time(&self, histogram: HistogramKind, millis: u64) {
        self.histograms[histogram as usize].lock().record(millis);
    }

    pub fn histogram_data(&self, histogram: HistogramKind) -> HistogramData {
        self.histograms[histogram as usize].lock().clone()
    }
}
