//! Latency sample collection and descriptive statistics.
//!
//! The [`Recorder`] only appends: raw samples are kept in arrival order, per kind and globally,
//! and nothing is summarized until report time. [`stats`] then sorts a copy and reads the
//! percentiles off the sorted sequence by nearest rank (index `floor(n * fraction)`), without
//! interpolating between adjacent values. This estimator is a known approximation and is kept
//! as-is for output compatibility.

use crate::OpKind;

/// Descriptive statistics over one sample sequence. All values are milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Stats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p99: f64,
}

/// Compute [`Stats`] over a sample sequence. An empty sequence yields all zeroes.
pub fn stats(samples: &[f64]) -> Stats {
    if samples.is_empty() {
        return Stats::default();
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    let avg = sorted.iter().sum::<f64>() / n as f64;
    Stats {
        avg,
        min: sorted[0],
        max: sorted[n - 1],
        p50: nearest_rank(&sorted, 0.5),
        p99: nearest_rank(&sorted, 0.99),
    }
}

fn nearest_rank(sorted: &[f64], fraction: f64) -> f64 {
    let idx = (sorted.len() as f64 * fraction).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Accumulates latency samples and error counts for a whole run.
///
/// Samples are stored twice: in a per-kind sequence and in a global sequence. A failed operation
/// increments the error counters instead, so for every kind
/// `samples(kind).len() + errors(kind)` equals the number of operations issued for that kind.
#[derive(Debug, Default)]
pub struct Recorder {
    all: Vec<f64>,
    samples: [Vec<f64>; OpKind::ALL.len()],
    errors: [u64; OpKind::ALL.len()],
    total_errors: u64,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one latency sample for `kind`. O(1) amortized.
    pub fn record(&mut self, kind: OpKind, latency_ms: f64) {
        self.samples[kind.index()].push(latency_ms);
        self.all.push(latency_ms);
    }

    /// Count one failed operation for `kind`.
    pub fn record_error(&mut self, kind: OpKind) {
        self.errors[kind.index()] += 1;
        self.total_errors += 1;
    }

    pub fn total_samples(&self) -> u64 {
        self.all.len() as u64
    }

    pub fn total_errors(&self) -> u64 {
        self.total_errors
    }

    /// Statistics over the global sample sequence.
    pub fn overall(&self) -> Stats {
        stats(&self.all)
    }

    pub fn kind_samples(&self, kind: OpKind) -> &[f64] {
        &self.samples[kind.index()]
    }

    pub fn kind_errors(&self, kind: OpKind) -> u64 {
        self.errors[kind.index()]
    }
}
