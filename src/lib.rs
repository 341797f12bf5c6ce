//! A stress tester for key-value stores with a fixed five-kind workload and latency reporting.
//!
//! `kvstress` drives a fixed population of independent client connections through five operation
//! kinds (`SET`, `GET`, `INCR`, `LPUSH`, `HSET`) against a remote store, one phase per kind. Each
//! phase issues its operations in bounded batches so that the number of in-flight requests (and
//! the memory held by their futures) stays capped regardless of the phase size. Every completed
//! operation is timed around the remote call only, and the resulting samples are funneled through
//! a single aggregation task that owns all counters, so no shared mutable state is touched from
//! the workers.
//!
//! At the end of a run the tool prints an overall summary (operations, errors, duration,
//! throughput and nearest-rank latency percentiles) followed by a per-kind breakdown.
//!
//! A few key design choices include:
//!
//! - The operation kinds, their order, and their key derivation are fixed. Repeated runs exercise
//! a bounded key space per kind, so read-style phases hit keys written by earlier phases.
//! - The store is a black box behind the [`client::StoreClient`]/[`client::StoreConn`] traits;
//! the shipped implementation talks to any Redis-compatible endpoint.
//! - Failures of individual operations are counted, never retried, and never abort a phase. Only
//! startup errors and programming faults terminate the run.
//!
//! More detailed usage could be found in the module-level rustdocs:
//!
//! - [`mod@bench`] for the phase driver and run orchestration.
//! - [`mod@workload`] for the per-kind key derivation.
//! - [`cmdline()`] for the command line interface and configuration.

use thiserror::Error;

/// The closed set of operation kinds a run executes, in no particular order by itself.
///
/// The phase order of a run is fixed by [`OpKind::ALL`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpKind {
    Set,
    Get,
    Incr,
    Lpush,
    Hset,
}

impl OpKind {
    /// All kinds in the order their phases run.
    pub const ALL: [OpKind; 5] = [
        OpKind::Set,
        OpKind::Get,
        OpKind::Incr,
        OpKind::Lpush,
        OpKind::Hset,
    ];

    /// The wire-style name of the kind, also used in key derivation and reports.
    pub fn name(self) -> &'static str {
        match self {
            OpKind::Set => "SET",
            OpKind::Get => "GET",
            OpKind::Incr => "INCR",
            OpKind::Lpush => "LPUSH",
            OpKind::Hset => "HSET",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The result of one executed operation: either a latency sample or a counted failure, never
/// both.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Outcome {
    /// The remote call succeeded, with its wall-clock latency in milliseconds.
    Ok { latency_ms: f64 },
    /// The remote call failed. Failures produce no latency sample.
    Failed,
}

/// Errors that terminate a run. Per-operation store failures are absorbed by the executor and
/// never surface here.
#[derive(Debug, Error)]
pub enum StressError {
    #[error("configuration: {0}")]
    Config(String),

    #[error("startup: {0}")]
    Connect(client::StoreError),

    #[error("worker task failed: {0}")]
    Task(tokio::task::JoinError),

    #[error("runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

pub mod bench;
pub mod client;
mod cmdline;
pub mod report;
pub mod stats;
pub mod workload;

pub use cmdline::cmdline;
