//! Plain-text rendering of run statistics.
//!
//! The report is pure formatting over a filled [`Recorder`]: an overall block followed by a
//! per-kind table in the fixed phase order. Latencies and durations carry two decimal places and
//! counts carry thousands separators; the exact shape is kept stable for output-compatibility
//! checks.

use crate::stats::{stats, Recorder};
use crate::OpKind;
use std::fmt::Write;

/// Render the final report. `total_secs` is the top-level wall-clock duration of the whole run.
pub fn render(recorder: &Recorder, total_secs: f64) -> String {
    let total_ops = recorder.total_samples() + recorder.total_errors();
    let throughput = if total_secs > 0.0 {
        total_ops as f64 / total_secs
    } else {
        0.0
    };
    let overall = recorder.overall();

    let mut out = String::new();
    let _ = writeln!(out, "==== stress report ====");
    let _ = writeln!(
        out,
        "total_ops {} errors {} duration {:.2} ops_per_sec {:.2}",
        group_digits(total_ops),
        group_digits(recorder.total_errors()),
        total_secs,
        throughput,
    );
    let _ = writeln!(
        out,
        "latency_ms avg {:.2} min {:.2} max {:.2} p50 {:.2} p99 {:.2}",
        overall.avg, overall.min, overall.max, overall.p50, overall.p99,
    );
    let _ = writeln!(out, "{:<6} {:>10} {:>8} {:>8}", "kind", "count", "avg_ms", "errors");
    for kind in OpKind::ALL {
        let samples = recorder.kind_samples(kind);
        let _ = writeln!(
            out,
            "{:<6} {:>10} {:>8.2} {:>8}",
            kind.name(),
            group_digits(samples.len() as u64),
            stats(samples).avg,
            group_digits(recorder.kind_errors(kind)),
        );
    }
    out
}

/// Format a count with thousands separators, e.g. `1234567` -> `"1,234,567"`.
pub(crate) fn group_digits(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
