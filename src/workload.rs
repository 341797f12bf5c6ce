//! Deterministic payload derivation for the five operation kinds.
//!
//! Keys are derived from the operation kind and its sequence index so that every kind works on a
//! bounded key space. The phases of a run execute in the fixed order of [`OpKind::ALL`], so by
//! the time the `GET` phase reads back `stress:SET:*` keys, the `SET` phase has already written
//! them. `INCR`, `LPUSH` and `HSET` wrap their indices into small fixed slot spaces, which keeps
//! the working set bounded and produces read-modify-write contention on the counters.

use crate::OpKind;
use std::time::{SystemTime, UNIX_EPOCH};

/// Slots in the `stress:counter:*` key space.
pub const COUNTER_SLOTS: u64 = 1000;
/// Slots in the `stress:list:*` key space.
pub const LIST_SLOTS: u64 = 100;
/// Slots in the `stress:hash:*` key space.
pub const HASH_SLOTS: u64 = 100;

/// A fully derived operation payload, ready to be issued against one connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Set { key: String, value: String },
    Get { key: String },
    Incr { key: String },
    Lpush { key: String, value: String },
    Hset { key: String, field: String, value: String },
}

/// Derive the payload for operation `seq` of `kind`.
///
/// `ops_per_phase` bounds the key space the `GET` phase reads from; it must be positive.
pub fn derive(kind: OpKind, seq: u64, ops_per_phase: u64) -> Payload {
    match kind {
        OpKind::Set => Payload::Set {
            key: format!("stress:SET:{}", seq),
            value: value_for(seq),
        },
        OpKind::Get => Payload::Get {
            key: format!("stress:SET:{}", seq % ops_per_phase),
        },
        OpKind::Incr => Payload::Incr {
            key: format!("stress:counter:{}", seq % COUNTER_SLOTS),
        },
        OpKind::Lpush => Payload::Lpush {
            key: format!("stress:list:{}", seq % LIST_SLOTS),
            value: value_for(seq),
        },
        OpKind::Hset => Payload::Hset {
            key: format!("stress:hash:{}", seq % HASH_SLOTS),
            field: format!("field_{}", seq),
            value: value_for(seq),
        },
    }
}

/// A value embedding the sequence index and the current wall-clock time in milliseconds.
fn value_for(seq: u64) -> String {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("value:{}:{}", seq, now_ms)
}
