//! The core load-generation functionality: operation execution, the phase driver, and run
//! orchestration.
//!
//! A run executes one **phase** per operation kind, in the fixed order of [`OpKind::ALL`]. A
//! phase issues its operations in **batches**: up to `batch` operations are launched
//! concurrently, routed round-robin over the connection pool, and the driver waits for the whole
//! batch to finish before launching the next. This caps peak concurrency and the memory held by
//! in-flight futures independent of the phase size, trading some tail latency (a straggler
//! delays the next batch) for predictable resource usage. Phases never overlap, and batch `n + 1`
//! never starts before batch `n` has fully completed.
//!
//! Every completed operation forwards its [`Outcome`] through an unbounded channel to a single
//! aggregation task that owns the [`Recorder`], so workers never touch shared mutable state.
//! Per-operation failures are absorbed at that boundary; only startup errors and worker panics
//! terminate a run.
//!
//! ## Output Format
//!
//! Each finished phase prints one plain-text line:
//!
//! ```txt
//! phase SET ops 20000 duration 2.47 ops_per_sec 8097.17
//! ```
//!
//! followed, after the last phase, by the report described in [`crate::report`]. Total run
//! duration is measured from the top-level wall clock, not by summing phase durations, so
//! inter-phase overhead is included once at the top level only.

use crate::client::{Pool, StoreClient, StoreConn};
use crate::report;
use crate::stats::Recorder;
use crate::workload::{self, Payload};
use crate::{OpKind, Outcome, StressError};
use futures::future::join_all;
use log::{debug, info};
use quanta::Instant;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Default number of pooled connections, which is also the concurrency width.
pub const DEFAULT_CLIENTS: usize = 100;

/// Default total operation budget for a whole run, split evenly across the kinds.
pub const DEFAULT_TOTAL_OPS: u64 = 100_000;

/// Validated sizing parameters of a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunConfig {
    clients: usize,
    total_ops: u64,
    batch: u64,
}

impl RunConfig {
    /// Validate and build a run configuration.
    ///
    /// `total_ops` must split evenly across the operation kinds, and `batch` must be a positive
    /// multiple of `clients` so that a batch visits every connection index the same number of
    /// times and no connection is double-booked within one wave of launches.
    pub fn new(clients: usize, total_ops: u64, batch: u64) -> Result<Self, StressError> {
        if clients == 0 {
            return Err(StressError::Config("clients should be positive".to_string()));
        }
        let kinds = OpKind::ALL.len() as u64;
        if total_ops == 0 || total_ops % kinds != 0 {
            return Err(StressError::Config(format!(
                "total_ops ({}) should be a positive multiple of the {} operation kinds",
                total_ops, kinds
            )));
        }
        if batch == 0 || batch % clients as u64 != 0 {
            return Err(StressError::Config(format!(
                "batch ({}) should be a positive multiple of clients ({})",
                batch, clients
            )));
        }
        Ok(Self {
            clients,
            total_ops,
            batch,
        })
    }

    pub fn clients(&self) -> usize {
        self.clients
    }

    pub fn total_ops(&self) -> u64 {
        self.total_ops
    }

    pub fn batch(&self) -> u64 {
        self.batch
    }

    /// Operations issued per phase.
    pub fn ops_per_phase(&self) -> u64 {
        self.total_ops / OpKind::ALL.len() as u64
    }
}

/// Wall-clock duration and throughput of one finished phase.
#[derive(Clone, Copy, Debug)]
pub struct PhaseStats {
    pub duration_secs: f64,
    pub ops_per_sec: f64,
}

/// Execute operation `seq` of `kind` on `conn`, timing the remote call only.
///
/// Payload construction happens before the clock starts. Errors are final: the outcome is
/// [`Outcome::Failed`] and nothing is retried here.
pub async fn execute<C: StoreConn>(
    mut conn: C,
    kind: OpKind,
    seq: u64,
    ops_per_phase: u64,
) -> Outcome {
    let payload = workload::derive(kind, seq, ops_per_phase);
    let start = Instant::now();
    let result = match &payload {
        Payload::Set { key, value } => conn.set(key, value).await,
        Payload::Get { key } => conn.get(key).await.map(|_| ()),
        Payload::Incr { key } => conn.incr(key).await.map(|_| ()),
        Payload::Lpush { key, value } => conn.lpush(key, value).await,
        Payload::Hset { key, field, value } => conn.hset(key, field, value).await,
    };
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    match result {
        Ok(()) => Outcome::Ok { latency_ms },
        Err(e) => {
            debug!("{} op {} failed: {}", kind, seq, e);
            Outcome::Failed
        }
    }
}

/// Issue `ops` operations of `kind` over the pool, at most `batch` concurrently in flight.
///
/// Operation `i` is routed to `pool.get(i)`, i.e. connection `i mod size`. Each outcome is sent
/// to `sink` as the operation completes. The final partial batch, if any, is still awaited in
/// full before the phase is considered complete.
pub async fn run_phase<C: StoreConn + Clone>(
    kind: OpKind,
    ops: u64,
    pool: &Pool<C>,
    batch: u64,
    sink: &UnboundedSender<(OpKind, Outcome)>,
) -> Result<PhaseStats, StressError> {
    debug!("phase {} starting: {} ops, batch {}", kind, ops, batch);
    let start = Instant::now();
    let mut issued = 0u64;
    while issued < ops {
        let n = batch.min(ops - issued);
        let mut handles = Vec::with_capacity(n as usize);
        for seq in issued..issued + n {
            let conn = pool.get(seq);
            let sink = sink.clone();
            handles.push(tokio::spawn(async move {
                let outcome = execute(conn, kind, seq, ops).await;
                // the receiver outlives all phases; a send can only fail on aggregator panic,
                // which the join below reports
                let _ = sink.send((kind, outcome));
            }));
        }
        for joined in join_all(handles).await {
            joined.map_err(StressError::Task)?;
        }
        issued += n;
    }
    let duration_secs = start.elapsed().as_secs_f64();
    Ok(PhaseStats {
        duration_secs,
        ops_per_sec: ops as f64 / duration_secs,
    })
}

/// The single consumer of operation outcomes. Owns the recorder for the whole run.
async fn aggregate(mut outcomes: UnboundedReceiver<(OpKind, Outcome)>) -> Recorder {
    let mut recorder = Recorder::new();
    while let Some((kind, outcome)) = outcomes.recv().await {
        match outcome {
            Outcome::Ok { latency_ms } => recorder.record(kind, latency_ms),
            Outcome::Failed => recorder.record_error(kind),
        }
    }
    recorder
}

/// Run all phases over an already connected pool and return the filled recorder together with
/// the total wall-clock duration in seconds.
pub(crate) async fn drive<C: StoreConn + Clone>(
    pool: &Pool<C>,
    config: &RunConfig,
) -> Result<(Recorder, f64), StressError> {
    let (sink, outcomes) = mpsc::unbounded_channel();
    let aggregator = tokio::spawn(aggregate(outcomes));
    let ops = config.ops_per_phase();
    let start = Instant::now();
    for kind in OpKind::ALL {
        let phase = run_phase(kind, ops, pool, config.batch(), &sink).await?;
        println!(
            "phase {} ops {} duration {:.2} ops_per_sec {:.2}",
            kind, ops, phase.duration_secs, phase.ops_per_sec
        );
    }
    let total_secs = start.elapsed().as_secs_f64();
    // closing the channel lets the aggregator drain the remaining outcomes and finish
    drop(sink);
    let recorder = aggregator.await.map_err(StressError::Task)?;
    Ok((recorder, total_secs))
}

/// Connect the pool, run all phases, print the report, and tear the pool down.
///
/// Teardown is attempted best-effort even when a phase fails mid-run; only the original error is
/// propagated in that case.
pub async fn run<S>(client: &S, config: &RunConfig) -> Result<(), StressError>
where
    S: StoreClient,
{
    info!("connecting {} store clients", config.clients());
    let pool = Pool::connect(client, config.clients()).await?;
    let driven = drive(&pool, config).await;
    let result = match driven {
        Ok((recorder, total_secs)) => {
            print!("{}", report::render(&recorder, total_secs));
            Ok(())
        }
        Err(e) => Err(e),
    };
    pool.disconnect_all().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{StoreClient, StoreConn, StoreError};
    use async_trait::async_trait;
    use hashbrown::HashMap;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Shared instrumentation behind all connections of one fake store.
    #[derive(Default)]
    struct FakeState {
        map: Mutex<HashMap<String, String>>,
        calls: AtomicU64,
        inflight: AtomicUsize,
        max_inflight: AtomicUsize,
    }

    /// An in-memory store that counts concurrent in-flight calls and can fail deterministically.
    #[derive(Default)]
    struct FakeStore {
        state: Arc<FakeState>,
        fail_every: Option<u64>,
        fail_connects_from: Option<usize>,
        delay: Option<Duration>,
        next_id: AtomicUsize,
    }

    impl FakeStore {
        fn new() -> Self {
            Self::default()
        }

        fn failing_every(n: u64) -> Self {
            Self {
                fail_every: Some(n),
                ..Self::default()
            }
        }

        fn with_delay(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }
    }

    #[derive(Clone)]
    struct FakeConn {
        id: usize,
        state: Arc<FakeState>,
        fail_every: Option<u64>,
        delay: Option<Duration>,
    }

    impl FakeConn {
        async fn call(&self) -> Result<(), StoreError> {
            let now = self.state.inflight.fetch_add(1, Ordering::SeqCst) + 1;
            self.state.max_inflight.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.state.inflight.fetch_sub(1, Ordering::SeqCst);
            let nth = self.state.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(every) = self.fail_every {
                if nth % every == 0 {
                    return Err(StoreError::Other(format!("injected failure on call {}", nth)));
                }
            }
            Ok(())
        }
    }

    #[async_trait]
    impl StoreClient for FakeStore {
        type Conn = FakeConn;

        async fn connect(&self) -> Result<FakeConn, StoreError> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            if let Some(from) = self.fail_connects_from {
                if id >= from {
                    return Err(StoreError::Other(format!("connection {} refused", id)));
                }
            }
            Ok(FakeConn {
                id,
                state: self.state.clone(),
                fail_every: self.fail_every,
                delay: self.delay,
            })
        }
    }

    #[async_trait]
    impl StoreConn for FakeConn {
        async fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
            self.call().await?;
            self.state.map.lock().insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn get(&mut self, key: &str) -> Result<Option<String>, StoreError> {
            self.call().await?;
            Ok(self.state.map.lock().get(key).cloned())
        }

        async fn incr(&mut self, key: &str) -> Result<i64, StoreError> {
            self.call().await?;
            let mut map = self.state.map.lock();
            let n = map.get(key).and_then(|v| v.parse::<i64>().ok()).unwrap_or(0) + 1;
            map.insert(key.to_string(), n.to_string());
            Ok(n)
        }

        async fn lpush(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
            self.call().await?;
            self.state.map.lock().insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn hset(&mut self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
            self.call().await?;
            let compound = format!("{}#{}", key, field);
            self.state.map.lock().insert(compound, value.to_string());
            Ok(())
        }
    }

    fn recorder_channel() -> (
        UnboundedSender<(OpKind, Outcome)>,
        tokio::task::JoinHandle<Recorder>,
    ) {
        let (sink, outcomes) = mpsc::unbounded_channel();
        (sink, tokio::spawn(aggregate(outcomes)))
    }

    #[test]
    fn config_validation() {
        assert!(RunConfig::new(100, 100_000, 1000).is_ok());
        assert!(matches!(
            RunConfig::new(0, 100_000, 1000),
            Err(StressError::Config(_))
        ));
        assert!(matches!(
            RunConfig::new(5, 33, 10),
            Err(StressError::Config(_))
        ));
        assert!(matches!(
            RunConfig::new(2, 20, 7),
            Err(StressError::Config(_))
        ));
        assert!(matches!(
            RunConfig::new(2, 20, 0),
            Err(StressError::Config(_))
        ));
    }

    #[test]
    fn config_splits_ops_evenly() {
        let config = RunConfig::new(100, 100_000, 1000).unwrap();
        assert_eq!(config.ops_per_phase(), 20_000);
    }

    #[tokio::test]
    async fn round_robin_routing() {
        let store = FakeStore::new();
        let pool = Pool::connect(&store, 3).await.unwrap();
        let ids: Vec<usize> = (0..9).map(|i| pool.get(i).id).collect();
        assert_eq!(ids, vec![0, 1, 2, 0, 1, 2, 0, 1, 2]);
    }

    #[tokio::test]
    async fn pool_connect_failure_is_fatal() {
        let store = FakeStore {
            fail_connects_from: Some(2),
            ..FakeStore::default()
        };
        let result = Pool::connect(&store, 4).await;
        assert!(matches!(result, Err(StressError::Connect(_))));
    }

    #[tokio::test]
    async fn in_flight_never_exceeds_batch() {
        let store = FakeStore::with_delay(Duration::from_millis(2));
        let pool = Pool::connect(&store, 4).await.unwrap();
        let (sink, aggregator) = recorder_channel();
        run_phase(OpKind::Set, 40, &pool, 8, &sink).await.unwrap();
        drop(sink);
        let recorder = aggregator.await.unwrap();
        assert_eq!(recorder.kind_samples(OpKind::Set).len(), 40);
        assert!(store.state.max_inflight.load(Ordering::SeqCst) <= 8);
        assert!(store.state.max_inflight.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn set_phase_end_to_end() {
        let store = FakeStore::with_delay(Duration::from_millis(1));
        let pool = Pool::connect(&store, 2).await.unwrap();
        let (sink, aggregator) = recorder_channel();
        let phase = run_phase(OpKind::Set, 10, &pool, 4, &sink).await.unwrap();
        drop(sink);
        let recorder = aggregator.await.unwrap();

        assert_eq!(store.state.calls.load(Ordering::SeqCst), 10);
        assert_eq!(store.state.map.lock().len(), 10);
        assert_eq!(recorder.kind_samples(OpKind::Set).len(), 10);
        assert_eq!(recorder.kind_errors(OpKind::Set), 0);
        assert!(phase.duration_secs > 0.0);
        assert!((phase.ops_per_sec - 10.0 / phase.duration_secs).abs() < 1e-9);
    }

    #[tokio::test]
    async fn failures_are_counted_not_sampled() {
        let store = FakeStore::failing_every(3);
        let pool = Pool::connect(&store, 3).await.unwrap();
        let (sink, aggregator) = recorder_channel();
        run_phase(OpKind::Incr, 30, &pool, 6, &sink).await.unwrap();
        drop(sink);
        let recorder = aggregator.await.unwrap();

        assert_eq!(recorder.kind_errors(OpKind::Incr), 10);
        assert_eq!(recorder.kind_samples(OpKind::Incr).len(), 20);
        assert_eq!(recorder.total_samples(), 20);
        assert_eq!(recorder.total_errors(), 10);
    }

    #[tokio::test]
    async fn full_run_preserves_count_invariant() {
        let store = FakeStore::new();
        let config = RunConfig::new(5, 50, 10).unwrap();
        let pool = Pool::connect(&store, config.clients()).await.unwrap();
        let (recorder, total_secs) = drive(&pool, &config).await.unwrap();

        for kind in OpKind::ALL {
            let issued = config.ops_per_phase();
            let done = recorder.kind_samples(kind).len() as u64 + recorder.kind_errors(kind);
            assert_eq!(done, issued, "kind {}", kind);
        }
        assert_eq!(recorder.total_samples() + recorder.total_errors(), 50);
        assert!(total_secs > 0.0);
        pool.disconnect_all().await;
    }

    #[tokio::test]
    async fn get_phase_reads_keys_written_by_set() {
        let store = FakeStore::new();
        let config = RunConfig::new(2, 10, 4).unwrap();
        let pool = Pool::connect(&store, config.clients()).await.unwrap();
        let (recorder, _) = drive(&pool, &config).await.unwrap();

        // 2 ops per phase: SET wrote stress:SET:0 and stress:SET:1, GET read them back
        assert!(store.state.map.lock().contains_key("stress:SET:0"));
        assert!(store.state.map.lock().contains_key("stress:SET:1"));
        assert_eq!(recorder.kind_samples(OpKind::Get).len(), 2);
    }

    #[tokio::test]
    async fn run_succeeds_against_fake_store() {
        let store = FakeStore::new();
        let config = RunConfig::new(5, 25, 5).unwrap();
        assert!(run(&store, &config).await.is_ok());
        assert_eq!(store.state.calls.load(Ordering::SeqCst), 25);
    }
}
