pub mod coordinator;
pub mod worker;

use crate::clock::Clock;
use crate::config::{BenchConfig, ConfigError, Mode};
use crate::database::Database;
use crate::generator::{KeySet, filler_value, generate_keys, make_key};
use crate::workload::coordinator::{OpCounter, StartGate};
use crate::workload::worker::{WorkerContext, WorkerStats, new_histogram};
use anyhow::{Context, Result, anyhow};
use hdrhistogram::Histogram;
use log::{info, warn};
use rand::Rng;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};
use thousands::Separable;

#[derive(Debug)]
pub struct WorkloadStats {
    pub load_time: Duration,
    pub load_ops: u64,
    pub warmup_ops: u64,
    pub run_wall_time: Duration,
    pub run_ops: u64,
    pub run_inserts: u64,
    pub run_lookups: u64,
    pub run_misses: u64,
    pub run_scanned: u64,
    pub run_insert_hist_micro_sec: Histogram<u64>,
    pub run_lookup_hist_micro_sec: Histogram<u64>,
    pub run_scan_hist_micro_sec: Histogram<u64>,
}

impl WorkloadStats {
    pub fn new() -> Result<Self> {
        Ok(WorkloadStats {
            load_time: Duration::ZERO,
            load_ops: 0,
            warmup_ops: 0,
            run_wall_time: Duration::ZERO,
            run_ops: 0,
            run_inserts: 0,
            run_lookups: 0,
            run_misses: 0,
            run_scanned: 0,
            run_insert_hist_micro_sec: new_histogram()?,
            run_lookup_hist_micro_sec: new_histogram()?,
            run_scan_hist_micro_sec: new_histogram()?,
        })
    }

    fn absorb(&mut self, w: WorkerStats) -> Result<()> {
        self.run_inserts += w.inserts;
        self.run_lookups += w.lookups;
        self.run_misses += w.misses;
        self.run_scanned += w.scanned;
        self.run_insert_hist_micro_sec.add(&w.insert_hist)?;
        self.run_lookup_hist_micro_sec.add(&w.lookup_hist)?;
        self.run_scan_hist_micro_sec.add(&w.scan_hist)?;
        Ok(())
    }
}

pub fn throughput(ops: u64, d: Duration) -> f64 {
    if ops == 0 || d.is_zero() {
        0.0
    } else {
        ops as f64 / d.as_secs_f64()
    }
}

fn percentile(h: &Histogram<u64>, q: f64) -> String {
    if h.is_empty() {
        "-".into()
    } else {
        h.value_at_quantile(q).separate_with_underscores()
    }
}

fn latency_line(
    f: &mut Formatter<'_>,
    name: &str,
    ops: u64,
    h: &Histogram<u64>,
) -> std::fmt::Result {
    write!(
        f,
        "{name}: {} | p50: {} µs | p95: {} µs | p99: {} µs | p99.9: {} µs",
        ops.separate_with_underscores(),
        percentile(h, 0.50),
        percentile(h, 0.95),
        percentile(h, 0.99),
        percentile(h, 0.999)
    )
}

impl Display for WorkloadStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== LOAD ===")?;
        writeln!(
            f,
            "ops: {} | time: {:.1?} | throughput: {} ops/s | warmup lookups: {}",
            self.load_ops.separate_with_underscores(),
            self.load_time,
            (throughput(self.load_ops, self.load_time) as u64).separate_with_underscores(),
            self.warmup_ops.separate_with_underscores()
        )?;

        writeln!(f, "=== RUN ===")?;
        writeln!(
            f,
            "ops: {} | time: {:.1?} | throughput: {} ops/s | misses: {}",
            self.run_ops.separate_with_underscores(),
            self.run_wall_time,
            (throughput(self.run_ops, self.run_wall_time) as u64).separate_with_underscores(),
            self.run_misses.separate_with_underscores()
        )?;
        latency_line(f, "insert", self.run_inserts, &self.run_insert_hist_micro_sec)?;
        writeln!(f)?;
        latency_line(f, "lookup", self.run_lookups, &self.run_lookup_hist_micro_sec)?;
        writeln!(f)?;
        latency_line(f, "scan", self.run_scanned, &self.run_scan_hist_micro_sec)
    }
}

/// The generated keys and payload of one run, plus its two phases.
pub struct Workload {
    config: BenchConfig,
    keys: Vec<KeySet>,
    value: Vec<u8>,
}

impl Workload {
    pub fn new(config: BenchConfig) -> Result<Self, ConfigError> {
        let keys = generate_keys(&config)?;
        let value = filler_value(config.value_size);
        info!(
            "generated {} keys of {} bytes for {} threads",
            config.total_keys(),
            config.key_size,
            config.threads
        );
        Ok(Workload {
            config,
            keys,
            value,
        })
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    pub fn init_stats(&self) -> Result<WorkloadStats> {
        WorkloadStats::new()
    }

    /// Writes every key in one transaction and warms the engine up with
    /// lookups, for modes that read existing data. Not timed as part of the
    /// run.
    pub fn exec_load(&self, db: &dyn Database, stats: &mut WorkloadStats) -> Result<()> {
        if !self.config.mode.needs_preload() {
            return Ok(());
        }

        let clock = Clock::now();
        let mut tx = db.begin()?;
        for key in self.keys.iter().flatten() {
            tx.put(key, &self.value)?;
        }
        tx.commit().context("pre-population commit failed")?;
        stats.load_time = clock.elapsed();
        stats.load_ops = self.config.total_keys() as u64;
        info!(
            "loaded {} keys in {:.3}s",
            stats.load_ops.separate_with_underscores(),
            clock.elapsed_secs()
        );

        let mut rng = rand::rng();
        for i in 0..self.config.keys_per_thread() {
            let tid = rng.random_range(0..self.config.threads);
            let key = make_key(tid, i, self.config.key_size)?;
            worker::lookup(db, &key)?;
        }
        stats.warmup_ops = self.config.keys_per_thread() as u64;
        Ok(())
    }

    /// The timed phase: one worker per KeySet, released together by the
    /// start gate. Returns the instant the run clock was started.
    pub fn exec_run(&self, db: &dyn Database, stats: &mut WorkloadStats) -> Result<Instant> {
        let gate = StartGate::new(self.keys.len());
        let counter = OpCounter::default();
        let ctx = WorkerContext {
            db,
            config: &self.config,
            value: &self.value,
            gate: &gate,
            counter: &counter,
        };

        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = self
                .keys
                .iter()
                .enumerate()
                .map(|(tid, keys)| {
                    let ctx = &ctx;
                    s.spawn(move || worker::run(ctx, tid, keys))
                })
                .collect();
            handles.into_iter().map(|h| h.join()).collect()
        });
        // every worker passes the gate before its first fallible step
        let started = gate
            .clock()
            .started_at()
            .context("run clock was never started")?;
        stats.run_wall_time = started.elapsed();

        for (tid, result) in results.into_iter().enumerate() {
            let w = result
                .map_err(|_| anyhow!("worker {tid} panicked"))?
                .with_context(|| format!("worker {tid} failed"))?;
            stats.absorb(w)?;
        }
        stats.run_ops = counter.total();
        debug_assert_eq!(
            stats.run_ops,
            stats.run_inserts + stats.run_lookups + stats.run_scanned
        );

        if self.config.mode == Mode::Get && stats.run_misses > 0 {
            warn!("{} lookups missed pre-populated keys", stats.run_misses);
        }
        info!(
            "run finished: {} ops in {:.1?}",
            stats.run_ops.separate_with_underscores(),
            stats.run_wall_time
        );
        Ok(started)
    }
}
