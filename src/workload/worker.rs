use crate::clock::Clock;
use crate::config::{BenchConfig, Mode};
use crate::database::{Database, DbError, prefix_upper_bound};
use crate::generator::{Op, OpSelector, key_prefix};
use crate::workload::coordinator::{OpCounter, StartGate};
use anyhow::{Context, Result};
use hdrhistogram::Histogram;

pub(crate) fn new_histogram() -> Result<Histogram<u64>> {
    Ok(Histogram::new_with_bounds(1, 10_000_000, 3)?)
}

/// What one worker did during the timed phase.
#[derive(Debug)]
pub struct WorkerStats {
    pub ops: u64,
    pub inserts: u64,
    pub lookups: u64,
    pub misses: u64,
    pub scanned: u64,
    pub insert_hist: Histogram<u64>,
    pub lookup_hist: Histogram<u64>,
    pub scan_hist: Histogram<u64>,
}

impl WorkerStats {
    fn new() -> Result<Self> {
        Ok(WorkerStats {
            ops: 0,
            inserts: 0,
            lookups: 0,
            misses: 0,
            scanned: 0,
            insert_hist: new_histogram()?,
            lookup_hist: new_histogram()?,
            scan_hist: new_histogram()?,
        })
    }
}

/// Shared by every worker of a run.
pub(crate) struct WorkerContext<'a> {
    pub db: &'a dyn Database,
    pub config: &'a BenchConfig,
    pub value: &'a [u8],
    pub gate: &'a StartGate,
    pub counter: &'a OpCounter,
}

fn timed<T>(
    record: bool,
    hist: &mut Histogram<u64>,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    if !record {
        return f();
    }
    let clock = Clock::now();
    let out = f()?;
    hist.saturating_record(clock.elapsed_micros() as u64);
    Ok(out)
}

pub(crate) fn insert(db: &dyn Database, key: &[u8], value: &[u8]) -> Result<()> {
    let mut tx = db.begin()?;
    tx.put(key, value)
        .and_then(|_| tx.commit())
        .with_context(|| format!("insert of `{}` failed", String::from_utf8_lossy(key)))
}

/// Returns whether the key was found. A missing key is not an error.
pub(crate) fn lookup(db: &dyn Database, key: &[u8]) -> Result<bool> {
    let mut tx = db.begin()?;
    let found = match tx.get(key) {
        Ok(v) => {
            std::hint::black_box(v);
            true
        }
        Err(DbError::NotFound) => false,
        Err(e) => {
            return Err(e)
                .with_context(|| format!("lookup of `{}` failed", String::from_utf8_lossy(key)));
        }
    };
    tx.commit()?;
    Ok(found)
}

/// Scans the keys of worker `tid` under a snapshot, returning the number of
/// pairs read.
pub(crate) fn scan_own_keys(db: &dyn Database, tid: usize) -> Result<u64> {
    let prefix = key_prefix(tid).into_bytes();
    let upper = prefix_upper_bound(&prefix).context("key prefix has no upper bound")?;
    let snapshot = db.snapshot()?;
    let scanned = db.scan(&prefix, &upper, Some(&snapshot)).and_then(|iter| {
        let mut n = 0u64;
        for item in iter {
            std::hint::black_box(item?);
            n += 1;
        }
        Ok(n)
    });
    db.release(snapshot);
    Ok(scanned?)
}

/// Body of worker `tid`: wait at the gate, run `keys` in order, then add
/// the completed count to the shared counter.
pub(crate) fn run(ctx: &WorkerContext<'_>, tid: usize, keys: &[Vec<u8>]) -> Result<WorkerStats> {
    let stats = WorkerStats::new();
    let mut selector = OpSelector::new(ctx.config.insert_ratio);
    let record = ctx.config.record_latency;
    let db = ctx.db;

    // every worker must reach the gate, even one that is about to fail
    ctx.gate.wait();
    let mut stats = stats?;

    match ctx.config.mode {
        Mode::Insert => {
            for key in keys {
                timed(record, &mut stats.insert_hist, || insert(db, key, ctx.value))?;
                stats.inserts += 1;
            }
        }
        Mode::Get => {
            for key in keys {
                let found = timed(record, &mut stats.lookup_hist, || lookup(db, key))?;
                stats.lookups += 1;
                stats.misses += u64::from(!found);
            }
        }
        Mode::Mixed => {
            for key in keys {
                match selector.next_op() {
                    Op::Insert => {
                        timed(record, &mut stats.insert_hist, || insert(db, key, ctx.value))?;
                        stats.inserts += 1;
                    }
                    Op::Lookup => {
                        let found = timed(record, &mut stats.lookup_hist, || lookup(db, key))?;
                        stats.lookups += 1;
                        stats.misses += u64::from(!found);
                    }
                }
            }
        }
        Mode::Scan => {
            stats.scanned = timed(record, &mut stats.scan_hist, || scan_own_keys(db, tid))?;
        }
    }

    stats.ops = stats.inserts + stats.lookups + stats.scanned;
    ctx.counter.add(stats.ops);
    log::debug!("worker {tid} finished {} ops", stats.ops);
    Ok(stats)
}
