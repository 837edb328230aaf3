//! The stable, comma separated result line.

use crate::config::{BenchConfig, Mode};
use crate::workload::{WorkloadStats, throughput};
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Column names of [`RunResult`], in output order.
pub const CSV_HEADER: &str = "mode,threads,key_size,value_size,ratio,ops,elapsed_ms";

#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub mode: Mode,
    pub threads: usize,
    pub key_size: usize,
    pub value_size: usize,
    pub ratio: u32,
    /// Operations per second over the timed phase.
    pub throughput: f64,
    pub elapsed_ms: Option<u128>,
    /// Print throughput with two decimals instead of truncating it.
    pub decimal: bool,
}

impl RunResult {
    pub fn new(config: &BenchConfig, total_ops: u64, elapsed: Duration) -> Self {
        RunResult {
            mode: config.mode,
            threads: config.threads,
            key_size: config.key_size,
            value_size: config.value_size,
            ratio: config.mode.effective_ratio(config.insert_ratio),
            throughput: throughput(total_ops, elapsed),
            elapsed_ms: Some(elapsed.as_millis()),
            decimal: false,
        }
    }

    pub fn from_stats(config: &BenchConfig, stats: &WorkloadStats) -> Self {
        Self::new(config, stats.run_ops, stats.run_wall_time)
    }

    pub fn decimal(mut self, decimal: bool) -> Self {
        self.decimal = decimal;
        self
    }
}

impl Display for RunResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{},{},{},{},{},",
            self.mode, self.threads, self.key_size, self.value_size, self.ratio
        )?;
        if self.decimal {
            write!(f, "{:.2}", self.throughput)?;
        } else {
            write!(f, "{}", self.throughput as u64)?;
        }
        if let Some(ms) = self.elapsed_ms {
            write!(f, ",{ms}")?;
        }
        Ok(())
    }
}
