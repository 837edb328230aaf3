mod clock;
mod config;
mod database;
mod generator;
mod report;
mod workload;

use crate::clock::Clock;
use crate::config::{BenchConfig, ConfigError, Mode};
use crate::database::open_db;
use crate::report::{CSV_HEADER, RunResult};
use crate::workload::Workload;
use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tempfile::TempDir;

#[derive(Parser)]
#[command(version, about = "Concurrent key-value engine benchmark", long_about = None)]
struct Cli {
    /// insert, get, mixed or scan
    #[arg(short = 'm', long, default_value = "insert")]
    mode: String,

    #[arg(short = 'e', long, value_enum, default_value = "sled")]
    engine: DatabaseType,

    #[arg(short = 't', long, default_value = "4")]
    threads: usize,

    #[arg(short = 'k', long, default_value = "16")]
    key_size: usize,

    #[arg(short = 'v', long, default_value = "1024")]
    value_size: usize,

    /// Operations per thread
    #[arg(short = 'i', long, default_value = "100000")]
    iterations: usize,

    /// Treat --iterations as a total divided over the threads
    #[arg(long)]
    split_iterations: bool,

    /// Percentage of inserts in mixed mode
    #[arg(short = 'r', long, default_value = "30")]
    insert_ratio: u32,

    /// Storage directory, must not exist. Defaults to a temporary directory.
    #[arg(short = 'p', long)]
    path: Option<PathBuf>,

    /// Shuffle each thread's keys
    #[arg(
        long,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true"
    )]
    random: bool,

    /// Print latency percentiles to stderr
    #[arg(long)]
    latency: bool,

    /// Print throughput with two decimals
    #[arg(long)]
    decimal: bool,

    /// Print the CSV header before the result
    #[arg(long)]
    header: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
// Update database::open_db when adding new variation
enum DatabaseType {
    MemBtree,
    Sled,
    Redb,
}

impl Cli {
    fn to_config(&self, path: PathBuf) -> Result<BenchConfig, ConfigError> {
        let mode: Mode = self.mode.parse()?;
        let mut config = BenchConfig::new(mode, path);
        config.threads = self.threads;
        config.iterations = self.iterations;
        config.split_iterations = self.split_iterations;
        config.key_size = self.key_size;
        config.value_size = self.value_size;
        config.insert_ratio = self.insert_ratio;
        config.random = self.random;
        config.record_latency = self.latency;
        config.validate()?;
        Ok(config)
    }
}

/// Owns the storage directory of a run and removes it on drop.
struct StorageDir {
    path: PathBuf,
}

impl StorageDir {
    fn create(path: &Path) -> Result<Self> {
        std::fs::create_dir(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        Ok(StorageDir {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for StorageDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            warn!("failed to remove {}: {e}", self.path.display());
        }
    }
}

fn config_error(e: ConfigError) -> ExitCode {
    println!("Error: {e}");
    ExitCode::FAILURE
}

fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let clock = Clock::now();

    // keeps the default location alive until the run is over
    let (_tmp, path) = match &cli.path {
        Some(p) => (None, p.clone()),
        None => {
            let tmp = TempDir::with_prefix("kvharness")?;
            let path = tmp.path().join("db");
            (Some(tmp), path)
        }
    };

    let config = match cli.to_config(path) {
        Ok(config) => config,
        Err(e) => return Ok(config_error(e)),
    };
    let wl = match Workload::new(config) {
        Ok(wl) => wl,
        Err(e) => return Ok(config_error(e)),
    };
    let config = wl.config();

    let storage = StorageDir::create(&config.path)?;
    let db = open_db(cli.engine, &storage.path)
        .with_context(|| format!("failed to open {:?} at {}", cli.engine, config.path.display()))?;
    info!("opened {} at {}", db.name(), config.path.display());

    let mut stats = wl.init_stats()?;
    wl.exec_load(db.as_ref(), &mut stats)?;
    wl.exec_run(db.as_ref(), &mut stats)?;
    db.close()?;
    drop(db);

    if cli.latency {
        eprintln!("{stats}");
    }
    if cli.header {
        println!("{CSV_HEADER}");
    }
    println!("{}", RunResult::from_stats(config, &stats).decimal(cli.decimal));
    info!("finished in {:.1} ms including setup", clock.elapsed_millis());
    Ok(ExitCode::SUCCESS)
}
