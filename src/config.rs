use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Smallest key or value the harness accepts, in bytes.
pub const MIN_KV_SIZE: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("path is empty")]
    EmptyPath,

    #[error("path `{}` already exists", .0.display())]
    PathExists(PathBuf),

    #[error("invalid mode `{0}`, expected one of insert, get, mixed, scan")]
    InvalidMode(String),

    #[error("key_size or value_size too small, must >= {}", MIN_KV_SIZE)]
    SizeTooSmall { key_size: usize, value_size: usize },

    #[error("insert ratio must be between 0 and 100, got {0}")]
    InsertRatioOutOfRange(u32),

    #[error("threads must be at least 1")]
    NoThreads,

    #[error("key `{key}` does not fit in {key_size} bytes")]
    KeyTooLong { key: String, key_size: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Insert,
    Get,
    Mixed,
    Scan,
}

impl Mode {
    /// get and scan read keys that a load phase wrote beforehand.
    pub fn needs_preload(self) -> bool {
        matches!(self, Mode::Get | Mode::Scan)
    }

    /// Share of inserts reported for this mode.
    pub fn effective_ratio(self, insert_ratio: u32) -> u32 {
        match self {
            Mode::Insert => 100,
            Mode::Get | Mode::Scan => 0,
            Mode::Mixed => insert_ratio,
        }
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(Mode::Insert),
            "get" => Ok(Mode::Get),
            "mixed" => Ok(Mode::Mixed),
            "scan" => Ok(Mode::Scan),
            other => Err(ConfigError::InvalidMode(other.to_owned())),
        }
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Mode::Insert => "insert",
            Mode::Get => "get",
            Mode::Mixed => "mixed",
            Mode::Scan => "scan",
        };
        f.write_str(s)
    }
}

/// Immutable parameters of one benchmark run.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub mode: Mode,
    pub threads: usize,
    pub iterations: usize,
    /// Divide `iterations` over the threads instead of running it on each.
    pub split_iterations: bool,
    pub key_size: usize,
    pub value_size: usize,
    pub insert_ratio: u32,
    pub random: bool,
    pub record_latency: bool,
    pub path: PathBuf,
}

impl BenchConfig {
    pub fn new(mode: Mode, path: impl Into<PathBuf>) -> Self {
        BenchConfig {
            mode,
            threads: 4,
            iterations: 100_000,
            split_iterations: false,
            key_size: 16,
            value_size: 1024,
            insert_ratio: 30,
            random: false,
            record_latency: false,
            path: path.into(),
        }
    }

    pub fn keys_per_thread(&self) -> usize {
        if self.split_iterations {
            self.iterations / self.threads.max(1)
        } else {
            self.iterations
        }
    }

    pub fn total_keys(&self) -> usize {
        self.keys_per_thread() * self.threads
    }

    /// Checks every precondition of a run, including that the storage path
    /// does not exist yet.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPath);
        }
        if self.path.exists() {
            return Err(ConfigError::PathExists(self.path.clone()));
        }
        if self.key_size < MIN_KV_SIZE || self.value_size < MIN_KV_SIZE {
            return Err(ConfigError::SizeTooSmall {
                key_size: self.key_size,
                value_size: self.value_size,
            });
        }
        if self.insert_ratio > 100 {
            return Err(ConfigError::InsertRatioOutOfRange(self.insert_ratio));
        }
        if self.threads == 0 {
            return Err(ConfigError::NoThreads);
        }
        Ok(())
    }
}
