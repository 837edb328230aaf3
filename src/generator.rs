use crate::config::{BenchConfig, ConfigError, Mode};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng, random};

/// Right padding of generated keys.
pub const KEY_PAD: u8 = b'x';
/// Content of the shared write payload.
pub const VALUE_FILL: u8 = b'0';

/// Keys assigned to one worker, in execution order.
pub type KeySet = Vec<Vec<u8>>;

/// Common prefix of every key owned by worker `tid`.
pub fn key_prefix(tid: usize) -> String {
    format!("key_{tid}_")
}

/// Key `idx` of worker `tid`, padded to exactly `key_size` bytes.
pub fn make_key(tid: usize, idx: usize, key_size: usize) -> Result<Vec<u8>, ConfigError> {
    let key = format!("key_{tid}_{idx}");
    if key.len() > key_size {
        return Err(ConfigError::KeyTooLong { key, key_size });
    }
    let mut bytes = key.into_bytes();
    bytes.resize(key_size, KEY_PAD);
    Ok(bytes)
}

/// The write payload shared read-only by every worker.
pub fn filler_value(value_size: usize) -> Vec<u8> {
    vec![VALUE_FILL; value_size]
}

pub struct KeyGen {
    key_size: usize,
    keys_per_thread: usize,
    shuffle: bool,
    seed: u64,
}

impl KeyGen {
    /// `get` runs always look keys up in shuffled order, other modes only
    /// when `random` is set.
    pub fn new(config: &BenchConfig, seed: u64) -> Self {
        KeyGen {
            key_size: config.key_size,
            keys_per_thread: config.keys_per_thread(),
            shuffle: config.random || config.mode == Mode::Get,
            seed,
        }
    }

    pub fn key_set(&self, tid: usize) -> Result<KeySet, ConfigError> {
        let mut keys = (0..self.keys_per_thread)
            .map(|i| make_key(tid, i, self.key_size))
            .collect::<Result<KeySet, _>>()?;
        if self.shuffle {
            // shuffled only after the whole set exists
            let mut rng = SmallRng::seed_from_u64(self.seed.wrapping_add(tid as u64));
            keys.shuffle(&mut rng);
        }
        Ok(keys)
    }

    pub fn generate(&self, threads: usize) -> Result<Vec<KeySet>, ConfigError> {
        (0..threads).map(|tid| self.key_set(tid)).collect()
    }
}

/// Builds one KeySet per worker with a random shuffle seed.
pub fn generate_keys(config: &BenchConfig) -> Result<Vec<KeySet>, ConfigError> {
    KeyGen::new(config, random()).generate(config.threads)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Insert,
    Lookup,
}

/// Picks insert or lookup for each key of a mixed run. Every worker owns
/// its own selector.
pub struct OpSelector {
    insert_ratio: u32,
    rng: SmallRng,
}

impl OpSelector {
    pub fn new(insert_ratio: u32) -> Self {
        Self::with_seed(insert_ratio, random())
    }

    pub fn with_seed(insert_ratio: u32, seed: u64) -> Self {
        OpSelector {
            insert_ratio,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn next_op(&mut self) -> Op {
        if self.rng.random_range(0..100u32) < self.insert_ratio {
            Op::Insert
        } else {
            Op::Lookup
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn config(mode: Mode, threads: usize, iterations: usize) -> BenchConfig {
        let mut c = BenchConfig::new(mode, "/nonexistent/kvharness");
        c.threads = threads;
        c.iterations = iterations;
        c
    }

    #[test]
    fn key_layout() {
        assert_eq!(make_key(3, 42, 16).unwrap(), b"key_3_42xxxxxxxx".to_vec());
        assert_eq!(make_key(0, 0, 7).unwrap(), b"key_0_0".to_vec());
        assert_eq!(
            make_key(12, 123456, 8),
            Err(ConfigError::KeyTooLong {
                key: "key_12_123456".into(),
                key_size: 8
            })
        );
    }

    #[test]
    fn one_set_per_thread_with_exact_sizes() {
        let mut c = config(Mode::Insert, 3, 250);
        c.key_size = 24;
        let sets = generate_keys(&c).unwrap();
        assert_eq!(sets.len(), 3);
        for set in &sets {
            assert_eq!(set.len(), 250);
            assert!(set.iter().all(|k| k.len() == 24));
        }

        c.split_iterations = true;
        let sets = generate_keys(&c).unwrap();
        assert!(sets.iter().all(|s| s.len() == 83));
    }

    #[test]
    fn keys_are_unique_across_threads() {
        let sets = generate_keys(&config(Mode::Insert, 4, 2000)).unwrap();
        let unique: HashSet<&Vec<u8>> = sets.iter().flatten().collect();
        assert_eq!(unique.len(), 8000);
    }

    #[test]
    fn ordered_unless_randomized() {
        let sets = generate_keys(&config(Mode::Insert, 2, 100)).unwrap();
        for (tid, set) in sets.iter().enumerate() {
            for (i, key) in set.iter().enumerate() {
                assert_eq!(key, &make_key(tid, i, 16).unwrap());
            }
        }
    }

    #[test]
    fn randomize_keeps_content() {
        let plain = generate_keys(&config(Mode::Insert, 2, 500)).unwrap();
        let mut c = config(Mode::Insert, 2, 500);
        c.random = true;
        let shuffled = KeyGen::new(&c, 7).generate(2).unwrap();

        assert_ne!(plain, shuffled);
        for (a, b) in plain.iter().zip(&shuffled) {
            let mut a = a.clone();
            let mut b = b.clone();
            a.sort();
            b.sort();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn same_seed_same_order() {
        let mut c = config(Mode::Insert, 2, 300);
        c.random = true;
        assert_eq!(
            KeyGen::new(&c, 11).generate(2).unwrap(),
            KeyGen::new(&c, 11).generate(2).unwrap()
        );
    }

    #[test]
    fn get_mode_shuffles() {
        let plain = generate_keys(&config(Mode::Insert, 1, 500)).unwrap();
        let get = KeyGen::new(&config(Mode::Get, 1, 500), 3).generate(1).unwrap();
        assert_ne!(plain, get);
    }

    #[test]
    fn filler_has_value_size() {
        let v = filler_value(1024);
        assert_eq!(v.len(), 1024);
        assert!(v.iter().all(|b| *b == VALUE_FILL));
    }

    #[test]
    fn selector_boundaries() {
        let mut never = OpSelector::with_seed(0, 1);
        let mut always = OpSelector::with_seed(100, 1);
        for _ in 0..10_000 {
            assert_eq!(never.next_op(), Op::Lookup);
            assert_eq!(always.next_op(), Op::Insert);
        }
    }

    #[test]
    fn selector_follows_ratio() {
        let mut s = OpSelector::with_seed(30, 99);
        let inserts = (0..100_000).filter(|_| s.next_op() == Op::Insert).count();
        assert!((27_000..33_000).contains(&inserts), "{inserts}");
    }
}
