use crate::clock::RunClock;
use std::sync::Barrier;
use std::sync::atomic::{AtomicU64, Ordering};

/// Releases all workers together and starts the run clock once.
pub struct StartGate {
    barrier: Barrier,
    clock: RunClock,
}

impl StartGate {
    pub fn new(workers: usize) -> Self {
        StartGate {
            barrier: Barrier::new(workers),
            clock: RunClock::default(),
        }
    }

    /// Blocks until every worker arrived. On return the clock is running.
    pub fn wait(&self) -> bool {
        self.barrier.wait();
        self.clock.start()
    }

    pub fn clock(&self) -> &RunClock {
        &self.clock
    }
}

/// Total of operations completed by all workers. Each worker adds its count
/// once, after its loop; the total is read after the workers joined.
#[derive(Debug, Default)]
pub struct OpCounter(AtomicU64);

impl OpCounter {
    pub fn add(&self, ops: u64) {
        self.0.fetch_add(ops, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}
