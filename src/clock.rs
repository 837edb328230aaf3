use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

/// Monotonic stopwatch.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    start: Instant,
}

impl Clock {
    pub fn now() -> Self {
        Clock {
            start: Instant::now(),
        }
    }

    pub fn reset(&mut self) {
        self.start = Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }

    pub fn elapsed_millis(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1e3
    }

    pub fn elapsed_micros(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1e6
    }
}

const UNSET: u8 = 0;
const STARTING: u8 = 1;
const STARTED: u8 = 2;

/// The clock of the timed phase, started once by whichever worker leaves
/// the start barrier first.
///
/// The winner of the compare-and-swap resets the clock and then publishes
/// it; every other caller of [`RunClock::start`] waits for the publication,
/// so no worker can issue an operation before the start instant.
#[derive(Debug)]
pub struct RunClock {
    state: AtomicU8,
    clock: Mutex<Clock>,
}

impl Default for RunClock {
    fn default() -> Self {
        RunClock {
            state: AtomicU8::new(UNSET),
            clock: Mutex::new(Clock::now()),
        }
    }
}

impl RunClock {
    /// Returns true for the single caller that started the clock.
    pub fn start(&self) -> bool {
        match self
            .state
            .compare_exchange(UNSET, STARTING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                self.clock.lock().unwrap_or_else(|e| e.into_inner()).reset();
                self.state.store(STARTED, Ordering::Release);
                true
            }
            Err(_) => {
                while self.state.load(Ordering::Acquire) != STARTED {
                    std::hint::spin_loop();
                }
                false
            }
        }
    }

    pub fn is_started(&self) -> bool {
        self.state.load(Ordering::Acquire) == STARTED
    }

    /// The start instant, once published.
    pub fn started_at(&self) -> Option<Instant> {
        self.is_started().then(|| self.snapshot().start)
    }

    /// Time since the clock was started, or since it was created if no
    /// worker ever started it.
    pub fn elapsed(&self) -> Duration {
        self.snapshot().elapsed()
    }

    fn snapshot(&self) -> Clock {
        *self.clock.lock().unwrap_or_else(|e| e.into_inner())
    }
}
