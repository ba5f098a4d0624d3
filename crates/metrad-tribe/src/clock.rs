use std::sync::atomic::{AtomicU64, Ordering};

use metrad_types::LTime;

/// A Lamport clock: monotonic, witness-updated from remote messages.
#[derive(Debug, Default)]
pub struct LamportClock {
    counter: AtomicU64,
}

impl LamportClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current logical time.
    pub fn time(&self) -> LTime {
        LTime(self.counter.load(Ordering::SeqCst))
    }

    /// Advance the clock and return the new time. Every broadcast carries
    /// the result, so times in program order are strictly increasing.
    pub fn increment(&self) -> LTime {
        LTime(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Fold in a remotely observed time: when `remote >= local` the clock
    /// jumps to `remote + 1`; an older observation changes nothing.
    pub fn witness(&self, remote: LTime) {
        let mut current = self.counter.load(Ordering::SeqCst);
        loop {
            if *remote < current {
                return;
            }
            match self.counter.compare_exchange(
                current,
                *remote + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}
