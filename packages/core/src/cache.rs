use std::time::Duration;

use tokio::time::Instant;

/// Holds one value for a fixed time.
///
/// Rollup pollers keep the last L1 base fee read from the fee oracle here so
/// the oracle is queried at most once per TTL rather than every cycle.
#[derive(Debug)]
pub struct TtlCache<T> {
    entry: Option<(T, Instant)>,
    ttl: Duration,
}

impl<T: Copy> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self { entry: None, ttl }
    }

    /// The stored value, unless it is older than the TTL.
    pub fn get(&self) -> Option<T> {
        self.entry
            .filter(|(_, stored_at)| stored_at.elapsed() <= self.ttl)
            .map(|(value, _)| value)
    }

    pub fn set(&mut self, value: T) {
        self.entry = Some((value, Instant::now()));
    }

    /// Time since the value was stored, fresh or not.
    pub fn age(&self) -> Option<Duration> {
        self.entry.map(|(_, stored_at)| stored_at.elapsed())
    }
}
