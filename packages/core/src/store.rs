//! In-memory gas sample history.
//!
//! `HistoryStore` keeps one time-ordered window of `GasSample` values per
//! configured network. Each window is a `VecDeque` behind its own lock, so
//! writers for different networks never contend. Samples older than the
//! retention horizon are evicted lazily, on append and on read; a per-window
//! capacity bound evicts the oldest entry first when reached.
//!
//! Readers always receive copies, never references into a live window.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::fees::types::{GasSample, Percentile};

/// Default maximum number of samples retained per network.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Current on-disk snapshot layout version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serializable form of the whole store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub networks: BTreeMap<String, Vec<GasSample>>,
}

/// Summary of one network's retained window at one percentile.
///
/// Fee figures are wei per gas.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowStats {
    pub network: String,
    pub count: usize,
    pub percentile: Percentile,
    pub min: u64,
    pub max: u64,
    pub avg: u64,
    pub oldest: DateTime<Utc>,
    pub newest: DateTime<Utc>,
}

pub struct HistoryStore {
    windows: HashMap<String, Mutex<VecDeque<GasSample>>>,
    retention: chrono::Duration,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl HistoryStore {
    /// Create an empty window for each of `networks`.
    pub fn new<I>(networks: I, retention: Duration, clock: Arc<dyn Clock>) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            windows: networks
                .into_iter()
                .map(|key| (key, Mutex::new(VecDeque::new())))
                .collect(),
            retention: chrono::Duration::from_std(retention)
                .unwrap_or_else(|_| chrono::Duration::days(3650)),
            capacity: DEFAULT_CAPACITY,
            clock,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Append a sample to its network's window.
    ///
    /// Returns `false` when the sample was dropped: unknown network, or a
    /// timestamp older than the newest retained sample.
    pub fn append(&self, sample: GasSample) -> bool {
        let Some(window) = self.windows.get(&sample.network) else {
            tracing::warn!(network = %sample.network, "Dropping sample for unknown network");
            return false;
        };
        let mut window = window.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(newest) = window.back() {
            if sample.timestamp < newest.timestamp {
                tracing::warn!(
                    network = %sample.network,
                    sample_at = %sample.timestamp,
                    newest_at = %newest.timestamp,
                    "Dropping out-of-order sample"
                );
                return false;
            }
        }

        self.prune(&mut window);
        if window.len() >= self.capacity {
            window.pop_front();
        }
        window.push_back(sample);
        true
    }

    /// Copy of the retained window for `network`, oldest first.
    ///
    /// `None` for a network the store was not built with.
    pub fn window(&self, network: &str) -> Option<Vec<GasSample>> {
        let mut window = self.windows.get(network)?.lock().unwrap_or_else(|e| e.into_inner());
        self.prune(&mut window);
        Some(window.iter().cloned().collect())
    }

    /// The `n` most recent retained samples, oldest first.
    pub fn last_n(&self, network: &str, n: usize) -> Option<Vec<GasSample>> {
        let mut window = self.windows.get(network)?.lock().unwrap_or_else(|e| e.into_inner());
        self.prune(&mut window);
        let skip = window.len().saturating_sub(n);
        Some(window.iter().skip(skip).cloned().collect())
    }

    pub fn latest(&self, network: &str) -> Option<GasSample> {
        let mut window = self.windows.get(network)?.lock().unwrap_or_else(|e| e.into_inner());
        self.prune(&mut window);
        window.back().cloned()
    }

    /// Number of retained samples for `network` (0 when unknown).
    pub fn len(&self, network: &str) -> usize {
        self.windows
            .get(network)
            .map(|window| window.lock().unwrap_or_else(|e| e.into_inner()).len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.windows
            .values()
            .all(|window| window.lock().unwrap_or_else(|e| e.into_inner()).is_empty())
    }

    pub fn contains(&self, network: &str) -> bool {
        self.windows.contains_key(network)
    }

    /// Configured network keys, sorted.
    pub fn networks(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.windows.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Min/max/avg of the total fee at `percentile` over the retained window.
    ///
    /// `None` for an unknown network or an empty window.
    pub fn stats(
        &self,
        network: &str,
        percentile: Percentile,
        include_l1_surcharge: bool,
    ) -> Option<WindowStats> {
        let samples = self.window(network)?;
        let first = samples.first()?;
        let last = samples.last()?;

        let fees: Vec<u64> = samples
            .iter()
            .map(|sample| sample.fee_at(percentile, include_l1_surcharge))
            .collect();
        let sum: u128 = fees.iter().map(|fee| *fee as u128).sum();

        Some(WindowStats {
            network: network.to_string(),
            count: fees.len(),
            percentile,
            min: fees.iter().copied().min().unwrap_or(0),
            max: fees.iter().copied().max().unwrap_or(0),
            avg: (sum / fees.len() as u128) as u64,
            oldest: first.timestamp,
            newest: last.timestamp,
        })
    }

    /// Copy every window into a serializable snapshot.
    pub fn snapshot(&self) -> HistorySnapshot {
        let networks = self
            .windows
            .keys()
            .filter_map(|key| self.window(key).map(|samples| (key.clone(), samples)))
            .collect();
        HistorySnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: self.clock.now(),
            networks,
        }
    }

    /// Merge persisted samples still inside the retention horizon.
    ///
    /// Unknown networks, expired samples, and samples dated after the
    /// current clock are discarded. Returns the number of samples the
    /// windows grew by.
    pub fn restore(&self, snapshot: HistorySnapshot) -> usize {
        let now = self.clock.now();
        let cutoff = now - self.retention;
        let mut restored = 0;

        for (key, samples) in snapshot.networks {
            let Some(window) = self.windows.get(&key) else {
                tracing::warn!(network = %key, "Ignoring snapshot data for unconfigured network");
                continue;
            };

            let total = samples.len();
            let fresh: Vec<GasSample> = samples
                .into_iter()
                .filter(|sample| sample.network == key && sample.timestamp >= cutoff)
                .filter(|sample| sample.timestamp <= now)
                .collect();
            if fresh.len() < total {
                tracing::debug!(
                    network = %key,
                    discarded = total - fresh.len(),
                    "Skipped expired or future-dated snapshot samples"
                );
            }
            if fresh.is_empty() {
                continue;
            }

            let mut window = window.lock().unwrap_or_else(|e| e.into_inner());
            let before = window.len();
            let mut merged: Vec<GasSample> = window.drain(..).chain(fresh).collect();
            merged.sort_by_key(|sample| (sample.timestamp, sample.block_number));
            merged.dedup_by(|a, b| a.timestamp == b.timestamp && a.block_number == b.block_number);

            let skip = merged.len().saturating_sub(self.capacity);
            window.extend(merged.into_iter().skip(skip));
            self.prune(&mut window);
            restored += window.len().saturating_sub(before);
        }

        restored
    }

    fn prune(&self, window: &mut VecDeque<GasSample>) {
        let cutoff = self.clock.now() - self.retention;
        while window.front().is_some_and(|oldest| oldest.timestamp < cutoff) {
            window.pop_front();
        }
    }
}
