//! Multi-network polling orchestrator.
//!
//! Drives the main loop: every tick, each network that is due gets its own
//! poll task with a deadline of its interval minus the safety margin. A
//! task routes its outcome into the history store and the alert engine as
//! soon as it completes, so a slow network never holds up a fast one. A
//! separate timer writes history snapshots.
//!
//! Lifecycle: `Idle -> Running -> ShuttingDown -> Stopped`. On shutdown no
//! new polls are scheduled, in-flight polls get a grace period and are then
//! aborted, and a final snapshot is flushed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex, OwnedMutexGuard};
use tokio::task::JoinSet;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::alerts::AlertEngine;
use crate::clock::Clock;
use crate::config::{Config, ConfigError, NetworkConfig};
use crate::fees::types::{wei_to_gwei, AlertEvent, GasSample, Percentile};
use crate::metrics::AppMetrics;
use crate::persistence::SnapshotWriter;
use crate::poller::{Degraded, NetworkPoller, PollOutcome, PollerSettings};
use crate::services::rpc::RpcTransport;
use crate::shutdown::ShutdownSignal;
use crate::store::HistoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Idle,
    Running,
    ShuttingDown,
    Stopped,
}

/// Everything the orchestrator does not build itself.
pub struct Collaborators {
    pub transport: Arc<dyn RpcTransport>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<AppMetrics>,
    /// Receives every emitted alert exactly once.
    pub alerts: mpsc::UnboundedSender<AlertEvent>,
    /// `None` disables snapshot writes.
    pub snapshot_writer: Option<Arc<SnapshotWriter>>,
}

/// Read-only handle for the HTTP layer and other observers.
#[derive(Clone)]
pub struct MonitorView {
    pub networks: Arc<BTreeMap<String, NetworkConfig>>,
    pub store: Arc<HistoryStore>,
    pub metrics: Arc<AppMetrics>,
    pub percentile: Percentile,
    pub include_l1_surcharge: bool,
    pub clock: Arc<dyn Clock>,
    state: watch::Receiver<OrchestratorState>,
}

impl MonitorView {
    pub fn state(&self) -> OrchestratorState {
        *self.state.borrow()
    }
}

struct NetworkSlot {
    key: String,
    interval: Duration,
    next_due: Instant,
    poller: Arc<Mutex<NetworkPoller>>,
}

/// Shared by every poll task: where a finished poll's outcome goes.
#[derive(Clone)]
struct CycleSink {
    store: Arc<HistoryStore>,
    alerts: Arc<AlertEngine>,
    alert_tx: mpsc::UnboundedSender<AlertEvent>,
    metrics: Arc<AppMetrics>,
}

impl CycleSink {
    fn record(&self, key: &str, outcome: &PollOutcome) {
        match outcome {
            PollOutcome::Sample(sample) => self.record_sample(sample),
            PollOutcome::Degraded(degraded) => self.record_degraded(key, degraded),
        }
    }

    fn record_sample(&self, sample: &GasSample) {
        if !self.store.append(sample.clone()) {
            return;
        }
        self.metrics
            .samples_stored
            .with_label_values(&[&sample.network])
            .set(self.store.len(&sample.network) as f64);
        self.metrics
            .latest_fee_gwei
            .with_label_values(&[&sample.network])
            .set(wei_to_gwei(self.alerts.representative_fee(sample)));

        if let Some(event) = self.alerts.evaluate(sample) {
            if self.alert_tx.send(event).is_err() {
                tracing::warn!(network = %sample.network, "Alert channel closed; event dropped");
            }
        }
    }

    fn record_degraded(&self, key: &str, degraded: &Degraded) {
        self.metrics.degraded_cycles_total.with_label_values(&[key]).inc();
        tracing::warn!(
            network = %key,
            attempts = degraded.attempts,
            "Degraded cycle, no sample: {}",
            degraded.reason
        );
    }
}

pub struct Orchestrator {
    networks: Arc<BTreeMap<String, NetworkConfig>>,
    slots: Vec<NetworkSlot>,
    sink: CycleSink,
    snapshot_writer: Option<Arc<SnapshotWriter>>,
    state: watch::Sender<OrchestratorState>,
    tick: Duration,
    safety_margin: Duration,
    save_interval: Duration,
    shutdown_grace: Duration,
    percentile: Percentile,
    include_l1_surcharge: bool,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    pub fn new(config: &Config, deps: Collaborators) -> Result<Self, ConfigError> {
        let networks = Arc::new(config.networks.clone());
        let settings = PollerSettings::from(&config.monitor);

        let store = Arc::new(HistoryStore::new(
            networks.keys().cloned(),
            config.monitor.retention,
            deps.clock.clone(),
        ));
        let alerts = Arc::new(AlertEngine::new(
            networks.values(),
            &config.alerts,
            deps.clock.clone(),
            deps.metrics.clone(),
        ));

        let now = Instant::now();
        let mut slots = Vec::with_capacity(networks.len());
        for network in networks.values() {
            let poller = NetworkPoller::new(
                Arc::new(network.clone()),
                deps.transport.clone(),
                settings.clone(),
                deps.clock.clone(),
                deps.metrics.clone(),
            )?;
            slots.push(NetworkSlot {
                key: network.key.clone(),
                interval: network.poll_interval,
                next_due: now,
                poller: Arc::new(Mutex::new(poller)),
            });
        }

        let tick = networks
            .values()
            .map(|network| network.poll_interval)
            .chain(std::iter::once(config.monitor.check_interval))
            .min()
            .unwrap_or(config.monitor.check_interval);

        let (state, _) = watch::channel(OrchestratorState::Idle);

        Ok(Self {
            networks,
            slots,
            sink: CycleSink {
                store,
                alerts,
                alert_tx: deps.alerts,
                metrics: deps.metrics,
            },
            snapshot_writer: deps.snapshot_writer,
            state,
            tick,
            safety_margin: config.monitor.cycle_safety_margin,
            save_interval: config.persistence.save_interval,
            shutdown_grace: config.monitor.shutdown_grace,
            percentile: config.alerts.percentile,
            include_l1_surcharge: config.alerts.include_l1_surcharge,
            clock: deps.clock,
        })
    }

    pub fn state(&self) -> OrchestratorState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<OrchestratorState> {
        self.state.subscribe()
    }

    pub fn store(&self) -> Arc<HistoryStore> {
        self.sink.store.clone()
    }

    pub fn alert_engine(&self) -> Arc<AlertEngine> {
        self.sink.alerts.clone()
    }

    pub fn view(&self) -> MonitorView {
        MonitorView {
            networks: self.networks.clone(),
            store: self.sink.store.clone(),
            metrics: self.sink.metrics.clone(),
            percentile: self.percentile,
            include_l1_surcharge: self.include_l1_surcharge,
            clock: self.clock.clone(),
            state: self.state.subscribe(),
        }
    }

    fn set_state(&self, next: OrchestratorState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::info!("Orchestrator {:?} -> {:?}", previous, next);
        }
    }

    /// Run until `shutdown` fires, then drain, flush and stop.
    pub async fn run(&mut self, shutdown: ShutdownSignal) {
        if self.state() != OrchestratorState::Idle {
            tracing::warn!("Orchestrator already started; ignoring run()");
            return;
        }
        self.set_state(OrchestratorState::Running);
        tracing::info!(
            "Gas monitoring started ({} networks, tick {}s)",
            self.slots.len(),
            self.tick.as_secs_f64()
        );

        let mut ticker = time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut snapshots = time::interval_at(Instant::now() + self.save_interval, self.save_interval);
        snapshots.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,

                _ = ticker.tick() => {
                    self.dispatch_due(&mut in_flight);
                }

                _ = snapshots.tick() => {
                    self.write_snapshot().await;
                }

                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(err) = joined {
                        tracing::error!("Poll task failed: {}", err);
                    }
                }
            }
        }

        self.set_state(OrchestratorState::ShuttingDown);
        self.drain(&mut in_flight).await;
        self.write_snapshot().await;
        self.set_state(OrchestratorState::Stopped);
        tracing::info!("Gas monitoring stopped cleanly");
    }

    /// Poll every network once, concurrently, and wait for all of them.
    ///
    /// Each outcome is recorded as soon as its own poll finishes.
    pub async fn poll_all(&self) -> BTreeMap<String, PollOutcome> {
        let mut tasks = JoinSet::new();
        for slot in &self.slots {
            let poller = slot.poller.clone().lock_owned().await;
            let deadline = Instant::now() + slot.interval.saturating_sub(self.safety_margin);
            let sink = self.sink.clone();
            let key = slot.key.clone();
            tasks.spawn(async move {
                let outcome = poll_network(poller, deadline, &sink).await;
                (key, outcome)
            });
        }

        let mut outcomes = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((key, outcome)) => {
                    outcomes.insert(key, outcome);
                }
                Err(err) => tracing::error!("Poll task failed: {}", err),
            }
        }
        outcomes
    }

    fn dispatch_due(&mut self, in_flight: &mut JoinSet<()>) {
        let now = Instant::now();
        for slot in self.slots.iter_mut().filter(|slot| slot.next_due <= now) {
            slot.next_due = now + slot.interval;
            let Ok(poller) = slot.poller.clone().try_lock_owned() else {
                tracing::warn!(network = %slot.key, "Previous poll still running; skipping cycle");
                continue;
            };
            let deadline = now + slot.interval.saturating_sub(self.safety_margin);
            let sink = self.sink.clone();
            in_flight.spawn(async move {
                poll_network(poller, deadline, &sink).await;
            });
        }
    }

    async fn drain(&self, in_flight: &mut JoinSet<()>) {
        if in_flight.is_empty() {
            return;
        }
        let pending = in_flight.len();
        let finished = time::timeout(self.shutdown_grace, async {
            while in_flight.join_next().await.is_some() {}
        })
        .await;

        if finished.is_err() {
            tracing::warn!(
                "{} of {} in-flight polls still running after {}s grace; aborting",
                in_flight.len(),
                pending,
                self.shutdown_grace.as_secs()
            );
            in_flight.abort_all();
            while in_flight.join_next().await.is_some() {}
        }
    }

    /// Write a snapshot; failures are logged and counted, never fatal.
    pub async fn write_snapshot(&self) {
        let Some(writer) = &self.snapshot_writer else {
            return;
        };
        let snapshot = self.sink.store.snapshot();
        match writer.write(&snapshot).await {
            Ok(()) => self.sink.metrics.snapshot_writes_total.inc(),
            Err(err) => {
                self.sink.metrics.snapshot_errors_total.inc();
                tracing::error!("Failed to save history snapshot: {}", err);
            }
        }
    }
}

/// Polls and records while holding the poller, so outcomes of one network
/// are recorded in completion order.
async fn poll_network(
    mut poller: OwnedMutexGuard<NetworkPoller>,
    deadline: Instant,
    sink: &CycleSink,
) -> PollOutcome {
    let outcome = poller.poll(deadline).await;
    sink.record(&poller.network().key, &outcome);
    outcome
}
