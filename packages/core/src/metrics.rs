//! Prometheus series for the gas monitor.
//!
//! One [`AppMetrics`] is built at startup and shared by the orchestrator,
//! every poller, the alert engine and the read API, which serves
//! [`AppMetrics::render`] at `GET /metrics`. Endpoint failures are labelled
//! by endpoint index, never by URL.

use prometheus::{Counter, CounterVec, GaugeVec, Opts, Registry, TextEncoder};

pub struct AppMetrics {
    /// Poll cycles started, by network.
    pub polls_total: CounterVec,
    /// Poll cycles that ended without a sample, by network.
    pub degraded_cycles_total: CounterVec,
    /// Failed attempts, by network and endpoint index.
    pub endpoint_failures_total: CounterVec,
    /// Samples currently retained in the history store, by network.
    pub samples_stored: GaugeVec,
    /// Latest representative fee in gwei, by network.
    pub latest_fee_gwei: GaugeVec,
    pub alerts_emitted_total: CounterVec,
    /// Matches held back by a running cooldown.
    pub alerts_suppressed_total: CounterVec,
    pub snapshot_writes_total: Counter,
    pub snapshot_errors_total: Counter,
    pub registry: Registry,
}

impl AppMetrics {
    /// Fails only on an invalid or duplicate metric name.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let polls_total = CounterVec::new(
            Opts::new("gas_monitor_polls_total", "Poll cycles started"),
            &["network"],
        )?;

        let degraded_cycles_total = CounterVec::new(
            Opts::new(
                "gas_monitor_degraded_cycles_total",
                "Poll cycles that produced no sample",
            ),
            &["network"],
        )?;

        let endpoint_failures_total = CounterVec::new(
            Opts::new(
                "gas_monitor_endpoint_failures_total",
                "Failed RPC attempts by endpoint index",
            ),
            &["network", "endpoint"],
        )?;

        let samples_stored = GaugeVec::new(
            Opts::new(
                "gas_monitor_samples_stored",
                "Samples retained in the history store",
            ),
            &["network"],
        )?;

        let latest_fee_gwei = GaugeVec::new(
            Opts::new(
                "gas_monitor_latest_fee_gwei",
                "Latest representative total fee in gwei",
            ),
            &["network"],
        )?;

        let alerts_emitted_total = CounterVec::new(
            Opts::new("gas_monitor_alerts_emitted_total", "Alerts emitted"),
            &["network", "level"],
        )?;

        let alerts_suppressed_total = CounterVec::new(
            Opts::new(
                "gas_monitor_alerts_suppressed_total",
                "Level matches suppressed by cooldown",
            ),
            &["network", "level"],
        )?;

        let snapshot_writes_total = Counter::with_opts(Opts::new(
            "gas_monitor_snapshot_writes_total",
            "History snapshots written",
        ))?;

        let snapshot_errors_total = Counter::with_opts(Opts::new(
            "gas_monitor_snapshot_errors_total",
            "History snapshot writes that failed",
        ))?;

        registry.register(Box::new(polls_total.clone()))?;
        registry.register(Box::new(degraded_cycles_total.clone()))?;
        registry.register(Box::new(endpoint_failures_total.clone()))?;
        registry.register(Box::new(samples_stored.clone()))?;
        registry.register(Box::new(latest_fee_gwei.clone()))?;
        registry.register(Box::new(alerts_emitted_total.clone()))?;
        registry.register(Box::new(alerts_suppressed_total.clone()))?;
        registry.register(Box::new(snapshot_writes_total.clone()))?;
        registry.register(Box::new(snapshot_errors_total.clone()))?;

        Ok(Self {
            polls_total,
            degraded_cycles_total,
            endpoint_failures_total,
            samples_stored,
            latest_fee_gwei,
            alerts_emitted_total,
            alerts_suppressed_total,
            snapshot_writes_total,
            snapshot_errors_total,
            registry,
        })
    }

    /// Text exposition format, version 0.0.4.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut out = String::new();
        TextEncoder::new().encode_utf8(&self.registry.gather(), &mut out)?;
        Ok(out)
    }
}
