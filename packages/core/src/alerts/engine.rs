//! Cooldown-gated alert evaluation.
//!
//! A sample matches at most one level: the least severe level whose
//! threshold its representative fee is at or below. A match is emitted when
//! that (network, level) pair is outside its cooldown, or when the level is
//! strictly more severe than the last level emitted for the network.
//! Cooldowns are measured on sample timestamps.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::config::{AlertConfig, NetworkConfig};
use crate::fees::types::{AlertEvent, AlertLevel, GasSample, Percentile};
use crate::metrics::AppMetrics;

/// Outcome of evaluating one sample.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Fee is above every enabled threshold.
    NoMatch,
    Suppressed { level: AlertLevel, remaining: Duration },
    Emit(AlertEvent),
}

#[derive(Debug, Default)]
struct NetworkAlertState {
    last_emitted: Option<AlertLevel>,
    last_alert: HashMap<AlertLevel, DateTime<Utc>>,
}

#[derive(Debug)]
struct NetworkRules {
    /// Enabled thresholds in wei, least severe first.
    levels: Vec<(AlertLevel, u64)>,
    state: Mutex<NetworkAlertState>,
}

pub struct AlertEngine {
    networks: HashMap<String, NetworkRules>,
    cooldown: chrono::Duration,
    percentile: Percentile,
    include_l1_surcharge: bool,
    enabled: bool,
    clock: Arc<dyn Clock>,
    metrics: Arc<AppMetrics>,
}

impl AlertEngine {
    pub fn new<'a, I>(
        networks: I,
        config: &AlertConfig,
        clock: Arc<dyn Clock>,
        metrics: Arc<AppMetrics>,
    ) -> Self
    where
        I: IntoIterator<Item = &'a NetworkConfig>,
    {
        let networks = networks
            .into_iter()
            .map(|network| {
                let levels = AlertLevel::ALL
                    .iter()
                    .copied()
                    .filter(|level| {
                        !(network.disable_high_alerts
                            && matches!(level, AlertLevel::High | AlertLevel::UltraHigh))
                    })
                    .filter_map(|level| network.threshold_wei(level).map(|wei| (level, wei)))
                    .collect();
                (
                    network.key.clone(),
                    NetworkRules {
                        levels,
                        state: Mutex::new(NetworkAlertState::default()),
                    },
                )
            })
            .collect();

        Self {
            networks,
            cooldown: chrono::Duration::from_std(config.cooldown)
                .unwrap_or_else(|_| chrono::Duration::days(3650)),
            percentile: config.percentile,
            include_l1_surcharge: config.include_l1_surcharge,
            enabled: config.enabled,
            clock,
            metrics,
        }
    }

    pub fn percentile(&self) -> Percentile {
        self.percentile
    }

    pub fn include_l1_surcharge(&self) -> bool {
        self.include_l1_surcharge
    }

    /// Fee the thresholds are compared against.
    pub fn representative_fee(&self, sample: &GasSample) -> u64 {
        sample.fee_at(self.percentile, self.include_l1_surcharge)
    }

    /// Last level emitted for `network`, if any.
    pub fn last_emitted(&self, network: &str) -> Option<AlertLevel> {
        let rules = self.networks.get(network)?;
        rules.state.lock().unwrap_or_else(|e| e.into_inner()).last_emitted
    }

    /// Zero or one alert for `sample`.
    pub fn evaluate(&self, sample: &GasSample) -> Option<AlertEvent> {
        match self.decide(sample) {
            Decision::Emit(event) => Some(event),
            _ => None,
        }
    }

    /// Evaluate `sample` and record the outcome in the network's state.
    pub fn decide(&self, sample: &GasSample) -> Decision {
        if !self.enabled {
            return Decision::NoMatch;
        }
        let Some(rules) = self.networks.get(&sample.network) else {
            return Decision::NoMatch;
        };

        let fee = self.representative_fee(sample);
        let Some(&(level, threshold)) = rules.levels.iter().find(|(_, threshold)| fee <= *threshold)
        else {
            return Decision::NoMatch;
        };

        let mut state = rules.state.lock().unwrap_or_else(|e| e.into_inner());
        let escalation = state.last_emitted.map_or(true, |last| level > last);

        if !escalation {
            if let Some(last) = state.last_alert.get(&level) {
                let elapsed = sample.timestamp - *last;
                if elapsed < self.cooldown {
                    let remaining = (self.cooldown - elapsed).to_std().unwrap_or_default();
                    tracing::debug!(
                        network = %sample.network,
                        level = %level,
                        remaining_secs = remaining.as_secs(),
                        "Alert suppressed by cooldown"
                    );
                    self.metrics
                        .alerts_suppressed_total
                        .with_label_values(&[&sample.network, level.as_str()])
                        .inc();
                    return Decision::Suppressed { level, remaining };
                }
            }
        }

        state.last_emitted = Some(level);
        state.last_alert.insert(level, sample.timestamp);
        drop(state);

        self.metrics
            .alerts_emitted_total
            .with_label_values(&[&sample.network, level.as_str()])
            .inc();
        tracing::info!(
            network = %sample.network,
            level = %level,
            block = sample.block_number,
            "Alert triggered"
        );

        Decision::Emit(AlertEvent {
            network: sample.network.clone(),
            level,
            fee,
            threshold,
            percentile: self.percentile,
            sample: sample.clone(),
            generated_at: self.clock.now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::builtin_networks;
    use crate::fees::types::{gwei_to_wei, PercentileFees};
    use chrono::TimeZone;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn ethereum() -> NetworkConfig {
        let mut network = builtin_networks(Duration::from_secs(12))
            .into_iter()
            .find(|n| n.key == "ethereum")
            .unwrap();
        network.thresholds = BTreeMap::from([
            (AlertLevel::Low, 20.0),
            (AlertLevel::Medium, 35.0),
            (AlertLevel::High, 50.0),
        ]);
        network
    }

    fn engine_for(networks: &[NetworkConfig], config: AlertConfig) -> AlertEngine {
        AlertEngine::new(
            networks,
            &config,
            Arc::new(ManualClock::new(start())),
            Arc::new(AppMetrics::new().unwrap()),
        )
    }

    fn engine() -> AlertEngine {
        engine_for(&[ethereum()], AlertConfig::default())
    }

    fn sample_at(network: &str, secs: i64, gwei: f64) -> GasSample {
        let fee = gwei_to_wei(gwei);
        GasSample {
            network: network.into(),
            timestamp: start() + chrono::Duration::seconds(secs),
            block_number: 100 + secs as u64,
            base_fee: fee,
            priority_fees: PercentileFees::default(),
            total_fees: PercentileFees::from_fn(|_| fee),
            l1_surcharge: None,
        }
    }

    fn eth(secs: i64, gwei: f64) -> GasSample {
        sample_at("ethereum", secs, gwei)
    }

    #[test]
    fn matches_least_severe_level_at_or_above_fee() {
        let engine = engine();
        assert_eq!(engine.evaluate(&eth(0, 18.0)).unwrap().level, AlertLevel::Low);
        let engine = self::engine();
        assert_eq!(engine.evaluate(&eth(0, 20.0)).unwrap().level, AlertLevel::Low);
        let engine = self::engine();
        assert_eq!(engine.evaluate(&eth(0, 25.0)).unwrap().level, AlertLevel::Medium);
    }

    #[test]
    fn fee_above_every_threshold_matches_nothing() {
        let engine = engine();
        assert_eq!(engine.decide(&eth(0, 51.0)), Decision::NoMatch);
        assert!(engine.last_emitted("ethereum").is_none());
    }

    #[test]
    fn first_evaluation_always_emits() {
        let engine = engine();
        let event = engine.evaluate(&eth(0, 30.0)).unwrap();
        assert_eq!(event.level, AlertLevel::Medium);
        assert_eq!(event.fee, gwei_to_wei(30.0));
        assert_eq!(event.threshold, gwei_to_wei(35.0));
        assert_eq!(event.generated_at, start());
    }

    #[test]
    fn low_dips_are_suppressed_within_cooldown_then_repeat() {
        // 25 -> 18 -> 17 -> 19 -> 16 one per 12s cycle, cooldown 300s
        let engine = engine();
        let first = engine.evaluate(&eth(0, 25.0)).unwrap();
        assert_eq!(first.level, AlertLevel::Medium);

        let low = engine.evaluate(&eth(12, 18.0)).unwrap();
        assert_eq!(low.level, AlertLevel::Low);

        for (secs, gwei) in [(24, 17.0), (36, 19.0), (48, 16.0)] {
            assert!(matches!(
                engine.decide(&eth(secs, gwei)),
                Decision::Suppressed { level: AlertLevel::Low, .. }
            ));
        }

        // still inside the window at exactly 299s after the low alert
        assert!(engine.evaluate(&eth(12 + 299, 15.0)).is_none());

        let again = engine.evaluate(&eth(12 + 300, 15.0)).unwrap();
        assert_eq!(again.level, AlertLevel::Low);
    }

    #[test]
    fn escalation_bypasses_cooldown() {
        let engine = engine();
        engine.evaluate(&eth(0, 18.0)).unwrap();

        // 10s later, 45 gwei falls in the `high` band: strictly more severe
        let escalated = engine.evaluate(&eth(10, 45.0)).unwrap();
        assert_eq!(escalated.level, AlertLevel::High);

        let engine = self::engine();
        engine.evaluate(&eth(0, 18.0)).unwrap();
        let medium = engine.evaluate(&eth(10, 30.0)).unwrap();
        assert_eq!(medium.level, AlertLevel::Medium);
    }

    #[test]
    fn de_escalation_respects_level_cooldown() {
        let engine = engine();
        engine.evaluate(&eth(0, 18.0)).unwrap(); // low
        engine.evaluate(&eth(12, 30.0)).unwrap(); // medium, escalation
        assert!(engine.evaluate(&eth(24, 18.0)).is_none()); // low still cooling
        assert_eq!(engine.last_emitted("ethereum"), Some(AlertLevel::Medium));
    }

    #[test]
    fn de_escalation_to_fresh_level_emits() {
        let engine = engine();
        engine.evaluate(&eth(0, 30.0)).unwrap(); // medium
        let low = engine.evaluate(&eth(12, 18.0)).unwrap();
        assert_eq!(low.level, AlertLevel::Low);
    }

    #[test]
    fn networks_do_not_share_cooldowns() {
        let mut polygon = ethereum();
        polygon.key = "polygon".into();
        let engine = engine_for(&[ethereum(), polygon], AlertConfig::default());

        assert!(engine.evaluate(&eth(0, 18.0)).is_some());
        assert!(engine.evaluate(&sample_at("polygon", 1, 18.0)).is_some());
        assert!(engine.evaluate(&eth(2, 18.0)).is_none());
    }

    #[test]
    fn disabled_high_alerts_are_never_matched() {
        let mut network = ethereum();
        network.disable_high_alerts = true;
        let engine = engine_for(&[network], AlertConfig::default());
        assert_eq!(engine.decide(&eth(0, 45.0)), Decision::NoMatch);
    }

    #[test]
    fn disabled_engine_emits_nothing() {
        let config = AlertConfig {
            enabled: false,
            ..AlertConfig::default()
        };
        let engine = engine_for(&[ethereum()], config);
        assert!(engine.evaluate(&eth(0, 1.0)).is_none());
    }

    #[test]
    fn unknown_network_emits_nothing() {
        let engine = engine();
        assert!(engine.evaluate(&sample_at("solana", 0, 1.0)).is_none());
    }

    #[test]
    fn configured_percentile_drives_matching() {
        let config = AlertConfig {
            percentile: Percentile::P90,
            ..AlertConfig::default()
        };
        let engine = engine_for(&[ethereum()], config);
        let mut sample = eth(0, 18.0);
        sample.total_fees.p90 = gwei_to_wei(40.0);
        assert_eq!(engine.evaluate(&sample).unwrap().level, AlertLevel::High);
    }

    #[test]
    fn l1_surcharge_participates_only_when_enabled() {
        let mut sample = eth(0, 18.0);
        sample.l1_surcharge = Some(gwei_to_wei(5.0));
        sample.total_fees = PercentileFees::from_fn(|_| gwei_to_wei(23.0));

        let excluded = engine();
        assert_eq!(excluded.evaluate(&sample).unwrap().level, AlertLevel::Low);

        let included = engine_for(
            &[ethereum()],
            AlertConfig {
                include_l1_surcharge: true,
                ..AlertConfig::default()
            },
        );
        assert_eq!(included.evaluate(&sample).unwrap().level, AlertLevel::Medium);
    }

    #[test]
    fn zero_cooldown_emits_every_match() {
        let engine = engine_for(
            &[ethereum()],
            AlertConfig {
                cooldown: Duration::ZERO,
                ..AlertConfig::default()
            },
        );
        assert!(engine.evaluate(&eth(0, 18.0)).is_some());
        assert!(engine.evaluate(&eth(12, 18.0)).is_some());
    }

    proptest! {
        #[test]
        fn cooldown_only_broken_by_escalation(fees in prop::collection::vec(1u32..60, 1..80)) {
            let engine = engine();
            let cooldown = chrono::Duration::seconds(300);
            let mut emitted: Vec<AlertEvent> = Vec::new();

            for (i, gwei) in fees.iter().enumerate() {
                let sample = eth(i as i64 * 12, *gwei as f64);
                let previous = emitted.last().map(|e| e.level);
                if let Some(event) = engine.evaluate(&sample) {
                    let same_level_recent = emitted.iter().any(|e| {
                        e.level == event.level
                            && event.sample.timestamp - e.sample.timestamp < cooldown
                    });
                    if same_level_recent {
                        // only an escalation over the last emitted level may repeat early
                        prop_assert!(previous.map_or(true, |p| event.level > p));
                    }
                    emitted.push(event);
                }
            }
        }

        #[test]
        fn escalation_always_fires(low in 1u32..=20, high in 36u32..=50, gap in 0i64..300) {
            let engine = engine();
            prop_assert!(engine.evaluate(&eth(0, low as f64)).is_some());
            let event = engine.evaluate(&eth(gap, high as f64));
            prop_assert_eq!(event.map(|e| e.level), Some(AlertLevel::High));
        }
    }
}
