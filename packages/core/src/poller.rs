//! Network poller.
//!
//! One poller per monitored network. Each call to [`NetworkPoller::poll`]
//! makes up to `max_attempts` attempts, rotating through the endpoint pool
//! on every failure with a short jittered exponential backoff, all bounded
//! by the cycle deadline. Running out of attempts, endpoints, or time
//! yields [`PollOutcome::Degraded`], which is a normal outcome rather than
//! an error.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::cache::TtlCache;
use crate::clock::Clock;
use crate::config::{ConfigError, MonitorConfig, NetworkConfig};
use crate::endpoint::EndpointPool;
use crate::fees::{
    calculator::{FeeCalculator, RawFeeReading},
    error::{AttemptError, RpcError},
    types::{wei_to_gwei, GasSample, Percentile},
};
use crate::metrics::AppMetrics;
use crate::services::rpc::{self, RpcTransport};

/// How long an oracle-read L1 base fee stays valid.
const L1_BASE_FEE_TTL: Duration = Duration::from_secs(30);
/// Upper bound of the random jitter added to each backoff.
const BACKOFF_JITTER_MS: u64 = 100;

/// Result of one poll cycle for one network.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Sample(GasSample),
    Degraded(Degraded),
}

/// Why a cycle produced no sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Degraded {
    pub network: String,
    pub attempts: u32,
    pub reason: String,
}

/// Retry parameters, taken from [`MonitorConfig`].
#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub max_attempts: u32,
    pub request_timeout: Duration,
    pub backoff_base: Duration,
    pub fee_history_blocks: u64,
    pub base_fee_smoothing: usize,
}

impl From<&MonitorConfig> for PollerSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            request_timeout: config.request_timeout,
            backoff_base: config.backoff_base,
            fee_history_blocks: config.fee_history_blocks,
            base_fee_smoothing: config.base_fee_smoothing,
        }
    }
}

pub struct NetworkPoller {
    network: Arc<NetworkConfig>,
    pool: EndpointPool,
    transport: Arc<dyn RpcTransport>,
    calculator: FeeCalculator,
    settings: PollerSettings,
    clock: Arc<dyn Clock>,
    metrics: Arc<AppMetrics>,
    l1_base_fee: TtlCache<u64>,
}

impl NetworkPoller {
    pub fn new(
        network: Arc<NetworkConfig>,
        transport: Arc<dyn RpcTransport>,
        settings: PollerSettings,
        clock: Arc<dyn Clock>,
        metrics: Arc<AppMetrics>,
    ) -> Result<Self, ConfigError> {
        let pool = EndpointPool::new(&network.key, &network.endpoints)?;
        Ok(Self {
            calculator: FeeCalculator::new(settings.base_fee_smoothing),
            network,
            pool,
            transport,
            settings,
            clock,
            metrics,
            l1_base_fee: TtlCache::new(L1_BASE_FEE_TTL),
        })
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    pub fn pool(&self) -> &EndpointPool {
        &self.pool
    }

    /// Run one poll cycle that must finish by `deadline`.
    pub async fn poll(&mut self, deadline: Instant) -> PollOutcome {
        self.metrics
            .polls_total
            .with_label_values(&[&self.network.key])
            .inc();
        self.pool.begin_cycle();

        let mut attempts = 0;
        let mut last_error = String::from("cycle deadline elapsed before first attempt");

        while attempts < self.settings.max_attempts {
            let now = Instant::now();
            if now >= deadline {
                last_error = format!("cycle deadline elapsed ({})", last_error);
                break;
            }

            let (index, url) = {
                let endpoint = self.pool.current();
                (endpoint.index, endpoint.url.clone())
            };
            let attempt_deadline = now + self.settings.request_timeout.min(deadline - now);
            attempts += 1;

            match self.attempt(&url, attempt_deadline).await {
                Ok(sample) => {
                    self.pool.report_success(index, sample.timestamp);
                    self.log_sample(&sample);
                    return PollOutcome::Sample(sample);
                }
                Err(err) => {
                    tracing::warn!(
                        network = %self.network.key,
                        endpoint = index,
                        attempt = attempts,
                        "Poll attempt failed: {}",
                        err
                    );
                    self.metrics
                        .endpoint_failures_total
                        .with_label_values(&[&self.network.key, &index.to_string()])
                        .inc();
                    self.pool.report_failure(index);
                    last_error = err.to_string();
                }
            }

            if self.pool.is_exhausted() {
                last_error = format!("all {} endpoints failed ({})", self.pool.len(), last_error);
                break;
            }

            if attempts < self.settings.max_attempts {
                let backoff = self.backoff(attempts);
                if Instant::now() + backoff >= deadline {
                    last_error = format!("no time left for retry ({})", last_error);
                    break;
                }
                tokio::time::sleep(backoff).await;
            }
        }

        PollOutcome::Degraded(Degraded {
            network: self.network.key.clone(),
            attempts,
            reason: last_error,
        })
    }

    /// `backoff_base * 2^(attempt-1)` plus up to 100ms of jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let jitter = rand::thread_rng().gen_range(0..=BACKOFF_JITTER_MS);
        self.settings.backoff_base * 2u32.pow(exponent) + Duration::from_millis(jitter)
    }

    /// Fee queries must finish by `attempt_deadline`. The oracle read gets
    /// whatever time is left and falls back instead of failing.
    async fn attempt(&mut self, url: &str, attempt_deadline: Instant) -> Result<GasSample, AttemptError> {
        let timeout = attempt_deadline.saturating_duration_since(Instant::now());
        let transport = self.transport.as_ref();
        let fees = async {
            tokio::try_join!(
                rpc::fetch_fee_history(transport, url, self.settings.fee_history_blocks, timeout),
                rpc::fetch_block_number(transport, url, timeout),
            )
        };
        let (fee_history, block_number) = tokio::time::timeout_at(attempt_deadline, fees)
            .await
            .map_err(|_| RpcError::Timeout(timeout))??;

        let l1_base_fee = self.l1_base_fee(url, attempt_deadline).await;
        let reading = RawFeeReading {
            fee_history,
            block_number,
            l1_base_fee,
        };

        self.calculator
            .compute(&self.network, &reading, self.clock.now())
            .map_err(|err| {
                tracing::warn!(
                    network = %self.network.key,
                    oldest_block = %reading.fee_history.oldest_block,
                    head_block = %reading.block_number,
                    base_fees = reading.fee_history.base_fee_per_gas.len(),
                    reward_rows = reading.fee_history.reward.as_ref().map_or(0, Vec::len),
                    "Malformed fee history payload"
                );
                AttemptError::Fee(err)
            })
    }

    /// Oracle-read L1 base fee for rollups, cached; `None` falls back to the
    /// configured default inside the calculator.
    async fn l1_base_fee(&mut self, url: &str, attempt_deadline: Instant) -> Option<u64> {
        let rollup = self.network.rollup.as_ref()?;
        if let Some(cached) = self.l1_base_fee.get() {
            return Some(cached);
        }
        let budget = attempt_deadline.saturating_duration_since(Instant::now());
        let read = rpc::fetch_l1_base_fee(self.transport.as_ref(), url, &rollup.model, budget);
        let result = match tokio::time::timeout_at(attempt_deadline, read).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout(budget)),
        };
        match result {
            Ok(fee) => {
                self.l1_base_fee.set(fee);
                Some(fee)
            }
            Err(err) => {
                tracing::debug!(
                    network = %self.network.key,
                    last_read_secs = ?self.l1_base_fee.age().map(|age| age.as_secs()),
                    "L1 fee oracle unavailable, using fallback: {}",
                    err
                );
                None
            }
        }
    }

    fn log_sample(&self, sample: &GasSample) {
        tracing::info!(
            "{:12} | Block: {} | Base: {:8.3} | Safe: {:8.3} | Fast: {:8.3} Gwei",
            self.network.name,
            sample.block_number,
            wei_to_gwei(sample.base_fee),
            wei_to_gwei(sample.total_fees.get(Percentile::P25)),
            wei_to_gwei(sample.total_fees.get(Percentile::P75)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::builtin_networks;
    use crate::services::mock_rpc::{MockEndpoint, MockRpcTransport};

    fn settings() -> PollerSettings {
        PollerSettings {
            max_attempts: 3,
            request_timeout: Duration::from_secs(2),
            backoff_base: Duration::from_millis(100),
            fee_history_blocks: 4,
            base_fee_smoothing: 5,
        }
    }

    fn network(key: &str, urls: &[&str]) -> Arc<NetworkConfig> {
        let mut network = builtin_networks(Duration::from_secs(12))
            .into_iter()
            .find(|n| n.key == key)
            .unwrap();
        network.endpoints = urls.iter().map(|u| u.to_string()).collect();
        Arc::new(network)
    }

    fn poller(network: Arc<NetworkConfig>, transport: Arc<MockRpcTransport>, settings: PollerSettings) -> NetworkPoller {
        NetworkPoller::new(
            network,
            transport,
            settings,
            Arc::new(SystemClock),
            Arc::new(AppMetrics::new().unwrap()),
        )
        .unwrap()
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(11)
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_endpoint_yields_sample() {
        let transport = Arc::new(MockRpcTransport::new().with_healthy("a", 20_000_000_000, 1_000_000_000));
        let mut poller = poller(network("ethereum", &["a"]), transport.clone(), settings());

        let PollOutcome::Sample(sample) = poller.poll(deadline()).await else {
            panic!("expected sample");
        };
        assert_eq!(sample.base_fee, 20_000_000_000);
        assert_eq!(sample.total_fees.p50, 21_000_000_000);
        assert_eq!(sample.block_number, 1_000);
        assert_eq!(transport.call_count("a", "eth_feeHistory"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fails_over_from_broken_to_healthy_endpoint() {
        let transport = Arc::new(
            MockRpcTransport::new()
                .with_failing("a")
                .with_healthy("b", 10, 1),
        );
        let mut poller = poller(network("ethereum", &["a", "b"]), transport.clone(), settings());

        let outcome = poller.poll(deadline()).await;
        assert!(matches!(outcome, PollOutcome::Sample(_)));
        assert_eq!(poller.pool().endpoints()[0].consecutive_failures, 1);
        assert_eq!(poller.pool().endpoints()[1].consecutive_failures, 0);
        assert!(poller.pool().endpoints()[1].last_success.is_some());
        assert_eq!(poller.pool().current().index, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_payload_triggers_rotation() {
        let transport = Arc::new(
            MockRpcTransport::new()
                .with_endpoint("a", MockEndpoint::Malformed)
                .with_healthy("b", 10, 1),
        );
        let mut poller = poller(network("ethereum", &["a", "b"]), transport, settings());

        assert!(matches!(poller.poll(deadline()).await, PollOutcome::Sample(_)));
        assert_eq!(poller.pool().endpoints()[0].consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_pool_is_degraded_without_using_all_attempts() {
        let transport = Arc::new(MockRpcTransport::new().with_failing("a").with_failing("b"));
        let mut poller = poller(network("ethereum", &["a", "b"]), transport.clone(), settings());

        let PollOutcome::Degraded(degraded) = poller.poll(deadline()).await else {
            panic!("expected degraded");
        };
        assert_eq!(degraded.attempts, 2);
        assert!(degraded.reason.contains("all 2 endpoints failed"));
        assert_eq!(degraded.network, "ethereum");
    }

    #[tokio::test(start_paused = true)]
    async fn single_dead_endpoint_retries_up_to_max_attempts() {
        let transport = Arc::new(MockRpcTransport::new().with_failing("a"));
        let mut single = poller(network("ethereum", &["a"]), transport.clone(), settings());

        // one endpoint: exhausted after the first failure
        let outcome = single.poll(deadline()).await;
        assert!(matches!(outcome, PollOutcome::Degraded(ref d) if d.attempts == 1));

        let transport = Arc::new(
            MockRpcTransport::new()
                .with_failing("a")
                .with_failing("b")
                .with_failing("c")
                .with_failing("d"),
        );
        let mut poller = poller(network("ethereum", &["a", "b", "c", "d"]), transport.clone(), settings());
        let outcome = poller.poll(deadline()).await;
        assert!(matches!(outcome, PollOutcome::Degraded(ref d) if d.attempts == 3));
        assert_eq!(transport.total_calls("d"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_endpoint_times_out_and_next_one_answers() {
        let transport = Arc::new(
            MockRpcTransport::new()
                .with_endpoint("a", MockEndpoint::Hanging)
                .with_healthy("b", 10, 1),
        );
        let mut poller = poller(network("ethereum", &["a", "b"]), transport, settings());

        assert!(matches!(poller.poll(deadline()).await, PollOutcome::Sample(_)));
        assert_eq!(poller.pool().endpoints()[0].consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_deadline_returns_degraded_immediately() {
        let transport = Arc::new(MockRpcTransport::new().with_healthy("a", 10, 1));
        let mut poller = poller(network("ethereum", &["a"]), transport.clone(), settings());

        let outcome = poller.poll(Instant::now()).await;
        assert!(matches!(outcome, PollOutcome::Degraded(ref d) if d.attempts == 0));
        assert_eq!(transport.total_calls("a"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_bounds_hanging_attempts() {
        let transport = Arc::new(MockRpcTransport::new().with_endpoint("a", MockEndpoint::Hanging));
        let mut settings = settings();
        settings.request_timeout = Duration::from_secs(30);
        let mut poller = poller(network("ethereum", &["a"]), transport, settings);

        let start = Instant::now();
        let outcome = poller.poll(start + Duration::from_secs(3)).await;
        assert!(matches!(outcome, PollOutcome::Degraded(_)));
        assert!(Instant::now() <= start + Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn rollup_reads_l1_base_fee_once_per_ttl() {
        let transport = Arc::new(MockRpcTransport::new().with_endpoint(
            "a",
            MockEndpoint::Healthy {
                base_fee: 10_000_000,
                priority: [0; 5],
                head: 77,
                l1_base_fee: Some(30_000_000_000),
            },
        ));
        let net = network("arbitrum", &["a"]);
        let expected = net.rollup.as_ref().unwrap().surcharge_per_gas(30_000_000_000);
        let mut poller = poller(net, transport.clone(), settings());

        let PollOutcome::Sample(sample) = poller.poll(deadline()).await else {
            panic!("expected sample");
        };
        assert_eq!(sample.l1_surcharge, Some(expected));

        poller.poll(Instant::now() + Duration::from_secs(11)).await;
        assert_eq!(transport.call_count("a", "eth_call"), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        poller.poll(Instant::now() + Duration::from_secs(11)).await;
        assert_eq!(transport.call_count("a", "eth_call"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn oracle_failure_falls_back_without_failing_poll() {
        // Healthy mock without an l1 fee answers eth_call with an RPC error.
        let transport = Arc::new(MockRpcTransport::new().with_healthy("a", 1_000_000, 0));
        let net = network("optimism", &["a"]);
        let rollup = net.rollup.clone().unwrap();
        let mut poller = poller(net, transport, settings());

        let PollOutcome::Sample(sample) = poller.poll(deadline()).await else {
            panic!("expected sample");
        };
        assert_eq!(
            sample.l1_surcharge,
            Some(rollup.surcharge_per_gas(rollup.fallback_l1_base_fee))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_oracle_falls_back_within_the_attempt() {
        let transport = Arc::new(MockRpcTransport::new().with_endpoint(
            "a",
            MockEndpoint::SlowOracle {
                base_fee: 10_000_000,
                head: 500,
            },
        ));
        let net = network("arbitrum", &["a"]);
        let rollup = net.rollup.clone().unwrap();
        let mut poller = poller(net, transport.clone(), settings());

        let start = Instant::now();
        let PollOutcome::Sample(sample) = poller.poll(deadline()).await else {
            panic!("expected sample");
        };
        assert_eq!(
            sample.l1_surcharge,
            Some(rollup.surcharge_per_gas(rollup.fallback_l1_base_fee))
        );
        assert_eq!(poller.pool().endpoints()[0].consecutive_failures, 0);
        assert!(Instant::now() <= start + settings().request_timeout);
        assert_eq!(transport.call_count("a", "eth_call"), 1);
    }
}
