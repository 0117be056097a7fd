//! Fee calculator: raw `eth_feeHistory` data → `GasSample`.
//!
//! Pure transformation with no I/O and no shared state. Every malformed
//! payload surfaces as [`FeeError::MalformedResponse`] so the poller can
//! rotate to another endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::NetworkConfig;
use crate::fees::{
    error::FeeError,
    types::{GasSample, Percentile, PercentileFees},
};

/// The `result` object of `eth_feeHistory`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFeeHistory {
    pub oldest_block: String,
    #[serde(default)]
    pub base_fee_per_gas: Vec<String>,
    #[serde(default)]
    pub gas_used_ratio: Vec<f64>,
    #[serde(default)]
    pub reward: Option<Vec<Vec<String>>>,
}

/// Everything one successful poll attempt fetched from an endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFeeReading {
    pub fee_history: RawFeeHistory,
    /// Hex quantity returned by `eth_blockNumber`.
    pub block_number: String,
    /// L1 base fee (wei) read from the rollup's oracle, if available.
    pub l1_base_fee: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
pub struct FeeCalculator {
    smoothing_window: usize,
}

impl Default for FeeCalculator {
    fn default() -> Self {
        Self::new(5)
    }
}

impl FeeCalculator {
    /// `smoothing_window` is the number of most recent base fees whose
    /// median becomes the sample's base fee.
    pub fn new(smoothing_window: usize) -> Self {
        Self {
            smoothing_window: smoothing_window.max(1),
        }
    }

    pub fn compute(
        &self,
        network: &NetworkConfig,
        reading: &RawFeeReading,
        timestamp: DateTime<Utc>,
    ) -> Result<GasSample, FeeError> {
        let history = &reading.fee_history;
        let oldest_block = parse_quantity("oldestBlock", &history.oldest_block)?;
        let head_block = parse_quantity("blockNumber", &reading.block_number)?;

        let rewards = history
            .reward
            .as_ref()
            .filter(|rows| !rows.is_empty())
            .ok_or_else(|| FeeError::malformed("fee history has no reward percentiles"))?;

        let block_count = if history.gas_used_ratio.is_empty() {
            rewards.len()
        } else {
            history.gas_used_ratio.len()
        };
        if rewards.len() != block_count {
            return Err(FeeError::malformed(format!(
                "reward rows ({}) do not match block count ({})",
                rewards.len(),
                block_count
            )));
        }

        let newest_block = oldest_block
            .checked_add(block_count as u64 - 1)
            .ok_or_else(|| FeeError::malformed("block range overflows"))?;
        if newest_block > head_block {
            return Err(FeeError::malformed(format!(
                "fee history ends at block {} beyond head block {}",
                newest_block, head_block
            )));
        }

        let base_fee = self.base_fee(network, &history.base_fee_per_gas)?;

        let last_rewards = &rewards[rewards.len() - 1];
        if last_rewards.len() != Percentile::ALL.len() {
            return Err(FeeError::malformed(format!(
                "expected {} reward percentiles, got {}",
                Percentile::ALL.len(),
                last_rewards.len()
            )));
        }
        let mut priority_fees = PercentileFees::default();
        for (percentile, raw) in Percentile::ALL.iter().zip(last_rewards) {
            priority_fees.set(*percentile, parse_quantity("reward", raw)?);
        }

        let l1_surcharge = network.rollup.as_ref().map(|rollup| {
            let l1_base_fee = reading.l1_base_fee.unwrap_or(rollup.fallback_l1_base_fee);
            rollup.surcharge_per_gas(l1_base_fee)
        });

        let total_fees = PercentileFees::from_fn(|percentile| {
            base_fee
                .saturating_add(priority_fees.get(percentile))
                .saturating_add(l1_surcharge.unwrap_or(0))
        });

        Ok(GasSample {
            network: network.key.clone(),
            timestamp,
            block_number: head_block,
            base_fee,
            priority_fees,
            total_fees,
            l1_surcharge,
        })
    }

    fn base_fee(&self, network: &NetworkConfig, raw: &[String]) -> Result<u64, FeeError> {
        if raw.is_empty() {
            if network.supports_eip1559 {
                return Err(FeeError::malformed("fee history has no baseFeePerGas"));
            }
            return Ok(0);
        }
        let skip = raw.len().saturating_sub(self.smoothing_window);
        let mut recent = raw[skip..]
            .iter()
            .map(|value| parse_quantity("baseFeePerGas", value))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(median(&mut recent))
    }
}

/// Integer median; an even count averages the middle pair, rounding down.
fn median(values: &mut [u64]) -> u64 {
    values.sort_unstable();
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        let (low, high) = (values[mid - 1] as u128, values[mid] as u128);
        ((low + high) / 2) as u64
    }
}

/// Parse a JSON-RPC hex quantity (`"0x1a"`).
pub fn parse_quantity(field: &str, raw: &str) -> Result<u64, FeeError> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| FeeError::malformed(format!("{} '{}' is not a hex quantity", field, raw)))?;
    if digits.is_empty() {
        return Err(FeeError::malformed(format!("{} is an empty quantity", field)));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| FeeError::malformed(format!("{} '{}': {}", field, raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::builtin_networks;
    use proptest::prelude::*;
    use std::time::Duration;

    fn network(key: &str) -> NetworkConfig {
        builtin_networks(Duration::from_secs(12))
            .into_iter()
            .find(|n| n.key == key)
            .unwrap()
    }

    fn hex(value: u64) -> String {
        format!("{:#x}", value)
    }

    fn reading(base_fees: &[u64], last_rewards: [u64; 5], head: u64) -> RawFeeReading {
        let blocks = base_fees.len() - 1;
        let rewards: Vec<Vec<String>> = (0..blocks)
            .map(|_| last_rewards.iter().map(|r| hex(*r)).collect())
            .collect();
        RawFeeReading {
            fee_history: RawFeeHistory {
                oldest_block: hex(head + 1 - blocks as u64),
                base_fee_per_gas: base_fees.iter().map(|b| hex(*b)).collect(),
                gas_used_ratio: vec![0.5; blocks],
                reward: Some(rewards),
            },
            block_number: hex(head),
            l1_base_fee: None,
        }
    }

    #[test]
    fn base_fee_is_median_of_recent_window() {
        let calc = FeeCalculator::new(5);
        let raw = reading(&[1, 100, 40, 10, 30, 20, 50], [1, 2, 3, 4, 5], 1_000);
        let sample = calc.compute(&network("ethereum"), &raw, Utc::now()).unwrap();
        // last five: 40, 10, 30, 20, 50
        assert_eq!(sample.base_fee, 30);
    }

    #[test]
    fn even_window_averages_middle_pair() {
        let calc = FeeCalculator::new(4);
        let raw = reading(&[10, 20, 31, 40], [0; 5], 50);
        let sample = calc.compute(&network("ethereum"), &raw, Utc::now()).unwrap();
        assert_eq!(sample.base_fee, 25);
    }

    #[test]
    fn totals_are_base_plus_priority_on_l1() {
        let raw = reading(&[20_000_000_000; 6], [1, 2, 3, 4, 5], 19_000_000);
        let sample = FeeCalculator::default()
            .compute(&network("ethereum"), &raw, Utc::now())
            .unwrap();
        assert_eq!(sample.priority_fees.p75, 4);
        assert_eq!(sample.total_fees.p75, 20_000_000_004);
        assert_eq!(sample.l1_surcharge, None);
        assert_eq!(sample.block_number, 19_000_000);
        assert_eq!(sample.network, "ethereum");
    }

    #[test]
    fn rollup_totals_include_surcharge_from_oracle() {
        let arb = network("arbitrum");
        let mut raw = reading(&[10_000_000; 4], [0, 0, 1_000, 0, 0], 500);
        raw.l1_base_fee = Some(30_000_000_000);
        let sample = FeeCalculator::default().compute(&arb, &raw, Utc::now()).unwrap();

        let expected = arb.rollup.as_ref().unwrap().surcharge_per_gas(30_000_000_000);
        assert_eq!(sample.l1_surcharge, Some(expected));
        assert_eq!(sample.total_fees.p50, 10_000_000 + 1_000 + expected);
        assert_eq!(sample.base_fee, 10_000_000);
    }

    #[test]
    fn rollup_without_oracle_reading_uses_fallback() {
        let base = network("base");
        let raw = reading(&[1_000_000; 3], [0; 5], 10);
        let sample = FeeCalculator::default().compute(&base, &raw, Utc::now()).unwrap();
        let rollup = base.rollup.as_ref().unwrap();
        assert_eq!(
            sample.l1_surcharge,
            Some(rollup.surcharge_per_gas(rollup.fallback_l1_base_fee))
        );
    }

    #[test]
    fn missing_rewards_is_malformed() {
        let mut raw = reading(&[1, 2, 3], [0; 5], 10);
        raw.fee_history.reward = None;
        let err = FeeCalculator::default()
            .compute(&network("ethereum"), &raw, Utc::now())
            .unwrap_err();
        assert!(matches!(err, FeeError::MalformedResponse { .. }));
    }

    #[test]
    fn history_beyond_head_block_is_malformed() {
        let mut raw = reading(&[1, 2, 3], [0; 5], 100);
        raw.block_number = hex(90);
        let err = FeeCalculator::default()
            .compute(&network("ethereum"), &raw, Utc::now())
            .unwrap_err();
        assert!(err.to_string().contains("beyond head block"));
    }

    #[test]
    fn short_reward_row_is_malformed() {
        let mut raw = reading(&[1, 2, 3], [0; 5], 100);
        raw.fee_history.reward = Some(vec![vec!["0x1".into()], vec!["0x1".into()]]);
        assert!(FeeCalculator::default()
            .compute(&network("ethereum"), &raw, Utc::now())
            .is_err());
    }

    #[test]
    fn missing_base_fees_only_tolerated_without_eip1559() {
        let mut raw = reading(&[1, 2, 3], [7; 5], 100);
        raw.fee_history.base_fee_per_gas.clear();

        let mut legacy = network("polygon");
        legacy.supports_eip1559 = false;
        let sample = FeeCalculator::default().compute(&legacy, &raw, Utc::now()).unwrap();
        assert_eq!(sample.base_fee, 0);
        assert_eq!(sample.total_fees.p10, 7);

        assert!(FeeCalculator::default()
            .compute(&network("polygon"), &raw, Utc::now())
            .is_err());
    }

    #[test]
    fn parse_quantity_rejects_non_hex() {
        assert_eq!(parse_quantity("x", "0x1a"), Ok(26));
        assert!(parse_quantity("x", "26").is_err());
        assert!(parse_quantity("x", "0x").is_err());
        assert!(parse_quantity("x", "0xzz").is_err());
    }

    #[test]
    fn raw_fee_history_deserializes_rpc_shape() {
        let json = serde_json::json!({
            "oldestBlock": "0x10",
            "baseFeePerGas": ["0x1", "0x2"],
            "gasUsedRatio": [0.4],
            "reward": [["0x1", "0x2", "0x3", "0x4", "0x5"]]
        });
        let history: RawFeeHistory = serde_json::from_value(json).unwrap();
        assert_eq!(history.oldest_block, "0x10");
        assert_eq!(history.reward.unwrap()[0].len(), 5);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_l1_total_is_base_plus_priority(
            base_fees in prop::collection::vec(0u64..500_000_000_000u64, 2..20),
            rewards in prop::array::uniform5(0u64..50_000_000_000u64),
        ) {
            let raw = reading(&base_fees, rewards, 1_000_000);
            let sample = FeeCalculator::default()
                .compute(&network("ethereum"), &raw, Utc::now())
                .unwrap();
            for percentile in Percentile::ALL {
                prop_assert_eq!(
                    sample.total_fees.get(percentile),
                    sample.base_fee + sample.priority_fees.get(percentile)
                );
            }
        }

        #[test]
        fn prop_rollup_total_adds_non_negative_surcharge(
            base_fees in prop::collection::vec(0u64..1_000_000_000u64, 2..20),
            rewards in prop::array::uniform5(0u64..1_000_000_000u64),
            l1_base_fee in 0u64..500_000_000_000u64,
            key in prop::sample::select(vec!["arbitrum", "optimism", "base"]),
        ) {
            let mut raw = reading(&base_fees, rewards, 1_000_000);
            raw.l1_base_fee = Some(l1_base_fee);
            let sample = FeeCalculator::default()
                .compute(&network(key), &raw, Utc::now())
                .unwrap();
            let surcharge = sample.l1_surcharge.unwrap();
            for percentile in Percentile::ALL {
                prop_assert_eq!(
                    sample.total_fees.get(percentile),
                    sample.base_fee + sample.priority_fees.get(percentile) + surcharge
                );
            }
        }
    }
}
