//! L1 data-posting surcharge models for rollup networks.
//!
//! A rollup transaction pays for its own L2 execution plus the cost of
//! posting its calldata to L1. The models below estimate that L1 cost for a
//! typical transaction and amortize it over the L2 gas such a transaction
//! uses, so the result is directly addable to per-gas fee figures.

use serde::{Deserialize, Serialize};

/// Arbitrum `ArbGasInfo` precompile.
pub const ARB_GAS_INFO_ADDRESS: &str = "0x000000000000000000000000000000000000006C";
/// `getL1BaseFeeEstimate()`
pub const ARB_L1_BASE_FEE_SELECTOR: &str = "0xf5d6ded7";

/// OP-stack `GasPriceOracle` predeploy (Optimism, Base).
pub const OP_GAS_PRICE_ORACLE_ADDRESS: &str = "0x420000000000000000000000000000000000000F";
/// `l1BaseFee()`
pub const OP_L1_BASE_FEE_SELECTOR: &str = "0x519b4bd3";

/// Gas charged per non-zero calldata byte on L1.
const CALLDATA_GAS_PER_BYTE: u128 = 16;
/// Fixed per-transaction L1 gas Arbitrum adds on top of calldata.
const ARBITRUM_FIXED_L1_GAS: u128 = 2_000;
/// OP-stack scalars are fixed-point with six decimals.
const OP_SCALAR_DECIMALS: u128 = 1_000_000;

/// How a rollup prices its L1 data posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum L1FeeModel {
    Arbitrum,
    OpStack { overhead: u64, scalar: u64 },
}

impl L1FeeModel {
    /// Default OP-stack parameters (overhead 2100, scalar 0.684).
    pub fn op_stack_default() -> Self {
        L1FeeModel::OpStack {
            overhead: 2_100,
            scalar: 684_000,
        }
    }

    /// `(to, data)` for the `eth_call` that reads the current L1 base fee.
    pub fn oracle_call(&self) -> (&'static str, &'static str) {
        match self {
            L1FeeModel::Arbitrum => (ARB_GAS_INFO_ADDRESS, ARB_L1_BASE_FEE_SELECTOR),
            L1FeeModel::OpStack { .. } => (OP_GAS_PRICE_ORACLE_ADDRESS, OP_L1_BASE_FEE_SELECTOR),
        }
    }

    /// L1 fee in wei for one transaction carrying `calldata_bytes`.
    pub fn l1_fee_per_tx(&self, l1_base_fee: u64, calldata_bytes: u64) -> u128 {
        let data_gas = calldata_bytes as u128 * CALLDATA_GAS_PER_BYTE;
        match *self {
            L1FeeModel::Arbitrum => l1_base_fee as u128 * (data_gas + ARBITRUM_FIXED_L1_GAS),
            L1FeeModel::OpStack { overhead, scalar } => {
                let l1_gas = data_gas + overhead as u128;
                l1_base_fee as u128 * l1_gas * scalar as u128 / OP_SCALAR_DECIMALS
            }
        }
    }
}

/// Rollup-specific parameters of a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupConfig {
    pub model: L1FeeModel,
    /// Average calldata size of a typical transaction, in bytes.
    pub calldata_bytes: u64,
    /// L2 gas used by that typical transaction.
    pub l2_gas_per_tx: u64,
    /// L1 base fee (wei) assumed when the oracle cannot be read.
    pub fallback_l1_base_fee: u64,
}

impl RollupConfig {
    pub fn new(model: L1FeeModel) -> Self {
        Self {
            model,
            calldata_bytes: 110,
            l2_gas_per_tx: 21_000,
            fallback_l1_base_fee: 20_000_000_000,
        }
    }

    /// Surcharge in wei per unit of L2 gas for the given L1 base fee.
    pub fn surcharge_per_gas(&self, l1_base_fee: u64) -> u64 {
        let per_tx = self.model.l1_fee_per_tx(l1_base_fee, self.calldata_bytes);
        let per_gas = per_tx / self.l2_gas_per_tx.max(1) as u128;
        u64::try_from(per_gas).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arbitrum_fee_counts_calldata_and_fixed_overhead() {
        let fee = L1FeeModel::Arbitrum.l1_fee_per_tx(10, 110);
        assert_eq!(fee, 10 * (110 * 16 + 2_000));
    }

    #[test]
    fn op_stack_fee_applies_overhead_and_scalar() {
        let fee = L1FeeModel::op_stack_default().l1_fee_per_tx(1_000_000, 110);
        // (110 * 16 + 2100) * 1e6 * 0.684
        assert_eq!(fee, 3_860 * 684_000);
    }

    #[test]
    fn surcharge_is_amortized_over_l2_gas() {
        let rollup = RollupConfig::new(L1FeeModel::Arbitrum);
        let per_tx = L1FeeModel::Arbitrum.l1_fee_per_tx(20_000_000_000, 110);
        assert_eq!(rollup.surcharge_per_gas(20_000_000_000) as u128, per_tx / 21_000);
    }

    #[test]
    fn zero_l1_base_fee_gives_zero_surcharge() {
        let rollup = RollupConfig::new(L1FeeModel::op_stack_default());
        assert_eq!(rollup.surcharge_per_gas(0), 0);
    }

    #[test]
    fn oracle_call_targets_model_specific_contract() {
        assert_eq!(L1FeeModel::Arbitrum.oracle_call().0, ARB_GAS_INFO_ADDRESS);
        assert_eq!(
            L1FeeModel::op_stack_default().oracle_call(),
            (OP_GAS_PRICE_ORACLE_ADDRESS, OP_L1_BASE_FEE_SELECTOR)
        );
    }
}
