//! Fee computation
//!
//! Turns raw `eth_feeHistory` payloads into comparable `GasSample`s,
//! including the L1 data-posting surcharge on rollups.

pub mod calculator;
pub mod error;
pub mod l1;
pub mod types;

pub use calculator::{FeeCalculator, RawFeeHistory, RawFeeReading};
pub use error::{AttemptError, FeeError, RpcError};
pub use types::*;
