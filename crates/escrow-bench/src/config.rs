use alloy_primitives::U256;

use crate::error::{BenchError, Result};
use crate::payees::DEFAULT_PAYEE_BASE;

/// One finney (10^15 wei), the unit amounts are scaled by by default.
pub const FINNEY: U256 = U256::from_limbs([1_000_000_000_000_000, 0, 0, 0]);

/// Runtime parameters of a benchmark run.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchConfig {
    /// First payee index; payees count up from here.
    pub payee_base: u64,
    /// Deposit `i` carries `(10 + i) * amount_unit`.
    pub amount_unit: U256,
    /// Upper bound on in-flight per-payee estimate requests.
    pub estimate_concurrency: usize,
    /// Warn when `Merkle.bulkDeposit / Mapping.deposit` exceeds this.
    pub max_batching_ratio: Option<f64>,
    /// How many times a trial may regenerate payees after an identity collision.
    pub max_payee_regenerations: u32,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            payee_base: DEFAULT_PAYEE_BASE,
            amount_unit: FINNEY,
            estimate_concurrency: 16,
            max_batching_ratio: None,
            max_payee_regenerations: 3,
        }
    }
}

impl BenchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.estimate_concurrency == 0 {
            return Err(BenchError::Config("estimate concurrency must be at least 1".into()));
        }
        if self.amount_unit.is_zero() {
            return Err(BenchError::Config("amount unit must be positive".into()));
        }
        if let Some(ratio) = self.max_batching_ratio {
            if !(ratio.is_finite() && ratio > 0.0) {
                return Err(BenchError::Config(format!(
                    "max batching ratio must be a positive number, got {ratio}"
                )));
            }
        }
        Ok(())
    }
}
