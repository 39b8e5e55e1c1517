use std::future::Future;
use std::io::Write;

use alloy_primitives::{Address, B256, U256};
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, error, info, warn};

use crate::commitment::{BulkDepositEvent, VerifiedCommitment};
use crate::config::BenchConfig;
use crate::error::{BenchError, Result, TrialStep};
use crate::escrow::{CommitmentEscrow, EscrowEvent, MappingEscrow};
use crate::ledger::{Ledger, StateIsolationController};
use crate::measurement::Row;
use crate::merkle::Proof;
use crate::payees::{total_value, DepositRecord, PayeeGenerator};
use crate::schedule::TrialSchedule;
use crate::sink::ResultSink;

/// Drives both escrow strategies through identical trials and measures gas.
///
/// Every trial runs between a checkpoint and a restore of the shared ledger,
/// so trials never observe each other's deposits.
pub struct DistributionBenchmarkRunner<L, M, C> {
    isolation: StateIsolationController<L>,
    mapping: M,
    merkle: C,
    payees: PayeeGenerator,
    config: BenchConfig,
}

impl<L, M, C> DistributionBenchmarkRunner<L, M, C>
where
    L: Ledger,
    M: MappingEscrow,
    C: CommitmentEscrow,
{
    pub fn new(
        isolation: StateIsolationController<L>,
        mapping: M,
        merkle: C,
        operator: Address,
        config: BenchConfig,
    ) -> Result<Self> {
        config.validate()?;
        let payees = PayeeGenerator::new(operator, config.amount_unit);
        Ok(Self { isolation, mapping, merkle, payees, config })
    }

    pub fn isolation(&self) -> &StateIsolationController<L> {
        &self.isolation
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    /// Runs every scheduled size in order, appending one row per trial.
    ///
    /// Stops at the first failed trial; rows already appended stay in the sink.
    pub async fn run<W: Write>(
        &self,
        schedule: &TrialSchedule,
        sink: &mut ResultSink<W>,
    ) -> Result<Vec<Row>> {
        let sizes = schedule.sizes();
        info!(trials = sizes.len(), "starting benchmark run");

        let mut rows = Vec::with_capacity(sizes.len());
        for n in sizes {
            info!(n, "running trial");
            let row = self.run_trial(n).await?;
            sink.append_row(&row)?;
            rows.push(row);
        }

        info!(trials = rows.len(), "benchmark run complete");
        Ok(rows)
    }

    /// Measures one population size, regenerating payees when one of them
    /// collides with an identity the ledger treats specially.
    pub async fn run_trial(&self, n: usize) -> Result<Row> {
        if n == 0 {
            return Err(BenchError::MalformedInput("zero-payee trials are not supported".into())
                .during(n, TrialStep::GeneratePayees));
        }

        let mut base = self.config.payee_base;
        let mut regenerations = 0;
        loop {
            let deposits = self
                .payees
                .deposits(base, n)
                .map_err(|e| e.during(n, TrialStep::GeneratePayees))?;

            match self.run_isolated(n, &deposits).await {
                Err(err)
                    if err.is_identity_collision()
                        && regenerations < self.config.max_payee_regenerations =>
                {
                    regenerations += 1;
                    // Move to a disjoint window so the colliding payee is gone.
                    base = base.saturating_add(n as u64);
                    warn!(n, regenerations, base, error = %err, "regenerating payees");
                }
                Ok(row) => {
                    self.check_batching_ratio(&row);
                    return Ok(row);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Checkpoint, measure, restore. Restore is attempted on every path.
    async fn run_isolated(&self, n: usize, deposits: &[DepositRecord]) -> Result<Row> {
        let snapshot = self
            .isolation
            .checkpoint()
            .await
            .map_err(|e| e.during(n, TrialStep::Checkpoint))?;

        let outcome = self.measure(n, deposits).await;
        let restored = self
            .isolation
            .restore(snapshot)
            .await
            .map_err(|e| e.during(n, TrialStep::Restore));

        match (outcome, restored) {
            (Ok(row), Ok(())) => Ok(row),
            (Ok(_), Err(err)) | (Err(err), Ok(())) => Err(err),
            (Err(err), Err(restore)) => {
                error!(n, error = %err, restore_error = %restore, "restore after failed trial failed");
                Err(BenchError::CleanupFailed {
                    source: Box::new(err),
                    restore: Box::new(restore),
                })
            }
        }
    }

    async fn measure(&self, n: usize, deposits: &[DepositRecord]) -> Result<Row> {
        let payees: Vec<Address> = deposits.iter().map(|d| d.payee).collect();
        let amounts: Vec<U256> = deposits.iter().map(|d| d.amount).collect();
        let total = total_value(&amounts);

        let mapping_deposit = self
            .sum_estimates(
                deposits
                    .iter()
                    .map(|d| self.mapping.deposit_estimate(d.payee, d.amount)),
            )
            .await
            .map_err(|e| e.during(n, TrialStep::MappingDepositEstimate))?;

        let mapping_bulk = self
            .mapping
            .bulk_deposit(&payees, &amounts, total)
            .await
            .map_err(|e| e.during(n, TrialStep::MappingBulkDeposit))?;

        let mapping_withdraw = self
            .sum_estimates(payees.iter().map(|p| self.mapping.withdraw_estimate(*p)))
            .await
            .map_err(|e| e.during(n, TrialStep::MappingWithdrawEstimate))?;

        let merkle_bulk = self
            .merkle
            .bulk_deposit(&payees, &amounts, total)
            .await
            .map_err(|e| e.during(n, TrialStep::MerkleBulkDeposit))?;

        let verified = verify_bulk_deposit(&merkle_bulk.events, deposits)
            .map_err(|e| e.during(n, TrialStep::ReconstructCommitment))?;
        debug!(n, commitment = %verified.commitment, "commitment reconstructed from events");

        let commitment = verified.commitment;
        let proofs: Vec<Vec<B256>> = verified.proofs.iter().map(Proof::siblings).collect();
        let merkle_withdraw = self
            .sum_estimates(deposits.iter().zip(&proofs).map(|(d, proof)| {
                self.merkle
                    .withdraw_estimate(d.payee, d.amount, commitment, proof)
            }))
            .await
            .map_err(|e| e.during(n, TrialStep::MerkleWithdrawEstimate))?;

        let row = Row {
            n,
            mapping_deposit,
            mapping_bulk_deposit: mapping_bulk.gas_used,
            merkle_bulk_deposit: merkle_bulk.gas_used,
            mapping_withdraw,
            merkle_withdraw,
        };
        info!(
            n,
            mapping_deposit = row.mapping_deposit,
            mapping_bulk_deposit = row.mapping_bulk_deposit,
            merkle_bulk_deposit = row.merkle_bulk_deposit,
            mapping_withdraw = row.mapping_withdraw,
            merkle_withdraw = row.merkle_withdraw,
            "trial measured"
        );
        Ok(row)
    }

    /// Runs the non-mutating estimates with bounded fan-out and sums them.
    async fn sum_estimates<F>(&self, estimates: impl Iterator<Item = F>) -> Result<u64>
    where
        F: Future<Output = Result<u64>>,
    {
        let costs: Vec<u64> = stream::iter(estimates)
            .buffer_unordered(self.config.estimate_concurrency)
            .try_collect()
            .await?;
        Ok(costs.iter().sum())
    }

    fn check_batching_ratio(&self, row: &Row) {
        let Some(max) = self.config.max_batching_ratio else {
            return;
        };
        if let Some(ratio) = row.batching_ratio() {
            if ratio > max {
                warn!(n = row.n, ratio, max, "Merkle bulk deposit batching ratio above threshold");
            }
        }
    }
}

/// Rebuilds the Merkle commitment from a bulk deposit's events, checks it
/// against the emitted root and against the deposits that were requested.
pub fn verify_bulk_deposit(
    events: &[EscrowEvent],
    intended: &[DepositRecord],
) -> Result<VerifiedCommitment> {
    let verified = BulkDepositEvent::from_events(events)?.reconstruct()?;
    verified.ensure_matches(intended)?;
    Ok(verified)
}
