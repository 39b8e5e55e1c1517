use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256, U256};
use clap::Parser;
use escrow_bench::{
    BenchConfig, DistributionBenchmarkRunner, EscrowContract, LinearRange, Operator, ResultSink,
    RpcClient, RpcMappingEscrow, RpcMerkleEscrow, StateIsolationController, TrialSchedule,
    DEFAULT_PAYEE_BASE, FINNEY,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "escrow-bench",
    about = "Compare gas costs of mapping-based and Merkle-commitment escrow distribution"
)]
struct Cli {
    /// JSON-RPC endpoint of a development ledger supporting evm_snapshot/evm_revert.
    #[arg(long, default_value = "http://127.0.0.1:8545")]
    rpc_url: String,

    /// Address of the deployed EscrowUsingMapping contract.
    #[arg(long)]
    mapping_escrow: Address,

    /// Address of the deployed EscrowUsingMerkleTree contract.
    #[arg(long)]
    merkle_escrow: Address,

    /// Output TSV file (truncated on start).
    #[arg(long, default_value = "gas_costs.tsv")]
    output: PathBuf,

    /// Population range `from:to[:step]`, upper bound exclusive. Repeatable.
    /// Defaults to 1:64, 64:128:16, 128:256:32.
    #[arg(long = "range")]
    ranges: Vec<LinearRange>,

    /// Extra population sizes appended after the ranges. Repeatable.
    /// Defaults to 256 and 384 when no range is given.
    #[arg(long = "extra")]
    extras: Vec<usize>,

    /// First payee index; payee addresses count up from here.
    #[arg(long, default_value_t = DEFAULT_PAYEE_BASE)]
    payee_base: u64,

    /// Wei per amount step; deposit i carries (10 + i) units. Defaults to one finney.
    #[arg(long)]
    amount_unit: Option<U256>,

    /// Sign transactions locally with this key instead of using the node's
    /// first unlocked account.
    #[arg(long)]
    private_key: Option<B256>,

    /// Maximum concurrent per-payee gas estimates.
    #[arg(long, default_value_t = 16)]
    estimate_concurrency: usize,

    /// Warn when Merkle.bulkDeposit / Mapping.deposit exceeds this ratio.
    #[arg(long)]
    max_batching_ratio: Option<f64>,

    /// Payee regenerations allowed per trial after an identity collision.
    #[arg(long, default_value_t = 3)]
    max_payee_regenerations: u32,

    /// Seconds to wait for a bulk deposit receipt.
    #[arg(long, default_value_t = 60)]
    receipt_timeout_secs: u64,
}

impl Cli {
    fn schedule(&self) -> eyre::Result<TrialSchedule> {
        if self.ranges.is_empty() && self.extras.is_empty() {
            return Ok(TrialSchedule::default());
        }
        Ok(TrialSchedule::new(self.ranges.clone(), self.extras.clone())?)
    }

    fn bench_config(&self) -> BenchConfig {
        BenchConfig {
            payee_base: self.payee_base,
            amount_unit: self.amount_unit.unwrap_or(FINNEY),
            estimate_concurrency: self.estimate_concurrency,
            max_batching_ratio: self.max_batching_ratio,
            max_payee_regenerations: self.max_payee_regenerations,
        }
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let schedule = cli.schedule()?;
    let config = cli.bench_config();

    let rpc = Arc::new(RpcClient::new(cli.rpc_url.clone()));
    let operator = match &cli.private_key {
        Some(key) => Operator::local(&rpc, key).await?,
        None => Operator::first_unlocked(&rpc).await?,
    };
    let operator_address = operator.address();
    let operator = Arc::new(operator);
    info!(rpc = rpc.url(), operator = %operator_address, "connected to ledger");

    let receipt_timeout = Duration::from_secs(cli.receipt_timeout_secs);
    let mapping = RpcMappingEscrow(EscrowContract::new(
        rpc.clone(),
        operator.clone(),
        cli.mapping_escrow,
        receipt_timeout,
    ));
    let merkle = RpcMerkleEscrow(EscrowContract::new(
        rpc.clone(),
        operator.clone(),
        cli.merkle_escrow,
        receipt_timeout,
    ));

    let runner = DistributionBenchmarkRunner::new(
        StateIsolationController::new(rpc.clone()),
        mapping,
        merkle,
        operator_address,
        config,
    )?;

    let mut sink = ResultSink::create(&cli.output)?;
    let result = runner.run(&schedule, &mut sink).await;
    info!(rows = sink.rows_written(), output = %cli.output.display(), "results written");

    if let Err(e) = result {
        tracing::error!(error = %e, "benchmark run aborted");
        return Err(e.into());
    }

    Ok(())
}
