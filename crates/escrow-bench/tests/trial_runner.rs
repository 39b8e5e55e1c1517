//! Runner tests against an in-memory ledger hosting both escrow strategies.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use alloy_primitives::{keccak256, Address, B256, U256};
use async_trait::async_trait;
use escrow_bench::payees::payee_address;
use escrow_bench::{
    leaf_digest, verify_bulk_deposit, BenchConfig, BenchError, CommitmentEscrow,
    DistributionBenchmarkRunner, EscrowEvent, ExecutedDeposit, Ledger, LinearRange,
    MappingEscrow, MerkleTree, ResultSink, Row, RpcError, SnapshotId, StateIsolationController,
    TrialSchedule, TrialStep, DEFAULT_PAYEE_BASE,
};

const TX_BASE_GAS: u64 = 21_000;
const NEW_SLOT_GAS: u64 = 20_000;
const UPDATE_SLOT_GAS: u64 = 5_000;
const LOG_GAS: u64 = 1_750;
const HASH_GAS: u64 = 400;
const TRANSFER_GAS: u64 = 9_000;
const PROOF_NODE_GAS: u64 = 2_000;

/// Mutable ledger contents; cloned wholesale for snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
struct ChainState {
    mapping_balances: BTreeMap<Address, U256>,
    merkle_roots: BTreeMap<B256, U256>,
    escrow_value: U256,
}

#[derive(Debug, Default)]
struct Faults {
    colliding: BTreeSet<Address>,
    tamper_commitment: bool,
    reject_merkle_withdraw: bool,
    offline_revert: bool,
}

#[derive(Debug, Default)]
struct Chain {
    state: ChainState,
    snapshots: Vec<(U256, ChainState)>,
    next_snapshot: u64,
    faults: Faults,
    bulk_deposits: Vec<Vec<Address>>,
    emitted_roots: Vec<B256>,
}

/// Development ledger stand-in with snapshot/revert and both escrows deployed.
#[derive(Clone, Default)]
struct SimulatedChain(Arc<Mutex<Chain>>);

impl SimulatedChain {
    fn with<T>(&self, f: impl FnOnce(&mut Chain) -> T) -> T {
        f(&mut self.0.lock().unwrap())
    }

    fn state(&self) -> ChainState {
        self.with(|chain| chain.state.clone())
    }
}

/// The contract's own tree: sorted-pair keccak, odd node carried up.
fn contract_root(leaves: &[B256]) -> B256 {
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                if pair.len() == 1 {
                    return pair[0];
                }
                let (a, b) = if pair[0] <= pair[1] { (pair[0], pair[1]) } else { (pair[1], pair[0]) };
                keccak256([a.as_slice(), b.as_slice()].concat())
            })
            .collect();
    }
    level[0]
}

fn contract_verify(proof: &[B256], root: B256, leaf: B256) -> bool {
    let computed = proof.iter().fold(leaf, |acc, sibling| {
        let (a, b) = if acc <= *sibling { (acc, *sibling) } else { (*sibling, acc) };
        keccak256([a.as_slice(), b.as_slice()].concat())
    });
    computed == root
}

fn estimation_failure(payee: Address, reason: &str, identity_collision: bool) -> BenchError {
    BenchError::EstimationFailure {
        payee,
        reason: reason.to_string(),
        identity_collision,
    }
}

#[async_trait]
impl Ledger for SimulatedChain {
    async fn snapshot(&self) -> Result<SnapshotId, RpcError> {
        Ok(self.with(|chain| {
            chain.next_snapshot += 1;
            let id = U256::from(chain.next_snapshot);
            let state = chain.state.clone();
            chain.snapshots.push((id, state));
            SnapshotId(id)
        }))
    }

    async fn revert(&self, id: SnapshotId) -> Result<bool, RpcError> {
        self.with(|chain| {
            if chain.faults.offline_revert {
                return Err(RpcError::Transport("connection reset".into()));
            }
            let Some(pos) = chain.snapshots.iter().position(|(sid, _)| *sid == id.0) else {
                return Ok(false);
            };
            chain.state = chain.snapshots[pos].1.clone();
            chain.snapshots.truncate(pos);
            Ok(true)
        })
    }
}

#[async_trait]
impl MappingEscrow for SimulatedChain {
    async fn deposit_estimate(&self, payee: Address, _amount: U256) -> escrow_bench::error::Result<u64> {
        self.with(|chain| {
            if chain.faults.colliding.contains(&payee) {
                return Err(estimation_failure(payee, "transfer to payee failed", true));
            }
            let slot = if chain.state.mapping_balances.contains_key(&payee) {
                UPDATE_SLOT_GAS
            } else {
                NEW_SLOT_GAS
            };
            Ok(TX_BASE_GAS + slot + LOG_GAS)
        })
    }

    async fn bulk_deposit(
        &self,
        payees: &[Address],
        amounts: &[U256],
        total_value: U256,
    ) -> escrow_bench::error::Result<ExecutedDeposit> {
        self.with(|chain| {
            assert_eq!(payees.len(), amounts.len());
            assert_eq!(total_value, amounts.iter().fold(U256::ZERO, |a, b| a + *b));

            let mut gas = TX_BASE_GAS + UPDATE_SLOT_GAS;
            let mut events = Vec::new();
            for (payee, amount) in payees.iter().zip(amounts) {
                let balance = chain.state.mapping_balances.entry(*payee).or_default();
                gas += if balance.is_zero() { NEW_SLOT_GAS } else { UPDATE_SLOT_GAS } + LOG_GAS;
                *balance += *amount;
                events.push(EscrowEvent::Deposited { payee: *payee, amount: *amount });
            }
            chain.state.escrow_value += total_value;

            Ok(ExecutedDeposit { tx_hash: B256::repeat_byte(0x01), gas_used: gas, events })
        })
    }

    async fn withdraw_estimate(&self, payee: Address) -> escrow_bench::error::Result<u64> {
        self.with(|chain| match chain.state.mapping_balances.get(&payee) {
            Some(balance) if !balance.is_zero() => Ok(TX_BASE_GAS + UPDATE_SLOT_GAS + TRANSFER_GAS),
            _ => Err(estimation_failure(payee, "nothing to withdraw", false)),
        })
    }
}

#[async_trait]
impl CommitmentEscrow for SimulatedChain {
    async fn bulk_deposit(
        &self,
        payees: &[Address],
        amounts: &[U256],
        total_value: U256,
    ) -> escrow_bench::error::Result<ExecutedDeposit> {
        self.with(|chain| {
            let leaves: Vec<B256> = payees
                .iter()
                .zip(amounts)
                .map(|(payee, amount)| {
                    keccak256([payee.as_slice(), &amount.to_be_bytes::<32>()[..]].concat())
                })
                .collect();
            let mut root = contract_root(&leaves);
            chain.state.merkle_roots.insert(root, total_value);
            chain.state.escrow_value += total_value;
            chain.bulk_deposits.push(payees.to_vec());

            if chain.faults.tamper_commitment {
                root.0[0] ^= 0xff;
            }
            chain.emitted_roots.push(root);

            let mut events: Vec<EscrowEvent> = payees
                .iter()
                .zip(amounts)
                .map(|(payee, amount)| EscrowEvent::Deposited { payee: *payee, amount: *amount })
                .collect();
            events.push(EscrowEvent::BulkDepositMade { commitment: root });

            let gas = TX_BASE_GAS + NEW_SLOT_GAS + payees.len() as u64 * (LOG_GAS + HASH_GAS);
            Ok(ExecutedDeposit { tx_hash: B256::repeat_byte(0x02), gas_used: gas, events })
        })
    }

    async fn withdraw_estimate(
        &self,
        payee: Address,
        amount: U256,
        commitment: B256,
        proof: &[B256],
    ) -> escrow_bench::error::Result<u64> {
        self.with(|chain| {
            if chain.faults.reject_merkle_withdraw {
                return Err(estimation_failure(payee, "execution reverted", false));
            }
            if !chain.state.merkle_roots.contains_key(&commitment) {
                return Err(estimation_failure(payee, "unknown bulk deposit", false));
            }
            if !contract_verify(proof, commitment, leaf_digest(payee, amount)) {
                return Err(estimation_failure(payee, "invalid proof", false));
            }
            Ok(TX_BASE_GAS + NEW_SLOT_GAS + TRANSFER_GAS + PROOF_NODE_GAS * proof.len() as u64)
        })
    }
}

type Runner = DistributionBenchmarkRunner<SimulatedChain, SimulatedChain, SimulatedChain>;

fn operator() -> Address {
    Address::repeat_byte(0x42)
}

fn unit_config() -> BenchConfig {
    BenchConfig { amount_unit: U256::from(1), ..Default::default() }
}

fn runner(chain: &SimulatedChain, operator: Address, config: BenchConfig) -> Runner {
    DistributionBenchmarkRunner::new(
        StateIsolationController::new(chain.clone()),
        chain.clone(),
        chain.clone(),
        operator,
        config,
    )
    .unwrap()
}

fn trial_error(err: BenchError) -> (usize, TrialStep, BenchError) {
    match err {
        BenchError::Trial { n, step, source } => (n, step, *source),
        other => panic!("expected a trial error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_end_to_end_three_payees() {
    let chain = SimulatedChain::default();
    let runner = runner(&chain, operator(), unit_config());

    let row = runner.run_trial(3).await.unwrap();

    assert_eq!(row.n, 3);
    assert_eq!(row.mapping_deposit, 3 * (TX_BASE_GAS + NEW_SLOT_GAS + LOG_GAS));
    assert_eq!(
        row.mapping_bulk_deposit,
        TX_BASE_GAS + UPDATE_SLOT_GAS + 3 * (NEW_SLOT_GAS + LOG_GAS)
    );
    assert_eq!(row.merkle_bulk_deposit, TX_BASE_GAS + NEW_SLOT_GAS + 3 * (LOG_GAS + HASH_GAS));
    assert_eq!(row.mapping_withdraw, 3 * (TX_BASE_GAS + UPDATE_SLOT_GAS + TRANSFER_GAS));
    // Three leaves: two proofs of length 2, one of length 1.
    assert_eq!(
        row.merkle_withdraw,
        3 * (TX_BASE_GAS + NEW_SLOT_GAS + TRANSFER_GAS) + 5 * PROOF_NODE_GAS
    );

    let payees = vec![payee_address(0x2710), payee_address(0x2711), payee_address(0x2712)];
    let amounts = [U256::from(10), U256::from(11), U256::from(12)];
    assert_eq!(chain.with(|c| c.bulk_deposits.clone()), vec![payees.clone()]);

    let leaves: Vec<B256> = payees
        .iter()
        .zip(amounts)
        .map(|(payee, amount)| leaf_digest(*payee, amount))
        .collect();
    let rebuilt = MerkleTree::build(&leaves).unwrap();
    assert_eq!(chain.with(|c| c.emitted_roots.clone()), vec![rebuilt.root()]);
}

#[tokio::test]
async fn test_reconstruction_matches_contract_for_odd_and_even_batches() {
    let chain = SimulatedChain::default();
    let generator = escrow_bench::PayeeGenerator::new(operator(), U256::from(1));

    for n in [1, 2, 5, 8, 13] {
        let deposits = generator.deposits(DEFAULT_PAYEE_BASE, n).unwrap();
        let payees: Vec<Address> = deposits.iter().map(|d| d.payee).collect();
        let amounts: Vec<U256> = deposits.iter().map(|d| d.amount).collect();
        let total = amounts.iter().fold(U256::ZERO, |a, b| a + *b);

        let executed = CommitmentEscrow::bulk_deposit(&chain, &payees, &amounts, total)
            .await
            .unwrap();
        let verified = verify_bulk_deposit(&executed.events, &deposits).unwrap();

        let emitted = match executed.events.last() {
            Some(EscrowEvent::BulkDepositMade { commitment }) => *commitment,
            other => panic!("missing BulkDepositMade: {other:?}"),
        };
        assert_eq!(verified.commitment, emitted, "n={n}");
        for (deposit, proof) in deposits.iter().zip(&verified.proofs) {
            assert!(contract_verify(&proof.siblings(), emitted, deposit.leaf()), "n={n}");
        }
    }
}

#[tokio::test]
async fn test_restore_returns_ledger_to_checkpoint() {
    let chain = SimulatedChain::default();
    let existing = payee_address(500);
    chain.with(|c| {
        c.state.mapping_balances.insert(existing, U256::from(77));
        c.state.escrow_value = U256::from(77);
    });
    let before = chain.state();

    let runner = runner(&chain, operator(), unit_config());
    runner.run_trial(5).await.unwrap();
    runner.run_trial(8).await.unwrap();

    assert_eq!(chain.state(), before);
    assert!(chain.with(|c| c.snapshots.is_empty()));
    assert!(!runner.isolation().has_outstanding().await);
}

#[tokio::test]
async fn test_trials_do_not_leak_into_each_other() {
    let chain = SimulatedChain::default();
    let runner = runner(&chain, operator(), unit_config());

    let first = runner.run_trial(4).await.unwrap();
    let second = runner.run_trial(4).await.unwrap();
    // Leaked balances would turn new-slot deposit estimates into updates.
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_run_appends_one_row_per_trial() {
    let chain = SimulatedChain::default();
    let runner = runner(&chain, operator(), unit_config());
    let schedule = TrialSchedule::new(vec![LinearRange::new(1, 7, 2)], vec![9]).unwrap();

    let mut sink = ResultSink::open(Vec::new(), &Row::header()).unwrap();
    let rows = runner.run(&schedule, &mut sink).await.unwrap();

    assert_eq!(rows.iter().map(|r| r.n).collect::<Vec<_>>(), vec![1, 3, 5, 9]);
    let text = String::from_utf8(sink.into_inner()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 5);
    assert!(lines[0].starts_with("n\tMapping.deposit"));
    for (line, row) in lines[1..].iter().zip(&rows) {
        assert_eq!(*line, row.cells().join("\t"));
    }
}

#[tokio::test]
async fn test_batching_ratio_stays_below_threshold() {
    let chain = SimulatedChain::default();
    let threshold = 1.05;
    let config = BenchConfig { max_batching_ratio: Some(threshold), ..unit_config() };
    let runner = runner(&chain, operator(), config);

    let mut sink = ResultSink::open(Vec::new(), &Row::header()).unwrap();
    let rows = runner.run(&TrialSchedule::default(), &mut sink).await.unwrap();

    assert_eq!(rows.len(), TrialSchedule::default().len());
    for row in &rows {
        let ratio = row.batching_ratio().unwrap();
        assert!(ratio < threshold, "n={} ratio={ratio}", row.n);
    }
    let last = rows.last().unwrap();
    assert!(last.batching_ratio().unwrap() < 0.1);
}

#[tokio::test]
async fn test_commitment_mismatch_aborts_run_and_restores() {
    let chain = SimulatedChain::default();
    chain.with(|c| c.faults.tamper_commitment = true);
    let before = chain.state();
    let runner = runner(&chain, operator(), unit_config());

    let mut sink = ResultSink::open(Vec::new(), &Row::header()).unwrap();
    let err = runner.run(&TrialSchedule::default(), &mut sink).await.unwrap_err();

    let (n, step, source) = trial_error(err);
    assert_eq!(n, 1);
    assert_eq!(step, TrialStep::ReconstructCommitment);
    assert!(matches!(source, BenchError::CommitmentMismatch { .. }));

    assert_eq!(chain.state(), before);
    assert_eq!(sink.rows_written(), 0);
}

#[tokio::test]
async fn test_identity_collision_regenerates_payees() {
    let chain = SimulatedChain::default();
    chain.with(|c| {
        c.faults.colliding.insert(payee_address(DEFAULT_PAYEE_BASE + 1));
    });
    let runner = runner(&chain, operator(), unit_config());

    let row = runner.run_trial(3).await.unwrap();
    assert_eq!(row.n, 3);

    let deposited = chain.with(|c| c.bulk_deposits.clone());
    assert_eq!(
        deposited,
        vec![vec![
            payee_address(DEFAULT_PAYEE_BASE + 3),
            payee_address(DEFAULT_PAYEE_BASE + 4),
            payee_address(DEFAULT_PAYEE_BASE + 5),
        ]]
    );
    assert!(chain.with(|c| c.snapshots.is_empty()));
}

#[tokio::test]
async fn test_identity_collision_gives_up_after_limit() {
    let chain = SimulatedChain::default();
    chain.with(|c| {
        c.faults.colliding.insert(payee_address(DEFAULT_PAYEE_BASE));
    });
    let config = BenchConfig { max_payee_regenerations: 0, ..unit_config() };
    let runner = runner(&chain, operator(), config);

    let err = runner.run_trial(2).await.unwrap_err();
    assert!(err.is_identity_collision());
    let (_, step, _) = trial_error(err);
    assert_eq!(step, TrialStep::MappingDepositEstimate);
}

#[tokio::test]
async fn test_other_estimation_failures_are_fatal() {
    let chain = SimulatedChain::default();
    chain.with(|c| c.faults.reject_merkle_withdraw = true);
    let before = chain.state();
    let runner = runner(&chain, operator(), unit_config());

    let err = runner.run_trial(4).await.unwrap_err();
    let (n, step, source) = trial_error(err);
    assert_eq!(n, 4);
    assert_eq!(step, TrialStep::MerkleWithdrawEstimate);
    assert!(matches!(source, BenchError::EstimationFailure { identity_collision: false, .. }));

    // No retry of the mutating bulk deposit.
    assert_eq!(chain.with(|c| c.bulk_deposits.len()), 1);
    assert_eq!(chain.state(), before);
}

#[tokio::test]
async fn test_failed_restore_after_failed_trial_reports_both() {
    let chain = SimulatedChain::default();
    chain.with(|c| {
        c.faults.reject_merkle_withdraw = true;
        c.faults.offline_revert = true;
    });
    let runner = runner(&chain, operator(), unit_config());

    match runner.run_trial(2).await.unwrap_err() {
        BenchError::CleanupFailed { source, restore } => {
            assert!(matches!(*source, BenchError::Trial { step: TrialStep::MerkleWithdrawEstimate, .. }));
            assert!(matches!(*restore, BenchError::Trial { step: TrialStep::Restore, .. }));
        }
        other => panic!("expected CleanupFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_failed_restore_after_successful_trial_is_fatal() {
    let chain = SimulatedChain::default();
    chain.with(|c| c.faults.offline_revert = true);
    let runner = runner(&chain, operator(), unit_config());

    let (n, step, source) = trial_error(runner.run_trial(2).await.unwrap_err());
    assert_eq!(n, 2);
    assert_eq!(step, TrialStep::Restore);
    assert!(matches!(source, BenchError::BackendUnavailable(_)));
}

#[tokio::test]
async fn test_operator_never_receives_deposits() {
    let chain = SimulatedChain::default();
    let operator = payee_address(DEFAULT_PAYEE_BASE + 1);
    let runner = runner(&chain, operator, unit_config());

    for n in [1, 2, 3, 16] {
        runner.run_trial(n).await.unwrap();
    }
    for payees in chain.with(|c| c.bulk_deposits.clone()) {
        assert!(!payees.contains(&operator));
        let unique: BTreeSet<_> = payees.iter().collect();
        assert_eq!(unique.len(), payees.len());
    }
}

#[tokio::test]
async fn test_zero_population_rejected() {
    let chain = SimulatedChain::default();
    let runner = runner(&chain, operator(), unit_config());
    let (_, step, source) = trial_error(runner.run_trial(0).await.unwrap_err());
    assert_eq!(step, TrialStep::GeneratePayees);
    assert!(matches!(source, BenchError::MalformedInput(_)));
}
