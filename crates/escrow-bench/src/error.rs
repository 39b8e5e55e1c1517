use alloy_primitives::{Address, B256};
use thiserror::Error;

use crate::ledger::SnapshotId;
use crate::rpc_client::RpcError;

/// Step of a single trial, reported alongside any failure inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialStep {
    GeneratePayees,
    Checkpoint,
    MappingDepositEstimate,
    MappingBulkDeposit,
    MappingWithdrawEstimate,
    MerkleBulkDeposit,
    ReconstructCommitment,
    MerkleWithdrawEstimate,
    Restore,
}

impl std::fmt::Display for TrialStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::GeneratePayees => "generate payees",
            Self::Checkpoint => "checkpoint",
            Self::MappingDepositEstimate => "Mapping.deposit estimate",
            Self::MappingBulkDeposit => "Mapping.bulkDeposit",
            Self::MappingWithdrawEstimate => "Mapping.withdraw estimate",
            Self::MerkleBulkDeposit => "Merkle.bulkDeposit",
            Self::ReconstructCommitment => "commitment reconstruction",
            Self::MerkleWithdrawEstimate => "Merkle.withdraw estimate",
            Self::Restore => "restore",
        };
        f.write_str(name)
    }
}

/// Errors produced by the benchmark harness.
#[derive(Debug, Error)]
pub enum BenchError {
    /// Empty or inconsistent leaf/record sets.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// The Merkle root rebuilt from `Deposited` records differs from the
    /// root emitted in `BulkDepositMade`.
    #[error("commitment mismatch: emitted {expected}, recomputed {computed}")]
    CommitmentMismatch { expected: B256, computed: B256 },

    /// The snapshot was already consumed or is unknown to the backend.
    #[error("snapshot {id} expired or already consumed")]
    SnapshotExpired { id: SnapshotId },

    /// The ledger connection is gone.
    #[error("ledger backend unavailable: {0}")]
    BackendUnavailable(#[source] RpcError),

    /// A cost estimate call failed for one payee.
    #[error("gas estimation failed for payee {payee}: {reason}")]
    EstimationFailure {
        payee: Address,
        reason: String,
        /// True when the payee collides with an identity the ledger treats specially.
        identity_collision: bool,
    },

    /// A mutating transaction was mined with a failure status.
    #[error("transaction {tx_hash} reverted")]
    TransactionReverted { tx_hash: B256 },

    #[error(transparent)]
    Rpc(RpcError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure inside a trial, annotated with the population size and step.
    #[error("trial n={n} failed during {step}: {source}")]
    Trial {
        n: usize,
        step: TrialStep,
        #[source]
        source: Box<BenchError>,
    },

    /// The trial failed and the follow-up restore failed as well; the ledger
    /// state is no longer trustworthy.
    #[error("{source}; restore also failed: {restore}")]
    CleanupFailed {
        #[source]
        source: Box<BenchError>,
        restore: Box<BenchError>,
    },
}

impl BenchError {
    /// Wraps this error with the trial it occurred in.
    pub fn during(self, n: usize, step: TrialStep) -> Self {
        match self {
            // Keep the innermost location.
            err @ Self::Trial { .. } => err,
            err => Self::Trial { n, step, source: Box::new(err) },
        }
    }

    /// Returns true if the root cause is a payee colliding with a reserved identity.
    pub fn is_identity_collision(&self) -> bool {
        match self {
            Self::EstimationFailure { identity_collision, .. } => *identity_collision,
            Self::Trial { source, .. } => source.is_identity_collision(),
            _ => false,
        }
    }
}

impl From<RpcError> for BenchError {
    fn from(err: RpcError) -> Self {
        if err.is_transport() {
            Self::BackendUnavailable(err)
        } else {
            Self::Rpc(err)
        }
    }
}

pub type Result<T, E = BenchError> = std::result::Result<T, E>;
