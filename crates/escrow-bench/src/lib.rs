//! Gas benchmark comparing two ways of paying many payees from one escrow:
//! a per-payee balance mapping and a Merkle-root commitment per batch.
//!
//! Each trial checkpoints the ledger, measures both strategies for `n`
//! payees, rebuilds the batch's Merkle tree from emitted events and checks
//! it against the on-chain root, then restores the ledger.

pub mod commitment;
pub mod config;
pub mod error;
pub mod escrow;
pub mod ledger;
pub mod measurement;
pub mod merkle;
pub mod operator;
pub mod payees;
pub mod rpc_client;
pub mod runner;
pub mod schedule;
pub mod sink;

pub use commitment::{BulkDepositEvent, VerifiedCommitment};
pub use config::{BenchConfig, FINNEY};
pub use error::{BenchError, TrialStep};
pub use escrow::{
    CommitmentEscrow, EscrowContract, EscrowEvent, ExecutedDeposit, MappingEscrow,
    RpcMappingEscrow, RpcMerkleEscrow,
};
pub use ledger::{Ledger, SnapshotId, StateIsolationController, StateSnapshot};
pub use measurement::{GasMeasurement, Operation, Row};
pub use merkle::{leaf_digest, MerkleTree, Proof, ProofNode, Side};
pub use operator::Operator;
pub use payees::{DepositRecord, PayeeGenerator, DEFAULT_PAYEE_BASE};
pub use rpc_client::{RpcClient, RpcError};
pub use runner::{verify_bulk_deposit, DistributionBenchmarkRunner};
pub use schedule::{LinearRange, TrialSchedule};
pub use sink::ResultSink;
