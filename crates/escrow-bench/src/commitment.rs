use alloy_primitives::B256;

use crate::error::{BenchError, Result};
use crate::escrow::EscrowEvent;
use crate::merkle::{MerkleTree, Proof};
use crate::payees::DepositRecord;

/// The records one Merkle bulk deposit emitted.
///
/// The `Deposited` records stay in emission order, which is the order the
/// contract hashed the leaves in. Reconstruction depends on that order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkDepositEvent {
    pub deposits: Vec<DepositRecord>,
    pub commitment: B256,
}

/// A commitment rebuilt from events and checked against the emitted root.
#[derive(Debug, Clone)]
pub struct VerifiedCommitment {
    pub commitment: B256,
    pub deposits: Vec<DepositRecord>,
    pub proofs: Vec<Proof>,
}

impl BulkDepositEvent {
    /// Splits a receipt's events into per-payee records and the single
    /// `BulkDepositMade` commitment.
    pub fn from_events(events: &[EscrowEvent]) -> Result<Self> {
        let mut deposits = Vec::new();
        let mut commitments = Vec::new();
        for event in events {
            match *event {
                EscrowEvent::Deposited { payee, amount } => {
                    deposits.push(DepositRecord::new(payee, amount))
                }
                EscrowEvent::BulkDepositMade { commitment } => commitments.push(commitment),
            }
        }

        let commitment = match commitments.as_slice() {
            [commitment] => *commitment,
            other => {
                return Err(BenchError::MalformedInput(format!(
                    "expected exactly one BulkDepositMade record, found {}",
                    other.len()
                )))
            }
        };
        if deposits.is_empty() {
            return Err(BenchError::MalformedInput(
                "bulk deposit emitted no Deposited records".into(),
            ));
        }

        Ok(Self { deposits, commitment })
    }

    /// Rebuilds the Merkle tree from the records and requires its root to
    /// equal the emitted commitment.
    pub fn reconstruct(&self) -> Result<VerifiedCommitment> {
        let leaves: Vec<B256> = self.deposits.iter().map(DepositRecord::leaf).collect();
        let tree = MerkleTree::build(&leaves)?;

        let computed = tree.root();
        if computed != self.commitment {
            return Err(BenchError::CommitmentMismatch {
                expected: self.commitment,
                computed,
            });
        }

        Ok(VerifiedCommitment {
            commitment: self.commitment,
            deposits: self.deposits.clone(),
            proofs: tree.proofs(),
        })
    }
}

impl VerifiedCommitment {
    /// Requires the emitted records to be exactly the intended deposits, in order.
    pub fn ensure_matches(&self, intended: &[DepositRecord]) -> Result<()> {
        if self.deposits.len() != intended.len() {
            return Err(BenchError::MalformedInput(format!(
                "bulk deposit emitted {} records for {} payees",
                self.deposits.len(),
                intended.len()
            )));
        }
        if let Some((i, (emitted, wanted))) = self
            .deposits
            .iter()
            .zip(intended)
            .enumerate()
            .find(|(_, (emitted, wanted))| emitted != wanted)
        {
            return Err(BenchError::MalformedInput(format!(
                "record {i} is {} / {} but {} / {} was deposited",
                emitted.payee, emitted.amount, wanted.payee, wanted.amount
            )));
        }
        Ok(())
    }
}
