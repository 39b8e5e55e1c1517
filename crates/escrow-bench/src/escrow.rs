//! Escrow service capabilities and their JSON-RPC backed clients.
//!
//! The harness only talks to the two escrow contracts through the traits in
//! this module; `crate::runner` never sees calldata or receipts.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256, U256, U64};
use alloy_sol_types::{sol, SolCall, SolEvent};
use async_trait::async_trait;
use tracing::debug;

use crate::error::{BenchError, Result};
use crate::operator::Operator;
use crate::payees::is_reserved_identity;
use crate::rpc_client::{CallRequest, RpcClient, RpcError, RpcLog};

sol! {
    /// Escrow storing one balance slot per payee.
    interface EscrowUsingMapping {
        event Deposited(address indexed payee, uint256 weiAmount);

        function deposit(address payee) external payable;
        function bulkDeposit(address[] payees, uint256[] amounts) external payable;
        function withdraw(address payee) external;
    }

    /// Escrow storing one Merkle root per bulk deposit.
    interface EscrowUsingMerkleTree {
        event Deposited(address indexed payee, uint256 weiAmount);
        event BulkDepositMade(bytes32 bulkDepositId);

        function bulkDeposit(address[] payees, uint256[] amounts) external payable;
        function withdraw(address payee, uint256 amount, bytes32 bulkDepositId, bytes32[] proof) external;
    }
}

/// Gas limit headroom over the estimate for mutating calls, in percent.
const GAS_LIMIT_MARGIN_PERCENT: u64 = 20;

/// A record emitted by an escrow contract, in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscrowEvent {
    Deposited { payee: Address, amount: U256 },
    BulkDepositMade { commitment: B256 },
}

/// Outcome of one executed bulk deposit.
#[derive(Debug, Clone)]
pub struct ExecutedDeposit {
    pub tx_hash: B256,
    pub gas_used: u64,
    pub events: Vec<EscrowEvent>,
}

/// Direct-mapping escrow.
#[async_trait]
pub trait MappingEscrow: Send + Sync {
    /// Gas a single `deposit(payee)` carrying `amount` would use.
    async fn deposit_estimate(&self, payee: Address, amount: U256) -> Result<u64>;

    /// Executes one `bulkDeposit` funded with `total_value`.
    async fn bulk_deposit(
        &self,
        payees: &[Address],
        amounts: &[U256],
        total_value: U256,
    ) -> Result<ExecutedDeposit>;

    /// Gas `withdraw(payee)` would use.
    async fn withdraw_estimate(&self, payee: Address) -> Result<u64>;
}

/// Merkle-commitment escrow.
#[async_trait]
pub trait CommitmentEscrow: Send + Sync {
    /// Executes one `bulkDeposit`; the events carry the per-payee records and
    /// the batch commitment.
    async fn bulk_deposit(
        &self,
        payees: &[Address],
        amounts: &[U256],
        total_value: U256,
    ) -> Result<ExecutedDeposit>;

    /// Gas `withdraw(payee, amount, commitment, proof)` would use.
    async fn withdraw_estimate(
        &self,
        payee: Address,
        amount: U256,
        commitment: B256,
        proof: &[B256],
    ) -> Result<u64>;
}

/// Decodes the escrow events emitted by `contract`, keeping log order.
///
/// Logs from other contracts and unknown topics are skipped.
pub fn decode_events(contract: Address, logs: &[RpcLog]) -> Result<Vec<EscrowEvent>> {
    let mut events = Vec::with_capacity(logs.len());
    for log in logs.iter().filter(|log| log.address == contract) {
        let Some(topic0) = log.topics.first() else {
            continue;
        };

        if *topic0 == EscrowUsingMerkleTree::Deposited::SIGNATURE_HASH {
            let event = EscrowUsingMerkleTree::Deposited::decode_raw_log(
                log.topics.iter().copied(),
                &log.data,
            )
            .map_err(|e| BenchError::MalformedInput(format!("bad Deposited log: {e}")))?;
            events.push(EscrowEvent::Deposited {
                payee: event.payee,
                amount: event.weiAmount,
            });
        } else if *topic0 == EscrowUsingMerkleTree::BulkDepositMade::SIGNATURE_HASH {
            let event = EscrowUsingMerkleTree::BulkDepositMade::decode_raw_log(
                log.topics.iter().copied(),
                &log.data,
            )
            .map_err(|e| BenchError::MalformedInput(format!("bad BulkDepositMade log: {e}")))?;
            events.push(EscrowEvent::BulkDepositMade {
                commitment: event.bulkDepositId,
            });
        }
    }
    Ok(events)
}

/// Shared plumbing for one deployed escrow contract.
pub struct EscrowContract {
    rpc: Arc<RpcClient>,
    operator: Arc<Operator>,
    address: Address,
    receipt_timeout: Duration,
}

impl EscrowContract {
    pub fn new(
        rpc: Arc<RpcClient>,
        operator: Arc<Operator>,
        address: Address,
        receipt_timeout: Duration,
    ) -> Self {
        Self { rpc, operator, address, receipt_timeout }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    fn request(&self, calldata: Vec<u8>, value: Option<U256>) -> CallRequest {
        CallRequest {
            from: self.operator.address(),
            to: self.address,
            value,
            data: Bytes::from(calldata),
            gas: None,
        }
    }

    /// Per-payee estimate. A failing estimate is attributed to `payee`.
    async fn estimate(&self, payee: Address, calldata: Vec<u8>, value: Option<U256>) -> Result<u64> {
        let request = self.request(calldata, value);
        match self.rpc.estimate_gas(&request).await {
            Ok(gas) => Ok(gas),
            Err(err @ RpcError::Transport(_)) => Err(err.into()),
            Err(err) => Err(BenchError::EstimationFailure {
                payee,
                reason: err.to_string(),
                identity_collision: self.is_special_identity(payee).await?,
            }),
        }
    }

    /// A payee that is reserved or already holds code cannot receive plain
    /// value transfers, so a failure for it is a collision, not a contract bug.
    async fn is_special_identity(&self, payee: Address) -> Result<bool> {
        if is_reserved_identity(payee) {
            return Ok(true);
        }
        Ok(!self.rpc.get_code(payee).await?.is_empty())
    }

    /// Executes a mutating call and waits for its receipt.
    async fn execute(&self, calldata: Vec<u8>, value: U256) -> Result<ExecutedDeposit> {
        let mut request = self.request(calldata, Some(value));
        let estimate = self.rpc.estimate_gas(&request).await?;
        request.gas = Some(U64::from(estimate + estimate * GAS_LIMIT_MARGIN_PERCENT / 100));

        let tx_hash = self.operator.send(&self.rpc, &request).await?;
        let receipt = self.rpc.wait_for_receipt(tx_hash, self.receipt_timeout).await?;
        if receipt.status != 1 {
            return Err(BenchError::TransactionReverted { tx_hash });
        }

        debug!(
            contract = %self.address,
            %tx_hash,
            gas_used = receipt.gas_used,
            logs = receipt.logs.len(),
            "transaction mined"
        );

        Ok(ExecutedDeposit {
            tx_hash,
            gas_used: receipt.gas_used,
            events: decode_events(self.address, &receipt.logs)?,
        })
    }
}

/// `EscrowUsingMapping` reached over JSON-RPC.
pub struct RpcMappingEscrow(pub EscrowContract);

#[async_trait]
impl MappingEscrow for RpcMappingEscrow {
    async fn deposit_estimate(&self, payee: Address, amount: U256) -> Result<u64> {
        let calldata = EscrowUsingMapping::depositCall { payee }.abi_encode();
        self.0.estimate(payee, calldata, Some(amount)).await
    }

    async fn bulk_deposit(
        &self,
        payees: &[Address],
        amounts: &[U256],
        total_value: U256,
    ) -> Result<ExecutedDeposit> {
        let calldata = EscrowUsingMapping::bulkDepositCall {
            payees: payees.to_vec(),
            amounts: amounts.to_vec(),
        }
        .abi_encode();
        self.0.execute(calldata, total_value).await
    }

    async fn withdraw_estimate(&self, payee: Address) -> Result<u64> {
        let calldata = EscrowUsingMapping::withdrawCall { payee }.abi_encode();
        self.0.estimate(payee, calldata, None).await
    }
}

/// `EscrowUsingMerkleTree` reached over JSON-RPC.
pub struct RpcMerkleEscrow(pub EscrowContract);

#[async_trait]
impl CommitmentEscrow for RpcMerkleEscrow {
    async fn bulk_deposit(
        &self,
        payees: &[Address],
        amounts: &[U256],
        total_value: U256,
    ) -> Result<ExecutedDeposit> {
        let calldata = EscrowUsingMerkleTree::bulkDepositCall {
            payees: payees.to_vec(),
            amounts: amounts.to_vec(),
        }
        .abi_encode();
        self.0.execute(calldata, total_value).await
    }

    async fn withdraw_estimate(
        &self,
        payee: Address,
        amount: U256,
        commitment: B256,
        proof: &[B256],
    ) -> Result<u64> {
        let calldata = EscrowUsingMerkleTree::withdrawCall {
            payee,
            amount,
            bulkDepositId: commitment,
            proof: proof.to_vec(),
        }
        .abi_encode();
        self.0.estimate(payee, calldata, None).await
    }
}
