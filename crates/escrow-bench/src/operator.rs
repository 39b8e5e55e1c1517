use alloy_consensus::{SignableTransaction, TxEip1559};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{Address, B256, TxKind};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use tracing::debug;

use crate::error::{BenchError, Result};
use crate::rpc_client::{CallRequest, RpcClient};

/// The payer funding every deposit.
pub enum Operator {
    /// Account managed (and unlocked) by the node; transactions go through
    /// `eth_sendTransaction`.
    Unlocked(Address),
    /// Key held by the harness; transactions are signed locally.
    Local(LocalOperator),
}

pub struct LocalOperator {
    signer: PrivateKeySigner,
    chain_id: u64,
}

impl Operator {
    /// Uses the node's first account, like a development chain's default sender.
    pub async fn first_unlocked(rpc: &RpcClient) -> Result<Self> {
        let accounts = rpc.accounts().await?;
        let address = accounts.first().copied().ok_or_else(|| {
            BenchError::Config("node exposes no unlocked accounts; pass a private key".into())
        })?;
        Ok(Self::Unlocked(address))
    }

    /// Signs with `private_key` for the chain behind `rpc`.
    pub async fn local(rpc: &RpcClient, private_key: &B256) -> Result<Self> {
        let signer = PrivateKeySigner::from_bytes(private_key)
            .map_err(|e| BenchError::Config(format!("invalid operator private key: {e}")))?;
        let chain_id = rpc.chain_id().await?;
        Ok(Self::Local(LocalOperator { signer, chain_id }))
    }

    pub fn address(&self) -> Address {
        match self {
            Self::Unlocked(address) => *address,
            Self::Local(local) => local.signer.address(),
        }
    }

    /// Submits `request` (which must carry a gas limit) and returns its hash.
    pub async fn send(&self, rpc: &RpcClient, request: &CallRequest) -> Result<B256> {
        match self {
            Self::Unlocked(_) => Ok(rpc.send_transaction(request).await?),
            Self::Local(local) => local.send(rpc, request).await,
        }
    }
}

impl LocalOperator {
    async fn send(&self, rpc: &RpcClient, request: &CallRequest) -> Result<B256> {
        let gas_limit = request
            .gas
            .ok_or_else(|| BenchError::MalformedInput("transaction without gas limit".into()))?
            .to::<u64>();

        // Snapshots roll the nonce back with everything else, so never cache it.
        let nonce = rpc.get_nonce(self.signer.address()).await?;
        let gas_price = rpc.gas_price().await?;

        let tx = TxEip1559 {
            chain_id: self.chain_id,
            nonce,
            gas_limit,
            max_fee_per_gas: gas_price * 2,
            max_priority_fee_per_gas: gas_price / 10,
            to: TxKind::Call(request.to),
            value: request.value.unwrap_or_default(),
            input: request.data.clone(),
            access_list: Default::default(),
        };

        let sig = self
            .signer
            .sign_hash_sync(&tx.signature_hash())
            .map_err(|e| BenchError::Config(format!("failed to sign transaction: {e}")))?;
        let signed = tx.into_signed(sig);
        let mut encoded = Vec::new();
        signed.encode_2718(&mut encoded);

        debug!(nonce, gas_limit, tx_hash = %signed.hash(), "sending signed transaction");
        Ok(rpc.send_raw_transaction(&encoded).await?)
    }
}
