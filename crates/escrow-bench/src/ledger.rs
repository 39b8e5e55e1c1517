use std::sync::Arc;

use alloy_primitives::U256;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{BenchError, Result};
use crate::rpc_client::RpcError;

/// Backend identifier of a ledger snapshot (`evm_snapshot` result).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapshotId(pub U256);

impl std::fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Whole-state checkpointing offered by a development ledger.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Captures the current state and returns its identifier.
    async fn snapshot(&self) -> Result<SnapshotId, RpcError>;

    /// Rolls back to `id`. Returns `false` if the backend no longer knows it.
    async fn revert(&self, id: SnapshotId) -> Result<bool, RpcError>;
}

#[async_trait]
impl<L: Ledger + ?Sized> Ledger for Arc<L> {
    async fn snapshot(&self) -> Result<SnapshotId, RpcError> {
        (**self).snapshot().await
    }

    async fn revert(&self, id: SnapshotId) -> Result<bool, RpcError> {
        (**self).revert(id).await
    }
}

/// Handle for one checkpoint. Consumed by [`StateIsolationController::restore`].
#[derive(Debug)]
#[must_use = "a snapshot must be restored to undo the trial's mutations"]
pub struct StateSnapshot {
    id: SnapshotId,
}

impl StateSnapshot {
    pub fn id(&self) -> SnapshotId {
        self.id
    }
}

/// Makes benchmark trials reproducible against one shared ledger.
///
/// At most one snapshot is outstanding at a time; trials never nest.
pub struct StateIsolationController<L> {
    ledger: L,
    active: Mutex<Option<SnapshotId>>,
}

impl<L: Ledger> StateIsolationController<L> {
    pub fn new(ledger: L) -> Self {
        Self { ledger, active: Mutex::new(None) }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Captures the ledger state before a trial.
    pub async fn checkpoint(&self) -> Result<StateSnapshot> {
        let mut active = self.active.lock().await;
        if let Some(outstanding) = *active {
            return Err(BenchError::MalformedInput(format!(
                "snapshot {outstanding} is still outstanding; checkpoints do not nest"
            )));
        }

        let id = self.ledger.snapshot().await?;
        *active = Some(id);
        debug!(snapshot = %id, "checkpoint taken");
        Ok(StateSnapshot { id })
    }

    /// Rolls the ledger back to `snapshot`, undoing everything since checkpoint.
    pub async fn restore(&self, snapshot: StateSnapshot) -> Result<()> {
        let mut active = self.active.lock().await;
        if *active != Some(snapshot.id) {
            return Err(BenchError::SnapshotExpired { id: snapshot.id });
        }
        // The backend invalidates the id on revert, even on failure.
        *active = None;

        if !self.ledger.revert(snapshot.id).await? {
            return Err(BenchError::SnapshotExpired { id: snapshot.id });
        }
        debug!(snapshot = %snapshot.id, "state restored");
        Ok(())
    }

    /// Returns true while a checkpoint has not been restored.
    pub async fn has_outstanding(&self) -> bool {
        self.active.lock().await.is_some()
    }
}
