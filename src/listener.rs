//! Listener and recovery
//!
//! Resolves the hashes announced by the subscriber into full transactions
//! via RPC and forwards decoded events to the notifier. On the first block
//! headers after startup it replays every block between the persisted
//! checkpoint and the live head, so no transaction is lost across restarts.

use alloy_primitives::{B256, U256};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::decoder::{decode_transaction, NotifyEvent};
use crate::rpc::RpcClient;
use crate::subscriber::WsEvent;
use crate::types::Block;

/// Resolves announcements into notify events and drives gap recovery.
pub struct Listener {
    rpc: RpcClient,
    /// Last block fully presented downstream before this process started.
    /// Zero disables recovery; set to zero once the replay catches up.
    recovery_cursor: u64,
}

impl Listener {
    /// Create a listener recovering from the given checkpoint
    /// (0 = start live, no replay).
    pub fn new(rpc: RpcClient, last_block: u64) -> Self {
        Self {
            rpc,
            recovery_cursor: last_block,
        }
    }

    /// Consume announcements until the input channel closes.
    ///
    /// Owns the sending half of the notify channel; dropping it on return
    /// drains the notifier.
    pub async fn run(mut self, mut rx: mpsc::Receiver<WsEvent>, tx: mpsc::Sender<NotifyEvent>) {
        while let Some(event) = rx.recv().await {
            let open = match event {
                WsEvent::PendingTx { hash } => match self.rpc.transaction_by_hash(hash).await {
                    Ok((txn, is_pending)) => {
                        send(&tx, decode_transaction(&txn, is_pending)).await
                    }
                    Err(e) => {
                        warn!("Dropping pending transaction {:#x}: {:#}", hash, e);
                        true
                    }
                },
                WsEvent::NewHead { hash, number } => self.on_new_head(hash, number, &tx).await,
            };

            if !open {
                // Notifier gone; nothing left to forward to.
                return;
            }
        }
    }

    /// Handle a block announcement: fill any gap since the checkpoint,
    /// then emit the announced block itself.
    ///
    /// Returns false once the notify channel closes.
    async fn on_new_head(
        &mut self,
        hash: B256,
        number: U256,
        tx: &mpsc::Sender<NotifyEvent>,
    ) -> bool {
        let head: u64 = match number.try_into() {
            Ok(n) => n,
            Err(_) => {
                warn!("Block number {} out of range, skipping header", number);
                return true;
            }
        };

        if self.recovery_cursor > 0 {
            for next in recovery_targets(self.recovery_cursor, head) {
                info!("Recovery: Doing block {}", next);
                let block = match self.rpc.block_by_number(next).await {
                    Ok(block) => block,
                    Err(e) => {
                        // Leave the cursor alone; the next header retries
                        // from the same point.
                        warn!(
                            "Recovery fetch of block {} failed, will retry on next header: {:#}",
                            next, e
                        );
                        return true;
                    }
                };

                if !emit_block(&block, tx).await {
                    return false;
                }
                self.recovery_cursor = next;
            }

            info!("Recovery is over: Done up to block {}", head);
            self.recovery_cursor = 0;
        }

        match self.rpc.block_by_hash(hash).await {
            Ok(block) => emit_block(&block, tx).await,
            Err(e) => {
                warn!("Dropping block {:#x}: {:#}", hash, e);
                true
            }
        }
    }
}

/// The block numbers a recovery pass must replay before processing `head`:
/// everything after the checkpoint, up to but excluding the head itself.
fn recovery_targets(cursor: u64, head: u64) -> std::ops::Range<u64> {
    cursor + 1..head
}

/// Decode and forward every transaction of a block, then mark the block
/// complete. Returns false once the notify channel closes.
async fn emit_block(block: &Block, tx: &mpsc::Sender<NotifyEvent>) -> bool {
    for txn in &block.transactions {
        if !send(tx, decode_transaction(txn, false)).await {
            return false;
        }
    }
    send(tx, NotifyEvent::BlockComplete(U256::from(block.number))).await
}

/// Forward one event; false means the receiving side is gone.
async fn send(tx: &mpsc::Sender<NotifyEvent>, event: NotifyEvent) -> bool {
    tx.send(event).await.is_ok()
}
