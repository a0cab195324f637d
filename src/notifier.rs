//! Notifier
//!
//! Terminal stage of the ingestion pipeline. Filters transfer events
//! against the managed-address registry, persists matches, and advances
//! the block checkpoint. Because events arrive in channel order and every
//! insert completes before the next event is taken, the checkpoint can
//! never move past an unpersisted transaction of the same block.

use tokio::sync::mpsc;
use tracing::warn;

use crate::decoder::{NotifyEvent, TransferEvent};
use crate::keys;
use crate::store::Store;

/// Consume notify events until the channel closes.
pub async fn run(store: Store, mut rx: mpsc::Receiver<NotifyEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            NotifyEvent::None => {}
            NotifyEvent::BlockComplete(number) => {
                // A failed upsert leaves the old checkpoint in place, so the
                // next startup replays this block.
                if let Err(e) = store.set_setting("last_block", &number.to_string()).await {
                    warn!("Could not advance checkpoint to {}: {:#}", number, e);
                }
            }
            NotifyEvent::Transfer(transfer) => {
                if let Err(e) = persist_if_known(&store, &transfer).await {
                    warn!(
                        "Dropping notification for {:#x}: {:#}",
                        transfer.tx_hash, e
                    );
                }
            }
        }
    }
}

/// Insert a notification row if the destination is a managed address.
async fn persist_if_known(store: &Store, transfer: &TransferEvent) -> anyhow::Result<()> {
    let to = keys::canonical_address(&transfer.to);
    if !store.is_address_known(&to).await? {
        return Ok(());
    }

    let contract = transfer
        .contract
        .as_ref()
        .map(keys::canonical_address)
        .unwrap_or_default();

    store
        .insert_notification(
            &keys::canonical_address(&transfer.from),
            &to,
            &contract,
            &transfer.amount.to_string(),
            transfer.is_pending,
            &hex::encode(transfer.tx_hash),
        )
        .await
}
