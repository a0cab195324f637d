//! WebSocket subscriber
//!
//! Maintains the `newHeads` and `newPendingTransactions` subscriptions on
//! the upstream node and pushes hash announcements into a bounded channel.
//! The supervising loop redials after any failure, keeping a 5 second floor
//! between connection attempts.

use std::time::{Duration, Instant};

use alloy_primitives::{B256, U256};
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::types::{parse_b256, parse_hex_quantity};

/// Floor between WebSocket connection attempts.
const RECONNECT_FLOOR: Duration = Duration::from_secs(5);

/// A hash announcement pushed by the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsEvent {
    /// A new block header was announced.
    NewHead { hash: B256, number: U256 },
    /// A transaction entered the mempool.
    PendingTx { hash: B256 },
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reply to an eth_subscribe request.
#[derive(Debug, Deserialize)]
struct SubscribeReply {
    id: u64,
    result: String,
}

/// Push frame carrying a subscription update.
#[derive(Debug, Deserialize)]
struct PushFrame {
    params: PushParams,
}

#[derive(Debug, Deserialize)]
struct PushParams {
    subscription: String,
    result: serde_json::Value,
}

/// Block header fields we care about in a newHeads push.
#[derive(Debug, Deserialize)]
struct WsBlockHeader {
    hash: String,
    number: String,
}

/// Run the subscriber until cancelled.
///
/// Owns the sending half of the announcement channel; dropping it on return
/// is what lets the downstream pipeline drain and stop.
pub async fn run(url: String, tx: mpsc::Sender<WsEvent>, cancel: CancellationToken) {
    loop {
        let started = Instant::now();
        match connect_and_stream(&url, &tx, &cancel).await {
            // A clean return means cancellation or a closed channel; both
            // end the subscriber.
            Ok(()) => return,
            Err(e) => warn!("Websocket connection lost: {:#}", e),
        }

        if cancel.is_cancelled() {
            return;
        }

        // Keep at least RECONNECT_FLOOR between connection attempts.
        let elapsed = started.elapsed();
        if elapsed < RECONNECT_FLOOR {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(RECONNECT_FLOOR - elapsed) => {}
            }
        }
    }
}

/// Dial the node, establish both subscriptions, and stream announcements
/// until an error, a closed channel, or cancellation.
async fn connect_and_stream(
    url: &str,
    tx: &mpsc::Sender<WsEvent>,
    cancel: &CancellationToken,
) -> Result<()> {
    info!("Connecting to Ethereum websocket at {}", url);

    let (mut ws, _) = connect_async(url)
        .await
        .context("Failed to dial websocket")?;

    // Both subscriptions are issued synchronously; each reply is read
    // before the next request goes out.
    let heads_sub = subscribe(&mut ws, 1, "newHeads").await?;
    let pending_sub = subscribe(&mut ws, 2, "newPendingTransactions").await?;

    info!(
        "Connected. Subscriptions are {} and {}",
        &heads_sub[..heads_sub.len().min(12)],
        &pending_sub[..pending_sub.len().min(12)]
    );

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            frame = ws.next() => frame,
        };

        let Some(frame) = frame else {
            anyhow::bail!("Websocket stream ended");
        };
        let message = frame.context("Websocket read failed")?;

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => anyhow::bail!("Websocket closed by peer"),
            // Control and binary frames carry nothing for us.
            _ => continue,
        };

        if let Some(event) = parse_frame(&text, &heads_sub, &pending_sub)? {
            // A closed channel means the pipeline is shutting down.
            if tx.send(event).await.is_err() {
                return Ok(());
            }
        }
    }
}

/// Issue one eth_subscribe request and read its reply.
async fn subscribe(ws: &mut WsStream, id: u64, topic: &str) -> Result<String> {
    let request = json!({
        "id": id,
        "method": "eth_subscribe",
        "params": [topic],
    });
    ws.send(Message::Text(request.to_string()))
        .await
        .with_context(|| format!("Failed to send {} subscription", topic))?;

    loop {
        let frame = ws
            .next()
            .await
            .with_context(|| format!("Websocket closed awaiting {} reply", topic))?
            .context("Websocket read failed")?;

        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => anyhow::bail!("Websocket closed awaiting {} reply", topic),
            _ => continue,
        };

        let reply: SubscribeReply = serde_json::from_str(&text)
            .with_context(|| format!("Could not decode {} subscription reply", topic))?;
        if reply.id != id {
            anyhow::bail!(
                "Subscription reply id mismatch: expected {}, got {}",
                id,
                reply.id
            );
        }
        return Ok(reply.result);
    }
}

/// Decode one push frame, keyed on the subscription id it carries.
///
/// Returns Ok(None) for subscriptions we did not open (logged and skipped);
/// malformed frames are errors and tear down the connection.
fn parse_frame(text: &str, heads_sub: &str, pending_sub: &str) -> Result<Option<WsEvent>> {
    let frame: PushFrame =
        serde_json::from_str(text).context("Could not decode message/parse json")?;

    if frame.params.subscription == pending_sub {
        let hash = frame
            .params
            .result
            .as_str()
            .context("Pending transaction result is not a string")?;
        let hash = parse_b256(hash).context("Could not decode transaction hash")?;
        return Ok(Some(WsEvent::PendingTx { hash }));
    }

    if frame.params.subscription == heads_sub {
        let header: WsBlockHeader = serde_json::from_value(frame.params.result)
            .context("Could not decode block header")?;
        let hash = parse_b256(&header.hash).context("Could not decode block hash")?;
        let number =
            parse_hex_quantity(&header.number).context("Could not decode block number")?;
        return Ok(Some(WsEvent::NewHead { hash, number }));
    }

    warn!(
        "Ignoring frame for unknown subscription {}",
        frame.params.subscription
    );
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADS: &str = "0x9ce59a13059e417087c02d3236a0b1cc";
    const PENDING: &str = "0xc3b33aa549fb9a60e95d21862596617c";

    #[test]
    fn test_parse_pending_tx_frame() {
        let text = format!(
            r#"{{"jsonrpc":"2.0","method":"eth_subscription","params":{{"subscription":"{}","result":"0xd6fdc5cc41a9959e922f30cb772a9aef46f4daea279307bc5f7024edc4ccd7fa"}}}}"#,
            PENDING
        );
        match parse_frame(&text, HEADS, PENDING).unwrap() {
            Some(WsEvent::PendingTx { hash }) => {
                assert_eq!(
                    format!("{:x}", hash),
                    "d6fdc5cc41a9959e922f30cb772a9aef46f4daea279307bc5f7024edc4ccd7fa"
                );
            }
            other => panic!("expected pending tx, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_new_head_frame() {
        let text = format!(
            r#"{{"jsonrpc":"2.0","method":"eth_subscription","params":{{"subscription":"{}","result":{{"parentHash":"0x1a2b","difficulty":"0x15d9223a23aa","number":"0x1b4","gasLimit":"0x47e7c4","gasUsed":"0x38658","timestamp":"0x56851097","hash":"0x2228b35589db2235c52254b10d487a84d899b1efbd129d6cc1d2b7fbd5040875"}}}}}}"#,
            HEADS
        );
        match parse_frame(&text, HEADS, PENDING).unwrap() {
            Some(WsEvent::NewHead { hash, number }) => {
                assert_eq!(number, U256::from(0x1b4));
                assert_eq!(
                    format!("{:x}", hash),
                    "2228b35589db2235c52254b10d487a84d899b1efbd129d6cc1d2b7fbd5040875"
                );
            }
            other => panic!("expected new head, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_subscription_is_skipped() {
        let text = r#"{"params":{"subscription":"0xdeadbeef","result":"0x1"}}"#;
        assert_eq!(parse_frame(text, HEADS, PENDING).unwrap(), None);
    }

    #[test]
    fn test_malformed_frame_is_an_error() {
        assert!(parse_frame("not json", HEADS, PENDING).is_err());
        // Frame shape is right but the head payload is not a header object.
        let text = format!(
            r#"{{"params":{{"subscription":"{}","result":"0xabc"}}}}"#,
            HEADS
        );
        assert!(parse_frame(&text, HEADS, PENDING).is_err());
    }
}
