//! Relay pool (C6): multiplexes WebSocket connections to N relays,
//! speaking the `REQ`/`EVENT`/`CLOSE` → `EVENT`/`EOSE`/`OK`/`NOTICE`
//! wire protocol.
//!
//! One task per relay URL owns that connection's split socket halves
//! and runs a `tokio::select!` dual loop racing the inbound socket
//! against the outbound queue: an unbounded outbound queue is the
//! connection's single-writer resource, and every inbound frame is
//! parsed and forwarded to a pool-wide broadcast channel tagged with
//! its origin relay.

use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use nsyte_types::SignedEvent;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay {0} unreachable: {1}")]
    Unreachable(String, String),
    #[error("timed out waiting for relay response")]
    Timeout,
    #[error("malformed relay message: {0}")]
    Malformed(String),
}

/// Subscription filter: tag filters use the
/// `#<letter>` wire key, held here as an already-prefixed map so the
/// wire encoder doesn't need special-case field names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(flatten, skip_serializing_if = "BTreeMap::is_empty")]
    pub tag_filters: BTreeMap<String, Vec<String>>,
}

/// A parsed relay→client frame.
#[derive(Debug, Clone)]
pub enum RelayMessage {
    Event { sub_id: String, event: Box<SignedEvent> },
    Eose { sub_id: String },
    Ok { event_id: String, accepted: bool, message: String },
    Notice { message: String },
}

impl RelayMessage {
    fn parse(text: &str) -> Result<Self, RelayError> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| RelayError::Malformed(e.to_string()))?;
        let arr = value
            .as_array()
            .ok_or_else(|| RelayError::Malformed("frame is not a JSON array".to_string()))?;
        let tag = arr
            .first()
            .and_then(|v| v.as_str())
            .ok_or_else(|| RelayError::Malformed("frame missing type tag".to_string()))?;

        match tag {
            "EVENT" => {
                let sub_id = arr
                    .get(1)
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| RelayError::Malformed("EVENT missing sub_id".to_string()))?
                    .to_string();
                let event: SignedEvent = arr
                    .get(2)
                    .cloned()
                    .ok_or_else(|| RelayError::Malformed("EVENT missing payload".to_string()))
                    .and_then(|v| serde_json::from_value(v).map_err(|e| RelayError::Malformed(e.to_string())))?;
                Ok(RelayMessage::Event { sub_id, event: Box::new(event) })
            }
            "EOSE" => {
                let sub_id = arr
                    .get(1)
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| RelayError::Malformed("EOSE missing sub_id".to_string()))?
                    .to_string();
                Ok(RelayMessage::Eose { sub_id })
            }
            "OK" => {
                let event_id = arr
                    .get(1)
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| RelayError::Malformed("OK missing event id".to_string()))?
                    .to_string();
                let accepted = arr.get(2).and_then(|v| v.as_bool()).unwrap_or(false);
                let message = arr.get(3).and_then(|v| v.as_str()).unwrap_or("").to_string();
                Ok(RelayMessage::Ok { event_id, accepted, message })
            }
            "NOTICE" => {
                let message = arr.get(1).and_then(|v| v.as_str()).unwrap_or("").to_string();
                Ok(RelayMessage::Notice { message })
            }
            other => Err(RelayError::Malformed(format!("unknown frame type {other}"))),
        }
    }
}

enum OutboundFrame {
    Req { sub_id: String, filters: Vec<Filter> },
    Close { sub_id: String },
    Event { event: SignedEvent },
}

impl OutboundFrame {
    fn to_wire(&self) -> Result<String, RelayError> {
        let value = match self {
            OutboundFrame::Req { sub_id, filters } => {
                let mut arr = vec![serde_json::json!("REQ"), serde_json::json!(sub_id)];
                for filter in filters {
                    arr.push(serde_json::to_value(filter).map_err(|e| RelayError::Malformed(e.to_string()))?);
                }
                serde_json::Value::Array(arr)
            }
            OutboundFrame::Close { sub_id } => serde_json::json!(["CLOSE", sub_id]),
            OutboundFrame::Event { event } => serde_json::json!(["EVENT", event]),
        };
        serde_json::to_string(&value).map_err(|e| RelayError::Malformed(e.to_string()))
    }
}

/// One relay connection: the single-writer outbound queue plus the
/// task driving the socket.
struct RelayConnection {
    url: String,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    task: JoinHandle<()>,
}

/// A pool of relay connections, fanning inbound frames into one
/// broadcast channel tagged by origin relay URL.
pub struct RelayPool {
    connections: Vec<RelayConnection>,
    inbound_tx: broadcast::Sender<(String, RelayMessage)>,
}

/// Per-relay connection outcome from [`RelayPool::connect`].
pub struct ConnectReport {
    pub connected: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl RelayPool {
    /// Connects to every URL in `urls`, best-effort: a relay that
    /// can't be reached is recorded in the report rather than failing
    /// the whole pool (: relays are unordered w.r.t. one
    /// another).
    pub async fn connect(urls: &[String]) -> (Self, ConnectReport) {
        let (inbound_tx, _rx) = broadcast::channel(1024);
        let mut connections = Vec::new();
        let mut connected = Vec::new();
        let mut failed = Vec::new();

        for url in urls {
            match tokio_tungstenite::connect_async(url.as_str()).await {
                Ok((stream, _response)) => {
                    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                    let task = tokio::spawn(drive_connection(url.clone(), stream, outbound_rx, inbound_tx.clone()));
                    connections.push(RelayConnection { url: url.clone(), outbound: outbound_tx, task });
                    connected.push(url.clone());
                }
                Err(e) => failed.push((url.clone(), e.to_string())),
            }
        }

        (Self { connections, inbound_tx }, ConnectReport { connected, failed })
    }

    pub fn relay_urls(&self) -> Vec<String> {
        self.connections.iter().map(|c| c.url.clone()).collect()
    }

    /// Subscribes to inbound frames from every connected relay.
    pub fn inbound(&self) -> broadcast::Receiver<(String, RelayMessage)> {
        self.inbound_tx.subscribe()
    }

    /// Sends `REQ` to every connected relay.
    pub fn subscribe(&self, sub_id: &str, filters: Vec<Filter>) {
        for conn in &self.connections {
            let _ = conn.outbound.send(OutboundFrame::Req { sub_id: sub_id.to_string(), filters: filters.clone() });
        }
    }

    /// Sends `CLOSE` to every connected relay.
    pub fn close_subscription(&self, sub_id: &str) {
        for conn in &self.connections {
            let _ = conn.outbound.send(OutboundFrame::Close { sub_id: sub_id.to_string() });
        }
    }

    /// Broadcasts `event` to every connected relay and waits (up to
    /// `timeout`) for each one's `OK` response. A relay that never
    /// responds is recorded as unreachable rather than failing the
    /// others — the executor (C9) is the one that applies quorum
    /// policy to the result.
    pub async fn publish(&self, event: &SignedEvent, timeout: Duration) -> Vec<(String, Result<(bool, String), RelayError>)> {
        let mut inbound = self.inbound();
        for conn in &self.connections {
            let _ = conn.outbound.send(OutboundFrame::Event { event: event.clone() });
        }

        let mut pending: std::collections::BTreeSet<String> = self.connections.iter().map(|c| c.url.clone()).collect();
        let mut results = Vec::new();
        let deadline = tokio::time::Instant::now() + timeout;

        while !pending.is_empty() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, inbound.recv()).await {
                Ok(Ok((relay_url, RelayMessage::Ok { event_id, accepted, message }))) => {
                    if event_id == event.id && pending.remove(&relay_url) {
                        results.push((relay_url, Ok((accepted, message))));
                    }
                }
                Ok(Ok(_)) => continue,
                Ok(Err(_)) => break,
                Err(_) => break,
            }
        }

        for url in pending {
            results.push((url, Err(RelayError::Timeout)));
        }
        results
    }

    /// Tears down every connection.
    pub async fn close(self) {
        for conn in self.connections {
            conn.task.abort();
            let _ = conn.task.await;
        }
    }
}

async fn drive_connection(
    url: String,
    stream: tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    mut outbound_rx: mpsc::UnboundedReceiver<OutboundFrame>,
    inbound_tx: broadcast::Sender<(String, RelayMessage)>,
) {
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            frame = outbound_rx.recv() => {
                match frame {
                    Some(frame) => {
                        let Ok(text) = frame.to_wire() else { continue };
                        if write.send(WsMessage::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Ok(parsed) = RelayMessage::parse(&text) {
                            let _ = inbound_tx.send((url.clone(), parsed));
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = write.send(WsMessage::Pong(data)).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt as _;
    use nsyte_types::kind;
    use tokio::net::TcpListener;

    fn sample_event(id: &str) -> SignedEvent {
        SignedEvent {
            id: id.to_string(),
            pubkey: "pk".to_string(),
            created_at: 0,
            kind: kind::MANIFEST,
            tags: vec![],
            content: String::new(),
            sig: "sig".to_string(),
        }
    }

    /// Spawns a loopback relay server that answers every `REQ` with
    /// `EOSE` and every `EVENT` with an `OK`.
    async fn spawn_scripted_relay() -> (String, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        let task = tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else { return };
            let Ok(ws) = tokio_tungstenite::accept_async(stream).await else { return };
            let (mut write, mut read) = ws.split();

            while let Some(Ok(WsMessage::Text(text))) = read.next().await {
                let value: serde_json::Value = serde_json::from_str(&text).expect("json");
                let arr = value.as_array().expect("array");
                match arr[0].as_str().unwrap() {
                    "REQ" => {
                        let sub_id = arr[1].as_str().unwrap();
                        let frame = serde_json::to_string(&serde_json::json!(["EOSE", sub_id])).unwrap();
                        let _ = write.send(WsMessage::Text(frame)).await;
                    }
                    "EVENT" => {
                        let event_id = arr[1]["id"].as_str().unwrap();
                        let frame = serde_json::to_string(&serde_json::json!(["OK", event_id, true, ""])).unwrap();
                        let _ = write.send(WsMessage::Text(frame)).await;
                    }
                    _ => {}
                }
            }
        });

        (format!("ws://{addr}"), task)
    }

    #[tokio::test]
    async fn connect_reports_success_for_reachable_relay() {
        let (url, _server) = spawn_scripted_relay().await;
        let (pool, report) = RelayPool::connect(&[url.clone()]).await;
        assert_eq!(report.connected, vec![url]);
        assert!(report.failed.is_empty());
        pool.close().await;
    }

    #[tokio::test]
    async fn connect_reports_failure_for_unreachable_relay() {
        let (_pool, report) = RelayPool::connect(&["ws://127.0.0.1:1".to_string()]).await;
        assert!(report.connected.is_empty());
        assert_eq!(report.failed.len(), 1);
    }

    #[tokio::test]
    async fn subscribe_receives_eose_from_scripted_relay() {
        let (url, _server) = spawn_scripted_relay().await;
        let (pool, _report) = RelayPool::connect(&[url]).await;
        let mut inbound = pool.inbound();

        pool.subscribe("sub-1", vec![Filter::default()]);

        let (_, msg) = tokio::time::timeout(Duration::from_secs(2), inbound.recv())
            .await
            .expect("timeout")
            .expect("recv");
        assert!(matches!(msg, RelayMessage::Eose { sub_id } if sub_id == "sub-1"));
        pool.close().await;
    }

    #[tokio::test]
    async fn publish_collects_ok_from_scripted_relay() {
        let (url, _server) = spawn_scripted_relay().await;
        let (pool, _report) = RelayPool::connect(&[url.clone()]).await;

        let event = sample_event("event-id-1");
        let results = pool.publish(&event, Duration::from_secs(2)).await;

        assert_eq!(results.len(), 1);
        let (relay, outcome) = &results[0];
        assert_eq!(relay, &url);
        assert_eq!(outcome.as_ref().unwrap(), &(true, String::new()));
        pool.close().await;
    }

    #[tokio::test]
    async fn publish_times_out_when_relay_never_responds() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let ws = tokio_tungstenite::accept_async(stream).await.expect("upgrade");
            let (_write, mut read) = ws.split();
            while read.next().await.is_some() {}
        });

        let url = format!("ws://{addr}");
        let (pool, _report) = RelayPool::connect(&[url.clone()]).await;
        let event = sample_event("event-id-2");
        let results = pool.publish(&event, Duration::from_millis(200)).await;

        assert_eq!(results.len(), 1);
        assert!(matches!(&results[0].1, Err(RelayError::Timeout)));
        pool.close().await;
        server.abort();
    }

    #[test]
    fn relay_message_parse_rejects_malformed_frame() {
        let err = RelayMessage::parse("{}").expect_err("must fail");
        assert!(matches!(err, RelayError::Malformed(_)));
    }

    #[test]
    fn filter_serializes_tag_filters_with_hash_prefixed_keys() {
        let mut tag_filters = BTreeMap::new();
        tag_filters.insert("#x".to_string(), vec!["hash1".to_string()]);
        let filter = Filter { tag_filters, ..Default::default() };
        let json = serde_json::to_string(&filter).unwrap();
        assert!(json.contains("\"#x\":[\"hash1\"]"));
    }
}
