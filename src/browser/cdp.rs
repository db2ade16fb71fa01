//! DevTools wire protocol over one browser-level WebSocket.
//!
//! Page sessions share the socket through flattened `sessionId` routing.
//! A background task reads the socket: replies go to whoever is waiting on
//! their id, everything else lands in the event queue the page drains.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use super::error::BrowserError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Reply = Result<Value, ProtocolFault>;
type Waiters = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

/// Something the browser reported on its own (load fired, download
/// progress, ...).
#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
    /// `None` for browser-level events such as downloads.
    pub session_id: Option<String>,
}

/// The `error` member of a failed reply.
#[derive(Debug, Clone, PartialEq, Deserialize)]
struct ProtocolFault {
    code: i64,
    message: String,
    data: Option<String>,
}

/// Any frame the socket delivers, before it is routed.
#[derive(Debug, Deserialize)]
struct Inbound {
    id: Option<u64>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
    result: Option<Value>,
    error: Option<ProtocolFault>,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

#[derive(Debug)]
enum Routed {
    Reply(u64, Reply),
    Event(CdpEvent),
}

impl Inbound {
    fn route(self) -> Option<Routed> {
        match (self.id, self.method) {
            (Some(id), _) => {
                let reply = match self.error {
                    Some(fault) => Err(fault),
                    None => Ok(self.result.unwrap_or(Value::Null)),
                };
                Some(Routed::Reply(id, reply))
            }
            (None, Some(method)) => Some(Routed::Event(CdpEvent {
                method,
                params: self.params,
                session_id: self.session_id,
            })),
            (None, None) => None,
        }
    }
}

fn decode(text: &str) -> Option<Routed> {
    match serde_json::from_str::<Inbound>(text) {
        Ok(inbound) => inbound.route(),
        Err(e) => {
            warn!(error = %e, "Unreadable DevTools frame");
            None
        }
    }
}

fn encode(id: u64, session_id: Option<&str>, method: &str, params: Value) -> String {
    let mut frame = serde_json::json!({ "id": id, "method": method, "params": params });
    if let Some(session) = session_id {
        frame["sessionId"] = Value::from(session);
    }
    frame.to_string()
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct CdpClient {
    ids: AtomicU64,
    waiters: Waiters,
    sink: Mutex<SplitSink<Socket, Message>>,
    events: mpsc::UnboundedReceiver<CdpEvent>,
    reader: JoinHandle<()>,
}

impl CdpClient {
    /// Open the socket at the browser's `webSocketDebuggerUrl`.
    pub async fn connect(ws_url: &str) -> Result<Self, BrowserError> {
        debug!(url = ws_url, "Connecting to DevTools");
        let (socket, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| BrowserError::ConnectionFailed {
                url: ws_url.to_string(),
                reason: e.to_string(),
            })?;

        let (sink, stream) = socket.split();
        let waiters: Waiters = Arc::default();
        let (event_tx, events) = mpsc::unbounded_channel();
        let reader = tokio::spawn(pump(stream, Arc::clone(&waiters), event_tx));

        Ok(Self {
            ids: AtomicU64::new(1),
            waiters,
            sink: Mutex::new(sink),
            events,
            reader,
        })
    }

    /// Send `method` (to a page session when `session_id` is set) and wait
    /// up to `timeout` for its reply.
    pub async fn call(
        &self,
        session_id: Option<&str>,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, BrowserError> {
        let id = self.ids.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        // Registered first: the reply can arrive before `send` returns.
        self.waiters.lock().await.insert(id, tx);

        trace!(id, method, "DevTools command");
        let frame = encode(id, session_id, method, params);
        if let Err(e) = self.sink.lock().await.send(Message::Text(frame.into())).await {
            self.waiters.lock().await.remove(&id);
            return Err(BrowserError::Protocol {
                detail: format!("could not send {method}: {e}"),
            });
        }

        let reply = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                return Err(BrowserError::Protocol {
                    detail: format!("socket closed before {method} was answered"),
                })
            }
            Err(_) => {
                self.waiters.lock().await.remove(&id);
                return Err(BrowserError::CommandTimeout {
                    method: method.to_string(),
                    duration: timeout,
                });
            }
        };

        reply.map_err(|fault| BrowserError::CdpError {
            code: fault.code,
            message: fault.message,
            data: fault.data,
        })
    }

    /// Next queued event; `None` once the socket is gone.
    pub async fn recv_event(&mut self) -> Option<CdpEvent> {
        self.events.recv().await
    }

    /// Drop every queued event. Returns how many were dropped.
    pub fn drain_events(&mut self) -> usize {
        let mut dropped = 0;
        while self.events.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Read the socket until it closes, routing every frame.
async fn pump(
    mut stream: SplitStream<Socket>,
    waiters: Waiters,
    events: mpsc::UnboundedSender<CdpEvent>,
) {
    while let Some(frame) = stream.next().await {
        let routed = match frame {
            Ok(Message::Text(text)) => decode(text.as_str()),
            Ok(Message::Binary(bytes)) => std::str::from_utf8(&bytes).ok().and_then(decode),
            Ok(Message::Close(_)) => {
                debug!("DevTools closed the socket");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "DevTools socket read failed");
                break;
            }
        };
        match routed {
            Some(Routed::Reply(id, reply)) => {
                if let Some(waiter) = waiters.lock().await.remove(&id) {
                    let _ = waiter.send(reply);
                }
            }
            Some(Routed::Event(event)) => {
                let _ = events.send(event);
            }
            None => {}
        }
    }
    // Dropping the senders wakes every pending call with a closed channel.
    waiters.lock().await.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_page_command() {
        let frame: Value = serde_json::from_str(&encode(
            7,
            Some("SESSION-1"),
            "Runtime.evaluate",
            serde_json::json!({ "expression": "document.readyState" }),
        ))
        .unwrap();
        assert_eq!(frame["id"], 7);
        assert_eq!(frame["method"], "Runtime.evaluate");
        assert_eq!(frame["sessionId"], "SESSION-1");
        assert_eq!(frame["params"]["expression"], "document.readyState");
    }

    #[test]
    fn test_encode_browser_command() {
        let frame: Value =
            serde_json::from_str(&encode(1, None, "Target.getTargets", serde_json::json!({})))
                .unwrap();
        assert!(frame.get("sessionId").is_none());
    }

    #[test]
    fn test_decode_reply() {
        match decode(r#"{"id":3,"result":{"frameId":"F1"},"sessionId":"S"}"#) {
            Some(Routed::Reply(3, Ok(result))) => assert_eq!(result["frameId"], "F1"),
            other => panic!("unexpected {other:?}"),
        }
        // Commands with an empty answer still resolve.
        assert!(matches!(
            decode(r#"{"id":4}"#),
            Some(Routed::Reply(4, Ok(Value::Null)))
        ));
    }

    #[test]
    fn test_decode_fault() {
        match decode(r#"{"id":2,"error":{"code":-32602,"message":"Invalid params"}}"#) {
            Some(Routed::Reply(2, Err(fault))) => {
                assert_eq!(fault.code, -32602);
                assert_eq!(fault.message, "Invalid params");
                assert!(fault.data.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_events() {
        match decode(r#"{"method":"Page.loadEventFired","params":{"timestamp":1.5},"sessionId":"ABC"}"#)
        {
            Some(Routed::Event(event)) => {
                assert_eq!(event.method, "Page.loadEventFired");
                assert_eq!(event.session_id.as_deref(), Some("ABC"));
            }
            other => panic!("unexpected {other:?}"),
        }
        match decode(r#"{"method":"Browser.downloadProgress","params":{"guid":"g1","state":"completed"}}"#)
        {
            Some(Routed::Event(event)) => {
                assert!(event.session_id.is_none());
                assert_eq!(event.params["state"], "completed");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_ignores_junk() {
        assert!(decode("not json").is_none());
        assert!(decode(r#"{"params":{}}"#).is_none());
    }
}
