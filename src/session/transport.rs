//! Agent boundary transport: a small framed RPC client speaking the same
//! `{type, id, method, params}` / `{type, id, ok, result, error}` /
//! `{type, event, payload}` envelope as the teacher's own WebSocket server
//! (`ws_server.rs`), just played from the client side against an external
//! agent backend, via `tokio-tungstenite`'s client connector instead of its
//! `accept_hdr_async` server side.
//!
//! The three calls this orchestrator needs from the agent boundary —
//! `event.subscribe`, `session.create`, `session.prompt` — plus
//! `provider.list` for preflight validation.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, oneshot, Mutex as AsyncMutex};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::error::{HostError, HostResult};
use crate::session::types::{Event, ProviderListing};

#[derive(Serialize)]
struct TransportRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    id: &'a str,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct TransportMessage {
    #[serde(rename = "type")]
    kind: String,
    id: Option<String>,
    ok: Option<bool>,
    result: Option<Value>,
    error: Option<TransportError>,
    event: Option<String>,
    payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct TransportError {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

type PendingMap = Arc<AsyncMutex<HashMap<String, oneshot::Sender<Result<Value, TransportError>>>>>;

/// Client half of the agent boundary protocol. Cheap to clone; every clone
/// shares the same underlying connection and event broadcast.
#[derive(Clone)]
pub struct AgentClient {
    out_tx: tokio::sync::mpsc::UnboundedSender<Message>,
    pending: PendingMap,
    events: broadcast::Sender<Event>,
}

impl AgentClient {
    /// Connects to the agent backend bound to `port` on localhost.
    pub async fn connect(port: u16) -> HostResult<Self> {
        let url = format!("ws://127.0.0.1:{port}");
        let (ws_stream, _response) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|err| HostError::Transport(format!("failed to connect to agent at {url}: {err}")))?;

        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = tokio::sync::mpsc::unbounded_channel::<Message>();
        let (events_tx, _events_rx) = broadcast::channel(256);

        let pending: PendingMap = Arc::new(AsyncMutex::new(HashMap::new()));

        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                if write.send(message).await.is_err() {
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_events = events_tx.clone();
        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                let Ok(Message::Text(text)) = message else {
                    continue;
                };
                let Ok(parsed) = serde_json::from_str::<TransportMessage>(&text) else {
                    continue;
                };
                dispatch(parsed, &reader_pending, &reader_events).await;
            }
        });

        Ok(AgentClient {
            out_tx,
            pending,
            events: events_tx,
        })
    }

    /// Subscribes to the agent's global event stream. Each call yields an
    /// independent receiver over the same broadcast channel.
    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    async fn call(&self, method: &str, params: Value) -> HostResult<Value> {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let request = TransportRequest {
            kind: "request",
            id: &id,
            method,
            params,
        };
        let text = serde_json::to_string(&request)
            .map_err(|e| HostError::Internal(format!("failed to encode request: {e}")))?;
        self.out_tx
            .send(Message::Text(text.into()))
            .map_err(|_| HostError::Transport("agent connection closed".to_string()))?;

        match rx.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => Err(HostError::Transport(err.message)),
            Err(_) => Err(HostError::Transport(
                "agent connection closed before responding".to_string(),
            )),
        }
    }

    /// `provider.list()`: `{all: [{id, models}], connected: [id]}`.
    pub async fn provider_list(&self) -> HostResult<ProviderListing> {
        let result = self.call("provider.list", Value::Null).await?;
        serde_json::from_value(result)
            .map_err(|e| HostError::Transport(format!("malformed provider.list response: {e}")))
    }

    /// `session.create()`, yielding a `sessionId`.
    pub async fn session_create(&self) -> HostResult<String> {
        let result = self.call("session.create", Value::Null).await?;
        result
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| HostError::Transport("session.create response missing sessionId".to_string()))
    }

    /// `session.prompt(sessionId, {agent, model, parts})`. Fire-and-forget
    /// from the caller's perspective: the reply only confirms submission,
    /// not completion (completion is observed on the event stream).
    pub async fn session_prompt(
        &self,
        session_id: &str,
        agent: &str,
        model: &str,
        parts: Vec<crate::session::types::PromptPart>,
    ) -> HostResult<()> {
        let params = serde_json::json!({
            "sessionId": session_id,
            "agent": agent,
            "model": model,
            "parts": parts,
        });
        self.call("session.prompt", params).await.map(|_| ())
    }
}

async fn dispatch(message: TransportMessage, pending: &PendingMap, events: &broadcast::Sender<Event>) {
    match message.kind.as_str() {
        "response" => {
            let Some(id) = message.id else { return };
            let Some(tx) = pending.lock().await.remove(&id) else {
                return;
            };
            let outcome = if message.ok.unwrap_or(false) {
                Ok(message.result.unwrap_or(Value::Null))
            } else {
                Err(message.error.unwrap_or(TransportError {
                    message: "agent returned an error with no message".to_string(),
                    code: None,
                }))
            };
            let _ = tx.send(outcome);
        }
        "event" => {
            let Some(event_name) = message.event else { return };
            let payload = message.payload.unwrap_or(Value::Null);
            let session_id = payload
                .get("sessionId")
                .and_then(Value::as_str)
                .map(str::to_string);
            let _ = events.send(Event {
                kind: event_name,
                session_id,
                payload,
            });
        }
        _ => {}
    }
}
