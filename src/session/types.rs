//! Shared types for the Session Orchestrator: the per-session state machine,
//! the event envelope, and the transport DTOs used by [`super::transport`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a session is in its lifecycle.
///
/// ```text
///  NEW -> STARTING -> READY -> PROMPTING -> READY -> ... -> CLOSED
///                        \              \
///                    STARTUP_ERR   AGENT_ERR -> CLOSED
/// ```
/// `Closed` is reachable from every other phase and guarantees the server
/// handle has been released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    New,
    Starting,
    Ready,
    Prompting,
    StartupErr,
    AgentErr,
    Closed,
}

/// A tagged record streamed from an active session.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

impl Event {
    pub const MESSAGE_PART_UPDATED: &'static str = "message.part.updated";
    pub const SESSION_IDLE: &'static str = "session.idle";
    pub const SESSION_ERROR: &'static str = "session.error";

    /// Whether this event should be delivered to a consumer filtering on
    /// `session_id`: events with no session identity are informational and
    /// always pass through.
    pub fn matches_session(&self, session_id: &str) -> bool {
        match &self.session_id {
            Some(id) => id == session_id,
            None => true,
        }
    }
}

/// One part of a prompt submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptPart {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

/// What the agent advertises via `provider.list()`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderListing {
    pub all: Vec<ProviderDescriptor>,
    pub connected: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderDescriptor {
    pub id: String,
    #[serde(default)]
    pub models: std::collections::HashMap<String, Value>,
}

/// A live agent backend, bound to one workspace.
pub struct SessionState {
    pub session_id: String,
    pub workspace_key: String,
    pub members: Vec<String>,
}
