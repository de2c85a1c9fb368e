//! Centralized error handling for the host.
//!
//! This module provides a unified error handling approach with:
//! - Standardized error codes for an external CLI/HTTP collaborator
//! - Clear error categories matching the spec's error taxonomy
//! - Context helpers usable at every call site

use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Error Codes
// ============================================================================

/// Stable error code constants an external collaborator can switch on
/// without re-deriving context from the message text.
pub mod codes {
    pub const UNKNOWN_RESOURCE: &str = "UNKNOWN_RESOURCE";
    pub const DUPLICATE_RESOURCE: &str = "DUPLICATE_RESOURCE";
    pub const INVALID_RESOURCE_NAME: &str = "INVALID_RESOURCE_NAME";
    pub const NETWORK_ERROR: &str = "NETWORK_ERROR";
    pub const REPO_CORRUPT: &str = "REPO_CORRUPT";
    pub const WORKSPACE_MISSING: &str = "WORKSPACE_MISSING";
    pub const EMPTY_REPOSITORY_SET: &str = "EMPTY_REPOSITORY_SET";
    pub const PORTS_EXHAUSTED: &str = "PORTS_EXHAUSTED";
    pub const SESSION_START_FAILED: &str = "SESSION_START_FAILED";
    pub const AGENT_ERROR: &str = "AGENT_ERROR";
    pub const INVALID_PROVIDER: &str = "INVALID_PROVIDER";
    pub const PROVIDER_NOT_CONNECTED: &str = "PROVIDER_NOT_CONNECTED";
    pub const INVALID_MODEL: &str = "INVALID_MODEL";
    pub const GIT2_ERROR: &str = "GIT2_ERROR";
    pub const IO_ERROR: &str = "IO_ERROR";
    pub const TRANSPORT_ERROR: &str = "TRANSPORT_ERROR";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

// ============================================================================
// Host Error Type
// ============================================================================

/// The error type shared by every component in the host.
///
/// This uses an enum-based approach with `thiserror` for clean error
/// definitions and automatic conversions from underlying error types.
#[derive(Error, Debug)]
pub enum HostError {
    /// Registry lookup miss.
    #[error("unknown resource: {0}")]
    UnknownResource(String),

    /// Registry add conflict (case-insensitive).
    #[error("resource already exists: {0}")]
    DuplicateResource(String),

    /// Name does not match `^[a-z0-9_-]+$`.
    #[error("invalid resource name: {0}")]
    InvalidResourceName(String),

    /// Transient git fetch/clone failure. Non-fatal; caller may retry.
    #[error("network error: {0}")]
    NetworkError(String),

    /// Cached clone's `origin` remote does not match the registered URL.
    #[error("cached clone for '{name}' does not match its configured origin")]
    RepoCorrupt { name: String },

    /// `clear`/inspect of a workspace key with no directory on disk.
    #[error("workspace not found: {0}")]
    WorkspaceMissing(String),

    /// Empty set passed to `workspace_key` or `ensure_workspace`.
    #[error("repository set must not be empty")]
    EmptyRepositorySet,

    /// No backend port available within the configured probe window.
    #[error("no free port found after probing {tried} ports starting at {base}")]
    PortsExhausted { base: u16, tried: u16 },

    /// Agent refused to create a session.
    #[error("agent refused to create a session: {0}")]
    SessionStartFailed(String),

    /// Surfaced from a `session.error` event.
    #[error("agent error: {name}: {cause}")]
    AgentError { name: String, cause: String },

    /// Requested provider is not one the agent advertises.
    #[error("provider '{provider_id}' is not one of the agent's advertised providers: {available:?}")]
    InvalidProvider {
        provider_id: String,
        available: Vec<String>,
    },

    /// Requested provider is advertised but not currently connected.
    #[error("provider '{provider_id}' is advertised but not connected (connected: {connected:?})")]
    ProviderNotConnected {
        provider_id: String,
        connected: Vec<String>,
    },

    /// Requested model is not available for the requested provider.
    #[error("model '{model_id}' is not available for provider '{provider_id}' (available: {available:?})")]
    InvalidModel {
        provider_id: String,
        model_id: String,
        available: Vec<String>,
    },

    /// Error from libgit2.
    #[error("git operation failed: {0}")]
    Git2(#[from] git2::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Agent transport (connect/send/receive) error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Generic internal error, for context-rich failures that don't fit
    /// another variant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl HostError {
    /// Get the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            HostError::UnknownResource(_) => codes::UNKNOWN_RESOURCE,
            HostError::DuplicateResource(_) => codes::DUPLICATE_RESOURCE,
            HostError::InvalidResourceName(_) => codes::INVALID_RESOURCE_NAME,
            HostError::NetworkError(_) => codes::NETWORK_ERROR,
            HostError::RepoCorrupt { .. } => codes::REPO_CORRUPT,
            HostError::WorkspaceMissing(_) => codes::WORKSPACE_MISSING,
            HostError::EmptyRepositorySet => codes::EMPTY_REPOSITORY_SET,
            HostError::PortsExhausted { .. } => codes::PORTS_EXHAUSTED,
            HostError::SessionStartFailed(_) => codes::SESSION_START_FAILED,
            HostError::AgentError { .. } => codes::AGENT_ERROR,
            HostError::InvalidProvider { .. } => codes::INVALID_PROVIDER,
            HostError::ProviderNotConnected { .. } => codes::PROVIDER_NOT_CONNECTED,
            HostError::InvalidModel { .. } => codes::INVALID_MODEL,
            HostError::Git2(_) => codes::GIT2_ERROR,
            HostError::Io(_) => codes::IO_ERROR,
            HostError::Transport(_) => codes::TRANSPORT_ERROR,
            HostError::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Whether a caller might reasonably retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            HostError::Git2(err) => matches!(
                err.class(),
                git2::ErrorClass::Net | git2::ErrorClass::Callback | git2::ErrorClass::Ssl
            ),
            HostError::NetworkError(_) | HostError::Transport(_) => true,
            HostError::PortsExhausted { .. } => true,
            _ => false,
        }
    }
}

// ============================================================================
// Serializable Error for an external collaborator
// ============================================================================

/// Serializable error structure that can be handed to a CLI/HTTP wrapper.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(rename = "isRetryable")]
    pub is_retryable: bool,
}

impl From<&HostError> for ErrorResponse {
    fn from(err: &HostError) -> Self {
        ErrorResponse {
            code: err.code().to_string(),
            message: err.to_string(),
            is_retryable: err.is_retryable(),
        }
    }
}

impl From<HostError> for ErrorResponse {
    fn from(err: HostError) -> Self {
        ErrorResponse::from(&err)
    }
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Standard Result type for the host.
pub type HostResult<T> = Result<T, HostError>;

// ============================================================================
// Error Context Helpers
// ============================================================================

/// Helper trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn with_context(self, context: impl FnOnce() -> String) -> HostResult<T>;

    /// Add a simple context message to an error.
    fn with_msg(self, msg: &str) -> HostResult<T>;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
    HostError: From<E>,
{
    fn with_context(self, context: impl FnOnce() -> String) -> HostResult<T> {
        self.map_err(|e| HostError::Internal(format!("{}: {}", context(), e)))
    }

    fn with_msg(self, msg: &str) -> HostResult<T> {
        self.map_err(|e| HostError::Internal(format!("{}: {}", msg, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(HostError::UnknownResource("svelte".into()).code(), codes::UNKNOWN_RESOURCE);
        assert_eq!(
            HostError::PortsExhausted { base: 3420, tried: 30 }.code(),
            codes::PORTS_EXHAUSTED
        );
    }

    #[test]
    fn network_and_transport_errors_are_retryable() {
        assert!(HostError::NetworkError("timeout".into()).is_retryable());
        assert!(HostError::Transport("closed".into()).is_retryable());
        assert!(!HostError::UnknownResource("svelte".into()).is_retryable());
    }

    #[test]
    fn error_response_carries_code_and_message() {
        let err = HostError::EmptyRepositorySet;
        let response: ErrorResponse = (&err).into();
        assert_eq!(response.code, codes::EMPTY_REPOSITORY_SET);
        assert!(!response.is_retryable);
        assert!(response.message.contains("must not be empty"));
    }
}
