//! Session Orchestrator: starts an agent backend against a workspace,
//! validates its advertised capabilities, and exposes a per-session filtered
//! event stream with guaranteed server cleanup on every exit path.

use tokio::sync::{broadcast, mpsc};

use crate::config::HostConfig;
use crate::error::{HostError, HostResult};
use crate::session::backend::{self, BackendConfig, ServerHandle};
use crate::session::port;
use crate::session::transport::AgentClient;
use crate::session::types::{Event, PromptPart, ProviderListing};
use crate::workspace::WorkspaceEngine;

/// Started, validated agent backend ready to create sessions against.
struct Connection {
    client: AgentClient,
    server: ServerHandle,
}

/// Runs agent backends against workspaces and streams their events.
#[derive(Clone)]
pub struct SessionOrchestrator {
    config: HostConfig,
    workspace: WorkspaceEngine,
}

impl SessionOrchestrator {
    pub fn new(config: HostConfig, workspace: WorkspaceEngine) -> Self {
        SessionOrchestrator { config, workspace }
    }

    async fn start_connection<I, S>(&self, repos: I) -> HostResult<(Connection, String)>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let workspace = self.workspace.ensure_workspace(repos).await?;

        let backend_config = BackendConfig {
            command: self.config.agent_command.clone(),
            args: self.config.agent_args.clone(),
            cwd: workspace.path.clone(),
            provider: self.config.provider.clone(),
            model: self.config.model.clone(),
        };

        let server = port::probe(self.config.base_port, self.config.port_window, |candidate| {
            let backend_config = backend_config.clone();
            async move { backend::try_bind(&backend_config, candidate).await }
        })
        .await?;

        let client = match AgentClient::connect(server.port()).await {
            Ok(client) => client,
            Err(err) => {
                server.close().await;
                return Err(err);
            }
        };

        if let Err(err) = self.validate_provider_model(&client).await {
            server.close().await;
            return Err(err);
        }

        Ok((Connection { client, server }, workspace.key))
    }

    /// Validates `(provider, model)` against the agent's advertised
    /// capabilities. Fails open if the listing call itself is unreachable;
    /// fails closed (and fatally) if it succeeds with a conflicting answer.
    async fn validate_provider_model(&self, client: &AgentClient) -> HostResult<()> {
        let listing: ProviderListing = match client.provider_list().await {
            Ok(listing) => listing,
            Err(_) => return Ok(()),
        };

        let provider_descriptor = listing
            .all
            .iter()
            .find(|descriptor| descriptor.id == self.config.provider);

        let Some(provider_descriptor) = provider_descriptor else {
            return Err(HostError::InvalidProvider {
                provider_id: self.config.provider.clone(),
                available: listing.all.iter().map(|p| p.id.clone()).collect(),
            });
        };

        if !listing.connected.contains(&self.config.provider) {
            return Err(HostError::ProviderNotConnected {
                provider_id: self.config.provider.clone(),
                connected: listing.connected.clone(),
            });
        }

        if !provider_descriptor.models.contains_key(&self.config.model) {
            return Err(HostError::InvalidModel {
                provider_id: self.config.provider.clone(),
                model_id: self.config.model.clone(),
                available: provider_descriptor.models.keys().cloned().collect(),
            });
        }

        Ok(())
    }

    async fn create_agent_session(&self, connection: &Connection) -> HostResult<String> {
        connection
            .client
            .session_create()
            .await
            .map_err(|err| HostError::SessionStartFailed(err.to_string()))
    }

    /// Single-shot ask: start -> prompt -> close server when the stream
    /// terminates, however it terminates.
    pub async fn ask<I, S>(&self, repos: I, prompt: &str) -> HostResult<EventStream>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let (connection, _workspace_key) = self.start_connection(repos).await?;

        let session_id = match self.create_agent_session(&connection).await {
            Ok(id) => id,
            Err(err) => {
                connection.server.close().await;
                return Err(err);
            }
        };

        let server = connection.server.clone();
        let cleanup = move || {
            let server = server.clone();
            Box::pin(async move { server.close().await }) as CleanupFuture
        };

        Ok(self.issue_prompt(connection.client, session_id, prompt, Some(Box::new(cleanup))))
    }

    /// Starts a chat thread: a session reused across multiple prompts,
    /// closed only by explicit `SessionHandle::end_session`.
    pub async fn create_session<I, S>(&self, repos: I) -> HostResult<SessionHandle>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let (connection, workspace_key) = self.start_connection(repos).await?;

        let session_id = match self.create_agent_session(&connection).await {
            Ok(id) => id,
            Err(err) => {
                connection.server.close().await;
                return Err(err);
            }
        };

        Ok(SessionHandle {
            session_id,
            workspace_key,
            client: connection.client,
            server: connection.server,
            provider: self.config.provider.clone(),
            model: self.config.model.clone(),
        })
    }

    fn issue_prompt(
        &self,
        client: AgentClient,
        session_id: String,
        prompt: &str,
        cleanup: Option<Box<dyn Fn() -> CleanupFuture + Send + Sync>>,
    ) -> EventStream {
        issue_prompt(client, session_id, self.config.provider.clone(), self.config.model.clone(), prompt, cleanup)
    }
}

type CleanupFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

/// A live agent backend reused across multiple prompts by the same caller.
pub struct SessionHandle {
    session_id: String,
    workspace_key: String,
    client: AgentClient,
    server: ServerHandle,
    provider: String,
    model: String,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn workspace_key(&self) -> &str {
        &self.workspace_key
    }

    /// Issues one prompt in this session. Per spec section 5, callers must
    /// serialise their own prompt issuance: the returned stream must
    /// complete (via `session.idle`) before the next prompt is issued.
    pub fn prompt(&self, text: &str) -> EventStream {
        issue_prompt(
            self.client.clone(),
            self.session_id.clone(),
            self.provider.clone(),
            self.model.clone(),
            text,
            None,
        )
    }

    /// Closes the server. Idempotent: a second call is a no-op even if
    /// invoked concurrently with the first.
    pub async fn end_session(&self) {
        self.server.close().await;
    }
}

fn issue_prompt(
    client: AgentClient,
    session_id: String,
    agent: String,
    model: String,
    prompt: &str,
    cleanup: Option<Box<dyn Fn() -> CleanupFuture + Send + Sync>>,
) -> EventStream {
    let (out_tx, out_rx) = mpsc::unbounded_channel::<HostResult<Event>>();
    let mut events_rx = client.subscribe_events();
    let parts = vec![PromptPart {
        kind: "text".to_string(),
        text: prompt.to_string(),
    }];

    tokio::spawn(async move {
        let (prompt_tx, mut prompt_rx) = tokio::sync::oneshot::channel();
        let submit_client = client.clone();
        let submit_session = session_id.clone();
        tokio::spawn(async move {
            let result = submit_client.session_prompt(&submit_session, &agent, &model, parts).await;
            let _ = prompt_tx.send(result);
        });

        // `prompt_pending` stops the submission arm from being polled again
        // once it has resolved once: a completed oneshot::Receiver keeps
        // resolving ready on every subsequent poll, which would otherwise
        // spin the select loop. `out_tx.closed()` detects the consumer
        // dropping its `EventStream` (cancellation) without waiting for
        // another agent event to notice the send failure.
        let mut prompt_pending = true;

        'forward: loop {
            tokio::select! {
                _ = out_tx.closed() => {
                    break 'forward;
                }
                event = events_rx.recv() => {
                    match event {
                        Ok(event) if event.matches_session(&session_id) => {
                            let is_idle = event.kind == Event::SESSION_IDLE;
                            let is_error = event.kind == Event::SESSION_ERROR;
                            if is_error {
                                let name = event
                                    .payload
                                    .get("name")
                                    .and_then(serde_json::Value::as_str)
                                    .unwrap_or("agent_error")
                                    .to_string();
                                let cause = event
                                    .payload
                                    .get("cause")
                                    .and_then(serde_json::Value::as_str)
                                    .unwrap_or("")
                                    .to_string();
                                let _ = out_tx.send(Err(HostError::AgentError { name, cause }));
                                break 'forward;
                            }
                            if out_tx.send(Ok(event)).is_err() {
                                break 'forward;
                            }
                            if is_idle {
                                break 'forward;
                            }
                        }
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break 'forward,
                    }
                }
                submission = &mut prompt_rx, if prompt_pending => {
                    prompt_pending = false;
                    if let Ok(Err(err)) = submission {
                        let _ = out_tx.send(Err(err));
                        break 'forward;
                    }
                }
            }
        }

        if let Some(cleanup) = cleanup {
            cleanup().await;
        }
    });

    EventStream { rx: out_rx }
}

/// A cancellable stream of events scoped to one session/prompt.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<HostResult<Event>>,
}

impl EventStream {
    /// Awaits the next event, or `None` once the stream has terminated.
    /// Dropping the stream before it terminates is the cancellation path:
    /// the sender task's `out_tx.send` calls start failing and it winds
    /// down on its next select iteration.
    pub async fn next(&mut self) -> Option<HostResult<Event>> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_busy_classification_is_reexported_correctly() {
        assert!(port::looks_like_port_busy("port already in use"));
    }
}
