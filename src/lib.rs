//! `repo_agent_host`: the multi-repository workspace engine and agent
//! session orchestrator that backs a natural-language, cross-repository
//! question-answering host.
//!
//! This crate is a library. An external CLI, TUI, or HTTP wrapper (none of
//! which live here) supplies a [`HostConfig`] and drives the five
//! components below through the [`RepoAgentHost`] façade:
//!
//! - [`query`] — extracts `@repo` mentions from a question and canonicalises
//!   repository sets into stable workspace keys.
//! - [`resource`] — the resource registry (name -> origin + branch).
//! - [`repo_cache`] — keeps one central clone per resource fresh.
//! - [`workspace`] — materialises composite worktree directories per
//!   repository set.
//! - [`session`] — starts agent backends against workspaces and streams
//!   their events.

pub mod config;
pub mod error;
pub mod git;
pub mod logging;
pub mod query;
pub mod repo_cache;
pub mod resource;
pub mod session;
pub mod workspace;

use std::sync::Arc;

pub use config::HostConfig;
pub use error::{ErrorContext, ErrorResponse, HostError, HostResult};
pub use query::ParsedQuery;
pub use repo_cache::RepoCache;
pub use resource::{Resource, ResourceRegistry};
pub use session::{Event, EventStream, SessionHandle, SessionOrchestrator};
pub use workspace::{Workspace, WorkspaceEngine};

/// Ties the five components together the way an external caller does: load
/// the registry, wire up the repo cache and workspace engine against it, and
/// hand both to a session orchestrator.
///
/// This is the one piece of wiring the "external config loader" in spec
/// section 4.B is assumed to perform; everything it calls is itself a public
/// component a caller could assemble by hand instead.
#[derive(Clone)]
pub struct RepoAgentHost {
    registry: Arc<ResourceRegistry>,
    repo_cache: RepoCache,
    workspace: WorkspaceEngine,
    orchestrator: SessionOrchestrator,
}

impl RepoAgentHost {
    /// Loads the resource registry from `config.registry_path` and wires the
    /// repo cache, workspace engine, and session orchestrator against it.
    pub fn new(config: HostConfig) -> HostResult<Self> {
        let registry = Arc::new(ResourceRegistry::load(&config.registry_path)?);
        let repo_cache = RepoCache::new(&config.repos_dir);
        let workspace = WorkspaceEngine::new(&config.workspaces_dir, registry.clone(), repo_cache.clone());
        let orchestrator = SessionOrchestrator::new(config, workspace.clone());

        Ok(RepoAgentHost {
            registry,
            repo_cache,
            workspace,
            orchestrator,
        })
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn repo_cache(&self) -> &RepoCache {
        &self.repo_cache
    }

    pub fn workspace(&self) -> &WorkspaceEngine {
        &self.workspace
    }

    pub fn orchestrator(&self) -> &SessionOrchestrator {
        &self.orchestrator
    }

    /// Single-shot ask: parses `@mentions` out of `question`, merges them
    /// with any repositories the caller already knew about, and runs the
    /// session orchestrator's `ask` lifecycle against the resulting set.
    ///
    /// Mirrors spec section 2's control flow: query parser augments and
    /// canonicalises the repository set before the workspace engine or
    /// session orchestrator ever sees it.
    pub async fn ask(&self, explicit_repos: &[String], question: &str) -> HostResult<EventStream> {
        let parsed = query::parse(question);
        let repos = query::merge(vec![explicit_repos.to_vec(), parsed.repos]);
        self.orchestrator.ask(repos, &parsed.prompt).await
    }

    /// Starts a chat thread: a session reused across multiple prompts,
    /// closed only by the caller's explicit [`SessionHandle::end_session`].
    /// The repository set is resolved the same way [`Self::ask`] resolves
    /// it, from `@mentions` in `first_question` merged with `explicit_repos`;
    /// the returned stream answers `first_question` in that new session.
    pub async fn start_thread(
        &self,
        explicit_repos: &[String],
        first_question: &str,
    ) -> HostResult<(SessionHandle, EventStream)> {
        let parsed = query::parse(first_question);
        let repos = query::merge(vec![explicit_repos.to_vec(), parsed.repos]);
        let session = self.orchestrator.create_session(repos).await?;
        let stream = session.prompt(&parsed.prompt);
        Ok((session, stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn new_wires_components_against_a_fresh_root() {
        let root = tempdir().unwrap();
        let config = HostConfig::with_root(root.path(), "agent-backend", "anthropic", "sonnet");
        let host = RepoAgentHost::new(config).unwrap();

        assert!(host.registry().list().is_empty());
        assert!(host.workspace().list_workspaces().unwrap().is_empty());

        host.registry()
            .add(Resource {
                name: "svelte".to_string(),
                url: "https://example.test/svelte.git".to_string(),
                branch: "main".to_string(),
                notes: None,
                subpath: None,
            })
            .unwrap();
        assert_eq!(host.registry().list().len(), 1);
    }
}
