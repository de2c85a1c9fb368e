//! Host configuration.
//!
//! The surrounding CLI/TUI/HTTP wrapper owns config-file parsing; this module
//! only defines the concrete shape it is assumed to produce, plus the
//! platform-appropriate defaults used when the wrapper doesn't override them.

use std::path::PathBuf;

/// Default probe window for session port allocation (N in the port
/// allocation scheme).
pub const DEFAULT_PORT_WINDOW: u16 = 30;

/// Directory roots and session defaults the rest of the crate is built
/// against. Constructed by the external config loader; this crate never
/// reads a config file itself.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Root directory for central clones, one subdirectory per resource name.
    pub repos_dir: PathBuf,
    /// Root directory for composite workspace directories, keyed by workspace key.
    pub workspaces_dir: PathBuf,
    /// Path to the resource registry's JSON document.
    pub registry_path: PathBuf,
    /// First port the session orchestrator probes.
    pub base_port: u16,
    /// Number of ports to probe starting at `base_port` before giving up.
    pub port_window: u16,
    /// argv[0] of the agent backend subprocess.
    pub agent_command: String,
    /// Remaining argv entries for the agent backend subprocess.
    pub agent_args: Vec<String>,
    /// Requested provider id, validated against the agent's advertised capabilities.
    pub provider: String,
    /// Requested model id, validated against the agent's advertised capabilities.
    pub model: String,
}

impl HostConfig {
    /// Builds a config rooted at `root`, with the conventional `repos/`,
    /// `workspaces/` and `registry.json` layout from spec section 6.
    pub fn with_root(
        root: impl Into<PathBuf>,
        agent_command: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let root = root.into();
        HostConfig {
            repos_dir: root.join("repos"),
            workspaces_dir: root.join("workspaces"),
            registry_path: root.join("registry.json"),
            base_port: 3420,
            port_window: DEFAULT_PORT_WINDOW,
            agent_command: agent_command.into(),
            agent_args: Vec::new(),
            provider: provider.into(),
            model: model.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_root_lays_out_conventional_subdirectories() {
        let config = HostConfig::with_root("/tmp/host-root", "agent-backend", "anthropic", "sonnet");
        assert_eq!(config.repos_dir, PathBuf::from("/tmp/host-root/repos"));
        assert_eq!(config.workspaces_dir, PathBuf::from("/tmp/host-root/workspaces"));
        assert_eq!(config.registry_path, PathBuf::from("/tmp/host-root/registry.json"));
        assert_eq!(config.port_window, DEFAULT_PORT_WINDOW);
    }
}
