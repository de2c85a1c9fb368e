//! Resource registry: name -> repository origin mapping.
//!
//! Persists as a single JSON document, mirroring the in-memory map to disk
//! on every mutation under a process-wide mutex, the way the teacher's
//! `SessionManager` persists `TaskSession`s — except the registry is one
//! document for every resource, not one file per entity, per spec section 4.B.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorContext, HostError, HostResult};

/// A named source of context: in this crate, always a git repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub url: String,
    pub branch: String,
    #[serde(rename = "specialNotes", default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(rename = "searchPath", default, skip_serializing_if = "Option::is_none")]
    pub subpath: Option<String>,
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// In-memory registry backed by a JSON file at `path`, loaded once at
/// construction and rewritten in full on every mutation.
pub struct ResourceRegistry {
    path: PathBuf,
    entries: Mutex<Vec<Resource>>,
}

impl ResourceRegistry {
    /// Loads the registry from `path`. A missing file is treated as an empty
    /// registry (first run).
    pub fn load(path: impl Into<PathBuf>) -> HostResult<Self> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str(&data)
                .map_err(|e| HostError::Internal(format!("corrupt registry at {}: {e}", path.display())))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(HostError::Io(err)),
        };
        Ok(ResourceRegistry {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// All resources, in insertion order.
    pub fn list(&self) -> Vec<Resource> {
        self.entries.lock().expect("registry poisoned").clone()
    }

    /// Looks up a resource by name (case-sensitive; names are normalized to
    /// lowercase on add).
    pub fn get(&self, name: &str) -> HostResult<Resource> {
        self.entries
            .lock()
            .expect("registry poisoned")
            .iter()
            .find(|r| r.name == name)
            .cloned()
            .ok_or_else(|| HostError::UnknownResource(name.to_string()))
    }

    /// Adds a new resource. Rejects invalid names and names already present
    /// (case-insensitive).
    pub fn add(&self, resource: Resource) -> HostResult<Resource> {
        if !is_valid_name(&resource.name) {
            return Err(HostError::InvalidResourceName(resource.name));
        }

        let mut guard = self.entries.lock().expect("registry poisoned");
        if guard.iter().any(|r| r.name.eq_ignore_ascii_case(&resource.name)) {
            return Err(HostError::DuplicateResource(resource.name));
        }

        guard.push(resource.clone());
        self.persist(&guard)?;
        Ok(resource)
    }

    /// Removes a resource by name. Never touches the repo cache.
    pub fn remove(&self, name: &str) -> HostResult<()> {
        let mut guard = self.entries.lock().expect("registry poisoned");
        let before = guard.len();
        guard.retain(|r| r.name != name);
        if guard.len() == before {
            return Err(HostError::UnknownResource(name.to_string()));
        }
        self.persist(&guard)
    }

    fn persist(&self, entries: &[Resource]) -> HostResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_msg("failed to create registry directory")?;
        }
        let serialized = serde_json::to_string_pretty(entries)
            .map_err(|e| HostError::Internal(format!("failed to serialize registry: {e}")))?;
        fs::write(&self.path, serialized).with_msg("failed to write registry file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(name: &str) -> Resource {
        Resource {
            name: name.to_string(),
            url: format!("https://example.test/{name}.git"),
            branch: "main".to_string(),
            notes: None,
            subpath: None,
        }
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = tempdir().unwrap();
        let registry = ResourceRegistry::load(dir.path().join("registry.json")).unwrap();
        assert!(registry.list().is_empty());
    }

    #[test]
    fn add_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let registry = ResourceRegistry::load(dir.path().join("registry.json")).unwrap();
        registry.add(sample("svelte")).unwrap();
        let found = registry.get("svelte").unwrap();
        assert_eq!(found.url, "https://example.test/svelte.git");
    }

    #[test]
    fn add_rejects_invalid_names() {
        let dir = tempdir().unwrap();
        let registry = ResourceRegistry::load(dir.path().join("registry.json")).unwrap();
        let err = registry.add(sample("Svelte UI")).unwrap_err();
        assert!(matches!(err, HostError::InvalidResourceName(_)));
    }

    #[test]
    fn add_rejects_case_insensitive_duplicates() {
        let dir = tempdir().unwrap();
        let registry = ResourceRegistry::load(dir.path().join("registry.json")).unwrap();
        registry.add(sample("svelte")).unwrap();
        let err = registry.add(sample("SVELTE")).unwrap_err();
        assert!(matches!(err, HostError::DuplicateResource(_)));
    }

    #[test]
    fn get_unknown_is_an_error() {
        let dir = tempdir().unwrap();
        let registry = ResourceRegistry::load(dir.path().join("registry.json")).unwrap();
        let err = registry.get("missing").unwrap_err();
        assert!(matches!(err, HostError::UnknownResource(_)));
    }

    #[test]
    fn remove_unknown_is_an_error_and_never_touches_cache_dir() {
        let dir = tempdir().unwrap();
        let registry = ResourceRegistry::load(dir.path().join("registry.json")).unwrap();
        let err = registry.remove("missing").unwrap_err();
        assert!(matches!(err, HostError::UnknownResource(_)));
    }

    #[test]
    fn mutations_persist_across_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        {
            let registry = ResourceRegistry::load(&path).unwrap();
            registry.add(sample("svelte")).unwrap();
            registry.add(sample("daytona")).unwrap();
        }
        let reloaded = ResourceRegistry::load(&path).unwrap();
        let names: Vec<String> = reloaded.list().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["svelte", "daytona"]);

        reloaded.remove("svelte").unwrap();
        let reloaded_again = ResourceRegistry::load(&path).unwrap();
        let names: Vec<String> = reloaded_again.list().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["daytona"]);
    }
}
