//! Repo Cache: keeps one central clone per known resource fresh under
//! `<reposDir>/<name>`, serialising access per repository name.
//!
//! Network operations go through `git2` directly (the teacher's chosen git
//! backend everywhere else in `git/*.rs`), with the same system-proxy
//! detection (`git/proxy.rs`) applied to every clone/fetch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use crate::error::{HostError, HostResult};
use crate::git::proxy::detect_system_proxy_url;
use crate::resource::Resource;

/// Options accepted by `ensure_fresh`. `quiet` suppresses progress logging;
/// it has no effect on the outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnsureFreshOptions {
    pub quiet: bool,
}

/// Keeps central clones under `repos_dir` fresh, one exclusive lock per
/// repository name — generalized from the teacher's `AcpManager::connections`
/// shape (`Arc<Mutex<HashMap<Uuid, _>>>`) to "one lock per repository name".
#[derive(Clone)]
pub struct RepoCache {
    repos_dir: PathBuf,
    locks: Arc<AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl RepoCache {
    pub fn new(repos_dir: impl Into<PathBuf>) -> Self {
        RepoCache {
            repos_dir: repos_dir.into(),
            locks: Arc::new(AsyncMutex::new(HashMap::new())),
        }
    }

    /// Path of the central clone for `name`, whether or not it exists yet.
    pub fn entry_path(&self, name: &str) -> PathBuf {
        self.repos_dir.join(name)
    }

    async fn lock_for(&self, name: &str) -> Arc<AsyncMutex<()>> {
        let mut guard = self.locks.lock().await;
        guard
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Clones `resource` into the cache if absent, or fetches `origin` if
    /// present. Concurrent calls for the same name serialise; different
    /// names proceed in parallel.
    pub async fn ensure_fresh(
        &self,
        resource: &Resource,
        opts: EnsureFreshOptions,
    ) -> HostResult<()> {
        let lock = self.lock_for(&resource.name).await;
        let _guard = lock.lock().await;

        let path = self.entry_path(&resource.name);
        let resource = resource.clone();
        let quiet = opts.quiet;

        tokio::task::spawn_blocking(move || ensure_fresh_blocking(&path, &resource, quiet))
            .await
            .map_err(|e| HostError::Internal(format!("ensure_fresh task panicked: {e}")))?
    }
}

fn ensure_fresh_blocking(path: &Path, resource: &Resource, quiet: bool) -> HostResult<()> {
    if path.exists() {
        verify_origin_matches(path, resource)?;
        fetch_origin(path, quiet)
    } else {
        clone_resource(path, resource, quiet)
    }
}

fn verify_origin_matches(path: &Path, resource: &Resource) -> HostResult<()> {
    let repo = git2::Repository::open(path).map_err(|_| HostError::RepoCorrupt {
        name: resource.name.clone(),
    })?;
    let remote = repo.find_remote("origin").map_err(|_| HostError::RepoCorrupt {
        name: resource.name.clone(),
    })?;
    let url = remote.url().unwrap_or_default();
    if url != resource.url {
        return Err(HostError::RepoCorrupt {
            name: resource.name.clone(),
        });
    }
    Ok(())
}

fn clone_resource(path: &Path, resource: &Resource, quiet: bool) -> HostResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut fetch_options = git2::FetchOptions::new();
    configure_fetch_options(&mut fetch_options, quiet);

    let mut builder = git2::build::RepoBuilder::new();
    builder.fetch_options(fetch_options);
    builder.branch(&resource.branch);

    builder
        .clone(&resource.url, path)
        .map(|_| ())
        .map_err(|err| classify_network_error(err))
}

fn fetch_origin(path: &Path, quiet: bool) -> HostResult<()> {
    let repo = git2::Repository::open(path)?;
    let mut remote = repo.find_remote("origin")?;

    let mut fetch_options = git2::FetchOptions::new();
    configure_fetch_options(&mut fetch_options, quiet);

    remote
        .fetch::<&str>(&[], Some(&mut fetch_options), None)
        .map_err(classify_network_error)
}

fn configure_fetch_options(fetch_options: &mut git2::FetchOptions<'_>, quiet: bool) {
    let mut callbacks = git2::RemoteCallbacks::new();
    if !quiet {
        callbacks.transfer_progress(|_progress| true);
    }
    fetch_options.remote_callbacks(callbacks);

    if let Some(proxy_url) = detect_system_proxy_url() {
        let mut proxy_options = git2::ProxyOptions::new();
        proxy_options.url(&proxy_url);
        fetch_options.proxy_options(proxy_options);
    }
}

fn classify_network_error(err: git2::Error) -> HostError {
    match err.class() {
        git2::ErrorClass::Net | git2::ErrorClass::Ssl | git2::ErrorClass::Http => {
            HostError::NetworkError(err.message().to_string())
        }
        _ => HostError::Git2(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::tempdir;

    fn init_bare_origin(dir: &Path) {
        let status = Command::new("git")
            .args(["init", "--bare", "-b", "main"])
            .arg(dir)
            .status()
            .expect("git init --bare should run");
        assert!(status.success());
    }

    fn seed_origin_with_commit(origin_path: &Path) {
        let scratch = tempdir().unwrap();
        let status = Command::new("git")
            .args(["clone", &origin_path.to_string_lossy(), &scratch.path().to_string_lossy()])
            .status()
            .unwrap();
        assert!(status.success());
        std::fs::write(scratch.path().join("README.md"), "hello").unwrap();
        Command::new("git").args(["add", "."]).current_dir(scratch.path()).status().unwrap();
        Command::new("git")
            .args(["-c", "user.email=test@test.com", "-c", "user.name=test", "commit", "-m", "init"])
            .current_dir(scratch.path())
            .status()
            .unwrap();
        Command::new("git")
            .args(["push", "origin", "HEAD:main"])
            .current_dir(scratch.path())
            .status()
            .unwrap();
    }

    #[tokio::test]
    async fn ensure_fresh_clones_when_absent_then_fetches_when_present() {
        let root = tempdir().unwrap();
        let origin = root.path().join("origin.git");
        init_bare_origin(&origin);
        seed_origin_with_commit(&origin);

        let repos_dir = root.path().join("repos");
        let cache = RepoCache::new(&repos_dir);
        let resource = Resource {
            name: "sample".to_string(),
            url: origin.to_string_lossy().to_string(),
            branch: "main".to_string(),
            notes: None,
            subpath: None,
        };

        cache
            .ensure_fresh(&resource, EnsureFreshOptions::default())
            .await
            .unwrap();
        assert!(cache.entry_path("sample").join(".git").exists());

        // Second call hits the fetch path, not the clone path.
        cache
            .ensure_fresh(&resource, EnsureFreshOptions::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn ensure_fresh_detects_repo_corrupt_on_origin_mismatch() {
        let root = tempdir().unwrap();
        let origin_a = root.path().join("a.git");
        let origin_b = root.path().join("b.git");
        init_bare_origin(&origin_a);
        init_bare_origin(&origin_b);
        seed_origin_with_commit(&origin_a);

        let repos_dir = root.path().join("repos");
        let cache = RepoCache::new(&repos_dir);
        let resource_a = Resource {
            name: "sample".to_string(),
            url: origin_a.to_string_lossy().to_string(),
            branch: "main".to_string(),
            notes: None,
            subpath: None,
        };
        cache
            .ensure_fresh(&resource_a, EnsureFreshOptions::default())
            .await
            .unwrap();

        let resource_b = Resource {
            url: origin_b.to_string_lossy().to_string(),
            ..resource_a
        };
        let err = cache
            .ensure_fresh(&resource_b, EnsureFreshOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::RepoCorrupt { .. }));
    }
}
