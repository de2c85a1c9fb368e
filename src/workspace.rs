//! Workspace Engine: materialises / tears down a composite directory of git
//! worktrees for a given repository set — the sole writer of
//! `<workspacesDir>`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::future::try_join_all;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{ErrorContext, HostError, HostResult};
use crate::query;
use crate::repo_cache::{EnsureFreshOptions, RepoCache};
use crate::resource::{Resource, ResourceRegistry};

/// One resolved repository within a workspace.
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceMember {
    pub name: String,
    #[serde(rename = "relativePath")]
    pub relative_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A composite directory holding one worktree per repository in a named set.
#[derive(Debug, Clone, Serialize)]
pub struct Workspace {
    pub key: String,
    pub path: PathBuf,
    pub members: Vec<WorkspaceMember>,
}

/// Materialises and tears down workspaces under `workspaces_dir`. The only
/// component allowed to write there.
#[derive(Clone)]
pub struct WorkspaceEngine {
    workspaces_dir: PathBuf,
    registry: Arc<ResourceRegistry>,
    repo_cache: RepoCache,
    locks: Arc<AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl WorkspaceEngine {
    pub fn new(
        workspaces_dir: impl Into<PathBuf>,
        registry: Arc<ResourceRegistry>,
        repo_cache: RepoCache,
    ) -> Self {
        WorkspaceEngine {
            workspaces_dir: workspaces_dir.into(),
            registry,
            repo_cache,
            locks: Arc::new(AsyncMutex::new(HashMap::new())),
        }
    }

    async fn lock_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut guard = self.locks.lock().await;
        guard
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    pub fn workspace_path(&self, key: &str) -> PathBuf {
        self.workspaces_dir.join(key)
    }

    /// Materialises (or reuses, if already complete) a workspace for `names`.
    /// All-or-nothing: a failure mid-creation rolls back everything created
    /// in this attempt.
    pub async fn ensure_workspace<I, S>(&self, names: I) -> HostResult<Workspace>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = query::merge(vec![names
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect::<Vec<_>>()]);
        let key = query::workspace_key(&names)?;

        let lock = self.lock_for(&key).await;
        let _guard = lock.lock().await;

        let resources: Vec<Resource> = names
            .iter()
            .map(|name| self.registry.get(name))
            .collect::<HostResult<Vec<_>>>()?;

        try_join_all(resources.iter().map(|resource| {
            let repo_cache = self.repo_cache.clone();
            async move {
                repo_cache
                    .ensure_fresh(resource, EnsureFreshOptions::default())
                    .await
            }
        }))
        .await?;

        let path = self.workspace_path(&key);

        if path.exists() {
            if self.is_complete(&path, &resources) {
                return Ok(self.describe(&key, &path, &resources));
            }
            // Partial workspace on disk is corrupt per this spec's tightened
            // contract (the source's laxer "exists -> reuse" is rejected).
            self.remove_workspace_dir(&key, &path, &resources);
        }

        if let Err(err) = self.create_all_members(&path, &resources) {
            self.remove_workspace_dir(&key, &path, &resources);
            return Err(err);
        }

        Ok(self.describe(&key, &path, &resources))
    }

    fn is_complete(&self, path: &Path, resources: &[Resource]) -> bool {
        resources.iter().all(|resource| {
            let member_path = path.join(&resource.name);
            member_path.join(".git").exists()
        })
    }

    fn create_all_members(&self, path: &Path, resources: &[Resource]) -> HostResult<()> {
        fs::create_dir_all(path).with_msg("failed to create workspace directory")?;
        let mut created: Vec<&Resource> = Vec::new();
        for resource in resources {
            let member_path = path.join(&resource.name);
            if let Err(err) = add_detached_worktree(
                &self.repo_cache.entry_path(&resource.name),
                &member_path,
                &resource.branch,
            ) {
                for done in &created {
                    let done_path = path.join(&done.name);
                    let _ = remove_worktree(&self.repo_cache.entry_path(&done.name), &done_path);
                }
                return Err(err);
            }
            created.push(resource);
        }
        Ok(())
    }

    fn remove_workspace_dir(&self, _key: &str, path: &Path, resources: &[Resource]) {
        for resource in resources {
            let member_path = path.join(&resource.name);
            let _ = remove_worktree(&self.repo_cache.entry_path(&resource.name), &member_path);
        }
        let _ = fs::remove_dir_all(path);
    }

    fn describe(&self, key: &str, path: &Path, resources: &[Resource]) -> Workspace {
        let members = resources
            .iter()
            .map(|resource| WorkspaceMember {
                name: resource.name.clone(),
                relative_path: match &resource.subpath {
                    Some(subpath) => format!("{}/{}", resource.name, subpath),
                    None => resource.name.clone(),
                },
                notes: resource.notes.clone(),
            })
            .collect();
        Workspace {
            key: key.to_string(),
            path: path.to_path_buf(),
            members,
        }
    }

    /// Direct subdirectories of `workspaces_dir`, sorted.
    pub fn list_workspaces(&self) -> HostResult<Vec<String>> {
        if !self.workspaces_dir.exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.workspaces_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    keys.push(name.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Tears down the workspace at `key`. `NotFound` if it does not exist.
    pub async fn clear(&self, key: &str) -> HostResult<()> {
        let path = self.workspace_path(key);
        if !path.exists() {
            return Err(HostError::WorkspaceMissing(key.to_string()));
        }

        let lock = self.lock_for(key).await;
        let _guard = lock.lock().await;

        for name in query::split_workspace_key(key) {
            let member_path = path.join(&name);
            let _ = remove_worktree(&self.repo_cache.entry_path(&name), &member_path);
        }
        fs::remove_dir_all(&path)?;
        Ok(())
    }

    /// Tears down every workspace under `workspaces_dir`.
    pub async fn clear_all(&self) -> HostResult<()> {
        for key in self.list_workspaces()? {
            self.clear(&key).await?;
        }
        Ok(())
    }
}

/// Creates a worktree at `worktree_path` checked out detached at
/// `origin/<branch>`, generalized from the teacher's `git::add_worktree`
/// ("new local branch per agent") to a read-only detached checkout, since
/// this spec has no editing or pushing use case that would need a mutable
/// local branch.
fn add_detached_worktree(repo_root: &Path, worktree_path: &Path, branch: &str) -> HostResult<()> {
    let repo = git2::Repository::open(repo_root)?;
    let target_ref = format!("refs/remotes/origin/{branch}");
    let start_obj = repo.revparse_single(&target_ref)?;
    let start_commit = start_obj.peel_to_commit()?;

    // git2's worktree API requires a branch to attach; create a scratch
    // branch, then detach and delete it once the worktree is checked out.
    let scratch_branch_name = format!(
        "workspace-scratch/{}",
        worktree_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(branch)
    );
    let scratch_branch = repo.branch(&scratch_branch_name, &start_commit, true)?;

    if let Some(parent) = worktree_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let worktree_name = worktree_path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(branch);

    let mut opts = git2::WorktreeAddOptions::new();
    let reference = scratch_branch.into_reference();
    opts.reference(Some(&reference));
    repo.worktree(worktree_name, worktree_path, Some(&opts))?;
    drop(reference);

    detach_and_drop_scratch_branch(repo_root, worktree_path, &start_commit.id(), &scratch_branch_name)
}

fn detach_and_drop_scratch_branch(
    repo_root: &Path,
    worktree_path: &Path,
    commit_id: &git2::Oid,
    scratch_branch_name: &str,
) -> HostResult<()> {
    let worktree_repo = git2::Repository::open(worktree_path)?;
    worktree_repo.set_head_detached(*commit_id)?;
    worktree_repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))?;

    let repo = git2::Repository::open(repo_root)?;
    if let Ok(mut branch) = repo.find_branch(scratch_branch_name, git2::BranchType::Local) {
        let _ = branch.delete();
    }
    Ok(())
}

/// Removes the worktree at `worktree_path` registered against `repo_root`,
/// tolerating the not-found case (already removed, or never created).
fn remove_worktree(repo_root: &Path, worktree_path: &Path) -> HostResult<()> {
    let repo = match git2::Repository::open(repo_root) {
        Ok(repo) => repo,
        Err(_) => return Ok(()),
    };

    let target = fs::canonicalize(worktree_path).unwrap_or_else(|_| worktree_path.to_path_buf());
    let names = repo.worktrees()?;
    for name in names.iter().flatten() {
        let worktree = match repo.find_worktree(name) {
            Ok(worktree) => worktree,
            Err(_) => continue,
        };
        let candidate = fs::canonicalize(worktree.path()).unwrap_or_else(|_| worktree.path().to_path_buf());
        if candidate == target {
            let mut opts = git2::WorktreePruneOptions::new();
            opts.valid(true).working_tree(true).locked(true);
            let _ = worktree.prune(Some(&mut opts));
            break;
        }
    }

    if worktree_path.exists() {
        let _ = fs::remove_dir_all(worktree_path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::tempdir;

    fn init_bare_origin(dir: &Path) {
        assert!(Command::new("git")
            .args(["init", "--bare", "-b", "main"])
            .arg(dir)
            .status()
            .unwrap()
            .success());
    }

    fn seed(origin_path: &Path) {
        let scratch = tempdir().unwrap();
        let run = |args: &[&str]| {
            assert!(Command::new("git")
                .args(args)
                .current_dir(scratch.path())
                .status()
                .unwrap()
                .success());
        };
        assert!(Command::new("git")
            .args(["clone", &origin_path.to_string_lossy(), &scratch.path().to_string_lossy()])
            .status()
            .unwrap()
            .success());
        fs::write(scratch.path().join("README.md"), "hi").unwrap();
        run(&["add", "."]);
        run(&["-c", "user.email=t@t.com", "-c", "user.name=t", "commit", "-m", "init"]);
        run(&["push", "origin", "HEAD:main"]);
    }

    async fn build_engine(root: &Path, names: &[&str]) -> (WorkspaceEngine, Vec<Resource>) {
        let repos_dir = root.join("repos");
        let workspaces_dir = root.join("workspaces");
        let registry = Arc::new(ResourceRegistry::load(root.join("registry.json")).unwrap());
        let mut resources = Vec::new();
        for name in names {
            let origin = root.join(format!("{name}.git"));
            init_bare_origin(&origin);
            seed(&origin);
            let resource = Resource {
                name: name.to_string(),
                url: origin.to_string_lossy().to_string(),
                branch: "main".to_string(),
                notes: None,
                subpath: None,
            };
            registry.add(resource.clone()).unwrap();
            resources.push(resource);
        }
        let repo_cache = RepoCache::new(repos_dir);
        (WorkspaceEngine::new(workspaces_dir, registry, repo_cache), resources)
    }

    #[tokio::test]
    async fn ensure_workspace_creates_one_worktree_per_member() {
        let root = tempdir().unwrap();
        let (engine, _) = build_engine(root.path(), &["svelte", "daytona"]).await;

        let workspace = engine.ensure_workspace(["svelte", "daytona"]).await.unwrap();
        assert_eq!(workspace.key, "daytona+svelte");
        assert!(workspace.path.join("svelte").join(".git").exists());
        assert!(workspace.path.join("daytona").join(".git").exists());
    }

    #[tokio::test]
    async fn ensure_workspace_twice_reuses_and_does_not_recreate() {
        let root = tempdir().unwrap();
        let (engine, _) = build_engine(root.path(), &["svelte", "daytona"]).await;

        let first = engine.ensure_workspace(["svelte", "daytona"]).await.unwrap();
        let second = engine.ensure_workspace(["daytona", "svelte"]).await.unwrap();
        assert_eq!(first.path, second.path);
        assert_eq!(first.key, second.key);
    }

    #[tokio::test]
    async fn ensure_workspace_rejects_unknown_resource() {
        let root = tempdir().unwrap();
        let (engine, _) = build_engine(root.path(), &["svelte"]).await;

        let err = engine.ensure_workspace(["svelte", "missing"]).await.unwrap_err();
        assert!(matches!(err, HostError::UnknownResource(name) if name == "missing"));
    }

    #[tokio::test]
    async fn clear_removes_workspace_directory_and_worktree_registrations() {
        let root = tempdir().unwrap();
        let (engine, _) = build_engine(root.path(), &["svelte"]).await;

        let workspace = engine.ensure_workspace(["svelte"]).await.unwrap();
        engine.clear(&workspace.key).await.unwrap();
        assert!(!workspace.path.exists());

        let err = engine.clear(&workspace.key).await.unwrap_err();
        assert!(matches!(err, HostError::WorkspaceMissing(_)));
    }

    #[tokio::test]
    async fn list_workspaces_is_sorted() {
        let root = tempdir().unwrap();
        let (engine, _) = build_engine(root.path(), &["svelte", "daytona", "other"]).await;

        engine.ensure_workspace(["svelte"]).await.unwrap();
        engine.ensure_workspace(["daytona"]).await.unwrap();
        engine.ensure_workspace(["other"]).await.unwrap();

        let keys = engine.list_workspaces().unwrap();
        assert_eq!(keys, vec!["daytona", "other", "svelte"]);
    }

    #[tokio::test]
    async fn partial_workspace_on_disk_is_rebuilt_not_reused() {
        let root = tempdir().unwrap();
        let (engine, _) = build_engine(root.path(), &["svelte", "daytona"]).await;

        let workspace = engine.ensure_workspace(["svelte", "daytona"]).await.unwrap();
        // simulate corruption: delete one member's worktree without going
        // through clear().
        fs::remove_dir_all(workspace.path.join("svelte")).unwrap();

        let rebuilt = engine.ensure_workspace(["svelte", "daytona"]).await.unwrap();
        assert!(rebuilt.path.join("svelte").join(".git").exists());
        assert!(rebuilt.path.join("daytona").join(".git").exists());
    }
}
