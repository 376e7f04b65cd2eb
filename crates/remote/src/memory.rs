//! In-memory remote
//!
//! Repositories live in a shared registry so tests (and the CLI's offline
//! mode) can seed them, inject failures and inspect what was committed.

use crate::error::RemoteError;
use crate::host::{AdapterFactory, EventSink, RemoteAdapter};
use crate::protocol::{
    event, CloneProgress, CommitOutcome, CommitParams, FileEntry, InitParams, RemoveParams,
    RenameParams,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use vfs_core::ResourceKey;

const DEFAULT_BRANCH: &str = "main";

type Tree = BTreeMap<ResourceKey, Bytes>;

/// A commit recorded by the in-memory remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub revision: String,
    pub branch: String,
    pub message: String,
}

#[derive(Default)]
struct Repo {
    token: Option<String>,
    branches: BTreeMap<String, Tree>,
    commits: Vec<CommitRecord>,
    throttles: VecDeque<Duration>,
    failures: VecDeque<String>,
}

impl Repo {
    /// Pop the next injected fault, if any
    fn take_fault(&mut self) -> Result<(), RemoteError> {
        if let Some(retry_after) = self.throttles.pop_front() {
            return Err(RemoteError::RateLimited { retry_after });
        }
        if let Some(message) = self.failures.pop_front() {
            return Err(RemoteError::Rejected(message));
        }
        Ok(())
    }

    fn record(&mut self, branch: &str, message: &str) -> String {
        let revision = format!("r{}", self.commits.len() + 1);
        self.commits.push(CommitRecord {
            revision: revision.clone(),
            branch: branch.to_string(),
            message: message.to_string(),
        });
        revision
    }
}

/// Shared registry of in-memory repositories
#[derive(Clone, Default)]
pub struct MemoryRepos {
    repos: Arc<Mutex<HashMap<String, Repo>>>,
}

impl MemoryRepos {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty repository with a `main` branch
    ///
    /// With a token, `init` must present exactly that token.
    pub fn create_repo(&self, repo: &str, token: Option<&str>) {
        let mut state = Repo {
            token: token.map(str::to_string),
            ..Default::default()
        };
        state.branches.insert(DEFAULT_BRANCH.to_string(), Tree::new());
        self.repos.lock().insert(repo.to_string(), state);
    }

    /// Write files directly into a branch, creating the branch if needed
    pub fn seed<K, V>(&self, repo: &str, branch: &str, files: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<ResourceKey>,
        V: Into<Bytes>,
    {
        let mut repos = self.repos.lock();
        let state = repos.entry(repo.to_string()).or_default();
        let tree = state.branches.entry(branch.to_string()).or_default();
        for (path, content) in files {
            tree.insert(path.into(), content.into());
        }
    }

    /// Snapshot of a branch
    pub fn files(&self, repo: &str, branch: &str) -> Tree {
        self.repos
            .lock()
            .get(repo)
            .and_then(|state| state.branches.get(branch))
            .cloned()
            .unwrap_or_default()
    }

    pub fn file(&self, repo: &str, branch: &str, path: &str) -> Option<Bytes> {
        self.files(repo, branch).get(&ResourceKey::new(path)).cloned()
    }

    pub fn commits(&self, repo: &str) -> Vec<CommitRecord> {
        self.repos
            .lock()
            .get(repo)
            .map(|state| state.commits.clone())
            .unwrap_or_default()
    }

    /// Make the next request against `repo` fail with a rate limit
    pub fn throttle_next(&self, repo: &str, retry_after: Duration) {
        if let Some(state) = self.repos.lock().get_mut(repo) {
            state.throttles.push_back(retry_after);
        }
    }

    /// Make the next request against `repo` fail with `message`
    pub fn fail_next(&self, repo: &str, message: &str) {
        if let Some(state) = self.repos.lock().get_mut(repo) {
            state.failures.push_back(message.to_string());
        }
    }

    pub fn adapter(&self) -> MemoryRemote {
        MemoryRemote {
            repos: self.clone(),
            session: None,
        }
    }
}

impl AdapterFactory for MemoryRepos {
    fn create(&self) -> Box<dyn RemoteAdapter> {
        Box::new(self.adapter())
    }
}

struct Session {
    repo: String,
    branch: String,
}

/// Adapter over a [`MemoryRepos`] registry
pub struct MemoryRemote {
    repos: MemoryRepos,
    session: Option<Session>,
}

impl MemoryRemote {
    fn clone_branch(&self, params: &InitParams) -> Result<Tree, RemoteError> {
        let mut repos = self.repos.repos.lock();
        let state = repos
            .get_mut(&params.repo)
            .ok_or_else(|| RemoteError::NotFound(format!("repository {}", params.repo)))?;

        if let Some(ref expected) = state.token {
            if params.credentials.token.as_ref() != Some(expected) {
                return Err(RemoteError::Auth("Bad credentials".to_string()));
            }
        }
        state.take_fault()?;

        state
            .branches
            .get(&params.branch)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("branch {}", params.branch)))
    }

    /// Run `mutate` against the session branch and record a commit if it changed
    fn apply<F>(&self, message: &str, mutate: F) -> Result<CommitOutcome, RemoteError>
    where
        F: FnOnce(&mut Tree) -> bool,
    {
        let session = self.session.as_ref().ok_or(RemoteError::NotInitialized)?;
        let mut repos = self.repos.repos.lock();
        let state = repos
            .get_mut(&session.repo)
            .ok_or_else(|| RemoteError::NotFound(format!("repository {}", session.repo)))?;
        state.take_fault()?;

        let tree = state
            .branches
            .get_mut(&session.branch)
            .ok_or_else(|| RemoteError::NotFound(format!("branch {}", session.branch)))?;
        if !mutate(tree) {
            return Ok(CommitOutcome::default());
        }

        let revision = state.record(&session.branch, message);
        debug!("memory remote {} -> {}", session.repo, revision);
        Ok(CommitOutcome {
            changed: true,
            revision: Some(revision),
        })
    }
}

#[async_trait]
impl RemoteAdapter for MemoryRemote {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn init(
        &mut self,
        params: &InitParams,
        events: &EventSink,
    ) -> Result<Vec<FileEntry>, RemoteError> {
        let tree = self.clone_branch(params)?;
        let total = tree.len() as u64;
        events.emit(
            event::CLONE_PROGRESS,
            &CloneProgress {
                phase: "receiving".into(),
                loaded: total,
                total: Some(total),
            },
        );

        self.session = Some(Session {
            repo: params.repo.clone(),
            branch: params.branch.clone(),
        });
        Ok(tree
            .into_iter()
            .map(|(path, content)| FileEntry { path, content })
            .collect())
    }

    async fn list_branches(&mut self) -> Result<Vec<String>, RemoteError> {
        let session = self.session.as_ref().ok_or(RemoteError::NotInitialized)?;
        let repos = self.repos.repos.lock();
        let state = repos
            .get(&session.repo)
            .ok_or_else(|| RemoteError::NotFound(format!("repository {}", session.repo)))?;
        Ok(state.branches.keys().cloned().collect())
    }

    async fn commit(&mut self, params: &CommitParams) -> Result<CommitOutcome, RemoteError> {
        self.apply(&params.message, |tree| {
            if tree.get(&params.path) == Some(&params.content) {
                return false;
            }
            tree.insert(params.path.clone(), params.content.clone());
            true
        })
    }

    async fn remove(&mut self, params: &RemoveParams) -> Result<CommitOutcome, RemoteError> {
        self.apply(&params.message, |tree| {
            let before = tree.len();
            tree.retain(|key, _| !key.starts_with(&params.path));
            tree.len() != before
        })
    }

    async fn rename(&mut self, params: &RenameParams) -> Result<CommitOutcome, RemoteError> {
        self.apply(&params.message, |tree| {
            let moving: Vec<ResourceKey> = tree
                .keys()
                .filter(|key| key.starts_with(&params.from))
                .cloned()
                .collect();
            let mut changed = !moving.is_empty();

            for old in moving {
                if let Some(content) = tree.remove(&old) {
                    if let Some(new) = old.rebase(&params.from, &params.to) {
                        tree.insert(new, content);
                    }
                }
            }
            if let Some(ref content) = params.content {
                if tree.get(&params.to) != Some(content) {
                    tree.insert(params.to.clone(), content.clone());
                    changed = true;
                }
            }
            changed
        })
    }
}
