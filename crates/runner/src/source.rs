//! Where a run's tests come from: a cached clone of an external repository
//! or the bundled tests directory.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use playdeck_common::FolderTable;
use tokio::process::Command as TokioCommand;
use tracing::{debug, info, warn};

use crate::error::{RunnerError, RunnerResult};

/// Subdirectories checked, in order, for a repository's Playwright tests.
pub const TEST_DIR_CANDIDATES: &[&str] = &[
    "tests/e2e",
    "tests",
    "test/e2e",
    "test",
    "e2e",
    "playwright/tests",
];

/// The suite fields that decide the test source.
#[derive(Debug, Clone, Default)]
pub struct SuiteSource {
    /// `owner/name` repository reference.
    pub external: Option<String>,
    pub suite_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOrigin {
    Bundled,
    Repository(String),
}

/// A directory to discover tests in, optionally narrowed to one folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub root: PathBuf,
    pub folder: Option<String>,
    pub origin: SourceOrigin,
}

impl ResolvedSource {
    /// Directory discovery walks: the root, or the folder inside it.
    pub fn search_dir(&self) -> PathBuf {
        match &self.folder {
            Some(folder) => self.root.join(folder),
            None => self.root.clone(),
        }
    }
}

/// Makes a local checkout of a repository available.
#[async_trait]
pub trait RepoFetcher: Send + Sync {
    /// Return the checkout's root directory.
    async fn fetch(&self, repo: &str) -> RunnerResult<PathBuf>;
}

/// Split and validate an `owner/name` reference.
pub fn parse_repo(repo: &str) -> RunnerResult<(&str, &str)> {
    let trimmed = repo.trim().trim_end_matches(".git");
    let (owner, name) = trimmed
        .split_once('/')
        .ok_or_else(|| RunnerError::InvalidRepo(repo.to_string()))?;
    let valid = |part: &str| {
        !part.is_empty()
            && part != "."
            && part != ".."
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    if !valid(owner) || !valid(name) {
        return Err(RunnerError::InvalidRepo(repo.to_string()));
    }
    Ok((owner, name))
}

/// Shallow git clones of GitHub repositories kept under a cache directory.
#[derive(Debug, Clone)]
pub struct GitRepoFetcher {
    cache_dir: PathBuf,
    branch: String,
    git: PathBuf,
    remote_base: String,
    timeout: Duration,
}

impl GitRepoFetcher {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            branch: "main".to_string(),
            git: PathBuf::from("git"),
            remote_base: "https://github.com".to_string(),
            timeout: Duration::from_secs(300),
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    /// Clone from somewhere other than GitHub, e.g. a local mirror.
    pub fn with_remote_base(mut self, base: impl Into<String>) -> Self {
        self.remote_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn cache_path(&self, owner: &str, name: &str) -> PathBuf {
        self.cache_dir.join(owner).join(name)
    }

    fn remote_url(&self, owner: &str, name: &str) -> String {
        format!("{}/{}/{}.git", self.remote_base, owner, name)
    }

    async fn git(&self, cwd: Option<&Path>, args: &[&str]) -> RunnerResult<()> {
        let mut cmd = TokioCommand::new(&self.git);
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }

        let command = args.first().copied().unwrap_or_default().to_string();
        debug!("git {}", args.join(" "));
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| RunnerError::Git {
                command: command.clone(),
                stderr: format!("timed out after {}s", self.timeout.as_secs()),
            })??;

        if output.status.success() {
            Ok(())
        } else {
            Err(RunnerError::Git {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn refresh(&self, checkout: &Path) -> RunnerResult<()> {
        let branch = self.branch.as_str();
        self.git(Some(checkout), &["fetch", "--depth", "1", "origin", branch])
            .await?;
        self.git(Some(checkout), &["checkout", branch]).await?;
        self.git(Some(checkout), &["pull", "--ff-only", "origin", branch])
            .await
    }

    async fn clone_into(&self, owner: &str, name: &str, checkout: &Path) -> RunnerResult<()> {
        if let Some(parent) = checkout.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let url = self.remote_url(owner, name);
        let target = checkout.to_string_lossy();
        self.git(
            None,
            &[
                "clone",
                "--depth",
                "1",
                "--branch",
                self.branch.as_str(),
                url.as_str(),
                &*target,
            ],
        )
        .await
    }
}

#[async_trait]
impl RepoFetcher for GitRepoFetcher {
    async fn fetch(&self, repo: &str) -> RunnerResult<PathBuf> {
        let (owner, name) = parse_repo(repo)?;
        let checkout = self.cache_path(owner, name);

        if checkout.join(".git").is_dir() {
            match self.refresh(&checkout).await {
                Ok(()) => info!("Refreshed cached checkout of {}", repo),
                Err(e) => warn!("Refresh of {} failed, using cached checkout: {}", repo, e),
            }
            return Ok(checkout);
        }

        if checkout.exists() {
            warn!("Removing unusable cache at {}", checkout.display());
            tokio::fs::remove_dir_all(&checkout).await?;
        }

        info!("Cloning {} ({})", repo, self.branch);
        self.clone_into(owner, name, &checkout)
            .await
            .map_err(|e| RunnerError::RepoFetch {
                repo: repo.to_string(),
                reason: e.to_string(),
            })?;
        Ok(checkout)
    }
}

/// The first conventional test directory inside a checkout, else the
/// checkout itself.
pub fn find_test_directory(checkout: &Path) -> PathBuf {
    TEST_DIR_CANDIDATES
        .iter()
        .map(|candidate| checkout.join(candidate))
        .find(|dir| dir.is_dir())
        .unwrap_or_else(|| checkout.to_path_buf())
}

pub struct SourceResolver {
    bundled_root: PathBuf,
    folders: FolderTable,
    fetcher: Arc<dyn RepoFetcher>,
}

impl SourceResolver {
    pub fn new(bundled_root: impl Into<PathBuf>, folders: FolderTable, fetcher: Arc<dyn RepoFetcher>) -> Self {
        Self {
            bundled_root: bundled_root.into(),
            folders,
            fetcher,
        }
    }

    /// Resolve a suite to a discovery root.
    ///
    /// A configured repository that cannot be fetched is an error. The
    /// bundled directory is never used in its place.
    pub async fn resolve(&self, source: &SuiteSource) -> RunnerResult<ResolvedSource> {
        let external = source
            .external
            .as_deref()
            .map(str::trim)
            .filter(|repo| !repo.is_empty());

        if let Some(repo) = external {
            let checkout = self.fetcher.fetch(repo).await?;
            let root = find_test_directory(&checkout);
            info!("Using tests from {} at {}", repo, root.display());
            return Ok(ResolvedSource {
                root,
                folder: None,
                origin: SourceOrigin::Repository(repo.to_string()),
            });
        }

        let folder = source
            .suite_name
            .as_deref()
            .and_then(|name| self.folders.lookup(name))
            .map(str::to_string);
        match &folder {
            Some(folder) => info!("Using bundled tests, folder '{}'", folder),
            None => info!("Using all bundled tests"),
        }
        Ok(ResolvedSource {
            root: self.bundled_root.clone(),
            folder,
            origin: SourceOrigin::Bundled,
        })
    }
}
