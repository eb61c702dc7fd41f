//! Dashboard configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use playdeck_common::lifecycle::{EscalationTiming, TerminationOptions, DEFAULT_TOOLING_PATTERNS};
use playdeck_common::{FolderTable, RunnerPayload, SpawnCommand};
use serde::{Deserialize, Serialize};

/// Dashboard configuration, read from a TOML file with env overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// HTTP listen address
    pub listen: String,

    /// Base URL coordinators use to call back into the dashboard
    pub public_url: String,

    /// Database and pid records live here
    pub state_dir: PathBuf,

    /// Served under `/test-artifacts`
    pub public_dir: PathBuf,

    /// Bundled tests directory
    pub tests_dir: PathBuf,

    /// Cache for cloned test repositories
    pub repo_cache_dir: Option<PathBuf>,

    /// Coordinator binary
    pub runner_bin: PathBuf,

    /// Enables the tooling sweep when stopping runs
    pub dev_mode: bool,

    /// Wait between SIGTERM and SIGKILL
    pub grace_ms: u64,

    pub settle_ms: u64,

    /// Command line patterns matched by the tooling sweep
    pub tooling_patterns: Vec<String>,

    /// Suite name to bundled folder table
    pub folders: FolderTable,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3000".to_string(),
            public_url: "http://127.0.0.1:3000".to_string(),
            state_dir: playdeck_common::default_state_dir(),
            public_dir: PathBuf::from("public"),
            tests_dir: PathBuf::from("tests"),
            repo_cache_dir: None,
            runner_bin: PathBuf::from("playdeck-runner"),
            dev_mode: false,
            grace_ms: 1_000,
            settle_ms: 500,
            tooling_patterns: DEFAULT_TOOLING_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            folders: FolderTable::bundled(),
        }
    }
}

impl DashboardConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `PLAYDECK_*` environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = var("PLAYDECK_WEB_ADDR") {
            self.listen = addr;
        }
        if let Some(dir) = var("PLAYDECK_STATE_DIR") {
            self.state_dir = PathBuf::from(dir);
        }
        if let Some(url) = var("PLAYDECK_PUBLIC_URL") {
            self.public_url = url;
        }
        if let Some(bin) = var("PLAYDECK_RUNNER_BIN") {
            self.runner_bin = PathBuf::from(bin);
        }
        if let Some(flag) = var("PLAYDECK_DEV_MODE") {
            self.dev_mode = matches!(flag.trim().to_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.state_dir.join("state.db")
    }

    pub fn pid_dir(&self) -> PathBuf {
        self.state_dir.join("pids")
    }

    pub fn repo_cache_dir(&self) -> PathBuf {
        self.repo_cache_dir
            .clone()
            .unwrap_or_else(|| self.state_dir.join("repos"))
    }

    pub fn termination_options(&self) -> TerminationOptions {
        TerminationOptions {
            timing: EscalationTiming {
                grace: Duration::from_millis(self.grace_ms),
                settle: Duration::from_millis(self.settle_ms),
                ..EscalationTiming::default()
            },
            dev_mode: self.dev_mode,
            tooling_patterns: self.tooling_patterns.clone(),
        }
    }

    /// Command line launching the coordinator for a run.
    ///
    /// The config file, when there is one, is handed over for its folder
    /// table; the directories are passed explicitly.
    pub fn runner_command(
        &self,
        run_id: &str,
        payload: &RunnerPayload,
        config_path: Option<&Path>,
    ) -> serde_json::Result<SpawnCommand> {
        let mut command = SpawnCommand::new(&self.runner_bin)
            .arg(run_id)
            .arg(&self.public_url)
            .arg(serde_json::to_string(payload)?)
            .arg("--tests-dir")
            .arg(self.tests_dir.to_string_lossy())
            .arg("--cache-dir")
            .arg(self.repo_cache_dir().to_string_lossy())
            .arg("--public-dir")
            .arg(self.public_dir.to_string_lossy());
        if let Some(path) = config_path.filter(|path| path.exists()) {
            command = command.arg("--folders").arg(path.to_string_lossy());
        }
        Ok(command)
    }
}
