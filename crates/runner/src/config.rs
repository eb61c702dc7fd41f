//! Coordinator configuration

use std::path::PathBuf;

use playdeck_common::{FolderTable, RunnerPayload, DEFAULT_TEST_SUFFIX};
use serde::{Deserialize, Serialize};

use crate::error::{RunnerError, RunnerResult};

/// Everything a coordinator needs for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    pub run_id: String,

    /// Dashboard base URL for callbacks
    pub api_url: String,

    /// Tests selected by the caller and where they come from
    pub payload: RunnerPayload,

    /// Bundled tests directory
    pub tests_dir: PathBuf,

    /// Cache for cloned repositories
    pub cache_dir: PathBuf,

    /// Dashboard public directory receiving `test-artifacts/`
    pub public_dir: PathBuf,

    /// Command line prefix used to run one test
    pub playwright_command: String,

    pub test_suffix: String,

    /// Branch cloned for external sources
    pub branch: String,

    /// Suite name to bundled folder table
    pub folders: FolderTable,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        let state_dir = playdeck_common::default_state_dir();
        Self {
            run_id: String::new(),
            api_url: "http://localhost:3000".to_string(),
            payload: RunnerPayload::default(),
            tests_dir: PathBuf::from("tests"),
            cache_dir: state_dir.join("repos"),
            public_dir: PathBuf::from("public"),
            playwright_command: "npx playwright test".to_string(),
            test_suffix: DEFAULT_TEST_SUFFIX.to_string(),
            branch: "main".to_string(),
            folders: FolderTable::bundled(),
        }
    }
}

/// Parse the JSON hand-off argument. Blank input means "run everything from
/// the bundled directory".
pub fn parse_payload(raw: Option<&str>) -> RunnerResult<RunnerPayload> {
    match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| RunnerError::Config(format!("invalid run config JSON: {}", e))),
        None => Ok(RunnerPayload::default()),
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> RunnerResult<()> {
        if self.run_id.trim().is_empty() {
            return Err(RunnerError::Config("run id is required".into()));
        }
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            return Err(RunnerError::Config(format!(
                "API URL must be http(s): {}",
                self.api_url
            )));
        }
        if self.test_suffix.is_empty() {
            return Err(RunnerError::Config("test suffix must not be empty".into()));
        }
        Ok(())
    }
}
