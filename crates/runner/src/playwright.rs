//! One Playwright process per test

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use playdeck_common::DiscoveredTest;
use tokio::process::Command as TokioCommand;
use tracing::debug;

use crate::error::{RunnerError, RunnerResult};

/// What a test process left behind.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    /// A short description of how the process failed.
    pub fn failure_summary(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        match self.code {
            Some(code) => format!("Test process exited with code {}", code),
            None => "Test process was terminated by a signal".to_string(),
        }
    }
}

/// Runs a single discovered test to completion.
#[async_trait]
pub trait TestExecutor: Send + Sync {
    async fn execute(&self, root: &Path, test: &DiscoveredTest) -> RunnerResult<CapturedOutput>;
}

/// Playwright invoked through its CLI with the JSON reporter.
#[derive(Debug, Clone)]
pub struct PlaywrightCli {
    program: PathBuf,
    base_args: Vec<String>,
}

impl Default for PlaywrightCli {
    fn default() -> Self {
        Self {
            program: PathBuf::from("npx"),
            base_args: vec!["playwright".to_string(), "test".to_string()],
        }
    }
}

impl PlaywrightCli {
    pub fn new(program: impl Into<PathBuf>, base_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            base_args,
        }
    }

    /// Build from a shell-style command line such as `npx playwright test`.
    pub fn from_command_line(command: &str) -> RunnerResult<Self> {
        let mut words = command.split_whitespace().map(str::to_string);
        let program = words
            .next()
            .ok_or_else(|| RunnerError::Config("empty playwright command".into()))?;
        Ok(Self::new(program, words.collect()))
    }

    /// Arguments selecting exactly one test.
    pub fn args_for(&self, test: &DiscoveredTest) -> Vec<String> {
        let mut args = self.base_args.clone();
        args.push(test.test_file.clone());
        args.push("--grep".to_string());
        args.push(grep_pattern(&test.test_name));
        args.push("--reporter=json".to_string());
        args
    }
}

/// Pattern matching one test title at the end of Playwright's grep text
/// (project, file and describe titles, then trailing tags).
pub fn grep_pattern(test_name: &str) -> String {
    format!(r"(?:^|\s){}(?:\s+@\S+)*$", regex::escape(test_name))
}

#[async_trait]
impl TestExecutor for PlaywrightCli {
    async fn execute(&self, root: &Path, test: &DiscoveredTest) -> RunnerResult<CapturedOutput> {
        let args = self.args_for(test);
        debug!("Running {:?} {} in {}", self.program, args.join(" "), root.display());

        let output = TokioCommand::new(&self.program)
            .args(&args)
            .current_dir(root)
            .env("FORCE_COLOR", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                RunnerError::Playwright(format!("failed to start {:?}: {}", self.program, e))
            })?;

        Ok(CapturedOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
