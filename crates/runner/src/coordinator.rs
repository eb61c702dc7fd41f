//! Sequential execution of one run
//!
//! ```text
//! mark running -> resolve source -> discover -> select
//!   -> create pending rows
//!   -> per test: running -> playwright -> passed | failed
//!   -> final counts, duration and status
//! ```
//!
//! Every outcome is reported through the [`RunStore`]. A stop request is
//! noticed between tests by re-reading the run status.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use playdeck_common::discovery::select_tests;
use playdeck_common::{
    humanize, DiscoveredTest, RunStatus, RunStore, RunUpdate, RunnerPayload, StatusWrite,
    TestDiscovery, TestResultUpdate, TestStatus,
};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::artifacts::ArtifactStore;
use crate::client::HttpRunStore;
use crate::config::CoordinatorConfig;
use crate::error::RunnerResult;
use crate::playwright::{CapturedOutput, PlaywrightCli, TestExecutor};
use crate::report::parse_report;
use crate::source::{GitRepoFetcher, SourceResolver, SuiteSource};

/// One run to execute.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub run_id: String,
    pub payload: RunnerPayload,
}

impl RunPlan {
    pub fn new(run_id: impl Into<String>, payload: RunnerPayload) -> Self {
        Self {
            run_id: run_id.into(),
            payload,
        }
    }
}

/// How a single test ended.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub status: TestStatus,
    pub duration_ms: i64,
    pub error_message: Option<String>,
    /// Recorded video on local disk, not yet published
    pub video: Option<PathBuf>,
}

impl Verdict {
    fn failed(duration_ms: i64, raw_error: &str) -> Self {
        Self {
            status: TestStatus::Failed,
            duration_ms,
            error_message: Some(humanize(raw_error)),
            video: None,
        }
    }
}

/// Decide a test's outcome from its process output.
///
/// The report's final attempt wins when it can be found. Without one, a
/// clean exit counts as a pass and anything else as a failure described by
/// whatever the process printed.
pub fn interpret(test: &DiscoveredTest, output: &CapturedOutput, elapsed_ms: i64) -> Verdict {
    let report = parse_report(&output.stdout);
    let attempt = report
        .as_ref()
        .and_then(|report| report.find_attempt(&test.test_name, &test.test_file));

    match attempt {
        Some(attempt) => {
            let passed = output.success && attempt.passed();
            let error_message = if passed {
                None
            } else {
                let raw = attempt
                    .error_text()
                    .unwrap_or_else(|| output.failure_summary());
                Some(humanize(&raw))
            };
            Verdict {
                status: if passed {
                    TestStatus::Passed
                } else {
                    TestStatus::Failed
                },
                duration_ms: attempt.duration_ms(),
                error_message,
                video: attempt.video_path().map(PathBuf::from),
            }
        }
        None if output.success => Verdict {
            status: TestStatus::Passed,
            duration_ms: elapsed_ms,
            error_message: None,
            video: None,
        },
        None => {
            let raw = report
                .as_ref()
                .and_then(|report| report.global_error_text())
                .unwrap_or_else(|| output.failure_summary());
            Verdict::failed(elapsed_ms, &raw)
        }
    }
}

/// Per-test line of the run's `results` blob.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestOutcome {
    pub test_name: String,
    pub test_file: String,
    pub status: TestStatus,
    pub duration_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
}

/// Totals of an executed run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: String,
    /// Status the coordinator asked for. The store may keep `cancelled`.
    pub status: RunStatus,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Selected tests never started because the run was stopped
    pub not_run: usize,
    pub cancelled: bool,
    pub duration_ms: i64,
    pub tests: Vec<TestOutcome>,
}

impl RunSummary {
    fn empty(run_id: &str, status: RunStatus) -> Self {
        Self {
            run_id: run_id.to_string(),
            status,
            total: 0,
            passed: 0,
            failed: 0,
            not_run: 0,
            cancelled: status == RunStatus::Cancelled,
            duration_ms: 0,
            tests: Vec::new(),
        }
    }

    fn log_text(&self) -> String {
        let mut logs = format!(
            "Individual test execution completed\nTotal: {}, Passed: {}, Failed: {}",
            self.total, self.passed, self.failed
        );
        if self.cancelled {
            logs.push_str(&format!("\nRun cancelled, {} test(s) not run", self.not_run));
        }
        logs
    }

    fn results_json(&self) -> serde_json::Value {
        serde_json::json!({
            "total": self.total,
            "passed": self.passed,
            "failed": self.failed,
            "notRun": self.not_run,
            "tests": self.tests,
        })
    }
}

pub struct Coordinator {
    store: Arc<dyn RunStore>,
    executor: Arc<dyn TestExecutor>,
    resolver: SourceResolver,
    discovery: TestDiscovery,
    artifacts: Option<ArtifactStore>,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn RunStore>,
        executor: Arc<dyn TestExecutor>,
        resolver: SourceResolver,
    ) -> Self {
        Self {
            store,
            executor,
            resolver,
            discovery: TestDiscovery::default(),
            artifacts: None,
        }
    }

    pub fn with_discovery(mut self, discovery: TestDiscovery) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn with_artifacts(mut self, artifacts: ArtifactStore) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// Wire the production collaborators: HTTP callbacks, the Playwright
    /// CLI and git-backed repository fetching.
    pub fn from_config(config: &CoordinatorConfig) -> RunnerResult<Self> {
        config.validate()?;
        let store = Arc::new(HttpRunStore::new(&config.api_url)?);
        let executor = Arc::new(PlaywrightCli::from_command_line(&config.playwright_command)?);
        let fetcher = Arc::new(GitRepoFetcher::new(&config.cache_dir).with_branch(&config.branch));
        let resolver = SourceResolver::new(&config.tests_dir, config.folders.clone(), fetcher);
        Ok(Self::new(store, executor, resolver)
            .with_discovery(TestDiscovery::new(&config.test_suffix))
            .with_artifacts(ArtifactStore::new(&config.public_dir)))
    }

    /// Execute a run to completion.
    ///
    /// Errors before the tests start mark the run failed with the error in
    /// its logs and are returned to the caller.
    pub async fn execute(&self, plan: &RunPlan) -> RunnerResult<RunSummary> {
        let run_id = plan.run_id.as_str();
        let started = Instant::now();

        match self
            .store
            .update_run(run_id, RunUpdate::status(RunStatus::Running))
            .await
        {
            Ok(StatusWrite::Rejected { current }) => {
                info!(run_id, "Run is already {}, nothing to do", current);
                return Ok(RunSummary::empty(run_id, current));
            }
            Ok(_) => info!(run_id, "Run started"),
            Err(e) => warn!(run_id, "Could not mark run running: {}", e),
        }

        match self.run_tests(plan, started).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                error!(run_id, "Run failed: {}", e);
                let update = RunUpdate::status(RunStatus::Failed)
                    .with_duration(elapsed_ms(started))
                    .with_logs(format!("Error: {}", e));
                if let Err(report_err) = self.store.update_run(run_id, update).await {
                    warn!(run_id, "Could not report run failure: {}", report_err);
                }
                Err(e)
            }
        }
    }

    async fn run_tests(&self, plan: &RunPlan, started: Instant) -> RunnerResult<RunSummary> {
        let run_id = plan.run_id.as_str();
        let source = self
            .resolver
            .resolve(&SuiteSource {
                external: plan.payload.external_source.clone(),
                suite_name: plan.payload.suite_name.clone(),
            })
            .await?;

        let discovered = self
            .discovery
            .discover(&source.root, source.folder.as_deref());
        let tests = if plan.payload.selected_tests.is_empty() {
            discovered
        } else {
            select_tests(discovered, &plan.payload.selected_tests)
        };
        info!(run_id, "Running {} test(s)...", tests.len());

        if tests.is_empty() {
            let logs = if plan.payload.selected_tests.is_empty() {
                format!("No tests found under {}; nothing was run", source.search_dir().display())
            } else {
                "No tests matched the selection; nothing was run".to_string()
            };
            let summary = RunSummary::empty(run_id, RunStatus::Completed);
            let update = RunUpdate::status(RunStatus::Completed)
                .with_counts(0, 0)
                .with_duration(elapsed_ms(started))
                .with_logs(logs);
            self.report(run_id, update).await;
            return Ok(summary);
        }

        let refs: Vec<_> = tests.iter().map(DiscoveredTest::to_ref).collect();
        let rows = self.store.bulk_create_test_results(run_id, &refs).await?;
        debug!(run_id, "Created {} result rows", rows.len());

        let mut outcomes = Vec::with_capacity(tests.len());
        let mut cancelled = false;
        for test in &tests {
            if self.stop_requested(run_id).await {
                cancelled = true;
                break;
            }
            outcomes.push(self.run_one(run_id, &source.root, test).await);
        }

        let passed = outcomes
            .iter()
            .filter(|o| o.status == TestStatus::Passed)
            .count();
        let failed = outcomes.len() - passed;
        let status = if failed > 0 {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        let summary = RunSummary {
            run_id: run_id.to_string(),
            status,
            total: tests.len(),
            passed,
            failed,
            not_run: tests.len() - outcomes.len(),
            cancelled,
            duration_ms: elapsed_ms(started),
            tests: outcomes,
        };

        info!(
            run_id,
            "Test Results: {} passed, {} failed, {} not run ({} ms)",
            summary.passed,
            summary.failed,
            summary.not_run,
            summary.duration_ms
        );

        let mut update = RunUpdate::status(status)
            .with_counts(passed as i64, failed as i64)
            .with_duration(summary.duration_ms)
            .with_logs(summary.log_text());
        update.results = Some(summary.results_json());
        self.report(run_id, update).await;
        Ok(summary)
    }

    async fn run_one(&self, run_id: &str, root: &std::path::Path, test: &DiscoveredTest) -> TestOutcome {
        let name = test.test_name.as_str();
        let file = Some(test.test_file.as_str());
        debug!(run_id, "Running test: {} ({})", name, test.test_file);

        if let Err(e) = self
            .store
            .update_test_result(run_id, name, file, TestResultUpdate::running())
            .await
        {
            warn!(run_id, "Could not mark '{}' running: {}", name, e);
        }

        let started = Instant::now();
        let verdict = match self.executor.execute(root, test).await {
            Ok(output) => interpret(test, &output, elapsed_ms(started)),
            Err(e) => Verdict::failed(elapsed_ms(started), &e.to_string()),
        };

        let video_url = match (&self.artifacts, &verdict.video) {
            (Some(artifacts), Some(video)) => artifacts.store_video(run_id, name, video).await,
            _ => None,
        };

        match verdict.status {
            TestStatus::Passed => info!(run_id, "✓ {} ({} ms)", name, verdict.duration_ms),
            _ => error!(
                run_id,
                "✗ {} - {}",
                name,
                verdict.error_message.as_deref().unwrap_or("unknown error")
            ),
        }

        let update = TestResultUpdate::finished(
            verdict.status,
            verdict.duration_ms,
            verdict.error_message.clone(),
            video_url.clone(),
        );
        if let Err(e) = self.store.update_test_result(run_id, name, file, update).await {
            warn!(run_id, "Could not record result of '{}': {}", name, e);
        }

        TestOutcome {
            test_name: test.test_name.clone(),
            test_file: test.test_file.clone(),
            status: verdict.status,
            duration_ms: verdict.duration_ms,
            error_message: verdict.error_message,
            video_url,
        }
    }

    /// Whether the run was stopped or removed since the last test.
    async fn stop_requested(&self, run_id: &str) -> bool {
        match self.store.get_run_status(run_id).await {
            Ok(Some(RunStatus::Cancelled)) => {
                info!(run_id, "Run was cancelled, stopping");
                true
            }
            Ok(None) => {
                warn!(run_id, "Run no longer exists, stopping");
                true
            }
            Ok(Some(_)) => false,
            Err(e) => {
                warn!(run_id, "Could not check run status: {}", e);
                false
            }
        }
    }

    async fn report(&self, run_id: &str, update: RunUpdate) {
        match self.store.update_run(run_id, update).await {
            Ok(StatusWrite::Rejected { current }) => {
                info!(run_id, "Run stays {}; counters recorded", current)
            }
            Ok(_) => {}
            Err(e) => warn!(run_id, "Failed to send final results: {}", e),
        }
    }
}

fn elapsed_ms(since: Instant) -> i64 {
    since.elapsed().as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test() -> DiscoveredTest {
        DiscoveredTest {
            test_name: "adds an item".into(),
            test_file: "shop/cart.spec.js".into(),
            folder_path: "shop".into(),
        }
    }

    fn report(status: &str, errors: &str) -> String {
        format!(
            r#"{{"suites":[{{"title":"cart","file":"shop/cart.spec.js","specs":[{{
                "title":"adds an item","ok":false,"file":"shop/cart.spec.js",
                "tests":[{{"results":[{{"status":"{}","duration":812,"errors":{},
                  "attachments":[{{"name":"video","contentType":"video/webm","path":"/tmp/v.webm"}}]}}]}}]
            }}]}}]}}"#,
            status, errors
        )
    }

    fn output(success: bool, stdout: String) -> CapturedOutput {
        CapturedOutput {
            success,
            code: Some(if success { 0 } else { 1 }),
            stdout,
            stderr: String::new(),
        }
    }

    #[test]
    fn test_interpret_passed_report() {
        let verdict = interpret(&test(), &output(true, report("passed", "[]")), 5000);
        assert_eq!(verdict.status, TestStatus::Passed);
        assert_eq!(verdict.duration_ms, 812);
        assert_eq!(verdict.error_message, None);
        assert_eq!(verdict.video, Some(PathBuf::from("/tmp/v.webm")));
    }

    #[test]
    fn test_interpret_failed_report_humanizes_error() {
        let verdict = interpret(
            &test(),
            &output(
                false,
                report(
                    "failed",
                    r#"[{"message":"Error: expect(received).toBeVisible()\n\nReceived: hidden"}]"#,
                ),
            ),
            5000,
        );
        assert_eq!(verdict.status, TestStatus::Failed);
        assert_eq!(verdict.duration_ms, 812);
        let message = verdict.error_message.unwrap();
        assert!(message.starts_with("👁️ Element not visible"), "{}", message);
        assert!(verdict.video.is_some());
    }

    #[test]
    fn test_interpret_unparseable_success_is_pass() {
        let verdict = interpret(&test(), &output(true, "1 passed".into()), 4321);
        assert_eq!(verdict.status, TestStatus::Passed);
        assert_eq!(verdict.duration_ms, 4321);
    }

    #[test]
    fn test_interpret_process_failure_without_report() {
        let mut out = output(false, String::new());
        out.stderr = "Error: Cannot find module '@playwright/test'".into();
        let verdict = interpret(&test(), &out, 10);
        assert_eq!(verdict.status, TestStatus::Failed);
        assert_eq!(verdict.duration_ms, 10);
        assert!(verdict.error_message.unwrap().contains("Cannot find module"));
    }

    #[test]
    fn test_interpret_failed_exit_overrides_passed_attempt() {
        let verdict = interpret(&test(), &output(false, report("passed", "[]")), 10);
        assert_eq!(verdict.status, TestStatus::Failed);
        assert_eq!(
            verdict.error_message.as_deref(),
            Some("Test process exited with code 1")
        );
    }
}
