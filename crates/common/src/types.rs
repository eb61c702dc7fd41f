//! Core types for Playdeck

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How long after a run reaches `completed` or `failed` a stop request may
/// still overwrite it with `cancelled`.
pub const CANCEL_GRACE_MS: i64 = 5_000;

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ============================================================================
// Suites
// ============================================================================

/// A named collection of tests owned by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suite {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub description: Option<String>,
    /// Repository reference (`owner/name`) when the tests live outside the
    /// bundled tests directory.
    pub external_source: Option<String>,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fields accepted when creating a suite.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSuite {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "githubRepo")]
    pub external_source: Option<String>,
}

// ============================================================================
// Runs
// ============================================================================

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    /// Decide whether a status write may replace `self`.
    ///
    /// `terminal_since` is when the current status became terminal, if it is.
    /// A cancelled run never changes again. A completed or failed run only
    /// yields to `cancelled`, and only within [`CANCEL_GRACE_MS`].
    pub fn admit(self, incoming: RunStatus, terminal_since: Option<i64>, now: i64) -> StatusWrite {
        if self == incoming {
            return StatusWrite::Unchanged;
        }
        let applies = match self {
            RunStatus::Pending => true,
            RunStatus::Running => incoming != RunStatus::Pending,
            RunStatus::Completed | RunStatus::Failed => {
                incoming == RunStatus::Cancelled
                    && terminal_since.map_or(true, |at| now - at <= CANCEL_GRACE_MS)
            }
            RunStatus::Cancelled => false,
        };
        if applies {
            StatusWrite::Applied
        } else {
            StatusWrite::Rejected { current: self }
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(Error::InvalidInput(format!("unknown run status '{}'", other))),
        }
    }
}

/// Result of a status write against a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StatusWrite {
    /// The new status was stored.
    Applied,
    /// No status was supplied, or it matched the stored one.
    Unchanged,
    /// The stored status is final and was left in place.
    Rejected { current: RunStatus },
}

impl StatusWrite {
    pub fn is_rejected(&self) -> bool {
        matches!(self, StatusWrite::Rejected { .. })
    }
}

/// One execution attempt of a suite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub suite_id: String,
    pub owner_id: String,
    pub status: RunStatus,
    pub triggered_by: String,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub duration_ms: Option<i64>,
    pub tests_passed: i64,
    pub tests_failed: i64,
    pub logs: Option<String>,
    pub results: Option<serde_json::Value>,
}

/// Partial update of a run. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests_passed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests_failed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<serde_json::Value>,
}

impl RunUpdate {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_logs(mut self, logs: impl Into<String>) -> Self {
        self.logs = Some(logs.into());
        self
    }

    pub fn with_duration(mut self, duration_ms: i64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_counts(mut self, passed: i64, failed: i64) -> Self {
        self.tests_passed = Some(passed);
        self.tests_failed = Some(failed);
        self
    }
}

// ============================================================================
// Tests and per-test results
// ============================================================================

/// Identity of a test: its declared title and the file declaring it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRef {
    pub test_name: String,
    pub test_file: String,
}

impl TestRef {
    pub fn new(test_name: impl Into<String>, test_file: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            test_file: test_file.into(),
        }
    }
}

/// A test found by scanning the tests directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredTest {
    pub test_name: String,
    /// Path relative to the scan root, `/`-separated.
    pub test_file: String,
    /// First directory component of `test_file`, or the file's base name for
    /// files at the root.
    pub folder_path: String,
}

impl DiscoveredTest {
    pub fn to_ref(&self) -> TestRef {
        TestRef::new(self.test_name.clone(), self.test_file.clone())
    }

    pub fn matches(&self, selected: &TestRef) -> bool {
        self.test_name == selected.test_name && self.test_file == selected.test_file
    }
}

/// Status of one test inside a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Pending,
    Running,
    Passed,
    Failed,
}

impl TestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TestStatus::Passed | TestStatus::Failed)
    }

    /// Tests move `pending -> running -> passed|failed` and nowhere else.
    pub fn can_transition_to(self, next: TestStatus) -> bool {
        matches!(
            (self, next),
            (TestStatus::Pending, TestStatus::Running)
                | (TestStatus::Running, TestStatus::Passed)
                | (TestStatus::Running, TestStatus::Failed)
        )
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestStatus::Pending => write!(f, "pending"),
            TestStatus::Running => write!(f, "running"),
            TestStatus::Passed => write!(f, "passed"),
            TestStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for TestStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TestStatus::Pending),
            "running" => Ok(TestStatus::Running),
            "passed" => Ok(TestStatus::Passed),
            "failed" => Ok(TestStatus::Failed),
            other => Err(Error::InvalidInput(format!("unknown test status '{}'", other))),
        }
    }
}

/// Outcome row for one test in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub id: String,
    pub run_id: String,
    pub test_name: String,
    pub test_file: String,
    pub status: TestStatus,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub video_url: Option<String>,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

/// Partial update of a test result. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestResultUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TestStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
}

impl TestResultUpdate {
    pub fn running() -> Self {
        Self {
            status: Some(TestStatus::Running),
            ..Default::default()
        }
    }

    pub fn finished(
        status: TestStatus,
        duration_ms: i64,
        error_message: Option<String>,
        video_url: Option<String>,
    ) -> Self {
        Self {
            status: Some(status),
            duration_ms: Some(duration_ms),
            error_message,
            video_url,
        }
    }
}

// ============================================================================
// Coordinator hand-off and callback wire types
// ============================================================================

/// Configuration handed to a coordinator process when a run is launched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerPayload {
    #[serde(default)]
    pub selected_tests: Vec<TestRef>,
    #[serde(default, alias = "githubRepo", skip_serializing_if = "Option::is_none")]
    pub external_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suite_name: Option<String>,
}

/// Body of `POST /api/test-results`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTestResultsRequest {
    pub test_run_id: String,
    pub tests: Vec<TestRef>,
}

/// Body of `PATCH /api/test-results`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTestResultRequest {
    pub test_run_id: String,
    pub test_name: String,
    /// Narrows the match when two files declare the same title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_file: Option<String>,
    #[serde(flatten)]
    pub update: TestResultUpdate,
}

/// Body of `POST /api/webhook`, the coordinator's run-level report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    #[serde(rename = "runId")]
    pub run_id: String,
    #[serde(flatten)]
    pub update: RunUpdate,
}
