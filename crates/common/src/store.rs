//! The run store seam shared by the dashboard and the coordinator.
//!
//! The dashboard writes straight to SQLite; a coordinator process reaches the
//! same rows through the HTTP callback API. Both sides implement this trait.

use crate::types::{RunStatus, RunUpdate, StatusWrite, TestRef, TestResult, TestResultUpdate};
use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Apply a partial run update. Status writes follow [`RunStatus::admit`];
    /// the other fields are applied regardless of the status outcome.
    async fn update_run(&self, run_id: &str, update: RunUpdate) -> Result<StatusWrite>;

    /// Create one `pending` row per test, in the given order.
    async fn bulk_create_test_results(
        &self,
        run_id: &str,
        tests: &[TestRef],
    ) -> Result<Vec<TestResult>>;

    /// Update the result row keyed by `(run_id, test_name)`. `test_file`
    /// narrows the match when given.
    async fn update_test_result(
        &self,
        run_id: &str,
        test_name: &str,
        test_file: Option<&str>,
        update: TestResultUpdate,
    ) -> Result<()>;

    /// Current status of a run, `None` if the run does not exist.
    async fn get_run_status(&self, run_id: &str) -> Result<Option<RunStatus>>;
}
