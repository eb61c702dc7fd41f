//! Coordinator runs against the SQLite store with a scripted executor

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use playdeck_common::{
    Database, DiscoveredTest, FolderTable, NewSuite, RunStatus, RunUpdate, RunnerPayload, TestRef,
    TestStatus,
};
use playdeck_runner::artifacts::ArtifactStore;
use playdeck_runner::{
    CapturedOutput, Coordinator, RepoFetcher, RunPlan, RunnerError, RunnerResult, SourceResolver,
    TestExecutor,
};
use tempfile::TempDir;

/// Passes every test unless its name contains "broken". Optionally cancels
/// the run after a number of executions, the way a stop request would.
struct ScriptedExecutor {
    db: Database,
    run_id: String,
    cancel_after: Option<usize>,
    video: Option<PathBuf>,
    fail_to_start: bool,
    calls: Mutex<Vec<(PathBuf, TestRef)>>,
}

impl ScriptedExecutor {
    fn new(db: &Database, run_id: &str) -> Self {
        Self {
            db: db.clone(),
            run_id: run_id.to_string(),
            cancel_after: None,
            video: None,
            fail_to_start: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<TestRef> {
        self.calls.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
    }
}

fn report_for(test: &DiscoveredTest, passed: bool, video: Option<&Path>) -> String {
    let attachments = match video {
        Some(path) => serde_json::json!([
            {"name": "video", "contentType": "video/webm", "path": path.to_string_lossy()}
        ]),
        None => serde_json::json!([]),
    };
    let errors = if passed {
        serde_json::json!([])
    } else {
        serde_json::json!([{
            "message": "TimeoutError: locator.click: Timeout 30000ms exceeded.\nCall log:\n  - waiting for locator('#checkout')"
        }])
    };
    serde_json::json!({
        "suites": [{
            "title": test.test_file,
            "file": test.test_file,
            "specs": [{
                "title": test.test_name,
                "ok": passed,
                "file": test.test_file,
                "tests": [{
                    "projectName": "chromium",
                    "results": [{
                        "status": if passed { "passed" } else { "failed" },
                        "duration": 250.0,
                        "retry": 0,
                        "errors": errors,
                        "attachments": attachments
                    }]
                }]
            }]
        }],
        "errors": []
    })
    .to_string()
}

#[async_trait]
impl TestExecutor for ScriptedExecutor {
    async fn execute(&self, root: &Path, test: &DiscoveredTest) -> RunnerResult<CapturedOutput> {
        let count = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((root.to_path_buf(), test.to_ref()));
            calls.len()
        };
        if self.cancel_after == Some(count) {
            self.db
                .apply_run_update(&self.run_id, &RunUpdate::status(RunStatus::Cancelled))
                .unwrap();
        }
        if self.fail_to_start {
            return Err(RunnerError::Playwright("failed to start \"npx\": No such file or directory".into()));
        }

        let passed = !test.test_name.contains("broken");
        Ok(CapturedOutput {
            success: passed,
            code: Some(if passed { 0 } else { 1 }),
            stdout: report_for(test, passed, self.video.as_deref()),
            stderr: String::new(),
        })
    }
}

struct FixedFetcher(Option<PathBuf>);

#[async_trait]
impl RepoFetcher for FixedFetcher {
    async fn fetch(&self, repo: &str) -> RunnerResult<PathBuf> {
        self.0.clone().ok_or_else(|| RunnerError::RepoFetch {
            repo: repo.to_string(),
            reason: "repository not found".into(),
        })
    }
}

struct Fixture {
    bundled: TempDir,
    db: Database,
    run_id: String,
}

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn fixture() -> Fixture {
    let bundled = TempDir::new().unwrap();
    write(
        bundled.path(),
        "shop/cart.spec.js",
        "test('A', async ({ page }) => {});\ntest(\"B\", async ({ page }) => {});\n",
    );
    write(
        bundled.path(),
        "the-furniture-store/home.spec.js",
        "test.describe('home', () => {\n  test(`loads`, async () => {});\n  test('broken checkout', async () => {});\n});\n",
    );

    let db = Database::open_memory().unwrap();
    let suite = db
        .create_suite(
            "owner",
            &NewSuite {
                name: "Shop".into(),
                ..Default::default()
            },
        )
        .unwrap();
    let run = db.create_run(&suite.id, "owner").unwrap();
    Fixture {
        bundled,
        db,
        run_id: run.id,
    }
}

fn coordinator(f: &Fixture, executor: Arc<ScriptedExecutor>, fetcher: FixedFetcher) -> Coordinator {
    let folders = FolderTable::new().with("Furniture Store", "the-furniture-store");
    let resolver = SourceResolver::new(f.bundled.path(), folders, Arc::new(fetcher));
    Coordinator::new(Arc::new(f.db.clone()), executor, resolver)
}

fn payload(selected: Vec<TestRef>) -> RunnerPayload {
    RunnerPayload {
        selected_tests: selected,
        ..Default::default()
    }
}

#[tokio::test]
async fn single_file_two_tests_end_to_end() {
    let f = fixture();
    let executor = Arc::new(ScriptedExecutor::new(&f.db, &f.run_id));
    let coordinator = coordinator(&f, executor.clone(), FixedFetcher(None));

    let plan = RunPlan::new(
        &f.run_id,
        payload(vec![
            TestRef::new("A", "shop/cart.spec.js"),
            TestRef::new("B", "shop/cart.spec.js"),
        ]),
    );
    let summary = coordinator.execute(&plan).await.unwrap();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.passed + summary.failed, 2);

    let run = f.db.get_run(&f.run_id).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.tests_passed + run.tests_failed, 2);
    assert!(run.started_at.is_some());
    assert!(run.completed_at.is_some());
    assert!(run.logs.unwrap().contains("Total: 2, Passed: 2, Failed: 0"));
    assert_eq!(run.results.unwrap()["tests"].as_array().unwrap().len(), 2);

    let rows = f.db.list_test_results(&f.run_id).unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.status == TestStatus::Passed));
    assert!(rows.iter().all(|r| r.duration_ms == Some(250)));
    assert!(rows.iter().all(|r| r.started_at.is_some() && r.completed_at.is_some()));
    assert_eq!(
        executor.calls(),
        vec![
            TestRef::new("A", "shop/cart.spec.js"),
            TestRef::new("B", "shop/cart.spec.js"),
        ]
    );
}

#[tokio::test]
async fn full_run_with_failure_marks_run_failed() {
    let f = fixture();
    let executor = Arc::new(ScriptedExecutor::new(&f.db, &f.run_id));
    let coordinator = coordinator(&f, executor.clone(), FixedFetcher(None));

    let summary = coordinator
        .execute(&RunPlan::new(&f.run_id, RunnerPayload::default()))
        .await
        .unwrap();
    assert_eq!(summary.total, 4);
    assert_eq!(summary.passed, 3);
    assert_eq!(summary.failed, 1);

    let run = f.db.get_run(&f.run_id).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!((run.tests_passed, run.tests_failed), (3, 1));

    let rows = f.db.list_test_results(&f.run_id).unwrap();
    let terminal = rows.iter().filter(|r| r.status.is_terminal()).count() as i64;
    assert_eq!(run.tests_passed + run.tests_failed, terminal);

    let broken = rows
        .iter()
        .find(|r| r.test_name == "broken checkout")
        .unwrap();
    assert_eq!(broken.status, TestStatus::Failed);
    assert_eq!(
        broken.error_message.as_deref(),
        Some("⏱️ Timeout: Could not find or click \"#checkout\" within 30 seconds. The element may not exist or took too long to load.")
    );
}

#[tokio::test]
async fn selecting_everything_matches_no_selection() {
    let all = {
        let f = fixture();
        let executor = Arc::new(ScriptedExecutor::new(&f.db, &f.run_id));
        coordinator(&f, executor.clone(), FixedFetcher(None))
            .execute(&RunPlan::new(&f.run_id, RunnerPayload::default()))
            .await
            .unwrap();
        executor.calls()
    };

    let f = fixture();
    let executor = Arc::new(ScriptedExecutor::new(&f.db, &f.run_id));
    coordinator(&f, executor.clone(), FixedFetcher(None))
        .execute(&RunPlan::new(&f.run_id, payload(all.clone())))
        .await
        .unwrap();
    assert_eq!(executor.calls(), all);
}

#[tokio::test]
async fn suite_name_narrows_bundled_tests_to_its_folder() {
    let f = fixture();
    let executor = Arc::new(ScriptedExecutor::new(&f.db, &f.run_id));
    let coordinator = coordinator(&f, executor.clone(), FixedFetcher(None));

    let plan = RunPlan::new(
        &f.run_id,
        RunnerPayload {
            suite_name: Some("The Furniture Store".into()),
            ..Default::default()
        },
    );
    coordinator.execute(&plan).await.unwrap();

    let calls = executor.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls
        .iter()
        .all(|t| t.test_file.starts_with("the-furniture-store/")));
}

#[tokio::test]
async fn empty_selection_result_completes_with_zero_counts() {
    let f = fixture();
    let executor = Arc::new(ScriptedExecutor::new(&f.db, &f.run_id));
    let coordinator = coordinator(&f, executor.clone(), FixedFetcher(None));

    let plan = RunPlan::new(&f.run_id, payload(vec![TestRef::new("A", "other.spec.js")]));
    let summary = coordinator.execute(&plan).await.unwrap();
    assert_eq!(summary.total, 0);
    assert!(executor.calls().is_empty());

    let run = f.db.get_run(&f.run_id).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!((run.tests_passed, run.tests_failed), (0, 0));
    assert!(run.logs.unwrap().contains("No tests matched"));
    assert!(f.db.list_test_results(&f.run_id).unwrap().is_empty());
}

#[tokio::test]
async fn empty_checkout_reports_no_tests_found() {
    let f = fixture();
    let checkout = TempDir::new().unwrap();
    let executor = Arc::new(ScriptedExecutor::new(&f.db, &f.run_id));
    let coordinator = coordinator(
        &f,
        executor.clone(),
        FixedFetcher(Some(checkout.path().to_path_buf())),
    );

    let plan = RunPlan::new(
        &f.run_id,
        RunnerPayload {
            external_source: Some("acme/empty".into()),
            ..Default::default()
        },
    );
    let summary = coordinator.execute(&plan).await.unwrap();
    assert_eq!(summary.total, 0);
    assert!(executor.calls().is_empty());

    let run = f.db.get_run(&f.run_id).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    let logs = run.logs.unwrap();
    assert!(logs.contains("No tests found under"));
    assert!(!logs.contains("matched the selection"));
}

#[tokio::test]
async fn stop_between_tests_keeps_run_cancelled() {
    let f = fixture();
    let mut executor = ScriptedExecutor::new(&f.db, &f.run_id);
    executor.cancel_after = Some(1);
    let executor = Arc::new(executor);
    let coordinator = coordinator(&f, executor.clone(), FixedFetcher(None));

    let summary = coordinator
        .execute(&RunPlan::new(&f.run_id, RunnerPayload::default()))
        .await
        .unwrap();
    assert!(summary.cancelled);
    assert_eq!(executor.calls().len(), 1);
    assert_eq!(summary.not_run, 3);

    let run = f.db.get_run(&f.run_id).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
    // Late counters still land on a cancelled run
    assert_eq!(run.tests_passed, 1);
    assert!(run.logs.unwrap().contains("3 test(s) not run"));

    let rows = f.db.list_test_results(&f.run_id).unwrap();
    assert_eq!(
        rows.iter().filter(|r| r.status == TestStatus::Pending).count(),
        3
    );
}

#[tokio::test]
async fn already_cancelled_run_is_not_executed() {
    let f = fixture();
    f.db.apply_run_update(&f.run_id, &RunUpdate::status(RunStatus::Cancelled))
        .unwrap();
    let executor = Arc::new(ScriptedExecutor::new(&f.db, &f.run_id));
    let coordinator = coordinator(&f, executor.clone(), FixedFetcher(None));

    let summary = coordinator
        .execute(&RunPlan::new(&f.run_id, RunnerPayload::default()))
        .await
        .unwrap();
    assert!(summary.cancelled);
    assert!(executor.calls().is_empty());
    assert!(f.db.list_test_results(&f.run_id).unwrap().is_empty());
}

#[tokio::test]
async fn external_fetch_failure_fails_the_run() {
    let f = fixture();
    let executor = Arc::new(ScriptedExecutor::new(&f.db, &f.run_id));
    let coordinator = coordinator(&f, executor.clone(), FixedFetcher(None));

    let plan = RunPlan::new(
        &f.run_id,
        RunnerPayload {
            external_source: Some("acme/shop".into()),
            ..Default::default()
        },
    );
    let err = coordinator.execute(&plan).await.unwrap_err();
    assert!(matches!(err, RunnerError::RepoFetch { .. }));
    assert!(executor.calls().is_empty());

    let run = f.db.get_run(&f.run_id).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.logs.unwrap().contains("acme/shop"));
}

#[tokio::test]
async fn external_source_runs_from_checkout_test_dir() {
    let f = fixture();
    let checkout = TempDir::new().unwrap();
    write(
        checkout.path(),
        "tests/e2e/login.spec.js",
        "test('logs in', async () => {});\n",
    );
    let executor = Arc::new(ScriptedExecutor::new(&f.db, &f.run_id));
    let coordinator = coordinator(
        &f,
        executor.clone(),
        FixedFetcher(Some(checkout.path().to_path_buf())),
    );

    let plan = RunPlan::new(
        &f.run_id,
        RunnerPayload {
            external_source: Some("acme/shop".into()),
            suite_name: Some("Furniture Store".into()),
            ..Default::default()
        },
    );
    coordinator.execute(&plan).await.unwrap();

    let calls = executor.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, checkout.path().join("tests/e2e"));
    assert_eq!(calls[0].1, TestRef::new("logs in", "login.spec.js"));
}

#[tokio::test]
async fn executor_errors_fail_only_that_test() {
    let f = fixture();
    let mut executor = ScriptedExecutor::new(&f.db, &f.run_id);
    executor.fail_to_start = true;
    let executor = Arc::new(executor);
    let coordinator = coordinator(&f, executor.clone(), FixedFetcher(None));

    let summary = coordinator
        .execute(&RunPlan::new(&f.run_id, RunnerPayload::default()))
        .await
        .unwrap();
    assert_eq!(summary.failed, 4);

    let run = f.db.get_run(&f.run_id).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    let rows = f.db.list_test_results(&f.run_id).unwrap();
    assert!(rows
        .iter()
        .all(|r| r.status == TestStatus::Failed && r.error_message.is_some()));
}

#[tokio::test]
async fn videos_are_published_under_test_artifacts() {
    let f = fixture();
    let public = TempDir::new().unwrap();
    let recordings = TempDir::new().unwrap();
    let video = recordings.path().join("video.webm");
    std::fs::write(&video, b"webm").unwrap();

    let mut executor = ScriptedExecutor::new(&f.db, &f.run_id);
    executor.video = Some(video);
    let executor = Arc::new(executor);
    let coordinator = coordinator(&f, executor, FixedFetcher(None))
        .with_artifacts(ArtifactStore::new(public.path()));

    let plan = RunPlan::new(&f.run_id, payload(vec![TestRef::new("A", "shop/cart.spec.js")]));
    coordinator.execute(&plan).await.unwrap();

    let rows = f.db.list_test_results(&f.run_id).unwrap();
    let url = rows[0].video_url.clone().unwrap();
    let prefix = format!("/test-artifacts/{}/video-A-", f.run_id);
    assert!(url.starts_with(&prefix), "{}", url);
    let file_name = url.rsplit('/').next().unwrap();
    assert!(public
        .path()
        .join("test-artifacts")
        .join(&f.run_id)
        .join(file_name)
        .is_file());
}
