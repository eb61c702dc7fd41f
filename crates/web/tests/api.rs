//! Router tests against an in-memory database.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use playdeck_common::lifecycle::TerminationPlan;
use playdeck_common::{
    Database, LifecycleManager, NewSuite, ProcessRecordStore, RunStatus, RunUpdate, OWNER_HEADER,
};
use playdeck_web::{router, AppState, DashboardConfig};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

struct TestApp {
    _dir: TempDir,
    db: Database,
    router: Router,
}

fn make_app(runner_bin: &str) -> TestApp {
    let dir = TempDir::new().unwrap();
    let tests_dir = dir.path().join("tests");
    std::fs::create_dir_all(tests_dir.join("the-furniture-store")).unwrap();
    std::fs::create_dir_all(tests_dir.join("ecommerce-store")).unwrap();
    std::fs::write(
        tests_dir.join("the-furniture-store/home.spec.js"),
        "test('loads', async () => {});\ntest('shows sofas', async () => {});\n",
    )
    .unwrap();
    std::fs::write(
        tests_dir.join("ecommerce-store/cart.spec.js"),
        "test('adds item', async () => {});\n",
    )
    .unwrap();

    let config = DashboardConfig {
        state_dir: dir.path().join("state"),
        public_dir: dir.path().join("public"),
        tests_dir,
        runner_bin: PathBuf::from(runner_bin),
        ..Default::default()
    };

    let db = Database::open_memory().unwrap();
    let lifecycle = LifecycleManager::new(
        Arc::new(db.clone()),
        ProcessRecordStore::new(config.pid_dir()),
        TerminationPlan::new(Vec::new()),
    );
    let state = AppState::new(db.clone(), lifecycle, config, None);
    TestApp {
        _dir: dir,
        db,
        router: router(Arc::new(state)),
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn get(uri: &str, owner: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(owner) = owner {
        builder = builder.header(OWNER_HEADER, owner);
    }
    builder.body(Body::empty()).unwrap()
}

fn with_json(method: &str, uri: &str, owner: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(owner) = owner {
        builder = builder.header(OWNER_HEADER, owner);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn suite(db: &Database, owner: &str, name: &str) -> String {
    db.create_suite(
        owner,
        &NewSuite {
            name: name.to_string(),
            ..Default::default()
        },
    )
    .unwrap()
    .id
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = make_app("true");
    let (status, json) = send(&app.router, get("/health", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "playdeck-web");
}

#[tokio::test]
async fn test_unknown_route_is_json_404() {
    let app = make_app("true");
    let (status, json) = send(&app.router, get("/api/nope", None)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn test_user_routes_require_owner_header() {
    let app = make_app("true");
    let (status, json) = send(&app.router, get("/api/suites", None)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(json["error"].as_str().unwrap().contains(OWNER_HEADER));
}

#[tokio::test]
async fn test_suite_crud_is_scoped_to_owner() {
    let app = make_app("true");

    let (status, json) = send(
        &app.router,
        with_json(
            "POST",
            "/api/suites",
            Some("alice"),
            json!({"name": "Furniture Store", "description": "Main shop"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = json["data"]["id"].as_str().unwrap().to_string();

    let (_, json) = send(&app.router, get("/api/suites", Some("alice"))).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 1);
    let (_, json) = send(&app.router, get("/api/suites", Some("bob"))).await;
    assert!(json["data"].as_array().unwrap().is_empty());

    let uri = format!("/api/suites/{}", id);
    let (status, json) = send(&app.router, get(&uri, Some("alice"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["name"], "Furniture Store");

    let (status, _) = send(&app.router, get(&uri, Some("bob"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let delete = Request::builder()
        .method("DELETE")
        .uri(&uri)
        .header(OWNER_HEADER, "alice")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app.router, delete).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app.router, get(&uri, Some("alice"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_trigger_unknown_suite() {
    let app = make_app("true");
    let (status, _) = send(
        &app.router,
        with_json("POST", "/api/trigger-test", Some("alice"), json!({"suiteId": "missing"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_trigger_creates_run_and_spawns_coordinator() {
    let app = make_app("true");
    let suite_id = suite(&app.db, "alice", "Furniture Store");

    let (status, json) = send(
        &app.router,
        with_json(
            "POST",
            "/api/trigger-test",
            Some("alice"),
            json!({
                "suiteId": suite_id,
                "selectedTests": [{"testName": "loads", "testFile": "the-furniture-store/home.spec.js"}]
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    let run_id = json["runId"].as_str().unwrap();
    let run = app.db.get_run(run_id).unwrap().unwrap();
    assert_eq!(run.suite_id, suite_id);
    assert_eq!(run.owner_id, "alice");
    assert_ne!(run.status, RunStatus::Failed);
}

#[tokio::test]
async fn test_trigger_spawn_failure_marks_run_failed() {
    let app = make_app("/nonexistent/playdeck-runner");
    let suite_id = suite(&app.db, "alice", "Furniture Store");

    let (status, json) = send(
        &app.router,
        with_json("POST", "/api/trigger-test", Some("alice"), json!({"suiteId": suite_id})),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["error"]
        .as_str()
        .unwrap()
        .starts_with("Failed to start test runner"));

    let runs = app.db.list_runs("alice", 10).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert!(runs[0]
        .logs
        .as_deref()
        .unwrap()
        .contains("Failed to start test runner"));
}

#[tokio::test]
async fn test_coordinator_callbacks_record_results() {
    let app = make_app("true");
    let suite_id = suite(&app.db, "alice", "Furniture Store");
    let run = app.db.create_run(&suite_id, "alice").unwrap();

    let (status, json) = send(
        &app.router,
        with_json(
            "POST",
            "/api/test-results",
            None,
            json!({
                "testRunId": run.id,
                "tests": [
                    {"testName": "loads", "testFile": "the-furniture-store/home.spec.js"},
                    {"testName": "shows sofas", "testFile": "the-furniture-store/home.spec.js"}
                ]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["data"].as_array().unwrap().len(), 2);

    for body in [
        json!({"testRunId": run.id, "testName": "loads", "status": "running"}),
        json!({"testRunId": run.id, "testName": "loads", "status": "passed", "duration_ms": 1200}),
    ] {
        let (status, _) = send(&app.router, with_json("PATCH", "/api/test-results", None, body)).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, json) = send(
        &app.router,
        with_json(
            "POST",
            "/api/webhook",
            None,
            json!({
                "runId": run.id,
                "status": "completed",
                "duration_ms": 1500,
                "tests_passed": 1,
                "tests_failed": 0,
                "logs": "Individual test execution completed"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["statusWrite"]["outcome"], "applied");

    let (_, json) = send(
        &app.router,
        get(&format!("/api/test-run-status/{}", run.id), None),
    )
    .await;
    assert_eq!(json["status"], "completed");

    let (status, json) = send(&app.router, get(&format!("/api/runs/{}", run.id), Some("alice"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["tests_passed"], 1);
    let results = json["results"].as_array().unwrap();
    assert_eq!(results[0]["test_name"], "loads");
    assert_eq!(results[0]["status"], "passed");
    assert_eq!(results[0]["duration_ms"], 1200);
    assert_eq!(results[1]["status"], "pending");
}

#[tokio::test]
async fn test_result_update_rejects_skipping_running() {
    let app = make_app("true");
    let suite_id = suite(&app.db, "alice", "Furniture Store");
    let run = app.db.create_run(&suite_id, "alice").unwrap();
    app.db
        .insert_test_results(
            &run.id,
            &[playdeck_common::TestRef::new("loads", "the-furniture-store/home.spec.js")],
        )
        .unwrap();

    let (status, _) = send(
        &app.router,
        with_json(
            "PATCH",
            "/api/test-results",
            None,
            json!({"testRunId": run.id, "testName": "loads", "status": "passed"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_webhook_keeps_cancelled_status() {
    let app = make_app("true");
    let suite_id = suite(&app.db, "alice", "Furniture Store");
    let run = app.db.create_run(&suite_id, "alice").unwrap();
    app.db
        .apply_run_update(&run.id, &RunUpdate::status(RunStatus::Cancelled))
        .unwrap();

    let (status, json) = send(
        &app.router,
        with_json(
            "POST",
            "/api/webhook",
            None,
            json!({"runId": run.id, "status": "completed", "tests_passed": 2, "tests_failed": 0}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["statusWrite"]["outcome"], "rejected");
    assert_eq!(json["statusWrite"]["current"], "cancelled");

    let run = app.db.get_run(&run.id).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(run.tests_passed, 2);
}

#[tokio::test]
async fn test_run_status_unknown_run() {
    let app = make_app("true");
    let (status, _) = send(&app.router, get("/api/test-run-status/missing", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stop_cancels_run() {
    let app = make_app("true");
    let suite_id = suite(&app.db, "alice", "Furniture Store");
    let run = app.db.create_run(&suite_id, "alice").unwrap();
    app.db
        .apply_run_update(&run.id, &RunUpdate::status(RunStatus::Running))
        .unwrap();

    let uri = format!("/api/stop-test/{}", run.id);
    let (status, _) = send(&app.router, with_json("POST", &uri, Some("bob"), json!({}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, json) = send(&app.router, with_json("POST", &uri, Some("alice"), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["message"], "Run cancelled");
    assert_eq!(json["report"]["record_found"], false);

    let run = app.db.get_run(&run.id).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
}

#[tokio::test]
async fn test_runs_list_is_scoped_to_owner() {
    let app = make_app("true");
    let suite_id = suite(&app.db, "alice", "Furniture Store");
    app.db.create_run(&suite_id, "alice").unwrap();
    app.db.create_run(&suite_id, "alice").unwrap();

    let (_, json) = send(&app.router, get("/api/runs", Some("alice"))).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 2);
    let (_, json) = send(&app.router, get("/api/runs?limit=1", Some("alice"))).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 1);
    let (_, json) = send(&app.router, get("/api/runs", Some("bob"))).await;
    assert!(json["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_available_tests_narrowed_by_suite_folder() {
    let app = make_app("true");
    let suite_id = suite(&app.db, "alice", "Furniture Store");

    let (status, json) = send(
        &app.router,
        get(&format!("/api/available-tests?suiteId={}", suite_id), Some("alice")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["folder"], "the-furniture-store");
    assert_eq!(json["total"], 2);
    let categories = json["categories"].as_array().unwrap();
    assert_eq!(categories.len(), 1);
    assert_eq!(categories[0]["displayName"], "The Furniture Store");

    let (_, json) = send(&app.router, get("/api/available-tests", Some("alice"))).await;
    assert_eq!(json["total"], 3);
    assert_eq!(json["categories"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_artifacts_are_served() {
    let dir = TempDir::new().unwrap();
    let public_dir = dir.path().join("public");
    let video_dir = public_dir.join("test-artifacts").join("run-1");
    std::fs::create_dir_all(&video_dir).unwrap();
    std::fs::write(video_dir.join("video-loads.webm"), b"webm").unwrap();

    let config = DashboardConfig {
        state_dir: dir.path().join("state"),
        public_dir,
        ..Default::default()
    };
    let db = Database::open_memory().unwrap();
    let lifecycle = LifecycleManager::new(
        Arc::new(db.clone()),
        ProcessRecordStore::new(config.pid_dir()),
        TerminationPlan::new(Vec::new()),
    );
    let app = router(Arc::new(AppState::new(db, lifecycle, config, None)));

    let response = app
        .oneshot(get("/test-artifacts/run-1/video-loads.webm", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"webm");
}
