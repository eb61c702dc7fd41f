//! Dashboard HTTP API
//!
//! User-facing routes are scoped to the caller in `x-playdeck-user`. The
//! callback routes (`/api/test-results`, `/api/webhook`,
//! `/api/test-run-status/:id`) are used by coordinator processes.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use playdeck_common::discovery::{group_by_folder, TestDiscovery};
use playdeck_common::lifecycle::TerminationPlan;
use playdeck_common::{
    CreateTestResultsRequest, Database, LifecycleManager, NewSuite, ProcessRecordStore, RunReport,
    RunStatus, RunUpdate, RunnerPayload, TestRef, UpdateTestResultRequest,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::Owner;
use crate::config::DashboardConfig;
use crate::error::{ApiError, ApiResult};

const DEFAULT_RUN_LIMIT: usize = 50;

/// Shared state behind every handler.
pub struct AppState {
    pub db: Database,
    pub lifecycle: LifecycleManager,
    pub config: DashboardConfig,
    /// Handed to coordinators for the folder table
    pub config_path: Option<PathBuf>,
    pub discovery: TestDiscovery,
}

impl AppState {
    pub fn new(
        db: Database,
        lifecycle: LifecycleManager,
        config: DashboardConfig,
        config_path: Option<PathBuf>,
    ) -> Self {
        Self {
            db,
            lifecycle,
            config,
            config_path,
            discovery: TestDiscovery::default(),
        }
    }

    /// Open the database and pid records under the configured state dir.
    pub fn open(config: DashboardConfig, config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let db = Database::open(config.db_path())?;
        let plan = TerminationPlan::for_platform(&config.termination_options())?;
        info!("Stop strategies: {}", plan.strategy_names().join(", "));
        let lifecycle = LifecycleManager::new(
            Arc::new(db.clone()),
            ProcessRecordStore::new(config.pid_dir()),
            plan,
        );
        Ok(Self::new(db, lifecycle, config, config_path))
    }
}

/// Build the router
pub fn router(state: Arc<AppState>) -> Router {
    let artifacts = ServeDir::new(state.config.public_dir.join("test-artifacts"));

    Router::new()
        .route("/health", get(health_handler))
        // Suites
        .route("/api/suites", get(list_suites_handler).post(create_suite_handler))
        .route(
            "/api/suites/:id",
            get(get_suite_handler).delete(delete_suite_handler),
        )
        // Runs
        .route("/api/trigger-test", post(trigger_test_handler))
        .route("/api/stop-test/:id", post(stop_test_handler))
        .route("/api/runs", get(list_runs_handler))
        .route("/api/runs/:id", get(get_run_handler))
        .route("/api/available-tests", get(available_tests_handler))
        // Coordinator callbacks
        .route("/api/test-run-status/:id", get(run_status_handler))
        .route(
            "/api/test-results",
            post(create_test_results_handler).patch(update_test_result_handler),
        )
        .route("/api/webhook", post(webhook_handler))
        .nest_service("/test-artifacts", artifacts)
        .fallback(not_found_handler)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the dashboard
pub async fn serve(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = state.config.listen.clone();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Dashboard listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "playdeck-web",
        "version": playdeck_common::VERSION,
    }))
}

async fn not_found_handler() -> ApiError {
    ApiError::NotFound("No such route".to_string())
}

async fn create_suite_handler(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Json(body): Json<NewSuite>,
) -> ApiResult<impl IntoResponse> {
    let suite = state.db.create_suite(owner.as_str(), &body)?;
    info!(suite_id = %suite.id, "Created suite '{}'", suite.name);
    Ok((StatusCode::CREATED, Json(json!({"success": true, "data": suite}))))
}

async fn list_suites_handler(
    State(state): State<Arc<AppState>>,
    owner: Owner,
) -> ApiResult<impl IntoResponse> {
    let suites = state.db.list_suites(owner.as_str())?;
    Ok(Json(json!({"data": suites})))
}

fn owned_suite(state: &AppState, owner: &Owner, id: &str) -> ApiResult<playdeck_common::Suite> {
    let suite = state
        .db
        .get_suite(id)?
        .ok_or_else(|| ApiError::NotFound(format!("Suite {} not found", id)))?;
    owner.ensure_owns(&suite.owner_id, "Suite")?;
    Ok(suite)
}

fn owned_run(state: &AppState, owner: &Owner, id: &str) -> ApiResult<playdeck_common::Run> {
    let run = state
        .db
        .get_run(id)?
        .ok_or_else(|| ApiError::NotFound(format!("Run {} not found", id)))?;
    owner.ensure_owns(&run.owner_id, "Run")?;
    Ok(run)
}

async fn get_suite_handler(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let suite = owned_suite(&state, &owner, &id)?;
    Ok(Json(json!({"data": suite})))
}

async fn delete_suite_handler(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    owned_suite(&state, &owner, &id)?;
    state.db.delete_suite(&id)?;
    info!(suite_id = %id, "Deleted suite");
    Ok(Json(json!({"success": true})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriggerRequest {
    suite_id: String,
    #[serde(default)]
    selected_tests: Vec<TestRef>,
}

async fn trigger_test_handler(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Json(body): Json<TriggerRequest>,
) -> ApiResult<impl IntoResponse> {
    let suite = owned_suite(&state, &owner, &body.suite_id)?;
    if !suite.is_active {
        return Err(ApiError::BadRequest(format!("Suite {} is not active", suite.id)));
    }

    let run = state.db.create_run(&suite.id, owner.as_str())?;
    let payload = RunnerPayload {
        selected_tests: body.selected_tests,
        external_source: suite.external_source.clone(),
        suite_name: Some(suite.name.clone()),
    };
    let command = state
        .config
        .runner_command(&run.id, &payload, state.config_path.as_deref())
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    match state.lifecycle.spawn(&run.id, &command) {
        Ok(handle) => {
            let pid = handle.pid();
            handle.detach(state.lifecycle.records().clone());
            info!(run_id = %run.id, pid, "Triggered run of '{}'", suite.name);
            Ok(Json(json!({"success": true, "runId": run.id, "pid": pid})))
        }
        Err(e) => {
            warn!(run_id = %run.id, "Could not start coordinator: {}", e);
            let update = RunUpdate::status(RunStatus::Failed)
                .with_logs(format!("Failed to start test runner: {}", e));
            if let Err(mark_err) = state.db.apply_run_update(&run.id, &update) {
                warn!(run_id = %run.id, "Could not mark run failed: {}", mark_err);
            }
            Err(ApiError::Internal(format!("Failed to start test runner: {}", e)))
        }
    }
}

async fn stop_test_handler(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    owned_run(&state, &owner, &id)?;
    let report = state.lifecycle.stop(&id).await?;
    let message = if report.already_finished() {
        "Run already finished"
    } else if report.termination.terminated {
        "Run cancelled and coordinator stopped"
    } else {
        "Run cancelled"
    };
    info!(run_id = %id, "{}", message);
    Ok(Json(json!({"success": true, "message": message, "report": report})))
}

async fn run_status_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let status = state
        .db
        .run_status(&id)?
        .ok_or_else(|| ApiError::NotFound(format!("Run {} not found", id)))?;
    Ok(Json(json!({"status": status})))
}

#[derive(Debug, Deserialize)]
struct ListRunsQuery {
    limit: Option<usize>,
}

async fn list_runs_handler(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Query(query): Query<ListRunsQuery>,
) -> ApiResult<impl IntoResponse> {
    let runs = state
        .db
        .list_runs(owner.as_str(), query.limit.unwrap_or(DEFAULT_RUN_LIMIT))?;
    Ok(Json(json!({"data": runs})))
}

async fn get_run_handler(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let run = owned_run(&state, &owner, &id)?;
    let results = state.db.list_test_results(&id)?;
    Ok(Json(json!({"data": run, "results": results})))
}

async fn create_test_results_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateTestResultsRequest>,
) -> ApiResult<impl IntoResponse> {
    let created = state.db.insert_test_results(&body.test_run_id, &body.tests)?;
    info!(run_id = %body.test_run_id, "Created {} test result(s)", created.len());
    Ok((StatusCode::CREATED, Json(json!({"success": true, "data": created}))))
}

async fn update_test_result_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<UpdateTestResultRequest>,
) -> ApiResult<impl IntoResponse> {
    state.db.apply_test_result_update(
        &body.test_run_id,
        &body.test_name,
        body.test_file.as_deref(),
        &body.update,
    )?;
    Ok(Json(json!({"success": true})))
}

async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RunReport>,
) -> ApiResult<impl IntoResponse> {
    let write = state.db.apply_run_update(&body.run_id, &body.update)?;
    if write.is_rejected() {
        info!(run_id = %body.run_id, "Kept final status, recorded the rest of the report");
    }
    Ok(Json(json!({"success": true, "statusWrite": write})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AvailableTestsQuery {
    suite_id: Option<String>,
}

async fn available_tests_handler(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Query(query): Query<AvailableTestsQuery>,
) -> ApiResult<impl IntoResponse> {
    let folder = match &query.suite_id {
        Some(suite_id) => {
            let suite = owned_suite(&state, &owner, suite_id)?;
            state.config.folders.lookup(&suite.name).map(str::to_string)
        }
        None => None,
    };

    let tests = state
        .discovery
        .discover(&state.config.tests_dir, folder.as_deref());
    let total = tests.len();
    Ok(Json(json!({
        "success": true,
        "folder": folder,
        "total": total,
        "categories": group_by_folder(tests),
    })))
}
