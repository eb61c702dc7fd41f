//! SQLite database for Playdeck state persistence

use crate::store::RunStore;
use crate::types::{
    now_millis, NewSuite, Run, RunStatus, RunUpdate, StatusWrite, Suite, TestRef, TestResult,
    TestResultUpdate, TestStatus,
};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Database wrapper for state persistence
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path.as_ref())?;

        // Enable WAL mode for better concurrency
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        info!("Opened database at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- Suites table
            CREATE TABLE IF NOT EXISTS suites (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                external_source TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_suites_owner ON suites(owner_id);

            -- Runs table
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                suite_id TEXT NOT NULL REFERENCES suites(id) ON DELETE CASCADE,
                owner_id TEXT NOT NULL,
                status TEXT NOT NULL,
                triggered_by TEXT NOT NULL DEFAULT 'manual',
                created_at INTEGER NOT NULL,
                started_at INTEGER,
                completed_at INTEGER,
                duration_ms INTEGER,
                tests_passed INTEGER NOT NULL DEFAULT 0,
                tests_failed INTEGER NOT NULL DEFAULT 0,
                logs TEXT,
                results TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_runs_owner ON runs(owner_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_runs_suite ON runs(suite_id);

            -- Per-test results table
            CREATE TABLE IF NOT EXISTS test_results (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                seq INTEGER NOT NULL,
                test_name TEXT NOT NULL,
                test_file TEXT NOT NULL,
                status TEXT NOT NULL,
                duration_ms INTEGER,
                error_message TEXT,
                video_url TEXT,
                started_at INTEGER,
                completed_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_test_results_run ON test_results(run_id, test_name);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    // ========================================================================
    // Suites
    // ========================================================================

    pub fn create_suite(&self, owner_id: &str, suite: &NewSuite) -> Result<Suite> {
        if suite.name.trim().is_empty() {
            return Err(Error::InvalidInput("suite name must not be empty".into()));
        }
        let now = now_millis();
        let row = Suite {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            name: suite.name.trim().to_string(),
            description: suite.description.clone(),
            external_source: suite
                .external_source
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO suites (id, owner_id, name, description, external_source, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7)",
            params![
                row.id,
                row.owner_id,
                row.name,
                row.description,
                row.external_source,
                row.created_at,
                row.updated_at,
            ],
        )?;

        debug!("Inserted suite with id {}", row.id);
        Ok(row)
    }

    pub fn get_suite(&self, id: &str) -> Result<Option<Suite>> {
        let conn = self.conn.lock();
        let suite = conn
            .query_row(
                &format!("SELECT {} FROM suites WHERE id = ?1", SUITE_COLUMNS),
                params![id],
                suite_from_row,
            )
            .optional()?;
        Ok(suite)
    }

    pub fn list_suites(&self, owner_id: &str) -> Result<Vec<Suite>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM suites WHERE owner_id = ?1 ORDER BY created_at DESC",
            SUITE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![owner_id], suite_from_row)?;

        let mut suites = Vec::new();
        for row in rows {
            suites.push(row?);
        }
        Ok(suites)
    }

    /// Delete a suite and, through the foreign keys, its runs and results.
    pub fn delete_suite(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute("DELETE FROM suites WHERE id = ?1", params![id])?;
        if rows > 0 {
            debug!("Deleted suite with id {}", id);
        }
        Ok(rows > 0)
    }

    // ========================================================================
    // Runs
    // ========================================================================

    /// Create a `pending` run for a suite.
    pub fn create_run(&self, suite_id: &str, owner_id: &str) -> Result<Run> {
        let run = Run {
            id: Uuid::new_v4().to_string(),
            suite_id: suite_id.to_string(),
            owner_id: owner_id.to_string(),
            status: RunStatus::Pending,
            triggered_by: "manual".to_string(),
            created_at: now_millis(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
            tests_passed: 0,
            tests_failed: 0,
            logs: None,
            results: None,
        };

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO runs (id, suite_id, owner_id, status, triggered_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run.id,
                run.suite_id,
                run.owner_id,
                run.status.to_string(),
                run.triggered_by,
                run.created_at,
            ],
        )?;

        debug!("Inserted run {} for suite {}", run.id, suite_id);
        Ok(run)
    }

    pub fn get_run(&self, id: &str) -> Result<Option<Run>> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
                params![id],
                RawRun::from_row,
            )
            .optional()?;

        raw.map(RawRun::parse).transpose()
    }

    /// Runs owned by a user, newest first.
    pub fn list_runs(&self, owner_id: &str, limit: usize) -> Result<Vec<Run>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM runs WHERE owner_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
            RUN_COLUMNS
        ))?;
        let rows = stmt.query_map(params![owner_id, limit as i64], RawRun::from_row)?;

        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?.parse()?);
        }
        Ok(runs)
    }

    /// Runs that have not reached a terminal status.
    pub fn list_active_runs(&self) -> Result<Vec<Run>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM runs WHERE status IN ('pending', 'running') ORDER BY created_at",
            RUN_COLUMNS
        ))?;
        let rows = stmt.query_map([], RawRun::from_row)?;

        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?.parse()?);
        }
        Ok(runs)
    }

    pub fn run_status(&self, run_id: &str) -> Result<Option<RunStatus>> {
        let conn = self.conn.lock();
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM runs WHERE id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        status.map(|s| s.parse()).transpose()
    }

    /// Apply a partial update to a run.
    ///
    /// The status field goes through [`RunStatus::admit`]; a rejected status
    /// also drops the timestamps tied to it. Counters, duration, logs and
    /// results are written whatever the status outcome.
    pub fn apply_run_update(&self, run_id: &str, update: &RunUpdate) -> Result<StatusWrite> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let current: Option<(String, Option<i64>, Option<i64>)> = tx
            .query_row(
                "SELECT status, started_at, completed_at FROM runs WHERE id = ?1",
                params![run_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let (status, started_at, completed_at) =
            current.ok_or_else(|| Error::not_found("run", run_id))?;
        let current: RunStatus = status.parse()?;

        let now = now_millis();
        let write = match update.status {
            Some(incoming) => current.admit(incoming, completed_at, now),
            None => StatusWrite::Unchanged,
        };

        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let (StatusWrite::Applied, Some(incoming)) = (write, update.status) {
            sets.push("status = ?");
            values.push(Value::Text(incoming.to_string()));
            if incoming == RunStatus::Running && started_at.is_none() {
                sets.push("started_at = ?");
                values.push(Value::Integer(update.started_at.unwrap_or(now)));
            }
            if incoming.is_terminal() {
                sets.push("completed_at = ?");
                values.push(Value::Integer(update.completed_at.unwrap_or(now)));
            }
        }
        if let Some(duration) = update.duration_ms {
            sets.push("duration_ms = ?");
            values.push(Value::Integer(duration));
        }
        if let Some(passed) = update.tests_passed {
            sets.push("tests_passed = ?");
            values.push(Value::Integer(passed));
        }
        if let Some(failed) = update.tests_failed {
            sets.push("tests_failed = ?");
            values.push(Value::Integer(failed));
        }
        if let Some(logs) = &update.logs {
            sets.push("logs = ?");
            values.push(Value::Text(logs.clone()));
        }
        if let Some(results) = &update.results {
            sets.push("results = ?");
            values.push(Value::Text(serde_json::to_string(results)?));
        }

        if !sets.is_empty() {
            values.push(Value::Text(run_id.to_string()));
            tx.execute(
                &format!("UPDATE runs SET {} WHERE id = ?", sets.join(", ")),
                params_from_iter(values),
            )?;
        }
        tx.commit()?;

        match write {
            StatusWrite::Rejected { current } => debug!(
                "Run {} kept status {}, ignored {:?}",
                run_id, current, update.status
            ),
            StatusWrite::Applied => debug!("Run {} -> {:?}", run_id, update.status),
            StatusWrite::Unchanged => {}
        }
        Ok(write)
    }

    // ========================================================================
    // Test results
    // ========================================================================

    /// Insert one `pending` row per test, preserving the given order.
    pub fn insert_test_results(&self, run_id: &str, tests: &[TestRef]) -> Result<Vec<TestResult>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let exists: Option<i64> = tx
            .query_row("SELECT 1 FROM runs WHERE id = ?1", params![run_id], |row| {
                row.get(0)
            })
            .optional()?;
        if exists.is_none() {
            return Err(Error::not_found("run", run_id));
        }

        let base: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), -1) + 1 FROM test_results WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;

        let mut created = Vec::with_capacity(tests.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO test_results (id, run_id, seq, test_name, test_file, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (offset, test) in tests.iter().enumerate() {
                let row = TestResult {
                    id: Uuid::new_v4().to_string(),
                    run_id: run_id.to_string(),
                    test_name: test.test_name.clone(),
                    test_file: test.test_file.clone(),
                    status: TestStatus::Pending,
                    duration_ms: None,
                    error_message: None,
                    video_url: None,
                    started_at: None,
                    completed_at: None,
                };
                stmt.execute(params![
                    row.id,
                    row.run_id,
                    base + offset as i64,
                    row.test_name,
                    row.test_file,
                    row.status.to_string(),
                ])?;
                created.push(row);
            }
        }
        tx.commit()?;

        debug!("Created {} test results for run {}", created.len(), run_id);
        Ok(created)
    }

    /// Update the result keyed by `(run_id, test_name)`.
    ///
    /// When several rows share the key, the first one (in insertion order)
    /// that accepts the status change is updated.
    pub fn apply_test_result_update(
        &self,
        run_id: &str,
        test_name: &str,
        test_file: Option<&str>,
        update: &TestResultUpdate,
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let candidates: Vec<(String, String, String)> = {
            let mut stmt = tx.prepare(
                "SELECT id, status, test_file FROM test_results
                 WHERE run_id = ?1 AND test_name = ?2 ORDER BY seq",
            )?;
            let rows = stmt.query_map(params![run_id, test_name], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let row = row?;
                if test_file.map_or(true, |file| file == row.2) {
                    out.push(row);
                }
            }
            out
        };

        let mut parsed = Vec::with_capacity(candidates.len());
        for (id, status, _) in candidates {
            parsed.push((id, status.parse::<TestStatus>()?));
        }
        let (first_id, first_status) = parsed
            .first()
            .cloned()
            .ok_or_else(|| Error::not_found("test result", &format!("{}/{}", run_id, test_name)))?;

        let (target_id, current) = match update.status {
            Some(next) => parsed
                .into_iter()
                .find(|(_, status)| *status == next || status.can_transition_to(next))
                .ok_or_else(|| Error::InvalidStateTransition {
                    from: first_status.to_string(),
                    to: next.to_string(),
                })?,
            None => (first_id, first_status),
        };

        let now = now_millis();
        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(next) = update.status.filter(|next| *next != current) {
            sets.push("status = ?");
            values.push(Value::Text(next.to_string()));
            if next == TestStatus::Running {
                sets.push("started_at = ?");
                values.push(Value::Integer(now));
            }
            if next.is_terminal() {
                sets.push("completed_at = ?");
                values.push(Value::Integer(now));
            }
        }
        if let Some(duration) = update.duration_ms {
            sets.push("duration_ms = ?");
            values.push(Value::Integer(duration));
        }
        if let Some(message) = &update.error_message {
            sets.push("error_message = ?");
            values.push(Value::Text(message.clone()));
        }
        if let Some(url) = &update.video_url {
            sets.push("video_url = ?");
            values.push(Value::Text(url.clone()));
        }

        if !sets.is_empty() {
            values.push(Value::Text(target_id.clone()));
            tx.execute(
                &format!("UPDATE test_results SET {} WHERE id = ?", sets.join(", ")),
                params_from_iter(values),
            )?;
        }
        tx.commit()?;

        debug!("Updated test result {} ({})", target_id, test_name);
        Ok(())
    }

    /// Results of a run: started tests by start time, then unstarted ones in
    /// insertion order.
    pub fn list_test_results(&self, run_id: &str) -> Result<Vec<TestResult>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, run_id, test_name, test_file, status, duration_ms, error_message,
                    video_url, started_at, completed_at
             FROM test_results WHERE run_id = ?1
             ORDER BY started_at IS NULL, started_at, seq",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(RawTestResult {
                id: row.get(0)?,
                run_id: row.get(1)?,
                test_name: row.get(2)?,
                test_file: row.get(3)?,
                status: row.get(4)?,
                duration_ms: row.get(5)?,
                error_message: row.get(6)?,
                video_url: row.get(7)?,
                started_at: row.get(8)?,
                completed_at: row.get(9)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?.parse()?);
        }
        Ok(results)
    }
}

#[async_trait]
impl RunStore for Database {
    async fn update_run(&self, run_id: &str, update: RunUpdate) -> Result<StatusWrite> {
        self.apply_run_update(run_id, &update)
    }

    async fn bulk_create_test_results(
        &self,
        run_id: &str,
        tests: &[TestRef],
    ) -> Result<Vec<TestResult>> {
        self.insert_test_results(run_id, tests)
    }

    async fn update_test_result(
        &self,
        run_id: &str,
        test_name: &str,
        test_file: Option<&str>,
        update: TestResultUpdate,
    ) -> Result<()> {
        self.apply_test_result_update(run_id, test_name, test_file, &update)
    }

    async fn get_run_status(&self, run_id: &str) -> Result<Option<RunStatus>> {
        self.run_status(run_id)
    }
}

// ============================================================================
// Row mapping
// ============================================================================

const SUITE_COLUMNS: &str =
    "id, owner_id, name, description, external_source, is_active, created_at, updated_at";

const RUN_COLUMNS: &str = "id, suite_id, owner_id, status, triggered_by, created_at, started_at, \
     completed_at, duration_ms, tests_passed, tests_failed, logs, results";

fn suite_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Suite> {
    Ok(Suite {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        external_source: row.get(4)?,
        is_active: row.get::<_, i64>(5)? != 0,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Raw run row before status and results parsing
struct RawRun {
    id: String,
    suite_id: String,
    owner_id: String,
    status: String,
    triggered_by: String,
    created_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    duration_ms: Option<i64>,
    tests_passed: i64,
    tests_failed: i64,
    logs: Option<String>,
    results: Option<String>,
}

impl RawRun {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(RawRun {
            id: row.get(0)?,
            suite_id: row.get(1)?,
            owner_id: row.get(2)?,
            status: row.get(3)?,
            triggered_by: row.get(4)?,
            created_at: row.get(5)?,
            started_at: row.get(6)?,
            completed_at: row.get(7)?,
            duration_ms: row.get(8)?,
            tests_passed: row.get(9)?,
            tests_failed: row.get(10)?,
            logs: row.get(11)?,
            results: row.get(12)?,
        })
    }

    fn parse(self) -> Result<Run> {
        Ok(Run {
            id: self.id,
            suite_id: self.suite_id,
            owner_id: self.owner_id,
            status: self.status.parse()?,
            triggered_by: self.triggered_by,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            duration_ms: self.duration_ms,
            tests_passed: self.tests_passed,
            tests_failed: self.tests_failed,
            logs: self.logs,
            results: self.results.map(|r| serde_json::from_str(&r)).transpose()?,
        })
    }
}

struct RawTestResult {
    id: String,
    run_id: String,
    test_name: String,
    test_file: String,
    status: String,
    duration_ms: Option<i64>,
    error_message: Option<String>,
    video_url: Option<String>,
    started_at: Option<i64>,
    completed_at: Option<i64>,
}

impl RawTestResult {
    fn parse(self) -> Result<TestResult> {
        Ok(TestResult {
            id: self.id,
            run_id: self.run_id,
            test_name: self.test_name,
            test_file: self.test_file,
            status: self.status.parse()?,
            duration_ms: self.duration_ms,
            error_message: self.error_message,
            video_url: self.video_url,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}
