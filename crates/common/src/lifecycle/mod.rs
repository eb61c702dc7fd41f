//! Coordinator process lifecycle: detached spawn, pid records and stop.

pub mod platform;
pub mod record;
pub mod terminate;

pub use platform::{ProcessControl, ProcessInfo, Signal};
pub use record::{ProcessRecord, ProcessRecordStore};
pub use terminate::{
    EscalationTiming, StrategyOutcome, TerminationOptions, TerminationPlan, TerminationReport,
    TerminationStrategy, TerminationTarget, DEFAULT_TOOLING_PATTERNS,
};

use crate::store::RunStore;
use crate::types::{RunStatus, RunUpdate, StatusWrite};
use crate::{Error, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Program and arguments for a coordinator process.
#[derive(Debug, Clone)]
pub struct SpawnCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl SpawnCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

/// Start `command` in its own process group so it outlives the caller and
/// can be signalled as a tree.
pub fn spawn_detached(command: &SpawnCommand) -> Result<Child> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(false);
    if let Some(cwd) = &command.cwd {
        cmd.current_dir(cwd);
    }

    #[cfg(unix)]
    cmd.process_group(0);

    #[cfg(windows)]
    {
        const DETACHED_PROCESS: u32 = 0x0000_0008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    }

    let child = cmd.spawn().map_err(|e| {
        Error::Process(format!("failed to spawn {:?}: {}", command.program, e))
    })?;
    Ok(child)
}

/// Owns a spawned coordinator.
#[derive(Debug)]
pub struct ProcessHandle {
    run_id: String,
    pid: u32,
    child: Child,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub async fn wait(mut self) -> Result<ExitStatus> {
        Ok(self.child.wait().await?)
    }

    /// Reap the child in the background and drop its pid record once it
    /// exits.
    pub fn detach(self, records: ProcessRecordStore) -> JoinHandle<()> {
        let ProcessHandle {
            run_id,
            pid,
            mut child,
        } = self;
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => info!(run_id = %run_id, pid, "Coordinator exited: {}", status),
                Err(e) => warn!(run_id = %run_id, pid, "Failed to wait on coordinator: {}", e),
            }
            if let Err(e) = records.remove(&run_id) {
                warn!(run_id = %run_id, "Failed to remove pid record: {}", e);
            }
        })
    }
}

/// Outcome of a stop request.
#[derive(Debug, Clone, Serialize)]
pub struct StopReport {
    pub run_id: String,
    pub status_write: StatusWrite,
    pub record_found: bool,
    pub termination: TerminationReport,
}

impl StopReport {
    /// The run had already completed or failed too long ago to be cancelled.
    pub fn already_finished(&self) -> bool {
        matches!(
            self.status_write,
            StatusWrite::Rejected {
                current: RunStatus::Completed | RunStatus::Failed
            }
        )
    }
}

/// Spawns coordinators and stops them on request.
pub struct LifecycleManager {
    store: Arc<dyn RunStore>,
    records: ProcessRecordStore,
    plan: TerminationPlan,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn RunStore>, records: ProcessRecordStore, plan: TerminationPlan) -> Self {
        Self {
            store,
            records,
            plan,
        }
    }

    pub fn records(&self) -> &ProcessRecordStore {
        &self.records
    }

    /// Spawn a detached coordinator and persist its pid record before
    /// returning. If the record cannot be written the child is killed.
    pub fn spawn(&self, run_id: &str, command: &SpawnCommand) -> Result<ProcessHandle> {
        let mut child = spawn_detached(command)?;
        let Some(pid) = child.id() else {
            return Err(Error::Process(format!(
                "coordinator for run {} exited before its pid was known",
                run_id
            )));
        };

        if let Err(e) = self.records.save(&ProcessRecord::new(run_id, pid)) {
            if let Err(kill_err) = child.start_kill() {
                warn!(run_id, pid, "Failed to kill unrecorded coordinator: {}", kill_err);
            }
            return Err(e);
        }

        info!(run_id, pid, "Spawned coordinator {:?}", command.program);
        Ok(ProcessHandle {
            run_id: run_id.to_string(),
            pid,
            child,
        })
    }

    /// Mark the run cancelled, then try to terminate its coordinator.
    ///
    /// Only the status write can fail the call. Termination is best effort
    /// and the pid record is removed whatever happens.
    pub async fn stop(&self, run_id: &str) -> Result<StopReport> {
        let status_write = self
            .store
            .update_run(run_id, RunUpdate::status(RunStatus::Cancelled))
            .await?;
        if let StatusWrite::Rejected { current } = status_write {
            info!(run_id, "Run already {}, leaving status in place", current);
        }

        let (termination, record_found) = self.terminate(run_id).await;
        Ok(StopReport {
            run_id: run_id.to_string(),
            status_write,
            record_found,
            termination,
        })
    }

    /// Run the termination plan for a run and remove its pid record.
    /// Returns the report and whether a record existed.
    pub async fn terminate(&self, run_id: &str) -> (TerminationReport, bool) {
        let record = match self.records.load(run_id) {
            Ok(record) => record,
            Err(e) => {
                warn!(run_id, "Could not read pid record: {}", e);
                None
            }
        };
        let record_found = record.is_some();
        if let Some(record) = &record {
            debug!(run_id, pid = record.pid, "Found pid record");
        }

        let target = TerminationTarget {
            run_id: run_id.to_string(),
            record,
        };
        let report = self.plan.execute(&target).await;
        if !report.terminated {
            warn!(run_id, "No strategy confirmed the coordinator gone");
        }

        if let Err(e) = self.records.remove(run_id) {
            warn!(run_id, "Failed to remove pid record: {}", e);
        }
        (report, record_found)
    }
}
