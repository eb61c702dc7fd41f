//! Kill Command
//!
//! Stops coordinators from the local state directory without going through
//! the dashboard, for when the dashboard is down or a process got away.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use playdeck_common::lifecycle::{
    StrategyOutcome, TerminationOptions, TerminationPlan, TerminationTarget,
};
use playdeck_common::{Database, Error, LifecycleManager, ProcessRecordStore};
use serde::Serialize;
use tracing::{debug, info};

use crate::output::{print_list, print_warning, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct KillArgs {
    /// Run whose coordinator to stop
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    pub run_id: Option<String>,

    /// Stop every recorded or active run and sweep leftover tooling
    #[arg(long)]
    pub all: bool,

    /// Include the tooling sweep in the per-run strategies
    #[arg(long)]
    pub dev: bool,
}

/// What happened to one run.
#[derive(Debug, Clone, Serialize)]
pub struct KillOutcome {
    pub run_id: String,
    /// The run exists in the local database
    pub run_found: bool,
    /// The stored status is now `cancelled` because of this call
    pub cancelled: bool,
    pub record_found: bool,
    pub terminated: bool,
}

impl TableDisplay for KillOutcome {
    fn headers() -> Vec<&'static str> {
        vec!["Run", "In DB", "Cancelled", "Pid Record", "Process Stopped"]
    }

    fn row(&self) -> Vec<String> {
        let yes_no = |flag: bool| if flag { "yes" } else { "no" }.to_string();
        vec![
            self.run_id.clone(),
            yes_no(self.run_found),
            yes_no(self.cancelled),
            yes_no(self.record_found),
            yes_no(self.terminated),
        ]
    }
}

/// Lifecycle manager over the local database and pid records.
pub struct LocalKiller {
    db: Database,
    lifecycle: LifecycleManager,
    sweep: TerminationPlan,
}

impl LocalKiller {
    pub fn new(db: Database, records: ProcessRecordStore, plan: TerminationPlan, sweep: TerminationPlan) -> Self {
        let lifecycle = LifecycleManager::new(Arc::new(db.clone()), records, plan);
        Self { db, lifecycle, sweep }
    }

    pub fn open(state_dir: &Path, options: &TerminationOptions) -> Result<Self> {
        let db = Database::open(state_dir.join("state.db"))?;
        let records = ProcessRecordStore::new(state_dir.join("pids"));
        let plan = TerminationPlan::for_platform(options)?;
        let sweep = TerminationPlan::tooling_sweep(&options.tooling_patterns)?;
        Ok(Self::new(db, records, plan, sweep))
    }

    /// Cancel a run and terminate its coordinator. A run missing from the
    /// database still gets its recorded process terminated.
    pub async fn kill(&self, run_id: &str) -> Result<KillOutcome> {
        match self.lifecycle.stop(run_id).await {
            Ok(report) => Ok(KillOutcome {
                run_id: run_id.to_string(),
                run_found: true,
                cancelled: !report.status_write.is_rejected(),
                record_found: report.record_found,
                terminated: report.termination.terminated,
            }),
            Err(Error::NotFound { .. }) => {
                debug!(run_id, "Run not in database, terminating by record only");
                let (report, record_found) = self.lifecycle.terminate(run_id).await;
                Ok(KillOutcome {
                    run_id: run_id.to_string(),
                    run_found: false,
                    cancelled: false,
                    record_found,
                    terminated: report.terminated,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Kill every run with a pid record or a non-final status, then sweep
    /// tooling processes. Returns the per-run outcomes and the swept pids.
    pub async fn kill_all(&self) -> Result<(Vec<KillOutcome>, Vec<u32>)> {
        let mut run_ids: BTreeSet<String> = self
            .lifecycle
            .records()
            .list()?
            .into_iter()
            .map(|record| record.run_id)
            .collect();
        run_ids.extend(self.db.list_active_runs()?.into_iter().map(|run| run.id));

        let mut outcomes = Vec::with_capacity(run_ids.len());
        for run_id in &run_ids {
            outcomes.push(self.kill(run_id).await?);
        }

        let report = self
            .sweep
            .execute(&TerminationTarget {
                run_id: "tooling".to_string(),
                record: None,
            })
            .await;
        let swept: Vec<u32> = report
            .attempts
            .into_iter()
            .flat_map(|attempt| match attempt.outcome {
                StrategyOutcome::Terminated { pids } => pids,
                _ => Vec::new(),
            })
            .collect();
        Ok((outcomes, swept))
    }
}

pub async fn execute(args: KillArgs, state_dir: &Path, format: OutputFormat) -> Result<()> {
    let options = TerminationOptions {
        dev_mode: args.dev,
        ..TerminationOptions::default()
    };
    let killer = LocalKiller::open(state_dir, &options)?;

    let outcomes = match &args.run_id {
        Some(run_id) if !args.all => vec![killer.kill(run_id).await?],
        _ => {
            let (outcomes, swept) = killer.kill_all().await?;
            if !swept.is_empty() {
                info!("Swept {} tooling process(es): {:?}", swept.len(), swept);
            }
            outcomes
        }
    };

    if format == OutputFormat::Table && outcomes.iter().any(|o| !o.run_found) {
        print_warning("Some runs were not in the local database; only their processes were targeted");
    }
    print_list(&outcomes, format);
    Ok(())
}
