//! Layered termination of a run's coordinator process
//!
//! Strategies run in order until one reports the process gone:
//! the recorded pid, then a command-line search for the run id, then (dev
//! only) a sweep of Playwright tooling processes. Windows replaces the whole
//! chain with one `taskkill /T /F`.

use super::platform::{descendants, lineage, ProcessControl, ProcessInfo, Signal};
use super::record::ProcessRecord;
use crate::{Error, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default patterns for the tooling sweep.
pub const DEFAULT_TOOLING_PATTERNS: &[&str] = &[
    r"playwright.*test-server",
    r"@playwright/test.*test-server",
    r"Google Chrome for Testing.*playwright",
];

/// What to terminate.
#[derive(Debug, Clone)]
pub struct TerminationTarget {
    pub run_id: String,
    pub record: Option<ProcessRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StrategyOutcome {
    /// The matched processes are confirmed gone.
    Terminated { pids: Vec<u32> },
    /// Nothing matched this strategy.
    NotFound,
    /// Something matched but could not be confirmed dead.
    Failed { reason: String },
}

#[async_trait]
pub trait TerminationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn terminate(&self, target: &TerminationTarget) -> StrategyOutcome;
}

/// Delays used while escalating from SIGTERM to SIGKILL.
#[derive(Debug, Clone, Copy)]
pub struct EscalationTiming {
    /// How long a process gets to exit after SIGTERM.
    pub grace: Duration,
    /// How long to wait for the process to disappear after SIGKILL.
    pub settle: Duration,
    pub poll: Duration,
}

impl Default for EscalationTiming {
    fn default() -> Self {
        Self {
            grace: Duration::from_millis(1000),
            settle: Duration::from_millis(500),
            poll: Duration::from_millis(100),
        }
    }
}

async fn snapshot(control: &Arc<dyn ProcessControl>) -> std::io::Result<Vec<ProcessInfo>> {
    let control = Arc::clone(control);
    tokio::task::spawn_blocking(move || control.list_processes())
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?
}

async fn wait_for_exit(
    control: &Arc<dyn ProcessControl>,
    pid: u32,
    within: Duration,
    poll: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if !control.is_alive(pid) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}

/// Signal the group led by `pid`, falling back to the process itself.
fn signal_tree_root(control: &Arc<dyn ProcessControl>, pid: u32, signal: Signal) {
    match control.signal_group(pid, signal) {
        Ok(()) => debug!("Sent {} to process group {}", signal, pid),
        Err(group_err) => match control.signal(pid, signal) {
            Ok(()) => debug!("Sent {} to process {}", signal, pid),
            Err(e) => debug!(
                "Could not send {} to {} (group: {}, process: {})",
                signal, pid, group_err, e
            ),
        },
    }
}

fn signal_all(control: &Arc<dyn ProcessControl>, pids: &[u32], signal: Signal) {
    for pid in pids {
        if let Err(e) = control.signal(*pid, signal) {
            debug!("Could not send {} to child {}: {}", signal, pid, e);
        }
    }
}

/// SIGTERM the process and its descendants, wait, then SIGKILL whatever is
/// left. Returns whether `pid` is gone.
async fn escalate(control: &Arc<dyn ProcessControl>, pid: u32, timing: &EscalationTiming) -> bool {
    let children = snapshot(control)
        .await
        .map(|table| descendants(pid, &table))
        .unwrap_or_default();

    signal_tree_root(control, pid, Signal::Terminate);
    signal_all(control, &children, Signal::Terminate);
    if wait_for_exit(control, pid, timing.grace, timing.poll).await {
        signal_all(control, &children, Signal::Kill);
        return true;
    }

    debug!("Process {} still running after {:?}, forcing", pid, timing.grace);
    signal_tree_root(control, pid, Signal::Kill);
    signal_all(control, &children, Signal::Kill);
    wait_for_exit(control, pid, timing.settle, timing.poll).await
}

fn is_protected(pid: u32, protected: &HashSet<u32>) -> bool {
    pid <= 1 || protected.contains(&pid)
}

// ============================================================================
// Strategies
// ============================================================================

/// Terminate the pid stored in the run's [`ProcessRecord`].
pub struct RecordedProcessStrategy {
    control: Arc<dyn ProcessControl>,
    timing: EscalationTiming,
}

impl RecordedProcessStrategy {
    pub fn new(control: Arc<dyn ProcessControl>, timing: EscalationTiming) -> Self {
        Self { control, timing }
    }
}

#[async_trait]
impl TerminationStrategy for RecordedProcessStrategy {
    fn name(&self) -> &'static str {
        "recorded-process"
    }

    async fn terminate(&self, target: &TerminationTarget) -> StrategyOutcome {
        let Some(record) = &target.record else {
            return StrategyOutcome::NotFound;
        };
        let pid = record.pid;

        let protected = HashSet::from([self.control.current_pid()]);
        if is_protected(pid, &protected) {
            return StrategyOutcome::Failed {
                reason: format!("refusing to signal pid {}", pid),
            };
        }
        if !self.control.is_alive(pid) {
            return StrategyOutcome::NotFound;
        }

        if escalate(&self.control, pid, &self.timing).await {
            StrategyOutcome::Terminated { pids: vec![pid] }
        } else {
            StrategyOutcome::Failed {
                reason: format!("process {} survived SIGKILL", pid),
            }
        }
    }
}

/// Terminate every process whose command line mentions the run id.
pub struct CommandLineSearchStrategy {
    control: Arc<dyn ProcessControl>,
    timing: EscalationTiming,
}

impl CommandLineSearchStrategy {
    pub fn new(control: Arc<dyn ProcessControl>, timing: EscalationTiming) -> Self {
        Self { control, timing }
    }
}

#[async_trait]
impl TerminationStrategy for CommandLineSearchStrategy {
    fn name(&self) -> &'static str {
        "command-line-search"
    }

    async fn terminate(&self, target: &TerminationTarget) -> StrategyOutcome {
        if target.run_id.is_empty() {
            return StrategyOutcome::NotFound;
        }
        let table = match snapshot(&self.control).await {
            Ok(table) => table,
            Err(e) => {
                return StrategyOutcome::Failed {
                    reason: format!("could not list processes: {}", e),
                }
            }
        };

        let protected = lineage(self.control.current_pid(), &table);
        let matches: Vec<u32> = table
            .iter()
            .filter(|p| p.command.contains(&target.run_id) && !is_protected(p.pid, &protected))
            .map(|p| p.pid)
            .collect();
        if matches.is_empty() {
            return StrategyOutcome::NotFound;
        }

        let mut survivors = Vec::new();
        for pid in &matches {
            if !escalate(&self.control, *pid, &self.timing).await {
                survivors.push(*pid);
            }
        }

        if survivors.is_empty() {
            StrategyOutcome::Terminated { pids: matches }
        } else {
            StrategyOutcome::Failed {
                reason: format!("processes still running: {:?}", survivors),
            }
        }
    }
}

/// Kill every Playwright tooling process on the machine.
///
/// Only safe where one run executes at a time, so it is enabled in dev
/// mode only.
pub struct ToolingSweepStrategy {
    control: Arc<dyn ProcessControl>,
    patterns: Vec<Regex>,
}

impl ToolingSweepStrategy {
    pub fn new(control: Arc<dyn ProcessControl>, patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p)
                    .map_err(|e| Error::InvalidConfig(format!("tooling pattern '{}': {}", p, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { control, patterns })
    }

    pub fn with_defaults(control: Arc<dyn ProcessControl>) -> Self {
        let patterns = DEFAULT_TOOLING_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();
        Self { control, patterns }
    }
}

#[async_trait]
impl TerminationStrategy for ToolingSweepStrategy {
    fn name(&self) -> &'static str {
        "tooling-sweep"
    }

    async fn terminate(&self, _target: &TerminationTarget) -> StrategyOutcome {
        let table = match snapshot(&self.control).await {
            Ok(table) => table,
            Err(e) => {
                return StrategyOutcome::Failed {
                    reason: format!("could not list processes: {}", e),
                }
            }
        };

        let protected = lineage(self.control.current_pid(), &table);
        let mut killed = Vec::new();
        for process in &table {
            if is_protected(process.pid, &protected)
                || !self.patterns.iter().any(|re| re.is_match(&process.command))
            {
                continue;
            }
            match self.control.signal(process.pid, Signal::Kill) {
                Ok(()) => killed.push(process.pid),
                Err(e) => debug!("Could not kill tooling process {}: {}", process.pid, e),
            }
            signal_all(&self.control, &descendants(process.pid, &table), Signal::Kill);
        }

        if killed.is_empty() {
            StrategyOutcome::NotFound
        } else {
            warn!("Tooling sweep killed {} processes", killed.len());
            StrategyOutcome::Terminated { pids: killed }
        }
    }
}

/// Windows tree kill through `taskkill /pid <pid> /T /F`.
#[cfg(windows)]
pub struct TaskkillStrategy;

#[cfg(windows)]
#[async_trait]
impl TerminationStrategy for TaskkillStrategy {
    fn name(&self) -> &'static str {
        "taskkill"
    }

    async fn terminate(&self, target: &TerminationTarget) -> StrategyOutcome {
        let Some(record) = &target.record else {
            return StrategyOutcome::NotFound;
        };
        let output = tokio::process::Command::new("taskkill")
            .args(["/pid", &record.pid.to_string(), "/T", "/F"])
            .output()
            .await;
        match output {
            Ok(out) if out.status.success() => StrategyOutcome::Terminated {
                pids: vec![record.pid],
            },
            Ok(out) => StrategyOutcome::Failed {
                reason: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            },
            Err(e) => StrategyOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }
}

// ============================================================================
// Plan
// ============================================================================

/// Settings for building the platform's termination plan.
#[derive(Debug, Clone)]
pub struct TerminationOptions {
    pub timing: EscalationTiming,
    /// Enables the tooling sweep.
    pub dev_mode: bool,
    pub tooling_patterns: Vec<String>,
}

impl Default for TerminationOptions {
    fn default() -> Self {
        Self {
            timing: EscalationTiming::default(),
            dev_mode: false,
            tooling_patterns: DEFAULT_TOOLING_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyAttempt {
    pub strategy: &'static str,
    #[serde(flatten)]
    pub outcome: StrategyOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TerminationReport {
    pub attempts: Vec<StrategyAttempt>,
    /// Whether some strategy confirmed the process gone.
    pub terminated: bool,
}

/// Ordered list of strategies, stopping at the first success.
pub struct TerminationPlan {
    strategies: Vec<Box<dyn TerminationStrategy>>,
}

impl TerminationPlan {
    pub fn new(strategies: Vec<Box<dyn TerminationStrategy>>) -> Self {
        Self { strategies }
    }

    /// The strategy chain for the current OS.
    #[cfg(unix)]
    pub fn for_platform(options: &TerminationOptions) -> Result<Self> {
        let control: Arc<dyn ProcessControl> = Arc::new(super::platform::UnixProcessControl);
        Self::with_control(control, options)
    }

    #[cfg(windows)]
    pub fn for_platform(_options: &TerminationOptions) -> Result<Self> {
        Ok(Self::new(vec![Box::new(TaskkillStrategy)]))
    }

    /// The signal-based chain over an arbitrary process table.
    pub fn with_control(
        control: Arc<dyn ProcessControl>,
        options: &TerminationOptions,
    ) -> Result<Self> {
        let mut strategies: Vec<Box<dyn TerminationStrategy>> = vec![
            Box::new(RecordedProcessStrategy::new(control.clone(), options.timing)),
            Box::new(CommandLineSearchStrategy::new(control.clone(), options.timing)),
        ];
        if options.dev_mode {
            strategies.push(Box::new(ToolingSweepStrategy::new(
                control,
                &options.tooling_patterns,
            )?));
        }
        Ok(Self::new(strategies))
    }

    /// Only the tooling sweep, for clearing leftovers once every run is stopped.
    #[cfg(unix)]
    pub fn tooling_sweep(patterns: &[String]) -> Result<Self> {
        let control: Arc<dyn ProcessControl> = Arc::new(super::platform::UnixProcessControl);
        Ok(Self::new(vec![Box::new(ToolingSweepStrategy::new(control, patterns)?)]))
    }

    #[cfg(windows)]
    pub fn tooling_sweep(_patterns: &[String]) -> Result<Self> {
        Ok(Self::new(Vec::new()))
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub async fn execute(&self, target: &TerminationTarget) -> TerminationReport {
        let mut report = TerminationReport::default();
        for strategy in &self.strategies {
            let outcome = strategy.terminate(target).await;
            match &outcome {
                StrategyOutcome::Terminated { pids } => info!(
                    run_id = %target.run_id,
                    "{} terminated {:?}",
                    strategy.name(),
                    pids
                ),
                StrategyOutcome::NotFound => {
                    debug!(run_id = %target.run_id, "{} found nothing", strategy.name())
                }
                StrategyOutcome::Failed { reason } => {
                    warn!(run_id = %target.run_id, "{} failed: {}", strategy.name(), reason)
                }
            }
            let done = matches!(outcome, StrategyOutcome::Terminated { .. });
            report.attempts.push(StrategyAttempt {
                strategy: strategy.name(),
                outcome,
            });
            if done {
                report.terminated = true;
                break;
            }
        }
        report
    }
}
