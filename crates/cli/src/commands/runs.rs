//! Run Commands
//!
//! `status`, `runs` and `stop` go through the dashboard API.

use anyhow::Result;
use serde::Serialize;

use crate::client::DashboardClient;
use crate::output::{
    format_duration, format_millis, print_item, print_json, print_list, print_success,
    run_status_label, test_status_label, OutputFormat, TableDisplay,
};
use playdeck_common::{Run, TestResult};

/// Run display wrapper for serialization
#[derive(Serialize)]
pub struct RunDisplay {
    #[serde(flatten)]
    pub run: Run,
}

impl TableDisplay for RunDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Suite", "Status", "Passed", "Failed", "Duration", "Created"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.run.id.clone(),
            self.run.suite_id.clone(),
            run_status_label(self.run.status),
            self.run.tests_passed.to_string(),
            self.run.tests_failed.to_string(),
            format_duration(self.run.duration_ms),
            format_millis(Some(self.run.created_at)),
        ]
    }
}

#[derive(Serialize)]
pub struct ResultDisplay {
    #[serde(flatten)]
    pub result: TestResult,
}

impl TableDisplay for ResultDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Test", "File", "Status", "Duration", "Error"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.result.test_name.clone(),
            self.result.test_file.clone(),
            test_status_label(self.result.status),
            format_duration(self.result.duration_ms),
            self.result
                .error_message
                .as_deref()
                .and_then(|message| message.lines().next())
                .unwrap_or("")
                .to_string(),
        ]
    }
}

/// Print a run's status, with per-test results when `details` is set.
pub async fn status(client: &DashboardClient, run_id: &str, details: bool, format: OutputFormat) -> Result<()> {
    if !details {
        let status = client.run_status(run_id).await?;
        match format {
            OutputFormat::Json => print_json(&serde_json::json!({"runId": run_id, "status": status})),
            OutputFormat::Table => println!("{}: {}", run_id, run_status_label(status)),
        }
        return Ok(());
    }

    let (run, results) = client.get_run(run_id).await?;
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({"data": run, "results": results})),
        OutputFormat::Table => {
            print_item(&RunDisplay { run }, format);
            let results: Vec<ResultDisplay> =
                results.into_iter().map(|result| ResultDisplay { result }).collect();
            print_list(&results, format);
        }
    }
    Ok(())
}

pub async fn list(client: &DashboardClient, limit: usize, format: OutputFormat) -> Result<()> {
    let runs = client.list_runs(limit).await?;
    let displays: Vec<RunDisplay> = runs.into_iter().map(|run| RunDisplay { run }).collect();
    print_list(&displays, format);
    Ok(())
}

pub async fn stop(client: &DashboardClient, run_id: &str, format: OutputFormat) -> Result<()> {
    let response = client.stop(run_id).await?;
    match format {
        OutputFormat::Json => print_json(&response),
        OutputFormat::Table => print_success(&format!("{}: {}", run_id, response.message)),
    }
    Ok(())
}
