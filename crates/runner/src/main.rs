//! playdeck-runner
//!
//! Launched by the dashboard as `playdeck-runner <RUN_ID> [API_URL] [CONFIG_JSON]`.

use std::path::PathBuf;

use clap::Parser;
use playdeck_common::{FolderTable, RunStatus, RunStore, RunUpdate};
use playdeck_runner::config::parse_payload;
use playdeck_runner::{Coordinator, CoordinatorConfig, HttpRunStore, RunPlan};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "playdeck-runner")]
#[command(about = "Run a Playdeck test run and report results to the dashboard")]
#[command(version)]
struct Args {
    /// Run to execute
    run_id: String,

    /// Dashboard base URL
    #[arg(default_value = "http://localhost:3000")]
    api_url: String,

    /// JSON with selectedTests, externalSource and suiteName
    config_json: Option<String>,

    /// Bundled tests directory
    #[arg(long, env = "PLAYDECK_TESTS_DIR", default_value = "tests")]
    tests_dir: PathBuf,

    /// Cache directory for cloned repositories
    #[arg(long, env = "PLAYDECK_REPO_CACHE")]
    cache_dir: Option<PathBuf>,

    /// Dashboard public directory for videos
    #[arg(long, env = "PLAYDECK_PUBLIC_DIR", default_value = "public")]
    public_dir: PathBuf,

    /// Command used to run a single test
    #[arg(long, env = "PLAYDECK_PLAYWRIGHT", default_value = "npx playwright test")]
    playwright: String,

    /// File suffix identifying test files
    #[arg(long, env = "PLAYDECK_TEST_SUFFIX", default_value = playdeck_common::DEFAULT_TEST_SUFFIX)]
    test_suffix: String,

    /// TOML file whose [folders] table maps suite names to folders
    #[arg(long, env = "PLAYDECK_FOLDERS")]
    folders: Option<PathBuf>,

    /// Branch to clone for external sources
    #[arg(long, env = "PLAYDECK_BRANCH", default_value = "main")]
    branch: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn into_config(self) -> anyhow::Result<CoordinatorConfig> {
        let defaults = CoordinatorConfig::default();
        let folders = match &self.folders {
            Some(path) => FolderTable::load(path)?,
            None => FolderTable::bundled(),
        };
        Ok(CoordinatorConfig {
            payload: parse_payload(self.config_json.as_deref())?,
            run_id: self.run_id,
            api_url: self.api_url,
            tests_dir: self.tests_dir,
            cache_dir: self.cache_dir.unwrap_or(defaults.cache_dir),
            public_dir: self.public_dir,
            playwright_command: self.playwright,
            test_suffix: self.test_suffix,
            branch: self.branch,
            folders,
        })
    }
}

/// Mark the run failed when the coordinator cannot be set up at all.
async fn report_setup_failure(run_id: &str, api_url: &str, e: &anyhow::Error) {
    let update = RunUpdate::status(RunStatus::Failed).with_logs(format!("Error: {:#}", e));
    let result = match HttpRunStore::new(api_url) {
        Ok(store) => store.update_run(run_id, update).await.map(|_| ()),
        Err(store_err) => Err(store_err),
    };
    if let Err(report_err) = result {
        warn!(run_id, "Could not report setup failure: {}", report_err);
    }
}

fn build(args: Args) -> anyhow::Result<(CoordinatorConfig, Coordinator)> {
    let config = args.into_config()?;
    let coordinator = Coordinator::from_config(&config)?;
    Ok((config, coordinator))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let run_id = args.run_id.clone();
    let api_url = args.api_url.clone();
    let (config, coordinator) = match build(args) {
        Ok(built) => built,
        Err(e) => {
            error!(run_id = %run_id, "Coordinator setup failed: {:#}", e);
            report_setup_failure(&run_id, &api_url, &e).await;
            std::process::exit(1);
        }
    };
    info!(
        run_id = %config.run_id,
        "playdeck-runner v{} reporting to {}",
        env!("CARGO_PKG_VERSION"),
        config.api_url
    );

    let plan = RunPlan::new(config.run_id.clone(), config.payload.clone());

    match coordinator.execute(&plan).await {
        Ok(summary) => {
            info!(
                run_id = %summary.run_id,
                "Finished: {} ({} passed, {} failed)",
                summary.status,
                summary.passed,
                summary.failed
            );
            Ok(())
        }
        Err(e) => {
            error!(run_id = %plan.run_id, "Coordinator error: {}", e);
            std::process::exit(1);
        }
    }
}
