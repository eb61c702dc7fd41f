//! Playdeck CLI - Main Entry Point

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use playdeck_cli::client::DashboardClient;
use playdeck_cli::commands::{discover, kill, runs};
use playdeck_cli::output::{self, OutputFormat};

/// Playdeck - Playwright run orchestration
#[derive(Parser)]
#[command(name = "playdeck")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Dashboard address
    #[arg(long, env = "PLAYDECK_API_URL", default_value = "http://localhost:3000", global = true)]
    api_url: String,

    /// User id sent in the x-playdeck-user header
    #[arg(long, env = "PLAYDECK_USER", global = true)]
    user: Option<String>,

    /// Local state directory (database and pid records)
    #[arg(long, env = "PLAYDECK_STATE_DIR", global = true)]
    state_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "table", global = true)]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the tests declared under a directory
    Discover(discover::DiscoverArgs),

    /// Show a run's status
    Status {
        /// Run ID
        run_id: String,

        /// Include per-test results (needs --user)
        #[arg(long)]
        details: bool,
    },

    /// List your recent runs
    Runs {
        /// Maximum number of runs
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Ask the dashboard to stop a run
    Stop {
        /// Run ID
        run_id: String,
    },

    /// Stop coordinators using the local state directory
    Kill(kill::KillArgs),

    /// Check dashboard health
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let state_dir = cli
        .state_dir
        .clone()
        .unwrap_or_else(playdeck_common::default_state_dir);

    let result = match cli.command {
        Commands::Discover(args) => discover::execute(args, cli.format),
        Commands::Kill(args) => kill::execute(args, &state_dir, cli.format).await,
        Commands::Status { run_id, details } => {
            let client = DashboardClient::new(&cli.api_url, cli.user)?;
            runs::status(&client, &run_id, details, cli.format).await
        }
        Commands::Runs { limit } => {
            let client = DashboardClient::new(&cli.api_url, cli.user)?;
            runs::list(&client, limit, cli.format).await
        }
        Commands::Stop { run_id } => {
            let client = DashboardClient::new(&cli.api_url, cli.user)?;
            runs::stop(&client, &run_id, cli.format).await
        }
        Commands::Health => {
            let client = DashboardClient::new(&cli.api_url, cli.user)?;
            if client.health_check().await {
                output::print_success(&format!("Dashboard is running at {}", cli.api_url));
                Ok(())
            } else {
                output::print_error(&format!("Dashboard is not responding at {}", cli.api_url));
                std::process::exit(1);
            }
        }
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}
