use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use playdeck_web::{AppState, DashboardConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = std::env::var("PLAYDECK_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| playdeck_common::default_state_dir().join("playdeck.toml"));

    let mut config = DashboardConfig::load(&config_path)?;
    config.apply_env();
    std::fs::create_dir_all(&config.state_dir)?;
    std::fs::create_dir_all(config.public_dir.join("test-artifacts"))?;

    info!(
        "Starting Playdeck dashboard v{} on http://{} (config: {:?})",
        playdeck_common::VERSION,
        config.listen,
        config_path
    );

    let state = AppState::open(config, Some(config_path))?;
    let orphaned = state.lifecycle.records().list()?.len();
    if orphaned > 0 {
        info!("{} coordinator record(s) left from a previous session", orphaned);
    }

    playdeck_web::serve(Arc::new(state)).await
}
