use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use feedloop::commands::{self, AppState, Cli};
use feedloop::config::Config;
use feedloop::db::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging; stdout belongs to command output, so log to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feedloop=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config_path = match cli.config {
        Some(path) => path,
        None => Config::default_path()?,
    };
    let config = Config::load(&config_path)?;

    // Open the store
    let db = Database::new(&config.database_url).await?;
    db.initialize().await?;

    let mut state = AppState {
        db,
        config,
        config_path,
    };
    commands::dispatch(&mut state, cli.command).await
}
