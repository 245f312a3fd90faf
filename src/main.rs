use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use eudamed_enrichment::cli::{execute, Cli};
use eudamed_enrichment::config::Config;
use eudamed_enrichment::db::Database;
use eudamed_enrichment::db_storage::PgStore;
use eudamed_enrichment::stages::PipelineContext;
use eudamed_enrichment::store::RecordStore;

/// Entry point of the enrichment CLI.
///
/// Sets up logging, loads the configuration, connects to the store, builds
/// the external clients once and runs the requested subcommand. Fatal
/// errors end the process with a non-zero status.
#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "eudamed_enrichment=debug"
    } else {
        "eudamed_enrichment=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");

    let store: Arc<dyn RecordStore> = Arc::new(PgStore::new(db.pool));
    let ctx = PipelineContext::new(&config, store)?;

    match execute(cli.command, &ctx).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            tracing::error!("Run aborted: {}", e);
            eprintln!("Error: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}
