use std::process::ExitCode;
use std::sync::Arc;

use station_feed::backend::{DataBackend, MockBackend, SupabaseBackend};
use station_feed::board::render_board;
use station_feed::config::{AppConfig, BackendSource, ConfigError};
use station_feed::feed::{ChannelRegistry, StationFeed};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Configuration problems are fatal at startup
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match &config.source {
        BackendSource::Hosted(backend_config) => match SupabaseBackend::new(backend_config) {
            Ok(backend) => run(backend, &config).await,
            Err(e) => {
                eprintln!("Failed to create backend client: {e}");
                return ExitCode::FAILURE;
            }
        },
        BackendSource::Fixture(path) => match MockBackend::from_json_file(path) {
            Ok(backend) => {
                info!(path = %path.display(), "Serving stations from fixture");
                run(backend, &config).await
            }
            Err(e) => {
                eprintln!("Configuration error: {}", ConfigError::Fixture(e));
                return ExitCode::FAILURE;
            }
        },
    }

    ExitCode::SUCCESS
}

/// Mount one feed, print the board on every change, stop on Ctrl-C.
async fn run<B: DataBackend>(backend: B, config: &AppConfig) {
    info!(
        route = %config.route,
        policy = %config.merge_policy,
        "Starting station feed"
    );

    let registry = Arc::new(ChannelRegistry::new());
    let mut feed = StationFeed::new(backend, registry, config.route, config.merge_policy);

    let mut updates = feed.watch();
    let printer = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let board = render_board(&updates.borrow_and_update());
            println!("{board}");
        }
    });

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C, running until killed");
            std::future::pending::<()>().await;
        }
    };
    feed.run(shutdown).await;

    // Dropping the feed closes the watch channel, which ends the printer.
    drop(feed);
    let _ = printer.await;
}
