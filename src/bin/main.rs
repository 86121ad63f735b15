use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use lti_bridge::{AppConfig, AppState};
use tokio_util::sync::CancellationToken;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lti-bridge")]
#[command(about = "LTI 1.3 tool bridge: OIDC login, launch validation and service tokens")]
struct Cli {
    #[command(flatten)]
    config: AppConfig,
}

/// How often expired nonces and states are swept in the background.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("lti_bridge=info".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();
    let config = cli.config;

    let shutdown = CancellationToken::new();
    let state = AppState::build(&config, shutdown.clone())?;
    let sweepers = state.spawn_sweepers(SWEEP_INTERVAL);

    let app = lti_bridge::api::create_router(state);
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!("Listening on http://{}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // Make sure sweepers stop even if serve returned for another reason.
    shutdown.cancel();
    for sweeper in sweepers {
        sweeper.await?;
    }
    info!("Server shutdown complete");

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutting down server");
    shutdown.cancel();
}
