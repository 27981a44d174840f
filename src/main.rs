//! tgi-relay binary: start the inference backend, then serve `/generate`.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use tgi_relay::backend::{build_backend, wait_until_ready, Backend};
use tgi_relay::config::{Cli, Config};
use tgi_relay::metrics::RelayMetrics;
use tgi_relay::relay::{GenerationRelay, OpenAiClient, RelaySettings};
use tgi_relay::server::api::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "tgi_relay=debug,tower_http=debug"
    } else {
        "tgi_relay=info,tower_http=info"
    };

    let logs = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true);
    if cli.log_json {
        logs.json().init();
    } else {
        logs.init();
    }

    info!("tgi-relay v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let base = cli.profile.map(Config::for_profile).unwrap_or_default();
    let mut config = Config::load(&cli.config, base)?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }

    info!(
        model_id = config.model.model_id,
        store = %config.model.store_path.display(),
        backend = ?config.backend.kind,
        base_url = config.relay.base_url,
        "Configuration loaded"
    );

    // Launch the inference backend and wait for it.
    let backend = build_backend(&config).context("failed to prepare backend")?;
    backend.start().await.context("failed to start backend")?;

    if let Err(e) = wait_until_ready(
        backend.as_ref(),
        config.backend.readiness_timeout(),
        config.backend.health_interval(),
    )
    .await
    {
        error!(error = %e, "Backend did not become ready");
        stop_backend(backend.as_ref()).await;
        return Err(e.into());
    }

    // Build the relay against the ready endpoint.
    let client = OpenAiClient::new(&config.relay.base_url, &config.relay.api_key)?;
    let relay = GenerationRelay::new(
        Arc::new(client),
        RelaySettings {
            model_name: config.relay.model_name.clone(),
            default_system_prompt: config.relay.default_system_prompt.clone(),
        },
    );

    // Build application state.
    let state = Arc::new(AppState {
        relay,
        backend: backend.clone(),
        metrics: Arc::new(RelayMetrics::new()?),
        request_timeout: config.request_timeout(),
        max_concurrent_requests: config.server.max_concurrent_requests,
        start_time: Instant::now(),
    });

    // Build the HTTP router.
    let app = build_router(state);

    // Start the server.
    let listen_addr = config.server.listen.clone();
    info!(addr = listen_addr, "Starting server");

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    stop_backend(backend.as_ref()).await;
    served?;

    Ok(())
}

async fn stop_backend(backend: &dyn Backend) {
    if let Err(e) = backend.stop().await {
        warn!(backend = backend.name(), error = %e, "Failed to stop backend");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl-C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
