use std::path::PathBuf;
use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use warden::config::WardenConfig;
use warden::lifecycle;

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = std::env::var("WARDEN_CONFIG").map(PathBuf::from).ok();
    let config = match WardenConfig::load(config_path.as_deref()).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("wardend: configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config);

    let daemon = match lifecycle::boot(config).await {
        Ok(daemon) => daemon,
        Err(e) => {
            error!(error = %e, "Fatal boot failure");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = daemon.start().await {
        error!(error = %e, "Failed to start scheduler");
        daemon.shutdown().await;
        return ExitCode::FAILURE;
    }

    wait_for_shutdown_signal().await;
    info!("Shutdown signal received");

    daemon.shutdown().await;
    ExitCode::SUCCESS
}

fn init_logging(config: &WardenConfig) {
    let filter = EnvFilter::try_from_env("WARDEN_LOG")
        .unwrap_or_else(|_| EnvFilter::new(config.log.level.clone()));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
