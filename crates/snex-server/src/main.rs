#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::Context;
use snex_core::{DeviceRegistry, DriverRegistry};
use snex_server::{logging, register_all, start, Config};

fn tokio_worker_threads_from_env() -> Option<usize> {
    let raw = std::env::var("SNEX_TOKIO_WORKER_THREADS").ok()?;
    match raw.parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            eprintln!(
                "warning: invalid SNEX_TOKIO_WORKER_THREADS value {raw:?} (expected a positive integer); using the Tokio default"
            );
            None
        }
    }
}

fn build_tokio_runtime() -> std::io::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(n) = tokio_worker_threads_from_env() {
        builder.worker_threads(n);
    }
    builder.enable_all().build()
}

fn main() -> anyhow::Result<()> {
    let config = Config::load();
    build_tokio_runtime()?.block_on(async_main(config))
}

async fn async_main(config: Config) -> anyhow::Result<()> {
    if let Some(path) = logging::init(&config.log_level) {
        tracing::info!(path = %path.display(), "logging to file");
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "snex-server starting");

    let drivers = Arc::new(DriverRegistry::new());
    register_all(&drivers).context("register drivers")?;
    let registry = Arc::new(DeviceRegistry::new(drivers));

    // A failed bind is the one startup error that must flip the exit code.
    let handle = start(&config.listen_addr(), registry.clone())
        .await
        .with_context(|| format!("bind {}", config.listen_addr()))?;
    tracing::info!(addr = %handle.local_addr(), "listening");

    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::warn!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = sigterm => {},
    }

    tracing::info!("shutdown signal received");
    handle.shutdown().await;
    registry.shutdown().await;
    Ok(())
}
