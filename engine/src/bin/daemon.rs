//! suvd: supervisor daemon
//!
//! Loads `programs.yml`, starts the declared programs and serves the REST API
//! until SIGTERM or SIGINT, then stops every program before exiting.

#[path = "daemon/config.rs"]
mod config;

use anyhow::{anyhow, Context, Result};
use config::DaemonConfig;
use std::sync::Arc;
use suv_engine::adapters::rest::{build_router, serve_on_tcp};
use suv_engine::domain::EventBus;
use suv_engine::infrastructure::{logging, TokioProcessExecutor, YamlProgramStore};
use suv_engine::Supervisor;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = DaemonConfig::from_env();
    logging::init(&config.log_level);
    let addr = config.validate().map_err(|e| anyhow!(e))?;

    info!(
        config_dir = %config.config_dir.display(),
        rest_addr = %addr,
        "starting suvd"
    );

    let store = Arc::new(YamlProgramStore::new(config.programs_file()));
    let executor = Arc::new(TokioProcessExecutor::new());
    let supervisor = Supervisor::new(store, executor, EventBus::new());

    supervisor
        .load()
        .await
        .with_context(|| format!("loading {}", config.programs_file().display()))?;

    let (stop_tx, mut stop_rx) = watch::channel(false);
    let server = tokio::spawn(serve_on_tcp(
        addr,
        build_router(supervisor.clone()),
        async move {
            let _ = stop_rx.wait_for(|stop| *stop).await;
        },
    ));

    let result = tokio::select! {
        signal = shutdown_signal() => signal,
        served = server => match served {
            Ok(Ok(())) => Err(anyhow!("REST server exited unexpectedly")),
            Ok(Err(e)) => Err(anyhow!(e).context("REST server failed")),
            Err(e) => Err(anyhow!(e).context("REST server task failed")),
        },
    };

    let _ = stop_tx.send(true);
    supervisor.shutdown().await;
    if let Err(ref e) = result {
        error!(error = %e, "suvd exiting with error");
    } else {
        info!("suvd stopped");
    }
    result
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::select! {
        _ = terminate.recv() => info!("received SIGTERM"),
        ctrl_c = tokio::signal::ctrl_c() => {
            ctrl_c.context("waiting for SIGINT")?;
            info!("received SIGINT");
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("received Ctrl-C");
    Ok(())
}
