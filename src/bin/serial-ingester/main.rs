mod args;

use std::{future, io, process::ExitCode};

use anyhow::{Context as _, Result, anyhow};
use args::Args;
use clap::Parser as _;
use sensor_ingest::{
    db::{ensure_schema, new_pool},
    ingest::Ingestor,
    link::{SerialOpener, SerialPortDiscovery},
};
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!("{e:#}");
        return ExitCode::from(1);
    }

    ExitCode::from(0)
}

async fn run() -> Result<()> {
    let config = Args::parse().into_config();

    let pool = new_pool(&config.database)
        .await
        .context("failed to connect to database")?;
    ensure_schema(&pool)
        .await
        .context("failed to prepare database schema")?;

    tracing::info!(
        database = %config.database.display(),
        baud_rate = config.baud_rate,
        batch_size = config.batch_size,
        stall_timeout = ?config.stall_timeout,
        "starting serial ingestion"
    );

    let discovery = SerialPortDiscovery::with_ports(config.ports.clone());
    let opener = SerialOpener::new(config.baud_rate, config.effective_read_timeout());
    let ingestor = Ingestor::new(discovery, opener, pool, &config);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let mut task = tokio::spawn(ingestor.run(async move {
        let _ = shutdown_rx.await;
    }));

    tokio::select! {
        () = shutdown_signal() => {
            let _ = shutdown_tx.send(());
            task.await.context("ingestion task failed during shutdown")?;
            Ok(())
        }
        joined = &mut task => match joined {
            // `run` only returns after a shutdown request, which has not been sent.
            Ok(()) => Err(anyhow!("ingestion task exited unexpectedly")),
            Err(e) => Err(anyhow!(e).context("ingestion task panicked")),
        },
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let terminate = async {
        signal(SignalKind::terminate())?.recv().await;
        Ok::<_, io::Error>(())
    };

    tokio::select! {
        () = signal_or_pending(tokio::signal::ctrl_c(), "Ctrl-C") => {}
        () = signal_or_pending(terminate, "SIGTERM") => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    signal_or_pending(tokio::signal::ctrl_c(), "Ctrl-C").await;
}

/// Resolves once `listener` reports its signal. A listener that cannot be
/// registered is logged and never resolves, so ingestion keeps running.
async fn signal_or_pending<F>(listener: F, name: &str)
where
    F: Future<Output = io::Result<()>>,
{
    if let Err(err) = listener.await {
        tracing::error!("failed to listen for {name}: {err}");
        future::pending::<()>().await;
    }
}
