use std::{future::Future, io, pin::Pin};

use anyhow::{Context as _, Result};
use sqlx::SqlitePool;
use tokio::time::Instant;

use crate::{
    batch::BatchWriter,
    config::IngestConfig,
    db,
    link::{ConnectionManager, LinkOpener, PortDiscovery, StallWatchdog},
    sensor::{FrameParser, IngestClock, ParseError},
};

/// Why the read loop let go of a link.
#[derive(Debug)]
pub enum LinkEnd {
    Stalled,
    Lost(io::Error),
    Shutdown,
}

/// The read, parse, batch and flush loop, supervised by the connection manager.
pub struct Ingestor<D, O> {
    manager: ConnectionManager<D, O>,
    watchdog: StallWatchdog,
    parser: FrameParser,
    writer: BatchWriter,
    pool: SqlitePool,
}

impl<D: PortDiscovery, O: LinkOpener> Ingestor<D, O> {
    pub fn new(discovery: D, opener: O, pool: SqlitePool, config: &IngestConfig) -> Self {
        Self {
            manager: ConnectionManager::new(discovery, opener, config),
            watchdog: StallWatchdog::new(config.stall_timeout),
            parser: FrameParser::new(IngestClock::new(config.timezone)),
            writer: BatchWriter::new(config.batch_size),
            pool,
        }
    }

    /// Ingests until `shutdown` resolves, then closes the link and the store.
    ///
    /// Shutdown is only observed while waiting for a link or for the next
    /// frame, never in the middle of a flush.
    pub async fn run<F: Future<Output = ()>>(mut self, shutdown: F) {
        tokio::pin!(shutdown);

        if let Err(err) = self.resume_clock().await {
            tracing::warn!("failed to resume ingestion clock: {err:#}");
        }

        let mut reconnecting = false;
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                () = self.establish(reconnecting) => {}
            }

            match self.pump(shutdown.as_mut()).await {
                LinkEnd::Shutdown => break,
                LinkEnd::Stalled => tracing::warn!(
                    timeout = ?self.watchdog.stall_timeout(),
                    "no readings within stall timeout, reconnecting"
                ),
                LinkEnd::Lost(err) => tracing::warn!("serial link lost: {err}, reconnecting"),
            }
            reconnecting = true;
        }

        tracing::info!("shutdown requested");
        self.release().await;
    }

    async fn establish(&mut self, reconnecting: bool) {
        if reconnecting {
            self.manager.reconnect().await;
        } else {
            self.manager.connect().await;
        }
    }

    /// Keeps stored `real_time` values non-decreasing across restarts.
    async fn resume_clock(&mut self) -> Result<()> {
        if let Some(last) = db::last_reading(&self.pool).await? {
            self.parser
                .clock_mut()
                .seed(&last.real_time)
                .context("failed to seed clock from last stored reading")?;
        }

        Ok(())
    }

    async fn pump<F: Future<Output = ()>>(&mut self, mut shutdown: Pin<&mut F>) -> LinkEnd {
        loop {
            // Only reachable while connected, so a stall is never raised mid-reconnect.
            if let Some(last_reading_at) = self.manager.last_reading_at()
                && self.watchdog.is_stalled(last_reading_at, Instant::now())
            {
                return LinkEnd::Stalled;
            }

            tokio::select! {
                biased;
                () = &mut shutdown => return LinkEnd::Shutdown,
                line = self.manager.read_line() => match line {
                    Ok(Some(raw)) => self.accept(&raw).await,
                    Ok(None) => {}
                    Err(err) => return LinkEnd::Lost(err),
                },
            }
        }
    }

    async fn accept(&mut self, raw: &[u8]) {
        tracing::debug!(frame = %String::from_utf8_lossy(raw).trim_end(), "frame received");

        match self.parser.parse(raw) {
            Ok(reading) => {
                self.manager.mark_reading(Instant::now());
                self.writer.offer(reading);
                if self.writer.should_flush() {
                    self.flush().await;
                }
            }
            Err(ParseError::Empty) => tracing::debug!("skipping empty frame"),
            Err(err) => tracing::warn!("dropping frame: {err}"),
        }
    }

    async fn flush(&mut self) {
        match self.writer.flush(&self.pool).await {
            Ok(committed) => {
                tracing::info!(rows = committed.rows, "readings committed");
                if let Some(last) = committed.last {
                    tracing::debug!(?last, "last entry in the database");
                }
            }
            Err(err) => tracing::warn!(
                pending = self.writer.pending().len(),
                "{err:#}, keeping batch for the next flush"
            ),
        }
    }

    async fn release(&mut self) {
        if !self.writer.is_empty() {
            self.flush().await;
        }

        self.manager.disconnect().await;
        self.pool.close().await;
        tracing::info!("ingestion stopped");
    }
}
