use std::{io, time::Duration};

use thiserror::Error;
use tokio::time::{Instant, sleep};

use crate::{
    config::IngestConfig,
    link::{Link, LinkOpener, PortDiscovery, PortId, Release},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting { port: PortId, attempt: u32 },
    Connected { port: PortId, last_reading_at: Instant },
    Reconnecting,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("no candidate serial ports found")]
    DiscoveryEmpty,

    #[error("no link available after trying {ports} port(s)")]
    NoLinkAvailable { ports: usize },
}

/// Sole owner of the serial link and of [`ConnectionState`].
pub struct ConnectionManager<D, O> {
    discovery: D,
    opener: O,
    max_attempts_per_port: u32,
    attempt_delay: Duration,
    sweep_delay: Duration,
    settle_delay: Duration,
    state: ConnectionState,
    link: Option<Box<dyn Link>>,
}

impl<D: PortDiscovery, O: LinkOpener> ConnectionManager<D, O> {
    pub fn new(discovery: D, opener: O, config: &IngestConfig) -> Self {
        Self {
            discovery,
            opener,
            max_attempts_per_port: config.max_attempts_per_port.max(1),
            attempt_delay: config.attempt_delay,
            sweep_delay: config.sweep_delay,
            settle_delay: config.settle_delay,
            state: ConnectionState::Disconnected,
            link: None,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn last_reading_at(&self) -> Option<Instant> {
        match self.state {
            ConnectionState::Connected {
                last_reading_at, ..
            } => Some(last_reading_at),
            _ => None,
        }
    }

    pub fn mark_reading(&mut self, at: Instant) {
        if let ConnectionState::Connected {
            last_reading_at, ..
        } = &mut self.state
        {
            *last_reading_at = at;
        }
    }

    /// Tries each candidate in order, up to `max_attempts_per_port` times, and
    /// returns the first link that opens. Ports are never probed concurrently.
    pub async fn acquire_connection(
        &mut self,
        candidates: &[PortId],
    ) -> Result<Box<dyn Link>, ConnectError> {
        if candidates.is_empty() {
            self.state = ConnectionState::Disconnected;
            return Err(ConnectError::DiscoveryEmpty);
        }

        for port in candidates {
            for attempt in 1..=self.max_attempts_per_port {
                self.state = ConnectionState::Connecting {
                    port: port.clone(),
                    attempt,
                };

                match self.opener.open(port).await {
                    Ok(link) => {
                        tracing::info!(port = %port, attempt, "serial port opened");
                        return Ok(link);
                    }
                    Err(err) => tracing::warn!(
                        port = %port,
                        attempt,
                        max_attempts = self.max_attempts_per_port,
                        "failed to open serial port: {err}"
                    ),
                }

                if attempt < self.max_attempts_per_port {
                    sleep(self.attempt_delay).await;
                }
            }
        }

        self.state = ConnectionState::Disconnected;
        Err(ConnectError::NoLinkAvailable {
            ports: candidates.len(),
        })
    }

    /// Runs discovery and acquisition until a link is up. Never gives up.
    pub async fn connect(&mut self) {
        loop {
            let candidates = self.discovery.list_candidate_ports();
            tracing::debug!(candidates = ?candidates, "discovered serial ports");

            match self.acquire_connection(&candidates).await {
                Ok(link) => {
                    if !self.settle_delay.is_zero() {
                        sleep(self.settle_delay).await;
                    }

                    let port = link.port().clone();
                    tracing::info!(port = %port, "serial link connected");
                    self.state = ConnectionState::Connected {
                        port,
                        last_reading_at: Instant::now(),
                    };
                    self.link = Some(link);
                    return;
                }
                Err(err) => {
                    tracing::warn!("{err}, retrying in {:?}", self.sweep_delay);
                    sleep(self.sweep_delay).await;
                }
            }
        }
    }

    /// Drops the current link and starts over from discovery, since the
    /// device may have come back under a different port.
    pub async fn reconnect(&mut self) {
        self.state = ConnectionState::Reconnecting;
        self.close_link().await;
        self.connect().await;
    }

    pub async fn disconnect(&mut self) {
        self.close_link().await;
        self.state = ConnectionState::Disconnected;
    }

    pub async fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self.link.as_mut() {
            Some(link) => link.read_line().await,
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "no serial link",
            )),
        }
    }

    async fn close_link(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };

        let port = link.port().clone();
        match link.close().await {
            Ok(Release::Closed) => tracing::info!(port = %port, "serial link closed"),
            Ok(Release::AfterTimeout) => tracing::debug!(
                port = %port,
                "read in flight; port released after timeout"
            ),
            Err(err) => tracing::warn!(port = %port, "failed to close serial link: {err}"),
        }
    }
}
