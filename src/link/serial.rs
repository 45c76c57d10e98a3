use std::{
    io::{self, BufRead, BufReader, Read as _},
    mem,
    time::Duration,
};

use async_trait::async_trait;
use serialport::{ClearBuffer, SerialPort};

use crate::link::PortId;

/// A partial frame longer than this without a newline is discarded.
pub const MAX_FRAME_LEN: usize = 4096;

/// How [`Link::close`] let go of the port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    Closed,
    /// A cancelled read still owns the port and drops it once its timeout elapses.
    AfterTimeout,
}

/// An open channel to the device.
#[async_trait]
pub trait Link: Send {
    fn port(&self) -> &PortId;

    /// Next newline-terminated frame, or `None` when the read timed out first.
    ///
    /// An error means the link is lost.
    async fn read_line(&mut self) -> io::Result<Option<Vec<u8>>>;

    async fn close(self: Box<Self>) -> io::Result<Release>;
}

#[async_trait]
pub trait LinkOpener: Send + Sync {
    async fn open(&self, port: &PortId) -> io::Result<Box<dyn Link>>;
}

#[derive(Debug, Clone)]
pub struct SerialOpener {
    baud_rate: u32,
    read_timeout: Duration,
}

impl SerialOpener {
    pub fn new(baud_rate: u32, read_timeout: Duration) -> Self {
        Self {
            baud_rate,
            read_timeout,
        }
    }
}

#[async_trait]
impl LinkOpener for SerialOpener {
    async fn open(&self, port: &PortId) -> io::Result<Box<dyn Link>> {
        let builder = serialport::new(port.as_str(), self.baud_rate).timeout(self.read_timeout);

        let handle = tokio::task::spawn_blocking(move || builder.open())
            .await
            .map_err(io::Error::other)??;

        Ok(Box::new(SerialLink::new(port.clone(), handle)))
    }
}

/// Serial port link. Reads block with the port's timeout, so they run on the
/// blocking pool with the handle moved in and back out.
pub struct SerialLink {
    port: PortId,
    reader: Option<BufReader<Box<dyn SerialPort>>>,
    pending: Vec<u8>,
}

impl SerialLink {
    pub fn new(port: PortId, handle: Box<dyn SerialPort>) -> Self {
        Self {
            port,
            reader: Some(BufReader::new(handle)),
            pending: Vec::new(),
        }
    }
}

#[async_trait]
impl Link for SerialLink {
    fn port(&self) -> &PortId {
        &self.port
    }

    async fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut reader = self
            .reader
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial handle lost"))?;
        let mut pending = mem::take(&mut self.pending);

        let (reader, pending, result) = tokio::task::spawn_blocking(move || {
            let result = read_frame(&mut reader, &mut pending);
            (reader, pending, result)
        })
        .await
        .map_err(io::Error::other)?;

        self.reader = Some(reader);
        self.pending = pending;

        result
    }

    async fn close(self: Box<Self>) -> io::Result<Release> {
        let Some(reader) = self.reader else {
            return Ok(Release::AfterTimeout);
        };

        let handle = reader.into_inner();
        tokio::task::spawn_blocking(move || handle.clear(ClearBuffer::All))
            .await
            .map_err(io::Error::other)??;

        Ok(Release::Closed)
    }
}

/// Reads up to one frame into `pending`.
///
/// Partial data survives a timeout and is completed by the next call.
pub fn read_frame<R: BufRead>(
    reader: &mut R,
    pending: &mut Vec<u8>,
) -> io::Result<Option<Vec<u8>>> {
    let limit = MAX_FRAME_LEN.saturating_sub(pending.len()).max(1) as u64;

    match reader.take(limit).read_until(b'\n', pending) {
        Ok(_) if pending.ends_with(b"\n") => Ok(Some(mem::take(pending))),
        Ok(_) if pending.len() >= MAX_FRAME_LEN => {
            tracing::warn!(bytes = pending.len(), "discarding oversized frame");
            pending.clear();
            Ok(None)
        }
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "serial link closed",
        )),
        Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
        Err(e) => Err(e),
    }
}
