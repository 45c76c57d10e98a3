use std::time::Duration;

use tokio::time::Instant;

/// Decides when an open link has gone quiet for too long.
///
/// Checked cooperatively from the read loop; it never touches the link or the
/// connection state itself.
#[derive(Debug, Clone, Copy)]
pub struct StallWatchdog {
    stall_timeout: Duration,
}

impl StallWatchdog {
    pub fn new(stall_timeout: Duration) -> Self {
        Self { stall_timeout }
    }

    pub fn stall_timeout(&self) -> Duration {
        self.stall_timeout
    }

    pub fn is_stalled(&self, last_reading_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(last_reading_at) > self.stall_timeout
    }
}
