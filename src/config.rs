use std::{path::PathBuf, time::Duration};

use chrono_tz::Tz;

use crate::link::PortId;

const MIN_READ_TIMEOUT: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Ports to try instead of enumerating the OS. Empty means enumerate.
    pub ports: Vec<PortId>,

    pub baud_rate: u32,

    pub database: PathBuf,

    /// Zone the `real_time` column is written in.
    pub timezone: Tz,

    pub stall_timeout: Duration,

    /// Blocking read timeout, which is also how often the watchdog is checked.
    pub read_timeout: Duration,

    pub max_attempts_per_port: u32,

    pub attempt_delay: Duration,

    /// Pause between full discovery sweeps while no link can be acquired.
    pub sweep_delay: Duration,

    /// Wait after a successful open before the link counts as connected.
    pub settle_delay: Duration,

    pub batch_size: usize,
}

impl IngestConfig {
    pub fn effective_read_timeout(&self) -> Duration {
        self.read_timeout
            .min(self.stall_timeout)
            .max(MIN_READ_TIMEOUT)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            ports: Vec::new(),
            baud_rate: 9600,
            database: PathBuf::from("SensorsReadings.db"),
            timezone: chrono_tz::UTC,
            stall_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(1),
            max_attempts_per_port: 3,
            attempt_delay: Duration::from_secs(1),
            sweep_delay: Duration::from_secs(5),
            settle_delay: Duration::from_secs(2),
            batch_size: 1,
        }
    }
}
