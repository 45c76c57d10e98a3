use std::{path::PathBuf, time::Duration};

use chrono_tz::Tz;
use clap::Parser;
use sensor_ingest::{config::IngestConfig, link::PortId};

#[derive(Debug, Parser)]
pub struct Args {
    /// Serial ports to try, in order. Enumerates the OS when omitted.
    #[arg(long = "port", env = "SENSOR_PORTS", value_delimiter = ',')]
    pub ports: Vec<String>,

    #[arg(long, env = "BAUD_RATE", default_value_t = 9600)]
    pub baud_rate: u32,

    #[arg(long, env = "DATABASE_PATH", default_value = "SensorsReadings.db")]
    pub database: PathBuf,

    #[arg(long, env = "TZ", default_value = "UTC")]
    pub timezone: Tz,

    #[arg(long, env = "STALL_TIMEOUT_SECS", default_value_t = 10)]
    pub stall_timeout_secs: u64,

    #[arg(long, env = "READ_TIMEOUT_MS", default_value_t = 1000)]
    pub read_timeout_ms: u64,

    #[arg(long, env = "MAX_ATTEMPTS_PER_PORT", default_value_t = 3)]
    pub max_attempts_per_port: u32,

    #[arg(long, env = "ATTEMPT_DELAY_MS", default_value_t = 1000)]
    pub attempt_delay_ms: u64,

    #[arg(long, env = "SWEEP_DELAY_SECS", default_value_t = 5)]
    pub sweep_delay_secs: u64,

    #[arg(long, env = "SETTLE_DELAY_MS", default_value_t = 2000)]
    pub settle_delay_ms: u64,

    #[arg(long, env = "BATCH_SIZE", default_value_t = 1)]
    pub batch_size: usize,
}

impl Args {
    pub fn into_config(self) -> IngestConfig {
        IngestConfig {
            ports: self.ports.into_iter().map(PortId::new).collect(),
            baud_rate: self.baud_rate,
            database: self.database,
            timezone: self.timezone,
            stall_timeout: Duration::from_secs(self.stall_timeout_secs),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            max_attempts_per_port: self.max_attempts_per_port,
            attempt_delay: Duration::from_millis(self.attempt_delay_ms),
            sweep_delay: Duration::from_secs(self.sweep_delay_secs),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            batch_size: self.batch_size,
        }
    }
}
