use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
pub struct Args {
    #[arg(long, env = "DATABASE_PATH", default_value = "SensorsReadings.db")]
    pub database: PathBuf,

    /// Number of most recent readings to print.
    #[arg(long, default_value_t = 50)]
    pub limit: u32,
}
