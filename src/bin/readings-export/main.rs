mod args;

use std::io;

use anyhow::Context as _;
use args::Args;
use clap::Parser as _;
use csv::Writer;
use sensor_ingest::db::{StoredReading, latest_readings, new_read_only_pool};

const HEADER: [&str; 10] = [
    "real_time",
    "temperature",
    "humidity",
    "co_level",
    "heat_index",
    "air_quality_index",
    "mean_heat_index",
    "std_dev_heat_index",
    "mean_aqi",
    "std_dev_aqi",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let pool = new_read_only_pool(&args.database)
        .await
        .context("failed to connect to database")?;
    let readings = latest_readings(&pool, args.limit)
        .await
        .context("failed to fetch latest readings")?;
    pool.close().await;

    let mut writer = Writer::from_writer(io::stdout().lock());
    writer.write_record(HEADER).context("failed to write CSV header")?;
    for reading in &readings {
        writer
            .write_record(record(reading))
            .with_context(|| format!("failed to write reading {}", reading.id))?;
    }
    writer.flush().context("failed to flush CSV output")?;

    Ok(())
}

fn record(r: &StoredReading) -> [String; 10] {
    [
        r.real_time.clone(),
        r.temperature.to_string(),
        r.humidity.to_string(),
        r.co_level.to_string(),
        r.heat_index.to_string(),
        r.air_quality_index.to_string(),
        r.mean_heat_index.to_string(),
        r.std_dev_heat_index.to_string(),
        r.mean_aqi.to_string(),
        r.std_dev_aqi.to_string(),
    ]
}
