use std::path::Path;

use anyhow::{Context as _, Result};
use sqlx::{
    FromRow, QueryBuilder, Sqlite, SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};

use crate::sensor::SensorReading;

// Ten binds per row, well under SQLite's parameter limit.
const INSERT_CHUNK_ROWS: usize = 1000;

const SELECT_COLUMNS: &str = r#"
    rowid AS id, real_time, temperature, humidity, co_level, heat_index,
    air_quality_index, mean_heat_index, std_dev_heat_index, mean_aqi, std_dev_aqi
"#;

/// A row as read back from `sensor_readings`.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct StoredReading {
    pub id: i64,
    pub real_time: String,
    pub temperature: f64,
    pub humidity: f64,
    pub co_level: f64,
    pub heat_index: f64,
    pub air_quality_index: f64,
    pub mean_heat_index: f64,
    pub std_dev_heat_index: f64,
    pub mean_aqi: f64,
    pub std_dev_aqi: f64,
}

/// Opens the store with a single connection; this pipeline is the only writer.
pub async fn new_pool(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open database: {}", path.display()))
}

/// Opens an existing store for reading only, as a dashboard would.
pub async fn new_read_only_pool(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new().filename(path).read_only(true);

    SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open database read-only: {}", path.display()))
}

pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor_readings (
            real_time TEXT,
            temperature REAL,
            humidity REAL,
            co_level REAL,
            heat_index REAL,
            air_quality_index REAL,
            mean_heat_index REAL,
            std_dev_heat_index REAL,
            mean_aqi REAL,
            std_dev_aqi REAL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create sensor_readings table")?;

    Ok(())
}

/// Inserts all readings in one transaction. Either every row commits or none does.
pub async fn insert_many(pool: &SqlitePool, readings: &[SensorReading]) -> Result<()> {
    if readings.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    for chunk in readings.chunks(INSERT_CHUNK_ROWS) {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"
            INSERT INTO sensor_readings (
                real_time, temperature, humidity, co_level, heat_index,
                air_quality_index, mean_heat_index, std_dev_heat_index,
                mean_aqi, std_dev_aqi
            )
            "#,
        );
        query.push_values(chunk, |mut row, r| {
            row.push_bind(r.real_time())
                .push_bind(r.temperature)
                .push_bind(r.humidity)
                .push_bind(r.co_level)
                .push_bind(r.heat_index)
                .push_bind(r.air_quality_index)
                .push_bind(r.mean_heat_index)
                .push_bind(r.std_dev_heat_index)
                .push_bind(r.mean_aqi)
                .push_bind(r.std_dev_aqi);
        });

        query
            .build()
            .execute(&mut *tx)
            .await
            .context("failed to execute bulk insert query")?;
    }

    tx.commit().await.context("failed to commit transaction")?;

    Ok(())
}

pub async fn last_reading(pool: &SqlitePool) -> Result<Option<StoredReading>> {
    sqlx::query_as::<_, StoredReading>(&format!(
        "SELECT {SELECT_COLUMNS} FROM sensor_readings ORDER BY rowid DESC LIMIT 1"
    ))
    .fetch_optional(pool)
    .await
    .context("failed to fetch last reading")
}

/// Latest `limit` rows, oldest first.
///
/// Rows are appended with non-decreasing `real_time`, so rowid order is
/// `real_time` order and the query walks the table's primary b-tree backwards.
pub async fn latest_readings(pool: &SqlitePool, limit: u32) -> Result<Vec<StoredReading>> {
    let mut rows = sqlx::query_as::<_, StoredReading>(&format!(
        "SELECT {SELECT_COLUMNS} FROM sensor_readings ORDER BY rowid DESC LIMIT ?"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to fetch latest readings")?;

    rows.reverse();

    Ok(rows)
}

pub async fn count_readings(pool: &SqlitePool) -> Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM sensor_readings")
        .fetch_one(pool)
        .await
        .context("failed to count readings")
}
