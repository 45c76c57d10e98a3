use chrono::DateTime;
use chrono_tz::Tz;

/// Format of the `real_time` column.
pub const REAL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    /// Ingestion time, not the device's sampling time.
    pub recorded_at: DateTime<Tz>,

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

impl SensorReading {
    pub fn real_time(&self) -> String {
        self.recorded_at.format(REAL_TIME_FORMAT).to_string()
    }
}
