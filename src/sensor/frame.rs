use std::str;

use anyhow::{Context as _, Result, bail};
use chrono::{DateTime, LocalResult, NaiveDateTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;

use crate::sensor::{REAL_TIME_FORMAT, SensorReading};

pub const FIELD_DELIMITER: char = ',';

pub const FIELD_COUNT: usize = 9;

/// Field order of the device's wire format.
pub const FIELD_NAMES: [&str; FIELD_COUNT] = [
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

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("empty frame")]
    Empty,

    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("expected {expected} fields, got {found}", expected = FIELD_COUNT)]
    FieldCountMismatch { found: usize },

    #[error("field {index} ({field}) is not a finite number: {value:?}")]
    NumericFormat {
        index: usize,
        field: &'static str,
        value: String,
    },
}

/// Splits one frame into its numeric fields.
///
/// The whole frame is rejected on the first bad field; nothing is returned for
/// the fields that did parse.
pub fn parse_fields(raw: &[u8]) -> Result<[f64; FIELD_COUNT], ParseError> {
    let line = str::from_utf8(raw)
        .map_err(|_| ParseError::InvalidUtf8)?
        .trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }

    let fields: Vec<&str> = line.split(FIELD_DELIMITER).collect();
    if fields.len() != FIELD_COUNT {
        return Err(ParseError::FieldCountMismatch {
            found: fields.len(),
        });
    }

    let mut values = [0f64; FIELD_COUNT];
    for (index, (field, slot)) in fields.iter().zip(values.iter_mut()).enumerate() {
        let field = field.trim();
        *slot = field
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ParseError::NumericFormat {
                index,
                field: FIELD_NAMES[index],
                value: field.to_string(),
            })?;
    }

    Ok(values)
}

/// Hands out ingestion timestamps that never go backwards in `real_time` order,
/// even when the wall clock is stepped back.
#[derive(Debug, Clone)]
pub struct IngestClock {
    timezone: Tz,
    last_issued: Option<DateTime<Tz>>,
}

impl IngestClock {
    pub fn new(timezone: Tz) -> Self {
        Self {
            timezone,
            last_issued: None,
        }
    }

    /// Raises the floor to a previously stored `real_time` value.
    pub fn seed(&mut self, real_time: &str) -> Result<()> {
        let naive = NaiveDateTime::parse_from_str(real_time, REAL_TIME_FORMAT)
            .with_context(|| format!("failed to parse stored timestamp: {real_time}"))?;
        let seeded = match naive.and_local_timezone(self.timezone) {
            LocalResult::Single(dt) => dt,
            LocalResult::Ambiguous(_, latest) => latest,
            LocalResult::None => bail!("invalid local timestamp: {real_time}"),
        };

        if self
            .last_issued
            .is_none_or(|last| last.naive_local() < seeded.naive_local())
        {
            self.last_issued = Some(seeded);
        }

        Ok(())
    }

    pub fn now(&mut self) -> DateTime<Tz> {
        let now = Utc::now().with_timezone(&self.timezone);

        // Compared on local wall time because that is what `real_time` stores.
        let issued = match self.last_issued {
            Some(last) if last.naive_local() > now.naive_local() => last,
            _ => now,
        };
        self.last_issued = Some(issued);

        issued
    }
}

#[derive(Debug, Clone)]
pub struct FrameParser {
    clock: IngestClock,
}

impl FrameParser {
    pub fn new(clock: IngestClock) -> Self {
        Self { clock }
    }

    pub fn clock_mut(&mut self) -> &mut IngestClock {
        &mut self.clock
    }

    /// Parses one frame. The timestamp is taken only once the frame has
    /// validated, so it reflects ingestion time.
    pub fn parse(&mut self, raw: &[u8]) -> Result<SensorReading, ParseError> {
        let [
            temperature,
            humidity,
            co_level,
            heat_index,
            air_quality_index,
            mean_heat_index,
            std_dev_heat_index,
            mean_aqi,
            std_dev_aqi,
        ] = parse_fields(raw)?;

        Ok(SensorReading {
            recorded_at: self.clock.now(),
            temperature,
            humidity,
            co_level,
            heat_index,
            air_quality_index,
            mean_heat_index,
            std_dev_heat_index,
            mean_aqi,
            std_dev_aqi,
        })
    }
}
