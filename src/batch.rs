use anyhow::{Context as _, Result};
use sqlx::SqlitePool;

use crate::{
    db::{self, StoredReading},
    sensor::SensorReading,
};

/// Result of a committed flush.
#[derive(Debug, Clone, PartialEq)]
pub struct Committed {
    pub rows: usize,

    /// Last stored row read back after the commit.
    pub last: Option<StoredReading>,
}

/// Buffers accepted readings until a flush commits them.
///
/// A failed flush leaves the batch untouched, so the same readings go out
/// again with the next flush.
#[derive(Debug)]
pub struct BatchWriter {
    pending: Vec<SensorReading>,
    threshold: usize,
}

impl BatchWriter {
    pub fn new(threshold: usize) -> Self {
        let threshold = threshold.max(1);

        Self {
            pending: Vec::with_capacity(threshold),
            threshold,
        }
    }

    pub fn offer(&mut self, reading: SensorReading) {
        self.pending.push(reading);
    }

    pub fn should_flush(&self) -> bool {
        self.pending.len() >= self.threshold
    }

    pub fn pending(&self) -> &[SensorReading] {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub async fn flush(&mut self, pool: &SqlitePool) -> Result<Committed> {
        db::insert_many(pool, &self.pending)
            .await
            .with_context(|| format!("failed to flush {} readings", self.pending.len()))?;

        let rows = self.pending.len();
        self.pending.clear();

        // The rows are committed at this point; a failed read-back is only a
        // missing diagnostic.
        let last = match db::last_reading(pool).await {
            Ok(last) => last,
            Err(err) => {
                tracing::warn!("failed to read back last reading: {err:#}");
                None
            }
        };

        Ok(Committed { rows, last })
    }
}
