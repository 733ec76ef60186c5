use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    aqi::classify,
    db::models::Reading,
    reading_cache::ReadingCache,
    source::FetchedReading,
    store::{HistoryStore, StoreError},
};

/// A freshly persisted reading together with the one it follows.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub reading: Reading,
    pub previous: Option<Reading>,
}

/// Persists every fetched reading and remembers the latest one per location,
/// so the decision engine can compare against it without a history query.
#[derive(Clone)]
pub struct HistoryRecorder {
    store: Arc<dyn HistoryStore>,
    cache: ReadingCache,
}

impl HistoryRecorder {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self {
            store,
            cache: ReadingCache::new(),
        }
    }

    /// Classify, stamp and append `fetched` for `location_id`.
    ///
    /// Fails only when the append fails; the cache is left untouched in that
    /// case so the next cycle still compares against the last stored reading.
    pub async fn record(
        &self,
        location_id: Uuid,
        fetched: FetchedReading,
        now: DateTime<Utc>,
    ) -> Result<Recorded, StoreError> {
        let previous = self.latest(location_id).await?;

        let reading = Reading {
            id: Uuid::new_v4(),
            location_id,
            index: fetched.index,
            category: classify(fetched.index).category,
            dominant_pollutant: fetched.dominant_pollutant,
            pollutants: fetched.pollutants,
            source: fetched.source,
            recorded_at: now,
        };

        self.store.append(&reading).await?;
        self.cache.update(reading.clone()).await;

        Ok(Recorded { reading, previous })
    }

    /// Latest reading for `location_id`, from the cache or, after a restart,
    /// from the store.
    pub async fn latest(&self, location_id: Uuid) -> Result<Option<Reading>, StoreError> {
        if let Some(reading) = self.cache.get(location_id).await {
            return Ok(Some(reading));
        }
        let stored = self.store.latest(location_id).await?;
        if let Some(reading) = &stored {
            self.cache.update(reading.clone()).await;
        }
        Ok(stored)
    }
}
