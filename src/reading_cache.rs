use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::models::Reading;

/// In-memory store of the most recent `Reading` per location.
///
/// Wrapped in `Arc` so it can be cheaply cloned and shared across tasks.
/// Uses `tokio::sync::RwLock` so concurrent readers never block each other.
#[derive(Clone, Default)]
pub struct ReadingCache {
    inner: Arc<RwLock<HashMap<Uuid, Reading>>>,
}

impl ReadingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the cached reading for `reading.location_id`, unless the
    /// cached one is newer.
    pub async fn update(&self, reading: Reading) {
        let mut guard = self.inner.write().await;
        match guard.get(&reading.location_id) {
            Some(current) if current.recorded_at > reading.recorded_at => {}
            _ => {
                guard.insert(reading.location_id, reading);
            }
        }
    }

    /// Return the latest reading for `location_id`, if present.
    pub async fn get(&self, location_id: Uuid) -> Option<Reading> {
        self.inner.read().await.get(&location_id).cloned()
    }
}
