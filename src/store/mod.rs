#[cfg(test)]
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    alerts::state::TransitionError,
    db::models::{Alert, AlertPreferences, Reading, Subscriber, SubscriberLocation},
};

pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// In-place change to an alert, applied atomically by [`AlertStore::update`].
pub type AlertMutation = Box<dyn FnOnce(&mut Alert) -> Result<(), TransitionError> + Send>;

/// Read side of subscriber data, owned by the account service.
#[async_trait]
pub trait SubscriberDirectory: Send + Sync {
    async fn subscribers(&self) -> Result<Vec<Subscriber>, StoreError>;

    async fn locations(&self, subscriber_id: Uuid) -> Result<Vec<SubscriberLocation>, StoreError>;

    /// Saved preferences, or [`AlertPreferences::default_for`] when none exist.
    async fn preferences(&self, subscriber_id: Uuid) -> Result<AlertPreferences, StoreError>;

    async fn device_tokens(&self, subscriber_id: Uuid) -> Result<Vec<String>, StoreError>;

    /// Drop a token the push transport reported as unregistered.
    async fn remove_device_token(&self, subscriber_id: Uuid, token: &str) -> Result<(), StoreError>;
}

/// Append-only reading history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, reading: &Reading) -> Result<(), StoreError>;

    async fn latest(&self, location_id: Uuid) -> Result<Option<Reading>, StoreError>;

    /// Readings for `location_id` inside the optional inclusive bounds, oldest first.
    async fn range(
        &self,
        location_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Reading>, StoreError>;
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn insert(&self, alert: &Alert) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Alert>, StoreError>;

    /// Newest first. `acknowledged` filters when set.
    async fn list(
        &self,
        subscriber_id: Uuid,
        acknowledged: Option<bool>,
    ) -> Result<Vec<Alert>, StoreError>;

    /// Load, mutate and write back one alert without interleaving with other
    /// updates to it. Returns `None` when the alert does not exist; a mutation
    /// error leaves the stored alert untouched.
    async fn update(&self, id: Uuid, mutation: AlertMutation) -> Result<Option<Alert>, StoreError>;

    /// Returns `false` when the alert did not exist.
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;
}
