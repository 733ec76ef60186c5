use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AlertMutation, AlertStore, HistoryStore, StoreError, SubscriberDirectory};
use crate::db::models::{Alert, AlertPreferences, Reading, Subscriber, SubscriberLocation};

/// Test double for every storage trait. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<State>>,
    fail_history: Arc<AtomicBool>,
    fail_alerts: Arc<AtomicBool>,
}

#[derive(Default)]
struct State {
    subscribers: Vec<Subscriber>,
    locations: Vec<SubscriberLocation>,
    preferences: HashMap<Uuid, AlertPreferences>,
    tokens: HashMap<Uuid, Vec<String>>,
    readings: Vec<Reading>,
    alerts: Vec<Alert>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_subscriber(&self, subscriber: Subscriber) {
        self.inner.write().await.subscribers.push(subscriber);
    }

    pub async fn add_location(&self, location: SubscriberLocation) {
        self.inner.write().await.locations.push(location);
    }

    pub async fn set_preferences(&self, prefs: AlertPreferences) {
        self.inner
            .write()
            .await
            .preferences
            .insert(prefs.subscriber_id, prefs);
    }

    pub async fn set_tokens(&self, subscriber_id: Uuid, tokens: &[&str]) {
        self.inner
            .write()
            .await
            .tokens
            .insert(subscriber_id, tokens.iter().map(|t| (*t).to_owned()).collect());
    }

    /// Make every history append fail with a database error.
    pub fn fail_history(&self, fail: bool) {
        self.fail_history.store(fail, Ordering::SeqCst);
    }

    /// Make every alert insert fail with a database error.
    pub fn fail_alerts(&self, fail: bool) {
        self.fail_alerts.store(fail, Ordering::SeqCst);
    }

    pub async fn readings(&self) -> Vec<Reading> {
        self.inner.read().await.readings.clone()
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        self.inner.read().await.alerts.clone()
    }
}

#[async_trait]
impl SubscriberDirectory for MemoryStore {
    async fn subscribers(&self) -> Result<Vec<Subscriber>, StoreError> {
        Ok(self.inner.read().await.subscribers.clone())
    }

    async fn locations(&self, subscriber_id: Uuid) -> Result<Vec<SubscriberLocation>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .locations
            .iter()
            .filter(|l| l.subscriber_id == subscriber_id)
            .cloned()
            .collect())
    }

    async fn preferences(&self, subscriber_id: Uuid) -> Result<AlertPreferences, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .preferences
            .get(&subscriber_id)
            .cloned()
            .unwrap_or_else(|| AlertPreferences::default_for(subscriber_id)))
    }

    async fn device_tokens(&self, subscriber_id: Uuid) -> Result<Vec<String>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .tokens
            .get(&subscriber_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn remove_device_token(&self, subscriber_id: Uuid, token: &str) -> Result<(), StoreError> {
        if let Some(tokens) = self.inner.write().await.tokens.get_mut(&subscriber_id) {
            tokens.retain(|t| t != token);
        }
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn append(&self, reading: &Reading) -> Result<(), StoreError> {
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.write().await.readings.push(reading.clone());
        Ok(())
    }

    async fn latest(&self, location_id: Uuid) -> Result<Option<Reading>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .readings
            .iter()
            .filter(|r| r.location_id == location_id)
            .max_by_key(|r| r.recorded_at)
            .cloned())
    }

    async fn range(
        &self,
        location_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Reading>, StoreError> {
        let mut out: Vec<Reading> = self
            .inner
            .read()
            .await
            .readings
            .iter()
            .filter(|r| r.location_id == location_id)
            .filter(|r| from.map_or(true, |f| r.recorded_at >= f))
            .filter(|r| to.map_or(true, |t| r.recorded_at <= t))
            .cloned()
            .collect();
        out.sort_by_key(|r| r.recorded_at);
        Ok(out)
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn insert(&self, alert: &Alert) -> Result<(), StoreError> {
        if self.fail_alerts.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.write().await.alerts.push(alert.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Alert>, StoreError> {
        Ok(self.inner.read().await.alerts.iter().find(|a| a.id == id).cloned())
    }

    async fn list(
        &self,
        subscriber_id: Uuid,
        acknowledged: Option<bool>,
    ) -> Result<Vec<Alert>, StoreError> {
        let mut out: Vec<Alert> = self
            .inner
            .read()
            .await
            .alerts
            .iter()
            .filter(|a| a.subscriber_id == subscriber_id)
            .filter(|a| acknowledged.map_or(true, |ack| a.acknowledged == ack))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn update(&self, id: Uuid, mutation: AlertMutation) -> Result<Option<Alert>, StoreError> {
        let mut state = self.inner.write().await;
        let Some(stored) = state.alerts.iter_mut().find(|a| a.id == id) else {
            return Ok(None);
        };
        let mut alert = stored.clone();
        mutation(&mut alert)?;
        *stored = alert.clone();
        Ok(Some(alert))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.inner.write().await;
        let before = state.alerts.len();
        state.alerts.retain(|a| a.id != id);
        Ok(state.alerts.len() != before)
    }
}
