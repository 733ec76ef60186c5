use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::Json, FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{AlertMutation, AlertStore, HistoryStore, StoreError, SubscriberDirectory};
use crate::{
    alerts::state::DeliveryState,
    aqi::AqiCategory,
    db::models::{
        Alert, AlertPreferences, AlertType, Channel, ChannelDelivery, Coordinate, Reading,
        Subscriber, SubscriberLocation,
    },
};

/// Postgres-backed implementation of every storage trait.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(FromRow)]
struct LocationRow {
    id: Uuid,
    subscriber_id: Uuid,
    name: String,
    latitude: f64,
    longitude: f64,
    is_primary: bool,
}

impl From<LocationRow> for SubscriberLocation {
    fn from(r: LocationRow) -> Self {
        Self {
            id: r.id,
            subscriber_id: r.subscriber_id,
            name: r.name,
            coordinate: Coordinate {
                latitude: r.latitude,
                longitude: r.longitude,
            },
            is_primary: r.is_primary,
        }
    }
}

#[derive(FromRow)]
struct PreferencesRow {
    subscriber_id: Uuid,
    threshold: f64,
    push: bool,
    email: bool,
    sms: bool,
}

#[derive(FromRow)]
struct ReadingRow {
    id: Uuid,
    location_id: Uuid,
    aqi: f64,
    category: AqiCategory,
    dominant_pollutant: String,
    pollutants: Json<BTreeMap<String, f64>>,
    source: String,
    recorded_at: DateTime<Utc>,
}

impl From<ReadingRow> for Reading {
    fn from(r: ReadingRow) -> Self {
        Self {
            id: r.id,
            location_id: r.location_id,
            index: r.aqi,
            category: r.category,
            dominant_pollutant: r.dominant_pollutant,
            pollutants: r.pollutants.0,
            source: r.source,
            recorded_at: r.recorded_at,
        }
    }
}

#[derive(FromRow)]
struct AlertRow {
    id: Uuid,
    subscriber_id: Uuid,
    location_id: Uuid,
    location_name: String,
    reading: Json<Reading>,
    previous_reading: Option<Json<Reading>>,
    message: String,
    recommendations: Vec<String>,
    alert_type: AlertType,
    status: DeliveryState,
    acknowledged: bool,
    is_read: bool,
    created_at: DateTime<Utc>,
}

impl AlertRow {
    fn into_alert(self, deliveries: Vec<ChannelDelivery>) -> Alert {
        Alert {
            id: self.id,
            subscriber_id: self.subscriber_id,
            location_id: self.location_id,
            location_name: self.location_name,
            reading: self.reading.0,
            previous_reading: self.previous_reading.map(|j| j.0),
            message: self.message,
            recommendations: self.recommendations,
            alert_type: self.alert_type,
            status: self.status,
            deliveries,
            acknowledged: self.acknowledged,
            read: self.is_read,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct DeliveryRow {
    alert_id: Uuid,
    channel: Channel,
    state: DeliveryState,
    error: Option<String>,
    sent_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl From<DeliveryRow> for ChannelDelivery {
    fn from(r: DeliveryRow) -> Self {
        Self {
            channel: r.channel,
            state: r.state,
            error: r.error,
            sent_at: r.sent_at,
            updated_at: r.updated_at,
        }
    }
}

const ALERT_COLUMNS: &str = "id, subscriber_id, location_id, location_name, reading, \
     previous_reading, message, recommendations, alert_type, status, acknowledged, \
     is_read, created_at";

const READING_COLUMNS: &str =
    "id, location_id, aqi, category, dominant_pollutant, pollutants, source, recorded_at";

// ---------------------------------------------------------------------------
// SubscriberDirectory
// ---------------------------------------------------------------------------

#[async_trait]
impl SubscriberDirectory for PgStore {
    async fn subscribers(&self) -> Result<Vec<Subscriber>, StoreError> {
        let rows = sqlx::query_as::<_, Subscriber>(
            "SELECT id, email, phone FROM subscribers ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn locations(&self, subscriber_id: Uuid) -> Result<Vec<SubscriberLocation>, StoreError> {
        let rows = sqlx::query_as::<_, LocationRow>(
            r#"
            SELECT id, subscriber_id, name, latitude, longitude, is_primary
            FROM subscriber_locations
            WHERE subscriber_id = $1
            ORDER BY is_primary DESC, created_at
            "#,
        )
        .bind(subscriber_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn preferences(&self, subscriber_id: Uuid) -> Result<AlertPreferences, StoreError> {
        let row = sqlx::query_as::<_, PreferencesRow>(
            r#"
            SELECT subscriber_id, threshold, push, email, sms
            FROM alert_preferences
            WHERE subscriber_id = $1
            "#,
        )
        .bind(subscriber_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(r) => AlertPreferences {
                subscriber_id: r.subscriber_id,
                threshold: r.threshold,
                push: r.push,
                email: r.email,
                sms: r.sms,
            },
            None => AlertPreferences::default_for(subscriber_id),
        })
    }

    async fn device_tokens(&self, subscriber_id: Uuid) -> Result<Vec<String>, StoreError> {
        let tokens = sqlx::query_scalar::<_, String>(
            "SELECT token FROM device_tokens WHERE subscriber_id = $1 ORDER BY registered_at",
        )
        .bind(subscriber_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tokens)
    }

    async fn remove_device_token(&self, subscriber_id: Uuid, token: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM device_tokens WHERE subscriber_id = $1 AND token = $2")
            .bind(subscriber_id)
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HistoryStore
// ---------------------------------------------------------------------------

#[async_trait]
impl HistoryStore for PgStore {
    async fn append(&self, reading: &Reading) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO aqi_readings
                (id, location_id, aqi, category, dominant_pollutant, pollutants, source, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(reading.id)
        .bind(reading.location_id)
        .bind(reading.index)
        .bind(reading.category)
        .bind(&reading.dominant_pollutant)
        .bind(Json(&reading.pollutants))
        .bind(&reading.source)
        .bind(reading.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest(&self, location_id: Uuid) -> Result<Option<Reading>, StoreError> {
        let row = sqlx::query_as::<_, ReadingRow>(&format!(
            "SELECT {READING_COLUMNS} FROM aqi_readings \
             WHERE location_id = $1 ORDER BY recorded_at DESC LIMIT 1"
        ))
        .bind(location_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn range(
        &self,
        location_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Reading>, StoreError> {
        let rows = sqlx::query_as::<_, ReadingRow>(&format!(
            "SELECT {READING_COLUMNS} FROM aqi_readings \
             WHERE location_id = $1 \
               AND ($2::timestamptz IS NULL OR recorded_at >= $2) \
               AND ($3::timestamptz IS NULL OR recorded_at <= $3) \
             ORDER BY recorded_at ASC"
        ))
        .bind(location_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

// ---------------------------------------------------------------------------
// AlertStore
// ---------------------------------------------------------------------------

impl PgStore {
    async fn deliveries_for(
        &self,
        alert_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<ChannelDelivery>>, StoreError> {
        let rows = sqlx::query_as::<_, DeliveryRow>(
            r#"
            SELECT alert_id, channel, state, error, sent_at, updated_at
            FROM alert_deliveries
            WHERE alert_id = ANY($1)
            ORDER BY channel
            "#,
        )
        .bind(alert_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_alert: HashMap<Uuid, Vec<ChannelDelivery>> = HashMap::new();
        for row in rows {
            by_alert.entry(row.alert_id).or_default().push(row.into());
        }
        Ok(by_alert)
    }
}

async fn write_deliveries(
    tx: &mut Transaction<'_, Postgres>,
    alert: &Alert,
) -> Result<(), StoreError> {
    for d in &alert.deliveries {
        sqlx::query(
            r#"
            INSERT INTO alert_deliveries (alert_id, channel, state, error, sent_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (alert_id, channel) DO UPDATE
            SET state      = EXCLUDED.state,
                error      = EXCLUDED.error,
                sent_at    = EXCLUDED.sent_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(alert.id)
        .bind(d.channel)
        .bind(d.state)
        .bind(&d.error)
        .bind(d.sent_at)
        .bind(d.updated_at)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl AlertStore for PgStore {
    async fn insert(&self, alert: &Alert) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO alerts
                (id, subscriber_id, location_id, location_name, reading, previous_reading,
                 message, recommendations, alert_type, status, acknowledged, is_read, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(alert.id)
        .bind(alert.subscriber_id)
        .bind(alert.location_id)
        .bind(&alert.location_name)
        .bind(Json(&alert.reading))
        .bind(alert.previous_reading.as_ref().map(Json))
        .bind(&alert.message)
        .bind(&alert.recommendations)
        .bind(alert.alert_type)
        .bind(alert.status)
        .bind(alert.acknowledged)
        .bind(alert.read)
        .bind(alert.created_at)
        .execute(&mut *tx)
        .await?;

        write_deliveries(&mut tx, alert).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Alert>, StoreError> {
        let row = sqlx::query_as::<_, AlertRow>(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut deliveries = self.deliveries_for(&[id]).await?;
        Ok(Some(row.into_alert(deliveries.remove(&id).unwrap_or_default())))
    }

    async fn list(
        &self,
        subscriber_id: Uuid,
        acknowledged: Option<bool>,
    ) -> Result<Vec<Alert>, StoreError> {
        let rows = sqlx::query_as::<_, AlertRow>(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts \
             WHERE subscriber_id = $1 \
               AND ($2::boolean IS NULL OR acknowledged = $2) \
             ORDER BY created_at DESC"
        ))
        .bind(subscriber_id)
        .bind(acknowledged)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut deliveries = self.deliveries_for(&ids).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let d = deliveries.remove(&row.id).unwrap_or_default();
                row.into_alert(d)
            })
            .collect())
    }

    async fn update(&self, id: Uuid, mutation: AlertMutation) -> Result<Option<Alert>, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes concurrent callbacks for the same alert.
        let row = sqlx::query_as::<_, AlertRow>(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let deliveries: Vec<ChannelDelivery> = sqlx::query_as::<_, DeliveryRow>(
            r#"
            SELECT alert_id, channel, state, error, sent_at, updated_at
            FROM alert_deliveries
            WHERE alert_id = $1
            ORDER BY channel
            "#,
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

        let mut alert = row.into_alert(deliveries);
        mutation(&mut alert)?;

        sqlx::query(
            "UPDATE alerts SET status = $2, acknowledged = $3, is_read = $4 WHERE id = $1",
        )
        .bind(alert.id)
        .bind(alert.status)
        .bind(alert.acknowledged)
        .bind(alert.read)
        .execute(&mut *tx)
        .await?;

        write_deliveries(&mut tx, &alert).await?;
        tx.commit().await?;
        Ok(Some(alert))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM alerts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
