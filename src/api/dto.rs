use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    alerts::state::DeliveryState,
    aqi::{AqiCategory, Pollutant},
    db::models::{Alert, AlertType, Channel, ChannelDelivery, Reading},
};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReadingDto {
    pub id: Uuid,
    pub location_id: Uuid,
    pub index: f64,
    pub category: AqiCategory,
    /// Human-readable category, e.g. "Unhealthy for Sensitive Groups".
    pub label: String,
    /// Display color as a hex string.
    pub color: String,
    pub description: String,
    pub dominant_pollutant: String,
    /// Per-pollutant sub-index keyed by provider code (`pm25`, `o3`, ...).
    pub pollutants: BTreeMap<String, f64>,
    pub source: String,
    pub recorded_at: DateTime<Utc>,
}

impl From<Reading> for ReadingDto {
    fn from(r: Reading) -> Self {
        Self {
            id: r.id,
            location_id: r.location_id,
            index: r.index,
            category: r.category,
            label: r.category.label().to_owned(),
            color: r.category.color().to_owned(),
            description: r.category.description().to_owned(),
            dominant_pollutant: r.dominant_pollutant,
            pollutants: r.pollutants,
            source: r.source,
            recorded_at: r.recorded_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChannelDeliveryDto {
    pub channel: Channel,
    pub state: DeliveryState,
    /// Error class of the failure, when `state` is `failed`.
    pub error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<ChannelDelivery> for ChannelDeliveryDto {
    fn from(d: ChannelDelivery) -> Self {
        Self {
            channel: d.channel,
            state: d.state,
            error: d.error,
            sent_at: d.sent_at,
            updated_at: d.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AlertDto {
    pub id: Uuid,
    pub subscriber_id: Uuid,
    pub location_id: Uuid,
    pub location_name: String,
    pub reading: ReadingDto,
    pub previous_reading: Option<ReadingDto>,
    pub message: String,
    pub recommendations: Vec<String>,
    pub alert_type: AlertType,
    /// Derived from the channel deliveries.
    pub status: DeliveryState,
    pub deliveries: Vec<ChannelDeliveryDto>,
    pub acknowledged: bool,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Alert> for AlertDto {
    fn from(a: Alert) -> Self {
        Self {
            id: a.id,
            subscriber_id: a.subscriber_id,
            location_id: a.location_id,
            location_name: a.location_name,
            reading: a.reading.into(),
            previous_reading: a.previous_reading.map(Into::into),
            message: a.message,
            recommendations: a.recommendations,
            alert_type: a.alert_type,
            status: a.status,
            deliveries: a.deliveries.into_iter().map(Into::into).collect(),
            acknowledged: a.acknowledged,
            read: a.read,
            created_at: a.created_at,
        }
    }
}

/// Request body for `POST /alerts/{alert_id}/deliveries/{channel}`, sent by
/// channel gateways as delivery receipts arrive.
#[derive(Debug, Deserialize, ToSchema)]
pub struct DeliveryCallbackRequest {
    /// One of `delivered`, `read` or `failed`.
    pub state: DeliveryState,
    /// Error class, recorded when `state` is `failed`.
    pub error: Option<String>,
}

/// Sub-index for one measured pollutant concentration.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubIndexDto {
    pub pollutant: Pollutant,
    pub concentration: f64,
    pub index: u32,
    pub category: AqiCategory,
    pub color: String,
}
