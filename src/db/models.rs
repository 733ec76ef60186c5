use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{alerts::state::DeliveryState, aqi::AqiCategory};

// ---------------------------------------------------------------------------
// Subscribers and locations
// ---------------------------------------------------------------------------

/// WGS-84 position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: Uuid,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberLocation {
    pub id: Uuid,
    pub subscriber_id: Uuid,
    pub name: String,
    pub coordinate: Coordinate,
    pub is_primary: bool,
}

// ---------------------------------------------------------------------------
// Channels and preferences
// ---------------------------------------------------------------------------

/// Mirrors the `notification_channel` Postgres enum.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[sqlx(type_name = "notification_channel", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Push,
    Email,
    Sms,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Push, Channel::Email, Channel::Sms];
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Channel::Push => "push",
            Channel::Email => "email",
            Channel::Sms => "sms",
        };
        f.write_str(s)
    }
}

/// Per-subscriber alerting configuration. Read fresh for every evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPreferences {
    pub subscriber_id: Uuid,
    /// Index value at or above which a threshold alert fires.
    pub threshold: f64,
    pub push: bool,
    pub email: bool,
    pub sms: bool,
}

impl AlertPreferences {
    pub const DEFAULT_THRESHOLD: f64 = 100.0;

    /// Preferences used when a subscriber never saved any: default threshold,
    /// push only.
    pub fn default_for(subscriber_id: Uuid) -> Self {
        Self {
            subscriber_id,
            threshold: Self::DEFAULT_THRESHOLD,
            push: true,
            email: false,
            sms: false,
        }
    }

    pub fn is_enabled(&self, channel: Channel) -> bool {
        match channel {
            Channel::Push => self.push,
            Channel::Email => self.email,
            Channel::Sms => self.sms,
        }
    }

    /// Enabled channels in a stable order.
    pub fn enabled_channels(&self) -> Vec<Channel> {
        Channel::ALL
            .into_iter()
            .filter(|c| self.is_enabled(*c))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// One observation for one location. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: Uuid,
    pub location_id: Uuid,
    pub index: f64,
    pub category: AqiCategory,
    /// Provider pollutant code, e.g. `"pm25"`.
    pub dominant_pollutant: String,
    /// Per-pollutant sub-index values as reported by the provider.
    pub pollutants: BTreeMap<String, f64>,
    /// Provider identifier, e.g. `"waqi"`.
    pub source: String,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// Mirrors the `alert_type` Postgres enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "alert_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Threshold,
    Change,
    Forecast,
}

/// Delivery progress of one channel of one alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDelivery {
    pub channel: Channel,
    pub state: DeliveryState,
    /// Error class of the last failure, e.g. `"timeout"`.
    pub error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub subscriber_id: Uuid,
    pub location_id: Uuid,
    pub location_name: String,
    /// Snapshot of the reading that triggered the alert.
    pub reading: Reading,
    /// Snapshot of the reading before it, when one existed.
    pub previous_reading: Option<Reading>,
    pub message: String,
    pub recommendations: Vec<String>,
    pub alert_type: AlertType,
    /// Derived from `deliveries`; see `alerts::state::derive_status`.
    pub status: DeliveryState,
    pub deliveries: Vec<ChannelDelivery>,
    pub acknowledged: bool,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn delivery(&self, channel: Channel) -> Option<&ChannelDelivery> {
        self.deliveries.iter().find(|d| d.channel == channel)
    }

    pub fn delivery_mut(&mut self, channel: Channel) -> Option<&mut ChannelDelivery> {
        self.deliveries.iter_mut().find(|d| d.channel == channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enabled_channels_are_ordered() {
        let prefs = AlertPreferences {
            subscriber_id: Uuid::new_v4(),
            threshold: 100.0,
            push: true,
            email: false,
            sms: true,
        };
        assert_eq!(prefs.enabled_channels(), vec![Channel::Push, Channel::Sms]);
    }

    #[test]
    fn default_preferences_enable_push_only() {
        let prefs = AlertPreferences::default_for(Uuid::new_v4());
        assert_eq!(prefs.threshold, AlertPreferences::DEFAULT_THRESHOLD);
        assert_eq!(prefs.enabled_channels(), vec![Channel::Push]);
    }
}
