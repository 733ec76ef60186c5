pub(crate) mod signing;
pub mod webhook;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::{
    aqi::AqiCategory,
    config::Config,
    db::models::{Alert, Channel},
};

pub use webhook::{DisabledTransport, WebhookTransport};

/// What every channel sends for one alert. Transports add the recipient.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub data: PayloadData,
}

/// Structured fields for clients that render their own notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayloadData {
    pub alert_id: Uuid,
    pub location_id: Uuid,
    pub location_name: String,
    pub index: f64,
    pub category: AqiCategory,
}

impl NotificationPayload {
    pub fn from_alert(alert: &Alert) -> Self {
        Self {
            title: format!("Air quality {}", alert.reading.category.label()),
            body: alert.message.clone(),
            data: PayloadData {
                alert_id: alert.id,
                location_id: alert.location_id,
                location_name: alert.location_name.clone(),
                index: alert.reading.index,
                category: alert.reading.category,
            },
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("gateway rejected the notification with status {status}")]
    Rejected { status: u16 },
    /// The device token is no longer valid and should be forgotten.
    #[error("recipient is no longer registered")]
    Unregistered,
    #[error("subscriber has no address for this channel")]
    MissingRecipient,
    #[error("channel transport is not configured")]
    NotConfigured,
    #[error("delivery timed out")]
    Timeout,
}

impl DeliveryError {
    /// Stable error class recorded on the channel delivery.
    pub fn kind(&self) -> &'static str {
        match self {
            DeliveryError::Transport(_) => "transport_error",
            DeliveryError::Rejected { .. } => "rejected",
            DeliveryError::Unregistered => "unregistered",
            DeliveryError::MissingRecipient => "missing_recipient",
            DeliveryError::NotConfigured => "not_configured",
            DeliveryError::Timeout => "timeout",
        }
    }
}

/// One outbound channel: push gateway, mail relay or SMS gateway.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Send `payload` to one recipient (device token, e-mail address or
    /// phone number).
    async fn deliver(&self, recipient: &str, payload: &NotificationPayload)
        -> Result<(), DeliveryError>;
}

/// One transport per channel. Channels without a gateway get a
/// [`DisabledTransport`].
#[derive(Clone)]
pub struct Transports {
    pub push: Arc<dyn ChannelTransport>,
    pub email: Arc<dyn ChannelTransport>,
    pub sms: Arc<dyn ChannelTransport>,
}

impl Transports {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.delivery_timeout_secs);
        let build = |channel: Channel, url: &Option<String>| -> anyhow::Result<Arc<dyn ChannelTransport>> {
            match url {
                Some(url) => Ok(Arc::new(WebhookTransport::new(
                    channel,
                    url,
                    config.webhook_signing_secret.clone(),
                    timeout,
                )?)),
                None => {
                    warn!(channel = %channel, "No webhook configured; channel deliveries will fail");
                    Ok(Arc::new(DisabledTransport))
                }
            }
        };

        Ok(Self {
            push: build(Channel::Push, &config.push_webhook_url)?,
            email: build(Channel::Email, &config.email_webhook_url)?,
            sms: build(Channel::Sms, &config.sms_webhook_url)?,
        })
    }

    pub fn get(&self, channel: Channel) -> &dyn ChannelTransport {
        match channel {
            Channel::Push => self.push.as_ref(),
            Channel::Email => self.email.as_ref(),
            Channel::Sms => self.sms.as_ref(),
        }
    }
}
