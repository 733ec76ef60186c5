use std::{sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode, Url};
use serde::Serialize;
use tracing::debug;

use super::{
    signing::WebhookSignature,
    ChannelTransport, DeliveryError, NotificationPayload,
};
use crate::db::models::Channel;

/// Delivers notifications by POSTing JSON to a channel gateway
/// (push relay, mail relay or SMS gateway).
#[derive(Debug, Clone)]
pub struct WebhookTransport {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    http: Client,
    url: Url,
    channel: Channel,
    signing_secret: Option<String>,
}

#[derive(Serialize)]
struct WebhookRequest<'a> {
    channel: Channel,
    recipient: &'a str,
    #[serde(flatten)]
    payload: &'a NotificationPayload,
}

impl WebhookTransport {
    pub fn new(
        channel: Channel,
        url: &str,
        signing_secret: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let url = Url::parse(url).with_context(|| format!("invalid {channel} webhook URL"))?;
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                url,
                channel,
                signing_secret,
            }),
        })
    }

    fn path_and_query(&self) -> String {
        let url = &self.inner.url;
        match url.query() {
            Some(q) => format!("{}?{}", url.path(), q),
            None => url.path().to_owned(),
        }
    }
}

#[async_trait]
impl ChannelTransport for WebhookTransport {
    async fn deliver(
        &self,
        recipient: &str,
        payload: &NotificationPayload,
    ) -> Result<(), DeliveryError> {
        let channel = self.inner.channel;
        let body = serde_json::to_vec(&WebhookRequest {
            channel,
            recipient,
            payload,
        })
        .map_err(|e| DeliveryError::Transport(format!("failed to serialize payload: {e}")))?;

        let mut request = self
            .inner
            .http
            .post(self.inner.url.clone())
            .header(header::CONTENT_TYPE, "application/json");

        if let Some(secret) = &self.inner.signing_secret {
            let headers = WebhookSignature::sign(secret, "POST", &self.path_and_query(), &body)
                .headers()
                .map_err(|e| DeliveryError::Transport(format!("invalid signature header: {e}")))?;
            request = request.headers(headers);
        }

        debug!(channel = %channel, alert_id = %payload.data.alert_id, "Posting notification");

        let response = request.body(body).send().await.map_err(|e| {
            if e.is_timeout() {
                DeliveryError::Timeout
            } else {
                DeliveryError::Transport(e.without_url().to_string())
            }
        })?;

        classify_status(channel, response.status())
    }
}

fn classify_status(channel: Channel, status: StatusCode) -> Result<(), DeliveryError> {
    if status.is_success() {
        return Ok(());
    }
    // Only 410 is token-specific; a 404 usually means a wrong gateway URL.
    match (channel, status) {
        (Channel::Push, StatusCode::GONE) => Err(DeliveryError::Unregistered),
        _ => Err(DeliveryError::Rejected {
            status: status.as_u16(),
        }),
    }
}

/// Stands in for a channel whose gateway URL is not configured, so the
/// channel fails with a clear error class instead of being skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledTransport;

#[async_trait]
impl ChannelTransport for DisabledTransport {
    async fn deliver(
        &self,
        _recipient: &str,
        _payload: &NotificationPayload,
    ) -> Result<(), DeliveryError> {
        Err(DeliveryError::NotConfigured)
    }
}
