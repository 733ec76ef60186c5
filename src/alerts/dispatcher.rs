use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, info, warn};

use super::state::DeliveryState;
use crate::{
    db::models::{Alert, Channel, Subscriber},
    notify::{ChannelTransport, DeliveryError, NotificationPayload, Transports},
    store::SubscriberDirectory,
};

/// Result of one channel attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelResult {
    Sent { at: DateTime<Utc> },
    Failed { error_class: &'static str, at: DateTime<Utc> },
}

/// A push token that could not be reached while its siblings may have been.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenFailure {
    pub token: String,
    pub error_class: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelOutcome {
    pub channel: Channel,
    pub result: ChannelResult,
    pub token_failures: Vec<TokenFailure>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub outcomes: Vec<ChannelOutcome>,
}

impl DispatchReport {
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.result, ChannelResult::Failed { .. }))
            .count()
    }

    /// Record the outcomes on `alert`. A channel that already moved past
    /// the outcome, e.g. a delivery receipt that raced the dispatch, keeps
    /// its state.
    pub fn apply(&self, alert: &mut Alert) {
        for outcome in &self.outcomes {
            let (next, error, at) = match &outcome.result {
                ChannelResult::Sent { at } => (DeliveryState::Sent, None, *at),
                ChannelResult::Failed { error_class, at } => {
                    (DeliveryState::Failed, Some((*error_class).to_owned()), *at)
                }
            };
            if let Err(e) = alert.advance_channel(outcome.channel, next, error, at) {
                debug!(alert_id = %alert.id, channel = %outcome.channel, error = %e, "Outcome not applied");
            }
        }
    }
}

/// Sends alerts over every channel they were raised for.
#[derive(Clone)]
pub struct Dispatcher {
    transports: Transports,
    directory: Arc<dyn SubscriberDirectory>,
    /// Upper bound for one transport call.
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        transports: Transports,
        directory: Arc<dyn SubscriberDirectory>,
        timeout: Duration,
    ) -> Self {
        Self {
            transports,
            directory,
            timeout,
        }
    }

    /// Attempt every channel of `alert` that has not been attempted yet.
    ///
    /// Channels run concurrently and never affect one another; this call
    /// itself cannot fail.
    pub async fn dispatch(&self, alert: &Alert, subscriber: &Subscriber) -> DispatchReport {
        let payload = NotificationPayload::from_alert(alert);
        let pending = alert
            .deliveries
            .iter()
            .filter(|d| d.state == DeliveryState::Created)
            .map(|d| d.channel);

        let outcomes = join_all(pending.map(|channel| self.send_channel(channel, subscriber, &payload))).await;

        for outcome in &outcomes {
            match &outcome.result {
                ChannelResult::Sent { .. } => {
                    info!(alert_id = %alert.id, channel = %outcome.channel, "Notification sent")
                }
                ChannelResult::Failed { error_class, .. } => warn!(
                    alert_id = %alert.id,
                    channel = %outcome.channel,
                    error_class,
                    "Notification failed"
                ),
            }
        }

        DispatchReport { outcomes }
    }

    async fn send_channel(
        &self,
        channel: Channel,
        subscriber: &Subscriber,
        payload: &NotificationPayload,
    ) -> ChannelOutcome {
        let transport = self.transports.get(channel);
        let (result, token_failures) = match channel {
            Channel::Push => self.send_push(transport, subscriber, payload).await,
            Channel::Email => (
                self.send_single(transport, subscriber.email.as_deref(), payload).await,
                Vec::new(),
            ),
            Channel::Sms => (
                self.send_single(transport, subscriber.phone.as_deref(), payload).await,
                Vec::new(),
            ),
        };

        let at = Utc::now();
        let result = match result {
            Ok(()) => ChannelResult::Sent { at },
            Err(e) => ChannelResult::Failed {
                error_class: e.kind(),
                at,
            },
        };
        ChannelOutcome {
            channel,
            result,
            token_failures,
        }
    }

    async fn send_single(
        &self,
        transport: &dyn ChannelTransport,
        recipient: Option<&str>,
        payload: &NotificationPayload,
    ) -> Result<(), DeliveryError> {
        let recipient = recipient
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or(DeliveryError::MissingRecipient)?;
        self.deliver(transport, recipient, payload).await
    }

    /// Fan out over every device token. The channel succeeds when at least
    /// one token accepted the notification; tokens reported as unregistered
    /// are removed from the directory.
    async fn send_push(
        &self,
        transport: &dyn ChannelTransport,
        subscriber: &Subscriber,
        payload: &NotificationPayload,
    ) -> (Result<(), DeliveryError>, Vec<TokenFailure>) {
        let tokens = match self.directory.device_tokens(subscriber.id).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(subscriber_id = %subscriber.id, error = %e, "Failed to load device tokens");
                return (Err(DeliveryError::Transport(e.to_string())), Vec::new());
            }
        };
        if tokens.is_empty() {
            return (Err(DeliveryError::MissingRecipient), Vec::new());
        }

        let results = join_all(
            tokens
                .iter()
                .map(|token| self.deliver(transport, token, payload)),
        )
        .await;

        let mut delivered = false;
        let mut first_error = None;
        let mut failures = Vec::new();
        for (token, result) in tokens.iter().zip(results) {
            match result {
                Ok(()) => delivered = true,
                Err(e) => {
                    if e == DeliveryError::Unregistered {
                        self.prune_token(subscriber, token).await;
                    }
                    failures.push(TokenFailure {
                        token: token.clone(),
                        error_class: e.kind(),
                    });
                    first_error.get_or_insert(e);
                }
            }
        }

        let result = match (delivered, first_error) {
            (true, _) | (false, None) => Ok(()),
            (false, Some(e)) => Err(e),
        };
        (result, failures)
    }

    async fn prune_token(&self, subscriber: &Subscriber, token: &str) {
        match self.directory.remove_device_token(subscriber.id, token).await {
            Ok(()) => info!(subscriber_id = %subscriber.id, "Removed unregistered device token"),
            Err(e) => warn!(subscriber_id = %subscriber.id, error = %e, "Failed to remove device token"),
        }
    }

    async fn deliver(
        &self,
        transport: &dyn ChannelTransport,
        recipient: &str,
        payload: &NotificationPayload,
    ) -> Result<(), DeliveryError> {
        match tokio::time::timeout(self.timeout, transport.deliver(recipient, payload)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout),
        }
    }
}
