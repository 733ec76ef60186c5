use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::db::models::{Alert, Channel, ChannelDelivery};

/// Delivery progress of an alert channel.
///
/// ```text
/// created ──► sent ──► delivered ──► read
///    │          │
///    └──────────┴──► failed (terminal)
/// ```
///
/// Mirrors the `delivery_state` Postgres enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "delivery_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Created,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl DeliveryState {
    /// Position on the success path. `Failed` is off the path.
    fn rank(self) -> Option<u8> {
        match self {
            DeliveryState::Created => Some(0),
            DeliveryState::Sent => Some(1),
            DeliveryState::Delivered => Some(2),
            DeliveryState::Read => Some(3),
            DeliveryState::Failed => None,
        }
    }

    /// Whether moving from `self` to `next` is a forward move.
    ///
    /// Skipping ahead (e.g. a read receipt arriving before the delivery
    /// receipt) is allowed; `failed` is only reachable before delivery.
    pub fn can_advance_to(self, next: DeliveryState) -> bool {
        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) => to > from,
            (Some(from), None) => from <= 1,
            (None, _) => false,
        }
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeliveryState::Created => "created",
            DeliveryState::Sent => "sent",
            DeliveryState::Delivered => "delivered",
            DeliveryState::Read => "read",
            DeliveryState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("delivery state cannot move from {from} to {to}")]
    Regression {
        from: DeliveryState,
        to: DeliveryState,
    },
    #[error("channel {0} was not enabled for this alert")]
    UnknownChannel(Channel),
}

impl ChannelDelivery {
    pub fn new(channel: Channel, now: DateTime<Utc>) -> Self {
        Self {
            channel,
            state: DeliveryState::Created,
            error: None,
            sent_at: None,
            updated_at: now,
        }
    }

    /// Move to `next`. Re-applying the current state is a no-op and returns
    /// `Ok(false)`, so duplicate transport callbacks are harmless.
    pub fn advance(
        &mut self,
        next: DeliveryState,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<bool, TransitionError> {
        if self.state == next {
            return Ok(false);
        }
        if !self.state.can_advance_to(next) {
            return Err(TransitionError::Regression {
                from: self.state,
                to: next,
            });
        }
        if next == DeliveryState::Sent {
            self.sent_at = Some(now);
        }
        if next == DeliveryState::Failed {
            self.error = error;
        }
        self.state = next;
        self.updated_at = now;
        Ok(true)
    }
}

/// Top-level alert status from its channel states.
///
/// - no channels → `created`
/// - every channel failed → `failed`
/// - otherwise the furthest success-path state reached by any channel
pub fn derive_status(deliveries: &[ChannelDelivery]) -> DeliveryState {
    if deliveries.is_empty() {
        return DeliveryState::Created;
    }
    if deliveries.iter().all(|d| d.state == DeliveryState::Failed) {
        return DeliveryState::Failed;
    }
    deliveries
        .iter()
        .filter_map(|d| d.state.rank().map(|r| (r, d.state)))
        .max_by_key(|(rank, _)| *rank)
        .map(|(_, state)| state)
        .unwrap_or(DeliveryState::Created)
}

impl Alert {
    /// Apply a transport callback for one channel and refresh `status`.
    pub fn advance_channel(
        &mut self,
        channel: Channel,
        next: DeliveryState,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<bool, TransitionError> {
        let delivery = self
            .delivery_mut(channel)
            .ok_or(TransitionError::UnknownChannel(channel))?;
        let changed = delivery.advance(next, error, now)?;
        self.status = derive_status(&self.deliveries);
        Ok(changed)
    }

    /// Subscriber opened the alert: set the read flag and move every channel
    /// that got the message through to `read`.
    pub fn mark_read(&mut self, now: DateTime<Utc>) {
        self.read = true;
        for delivery in &mut self.deliveries {
            if matches!(delivery.state, DeliveryState::Sent | DeliveryState::Delivered) {
                // Forward by construction.
                let _ = delivery.advance(DeliveryState::Read, None, now);
            }
        }
        self.status = derive_status(&self.deliveries);
    }
}
