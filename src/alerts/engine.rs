use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::state::derive_status;
use crate::{
    aqi::recommendations,
    config::SuppressionMode,
    db::models::{Alert, AlertPreferences, AlertType, ChannelDelivery, Reading, SubscriberLocation},
};

/// Decide whether `reading` warrants an alert.
///
/// A reading at or above the subscriber's threshold raises a `threshold`
/// alert. Otherwise, with `change_alerts` on, a category different from the
/// previous reading raises a `change` alert. Anything else is a no-op.
/// When both hold, the threshold alert wins and still carries `previous`.
pub fn evaluate(
    location: &SubscriberLocation,
    reading: &Reading,
    previous: Option<&Reading>,
    prefs: &AlertPreferences,
    change_alerts: bool,
    now: DateTime<Utc>,
) -> Option<Alert> {
    if reading.index < prefs.threshold {
        return change_alert(location, reading, previous, prefs, change_alerts, now);
    }

    let message = format!(
        "Air quality at {} is {} (AQI {:.0}), at or above your alert threshold of {:.0}.",
        location.name,
        reading.category.label(),
        reading.index,
        prefs.threshold
    );
    Some(build(location, reading, previous, prefs, AlertType::Threshold, message, now))
}

/// A `change` alert when the category moved since `previous`, whatever the
/// threshold says.
fn change_alert(
    location: &SubscriberLocation,
    reading: &Reading,
    previous: Option<&Reading>,
    prefs: &AlertPreferences,
    change_alerts: bool,
    now: DateTime<Utc>,
) -> Option<Alert> {
    let prev = previous.filter(|p| change_alerts && p.category != reading.category)?;
    let message = format!(
        "Air quality at {} changed from {} to {} (AQI {:.0}).",
        location.name,
        prev.category.label(),
        reading.category.label(),
        reading.index
    );
    Some(build(location, reading, previous, prefs, AlertType::Change, message, now))
}

fn build(
    location: &SubscriberLocation,
    reading: &Reading,
    previous: Option<&Reading>,
    prefs: &AlertPreferences,
    alert_type: AlertType,
    message: String,
    now: DateTime<Utc>,
) -> Alert {
    let deliveries: Vec<ChannelDelivery> = prefs
        .enabled_channels()
        .into_iter()
        .map(|channel| ChannelDelivery::new(channel, now))
        .collect();

    Alert {
        id: Uuid::new_v4(),
        subscriber_id: prefs.subscriber_id,
        location_id: location.id,
        location_name: location.name.clone(),
        reading: reading.clone(),
        previous_reading: previous.cloned(),
        message,
        recommendations: recommendations(reading.category),
        alert_type,
        status: derive_status(&deliveries),
        deliveries,
        acknowledged: false,
        read: false,
        created_at: now,
    }
}

/// Applies the configured alert policies on top of [`evaluate`].
#[derive(Debug)]
pub struct AlertEngine {
    change_alerts: bool,
    suppression: SuppressionMode,
    /// (subscriber, location) pairs with an outstanding threshold alert.
    raised: Mutex<HashSet<(Uuid, Uuid)>>,
}

impl AlertEngine {
    pub fn new(change_alerts: bool, suppression: SuppressionMode) -> Self {
        Self {
            change_alerts,
            suppression,
            raised: Mutex::new(HashSet::new()),
        }
    }

    /// Apply the policies to a fresh reading. Does not touch the suppression
    /// ledger beyond clearing it on recovery; call [`AlertEngine::record_raised`]
    /// once the alert is stored.
    pub async fn decide(
        &self,
        location: &SubscriberLocation,
        reading: &Reading,
        previous: Option<&Reading>,
        prefs: &AlertPreferences,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        if self.suppression == SuppressionMode::UntilRecovered {
            let key = (prefs.subscriber_id, location.id);
            let mut raised = self.raised.lock().await;
            if reading.index < prefs.threshold {
                raised.remove(&key);
            } else if raised.contains(&key) {
                debug!(
                    subscriber_id = %prefs.subscriber_id,
                    location_id = %location.id,
                    index = reading.index,
                    "Threshold alert suppressed until recovery"
                );
                return change_alert(location, reading, previous, prefs, self.change_alerts, now);
            }
        }

        evaluate(location, reading, previous, prefs, self.change_alerts, now)
    }

    /// Mark the pair of a stored threshold alert as raised, so repeats stay
    /// quiet until the index recovers.
    pub async fn record_raised(&self, alert: &Alert) {
        if self.suppression == SuppressionMode::UntilRecovered
            && alert.alert_type == AlertType::Threshold
        {
            self.raised
                .lock()
                .await
                .insert((alert.subscriber_id, alert.location_id));
        }
    }
}
