use std::{sync::Arc, time::Duration};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    alerts::{state::DeliveryState, AlertEngine, Dispatcher},
    db::models::{Alert, Subscriber, SubscriberLocation},
    history::HistoryRecorder,
    source::{ReadingSource, SourceError},
    store::{AlertMutation, AlertStore, StoreError, SubscriberDirectory},
};

/// How one (subscriber, location) pair ended this cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum PairOutcome {
    /// Nothing usable was fetched; no history, no alert.
    Skipped { reason: &'static str },
    /// Reading recorded, no alert warranted.
    NoAlert,
    Alerted { alert_id: Uuid, status: DeliveryState },
}

#[derive(Debug, Error)]
pub enum PairError {
    #[error("failed to record reading: {0}")]
    History(#[source] StoreError),
    #[error("failed to load subscriber data: {0}")]
    Directory(#[source] StoreError),
    #[error("failed to persist alert: {0}")]
    Alert(#[source] StoreError),
}

impl PairError {
    /// Writes the operator has to hear about, as opposed to lookups that
    /// simply retry next cycle.
    pub fn is_persistence(&self) -> bool {
        matches!(self, PairError::History(_) | PairError::Alert(_))
    }
}

/// read → record → decide → dispatch for one pair. Stages run in order and
/// each pair is independent of every other.
pub struct Pipeline {
    source: Arc<dyn ReadingSource>,
    history: HistoryRecorder,
    engine: AlertEngine,
    dispatcher: Dispatcher,
    directory: Arc<dyn SubscriberDirectory>,
    alerts: Arc<dyn AlertStore>,
    fetch_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn ReadingSource>,
        history: HistoryRecorder,
        engine: AlertEngine,
        dispatcher: Dispatcher,
        directory: Arc<dyn SubscriberDirectory>,
        alerts: Arc<dyn AlertStore>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            source,
            history,
            engine,
            dispatcher,
            directory,
            alerts,
            fetch_timeout,
        }
    }

    pub async fn run_pair(
        &self,
        subscriber: &Subscriber,
        location: &SubscriberLocation,
    ) -> Result<PairOutcome, PairError> {
        let fetched = match tokio::time::timeout(
            self.fetch_timeout,
            self.source.fetch(location.coordinate),
        )
        .await
        {
            Ok(Ok(fetched)) => fetched,
            Ok(Err(e)) => return Ok(self.skip(location, e)),
            Err(_) => {
                let e = SourceError::Unavailable(format!(
                    "no answer within {}s",
                    self.fetch_timeout.as_secs()
                ));
                return Ok(self.skip(location, e));
            }
        };

        let now = Utc::now();
        let recorded = self
            .history
            .record(location.id, fetched, now)
            .await
            .map_err(PairError::History)?;
        debug!(
            location_id = %location.id,
            index = recorded.reading.index,
            category = %recorded.reading.category,
            "Reading recorded"
        );

        let prefs = self
            .directory
            .preferences(subscriber.id)
            .await
            .map_err(PairError::Directory)?;

        let Some(mut alert) = self
            .engine
            .decide(location, &recorded.reading, recorded.previous.as_ref(), &prefs, now)
            .await
        else {
            return Ok(PairOutcome::NoAlert);
        };

        self.alerts.insert(&alert).await.map_err(PairError::Alert)?;
        self.engine.record_raised(&alert).await;
        info!(
            alert_id = %alert.id,
            subscriber_id = %subscriber.id,
            location_id = %location.id,
            alert_type = ?alert.alert_type,
            index = alert.reading.index,
            "Alert raised"
        );

        let report = self.dispatcher.dispatch(&alert, subscriber).await;
        report.apply(&mut alert);

        let mutation: AlertMutation = {
            let report = report.clone();
            Box::new(move |stored: &mut Alert| {
                report.apply(stored);
                Ok(())
            })
        };
        let status = match self.alerts.update(alert.id, mutation).await {
            Ok(Some(stored)) => stored.status,
            Ok(None) => {
                debug!(alert_id = %alert.id, "Alert deleted before delivery results were saved");
                alert.status
            }
            Err(e) => return Err(PairError::Alert(e)),
        };

        Ok(PairOutcome::Alerted {
            alert_id: alert.id,
            status,
        })
    }

    fn skip(&self, location: &SubscriberLocation, error: SourceError) -> PairOutcome {
        warn!(
            location_id = %location.id,
            kind = error.kind(),
            error = %error,
            "Skipping location this cycle"
        );
        PairOutcome::Skipped {
            reason: error.kind(),
        }
    }
}
