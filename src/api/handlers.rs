use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use utoipa::OpenApi;
use uuid::Uuid;

use super::{
    dto::{AlertDto, ChannelDeliveryDto, DeliveryCallbackRequest, ReadingDto, SubIndexDto},
    errors::AppError,
    AppState,
};
use crate::{
    alerts::state::DeliveryState,
    analytics::{
        self, ComparisonEntry, ExposureScore, ForecastPoint, LocationComparison, LocationIndex,
        RankedLocation, RiskLevel, Trend, TrendDirection, MAX_FORECAST_HOURS,
    },
    aqi::{self, AqiCategory, Pollutant},
    db::models::{Alert, AlertType, Channel},
    store::AlertMutation,
};

// ---------------------------------------------------------------------------
// Query parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TimeRangeParams {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct AlertListParams {
    pub acknowledged: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ForecastParams {
    pub hours: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SubIndexParams {
    pub pollutant: String,
    pub concentration: f64,
}

impl TimeRangeParams {
    fn validate(&self) -> Result<(), AppError> {
        match (self.from, self.to) {
            (Some(from), Some(to)) if from > to => {
                Err(AppError::BadRequest("`from` must not be after `to`".to_owned()))
            }
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// List a subscriber's alerts, newest first. Filter with
/// `?acknowledged=true|false`.
#[utoipa::path(
    get,
    path = "/subscribers/{subscriber_id}/alerts",
    params(
        ("subscriber_id" = Uuid, Path, description = "Subscriber ID"),
        ("acknowledged" = Option<bool>, Query, description = "Only acknowledged (true) or unacknowledged (false) alerts"),
    ),
    responses(
        (status = 200, description = "Alerts, newest first", body = Vec<AlertDto>),
        (status = 500, description = "Internal server error"),
    ),
    tag = "alerts"
)]
pub async fn list_alerts(
    State(state): State<AppState>,
    Path(subscriber_id): Path<Uuid>,
    Query(params): Query<AlertListParams>,
) -> Result<Json<Vec<AlertDto>>, AppError> {
    let alerts = state.alerts.list(subscriber_id, params.acknowledged).await?;
    Ok(Json(alerts.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/alerts/{alert_id}",
    params(("alert_id" = Uuid, Path, description = "Alert ID")),
    responses(
        (status = 200, description = "Alert", body = AlertDto),
        (status = 404, description = "Alert not found"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "alerts"
)]
pub async fn get_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
) -> Result<Json<AlertDto>, AppError> {
    let alert = state
        .alerts
        .get(alert_id)
        .await?
        .ok_or(AppError::NotFound("alert"))?;
    Ok(Json(alert.into()))
}

#[utoipa::path(
    post,
    path = "/alerts/{alert_id}/acknowledge",
    params(("alert_id" = Uuid, Path, description = "Alert ID")),
    responses(
        (status = 200, description = "Acknowledged alert", body = AlertDto),
        (status = 404, description = "Alert not found"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "alerts"
)]
pub async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
) -> Result<Json<AlertDto>, AppError> {
    let mutation: AlertMutation = Box::new(|alert: &mut Alert| {
        alert.acknowledged = true;
        Ok(())
    });
    update_alert(&state, alert_id, mutation).await
}

/// Mark the alert read. Channels that got the message through move to
/// `read`.
#[utoipa::path(
    post,
    path = "/alerts/{alert_id}/read",
    params(("alert_id" = Uuid, Path, description = "Alert ID")),
    responses(
        (status = 200, description = "Alert marked read", body = AlertDto),
        (status = 404, description = "Alert not found"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "alerts"
)]
pub async fn mark_alert_read(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
) -> Result<Json<AlertDto>, AppError> {
    let now = Utc::now();
    let mutation: AlertMutation = Box::new(move |alert: &mut Alert| {
        alert.mark_read(now);
        Ok(())
    });
    update_alert(&state, alert_id, mutation).await
}

#[utoipa::path(
    delete,
    path = "/alerts/{alert_id}",
    params(("alert_id" = Uuid, Path, description = "Alert ID")),
    responses(
        (status = 204, description = "Alert deleted"),
        (status = 404, description = "Alert not found"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "alerts"
)]
pub async fn delete_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.alerts.delete(alert_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("alert"))
    }
}

/// Delivery receipt from a channel gateway. Moves the channel forward to
/// `delivered`, `read` or `failed`; repeating a receipt is harmless and a
/// backward move is rejected with 409.
#[utoipa::path(
    post,
    path = "/alerts/{alert_id}/deliveries/{channel}",
    params(
        ("alert_id" = Uuid, Path, description = "Alert ID"),
        ("channel" = Channel, Path, description = "Delivery channel"),
    ),
    request_body = DeliveryCallbackRequest,
    responses(
        (status = 200, description = "Updated alert", body = AlertDto),
        (status = 400, description = "State cannot be reported by a gateway"),
        (status = 404, description = "Alert not found"),
        (status = 409, description = "Transition not allowed"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "alerts"
)]
pub async fn record_delivery(
    State(state): State<AppState>,
    Path((alert_id, channel)): Path<(Uuid, Channel)>,
    Json(body): Json<DeliveryCallbackRequest>,
) -> Result<Json<AlertDto>, AppError> {
    if !matches!(
        body.state,
        DeliveryState::Delivered | DeliveryState::Read | DeliveryState::Failed
    ) {
        return Err(AppError::BadRequest(format!(
            "gateways may only report delivered, read or failed, got {}",
            body.state
        )));
    }

    let now = Utc::now();
    let mutation: AlertMutation = Box::new(move |alert: &mut Alert| {
        alert
            .advance_channel(channel, body.state, body.error, now)
            .map(|_| ())
    });
    update_alert(&state, alert_id, mutation).await
}

async fn update_alert(
    state: &AppState,
    alert_id: Uuid,
    mutation: AlertMutation,
) -> Result<Json<AlertDto>, AppError> {
    let alert = state
        .alerts
        .update(alert_id, mutation)
        .await?
        .ok_or(AppError::NotFound("alert"))?;
    Ok(Json(alert.into()))
}

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// Reading history of a location, oldest first. Optionally filter by time
/// range with `?from=<RFC3339>&to=<RFC3339>`.
#[utoipa::path(
    get,
    path = "/locations/{location_id}/readings",
    params(
        ("location_id" = Uuid, Path, description = "Subscriber location ID"),
        ("from" = Option<DateTime<Utc>>, Query, description = "Start of time range (RFC3339)"),
        ("to"   = Option<DateTime<Utc>>, Query, description = "End of time range (RFC3339)"),
    ),
    responses(
        (status = 200, description = "Readings", body = Vec<ReadingDto>),
        (status = 400, description = "Invalid time range"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "readings"
)]
pub async fn get_readings(
    State(state): State<AppState>,
    Path(location_id): Path<Uuid>,
    Query(params): Query<TimeRangeParams>,
) -> Result<Json<Vec<ReadingDto>>, AppError> {
    params.validate()?;
    let rows = state.history.range(location_id, params.from, params.to).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/locations/{location_id}/readings/latest",
    params(("location_id" = Uuid, Path, description = "Subscriber location ID")),
    responses(
        (status = 200, description = "Latest reading, or null when none exists", body = ReadingDto),
        (status = 500, description = "Internal server error"),
    ),
    tag = "readings"
)]
pub async fn get_latest_reading(
    State(state): State<AppState>,
    Path(location_id): Path<Uuid>,
) -> Result<Json<Option<ReadingDto>>, AppError> {
    let row = state.history.latest(location_id).await?;
    Ok(Json(row.map(Into::into)))
}

/// Average, min, max, direction and a one-step forecast over a period.
#[utoipa::path(
    get,
    path = "/locations/{location_id}/trend",
    params(
        ("location_id" = Uuid, Path, description = "Subscriber location ID"),
        ("from" = Option<DateTime<Utc>>, Query, description = "Start of time range (RFC3339)"),
        ("to"   = Option<DateTime<Utc>>, Query, description = "End of time range (RFC3339)"),
    ),
    responses(
        (status = 200, description = "Trend over the period", body = Trend),
        (status = 400, description = "Invalid time range"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "readings"
)]
pub async fn get_trend(
    State(state): State<AppState>,
    Path(location_id): Path<Uuid>,
    Query(params): Query<TimeRangeParams>,
) -> Result<Json<Trend>, AppError> {
    params.validate()?;
    let rows = state.history.range(location_id, params.from, params.to).await?;
    Ok(Json(analytics::trend(&rows)))
}

/// Compare the latest index across a subscriber's locations. Locations
/// without readings are left out.
#[utoipa::path(
    get,
    path = "/subscribers/{subscriber_id}/locations/compare",
    params(("subscriber_id" = Uuid, Path, description = "Subscriber ID")),
    responses(
        (status = 200, description = "Comparison", body = LocationComparison),
        (status = 500, description = "Internal server error"),
    ),
    tag = "readings"
)]
pub async fn compare_locations(
    State(state): State<AppState>,
    Path(subscriber_id): Path<Uuid>,
) -> Result<Json<LocationComparison>, AppError> {
    let mut latest = Vec::new();
    for location in state.directory.locations(subscriber_id).await? {
        if let Some(reading) = state.history.latest(location.id).await? {
            latest.push(LocationIndex {
                location_id: location.id,
                name: location.name,
                index: reading.index,
            });
        }
    }
    Ok(Json(analytics::compare_locations(&latest)))
}

/// Duration-weighted exposure over the last day, week and 30 days.
#[utoipa::path(
    get,
    path = "/locations/{location_id}/exposure",
    params(("location_id" = Uuid, Path, description = "Subscriber location ID")),
    responses(
        (status = 200, description = "Exposure score", body = ExposureScore),
        (status = 500, description = "Internal server error"),
    ),
    tag = "readings"
)]
pub async fn get_exposure(
    State(state): State<AppState>,
    Path(location_id): Path<Uuid>,
) -> Result<Json<ExposureScore>, AppError> {
    let now = Utc::now();
    let rows = state
        .history
        .range(location_id, Some(now - Duration::days(30)), None)
        .await?;
    let samples = analytics::exposure_samples(&rows);
    Ok(Json(analytics::exposure_score(&samples, now)))
}

/// Hour-by-hour projection from the location's daily pattern. Empty until a
/// day of readings exists.
#[utoipa::path(
    get,
    path = "/locations/{location_id}/forecast",
    params(
        ("location_id" = Uuid, Path, description = "Subscriber location ID"),
        ("hours" = Option<u32>, Query, description = "Hours ahead, 1 to 72 (default 24)"),
    ),
    responses(
        (status = 200, description = "Projected readings", body = Vec<ForecastPoint>),
        (status = 400, description = "Invalid horizon"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "readings"
)]
pub async fn get_forecast(
    State(state): State<AppState>,
    Path(location_id): Path<Uuid>,
    Query(params): Query<ForecastParams>,
) -> Result<Json<Vec<ForecastPoint>>, AppError> {
    let hours = params.hours.unwrap_or(24);
    if !(1..=MAX_FORECAST_HOURS).contains(&hours) {
        return Err(AppError::BadRequest(format!(
            "`hours` must be between 1 and {MAX_FORECAST_HOURS}"
        )));
    }
    let since = Utc::now() - Duration::hours(analytics::PATTERN_WINDOW_HOURS);
    let rows = state.history.range(location_id, Some(since), None).await?;
    Ok(Json(analytics::hourly_forecast(&rows, hours)))
}

/// Sub-index of a single pollutant concentration, e.g.
/// `?pollutant=pm25&concentration=35.4`.
#[utoipa::path(
    get,
    path = "/aqi/sub-index",
    params(
        ("pollutant" = String, Query, description = "pm25, pm10, o3, co, so2 or no2"),
        ("concentration" = f64, Query, description = "µg/m³ for PM, ppm for O3 and CO, ppb for SO2 and NO2"),
    ),
    responses(
        (status = 200, description = "Sub-index", body = SubIndexDto),
        (status = 400, description = "Unknown pollutant or invalid concentration"),
    ),
    tag = "readings"
)]
pub async fn get_sub_index(
    Query(params): Query<SubIndexParams>,
) -> Result<Json<SubIndexDto>, AppError> {
    let pollutant: Pollutant = params
        .pollutant
        .parse()
        .map_err(|e: aqi::UnknownPollutant| AppError::BadRequest(e.to_string()))?;
    let index = aqi::sub_index(pollutant, params.concentration).ok_or_else(|| {
        AppError::BadRequest("concentration must be a non-negative number".to_owned())
    })?;
    let c = aqi::classify(f64::from(index));
    Ok(Json(SubIndexDto {
        pollutant,
        concentration: params.concentration,
        index,
        category: c.category,
        color: c.color.to_owned(),
    }))
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Returns `200 OK` with `{"status":"ok"}` when the server is running.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
    ),
    tag = "system"
)]
pub async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// OpenAPI document
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(
        list_alerts,
        get_alert,
        acknowledge_alert,
        mark_alert_read,
        delete_alert,
        record_delivery,
        get_readings,
        get_latest_reading,
        get_trend,
        get_exposure,
        get_forecast,
        get_sub_index,
        compare_locations,
        health
    ),
    components(schemas(
        AlertDto,
        ChannelDeliveryDto,
        ReadingDto,
        DeliveryCallbackRequest,
        AlertType,
        AqiCategory,
        Channel,
        DeliveryState,
        Trend,
        TrendDirection,
        LocationComparison,
        RankedLocation,
        ComparisonEntry,
        ExposureScore,
        RiskLevel,
        ForecastPoint,
        Pollutant,
        SubIndexDto
    )),
    tags(
        (name = "alerts",   description = "Subscriber alerts and delivery receipts"),
        (name = "readings", description = "Reading history and aggregates"),
        (name = "system",   description = "System endpoints"),
    ),
    info(
        title = "AQI Alert Service API",
        version = "0.1.0",
        description = "REST API for air quality alerts and reading history"
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, sync::Arc};

    use axum_test::TestServer;
    use serde_json::{json, Value};

    use crate::{
        alerts::engine::evaluate,
        api::{router, AppState},
        aqi::classify,
        db::models::{AlertPreferences, Coordinate, Reading, SubscriberLocation},
        store::{memory::MemoryStore, AlertStore, HistoryStore},
    };

    use super::*;

    fn test_server(store: &MemoryStore) -> TestServer {
        let store = Arc::new(store.clone());
        TestServer::new(router(AppState {
            directory: store.clone(),
            history: store.clone(),
            alerts: store,
        }))
        .unwrap()
    }

    fn location(subscriber_id: Uuid, name: &str) -> SubscriberLocation {
        SubscriberLocation {
            id: Uuid::new_v4(),
            subscriber_id,
            name: name.to_owned(),
            coordinate: Coordinate {
                latitude: 51.11,
                longitude: 17.03,
            },
            is_primary: false,
        }
    }

    fn reading(location_id: Uuid, index: f64, at: DateTime<Utc>) -> Reading {
        Reading {
            id: Uuid::new_v4(),
            location_id,
            index,
            category: classify(index).category,
            dominant_pollutant: "pm25".to_owned(),
            pollutants: BTreeMap::from([("pm25".to_owned(), index)]),
            source: "test".to_owned(),
            recorded_at: at,
        }
    }

    /// Stores a threshold alert with push and e-mail deliveries.
    async fn seed_alert(store: &MemoryStore, subscriber_id: Uuid, index: f64) -> Alert {
        let loc = location(subscriber_id, "Wroclaw");
        let prefs = AlertPreferences {
            email: true,
            ..AlertPreferences::default_for(subscriber_id)
        };
        let alert = evaluate(&loc, &reading(loc.id, index, Utc::now()), None, &prefs, true, Utc::now())
            .unwrap();
        store.insert(&alert).await.unwrap();
        alert
    }

    async fn seed_sent_alert(store: &MemoryStore, subscriber_id: Uuid) -> Alert {
        let alert = seed_alert(store, subscriber_id, 160.0).await;
        let mutation: AlertMutation = Box::new(|a: &mut Alert| {
            a.advance_channel(Channel::Push, DeliveryState::Sent, None, Utc::now())?;
            a.advance_channel(Channel::Email, DeliveryState::Sent, None, Utc::now())?;
            Ok(())
        });
        store.update(alert.id, mutation).await.unwrap().unwrap()
    }

    // -----------------------------------------------------------------------
    // Alerts
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn list_alerts_filters_by_acknowledgement() {
        let store = MemoryStore::new();
        let subscriber_id = Uuid::new_v4();
        let first = seed_alert(&store, subscriber_id, 120.0).await;
        seed_alert(&store, subscriber_id, 140.0).await;
        seed_alert(&store, Uuid::new_v4(), 150.0).await;

        let server = test_server(&store);
        server
            .post(&format!("/alerts/{}/acknowledge", first.id))
            .await
            .assert_status_ok();

        let all: Vec<Value> = server
            .get(&format!("/subscribers/{subscriber_id}/alerts"))
            .await
            .json();
        assert_eq!(all.len(), 2);

        let acked: Vec<Value> = server
            .get(&format!("/subscribers/{subscriber_id}/alerts"))
            .add_query_param("acknowledged", true)
            .await
            .json();
        assert_eq!(acked.len(), 1);
        assert_eq!(acked[0]["id"], first.id.to_string());
        assert_eq!(acked[0]["acknowledged"], true);

        let open: Vec<Value> = server
            .get(&format!("/subscribers/{subscriber_id}/alerts"))
            .add_query_param("acknowledged", false)
            .await
            .json();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0]["reading"]["index"], 140.0);
    }

    #[tokio::test]
    async fn get_alert_returns_snapshot_with_display_fields() {
        let store = MemoryStore::new();
        let alert = seed_alert(&store, Uuid::new_v4(), 160.0).await;

        let resp = test_server(&store).get(&format!("/alerts/{}", alert.id)).await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["alert_type"], "threshold");
        assert_eq!(body["status"], "created");
        assert_eq!(body["reading"]["category"], "unhealthy");
        assert_eq!(body["reading"]["color"], "#FF0000");
        assert_eq!(body["reading"]["label"], "Unhealthy");
        assert_eq!(body["deliveries"].as_array().unwrap().len(), 2);
        assert!(!body["recommendations"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_alert_is_404() {
        let store = MemoryStore::new();
        let server = test_server(&store);
        let id = Uuid::new_v4();

        server.get(&format!("/alerts/{id}")).await.assert_status_not_found();
        server
            .post(&format!("/alerts/{id}/acknowledge"))
            .await
            .assert_status_not_found();
        server.delete(&format!("/alerts/{id}")).await.assert_status_not_found();
    }

    #[tokio::test]
    async fn mark_read_advances_sent_channels() {
        let store = MemoryStore::new();
        let alert = seed_sent_alert(&store, Uuid::new_v4()).await;

        let resp = test_server(&store)
            .post(&format!("/alerts/{}/read", alert.id))
            .await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["read"], true);
        assert_eq!(body["status"], "read");
        assert!(body["deliveries"]
            .as_array()
            .unwrap()
            .iter()
            .all(|d| d["state"] == "read"));
    }

    #[tokio::test]
    async fn delete_removes_alert() {
        let store = MemoryStore::new();
        let alert = seed_alert(&store, Uuid::new_v4(), 130.0).await;
        let server = test_server(&store);

        server
            .delete(&format!("/alerts/{}", alert.id))
            .await
            .assert_status(StatusCode::NO_CONTENT);
        server
            .get(&format!("/alerts/{}", alert.id))
            .await
            .assert_status_not_found();
    }

    // -----------------------------------------------------------------------
    // Delivery receipts
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn delivery_receipt_moves_channel_forward() {
        let store = MemoryStore::new();
        let alert = seed_sent_alert(&store, Uuid::new_v4()).await;

        let resp = test_server(&store)
            .post(&format!("/alerts/{}/deliveries/email", alert.id))
            .json(&json!({ "state": "delivered" }))
            .await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        let email = body["deliveries"]
            .as_array()
            .unwrap()
            .iter()
            .find(|d| d["channel"] == "email")
            .unwrap();
        assert_eq!(email["state"], "delivered");
        assert_eq!(body["status"], "delivered");
    }

    #[tokio::test]
    async fn repeated_receipt_is_harmless() {
        let store = MemoryStore::new();
        let alert = seed_sent_alert(&store, Uuid::new_v4()).await;
        let server = test_server(&store);
        let path = format!("/alerts/{}/deliveries/push", alert.id);

        server.post(&path).json(&json!({ "state": "delivered" })).await.assert_status_ok();
        server.post(&path).json(&json!({ "state": "delivered" })).await.assert_status_ok();
    }

    #[tokio::test]
    async fn regressing_receipt_is_409_and_leaves_alert_untouched() {
        let store = MemoryStore::new();
        let alert = seed_sent_alert(&store, Uuid::new_v4()).await;
        let server = test_server(&store);
        let path = format!("/alerts/{}/deliveries/push", alert.id);

        server.post(&path).json(&json!({ "state": "read" })).await.assert_status_ok();
        server
            .post(&path)
            .json(&json!({ "state": "failed", "error": "bounced" }))
            .await
            .assert_status(StatusCode::CONFLICT);

        let stored = store.get(alert.id).await.unwrap().unwrap();
        assert_eq!(stored.delivery(Channel::Push).unwrap().state, DeliveryState::Read);
    }

    #[tokio::test]
    async fn receipt_for_channel_not_on_alert_is_409() {
        let store = MemoryStore::new();
        let alert = seed_alert(&store, Uuid::new_v4(), 130.0).await;

        test_server(&store)
            .post(&format!("/alerts/{}/deliveries/sms", alert.id))
            .json(&json!({ "state": "delivered" }))
            .await
            .assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn gateway_cannot_report_sent() {
        let store = MemoryStore::new();
        let alert = seed_alert(&store, Uuid::new_v4(), 130.0).await;

        test_server(&store)
            .post(&format!("/alerts/{}/deliveries/push", alert.id))
            .json(&json!({ "state": "sent" }))
            .await
            .assert_status_bad_request();
    }

    #[tokio::test]
    async fn failed_receipt_records_error_class() {
        let store = MemoryStore::new();
        let alert = seed_sent_alert(&store, Uuid::new_v4()).await;

        let body: Value = test_server(&store)
            .post(&format!("/alerts/{}/deliveries/email", alert.id))
            .json(&json!({ "state": "failed", "error": "bounced" }))
            .await
            .json();
        let email = body["deliveries"]
            .as_array()
            .unwrap()
            .iter()
            .find(|d| d["channel"] == "email")
            .unwrap();
        assert_eq!(email["state"], "failed");
        assert_eq!(email["error"], "bounced");
        assert_eq!(body["status"], "sent", "push is still sent");
    }

    // -----------------------------------------------------------------------
    // Readings
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn readings_are_filtered_by_range_and_ordered() {
        let store = MemoryStore::new();
        let location_id = Uuid::new_v4();
        let start = Utc::now() - Duration::hours(3);
        for (i, index) in [30.0, 60.0, 90.0, 120.0].into_iter().enumerate() {
            store
                .append(&reading(location_id, index, start + Duration::hours(i as i64)))
                .await
                .unwrap();
        }
        store
            .append(&reading(Uuid::new_v4(), 10.0, start))
            .await
            .unwrap();
        let server = test_server(&store);

        let all: Vec<Value> = server
            .get(&format!("/locations/{location_id}/readings"))
            .await
            .json();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0]["index"], 30.0);
        assert_eq!(all[3]["index"], 120.0);

        let windowed: Vec<Value> = server
            .get(&format!("/locations/{location_id}/readings"))
            .add_query_param("from", (start + Duration::minutes(30)).to_rfc3339())
            .add_query_param("to", (start + Duration::minutes(150)).to_rfc3339())
            .await
            .json();
        let indices: Vec<f64> = windowed.iter().map(|r| r["index"].as_f64().unwrap()).collect();
        assert_eq!(indices, vec![60.0, 90.0]);
    }

    #[tokio::test]
    async fn inverted_range_is_400() {
        let store = MemoryStore::new();
        let now = Utc::now();
        test_server(&store)
            .get(&format!("/locations/{}/readings", Uuid::new_v4()))
            .add_query_param("from", now.to_rfc3339())
            .add_query_param("to", (now - Duration::hours(1)).to_rfc3339())
            .await
            .assert_status_bad_request();
    }

    #[tokio::test]
    async fn latest_reading_is_null_without_history() {
        let store = MemoryStore::new();
        let resp = test_server(&store)
            .get(&format!("/locations/{}/readings/latest", Uuid::new_v4()))
            .await;
        resp.assert_status_ok();
        assert!(resp.json::<Value>().is_null());
    }

    #[tokio::test]
    async fn latest_reading_is_most_recent() {
        let store = MemoryStore::new();
        let location_id = Uuid::new_v4();
        let now = Utc::now();
        store.append(&reading(location_id, 70.0, now - Duration::hours(1))).await.unwrap();
        store.append(&reading(location_id, 45.0, now)).await.unwrap();

        let body: Value = test_server(&store)
            .get(&format!("/locations/{location_id}/readings/latest"))
            .await
            .json();
        assert_eq!(body["index"], 45.0);
        assert_eq!(body["category"], "good");
        assert!(body["description"].as_str().unwrap().contains("satisfactory"));
    }

    #[tokio::test]
    async fn trend_summarises_period() {
        let store = MemoryStore::new();
        let location_id = Uuid::new_v4();
        let start = Utc::now() - Duration::hours(5);
        for (i, index) in [10.0, 20.0, 30.0, 40.0, 50.0].into_iter().enumerate() {
            store
                .append(&reading(location_id, index, start + Duration::hours(i as i64)))
                .await
                .unwrap();
        }

        let body: Value = test_server(&store)
            .get(&format!("/locations/{location_id}/trend"))
            .await
            .json();
        assert_eq!(body["samples"], 5);
        assert_eq!(body["average"], 30.0);
        assert_eq!(body["min"], 10.0);
        assert_eq!(body["max"], 50.0);
        assert_eq!(body["direction"], "rapidly_increasing");
        assert_eq!(body["forecast"], 60.0);
    }

    #[tokio::test]
    async fn compare_uses_latest_reading_per_location() {
        let store = MemoryStore::new();
        let subscriber_id = Uuid::new_v4();
        let home = location(subscriber_id, "Home");
        let office = location(subscriber_id, "Office");
        let empty = location(subscriber_id, "Cabin");
        for loc in [&home, &office, &empty] {
            store.add_location(loc.clone()).await;
        }
        let now = Utc::now();
        store.append(&reading(home.id, 200.0, now - Duration::hours(1))).await.unwrap();
        store.append(&reading(home.id, 40.0, now)).await.unwrap();
        store.append(&reading(office.id, 80.0, now)).await.unwrap();

        let body: Value = test_server(&store)
            .get(&format!("/subscribers/{subscriber_id}/locations/compare"))
            .await
            .json();
        assert_eq!(body["best"]["name"], "Home");
        assert_eq!(body["worst"]["name"], "Office");
        assert_eq!(body["average"], 60.0);
        assert_eq!(body["locations"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn exposure_weights_recent_readings() {
        let store = MemoryStore::new();
        let location_id = Uuid::new_v4();
        let now = Utc::now();
        store.append(&reading(location_id, 40.0, now - Duration::hours(2))).await.unwrap();
        store.append(&reading(location_id, 160.0, now - Duration::hours(1))).await.unwrap();
        store.append(&reading(location_id, 500.0, now - Duration::days(40))).await.unwrap();

        let body: Value = test_server(&store)
            .get(&format!("/locations/{location_id}/exposure"))
            .await
            .json();
        assert_eq!(body["daily_score"], 100);
        assert_eq!(body["weekly_score"], 100);
        assert_eq!(body["risk_level"], "moderate");
        assert_eq!(body["recommendations"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn forecast_follows_daily_pattern() {
        let store = MemoryStore::new();
        let location_id = Uuid::new_v4();
        let start = Utc::now() - Duration::hours(30);
        for h in 0..30 {
            store
                .append(&reading(location_id, 55.0, start + Duration::hours(h)))
                .await
                .unwrap();
        }
        let server = test_server(&store);

        let points: Vec<Value> = server
            .get(&format!("/locations/{location_id}/forecast"))
            .add_query_param("hours", 6)
            .await
            .json();
        assert_eq!(points.len(), 6);
        assert!(points.iter().all(|p| p["index"] == 55.0 && p["category"] == "moderate"));

        server
            .get(&format!("/locations/{location_id}/forecast"))
            .add_query_param("hours", 0)
            .await
            .assert_status_bad_request();
    }

    #[tokio::test]
    async fn forecast_is_empty_without_enough_history() {
        let store = MemoryStore::new();
        let location_id = Uuid::new_v4();
        store.append(&reading(location_id, 55.0, Utc::now())).await.unwrap();

        let points: Vec<Value> = test_server(&store)
            .get(&format!("/locations/{location_id}/forecast"))
            .await
            .json();
        assert!(points.is_empty());
    }

    #[tokio::test]
    async fn sub_index_from_concentration() {
        let store = MemoryStore::new();
        let server = test_server(&store);

        let body: Value = server
            .get("/aqi/sub-index")
            .add_query_param("pollutant", "PM2.5")
            .add_query_param("concentration", 35.4)
            .await
            .json();
        assert_eq!(body["pollutant"], "pm25");
        assert_eq!(body["index"], 100);
        assert_eq!(body["category"], "moderate");

        server
            .get("/aqi/sub-index")
            .add_query_param("pollutant", "radon")
            .add_query_param("concentration", 1.0)
            .await
            .assert_status_bad_request();
        server
            .get("/aqi/sub-index")
            .add_query_param("pollutant", "no2")
            .add_query_param("concentration", -3.0)
            .await
            .assert_status_bad_request();
    }

    // -----------------------------------------------------------------------
    // System
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn health_returns_ok() {
        let store = MemoryStore::new();
        let resp = test_server(&store).get("/health").await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn openapi_spec_is_served() {
        let store = MemoryStore::new();
        let resp = test_server(&store).get("/api-docs/openapi.json").await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["info"]["title"], "AQI Alert Service API");
        assert!(body["paths"]["/alerts/{alert_id}/deliveries/{channel}"].is_object());
    }
}
