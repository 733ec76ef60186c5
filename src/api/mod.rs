pub mod dto;
pub mod errors;
pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use handlers::ApiDoc;

use crate::store::{AlertStore, HistoryStore, SubscriberDirectory};

/// Storage handles shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<dyn SubscriberDirectory>,
    pub history: Arc<dyn HistoryStore>,
    pub alerts: Arc<dyn AlertStore>,
}

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route("/subscribers/{subscriber_id}/alerts", get(handlers::list_alerts))
        .route(
            "/subscribers/{subscriber_id}/locations/compare",
            get(handlers::compare_locations),
        )
        .route(
            "/alerts/{alert_id}",
            get(handlers::get_alert).delete(handlers::delete_alert),
        )
        .route("/alerts/{alert_id}/acknowledge", post(handlers::acknowledge_alert))
        .route("/alerts/{alert_id}/read", post(handlers::mark_alert_read))
        .route(
            "/alerts/{alert_id}/deliveries/{channel}",
            post(handlers::record_delivery),
        )
        .route("/locations/{location_id}/readings", get(handlers::get_readings))
        .route(
            "/locations/{location_id}/readings/latest",
            get(handlers::get_latest_reading),
        )
        .route("/locations/{location_id}/trend", get(handlers::get_trend))
        .route("/locations/{location_id}/exposure", get(handlers::get_exposure))
        .route("/locations/{location_id}/forecast", get(handlers::get_forecast))
        .route("/aqi/sub-index", get(handlers::get_sub_index))
        .with_state(state)
        .split_for_parts();

    router
        .route("/health", get(handlers::health))
        .route(
            "/api-docs/openapi.json",
            get(move || async move { axum::Json(api) }),
        )
}
