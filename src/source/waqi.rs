use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::{
    models::WaqiResponse, response_store::ResponseStore, FetchedReading, ReadingSource,
    SourceError,
};
use crate::{config::Config, db::models::Coordinate};

const SOURCE_ID: &str = "waqi";

/// Client for the World Air Quality Index geo feed.
#[derive(Debug, Clone)]
pub struct WaqiClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    http: Client,
    base_url: String,
    token: String,
    responses: Option<ResponseStore>,
}

impl WaqiClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url: config.waqi_base_url.trim_end_matches('/').to_owned(),
                token: config.waqi_api_token.clone(),
                responses: config.source_response_dir.as_ref().map(ResponseStore::new),
            }),
        })
    }

    fn feed_url(&self, coordinate: Coordinate) -> String {
        format!(
            "{}/feed/geo:{};{}/",
            self.inner.base_url, coordinate.latitude, coordinate.longitude
        )
    }
}

#[async_trait]
impl ReadingSource for WaqiClient {
    async fn fetch(&self, coordinate: Coordinate) -> Result<FetchedReading, SourceError> {
        let url = self.feed_url(coordinate);
        debug!(url = %url, "Fetching WAQI feed");

        let bytes = self
            .inner
            .http
            .get(format!("{url}?token={}", self.inner.token))
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(format!("WAQI feed request failed: {}", e.without_url())))?
            .error_for_status()
            .map_err(|e| SourceError::Unavailable(format!("WAQI feed returned error status: {}", e.without_url())))?
            .bytes()
            .await
            .map_err(|e| SourceError::Unavailable(format!("failed to read WAQI feed body: {}", e.without_url())))?;

        if let Some(store) = &self.inner.responses {
            let suffix = format!("{}_{}", coordinate.latitude, coordinate.longitude);
            store.save("feed", &suffix, &bytes).await;
        }

        serde_json::from_slice::<WaqiResponse>(&bytes)
            .map_err(|e| SourceError::InvalidResponse(format!("failed to deserialize WAQI feed: {e}")))?
            .into_feed()?
            .into_reading(SOURCE_ID)
    }
}
