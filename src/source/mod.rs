pub mod models;
pub mod response_store;
pub mod waqi;

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::db::models::Coordinate;

pub use waqi::WaqiClient;

/// Provider reading before it is stamped and persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedReading {
    pub index: f64,
    pub dominant_pollutant: String,
    pub pollutants: BTreeMap<String, f64>,
    /// Provider identifier stored on every reading.
    pub source: String,
    /// Station name reported by the provider, if any.
    pub station: Option<String>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport failure, timeout or provider-side error. Transient.
    #[error("reading source unavailable: {0}")]
    Unavailable(String),
    /// Provider answered but the payload is unusable.
    #[error("invalid response from reading source: {0}")]
    InvalidResponse(String),
}

impl SourceError {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::Unavailable(_) => "source_unavailable",
            SourceError::InvalidResponse(_) => "invalid_response",
        }
    }
}

/// Current air quality for a coordinate.
#[async_trait]
pub trait ReadingSource: Send + Sync {
    async fn fetch(&self, coordinate: Coordinate) -> Result<FetchedReading, SourceError>;
}
