pub mod alerts;
pub mod analytics;
pub mod api;
pub mod aqi;
pub mod config;
pub mod db;
pub mod history;
pub mod notify;
pub mod pipeline;
pub mod reading_cache;
pub mod scheduler;
pub mod source;
pub mod store;
