use std::{path::PathBuf, str::FromStr};

use anyhow::{Context, Result};

// ---------------------------------------------------------------------------
// SuppressionMode
// ---------------------------------------------------------------------------

/// Whether a threshold alert is re-raised on every qualifying scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuppressionMode {
    /// Every scan at or above the threshold raises a new alert.
    #[default]
    None,
    /// After a threshold alert, stay quiet for that location until a reading
    /// drops back below the threshold.
    UntilRecovered,
}

impl FromStr for SuppressionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "until_recovered" => Ok(Self::UntilRecovered),
            other => Err(anyhow::anyhow!("unknown suppression mode: {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub waqi_api_token: String,
    pub waqi_base_url: String,
    pub server_host: String,
    pub server_port: u16,
    /// Scan interval in seconds.
    pub scan_interval_secs: u64,
    /// Maximum number of (subscriber, location) pairs processed at once.
    pub scan_concurrency: usize,
    /// Upper bound for one reading fetch, in seconds.
    pub fetch_timeout_secs: u64,
    /// Upper bound for one transport call, in seconds.
    pub delivery_timeout_secs: u64,
    /// Raise `change` alerts when the category moves below the threshold.
    pub change_alerts: bool,
    pub suppression: SuppressionMode,
    pub push_webhook_url: Option<String>,
    pub email_webhook_url: Option<String>,
    pub sms_webhook_url: Option<String>,
    /// HMAC key for signing transport requests. Unsigned when absent.
    pub webhook_signing_secret: Option<String>,
    /// When set, raw provider responses are saved here.
    pub source_response_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            waqi_api_token: required("WAQI_API_TOKEN")?,
            waqi_base_url: optional("WAQI_BASE_URL", "https://api.waqi.info"),
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "8080")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
            scan_interval_secs: positive("SCAN_INTERVAL_SECS", "900")?,
            scan_concurrency: positive("SCAN_CONCURRENCY", "8")? as usize,
            fetch_timeout_secs: positive("FETCH_TIMEOUT_SECS", "10")?,
            delivery_timeout_secs: positive("DELIVERY_TIMEOUT_SECS", "10")?,
            change_alerts: parse_bool(&optional("CHANGE_ALERTS", "true"))
                .context("CHANGE_ALERTS must be true or false")?,
            suppression: optional("ALERT_SUPPRESSION", "none")
                .parse()
                .context("ALERT_SUPPRESSION must be 'none' or 'until_recovered'")?,
            push_webhook_url: non_empty("PUSH_WEBHOOK_URL"),
            email_webhook_url: non_empty("EMAIL_WEBHOOK_URL"),
            sms_webhook_url: non_empty("SMS_WEBHOOK_URL"),
            webhook_signing_secret: non_empty("WEBHOOK_SIGNING_SECRET"),
            source_response_dir: non_empty("SOURCE_RESPONSE_DIR").map(PathBuf::from),
        })
    }
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing required env var: {key}"))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn positive(key: &str, default: &str) -> Result<u64> {
    parse_positive(&optional(key, default))
        .with_context(|| format!("{key} must be a positive integer"))
}

fn parse_positive(raw: &str) -> Result<u64> {
    match raw.trim().parse::<u64>()? {
        0 => Err(anyhow::anyhow!("value must be greater than zero")),
        n => Ok(n),
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(anyhow::anyhow!("not a boolean: {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppression_mode_from_str() {
        assert_eq!("none".parse::<SuppressionMode>().unwrap(), SuppressionMode::None);
        assert_eq!(
            "until_recovered".parse::<SuppressionMode>().unwrap(),
            SuppressionMode::UntilRecovered
        );
    }

    #[test]
    fn suppression_mode_unknown_errors() {
        let err = "always".parse::<SuppressionMode>().unwrap_err();
        assert!(err.to_string().contains("unknown suppression mode"));
    }

    #[test]
    fn parse_positive_rejects_zero_and_garbage() {
        assert_eq!(parse_positive("900").unwrap(), 900);
        assert!(parse_positive("0").is_err());
        assert!(parse_positive("-5").is_err());
        assert!(parse_positive("fifteen").is_err());
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("TRUE").unwrap());
        assert!(parse_bool("1").unwrap());
        assert!(!parse_bool("off").unwrap());
        assert!(parse_bool("maybe").is_err());
    }
}
