use std::collections::BTreeMap;

use serde::Deserialize;

use super::{FetchedReading, SourceError};

// ---------------------------------------------------------------------------
// Response envelope
//
// Every WAQI feed answer has the same outer object:
//
// Success:
//   { "status": "ok", "data": { "aqi": 42, "dominentpol": "pm25", ... } }
//
// Failure:
//   { "status": "error", "data": "Invalid key" }
//
// On failure `data` is a plain string, so it is kept as a raw value until the
// status has been checked.
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct WaqiResponse {
    pub status: String,
    pub data: serde_json::Value,
}

impl WaqiResponse {
    /// Unwrap the envelope into the typed feed payload.
    pub fn into_feed(self) -> Result<FeedData, SourceError> {
        if self.status != "ok" {
            let msg = match &self.data {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Err(SourceError::Unavailable(format!(
                "WAQI API error: status={}, msg={msg}",
                self.status
            )));
        }
        serde_json::from_value(self.data)
            .map_err(|e| SourceError::InvalidResponse(format!("malformed feed data: {e}")))
    }
}

// ---------------------------------------------------------------------------
// AqiValue
//
// The overall index is an integer when a station reports, and the string "-"
// when it does not. Number MUST come before Text so numbers are not captured
// as strings.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AqiValue {
    Number(f64),
    Text(String),
}

impl AqiValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AqiValue::Number(v) if v.is_finite() => Some(*v),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Feed: GET /feed/geo:{lat};{lon}/?token=...
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct FeedData {
    pub aqi: AqiValue,

    /// Dominant pollutant code, e.g. `"pm25"`. Spelled this way by the API.
    pub dominentpol: Option<String>,

    /// Individual pollutant sub-indices keyed by code (`pm25`, `o3`, `t`, ...).
    #[serde(default)]
    pub iaqi: BTreeMap<String, IaqiEntry>,

    pub city: Option<City>,
}

#[derive(Debug, Deserialize)]
pub struct IaqiEntry {
    pub v: f64,
}

#[derive(Debug, Deserialize)]
pub struct City {
    pub name: Option<String>,
}

/// Pollutant codes that carry an AQI sub-index. Other `iaqi` keys are weather
/// (temperature, humidity, wind) and are dropped.
pub const POLLUTANT_CODES: [&str; 6] = ["pm25", "pm10", "o3", "co", "so2", "no2"];

const DEFAULT_DOMINANT: &str = "pm25";

impl FeedData {
    /// Normalize the feed. A missing overall index falls back to the highest
    /// pollutant sub-index, which then also names the dominant pollutant.
    pub fn into_reading(self, source: &str) -> Result<FetchedReading, SourceError> {
        let pollutants: BTreeMap<String, f64> = self
            .iaqi
            .into_iter()
            .filter(|(code, entry)| POLLUTANT_CODES.contains(&code.as_str()) && entry.v.is_finite())
            .map(|(code, entry)| (code, entry.v))
            .collect();

        let strongest = pollutants
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(code, v)| (code.clone(), *v));

        let (index, dominant) = match (self.aqi.as_f64(), strongest) {
            (Some(index), _) => (index, self.dominentpol),
            (None, Some((code, v))) => (v, Some(code)),
            (None, None) => {
                return Err(SourceError::InvalidResponse(format!(
                    "no usable AQI value (aqi={:?}, no pollutant sub-indices)",
                    self.aqi
                )))
            }
        };

        if index < 0.0 {
            return Err(SourceError::InvalidResponse(format!(
                "negative AQI value {index}"
            )));
        }

        Ok(FetchedReading {
            index,
            dominant_pollutant: dominant
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| DEFAULT_DOMINANT.to_owned()),
            pollutants,
            source: source.to_owned(),
            station: self.city.and_then(|c| c.name),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<FetchedReading, SourceError> {
        serde_json::from_str::<WaqiResponse>(raw)
            .unwrap()
            .into_feed()?
            .into_reading("waqi")
    }

    #[test]
    fn ok_feed_is_normalized() {
        let r = parse(
            r#"{"status":"ok","data":{"aqi":87,"dominentpol":"pm10",
                "iaqi":{"pm25":{"v":61},"pm10":{"v":87},"t":{"v":21.5}},
                "city":{"name":"Krakow"}}}"#,
        )
        .unwrap();
        assert_eq!(r.index, 87.0);
        assert_eq!(r.dominant_pollutant, "pm10");
        assert_eq!(r.pollutants.len(), 2, "weather keys must be dropped");
        assert_eq!(r.station.as_deref(), Some("Krakow"));
        assert_eq!(r.source, "waqi");
    }

    #[test]
    fn error_status_is_unavailable() {
        let err = parse(r#"{"status":"error","data":"Invalid key"}"#).unwrap_err();
        assert!(matches!(err, SourceError::Unavailable(ref m) if m.contains("Invalid key")));
    }

    #[test]
    fn dash_aqi_falls_back_to_strongest_pollutant() {
        let r = parse(
            r#"{"status":"ok","data":{"aqi":"-","iaqi":{"o3":{"v":40},"no2":{"v":73}}}}"#,
        )
        .unwrap();
        assert_eq!(r.index, 73.0);
        assert_eq!(r.dominant_pollutant, "no2");
    }

    #[test]
    fn dash_aqi_without_pollutants_is_invalid() {
        let err = parse(r#"{"status":"ok","data":{"aqi":"-"}}"#).unwrap_err();
        assert!(matches!(err, SourceError::InvalidResponse(_)));
    }

    #[test]
    fn missing_dominant_defaults_to_pm25() {
        let r = parse(r#"{"status":"ok","data":{"aqi":12}}"#).unwrap();
        assert_eq!(r.dominant_pollutant, "pm25");
    }

    #[test]
    fn malformed_data_is_invalid() {
        let err = parse(r#"{"status":"ok","data":{"city":{}}}"#).unwrap_err();
        assert!(matches!(err, SourceError::InvalidResponse(_)));
    }
}
