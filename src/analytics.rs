//! Aggregations over recorded readings for the query surface.

use std::collections::HashMap;

use chrono::{DateTime, Duration, DurationRound, Timelike, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    aqi::{classify, AqiCategory},
    db::models::Reading,
};

/// Fewer points than this give an `unknown` direction.
const MIN_TREND_POINTS: usize = 3;
/// Window the forecast line is fitted to.
const FORECAST_WINDOW: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    RapidlyIncreasing,
    Increasing,
    Stable,
    Decreasing,
    RapidlyDecreasing,
    Unknown,
}

impl TrendDirection {
    /// Buckets a least-squares slope, in index points per reading.
    fn from_slope(slope: f64) -> Self {
        if slope > 0.5 {
            TrendDirection::RapidlyIncreasing
        } else if slope > 0.1 {
            TrendDirection::Increasing
        } else if slope < -0.5 {
            TrendDirection::RapidlyDecreasing
        } else if slope < -0.1 {
            TrendDirection::Decreasing
        } else {
            TrendDirection::Stable
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Trend {
    pub samples: usize,
    /// Mean index, one decimal.
    pub average: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub direction: TrendDirection,
    /// Next value on a line fitted to the last five readings. Never negative.
    pub forecast: Option<f64>,
}

/// Summarise `readings` in recording order.
pub fn trend(readings: &[Reading]) -> Trend {
    let mut sorted: Vec<&Reading> = readings.iter().collect();
    sorted.sort_by_key(|r| r.recorded_at);
    let values: Vec<f64> = sorted.iter().map(|r| r.index).collect();

    if values.is_empty() {
        return Trend {
            samples: 0,
            average: None,
            min: None,
            max: None,
            direction: TrendDirection::Unknown,
            forecast: None,
        };
    }

    let average = values.iter().sum::<f64>() / values.len() as f64;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let direction = if values.len() >= MIN_TREND_POINTS {
        TrendDirection::from_slope(linear_fit(&values).0)
    } else {
        TrendDirection::Unknown
    };

    let forecast = (values.len() >= FORECAST_WINDOW).then(|| {
        let recent = &values[values.len() - FORECAST_WINDOW..];
        let (slope, intercept) = linear_fit(recent);
        (intercept + slope * recent.len() as f64).round().max(0.0)
    });

    Trend {
        samples: values.len(),
        average: Some(round1(average)),
        min: Some(min),
        max: Some(max),
        direction,
        forecast,
    }
}

/// Least-squares line through `(i, ys[i])`. Returns `(slope, intercept)`.
fn linear_fit(ys: &[f64]) -> (f64, f64) {
    let n = ys.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = ys.iter().sum::<f64>() / n;

    let (mut num, mut den) = (0.0, 0.0);
    for (i, y) in ys.iter().enumerate() {
        let dx = i as f64 - mean_x;
        num += dx * (y - mean_y);
        den += dx * dx;
    }
    let slope = if den == 0.0 { 0.0 } else { num / den };
    (slope, mean_y - slope * mean_x)
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

// ---------------------------------------------------------------------------
// Location comparison
// ---------------------------------------------------------------------------

/// Latest index of one location, the input to [`compare_locations`].
#[derive(Debug, Clone, PartialEq)]
pub struct LocationIndex {
    pub location_id: Uuid,
    pub name: String,
    pub index: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RankedLocation {
    pub location_id: Uuid,
    pub name: String,
    pub index: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ComparisonEntry {
    pub location_id: Uuid,
    pub name: String,
    pub index: f64,
    pub category: AqiCategory,
    pub color: String,
    /// Signed distance from the average, one decimal.
    pub difference_from_average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct LocationComparison {
    pub best: Option<RankedLocation>,
    pub worst: Option<RankedLocation>,
    pub average: Option<f64>,
    pub locations: Vec<ComparisonEntry>,
}

/// Rank locations by latest index. Needs at least two locations; fewer give
/// an empty comparison.
pub fn compare_locations(latest: &[LocationIndex]) -> LocationComparison {
    if latest.len() < 2 {
        return LocationComparison {
            best: None,
            worst: None,
            average: None,
            locations: Vec::new(),
        };
    }

    let average = latest.iter().map(|l| l.index).sum::<f64>() / latest.len() as f64;
    let ranked = |l: &LocationIndex| RankedLocation {
        location_id: l.location_id,
        name: l.name.clone(),
        index: l.index,
    };
    let best = latest.iter().min_by(|a, b| a.index.total_cmp(&b.index)).map(ranked);
    let worst = latest.iter().max_by(|a, b| a.index.total_cmp(&b.index)).map(ranked);

    let locations = latest
        .iter()
        .map(|l| {
            let c = classify(l.index);
            ComparisonEntry {
                location_id: l.location_id,
                name: l.name.clone(),
                index: l.index,
                category: c.category,
                color: c.color.to_owned(),
                difference_from_average: round1(l.index - average),
            }
        })
        .collect();

    LocationComparison {
        best,
        worst,
        average: Some(round1(average)),
        locations,
    }
}

// ---------------------------------------------------------------------------
// Exposure
// ---------------------------------------------------------------------------

/// Time a reading counts for when nothing follows it.
pub const DEFAULT_EXPOSURE_MINUTES: f64 = 60.0;

/// One stretch of time spent at a given index.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureSample {
    pub recorded_at: DateTime<Utc>,
    pub index: f64,
    pub duration_minutes: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    Severe,
}

impl RiskLevel {
    /// Buckets the weekly score.
    fn from_weekly(score: u32) -> Self {
        match score {
            s if s > 150 => RiskLevel::Severe,
            s if s > 100 => RiskLevel::High,
            s if s > 50 => RiskLevel::Moderate,
            _ => RiskLevel::Low,
        }
    }

    fn advice(self) -> &'static [&'static str] {
        match self {
            RiskLevel::Low => &[
                "You have maintained good air quality exposure.",
                "Continue monitoring AQI regularly.",
            ],
            RiskLevel::Moderate => &[
                "Consider reducing outdoor activities when AQI is high.",
                "Use air purifiers when indoors.",
                "Keep track of air quality forecasts.",
            ],
            RiskLevel::High => &[
                "Try to spend more time in areas with better air quality.",
                "Use N95 masks when AQI is unhealthy.",
                "Consider using air purifiers indoors.",
                "Reduce outdoor exercise during high pollution periods.",
            ],
            RiskLevel::Severe => &[
                "Your exposure levels are concerning.",
                "Limit time outdoors as much as possible.",
                "Use high-quality air purifiers indoors.",
                "Wear N95 masks when outdoors.",
                "Consider consulting with a healthcare provider about air pollution exposure.",
            ],
        }
    }
}

/// Duration-weighted average index over the last day, week and 30 days.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ExposureScore {
    pub daily_score: u32,
    pub weekly_score: u32,
    pub monthly_score: u32,
    /// From the weekly score.
    pub risk_level: RiskLevel,
    pub recommendations: Vec<String>,
}

/// Each reading counts until the next one, capped at
/// [`DEFAULT_EXPOSURE_MINUTES`]; the newest counts for the full default.
pub fn exposure_samples(readings: &[Reading]) -> Vec<ExposureSample> {
    let mut sorted: Vec<&Reading> = readings.iter().collect();
    sorted.sort_by_key(|r| r.recorded_at);

    sorted
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let duration_minutes = sorted
                .get(i + 1)
                .map(|next| (next.recorded_at - r.recorded_at).num_seconds() as f64 / 60.0)
                .map_or(DEFAULT_EXPOSURE_MINUTES, |gap| gap.min(DEFAULT_EXPOSURE_MINUTES));
            ExposureSample {
                recorded_at: r.recorded_at,
                index: r.index,
                duration_minutes,
            }
        })
        .collect()
}

pub fn exposure_score(samples: &[ExposureSample], now: DateTime<Utc>) -> ExposureScore {
    if samples.is_empty() {
        return ExposureScore {
            daily_score: 0,
            weekly_score: 0,
            monthly_score: 0,
            risk_level: RiskLevel::Low,
            recommendations: vec!["No exposure data available.".to_owned()],
        };
    }

    let window = |days: i64| {
        let since = now - Duration::days(days);
        let (weighted, minutes) = samples
            .iter()
            .filter(|s| s.recorded_at >= since && s.duration_minutes > 0.0)
            .fold((0.0, 0.0), |(w, m), s| {
                (w + s.index * s.duration_minutes, m + s.duration_minutes)
            });
        if minutes > 0.0 {
            (weighted / minutes).round().max(0.0) as u32
        } else {
            0
        }
    };

    let weekly_score = window(7);
    let risk_level = RiskLevel::from_weekly(weekly_score);
    ExposureScore {
        daily_score: window(1),
        weekly_score,
        monthly_score: window(30),
        risk_level,
        recommendations: risk_level.advice().iter().map(|s| (*s).to_owned()).collect(),
    }
}

// ---------------------------------------------------------------------------
// Hourly forecast
// ---------------------------------------------------------------------------

/// Fewer readings than this give no forecast.
pub const MIN_FORECAST_READINGS: usize = 24;
/// History the hour-of-day pattern is learned from.
pub const PATTERN_WINDOW_HOURS: i64 = 72;
pub const MAX_FORECAST_HOURS: u32 = 72;

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ForecastPoint {
    pub at: DateTime<Utc>,
    pub index: f64,
    pub category: AqiCategory,
    pub color: String,
}

/// Project the next `hours` from the average index per hour of day (UTC)
/// over the last three days of `readings`. Hours never observed use the
/// window mean.
pub fn hourly_forecast(readings: &[Reading], hours: u32) -> Vec<ForecastPoint> {
    if readings.len() < MIN_FORECAST_READINGS {
        return Vec::new();
    }
    let Some(last) = readings.iter().map(|r| r.recorded_at).max() else {
        return Vec::new();
    };
    let since = last - Duration::hours(PATTERN_WINDOW_HOURS);
    let window: Vec<&Reading> = readings.iter().filter(|r| r.recorded_at > since).collect();

    let mut by_hour: HashMap<u32, (f64, usize)> = HashMap::new();
    for r in &window {
        let slot = by_hour.entry(r.recorded_at.hour()).or_default();
        slot.0 += r.index;
        slot.1 += 1;
    }
    let mean = window.iter().map(|r| r.index).sum::<f64>() / window.len() as f64;

    let start = last.duration_trunc(Duration::hours(1)).unwrap_or(last);
    (1..=i64::from(hours.min(MAX_FORECAST_HOURS)))
        .map(|h| {
            let at = start + Duration::hours(h);
            let index = by_hour
                .get(&at.hour())
                .map_or(mean, |(sum, n)| sum / *n as f64)
                .round()
                .max(0.0);
            let c = classify(index);
            ForecastPoint {
                at,
                index,
                category: c.category,
                color: c.color.to_owned(),
            }
        })
        .collect()
}
