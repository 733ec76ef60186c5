use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// Severity tier of an AQI value, ordered from least to most severe.
///
/// Mirrors the `aqi_category` Postgres enum. `Extreme` is the overflow tier
/// for values above the top of the EPA scale (500).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[sqlx(type_name = "aqi_category", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AqiCategory {
    Good,
    Moderate,
    UnhealthyForSensitiveGroups,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
    Extreme,
}

/// Upper bound (inclusive) of each regular tier, in ascending order.
const BREAKPOINTS: [(f64, AqiCategory); 6] = [
    (50.0, AqiCategory::Good),
    (100.0, AqiCategory::Moderate),
    (150.0, AqiCategory::UnhealthyForSensitiveGroups),
    (200.0, AqiCategory::Unhealthy),
    (300.0, AqiCategory::VeryUnhealthy),
    (500.0, AqiCategory::Hazardous),
];

impl AqiCategory {
    pub const ALL: [AqiCategory; 7] = [
        AqiCategory::Good,
        AqiCategory::Moderate,
        AqiCategory::UnhealthyForSensitiveGroups,
        AqiCategory::Unhealthy,
        AqiCategory::VeryUnhealthy,
        AqiCategory::Hazardous,
        AqiCategory::Extreme,
    ];

    /// Human-readable label, e.g. `"Unhealthy for Sensitive Groups"`.
    pub fn label(self) -> &'static str {
        match self {
            AqiCategory::Good => "Good",
            AqiCategory::Moderate => "Moderate",
            AqiCategory::UnhealthyForSensitiveGroups => "Unhealthy for Sensitive Groups",
            AqiCategory::Unhealthy => "Unhealthy",
            AqiCategory::VeryUnhealthy => "Very Unhealthy",
            AqiCategory::Hazardous => "Hazardous",
            AqiCategory::Extreme => "Extreme Hazardous",
        }
    }

    /// Display color as a hex string.
    pub fn color(self) -> &'static str {
        match self {
            AqiCategory::Good => "#00E400",
            AqiCategory::Moderate => "#FFFF00",
            AqiCategory::UnhealthyForSensitiveGroups => "#FF7E00",
            AqiCategory::Unhealthy => "#FF0000",
            AqiCategory::VeryUnhealthy => "#8F3F97",
            AqiCategory::Hazardous | AqiCategory::Extreme => "#7E0023",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            AqiCategory::Good => {
                "Air quality is satisfactory, and air pollution poses little or no risk."
            }
            AqiCategory::Moderate => {
                "Air quality is acceptable. However, there may be a risk for some people, \
                 particularly those who are unusually sensitive to air pollution."
            }
            AqiCategory::UnhealthyForSensitiveGroups => {
                "Members of sensitive groups may experience health effects. \
                 The general public is less likely to be affected."
            }
            AqiCategory::Unhealthy => {
                "Some members of the general public may experience health effects; \
                 members of sensitive groups may experience more serious health effects."
            }
            AqiCategory::VeryUnhealthy => {
                "Health alert: The risk of health effects is increased for everyone."
            }
            AqiCategory::Hazardous => {
                "Health warning of emergency conditions: everyone is more likely to be affected."
            }
            AqiCategory::Extreme => {
                "Extreme health hazard: everyone should avoid all outdoor exertion."
            }
        }
    }
}

impl fmt::Display for AqiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown AQI category: {0:?}")]
pub struct UnknownCategory(pub String);

/// Accepts the stored snake_case code or the display label (any case).
impl FromStr for AqiCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let category = match s {
            "good" => AqiCategory::Good,
            "moderate" => AqiCategory::Moderate,
            "unhealthy_for_sensitive_groups" => AqiCategory::UnhealthyForSensitiveGroups,
            "unhealthy" => AqiCategory::Unhealthy,
            "very_unhealthy" => AqiCategory::VeryUnhealthy,
            "hazardous" => AqiCategory::Hazardous,
            "extreme" => AqiCategory::Extreme,
            other => AqiCategory::ALL
                .into_iter()
                .find(|c| c.label().eq_ignore_ascii_case(other))
                .ok_or_else(|| UnknownCategory(other.to_owned()))?,
        };
        Ok(category)
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub category: AqiCategory,
    pub color: &'static str,
}

/// Map an index value to its severity tier.
///
/// Picks the tier with the smallest upper bound that is `>= index`. Negative
/// values land in `Good`; anything above 500 (or NaN) is `Extreme`.
pub fn classify(index: f64) -> Classification {
    let category = BREAKPOINTS
        .iter()
        .find(|(upper, _)| index <= *upper)
        .map(|(_, category)| *category)
        .unwrap_or(AqiCategory::Extreme);

    Classification {
        category,
        color: category.color(),
    }
}

// ---------------------------------------------------------------------------
// Pollutant sub-index
// ---------------------------------------------------------------------------

/// Pollutants with EPA breakpoint tables. Serialized with the provider codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Pollutant {
    /// 24-hour average, µg/m³.
    Pm25,
    /// 24-hour average, µg/m³.
    Pm10,
    /// 8-hour average, ppm.
    O3,
    /// 8-hour average, ppm.
    Co,
    /// 1-hour average, ppb.
    So2,
    /// 1-hour average, ppb.
    No2,
}

/// `(upper concentration, index low, index high)` per tier, ascending.
type Breakpoints = [(f64, f64, f64); 7];

const PM25: Breakpoints = [
    (12.0, 0.0, 50.0),
    (35.4, 51.0, 100.0),
    (55.4, 101.0, 150.0),
    (150.4, 151.0, 200.0),
    (250.4, 201.0, 300.0),
    (350.4, 301.0, 400.0),
    (500.4, 401.0, 500.0),
];
const PM10: Breakpoints = [
    (54.0, 0.0, 50.0),
    (154.0, 51.0, 100.0),
    (254.0, 101.0, 150.0),
    (354.0, 151.0, 200.0),
    (424.0, 201.0, 300.0),
    (504.0, 301.0, 400.0),
    (604.0, 401.0, 500.0),
];
const O3: Breakpoints = [
    (0.054, 0.0, 50.0),
    (0.070, 51.0, 100.0),
    (0.085, 101.0, 150.0),
    (0.105, 151.0, 200.0),
    (0.200, 201.0, 300.0),
    (0.404, 301.0, 400.0),
    (0.504, 401.0, 500.0),
];
const CO: Breakpoints = [
    (4.4, 0.0, 50.0),
    (9.4, 51.0, 100.0),
    (12.4, 101.0, 150.0),
    (15.4, 151.0, 200.0),
    (30.4, 201.0, 300.0),
    (40.4, 301.0, 400.0),
    (50.4, 401.0, 500.0),
];
const SO2: Breakpoints = [
    (35.0, 0.0, 50.0),
    (75.0, 51.0, 100.0),
    (185.0, 101.0, 150.0),
    (304.0, 151.0, 200.0),
    (604.0, 201.0, 300.0),
    (804.0, 301.0, 400.0),
    (1004.0, 401.0, 500.0),
];
const NO2: Breakpoints = [
    (53.0, 0.0, 50.0),
    (100.0, 51.0, 100.0),
    (360.0, 101.0, 150.0),
    (649.0, 151.0, 200.0),
    (1249.0, 201.0, 300.0),
    (1649.0, 301.0, 400.0),
    (2049.0, 401.0, 500.0),
];

impl Pollutant {
    fn breakpoints(self) -> &'static Breakpoints {
        match self {
            Pollutant::Pm25 => &PM25,
            Pollutant::Pm10 => &PM10,
            Pollutant::O3 => &O3,
            Pollutant::Co => &CO,
            Pollutant::So2 => &SO2,
            Pollutant::No2 => &NO2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown pollutant: {0:?}")]
pub struct UnknownPollutant(pub String);

/// Accepts provider codes (`pm25`) and common spellings (`PM2.5`).
impl FromStr for Pollutant {
    type Err = UnknownPollutant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('.', "");
        match normalized.as_str() {
            "pm25" => Ok(Pollutant::Pm25),
            "pm10" => Ok(Pollutant::Pm10),
            "o3" => Ok(Pollutant::O3),
            "co" => Ok(Pollutant::Co),
            "so2" => Ok(Pollutant::So2),
            "no2" => Ok(Pollutant::No2),
            _ => Err(UnknownPollutant(s.trim().to_owned())),
        }
    }
}

/// Sub-index for one pollutant concentration, by linear interpolation inside
/// its EPA tier. Concentrations past the top tier extrapolate along a tier
/// 1.5 times the top breakpoint wide. `None` for negative or non-finite input.
pub fn sub_index(pollutant: Pollutant, concentration: f64) -> Option<u32> {
    if !concentration.is_finite() || concentration < 0.0 {
        return None;
    }
    let table = pollutant.breakpoints();

    let tier = table.iter().position(|(hi, _, _)| concentration <= *hi);
    let (bp_lo, bp_hi, i_lo, i_hi) = match tier {
        Some(0) => (0.0, table[0].0, table[0].1, table[0].2),
        Some(i) => (table[i - 1].0, table[i].0, table[i].1, table[i].2),
        None => {
            let (top, i_lo, i_hi) = table[table.len() - 1];
            (top, top * 1.5, i_lo, i_hi)
        }
    };

    let index = (i_hi - i_lo) * (concentration - bp_lo) / (bp_hi - bp_lo) + i_lo;
    Some(index.round() as u32)
}

// ---------------------------------------------------------------------------
// Recommendations
// ---------------------------------------------------------------------------

const GOOD: &[&str] = &[
    "Air quality is good. Perfect for outdoor activities!",
    "Enjoy outdoor activities with minimal risk from air pollution.",
];

const MODERATE: &[&str] = &[
    "Air quality is acceptable for most people.",
    "Unusually sensitive individuals should consider limiting prolonged outdoor exertion.",
    "People with respiratory diseases should be careful.",
];

const SENSITIVE: &[&str] = &[
    "Members of sensitive groups (elderly, children, those with respiratory or heart disease) may experience health effects.",
    "Consider reducing outdoor physical activities, especially near busy roads.",
    "Sensitive groups should move prolonged or heavy exertion activities indoors or reschedule.",
];

const UNHEALTHY: &[&str] = &[
    "Everyone may begin to experience health effects.",
    "Avoid prolonged or heavy outdoor exertion.",
    "Sensitive groups should avoid all outdoor physical activities.",
    "Consider using an N95 respirator mask outdoors if you must go out.",
    "Run air purifiers indoors if available.",
];

const VERY_UNHEALTHY: &[&str] = &[
    "Health alert: everyone may experience more serious health effects.",
    "Avoid all outdoor physical activities.",
    "Stay indoors with windows and doors closed.",
    "Run air purifiers if available.",
    "Wear an N95 respirator mask if you must go outdoors.",
    "Follow local health advice and guidelines.",
];

const HAZARDOUS: &[&str] = &[
    "Health emergency! Everyone is likely to be affected.",
    "STAY INDOORS with windows and doors closed.",
    "Avoid all physical activity outdoors.",
    "Run air purifiers on highest setting.",
    "Create a clean room if possible.",
    "Wear N95 respirator masks if you must go outside.",
    "Follow evacuation orders if issued by local authorities.",
    "Consider temporary relocation if conditions persist.",
];

/// Overflow tier.
const FALLBACK: &[&str] = &[
    "Air quality is at an extreme or unknown level.",
    "Stay indoors with windows and doors closed.",
    "Avoid all physical activity outdoors.",
    "Follow instructions from local authorities.",
];

/// Static health advice for `category`, most important first.
pub fn recommendations(category: AqiCategory) -> Vec<String> {
    let list = match category {
        AqiCategory::Good => GOOD,
        AqiCategory::Moderate => MODERATE,
        AqiCategory::UnhealthyForSensitiveGroups => SENSITIVE,
        AqiCategory::Unhealthy => UNHEALTHY,
        AqiCategory::VeryUnhealthy => VERY_UNHEALTHY,
        AqiCategory::Hazardous => HAZARDOUS,
        AqiCategory::Extreme => FALLBACK,
    };
    list.iter().map(|s| (*s).to_owned()).collect()
}

/// Advice for a category given by name, as stored upstream. Unknown names
/// get the fallback list.
pub fn recommendations_for_label(name: &str) -> Vec<String> {
    match name.parse::<AqiCategory>() {
        Ok(category) => recommendations(category),
        Err(_) => FALLBACK.iter().map(|s| (*s).to_owned()).collect(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
