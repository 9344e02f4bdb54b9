use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Lowest model year accepted anywhere in the service.
pub const MIN_MODEL_YEAR: i32 = 1900;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aspect {
    Make,
    Model,
    Year,
}

impl Aspect {
    /// Name used by the marketplace for structured item aspects.
    pub fn marketplace_name(&self) -> &'static str {
        match self {
            Aspect::Make => "Make",
            Aspect::Model => "Model",
            Aspect::Year => "Year",
        }
    }

    pub fn matches_name(&self, name: &str) -> bool {
        name.trim().eq_ignore_ascii_case(self.marketplace_name())
    }
}

/// One candidate value for an aspect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeValue {
    pub value: String,
    pub display_name: String,
    pub count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl AttributeValue {
    pub fn new(value: impl Into<String>, count: u32, parent: Option<&str>) -> Self {
        let value = value.into();
        Self {
            display_name: value.clone(),
            value,
            count,
            parent: parent.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Source {
    Live,
    Fallback,
    Merged,
}

impl Source {
    /// Combined tag for a set built from several resolutions.
    pub fn combine(self, other: Source) -> Source {
        if self == other { self } else { Source::Merged }
    }
}

/// Outcome of resolving one aspect, tagged with where the values came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolved {
    pub values: Vec<AttributeValue>,
    pub source: Source,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSet {
    pub makes: Vec<AttributeValue>,
    pub models: Vec<AttributeValue>,
    pub years: Vec<AttributeValue>,
    pub source: Source,
}

/// Lowercases, folds `|`/`_` separators to spaces and collapses whitespace.
/// Applying it twice is a no-op.
pub fn normalize_part(raw: &str) -> String {
    raw.to_lowercase()
        .replace(['|', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn parse_year(raw: &str, current_year: i32) -> Result<u16, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new("year", "year is required"));
    }
    let year: i32 = trimmed
        .parse()
        .map_err(|_| ValidationError::new("year", format!("`{trimmed}` is not a number")))?;
    if year < MIN_MODEL_YEAR || year > current_year + 1 {
        return Err(ValidationError::new(
            "year",
            format!("{year} is outside {MIN_MODEL_YEAR}..={}", current_year + 1),
        ));
    }
    u16::try_from(year).map_err(|_| ValidationError::new("year", "out of range"))
}

pub(crate) fn require(field: &'static str, raw: &str) -> Result<String, ValidationError> {
    let normalized = normalize_part(raw);
    if normalized.is_empty() {
        return Err(ValidationError::new(field, format!("{field} is required")));
    }
    Ok(normalized)
}

/// Normalized `(make, model, year)` identity, rendered as `make|model|year`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VehicleKey {
    make: String,
    model: String,
    year: u16,
}

impl VehicleKey {
    pub fn new(make: &str, model: &str, year: u16) -> Result<Self, ValidationError> {
        Ok(Self {
            make: require("make", make)?,
            model: require("model", model)?,
            year,
        })
    }

    pub fn make(&self) -> &str {
        &self.make
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn year(&self) -> u16 {
        self.year
    }
}

impl fmt::Display for VehicleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.make, self.model, self.year)
    }
}

impl std::str::FromStr for VehicleKey {
    type Err = ValidationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut parts = raw.splitn(3, '|');
        let (Some(make), Some(model), Some(year)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(ValidationError::new("key", format!("malformed key `{raw}`")));
        };
        let year = year
            .trim()
            .parse::<u16>()
            .map_err(|_| ValidationError::new("year", format!("`{year}` is not a number")))?;
        VehicleKey::new(make, model, year)
    }
}

impl TryFrom<String> for VehicleKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VehicleKey> for String {
    fn from(value: VehicleKey) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValuationSource {
    Scrape,
    Api,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketValueRecord {
    pub key: VehicleKey,
    pub low: f64,
    pub avg: f64,
    pub high: f64,
    pub currency: String,
    pub source: ValuationSource,
    pub fetched_at_epoch_ms: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ValuationRequest {
    pub make: String,
    pub model: String,
    pub year: String,
    #[serde(default)]
    pub mileage: Option<u32>,
    #[serde(default)]
    pub trim: Option<String>,
    #[serde(default, alias = "zip")]
    pub zip_code: Option<String>,
}

impl ValuationRequest {
    pub fn new(make: &str, model: &str, year: impl ToString) -> Self {
        Self {
            make: make.to_string(),
            model: model.to_string(),
            year: year.to_string(),
            ..Self::default()
        }
    }

    pub fn key(&self, current_year: i32) -> Result<VehicleKey, ValidationError> {
        let make = require("make", &self.make)?;
        let model = require("model", &self.model)?;
        let year = parse_year(&self.year, current_year)?;
        VehicleKey::new(&make, &model, year)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct LookupOptions {
    #[serde(default)]
    pub force_refresh: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketValue {
    pub record: Arc<MarketValueRecord>,
    pub cached: bool,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
