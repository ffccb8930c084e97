/*!
 * Data type definitions for provider, boundary and rate records
 *
 * Only the fields the join pipeline interprets are typed; everything else a
 * source row carries is kept as opaque payload for the presentation side.
 */

use std::collections::BTreeMap;
use std::fmt;
use serde::{Deserialize, Serialize};

use crate::constants::{NO_ADDRESS, UNNAMED_PROVIDER};

/// Canonical county key: state prefix followed by the zero-padded county code
///
/// For Georgia (`"13"`) and 3-digit codes, DeKalb `"89"` becomes `"13089"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CountyIdentifier(String);

impl CountyIdentifier {
    /// Build an identifier from a short county code, validating it
    pub fn from_code(state_prefix: &str, code: &str, width: usize) -> Result<Self, crate::MapError> {
        let code = code.trim();
        if code.is_empty() || code.len() > width || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(crate::MapError::invalid_county_code(code, width));
        }
        Ok(CountyIdentifier(format!("{}{:0>width$}", state_prefix, code, width = width)))
    }

    /// Accept either a short county code (`"89"`, `"089"`) or a full identifier (`"13089"`)
    pub fn parse(value: &str, state_prefix: &str, width: usize) -> Result<Self, crate::MapError> {
        let value = value.trim();
        if value.len() == state_prefix.len() + width && value.starts_with(state_prefix) {
            if let Some(code) = value.strip_prefix(state_prefix) {
                return Self::from_code(state_prefix, code, width);
            }
        }
        Self::from_code(state_prefix, value, width)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The short county code, if the identifier carries the given state prefix
    pub fn county_code(&self, state_prefix: &str) -> Option<&str> {
        self.0.strip_prefix(state_prefix)
    }
}

impl fmt::Display for CountyIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Latitude/longitude pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    /// Both components finite; `None` otherwise
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        if latitude.is_finite() && longitude.is_finite() {
            Some(Self { latitude, longitude })
        } else {
            None
        }
    }
}

/// Fields of a provider row that are passed through to presentation
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProviderPayload {
    pub npi: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub address: Option<String>,
    pub address_usps_standardized: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Every other column, by header name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// One row of the provider table
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub county_name_raw: Option<String>,
    pub provider_type_code: Option<String>,
    #[serde(default)]
    pub payload: ProviderPayload,
}

impl ProviderRecord {
    /// Record with only the joined fields set
    pub fn new(county_name: Option<&str>, provider_type: Option<&str>) -> Self {
        Self {
            county_name_raw: county_name.map(str::to_string),
            provider_type_code: provider_type.map(str::to_string),
            payload: ProviderPayload::default(),
        }
    }

    /// `"{first} {last}"`, or a placeholder for unnamed rows
    pub fn display_name(&self) -> String {
        let name = format!(
            "{} {}",
            self.payload.first_name.as_deref().unwrap_or(""),
            self.payload.last_name.as_deref().unwrap_or("")
        );
        let name = name.trim();
        if name.is_empty() {
            UNNAMED_PROVIDER.to_string()
        } else {
            name.to_string()
        }
    }

    /// Prefer the USPS-standardized address, then the raw one
    pub fn display_address(&self) -> &str {
        [&self.payload.address_usps_standardized, &self.payload.address]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .unwrap_or(NO_ADDRESS)
    }

    /// Geocoded position, if both components are present and finite
    pub fn coordinates(&self) -> Option<Coordinates> {
        Coordinates::new(self.payload.latitude?, self.payload.longitude?)
    }
}

/// One polygon of the county boundary collection
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryFeature {
    pub county_name_raw: Option<String>,
    /// Short county code without the state prefix, e.g. `"089"`
    pub county_code: String,
    pub geometry: Option<geojson::Geometry>,
    pub properties: geojson::JsonObject,
}

impl BoundaryFeature {
    pub fn new(county_name: &str, county_code: &str) -> Self {
        Self {
            county_name_raw: Some(county_name.to_string()),
            county_code: county_code.to_string(),
            geometry: None,
            properties: geojson::JsonObject::new(),
        }
    }

    pub fn identifier(&self, state_prefix: &str, width: usize) -> crate::Result<CountyIdentifier> {
        CountyIdentifier::from_code(state_prefix, &self.county_code, width)
    }
}

/// One row of an auxiliary per-county rate table
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RateRow {
    pub county_name_raw: Option<String>,
    pub values: BTreeMap<String, f64>,
}

impl RateRow {
    pub fn new(county_name: Option<&str>, values: &[(&str, f64)]) -> Self {
        Self {
            county_name_raw: county_name.map(str::to_string),
            values: values.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }
}

/// Named rate fields joined to one county
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateRecord {
    pub values: BTreeMap<String, f64>,
}

impl RateRecord {
    pub fn get(&self, field: &str) -> Option<f64> {
        self.values.get(field).copied()
    }
}

/// One row of the county centroid table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CentroidRow {
    pub county_name_raw: Option<String>,
    pub coordinates: Coordinates,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_from_code() {
        assert_eq!(CountyIdentifier::from_code("13", "89", 3).unwrap().as_str(), "13089");
        assert_eq!(CountyIdentifier::from_code("13", "089", 3).unwrap().as_str(), "13089");
        assert_eq!(CountyIdentifier::from_code("13", " 121 ", 3).unwrap().as_str(), "13121");
        assert!(CountyIdentifier::from_code("13", "1210", 3).is_err());
        assert!(CountyIdentifier::from_code("13", "", 3).is_err());
        assert!(CountyIdentifier::from_code("13", "8x", 3).is_err());
    }

    #[test]
    fn test_identifier_round_trip() {
        let id = CountyIdentifier::from_code("13", "089", 3).unwrap();
        assert_eq!(id.county_code("13"), Some("089"));
        assert_eq!(CountyIdentifier::parse("13089", "13", 3).unwrap(), id);
        assert_eq!(CountyIdentifier::parse("89", "13", 3).unwrap(), id);
    }

    #[test]
    fn test_display_name_and_address() {
        let mut record = ProviderRecord::new(Some("Fulton"), Some("NP"));
        assert_eq!(record.display_name(), UNNAMED_PROVIDER);
        assert_eq!(record.display_address(), NO_ADDRESS);

        record.payload.first_name = Some("Ada".to_string());
        record.payload.address = Some("1 Main St".to_string());
        assert_eq!(record.display_name(), "Ada");
        assert_eq!(record.display_address(), "1 Main St");

        record.payload.last_name = Some("Lovelace".to_string());
        record.payload.address_usps_standardized = Some("1 MAIN ST, ATLANTA, GA 30303".to_string());
        assert_eq!(record.display_name(), "Ada Lovelace");
        assert_eq!(record.display_address(), "1 MAIN ST, ATLANTA, GA 30303");
    }

    #[test]
    fn test_coordinates_require_finite_values() {
        let mut record = ProviderRecord::default();
        assert!(record.coordinates().is_none());
        record.payload.latitude = Some(33.7);
        record.payload.longitude = Some(f64::NAN);
        assert!(record.coordinates().is_none());
        record.payload.longitude = Some(-84.4);
        assert_eq!(record.coordinates().unwrap().latitude, 33.7);
    }
}
