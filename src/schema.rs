/*!
 * Column layouts for the provider, rate and centroid CSV files
 *
 * Headers are resolved once per file into column positions. Required
 * columns missing from a header fail with a schema mismatch; optional
 * payload columns are simply absent.
 */

use crate::constants::*;
use crate::{MapError, Result};

/// Position of `name` in `headers`: exact match first, then case-insensitive
fn find_column(headers: &[String], name: &str) -> Option<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .or_else(|| headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name)))
}

fn find_any(headers: &[String], aliases: &[&str]) -> Option<usize> {
    // aliases are tried in order so `lat` beats `Latitude` when both exist
    aliases.iter().find_map(|alias| headers.iter().position(|h| h.trim() == *alias))
}

fn require(headers: &[String], name: &str) -> Result<usize> {
    find_column(headers, name).ok_or_else(|| MapError::missing_column(name, headers))
}

/// Resolved column positions of a provider file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderColumns {
    pub county: usize,
    pub provider_type: usize,
    pub npi: Option<usize>,
    pub first_name: Option<usize>,
    pub last_name: Option<usize>,
    pub address: Option<usize>,
    pub address_usps_standardized: Option<usize>,
    pub latitude: Option<usize>,
    pub longitude: Option<usize>,
}

impl ProviderColumns {
    /// Positions already claimed by a typed field
    pub fn typed_positions(&self) -> Vec<usize> {
        let mut out = vec![self.county, self.provider_type];
        out.extend(
            [
                self.npi,
                self.first_name,
                self.last_name,
                self.address,
                self.address_usps_standardized,
                self.latitude,
                self.longitude,
            ]
            .into_iter()
            .flatten(),
        );
        out
    }
}

/// Provider table schema
pub struct ProviderSchema;

impl ProviderSchema {
    /// Resolve the provider header row
    pub fn validate_headers(headers: &[String], county_column: &str, type_column: &str) -> Result<ProviderColumns> {
        Ok(ProviderColumns {
            county: require(headers, county_column)?,
            provider_type: require(headers, type_column)?,
            npi: find_column(headers, NPI_COLUMN),
            first_name: find_column(headers, FIRST_NAME_COLUMN),
            last_name: find_column(headers, LAST_NAME_COLUMN),
            address: find_column(headers, ADDRESS_COLUMN),
            address_usps_standardized: find_column(headers, USPS_ADDRESS_COLUMN),
            latitude: find_any(headers, LATITUDE_ALIASES),
            longitude: find_any(headers, LONGITUDE_ALIASES),
        })
    }
}

/// Resolved column positions of a rate file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateColumns {
    pub county: usize,
    /// Every other column, treated as a numeric rate field
    pub value_columns: Vec<(usize, String)>,
}

/// Auxiliary rate table schema
pub struct RateSchema;

impl RateSchema {
    pub fn validate_headers(headers: &[String], county_column: &str) -> Result<RateColumns> {
        let county = require(headers, county_column)?;
        let value_columns: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(i, h)| *i != county && !h.trim().is_empty())
            .map(|(i, h)| (i, h.trim().to_string()))
            .collect();

        if value_columns.is_empty() {
            return Err(MapError::SchemaMismatch {
                message: "rate table has no value columns besides the county column".to_string(),
                missing_column: None,
                found_columns: headers.to_vec(),
            });
        }

        Ok(RateColumns { county, value_columns })
    }
}

/// Resolved column positions of a centroid file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CentroidColumns {
    pub county: usize,
    pub latitude: usize,
    pub longitude: usize,
}

/// County centroid schema: `County,Latitude,Longitude`
pub struct CentroidSchema;

impl CentroidSchema {
    pub fn column_names() -> Vec<&'static str> {
        vec![CENTROID_COUNTY_COLUMN, "Latitude", "Longitude"]
    }

    pub fn validate_headers(headers: &[String]) -> Result<CentroidColumns> {
        let latitude = find_any(headers, LATITUDE_ALIASES)
            .ok_or_else(|| MapError::missing_column("Latitude", headers))?;
        let longitude = find_any(headers, LONGITUDE_ALIASES)
            .ok_or_else(|| MapError::missing_column("Longitude", headers))?;
        Ok(CentroidColumns {
            county: require(headers, CENTROID_COUNTY_COLUMN)?,
            latitude,
            longitude,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_provider_headers() {
        let h = headers(&["NPI", "Provider_First_Name", "County", "provider_type", "Lat", "lng"]);
        let cols = ProviderSchema::validate_headers(&h, "county", "provider_type").unwrap();
        assert_eq!(cols.county, 2);
        assert_eq!(cols.provider_type, 3);
        assert_eq!(cols.npi, Some(0));
        assert_eq!(cols.latitude, Some(4));
        assert_eq!(cols.longitude, Some(5));
        assert_eq!(cols.last_name, None);
    }

    #[test]
    fn test_provider_headers_missing_required() {
        let h = headers(&["NPI", "county"]);
        match ProviderSchema::validate_headers(&h, "county", "provider_type") {
            Err(MapError::SchemaMismatch { missing_column, .. }) => {
                assert_eq!(missing_column.as_deref(), Some("provider_type"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_rate_headers() {
        let h = headers(&["County", "fp_rate", "", "np_ratio"]);
        let cols = RateSchema::validate_headers(&h, "county").unwrap();
        assert_eq!(cols.county, 0);
        assert_eq!(cols.value_columns, vec![(1, "fp_rate".to_string()), (3, "np_ratio".to_string())]);
        assert!(RateSchema::validate_headers(&headers(&["county"]), "county").is_err());
    }

    #[test]
    fn test_centroid_headers() {
        let h = headers(&CentroidSchema::column_names());
        let cols = CentroidSchema::validate_headers(&h).unwrap();
        assert_eq!((cols.county, cols.latitude, cols.longitude), (0, 1, 2));
    }
}
