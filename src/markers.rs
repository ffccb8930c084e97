/*!
 * Marker points for the clustered provider layer
 *
 * Rows with a geocoded position are placed there; rows without one fall
 * back to their county centroid when the county joins, and are skipped
 * otherwise.
 */

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};

use crate::aggregate::JoinDiagnostics;
use crate::data_types::{CentroidRow, Coordinates, CountyIdentifier, ProviderRecord};
use crate::index::NameIndex;
use crate::normalize::{normalize, MatchStrategy};

/// Where a marker's position came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationSource {
    Geocoded,
    CountyFallback,
}

/// County identifier → centroid
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CentroidTable {
    centroids: BTreeMap<CountyIdentifier, Coordinates>,
    pub diagnostics: JoinDiagnostics,
}

impl CentroidTable {
    /// Join centroid rows through the name index; the first row per county wins
    pub fn join<'a, I>(rows: I, index: &NameIndex, strategy: MatchStrategy) -> Self
    where
        I: IntoIterator<Item = &'a CentroidRow>,
    {
        let mut table = CentroidTable::default();
        for row in rows {
            table.diagnostics.processed += 1;
            let key = normalize(row.county_name_raw.as_deref());
            match index.resolve_key(&key, strategy) {
                Some(identifier) => {
                    table.diagnostics.matched += 1;
                    table.centroids.entry(identifier.clone()).or_insert(row.coordinates);
                }
                None => {
                    table.diagnostics.unmatched += 1;
                    if key.is_empty() {
                        table.diagnostics.empty_name += 1;
                    } else {
                        table.diagnostics.unknown_name += 1;
                    }
                }
            }
        }
        table
    }

    pub fn get(&self, identifier: &CountyIdentifier) -> Option<Coordinates> {
        self.centroids.get(identifier).copied()
    }

    pub fn len(&self) -> usize {
        self.centroids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.centroids.is_empty()
    }
}

/// One provider marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerPoint {
    pub coordinates: Coordinates,
    pub source: LocationSource,
    pub county: Option<CountyIdentifier>,
    pub name: String,
    pub npi: Option<String>,
    pub address: String,
}

impl MarkerPoint {
    /// Popup lines: name, NPI, address
    pub fn popup_lines(&self) -> Vec<String> {
        let mut lines = vec![self.name.clone()];
        if let Some(npi) = &self.npi {
            lines.push(format!("NPI: {}", npi));
        }
        lines.push(format!("Address: {}", self.address));
        lines
    }
}

/// Markers built from a record subset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkerSet {
    pub markers: Vec<MarkerPoint>,
    pub geocoded: usize,
    pub county_fallback: usize,
    /// No coordinates and no usable centroid
    pub unplaced: usize,
}

/// Place every record on the map
pub fn build_markers<'a, I>(
    records: I,
    index: &NameIndex,
    centroids: Option<&CentroidTable>,
    strategy: MatchStrategy,
) -> MarkerSet
where
    I: IntoIterator<Item = &'a ProviderRecord>,
{
    let mut set = MarkerSet::default();

    for record in records {
        let county = index.resolve(record.county_name_raw.as_deref(), strategy).cloned();

        let placed = match record.coordinates() {
            Some(coordinates) => Some((coordinates, LocationSource::Geocoded)),
            None => county
                .as_ref()
                .and_then(|id| centroids?.get(id))
                .map(|c| (c, LocationSource::CountyFallback)),
        };

        let Some((coordinates, source)) = placed else {
            set.unplaced += 1;
            continue;
        };

        match source {
            LocationSource::Geocoded => set.geocoded += 1,
            LocationSource::CountyFallback => set.county_fallback += 1,
        }

        set.markers.push(MarkerPoint {
            coordinates,
            source,
            county,
            name: record.display_name(),
            npi: record.payload.npi.clone(),
            address: record.display_address().to_string(),
        });
    }

    tracing::debug!(
        geocoded = set.geocoded,
        county_fallback = set.county_fallback,
        unplaced = set.unplaced,
        "markers built"
    );
    set
}

/// Number of records with finite coordinates
pub fn count_with_coordinates<'a, I>(records: I) -> usize
where
    I: IntoIterator<Item = &'a ProviderRecord>,
{
    records.into_iter().filter(|r| r.coordinates().is_some()).count()
}
