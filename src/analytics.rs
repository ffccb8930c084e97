/*!
 * Analytics over loaded provider data
 *
 * Option lists for the county and provider-type selectors, per-type and
 * per-county counts, and dataset-level statistics.
 */

use std::collections::{BTreeMap, BTreeSet};

use crate::aggregate::{aggregate, AggregateTable};
use crate::data_types::*;
use crate::index::NameIndex;
use crate::markers::count_with_coordinates;
use crate::normalize::{normalize, MatchStrategy};

/// One entry of the county selector
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CountyOption {
    pub name: String,
    pub identifier: CountyIdentifier,
}

/// Analytics engine over one provider set and its name index
pub struct MapAnalytics<'a> {
    providers: &'a [ProviderRecord],
    index: &'a NameIndex,
    strategy: MatchStrategy,
}

impl<'a> MapAnalytics<'a> {
    pub fn new(providers: &'a [ProviderRecord], index: &'a NameIndex) -> Self {
        Self {
            providers,
            index,
            strategy: MatchStrategy::default(),
        }
    }

    pub fn with_match_strategy(mut self, strategy: MatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Basic statistics about the dataset
    pub fn dataset_stats(&self) -> DatasetStats {
        let aggregation = aggregate(self.providers, self.index, self.strategy);
        let counties_with_providers = aggregation.table.counts.values().filter(|&&c| c > 0).count();

        DatasetStats {
            total_providers: self.providers.len(),
            matched_providers: aggregation.diagnostics.matched,
            empty_county_name: aggregation.diagnostics.empty_name,
            unknown_county_name: aggregation.diagnostics.unknown_name,
            indexed_counties: self.index.identifiers().count(),
            counties_with_providers,
            provider_types: self.provider_types().len(),
            with_coordinates: count_with_coordinates(self.providers),
        }
    }

    /// Distinct non-empty provider-type codes, sorted
    pub fn provider_types(&self) -> Vec<String> {
        self.providers
            .iter()
            .filter_map(|p| p.provider_type_code.as_deref())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// County selector entries sorted by display name
    pub fn county_options(&self) -> Vec<CountyOption> {
        let mut options: Vec<CountyOption> = self
            .index
            .identifiers()
            .map(|id| CountyOption {
                name: self.index.display_name(id).unwrap_or(id.as_str()).to_string(),
                identifier: id.clone(),
            })
            .collect();
        options.sort();
        options
    }

    /// Provider rows per type code; rows without a type are counted under ""
    pub fn provider_count_by_type(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for provider in self.providers {
            let code = provider.provider_type_code.clone().unwrap_or_default();
            *counts.entry(code).or_insert(0) += 1;
        }
        counts
    }

    /// Aggregate table over every provider
    pub fn county_counts(&self) -> AggregateTable {
        aggregate(self.providers, self.index, self.strategy).table
    }

    /// Counties with the most providers, ties broken by identifier
    pub fn top_counties(&self, limit: usize) -> Vec<(CountyIdentifier, u64)> {
        let table = self.county_counts();
        table
            .ranked()
            .into_iter()
            .take(limit)
            .map(|(id, count)| (id.clone(), count))
            .collect()
    }

    /// Normalized county names that did not join, with their row counts
    pub fn unmatched_names(&self) -> BTreeMap<String, usize> {
        let mut names = BTreeMap::new();
        for provider in self.providers {
            let key = normalize(provider.county_name_raw.as_deref());
            if key.is_empty() || self.index.resolve_key(&key, self.strategy).is_some() {
                continue;
            }
            *names.entry(key.as_str().to_string()).or_insert(0) += 1;
        }
        names
    }
}

/// Statistics about a loaded dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetStats {
    pub total_providers: usize,
    pub matched_providers: usize,
    pub empty_county_name: usize,
    pub unknown_county_name: usize,
    pub indexed_counties: usize,
    pub counties_with_providers: usize,
    pub provider_types: usize,
    pub with_coordinates: usize,
}

impl DatasetStats {
    /// Print formatted statistics
    pub fn print_summary(&self) {
        println!("=== County Provider Map Statistics ===");
        println!("Total Providers: {}", self.total_providers);
        println!("  Matched to a county: {}", self.matched_providers);
        println!("  Empty county name: {}", self.empty_county_name);
        println!("  Unknown county name: {}", self.unknown_county_name);
        println!("Indexed Counties: {}", self.indexed_counties);
        println!("Counties With Providers: {}", self.counties_with_providers);
        println!("Provider Types: {}", self.provider_types);
        println!("Providers With Coordinates: {}", self.with_coordinates);

        if self.total_providers > 0 {
            let matched_percent = (self.matched_providers as f64 / self.total_providers as f64) * 100.0;
            let geocoded_percent = (self.with_coordinates as f64 / self.total_providers as f64) * 100.0;
            println!("Match Percentage: {:.1}%", matched_percent);
            println!("Geocoded Percentage: {:.1}%", geocoded_percent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (Vec<ProviderRecord>, NameIndex) {
        let features = vec![
            BoundaryFeature::new("Fulton", "121"),
            BoundaryFeature::new("DeKalb", "089"),
            BoundaryFeature::new("Appling", "001"),
        ];
        let index = NameIndex::build(&features, "13", 3).unwrap();
        let mut records = vec![
            ProviderRecord::new(Some("Fulton"), Some("NP")),
            ProviderRecord::new(Some("Fulton"), Some("MD")),
            ProviderRecord::new(Some("dekalb"), Some("NP")),
            ProviderRecord::new(Some("Atlantis"), Some("NP")),
            ProviderRecord::new(Some("atlantis!"), None),
            ProviderRecord::new(None, Some("PA")),
        ];
        records[0].payload.latitude = Some(33.7);
        records[0].payload.longitude = Some(-84.4);
        (records, index)
    }

    #[test]
    fn test_dataset_stats() {
        let (records, index) = fixture();
        let stats = MapAnalytics::new(&records, &index).dataset_stats();
        assert_eq!(stats.total_providers, 6);
        assert_eq!(stats.matched_providers, 3);
        assert_eq!(stats.empty_county_name, 1);
        assert_eq!(stats.unknown_county_name, 2);
        assert_eq!(stats.indexed_counties, 3);
        assert_eq!(stats.counties_with_providers, 2);
        assert_eq!(stats.provider_types, 3);
        assert_eq!(stats.with_coordinates, 1);
    }

    #[test]
    fn test_options_and_counts() {
        let (records, index) = fixture();
        let analytics = MapAnalytics::new(&records, &index);

        assert_eq!(analytics.provider_types(), vec!["MD", "NP", "PA"]);
        let names: Vec<String> = analytics.county_options().into_iter().map(|o| o.name).collect();
        assert_eq!(names, vec!["Appling", "DeKalb", "Fulton"]);

        let by_type = analytics.provider_count_by_type();
        assert_eq!(by_type.get("NP"), Some(&3));
        assert_eq!(by_type.get(""), Some(&1));

        let top = analytics.top_counties(2);
        assert_eq!(top[0].0.as_str(), "13121");
        assert_eq!(top[0].1, 2);
        assert_eq!(top[1].1, 1);

        let unmatched = analytics.unmatched_names();
        assert_eq!(unmatched.get("ATLANTIS"), Some(&2));
    }
}
