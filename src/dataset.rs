/*!
 * Dataset API over files on disk
 *
 * `MapDatasetBuilder` reads the boundary, provider, rate and centroid files
 * and feeds each result into a `MapSession` as a load-completion event, so
 * the same barrier, buffering and error states apply as for any other
 * driver of the session.
 */

use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::{Result, MapError};
use crate::aggregate::Aggregation;
use crate::analytics::{DatasetStats, MapAnalytics};
use crate::config::MapConfig;
use crate::data_types::*;
use crate::filter::{FilterState, RecordQuery};
use crate::index::NameIndex;
use crate::reader::MapReader;
use crate::session::{MapSession, MapSnapshot, PipelineState};

/// Builder for loading a complete map dataset
///
/// # Example
/// ```no_run
/// # use county_provider_map::dataset::MapDatasetBuilder;
/// let dataset = MapDatasetBuilder::new()
///     .boundaries("data/georgia-counties.geojson")
///     .providers("data/providers.csv")
///     .rate_table("family_physicians", "data/fp_rates.csv")
///     .centroids("data/county_centroids.csv")
///     .build()?;
/// # Ok::<(), county_provider_map::MapError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct MapDatasetBuilder {
    boundaries_path: Option<PathBuf>,
    providers_path: Option<PathBuf>,
    rate_paths: Vec<(String, PathBuf)>,
    centroids_path: Option<PathBuf>,
    config: Option<MapConfig>,
    skip_invalid_records: Option<bool>,
    #[cfg(feature = "progress")]
    show_progress: Option<bool>,
}

impl MapDatasetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the county boundary GeoJSON file
    pub fn boundaries<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.boundaries_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the provider CSV file
    pub fn providers<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.providers_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Add a named per-county rate table
    pub fn rate_table<S: Into<String>, P: AsRef<Path>>(mut self, name: S, path: P) -> Self {
        self.rate_paths.push((name.into(), path.as_ref().to_path_buf()));
        self
    }

    /// Set the county centroid CSV used for marker fallback
    pub fn centroids<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.centroids_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Use an explicit configuration instead of the global one
    pub fn config(mut self, config: MapConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Enable or disable skipping invalid records
    pub fn skip_invalid_records(mut self, skip: bool) -> Self {
        self.skip_invalid_records = Some(skip);
        self
    }

    #[cfg(feature = "progress")]
    /// Enable or disable progress bars
    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = Some(show);
        self
    }

    /// Load every file and bring the session to `Ready`
    pub fn build(self) -> Result<MapDataset> {
        let boundaries_path = self.boundaries_path.ok_or_else(|| MapError::Custom {
            message: "Boundary file path not specified".to_string(),
            suggestion: Some("Use .boundaries() to specify the county GeoJSON file".to_string()),
        })?;
        let providers_path = self.providers_path.ok_or_else(|| MapError::Custom {
            message: "Provider file path not specified".to_string(),
            suggestion: Some("Use .providers() to specify the provider CSV file".to_string()),
        })?;

        let mut config = self.config.unwrap_or_else(crate::config::global_config);
        if let Some(skip) = self.skip_invalid_records {
            config.skip_invalid_records = skip;
        }
        #[cfg(feature = "progress")]
        if let Some(show) = self.show_progress {
            config.enable_progress_bar = show;
        }
        config.validate()?;

        let start_time = Instant::now();
        let reader = MapReader::from_config(&config);
        let mut session = MapSession::new(&config);
        let ticket = session.begin_load();

        session.boundaries_loaded(ticket, reader.load_boundaries(&boundaries_path));
        for (name, path) in &self.rate_paths {
            session.rates_loaded(ticket, name, reader.load_rates(path));
        }
        if let Some(path) = &self.centroids_path {
            session.centroids_loaded(ticket, reader.load_centroids(path));
        }
        session.providers_loaded(ticket, reader.load_providers(&providers_path));

        match session.state().clone() {
            PipelineState::Ready => {
                tracing::info!(
                    elapsed_ms = start_time.elapsed().as_millis() as u64,
                    providers = session.records().len(),
                    counties = session.features().len(),
                    "dataset ready"
                );
                Ok(MapDataset { session, config })
            }
            PipelineState::Error { reason, message } => Err(MapError::LoadFailure {
                source_name: reason.to_string(),
                message,
            }),
            other => Err(MapError::InvalidState {
                state: other.to_string(),
                expected: "ready".to_string(),
            }),
        }
    }

    /// Pick up files from a directory by name
    ///
    /// The first `.geojson` file is the boundary set, a CSV whose name
    /// contains `provider` is the provider table, one containing `centroid`
    /// is the centroid table, and every other CSV becomes a rate table named
    /// after its file stem.
    pub fn from_directory<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();

        if !dir.is_dir() {
            return Err(MapError::Custom {
                message: format!("'{}' is not a directory", dir.display()),
                suggestion: Some("Provide a directory containing the boundary and provider files".to_string()),
            });
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        let mut builder = Self::new();
        for path in paths {
            let filename = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("")
                .to_ascii_lowercase();
            let stem = path
                .file_stem()
                .and_then(|n| n.to_str())
                .unwrap_or("")
                .to_string();

            if filename.ends_with(".geojson") {
                if builder.boundaries_path.is_none() {
                    builder = builder.boundaries(path);
                }
            } else if filename.ends_with(".csv") {
                if filename.contains("provider") && builder.providers_path.is_none() {
                    builder = builder.providers(path);
                } else if filename.contains("centroid") {
                    builder = builder.centroids(path);
                } else {
                    builder = builder.rate_table(stem, path);
                }
            }
        }

        Ok(builder)
    }
}

/// A loaded map: configuration plus a session in the `Ready` state
#[derive(Debug, Clone)]
pub struct MapDataset {
    session: MapSession,
    config: MapConfig,
}

impl MapDataset {
    /// Load a dataset from a directory
    ///
    /// # Example
    /// ```no_run
    /// # use county_provider_map::dataset::MapDataset;
    /// let dataset = MapDataset::load_directory("./data")?;
    /// # Ok::<(), county_provider_map::MapError>(())
    /// ```
    pub fn load_directory<P: AsRef<Path>>(dir: P) -> Result<Self> {
        MapDatasetBuilder::from_directory(dir)?.build()
    }

    pub fn session(&self) -> &MapSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut MapSession {
        &mut self.session
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    pub fn providers(&self) -> &[ProviderRecord] {
        self.session.records()
    }

    pub fn features(&self) -> &[BoundaryFeature] {
        self.session.features()
    }

    /// Name index built from the boundaries
    pub fn index(&self) -> Option<&NameIndex> {
        self.session.index()
    }

    /// Number of provider records
    pub fn len(&self) -> usize {
        self.providers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers().is_empty()
    }

    /// Resolve a county given as a name, a short code or a full identifier
    pub fn county(&self, value: &str) -> Option<CountyIdentifier> {
        let options = self.session.options();
        if let Ok(identifier) = CountyIdentifier::parse(value, &options.state_prefix, options.code_width) {
            let known = self
                .index()
                .map(|index| index.identifiers().any(|id| id == &identifier))
                .unwrap_or(false);
            if known {
                return Some(identifier);
            }
        }
        self.index()?.resolve(Some(value), options.match_strategy).cloned()
    }

    /// Providers whose county joins to `county`
    pub fn providers_in_county<'a>(&'a self, county: &'a CountyIdentifier) -> Vec<&'a ProviderRecord> {
        match self.index() {
            Some(index) => RecordQuery::new(self.providers())
                .county(county, index, self.session.options().match_strategy)
                .execute(),
            None => Vec::new(),
        }
    }

    /// Apply a filter and return the fresh aggregation
    pub fn apply(&mut self, filter: FilterState) -> Result<&Aggregation> {
        self.session.set_filter(filter)
    }

    /// Last completed aggregation
    pub fn aggregation(&self) -> Option<&Aggregation> {
        self.session.aggregation()
    }

    pub fn snapshot(&self) -> Result<MapSnapshot<'_>> {
        self.session.snapshot()
    }

    /// Analytics over every loaded provider
    pub fn analytics(&self) -> Option<MapAnalytics<'_>> {
        let strategy = self.session.options().match_strategy;
        self.index()
            .map(|index| MapAnalytics::new(self.providers(), index).with_match_strategy(strategy))
    }

    pub fn statistics(&self) -> Option<DatasetStats> {
        self.analytics().map(|a| a.dataset_stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_fixture(dir: &Path) {
        fs::write(
            dir.join("counties.geojson"),
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","properties":{"NAME":"DeKalb","COUNTYFP":"089"},"geometry":null},
                {"type":"Feature","properties":{"NAME":"Fulton","COUNTYFP":"121"},"geometry":null}
            ]}"#,
        )
        .unwrap();
        fs::write(
            dir.join("providers.csv"),
            "NPI,county,provider_type\n1,dekalb,NP\n2,DeKalb County,MD\n3,Fulton,NP\n4,,NP\n",
        )
        .unwrap();
        fs::write(dir.join("fp_rates.csv"), "county,fp_rate\nFulton,41.2\n").unwrap();
        fs::write(dir.join("county_centroids.csv"), "County,Latitude,Longitude\nFulton,33.79,-84.47\n").unwrap();
    }

    fn quiet() -> MapConfig {
        crate::config::ConfigBuilder::new().progress_bar(false).build()
    }

    #[test]
    fn test_from_directory() {
        let dir = TempDir::new().unwrap();
        write_fixture(dir.path());

        let dataset = MapDatasetBuilder::from_directory(dir.path())
            .unwrap()
            .config(quiet())
            .build()
            .unwrap();

        assert_eq!(dataset.len(), 4);
        assert_eq!(dataset.features().len(), 2);
        let fulton = dataset.county("Fulton").unwrap();
        assert_eq!(fulton.as_str(), "13121");
        assert_eq!(dataset.county("121"), Some(fulton.clone()));
        assert_eq!(dataset.county("13121"), Some(fulton.clone()));
        assert_eq!(dataset.county("Atlantis"), None);

        let aggregation = dataset.aggregation().unwrap();
        assert_eq!(aggregation.table.rate(&fulton, "fp_rate"), Some(41.2));
        assert_eq!(aggregation.diagnostics.unmatched, 1);
        assert!(dataset.session().centroids().is_some());
        assert_eq!(dataset.providers_in_county(&fulton).len(), 1);
        assert_eq!(dataset.statistics().unwrap().matched_providers, 3);
    }

    #[test]
    fn test_missing_paths() {
        assert!(MapDatasetBuilder::new().providers("p.csv").build().is_err());
        assert!(MapDatasetBuilder::new().boundaries("b.geojson").build().is_err());
    }

    #[test]
    fn test_load_failure_surfaces() {
        let dir = TempDir::new().unwrap();
        write_fixture(dir.path());
        let result = MapDatasetBuilder::new()
            .boundaries(dir.path().join("counties.geojson"))
            .providers(dir.path().join("missing.csv"))
            .config(quiet())
            .build();
        match result {
            Err(MapError::LoadFailure { source_name, .. }) => assert_eq!(source_name, "provider_load"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_apply_filter() {
        let dir = TempDir::new().unwrap();
        write_fixture(dir.path());
        let mut dataset = MapDatasetBuilder::from_directory(dir.path())
            .unwrap()
            .config(quiet())
            .build()
            .unwrap();
        let dekalb = dataset.county("DeKalb").unwrap();
        let md = dataset.apply(FilterState::all().with_provider_type("MD")).unwrap();
        assert_eq!(md.table.count(&dekalb), 1);
        assert_eq!(md.table.total(), 1);
    }

    #[test]
    fn test_providers_in_county() {
        let dir = TempDir::new().unwrap();
        write_fixture(dir.path());
        let dataset = MapDatasetBuilder::from_directory(dir.path())
            .unwrap()
            .config(quiet())
            .build()
            .unwrap();

        let in_dekalb = {
            let dekalb = CountyIdentifier::parse("089", "13", 3).unwrap();
            dataset.providers_in_county(&dekalb).len()
        };
        assert_eq!(in_dekalb, 2);

        let fulton = dataset.county("13121").unwrap();
        let found = dataset.providers_in_county(&fulton);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].provider_type_code.as_deref(), Some("NP"));
    }
}
