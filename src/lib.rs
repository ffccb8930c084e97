/*!
 * # County Provider Map
 *
 * Data-join and aggregation library behind a choropleth / marker map of
 * healthcare providers across Georgia counties.
 *
 * ## Features
 *
 * - **Single join key**: every county name goes through [`normalize::normalize`]
 *   into a [`normalize::NormalizedKey`] before any comparison
 * - **Name index**: normalized boundary names map to 5-character county
 *   identifiers; colliding names are a hard error, never a silent overwrite
 * - **Full re-aggregation**: every filter change recomputes counts from the
 *   immutable loaded data
 * - **Explicit session state**: load barrier, buffering of early arrivals,
 *   last-load-wins tickets and a terminal error state
 * - **Exports**: per-county CSV/JSON tables and enriched GeoJSON
 *
 * ## Quick Start
 *
 * ```no_run
 * use county_provider_map::prelude::*;
 *
 * # fn main() -> Result<()> {
 * let mut dataset = MapDatasetBuilder::new()
 *     .boundaries("data/georgia-counties.geojson")
 *     .providers("data/providers.csv")
 *     .rate_table("family_physicians", "data/fp_rates.csv")
 *     .build()?;
 *
 * // Nurse practitioners only
 * let np = dataset.apply(FilterState::all().with_provider_type("NP"))?;
 * println!("{} NPs matched, {} rows unmatched", np.diagnostics.matched, np.diagnostics.unmatched);
 *
 * // Write the filtered view for a renderer
 * dataset.export_geojson("np_counties.geojson")?;
 * # Ok(())
 * # }
 * ```
 *
 * ## Driving a Session Directly
 *
 * Loads can finish in any order; the session buffers until the index and
 * every required table are in.
 *
 * ```no_run
 * # use county_provider_map::prelude::*;
 * # fn main() -> Result<()> {
 * let config = MapConfig::default();
 * let reader = MapReader::from_config(&config);
 * let mut session = MapSession::new(&config);
 *
 * let ticket = session.begin_load();
 * session.providers_loaded(ticket, reader.load_providers("data/providers.csv"));
 * session.boundaries_loaded(ticket, reader.load_boundaries("data/georgia-counties.geojson"));
 *
 * match session.state() {
 *     PipelineState::Ready => session.snapshot()?.aggregation.table.ranked().len(),
 *     PipelineState::Error { message, .. } => { eprintln!("{}", message); 0 }
 *     _ => 0,
 * };
 * # Ok(())
 * # }
 * ```
 *
 * ## Configuration
 *
 * ```no_run
 * # use county_provider_map::prelude::*;
 * let config = ConfigBuilder::new()
 *     .match_strategy(MatchStrategy::Exact)
 *     .county_filter_mode(CountyFilterMode::GeometryOnly)
 *     .duplicate_rate_policy(DuplicatePolicy::Error)
 *     .skip_invalid_records(true)
 *     .build();
 * county_provider_map::config::set_global_config(config);
 * ```
 */

// Re-export error types from root
pub use error::{MapError, Result, ErrorContext, ExportFormat};

// Public modules
pub mod data_types;
pub mod normalize;
pub mod index;
pub mod aggregate;
pub mod filter;
pub mod session;
pub mod reader;
pub mod schema;
pub mod error;
pub mod legend;
pub mod markers;
pub mod analytics;
pub mod dataset;
pub mod export;
pub mod config;

/// Prelude module for convenient imports
///
/// Import everything you need with:
/// ```
/// use county_provider_map::prelude::*;
/// ```
pub mod prelude {
    pub use crate::data_types::*;
    pub use crate::normalize::{normalize, MatchStrategy, NormalizedKey};
    pub use crate::index::NameIndex;
    pub use crate::aggregate::{aggregate, join_rates, AggregateTable, Aggregation, DuplicatePolicy, JoinDiagnostics};
    pub use crate::filter::{apply_filters, CountyFilterMode, FilterEngine, FilterState, JoinOptions, Metric, Selection};
    pub use crate::session::{FailureReason, LoadTicket, MapSession, MapSnapshot, PipelineState};
    pub use crate::reader::MapReader;
    pub use crate::error::{MapError, Result};
    pub use crate::analytics::{MapAnalytics, DatasetStats};
    pub use crate::dataset::{MapDataset, MapDatasetBuilder};
    pub use crate::export::{MapExporter, JsonExporter, CsvExporter, GeoJsonExporter};
    pub use crate::legend::{BandThresholds, DensityBand, Legend};
    pub use crate::markers::{MarkerSet, LocationSource};
    pub use crate::config::{ConfigBuilder, MapConfig};
    pub use crate::ExportFormat;
}

/// Key-space and file-format constants
pub mod constants {
    /// State FIPS prefix for Georgia
    pub const GEORGIA_STATE_FIPS: &str = "13";

    /// Digits in a county code without the state prefix
    pub const COUNTY_CODE_WIDTH: usize = 3;

    /// Boundary feature properties
    pub const DEFAULT_BOUNDARY_NAME_PROPERTY: &str = "NAME";
    pub const DEFAULT_BOUNDARY_CODE_PROPERTY: &str = "COUNTYFP";

    /// Provider and rate table columns
    pub const DEFAULT_PROVIDER_COUNTY_COLUMN: &str = "county";
    pub const DEFAULT_PROVIDER_TYPE_COLUMN: &str = "provider_type";
    pub const DEFAULT_RATE_COUNTY_COLUMN: &str = "county";

    /// Optional provider payload columns
    pub const NPI_COLUMN: &str = "NPI";
    pub const FIRST_NAME_COLUMN: &str = "Provider_First_Name";
    pub const LAST_NAME_COLUMN: &str = "Provider_Last_Name";
    pub const ADDRESS_COLUMN: &str = "address";
    pub const USPS_ADDRESS_COLUMN: &str = "address_usps_standardized";

    /// Accepted coordinate headers, in order of preference
    pub const LATITUDE_ALIASES: &[&str] = &["lat", "Lat", "latitude", "Latitude"];
    pub const LONGITUDE_ALIASES: &[&str] = &["lon", "Lon", "lng", "Lng", "longitude", "Longitude"];

    pub const CENTROID_COUNTY_COLUMN: &str = "County";

    /// Display fallbacks
    pub const UNNAMED_PROVIDER: &str = "Unnamed Provider";
    pub const NO_ADDRESS: &str = "No address";
}

/// Common recipes and utility functions
pub mod cookbook {
    use crate::prelude::*;
    use std::collections::BTreeMap;

    /// Provider counts per county for every provider type
    ///
    /// # Example
    /// ```no_run
    /// # use county_provider_map::prelude::*;
    /// # use county_provider_map::cookbook::counts_by_type;
    /// # fn main() -> Result<()> {
    /// # let dataset = MapDataset::load_directory("./data")?;
    /// let by_type = counts_by_type(&dataset);
    /// if let Some(np) = by_type.get("NP") {
    ///     println!("{} NPs statewide", np.total());
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn counts_by_type(dataset: &MapDataset) -> BTreeMap<String, AggregateTable> {
        let Some(index) = dataset.index() else {
            return BTreeMap::new();
        };
        let strategy = dataset.session().options().match_strategy;
        let mut codes: Vec<&str> = dataset
            .providers()
            .iter()
            .filter_map(|p| p.provider_type_code.as_deref())
            .collect();
        codes.sort_unstable();
        codes.dedup();

        codes
            .into_iter()
            .map(|code| {
                let subset = dataset
                    .providers()
                    .iter()
                    .filter(|p| p.provider_type_code.as_deref() == Some(code));
                (code.to_string(), aggregate(subset, index, strategy).table)
            })
            .collect()
    }

    /// Counties whose provider count falls in the low density band
    pub fn sparse_counties(table: &AggregateTable, thresholds: &BandThresholds) -> Vec<CountyIdentifier> {
        table
            .counts
            .iter()
            .filter(|(_, count)| DensityBand::classify(**count, thresholds) == DensityBand::Low)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Providers per unit of a rate field, for counties that have both
    pub fn providers_per_rate(table: &AggregateTable, field: &str) -> BTreeMap<CountyIdentifier, f64> {
        table
            .counts
            .iter()
            .filter_map(|(id, &count)| {
                let rate = table.rate(id, field)?;
                (rate != 0.0).then(|| (id.clone(), count as f64 / rate))
            })
            .collect()
    }
}
