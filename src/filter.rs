/*!
 * Filter engine
 *
 * Filters are always applied to the full, immutable record and feature
 * sets; nothing is derived from the previous filter result.
 */

use std::collections::BTreeMap;
use std::fmt;
use serde::{Deserialize, Serialize};

use crate::aggregate::{aggregate, Aggregation};
use crate::data_types::{BoundaryFeature, CountyIdentifier, ProviderRecord, RateRecord};
use crate::index::NameIndex;
use crate::normalize::MatchStrategy;

/// `All` or one specific value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Selection<T> {
    #[default]
    All,
    Only(T),
}

impl<T> Selection<T> {
    pub fn is_all(&self) -> bool {
        matches!(self, Selection::All)
    }

    pub fn as_only(&self) -> Option<&T> {
        match self {
            Selection::All => None,
            Selection::Only(value) => Some(value),
        }
    }
}

/// Value shown per county
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    ProviderCount,
    /// A named field from the joined rate tables
    Rate(String),
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::ProviderCount => write!(f, "provider_count"),
            Metric::Rate(field) => write!(f, "{}", field),
        }
    }
}

impl std::str::FromStr for Metric {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "" | "count" | "provider_count" | "providers" => Metric::ProviderCount,
            field => Metric::Rate(field.to_string()),
        })
    }
}

/// Current user selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FilterState {
    pub county: Selection<CountyIdentifier>,
    pub provider_type: Selection<String>,
    pub metric: Metric,
}

impl FilterState {
    /// No county or provider-type restriction, provider counts
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_county(mut self, county: CountyIdentifier) -> Self {
        self.county = Selection::Only(county);
        self
    }

    pub fn with_provider_type<S: Into<String>>(mut self, code: S) -> Self {
        self.provider_type = Selection::Only(code.into());
        self
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }
}

/// Whether a county selection narrows the counted records too
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CountyFilterMode {
    /// Only the map geometry is narrowed; counts reflect the type filter alone
    GeometryOnly,
    /// Geometry and the counted records are both narrowed
    #[default]
    GeometryAndRecords,
}

/// Key-space settings shared by every join
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinOptions {
    pub state_prefix: String,
    pub code_width: usize,
    pub match_strategy: MatchStrategy,
    pub county_filter_mode: CountyFilterMode,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self {
            state_prefix: crate::constants::GEORGIA_STATE_FIPS.to_string(),
            code_width: crate::constants::COUNTY_CODE_WIDTH,
            match_strategy: MatchStrategy::default(),
            county_filter_mode: CountyFilterMode::default(),
        }
    }
}

/// Query builder over provider records
pub struct RecordQuery<'a> {
    records: &'a [ProviderRecord],
    filters: Vec<Box<dyn Fn(&ProviderRecord) -> bool + 'a>>,
}

impl<'a> RecordQuery<'a> {
    pub fn new(records: &'a [ProviderRecord]) -> Self {
        Self {
            records,
            filters: Vec::new(),
        }
    }

    /// Keep records whose provider type equals `code`
    pub fn provider_type(mut self, code: &'a str) -> Self {
        self.filters.push(Box::new(move |r| r.provider_type_code.as_deref() == Some(code)));
        self
    }

    /// Keep records whose county name resolves to `county`
    pub fn county(mut self, county: &'a CountyIdentifier, index: &'a NameIndex, strategy: MatchStrategy) -> Self {
        self.filters.push(Box::new(move |r| {
            index.resolve(r.county_name_raw.as_deref(), strategy) == Some(county)
        }));
        self
    }

    pub fn execute(self) -> Vec<&'a ProviderRecord> {
        self.records
            .iter()
            .filter(|record| self.filters.iter().all(|filter| filter(record)))
            .collect()
    }

    pub fn count(self) -> usize {
        self.execute().len()
    }
}

/// Records and features that survive a filter
#[derive(Debug, Clone, Default)]
pub struct FilteredView<'a> {
    pub records: Vec<&'a ProviderRecord>,
    pub features: Vec<&'a BoundaryFeature>,
}

/// Apply a filter state to the full record and feature sets
pub fn apply_filters<'a>(
    records: &'a [ProviderRecord],
    features: &'a [BoundaryFeature],
    filter: &'a FilterState,
    index: &'a NameIndex,
    options: &JoinOptions,
) -> FilteredView<'a> {
    let mut query = RecordQuery::new(records);

    if let Selection::Only(code) = &filter.provider_type {
        query = query.provider_type(code);
    }
    if let Selection::Only(county) = &filter.county {
        if options.county_filter_mode == CountyFilterMode::GeometryAndRecords {
            query = query.county(county, index, options.match_strategy);
        }
    }

    let features = match &filter.county {
        Selection::All => features.iter().collect(),
        Selection::Only(county) => features
            .iter()
            .filter(|f| {
                f.identifier(&options.state_prefix, options.code_width)
                    .map(|id| &id == county)
                    .unwrap_or(false)
            })
            .collect(),
    };

    FilteredView {
        records: query.execute(),
        features,
    }
}

/// Filtered subsets plus the aggregation computed over them
#[derive(Debug, Clone)]
pub struct FilteredAggregation<'a> {
    pub view: FilteredView<'a>,
    pub aggregation: Aggregation,
}

impl FilteredAggregation<'_> {
    /// Count for the selected county, if one is selected
    pub fn selected_count(&self, filter: &FilterState) -> Option<u64> {
        filter.county.as_only().map(|id| self.aggregation.table.count(id))
    }
}

/// Runs filter + aggregate passes against one index
pub struct FilterEngine<'a> {
    index: &'a NameIndex,
    options: JoinOptions,
}

impl<'a> FilterEngine<'a> {
    pub fn new(index: &'a NameIndex, options: JoinOptions) -> Self {
        Self { index, options }
    }

    pub fn options(&self) -> &JoinOptions {
        &self.options
    }

    /// Filter from scratch and aggregate the surviving records
    pub fn run<'d>(
        &self,
        records: &'d [ProviderRecord],
        features: &'d [BoundaryFeature],
        filter: &'d FilterState,
        rates: &BTreeMap<CountyIdentifier, RateRecord>,
    ) -> FilteredAggregation<'d>
    where
        'a: 'd,
    {
        let view = apply_filters(records, features, filter, self.index, &self.options);
        let mut aggregation = aggregate(view.records.iter().copied(), self.index, self.options.match_strategy);
        aggregation.table.rates = rates.clone();

        tracing::debug!(
            records = view.records.len(),
            features = view.features.len(),
            matched = aggregation.diagnostics.matched,
            "filter pass complete"
        );

        FilteredAggregation { view, aggregation }
    }
}

/// Project the selected metric onto each county that has a value
pub fn metric_values(aggregation: &Aggregation, metric: &Metric) -> BTreeMap<CountyIdentifier, f64> {
    match metric {
        Metric::ProviderCount => aggregation
            .table
            .counts
            .iter()
            .map(|(id, &count)| (id.clone(), count as f64))
            .collect(),
        Metric::Rate(field) => aggregation
            .table
            .rates
            .iter()
            .filter_map(|(id, record)| record.get(field).map(|v| (id.clone(), v)))
            .collect(),
    }
}
