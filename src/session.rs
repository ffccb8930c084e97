/*!
 * Session controller
 *
 * `MapSession` owns everything one map session loads: boundary features,
 * the name index, provider records, joined rate tables and centroids. It
 * is driven by load-completion events and filter changes, and walks the
 * pipeline state machine:
 *
 * ```text
 * Uninitialized -> LoadingBoundaries -> LoadingProviderData -> Ready <-+
 *                        |                     |                |    |
 *                        +---------------------+--> Error       +----+ FilterChanged
 * ```
 *
 * Provider and rate completions may arrive in any order. They are buffered
 * until the index exists, and the first aggregation runs only once the
 * boundaries, the providers and every required rate table are in.
 */

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use serde::{Deserialize, Serialize};

use crate::aggregate::{join_rates, merge_rates, Aggregation, DuplicatePolicy, JoinDiagnostics, RateJoin};
use crate::config::MapConfig;
use crate::data_types::*;
use crate::filter::{apply_filters, metric_values, FilterEngine, FilterState, JoinOptions, Metric};
use crate::index::NameIndex;
use crate::legend::{BandThresholds, Legend};
use crate::markers::{build_markers, CentroidTable, MarkerSet};
use crate::{MapError, Result};

/// Why a session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    BoundaryLoad,
    /// Boundary names collide in the index, or a county code is unusable
    InvalidBoundaries,
    ProviderLoad,
    RateLoad,
    /// A rate table broke the duplicate-row policy
    RateJoin,
    CentroidLoad,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureReason::BoundaryLoad => "boundary_load",
            FailureReason::InvalidBoundaries => "invalid_boundaries",
            FailureReason::ProviderLoad => "provider_load",
            FailureReason::RateLoad => "rate_load",
            FailureReason::RateJoin => "rate_join",
            FailureReason::CentroidLoad => "centroid_load",
        };
        write!(f, "{}", s)
    }
}

/// Pipeline state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineState {
    #[default]
    Uninitialized,
    LoadingBoundaries,
    LoadingProviderData,
    Ready,
    /// Terminal until the next `begin_load`
    Error { reason: FailureReason, message: String },
}

impl PipelineState {
    pub fn is_ready(&self) -> bool {
        matches!(self, PipelineState::Ready)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, PipelineState::Error { .. })
    }

    fn is_loading(&self) -> bool {
        matches!(self, PipelineState::LoadingBoundaries | PipelineState::LoadingProviderData)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Uninitialized => write!(f, "uninitialized"),
            PipelineState::LoadingBoundaries => write!(f, "loading boundaries"),
            PipelineState::LoadingProviderData => write!(f, "loading provider data"),
            PipelineState::Ready => write!(f, "ready"),
            PipelineState::Error { reason, message } => write!(f, "error ({}): {}", reason, message),
        }
    }
}

/// Handle identifying one load; completions for an older ticket are dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoadTicket(u64);

/// Everything a renderer needs for one frame
#[derive(Debug, Clone)]
pub struct MapSnapshot<'a> {
    pub features: Vec<&'a BoundaryFeature>,
    pub aggregation: &'a Aggregation,
    pub filter: &'a FilterState,
    /// Value of the selected metric per county that has one
    pub values: BTreeMap<CountyIdentifier, f64>,
    pub legend: Legend,
    /// Count for the selected county, when one is selected
    pub selected_count: Option<u64>,
}

impl MapSnapshot<'_> {
    /// Fill color for a county under the current legend
    pub fn fill_color(&self, identifier: &CountyIdentifier) -> Option<&str> {
        let value = self.values.get(identifier)?;
        self.legend.color_for(*value)
    }
}

/// Controller for one map session
#[derive(Debug, Clone)]
pub struct MapSession {
    options: JoinOptions,
    duplicate_policy: DuplicatePolicy,
    required_rate_tables: BTreeSet<String>,
    legend_classes: usize,
    thresholds: BandThresholds,

    state: PipelineState,
    ticket: u64,

    features: Vec<BoundaryFeature>,
    index: Option<NameIndex>,
    records: Option<Vec<ProviderRecord>>,
    pending_rates: BTreeMap<String, Vec<RateRow>>,
    rate_joins: BTreeMap<String, RateJoin>,
    rates: BTreeMap<CountyIdentifier, RateRecord>,
    pending_centroids: Option<Vec<CentroidRow>>,
    centroids: Option<CentroidTable>,

    filter: FilterState,
    aggregation: Option<Aggregation>,
    visible: BTreeSet<CountyIdentifier>,
}

impl Default for MapSession {
    fn default() -> Self {
        Self::new(&MapConfig::default())
    }
}

impl MapSession {
    pub fn new(config: &MapConfig) -> Self {
        Self {
            options: config.join_options(),
            duplicate_policy: config.duplicate_rate_policy,
            required_rate_tables: config.required_rate_tables.iter().cloned().collect(),
            legend_classes: config.legend_classes,
            thresholds: config.legend_thresholds,
            state: PipelineState::Uninitialized,
            ticket: 0,
            features: Vec::new(),
            index: None,
            records: None,
            pending_rates: BTreeMap::new(),
            rate_joins: BTreeMap::new(),
            rates: BTreeMap::new(),
            pending_centroids: None,
            centroids: None,
            filter: FilterState::default(),
            aggregation: None,
            visible: BTreeSet::new(),
        }
    }

    /// Add a rate table that must arrive before the first aggregation
    pub fn require_rate_table<S: Into<String>>(&mut self, name: S) {
        self.required_rate_tables.insert(name.into());
    }

    // ---- events ----

    /// Start a fresh load, superseding any load in flight
    pub fn begin_load(&mut self) -> LoadTicket {
        self.ticket += 1;
        self.features.clear();
        self.index = None;
        self.records = None;
        self.pending_rates.clear();
        self.rate_joins.clear();
        self.rates.clear();
        self.pending_centroids = None;
        self.centroids = None;
        self.aggregation = None;
        self.visible.clear();
        self.transition(PipelineState::LoadingBoundaries);
        LoadTicket(self.ticket)
    }

    /// Boundary load finished
    pub fn boundaries_loaded(&mut self, ticket: LoadTicket, result: Result<Vec<BoundaryFeature>>) -> &PipelineState {
        if !self.accepts(ticket, "boundaries") {
            return &self.state;
        }
        if self.index.is_some() {
            tracing::warn!("boundaries already loaded for this ticket; ignoring repeat");
            return &self.state;
        }

        let features = match result {
            Ok(features) => features,
            Err(e) => return self.fail(FailureReason::BoundaryLoad, MapError::load_failure("boundaries", &e)),
        };

        let index = match NameIndex::build(&features, &self.options.state_prefix, self.options.code_width) {
            Ok(index) => index,
            Err(e) => return self.fail(FailureReason::InvalidBoundaries, e),
        };

        tracing::info!(features = features.len(), indexed = index.len(), "name index ready");
        self.features = features;
        self.index = Some(index);
        self.transition(PipelineState::LoadingProviderData);

        let pending: Vec<(String, Vec<RateRow>)> = std::mem::take(&mut self.pending_rates).into_iter().collect();
        for (name, rows) in pending {
            if self.join_rate_table(&name, &rows).is_err() {
                return &self.state;
            }
        }
        if let Some(rows) = self.pending_centroids.take() {
            self.join_centroids(&rows);
        }

        self.try_complete()
    }

    /// Provider load finished
    pub fn providers_loaded(&mut self, ticket: LoadTicket, result: Result<Vec<ProviderRecord>>) -> &PipelineState {
        if !self.accepts(ticket, "providers") {
            return &self.state;
        }
        match result {
            Ok(records) => {
                tracing::debug!(records = records.len(), buffered = self.index.is_none(), "provider records received");
                self.records = Some(records);
                self.try_complete()
            }
            Err(e) => self.fail(FailureReason::ProviderLoad, MapError::load_failure("providers", &e)),
        }
    }

    /// Rate table load finished
    ///
    /// Tables arriving after `Ready` are joined and trigger a re-aggregation.
    pub fn rates_loaded(&mut self, ticket: LoadTicket, name: &str, result: Result<Vec<RateRow>>) -> &PipelineState {
        if !self.accepts(ticket, name) {
            return &self.state;
        }
        let rows = match result {
            Ok(rows) => rows,
            Err(e) => return self.fail(FailureReason::RateLoad, MapError::load_failure(name, &e)),
        };

        if self.index.is_none() {
            tracing::debug!(table = name, rows = rows.len(), "rate table buffered until the index exists");
            self.pending_rates.insert(name.to_string(), rows);
            return &self.state;
        }
        if self.join_rate_table(name, &rows).is_err() {
            return &self.state;
        }

        if self.state.is_ready() {
            self.refresh();
            &self.state
        } else {
            self.try_complete()
        }
    }

    /// Centroid table load finished; never part of the barrier
    pub fn centroids_loaded(&mut self, ticket: LoadTicket, result: Result<Vec<CentroidRow>>) -> &PipelineState {
        if !self.accepts(ticket, "centroids") {
            return &self.state;
        }
        match result {
            Ok(rows) if self.index.is_some() => {
                self.join_centroids(&rows);
                &self.state
            }
            Ok(rows) => {
                self.pending_centroids = Some(rows);
                &self.state
            }
            Err(e) => self.fail(FailureReason::CentroidLoad, MapError::load_failure("centroids", &e)),
        }
    }

    /// Replace the filter and re-aggregate from scratch
    pub fn set_filter(&mut self, filter: FilterState) -> Result<&Aggregation> {
        if !self.state.is_ready() {
            return Err(MapError::InvalidState {
                state: self.state.to_string(),
                expected: "ready".to_string(),
            });
        }
        self.filter = filter;
        self.refresh();
        self.aggregation.as_ref().ok_or_else(|| MapError::InvalidState {
            state: self.state.to_string(),
            expected: "a completed aggregation".to_string(),
        })
    }

    /// Change the selected metric only; counts are not recomputed
    pub fn set_metric(&mut self, metric: Metric) {
        self.filter.metric = metric;
    }

    // ---- accessors ----

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    pub fn options(&self) -> &JoinOptions {
        &self.options
    }

    pub fn index(&self) -> Option<&NameIndex> {
        self.index.as_ref()
    }

    pub fn features(&self) -> &[BoundaryFeature] {
        &self.features
    }

    pub fn records(&self) -> &[ProviderRecord] {
        self.records.as_deref().unwrap_or(&[])
    }

    /// Last completed aggregation
    pub fn aggregation(&self) -> Option<&Aggregation> {
        self.aggregation.as_ref()
    }

    /// Merged rate records per county
    pub fn rates(&self) -> &BTreeMap<CountyIdentifier, RateRecord> {
        &self.rates
    }

    pub fn rate_join(&self, name: &str) -> Option<&RateJoin> {
        self.rate_joins.get(name)
    }

    pub fn rate_tables(&self) -> impl Iterator<Item = &str> {
        self.rate_joins.keys().map(String::as_str)
    }

    pub fn centroids(&self) -> Option<&CentroidTable> {
        self.centroids.as_ref()
    }

    /// Current view for the renderer; only available once ready
    pub fn snapshot(&self) -> Result<MapSnapshot<'_>> {
        let aggregation = match (&self.state, &self.aggregation) {
            (PipelineState::Ready, Some(aggregation)) => aggregation,
            _ => {
                return Err(MapError::InvalidState {
                    state: self.state.to_string(),
                    expected: "ready".to_string(),
                })
            }
        };

        let features = self
            .features
            .iter()
            .filter(|f| {
                f.identifier(&self.options.state_prefix, self.options.code_width)
                    .map(|id| self.visible.contains(&id))
                    .unwrap_or(false)
            })
            .collect();
        let values = metric_values(aggregation, &self.filter.metric);
        let legend = Legend::equal_interval(values.values().copied(), self.legend_classes);

        Ok(MapSnapshot {
            features,
            aggregation,
            filter: &self.filter,
            selected_count: self.filter.county.as_only().map(|id| aggregation.table.count(id)),
            values,
            legend,
        })
    }

    /// Markers for the records passing the current filter
    pub fn markers(&self) -> Result<MarkerSet> {
        let index = self.index.as_ref().filter(|_| self.state.is_ready()).ok_or_else(|| MapError::InvalidState {
            state: self.state.to_string(),
            expected: "ready".to_string(),
        })?;
        let view = apply_filters(self.records(), &self.features, &self.filter, index, &self.options);
        Ok(build_markers(
            view.records.iter().copied(),
            index,
            self.centroids.as_ref(),
            self.options.match_strategy,
        ))
    }

    pub fn thresholds(&self) -> &BandThresholds {
        &self.thresholds
    }

    // ---- internals ----

    fn accepts(&self, ticket: LoadTicket, source: &str) -> bool {
        if ticket.0 != self.ticket {
            tracing::debug!(source, stale = ticket.0, current = self.ticket, "stale load completion ignored");
            return false;
        }
        if !self.state.is_loading() && !self.state.is_ready() {
            tracing::debug!(source, state = %self.state, "load completion ignored in current state");
            return false;
        }
        true
    }

    fn transition(&mut self, next: PipelineState) {
        if self.state != next {
            tracing::info!(from = %self.state, to = %next, "pipeline state change");
        }
        self.state = next;
    }

    fn fail(&mut self, reason: FailureReason, error: MapError) -> &PipelineState {
        tracing::error!(%reason, error = %error, "pipeline failed");
        self.aggregation = None;
        self.transition(PipelineState::Error {
            reason,
            message: error.user_message(),
        });
        &self.state
    }

    fn join_rate_table(&mut self, name: &str, rows: &[RateRow]) -> Result<()> {
        let Some(index) = self.index.as_ref() else {
            return Ok(());
        };
        match join_rates(name, rows, index, self.options.match_strategy, self.duplicate_policy) {
            Ok(join) => {
                log_join(name, &join.diagnostics);
                self.rate_joins.insert(name.to_string(), join);
                self.rates = merge_rates(self.rate_joins.values());
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                self.fail(FailureReason::RateJoin, e);
                Err(MapError::LoadFailure {
                    source_name: name.to_string(),
                    message,
                })
            }
        }
    }

    fn join_centroids(&mut self, rows: &[CentroidRow]) {
        if let Some(index) = self.index.as_ref() {
            let table = CentroidTable::join(rows, index, self.options.match_strategy);
            log_join("centroids", &table.diagnostics);
            self.centroids = Some(table);
        }
    }

    /// Enter `Ready` once the join barrier is satisfied
    fn try_complete(&mut self) -> &PipelineState {
        let waiting: Vec<&String> = self
            .required_rate_tables
            .iter()
            .filter(|name| !self.rate_joins.contains_key(*name))
            .collect();

        if self.index.is_none() || self.records.is_none() || !waiting.is_empty() {
            tracing::debug!(
                index = self.index.is_some(),
                providers = self.records.is_some(),
                waiting_rates = waiting.len(),
                "join barrier not yet satisfied"
            );
            return &self.state;
        }

        self.transition(PipelineState::Ready);
        self.refresh();
        &self.state
    }

    /// Full filter + aggregation pass from the immutable loaded data
    fn refresh(&mut self) {
        let Some(index) = self.index.as_ref() else {
            return;
        };
        let engine = FilterEngine::new(index, self.options.clone());
        let pass = engine.run(
            self.records.as_deref().unwrap_or(&[]),
            &self.features,
            &self.filter,
            &self.rates,
        );

        self.visible = pass
            .view
            .features
            .iter()
            .filter_map(|f| f.identifier(&self.options.state_prefix, self.options.code_width).ok())
            .collect();
        log_join("providers", &pass.aggregation.diagnostics);
        self.aggregation = Some(pass.aggregation);
    }
}

fn log_join(source: &str, diagnostics: &JoinDiagnostics) {
    if diagnostics.unmatched > 0 {
        tracing::info!(
            source,
            processed = diagnostics.processed,
            matched = diagnostics.matched,
            empty_name = diagnostics.empty_name,
            unknown_name = diagnostics.unknown_name,
            "rows did not join to a county"
        );
    } else {
        tracing::debug!(source, processed = diagnostics.processed, "all rows joined");
    }
}
