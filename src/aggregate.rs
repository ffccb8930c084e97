/*!
 * Aggregation of provider records and joining of rate tables
 *
 * Both operations resolve county names through [`NameIndex`] and drop rows
 * that cannot be joined, counting them in [`JoinDiagnostics`] instead of
 * failing the pass.
 */

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use serde::{Deserialize, Serialize};

use crate::data_types::{CountyIdentifier, ProviderRecord, RateRecord, RateRow};
use crate::index::NameIndex;
use crate::normalize::{normalize, MatchStrategy};
use crate::{MapError, Result};

/// Per-pass join counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinDiagnostics {
    /// Rows looked at
    pub processed: usize,
    /// Rows that resolved to a county
    pub matched: usize,
    /// Rows dropped (`empty_name + unknown_name`)
    pub unmatched: usize,
    /// Dropped because the county name was missing or normalized to nothing
    pub empty_name: usize,
    /// Dropped because the normalized name is not in the index
    pub unknown_name: usize,
}

impl JoinDiagnostics {
    fn record_empty(&mut self) {
        self.unmatched += 1;
        self.empty_name += 1;
    }

    fn record_unknown(&mut self) {
        self.unmatched += 1;
        self.unknown_name += 1;
    }
}

/// County identifier → provider count, plus joined rate records
///
/// Every identifier in the index is present, zero when nothing matched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateTable {
    pub counts: BTreeMap<CountyIdentifier, u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub rates: BTreeMap<CountyIdentifier, RateRecord>,
}

impl AggregateTable {
    /// Count for a county; unknown identifiers read as zero
    pub fn count(&self, identifier: &CountyIdentifier) -> u64 {
        self.counts.get(identifier).copied().unwrap_or(0)
    }

    pub fn rate(&self, identifier: &CountyIdentifier, field: &str) -> Option<f64> {
        self.rates.get(identifier).and_then(|r| r.get(field))
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn max_count(&self) -> u64 {
        self.counts.values().copied().max().unwrap_or(0)
    }

    pub fn is_all_zero(&self) -> bool {
        self.counts.values().all(|&c| c == 0)
    }

    /// Counties ordered by descending count, ties by identifier
    pub fn ranked(&self) -> Vec<(&CountyIdentifier, u64)> {
        let mut ranked: Vec<_> = self.counts.iter().map(|(id, &c)| (id, c)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked
    }
}

/// Result of one aggregation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub table: AggregateTable,
    pub diagnostics: JoinDiagnostics,
}

/// Count provider records per county
///
/// Every row counts once; identical rows are distinct providers.
pub fn aggregate<'a, I>(records: I, index: &NameIndex, strategy: MatchStrategy) -> Aggregation
where
    I: IntoIterator<Item = &'a ProviderRecord>,
{
    let mut counts: BTreeMap<CountyIdentifier, u64> =
        index.identifiers().map(|id| (id.clone(), 0)).collect();
    let mut diagnostics = JoinDiagnostics::default();

    for record in records {
        diagnostics.processed += 1;

        let key = normalize(record.county_name_raw.as_deref());
        if key.is_empty() {
            diagnostics.record_empty();
            continue;
        }

        match index.resolve_key(&key, strategy) {
            Some(identifier) => {
                diagnostics.matched += 1;
                *counts.entry(identifier.clone()).or_insert(0) += 1;
            }
            None => {
                tracing::trace!(county = %key, "provider row did not join");
                diagnostics.record_unknown();
            }
        }
    }

    tracing::debug!(
        processed = diagnostics.processed,
        matched = diagnostics.matched,
        unmatched = diagnostics.unmatched,
        "aggregation pass complete"
    );

    Aggregation {
        table: AggregateTable { counts, rates: BTreeMap::new() },
        diagnostics,
    }
}

/// What to do when a rate table names the same county twice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Later rows replace earlier ones
    #[default]
    Overwrite,
    /// The first row is kept, later ones ignored
    KeepFirst,
    /// Fail the join with [`MapError::DuplicateRateKey`]
    Error,
}

impl std::str::FromStr for DuplicatePolicy {
    type Err = MapError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "overwrite" | "last" => Ok(DuplicatePolicy::Overwrite),
            "keep_first" | "keep-first" | "first" => Ok(DuplicatePolicy::KeepFirst),
            "error" => Ok(DuplicatePolicy::Error),
            other => Err(MapError::Configuration {
                message: format!("unknown duplicate policy '{}'", other),
                suggestion: Some("Use 'overwrite', 'keep_first' or 'error'".to_string()),
            }),
        }
    }
}

/// Result of joining one rate table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateJoin {
    pub rates: BTreeMap<CountyIdentifier, RateRecord>,
    pub diagnostics: JoinDiagnostics,
    /// Rows whose county was already present
    pub duplicates: usize,
}

/// Join rate rows one-to-one onto county identifiers
pub fn join_rates<'a, I>(
    table_name: &str,
    rows: I,
    index: &NameIndex,
    strategy: MatchStrategy,
    policy: DuplicatePolicy,
) -> Result<RateJoin>
where
    I: IntoIterator<Item = &'a RateRow>,
{
    let mut join = RateJoin::default();

    for (row_number, row) in rows.into_iter().enumerate() {
        join.diagnostics.processed += 1;

        let key = normalize(row.county_name_raw.as_deref());
        if key.is_empty() {
            join.diagnostics.record_empty();
            continue;
        }
        let Some(identifier) = index.resolve_key(&key, strategy) else {
            tracing::debug!(table = table_name, county = %key, "rate row did not join");
            join.diagnostics.record_unknown();
            continue;
        };
        join.diagnostics.matched += 1;

        let record = RateRecord { values: row.values.clone() };
        match join.rates.entry(identifier.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
            Entry::Occupied(mut slot) => {
                join.duplicates += 1;
                match policy {
                    DuplicatePolicy::Overwrite => {
                        slot.insert(record);
                    }
                    DuplicatePolicy::KeepFirst => {}
                    DuplicatePolicy::Error => {
                        return Err(MapError::DuplicateRateKey {
                            table: table_name.to_string(),
                            identifier: identifier.to_string(),
                            row: row_number + 1,
                        });
                    }
                }
            }
        }
    }

    if join.duplicates > 0 {
        tracing::warn!(table = table_name, duplicates = join.duplicates, ?policy, "rate table has repeated counties");
    }

    Ok(join)
}

/// Merge several joined rate tables into one record per county
///
/// A later table wins when two tables share a field name.
pub fn merge_rates<'a, I>(joins: I) -> BTreeMap<CountyIdentifier, RateRecord>
where
    I: IntoIterator<Item = &'a RateJoin>,
{
    let mut merged: BTreeMap<CountyIdentifier, RateRecord> = BTreeMap::new();
    for join in joins {
        for (identifier, record) in &join.rates {
            merged
                .entry(identifier.clone())
                .or_default()
                .values
                .extend(record.values.iter().map(|(k, v)| (k.clone(), *v)));
        }
    }
    merged
}
