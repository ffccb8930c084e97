/*!
 * Name-to-identifier index built from the boundary dataset
 */

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use crate::data_types::{BoundaryFeature, CountyIdentifier};
use crate::normalize::{normalize, MatchStrategy, NormalizedKey};
use crate::{MapError, Result};

/// Normalized county name → county identifier
///
/// Built once per boundary load and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NameIndex {
    entries: BTreeMap<NormalizedKey, CountyIdentifier>,
    display_names: BTreeMap<CountyIdentifier, String>,
}

impl NameIndex {
    /// Build the index from boundary features
    ///
    /// Features with an empty normalized name are skipped. A repeated
    /// feature (same key, same identifier) is ignored. Two features whose
    /// names normalize to one key but carry different identifiers fail
    /// with [`MapError::IndexCollision`]; two differently named features
    /// sharing one identifier fail with [`MapError::DuplicateCountyCode`].
    pub fn build<'a, I>(features: I, state_prefix: &str, code_width: usize) -> Result<Self>
    where
        I: IntoIterator<Item = &'a BoundaryFeature>,
    {
        let mut index = NameIndex::default();
        let mut skipped_empty = 0usize;

        for feature in features {
            let identifier = feature.identifier(state_prefix, code_width)?;
            let key = normalize(feature.county_name_raw.as_deref());

            if key.is_empty() {
                skipped_empty += 1;
                tracing::warn!(county_code = %feature.county_code, "boundary feature has no usable name; not indexed");
                continue;
            }

            let display = feature.county_name_raw.clone().unwrap_or_default();

            match index.entries.entry(key) {
                Entry::Vacant(slot) => {
                    if let Some(existing_name) = index.display_names.get(&identifier) {
                        return Err(MapError::DuplicateCountyCode {
                            identifier: identifier.to_string(),
                            existing_name: existing_name.clone(),
                            incoming_name: display,
                        });
                    }
                    slot.insert(identifier.clone());
                    index.display_names.insert(identifier, display);
                }
                Entry::Occupied(slot) if *slot.get() == identifier => {
                    tracing::warn!(key = %slot.key(), %identifier, "duplicate boundary feature ignored");
                }
                Entry::Occupied(slot) => {
                    let existing = slot.get().clone();
                    return Err(MapError::IndexCollision {
                        key: slot.key().to_string(),
                        existing_name: index.display_names.get(&existing).cloned().unwrap_or_default(),
                        existing: existing.to_string(),
                        incoming: identifier.to_string(),
                        incoming_name: display,
                    });
                }
            }
        }

        tracing::debug!(entries = index.len(), skipped_empty, "name index built");
        Ok(index)
    }

    /// Exact lookup of an already-normalized key
    pub fn get(&self, key: &NormalizedKey) -> Option<&CountyIdentifier> {
        self.entries.get(key)
    }

    /// Normalize a raw county name and resolve it using the given strategy
    pub fn resolve(&self, raw: Option<&str>, strategy: MatchStrategy) -> Option<&CountyIdentifier> {
        self.resolve_key(&normalize(raw), strategy)
    }

    /// Resolve a normalized key using the given strategy
    pub fn resolve_key(&self, key: &NormalizedKey, strategy: MatchStrategy) -> Option<&CountyIdentifier> {
        if key.is_empty() {
            return None;
        }
        strategy
            .candidates(key)
            .iter()
            .find_map(|candidate| self.entries.get(candidate))
    }

    /// Display name of the first feature indexed for an identifier
    pub fn display_name(&self, identifier: &CountyIdentifier) -> Option<&str> {
        self.display_names.get(identifier).map(String::as_str)
    }

    /// Every identifier present in the index, in order
    pub fn identifiers(&self) -> impl Iterator<Item = &CountyIdentifier> {
        self.display_names.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NormalizedKey, &CountyIdentifier)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn georgia() -> Vec<BoundaryFeature> {
        vec![
            BoundaryFeature::new("DeKalb", "089"),
            BoundaryFeature::new("Fulton", "121"),
            BoundaryFeature::new("Ben Hill", "17"),
        ]
    }

    #[test]
    fn test_build_index() {
        let features = georgia();
        let index = NameIndex::build(&features, "13", 3).unwrap();
        assert_eq!(index.len(), features.len());
        assert_eq!(index.resolve(Some("dekalb"), MatchStrategy::Exact).unwrap().as_str(), "13089");
        assert_eq!(index.resolve(Some("BEN  HILL"), MatchStrategy::Exact).unwrap().as_str(), "13017");
        assert!(index.resolve(Some("Cobb"), MatchStrategy::Exact).is_none());
        assert!(index.resolve(None, MatchStrategy::StripCountySuffix).is_none());
    }

    #[test]
    fn test_build_does_not_mutate_input() {
        let features = georgia();
        let before = features.clone();
        let _ = NameIndex::build(&features, "13", 3).unwrap();
        assert_eq!(features, before);
    }

    #[test]
    fn test_size_counts_only_named_features() {
        let mut features = georgia();
        features.push(BoundaryFeature {
            county_name_raw: None,
            ..BoundaryFeature::new("", "001")
        });
        features.push(BoundaryFeature::new("  ", "003"));
        let index = NameIndex::build(&features, "13", 3).unwrap();
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_collision_is_reported() {
        let features = vec![
            BoundaryFeature::new("DeKalb", "089"),
            BoundaryFeature::new("De Kalb", "097"),
            BoundaryFeature::new("DEKALB", "091"),
        ];
        // "De Kalb" is a different key; "DEKALB" collides with a different code
        match NameIndex::build(&features, "13", 3) {
            Err(MapError::IndexCollision { key, existing, incoming, .. }) => {
                assert_eq!(key, "DEKALB");
                assert_eq!(existing, "13089");
                assert_eq!(incoming, "13091");
            }
            other => panic!("expected collision, got {other:?}"),
        }
    }

    #[test]
    fn test_repeated_feature_is_not_a_collision() {
        let features = vec![
            BoundaryFeature::new("Fulton", "121"),
            BoundaryFeature::new("fulton", "121"),
        ];
        let index = NameIndex::build(&features, "13", 3).unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_duplicate_code_is_reported() {
        let features = vec![
            BoundaryFeature::new("DeKalb", "089"),
            BoundaryFeature::new("Fulton", "089"),
        ];
        match NameIndex::build(&features, "13", 3) {
            Err(MapError::DuplicateCountyCode { identifier, existing_name, incoming_name }) => {
                assert_eq!(identifier, "13089");
                assert_eq!(existing_name, "DeKalb");
                assert_eq!(incoming_name, "Fulton");
            }
            other => panic!("expected duplicate code, got {other:?}"),
        }

        // a zero-padded and a short form of one code are the same identifier
        let features = vec![BoundaryFeature::new("Ben Hill", "17"), BoundaryFeature::new("Berrien", "017")];
        assert!(matches!(
            NameIndex::build(&features, "13", 3),
            Err(MapError::DuplicateCountyCode { .. })
        ));
    }

    #[test]
    fn test_invalid_code_fails_build() {
        let features = vec![BoundaryFeature::new("Nowhere", "abc")];
        assert!(matches!(
            NameIndex::build(&features, "13", 3),
            Err(MapError::InvalidCountyCode { .. })
        ));
    }

    #[test]
    fn test_suffix_strategy() {
        let index = NameIndex::build(&georgia(), "13", 3).unwrap();
        assert!(index.resolve(Some("DeKalb County"), MatchStrategy::Exact).is_none());
        assert_eq!(
            index.resolve(Some("DeKalb County"), MatchStrategy::StripCountySuffix).unwrap().as_str(),
            "13089"
        );
        assert_eq!(index.display_name(&CountyIdentifier::parse("13121", "13", 3).unwrap()), Some("Fulton"));
    }

    #[test]
    fn test_suffixed_boundary_names() {
        let features = vec![
            BoundaryFeature::new("DeKalb County", "089"),
            BoundaryFeature::new("Fulton County", "121"),
        ];
        let index = NameIndex::build(&features, "13", 3).unwrap();
        assert_eq!(
            index.resolve(Some("DeKalb"), MatchStrategy::StripCountySuffix).unwrap().as_str(),
            "13089"
        );
        assert_eq!(
            index.resolve(Some("fulton county"), MatchStrategy::StripCountySuffix).unwrap().as_str(),
            "13121"
        );
        assert!(index.resolve(Some("DeKalb"), MatchStrategy::Exact).is_none());
    }
}
