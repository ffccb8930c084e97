/*!
 * County name normalization
 *
 * Every join between provider rows, boundary features and rate tables goes
 * through [`normalize`]. [`NormalizedKey`] can only be constructed here, so
 * no other code path can invent its own comparison rules.
 */

use std::fmt;
use serde::{Deserialize, Serialize};

const COUNTY_SUFFIX: &str = " COUNTY";

/// A county name reduced to uppercase letters separated by single spaces
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NormalizedKey(String);

impl NormalizedKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The same key without a trailing `COUNTY` word, if it had one
    ///
    /// `"DEKALB COUNTY"` becomes `"DEKALB"`; a bare `"COUNTY"` is left alone.
    pub fn without_county_suffix(&self) -> Option<NormalizedKey> {
        self.0
            .strip_suffix(COUNTY_SUFFIX)
            .filter(|rest| !rest.is_empty())
            .map(|rest| NormalizedKey(rest.to_string()))
    }

    /// The same key with a trailing `COUNTY` word added, unless it already has one
    pub fn with_county_suffix(&self) -> Option<NormalizedKey> {
        if self.0.is_empty() || self.0 == COUNTY_SUFFIX.trim_start() || self.0.ends_with(COUNTY_SUFFIX) {
            return None;
        }
        Some(NormalizedKey(format!("{}{}", self.0, COUNTY_SUFFIX)))
    }
}

impl fmt::Display for NormalizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonicalize a free-text county name into a join key
///
/// Drops every character that is not a letter or whitespace, trims,
/// collapses whitespace runs and uppercases. Letters are Unicode-aware, so
/// `"Évans"` keeps its accent as `"ÉVANS"`. `None` and blank input give an
/// empty key.
pub fn normalize(raw: Option<&str>) -> NormalizedKey {
    let Some(raw) = raw else {
        return NormalizedKey::default();
    };

    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;

    for ch in raw.chars() {
        if ch.is_alphabetic() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            // some uppercase mappings add combining marks, which are not letters
            out.extend(ch.to_uppercase().filter(|c| c.is_alphabetic()));
        } else if ch.is_whitespace() {
            pending_space = true;
        }
    }

    NormalizedKey(out)
}

/// How a normalized record name is matched against the name index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// The key must equal an index key
    Exact,
    /// Try the key as-is, then with the trailing `COUNTY` word removed or added
    ///
    /// Matches `"DeKalb County"` records against a `"DeKalb"` boundary and
    /// `"DeKalb"` records against a `"DeKalb County"` boundary.
    #[default]
    StripCountySuffix,
}

impl MatchStrategy {
    /// Candidate keys to try, in order
    pub fn candidates(&self, key: &NormalizedKey) -> Vec<NormalizedKey> {
        let mut out = vec![key.clone()];
        if *self == MatchStrategy::StripCountySuffix {
            if let Some(alternate) = key.without_county_suffix().or_else(|| key.with_county_suffix()) {
                out.push(alternate);
            }
        }
        out
    }
}

impl std::str::FromStr for MatchStrategy {
    type Err = crate::MapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "exact" => Ok(MatchStrategy::Exact),
            "strip_county_suffix" | "strip-county-suffix" | "suffix" => Ok(MatchStrategy::StripCountySuffix),
            other => Err(crate::MapError::Configuration {
                message: format!("unknown match strategy '{}'", other),
                suggestion: Some("Use 'exact' or 'strip_county_suffix'".to_string()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_basic() {
        assert_eq!(normalize(Some("DeKalb")).as_str(), "DEKALB");
        assert_eq!(normalize(Some("  dekalb ")).as_str(), "DEKALB");
        assert_eq!(normalize(Some("DeKalb County")).as_str(), "DEKALB COUNTY");
        assert_eq!(normalize(Some("St. Mary's")).as_str(), "ST MARYS");
        assert_eq!(normalize(Some("Ben\tHill")).as_str(), "BEN HILL");
    }

    #[test]
    fn test_normalize_empty_inputs() {
        assert!(normalize(None).is_empty());
        assert!(normalize(Some("")).is_empty());
        assert!(normalize(Some("   ")).is_empty());
        assert!(normalize(Some("123 - 456")).is_empty());
    }

    #[test]
    fn test_normalize_collapses_whitespace_left_by_stripping() {
        // the digits vanish, the two surrounding spaces become one
        assert_eq!(normalize(Some("Jeff 2 Davis")).as_str(), "JEFF DAVIS");
        assert_eq!(normalize(Some("Jeff   Davis")).as_str(), "JEFF DAVIS");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let samples = [
            "DeKalb", " fulton county ", "Ben Hill", "O'Brien", "Jeff\u{a0}Davis",
            "McDuffie,", "", "  ", "Chattahoochee-Columbus", "ÉVANS", "x y  z",
        ];
        for s in samples {
            let once = normalize(Some(s));
            let twice = normalize(Some(once.as_str()));
            assert_eq!(once, twice, "not idempotent for {s:?}");
            assert!(once.as_str().chars().all(|c| (c.is_alphabetic() && !c.is_lowercase()) || c == ' '));
            assert!(!once.as_str().contains("  "));
            assert_eq!(once.as_str().trim(), once.as_str());
        }
    }

    #[test]
    fn test_county_suffix() {
        let key = normalize(Some("DeKalb County"));
        assert_eq!(key.without_county_suffix().unwrap().as_str(), "DEKALB");
        assert!(normalize(Some("County")).without_county_suffix().is_none());
        assert!(normalize(Some("Fulton")).without_county_suffix().is_none());

        assert_eq!(normalize(Some("DeKalb")).with_county_suffix().unwrap().as_str(), "DEKALB COUNTY");
        assert!(key.with_county_suffix().is_none());
        assert!(normalize(Some("County")).with_county_suffix().is_none());
        assert!(normalize(None).with_county_suffix().is_none());
    }

    #[test]
    fn test_normalize_keeps_unicode_letters() {
        assert_eq!(normalize(Some("Évans")).as_str(), "ÉVANS");
        assert_eq!(normalize(Some("  évans county.")).as_str(), "ÉVANS COUNTY");
        assert_ne!(normalize(Some("Évans")), normalize(Some("Vans")));
    }

    #[test]
    fn test_match_strategy_candidates() {
        let key = normalize(Some("Fulton County"));
        assert_eq!(MatchStrategy::Exact.candidates(&key).len(), 1);
        let candidates = MatchStrategy::StripCountySuffix.candidates(&key);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[1].as_str(), "FULTON");
        let bare = MatchStrategy::StripCountySuffix.candidates(&normalize(Some("Fulton")));
        assert_eq!(bare[1].as_str(), "FULTON COUNTY");
        assert_eq!(MatchStrategy::Exact.candidates(&normalize(Some("Fulton"))).len(), 1);
        assert_eq!("exact".parse::<MatchStrategy>().unwrap(), MatchStrategy::Exact);
        assert!("fuzzy".parse::<MatchStrategy>().is_err());
    }
}
