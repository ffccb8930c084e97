/*!
 * Error handling for the county provider map pipeline
 *
 * Provides detailed error types with context, suggestions, and a split
 * between row-local problems (recoverable) and pipeline-fatal ones.
 */

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use serde::{Serialize, Deserialize};

/// Library result type
pub type Result<T> = std::result::Result<T, MapError>;

/// Error types with context and suggestions
#[derive(Error, Debug)]
pub enum MapError {
    /// File I/O errors with context
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
        context: ErrorContext,
    },

    /// CSV parsing errors with location information
    #[error("CSV parsing error at line {line:?}: {message}")]
    CsvParse {
        message: String,
        line: Option<usize>,
        column: Option<String>,
        context: ErrorContext,
    },

    /// GeoJSON parsing errors
    #[error("GeoJSON parsing error: {message}")]
    GeoJsonParse {
        message: String,
        feature_index: Option<usize>,
        context: ErrorContext,
    },

    /// Required column missing from a CSV header
    #[error("Schema mismatch: {message}")]
    SchemaMismatch {
        message: String,
        missing_column: Option<String>,
        found_columns: Vec<String>,
    },

    /// File not found with suggestions
    #[error("File not found: {path}")]
    FileNotFound {
        path: PathBuf,
        suggestion: String,
    },

    /// Two boundary features normalize to the same key with different identifiers
    #[error("Index collision on '{key}': '{existing_name}' ({existing}) vs '{incoming_name}' ({incoming})")]
    IndexCollision {
        key: String,
        existing: String,
        existing_name: String,
        incoming: String,
        incoming_name: String,
    },

    /// Two differently named boundary features carry the same county identifier
    #[error("Duplicate county code {identifier}: '{existing_name}' vs '{incoming_name}'")]
    DuplicateCountyCode {
        identifier: String,
        existing_name: String,
        incoming_name: String,
    },

    /// A rate table contains the same county twice under `DuplicatePolicy::Error`
    #[error("Duplicate rate row for county {identifier} in table '{table}'")]
    DuplicateRateKey {
        table: String,
        identifier: String,
        row: usize,
    },

    /// County code that cannot form a county identifier
    #[error("Invalid county code '{code}': {reason}")]
    InvalidCountyCode {
        code: String,
        reason: String,
    },

    /// A required field is absent or has the wrong type
    #[error("Malformed input: {message}")]
    MalformedInput {
        message: String,
        field: Option<String>,
        value: Option<String>,
        context: ErrorContext,
    },

    /// A source failed to load; terminal for the session
    #[error("Failed to load {source_name}: {message}")]
    LoadFailure {
        source_name: String,
        message: String,
    },

    /// Operation not valid in the current pipeline state
    #[error("Pipeline is {state}, expected {expected}")]
    InvalidState {
        state: String,
        expected: String,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        suggestion: Option<String>,
    },

    /// Export errors
    #[error("Export error: {message}")]
    Export {
        message: String,
        format: ExportFormat,
        suggestion: Option<String>,
    },

    /// Generic errors with custom message
    #[error("{message}")]
    Custom {
        message: String,
        suggestion: Option<String>,
    },
}

/// Error context providing additional information
#[derive(Debug, Default, Clone)]
pub struct ErrorContext {
    pub file_path: Option<PathBuf>,
    pub line_number: Option<usize>,
    pub column_name: Option<String>,
    pub county_name: Option<String>,
}

/// Export format for error context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
    GeoJson,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Json => write!(f, "JSON"),
            ExportFormat::Csv => write!(f, "CSV"),
            ExportFormat::GeoJson => write!(f, "GeoJSON"),
        }
    }
}

impl MapError {
    /// Create a file not found error with helpful suggestion
    pub fn file_not_found_with_suggestion(path: PathBuf) -> Self {
        let lossy = path.to_string_lossy().to_lowercase();
        let suggestion = if lossy.ends_with(".geojson") || lossy.ends_with(".json") {
            format!(
                "Check if the boundary file exists at '{}'. County boundaries are expected as a GeoJSON \
                FeatureCollection with a county name and a 3-digit county code property.",
                path.display()
            )
        } else if lossy.contains("centroid") {
            format!(
                "Check if the centroid file exists at '{}'. It needs 'County', 'Latitude' and 'Longitude' columns.",
                path.display()
            )
        } else {
            format!(
                "Check if the file exists at '{}'. Make sure the path is correct and you have read permissions.",
                path.display()
            )
        };

        Self::FileNotFound { path, suggestion }
    }

    /// Create an invalid county code error with the validation detail
    pub fn invalid_county_code(code: &str, width: usize) -> Self {
        let reason = if code.trim().is_empty() {
            "county code cannot be empty".to_string()
        } else if !code.trim().chars().all(|c| c.is_ascii_digit()) {
            "county code must contain only digits".to_string()
        } else {
            format!("county code is longer than {} digits", width)
        };

        Self::InvalidCountyCode {
            code: code.to_string(),
            reason,
        }
    }

    /// Create a schema mismatch error for a missing column
    pub fn missing_column(column: &str, found: &[String]) -> Self {
        Self::SchemaMismatch {
            message: format!("required column '{}' not found", column),
            missing_column: Some(column.to_string()),
            found_columns: found.to_vec(),
        }
    }

    /// Create a load failure for a named source
    pub fn load_failure(source_name: &str, err: &MapError) -> Self {
        Self::LoadFailure {
            source_name: source_name.to_string(),
            message: err.to_string(),
        }
    }

    /// Whether this error stops the pipeline (as opposed to a skippable row)
    pub fn is_pipeline_fatal(&self) -> bool {
        !matches!(self, Self::MalformedInput { .. } | Self::CsvParse { .. })
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            Self::FileNotFound { suggestion, .. } => {
                format!("{}\n\nSuggestion: {}", self, suggestion)
            }
            Self::IndexCollision { .. } => {
                format!(
                    "{}\n\nSuggestion: two boundary features share a normalized name; \
                    fix the boundary file so every county name is distinct",
                    self
                )
            }
            Self::DuplicateCountyCode { .. } => {
                format!(
                    "{}\n\nSuggestion: every boundary feature needs its own county code; \
                    check the code property of both features",
                    self
                )
            }
            Self::SchemaMismatch { found_columns, .. } => {
                format!("{}\n\nColumns found: {}", self, found_columns.join(", "))
            }
            Self::Configuration { suggestion: Some(sug), .. }
            | Self::Export { suggestion: Some(sug), .. }
            | Self::Custom { suggestion: Some(sug), .. } => {
                format!("{}\n\nSuggestion: {}", self, sug)
            }
            _ => self.to_string(),
        }
    }
}

// Convenience conversions
impl From<std::io::Error> for MapError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: err,
            context: ErrorContext::default(),
        }
    }
}

impl From<csv::Error> for MapError {
    fn from(err: csv::Error) -> Self {
        let line = err.position().map(|pos| pos.line() as usize);
        let message = err.to_string();

        match err.into_kind() {
            csv::ErrorKind::Io(source) => source.into(),
            _ => Self::CsvParse {
                message,
                line,
                column: None,
                context: ErrorContext::default(),
            },
        }
    }
}

impl From<geojson::Error> for MapError {
    fn from(err: geojson::Error) -> Self {
        Self::GeoJsonParse {
            message: err.to_string(),
            feature_index: None,
            context: ErrorContext::default(),
        }
    }
}

impl From<serde_json::Error> for MapError {
    fn from(err: serde_json::Error) -> Self {
        MapError::Export {
            message: err.to_string(),
            format: ExportFormat::Json,
            suggestion: Some("Check if the data is serializable to JSON.".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_county_code_reasons() {
        match MapError::invalid_county_code("", 3) {
            MapError::InvalidCountyCode { reason, .. } => assert!(reason.contains("empty")),
            other => panic!("unexpected {other:?}"),
        }
        match MapError::invalid_county_code("08A", 3) {
            MapError::InvalidCountyCode { reason, .. } => assert!(reason.contains("digits")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_row_errors_are_not_fatal() {
        let malformed = MapError::MalformedInput {
            message: "bad".to_string(),
            field: None,
            value: None,
            context: ErrorContext::default(),
        };
        assert!(!malformed.is_pipeline_fatal());

        let load = MapError::LoadFailure {
            source_name: "boundaries".to_string(),
            message: "gone".to_string(),
        };
        assert!(load.is_pipeline_fatal());
    }
}
