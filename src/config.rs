/*!
 * Configuration support
 *
 * Provides runtime configuration for the key space, column names and the
 * join/filter policies.
 */

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

use crate::aggregate::DuplicatePolicy;
use crate::constants::*;
use crate::filter::{CountyFilterMode, JoinOptions};
use crate::legend::BandThresholds;
use crate::normalize::MatchStrategy;

/// Global configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapConfig {
    /// State FIPS prefix prepended to every county code
    #[serde(default = "default_state_prefix")]
    pub state_prefix: String,

    /// Width the county code is zero-padded to
    #[serde(default = "default_code_width")]
    pub county_code_width: usize,

    /// GeoJSON property holding the county display name
    #[serde(default = "default_boundary_name_property")]
    pub boundary_name_property: String,

    /// GeoJSON property holding the short county code
    #[serde(default = "default_boundary_code_property")]
    pub boundary_code_property: String,

    /// Provider CSV column holding the county name
    #[serde(default = "default_provider_county_column")]
    pub provider_county_column: String,

    /// Provider CSV column holding the provider type code
    #[serde(default = "default_provider_type_column")]
    pub provider_type_column: String,

    /// Rate CSV column holding the county name
    #[serde(default = "default_rate_county_column")]
    pub rate_county_column: String,

    #[serde(default)]
    pub match_strategy: MatchStrategy,

    #[serde(default)]
    pub county_filter_mode: CountyFilterMode,

    #[serde(default)]
    pub duplicate_rate_policy: DuplicatePolicy,

    /// Rate tables that must be loaded before the first aggregation
    #[serde(default)]
    pub required_rate_tables: Vec<String>,

    /// Whether to skip invalid rows during parsing
    #[serde(default)]
    pub skip_invalid_records: bool,

    /// Whether to show progress bars during long loads
    #[serde(default = "default_enable_progress_bar")]
    pub enable_progress_bar: bool,

    /// Number of choropleth classes in the legend
    #[serde(default = "default_legend_classes")]
    pub legend_classes: usize,

    #[serde(default)]
    pub legend_thresholds: BandThresholds,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            state_prefix: default_state_prefix(),
            county_code_width: default_code_width(),
            boundary_name_property: default_boundary_name_property(),
            boundary_code_property: default_boundary_code_property(),
            provider_county_column: default_provider_county_column(),
            provider_type_column: default_provider_type_column(),
            rate_county_column: default_rate_county_column(),
            match_strategy: MatchStrategy::default(),
            county_filter_mode: CountyFilterMode::default(),
            duplicate_rate_policy: DuplicatePolicy::default(),
            required_rate_tables: Vec::new(),
            skip_invalid_records: false,
            enable_progress_bar: default_enable_progress_bar(),
            legend_classes: default_legend_classes(),
            legend_thresholds: BandThresholds::default(),
        }
    }
}

// Default value functions for serde
fn default_state_prefix() -> String {
    GEORGIA_STATE_FIPS.to_string()
}

fn default_code_width() -> usize {
    COUNTY_CODE_WIDTH
}

fn default_boundary_name_property() -> String {
    DEFAULT_BOUNDARY_NAME_PROPERTY.to_string()
}

fn default_boundary_code_property() -> String {
    DEFAULT_BOUNDARY_CODE_PROPERTY.to_string()
}

fn default_provider_county_column() -> String {
    DEFAULT_PROVIDER_COUNTY_COLUMN.to_string()
}

fn default_provider_type_column() -> String {
    DEFAULT_PROVIDER_TYPE_COLUMN.to_string()
}

fn default_rate_county_column() -> String {
    DEFAULT_RATE_COUNTY_COLUMN.to_string()
}

fn default_enable_progress_bar() -> bool {
    true
}

fn default_legend_classes() -> usize {
    5
}

fn env_flag(val: &str) -> bool {
    matches!(val.to_lowercase().as_str(), "true" | "1" | "yes")
}

impl MapConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables on top of the defaults
    ///
    /// Supported environment variables:
    /// - `COUNTYMAP_STATE_PREFIX`: state FIPS prefix, e.g. "13"
    /// - `COUNTYMAP_CODE_WIDTH`: number
    /// - `COUNTYMAP_NAME_PROPERTY` / `COUNTYMAP_CODE_PROPERTY`: GeoJSON property names
    /// - `COUNTYMAP_COUNTY_COLUMN` / `COUNTYMAP_TYPE_COLUMN`: provider CSV columns
    /// - `COUNTYMAP_MATCH`: "exact" or "strip_county_suffix"
    /// - `COUNTYMAP_COUNTY_FILTER`: "geometry_only" or "geometry_and_records"
    /// - `COUNTYMAP_DUPLICATES`: "overwrite", "keep_first" or "error"
    /// - `COUNTYMAP_SKIP_INVALID`: "true" or "false"
    /// - `COUNTYMAP_PROGRESS_BAR`: "true" or "false"
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("COUNTYMAP_STATE_PREFIX") {
            config.state_prefix = val;
        }

        if let Ok(val) = std::env::var("COUNTYMAP_CODE_WIDTH") {
            if let Ok(width) = val.parse() {
                config.county_code_width = width;
            }
        }

        if let Ok(val) = std::env::var("COUNTYMAP_NAME_PROPERTY") {
            config.boundary_name_property = val;
        }

        if let Ok(val) = std::env::var("COUNTYMAP_CODE_PROPERTY") {
            config.boundary_code_property = val;
        }

        if let Ok(val) = std::env::var("COUNTYMAP_COUNTY_COLUMN") {
            config.provider_county_column = val;
        }

        if let Ok(val) = std::env::var("COUNTYMAP_TYPE_COLUMN") {
            config.provider_type_column = val;
        }

        if let Ok(val) = std::env::var("COUNTYMAP_MATCH") {
            if let Ok(strategy) = val.parse() {
                config.match_strategy = strategy;
            }
        }

        if let Ok(val) = std::env::var("COUNTYMAP_COUNTY_FILTER") {
            config.county_filter_mode = match val.to_lowercase().as_str() {
                "geometry_only" | "geometry" => CountyFilterMode::GeometryOnly,
                _ => CountyFilterMode::GeometryAndRecords,
            };
        }

        if let Ok(val) = std::env::var("COUNTYMAP_DUPLICATES") {
            if let Ok(policy) = val.parse() {
                config.duplicate_rate_policy = policy;
            }
        }

        if let Ok(val) = std::env::var("COUNTYMAP_SKIP_INVALID") {
            config.skip_invalid_records = env_flag(&val);
        }

        if let Ok(val) = std::env::var("COUNTYMAP_PROGRESS_BAR") {
            config.enable_progress_bar = env_flag(&val);
        }

        config
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| crate::MapError::Configuration {
                message: format!("Failed to parse config file: {}", e),
                suggestion: Some("Check that the file is valid TOML format".to_string()),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| crate::MapError::Configuration {
                message: format!("Failed to serialize config: {}", e),
                suggestion: None,
            })?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/countymap/config.toml` on Unix-like systems
    /// or `%APPDATA%\countymap\config.toml` on Windows
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "countymap")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load configuration from the default location, environment, or defaults
    ///
    /// Priority order:
    /// 1. Default config file (if exists)
    /// 2. Environment variables
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Some(config_path) = Self::default_config_path() {
            if config_path.exists() {
                match Self::from_file(&config_path) {
                    Ok(config) => return config,
                    Err(e) => tracing::warn!(path = %config_path.display(), error = %e, "ignoring unreadable config file"),
                }
            }
        }

        Self::from_env()
    }

    /// Strict joins: exact name matching and failing on duplicate rate rows
    pub fn strict() -> Self {
        Self {
            match_strategy: MatchStrategy::Exact,
            duplicate_rate_policy: DuplicatePolicy::Error,
            skip_invalid_records: false,
            ..Self::default()
        }
    }

    /// Geometry-only county filter and last-row-wins rate tables, as the first map release behaved
    pub fn legacy() -> Self {
        Self {
            county_filter_mode: CountyFilterMode::GeometryOnly,
            duplicate_rate_policy: DuplicatePolicy::Overwrite,
            skip_invalid_records: true,
            ..Self::default()
        }
    }

    /// Check internal consistency
    pub fn validate(&self) -> crate::Result<()> {
        if self.county_code_width == 0 {
            return Err(crate::MapError::Configuration {
                message: "county_code_width must be at least 1".to_string(),
                suggestion: Some("Georgia county codes are 3 digits wide".to_string()),
            });
        }
        if !self.state_prefix.chars().all(|c| c.is_ascii_digit()) {
            return Err(crate::MapError::Configuration {
                message: format!("state_prefix '{}' must be numeric", self.state_prefix),
                suggestion: Some("Use the 2-digit state FIPS code, e.g. \"13\"".to_string()),
            });
        }
        if self.legend_thresholds.low >= self.legend_thresholds.high {
            return Err(crate::MapError::Configuration {
                message: "legend_thresholds.low must be below legend_thresholds.high".to_string(),
                suggestion: None,
            });
        }
        Ok(())
    }

    /// Key-space settings for the join and filter passes
    pub fn join_options(&self) -> JoinOptions {
        JoinOptions {
            state_prefix: self.state_prefix.clone(),
            code_width: self.county_code_width,
            match_strategy: self.match_strategy,
            county_filter_mode: self.county_filter_mode,
        }
    }
}

// Global configuration support
use std::sync::RwLock;

lazy_static::lazy_static! {
    static ref GLOBAL_CONFIG: RwLock<Option<MapConfig>> = RwLock::new(None);
}

/// Set the global configuration
pub fn set_global_config(config: MapConfig) {
    if let Ok(mut guard) = GLOBAL_CONFIG.write() {
        *guard = Some(config);
    }
}

/// Get the global configuration (or load one if not set)
pub fn global_config() -> MapConfig {
    GLOBAL_CONFIG
        .read()
        .ok()
        .and_then(|guard| guard.as_ref().cloned())
        .unwrap_or_else(MapConfig::load)
}

/// Builder for customizing configuration
#[derive(Default)]
pub struct ConfigBuilder {
    config: MapConfig,
}

impl ConfigBuilder {
    /// Start building a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.state_prefix = prefix.into();
        self
    }

    pub fn county_code_width(mut self, width: usize) -> Self {
        self.config.county_code_width = width;
        self
    }

    /// Set the GeoJSON name and code property names
    pub fn boundary_properties<S: Into<String>>(mut self, name: S, code: S) -> Self {
        self.config.boundary_name_property = name.into();
        self.config.boundary_code_property = code.into();
        self
    }

    /// Set the provider CSV county and type columns
    pub fn provider_columns<S: Into<String>>(mut self, county: S, provider_type: S) -> Self {
        self.config.provider_county_column = county.into();
        self.config.provider_type_column = provider_type.into();
        self
    }

    pub fn rate_county_column<S: Into<String>>(mut self, column: S) -> Self {
        self.config.rate_county_column = column.into();
        self
    }

    pub fn match_strategy(mut self, strategy: MatchStrategy) -> Self {
        self.config.match_strategy = strategy;
        self
    }

    pub fn county_filter_mode(mut self, mode: CountyFilterMode) -> Self {
        self.config.county_filter_mode = mode;
        self
    }

    pub fn duplicate_rate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.config.duplicate_rate_policy = policy;
        self
    }

    /// Require a rate table before the first aggregation
    pub fn require_rate_table<S: Into<String>>(mut self, name: S) -> Self {
        self.config.required_rate_tables.push(name.into());
        self
    }

    pub fn skip_invalid_records(mut self, skip: bool) -> Self {
        self.config.skip_invalid_records = skip;
        self
    }

    pub fn progress_bar(mut self, enabled: bool) -> Self {
        self.config.enable_progress_bar = enabled;
        self
    }

    pub fn legend_thresholds(mut self, thresholds: BandThresholds) -> Self {
        self.config.legend_thresholds = thresholds;
        self
    }

    /// Build the configuration
    pub fn build(self) -> MapConfig {
        self.config
    }
}
