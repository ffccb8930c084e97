/*!
 * File reader for boundary, provider, rate and centroid data
 *
 * Turns GeoJSON and CSV files into the record types the join pipeline
 * consumes. Row-level problems are skipped (and counted) when
 * `skip_invalid_records` is set; otherwise the first one aborts the load.
 */

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::Instant;
use csv::{ReaderBuilder, StringRecord};
use geojson::GeoJson;
use serde_json::Value;

#[cfg(feature = "progress")]
use indicatif::{ProgressBar, ProgressStyle};

use crate::{
    Result, MapError, ErrorContext,
    config::MapConfig,
    data_types::*,
    schema::*,
};

/// Reader for the map's input files
#[derive(Debug, Clone)]
pub struct MapReader {
    state_prefix: String,
    code_width: usize,
    name_property: String,
    code_property: String,
    county_column: String,
    type_column: String,
    rate_county_column: String,
    /// Whether to skip invalid records (true) or fail on first error (false)
    skip_invalid_records: bool,
    /// Whether to show a progress bar on provider loads
    #[cfg(feature = "progress")]
    show_progress_bar: bool,
}

impl Default for MapReader {
    fn default() -> Self {
        Self::from_config(&MapConfig::default())
    }
}

impl MapReader {
    /// Create a reader with default column names
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a reader using the column names and policies of a config
    pub fn from_config(config: &MapConfig) -> Self {
        Self {
            state_prefix: config.state_prefix.clone(),
            code_width: config.county_code_width,
            name_property: config.boundary_name_property.clone(),
            code_property: config.boundary_code_property.clone(),
            county_column: config.provider_county_column.clone(),
            type_column: config.provider_type_column.clone(),
            rate_county_column: config.rate_county_column.clone(),
            skip_invalid_records: config.skip_invalid_records,
            #[cfg(feature = "progress")]
            show_progress_bar: config.enable_progress_bar,
        }
    }

    /// Enable or disable skipping invalid records
    pub fn with_skip_invalid_records(mut self, skip: bool) -> Self {
        self.skip_invalid_records = skip;
        self
    }

    #[cfg(feature = "progress")]
    /// Enable or disable the progress bar
    pub fn with_progress_bar(mut self, show: bool) -> Self {
        self.show_progress_bar = show;
        self
    }

    fn open(path: &Path) -> Result<File> {
        if !path.exists() {
            return Err(MapError::file_not_found_with_suggestion(path.to_path_buf()));
        }
        Ok(File::open(path)?)
    }

    /// Either skip a bad row (logging the first few) or fail with it
    ///
    /// I/O failures are never skipped.
    fn handle_invalid(&self, error: MapError, invalid_count: &mut usize) -> Result<()> {
        *invalid_count += 1;
        if !self.skip_invalid_records || error.is_pipeline_fatal() {
            return Err(error);
        }
        if *invalid_count <= 10 {
            tracing::warn!(error = %error, "skipping invalid record");
        }
        Ok(())
    }

    // ---- boundaries ----

    /// Load county boundaries from a GeoJSON FeatureCollection file
    pub fn load_boundaries<P: AsRef<Path>>(&self, path: P) -> Result<Vec<BoundaryFeature>> {
        let path = path.as_ref();
        let file = Self::open(path)?;
        let start_time = Instant::now();

        let geojson = GeoJson::from_reader(BufReader::new(file)).map_err(|e| MapError::GeoJsonParse {
            message: e.to_string(),
            feature_index: None,
            context: ErrorContext {
                file_path: Some(path.to_path_buf()),
                ..Default::default()
            },
        })?;
        let features = self.parse_boundaries(geojson)?;

        tracing::info!(
            features = features.len(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            path = %path.display(),
            "loaded county boundaries"
        );
        Ok(features)
    }

    /// Parse boundaries from GeoJSON text
    pub fn boundaries_from_str(&self, text: &str) -> Result<Vec<BoundaryFeature>> {
        let geojson: GeoJson = text.parse()?;
        self.parse_boundaries(geojson)
    }

    /// Extract boundary features from a parsed GeoJSON document
    pub fn parse_boundaries(&self, geojson: GeoJson) -> Result<Vec<BoundaryFeature>> {
        let collection = match geojson {
            GeoJson::FeatureCollection(collection) => collection,
            GeoJson::Feature(feature) => geojson::FeatureCollection {
                bbox: None,
                features: vec![feature],
                foreign_members: None,
            },
            GeoJson::Geometry(_) => {
                return Err(MapError::GeoJsonParse {
                    message: "expected a FeatureCollection, found a bare geometry".to_string(),
                    feature_index: None,
                    context: ErrorContext::default(),
                })
            }
        };

        let mut features = Vec::with_capacity(collection.features.len());
        let mut invalid_count = 0;

        for (idx, feature) in collection.features.into_iter().enumerate() {
            let properties = feature.properties.unwrap_or_default();

            let county_name_raw = properties
                .get(&self.name_property)
                .and_then(Value::as_str)
                .map(str::to_string);

            let Some(code) = properties.get(&self.code_property).and_then(|v| self.short_code(v)) else {
                let error = MapError::MalformedInput {
                    message: format!("feature {} has no usable '{}' property", idx, self.code_property),
                    field: Some(self.code_property.clone()),
                    value: properties.get(&self.code_property).map(|v| v.to_string()),
                    context: ErrorContext {
                        county_name: county_name_raw.clone(),
                        ..Default::default()
                    },
                };
                self.handle_invalid(error, &mut invalid_count)?;
                continue;
            };

            features.push(BoundaryFeature {
                county_name_raw,
                county_code: code,
                geometry: feature.geometry,
                properties,
            });
        }

        if invalid_count > 0 {
            tracing::warn!(skipped = invalid_count, "skipped boundary features without a county code");
        }
        Ok(features)
    }

    /// County code property as a short code; accepts numbers and full identifiers
    fn short_code(&self, value: &Value) -> Option<String> {
        let code = match value {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.as_u64()?.to_string(),
            _ => return None,
        };
        if code.is_empty() {
            return None;
        }
        if code.len() == self.state_prefix.len() + self.code_width {
            if let Some(short) = code.strip_prefix(self.state_prefix.as_str()) {
                return Some(short.to_string());
            }
        }
        Some(code)
    }

    // ---- providers ----

    /// Load provider records from a CSV file
    pub fn load_providers<P: AsRef<Path>>(&self, path: P) -> Result<Vec<ProviderRecord>> {
        let path = path.as_ref();
        let file = Self::open(path)?;
        let file_size = file.metadata()?.len();
        let start_time = Instant::now();

        #[cfg(feature = "progress")]
        let progress_bar = if self.show_progress_bar {
            let pb = ProgressBar::new(file_size);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            Some(pb)
        } else {
            None
        };

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);
        let headers: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();
        let columns = ProviderSchema::validate_headers(&headers, &self.county_column, &self.type_column)?;

        let mut records = Vec::new();
        let mut invalid_count = 0;

        let mut rows = reader.records();
        let mut idx = 0usize;
        while let Some(result) = rows.next() {
            match result {
                Ok(row) => records.push(parse_provider_row(&row, &headers, &columns)),
                Err(e) => {
                    let error = if e.is_io_error() {
                        MapError::from(e)
                    } else {
                        MapError::CsvParse {
                            message: e.to_string(),
                            line: Some(idx + 2),
                            column: None,
                            context: ErrorContext {
                                file_path: Some(path.to_path_buf()),
                                line_number: Some(idx + 2),
                                ..Default::default()
                            },
                        }
                    };
                    self.handle_invalid(error, &mut invalid_count)?;
                }
            }

            #[cfg(feature = "progress")]
            if let Some(ref pb) = progress_bar {
                if idx % 1000 == 0 {
                    pb.set_position(rows.reader().position().byte().min(file_size));
                }
            }
            idx += 1;
        }

        #[cfg(feature = "progress")]
        if let Some(pb) = progress_bar {
            pb.finish_and_clear();
        }

        let elapsed = start_time.elapsed();
        tracing::info!(
            records = records.len(),
            skipped = invalid_count,
            bytes = file_size,
            elapsed_ms = elapsed.as_millis() as u64,
            path = %path.display(),
            "loaded provider records"
        );
        Ok(records)
    }

    /// Read provider records from any CSV source
    pub fn read_providers<R: Read>(&self, source: R) -> Result<Vec<ProviderRecord>> {
        let mut reader = ReaderBuilder::new().has_headers(true).flexible(true).from_reader(source);
        let headers: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();
        let columns = ProviderSchema::validate_headers(&headers, &self.county_column, &self.type_column)?;

        let mut records = Vec::new();
        let mut invalid_count = 0;
        for result in reader.records() {
            match result {
                Ok(row) => records.push(parse_provider_row(&row, &headers, &columns)),
                Err(e) => self.handle_invalid(e.into(), &mut invalid_count)?,
            }
        }
        Ok(records)
    }

    // ---- rate tables ----

    /// Load an auxiliary rate table from a CSV file
    pub fn load_rates<P: AsRef<Path>>(&self, path: P) -> Result<Vec<RateRow>> {
        let path = path.as_ref();
        let file = Self::open(path)?;
        let rows = self.read_rates(file).map_err(|e| attach_path(e, path))?;
        tracing::info!(rows = rows.len(), path = %path.display(), "loaded rate table");
        Ok(rows)
    }

    /// Read rate rows from any CSV source
    pub fn read_rates<R: Read>(&self, source: R) -> Result<Vec<RateRow>> {
        let mut reader = ReaderBuilder::new().has_headers(true).flexible(true).from_reader(source);
        let headers: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();
        let columns = RateSchema::validate_headers(&headers, &self.rate_county_column)?;

        let mut rows = Vec::new();
        let mut invalid_count = 0;
        for result in reader.records() {
            match result {
                Ok(row) => rows.push(parse_rate_row(&row, &columns)),
                Err(e) => self.handle_invalid(e.into(), &mut invalid_count)?,
            }
        }
        Ok(rows)
    }

    // ---- centroids ----

    /// Load county centroids (`County,Latitude,Longitude`)
    pub fn load_centroids<P: AsRef<Path>>(&self, path: P) -> Result<Vec<CentroidRow>> {
        let path = path.as_ref();
        let file = Self::open(path)?;
        let rows = self.read_centroids(file).map_err(|e| attach_path(e, path))?;
        tracing::info!(rows = rows.len(), path = %path.display(), "loaded county centroids");
        Ok(rows)
    }

    /// Read centroid rows from any CSV source
    pub fn read_centroids<R: Read>(&self, source: R) -> Result<Vec<CentroidRow>> {
        let mut reader = ReaderBuilder::new().has_headers(true).flexible(true).from_reader(source);
        let headers: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();
        let columns = CentroidSchema::validate_headers(&headers)?;

        let mut rows = Vec::new();
        let mut invalid_count = 0;
        for (idx, result) in reader.records().enumerate() {
            let row = match result {
                Ok(row) => row,
                Err(e) => {
                    self.handle_invalid(e.into(), &mut invalid_count)?;
                    continue;
                }
            };
            let coordinates = parse_f64(row.get(columns.latitude))
                .zip(parse_f64(row.get(columns.longitude)))
                .and_then(|(lat, lon)| Coordinates::new(lat, lon));
            match coordinates {
                Some(coordinates) => rows.push(CentroidRow {
                    county_name_raw: non_empty(row.get(columns.county)),
                    coordinates,
                }),
                None => {
                    let error = MapError::MalformedInput {
                        message: format!("centroid row {} has no valid coordinates", idx + 2),
                        field: Some("Latitude/Longitude".to_string()),
                        value: None,
                        context: ErrorContext {
                            line_number: Some(idx + 2),
                            county_name: non_empty(row.get(columns.county)),
                            ..Default::default()
                        },
                    };
                    self.handle_invalid(error, &mut invalid_count)?;
                }
            }
        }
        Ok(rows)
    }
}

fn attach_path(error: MapError, path: &Path) -> MapError {
    match error {
        MapError::CsvParse { message, line, column, mut context } => {
            context.file_path = Some(path.to_path_buf());
            MapError::CsvParse { message, line, column, context }
        }
        MapError::MalformedInput { message, field, value, mut context } => {
            context.file_path = Some(path.to_path_buf());
            MapError::MalformedInput { message, field, value, context }
        }
        other => other,
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn parse_f64(value: Option<&str>) -> Option<f64> {
    value?.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_provider_row(row: &StringRecord, headers: &[String], columns: &ProviderColumns) -> ProviderRecord {
    let field = |idx: Option<usize>| idx.and_then(|i| non_empty(row.get(i)));
    let typed = columns.typed_positions();

    let extra = row
        .iter()
        .enumerate()
        .filter(|(i, value)| !typed.contains(i) && !value.is_empty())
        .filter_map(|(i, value)| headers.get(i).map(|h| (h.clone(), value.to_string())))
        .collect();

    ProviderRecord {
        county_name_raw: field(Some(columns.county)),
        provider_type_code: field(Some(columns.provider_type)),
        payload: ProviderPayload {
            npi: field(columns.npi),
            first_name: field(columns.first_name),
            last_name: field(columns.last_name),
            address: field(columns.address),
            address_usps_standardized: field(columns.address_usps_standardized),
            latitude: columns.latitude.and_then(|i| parse_f64(row.get(i))),
            longitude: columns.longitude.and_then(|i| parse_f64(row.get(i))),
            extra,
        },
    }
}

fn parse_rate_row(row: &StringRecord, columns: &RateColumns) -> RateRow {
    let values = columns
        .value_columns
        .iter()
        .filter_map(|(i, name)| {
            let raw = row.get(*i)?;
            match parse_f64(Some(raw)) {
                Some(v) => Some((name.clone(), v)),
                None => {
                    if !raw.trim().is_empty() {
                        tracing::debug!(column = %name, value = raw, "non-numeric rate value ignored");
                    }
                    None
                }
            }
        })
        .collect();

    RateRow {
        county_name_raw: non_empty(row.get(columns.county)),
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARIES: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"NAME": "DeKalb", "COUNTYFP": "089"},
             "geometry": {"type": "Point", "coordinates": [-84.2, 33.8]}},
            {"type": "Feature", "properties": {"NAME": "Fulton", "COUNTYFP": 121}, "geometry": null},
            {"type": "Feature", "properties": {"NAME": "Cobb", "COUNTYFP": "13067"}, "geometry": null},
            {"type": "Feature", "properties": {"NAME": "Mystery"}, "geometry": null}
        ]
    }"#;

    fn reader() -> MapReader {
        #[cfg(feature = "progress")]
        return MapReader::new().with_progress_bar(false);
        #[cfg(not(feature = "progress"))]
        MapReader::new()
    }

    #[test]
    fn test_boundaries_strict_fails_on_missing_code() {
        let err = reader().boundaries_from_str(BOUNDARIES).unwrap_err();
        assert!(matches!(err, MapError::MalformedInput { .. }));
    }

    #[test]
    fn test_boundaries_skip_invalid() {
        let features = reader()
            .with_skip_invalid_records(true)
            .boundaries_from_str(BOUNDARIES)
            .unwrap();
        assert_eq!(features.len(), 3);
        assert_eq!(features[0].county_code, "089");
        assert!(features[0].geometry.is_some());
        assert_eq!(features[1].county_code, "121");
        assert_eq!(features[2].county_code, "067");
        assert_eq!(features[2].county_name_raw.as_deref(), Some("Cobb"));
    }

    #[test]
    fn test_read_providers() {
        let csv = "NPI,Provider_First_Name,Provider_Last_Name,county,provider_type,lat,lon,specialty\n\
                   1234567893,Ada,Lovelace,DeKalb,NP,33.77,-84.29,Family\n\
                   1234567894,,,  ,MD,not-a-number,,\n";
        let records = reader().read_providers(csv.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].county_name_raw.as_deref(), Some("DeKalb"));
        assert_eq!(records[0].provider_type_code.as_deref(), Some("NP"));
        assert_eq!(records[0].display_name(), "Ada Lovelace");
        assert!(records[0].coordinates().is_some());
        assert_eq!(records[0].payload.extra.get("specialty").map(String::as_str), Some("Family"));
        assert_eq!(records[1].county_name_raw, None);
        assert!(records[1].coordinates().is_none());
    }

    #[test]
    fn test_read_providers_missing_column() {
        let csv = "NPI,county\n1,Fulton\n";
        assert!(matches!(
            reader().read_providers(csv.as_bytes()),
            Err(MapError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_read_rates() {
        let csv = "county,fp_rate,np_ratio\nFulton,41.2,n/a\nCobb,,0.8\n";
        let rows = reader().read_rates(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].values.get("fp_rate"), Some(&41.2));
        assert!(!rows[0].values.contains_key("np_ratio"));
        assert_eq!(rows[1].values.len(), 1);
    }

    #[test]
    fn test_read_centroids() {
        let csv = "County,Latitude,Longitude\nFulton,33.79,-84.47\nCobb,x,y\n";
        assert!(reader().read_centroids(csv.as_bytes()).is_err());
        let rows = reader()
            .with_skip_invalid_records(true)
            .read_centroids(csv.as_bytes())
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].coordinates.longitude, -84.47);
    }

    struct BrokenSource {
        head: &'static [u8],
        sent: bool,
    }

    impl std::io::Read for BrokenSource {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.sent {
                return Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "stream dropped"));
            }
            self.sent = true;
            buf[..self.head.len()].copy_from_slice(self.head);
            Ok(self.head.len())
        }
    }

    #[test]
    fn test_io_failure_is_not_skipped() {
        let source = BrokenSource { head: b"county,provider_type\nFulton,NP\n", sent: false };
        let err = reader()
            .with_skip_invalid_records(true)
            .read_providers(source)
            .unwrap_err();
        assert!(matches!(err, MapError::Io { .. }));

        // a row that is not UTF-8 is still skippable
        let csv: &[u8] = b"county,provider_type\nFulton,NP\n\xff\xfe,MD\n";
        let records = reader()
            .with_skip_invalid_records(true)
            .read_providers(csv)
            .unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_missing_file() {
        let err = reader().load_providers("/definitely/not/here.csv").unwrap_err();
        assert!(matches!(err, MapError::FileNotFound { .. }));
    }
}
