/*!
 * Export functionality for aggregated map data
 *
 * Writes the current view of a session as a per-county CSV or JSON table,
 * or as a GeoJSON FeatureCollection whose features carry the joined count,
 * rate fields and fill color as properties.
 */

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use geojson::{Feature, FeatureCollection, GeoJson};
use serde::Serialize;
use serde_json::Value;

use crate::{Result, MapError, ExportFormat};
use crate::aggregate::JoinDiagnostics;
use crate::data_types::CountyIdentifier;
use crate::dataset::MapDataset;
use crate::filter::FilterState;
use crate::legend::DensityBand;
use crate::session::MapSession;

/// Trait for implementing map exporters
pub trait MapExporter {
    /// Write the session's current view to `writer`
    fn write<W: Write>(&self, session: &MapSession, writer: W) -> Result<()>;

    /// Get the export format
    fn format(&self) -> ExportFormat;

    /// Export the session's current view to a file
    fn export(&self, session: &MapSession, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        self.write(session, BufWriter::new(file))?;
        tracing::info!(path = %path.display(), format = %self.format(), "export written");
        Ok(())
    }
}

/// One county in an exported table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountyRow {
    pub identifier: CountyIdentifier,
    pub name: String,
    pub provider_count: u64,
    pub rates: BTreeMap<String, f64>,
    /// Value of the selected metric, when the county has one
    pub metric_value: Option<f64>,
    pub fill_color: Option<String>,
}

/// Rows for every county visible under the current filter
pub fn county_rows(session: &MapSession) -> Result<Vec<CountyRow>> {
    let snapshot = session.snapshot()?;
    let options = session.options();
    let index = session.index();

    let mut rows = Vec::with_capacity(snapshot.features.len());
    for feature in &snapshot.features {
        let identifier = feature.identifier(&options.state_prefix, options.code_width)?;
        let name = index
            .and_then(|i| i.display_name(&identifier))
            .or(feature.county_name_raw.as_deref())
            .unwrap_or("")
            .to_string();
        rows.push(CountyRow {
            provider_count: snapshot.aggregation.table.count(&identifier),
            rates: snapshot
                .aggregation
                .table
                .rates
                .get(&identifier)
                .map(|r| r.values.clone())
                .unwrap_or_default(),
            metric_value: snapshot.values.get(&identifier).copied(),
            fill_color: snapshot.fill_color(&identifier).map(str::to_string),
            name,
            identifier,
        });
    }
    Ok(rows)
}

/// JSON exporter for the aggregate table
#[derive(Debug, Clone)]
pub struct JsonExporter {
    /// Whether to pretty-print the JSON
    pub pretty_print: bool,
    /// Whether to include the join diagnostics and filter
    pub include_diagnostics: bool,
}

impl Default for JsonExporter {
    fn default() -> Self {
        Self {
            pretty_print: true,
            include_diagnostics: true,
        }
    }
}

impl JsonExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set pretty printing
    pub fn with_pretty_print(mut self, pretty: bool) -> Self {
        self.pretty_print = pretty;
        self
    }

    pub fn with_diagnostics(mut self, include: bool) -> Self {
        self.include_diagnostics = include;
        self
    }
}

#[derive(Serialize)]
struct JsonDocument<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<&'a FilterState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnostics: Option<JoinDiagnostics>,
    counties: Vec<CountyRow>,
}

impl MapExporter for JsonExporter {
    fn write<W: Write>(&self, session: &MapSession, mut writer: W) -> Result<()> {
        let counties = county_rows(session)?;
        let diagnostics = session.aggregation().map(|a| a.diagnostics);
        let document = JsonDocument {
            filter: self.include_diagnostics.then(|| session.filter()),
            diagnostics: diagnostics.filter(|_| self.include_diagnostics),
            counties,
        };

        if self.pretty_print {
            serde_json::to_writer_pretty(&mut writer, &document)?;
        } else {
            serde_json::to_writer(&mut writer, &document)?;
        }
        writer.flush()?;
        Ok(())
    }

    fn format(&self) -> ExportFormat {
        ExportFormat::Json
    }
}

/// CSV exporter for the aggregate table
///
/// Columns: identifier, name, provider_count, then one column per rate field.
#[derive(Debug, Clone)]
pub struct CsvExporter {
    /// Whether to include headers
    pub include_headers: bool,
    /// Field delimiter
    pub delimiter: u8,
}

impl Default for CsvExporter {
    fn default() -> Self {
        Self {
            include_headers: true,
            delimiter: b',',
        }
    }
}

impl CsvExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the delimiter
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_headers(mut self, include: bool) -> Self {
        self.include_headers = include;
        self
    }
}

impl MapExporter for CsvExporter {
    fn write<W: Write>(&self, session: &MapSession, writer: W) -> Result<()> {
        let rows = county_rows(session)?;
        let rate_fields: BTreeSet<&String> = rows.iter().flat_map(|r| r.rates.keys()).collect();

        let mut csv_writer = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(false)
            .from_writer(writer);

        if self.include_headers {
            let mut header = vec!["identifier", "name", "provider_count"];
            header.extend(rate_fields.iter().map(|f| f.as_str()));
            csv_writer.write_record(&header)?;
        }

        for row in &rows {
            let mut record = vec![
                row.identifier.to_string(),
                row.name.clone(),
                row.provider_count.to_string(),
            ];
            record.extend(
                rate_fields
                    .iter()
                    .map(|f| row.rates.get(*f).map(|v| v.to_string()).unwrap_or_default()),
            );
            csv_writer.write_record(&record)?;
        }

        csv_writer.flush()?;
        Ok(())
    }

    fn format(&self) -> ExportFormat {
        ExportFormat::Csv
    }
}

/// GeoJSON exporter for the filtered boundary features
#[derive(Debug, Clone, Default)]
pub struct GeoJsonExporter {
    /// Drop the geometry and keep only properties
    pub strip_geometry: bool,
}

impl GeoJsonExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strip_geometry(mut self, strip: bool) -> Self {
        self.strip_geometry = strip;
        self
    }

    /// Build the enriched FeatureCollection
    pub fn collection(&self, session: &MapSession) -> Result<FeatureCollection> {
        let snapshot = session.snapshot()?;
        let options = session.options();
        let thresholds = session.thresholds();

        let mut features = Vec::with_capacity(snapshot.features.len());
        for boundary in &snapshot.features {
            let identifier = boundary.identifier(&options.state_prefix, options.code_width)?;
            let count = snapshot.aggregation.table.count(&identifier);
            let band = DensityBand::classify(count, thresholds);

            let mut properties = boundary.properties.clone();
            properties.insert("county_id".to_string(), Value::from(identifier.as_str()));
            properties.insert("provider_count".to_string(), Value::from(count));
            properties.insert("density_band".to_string(), serde_json::to_value(band)?);
            if let Some(rates) = snapshot.aggregation.table.rates.get(&identifier) {
                for (field, value) in &rates.values {
                    properties.insert(field.clone(), Value::from(*value));
                }
            }
            if let Some(value) = snapshot.values.get(&identifier) {
                properties.insert("metric_value".to_string(), Value::from(*value));
            }
            if let Some(color) = snapshot.fill_color(&identifier) {
                properties.insert("fill_color".to_string(), Value::from(color));
            }

            features.push(Feature {
                bbox: None,
                geometry: if self.strip_geometry { None } else { boundary.geometry.clone() },
                id: Some(geojson::feature::Id::String(identifier.to_string())),
                properties: Some(properties),
                foreign_members: None,
            });
        }

        Ok(FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        })
    }
}

impl MapExporter for GeoJsonExporter {
    fn write<W: Write>(&self, session: &MapSession, mut writer: W) -> Result<()> {
        let geojson = GeoJson::FeatureCollection(self.collection(session)?);
        serde_json::to_writer(&mut writer, &geojson)?;
        writer.flush()?;
        Ok(())
    }

    fn format(&self) -> ExportFormat {
        ExportFormat::GeoJson
    }
}

/// Export a session's current view in the given format
pub fn export_session<P: AsRef<Path>>(session: &MapSession, path: P, format: ExportFormat) -> Result<()> {
    let path = path.as_ref();
    match format {
        ExportFormat::Json => JsonExporter::default().export(session, path),
        ExportFormat::Csv => CsvExporter::default().export(session, path),
        ExportFormat::GeoJson => GeoJsonExporter::default().export(session, path),
    }
    .map_err(|e| match e {
        MapError::Io { message, .. } => MapError::Export {
            message: format!("{}: {}", path.display(), message),
            format,
            suggestion: Some("Check that the output directory exists and is writable".to_string()),
        },
        other => other,
    })
}

// Export convenience functions for MapDataset
impl MapDataset {
    /// Export the aggregate table to JSON
    pub fn export_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        export_session(self.session(), path, ExportFormat::Json)
    }

    /// Export the aggregate table to CSV
    pub fn export_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        export_session(self.session(), path, ExportFormat::Csv)
    }

    /// Export the filtered features with joined properties
    pub fn export_geojson<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        export_session(self.session(), path, ExportFormat::GeoJson)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::*;
    use crate::filter::Metric;

    fn ready_session() -> MapSession {
        let mut session = MapSession::default();
        let ticket = session.begin_load();
        session.boundaries_loaded(
            ticket,
            Ok(vec![BoundaryFeature::new("DeKalb", "089"), BoundaryFeature::new("Fulton", "121")]),
        );
        session.rates_loaded(ticket, "fp", Ok(vec![RateRow::new(Some("Fulton"), &[("fp_rate", 41.2)])]));
        session.providers_loaded(
            ticket,
            Ok(vec![
                ProviderRecord::new(Some("DeKalb"), Some("NP")),
                ProviderRecord::new(Some("dekalb county"), Some("NP")),
                ProviderRecord::new(Some("Fulton"), Some("MD")),
            ]),
        );
        session
    }

    #[test]
    fn test_csv_export() {
        let session = ready_session();
        let mut out = Vec::new();
        CsvExporter::new().write(&session, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "identifier,name,provider_count,fp_rate");
        assert_eq!(lines[1], "13089,DeKalb,2,");
        assert_eq!(lines[2], "13121,Fulton,1,41.2");
    }

    #[test]
    fn test_json_export() {
        let session = ready_session();
        let mut out = Vec::new();
        JsonExporter::new().with_pretty_print(false).write(&session, &mut out).unwrap();
        let value: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["diagnostics"]["matched"], 3);
        assert_eq!(value["counties"][0]["identifier"], "13089");
        assert_eq!(value["counties"][0]["provider_count"], 2);
        assert_eq!(value["counties"][1]["rates"]["fp_rate"], 41.2);
    }

    #[test]
    fn test_geojson_export_properties() {
        let mut session = ready_session();
        session
            .set_filter(FilterState::all().with_metric(Metric::Rate("fp_rate".into())))
            .unwrap();
        let collection = GeoJsonExporter::new().collection(&session).unwrap();
        assert_eq!(collection.features.len(), 2);

        let fulton = collection.features[1].properties.as_ref().unwrap();
        assert_eq!(fulton["county_id"], "13121");
        assert_eq!(fulton["provider_count"], 1);
        assert_eq!(fulton["fp_rate"], 41.2);
        assert_eq!(fulton["metric_value"], 41.2);
        assert_eq!(fulton["density_band"], "low");
        assert!(fulton.contains_key("fill_color"));

        // no rate for DeKalb, so no metric value or fill
        let dekalb = collection.features[0].properties.as_ref().unwrap();
        assert!(!dekalb.contains_key("metric_value"));
        assert!(!dekalb.contains_key("fill_color"));
    }

    #[test]
    fn test_export_requires_ready() {
        let session = MapSession::default();
        let mut out = Vec::new();
        assert!(matches!(
            CsvExporter::new().write(&session, &mut out),
            Err(MapError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_export_to_file() {
        let session = ready_session();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("counties.geojson");
        export_session(&session, &path, ExportFormat::GeoJson).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: GeoJson = text.parse().unwrap();
        assert!(matches!(parsed, GeoJson::FeatureCollection(_)));

        let bad = dir.path().join("missing-dir").join("out.csv");
        assert!(matches!(
            export_session(&session, &bad, ExportFormat::Csv),
            Err(MapError::Export { .. })
        ));
    }
}
