use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use geo::algorithm::bounding_rect::BoundingRect;
use geo::{MultiPoint, Point, Rect};
use geojson::{Feature, FeatureCollection, Geometry as GeoJsonGeometry, JsonObject, JsonValue};
use tracing::{info, warn};

use crate::error::Result;
use crate::expander::{OutputRecord, TransformOptions};
use crate::projection::{epsg_code, Reprojector};
use crate::scheduler::Scheduler;
use crate::table::InputTable;

pub const LOCATION_COLUMN: &str = "location";
pub const GEOMETRY_COLUMN: &str = "geometry";
pub const OUTPUT_BASENAME: &str = "output";

/// Expanded records with a point geometry each, expressed in `crs`.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoTable {
    columns: Vec<String>,
    records: Vec<OutputRecord>,
    crs: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub csv: PathBuf,
    pub geojson: PathBuf,
}

impl OutputPaths {
    pub fn in_dir(output_dir: &Path) -> Self {
        OutputPaths {
            csv: output_dir.join(format!("{OUTPUT_BASENAME}.csv")),
            geojson: output_dir.join(format!("{OUTPUT_BASENAME}.geojson")),
        }
    }
}

/// Runs the transform over `table` and returns the result reprojected
/// from `source_crs` to `target_crs`.
pub fn build_output_table(
    table: &InputTable,
    options: &TransformOptions,
    scheduler: &Scheduler,
    source_crs: &str,
    target_crs: &str,
) -> Result<GeoTable> {
    for column in table.schema.missing(&options.text_columns) {
        warn!("Text column '{}' is not in the input, it will be skipped", column);
    }

    let records = scheduler.expand(table, options)?;
    info!("Expanded {} rows into {} records", table.rows.len(), records.len());

    let columns = options.passthrough_columns(&table.schema);
    GeoTable::new(columns, records, source_crs).to_crs(target_crs)
}

impl GeoTable {
    pub fn new(columns: Vec<String>, records: Vec<OutputRecord>, crs: &str) -> Self {
        GeoTable {
            columns,
            records,
            crs: crs.to_owned(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[OutputRecord] {
        &self.records
    }

    pub fn crs(&self) -> &str {
        &self.crs
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn extent(&self) -> Option<Rect<f64>> {
        let points: Vec<Point<f64>> = self.records.iter().map(|r| r.point).collect();
        MultiPoint::new(points).bounding_rect()
    }

    /// Reprojects every point into `target` and relabels the table. Records
    /// whose point cannot be represented in `target` are dropped with a warning.
    pub fn to_crs(mut self, target: &str) -> Result<Self> {
        let reprojector = Reprojector::new(&self.crs, target)?;
        if !reprojector.is_identity() {
            info!(
                "Reprojecting {} points from {} to {}",
                self.records.len(),
                reprojector.from_crs(),
                reprojector.to_crs()
            );
            let total = self.records.len();
            self.records.retain_mut(|record| match reprojector.project(record.point) {
                Ok(point) if point.x().is_finite() && point.y().is_finite() => {
                    record.point = point;
                    true
                }
                Ok(point) => {
                    warn!(
                        "Dropping {} of row {}: reprojected to non-finite {}",
                        record.region,
                        record.row_id,
                        wkt_point(point)
                    );
                    false
                }
                Err(e) => {
                    warn!("Dropping {} of row {}: {}", record.region, record.row_id, e);
                    false
                }
            });
            if self.records.len() < total {
                warn!(
                    "{} of {} points could not be reprojected to {}",
                    total - self.records.len(),
                    total,
                    target
                );
            }
        }
        self.crs = target.to_owned();
        Ok(self)
    }

    // Passthrough columns minus the ones the output adds itself
    fn kept_columns(&self) -> Vec<(usize, &str)> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.as_str() != LOCATION_COLUMN && c.as_str() != GEOMETRY_COLUMN)
            .map(|(i, c)| (i, c.as_str()))
            .collect()
    }

    /// Writes `output.csv` and `output.geojson` into `output_dir`, replacing
    /// existing files.
    pub fn write(&self, output_dir: &Path) -> Result<OutputPaths> {
        create_dir_all(output_dir)?;
        let paths = OutputPaths::in_dir(output_dir);

        if let Some(extent) = self.extent() {
            info!(
                "Extent bounds: ({:.2}, {:.2}) to ({:.2}, {:.2})",
                extent.min().x,
                extent.min().y,
                extent.max().x,
                extent.max().y
            );
        }

        self.write_csv(BufWriter::new(File::create(&paths.csv)?))?;
        info!("Written {} records to {}", self.records.len(), paths.csv.display());

        let mut writer = BufWriter::new(File::create(&paths.geojson)?);
        serde_json::to_writer_pretty(&mut writer, &self.to_feature_collection())?;
        writer.flush()?;
        info!("Written {} features to {}", self.records.len(), paths.geojson.display());

        Ok(paths)
    }

    /// Passthrough values, then the region and the WKT geometry.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let kept = self.kept_columns();
        let mut writer = csv::Writer::from_writer(writer);

        let mut header: Vec<&str> = kept.iter().map(|(_, c)| *c).collect();
        header.push(LOCATION_COLUMN);
        header.push(GEOMETRY_COLUMN);
        writer.write_record(&header)?;

        for record in &self.records {
            let wkt = wkt_point(record.point);
            let mut line: Vec<&str> = kept.iter().map(|(i, _)| record.values[*i].as_str()).collect();
            line.push(&record.region);
            line.push(&wkt);
            writer.write_record(&line)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn to_feature_collection(&self) -> FeatureCollection {
        let kept = self.kept_columns();

        let features = self
            .records
            .iter()
            .map(|record| {
                let mut properties = JsonObject::new();
                for (i, column) in &kept {
                    properties.insert((*column).to_owned(), property_value(&record.values[*i]));
                }
                properties.insert(
                    LOCATION_COLUMN.to_owned(),
                    JsonValue::String(record.region.clone()),
                );

                Feature {
                    bbox: None,
                    geometry: Some(GeoJsonGeometry::new(geojson::Value::Point(vec![
                        record.point.x(),
                        record.point.y(),
                    ]))),
                    id: None,
                    properties: Some(properties),
                    foreign_members: None,
                }
            })
            .collect();

        let bbox = self
            .extent()
            .map(|rect| vec![rect.min().x, rect.min().y, rect.max().x, rect.max().y]);

        FeatureCollection {
            bbox,
            features,
            foreign_members: crs_member(&self.crs),
        }
    }
}

/// `POINT (x y)`
pub fn wkt_point(point: Point<f64>) -> String {
    format!("POINT ({} {})", point.x(), point.y())
}

// Numbers stay numbers and empty cells become null, the way a dataframe
// would have typed the column.
fn property_value(raw: &str) -> JsonValue {
    if raw.is_empty() {
        return JsonValue::Null;
    }
    if let Ok(int) = raw.parse::<i64>() {
        return JsonValue::from(int);
    }
    if let Some(number) = raw
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(serde_json::Number::from_f64)
    {
        return JsonValue::Number(number);
    }
    JsonValue::String(raw.to_owned())
}

// GeoJSON assumes WGS84, anything else gets a named crs member
fn crs_member(crs: &str) -> Option<JsonObject> {
    let code = epsg_code(crs)?;
    if code == 4326 {
        return None;
    }
    let mut member = JsonObject::new();
    member.insert(
        "crs".to_owned(),
        serde_json::json!({
            "type": "name",
            "properties": { "name": format!("urn:ogc:def:crs:EPSG::{code}") }
        }),
    );
    Some(member)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, region: &str, x: f64, y: f64, values: &[&str]) -> OutputRecord {
        OutputRecord {
            row_id: id.to_owned(),
            region: region.to_owned(),
            point: Point::new(x, y),
            values: values.iter().map(|v| (*v).to_owned()).collect(),
        }
    }

    fn sample() -> GeoTable {
        GeoTable::new(
            vec!["ID".into(), "text".into(), "score".into()],
            vec![
                record("2", "Lyon", 4.85, 45.75, &["2", "Lyon (45.75, 4.85), Nice (43.70, 7.26)", "0.5"]),
                record("2", "Nice", 7.26, 43.70, &["2", "Lyon (45.75, 4.85), Nice (43.70, 7.26)", "0.5"]),
                record("7", "Oslo", 10.75, 59.91, &["7", "Oslo (59.91, 10.75)", ""]),
            ],
            "EPSG:4326",
        )
    }

    #[test]
    fn test_wkt_point() {
        assert_eq!(wkt_point(Point::new(2.35, 48.85)), "POINT (2.35 48.85)");
        assert_eq!(wkt_point(Point::new(-77.0, 0.5)), "POINT (-77 0.5)");
    }

    #[test]
    fn test_property_value_typing() {
        assert_eq!(property_value(""), JsonValue::Null);
        assert_eq!(property_value("42"), serde_json::json!(42));
        assert_eq!(property_value("0.5"), serde_json::json!(0.5));
        assert_eq!(property_value("NaN"), serde_json::json!("NaN"));
        assert_eq!(property_value("Paris"), serde_json::json!("Paris"));
    }

    #[test]
    fn test_extent() {
        let extent = sample().extent().unwrap();
        assert_eq!(extent.min().x, 4.85);
        assert_eq!(extent.min().y, 43.70);
        assert_eq!(extent.max().x, 10.75);
        assert_eq!(extent.max().y, 59.91);

        let empty = GeoTable::new(vec!["ID".into()], Vec::new(), "EPSG:4326");
        assert!(empty.extent().is_none());
        assert!(empty.is_empty());
    }

    #[test]
    fn test_csv_layout() {
        let mut buffer = Vec::new();
        sample().write_csv(&mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines[0], "ID,text,score,location,geometry");
        assert_eq!(
            lines[1],
            "2,\"Lyon (45.75, 4.85), Nice (43.70, 7.26)\",0.5,Lyon,POINT (4.85 45.75)"
        );
        assert_eq!(lines[3], "7,\"Oslo (59.91, 10.75)\",,Oslo,POINT (10.75 59.91)");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_existing_location_column_is_replaced() {
        let table = GeoTable::new(
            vec!["ID".into(), "location".into()],
            vec![record("1", "Paris", 2.35, 48.85, &["1", "old"])],
            "EPSG:4326",
        );
        let mut buffer = Vec::new();
        table.write_csv(&mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(text, "ID,location,geometry\n1,Paris,POINT (2.35 48.85)\n");
    }

    #[test]
    fn test_feature_collection() {
        let collection = sample().to_feature_collection();
        assert_eq!(collection.features.len(), 3);
        assert_eq!(collection.bbox, Some(vec![4.85, 43.70, 10.75, 59.91]));
        assert!(collection.foreign_members.is_none());

        let feature = &collection.features[1];
        let geometry = feature.geometry.as_ref().unwrap();
        assert_eq!(geometry.value, geojson::Value::Point(vec![7.26, 43.70]));

        let properties = feature.properties.as_ref().unwrap();
        assert_eq!(properties["location"], serde_json::json!("Nice"));
        assert_eq!(properties["ID"], serde_json::json!(2));
        assert_eq!(properties["score"], serde_json::json!(0.5));
        assert_eq!(
            collection.features[2].properties.as_ref().unwrap()["score"],
            JsonValue::Null
        );
    }

    #[test]
    fn test_crs_member_for_projected_output() {
        assert!(crs_member("EPSG:4326").is_none());
        let member = crs_member("EPSG:3857").unwrap();
        assert_eq!(
            member["crs"]["properties"]["name"],
            serde_json::json!("urn:ogc:def:crs:EPSG::3857")
        );
    }

    #[test]
    fn test_write_replaces_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("output.csv"), "stale").unwrap();

        let paths = sample().write(&out).unwrap();
        assert_eq!(paths, OutputPaths::in_dir(&out));

        let csv = std::fs::read_to_string(&paths.csv).unwrap();
        assert!(csv.starts_with("ID,text,score,location,geometry\n"));
        assert!(!csv.contains("stale"));

        let geojson: geojson::GeoJson = std::fs::read_to_string(&paths.geojson)
            .unwrap()
            .parse()
            .unwrap();
        match geojson {
            geojson::GeoJson::FeatureCollection(fc) => assert_eq!(fc.features.len(), 3),
            other => panic!("expected a feature collection, got {other:?}"),
        }
    }

    #[test]
    fn test_to_same_crs_keeps_points() {
        let table = sample().to_crs("EPSG:4326").unwrap();
        assert_eq!(table.records()[0].point, Point::new(4.85, 45.75));
        assert_eq!(table.crs(), "EPSG:4326");
        assert_eq!(table.columns(), ["ID", "text", "score"]);
    }

    #[test]
    fn test_unprojectable_point_is_dropped() {
        let table = GeoTable::new(
            vec!["ID".into()],
            vec![
                record("1", "Paris", 2.35, 48.85, &["1"]),
                record("2", "Atlantis", 10.00, 95.00, &["2"]),
            ],
            "EPSG:4326",
        );
        let projected = table.to_crs("EPSG:3857").unwrap();
        assert_eq!(projected.len(), 1);
        assert_eq!(projected.records()[0].region, "Paris");
        assert!(projected.records()[0].point.x() > 200_000.0);
        assert_eq!(projected.crs(), "EPSG:3857");
    }
}
