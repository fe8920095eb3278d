use std::sync::LazyLock;

use geo::Point;
use regex::Regex;

use crate::table::{Row, Schema};

// Region label, then "(lat, lon)". Both coordinates need a fractional part.
static ANNOTATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z ]+)\s*\(([-+]?[0-9]+\.[0-9]+),\s*([-+]?[0-9]+\.[0-9]+)\)")
        .expect("annotation pattern is valid")
});

/// A region label with the coordinates written next to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub region: String,
    pub lat: f64,
    pub lon: f64,
}

impl Annotation {
    /// Point geometry, x = longitude and y = latitude.
    pub fn point(&self) -> Point<f64> {
        Point::new(self.lon, self.lat)
    }
}

/// One expanded row: the source row's values plus a single region and its point.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRecord {
    pub row_id: String,
    pub region: String,
    pub point: Point<f64>,
    /// Values of the passthrough columns, in passthrough order
    pub values: Vec<String>,
}

/// Which columns are scanned, and which are copied into every output record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOptions {
    pub text_columns: Vec<String>,
    pub exclude_text_columns: bool,
}

impl TransformOptions {
    pub fn new(text_columns: Vec<String>) -> Self {
        TransformOptions {
            text_columns,
            exclude_text_columns: false,
        }
    }

    pub fn passthrough_columns(&self, schema: &Schema) -> Vec<String> {
        schema
            .columns()
            .iter()
            .filter(|column| !(self.exclude_text_columns && self.text_columns.contains(column)))
            .cloned()
            .collect()
    }
}

/// Finds every annotation in `text`, left to right.
pub fn scan(text: &str) -> impl Iterator<Item = Annotation> + '_ {
    ANNOTATION.captures_iter(text).filter_map(|caps| {
        let region = normalize_label(&caps[1]);
        if region.is_empty() {
            return None;
        }
        let lat = caps[2].parse::<f64>().ok()?;
        let lon = caps[3].parse::<f64>().ok()?;
        Some(Annotation { region, lat, lon })
    })
}

/// Trims the matched label and drops leading lowercase words, so the
/// connective text between two annotations ("and", "near the") does not end
/// up in the region name. A label without any capitalised word is only trimmed.
pub fn normalize_label(raw: &str) -> String {
    let trimmed = raw.trim();
    let bytes = trimmed.as_bytes();
    let start = trimmed
        .char_indices()
        .find(|&(i, c)| c.is_ascii_uppercase() && (i == 0 || bytes[i - 1] == b' '))
        .map_or(0, |(i, _)| i);
    trimmed[start..].to_owned()
}

/// Collects the annotations of every requested column, in column order.
/// Columns missing from the schema and empty values are skipped.
pub fn extract(row: &Row, schema: &Schema, text_columns: &[String]) -> Vec<Annotation> {
    text_columns
        .iter()
        .filter_map(|column| row.get(schema, column))
        .filter(|value| !value.is_empty())
        .flat_map(scan)
        .collect()
}

/// Emits one record per distinct region, in first-seen order. Each record
/// takes the coordinates of the first annotation of its region.
pub fn group_and_expand(
    row: &Row,
    schema: &Schema,
    annotations: &[Annotation],
    passthrough_columns: &[String],
) -> Vec<OutputRecord> {
    let mut firsts: Vec<&Annotation> = Vec::new();
    for annotation in annotations {
        if !firsts.iter().any(|seen| seen.region == annotation.region) {
            firsts.push(annotation);
        }
    }

    if firsts.is_empty() {
        return Vec::new();
    }

    let values: Vec<String> = passthrough_columns
        .iter()
        .map(|column| row.get(schema, column).unwrap_or_default().to_owned())
        .collect();

    firsts
        .into_iter()
        .map(|annotation| OutputRecord {
            row_id: row.id(schema).to_owned(),
            region: annotation.region.clone(),
            point: annotation.point(),
            values: values.clone(),
        })
        .collect()
}

/// `extract` followed by `group_and_expand`.
pub fn expand_row(
    row: &Row,
    schema: &Schema,
    options: &TransformOptions,
    passthrough_columns: &[String],
) -> Vec<OutputRecord> {
    let annotations = extract(row, schema, &options.text_columns);
    group_and_expand(row, schema, &annotations, passthrough_columns)
}
