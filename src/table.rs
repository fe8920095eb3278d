use std::fs::File;
use std::io::BufReader;
use std::ops::Range;
use std::path::Path;

use csv::{ByteRecord, ReaderBuilder, StringRecord};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{ExpandError, Result};

/// Ordered header of the input table and the position of its id column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<String>,
    id_index: usize,
}

impl Schema {
    pub fn new(columns: Vec<String>, id_column: &str) -> Result<Self> {
        let id_index = columns
            .iter()
            .position(|column| column == id_column)
            .ok_or_else(|| ExpandError::MissingColumn(id_column.to_owned()))?;
        Ok(Schema { columns, id_index })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn id_column(&self) -> &str {
        &self.columns[self.id_index]
    }

    /// Names from `columns` that are not part of this schema.
    pub fn missing<'a>(&self, columns: &'a [String]) -> Vec<&'a str> {
        columns
            .iter()
            .filter(|column| self.position(column).is_none())
            .map(String::as_str)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// Zero-based position among the data rows of the input
    pub index: usize,
    pub values: Vec<String>,
}

impl Row {
    pub fn new(index: usize, values: Vec<String>) -> Self {
        Row { index, values }
    }

    pub fn get(&self, schema: &Schema, column: &str) -> Option<&str> {
        schema
            .position(column)
            .and_then(|i| self.values.get(i))
            .map(String::as_str)
    }

    pub fn id(&self, schema: &Schema) -> &str {
        self.values
            .get(schema.id_index)
            .map(String::as_str)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputTable {
    pub schema: Schema,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    pub delimiter: u8,
    pub id_column: String,
}

impl LoadOptions {
    fn reader_builder(&self, has_headers: bool) -> ReaderBuilder {
        let mut builder = ReaderBuilder::new();
        builder
            .delimiter(self.delimiter)
            .has_headers(has_headers)
            .flexible(true);
        builder
    }
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            delimiter: b',',
            id_column: crate::DEFAULT_ID_COLUMN.to_owned(),
        }
    }
}

fn header_columns(record: &StringRecord) -> Vec<String> {
    record.iter().map(str::to_owned).collect()
}

fn to_row(index: usize, record: StringRecord, expected: usize) -> Result<Row> {
    if record.len() != expected {
        return Err(ExpandError::FieldCount {
            row: index,
            expected,
            found: record.len(),
        });
    }
    Ok(Row::new(index, record.iter().map(str::to_owned).collect()))
}

/// Reads the whole table on the calling thread.
pub fn load(path: &Path, options: &LoadOptions) -> Result<InputTable> {
    info!("Loading file: {}", path.display());
    let file = File::open(path)?;
    let mut reader = options
        .reader_builder(true)
        .from_reader(BufReader::new(file));

    let schema = Schema::new(header_columns(reader.headers()?), &options.id_column)?;
    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        rows.push(to_row(index, record?, schema.len())?);
    }

    info!("Loaded {} rows with {} columns", rows.len(), schema.len());
    Ok(InputTable { schema, rows })
}

/// Reads the table by parsing `partitions` byte ranges of the file in
/// parallel on the current rayon pool. Rows keep their file order.
pub fn load_partitioned(path: &Path, options: &LoadOptions, partitions: usize) -> Result<InputTable> {
    info!("Loading file: {}", path.display());
    let data = std::fs::read(path)?;

    let mut header_reader = options.reader_builder(false).from_reader(&data[..]);
    let mut header = StringRecord::new();
    header_reader.read_record(&mut header)?;
    let header_end = header_reader.position().byte() as usize;
    let schema = Schema::new(header_columns(&header), &options.id_column)?;

    let body = &data[header_end..];
    let ranges = split_partitions(body, options, partitions)?;
    debug!("Split {} bytes into {} partitions", body.len(), ranges.len());

    let chunks = ranges
        .into_par_iter()
        .map(|range| {
            options
                .reader_builder(false)
                .from_reader(&body[range])
                .records()
                .collect::<std::result::Result<Vec<_>, csv::Error>>()
                .map_err(ExpandError::from)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut rows = Vec::with_capacity(chunks.iter().map(Vec::len).sum());
    for (partition, records) in chunks.into_iter().enumerate() {
        debug!("Partition {} holds {} rows", partition, records.len());
        for record in records {
            let index = rows.len();
            rows.push(to_row(index, record, schema.len())?);
        }
    }

    info!("Loaded {} rows with {} columns", rows.len(), schema.len());
    Ok(InputTable { schema, rows })
}

/// Splits CSV data into at most `partitions` ranges of roughly equal size.
/// Boundaries are the record offsets reported by the CSV parser, so every
/// range starts where a record starts.
pub fn split_partitions(data: &[u8], options: &LoadOptions, partitions: usize) -> Result<Vec<Range<usize>>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let target = data.len().div_ceil(partitions.max(1));

    let mut reader = options.reader_builder(false).from_reader(data);
    let mut record = ByteRecord::new();
    let mut ranges = Vec::with_capacity(partitions);
    let mut start = 0;
    while reader.read_byte_record(&mut record)? {
        let end = reader.position().byte() as usize;
        if end - start >= target {
            ranges.push(start..end);
            start = end;
        }
    }
    if start < data.len() {
        ranges.push(start..data.len());
    }
    Ok(ranges)
}
