use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::info;

pub mod error;
pub mod expander;
pub mod output;
pub mod projection;
pub mod scheduler;
pub mod table;

pub use error::{ExpandError, Result};
pub use expander::{Annotation, OutputRecord, TransformOptions};
pub use output::{build_output_table, GeoTable, OutputPaths};
pub use scheduler::{Scheduler, Strategy};
pub use table::{InputTable, LoadOptions};

pub const DEFAULT_CRS: &str = "EPSG:4326";
pub const DEFAULT_TEXT_COLUMN: &str = "sent_locs";
pub const DEFAULT_ID_COLUMN: &str = "ID";

/// Everything one run needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandConfig {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    /// Reference system of the coordinates written in the text
    pub source_crs: String,
    pub target_crs: String,
    pub text_columns: Vec<String>,
    pub id_column: String,
    pub strategy: Strategy,
    pub workers: Option<usize>,
    pub delimiter: u8,
    pub exclude_text_columns: bool,
}

impl ExpandConfig {
    pub fn new(input: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        ExpandConfig {
            input: input.into(),
            output_dir: output_dir.into(),
            source_crs: DEFAULT_CRS.to_owned(),
            target_crs: DEFAULT_CRS.to_owned(),
            text_columns: vec![DEFAULT_TEXT_COLUMN.to_owned()],
            id_column: DEFAULT_ID_COLUMN.to_owned(),
            strategy: Strategy::default(),
            workers: None,
            delimiter: b',',
            exclude_text_columns: false,
        }
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            delimiter: self.delimiter,
            id_column: self.id_column.clone(),
        }
    }

    pub fn transform_options(&self) -> TransformOptions {
        TransformOptions {
            text_columns: self.text_columns.clone(),
            exclude_text_columns: self.exclude_text_columns,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub rows_read: usize,
    pub records_written: usize,
    pub outputs: OutputPaths,
    pub elapsed: Duration,
}

/// Loads the input, expands it, reprojects and writes both output files.
/// Nothing is written unless the whole table was built.
pub fn run(config: &ExpandConfig) -> Result<RunSummary> {
    info!("=== Starting expansion ({} strategy) ===", config.strategy);
    let start = Instant::now();

    let scheduler = Scheduler::new(config.strategy, config.workers);
    let table = scheduler.load(&config.input, &config.load_options())?;
    let geo_table = build_output_table(
        &table,
        &config.transform_options(),
        &scheduler,
        &config.source_crs,
        &config.target_crs,
    )?;
    let outputs = geo_table.write(&config.output_dir)?;

    let elapsed = start.elapsed();
    info!("=== Expansion complete ===");
    info!("Runtime: {:.3} seconds", elapsed.as_secs_f64());

    Ok(RunSummary {
        rows_read: table.rows.len(),
        records_written: geo_table.len(),
        outputs,
        elapsed,
    })
}
