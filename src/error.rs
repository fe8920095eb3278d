use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExpandError>;

#[derive(Error, Debug)]
pub enum ExpandError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A column the run cannot do without is not in the input header
    #[error("Missing column '{0}' in input header")]
    MissingColumn(String),

    #[error("Row {row} has {found} fields, header has {expected}")]
    FieldCount {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Cannot build projection from {from} to {to}: {source}")]
    Projection {
        from: String,
        to: String,
        #[source]
        source: proj::ProjCreateError,
    },

    #[error("Failed to reproject point ({x}, {y}): {source}")]
    Transform {
        x: f64,
        y: f64,
        #[source]
        source: proj::ProjError,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}
