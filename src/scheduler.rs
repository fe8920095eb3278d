use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::thread;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info};

use crate::error::Result;
use crate::expander::{expand_row, extract, group_and_expand, Annotation, OutputRecord, TransformOptions};
use crate::table::{load, load_partitioned, InputTable, LoadOptions};

/// How the per-row transform is scheduled. All strategies produce the same records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// One row at a time on the calling thread
    #[default]
    Sequential,
    /// Extraction on a worker pool, grouping back on the calling thread
    MapReduce,
    /// Partitioned parallel load, then the whole transform on the pool
    Columnar,
}

impl Strategy {
    pub const NAMES: [&'static str; 3] = ["sequential", "map-reduce", "columnar"];

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Sequential => "sequential",
            Strategy::MapReduce => "map-reduce",
            Strategy::Columnar => "columnar",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(Strategy::Sequential),
            "map-reduce" | "mapreduce" => Ok(Strategy::MapReduce),
            "columnar" => Ok(Strategy::Columnar),
            other => Err(format!(
                "unknown strategy '{}', expected one of: {}",
                other,
                Strategy::NAMES.join(", ")
            )),
        }
    }
}

pub fn available_workers() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get())
}

pub struct Scheduler {
    strategy: Strategy,
    workers: usize,
}

impl Scheduler {
    /// `workers` defaults to the number of available cores.
    pub fn new(strategy: Strategy, workers: Option<usize>) -> Self {
        Scheduler {
            strategy,
            workers: workers.unwrap_or_else(available_workers).max(1),
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    fn pool(&self) -> Result<ThreadPool> {
        debug!("Starting worker pool with {} threads", self.workers);
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("expander-{i}"))
            .build()?;
        Ok(pool)
    }

    pub fn load(&self, path: &Path, options: &LoadOptions) -> Result<InputTable> {
        match self.strategy {
            Strategy::Columnar => {
                let pool = self.pool()?;
                pool.install(|| load_partitioned(path, options, self.workers))
            }
            Strategy::Sequential | Strategy::MapReduce => load(path, options),
        }
    }

    /// Runs the transform over every row. Records come out in row order.
    pub fn expand(&self, table: &InputTable, options: &TransformOptions) -> Result<Vec<OutputRecord>> {
        let schema = &table.schema;
        let passthrough = options.passthrough_columns(schema);
        info!(
            "Expanding {} rows ({} strategy, scanning {:?})",
            table.rows.len(),
            self.strategy,
            options.text_columns
        );

        let records = match self.strategy {
            Strategy::Sequential => table
                .rows
                .iter()
                .flat_map(|row| expand_row(row, schema, options, &passthrough))
                .collect(),
            Strategy::MapReduce => {
                let mapped: Vec<Vec<Annotation>> = self.pool()?.install(|| {
                    table
                        .rows
                        .par_iter()
                        .map(|row| extract(row, schema, &options.text_columns))
                        .collect()
                });
                table
                    .rows
                    .iter()
                    .zip(&mapped)
                    .flat_map(|(row, annotations)| {
                        group_and_expand(row, schema, annotations, &passthrough)
                    })
                    .collect()
            }
            Strategy::Columnar => {
                let expanded: Vec<Vec<OutputRecord>> = self.pool()?.install(|| {
                    table
                        .rows
                        .par_iter()
                        .map(|row| expand_row(row, schema, options, &passthrough))
                        .collect()
                });
                expanded.into_iter().flatten().collect()
            }
        };
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Row, Schema};

    fn table(rows: usize) -> InputTable {
        let schema = Schema::new(vec!["ID".into(), "text".into()], "ID").unwrap();
        let texts = [
            "Paris (48.85, 2.35) and Paris (48.86, 2.36)",
            "Lyon (45.75, 4.85), Nice (43.70, 7.26)",
            "",
            "Rome(41,12)",
            "Oslo (59.91, 10.75) near Bergen (60.39, 5.32) and Oslo (1.0, 1.0)",
        ];
        let rows = (0..rows)
            .map(|i| Row::new(i, vec![i.to_string(), texts[i % texts.len()].to_owned()]))
            .collect();
        InputTable { schema, rows }
    }

    fn options() -> TransformOptions {
        TransformOptions::new(vec!["text".into()])
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("sequential".parse::<Strategy>(), Ok(Strategy::Sequential));
        assert_eq!("map-reduce".parse::<Strategy>(), Ok(Strategy::MapReduce));
        assert_eq!("columnar".parse::<Strategy>(), Ok(Strategy::Columnar));
        assert!("dask".parse::<Strategy>().is_err());
        for name in Strategy::NAMES {
            assert_eq!(name.parse::<Strategy>().unwrap().to_string(), name);
        }
    }

    #[test]
    fn test_sequential_expansion_counts() {
        let records = Scheduler::new(Strategy::Sequential, None)
            .expand(&table(5), &options())
            .unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.row_id.as_str()).collect();
        assert_eq!(ids, vec!["0", "1", "1", "4", "4"]);
        let regions: Vec<_> = records.iter().map(|r| r.region.as_str()).collect();
        assert_eq!(regions, vec!["Paris", "Lyon", "Nice", "Oslo", "Bergen"]);
    }

    #[test]
    fn test_strategies_agree() {
        let input = table(257);
        let expected = Scheduler::new(Strategy::Sequential, None)
            .expand(&input, &options())
            .unwrap();
        for strategy in [Strategy::MapReduce, Strategy::Columnar] {
            for workers in [1, 3, 8] {
                let records = Scheduler::new(strategy, Some(workers))
                    .expand(&input, &options())
                    .unwrap();
                assert_eq!(records, expected, "{strategy} with {workers} workers");
            }
        }
    }

    #[test]
    fn test_workers_never_zero() {
        let scheduler = Scheduler::new(Strategy::MapReduce, Some(0));
        assert_eq!(scheduler.workers(), 1);
        assert_eq!(scheduler.strategy(), Strategy::MapReduce);
        assert!(Scheduler::new(Strategy::MapReduce, None).workers() >= 1);
    }
}
