use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use gis_expander::scheduler::Strategy;
use gis_expander::{run, ExpandConfig, DEFAULT_CRS, DEFAULT_ID_COLUMN, DEFAULT_TEXT_COLUMN};

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose >= 1)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_delimiter(value: &str) -> Option<u8> {
    match value {
        "\\t" | "tab" => Some(b'\t'),
        _ if value.len() == 1 => value.bytes().next(),
        _ => None,
    }
}

fn main() {
    let matches = Command::new("GIS Expander")
        .version("1.0")
        .author("Jesper Fjellin")
        .about("Expands CSV rows into one geographic record per region named in their text")
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .required(true)
                .help("Input CSV file"),
        )
        .arg(
            Arg::new("output-dir")
                .short('o')
                .long("output-dir")
                .required(true)
                .help("Directory that receives output.csv and output.geojson"),
        )
        .arg(
            Arg::new("crs")
                .long("crs")
                .default_value(DEFAULT_CRS)
                .help("Reference system of the output geometries"),
        )
        .arg(
            Arg::new("source-crs")
                .long("source-crs")
                .default_value(DEFAULT_CRS)
                .help("Reference system of the coordinates found in the text"),
        )
        .arg(
            Arg::new("columns")
                .short('c')
                .long("columns")
                .num_args(1..)
                .default_value(DEFAULT_TEXT_COLUMN)
                .help("Columns scanned for \"Region (lat, lon)\" annotations"),
        )
        .arg(
            Arg::new("id-column")
                .long("id-column")
                .default_value(DEFAULT_ID_COLUMN)
                .help("Row identifier column"),
        )
        .arg(
            Arg::new("strategy")
                .short('s')
                .long("strategy")
                .value_parser(Strategy::NAMES)
                .default_value("sequential")
                .help("Execution strategy"),
        )
        .arg(
            Arg::new("workers")
                .short('w')
                .long("workers")
                .value_parser(clap::value_parser!(usize))
                .help("Worker threads for the parallel strategies (defaults to the number of cores)"),
        )
        .arg(
            Arg::new("delimiter")
                .short('d')
                .long("delimiter")
                .default_value(",")
                .help("Input field delimiter"),
        )
        .arg(
            Arg::new("exclude-text-columns")
                .long("exclude-text-columns")
                .action(ArgAction::SetTrue)
                .help("Leave the scanned columns out of the output"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("More log output (-v, -vv)"),
        )
        .get_matches();

    init_logging(matches.get_count("verbose"));

    // Arguments with defaults or `required` are always present
    let string_arg = |id: &str| matches.get_one::<String>(id).cloned().unwrap_or_default();

    let input = PathBuf::from(string_arg("input"));
    if !input.exists() {
        eprintln!("Error: File not found: {}", input.display());
        std::process::exit(1);
    }

    let delimiter = match parse_delimiter(&string_arg("delimiter")) {
        Some(delimiter) => delimiter,
        None => {
            eprintln!("Error: The delimiter must be a single ASCII character");
            std::process::exit(1);
        }
    };

    let strategy = match string_arg("strategy").parse::<Strategy>() {
        Ok(strategy) => strategy,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let config = ExpandConfig {
        source_crs: string_arg("source-crs"),
        target_crs: string_arg("crs"),
        text_columns: matches
            .get_many::<String>("columns")
            .map(|values| values.cloned().collect())
            .unwrap_or_default(),
        id_column: string_arg("id-column"),
        strategy,
        workers: matches.get_one::<usize>("workers").copied(),
        delimiter,
        exclude_text_columns: matches.get_flag("exclude-text-columns"),
        ..ExpandConfig::new(input, string_arg("output-dir"))
    };

    match run(&config) {
        Ok(summary) => {
            println!("Processing completed successfully");
            println!(
                "Expanded {} rows into {} records: {} and {}",
                summary.rows_read,
                summary.records_written,
                summary.outputs.csv.display(),
                summary.outputs.geojson.display()
            );
        }
        Err(e) => {
            eprintln!("Error processing file: {}", e);
            std::process::exit(1);
        }
    }
}
