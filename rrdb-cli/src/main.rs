//! CLI for rrdb round-robin database files.
//!
//! Provides commands for creating, updating, fetching from, exporting from,
//! and inspecting rrdb files.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use rrdb::ConsolidationFn;
use rrdb::timespec::{self, TimeSpec};
use tracing_subscriber::EnvFilter;

/// rrdb - Round-robin database files.
#[derive(Parser)]
#[command(name = "rrdb", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Create a database from DS: and RRA: definitions.
    Create {
        /// Path of the database file.
        file: PathBuf,

        /// Base interval in seconds.
        #[arg(long, default_value_t = rrdb::create::DEFAULT_STEP)]
        step: u64,

        /// Time of the initial last update (e.g., "now-10s", "1700000000").
        #[arg(short = 'b', long, default_value = "now-10s", allow_hyphen_values = true)]
        start: String,

        /// Fail instead of replacing an existing file.
        #[arg(short = 'O', long)]
        no_overwrite: bool,

        /// DS:name:TYPE:heartbeat:min:max, DS:name:COMPUTE:rpn, or RRA:CF:xff:steps:rows.
        #[arg(required = true)]
        definitions: Vec<String>,
    },

    /// Feed readings into a database.
    Update {
        /// Path of the database file.
        file: PathBuf,

        /// Data sources the values belong to (e.g., "in:out").
        #[arg(short, long)]
        template: Option<String>,

        /// Updates as timestamp:value[:value...]; "N" is now, "U" is unknown.
        #[arg(required = true)]
        updates: Vec<String>,
    },

    /// Read consolidated rows from one archive.
    Fetch {
        /// Path of the database file.
        file: PathBuf,

        /// Consolidation function (AVERAGE, MIN, MAX, LAST).
        cf: String,

        /// Start of the range (e.g., "end-1d", "now-1h", "1700000000").
        #[arg(short, long, default_value = "end-1d", allow_hyphen_values = true)]
        start: String,

        /// End of the range.
        #[arg(short, long, default_value = "now", allow_hyphen_values = true)]
        end: String,

        /// Preferred row interval in seconds.
        #[arg(short, long, default_value_t = 1)]
        resolution: u64,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Export DEF/CDEF/XPORT statements, e.g. `-s now-1h DEF:a=x.rrd:in:AVERAGE XPORT:a`.
    Xport {
        /// Options and statements, passed through unchanged.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Display the definition and live state of a database as JSON.
    Info {
        /// Path of the database file.
        file: PathBuf,
    },

    /// Print the time of the last update.
    Last {
        /// Path of the database file.
        file: PathBuf,
    },

    /// Print the time of the oldest row of an archive.
    First {
        /// Path of the database file.
        file: PathBuf,

        /// Archive index.
        #[arg(long, default_value_t = 0)]
        rra_index: usize,
    },
}

/// Output format for fetch and export results.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// JSON object with metadata and rows.
    Json,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Create {
            file,
            step,
            start,
            no_overwrite,
            definitions,
        } => cmd_create(&file, step, &start, !no_overwrite, &definitions),
        Commands::Update {
            file,
            template,
            updates,
        } => cmd_update(&file, template.as_deref(), &updates),
        Commands::Fetch {
            file,
            cf,
            start,
            end,
            resolution,
            format,
        } => cmd_fetch(&file, &cf, &start, &end, resolution, &format),
        Commands::Xport { args, format } => cmd_xport(&args, &format),
        Commands::Info { file } => cmd_info(&file),
        Commands::Last { file } => cmd_last(&file),
        Commands::First { file, rra_index } => cmd_first(&file, rra_index),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Implements `rrdb create <file> <definitions>...`.
fn cmd_create(
    file: &Path,
    step: u64,
    start: &str,
    overwrite: bool,
    definitions: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let start = resolve_time(start)?;

    let mut creator = rrdb::Creator::new(file, start, step);
    for definition in definitions {
        creator.arg(definition);
    }
    creator.create(overwrite)?;

    tracing::info!("created {} starting at {start}", file.display());
    Ok(())
}

/// Implements `rrdb update <file> <updates>...`.
fn cmd_update(
    file: &Path,
    template: Option<&str>,
    updates: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    rrdb::update(file, template, updates)?;
    Ok(())
}

/// Implements `rrdb fetch <file> <cf>`.
fn cmd_fetch(
    file: &Path,
    cf: &str,
    start: &str,
    end: &str,
    resolution: u64,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let cf: ConsolidationFn = cf.parse()?;
    let (start, end) = resolve_range(start, end)?;
    let result = rrdb::fetch(file, cf, start, end, resolution)?;

    match format {
        OutputFormat::Csv => {
            println!(
                "# file={}, cf={cf}, step={}, rows={}",
                file.display(),
                result.step(),
                result.row_count()
            );
            println!("timestamp,{}", result.ds_names().join(","));
            for (ts, values) in result.iter_rows() {
                println!("{ts},{}", format_row(values));
            }
        }
        OutputFormat::Json => {
            let rows: Vec<serde_json::Value> = result
                .iter_rows()
                .map(|(ts, values)| {
                    serde_json::json!({
                        "timestamp": ts,
                        "values": json_values(values),
                    })
                })
                .collect();

            let output = serde_json::json!({
                "file": file.display().to_string(),
                "cf": cf.to_string(),
                "start": result.start(),
                "end": result.end(),
                "step": result.step(),
                "ds_names": result.ds_names(),
                "data": rows,
            });

            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Implements `rrdb xport <args>...`.
fn cmd_xport(args: &[String], format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let result = rrdb::xport(args)?;

    match format {
        OutputFormat::Csv => {
            println!("# step={}, rows={}", result.step(), result.row_count());
            println!("timestamp,{}", result.legends().join(","));
            for (ts, values) in result.iter_rows() {
                println!("{ts},{}", format_row(values));
            }
        }
        OutputFormat::Json => {
            let rows: Vec<serde_json::Value> = result
                .iter_rows()
                .map(|(ts, values)| {
                    serde_json::json!({
                        "timestamp": ts,
                        "values": json_values(values),
                    })
                })
                .collect();

            let output = serde_json::json!({
                "start": result.start(),
                "end": result.end(),
                "step": result.step(),
                "legends": result.legends(),
                "data": rows,
            });

            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Implements `rrdb info <file>`.
fn cmd_info(file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let db = rrdb::Database::open_read_only(file)?;
    println!("{}", serde_json::to_string_pretty(&db.info())?);
    Ok(())
}

/// Implements `rrdb last <file>`.
fn cmd_last(file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let db = rrdb::Database::open_read_only(file)?;
    println!("{}", db.last_update());
    Ok(())
}

/// Implements `rrdb first <file>`.
fn cmd_first(file: &Path, rra_index: usize) -> Result<(), Box<dyn std::error::Error>> {
    let db = rrdb::Database::open_read_only(file)?;
    println!("{}", db.first(rra_index)?);
    Ok(())
}

/// Resolves a single time specification against the current time.
fn resolve_time(spec: &str) -> Result<u64, Box<dyn std::error::Error>> {
    let spec: TimeSpec = spec.parse()?;
    let (_, time) = timespec::resolve_range(TimeSpec::Absolute(0), spec, timespec::now())?;
    Ok(time)
}

/// Resolves a start/end pair of time specifications.
fn resolve_range(start: &str, end: &str) -> Result<(u64, u64), Box<dyn std::error::Error>> {
    let start: TimeSpec = start.parse()?;
    let end: TimeSpec = end.parse()?;
    Ok(timespec::resolve_range(start, end, timespec::now())?)
}

/// Formats a row of values for CSV output; unknown values print as `NaN`.
fn format_row(values: &[f64]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Converts values to JSON; NaN becomes `null`.
fn json_values(values: &[f64]) -> Vec<serde_json::Value> {
    values
        .iter()
        .map(|v| {
            if v.is_nan() {
                serde_json::Value::Null
            } else {
                serde_json::json!(v)
            }
        })
        .collect()
}
