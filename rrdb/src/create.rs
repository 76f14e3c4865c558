//! Creating database files.
//!
//! [`create`] takes the classic argument list (`DS:` and `RRA:` strings);
//! [`Creator`] builds the same list step by step.
//!
//! ```rust,no_run
//! use rrdb::create::Creator;
//! use rrdb::definition::{ConsolidationFn, DataSourceKind};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut creator = Creator::new("traffic.rrd", 1_700_000_000, 60);
//! creator
//!     .ds("in", DataSourceKind::Counter, 120, Some(0.0), None)
//!     .ds("out", DataSourceKind::Counter, 120, Some(0.0), None)
//!     .compute("total", "in,out,+")
//!     .rra(ConsolidationFn::Average, 0.5, 1, 1440)
//!     .rra(ConsolidationFn::Max, 0.5, 60, 720);
//! creator.create(false)?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use crate::database::Database;
use crate::definition::{ConsolidationFn, DataSourceKind, Definition};
use crate::error::Result;
use crate::timespec;

/// Step used by [`Creator::with_defaults`], in seconds.
pub const DEFAULT_STEP: u64 = 300;

/// How far before now [`Creator::with_defaults`] starts a database.
const DEFAULT_START_OFFSET: u64 = 10;

/// Creates a database file, replacing any existing file at `path`.
///
/// # Arguments
///
/// * `path` - Where the file is created
/// * `step` - Base interval in seconds
/// * `start` - Initial last update time
/// * `args` - `DS:` and `RRA:` definitions, in any order
///
/// # Errors
///
/// Returns a [`DefinitionError`](crate::error::DefinitionError) for the
/// first invalid argument, or a [`FileError`](crate::error::FileError) if
/// the file cannot be written.
///
/// # Examples
///
/// ```rust,no_run
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// rrdb::create::create("load.rrd", 60, 1_700_000_000, &[
///     "DS:load:GAUGE:120:0:U",
///     "RRA:AVERAGE:0.5:1:1440",
/// ])?;
/// # Ok(())
/// # }
/// ```
pub fn create<P: AsRef<Path>, S: AsRef<str>>(
    path: P,
    step: u64,
    start: u64,
    args: &[S],
) -> Result<()> {
    create_file(path.as_ref(), step, start, args, true)
}

fn create_file<S: AsRef<str>>(
    path: &Path,
    step: u64,
    start: u64,
    args: &[S],
    overwrite: bool,
) -> Result<()> {
    let definition = Definition::from_args(step, args)?;
    let db = Database::create(path, &definition, start, overwrite)?;
    db.sync()
}

/// Builder for a new database.
#[derive(Debug, Clone)]
pub struct Creator {
    path: PathBuf,
    start: u64,
    step: u64,
    args: Vec<String>,
}

impl Creator {
    /// Starts a new database definition.
    pub fn new<P: AsRef<Path>>(path: P, start: u64, step: u64) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            start,
            step,
            args: Vec::new(),
        }
    }

    /// Starts a new definition with a step of [`DEFAULT_STEP`] seconds,
    /// starting ten seconds ago.
    pub fn with_defaults<P: AsRef<Path>>(path: P) -> Self {
        Self::new(
            path,
            timespec::now().saturating_sub(DEFAULT_START_OFFSET),
            DEFAULT_STEP,
        )
    }

    /// Adds a GAUGE, COUNTER, DERIVE, or ABSOLUTE data source. `None`
    /// bounds are unlimited.
    pub fn ds(
        &mut self,
        name: &str,
        kind: DataSourceKind,
        heartbeat: u64,
        min: Option<f64>,
        max: Option<f64>,
    ) -> &mut Self {
        self.args.push(format!(
            "DS:{name}:{kind}:{heartbeat}:{}:{}",
            bound(min),
            bound(max)
        ));
        self
    }

    /// Adds a COMPUTE data source.
    pub fn compute(&mut self, name: &str, rpn: &str) -> &mut Self {
        self.args.push(format!("DS:{name}:COMPUTE:{rpn}"));
        self
    }

    /// Adds an archive.
    pub fn rra(&mut self, cf: ConsolidationFn, xff: f64, steps: u32, rows: u32) -> &mut Self {
        self.args.push(format!("RRA:{cf}:{xff}:{steps}:{rows}"));
        self
    }

    /// Adds a raw `DS:` or `RRA:` argument.
    pub fn arg(&mut self, arg: &str) -> &mut Self {
        self.args.push(arg.to_string());
        self
    }

    /// Returns the arguments collected so far.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Writes the database file.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::Exists`](crate::error::FileError::Exists) if the
    /// file exists and `overwrite` is false, or the errors of [`create`].
    pub fn create(&self, overwrite: bool) -> Result<()> {
        create_file(&self.path, self.step, self.start, &self.args, overwrite)
    }
}

fn bound(value: Option<f64>) -> String {
    value.map_or_else(|| "U".to_string(), |v| v.to_string())
}
