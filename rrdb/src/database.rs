//! Database handle: the locked, memory-mapped view of one rrdb file.
//!
//! This module ties the file format, definition, and update engine
//! together. Every path-based operation in the crate goes through a
//! [`Database`]: writers take an exclusive advisory lock on the file,
//! readers a shared one, and the lock lives as long as the handle.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use rrdb::database::Database;
//! use rrdb::definition::Definition;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let definition = Definition::from_args(300, &[
//!     "DS:load:GAUGE:600:0:U",
//!     "RRA:AVERAGE:0.5:1:288",
//! ])?;
//!
//! let mut db = Database::create("load.rrd", &definition, 1_700_000_000, false)?;
//! db.update(1_700_000_300, &[0.42])?;
//! db.sync()?;
//!
//! let db = Database::open_read_only("load.rrd")?;
//! assert_eq!(db.last_update(), 1_700_000_300);
//! # Ok(())
//! # }
//! ```

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::Path;

use serde::Serialize;

use crate::consolidate;
use crate::definition::Definition;
use crate::error::{FetchError, FileError, Result, UpdateError};
use crate::format::RrdFile;
use crate::rpn::RpnExpr;

/// Format version reported by [`Database::info`].
const INFO_VERSION: &str = "0001";

/// An open rrdb database file.
///
/// # Thread Safety
///
/// A `Database` holds an OS file lock for its whole lifetime. Handles in
/// different processes (or threads) coordinate through that lock; a single
/// handle is not meant to be shared without external synchronization.
#[derive(Debug)]
pub struct Database {
    rrd: RrdFile,
    /// Copy of the stored definition, kept apart from `rrd` so updates can
    /// read it while mutating the mapping.
    definition: Definition,
    /// Compiled COMPUTE expressions, indexed like the data sources.
    computes: Vec<Option<RpnExpr>>,
    /// Keeps the lock alive; released when the handle drops.
    _file: File,
}

impl Database {
    /// Creates a new database file.
    ///
    /// # Arguments
    ///
    /// * `path` - Where the file is created
    /// * `definition` - Step, data sources, and archives
    /// * `start` - Initial last update time; the first update must be later
    /// * `overwrite` - Replace an existing file instead of failing
    ///
    /// # Errors
    ///
    /// Returns [`FileError::Exists`] if the file exists and `overwrite` is
    /// false, a [`DefinitionError`](crate::error::DefinitionError) if the
    /// definition does not validate, or another [`FileError`] on I/O
    /// failure.
    pub fn create<P: AsRef<Path>>(
        path: P,
        definition: &Definition,
        start: u64,
        overwrite: bool,
    ) -> Result<Self> {
        definition.validate()?;

        let path = path.as_ref();
        let path_str = path.display().to_string();

        let mut options = OpenOptions::new();
        options.read(true).write(true);
        if overwrite {
            options.create(true).truncate(false);
        } else {
            options.create_new(true);
        }
        let file = options.open(path).map_err(|e| {
            if e.kind() == ErrorKind::AlreadyExists {
                FileError::Exists {
                    path: path_str.clone(),
                }
            } else {
                FileError::Open {
                    path: path_str.clone(),
                    source: e,
                }
            }
        })?;

        lock(&file, &path_str, true)?;
        // Drop any previous contents only once the lock is held
        file.set_len(0).map_err(|e| FileError::Open {
            path: path_str.clone(),
            source: e,
        })?;

        let rrd = RrdFile::create(&file, &path_str, definition, start)?;
        rrd.sync()?;

        tracing::debug!(
            "created {path_str}: step {}s, {} DS, {} RRA, start {start}",
            definition.step,
            definition.data_sources.len(),
            definition.archives.len()
        );

        Self::from_parts(rrd, file)
    }

    /// Opens an existing database for updating.
    ///
    /// Blocks until an exclusive lock on the file is acquired.
    ///
    /// # Errors
    ///
    /// Returns [`FileError`] if the file cannot be opened, locked, or is
    /// not a valid database.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path.as_ref(), true)
    }

    /// Opens an existing database for reading.
    ///
    /// Blocks until a shared lock on the file is acquired.
    ///
    /// # Errors
    ///
    /// Returns [`FileError`] if the file cannot be opened, locked, or is
    /// not a valid database.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path.as_ref(), false)
    }

    fn open_with(path: &Path, writable: bool) -> Result<Self> {
        let path_str = path.display().to_string();
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path)
            .map_err(|e| FileError::Open {
                path: path_str.clone(),
                source: e,
            })?;
        lock(&file, &path_str, writable)?;

        let rrd = RrdFile::open(&file, &path_str, writable)?;
        Self::from_parts(rrd, file)
    }

    fn from_parts(rrd: RrdFile, file: File) -> Result<Self> {
        let definition = rrd.definition().clone();
        let computes = definition
            .data_sources
            .iter()
            .map(|ds| ds.expression.as_deref().map(RpnExpr::parse).transpose())
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            rrd,
            definition,
            computes,
            _file: file,
        })
    }

    /// Returns the definition stored in the file.
    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    /// Returns the path the database was opened from.
    pub fn path(&self) -> &str {
        self.rrd.path()
    }

    /// Returns the time of the last update.
    pub fn last_update(&self) -> u64 {
        self.rrd.last_update()
    }

    /// Applies one update.
    ///
    /// `readings` holds one raw value per data source in definition order;
    /// NaN marks an unknown reading. Values given for COMPUTE data sources
    /// are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::IllegalTime`] if `timestamp` is not after the
    /// last update, [`UpdateError::ValueCount`] if
    /// `readings` has the wrong length, or [`FileError::ReadOnly`] for a
    /// read-only handle.
    pub fn update(&mut self, timestamp: u64, readings: &[f64]) -> Result<()> {
        let expected = self.definition.data_sources.len();
        if readings.len() != expected {
            return Err(UpdateError::ValueCount {
                arg: timestamp.to_string(),
                expected,
                found: readings.len(),
            }
            .into());
        }

        consolidate::apply_update(
            &mut self.rrd,
            &self.definition,
            &self.computes,
            timestamp,
            readings,
        )
    }

    /// Returns the timestamp of the oldest row of archive `rra`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidArchive`] if `rra` is out of range.
    pub fn first(&self, rra: usize) -> Result<u64> {
        let archive = self
            .definition
            .archives
            .get(rra)
            .ok_or(FetchError::InvalidArchive {
                index: rra,
                count: self.definition.archives.len(),
            })?;

        let row_step = self.definition.archive_step(archive);
        let last = self.last_update();
        let end = last - last % row_step;
        Ok(end.saturating_sub(row_step * (u64::from(archive.rows) - 1)))
    }

    /// Returns a serializable summary of the definition and live state.
    pub fn info(&self) -> Info {
        let data_sources = self
            .definition
            .data_sources
            .iter()
            .enumerate()
            .map(|(i, ds)| {
                let prep = self.rrd.pdp_prep(i);
                DataSourceInfo {
                    name: ds.name.clone(),
                    kind: ds.kind.to_string(),
                    heartbeat: ds.heartbeat,
                    min: ds.min,
                    max: ds.max,
                    expression: ds.expression.clone(),
                    last_ds: prep.last_ds,
                    value: prep.scratch,
                    unknown_sec: prep.unknown_sec,
                }
            })
            .collect();

        let archives = self
            .definition
            .archives
            .iter()
            .enumerate()
            .map(|(r, archive)| ArchiveInfo {
                cf: archive.cf.to_string(),
                xff: archive.xff,
                pdp_per_row: archive.steps,
                rows: archive.rows,
                cur_row: self.rrd.cur_row(r),
                cdp_prep: (0..self.definition.data_sources.len())
                    .map(|ds| {
                        let prep = self.rrd.cdp_prep(r, ds);
                        CdpPrepInfo {
                            value: prep.value,
                            unknown_datapoints: prep.unknown_pdp,
                        }
                    })
                    .collect(),
            })
            .collect();

        Info {
            filename: self.path().to_string(),
            rrd_version: INFO_VERSION.to_string(),
            step: self.definition.step,
            last_update: self.last_update(),
            file_size: self.rrd.file_size(),
            data_sources,
            archives,
        }
    }

    /// Flushes pending writes to disk.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::Sync`] if the flush fails.
    pub fn sync(&self) -> Result<()> {
        self.rrd.sync()
    }

    pub(crate) fn file(&self) -> &RrdFile {
        &self.rrd
    }
}

fn lock(file: &File, path: &str, exclusive: bool) -> Result<()> {
    let result = if exclusive {
        file.lock()
    } else {
        file.lock_shared()
    };
    result.map_err(|e| {
        FileError::Lock {
            path: path.to_string(),
            source: e,
        }
        .into()
    })
}

/// Summary of a database, as reported by `rrdb info`.
#[derive(Debug, Clone, Serialize)]
pub struct Info {
    /// Path the database was opened from.
    pub filename: String,
    /// On-disk format version.
    pub rrd_version: String,
    /// Base step in seconds.
    pub step: u64,
    /// Time of the last update.
    pub last_update: u64,
    /// File size in bytes.
    pub file_size: usize,
    /// Data sources with their live state.
    pub data_sources: Vec<DataSourceInfo>,
    /// Archives with their row pointer and consolidation state.
    pub archives: Vec<ArchiveInfo>,
}

/// One data source in an [`Info`] summary.
#[derive(Debug, Clone, Serialize)]
pub struct DataSourceInfo {
    /// Data source name.
    pub name: String,
    /// Data source type, e.g. `GAUGE`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Heartbeat in seconds.
    pub heartbeat: u64,
    /// Lower bound, if any.
    pub min: Option<f64>,
    /// Upper bound, if any.
    pub max: Option<f64>,
    /// RPN expression of a COMPUTE data source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Last raw reading (NaN if unknown).
    pub last_ds: f64,
    /// Integral accumulated in the current step.
    pub value: f64,
    /// Unknown seconds in the current step.
    pub unknown_sec: u64,
}

/// One archive in an [`Info`] summary.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveInfo {
    /// Consolidation function, e.g. `AVERAGE`.
    pub cf: String,
    /// X-files factor.
    pub xff: f64,
    /// Primary data points per row.
    pub pdp_per_row: u32,
    /// Number of rows.
    pub rows: u32,
    /// Index of the newest row.
    pub cur_row: usize,
    /// Consolidation state per data source.
    pub cdp_prep: Vec<CdpPrepInfo>,
}

/// Consolidation state of one archive and data source.
#[derive(Debug, Clone, Serialize)]
pub struct CdpPrepInfo {
    /// Accumulated value (NaN if nothing is known yet).
    pub value: f64,
    /// Unknown primary data points in the current row.
    pub unknown_datapoints: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn definition() -> Definition {
        Definition::from_args(
            60,
            &[
                "DS:temp:GAUGE:120:U:U",
                "DS:hits:COUNTER:120:0:U",
                "RRA:AVERAGE:0.5:1:60",
                "RRA:MAX:0.5:5:12",
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("db.rrd");

        drop(Database::create(&path, &definition(), 6000, false).unwrap());
        let err = Database::create(&path, &definition(), 6000, false).unwrap_err();
        assert!(matches!(
            err,
            crate::error::RrdError::File(FileError::Exists { .. })
        ));

        let db = Database::create(&path, &definition(), 9000, true).unwrap();
        assert_eq!(db.last_update(), 9000);
    }

    #[test]
    fn test_update_persists_across_reopen() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("db.rrd");

        {
            let mut db = Database::create(&path, &definition(), 6000, false).unwrap();
            db.update(6060, &[20.0, 100.0]).unwrap();
            db.update(6120, &[22.0, 160.0]).unwrap();
            db.sync().unwrap();
        }

        let db = Database::open_read_only(&path).unwrap();
        assert_eq!(db.last_update(), 6120);
        assert_eq!(db.definition(), &definition());
        assert_eq!(db.file().read_value(0, 2, 0), 22.0);
        assert_eq!(db.file().read_value(0, 2, 1), 1.0);
    }

    #[test]
    fn test_update_value_count() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("db.rrd");
        let mut db = Database::create(&path, &definition(), 6000, false).unwrap();

        let err = db.update(6060, &[1.0]).unwrap_err();
        assert!(err.to_string().contains("expected 2 data source readings"));
    }

    #[test]
    fn test_read_only_handle_rejects_update() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("db.rrd");
        drop(Database::create(&path, &definition(), 6000, false).unwrap());

        let mut db = Database::open_read_only(&path).unwrap();
        assert!(db.update(6060, &[1.0, 1.0]).is_err());
    }

    #[test]
    fn test_readers_exclude_writers() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("db.rrd");
        drop(Database::create(&path, &definition(), 6000, false).unwrap());
        let other = File::options().read(true).write(true).open(&path).unwrap();

        let reader = Database::open_read_only(&path).unwrap();
        assert!(matches!(other.try_lock(), Err(std::fs::TryLockError::WouldBlock)));
        other.try_lock_shared().unwrap();
        other.unlock().unwrap();
        drop(reader);

        let writer = Database::open(&path).unwrap();
        assert!(matches!(other.try_lock_shared(), Err(std::fs::TryLockError::WouldBlock)));
        drop(writer);

        other.try_lock().unwrap();
    }

    #[test]
    fn test_first_and_info() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("db.rrd");
        let mut db = Database::create(&path, &definition(), 6000, false).unwrap();
        db.update(6060, &[1.0, 10.0]).unwrap();

        // 60 rows of 60s ending at 6060; 12 rows of 300s ending at 6000
        assert_eq!(db.first(0).unwrap(), 6060 - 59 * 60);
        assert_eq!(db.first(1).unwrap(), 6000 - 11 * 300);
        assert!(db.first(2).is_err());

        let info = db.info();
        assert_eq!(info.step, 60);
        assert_eq!(info.last_update, 6060);
        assert_eq!(info.data_sources[1].kind, "COUNTER");
        assert_eq!(info.data_sources[1].last_ds, 10.0);
        assert_eq!(info.archives[0].cur_row, 1);
        assert_eq!(info.archives[1].pdp_per_row, 5);

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["data_sources"][0]["type"], "GAUGE");
        assert!(json["data_sources"][0].get("expression").is_none());
    }
}
