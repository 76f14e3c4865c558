//! Reading consolidated data back out of a database.
//!
//! A fetch picks one archive for the requested consolidation function and
//! time range and returns its rows as a dense `rows × data sources` matrix.
//! Archive selection works on each archive's retention window, the span
//! between its oldest and newest row:
//!
//! - **Full coverage** - among archives whose window contains the whole
//!   range, the one whose row step is closest to the requested step wins
//! - **Partial coverage** - otherwise the archive overlapping the range the
//!   most is used, and rows outside its window come back as NaN
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use rrdb::definition::ConsolidationFn;
//! use rrdb::fetch::fetch;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let result = fetch("load.rrd", ConsolidationFn::Average, 1_700_000_000, 1_700_003_600, 60)?;
//! for (timestamp, row) in result.iter_rows() {
//!     println!("{timestamp}: {row:?}");
//! }
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use crate::database::Database;
use crate::definition::ConsolidationFn;
use crate::error::{FetchError, Result};

/// Largest number of values (rows × data sources) a single fetch returns.
pub const MAX_FETCH_VALUES: usize = 1 << 27;

/// Rows read from one archive.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    start: u64,
    end: u64,
    step: u64,
    ds_names: Vec<String>,
    values: Vec<f64>,
}

impl FetchResult {
    /// Time the first row starts at (exclusive); row 0 ends at
    /// `start + step`.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// End of the fetched range, aligned to the step.
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Row interval of the archive the rows came from, in seconds.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Data source names, one per column.
    pub fn ds_names(&self) -> &[String] {
        &self.ds_names
    }

    /// Returns the name of data source `i`, if it exists.
    pub fn ds_name(&self, i: usize) -> Option<&str> {
        self.ds_names.get(i).map(String::as_str)
    }

    /// Number of rows.
    pub fn row_count(&self) -> usize {
        if self.ds_names.is_empty() {
            0
        } else {
            self.values.len() / self.ds_names.len()
        }
    }

    /// All values, row-major: `values()[row * ds_count + ds]`.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Returns one value, or `None` if `ds` or `row` is out of range.
    pub fn value_at(&self, ds: usize, row: usize) -> Option<f64> {
        if ds >= self.ds_names.len() {
            return None;
        }
        self.values.get(row * self.ds_names.len() + ds).copied()
    }

    /// Returns the time row `row` ends at.
    pub fn timestamp(&self, row: usize) -> u64 {
        self.start + (row as u64 + 1) * self.step
    }

    /// Returns the value of `ds` in the row covering `time`, or NaN if no
    /// row covers it.
    #[allow(clippy::cast_possible_truncation)] // Row index is bounded by row_count
    pub fn value_at_time(&self, ds: usize, time: u64) -> f64 {
        if time <= self.start {
            return f64::NAN;
        }
        let row = ((time - self.start).div_ceil(self.step) - 1) as usize;
        self.value_at(ds, row).unwrap_or(f64::NAN)
    }

    /// Iterates over `(row end time, values)` pairs.
    pub fn iter_rows(&self) -> impl Iterator<Item = (u64, &[f64])> + '_ {
        let width = self.ds_names.len().max(1);
        self.values
            .chunks(width)
            .enumerate()
            .map(|(row, values)| (self.timestamp(row), values))
    }
}

/// Reads consolidated rows for `[start, end]` from the database at `path`.
///
/// # Arguments
///
/// * `path` - The database file
/// * `cf` - Consolidation function of the archive to read
/// * `start` - Start of the range, seconds since the epoch
/// * `end` - End of the range
/// * `step` - Preferred row interval; the closest available one is used
///
/// # Errors
///
/// Returns [`FetchError::InvalidTimeRange`] unless `start < end`,
/// [`FetchError::NoMatchingArchive`] if no archive uses `cf`, or a
/// [`FileError`](crate::error::FileError) if the file cannot be read.
pub fn fetch<P: AsRef<Path>>(
    path: P,
    cf: ConsolidationFn,
    start: u64,
    end: u64,
    step: u64,
) -> Result<FetchResult> {
    let db = Database::open_read_only(path)?;
    fetch_from(&db, cf, start, end, step)
}

/// Reads consolidated rows from an open database.
///
/// # Errors
///
/// See [`fetch`].
pub fn fetch_from(
    db: &Database,
    cf: ConsolidationFn,
    start: u64,
    end: u64,
    step: u64,
) -> Result<FetchResult> {
    if start >= end {
        return Err(FetchError::InvalidTimeRange { start, end }.into());
    }

    let definition = db.definition();
    let rra = select_archive(db, cf, start, end, step)?;
    let archive = &definition.archives[rra];
    let row_step = definition.archive_step(archive);
    let (window_start, window_end) = archive_window(db.last_update(), row_step, archive.rows);

    let ds_count = definition.data_sources.len();
    let too_many = || FetchError::TooManyRows {
        start,
        end,
        step: row_step,
    };
    let (start, end, rows) = aligned_rows(start, end, row_step).ok_or_else(too_many)?;
    let total = rows
        .checked_mul(ds_count)
        .filter(|&total| total <= MAX_FETCH_VALUES)
        .ok_or_else(too_many)?;
    let archive_rows = archive.rows as usize;
    let cur_row = db.file().cur_row(rra);

    let mut values = Vec::new();
    values.try_reserve_exact(total).map_err(|_| too_many())?;
    for i in 0..rows {
        let t = start + (i as u64 + 1) * row_step;
        if t <= window_start || t > window_end {
            values.extend(std::iter::repeat_n(f64::NAN, ds_count));
            continue;
        }
        #[allow(clippy::cast_possible_truncation)] // Less than the archive's row count
        let back = ((window_end - t) / row_step) as usize;
        let row = (cur_row + archive_rows - back) % archive_rows;
        values.extend((0..ds_count).map(|ds| db.file().read_value(rra, row, ds)));
    }

    tracing::debug!(
        "fetched {rows} row(s) of {cf} from {} (rra {rra}, step {row_step}s)",
        db.path()
    );

    Ok(FetchResult {
        start,
        end,
        step: row_step,
        ds_names: definition.ds_names(),
        values,
    })
}

/// Aligns `start` down and `end` up to `step` and returns them with the
/// number of rows in between, or `None` if the range does not fit.
pub(crate) fn aligned_rows(start: u64, end: u64, step: u64) -> Option<(u64, u64, usize)> {
    let start = start - start % step;
    let end = end.div_ceil(step).checked_mul(step)?;
    let rows = ((end - start) / step).checked_add(1)?;
    Some((start, end, usize::try_from(rows).ok()?))
}

/// Picks the archive to read, see the module documentation.
fn select_archive(
    db: &Database,
    cf: ConsolidationFn,
    start: u64,
    end: u64,
    step: u64,
) -> Result<usize> {
    let definition = db.definition();
    let last_update = db.last_update();

    let mut best_full: Option<(usize, u64)> = None;
    let mut best_partial: Option<(usize, u64)> = None;

    for (i, archive) in definition.archives.iter().enumerate() {
        if archive.cf != cf {
            continue;
        }
        let row_step = definition.archive_step(archive);
        let window = archive_window(last_update, row_step, archive.rows);
        let (fully_covered, overlap) = analyze_coverage(window, start, end);

        if fully_covered {
            let distance = row_step.abs_diff(step);
            if best_full.is_none_or(|(_, best)| distance < best) {
                best_full = Some((i, distance));
            }
        } else if best_partial.is_none_or(|(_, best)| overlap > best) {
            best_partial = Some((i, overlap));
        }
    }

    best_full
        .or(best_partial)
        .map(|(i, _)| i)
        .ok_or_else(|| FetchError::NoMatchingArchive { cf: cf.to_string() }.into())
}

/// Returns `(oldest, newest)` of an archive: rows end in `(oldest, newest]`.
fn archive_window(last_update: u64, row_step: u64, rows: u32) -> (u64, u64) {
    let newest = last_update - last_update % row_step;
    (newest.saturating_sub(row_step * u64::from(rows)), newest)
}

/// Compares a requested range against an archive window.
///
/// Returns `(fully_covered, overlap)`: whether the window contains the whole
/// range, and how many seconds of the range it covers.
fn analyze_coverage(window: (u64, u64), start: u64, end: u64) -> (bool, u64) {
    let (oldest, newest) = window;
    let fully_covered = oldest <= start && newest >= end;
    let overlap = newest.min(end).saturating_sub(oldest.max(start));
    (fully_covered, overlap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create::create;
    use crate::error::RrdError;
    use tempfile::{TempDir, tempdir};

    /// A database with step 10, a fine archive of 10 rows and a coarse one of
    /// 10 rows of 50s, fed 1..=20 from 1010 to 1200.
    fn fixture() -> (TempDir, std::path::PathBuf) {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("f.rrd");
        create(
            &path,
            10,
            1000,
            &[
                "DS:g:GAUGE:20:U:U",
                "DS:twice:COMPUTE:g,2,*",
                "RRA:AVERAGE:0.5:1:10",
                "RRA:AVERAGE:0.5:5:10",
                "RRA:MAX:0.5:5:10",
            ],
        )
        .unwrap();

        let args: Vec<String> = (1..=20).map(|i| format!("{}:{i}", 1000 + i * 10)).collect();
        crate::update::update(&path, None, &args).unwrap();
        (temp_dir, path)
    }

    #[test]
    fn test_analyze_coverage() {
        assert_eq!(analyze_coverage((1000, 2000), 1200, 1800), (true, 600));
        assert_eq!(analyze_coverage((1000, 2000), 1000, 2000), (true, 1000));
        assert_eq!(analyze_coverage((1000, 2000), 500, 1500), (false, 500));
        assert_eq!(analyze_coverage((1000, 2000), 1500, 2500), (false, 500));
        assert_eq!(analyze_coverage((1000, 2000), 3000, 4000), (false, 0));
    }

    #[test]
    fn test_archive_window() {
        assert_eq!(archive_window(1205, 10, 10), (1100, 1200));
        assert_eq!(archive_window(1200, 50, 10), (700, 1200));
        assert_eq!(archive_window(30, 50, 10), (0, 0));
    }

    #[test]
    fn test_fetch_fine_archive() {
        let (_dir, path) = fixture();
        let result = fetch(&path, ConsolidationFn::Average, 1150, 1200, 10).unwrap();

        assert_eq!(result.step(), 10);
        assert_eq!(result.start(), 1150);
        assert_eq!(result.end(), 1200);
        assert_eq!(result.row_count(), 6);
        assert_eq!(result.ds_names(), ["g", "twice"]);
        assert_eq!(result.ds_name(1), Some("twice"));
        assert_eq!(result.ds_name(2), None);

        assert_eq!(result.timestamp(0), 1160);
        assert_eq!(result.value_at(0, 0), Some(16.0));
        assert_eq!(result.value_at(1, 0), Some(32.0));
        assert_eq!(result.value_at(0, 4), Some(20.0));
        // Row ending at 1210 is past the newest row
        assert!(result.value_at(0, 5).unwrap().is_nan());
        assert_eq!(result.value_at(2, 0), None);

        assert_eq!(result.value_at_time(0, 1155), 16.0);
        assert_eq!(result.value_at_time(0, 1160), 16.0);
        assert!(result.value_at_time(0, 1150).is_nan());

        let rows: Vec<_> = result.iter_rows().collect();
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[1], (1170, &[17.0, 34.0][..]));
    }

    #[test]
    fn test_fetch_prefers_covering_archive() {
        let (_dir, path) = fixture();

        // The fine archive only reaches back to 1100
        let result = fetch(&path, ConsolidationFn::Average, 1000, 1200, 10).unwrap();
        assert_eq!(result.step(), 50);
        assert_eq!(result.row_count(), 5);
        // (1..=5) averages to 3, (6..=10) to 8
        assert_eq!(result.value_at(0, 0), Some(3.0));
        assert_eq!(result.value_at(0, 1), Some(8.0));
        assert_eq!(result.value_at(0, 3), Some(18.0));

        let result = fetch(&path, ConsolidationFn::Max, 1000, 1200, 10).unwrap();
        assert_eq!(result.value_at(0, 0), Some(5.0));
        assert_eq!(result.value_at(1, 3), Some(40.0));
    }

    #[test]
    fn test_fetch_partial_coverage() {
        let (_dir, path) = fixture();

        // Nothing covers 0..1200 fully; the coarse archive overlaps more
        let result = fetch(&path, ConsolidationFn::Average, 0, 1200, 10).unwrap();
        assert_eq!(result.step(), 50);
        assert!(result.value_at(0, 0).unwrap().is_nan());
        assert_eq!(result.value_at_time(0, 1050), 3.0);
    }

    #[test]
    fn test_fetch_errors() {
        let (_dir, path) = fixture();

        let err = fetch(&path, ConsolidationFn::Average, 1200, 1200, 10).unwrap_err();
        assert!(err.to_string().contains("should be less than"));

        let err = fetch(&path, ConsolidationFn::Last, 1000, 1200, 10).unwrap_err();
        assert!(err.to_string().contains("CF (LAST)"));

        assert!(fetch(path.with_extension("missing"), ConsolidationFn::Average, 1, 2, 1).is_err());
    }

    #[test]
    fn test_aligned_rows() {
        assert_eq!(aligned_rows(1005, 1195, 50), Some((1000, 1200, 5)));
        assert_eq!(aligned_rows(1000, 1200, 10), Some((1000, 1200, 21)));
        assert_eq!(aligned_rows(0, u64::MAX, 50), None);
        assert_eq!(aligned_rows(0, u64::MAX, 1), None);
    }

    #[test]
    fn test_fetch_huge_range_is_an_error() {
        let (_dir, path) = fixture();

        for end in [u64::MAX, i64::MAX as u64] {
            let err = fetch(&path, ConsolidationFn::Average, 0, end, 1).unwrap_err();
            assert!(
                matches!(err, RrdError::Fetch(FetchError::TooManyRows { .. })),
                "end {end}: {err}"
            );
        }

        // Still fine right at the limit of what fits
        let result = fetch(&path, ConsolidationFn::Average, 0, 1_000_000, 10).unwrap();
        assert_eq!(result.row_count(), 20_001);
    }
}
