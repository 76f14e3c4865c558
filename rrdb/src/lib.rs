//! # rrdb
//!
//! Round-robin database files with a C ABI.
//!
//! rrdb stores fixed-size time series in a single memory-mapped file per
//! database: readings are turned into rates, normalized to a fixed step,
//! and consolidated into archives of bounded size. Think rrdtool's file
//! model, with an API that can be called from Rust or through a C ABI.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Size is fixed at creation time by the archive definitions
//! - GAUGE, COUNTER, DERIVE, ABSOLUTE, and COMPUTE data sources
//! - AVERAGE, MIN, MAX, and LAST archives with an x-files factor
//! - Advisory file locks: one writer or many readers per file
//! - No background threads, no compaction
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rrdb::{ConsolidationFn, Exporter, create, fetch, update};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // One gauge, 60s step, a day of minutes and a month of hours
//! create("load.rrd", 60, 1_700_000_000, &[
//!     "DS:load:GAUGE:120:0:U",
//!     "RRA:AVERAGE:0.5:1:1440",
//!     "RRA:MAX:0.5:60:720",
//! ])?;
//!
//! update("load.rrd", None, &["1700000060:0.42", "1700000120:0.57"])?;
//!
//! let rows = fetch("load.rrd", ConsolidationFn::Average, 1_700_000_000, 1_700_000_120, 60)?;
//! for (timestamp, values) in rows.iter_rows() {
//!     println!("{timestamp}: {values:?}");
//! }
//!
//! let mut exporter = Exporter::new();
//! exporter
//!     .def("load", "load.rrd", "load", ConsolidationFn::Average)
//!     .cdef("pct", "load,100,*")
//!     .xport_def("pct", "load %");
//! let export = exporter.xport(1_700_000_000, 1_700_000_120, 60)?;
//! println!("{} columns", export.column_count());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Database`] - Locked, memory-mapped handle on one file
//! - [`Definition`] - Step, data sources, and archives of a database
//! - [`FetchResult`] - Rows read from one archive
//! - [`XportResult`] - Columns computed by an export
//!
//! ## Modules
//!
//! For lower-level access, the individual modules are also public:
//!
//! - [`create`](mod@create) - File creation and the [`Creator`] builder
//! - [`update`](mod@update) - Update arguments and the [`Updater`] builder
//! - [`fetch`](mod@fetch) - Archive selection and row reads
//! - [`xport`](mod@xport) - DEF/CDEF/XPORT evaluation and the [`Exporter`] builder
//! - [`database`] - Database handle, locking, and `info`
//! - [`definition`] - DS/RRA definitions and consolidation functions
//! - [`consolidate`] - PDP and CDP arithmetic
//! - [`format`] - Raw memory-mapped file format
//! - [`rpn`] - RPN expressions for COMPUTE and CDEF
//! - [`timespec`] - Time specifications such as `now-1h`
//! - [`ffi`] - C ABI
//! - [`error`] - Error types

pub mod consolidate;
pub mod create;
pub mod database;
pub mod definition;
pub mod error;
pub mod fetch;
pub mod ffi;
pub mod format;
pub mod rpn;
pub mod timespec;
pub mod update;
pub mod xport;

// Re-export primary API types at crate root for convenience.
pub use create::{Creator, create};
pub use database::{Database, Info};
pub use definition::{Archive, ConsolidationFn, DataSource, DataSourceKind, Definition};
pub use error::{Result, RrdError};
pub use fetch::{FetchResult, fetch};
pub use update::{Updater, update};
pub use xport::{Exporter, XportResult, xport};
