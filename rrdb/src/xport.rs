//! Exporting computed series from one or more databases.
//!
//! An export is described by statements:
//!
//! ```text
//! DEF:vname=path:ds:CF[:step=N]   fetch a data source
//! CDEF:vname=RPN                  compute a series from earlier ones
//! XPORT:vname[:legend]            emit a series as an output column
//! ```
//!
//! Every DEF is fetched and brought onto a common output step, the CDEFs
//! are evaluated row by row, and the XPORT columns are returned as a dense
//! `rows × columns` matrix.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use rrdb::definition::ConsolidationFn;
//! use rrdb::xport::Exporter;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut exporter = Exporter::new();
//! exporter
//!     .def("in", "traffic.rrd", "in", ConsolidationFn::Average)
//!     .def("out", "traffic.rrd", "out", ConsolidationFn::Average)
//!     .cdef("total", "in,out,+")
//!     .xport_def("total", "bytes/s");
//! let result = exporter.xport(1_700_000_000, 1_700_086_400, 300)?;
//! println!("{} rows at {}s", result.row_count(), result.step());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;

use crate::definition::ConsolidationFn;
use crate::error::{FetchError, Result, XportError};
use crate::fetch::{self, FetchResult};
use crate::rpn::{self, RpnExpr};
use crate::timespec::{self, TimeSpec};

/// Row limit used when none is given.
pub const DEFAULT_MAX_ROWS: usize = 400;

/// Default length of an export range: one day.
const DEFAULT_RANGE: i64 = 86_400;

/// Exported columns.
#[derive(Debug, Clone, PartialEq)]
pub struct XportResult {
    start: u64,
    end: u64,
    step: u64,
    legends: Vec<String>,
    values: Vec<f64>,
}

impl XportResult {
    /// Time the first row starts at (exclusive).
    pub fn start(&self) -> u64 {
        self.start
    }

    /// End of the exported range.
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Output step in seconds.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Column legends, in XPORT order.
    pub fn legends(&self) -> &[String] {
        &self.legends
    }

    /// Returns the legend of column `i`, if it exists.
    pub fn legend(&self, i: usize) -> Option<&str> {
        self.legends.get(i).map(String::as_str)
    }

    /// Number of rows.
    #[allow(clippy::cast_possible_truncation)] // Bounded by the values held in memory
    pub fn row_count(&self) -> usize {
        ((self.end - self.start) / self.step) as usize
    }

    /// Number of columns.
    pub fn column_count(&self) -> usize {
        self.legends.len()
    }

    /// All values, row-major: `values()[row * column_count + column]`.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Returns one value, or `None` if `column` or `row` is out of range.
    pub fn value_at(&self, column: usize, row: usize) -> Option<f64> {
        if column >= self.legends.len() {
            return None;
        }
        self.values.get(row * self.legends.len() + column).copied()
    }

    /// Returns the time row `row` ends at.
    pub fn timestamp(&self, row: usize) -> u64 {
        self.start + (row as u64 + 1) * self.step
    }

    /// Iterates over `(row end time, values)` pairs.
    pub fn iter_rows(&self) -> impl Iterator<Item = (u64, &[f64])> + '_ {
        let width = self.legends.len().max(1);
        self.values
            .chunks(width)
            .enumerate()
            .map(|(row, values)| (self.timestamp(row), values))
    }
}

#[derive(Debug, Clone)]
enum Statement {
    Def {
        vname: String,
        path: String,
        ds: String,
        cf: ConsolidationFn,
        step: Option<u64>,
    },
    Cdef {
        vname: String,
        expr: RpnExpr,
    },
    Xport {
        vname: String,
        legend: String,
    },
}

impl Statement {
    fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| XportError::InvalidStatement {
            statement: raw.to_string(),
            reason: reason.to_string(),
        };

        let (kind, rest) = raw
            .split_once(':')
            .ok_or_else(|| invalid("expected DEF, CDEF, or XPORT"))?;

        match kind {
            "DEF" => {
                let (vname, mut spec) = rest
                    .split_once('=')
                    .ok_or_else(|| invalid("expected vname=path:ds:CF"))?;

                // Options follow the CF; peel them off the right so the path
                // may contain ':'
                let mut step = None;
                while let Some((head, option)) = spec.rsplit_once(':')
                    && let Some((key, value)) = option.split_once('=')
                {
                    if key != "step" {
                        return Err(invalid(&format!("unknown option '{key}'")).into());
                    }
                    step = Some(
                        value
                            .parse::<u64>()
                            .ok()
                            .filter(|s| *s > 0)
                            .ok_or_else(|| invalid("step must be a positive integer"))?,
                    );
                    spec = head;
                }

                let mut fields = spec.rsplitn(3, ':');
                let (Some(cf), Some(ds), Some(path)) = (fields.next(), fields.next(), fields.next())
                else {
                    return Err(invalid("expected vname=path:ds:CF").into());
                };
                let cf = cf.parse::<ConsolidationFn>()?;
                if path.is_empty() || ds.is_empty() {
                    return Err(invalid("path and data source must not be empty").into());
                }
                Ok(Self::Def {
                    vname: checked_vname(vname, raw)?,
                    path: path.to_string(),
                    ds: ds.to_string(),
                    cf,
                    step,
                })
            }
            "CDEF" => {
                let (vname, expr) = rest
                    .split_once('=')
                    .ok_or_else(|| invalid("expected vname=RPN"))?;
                Ok(Self::Cdef {
                    vname: checked_vname(vname, raw)?,
                    expr: RpnExpr::parse(expr)?,
                })
            }
            "XPORT" => {
                let (vname, legend) = rest.split_once(':').unwrap_or((rest, ""));
                Ok(Self::Xport {
                    vname: checked_vname(vname, raw)?,
                    legend: legend.to_string(),
                })
            }
            _ => Err(invalid("expected DEF, CDEF, or XPORT").into()),
        }
    }
}

fn checked_vname(vname: &str, raw: &str) -> Result<String> {
    if rpn::valid_variable_name(vname) {
        Ok(vname.to_string())
    } else {
        Err(XportError::InvalidStatement {
            statement: raw.to_string(),
            reason: format!("invalid vname '{vname}'"),
        }
        .into())
    }
}

/// Builder for an export; each call appends one statement.
#[derive(Debug, Clone, Default)]
pub struct Exporter {
    max_rows: usize,
    args: Vec<String>,
}

impl Exporter {
    /// Creates an empty export.
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits the number of output rows; 0 restores the default of
    /// [`DEFAULT_MAX_ROWS`].
    pub fn set_max_rows(&mut self, max_rows: usize) -> &mut Self {
        self.max_rows = max_rows;
        self
    }

    /// Adds a `DEF` fetching data source `ds` of the database at `path`.
    pub fn def(&mut self, vname: &str, path: &str, ds: &str, cf: ConsolidationFn) -> &mut Self {
        self.args.push(format!("DEF:{vname}={path}:{ds}:{cf}"));
        self
    }

    /// Adds a `DEF` fetched at its own step.
    pub fn def_with_step(
        &mut self,
        vname: &str,
        path: &str,
        ds: &str,
        cf: ConsolidationFn,
        step: u64,
    ) -> &mut Self {
        self.args.push(format!("DEF:{vname}={path}:{ds}:{cf}:step={step}"));
        self
    }

    /// Adds a `CDEF` computed from earlier vnames.
    pub fn cdef(&mut self, vname: &str, rpn: &str) -> &mut Self {
        self.args.push(format!("CDEF:{vname}={rpn}"));
        self
    }

    /// Emits `vname` as an output column.
    pub fn xport_def(&mut self, vname: &str, legend: &str) -> &mut Self {
        self.args.push(format!("XPORT:{vname}:{legend}"));
        self
    }

    /// Runs the export over `[start, end]` with at least `step` seconds per
    /// row.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`xport`].
    pub fn xport(&self, start: u64, end: u64, step: u64) -> Result<XportResult> {
        let mut args = vec![
            "--start".to_string(),
            start.to_string(),
            "--end".to_string(),
            end.to_string(),
            "--step".to_string(),
            step.to_string(),
        ];
        if self.max_rows != 0 {
            args.push("--maxrows".to_string());
            args.push(self.max_rows.to_string());
        }
        args.extend(self.args.iter().cloned());
        xport(&args)
    }
}

/// Options and statements of one export.
#[derive(Debug)]
struct Request {
    start: TimeSpec,
    end: TimeSpec,
    step: u64,
    max_rows: usize,
    statements: Vec<Statement>,
}

impl Request {
    fn parse<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        let mut request = Self {
            start: TimeSpec::Relative(-DEFAULT_RANGE),
            end: TimeSpec::Now(0),
            step: 1,
            max_rows: DEFAULT_MAX_ROWS,
            statements: Vec::new(),
        };

        let mut args = args.iter().map(AsRef::as_ref).peekable();
        if args.peek() == Some(&"xport") {
            args.next();
        }

        while let Some(arg) = args.next() {
            if !arg.starts_with('-') {
                request.statements.push(Statement::parse(arg)?);
                continue;
            }

            let (option, inline) = match arg.split_once('=') {
                Some((option, value)) if option.starts_with("--") => (option, Some(value)),
                _ => (arg, None),
            };
            if option == "--daemon" || option == "-d" {
                return Err(invalid_option(option, "daemon connections are not supported"));
            }

            let value = match inline {
                Some(value) => value,
                None => args
                    .next()
                    .ok_or_else(|| invalid_option(option, "missing value"))?,
            };
            match option {
                "-s" | "--start" => request.start = value.parse()?,
                "-e" | "--end" => request.end = value.parse()?,
                "--step" => {
                    request.step = value
                        .parse()
                        .map_err(|_| invalid_option(option, "expected seconds"))?;
                }
                "-m" | "--maxrows" => {
                    request.max_rows = value
                        .parse()
                        .ok()
                        .filter(|rows| *rows > 0)
                        .ok_or_else(|| invalid_option(option, "expected a positive row count"))?;
                }
                _ => return Err(invalid_option(option, "unknown option")),
            }
        }

        Ok(request)
    }
}

fn invalid_option(option: &str, reason: &str) -> crate::error::RrdError {
    XportError::InvalidOption {
        option: option.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Runs an export described by command-line style arguments.
///
/// The first argument may be the command word `xport`. Options are
/// `-s/--start`, `-e/--end` (time specifications, defaulting to one day
/// ending now), `--step` and `-m/--maxrows`; everything else is a
/// statement.
///
/// # Errors
///
/// Returns [`XportError`] for invalid options or statements, unknown or
/// duplicate vnames, or a missing XPORT; [`FetchError`] or
/// [`FileError`](crate::error::FileError) if a DEF cannot be fetched; and
/// [`RpnError`](crate::error::RpnError) if a CDEF fails to evaluate.
///
/// # Examples
///
/// ```rust,no_run
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let result = rrdb::xport::xport(&[
///     "-s", "now-1h",
///     "DEF:load=load.rrd:load:AVERAGE",
///     "XPORT:load:load average",
/// ])?;
/// assert_eq!(result.legend(0), Some("load average"));
/// # Ok(())
/// # }
/// ```
pub fn xport<S: AsRef<str>>(args: &[S]) -> Result<XportResult> {
    let request = Request::parse(args)?;
    let (start, end) = timespec::resolve_range(request.start, request.end, timespec::now())?;
    run(&request.statements, start, end, request.step, request.max_rows)
}

/// Checks that every vname is defined once and before its use.
fn check_names(statements: &[Statement]) -> Result<()> {
    let mut defined: Vec<&str> = Vec::new();
    let mut exported = false;

    for statement in statements {
        match statement {
            Statement::Def { vname, .. } | Statement::Cdef { vname, .. } => {
                if let Statement::Cdef { expr, .. } = statement
                    && let Some(name) = expr.variables().find(|v| !defined.contains(v))
                {
                    return Err(XportError::UnknownVariable {
                        name: name.to_string(),
                    }
                    .into());
                }
                if defined.contains(&vname.as_str()) {
                    return Err(XportError::DuplicateVariable {
                        name: vname.clone(),
                    }
                    .into());
                }
                defined.push(vname);
            }
            Statement::Xport { vname, .. } => {
                if !defined.contains(&vname.as_str()) {
                    return Err(XportError::UnknownVariable {
                        name: vname.clone(),
                    }
                    .into());
                }
                exported = true;
            }
        }
    }

    if exported {
        Ok(())
    } else {
        Err(XportError::NothingToExport.into())
    }
}

fn run(
    statements: &[Statement],
    start: u64,
    end: u64,
    step: u64,
    max_rows: usize,
) -> Result<XportResult> {
    if start >= end {
        return Err(XportError::InvalidTimeRange { start, end }.into());
    }
    check_names(statements)?;

    let requested_step = step.max((end - start).div_ceil(max_rows.max(1) as u64)).max(1);

    // One fetch per (file, CF, step)
    let mut fetches: HashMap<(&str, ConsolidationFn, u64), FetchResult> = HashMap::new();
    for statement in statements {
        if let Statement::Def { path, cf, step, .. } = statement {
            let fetch_step = step.unwrap_or(requested_step);
            let key = (path.as_str(), *cf, fetch_step);
            if !fetches.contains_key(&key) {
                let result = fetch::fetch(path, *cf, start, end, fetch_step)?;
                fetches.insert(key, result);
            }
        }
    }

    let common = fetches.values().map(FetchResult::step).fold(1, lcm);
    let step = if common >= requested_step {
        Some(common)
    } else {
        requested_step.div_ceil(common).checked_mul(common)
    };
    let too_many = |step| FetchError::TooManyRows { start, end, step };
    let step = step.ok_or_else(|| too_many(common))?;
    let (start, end, rows) = fetch::aligned_rows(start, end, step).ok_or_else(|| too_many(step))?;
    // No trailing row past `end`
    let rows = rows - 1;

    // Series by vname, one value per output row
    let mut series: HashMap<&str, Vec<f64>> = HashMap::new();
    for statement in statements {
        match statement {
            Statement::Def {
                vname,
                path,
                ds,
                cf,
                step: def_step,
            } => {
                let key = (path.as_str(), *cf, def_step.unwrap_or(requested_step));
                let fetched = &fetches[&key];
                let index = fetched
                    .ds_names()
                    .iter()
                    .position(|name| name == ds)
                    .ok_or_else(|| FetchError::UnknownDataSource {
                        path: path.clone(),
                        name: ds.clone(),
                    })?;
                let column = (0..rows)
                    .map(|row| {
                        let row_start = start + row as u64 * step;
                        reduce(fetched, index, *cf, row_start, row_start + step)
                    })
                    .collect();
                series.insert(vname, column);
            }
            Statement::Cdef { vname, expr } => {
                let column = (0..rows)
                    .map(|row| {
                        let lookup = |name: &str| series.get(name).map(|values| values[row]);
                        expr.eval(lookup, start + (row as u64 + 1) * step)
                    })
                    .collect::<Result<Vec<_>>>()?;
                series.insert(vname, column);
            }
            Statement::Xport { .. } => {}
        }
    }

    let exports: Vec<(&str, &str)> = statements
        .iter()
        .filter_map(|statement| match statement {
            Statement::Xport { vname, legend } => Some((vname.as_str(), legend.as_str())),
            _ => None,
        })
        .collect();

    let mut values = Vec::with_capacity(rows * exports.len());
    for row in 0..rows {
        values.extend(
            exports
                .iter()
                .map(|(vname, _)| series.get(vname).map_or(f64::NAN, |column| column[row])),
        );
    }

    tracing::debug!(
        "exported {} column(s) x {rows} row(s) at {step}s from {} fetch(es)",
        exports.len(),
        fetches.len()
    );

    Ok(XportResult {
        start,
        end,
        step,
        legends: exports.iter().map(|(_, legend)| legend.to_string()).collect(),
        values,
    })
}

/// Consolidates the fetched rows ending in `(from, to]` with `cf`.
fn reduce(fetched: &FetchResult, ds: usize, cf: ConsolidationFn, from: u64, to: u64) -> f64 {
    let fetch_step = fetched.step();
    let samples: Vec<f64> = (from / fetch_step + 1..=to / fetch_step)
        .map(|n| fetched.value_at_time(ds, n * fetch_step))
        .collect();
    cf.apply(&samples)
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 { a } else { gcd(b, a % b) }
}

fn lcm(a: u64, b: u64) -> u64 {
    a / gcd(a, b) * b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create::create;
    use tempfile::{TempDir, tempdir};

    /// Step 10 with counter `cnt` rising 10/s and gauge `g` equal to i at
    /// step i, from 1010 to 1200.
    fn fixture() -> (TempDir, String) {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("x.rrd");
        create(
            &path,
            10,
            1000,
            &[
                "DS:cnt:COUNTER:20:U:U",
                "DS:g:GAUGE:20:U:U",
                "RRA:AVERAGE:0.5:1:100",
                "RRA:AVERAGE:0.5:5:100",
            ],
        )
        .unwrap();
        let args: Vec<String> = (0..=20)
            .map(|i| format!("{}:{}:{i}", 1000 + i * 10, 100 * i))
            .skip(1)
            .collect();
        crate::update::update(&path, None, &args).unwrap();
        let path = path.display().to_string();
        (temp_dir, path)
    }

    #[test]
    fn test_parse_def() {
        let Statement::Def { vname, path, ds, cf, step } =
            Statement::parse("DEF:a=/tmp/c:d.rrd:in:MAX:step=60").unwrap()
        else {
            panic!("expected DEF");
        };
        assert_eq!(vname, "a");
        assert_eq!(path, "/tmp/c:d.rrd");
        assert_eq!(ds, "in");
        assert_eq!(cf, ConsolidationFn::Max);
        assert_eq!(step, Some(60));

        assert!(matches!(
            Statement::parse("DEF:a=x.rrd:in:AVERAGE").unwrap(),
            Statement::Def { step: None, .. }
        ));
        assert!(Statement::parse("DEF:a=x.rrd:in").is_err());
        assert!(Statement::parse("DEF:a=x.rrd:in:MEDIAN").is_err());
        assert!(Statement::parse("DEF:a=x.rrd:in:MAX:step=0").is_err());
        assert!(Statement::parse("DEF:a b=x.rrd:in:MAX").is_err());
    }

    #[test]
    fn test_parse_cdef_and_xport() {
        assert!(matches!(
            Statement::parse("CDEF:sum=a,b,+").unwrap(),
            Statement::Cdef { .. }
        ));
        assert!(Statement::parse("CDEF:sum=a,b,bogus!").is_err());

        let Statement::Xport { vname, legend } = Statement::parse("XPORT:sum:a: total").unwrap()
        else {
            panic!("expected XPORT");
        };
        assert_eq!(vname, "sum");
        assert_eq!(legend, "a: total");

        assert!(matches!(
            Statement::parse("XPORT:sum").unwrap(),
            Statement::Xport { legend, .. } if legend.is_empty()
        ));
        assert!(Statement::parse("GPRINT:sum:AVERAGE").is_err());
    }

    #[test]
    fn test_parse_options() {
        let request = Request::parse(&[
            "xport",
            "-s",
            "1000",
            "--end=2000",
            "--step",
            "20",
            "-m",
            "50",
            "DEF:a=x.rrd:in:AVERAGE",
        ])
        .unwrap();
        assert_eq!(request.start, TimeSpec::Absolute(1000));
        assert_eq!(request.end, TimeSpec::Absolute(2000));
        assert_eq!(request.step, 20);
        assert_eq!(request.max_rows, 50);
        assert_eq!(request.statements.len(), 1);

        let request = Request::parse::<&str>(&[]).unwrap();
        assert_eq!(request.start, TimeSpec::Relative(-DEFAULT_RANGE));
        assert_eq!(request.max_rows, DEFAULT_MAX_ROWS);

        assert!(Request::parse(&["--daemon", "unix:/tmp/sock"]).is_err());
        assert!(Request::parse(&["--start"]).is_err());
        assert!(Request::parse(&["--bogus", "1"]).is_err());
        assert!(Request::parse(&["-m", "0"]).is_err());
    }

    #[test]
    fn test_check_names() {
        let statements = |raw: &[&str]| -> Vec<Statement> {
            raw.iter().map(|s| Statement::parse(s).unwrap()).collect()
        };

        assert!(check_names(&statements(&["DEF:a=x:d:AVERAGE", "XPORT:a"])).is_ok());

        let err = check_names(&statements(&["DEF:a=x:d:AVERAGE"])).unwrap_err();
        assert!(err.to_string().contains("nothing to do"));

        let err = check_names(&statements(&["DEF:a=x:d:AVERAGE", "XPORT:b"])).unwrap_err();
        assert!(err.to_string().contains("unknown variable 'b'"));

        let err = check_names(&statements(&["CDEF:c=a,1,+", "DEF:a=x:d:AVERAGE", "XPORT:c"]))
            .unwrap_err();
        assert!(err.to_string().contains("unknown variable 'a'"));

        let err = check_names(&statements(&[
            "DEF:a=x:d:AVERAGE",
            "CDEF:a=a,1,+",
            "XPORT:a",
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_lcm() {
        assert_eq!(lcm(1, 10), 10);
        assert_eq!(lcm(10, 15), 30);
        assert_eq!(lcm(60, 60), 60);
    }

    #[test]
    fn test_xport_sum() {
        let (_dir, path) = fixture();

        let mut exporter = Exporter::new();
        exporter
            .def("def1", &path, "cnt", ConsolidationFn::Average)
            .def("def2", &path, "g", ConsolidationFn::Average)
            .cdef("vdef1", "def1,def2,+")
            .xport_def("def1", "cnt")
            .xport_def("def2", "g")
            .xport_def("vdef1", "sum");
        let result = exporter.xport(1100, 1200, 10).unwrap();

        assert_eq!(result.step(), 10);
        assert_eq!(result.start(), 1100);
        assert_eq!(result.end(), 1200);
        assert_eq!(result.row_count(), 10);
        assert_eq!(result.column_count(), 3);
        assert_eq!(result.legends(), ["cnt", "g", "sum"]);
        assert_eq!(result.legend(2), Some("sum"));
        assert_eq!(result.legend(3), None);

        for row in 0..result.row_count() {
            let g = (11 + row) as f64;
            assert_eq!(result.value_at(0, row), Some(10.0));
            assert_eq!(result.value_at(1, row), Some(g));
            assert_eq!(result.value_at(2, row), Some(10.0 + g));
        }
        assert_eq!(result.timestamp(0), 1110);
        assert_eq!(result.values().len(), 30);
    }

    #[test]
    fn test_xport_coarse_step() {
        let (_dir, path) = fixture();

        // A 50s step selects the coarse archive
        let result = xport(&[
            "xport".to_string(),
            "--start".to_string(),
            "1000".to_string(),
            "--end".to_string(),
            "1200".to_string(),
            "--step".to_string(),
            "50".to_string(),
            format!("DEF:g={path}:g:AVERAGE"),
            "CDEF:t=TIME".to_string(),
            "XPORT:g:gauge".to_string(),
            "XPORT:t".to_string(),
        ])
        .unwrap();

        assert_eq!(result.step(), 50);
        assert_eq!(result.row_count(), 4);
        assert_eq!(result.value_at(0, 0), Some(3.0));
        assert_eq!(result.value_at(0, 3), Some(18.0));
        assert_eq!(result.value_at(1, 0), Some(1050.0));
        assert_eq!(result.legend(1), Some(""));
    }

    #[test]
    fn test_xport_reduces_fine_rows() {
        let (_dir, path) = fixture();

        // The fine archive covers the range, and its rows are averaged down
        let mut exporter = Exporter::new();
        exporter
            .def_with_step("g", &path, "g", ConsolidationFn::Average, 10)
            .xport_def("g", "g");
        let result = exporter.xport(1100, 1200, 50).unwrap();

        assert_eq!(result.step(), 50);
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.value_at(0, 0), Some(13.0));
        assert_eq!(result.value_at(0, 1), Some(18.0));
    }

    #[test]
    fn test_xport_max_rows() {
        let (_dir, path) = fixture();

        let mut exporter = Exporter::new();
        exporter
            .set_max_rows(2)
            .def("g", &path, "g", ConsolidationFn::Average)
            .xport_def("g", "g");
        let result = exporter.xport(1000, 1200, 1).unwrap();

        assert_eq!(result.step(), 100);
        assert_eq!(result.row_count(), 2);
    }

    #[test]
    fn test_xport_errors() {
        let (_dir, path) = fixture();

        let mut exporter = Exporter::new();
        exporter
            .def("x", &path, "missing", ConsolidationFn::Average)
            .xport_def("x", "x");
        let err = exporter.xport(1100, 1200, 10).unwrap_err();
        assert!(err.to_string().contains("no DS called 'missing'"));

        let err = Exporter::new().xport(1100, 1200, 10).unwrap_err();
        assert!(err.to_string().contains("nothing to do"));

        let mut exporter = Exporter::new();
        exporter
            .def("g", &path, "g", ConsolidationFn::Average)
            .xport_def("g", "g");
        assert!(exporter.xport(1200, 1100, 10).is_err());

        // A range too wide to align is an error, not an overflow
        let err = exporter.xport(0, u64::MAX, 1).unwrap_err();
        assert!(err.to_string().contains("too many rows"), "{err}");
    }
}
