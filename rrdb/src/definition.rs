//! Data source and archive definitions for rrdb databases.
//!
//! These types describe what a database stores: its data sources (DS), the
//! round-robin archives (RRA) that consolidate them, and the base step.
//! A [`Definition`] is fixed at creation time and persisted inside the file,
//! so it determines both the file layout and how updates are interpreted.
//!
//! Definitions are usually parsed from the classic textual forms:
//!
//! ```text
//! DS:name:GAUGE|COUNTER|DERIVE|ABSOLUTE:heartbeat:min:max
//! DS:name:COMPUTE:rpn-expression
//! RRA:AVERAGE|MIN|MAX|LAST:xff:steps:rows
//! ```

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DefinitionError, Result};
use crate::rpn::RpnExpr;

/// Maximum length of a data source name.
const MAX_DS_NAME_LEN: usize = 19;

/// Definition of a complete database: step, data sources, and archives.
///
/// # Example
///
/// ```rust
/// use rrdb::definition::Definition;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let def = Definition::from_args(60, &[
///     "DS:temp:GAUGE:120:-40:60",
///     "RRA:AVERAGE:0.5:1:1440",
///     "RRA:MAX:0.5:60:720",
/// ])?;
/// assert_eq!(def.data_sources.len(), 1);
/// assert_eq!(def.archives.len(), 2);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    /// Base interval in seconds between primary data points.
    pub step: u64,

    /// Data sources, in the order their values appear in updates.
    pub data_sources: Vec<DataSource>,

    /// Round-robin archives.
    pub archives: Vec<Archive>,
}

impl Definition {
    /// Builds a definition from a mixed list of `DS:` and `RRA:` arguments.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError`] for the first argument that fails to
    /// parse, or if the resulting definition does not validate.
    pub fn from_args<S: AsRef<str>>(step: u64, args: &[S]) -> Result<Self> {
        let mut data_sources = Vec::new();
        let mut archives = Vec::new();

        for arg in args {
            let arg = arg.as_ref();
            if arg.starts_with("DS:") {
                data_sources.push(DataSource::parse(arg)?);
            } else if arg.starts_with("RRA:") {
                archives.push(Archive::parse(arg)?);
            } else {
                return Err(DefinitionError::UnknownArgument {
                    arg: arg.to_string(),
                }
                .into());
            }
        }

        let definition = Self {
            step,
            data_sources,
            archives,
        };
        definition.validate()?;
        Ok(definition)
    }

    /// Validates the definition as a whole.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError`] if the step is zero, a list is empty, a
    /// name is duplicated, or a COMPUTE expression references a data source
    /// that is not defined before it.
    pub fn validate(&self) -> Result<()> {
        if self.step == 0 {
            return Err(DefinitionError::InvalidStep.into());
        }
        if self.data_sources.is_empty() {
            return Err(DefinitionError::NoDataSources.into());
        }
        if self.archives.is_empty() {
            return Err(DefinitionError::NoArchives.into());
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for ds in &self.data_sources {
            ds.validate()?;

            if let Some(expression) = &ds.expression {
                let expr = RpnExpr::parse(expression)?;
                for reference in expr.variables() {
                    if !seen.contains(reference) {
                        return Err(DefinitionError::UnknownComputeReference {
                            name: ds.name.clone(),
                            reference: reference.to_string(),
                        }
                        .into());
                    }
                }
            }

            if !seen.insert(&ds.name) {
                return Err(DefinitionError::DuplicateDataSource {
                    name: ds.name.clone(),
                }
                .into());
            }
        }

        for archive in &self.archives {
            archive.validate()?;
        }

        Ok(())
    }

    /// Returns the index of the data source with the given name.
    pub fn ds_index(&self, name: &str) -> Option<usize> {
        self.data_sources.iter().position(|ds| ds.name == name)
    }

    /// Returns the data source names in definition order.
    pub fn ds_names(&self) -> Vec<String> {
        self.data_sources.iter().map(|ds| ds.name.clone()).collect()
    }

    /// Returns the row interval of an archive in seconds.
    pub fn archive_step(&self, archive: &Archive) -> u64 {
        self.step * u64::from(archive.steps)
    }
}

/// Kind of a data source, determining how raw readings become rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataSourceKind {
    /// Readings are stored as-is (temperatures, queue lengths).
    Gauge,

    /// Readings are an ever-increasing counter; the rate is the delta per
    /// second, with 32/64-bit wrap correction.
    Counter,

    /// Like `Counter` but the delta may be negative and is not wrapped.
    Derive,

    /// Readings are the delta since the previous reading.
    Absolute,

    /// Value is computed from other data sources with an RPN expression.
    Compute,
}

impl FromStr for DataSourceKind {
    type Err = DefinitionError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "GAUGE" => Ok(Self::Gauge),
            "COUNTER" => Ok(Self::Counter),
            "DERIVE" => Ok(Self::Derive),
            "ABSOLUTE" => Ok(Self::Absolute),
            "COMPUTE" => Ok(Self::Compute),
            other => Err(DefinitionError::UnknownDataSourceType {
                kind: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for DataSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Gauge => "GAUGE",
            Self::Counter => "COUNTER",
            Self::Derive => "DERIVE",
            Self::Absolute => "ABSOLUTE",
            Self::Compute => "COMPUTE",
        };
        f.write_str(name)
    }
}

/// A single data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    /// Name, 1-19 characters of `[A-Za-z0-9_]`.
    pub name: String,

    /// How readings are interpreted.
    pub kind: DataSourceKind,

    /// Maximum seconds between updates before the value becomes unknown.
    /// Unused for `Compute`.
    pub heartbeat: u64,

    /// Lower bound for rates; rates below it become unknown.
    pub min: Option<f64>,

    /// Upper bound for rates; rates above it become unknown.
    pub max: Option<f64>,

    /// RPN expression for `Compute` data sources.
    pub expression: Option<String>,
}

impl DataSource {
    /// Creates a GAUGE, COUNTER, DERIVE, or ABSOLUTE data source.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError`] if the name, heartbeat, or bounds are
    /// invalid, or if `kind` is `Compute`.
    pub fn new(
        name: impl Into<String>,
        kind: DataSourceKind,
        heartbeat: u64,
        min: Option<f64>,
        max: Option<f64>,
    ) -> Result<Self> {
        let ds = Self {
            name: name.into(),
            kind,
            heartbeat,
            min,
            max,
            expression: None,
        };
        ds.validate()?;
        Ok(ds)
    }

    /// Creates a COMPUTE data source.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError`] if the name is invalid, or an RPN error
    /// if the expression does not compile.
    pub fn compute(name: impl Into<String>, expression: impl Into<String>) -> Result<Self> {
        let ds = Self {
            name: name.into(),
            kind: DataSourceKind::Compute,
            heartbeat: 0,
            min: None,
            max: None,
            expression: Some(expression.into()),
        };
        ds.validate()?;
        Ok(ds)
    }

    /// Parses a `DS:` argument.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::InvalidDataSource`] if the argument is
    /// malformed.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rrdb::definition::{DataSource, DataSourceKind};
    ///
    /// let ds = DataSource::parse("DS:eth0_in:COUNTER:600:0:U").unwrap();
    /// assert_eq!(ds.kind, DataSourceKind::Counter);
    /// assert_eq!(ds.heartbeat, 600);
    /// assert_eq!(ds.min, Some(0.0));
    /// assert_eq!(ds.max, None);
    /// ```
    pub fn parse(arg: &str) -> Result<Self> {
        let invalid = |reason: &str| DefinitionError::InvalidDataSource {
            arg: arg.to_string(),
            reason: reason.to_string(),
        };

        let rest = arg
            .strip_prefix("DS:")
            .ok_or_else(|| invalid("missing 'DS:' prefix"))?;

        // Only the first two ':' delimit fields; the kind decides how the
        // remainder is read.
        let mut parts = rest.splitn(3, ':');
        let name = parts.next().unwrap_or_default();
        let kind_str = parts.next().ok_or_else(|| invalid("missing type"))?;
        let params = parts.next().ok_or_else(|| invalid("missing parameters"))?;

        let kind: DataSourceKind = kind_str.parse()?;

        let ds = if kind == DataSourceKind::Compute {
            Self {
                name: name.to_string(),
                kind,
                heartbeat: 0,
                min: None,
                max: None,
                expression: Some(params.to_string()),
            }
        } else {
            let fields: Vec<&str> = params.split(':').collect();
            if fields.len() != 3 {
                return Err(invalid("expected heartbeat:min:max").into());
            }
            let heartbeat = fields[0]
                .parse::<u64>()
                .map_err(|_| invalid("heartbeat must be a positive integer"))?;
            let min = parse_bound(fields[1]).ok_or_else(|| invalid("min must be a number or U"))?;
            let max = parse_bound(fields[2]).ok_or_else(|| invalid("max must be a number or U"))?;
            Self {
                name: name.to_string(),
                kind,
                heartbeat,
                min,
                max,
                expression: None,
            }
        };

        ds.validate()?;
        Ok(ds)
    }

    /// Validates this data source on its own.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError`] if validation fails.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| DefinitionError::InvalidDataSource {
            arg: self.to_string(),
            reason,
        };

        if !valid_ds_name(&self.name) {
            return Err(invalid(format!(
                "name must be 1-{MAX_DS_NAME_LEN} characters [a-zA-Z0-9_]"
            ))
            .into());
        }

        match self.kind {
            DataSourceKind::Compute => {
                let Some(expression) = &self.expression else {
                    return Err(invalid("COMPUTE requires an RPN expression".to_string()).into());
                };
                RpnExpr::parse(expression)?;
            }
            _ => {
                if self.heartbeat == 0 {
                    return Err(invalid("heartbeat must be greater than zero".to_string()).into());
                }
                if let (Some(min), Some(max)) = (self.min, self.max)
                    && min >= max
                {
                    return Err(invalid(format!("min ({min}) must be less than max ({max})")).into());
                }
            }
        }

        Ok(())
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(expression) = &self.expression {
            return write!(f, "DS:{}:{}:{}", self.name, self.kind, expression);
        }
        write!(
            f,
            "DS:{}:{}:{}:{}:{}",
            self.name,
            self.kind,
            self.heartbeat,
            format_bound(self.min),
            format_bound(self.max)
        )
    }
}

/// Consolidation function used to build archive rows from primary data
/// points.
///
/// NaN is the unknown marker throughout: [`ConsolidationFn::apply`] ignores
/// it, and the incremental helpers treat a NaN accumulator as "nothing
/// accumulated yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsolidationFn {
    /// Arithmetic mean of the known values.
    Average,

    /// Minimum of the known values.
    Min,

    /// Maximum of the known values.
    Max,

    /// Most recent known value.
    Last,
}

impl ConsolidationFn {
    /// Consolidates a run of samples into one value.
    ///
    /// Only NaN counts as unknown and is skipped; infinities are real
    /// samples and take part. With no known sample the result is NaN.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rrdb::definition::ConsolidationFn;
    ///
    /// let samples = [6.0, f64::NAN, 3.0, 9.0, f64::NAN];
    /// assert_eq!(ConsolidationFn::Average.apply(&samples), 6.0);
    /// // A trailing unknown sample does not hide the last known one
    /// assert_eq!(ConsolidationFn::Last.apply(&samples), 9.0);
    ///
    /// assert_eq!(ConsolidationFn::Max.apply(&[1.0, f64::INFINITY]), f64::INFINITY);
    /// assert!(ConsolidationFn::Min.apply(&[f64::NAN]).is_nan());
    /// ```
    #[allow(clippy::cast_precision_loss)] // Sample counts are far below 2^52
    pub fn apply(self, values: &[f64]) -> f64 {
        let mut known = values.iter().copied().filter(|v| !v.is_nan()).peekable();
        if known.peek().is_none() {
            return f64::NAN;
        }

        match self {
            Self::Average => {
                let (sum, count) = known.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
                sum / count as f64
            }
            Self::Min => known.fold(f64::INFINITY, f64::min),
            Self::Max => known.fold(f64::NEG_INFINITY, f64::max),
            Self::Last => known.last().unwrap_or(f64::NAN),
        }
    }

    /// Folds `count` copies of a known primary value into an accumulator.
    ///
    /// For `Average` the accumulator holds a running sum; the other
    /// functions hold the current candidate value.
    #[allow(clippy::cast_precision_loss)] // PDP counts are far below 2^52
    pub fn accumulate(self, acc: f64, pdp: f64, count: u64) -> f64 {
        match self {
            Self::Average => {
                let add = pdp * count as f64;
                if acc.is_nan() { add } else { acc + add }
            }
            Self::Min => {
                if acc.is_nan() { pdp } else { acc.min(pdp) }
            }
            Self::Max => {
                if acc.is_nan() { pdp } else { acc.max(pdp) }
            }
            Self::Last => pdp,
        }
    }

    /// Seeds an accumulator with `count` copies of a primary value.
    ///
    /// Returns NaN when nothing is seeded.
    pub fn seed(self, pdp: f64, count: u64) -> f64 {
        if count == 0 || pdp.is_nan() {
            return f64::NAN;
        }
        self.accumulate(f64::NAN, pdp, count)
    }

    /// Turns an accumulator into the final row value, given how many of its
    /// primary values were known.
    #[allow(clippy::cast_precision_loss)] // PDP counts are far below 2^52
    pub fn finish(self, acc: f64, known: u64) -> f64 {
        match self {
            Self::Average if known > 0 => acc / known as f64,
            Self::Average => f64::NAN,
            _ => acc,
        }
    }
}

impl FromStr for ConsolidationFn {
    type Err = DefinitionError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "AVERAGE" => Ok(Self::Average),
            "MIN" => Ok(Self::Min),
            "MAX" => Ok(Self::Max),
            "LAST" => Ok(Self::Last),
            "HWPREDICT" | "MHWPREDICT" | "SEASONAL" | "DEVSEASONAL" | "DEVPREDICT"
            | "FAILURES" => Err(DefinitionError::UnsupportedConsolidationFn {
                cf: s.to_string(),
            }),
            other => Err(DefinitionError::UnknownConsolidationFn {
                cf: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ConsolidationFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Average => "AVERAGE",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Last => "LAST",
        };
        f.write_str(name)
    }
}

/// A round-robin archive: `rows` consolidated rows, each made of `steps`
/// primary data points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Archive {
    /// Consolidation function applied to the primary data points.
    pub cf: ConsolidationFn,

    /// Fraction of unknown primary data points a row may contain and still
    /// be known. Must be in `[0, 1)`.
    pub xff: f64,

    /// Primary data points per row.
    pub steps: u32,

    /// Number of rows kept.
    pub rows: u32,
}

impl Archive {
    /// Creates a new archive definition.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::InvalidArchive`] if the parameters are out
    /// of range.
    pub fn new(cf: ConsolidationFn, xff: f64, steps: u32, rows: u32) -> Result<Self> {
        let archive = Self {
            cf,
            xff,
            steps,
            rows,
        };
        archive.validate()?;
        Ok(archive)
    }

    /// Parses an `RRA:` argument.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError`] if the argument is malformed or uses an
    /// unsupported consolidation function.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rrdb::definition::{Archive, ConsolidationFn};
    ///
    /// let rra = Archive::parse("RRA:MAX:0.5:12:24").unwrap();
    /// assert_eq!(rra.cf, ConsolidationFn::Max);
    /// assert_eq!(rra.steps, 12);
    /// assert_eq!(rra.rows, 24);
    /// ```
    pub fn parse(arg: &str) -> Result<Self> {
        let invalid = |reason: &str| DefinitionError::InvalidArchive {
            arg: arg.to_string(),
            reason: reason.to_string(),
        };

        let rest = arg
            .strip_prefix("RRA:")
            .ok_or_else(|| invalid("missing 'RRA:' prefix"))?;
        let fields: Vec<&str> = rest.split(':').collect();
        // The function decides the layout of the remaining fields
        let cf: ConsolidationFn = fields[0].parse()?;
        if fields.len() != 4 {
            return Err(invalid("expected CF:xff:steps:rows").into());
        }

        let xff = fields[1]
            .parse::<f64>()
            .map_err(|_| invalid("xff must be a number"))?;
        let steps = fields[2]
            .parse::<u32>()
            .map_err(|_| invalid("steps must be a positive integer"))?;
        let rows = fields[3]
            .parse::<u32>()
            .map_err(|_| invalid("rows must be a positive integer"))?;

        let archive = Self {
            cf,
            xff,
            steps,
            rows,
        };
        archive.validate()?;
        Ok(archive)
    }

    /// Validates this archive definition.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::InvalidArchive`] if validation fails.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| DefinitionError::InvalidArchive {
            arg: self.to_string(),
            reason: reason.to_string(),
        };

        if !(0.0..1.0).contains(&self.xff) {
            return Err(invalid("xff must be in the range 0 <= xff < 1").into());
        }
        if self.steps == 0 {
            return Err(invalid("steps must be greater than zero").into());
        }
        if self.rows == 0 {
            return Err(invalid("rows must be greater than zero").into());
        }
        Ok(())
    }
}

impl fmt::Display for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RRA:{}:{}:{}:{}", self.cf, self.xff, self.steps, self.rows)
    }
}

fn valid_ds_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_DS_NAME_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parses a min/max bound; `U` means unbounded. Returns `None` on error.
fn parse_bound(s: &str) -> Option<Option<f64>> {
    if s == "U" {
        return Some(None);
    }
    s.parse::<f64>().ok().filter(|v| !v.is_nan()).map(Some)
}

fn format_bound(bound: Option<f64>) -> String {
    bound.map_or_else(|| "U".to_string(), |v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consolidation_functions() {
        let samples = [10.0, f64::NAN, -2.0, 4.0, f64::NAN];
        assert_eq!(ConsolidationFn::Average.apply(&samples), 4.0);
        assert_eq!(ConsolidationFn::Min.apply(&samples), -2.0);
        assert_eq!(ConsolidationFn::Max.apply(&samples), 10.0);
        assert_eq!(ConsolidationFn::Last.apply(&samples), 4.0);

        // Infinities are known values
        let unbounded = [f64::NEG_INFINITY, 1.0, f64::NAN];
        assert_eq!(ConsolidationFn::Min.apply(&unbounded), f64::NEG_INFINITY);
        assert_eq!(ConsolidationFn::Average.apply(&unbounded), f64::NEG_INFINITY);

        assert!(ConsolidationFn::Average.apply(&[f64::NAN, f64::NAN]).is_nan());
        assert!(ConsolidationFn::Last.apply(&[]).is_nan());
    }

    #[test]
    fn test_accumulate_and_finish() {
        let acc = ConsolidationFn::Average.seed(2.0, 3);
        assert_eq!(acc, 6.0);
        let acc = ConsolidationFn::Average.accumulate(acc, 4.0, 1);
        assert_eq!(ConsolidationFn::Average.finish(acc, 4), 2.5);

        let acc = ConsolidationFn::Min.accumulate(f64::NAN, 5.0, 2);
        assert_eq!(ConsolidationFn::Min.accumulate(acc, 3.0, 1), 3.0);

        assert!(ConsolidationFn::Max.seed(1.0, 0).is_nan());
        assert!(ConsolidationFn::Average.finish(f64::NAN, 0).is_nan());
    }

    #[test]
    fn test_parse_data_source() {
        let ds = DataSource::parse("DS:temp:GAUGE:600:-40:U").unwrap();
        assert_eq!(ds.name, "temp");
        assert_eq!(ds.kind, DataSourceKind::Gauge);
        assert_eq!(ds.min, Some(-40.0));
        assert_eq!(ds.max, None);
        assert_eq!(ds.to_string(), "DS:temp:GAUGE:600:-40:U");

        let ds = DataSource::parse("DS:total:COMPUTE:a,b,+").unwrap();
        assert_eq!(ds.kind, DataSourceKind::Compute);
        assert_eq!(ds.expression.as_deref(), Some("a,b,+"));

        assert!(DataSource::parse("DS:bad name:GAUGE:600:U:U").is_err());
        assert!(DataSource::parse("DS:x:GAUGE:0:U:U").is_err());
        assert!(DataSource::parse("DS:x:GAUGE:600:10:5").is_err());
        assert!(DataSource::parse("DS:x:SOMETHING:600:U:U").is_err());
        assert!(DataSource::parse("DS:x:GAUGE:600:U").is_err());
        assert!(DataSource::parse("DS:a_very_long_name_over_19:GAUGE:600:U:U").is_err());
    }

    #[test]
    fn test_parse_archive() {
        let rra = Archive::parse("RRA:AVERAGE:0.5:1:100").unwrap();
        assert_eq!(rra.cf, ConsolidationFn::Average);
        assert_eq!(rra.xff, 0.5);
        assert_eq!(rra.to_string(), "RRA:AVERAGE:0.5:1:100");

        assert!(Archive::parse("RRA:AVERAGE:1.0:1:100").is_err());
        assert!(Archive::parse("RRA:AVERAGE:0.5:0:100").is_err());
        assert!(Archive::parse("RRA:AVERAGE:0.5:1:0").is_err());

        let err = Archive::parse("RRA:HWPREDICT:1200:0.4:0.5:288").unwrap_err();
        assert_eq!(
            err.to_string(),
            "HWPREDICT is not supported: aberrant behavior archives are not implemented"
        );
        let err = Archive::parse("RRA:MEDIAN:0.5:1:10").unwrap_err();
        assert_eq!(err.to_string(), "unknown consolidation function 'MEDIAN'");
    }

    #[test]
    fn test_definition_validation() {
        let ok = Definition::from_args(
            10,
            &[
                "DS:a:GAUGE:20:U:U",
                "DS:b:GAUGE:20:U:U",
                "DS:sum:COMPUTE:a,b,+",
                "RRA:LAST:0:1:10",
            ],
        );
        assert!(ok.is_ok());

        assert!(Definition::from_args(10, &["RRA:LAST:0:1:10"]).is_err());
        assert!(Definition::from_args(10, &["DS:a:GAUGE:20:U:U"]).is_err());
        assert!(Definition::from_args(0, &["DS:a:GAUGE:20:U:U", "RRA:LAST:0:1:10"]).is_err());
        assert!(
            Definition::from_args(
                10,
                &["DS:a:GAUGE:20:U:U", "DS:a:GAUGE:20:U:U", "RRA:LAST:0:1:10"]
            )
            .is_err()
        );
        // COMPUTE must only reference earlier data sources
        assert!(
            Definition::from_args(
                10,
                &["DS:sum:COMPUTE:a,2,*", "DS:a:GAUGE:20:U:U", "RRA:LAST:0:1:10"]
            )
            .is_err()
        );
        assert!(Definition::from_args(10, &["--step", "RRA:LAST:0:1:10"]).is_err());
    }
}
