//! Feeding readings into a database.
//!
//! Update arguments have the form `timestamp:value[:value...]`, where the
//! timestamp is seconds since the epoch or `N` for now and each value is a
//! number or `U` for unknown. An optional template (`name:name...`) picks
//! the data sources the values belong to; without one, values map to every
//! non-COMPUTE data source in definition order.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::database::Database;
use crate::definition::{DataSourceKind, Definition};
use crate::error::{Result, UpdateError};
use crate::timespec;

/// Applies update arguments to the database at `path`, in order.
///
/// The whole call holds an exclusive lock. If an argument fails, the ones
/// before it stay applied.
///
/// # Errors
///
/// Returns [`UpdateError::NoArguments`] if `args` is empty, an
/// [`UpdateError`] for an invalid template or argument, or
/// [`UpdateError::IllegalTime`] if a timestamp is not after the previous
/// update.
///
/// # Examples
///
/// ```rust,no_run
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// rrdb::update::update("traffic.rrd", Some("out:in"), &["1700000060:20:10", "N:U:12"])?;
/// # Ok(())
/// # }
/// ```
pub fn update<P: AsRef<Path>, S: AsRef<str>>(
    path: P,
    template: Option<&str>,
    args: &[S],
) -> Result<()> {
    if args.is_empty() {
        return Err(UpdateError::NoArguments.into());
    }

    let mut db = Database::open(path)?;
    let targets = resolve_template(db.definition(), template)?;
    let ds_count = db.definition().data_sources.len();

    let result = args.iter().try_for_each(|arg| {
        let (timestamp, values) = parse_argument(arg.as_ref(), targets.len())?;
        let mut readings = vec![f64::NAN; ds_count];
        for (&ds, value) in targets.iter().zip(values) {
            readings[ds] = value;
        }
        db.update(timestamp, &readings)
    });

    db.sync()?;
    tracing::debug!("applied {} update(s) to {}", args.len(), db.path());
    result
}

/// Maps a template to data source indices.
fn resolve_template(definition: &Definition, template: Option<&str>) -> Result<Vec<usize>> {
    let Some(template) = template.filter(|t| !t.is_empty()) else {
        return Ok(definition
            .data_sources
            .iter()
            .enumerate()
            .filter(|(_, ds)| ds.kind != DataSourceKind::Compute)
            .map(|(i, _)| i)
            .collect());
    };

    let mut seen = HashSet::new();
    template
        .split(':')
        .map(|name| {
            let index = definition
                .ds_index(name)
                .ok_or_else(|| UpdateError::UnknownTemplateName {
                    name: name.to_string(),
                })?;
            if definition.data_sources[index].kind == DataSourceKind::Compute {
                return Err(UpdateError::ComputeInTemplate {
                    name: name.to_string(),
                }
                .into());
            }
            if !seen.insert(index) {
                return Err(UpdateError::DuplicateTemplateName {
                    name: name.to_string(),
                }
                .into());
            }
            Ok(index)
        })
        .collect()
}

/// Parses `timestamp:v1:v2...` into a timestamp and `expected` values.
fn parse_argument(arg: &str, expected: usize) -> Result<(u64, Vec<f64>)> {
    let invalid = |reason: &str| UpdateError::InvalidArgument {
        arg: arg.to_string(),
        reason: reason.to_string(),
    };

    let mut fields = arg.split(':');
    let time_field = fields.next().unwrap_or_default();
    let timestamp = if time_field == "N" {
        timespec::now()
    } else {
        time_field
            .parse::<u64>()
            .map_err(|_| invalid("timestamp must be seconds since the epoch or N"))?
    };

    let values = fields
        .map(|field| match field {
            "U" => Ok(f64::NAN),
            _ => field
                .parse::<f64>()
                .map_err(|_| invalid(&format!("'{field}' is not a number or U"))),
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if values.len() != expected {
        return Err(UpdateError::ValueCount {
            arg: arg.to_string(),
            expected,
            found: values.len(),
        }
        .into());
    }
    Ok((timestamp, values))
}

/// Batches update arguments for one database.
///
/// ```rust,no_run
/// use rrdb::update::Updater;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut updater = Updater::new("traffic.rrd");
/// updater.set_template(&["in", "out"]);
/// updater.cache(1_700_000_060, &[10.0, 20.0]);
/// updater.cache(1_700_000_120, &[12.0, f64::NAN]);
/// updater.update(1_700_000_180, &[15.0, 25.0])?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Updater {
    path: PathBuf,
    template: Option<String>,
    args: Vec<String>,
}

impl Updater {
    /// Creates an updater for the database at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            template: None,
            args: Vec::new(),
        }
    }

    /// Names the data sources that following values belong to. An empty
    /// list clears the template.
    pub fn set_template(&mut self, names: &[&str]) {
        self.template = if names.is_empty() {
            None
        } else {
            Some(names.join(":"))
        };
    }

    /// Queues an update; NaN values are sent as unknown.
    pub fn cache(&mut self, timestamp: u64, values: &[f64]) {
        self.args.push(format_argument(timestamp, values));
    }

    /// Sends the queued updates followed by this one.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`update`]. The queue is cleared either way.
    pub fn update(&mut self, timestamp: u64, values: &[f64]) -> Result<()> {
        self.cache(timestamp, values);
        self.flush()
    }

    /// Sends the queued updates. Does nothing if the queue is empty.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`update`]. The queue is cleared either way.
    pub fn flush(&mut self) -> Result<()> {
        if self.args.is_empty() {
            return Ok(());
        }
        let args = std::mem::take(&mut self.args);
        update(&self.path, self.template.as_deref(), &args)
    }

    /// Returns the number of queued updates.
    pub fn pending(&self) -> usize {
        self.args.len()
    }
}

fn format_argument(timestamp: u64, values: &[f64]) -> String {
    let mut arg = timestamp.to_string();
    for value in values {
        if value.is_nan() {
            arg.push_str(":U");
        } else {
            let _ = write!(arg, ":{value}");
        }
    }
    arg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create::create;
    use tempfile::tempdir;

    fn definition() -> Definition {
        Definition::from_args(
            10,
            &[
                "DS:a:GAUGE:20:U:U",
                "DS:b:GAUGE:20:U:U",
                "DS:sum:COMPUTE:a,b,+",
                "RRA:LAST:0.5:1:10",
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_parse_argument() {
        let (t, values) = parse_argument("1010:1.5:U", 2).unwrap();
        assert_eq!(t, 1010);
        assert_eq!(values[0], 1.5);
        assert!(values[1].is_nan());

        let (t, _) = parse_argument("N:1:2", 2).unwrap();
        assert!(t >= 1_600_000_000);

        assert!(parse_argument("1010:1", 2).is_err());
        assert!(parse_argument("soon:1:2", 2).is_err());
        assert!(parse_argument("1010:x:2", 2).is_err());
    }

    #[test]
    fn test_resolve_template() {
        let def = definition();
        assert_eq!(resolve_template(&def, None).unwrap(), [0, 1]);
        assert_eq!(resolve_template(&def, Some("")).unwrap(), [0, 1]);
        assert_eq!(resolve_template(&def, Some("b:a")).unwrap(), [1, 0]);
        assert_eq!(resolve_template(&def, Some("b")).unwrap(), [1]);

        assert!(resolve_template(&def, Some("c")).is_err());
        assert!(resolve_template(&def, Some("a:sum")).is_err());
        assert!(resolve_template(&def, Some("a:a")).is_err());
    }

    #[test]
    fn test_format_argument() {
        assert_eq!(format_argument(1010, &[1.5, f64::NAN, 3.0]), "1010:1.5:U:3");
    }

    #[test]
    fn test_update_with_template() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("u.rrd");
        create(
            &path,
            10,
            1000,
            &["DS:a:GAUGE:20:U:U", "DS:b:GAUGE:20:U:U", "RRA:LAST:0.5:1:10"],
        )
        .unwrap();

        update(&path, Some("b:a"), &["1010:2:1", "1020:4:3"]).unwrap();

        let db = Database::open_read_only(&path).unwrap();
        assert_eq!(db.last_update(), 1020);
        assert_eq!(db.file().read_value(0, 2, 0), 3.0);
        assert_eq!(db.file().read_value(0, 2, 1), 4.0);
    }

    #[test]
    fn test_failed_argument_keeps_earlier_ones() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("u.rrd");
        create(&path, 10, 1000, &["DS:a:GAUGE:20:U:U", "RRA:LAST:0.5:1:10"]).unwrap();

        let err = update(&path, None, &["1010:1", "1005:2"]).unwrap_err();
        assert!(err.to_string().contains("illegal attempt to update"));
        assert_eq!(Database::open_read_only(&path).unwrap().last_update(), 1010);

        assert!(update::<_, &str>(&path, None, &[]).is_err());
    }

    #[test]
    fn test_updater_cache_and_flush() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("u.rrd");
        create(&path, 10, 1000, &["DS:a:GAUGE:20:U:U", "RRA:LAST:0.5:1:10"]).unwrap();

        let mut updater = Updater::new(&path);
        updater.flush().unwrap();

        updater.cache(1010, &[1.0]);
        updater.cache(1020, &[2.0]);
        assert_eq!(updater.pending(), 2);
        updater.update(1030, &[3.0]).unwrap();
        assert_eq!(updater.pending(), 0);

        let db = Database::open_read_only(&path).unwrap();
        assert_eq!(db.last_update(), 1030);
        assert_eq!(db.file().read_value(0, 3, 0), 3.0);
    }
}
