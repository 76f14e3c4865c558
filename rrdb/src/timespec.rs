//! Time specifications for fetch and export ranges.
//!
//! Supports a small subset of the AT-style syntax:
//!
//! ```text
//! 1700000000        absolute seconds since the epoch
//! now | N           the current time
//! now-1h, now+30m   offset from now
//! -1d               offset from the other end of the range
//!                   (start: from end, end: from now)
//! end-2h, e-2h      start relative to end
//! start+6h, s+6h    end relative to start
//! ```
//!
//! Durations are integers with an optional unit (`s`, `m`, `h`, `d`, `w`)
//! and may be chained: `1h30m`.

use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Result, TimeSpecError};

/// A parsed time specification, not yet resolved against a clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSpec {
    /// Seconds since the epoch.
    Absolute(u64),
    /// Offset in seconds from the current time.
    Now(i64),
    /// Offset from the start of the range.
    Start(i64),
    /// Offset from the end of the range.
    End(i64),
    /// Offset from the other end of the range.
    Relative(i64),
}

impl FromStr for TimeSpec {
    type Err = TimeSpecError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let spec = s.trim();
        let invalid = |reason: &str| TimeSpecError::Invalid {
            spec: s.to_string(),
            reason: reason.to_string(),
        };

        if spec.is_empty() {
            return Err(invalid("empty"));
        }
        if spec == "now" || spec == "N" {
            return Ok(Self::Now(0));
        }
        if let Ok(t) = spec.parse::<u64>() {
            return Ok(Self::Absolute(t));
        }

        let anchors: [(&str, fn(i64) -> Self); 6] = [
            ("now", Self::Now),
            ("start", Self::Start),
            ("end", Self::End),
            ("s", Self::Start),
            ("e", Self::End),
            ("", Self::Relative),
        ];
        for (prefix, anchor) in anchors {
            if let Some(rest) = spec.strip_prefix(prefix)
                && (rest.starts_with('-') || rest.starts_with('+'))
            {
                let offset = parse_offset(rest).ok_or_else(|| invalid("bad offset"))?;
                return Ok(anchor(offset));
            }
        }

        Err(invalid("expected seconds, 'now', or an offset like 'now-1h'"))
    }
}

/// Parses a signed duration such as `-1h30m` into seconds.
fn parse_offset(s: &str) -> Option<i64> {
    let (sign, body) = match s.as_bytes().first()? {
        b'-' => (-1, &s[1..]),
        b'+' => (1, &s[1..]),
        _ => return None,
    };
    parse_duration(body).and_then(|secs| i64::try_from(secs).ok()).map(|secs| sign * secs)
}

/// Parses an unsigned duration such as `1h30m` or `300` into seconds.
///
/// # Examples
///
/// ```rust
/// use rrdb::timespec::parse_duration;
///
/// assert_eq!(parse_duration("90"), Some(90));
/// assert_eq!(parse_duration("1h30m"), Some(5400));
/// assert_eq!(parse_duration("2d"), Some(172_800));
/// assert_eq!(parse_duration("1x"), None);
/// ```
pub fn parse_duration(s: &str) -> Option<u64> {
    if s.is_empty() {
        return None;
    }

    let mut total: u64 = 0;
    let mut number = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            number.push(c);
            continue;
        }
        let multiplier = match c {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86_400,
            'w' => 604_800,
            _ => return None,
        };
        let n: u64 = number.parse().ok()?;
        total = total.checked_add(n.checked_mul(multiplier)?)?;
        number.clear();
    }
    if !number.is_empty() {
        total = total.checked_add(number.parse().ok()?)?;
    }
    Some(total)
}

/// Resolves a start/end pair against the given current time.
///
/// # Errors
///
/// Returns [`TimeSpecError::Invalid`] if the two specifications refer to
/// each other, a bound refers to itself, or an offset moves before the
/// epoch.
///
/// # Examples
///
/// ```rust
/// use rrdb::timespec::{TimeSpec, resolve_range};
///
/// let start: TimeSpec = "end-1h".parse().unwrap();
/// let end: TimeSpec = "now".parse().unwrap();
/// assert_eq!(resolve_range(start, end, 10_000).unwrap(), (6_400, 10_000));
/// ```
pub fn resolve_range(start: TimeSpec, end: TimeSpec, now: u64) -> Result<(u64, u64)> {
    let start = match start {
        TimeSpec::Relative(offset) => TimeSpec::End(offset),
        other => other,
    };
    let end = match end {
        TimeSpec::Relative(offset) => TimeSpec::Now(offset),
        other => other,
    };

    let fixed = |spec: TimeSpec| -> Result<u64> {
        match spec {
            TimeSpec::Absolute(t) => Ok(t),
            TimeSpec::Now(offset) => apply_offset(now, offset),
            _ => Err(cycle()),
        }
    };

    match (start, end) {
        (TimeSpec::Start(_), _) | (_, TimeSpec::End(_)) | (TimeSpec::End(_), TimeSpec::Start(_)) => {
            Err(cycle())
        }
        (start, TimeSpec::Start(offset)) => {
            let start = fixed(start)?;
            Ok((start, apply_offset(start, offset)?))
        }
        (TimeSpec::End(offset), end) => {
            let end = fixed(end)?;
            Ok((apply_offset(end, offset)?, end))
        }
        (start, end) => Ok((fixed(start)?, fixed(end)?)),
    }
}

fn apply_offset(base: u64, offset: i64) -> Result<u64> {
    base.checked_add_signed(offset).ok_or_else(|| {
        TimeSpecError::Invalid {
            spec: format!("{base}{offset:+}"),
            reason: "offset leaves the representable time range".to_string(),
        }
        .into()
    })
}

fn cycle() -> crate::error::RrdError {
    TimeSpecError::Invalid {
        spec: "start/end".to_string(),
        reason: "start and end refer to each other".to_string(),
    }
    .into()
}

/// Returns the current time in whole seconds since the epoch.
pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
