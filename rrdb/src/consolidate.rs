//! Update engine: readings to primary data points to archive rows.
//!
//! Each update turns raw readings into per-second rates, integrates them
//! into the current step, and once a step boundary is crossed emits one
//! primary data point (PDP) per elapsed step. PDPs are then folded into
//! every archive's consolidation preparation; whenever an archive's row
//! interval closes, a consolidated data point (CDP) is written.
//!
//! # Consolidation Flow
//!
//! ```text
//! reading ─► rate ─► PDP (per step) ─┬─► RRA 0 (steps = 1)
//!                                    ├─► RRA 1 (steps = 12)
//!                                    └─► RRA 2 (steps = 288)
//! ```
//!
//! Rows are aligned to their own interval: a row of an archive with
//! `steps = k` always ends on a multiple of `k × step`.

use crate::definition::{Archive, DataSource, DataSourceKind, Definition};
use crate::error::{Result, UpdateError};
use crate::format::{CdpPrep, PdpPrep, RrdFile};
use crate::rpn::RpnExpr;

const WRAP_32: f64 = 4_294_967_296.0;
const WRAP_64: f64 = 18_446_744_073_709_551_616.0;

/// Computes the contribution of one reading to the current step's
/// integral.
///
/// Returns NaN when the reading is unknown, the gap exceeds the heartbeat,
/// a COUNTER or DERIVE has no previous reading, or the resulting rate is
/// outside the data source's bounds.
///
/// # Arguments
///
/// * `ds` - The data source the reading belongs to
/// * `value` - The raw reading (NaN if unknown)
/// * `last_ds` - The previous raw reading (NaN if unknown)
/// * `interval` - Seconds since the previous update, greater than zero
///
/// # Examples
///
/// ```rust
/// use rrdb::consolidate::pdp_increment;
/// use rrdb::definition::{DataSource, DataSourceKind};
///
/// let ds = DataSource::new("c", DataSourceKind::Counter, 600, None, None).unwrap();
/// // The counter wrapped at 2^32 between the two readings
/// assert_eq!(pdp_increment(&ds, 5.0, 4_294_967_290.0, 10), 11.0);
/// ```
#[allow(clippy::cast_precision_loss)] // Intervals are far below 2^52 seconds
pub fn pdp_increment(ds: &DataSource, value: f64, last_ds: f64, interval: u64) -> f64 {
    if value.is_nan() || interval > ds.heartbeat {
        return f64::NAN;
    }

    let increment = match ds.kind {
        DataSourceKind::Gauge => value * interval as f64,
        DataSourceKind::Absolute => value,
        DataSourceKind::Derive => value - last_ds,
        DataSourceKind::Counter => {
            let mut delta = value - last_ds;
            if delta < 0.0 {
                delta += WRAP_32;
            }
            if delta < 0.0 {
                delta += WRAP_64 - WRAP_32;
            }
            delta
        }
        DataSourceKind::Compute => f64::NAN,
    };
    if increment.is_nan() {
        return f64::NAN;
    }

    let rate = increment / interval as f64;
    let below = ds.min.is_some_and(|min| rate < min);
    let above = ds.max.is_some_and(|max| rate > max);
    if below || above {
        tracing::warn!("rate {rate} of {} is outside its range, stored as unknown", ds.name);
        return f64::NAN;
    }
    increment
}

/// Applies one update at time `t` to the file.
///
/// `readings` holds one raw value per data source, NaN for unknown and for
/// COMPUTE data sources. `computes` holds the compiled expression of each
/// COMPUTE data source, `None` for the others.
///
/// # Errors
///
/// Returns [`UpdateError::IllegalTime`] if `t` is not after the last
/// update, or an RPN error if a COMPUTE expression fails to evaluate.
pub(crate) fn apply_update(
    rrd: &mut RrdFile,
    definition: &Definition,
    computes: &[Option<RpnExpr>],
    t: u64,
    readings: &[f64],
) -> Result<()> {
    let last = rrd.last_update();
    if t <= last {
        return Err(UpdateError::IllegalTime {
            timestamp: t,
            last_update: last,
        }
        .into());
    }

    let step = definition.step;
    let interval = t - last;
    let proc_st = last - last % step;
    let occu_st = t - t % step;

    let mut preps: Vec<PdpPrep> = (0..definition.data_sources.len())
        .map(|ds| rrd.pdp_prep(ds))
        .collect();
    let increments: Vec<f64> = definition
        .data_sources
        .iter()
        .zip(preps.iter_mut())
        .zip(readings)
        .map(|((ds, prep), &value)| {
            let increment = pdp_increment(ds, value, prep.last_ds, interval);
            prep.last_ds = value;
            increment
        })
        .collect();

    if occu_st == proc_st {
        for (i, ds) in definition.data_sources.iter().enumerate() {
            if ds.kind == DataSourceKind::Compute {
                continue;
            }
            let prep = &mut preps[i];
            if increments[i].is_nan() {
                prep.unknown_sec += interval;
            } else {
                prep.scratch += increments[i];
            }
        }
        store_pdp_preps(rrd, &preps)?;
        return rrd.set_last_update(t);
    }

    let pdps = process_pdp(definition, computes, &mut preps, &increments, last, t)?;
    store_pdp_preps(rrd, &preps)?;

    let elapsed = (occu_st - proc_st) / step;
    tracing::trace!("update at {t} closed {elapsed} step(s)");
    for (index, archive) in definition.archives.iter().enumerate() {
        process_cdp(rrd, index, archive, proc_st / step, elapsed, &pdps)?;
    }

    rrd.set_last_update(t)
}

/// Closes the step(s) between the previous update and `t`, returning one
/// PDP rate per data source for all elapsed steps.
#[allow(clippy::cast_precision_loss)] // Second counts are far below 2^52
fn process_pdp(
    definition: &Definition,
    computes: &[Option<RpnExpr>],
    preps: &mut [PdpPrep],
    increments: &[f64],
    last: u64,
    t: u64,
) -> Result<Vec<f64>> {
    let step = definition.step;
    let interval = t - last;
    let proc_st = last - last % step;
    let occu_st = t - t % step;
    let span = occu_st - proc_st;
    let pre_int = occu_st - last;
    let post_int = t - occu_st;

    let mut pdps = vec![f64::NAN; definition.data_sources.len()];
    for (i, ds) in definition.data_sources.iter().enumerate() {
        if ds.kind == DataSourceKind::Compute {
            continue;
        }
        let prep = &mut preps[i];
        let increment = increments[i];
        let rate = increment / interval as f64;

        if increment.is_nan() {
            prep.unknown_sec += pre_int;
        } else {
            prep.scratch += rate * pre_int as f64;
        }

        pdps[i] = if interval > ds.heartbeat || prep.unknown_sec * 2 > span {
            f64::NAN
        } else {
            prep.scratch / (span - prep.unknown_sec) as f64
        };

        if increment.is_nan() {
            prep.scratch = 0.0;
            prep.unknown_sec = post_int;
        } else {
            prep.scratch = rate * post_int as f64;
            prep.unknown_sec = 0;
        }
    }

    // COMPUTE sources only reference earlier sources, so one ordered pass
    // sees every operand.
    for (i, expr) in computes.iter().enumerate() {
        if let Some(expr) = expr {
            let value = expr.eval(|name| definition.ds_index(name).map(|j| pdps[j]), occu_st)?;
            pdps[i] = value;
        }
    }

    Ok(pdps)
}

/// Folds `elapsed` copies of each PDP into archive `index`, writing every
/// row that closes.
fn process_cdp(
    rrd: &mut RrdFile,
    index: usize,
    archive: &Archive,
    pdp_index: u64,
    elapsed: u64,
    pdps: &[f64],
) -> Result<()> {
    let k = u64::from(archive.steps);
    let offset = k - pdp_index % k;

    if elapsed < offset {
        for (ds, &pdp) in pdps.iter().enumerate() {
            let prep = rrd.cdp_prep(index, ds);
            rrd.set_cdp_prep(index, ds, accumulate(archive, prep, pdp, elapsed))?;
        }
        return Ok(());
    }

    let completed = (elapsed - offset) / k + 1;
    let leftover = (elapsed - offset) % k;

    let first_row: Vec<f64> = pdps
        .iter()
        .enumerate()
        .map(|(ds, &pdp)| finish_row(archive, accumulate(archive, rrd.cdp_prep(index, ds), pdp, offset)))
        .collect();

    let rows = u64::from(archive.rows);
    let skipped = completed.saturating_sub(rows);
    let mut cur_row = (rrd.cur_row(index) as u64 + skipped) % rows;
    for n in skipped..completed {
        cur_row = (cur_row + 1) % rows;
        #[allow(clippy::cast_possible_truncation)] // Below the archive's u32 row count
        let row = cur_row as usize;
        for (ds, &pdp) in pdps.iter().enumerate() {
            // Rows after the first consist of this update's PDPs only
            let value = if n == 0 { first_row[ds] } else { pdp };
            rrd.write_value(index, row, ds, value)?;
        }
    }
    #[allow(clippy::cast_possible_truncation)]
    let cur_row = cur_row as usize;
    rrd.set_cur_row(index, cur_row)?;

    let empty = CdpPrep {
        value: f64::NAN,
        unknown_pdp: 0,
    };
    for (ds, &pdp) in pdps.iter().enumerate() {
        rrd.set_cdp_prep(index, ds, accumulate(archive, empty, pdp, leftover))?;
    }

    Ok(())
}

/// Adds `count` copies of a PDP to a CDP preparation.
fn accumulate(archive: &Archive, prep: CdpPrep, pdp: f64, count: u64) -> CdpPrep {
    if count == 0 {
        return prep;
    }
    if pdp.is_nan() {
        return CdpPrep {
            value: prep.value,
            unknown_pdp: prep.unknown_pdp + count,
        };
    }
    CdpPrep {
        value: archive.cf.accumulate(prep.value, pdp, count),
        unknown_pdp: prep.unknown_pdp,
    }
}

/// Turns a full CDP preparation into the row value, applying the xff.
#[allow(clippy::cast_precision_loss)] // PDP counts are far below 2^52
fn finish_row(archive: &Archive, prep: CdpPrep) -> f64 {
    let k = u64::from(archive.steps);
    if prep.unknown_pdp as f64 > k as f64 * archive.xff {
        return f64::NAN;
    }
    archive.cf.finish(prep.value, k - prep.unknown_pdp.min(k))
}

fn store_pdp_preps(rrd: &mut RrdFile, preps: &[PdpPrep]) -> Result<()> {
    for (ds, prep) in preps.iter().enumerate() {
        rrd.set_pdp_prep(ds, *prep)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;

    struct Fixture {
        _dir: tempfile::TempDir,
        rrd: RrdFile,
        definition: Definition,
        computes: Vec<Option<RpnExpr>>,
    }

    impl Fixture {
        fn new(args: &[&str], start: u64) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("engine.rrd");
            let file = OpenOptions::new()
                .create(true)
                .truncate(true)
                .read(true)
                .write(true)
                .open(&path)
                .unwrap();
            let definition = Definition::from_args(10, args).unwrap();
            let rrd = RrdFile::create(&file, "engine.rrd", &definition, start).unwrap();
            let computes = definition
                .data_sources
                .iter()
                .map(|ds| ds.expression.as_deref().map(|e| RpnExpr::parse(e).unwrap()))
                .collect();
            Self {
                _dir: dir,
                rrd,
                definition,
                computes,
            }
        }

        fn update(&mut self, t: u64, readings: &[f64]) -> Result<()> {
            apply_update(&mut self.rrd, &self.definition, &self.computes, t, readings)
        }

        fn row(&self, rra: usize, row: usize, ds: usize) -> f64 {
            self.rrd.read_value(rra, row, ds)
        }
    }

    #[test]
    fn test_pdp_increment_kinds() {
        let gauge = DataSource::new("g", DataSourceKind::Gauge, 20, None, None).unwrap();
        assert_eq!(pdp_increment(&gauge, 3.0, f64::NAN, 10), 30.0);
        assert!(pdp_increment(&gauge, 3.0, f64::NAN, 30).is_nan());
        assert!(pdp_increment(&gauge, f64::NAN, 1.0, 10).is_nan());

        let counter = DataSource::new("c", DataSourceKind::Counter, 20, Some(0.0), None).unwrap();
        assert_eq!(pdp_increment(&counter, 150.0, 100.0, 10), 50.0);
        assert!(pdp_increment(&counter, 150.0, f64::NAN, 10).is_nan());

        let derive = DataSource::new("d", DataSourceKind::Derive, 20, None, None).unwrap();
        assert_eq!(pdp_increment(&derive, 50.0, 100.0, 10), -50.0);

        let absolute = DataSource::new("a", DataSourceKind::Absolute, 20, None, Some(5.0)).unwrap();
        assert_eq!(pdp_increment(&absolute, 40.0, f64::NAN, 10), 40.0);
        // 60 per 10 seconds is above the maximum rate of 5
        assert!(pdp_increment(&absolute, 60.0, f64::NAN, 10).is_nan());
    }

    #[test]
    fn test_counter_wraps_at_64_bits() {
        let counter = DataSource::new("c", DataSourceKind::Counter, 20, None, None).unwrap();

        // Still negative after the 32-bit correction, so the counter wrapped
        // at 2^64: 2^33 counts up to the wrap and 2^32 after it
        let last = WRAP_64 - 2.0 * WRAP_32;
        assert_eq!(pdp_increment(&counter, WRAP_32, last, 10), 3.0 * WRAP_32);

        // A 32-bit wrap alone stops after the first correction
        assert_eq!(pdp_increment(&counter, 5.0, WRAP_32 - 5.0, 10), 10.0);
    }

    #[test]
    fn test_unknown_seconds_up_to_half_a_step() {
        let mut fx = Fixture::new(&["DS:a:GAUGE:20:U:U", "RRA:AVERAGE:0.5:1:10"], 1000);

        // 4 unknown seconds of 10: the PDP is the rate over the known 6
        fx.update(1004, &[f64::NAN]).unwrap();
        fx.update(1010, &[6.0]).unwrap();
        // 6 unknown seconds is more than half the step
        fx.update(1016, &[f64::NAN]).unwrap();
        fx.update(1020, &[3.0]).unwrap();
        // Exactly half is still known
        fx.update(1025, &[f64::NAN]).unwrap();
        fx.update(1030, &[2.0]).unwrap();

        assert_eq!(fx.row(0, 1, 0), 6.0);
        assert!(fx.row(0, 2, 0).is_nan());
        assert_eq!(fx.row(0, 3, 0), 2.0);
    }

    #[test]
    fn test_aligned_gauge_updates() {
        let mut fx = Fixture::new(
            &["DS:a:GAUGE:20:U:U", "RRA:AVERAGE:0.5:1:10", "RRA:MAX:0.5:3:5"],
            1000,
        );

        for (i, t) in (1010..=1050).step_by(10).enumerate() {
            fx.update(t, &[(i + 1) as f64]).unwrap();
        }

        // One PDP per step, in rows 1..=5
        assert_eq!(fx.rrd.cur_row(0), 5);
        for row in 1..=5 {
            assert_eq!(fx.row(0, row, 0), row as f64);
        }

        // MAX rows end at 1020 (one unknown PDP, within xff) and 1050
        assert_eq!(fx.rrd.cur_row(1), 2);
        assert_eq!(fx.row(1, 1, 0), 2.0);
        assert_eq!(fx.row(1, 2, 0), 5.0);
        assert_eq!(fx.rrd.last_update(), 1050);
    }

    #[test]
    fn test_sub_step_updates_integrate() {
        let mut fx = Fixture::new(&["DS:a:GAUGE:20:U:U", "RRA:AVERAGE:0.5:1:10"], 1000);

        fx.update(1005, &[2.0]).unwrap();
        fx.update(1010, &[4.0]).unwrap();
        assert_eq!(fx.row(0, 1, 0), 3.0);

        // The 1020 boundary falls inside the last update: 1010..1015 at 6
        // and 1015..1020 at 8
        fx.update(1015, &[6.0]).unwrap();
        fx.update(1025, &[8.0]).unwrap();
        assert_eq!(fx.row(0, 2, 0), 7.0);
    }

    #[test]
    fn test_heartbeat_gap_is_unknown() {
        let mut fx = Fixture::new(&["DS:a:GAUGE:20:U:U", "RRA:AVERAGE:0.5:1:20"], 1000);

        fx.update(1010, &[1.0]).unwrap();
        fx.update(1100, &[1.0]).unwrap();

        assert_eq!(fx.row(0, 1, 0), 1.0);
        for row in 2..=10 {
            assert!(fx.row(0, row, 0).is_nan());
        }
        assert_eq!(fx.rrd.cur_row(0), 10);
    }

    #[test]
    fn test_long_gap_wraps_archive() {
        let mut fx = Fixture::new(&["DS:a:GAUGE:1000:U:U", "RRA:AVERAGE:0.5:1:10"], 1000);

        fx.update(1010, &[1.0]).unwrap();
        fx.update(1260, &[7.0]).unwrap();

        // 25 rows completed in a 10-row archive: every row holds the newest PDP
        assert_eq!(fx.rrd.cur_row(0), 6);
        for row in 0..10 {
            assert_eq!(fx.row(0, row, 0), 7.0);
        }
    }

    #[test]
    fn test_xff_and_consolidation_functions() {
        let mut fx = Fixture::new(
            &[
                "DS:a:GAUGE:20:U:U",
                "RRA:AVERAGE:0.5:4:5",
                "RRA:MIN:0:4:5",
                "RRA:LAST:0.5:4:5",
            ],
            1000,
        );

        fx.update(1010, &[4.0]).unwrap();
        fx.update(1020, &[f64::NAN]).unwrap();
        fx.update(1030, &[8.0]).unwrap();
        fx.update(1040, &[6.0]).unwrap();

        // One unknown PDP of four: AVERAGE and LAST tolerate it, MIN with
        // xff 0 does not
        assert_eq!(fx.row(0, 1, 0), 6.0);
        assert!(fx.row(1, 1, 0).is_nan());
        assert_eq!(fx.row(2, 1, 0), 6.0);
    }

    #[test]
    fn test_counter_rates_and_compute() {
        let mut fx = Fixture::new(
            &[
                "DS:in:COUNTER:20:0:U",
                "DS:out:COUNTER:20:0:U",
                "DS:total:COMPUTE:in,out,+",
                "RRA:AVERAGE:0.5:1:10",
            ],
            1000,
        );

        fx.update(1010, &[100.0, 1000.0, f64::NAN]).unwrap();
        fx.update(1020, &[200.0, 1500.0, f64::NAN]).unwrap();

        // First update has no previous reading
        assert!(fx.row(0, 1, 0).is_nan());
        assert!(fx.row(0, 1, 2).is_nan());

        assert_eq!(fx.row(0, 2, 0), 10.0);
        assert_eq!(fx.row(0, 2, 1), 50.0);
        assert_eq!(fx.row(0, 2, 2), 60.0);
    }

    #[test]
    fn test_illegal_time() {
        let mut fx = Fixture::new(&["DS:a:GAUGE:20:U:U", "RRA:AVERAGE:0.5:1:10"], 1000);

        let err = fx.update(1000, &[1.0]).unwrap_err();
        assert!(err.to_string().contains("illegal attempt to update"));

        fx.update(1010, &[1.0]).unwrap();
        assert!(fx.update(1005, &[1.0]).is_err());
        assert_eq!(fx.rrd.last_update(), 1010);
    }
}
