//! C ABI for create, update, fetch, and export.
//!
//! Every entry point returns NULL on success or a `malloc`-allocated,
//! NUL-terminated error message that the caller releases with `free`.
//! Result arrays handed back by [`rrdFetch`] and [`rrdXport`] are
//! `malloc`-allocated as well: each string separately, then the array of
//! pointers, then the value buffer.
//!
//! ```c
//! extern char *rrdCreate(const char *filename, unsigned long step, time_t start, int argc, const char **argv);
//! extern char *rrdUpdate(const char *filename, const char *template, int argc, const char **argv);
//! extern char *rrdFetch(int *ret, char *filename, const char *cf, time_t *start, time_t *end, unsigned long *step, unsigned long *ds_cnt, char ***ds_namv, double **data);
//! extern char *rrdXport(int *ret, int argc, char **argv, int *xsize, time_t *start, time_t *end, unsigned long *step, unsigned long *col_cnt, char ***legend_v, double **data);
//! extern char *arrayGetCString(char **values, int i);
//! ```

#![allow(non_snake_case)]

use std::alloc::{Layout, handle_alloc_error};
use std::ffi::CStr;
use std::ptr;

use libc::{c_char, c_int, c_ulong, time_t};

use crate::definition::ConsolidationFn;

/// Errors cross the boundary as their display text.
type FfiResult<T> = std::result::Result<T, String>;

/// Creates a database file, replacing any existing one.
///
/// # Safety
///
/// `filename` must be a valid NUL-terminated string and `argv` must point
/// to `argc` valid NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rrdCreate(
    filename: *const c_char,
    step: c_ulong,
    start: time_t,
    argc: c_int,
    argv: *const *const c_char,
) -> *mut c_char {
    // SAFETY: the caller guarantees the pointer contract documented above.
    let outcome = unsafe { create(filename, step, start, argc, argv) };
    error_or_null(outcome)
}

unsafe fn create(
    filename: *const c_char,
    step: c_ulong,
    start: time_t,
    argc: c_int,
    argv: *const *const c_char,
) -> FfiResult<()> {
    // SAFETY: forwarded from rrdCreate.
    let path = unsafe { c_str(filename, "filename") }?;
    // SAFETY: forwarded from rrdCreate.
    let args = unsafe { c_args(argc, argv) }?;
    let start = u64::try_from(start).map_err(|_| format!("invalid start time {start}"))?;

    crate::create::create(path, u64::from(step), start, &args).map_err(|e| e.to_string())
}

/// Applies update arguments to a database.
///
/// # Safety
///
/// `filename` must be a valid NUL-terminated string, `template` must be
/// NULL or a valid NUL-terminated string, and `argv` must point to `argc`
/// valid NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rrdUpdate(
    filename: *const c_char,
    template: *const c_char,
    argc: c_int,
    argv: *const *const c_char,
) -> *mut c_char {
    // SAFETY: the caller guarantees the pointer contract documented above.
    let outcome = unsafe { update(filename, template, argc, argv) };
    error_or_null(outcome)
}

unsafe fn update(
    filename: *const c_char,
    template: *const c_char,
    argc: c_int,
    argv: *const *const c_char,
) -> FfiResult<()> {
    // SAFETY: forwarded from rrdUpdate.
    let path = unsafe { c_str(filename, "filename") }?;
    let template = if template.is_null() {
        None
    } else {
        // SAFETY: non-null, and valid per rrdUpdate's contract.
        Some(unsafe { c_str(template, "template") }?)
    };
    // SAFETY: forwarded from rrdUpdate.
    let args = unsafe { c_args(argc, argv) }?;

    crate::update::update(path, template, &args).map_err(|e| e.to_string())
}

/// Reads consolidated rows from a database.
///
/// On input `*start`, `*end`, and `*step` hold the requested range and
/// step; on success they hold the range and step actually returned,
/// `*ds_cnt` the number of data sources, `*ds_namv` their names, and
/// `*data` `((end - start) / step + 1) * ds_cnt` values, row-major.
/// `*ret` is set to 0 on success and -1 on failure.
///
/// # Safety
///
/// `filename` and `cf` must be valid NUL-terminated strings; every other
/// pointer must be valid for writes (`ret` may be NULL).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rrdFetch(
    ret: *mut c_int,
    filename: *const c_char,
    cf: *const c_char,
    start: *mut time_t,
    end: *mut time_t,
    step: *mut c_ulong,
    ds_cnt: *mut c_ulong,
    ds_namv: *mut *mut *mut c_char,
    data: *mut *mut f64,
) -> *mut c_char {
    // SAFETY: the caller guarantees the pointer contract documented above.
    let outcome = unsafe { fetch(filename, cf, start, end, step, ds_cnt, ds_namv, data) };
    // SAFETY: `ret` is NULL or valid for writes.
    unsafe { set_status(ret, outcome.is_ok()) };
    error_or_null(outcome)
}

#[allow(clippy::too_many_arguments)]
unsafe fn fetch(
    filename: *const c_char,
    cf: *const c_char,
    start: *mut time_t,
    end: *mut time_t,
    step: *mut c_ulong,
    ds_cnt: *mut c_ulong,
    ds_namv: *mut *mut *mut c_char,
    data: *mut *mut f64,
) -> FfiResult<()> {
    // SAFETY: forwarded from rrdFetch.
    let path = unsafe { c_str(filename, "filename") }?;
    // SAFETY: forwarded from rrdFetch.
    let cf: ConsolidationFn = unsafe { c_str(cf, "cf") }?
        .parse()
        .map_err(|e: crate::error::DefinitionError| e.to_string())?;
    if [start, end].iter().any(|p| p.is_null())
        || step.is_null()
        || ds_cnt.is_null()
        || ds_namv.is_null()
        || data.is_null()
    {
        return Err("NULL output pointer".to_string());
    }

    // SAFETY: checked non-null above; valid per rrdFetch's contract.
    let (req_start, req_end, req_step) = unsafe { (*start, *end, *step) };
    let req_start = from_time(req_start)?;
    let req_end = from_time(req_end)?;

    let result = crate::fetch::fetch(path, cf, req_start, req_end, u64::from(req_step))
        .map_err(|e| e.to_string())?;

    let out_start = to_time(result.start())?;
    let out_end = to_time(result.end())?;
    let out_step = to_ulong(result.step())?;
    let out_count = to_ulong(result.ds_names().len() as u64)?;

    let names: Vec<*mut c_char> = result.ds_names().iter().map(|n| c_string(n)).collect();
    // SAFETY: checked non-null above; valid per rrdFetch's contract.
    unsafe {
        *start = out_start;
        *end = out_end;
        *step = out_step;
        *ds_cnt = out_count;
        *ds_namv = c_array(&names);
        *data = c_array(result.values());
    }
    Ok(())
}

/// Runs an export.
///
/// `argv[0]` is the command word and is skipped; the remaining arguments
/// are options and `DEF`/`CDEF`/`XPORT` statements. On success `*xsize`
/// holds the number of rows, `*start`, `*end`, and `*step` the exported
/// range, `*col_cnt` the number of columns, `*legend_v` their legends, and
/// `*data` `xsize * col_cnt` values, row-major. `*ret` is set to 0 on
/// success and -1 on failure.
///
/// # Safety
///
/// `argv` must point to `argc` valid NUL-terminated strings; every other
/// pointer must be valid for writes (`ret` may be NULL).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rrdXport(
    ret: *mut c_int,
    argc: c_int,
    argv: *mut *mut c_char,
    xsize: *mut c_int,
    start: *mut time_t,
    end: *mut time_t,
    step: *mut c_ulong,
    col_cnt: *mut c_ulong,
    legend_v: *mut *mut *mut c_char,
    data: *mut *mut f64,
) -> *mut c_char {
    // SAFETY: the caller guarantees the pointer contract documented above.
    let outcome =
        unsafe { xport(argc, argv, xsize, start, end, step, col_cnt, legend_v, data) };
    // SAFETY: `ret` is NULL or valid for writes.
    unsafe { set_status(ret, outcome.is_ok()) };
    error_or_null(outcome)
}

#[allow(clippy::too_many_arguments)]
unsafe fn xport(
    argc: c_int,
    argv: *mut *mut c_char,
    xsize: *mut c_int,
    start: *mut time_t,
    end: *mut time_t,
    step: *mut c_ulong,
    col_cnt: *mut c_ulong,
    legend_v: *mut *mut *mut c_char,
    data: *mut *mut f64,
) -> FfiResult<()> {
    // SAFETY: forwarded from rrdXport.
    let args = unsafe { c_args(argc, argv.cast_const().cast()) }?;
    if xsize.is_null()
        || [start, end].iter().any(|p| p.is_null())
        || [step, col_cnt].iter().any(|p| p.is_null())
        || legend_v.is_null()
        || data.is_null()
    {
        return Err("NULL output pointer".to_string());
    }

    let result =
        crate::xport::xport(args.get(1..).unwrap_or_default()).map_err(|e| e.to_string())?;

    let rows = c_int::try_from(result.row_count())
        .map_err(|_| format!("too many rows: {}", result.row_count()))?;
    let out_start = to_time(result.start())?;
    let out_end = to_time(result.end())?;
    let out_step = to_ulong(result.step())?;
    let out_count = to_ulong(result.column_count() as u64)?;

    let legends: Vec<*mut c_char> = result.legends().iter().map(|l| c_string(l)).collect();
    // SAFETY: checked non-null above; valid per rrdXport's contract.
    unsafe {
        *xsize = rows;
        *start = out_start;
        *end = out_end;
        *step = out_step;
        *col_cnt = out_count;
        *legend_v = c_array(&legends);
        *data = c_array(result.values());
    }
    Ok(())
}

/// Returns element `i` of a C string array.
///
/// # Safety
///
/// `values` must point to an array with more than `i` elements.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn arrayGetCString(values: *mut *mut c_char, i: c_int) -> *mut c_char {
    let Ok(i) = usize::try_from(i) else {
        return ptr::null_mut();
    };
    if values.is_null() {
        return ptr::null_mut();
    }
    // SAFETY: the caller guarantees `values` has more than `i` elements.
    unsafe { *values.add(i) }
}

/// Borrows a C string as `&str`.
///
/// # Safety
///
/// `ptr` must be NULL or a valid NUL-terminated string that outlives `'a`.
unsafe fn c_str<'a>(ptr: *const c_char, what: &str) -> FfiResult<&'a str> {
    if ptr.is_null() {
        return Err(format!("{what} is NULL"));
    }
    // SAFETY: non-null, and NUL-terminated per this function's contract.
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| format!("{what} is not valid UTF-8"))
}

/// Borrows an `argc`/`argv` pair as string slices.
///
/// # Safety
///
/// `argv` must point to `argc` valid NUL-terminated strings that outlive
/// `'a`. It may be NULL when `argc` is zero.
unsafe fn c_args<'a>(argc: c_int, argv: *const *const c_char) -> FfiResult<Vec<&'a str>> {
    let argc = usize::try_from(argc).map_err(|_| format!("invalid argument count {argc}"))?;
    if argc == 0 {
        return Ok(Vec::new());
    }
    if argv.is_null() {
        return Err("argv is NULL".to_string());
    }
    (0..argc)
        .map(|i| {
            // SAFETY: `i < argc`, and argv holds `argc` valid strings.
            unsafe { c_str(*argv.add(i), "argument") }
        })
        .collect()
}

/// Writes 0 or -1 through `ret` unless it is NULL.
///
/// # Safety
///
/// `ret` must be NULL or valid for writes.
unsafe fn set_status(ret: *mut c_int, ok: bool) {
    if !ret.is_null() {
        // SAFETY: non-null and writable per this function's contract.
        unsafe { *ret = if ok { 0 } else { -1 } };
    }
}

fn error_or_null(outcome: FfiResult<()>) -> *mut c_char {
    match outcome {
        Ok(()) => ptr::null_mut(),
        Err(message) => {
            tracing::debug!("C ABI call failed: {message}");
            c_string(&message)
        }
    }
}

fn from_time(t: time_t) -> FfiResult<u64> {
    u64::try_from(t).map_err(|_| format!("invalid time {t}"))
}

fn to_time(t: u64) -> FfiResult<time_t> {
    time_t::try_from(t).map_err(|_| format!("time {t} does not fit in time_t"))
}

fn to_ulong(n: u64) -> FfiResult<c_ulong> {
    c_ulong::try_from(n).map_err(|_| format!("{n} does not fit in unsigned long"))
}

/// Allocates `len` bytes with `malloc`, aborting if allocation fails.
fn malloc_bytes(len: usize) -> *mut u8 {
    let len = len.max(1);
    // SAFETY: malloc has no preconditions.
    let ptr = unsafe { libc::malloc(len) }.cast::<u8>();
    if ptr.is_null() {
        handle_alloc_error(Layout::from_size_align(len, 1).unwrap_or(Layout::new::<u8>()));
    }
    ptr
}

/// Copies `s` into a new `malloc`-allocated, NUL-terminated string.
fn c_string(s: &str) -> *mut c_char {
    let bytes = s.as_bytes();
    let ptr = malloc_bytes(bytes.len() + 1);
    // SAFETY: `ptr` holds `bytes.len() + 1` writable bytes that do not
    // overlap `bytes`.
    unsafe {
        ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
        ptr.add(bytes.len()).write(0);
    }
    ptr.cast()
}

/// Copies `items` into a new `malloc`-allocated array.
#[allow(clippy::cast_ptr_alignment)] // malloc aligns for any fundamental type
fn c_array<T: Copy>(items: &[T]) -> *mut T {
    let ptr = malloc_bytes(size_of_val(items)).cast::<T>();
    // SAFETY: `ptr` is suitably aligned and holds `items.len()` elements
    // that do not overlap `items`.
    unsafe { ptr::copy_nonoverlapping(items.as_ptr(), ptr, items.len()) };
    ptr
}
