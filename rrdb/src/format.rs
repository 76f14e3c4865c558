//! Memory-mapped on-disk format of an rrdb database.
//!
//! A database is a single file. All integers and floats are little-endian.
//!
//! # File Format
//!
//! ```text
//! [0..64)          Header
//! [64..64+D)       Definition (JSON, D bytes, padded to 8)
//! [..]             Live state, per DS:       last_ds f64, scratch f64, unknown_sec u64
//! [..]             Row pointers, per RRA:    cur_row u64
//! [..]             CDP preparation, per RRA x DS: value f64, unknown_pdp u64
//! [..]             Data, per RRA:            rows x ds_count f64, row-major
//! ```
//!
//! Header:
//!
//! ```text
//! [0..4)   magic "RRDB"
//! [4..8)   version u32
//! [8..16)  step u64
//! [16..20) ds_count u32
//! [20..24) rra_count u32
//! [24..28) definition length u32
//! [32..40) last_update u64
//! ```
//!
//! Access goes through bounds-checked byte slices; the layout is validated
//! once when the file is opened, so every accessor stays within the mapping.

use std::fs::File;

use memmap2::{Mmap, MmapMut};

use crate::definition::Definition;
use crate::error::{FileError, Result};

/// Magic bytes identifying an rrdb file.
const MAGIC: [u8; 4] = *b"RRDB";

/// Current format version.
const VERSION: u32 = 1;

/// Size of the header in bytes.
const HEADER_SIZE: usize = 64;

const STEP_OFFSET: usize = 8;
const DS_COUNT_OFFSET: usize = 16;
const RRA_COUNT_OFFSET: usize = 20;
const DEF_LEN_OFFSET: usize = 24;
const LAST_UPDATE_OFFSET: usize = 32;

/// Bytes of live state per data source.
const PDP_PREP_SIZE: usize = 24;

/// Bytes of CDP preparation per archive and data source.
const CDP_PREP_SIZE: usize = 16;

const VALUE_SIZE: usize = 8;

/// Live state of one data source between updates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdpPrep {
    /// Last raw reading, NaN if unknown. Used by COUNTER and DERIVE.
    pub last_ds: f64,
    /// Integral of the rate over the known seconds of the current step.
    pub scratch: f64,
    /// Unknown seconds accumulated in the current step.
    pub unknown_sec: u64,
}

/// Partially consolidated row of one archive and data source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CdpPrep {
    /// Accumulator for the consolidation function, NaN if nothing is known.
    pub value: f64,
    /// Unknown primary data points accumulated in the current row.
    pub unknown_pdp: u64,
}

/// Byte offsets of each region, derived from the definition.
#[derive(Debug, Clone)]
struct Layout {
    def_len: usize,
    pdp_prep_offset: usize,
    cur_row_offset: usize,
    cdp_prep_offset: usize,
    /// Start of each archive's data region.
    rra_offsets: Vec<usize>,
    ds_count: usize,
    rra_rows: Vec<usize>,
    file_size: usize,
}

impl Layout {
    fn new(definition: &Definition, def_len: usize) -> Self {
        let ds_count = definition.data_sources.len();
        let rra_count = definition.archives.len();

        let pdp_prep_offset = HEADER_SIZE + def_len.next_multiple_of(8);
        let cur_row_offset = pdp_prep_offset + ds_count * PDP_PREP_SIZE;
        let cdp_prep_offset = cur_row_offset + rra_count * VALUE_SIZE;

        let mut offset = cdp_prep_offset + rra_count * ds_count * CDP_PREP_SIZE;
        let mut rra_offsets = Vec::with_capacity(rra_count);
        let mut rra_rows = Vec::with_capacity(rra_count);
        for archive in &definition.archives {
            rra_offsets.push(offset);
            rra_rows.push(archive.rows as usize);
            offset += archive.rows as usize * ds_count * VALUE_SIZE;
        }

        Self {
            def_len,
            pdp_prep_offset,
            cur_row_offset,
            cdp_prep_offset,
            rra_offsets,
            ds_count,
            rra_rows,
            file_size: offset,
        }
    }

    fn pdp_prep(&self, ds: usize) -> usize {
        self.pdp_prep_offset + ds * PDP_PREP_SIZE
    }

    fn cur_row(&self, rra: usize) -> usize {
        self.cur_row_offset + rra * VALUE_SIZE
    }

    fn cdp_prep(&self, rra: usize, ds: usize) -> usize {
        self.cdp_prep_offset + (rra * self.ds_count + ds) * CDP_PREP_SIZE
    }

    fn value(&self, rra: usize, row: usize, ds: usize) -> usize {
        self.rra_offsets[rra] + (row * self.ds_count + ds) * VALUE_SIZE
    }
}

#[derive(Debug)]
enum Mapping {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

impl Mapping {
    fn bytes(&self) -> &[u8] {
        match self {
            Self::ReadOnly(m) => &m[..],
            Self::ReadWrite(m) => &m[..],
        }
    }
}

/// A memory-mapped rrdb file.
///
/// `RrdFile` does not lock; callers hold the appropriate file lock for as
/// long as the mapping is alive.
#[derive(Debug)]
pub struct RrdFile {
    mapping: Mapping,
    layout: Layout,
    definition: Definition,
    path: String,
}

impl RrdFile {
    /// Initializes a new database in `file`, which must be open for reading
    /// and writing.
    ///
    /// The live state is set up as if an update had happened at `start`:
    /// the seconds of the current step before `start` count as unknown, and
    /// each archive's first row is aligned to its own row interval.
    ///
    /// # Errors
    ///
    /// Returns [`FileError`] if the file cannot be resized or mapped, or if
    /// the definition cannot be serialized.
    pub fn create(file: &File, path: &str, definition: &Definition, start: u64) -> Result<Self> {
        let def_json = serde_json::to_vec(definition).map_err(|e| FileError::Definition {
            path: path.to_string(),
            source: e,
        })?;
        let layout = Layout::new(definition, def_json.len());

        file.set_len(layout.file_size as u64)
            .map_err(|e| FileError::Open {
                path: path.to_string(),
                source: e,
            })?;

        // SAFETY: The caller holds an exclusive lock on the file, so no other
        // rrdb process maps or truncates it while this mapping is alive.
        let mmap = unsafe {
            MmapMut::map_mut(file).map_err(|e| FileError::MemoryMap {
                path: path.to_string(),
                source: e,
            })?
        };

        let mut rrd = Self {
            mapping: Mapping::ReadWrite(mmap),
            layout,
            definition: definition.clone(),
            path: path.to_string(),
        };
        rrd.initialize(&def_json, start)?;
        Ok(rrd)
    }

    fn initialize(&mut self, def_json: &[u8], start: u64) -> Result<()> {
        let step = self.definition.step;
        let ds_count = self.definition.data_sources.len();
        let def_len = u32::try_from(def_json.len()).map_err(|_| self.corrupted("definition too large"))?;
        let header = [
            (DS_COUNT_OFFSET, u32::try_from(ds_count)),
            (RRA_COUNT_OFFSET, u32::try_from(self.definition.archives.len())),
            (DEF_LEN_OFFSET, Ok(def_len)),
        ];

        {
            let bytes = self.bytes_mut()?;
            bytes[..4].copy_from_slice(&MAGIC);
            put_u32(bytes, 4, VERSION);
            put_u64(bytes, STEP_OFFSET, step);
            put_u64(bytes, LAST_UPDATE_OFFSET, start);
            bytes[HEADER_SIZE..HEADER_SIZE + def_json.len()].copy_from_slice(def_json);
        }
        for (offset, value) in header {
            let value = value.map_err(|_| self.corrupted("too many data sources or archives"))?;
            put_u32(self.bytes_mut()?, offset, value);
        }

        let live = PdpPrep {
            last_ds: f64::NAN,
            scratch: 0.0,
            unknown_sec: start % step,
        };
        for ds in 0..ds_count {
            self.set_pdp_prep(ds, live)?;
        }

        let proc_start = start - start % step;
        for rra in 0..self.definition.archives.len() {
            let row_step = self.definition.archive_step(&self.definition.archives[rra]);
            let prep = CdpPrep {
                value: f64::NAN,
                unknown_pdp: (proc_start % row_step) / step,
            };
            self.set_cur_row(rra, 0)?;
            for ds in 0..ds_count {
                self.set_cdp_prep(rra, ds, prep)?;
            }
            for row in 0..self.layout.rra_rows[rra] {
                for ds in 0..ds_count {
                    self.write_value(rra, row, ds, f64::NAN)?;
                }
            }
        }

        Ok(())
    }

    /// Opens an existing database mapped from `file`.
    ///
    /// With `writable`, `file` must be open for reading and writing.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::Corrupted`] if the header, definition, or size
    /// do not describe a valid database, or [`FileError::MemoryMap`] if
    /// mapping fails.
    pub fn open(file: &File, path: &str, writable: bool) -> Result<Self> {
        let map_err = |e| FileError::MemoryMap {
            path: path.to_string(),
            source: e,
        };
        // SAFETY: The caller holds a lock on the file (shared for read-only,
        // exclusive for writable), so no rrdb writer resizes it under us.
        let mapping = unsafe {
            if writable {
                Mapping::ReadWrite(MmapMut::map_mut(file).map_err(map_err)?)
            } else {
                Mapping::ReadOnly(Mmap::map(file).map_err(map_err)?)
            }
        };

        let corrupted = |reason: String| FileError::Corrupted {
            path: path.to_string(),
            reason,
        };

        let bytes = mapping.bytes();
        if bytes.len() < HEADER_SIZE {
            return Err(corrupted(format!(
                "file too small: {} bytes, expected at least {HEADER_SIZE}",
                bytes.len()
            ))
            .into());
        }
        if bytes[..4] != MAGIC {
            return Err(corrupted(format!(
                "invalid magic bytes: expected {MAGIC:?}, found {:?}",
                &bytes[..4]
            ))
            .into());
        }
        let version = get_u32(bytes, 4);
        if version != VERSION {
            return Err(corrupted(format!(
                "unsupported version: expected {VERSION}, found {version}"
            ))
            .into());
        }

        let def_len = get_u32(bytes, DEF_LEN_OFFSET) as usize;
        let def_bytes = bytes
            .get(HEADER_SIZE..HEADER_SIZE + def_len)
            .ok_or_else(|| corrupted("truncated definition block".to_string()))?;
        let definition: Definition =
            serde_json::from_slice(def_bytes).map_err(|e| FileError::Definition {
                path: path.to_string(),
                source: e,
            })?;
        definition.validate()?;

        if get_u64(bytes, STEP_OFFSET) != definition.step
            || get_u32(bytes, DS_COUNT_OFFSET) as usize != definition.data_sources.len()
            || get_u32(bytes, RRA_COUNT_OFFSET) as usize != definition.archives.len()
        {
            return Err(corrupted("header does not match definition".to_string()).into());
        }

        let layout = Layout::new(&definition, def_len);
        if bytes.len() != layout.file_size {
            return Err(corrupted(format!(
                "file size mismatch: {} bytes, expected {}",
                bytes.len(),
                layout.file_size
            ))
            .into());
        }

        Ok(Self {
            mapping,
            layout,
            definition,
            path: path.to_string(),
        })
    }

    /// Returns the definition stored in the file.
    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    /// Returns the path this file was opened from.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the size of the file in bytes.
    pub fn file_size(&self) -> usize {
        self.layout.file_size
    }

    /// Returns the time of the last update.
    pub fn last_update(&self) -> u64 {
        get_u64(self.bytes(), LAST_UPDATE_OFFSET)
    }

    /// Sets the time of the last update.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::ReadOnly`] if the file was opened read-only.
    pub fn set_last_update(&mut self, timestamp: u64) -> Result<()> {
        put_u64(self.bytes_mut()?, LAST_UPDATE_OFFSET, timestamp);
        Ok(())
    }

    /// Returns the live state of data source `ds`.
    pub fn pdp_prep(&self, ds: usize) -> PdpPrep {
        let offset = self.layout.pdp_prep(ds);
        let bytes = self.bytes();
        PdpPrep {
            last_ds: get_f64(bytes, offset),
            scratch: get_f64(bytes, offset + 8),
            unknown_sec: get_u64(bytes, offset + 16),
        }
    }

    /// Stores the live state of data source `ds`.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::ReadOnly`] if the file was opened read-only.
    pub fn set_pdp_prep(&mut self, ds: usize, prep: PdpPrep) -> Result<()> {
        let offset = self.layout.pdp_prep(ds);
        let bytes = self.bytes_mut()?;
        put_f64(bytes, offset, prep.last_ds);
        put_f64(bytes, offset + 8, prep.scratch);
        put_u64(bytes, offset + 16, prep.unknown_sec);
        Ok(())
    }

    /// Returns the index of the most recently written row of archive `rra`.
    #[allow(clippy::cast_possible_truncation)] // Bounded by the archive's u32 row count
    pub fn cur_row(&self, rra: usize) -> usize {
        get_u64(self.bytes(), self.layout.cur_row(rra)) as usize
    }

    /// Stores the index of the most recently written row of archive `rra`.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::ReadOnly`] if the file was opened read-only.
    pub fn set_cur_row(&mut self, rra: usize, row: usize) -> Result<()> {
        let offset = self.layout.cur_row(rra);
        put_u64(self.bytes_mut()?, offset, row as u64);
        Ok(())
    }

    /// Returns the CDP preparation of archive `rra` and data source `ds`.
    pub fn cdp_prep(&self, rra: usize, ds: usize) -> CdpPrep {
        let offset = self.layout.cdp_prep(rra, ds);
        let bytes = self.bytes();
        CdpPrep {
            value: get_f64(bytes, offset),
            unknown_pdp: get_u64(bytes, offset + 8),
        }
    }

    /// Stores the CDP preparation of archive `rra` and data source `ds`.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::ReadOnly`] if the file was opened read-only.
    pub fn set_cdp_prep(&mut self, rra: usize, ds: usize, prep: CdpPrep) -> Result<()> {
        let offset = self.layout.cdp_prep(rra, ds);
        let bytes = self.bytes_mut()?;
        put_f64(bytes, offset, prep.value);
        put_u64(bytes, offset + 8, prep.unknown_pdp);
        Ok(())
    }

    /// Reads one consolidated value.
    ///
    /// # Panics
    ///
    /// Panics if `rra`, `row`, or `ds` is out of range.
    pub fn read_value(&self, rra: usize, row: usize, ds: usize) -> f64 {
        get_f64(self.bytes(), self.layout.value(rra, row, ds))
    }

    /// Writes one consolidated value.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::ReadOnly`] if the file was opened read-only.
    ///
    /// # Panics
    ///
    /// Panics if `rra`, `row`, or `ds` is out of range.
    pub fn write_value(&mut self, rra: usize, row: usize, ds: usize, value: f64) -> Result<()> {
        let offset = self.layout.value(rra, row, ds);
        put_f64(self.bytes_mut()?, offset, value);
        Ok(())
    }

    /// Flushes the mapping to disk.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::Sync`] if the flush fails.
    pub fn sync(&self) -> Result<()> {
        match &self.mapping {
            Mapping::ReadOnly(_) => Ok(()),
            Mapping::ReadWrite(m) => m.flush().map_err(|e| {
                FileError::Sync {
                    path: self.path.clone(),
                    source: e,
                }
                .into()
            }),
        }
    }

    fn bytes(&self) -> &[u8] {
        self.mapping.bytes()
    }

    fn bytes_mut(&mut self) -> Result<&mut [u8]> {
        match &mut self.mapping {
            Mapping::ReadWrite(m) => Ok(&mut m[..]),
            Mapping::ReadOnly(_) => Err(FileError::ReadOnly {
                path: self.path.clone(),
            }
            .into()),
        }
    }

    fn corrupted(&self, reason: &str) -> FileError {
        FileError::Corrupted {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

fn get_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

fn get_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

fn get_f64(bytes: &[u8], offset: usize) -> f64 {
    f64::from_bits(get_u64(bytes, offset))
}

fn put_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_u64(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

fn put_f64(bytes: &mut [u8], offset: usize, value: f64) {
    put_u64(bytes, offset, value.to_bits());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, OpenOptions};

    fn definition() -> Definition {
        Definition::from_args(
            10,
            &[
                "DS:a:GAUGE:20:U:U",
                "DS:b:COUNTER:20:0:U",
                "RRA:AVERAGE:0.5:1:5",
                "RRA:MAX:0.5:3:4",
            ],
        )
        .unwrap()
    }

    fn open_rw(path: &std::path::Path) -> File {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .unwrap()
    }

    #[test]
    fn test_layout() {
        let def = definition();
        let layout = Layout::new(&def, 100);

        // Definition padded from 100 to 104 bytes
        assert_eq!(layout.pdp_prep_offset, 64 + 104);
        assert_eq!(layout.cur_row_offset, 168 + 2 * 24);
        assert_eq!(layout.cdp_prep_offset, 216 + 2 * 8);
        assert_eq!(layout.rra_offsets[0], 232 + 2 * 2 * 16);
        assert_eq!(layout.rra_offsets[1], 296 + 5 * 2 * 8);
        assert_eq!(layout.file_size, 376 + 4 * 2 * 8);

        assert_eq!(layout.value(1, 2, 1), 376 + (2 * 2 + 1) * 8);
    }

    #[test]
    fn test_create_initial_state() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("init.rrd");
        let file = open_rw(&path);

        // 1007 is 7 seconds into a step; 1000 is 10 steps into the MAX row of 30s
        let rrd = RrdFile::create(&file, "init.rrd", &definition(), 1007).unwrap();

        assert_eq!(rrd.last_update(), 1007);
        let live = rrd.pdp_prep(1);
        assert!(live.last_ds.is_nan());
        assert_eq!(live.scratch, 0.0);
        assert_eq!(live.unknown_sec, 7);

        assert_eq!(rrd.cdp_prep(0, 0).unknown_pdp, 0);
        assert_eq!(rrd.cdp_prep(1, 1).unknown_pdp, 1);
        assert!(rrd.cdp_prep(1, 1).value.is_nan());

        assert_eq!(rrd.cur_row(0), 0);
        assert!(rrd.read_value(0, 4, 1).is_nan());
        assert!(rrd.read_value(1, 3, 0).is_nan());
    }

    #[test]
    fn test_persistence() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("persist.rrd");

        {
            let file = open_rw(&path);
            let mut rrd = RrdFile::create(&file, "persist.rrd", &definition(), 1000).unwrap();
            rrd.set_last_update(1020).unwrap();
            rrd.set_cur_row(1, 3).unwrap();
            rrd.set_pdp_prep(
                0,
                PdpPrep {
                    last_ds: 5.0,
                    scratch: 12.5,
                    unknown_sec: 3,
                },
            )
            .unwrap();
            rrd.set_cdp_prep(
                1,
                0,
                CdpPrep {
                    value: 7.0,
                    unknown_pdp: 2,
                },
            )
            .unwrap();
            rrd.write_value(0, 2, 1, 42.5).unwrap();
            rrd.sync().unwrap();
        }

        let file = File::open(&path).unwrap();
        let rrd = RrdFile::open(&file, "persist.rrd", false).unwrap();
        assert_eq!(rrd.definition(), &definition());
        assert_eq!(rrd.last_update(), 1020);
        assert_eq!(rrd.cur_row(1), 3);
        assert_eq!(rrd.pdp_prep(0).scratch, 12.5);
        assert_eq!(rrd.pdp_prep(0).unknown_sec, 3);
        assert_eq!(rrd.cdp_prep(1, 0).value, 7.0);
        assert_eq!(rrd.read_value(0, 2, 1), 42.5);
        assert!(rrd.read_value(0, 2, 0).is_nan());
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("ro.rrd");
        {
            let file = open_rw(&path);
            RrdFile::create(&file, "ro.rrd", &definition(), 1000).unwrap();
        }

        let file = File::open(&path).unwrap();
        let mut rrd = RrdFile::open(&file, "ro.rrd", false).unwrap();
        let err = rrd.set_last_update(2000).unwrap_err();
        assert!(err.to_string().contains("read-only"));
    }

    #[test]
    fn test_invalid_files() {
        let temp_dir = tempfile::tempdir().unwrap();

        let small = temp_dir.path().join("small.rrd");
        fs::write(&small, b"small").unwrap();
        let err = RrdFile::open(&File::open(&small).unwrap(), "small.rrd", false).unwrap_err();
        assert!(err.to_string().contains("file too small"));

        let bad_magic = temp_dir.path().join("magic.rrd");
        let mut header = vec![0u8; 64];
        header[0..4].copy_from_slice(b"BAD\0");
        fs::write(&bad_magic, header).unwrap();
        let err = RrdFile::open(&File::open(&bad_magic).unwrap(), "magic.rrd", false).unwrap_err();
        assert!(err.to_string().contains("invalid magic bytes"));

        let truncated = temp_dir.path().join("truncated.rrd");
        {
            let file = open_rw(&truncated);
            RrdFile::create(&file, "truncated.rrd", &definition(), 1000).unwrap();
        }
        let file = open_rw(&truncated);
        let len = file.metadata().unwrap().len();
        file.set_len(len - 8).unwrap();
        let err = RrdFile::open(&file, "truncated.rrd", false).unwrap_err();
        assert!(err.to_string().contains("file size mismatch"));
    }
}
