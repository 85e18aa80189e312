//! On-disk layout: target index stream pair, query table, `.meta` headers.
//!
//! Target index with prefix `P`:
//! - `P.kmers`: delta stream, flat little-endian `u16`
//! - `P.ids`: id stream, flat little-endian `u32`, same entry count
//! - `P.meta`: [`TableHeader`]
//!
//! Query table at `Q`: flat array of [`QueryRecord`] (24 bytes each, native
//! little-endian layout, mapped directly), plus `Q.meta`.

use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use memmap2::{Mmap, MmapMut, MmapOptions};
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::alphabet::AlphabetKind;
use crate::encode::IndexSink;
use crate::error::{PrefilterError, Result};
use crate::table::QueryRecord;

pub const KPF_MAGIC: u32 = 0x4B_50_46_31; // "KPF1"
pub const KPF_VERSION: u32 = 1;

/// What a header describes.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TableKind {
    /// Delta/id stream pair of a target index.
    TargetIndex = 0,
    /// Flat sorted query record array.
    QueryTable = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableHeader {
    pub magic: u32,
    pub version: u32,
    pub kind: TableKind,
    pub alphabet: AlphabetKind,
    pub k: u16,
    /// Stream positions (index) or records (query table).
    pub entries: u64,
    /// Distinct k-mers (index) or sequences (query table).
    pub unique: u64,
}

impl TableHeader {
    pub fn new(kind: TableKind, alphabet: AlphabetKind, k: usize, entries: u64, unique: u64) -> Self {
        Self {
            magic: KPF_MAGIC,
            version: KPF_VERSION,
            kind,
            alphabet,
            k: k as u16,
            entries,
            unique,
        }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_u32::<LE>(self.magic)?;
        w.write_u32::<LE>(self.version)?;
        w.write_u8(self.kind as u8)?;
        w.write_u8(self.alphabet as u8)?;
        w.write_u16::<LE>(self.k)?;
        w.write_u32::<LE>(0)?; // reserved
        w.write_u64::<LE>(self.entries)?;
        w.write_u64::<LE>(self.unique)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let magic = r.read_u32::<LE>()?;
        if magic != KPF_MAGIC {
            return Err(PrefilterError::Format("bad magic".into()));
        }
        let version = r.read_u32::<LE>()?;
        if version != KPF_VERSION {
            return Err(PrefilterError::Format(format!("unsupported version {version}")));
        }
        let kind = match r.read_u8()? {
            0 => TableKind::TargetIndex,
            1 => TableKind::QueryTable,
            v => return Err(PrefilterError::Format(format!("unknown table kind {v}"))),
        };
        let alphabet = AlphabetKind::from_u8(r.read_u8()?)
            .ok_or_else(|| PrefilterError::Format("unknown alphabet".into()))?;
        let k = r.read_u16::<LE>()?;
        let _reserved = r.read_u32::<LE>()?;
        let entries = r.read_u64::<LE>()?;
        let unique = r.read_u64::<LE>()?;
        Ok(TableHeader {
            magic,
            version,
            kind,
            alphabet,
            k,
            entries,
            unique,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| PrefilterError::file(path, e))?;
        let mut w = BufWriter::new(file);
        self.write_to(&mut w)
            .and_then(|_| w.flush())
            .map_err(|e| PrefilterError::file(path, e))
    }

    pub fn load(path: &Path, expected: TableKind) -> Result<Self> {
        let file = File::open(path).map_err(|e| PrefilterError::file(path, e))?;
        let header = Self::read_from(&mut BufReader::new(file))?;
        if header.kind != expected {
            return Err(PrefilterError::Format(format!(
                "{} describes a {:?}, expected a {:?}",
                path.display(),
                header.kind,
                expected
            )));
        }
        Ok(header)
    }

    /// Query table and index must agree on `k` and alphabet.
    pub fn check_compatible(&self, other: &TableHeader) -> Result<()> {
        if self.k != other.k || self.alphabet != other.alphabet {
            return Err(PrefilterError::Format(format!(
                "incompatible tables: k={} {:?} vs k={} {:?}",
                self.k, self.alphabet, other.k, other.alphabet
            )));
        }
        Ok(())
    }
}

/// `path` with `suffix` appended to its file name.
pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// File names of a target index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexPaths {
    pub kmers: PathBuf,
    pub ids: PathBuf,
    pub meta: PathBuf,
}

impl IndexPaths {
    pub fn from_prefix(prefix: &Path) -> Self {
        Self {
            kmers: with_suffix(prefix, ".kmers"),
            ids: with_suffix(prefix, ".ids"),
            meta: with_suffix(prefix, ".meta"),
        }
    }
}

/// Header path of a query table.
pub fn query_meta_path(table: &Path) -> PathBuf {
    with_suffix(table, ".meta")
}

/// [`IndexSink`] writing the two streams to disk.
pub struct IndexFileWriter {
    paths: IndexPaths,
    kmers: BufWriter<File>,
    ids: BufWriter<File>,
}

impl IndexFileWriter {
    /// Create (truncate) both stream files.
    pub fn create(paths: IndexPaths) -> Result<Self> {
        let open = |p: &Path| {
            File::create(p)
                .map(|f| BufWriter::with_capacity(1 << 20, f))
                .map_err(|e| PrefilterError::file(p, e))
        };
        let kmers = open(&paths.kmers)?;
        let ids = open(&paths.ids)?;
        Ok(Self { paths, kmers, ids })
    }
}

impl IndexSink for IndexFileWriter {
    #[inline]
    fn put(&mut self, delta: u16, id: u32) -> Result<()> {
        self.kmers
            .write_u16::<LE>(delta)
            .map_err(|e| PrefilterError::file(&self.paths.kmers, e))?;
        self.ids
            .write_u32::<LE>(id)
            .map_err(|e| PrefilterError::file(&self.paths.ids, e))
    }

    fn finish(&mut self) -> Result<()> {
        self.kmers
            .flush()
            .map_err(|e| PrefilterError::file(&self.paths.kmers, e))?;
        self.ids
            .flush()
            .map_err(|e| PrefilterError::file(&self.paths.ids, e))
    }
}

/// Write a sorted query table and its header.
pub fn write_query_table(path: &Path, records: &[QueryRecord], header: &TableHeader) -> Result<()> {
    let file = File::create(path).map_err(|e| PrefilterError::file(path, e))?;
    let mut w = BufWriter::with_capacity(1 << 20, file);
    w.write_all(bytemuck::cast_slice::<QueryRecord, u8>(records))
        .and_then(|_| w.flush())
        .map_err(|e| PrefilterError::file(path, e))?;
    header.save(&query_meta_path(path))
}

/// Map a file read-only. Empty files yield `None`.
pub(crate) fn map_readonly(path: &Path) -> Result<Option<Mmap>> {
    let file = File::open(path).map_err(|e| PrefilterError::file(path, e))?;
    let len = file.metadata().map_err(|e| PrefilterError::file(path, e))?.len();
    if len == 0 {
        return Ok(None);
    }
    // SAFETY: the pipeline never writes to its inputs while a stage maps them.
    let map =
        unsafe { MmapOptions::new().map(&file) }.map_err(|e| PrefilterError::file(path, e))?;
    #[cfg(unix)]
    {
        if let Err(e) = map.advise(memmap2::Advice::Sequential) {
            warn!("madvise returned an error for {}: {e}", path.display());
        }
    }
    Ok(Some(map))
}

/// Map a file copy-on-write: in-place edits never reach the file.
pub(crate) fn map_private(path: &Path) -> Result<Option<MmapMut>> {
    let file = File::open(path).map_err(|e| PrefilterError::file(path, e))?;
    let len = file.metadata().map_err(|e| PrefilterError::file(path, e))?.len();
    if len == 0 {
        return Ok(None);
    }
    // SAFETY: as above; the private mapping is never shared.
    let map =
        unsafe { MmapOptions::new().map_copy(&file) }.map_err(|e| PrefilterError::file(path, e))?;
    #[cfg(unix)]
    {
        if let Err(e) = map.advise(memmap2::Advice::Sequential) {
            warn!("madvise returned an error for {}: {e}", path.display());
        }
    }
    Ok(Some(map))
}
