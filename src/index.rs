//! Read side of the on-disk tables: target index streams and query tables,
//! either owned or memory-mapped.

use std::path::Path;

use memmap2::{Mmap, MmapMut};

use crate::encode::{EncodedIndex, OVERFLOW_SENTINEL};
use crate::error::{PrefilterError, Result};
use crate::io::{
    IndexPaths, TableHeader, TableKind, map_private, map_readonly, query_meta_path,
};
use crate::table::QueryRecord;

/// One decoded logical index entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub kmer: u64,
    /// Representative target sequence of `kmer`.
    pub target_id: u32,
}

enum Storage {
    Owned(EncodedIndex),
    Mmap {
        // `None` for empty streams, which cannot be mapped
        kmers: Option<Mmap>,
        ids: Option<Mmap>,
    },
}

/// Target index: delta stream + id stream.
pub struct TargetIndex {
    header: Option<TableHeader>,
    storage: Storage,
}

impl TargetIndex {
    /// Wrap in-memory streams (no header).
    pub fn from_encoded(encoded: EncodedIndex) -> Result<Self> {
        if encoded.deltas.len() != encoded.ids.len() {
            return Err(PrefilterError::Format(format!(
                "delta stream has {} entries, id stream {}",
                encoded.deltas.len(),
                encoded.ids.len()
            )));
        }
        Ok(Self {
            header: None,
            storage: Storage::Owned(encoded),
        })
    }

    /// Map `<prefix>.kmers` / `<prefix>.ids` and check them against `<prefix>.meta`.
    pub fn open_mmap(prefix: &Path) -> Result<Self> {
        let paths = IndexPaths::from_prefix(prefix);
        let header = TableHeader::load(&paths.meta, TableKind::TargetIndex)?;
        let kmers = map_readonly(&paths.kmers)?;
        let ids = map_readonly(&paths.ids)?;

        let idx = Self {
            header: Some(header),
            storage: Storage::Mmap { kmers, ids },
        };
        let (deltas, ids) = (idx.deltas()?, idx.ids()?);
        if deltas.len() != ids.len() {
            return Err(PrefilterError::Format(format!(
                "{} has {} entries but {} has {}",
                paths.kmers.display(),
                deltas.len(),
                paths.ids.display(),
                ids.len()
            )));
        }
        if deltas.len() as u64 != header.entries {
            return Err(PrefilterError::Format(format!(
                "{} has {} entries, header says {}",
                paths.kmers.display(),
                deltas.len(),
                header.entries
            )));
        }
        Ok(idx)
    }

    pub fn header(&self) -> Option<&TableHeader> {
        self.header.as_ref()
    }

    /// Raw delta stream.
    pub fn deltas(&self) -> Result<&[u16]> {
        match &self.storage {
            Storage::Owned(e) => Ok(e.deltas.as_slice()),
            Storage::Mmap { kmers, .. } => cast_stream(kmers.as_deref()),
        }
    }

    /// Raw id stream.
    pub fn ids(&self) -> Result<&[u32]> {
        match &self.storage {
            Storage::Owned(e) => Ok(e.ids.as_slice()),
            Storage::Mmap { ids, .. } => cast_stream(ids.as_deref()),
        }
    }

    /// Stream positions, markers included.
    pub fn len(&self) -> usize {
        self.deltas().map(<[u16]>::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes of both streams.
    pub fn size_bytes(&self) -> usize {
        self.len() * (std::mem::size_of::<u16>() + std::mem::size_of::<u32>())
    }

    /// Forward cursor over the logical entries.
    pub fn cursor(&self) -> Result<IndexCursor<'_>> {
        IndexCursor::new(self.deltas()?, self.ids()?)
    }
}

fn cast_stream<T: bytemuck::Pod>(bytes: Option<&[u8]>) -> Result<&[T]> {
    match bytes {
        None => Ok(&[]),
        Some(b) => bytemuck::try_cast_slice(b).map_err(|e| PrefilterError::Cast(format!("{e:?}"))),
    }
}

/// Forward-only decoder over a delta/id stream pair.
///
/// Every step checks the end of the stream before reading; a stream ending in
/// overflow markers is reported as truncated.
pub struct IndexCursor<'a> {
    deltas: &'a [u16],
    ids: &'a [u32],
    pos: usize,
    acc: u64,
    failed: bool,
}

impl<'a> IndexCursor<'a> {
    pub fn new(deltas: &'a [u16], ids: &'a [u32]) -> Result<Self> {
        if deltas.len() != ids.len() {
            return Err(PrefilterError::Format(format!(
                "delta stream has {} entries, id stream {}",
                deltas.len(),
                ids.len()
            )));
        }
        Ok(Self {
            deltas,
            ids,
            pos: 0,
            acc: 0,
            failed: false,
        })
    }

    /// Stream offset of the next unread pair.
    pub fn stream_offset(&self) -> usize {
        self.pos
    }

    fn fail(&mut self, msg: String) -> Option<Result<IndexEntry>> {
        self.failed = true;
        Some(Err(PrefilterError::Format(msg)))
    }
}

impl Iterator for IndexCursor<'_> {
    type Item = Result<IndexEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let start = self.pos;
        while self.pos < self.deltas.len() {
            let d = self.deltas[self.pos];
            let id = self.ids[self.pos];
            self.pos += 1;
            self.acc = match self.acc.checked_add(d as u64) {
                Some(v) => v,
                None => return self.fail(format!("k-mer value overflows at entry {}", self.pos - 1)),
            };
            if d != OVERFLOW_SENTINEL {
                return Some(Ok(IndexEntry {
                    kmer: self.acc,
                    target_id: id,
                }));
            }
        }
        if self.pos > start {
            return self.fail(format!(
                "delta stream ends inside an overflow run starting at entry {start}"
            ));
        }
        None
    }
}

enum QueryStorage {
    Owned(Vec<QueryRecord>),
    Mapped(Option<MmapMut>),
}

/// Query table open for in-place annotation.
///
/// A mapped table is private copy-on-write: annotations live in memory only
/// and the file on disk is left untouched.
pub struct QueryTable {
    header: Option<TableHeader>,
    storage: QueryStorage,
}

impl QueryTable {
    pub fn from_records(records: Vec<QueryRecord>) -> Self {
        Self {
            header: None,
            storage: QueryStorage::Owned(records),
        }
    }

    pub fn open_mmap(path: &Path) -> Result<Self> {
        let header = TableHeader::load(&query_meta_path(path), TableKind::QueryTable)?;
        let map = map_private(path)?;
        let bytes = map.as_ref().map_or(0, |m| m.len());
        let rec = std::mem::size_of::<QueryRecord>();
        if bytes % rec != 0 {
            return Err(PrefilterError::Format(format!(
                "{} is {bytes} bytes, not a multiple of the {rec}-byte record",
                path.display()
            )));
        }
        if (bytes / rec) as u64 != header.entries {
            return Err(PrefilterError::Format(format!(
                "{} holds {} records, header says {}",
                path.display(),
                bytes / rec,
                header.entries
            )));
        }
        Ok(Self {
            header: Some(header),
            storage: QueryStorage::Mapped(map),
        })
    }

    pub fn header(&self) -> Option<&TableHeader> {
        self.header.as_ref()
    }

    pub fn records(&self) -> Result<&[QueryRecord]> {
        match &self.storage {
            QueryStorage::Owned(v) => Ok(v.as_slice()),
            QueryStorage::Mapped(None) => Ok(&[]),
            QueryStorage::Mapped(Some(m)) => {
                bytemuck::try_cast_slice(&m[..]).map_err(|e| PrefilterError::Cast(format!("{e:?}")))
            }
        }
    }

    pub fn records_mut(&mut self) -> Result<&mut [QueryRecord]> {
        match &mut self.storage {
            QueryStorage::Owned(v) => Ok(v.as_mut_slice()),
            QueryStorage::Mapped(None) => Ok(&mut []),
            QueryStorage::Mapped(Some(m)) => bytemuck::try_cast_slice_mut(&mut m[..])
                .map_err(|e| PrefilterError::Cast(format!("{e:?}"))),
        }
    }
}
