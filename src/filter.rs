//! Hit filtering and target grouping.
//!
//! After the merge-join every query record carries its matched target (or
//! [`NO_MATCH`](crate::table::NO_MATCH)). A (query, target) pair is kept only
//! if it shares at least [`MIN_SHARED_KMERS`] k-mers; survivors are regrouped
//! by target and written as one keyed block per target.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::error::{PrefilterError, Result};
use crate::io::with_suffix;
use crate::table::QueryRecord;

/// Shared k-mers a (query, target) pair needs to survive.
pub const MIN_SHARED_KMERS: usize = 2;

/// `(query_id, target_id, position, kmer)`, all ascending.
pub fn hit_order(a: &QueryRecord, b: &QueryRecord) -> Ordering {
    a.query_id
        .cmp(&b.query_id)
        .then(a.target_id.cmp(&b.target_id))
        .then(a.position.cmp(&b.position))
        .then(a.kmer.cmp(&b.kmer))
}

/// `(target_id, query_id, position, kmer)`, all ascending.
pub fn target_group_order(a: &QueryRecord, b: &QueryRecord) -> Ordering {
    a.target_id
        .cmp(&b.target_id)
        .then(a.query_id.cmp(&b.query_id))
        .then(a.position.cmp(&b.position))
        .then(a.kmer.cmp(&b.kmer))
}

/// Counters of one filter/group run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub records: u64,
    /// Records without a matched target.
    pub unmatched: u64,
    /// (query, target) pairs dropped for sharing a single k-mer.
    pub singleton_pairs: u64,
    pub kept_pairs: u64,
    pub kept_records: u64,
    pub blocks: u64,
}

/// Sort `records` by [`hit_order`], keep the runs of at least
/// [`MIN_SHARED_KMERS`] records per (query, target) and return them in a new
/// buffer sorted by [`target_group_order`].
///
/// Sorting uses the current rayon pool.
pub fn filter_hits(records: &mut [QueryRecord]) -> (Vec<QueryRecord>, FilterStats) {
    let mut stats = FilterStats {
        records: records.len() as u64,
        ..FilterStats::default()
    };
    records.par_sort_unstable_by(hit_order);

    let mut kept = Vec::new();
    for run in records.chunk_by(|a, b| a.query_id == b.query_id && a.target_id == b.target_id) {
        if !run[0].is_matched() {
            stats.unmatched += run.len() as u64;
        } else if run.len() < MIN_SHARED_KMERS {
            stats.singleton_pairs += 1;
        } else {
            kept.extend_from_slice(run);
            stats.kept_pairs += 1;
        }
    }
    stats.kept_records = kept.len() as u64;

    kept.par_sort_unstable_by(target_group_order);
    (kept, stats)
}

/// Maximal blocks of equal `target_id` in a [`target_group_order`]ed slice.
pub fn target_blocks(hits: &[QueryRecord]) -> impl Iterator<Item = (u32, &[QueryRecord])> {
    hits.chunk_by(|a, b| a.target_id == b.target_id)
        .map(|block| (block[0].target_id, block))
}

/// Keyed record sink for grouped hits.
pub trait HitWriter {
    /// Write all hits of one target; called once per target, in id order.
    fn write_block(&mut self, target_id: u32, hits: &[QueryRecord]) -> Result<()>;

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl HitWriter for Vec<(u32, Vec<QueryRecord>)> {
    fn write_block(&mut self, target_id: u32, hits: &[QueryRecord]) -> Result<()> {
        self.push((target_id, hits.to_vec()));
        Ok(())
    }
}

/// Write every target block of `hits` through `writer`; returns the block count.
pub fn write_grouped<W: HitWriter + ?Sized>(hits: &[QueryRecord], writer: &mut W) -> Result<u64> {
    let mut blocks = 0u64;
    for (target_id, block) in target_blocks(hits) {
        writer.write_block(target_id, block)?;
        blocks += 1;
    }
    writer.finish()?;
    Ok(blocks)
}

/// Keyed record database: raw [`QueryRecord`] blocks in `<path>` and one
/// `key<TAB>offset<TAB>length` line per block in `<path>.index`.
pub struct HitDbWriter {
    data_path: PathBuf,
    index_path: PathBuf,
    data: BufWriter<File>,
    index: BufWriter<File>,
    offset: u64,
}

impl HitDbWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let index_path = with_suffix(path, ".index");
        let data = File::create(path).map_err(|e| PrefilterError::file(path, e))?;
        let index = File::create(&index_path).map_err(|e| PrefilterError::file(&index_path, e))?;
        Ok(Self {
            data_path: path.to_path_buf(),
            index_path,
            data: BufWriter::with_capacity(1 << 20, data),
            index: BufWriter::new(index),
            offset: 0,
        })
    }
}

impl HitWriter for HitDbWriter {
    fn write_block(&mut self, target_id: u32, hits: &[QueryRecord]) -> Result<()> {
        let bytes = bytemuck::cast_slice::<QueryRecord, u8>(hits);
        self.data
            .write_all(bytes)
            .map_err(|e| PrefilterError::file(&self.data_path, e))?;
        writeln!(self.index, "{}\t{}\t{}", target_id, self.offset, bytes.len())
            .map_err(|e| PrefilterError::file(&self.index_path, e))?;
        self.offset += bytes.len() as u64;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.data
            .flush()
            .map_err(|e| PrefilterError::file(&self.data_path, e))?;
        self.index
            .flush()
            .map_err(|e| PrefilterError::file(&self.index_path, e))
    }
}

/// Read back a database written by [`HitDbWriter`], in index order.
pub fn read_hit_db(path: &Path) -> Result<Vec<(u32, Vec<QueryRecord>)>> {
    let index_path = with_suffix(path, ".index");
    let mut data = Vec::new();
    File::open(path)
        .and_then(|mut f| f.read_to_end(&mut data))
        .map_err(|e| PrefilterError::file(path, e))?;
    let index = File::open(&index_path).map_err(|e| PrefilterError::file(&index_path, e))?;

    let rec = std::mem::size_of::<QueryRecord>();
    let mut out = Vec::new();
    for (n, line) in BufReader::new(index).lines().enumerate() {
        let line = line.map_err(|e| PrefilterError::file(&index_path, e))?;
        let bad = || PrefilterError::Format(format!("{}:{}: bad index line", index_path.display(), n + 1));
        let mut fields = line.split('\t').map(str::parse::<u64>);
        let (Some(Ok(key)), Some(Ok(offset)), Some(Ok(len)), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(bad());
        };
        let end = offset.checked_add(len).ok_or_else(bad)?;
        if key > u32::MAX as u64 || end > data.len() as u64 || len % rec as u64 != 0 {
            return Err(bad());
        }
        let (start, end) = (offset as usize, end as usize);
        let hits = data[start..end]
            .chunks_exact(rec)
            .map(bytemuck::pod_read_unaligned::<QueryRecord>)
            .collect();
        out.push((key as u32, hits));
    }
    Ok(out)
}
