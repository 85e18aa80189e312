//! Table builder: parallel k-mer extraction into an exactly-sized flat table.
//!
//! A counting pass computes the exact number of unmasked windows, the table is
//! allocated once to that size, then workers claim slots through a shared
//! atomic cursor. Placement order is scheduling dependent; the record set is
//! not, and every consumer sorts first.

use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use bytemuck::{Pod, Zeroable};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::alphabet::{Alphabet, AlphabetKind};
use crate::error::{PrefilterError, Result};
use crate::sequence::SequenceSource;

/// `target_id` of a query record that matched nothing.
pub const NO_MATCH: u32 = u32::MAX;

/// One target k-mer occurrence: `(kmer, sequence_id, sequence_length)`.
#[repr(C)]
#[derive(Copy, Clone, Default, Pod, Zeroable, PartialEq, Eq, Debug)]
pub struct TargetRecord {
    pub kmer: u64,
    pub sequence_id: u32,
    /// Residue length of the owning sequence; longest wins on dedup.
    pub sequence_length: u32,
}

/// One query k-mer occurrence. This is also the on-disk query table layout.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable, PartialEq, Eq, Debug)]
pub struct QueryRecord {
    pub kmer: u64,
    pub query_id: u32,
    /// Representative target sharing `kmer`, or [`NO_MATCH`].
    pub target_id: u32,
    /// 0-based window start, saturated at `u16::MAX`.
    pub position: u16,
    pub reserved: [u16; 3],
}

impl QueryRecord {
    pub fn new(query_id: u32, position: u16, kmer: u64) -> Self {
        Self {
            kmer,
            query_id,
            target_id: NO_MATCH,
            position,
            reserved: [0; 3],
        }
    }

    #[inline]
    pub fn is_matched(&self) -> bool {
        self.target_id != NO_MATCH
    }
}

impl Default for QueryRecord {
    fn default() -> Self {
        Self::new(0, 0, 0)
    }
}

/// A record the builder can produce from one k-mer window.
pub trait KmerRecord: Pod + Send + Sync {
    /// Table name used in logs.
    const NAME: &'static str;

    fn from_window(sequence_id: u32, sequence_length: u32, position: usize, kmer: u64) -> Self;
}

impl KmerRecord for TargetRecord {
    const NAME: &'static str = "target";

    #[inline]
    fn from_window(sequence_id: u32, sequence_length: u32, _position: usize, kmer: u64) -> Self {
        TargetRecord {
            kmer,
            sequence_id,
            sequence_length,
        }
    }
}

impl KmerRecord for QueryRecord {
    const NAME: &'static str = "query";

    #[inline]
    fn from_window(sequence_id: u32, _sequence_length: u32, position: usize, kmer: u64) -> Self {
        QueryRecord::new(sequence_id, position.min(u16::MAX as usize) as u16, kmer)
    }
}

/// `(kmer ↑, sequence_length ↓, sequence_id ↑)`: the first record of every
/// k-mer run is its longest (then lowest-id) sequence.
pub fn target_order(a: &TargetRecord, b: &TargetRecord) -> Ordering {
    a.kmer
        .cmp(&b.kmer)
        .then(b.sequence_length.cmp(&a.sequence_length))
        .then(a.sequence_id.cmp(&b.sequence_id))
}

/// `(kmer ↑, query_id ↓, position ↑)`: the merge-join precondition.
pub fn query_order(a: &QueryRecord, b: &QueryRecord) -> Ordering {
    a.kmer
        .cmp(&b.kmer)
        .then(b.query_id.cmp(&a.query_id))
        .then(a.position.cmp(&b.position))
}

/// Table-building configuration.
#[derive(Clone, Debug)]
pub struct TableConfig {
    k: usize,
    alphabet: AlphabetKind,
    threads: Option<usize>,
    require_identifiers: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            k: 9,
            alphabet: AlphabetKind::AminoAcid,
            threads: None,
            require_identifiers: false,
        }
    }
}

impl TableConfig {
    /// K-mer length (default 9).
    pub fn k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }
    /// Residue alphabet (default amino acids).
    pub fn alphabet(mut self, kind: AlphabetKind) -> Self {
        self.alphabet = kind;
        self
    }
    /// Fix the number of worker threads (default: rayon's choice).
    pub fn threads(mut self, n: usize) -> Self {
        self.threads = Some(n);
        self
    }
    /// Fail on records without identifier instead of skipping them.
    pub fn require_identifiers(mut self, yes: bool) -> Self {
        self.require_identifiers = yes;
        self
    }

    pub fn kmer_len(&self) -> usize {
        self.k
    }
    pub fn alphabet_kind(&self) -> AlphabetKind {
        self.alphabet
    }
    pub fn num_threads(&self) -> Option<usize> {
        self.threads
    }
    pub fn identifiers_required(&self) -> bool {
        self.require_identifiers
    }

    pub fn validate(&self) -> Result<()> {
        let alphabet = Alphabet::from_kind(self.alphabet);
        if !alphabet.supports(self.k) {
            let max_k = alphabet.max_k();
            return Err(PrefilterError::Config(format!(
                "k must be in 1..={max_k} for {:?}, got {}",
                self.alphabet, self.k
            )));
        }
        if self.threads == Some(0) {
            return Err(PrefilterError::Config("threads must be > 0".into()));
        }
        Ok(())
    }
}

/// Counters of one extraction run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TableStats {
    pub sequences: usize,
    /// Sequences shorter than `k` (no windows at all).
    pub short_sequences: usize,
    /// All windows, masked or not.
    pub windows: usize,
    /// Windows skipped because they contain an unknown residue.
    pub masked: usize,
    pub records: usize,
}

/// Extracts k-mer tables on a dedicated worker pool.
pub struct TableBuilder {
    cfg: TableConfig,
    alphabet: Alphabet,
    pool: rayon::ThreadPool,
}

impl TableBuilder {
    pub fn new(cfg: TableConfig) -> Result<Self> {
        cfg.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(cfg.threads.unwrap_or(0))
            .thread_name(|i| format!("kpf-worker-{i}"))
            .build()?;
        Ok(Self {
            alphabet: Alphabet::from_kind(cfg.alphabet),
            cfg,
            pool,
        })
    }

    pub fn config(&self) -> &TableConfig {
        &self.cfg
    }

    /// Exact number of records a table over `source` will hold.
    pub fn count_kmers<S: SequenceSource + ?Sized>(&self, source: &S) -> usize {
        self.count(source).records
    }

    fn count<S: SequenceSource + ?Sized>(&self, source: &S) -> TableStats {
        let k = self.cfg.k;
        let alphabet = self.alphabet;
        let mut stats = self.pool.install(|| {
            (0..source.len())
                .into_par_iter()
                .map(|id| {
                    let seq = source.sequence(id);
                    let windows = (seq.len() + 1).saturating_sub(k);
                    TableStats {
                        sequences: 1,
                        short_sequences: (windows == 0) as usize,
                        windows,
                        masked: 0,
                        records: alphabet.count_kmers(seq, k),
                    }
                })
                .reduce(TableStats::default, |a, b| TableStats {
                    sequences: a.sequences + b.sequences,
                    short_sequences: a.short_sequences + b.short_sequences,
                    windows: a.windows + b.windows,
                    masked: 0,
                    records: a.records + b.records,
                })
        });
        stats.masked = stats.windows - stats.records;
        stats
    }

    /// Extract one record per unmasked window of every sequence, unsorted.
    pub fn build<R, S>(&self, source: &S) -> Result<(Vec<R>, TableStats)>
    where
        R: KmerRecord,
        S: SequenceSource + ?Sized,
    {
        if source.len() >= NO_MATCH as usize {
            return Err(PrefilterError::Data(format!(
                "{} sequences exceed the 32-bit id space",
                source.len()
            )));
        }
        if let Some(id) = (0..source.len()).find(|&id| source.sequence(id).len() > u32::MAX as usize)
        {
            return Err(PrefilterError::Data(format!(
                "sequence {id} is longer than {} residues",
                u32::MAX
            )));
        }

        let stats = self.count(source);
        let capacity = stats.records;
        info!(
            "Number of sequences: {}, k-mers: {} ({} masked)",
            stats.sequences, stats.records, stats.masked
        );
        info!(
            "Creating {} table, requiring {} MB",
            R::NAME,
            (capacity * std::mem::size_of::<R>()) / (1024 * 1024)
        );

        let mut table: Vec<R> = vec![R::zeroed(); capacity];
        let k = self.cfg.k;
        let alphabet = self.alphabet;
        {
            let slots = SlotWriter::new(&mut table);
            self.pool.install(|| {
                (0..source.len())
                    .into_par_iter()
                    .with_max_len(1)
                    .try_for_each(|id| {
                        let seq = source.sequence(id);
                        let len = seq.len() as u32;
                        for (pos, kmer) in alphabet.kmers(seq, k) {
                            slots.push(R::from_window(id as u32, len, pos, kmer))?;
                        }
                        Ok::<(), PrefilterError>(())
                    })
            })?;

            let claimed = slots.claimed();
            if claimed != capacity {
                return Err(PrefilterError::Capacity { claimed, capacity });
            }
        }
        debug!("Extracted {} {} records", capacity, R::NAME);
        Ok((table, stats))
    }

    /// Build and sort a target table (`(kmer ↑, length ↓, id ↑)`).
    pub fn build_target_table<S: SequenceSource + ?Sized>(
        &self,
        source: &S,
    ) -> Result<(Vec<TargetRecord>, TableStats)> {
        let (mut table, stats) = self.build::<TargetRecord, S>(source)?;
        self.sort_targets(&mut table);
        Ok((table, stats))
    }

    /// Build and sort a query table (`(kmer ↑, query_id ↓, position ↑)`).
    pub fn build_query_table<S: SequenceSource + ?Sized>(
        &self,
        source: &S,
    ) -> Result<(Vec<QueryRecord>, TableStats)> {
        let (mut table, stats) = self.build::<QueryRecord, S>(source)?;
        self.sort_queries(&mut table);
        Ok((table, stats))
    }

    pub fn sort_targets(&self, table: &mut [TargetRecord]) {
        self.pool.install(|| table.par_sort_unstable_by(target_order));
    }

    pub fn sort_queries(&self, table: &mut [QueryRecord]) {
        self.pool.install(|| table.par_sort_unstable_by(query_order));
    }

    /// Run `f` on this builder's worker pool.
    pub fn install<T: Send>(&self, f: impl FnOnce() -> T + Send) -> T {
        self.pool.install(f)
    }
}

/// Lock-free append into a pre-sized buffer: each `push` claims the next
/// slot with one `fetch_add`.
struct SlotWriter<'a, T> {
    ptr: *mut T,
    capacity: usize,
    cursor: AtomicUsize,
    _buf: PhantomData<&'a mut [T]>,
}

// Safety: every slot index is handed out exactly once by the atomic cursor,
// so concurrent writes never alias; the buffer is borrowed mutably for 'a.
unsafe impl<T: Send> Sync for SlotWriter<'_, T> {}
unsafe impl<T: Send> Send for SlotWriter<'_, T> {}

impl<'a, T: Pod> SlotWriter<'a, T> {
    fn new(buf: &'a mut [T]) -> Self {
        Self {
            ptr: buf.as_mut_ptr(),
            capacity: buf.len(),
            cursor: AtomicUsize::new(0),
            _buf: PhantomData,
        }
    }

    #[inline]
    fn push(&self, value: T) -> Result<()> {
        let slot = self.cursor.fetch_add(1, AtomicOrdering::Relaxed);
        if slot >= self.capacity {
            return Err(PrefilterError::Capacity {
                claimed: slot + 1,
                capacity: self.capacity,
            });
        }
        // SAFETY: slot < capacity and no other thread received this slot.
        unsafe { self.ptr.add(slot).write(value) };
        Ok(())
    }

    fn claimed(&self) -> usize {
        self.cursor.load(AtomicOrdering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_writer_rejects_claims_past_capacity() {
        let mut buf = vec![0u64; 2];
        let slots = SlotWriter::new(&mut buf);
        slots.push(7).unwrap();
        slots.push(9).unwrap();
        match slots.push(11) {
            Err(PrefilterError::Capacity { claimed, capacity }) => {
                assert_eq!(claimed, 3);
                assert_eq!(capacity, 2);
            }
            other => panic!("expected capacity error, got {other:?}"),
        }
        drop(slots);
        assert_eq!(buf, vec![7, 9]);
    }

    #[test]
    fn record_layouts_are_fixed() {
        assert_eq!(std::mem::size_of::<TargetRecord>(), 16);
        assert_eq!(std::mem::size_of::<QueryRecord>(), 24);
    }
}
