//! Index encoder: dedup sorted target records and delta/overflow-encode them.
//!
//! Stream layout (both streams advance together, one position per pair):
//! - delta stream (`u16`): zero or more [`OVERFLOW_SENTINEL`] markers, then one
//!   terminator `< OVERFLOW_SENTINEL`. The k-mer delta is
//!   `markers * OVERFLOW_SENTINEL + terminator`; the first delta is the raw
//!   value of the smallest k-mer.
//! - id stream (`u32`): [`PLACEHOLDER_ID`] at marker positions, the
//!   representative sequence id at the terminator.

use crate::error::{PrefilterError, Result};
use crate::table::TargetRecord;

/// Escape marker in the delta stream: "add 65534 and keep reading".
pub const OVERFLOW_SENTINEL: u16 = 65534;

/// Id stored alongside overflow markers; never read back.
pub const PLACEHOLDER_ID: u32 = u32::MAX;

/// Destination of encoded `(delta, id)` pairs.
pub trait IndexSink {
    fn put(&mut self, delta: u16, id: u32) -> Result<()>;

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Fully materialized index streams.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EncodedIndex {
    pub deltas: Vec<u16>,
    pub ids: Vec<u32>,
}

impl EncodedIndex {
    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }
}

impl IndexSink for EncodedIndex {
    #[inline]
    fn put(&mut self, delta: u16, id: u32) -> Result<()> {
        self.deltas.push(delta);
        self.ids.push(id);
        Ok(())
    }
}

/// Counters of one encoding run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EncodeStats {
    /// Target records consumed (before dedup).
    pub records: u64,
    /// Logical entries written (distinct k-mers).
    pub unique_kmers: u64,
    /// Stream positions written, markers included.
    pub entries: u64,
    /// Overflow markers among `entries`.
    pub overflow_entries: u64,
}

/// Streaming delta/overflow encoder over a sink.
pub struct IndexEncoder<S: IndexSink> {
    sink: S,
    prev: Option<u64>,
    stats: EncodeStats,
}

impl<S: IndexSink> IndexEncoder<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            prev: None,
            stats: EncodeStats::default(),
        }
    }

    /// Append one logical entry. K-mers must be strictly increasing.
    pub fn push(&mut self, kmer: u64, sequence_id: u32) -> Result<()> {
        let delta = match self.prev {
            None => kmer,
            Some(prev) if kmer > prev => kmer - prev,
            Some(prev) => {
                return Err(PrefilterError::Encoding(format!(
                    "k-mer {kmer} does not increase over {prev}; input must be sorted and deduplicated"
                )));
            }
        };

        let step = OVERFLOW_SENTINEL as u64;
        let markers = delta / step;
        for _ in 0..markers {
            self.sink.put(OVERFLOW_SENTINEL, PLACEHOLDER_ID)?;
        }
        let terminator = (delta % step) as u16;
        if terminator == OVERFLOW_SENTINEL {
            return Err(PrefilterError::Encoding(format!(
                "terminator for delta {delta} collides with the overflow marker"
            )));
        }
        self.sink.put(terminator, sequence_id)?;

        self.prev = Some(kmer);
        self.stats.unique_kmers += 1;
        self.stats.overflow_entries += markers;
        self.stats.entries += markers + 1;
        Ok(())
    }

    /// Dedup a k-mer-sorted run of target records and encode the
    /// representatives. Within a run the longest sequence is kept; on equal
    /// lengths the first one seen wins, which after [`crate::table::target_order`]
    /// is the lowest id.
    pub fn push_records(&mut self, records: &[TargetRecord]) -> Result<()> {
        let mut best: Option<TargetRecord> = None;
        for r in records {
            self.stats.records += 1;
            best = match best {
                Some(b) if b.kmer == r.kmer => {
                    if r.sequence_length > b.sequence_length {
                        Some(*r)
                    } else {
                        Some(b)
                    }
                }
                Some(b) => {
                    self.push(b.kmer, b.sequence_id)?;
                    Some(*r)
                }
                None => Some(*r),
            };
        }
        if let Some(b) = best {
            self.push(b.kmer, b.sequence_id)?;
        }
        Ok(())
    }

    /// Flush the sink and hand it back with the final counters.
    pub fn finish(mut self) -> Result<(S, EncodeStats)> {
        self.sink.finish()?;
        Ok((self.sink, self.stats))
    }
}

/// Encode a sorted target table into in-memory streams.
pub fn encode_target_table(records: &[TargetRecord]) -> Result<(EncodedIndex, EncodeStats)> {
    let mut enc = IndexEncoder::new(EncodedIndex::default());
    enc.push_records(records)?;
    enc.finish()
}

/// Decode in-memory delta stream back to absolute k-mer values.
///
/// Errors on a trailing run of markers without terminator.
pub fn decode_kmers(deltas: &[u16]) -> Result<Vec<u64>> {
    let mut out = Vec::new();
    let mut acc = 0u64;
    let mut pending = false;
    for &d in deltas {
        acc = acc
            .checked_add(d as u64)
            .ok_or_else(|| PrefilterError::Format("k-mer value overflows u64".into()))?;
        if d == OVERFLOW_SENTINEL {
            pending = true;
        } else {
            out.push(acc);
            pending = false;
        }
    }
    if pending {
        return Err(PrefilterError::Format(
            "delta stream ends inside an overflow run".into(),
        ));
    }
    Ok(out)
}
