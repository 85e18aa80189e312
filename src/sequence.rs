//! Sequence sources consumed by the table builder.
//!
//! The builder only needs "give me the residues of sequence `id`"; ids are
//! dense `0..len()` and become the `sequence_id` / `query_id` of the records.

use std::path::Path;

use needletail::parse_fastx_file;
use tracing::{debug, warn};

use crate::error::{PrefilterError, Result};

/// Random access to a set of sequences by dense id.
///
/// Implementations must be shareable across the builder's worker threads.
pub trait SequenceSource: Sync {
    /// Number of sequences; ids are `0..len()`.
    fn len(&self) -> usize;

    /// Residues of sequence `id` (raw bytes, not yet alphabet-mapped).
    fn sequence(&self, id: usize) -> &[u8];

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S: AsRef<[u8]> + Sync> SequenceSource for [S] {
    fn len(&self) -> usize {
        <[S]>::len(self)
    }
    fn sequence(&self, id: usize) -> &[u8] {
        self[id].as_ref()
    }
}

impl<S: AsRef<[u8]> + Sync> SequenceSource for Vec<S> {
    fn len(&self) -> usize {
        Vec::len(self)
    }
    fn sequence(&self, id: usize) -> &[u8] {
        self[id].as_ref()
    }
}

/// In-memory sequence set with identifiers, loaded from FASTA/FASTQ.
#[derive(Debug, Default, Clone)]
pub struct SequenceSet {
    ids: Vec<Vec<u8>>,
    seqs: Vec<Vec<u8>>,
}

impl SequenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record; its id is the current length of the set.
    pub fn push(&mut self, identifier: &[u8], residues: &[u8]) -> usize {
        self.ids.push(identifier.to_vec());
        self.seqs.push(residues.to_vec());
        self.seqs.len() - 1
    }

    /// Identifier (first word of the header) of sequence `id`.
    pub fn identifier(&self, id: usize) -> &[u8] {
        &self.ids[id]
    }

    /// Total residues over all sequences.
    pub fn total_residues(&self) -> usize {
        self.seqs.iter().map(Vec::len).sum()
    }

    /// Read a FASTA/FASTQ file (gzip is detected transparently).
    ///
    /// Records with an empty identifier or an empty sequence fail the load
    /// when `require_identifiers` is set, so that ids keep following entry
    /// order; otherwise they are skipped with a warning.
    pub fn from_fastx(path: &Path, require_identifiers: bool) -> Result<Self> {
        let mut reader = parse_fastx_file(path).map_err(|e| {
            PrefilterError::file(path, std::io::Error::other(e.to_string()))
        })?;

        let mut set = SequenceSet::new();
        let mut entry = 0usize;
        while let Some(record) = reader.next() {
            let record = record.map_err(|e| {
                PrefilterError::Data(format!("{}: entry {entry}: {e}", path.display()))
            })?;
            let id = record
                .id()
                .split(|b| b.is_ascii_whitespace())
                .next()
                .unwrap_or_default();
            let seq = record.seq();

            if id.is_empty() {
                if require_identifiers {
                    return Err(PrefilterError::Data(format!(
                        "{}: entry {entry} has no identifier",
                        path.display()
                    )));
                }
                warn!("Skipping entry {} of {}: no identifier", entry, path.display());
            } else if seq.is_empty() {
                if require_identifiers {
                    return Err(PrefilterError::Data(format!(
                        "{}: entry {entry} ({}) has an empty sequence",
                        path.display(),
                        String::from_utf8_lossy(id)
                    )));
                }
                warn!(
                    "Skipping entry {} ({}) of {}: empty sequence",
                    entry,
                    String::from_utf8_lossy(id),
                    path.display()
                );
            } else {
                set.push(id, &seq);
            }
            entry += 1;
        }

        debug!(
            "Loaded {} of {} entries from {}",
            set.len(),
            entry,
            path.display()
        );
        Ok(set)
    }
}

impl SequenceSource for SequenceSet {
    fn len(&self) -> usize {
        self.seqs.len()
    }
    fn sequence(&self, id: usize) -> &[u8] {
        &self.seqs[id]
    }
}
