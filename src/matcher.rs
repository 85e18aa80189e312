//! Merge-join of a sorted query table against the encoded target index.
//!
//! One forward pass over both sides, O(n + m), no backtracking. Index k-mers
//! are unique and strictly increasing, so once a query k-mer run is annotated
//! the index can move on.

use std::cmp::Ordering;

use crate::error::{PrefilterError, Result};
use crate::index::{IndexCursor, IndexEntry};
use crate::table::QueryRecord;

/// Counters of one merge-join.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MatchStats {
    pub query_records: u64,
    /// Index entries whose k-mer occurs in the query table.
    pub equal_kmers: u64,
    /// Query records that received a `target_id`.
    pub matched_records: u64,
}

/// Next logical entry, checking the strictly-increasing invariant.
fn advance(cursor: &mut IndexCursor<'_>, prev: Option<u64>) -> Result<Option<IndexEntry>> {
    match cursor.next().transpose()? {
        Some(e) if prev.is_some_and(|p| e.kmer <= p) => Err(PrefilterError::Format(format!(
            "index k-mers not increasing at stream position {}",
            cursor.stream_offset()
        ))),
        other => Ok(other),
    }
}

/// Annotate every query record whose k-mer is in the index with that
/// k-mer's representative target id.
///
/// `queries` must be sorted by k-mer ascending (see
/// [`crate::table::query_order`]); an out-of-order record is reported as a
/// format error instead of silently losing matches. Records without a match
/// keep their current `target_id`.
pub fn match_queries(queries: &mut [QueryRecord], mut cursor: IndexCursor<'_>) -> Result<MatchStats> {
    let mut stats = MatchStats {
        query_records: queries.len() as u64,
        ..MatchStats::default()
    };

    // prime: first logical entry, leading overflow markers included
    let Some(mut current) = advance(&mut cursor, None)? else {
        return Ok(stats);
    };

    let mut q = 0usize;
    let mut prev_query = 0u64;
    'scan: while q < queries.len() {
        let kmer = queries[q].kmer;
        if kmer < prev_query {
            return Err(PrefilterError::Format(format!(
                "query table not sorted by k-mer at record {q}"
            )));
        }
        prev_query = kmer;

        match kmer.cmp(&current.kmer) {
            Ordering::Equal => {
                stats.equal_kmers += 1;
                while q < queries.len() && queries[q].kmer == current.kmer {
                    queries[q].target_id = current.target_id;
                    stats.matched_records += 1;
                    q += 1;
                }
                match advance(&mut cursor, Some(current.kmer))? {
                    Some(e) => current = e,
                    None => break 'scan,
                }
            }
            // query behind: no target has this k-mer
            Ordering::Less => q += 1,
            // index behind
            Ordering::Greater => loop {
                match advance(&mut cursor, Some(current.kmer))? {
                    Some(e) => {
                        current = e;
                        if current.kmer >= kmer {
                            break;
                        }
                    }
                    None => break 'scan,
                }
            },
        }
    }

    Ok(stats)
}
