//! K-mer prefilter for large-scale sequence search, in modern Rust (edition 2024).
//!
//! Three batch stages:
//! - target index: extract every k-mer of the target sequences, keep one
//!   representative (longest) sequence per k-mer and store the result as a
//!   delta/overflow-encoded stream pair
//! - query table: extract and sort every k-mer occurrence of the queries
//! - compare: merge-join the two in one forward pass, keep (query, target)
//!   pairs sharing at least two k-mers and write them grouped by target
//!
//! K-mers are mixed-radix integers over a fixed alphabet (see [`alphabet`]);
//! windows with an unknown residue are never indexed. See README for the
//! on-disk layout.

pub mod alphabet;
pub mod encode;
mod error;
pub mod filter;
pub mod index;
pub mod io;
pub mod matcher;
pub mod pipeline;
pub mod sequence;
pub mod table;

pub use alphabet::{Alphabet, AlphabetKind, decode_kmer, encode_kmer};
pub use encode::{EncodeStats, EncodedIndex, IndexEncoder, encode_target_table};
pub use error::{PrefilterError, Result};
pub use filter::{FilterStats, HitDbWriter, HitWriter, filter_hits, read_hit_db};
pub use index::{IndexCursor, IndexEntry, QueryTable, TargetIndex};
pub use io::{IndexPaths, TableHeader, TableKind};
pub use matcher::{MatchStats, match_queries};
pub use pipeline::{CompareStats, compare, compare_tables, create_query_table, create_target_index, prefilter};
pub use sequence::{SequenceSet, SequenceSource};
pub use table::{NO_MATCH, QueryRecord, TableBuilder, TableConfig, TableStats, TargetRecord};
