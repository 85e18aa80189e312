//! Stage drivers: target index creation, query table creation, comparison.
//!
//! Each stage is a batch file-to-file step; a failed stage leaves partial
//! output that must be discarded and the stage rerun.

use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::encode::{EncodeStats, IndexEncoder, encode_target_table};
use crate::error::Result;
use crate::filter::{FilterStats, HitWriter, filter_hits, write_grouped};
use crate::index::{QueryTable, TargetIndex};
use crate::io::{IndexFileWriter, IndexPaths, TableHeader, TableKind, write_query_table};
use crate::matcher::{MatchStats, match_queries};
use crate::sequence::SequenceSource;
use crate::table::{QueryRecord, TableBuilder, TableStats};

/// Build, sort, dedup and encode the target table of `source` to
/// `<prefix>.kmers` / `<prefix>.ids` / `<prefix>.meta`.
pub fn create_target_index<S: SequenceSource + ?Sized>(
    builder: &TableBuilder,
    source: &S,
    prefix: &Path,
) -> Result<(TableStats, EncodeStats)> {
    let timer = Instant::now();
    let (table, table_stats) = builder.build_target_table(source)?;
    info!("k-mers: {} time: {:?}", table_stats.records, timer.elapsed());

    let paths = IndexPaths::from_prefix(prefix);
    info!("Writing k-mer target table to file: {}", paths.kmers.display());
    info!("Writing target ID table to file: {}", paths.ids.display());
    let mut encoder = IndexEncoder::new(IndexFileWriter::create(paths.clone())?);
    encoder.push_records(&table)?;
    let (_, encode_stats) = encoder.finish()?;
    drop(table);

    let cfg = builder.config();
    TableHeader::new(
        TableKind::TargetIndex,
        cfg.alphabet_kind(),
        cfg.kmer_len(),
        encode_stats.entries,
        encode_stats.unique_kmers,
    )
    .save(&paths.meta)?;

    info!(
        "Wrote {} unique k-mers ({} entries, {} overflow) in {:?}",
        encode_stats.unique_kmers,
        encode_stats.entries,
        encode_stats.overflow_entries,
        timer.elapsed()
    );
    Ok((table_stats, encode_stats))
}

/// Build and sort the query table of `source` and write it to `path`.
pub fn create_query_table<S: SequenceSource + ?Sized>(
    builder: &TableBuilder,
    source: &S,
    path: &Path,
) -> Result<TableStats> {
    let timer = Instant::now();
    let (table, stats) = builder.build_query_table(source)?;
    info!("k-mers: {} time: {:?}", stats.records, timer.elapsed());

    info!("Writing query table to file: {}", path.display());
    let cfg = builder.config();
    let header = TableHeader::new(
        TableKind::QueryTable,
        cfg.alphabet_kind(),
        cfg.kmer_len(),
        table.len() as u64,
        stats.sequences as u64,
    );
    write_query_table(path, &table, &header)?;
    debug!("Query table written in {:?}", timer.elapsed());
    Ok(stats)
}

/// Counters of one comparison.
#[derive(Clone, Copy, Debug, Default)]
pub struct CompareStats {
    pub matching: MatchStats,
    pub filter: FilterStats,
    pub merge_time: Duration,
}

/// Merge-join `queries` against `index`, filter and write grouped hits.
///
/// `queries` is annotated in place and left sorted by
/// [`crate::filter::hit_order`]. Sorts run on the current rayon pool.
pub fn compare<W: HitWriter + ?Sized>(
    queries: &mut [QueryRecord],
    index: &TargetIndex,
    writer: &mut W,
) -> Result<CompareStats> {
    let timer = Instant::now();
    let matching = match_queries(queries, index.cursor()?)?;
    let merge_time = timer.elapsed();

    let scanned = index.size_bytes() + std::mem::size_of_val(&*queries);
    let rate = (scanned as f64 / 1e9) / merge_time.as_secs_f64().max(1e-9);
    info!("{:?}; Rate {:.3} GB/s", merge_time, rate);
    info!("number of equal k-mers: {}", matching.equal_kmers);

    info!("Removing sequences with less than two hits");
    let (hits, mut filter) = filter_hits(queries);
    debug!(
        "{} records kept in {} pairs ({} unmatched, {} single-hit pairs)",
        filter.kept_records, filter.kept_pairs, filter.unmatched, filter.singleton_pairs
    );

    info!("Writing result files");
    filter.blocks = write_grouped(&hits, writer)?;
    info!("Wrote {} target blocks", filter.blocks);

    Ok(CompareStats {
        matching,
        filter,
        merge_time,
    })
}

/// Map the query table at `query_path` (copy-on-write) and the index at
/// `index_prefix`, then [`compare`] them on a pool of `threads` workers.
pub fn compare_tables<W: HitWriter + Send + ?Sized>(
    query_path: &Path,
    index_prefix: &Path,
    writer: &mut W,
    threads: Option<usize>,
) -> Result<CompareStats> {
    let index = TargetIndex::open_mmap(index_prefix)?;
    let mut queries = QueryTable::open_mmap(query_path)?;
    if let (Some(q), Some(t)) = (queries.header(), index.header()) {
        q.check_compatible(t)?;
    }
    info!(
        "Comparing {} query records against {} index entries",
        queries.records()?.len(),
        index.len()
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads.unwrap_or(0))
        .build()?;
    pool.install(|| compare(queries.records_mut()?, &index, writer))
}

/// Whole prefilter in memory: index `targets`, search `queries`, return the
/// surviving hits grouped by target.
pub fn prefilter<T, Q>(
    builder: &TableBuilder,
    targets: &T,
    queries: &Q,
) -> Result<Vec<(u32, Vec<QueryRecord>)>>
where
    T: SequenceSource + ?Sized,
    Q: SequenceSource + ?Sized,
{
    let (target_table, _) = builder.build_target_table(targets)?;
    let (encoded, _) = encode_target_table(&target_table)?;
    drop(target_table);
    let index = TargetIndex::from_encoded(encoded)?;

    let (mut query_table, _) = builder.build_query_table(queries)?;
    let mut out: Vec<(u32, Vec<QueryRecord>)> = Vec::new();
    builder.install(|| compare(&mut query_table, &index, &mut out))?;
    Ok(out)
}
