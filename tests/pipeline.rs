use std::io::Write;

use kira_kmer_prefilter::*;

fn builder(k: usize) -> TableBuilder {
    TableBuilder::new(TableConfig::default().k(k).threads(2)).unwrap()
}

fn kmer_of(window: &[u8]) -> u64 {
    let aa = Alphabet::amino_acid();
    let idx: Vec<u8> = window.iter().map(|&b| aa.map_residue(b)).collect();
    encode_kmer(&idx, aa.radix())
}

#[test]
fn config_is_validated() {
    assert!(TableBuilder::new(TableConfig::default().k(0)).is_err());
    assert!(TableBuilder::new(TableConfig::default().k(15)).is_err());
    assert!(TableBuilder::new(TableConfig::default().k(14)).is_ok());
    assert!(
        TableBuilder::new(TableConfig::default().k(32).alphabet(AlphabetKind::Nucleotide)).is_ok()
    );
    assert!(matches!(
        TableBuilder::new(TableConfig::default().threads(0)),
        Err(PrefilterError::Config(_))
    ));
}

#[test]
fn table_has_one_record_per_unmasked_window() {
    let b = builder(3);
    let seqs = vec!["ACDXEFG", "AC", "MKVLAW"];
    let (table, stats) = b.build_target_table(&seqs).unwrap();
    assert_eq!(
        stats,
        TableStats {
            sequences: 3,
            short_sequences: 1,
            windows: 5 + 4,
            masked: 3,
            records: 6,
        }
    );
    assert_eq!(table.len(), b.count_kmers(&seqs));
    assert!(table.windows(2).all(|w| table::target_order(&w[0], &w[1]).is_le()));
    assert!(table.iter().any(|r| r.kmer == kmer_of(b"EFG") && r.sequence_id == 0));
    assert!(table.iter().all(|r| r.sequence_length == if r.sequence_id == 0 { 7 } else { 6 }));
}

#[test]
fn query_table_records_positions() {
    let b = builder(3);
    let (table, _) = b.build_query_table(&vec!["MKVLAW"]).unwrap();
    let mut got: Vec<(u16, u64)> = table.iter().map(|r| (r.position, r.kmer)).collect();
    got.sort();
    assert_eq!(
        got,
        vec![
            (0, kmer_of(b"MKV")),
            (1, kmer_of(b"KVL")),
            (2, kmer_of(b"VLA")),
            (3, kmer_of(b"LAW")),
        ]
    );
    assert!(table.iter().all(|r| r.query_id == 0 && !r.is_matched()));
    assert!(table.windows(2).all(|w| w[0].kmer <= w[1].kmer));
}

#[test]
fn nine_mers_shared_with_longer_target() {
    let b = builder(9);
    let targets = vec!["ACDEFGHIK", "ACDEFGHIKL"];

    let (table, stats) = b.build_target_table(&targets).unwrap();
    assert_eq!(stats.records, 3);
    let (enc, enc_stats) = encode_target_table(&table).unwrap();
    assert_eq!(enc_stats.unique_kmers, 2);
    let index = TargetIndex::from_encoded(enc).unwrap();
    let reps: Vec<(u64, u32)> = index
        .cursor()
        .unwrap()
        .map(|e| e.map(|e| (e.kmer, e.target_id)))
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(
        reps,
        vec![(kmer_of(b"ACDEFGHIK"), 1), (kmer_of(b"CDEFGHIKL"), 1)]
    );

    assert!(prefilter(&b, &targets, &vec!["ACDEFGHIK"]).unwrap().is_empty());

    let hits = prefilter(&b, &targets, &vec!["ACDEFGHIK", "ACDEFGHIKL"]).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0, 1);
    let got: Vec<(u32, u16)> = hits[0].1.iter().map(|r| (r.query_id, r.position)).collect();
    assert_eq!(got, vec![(1, 0), (1, 1)]);
}

#[test]
fn shared_kmer_goes_to_longest_target() {
    let b = builder(5);
    let targets = vec!["ACDEFG", "ACDEF"];
    let queries = vec!["ACDEF", "ACDEFG"];
    let hits = prefilter(&b, &targets, &queries).unwrap();

    // query 0 shares a single k-mer and is dropped
    assert_eq!(hits.len(), 1);
    let (target, block) = &hits[0];
    assert_eq!(*target, 0);
    let got: Vec<(u32, u16, u64)> = block.iter().map(|r| (r.query_id, r.position, r.kmer)).collect();
    assert_eq!(
        got,
        vec![(1, 0, kmer_of(b"ACDEF")), (1, 1, kmer_of(b"CDEFG"))]
    );
}

#[test]
fn file_stages_match_in_memory_prefilter() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("targets");
    let query_path = dir.path().join("queries.tbl");

    let b = builder(3);
    let targets = vec!["MKVLAW", "MKV"];
    let queries = vec!["MKVLA", "WWW"];

    let (_, enc) = create_target_index(&b, &targets, &prefix).unwrap();
    assert_eq!(enc.unique_kmers, 4);
    let paths = IndexPaths::from_prefix(&prefix);
    let header = TableHeader::load(&paths.meta, TableKind::TargetIndex).unwrap();
    assert_eq!(header.k, 3);
    assert_eq!(header.unique, 4);
    assert_eq!(header.entries, enc.entries);

    let qstats = create_query_table(&b, &queries, &query_path).unwrap();
    assert_eq!(qstats.records, 4);
    let before = std::fs::read(&query_path).unwrap();

    let mut hits: Vec<(u32, Vec<QueryRecord>)> = Vec::new();
    let stats = compare_tables(&query_path, &prefix, &mut hits, Some(2)).unwrap();
    assert_eq!(stats.matching.matched_records, 3);
    assert_eq!(stats.filter.unmatched, 1);
    assert_eq!(stats.filter.kept_pairs, 1);
    assert_eq!(stats.filter.blocks, 1);

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0, 0);
    let positions: Vec<u16> = hits[0].1.iter().map(|r| r.position).collect();
    assert_eq!(positions, vec![0, 1, 2]);

    // annotation happens on a private mapping
    assert_eq!(std::fs::read(&query_path).unwrap(), before);

    assert_eq!(prefilter(&b, &targets, &queries).unwrap(), hits);
}

#[test]
fn compare_writes_hit_database() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("t");
    let query_path = dir.path().join("q");
    let out = dir.path().join("hits");

    let b = builder(3);
    create_target_index(&b, &vec!["MKVLAW"], &prefix).unwrap();
    create_query_table(&b, &vec!["MKVLAW", "KVLA"], &query_path).unwrap();

    let mut writer = HitDbWriter::create(&out).unwrap();
    compare_tables(&query_path, &prefix, &mut writer, None).unwrap();
    drop(writer);

    let db = read_hit_db(&out).unwrap();
    assert_eq!(db.len(), 1);
    assert_eq!(db[0].0, 0);
    assert_eq!(db[0].1.len(), 4 + 2);
    assert!(db[0].1.iter().all(|r| r.target_id == 0));
}

#[test]
fn incompatible_tables_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("t");
    let query_path = dir.path().join("q");

    create_target_index(&builder(3), &vec!["MKVLAW"], &prefix).unwrap();
    create_query_table(&builder(4), &vec!["MKVLAW"], &query_path).unwrap();

    let mut hits: Vec<(u32, Vec<QueryRecord>)> = Vec::new();
    let err = compare_tables(&query_path, &prefix, &mut hits, None).unwrap_err();
    assert!(matches!(err, PrefilterError::Format(_)));

    // a query table is not an index
    assert!(TargetIndex::open_mmap(&query_path).is_err());
}

#[test]
fn empty_inputs_produce_empty_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("t");
    let query_path = dir.path().join("q");

    let b = builder(5);
    let (_, enc) = create_target_index(&b, &vec!["MKV"], &prefix).unwrap();
    assert_eq!(enc.entries, 0);
    create_query_table(&b, &vec!["MKVLAW"], &query_path).unwrap();

    let mut hits: Vec<(u32, Vec<QueryRecord>)> = Vec::new();
    let stats = compare_tables(&query_path, &prefix, &mut hits, None).unwrap();
    assert!(hits.is_empty());
    assert_eq!(stats.filter.unmatched, 2);
}

#[test]
fn fasta_loading_keeps_first_word_of_header() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seqs.fa");
    let mut f = std::fs::File::create(&path).unwrap();
    write!(f, ">s1 first protein\nMKVLAW\n>s2\nMKV\nLAW\n").unwrap();
    drop(f);

    let set = SequenceSet::from_fastx(&path, true).unwrap();
    assert_eq!(set.len(), 2);
    assert_eq!(set.identifier(0), b"s1");
    assert_eq!(set.identifier(1), b"s2");
    assert_eq!(set.sequence(0), b"MKVLAW");
    assert_eq!(set.sequence(1), b"MKVLAW");
    assert_eq!(set.total_residues(), 12);
}

#[test]
fn empty_fasta_entries_fail_when_identity_is_required() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seqs.fa");
    std::fs::write(&path, ">s0\n\n>s1\nMKVLAW\n").unwrap();

    let err = SequenceSet::from_fastx(&path, true).unwrap_err();
    assert!(matches!(err, PrefilterError::Data(_)));

    let set = SequenceSet::from_fastx(&path, false).unwrap();
    assert_eq!(set.len(), 1);
    assert_eq!(set.identifier(0), b"s1");
}

#[test]
fn missing_fasta_is_a_file_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = SequenceSet::from_fastx(&dir.path().join("absent.fa"), false).unwrap_err();
    assert!(matches!(err, PrefilterError::File { .. }));
}
