use std::collections::{BTreeMap, BTreeSet, HashMap};

use kira_kmer_prefilter::encode::decode_kmers;
use kira_kmer_prefilter::filter::{MIN_SHARED_KMERS, target_group_order};
use kira_kmer_prefilter::*;
use proptest::prelude::*;

/// Naive extraction: re-encode every window from scratch.
fn naive_kmers(alphabet: &Alphabet, seq: &[u8], k: usize) -> Vec<(usize, u64)> {
    if seq.len() < k {
        return Vec::new();
    }
    (0..=seq.len() - k)
        .filter_map(|start| {
            let idx: Vec<u8> = seq[start..start + k]
                .iter()
                .map(|&b| alphabet.map_residue(b))
                .collect();
            if idx.contains(&alphabet.unknown_index()) {
                None
            } else {
                Some((start, encode_kmer(&idx, alphabet.radix())))
            }
        })
        .collect()
}

fn protein() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(prop::sample::select(b"ACDEFGHIKLMNPQRSTVWYXB".to_vec()), 0..40)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_rolling_matches_naive(
        k in 1usize..=6,
        nucleotide in any::<bool>(),
        seq in prop::collection::vec(prop::sample::select(b"ACGTUNacgtXWY".to_vec()), 0..64),
    ) {
        let alphabet = if nucleotide { Alphabet::nucleotide() } else { Alphabet::amino_acid() };
        let rolled: Vec<_> = alphabet.kmers(&seq, k).collect();
        prop_assert_eq!(rolled.len(), alphabet.count_kmers(&seq, k));
        prop_assert_eq!(rolled, naive_kmers(&alphabet, &seq, k));
    }

    #[test]
    fn prop_index_stream_round_trip(
        kmers in prop::collection::btree_set(0u64..(1u64 << 24), 0..64),
    ) {
        let records: Vec<TargetRecord> = kmers
            .iter()
            .enumerate()
            .map(|(i, &kmer)| TargetRecord { kmer, sequence_id: i as u32, sequence_length: 1 })
            .collect();
        let (enc, stats) = encode_target_table(&records).unwrap();
        prop_assert_eq!(stats.entries as usize, enc.len());
        prop_assert_eq!(stats.unique_kmers as usize, kmers.len());

        let expected: Vec<u64> = kmers.iter().copied().collect();
        prop_assert_eq!(decode_kmers(&enc.deltas).unwrap(), expected);

        let index = TargetIndex::from_encoded(enc).unwrap();
        let ids: Vec<u32> = index.cursor().unwrap().map(|e| e.unwrap().target_id).collect();
        prop_assert_eq!(ids, (0..kmers.len() as u32).collect::<Vec<_>>());
    }

    #[test]
    fn prop_merge_join_is_complete(
        targets in prop::collection::vec(protein(), 0..8),
        queries in prop::collection::vec(protein(), 0..8),
        k in 1usize..=3,
    ) {
        let b = TableBuilder::new(TableConfig::default().k(k).threads(2)).unwrap();
        let (target_table, _) = b.build_target_table(&targets).unwrap();

        // representative per k-mer: longest sequence, then lowest id
        let mut best: BTreeMap<u64, (u32, u32)> = BTreeMap::new();
        for r in &target_table {
            best.entry(r.kmer)
                .and_modify(|(len, id)| {
                    if r.sequence_length > *len || (r.sequence_length == *len && r.sequence_id < *id) {
                        *len = r.sequence_length;
                        *id = r.sequence_id;
                    }
                })
                .or_insert((r.sequence_length, r.sequence_id));
        }

        let (enc, _) = encode_target_table(&target_table).unwrap();
        let index = TargetIndex::from_encoded(enc).unwrap();
        let (mut query_table, _) = b.build_query_table(&queries).unwrap();
        match_queries(&mut query_table, index.cursor().unwrap()).unwrap();

        for q in &query_table {
            let expected = best.get(&q.kmer).map_or(NO_MATCH, |&(_, id)| id);
            prop_assert_eq!(q.target_id, expected);
        }
    }

    #[test]
    fn prop_filter_keeps_exactly_repeated_pairs(
        raw in prop::collection::vec((0u32..4, prop_oneof![Just(NO_MATCH), 0u32..4], 0u16..50), 0..80),
    ) {
        let mut records: Vec<QueryRecord> = raw
            .iter()
            .map(|&(q, t, pos)| {
                let mut r = QueryRecord::new(q, pos, pos as u64);
                r.target_id = t;
                r
            })
            .collect();

        let mut counts: HashMap<(u32, u32), usize> = HashMap::new();
        for r in &records {
            if r.is_matched() {
                *counts.entry((r.query_id, r.target_id)).or_default() += 1;
            }
        }
        let expected_pairs: BTreeSet<(u32, u32)> = counts
            .iter()
            .filter(|&(_, &n)| n >= MIN_SHARED_KMERS)
            .map(|(&p, _)| p)
            .collect();

        let (kept, stats) = filter_hits(&mut records);
        prop_assert!(kept.windows(2).all(|w| target_group_order(&w[0], &w[1]).is_le()));
        let kept_pairs: BTreeSet<(u32, u32)> = kept.iter().map(|r| (r.query_id, r.target_id)).collect();
        prop_assert_eq!(&kept_pairs, &expected_pairs);
        prop_assert_eq!(stats.kept_pairs as usize, expected_pairs.len());
        let kept_records: usize = expected_pairs.iter().map(|p| counts[p]).sum();
        prop_assert_eq!(kept.len(), kept_records);
    }

    #[test]
    fn prop_table_independent_of_thread_count(
        seqs in prop::collection::vec(protein(), 0..12),
        k in 1usize..=4,
    ) {
        let one = TableBuilder::new(TableConfig::default().k(k).threads(1)).unwrap();
        let many = TableBuilder::new(TableConfig::default().k(k).threads(4)).unwrap();
        let (a, sa) = one.build_target_table(&seqs).unwrap();
        let (b, sb) = many.build_target_table(&seqs).unwrap();
        prop_assert_eq!(sa, sb);
        prop_assert_eq!(a, b);

        let (qa, _) = one.build_query_table(&seqs).unwrap();
        let (qb, _) = many.build_query_table(&seqs).unwrap();
        prop_assert_eq!(qa, qb);
    }
}
