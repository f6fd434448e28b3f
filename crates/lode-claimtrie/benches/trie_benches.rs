//! Criterion benchmarks for claim-trie critical operations.
//!
//! Covers: the hashing primitives, block application over a populated trie,
//! and the dirty-sweep root recomputation.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use lode_claimtrie::cache::ClaimTrieCache;
use lode_claimtrie::config::TrieConfig;
use lode_claimtrie::hashes::{complete_hash, double_sha, value_hash};
use lode_claimtrie::store::ClaimTrie;
use lode_claimtrie::types::{ClaimId, Hash256, Height, OutPoint};

fn bench_config(dir: &std::path::Path) -> TrieConfig {
    TrieConfig {
        data_dir: dir.to_path_buf(),
        height: 10,
        max_removal_workaround_height: 0,
        min_removal_workaround_height: Height::MAX,
        original_claim_expiration_time: 1_000_000,
        ..TrieConfig::default()
    }
}

/// Deterministic name for claim `i`: shared prefixes force splits.
fn name(i: u32) -> Vec<u8> {
    format!("bench-{:03}-{}", i % 50, i).into_bytes()
}

fn populate(cache: &mut ClaimTrieCache<'_>, claims: u32) {
    for i in 0..claims {
        let mut id = [0u8; 20];
        id[..4].copy_from_slice(&i.to_be_bytes());
        let mut txid = [0u8; 32];
        txid[..4].copy_from_slice(&i.to_be_bytes());
        cache
            .add_claim(
                &name(i),
                &OutPoint::new(Hash256(txid), 0),
                &ClaimId(id),
                100 + i as i64,
                10,
                None,
                None,
            )
            .unwrap();
    }
    cache.increment_block().unwrap();
}

fn bench_hash_primitives(c: &mut Criterion) {
    let out_point = OutPoint::new(Hash256([0x11; 32]), 3);
    c.bench_function("double_sha_64b", |b| {
        b.iter(|| double_sha(black_box(&[0xabu8; 64])))
    });
    c.bench_function("value_hash", |b| {
        b.iter(|| value_hash(black_box(&out_point), black_box(500_000)))
    });
    c.bench_function("complete_hash_32_byte_edge", |b| {
        b.iter(|| complete_hash(black_box(Hash256([7; 32])), black_box(&[0x61u8; 32]), 0))
    });
}

fn bench_root_recompute(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let mut trie = ClaimTrie::open(bench_config(dir.path())).unwrap();
    let mut cache = ClaimTrieCache::new(&mut trie);
    populate(&mut cache, 1_000);
    cache.get_merkle_hash().unwrap();

    let mut id = [0u8; 20];
    id[..4].copy_from_slice(&17u32.to_be_bytes());
    let mut txid = [0u8; 32];
    txid[..4].copy_from_slice(&17u32.to_be_bytes());
    let out_point = OutPoint::new(Hash256(txid), 0);
    let claim_id = ClaimId(id);

    c.bench_function("merkle_root_1k_claims_one_dirty_leaf", |b| {
        b.iter(|| {
            // Touch one claim so the leaf and every ancestor recompute,
            // then restore the identical row for a steady state.
            let removed = cache.remove_claim(&claim_id, &out_point).unwrap().unwrap();
            cache
                .add_claim(
                    &name(17),
                    &out_point,
                    &claim_id,
                    117,
                    10,
                    Some(removed.valid_height),
                    Some(removed.original_height),
                )
                .unwrap();
            black_box(cache.get_merkle_hash().unwrap())
        })
    });
}

fn bench_block_increment(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let mut trie = ClaimTrie::open(bench_config(dir.path())).unwrap();
    let mut cache = ClaimTrieCache::new(&mut trie);
    populate(&mut cache, 1_000);

    c.bench_function("increment_block_quiet", |b| {
        b.iter(|| cache.increment_block().unwrap())
    });
}

criterion_group!(
    benches,
    bench_hash_primitives,
    bench_root_recompute,
    bench_block_increment
);
criterion_main!(benches);
