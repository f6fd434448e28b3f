//! Property-based tests for the claim-trie engine.
//!
//! Random operation sequences are replayed against a real database and the
//! committed state is checked against the independent model: node
//! population, parent links, activation bounds, and a full bottom-up root
//! recomputation. A second property drives one block forward and back and
//! requires the tables to return byte-identical.

use proptest::prelude::*;

use lode_claimtrie::cache::ClaimTrieCache;
use lode_claimtrie::types::{ClaimId, Hash256, OutPoint};
use lode_tests::helpers::*;

/// One step of a random workload. Indices are resolved against the live
/// claim/support lists at replay time so removals always target real rows.
#[derive(Clone, Debug)]
enum Step {
    AddClaim { name_idx: usize, amount: i64 },
    AddSupport { name_idx: usize, target: usize, amount: i64 },
    RemoveClaim { target: usize },
    RemoveSupport { target: usize },
    Increment,
}

const NAME_POOL: [&[u8]; 8] = [b"a", b"ab", b"abc", b"b", b"ba", b"c", b"ca", b"cat"];

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => (0..NAME_POOL.len(), 1i64..1_000).prop_map(|(name_idx, amount)| Step::AddClaim {
            name_idx,
            amount
        }),
        2 => (0..NAME_POOL.len(), any::<usize>(), 1i64..500).prop_map(
            |(name_idx, target, amount)| Step::AddSupport {
                name_idx,
                target,
                amount
            }
        ),
        1 => any::<usize>().prop_map(|target| Step::RemoveClaim { target }),
        1 => any::<usize>().prop_map(|target| Step::RemoveSupport { target }),
        3 => Just(Step::Increment),
    ]
}

/// Replays a workload, tracking live rows so removals stay well-formed.
struct Replay {
    next_claim_seed: u8,
    next_support_seed: u8,
    /// (name, claim id, outpoint) of rows not yet removed.
    claims: Vec<(Vec<u8>, ClaimId, OutPoint)>,
    supports: Vec<OutPoint>,
}

impl Replay {
    fn new() -> Self {
        Self {
            next_claim_seed: 0,
            next_support_seed: 0,
            claims: Vec::new(),
            supports: Vec::new(),
        }
    }

    fn run(&mut self, cache: &mut ClaimTrieCache<'_>, steps: &[Step]) {
        for step in steps {
            let height = cache.next_height();
            match step {
                Step::AddClaim { name_idx, amount } => {
                    let seed = self.next_claim_seed;
                    self.next_claim_seed += 1;
                    let name = NAME_POOL[*name_idx].to_vec();
                    cache
                        .add_claim(
                            &name,
                            &claim_outpoint(seed),
                            &cid(seed),
                            *amount,
                            height,
                            None,
                            None,
                        )
                        .unwrap();
                    self.claims.push((name, cid(seed), claim_outpoint(seed)));
                }
                Step::AddSupport {
                    name_idx,
                    target,
                    amount,
                } => {
                    let seed = self.next_support_seed;
                    self.next_support_seed += 1;
                    // Support an existing claim when there is one; a dangling
                    // claim id otherwise (legal, it just matches nothing).
                    let supported = if self.claims.is_empty() {
                        cid(200)
                    } else {
                        self.claims[target % self.claims.len()].1
                    };
                    cache
                        .add_support(
                            NAME_POOL[*name_idx],
                            &support_outpoint(seed),
                            &supported,
                            *amount,
                            height,
                            None,
                        )
                        .unwrap();
                    self.supports.push(support_outpoint(seed));
                }
                Step::RemoveClaim { target } => {
                    if self.claims.is_empty() {
                        continue;
                    }
                    let (_, claim_id, out_point) =
                        self.claims.remove(target % self.claims.len());
                    assert!(cache.remove_claim(&claim_id, &out_point).unwrap().is_some());
                }
                Step::RemoveSupport { target } => {
                    if self.supports.is_empty() {
                        continue;
                    }
                    let out_point = self.supports.remove(target % self.supports.len());
                    assert!(cache.remove_support(&out_point).unwrap().is_some());
                }
                Step::Increment => cache.increment_block().unwrap(),
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// After any workload and a flush, the committed state satisfies the
    /// structural invariants and the root matches the model recomputation.
    #[test]
    fn random_workload_commits_consistent_state(steps in prop::collection::vec(step_strategy(), 1..40)) {
        let dir = tempfile::tempdir().unwrap();
        let mut trie = open_trie(dir.path(), 50);
        {
            let mut cache = ClaimTrieCache::new(&mut trie);
            let mut replay = Replay::new();
            replay.run(&mut cache, &steps);
            cache.increment_block().unwrap();
            let root = cache.get_merkle_hash().unwrap();
            prop_assert!(cache.flush().unwrap());

            let db = open_db(dir.path());
            let next_height = cache.next_height();
            check_trie_invariants(&db, next_height);
            prop_assert_eq!(recompute_root(&db, next_height), root);
        }
    }

    /// One block forward, one block back: the tables come back
    /// byte-identical and the root returns to its snapshot.
    #[test]
    fn single_block_round_trip_is_exact(
        setup in prop::collection::vec(step_strategy(), 1..20),
        block in prop::collection::vec(step_strategy(), 1..10),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let mut trie = open_trie(dir.path(), 50);
        let mut replay = Replay::new();

        // Settle an arbitrary base state.
        {
            let mut cache = ClaimTrieCache::new(&mut trie);
            replay.run(&mut cache, &setup);
            cache.increment_block().unwrap();
            cache.get_merkle_hash().unwrap();
            prop_assert!(cache.flush().unwrap());
        }
        let before_dump = dump_tables(&open_db(dir.path()));
        let before_root = {
            let mut cache = ClaimTrieCache::new(&mut trie);
            cache.get_merkle_hash().unwrap()
        };

        // Apply one block of additions, then unwind it.
        {
            let mut cache = ClaimTrieCache::new(&mut trie);
            let height = cache.next_height();
            let claims_before = replay.claims.len();
            let supports_before = replay.supports.len();
            for step in &block {
                match step {
                    Step::AddClaim { .. } | Step::AddSupport { .. } => {
                        replay.run(&mut cache, std::slice::from_ref(step));
                    }
                    // Keep the block additive so the undo list is just the
                    // new rows, in reverse.
                    _ => {}
                }
            }
            cache.increment_block().unwrap();
            cache.get_merkle_hash().unwrap();
            prop_assert!(cache.flush().unwrap());
            prop_assert_eq!(cache.next_height(), height + 1);

            cache.decrement_block().unwrap();
            for (_, claim_id, out_point) in replay.claims.drain(claims_before..).rev() {
                prop_assert!(cache.remove_claim(&claim_id, &out_point).unwrap().is_some());
            }
            for out_point in replay.supports.drain(supports_before..).rev() {
                prop_assert!(cache.remove_support(&out_point).unwrap().is_some());
            }
            cache.finalize_decrement().unwrap();
            let root: Hash256 = cache.get_merkle_hash().unwrap();
            prop_assert_eq!(root, before_root);
            prop_assert!(cache.flush().unwrap());
        }

        prop_assert_eq!(dump_tables(&open_db(dir.path())), before_dump);
    }
}

#[test]
fn deep_chain_of_prefixes_stays_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let mut trie = open_trie(dir.path(), 10);
    {
        let mut cache = ClaimTrieCache::new(&mut trie);
        // Every prefix of a long name carries a claim.
        let full = b"abcdefgh";
        for len in 1..=full.len() {
            cache
                .add_claim(
                    &full[..len],
                    &claim_outpoint(len as u8),
                    &cid(len as u8),
                    100 + len as i64,
                    10,
                    None,
                    None,
                )
                .unwrap();
        }
        cache.increment_block().unwrap();
        cache.get_merkle_hash().unwrap();
        assert!(cache.flush().unwrap());
    }

    let db = open_db(dir.path());
    check_trie_invariants(&db, trie.next_height());

    // Remove the interior claims; the chain collapses to the two ends.
    {
        let mut cache = ClaimTrieCache::new(&mut trie);
        for len in 2..=7u8 {
            cache
                .remove_claim(&cid(len), &claim_outpoint(len))
                .unwrap()
                .unwrap();
        }
        cache.increment_block().unwrap();
        cache.get_merkle_hash().unwrap();
        assert!(cache.flush().unwrap());
    }
    let db = open_db(dir.path());
    check_trie_invariants(&db, trie.next_height());
    let mut cache = ClaimTrieCache::new(&mut trie);
    let root = cache.get_merkle_hash().unwrap();
    assert_eq!(root, recompute_root(&db, 12));
}
