//! Merkle root computation, inclusion proofs, and consistency checks.
//!
//! Node hashes are computed lazily: mutations only null them out, and the
//! bottom-up sweep here fills them back in when the root is requested. A
//! node's hash covers, per child in name order, the child's continuation
//! byte and its hash lifted through the compressed edge, plus the value
//! hash of the winning claim when the name has been taken over.

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::{ClaimTrieCache, CHILD_HASH_QUERY, PROOF_CLAIM_QUERY};
use crate::error::{ClaimTrieError, ConsistencyError};
use crate::hashes::{complete_hash, double_sha, value_hash, EMPTY_TRIE_HASH};
use crate::types::{Hash256, Height, OutPoint};

/// One node entry on a proof path.
///
/// Children are `(continuation byte, hash)` pairs in byte order; the child
/// leading toward the proven name carries no hash (the verifier recomputes
/// it from the next entry).
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode,
)]
pub struct ProofNode {
    /// Sorted `(byte, hash)` pairs; `None` marks the on-path child.
    pub children: Vec<(u8, Option<Hash256>)>,
    /// Whether this node has a winning claim.
    pub has_value: bool,
    /// The winning claim's value hash; absent on the terminal entry, whose
    /// hash the verifier rebuilds from the proof's outpoint.
    pub value_hash: Option<Hash256>,
}

/// Inclusion proof for a `(name, claim)` pair, root entry first.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct TrieProof {
    /// Proof path entries from the root down to the name.
    pub nodes: Vec<ProofNode>,
    /// Whether the proof commits to the requested claim winning the name.
    pub has_value: bool,
    /// Outpoint of the winning claim, when `has_value`.
    pub out_point: Option<OutPoint>,
    /// Takeover height of the name, when `has_value`.
    pub last_takeover_height: Height,
}

impl TrieProof {
    /// Recompute the root committed by this proof and compare.
    ///
    /// Walks the entries deepest-first; each entry hashes its children
    /// (substituting the previously computed hash for the on-path child)
    /// plus its value hash, terminal value from the proof's outpoint.
    pub fn verify(&self, expected_root: &Hash256) -> bool {
        let mut computed: Option<Hash256> = None;
        for (i, node) in self.nodes.iter().enumerate().rev() {
            let terminal = i + 1 == self.nodes.len();
            let mut buf = Vec::new();
            for (byte, hash) in &node.children {
                buf.push(*byte);
                match hash {
                    Some(h) => buf.extend_from_slice(h.as_bytes()),
                    None => match computed.take() {
                        Some(h) => buf.extend_from_slice(h.as_bytes()),
                        None => return false,
                    },
                }
            }
            if node.has_value {
                let vh = if terminal && self.has_value {
                    match &self.out_point {
                        Some(out_point) => value_hash(out_point, self.last_takeover_height),
                        None => return false,
                    }
                } else {
                    match node.value_hash {
                        Some(h) => h,
                        None => return false,
                    }
                };
                buf.extend_from_slice(vh.as_bytes());
            }
            computed = Some(if buf.is_empty() {
                EMPTY_TRIE_HASH
            } else {
                double_sha(&buf)
            });
        }
        computed.as_ref() == Some(expected_root)
    }
}

impl ClaimTrieCache<'_> {
    /// Hash a single node per the consensus rule, reading its children's
    /// stored hashes.
    pub(crate) fn compute_node_hash(
        &self,
        name: &[u8],
        takeover_height: Height,
    ) -> Result<Hash256, ClaimTrieError> {
        let pos = name.len();
        let children: Vec<(Vec<u8>, Hash256)> = {
            let mut stmt = self.db().prepare_cached(CHILD_HASH_QUERY)?;
            let rows = stmt.query_map(params![name], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<Result<_, _>>()?
        };

        let mut buf = Vec::with_capacity(children.len() * 33 + 32);
        for (child_name, child_hash) in children {
            let lifted = complete_hash(child_hash, &child_name, pos);
            buf.push(child_name[pos]);
            buf.extend_from_slice(lifted.as_bytes());
        }

        if takeover_height > 0 {
            if let Some(claim) = self.get_info_for_name(name)? {
                buf.extend_from_slice(value_hash(&claim.out_point, takeover_height).as_bytes());
            }
        }

        if buf.is_empty() {
            // Only the root may hash to the empty sentinel.
            if !name.is_empty() {
                warn!(name = %String::from_utf8_lossy(name), "corrupt trie near node");
            }
            debug_assert!(name.is_empty());
            return Ok(EMPTY_TRIE_HASH);
        }
        Ok(double_sha(&buf))
    }

    /// The root hash of the trie at the cache's next height.
    ///
    /// Reconciles the structure, then returns the stored root hash when
    /// clean; otherwise sweeps the dirty nodes deepest-first, persisting
    /// each hash. Idempotent: a second call without mutations reads the
    /// stored root and writes nothing.
    pub fn get_merkle_hash(&mut self) -> Result<Hash256, ClaimTrieError> {
        self.ensure_tree_structure_is_up_to_date()?;

        let stored: Option<Hash256> = self
            .db()
            .query_row("SELECT hash FROM node WHERE name = x''", [], |row| {
                row.get(0)
            })
            .optional()?
            .flatten();
        if let Some(hash) = stored {
            return Ok(hash);
        }
        // Dirty nodes outside a transaction would mean an unflushed writer.
        debug_assert!(self.transacting);

        let dirty: Vec<(Vec<u8>, Height)> = {
            let mut stmt = self.db().prepare_cached(
                "SELECT n.name, IFNULL((SELECT CASE WHEN t.claimID IS NULL THEN 0 ELSE t.height END \
                 FROM takeover t WHERE t.name = n.name ORDER BY t.height DESC LIMIT 1), 0) \
                 FROM node n WHERE n.hash IS NULL ORDER BY LENGTH(n.name) DESC",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<Result<_, _>>()?
        };

        let mut hash = EMPTY_TRIE_HASH;
        for (name, takeover_height) in dirty {
            hash = self.compute_node_hash(&name, takeover_height)?;
            self.db().execute(
                "UPDATE node SET hash = ? WHERE name = ?",
                params![hash, name],
            )?;
        }
        // The root has maximal ancestry, so it came last in the sweep.
        Ok(hash)
    }

    /// Build the inclusion proof for `name`, committing to `final_claim` as
    /// its winner when that claim is in fact the current best.
    ///
    /// Entries are emitted per byte of the uncompressed trie: path-
    /// compressed edges expand into single-child entries so that verifiers
    /// need no knowledge of the node layout.
    pub fn get_proof_for_name(
        &mut self,
        name: &[u8],
        final_claim: &crate::types::ClaimId,
    ) -> Result<TrieProof, ClaimTrieError> {
        self.get_merkle_hash()?;

        let mut proof = TrieProof::default();
        let path: Vec<(Vec<u8>, Height)> = {
            let mut stmt = self.db().prepare_cached(PROOF_CLAIM_QUERY)?;
            let rows = stmt.query_map(params![name], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<Result<_, _>>()?
        };

        for (key, takeover_height) in path {
            let info = self.get_info_for_name(&key)?;
            let node_has_value = info.is_some();
            let mut node_value_hash = info
                .as_ref()
                .map(|claim| value_hash(&claim.out_point, takeover_height));

            let pos = key.len();
            let mut children: Vec<(u8, Option<Hash256>)> = Vec::new();
            let mut on_path_edge: Option<Vec<u8>> = None;
            let kids: Vec<(Vec<u8>, Hash256)> = {
                let mut stmt = self.db().prepare_cached(CHILD_HASH_QUERY)?;
                let rows = stmt.query_map(params![key], |row| Ok((row.get(0)?, row.get(1)?)))?;
                rows.collect::<Result<_, _>>()?
            };
            // Children arrive in name order, so the pairs come out sorted
            // by continuation byte.
            for (child_key, child_hash) in kids {
                if name.starts_with(&child_key) {
                    children.push((child_key[pos], None));
                    on_path_edge = Some(child_key);
                    continue;
                }
                let lifted = complete_hash(child_hash, &child_key, pos);
                children.push((child_key[pos], Some(lifted)));
            }

            if key == name {
                proof.has_value =
                    node_has_value && info.as_ref().map(|c| c.claim_id) == Some(*final_claim);
                if proof.has_value {
                    proof.out_point = info.map(|c| c.out_point);
                    proof.last_takeover_height = takeover_height;
                }
                node_value_hash = None;
            }
            proof.nodes.push(ProofNode {
                children,
                has_value: node_has_value,
                value_hash: node_value_hash,
            });

            // A compressed on-path edge expands into single-child entries,
            // one per interior byte, so the verifier can lift the deeper
            // node's hash without knowing the node layout.
            if let Some(edge) = on_path_edge {
                for p in pos + 1..edge.len() {
                    proof.nodes.push(ProofNode {
                        children: vec![(edge[p], None)],
                        has_value: false,
                        value_hash: None,
                    });
                }
            }
        }
        Ok(proof)
    }

    /// Verify database integrity and a sample of node hashes.
    ///
    /// Samples 100 000 random nodes plus the root's direct children; this
    /// is a heuristic spot check, not a full audit.
    pub fn check_consistency(&self) -> Result<(), ClaimTrieError> {
        let messages: Vec<String> = {
            let mut stmt = self.db().prepare("PRAGMA quick_check")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<Result<_, _>>()?
        };
        for message in messages {
            if message != "ok" {
                return Err(ConsistencyError::IntegrityCheck(message).into());
            }
        }

        let sampled: Vec<(Vec<u8>, Option<Hash256>, Height)> = {
            let mut stmt = self.db().prepare(
                "SELECT n.name, n.hash, \
                 IFNULL((SELECT CASE WHEN t.claimID IS NULL THEN 0 ELSE t.height END \
                 FROM takeover t WHERE t.name = n.name ORDER BY t.height DESC LIMIT 1), 0) \
                 FROM node n \
                 WHERE n.name IN (SELECT r.name FROM node r ORDER BY RANDOM() LIMIT 100000) \
                 OR n.parent = x''",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
            rows.collect::<Result<_, _>>()?
        };
        for (name, stored, takeover_height) in sampled {
            let computed = self.compute_node_hash(&name, takeover_height)?;
            if stored != Some(computed) {
                let name_display = String::from_utf8_lossy(&name).into_owned();
                warn!(name = %name_display, "invalid hash at node");
                return Err(ConsistencyError::HashMismatch(name_display).into());
            }
        }
        Ok(())
    }

    /// Validate the persisted trie against a block's committed root.
    ///
    /// Resets the next height to `height + 1`, spot-checks consistency, and
    /// compares the recomputed root. Past the all-claims fork the reverse
    /// claim-id index is (idempotently) created for prefix lookups.
    /// `Ok(false)` rejects the block; storage failures propagate.
    pub fn validate_db(
        &mut self,
        height: Height,
        root_hash: &Hash256,
    ) -> Result<bool, ClaimTrieError> {
        self.next_height = height + 1;
        self.base.next_height = height + 1;

        match self.check_consistency() {
            Ok(()) => {}
            Err(ClaimTrieError::Consistency(err)) => {
                warn!("consistency check failed: {err}");
                return Ok(false);
            }
            Err(err) => return Err(err),
        }

        if self.get_merkle_hash()? != *root_hash {
            warn!("block root claim hash does not match the persisted root");
            return Ok(false);
        }

        if self.next_height > self.base.config.all_claims_in_merkle_fork_height {
            self.db().execute_batch(
                "CREATE UNIQUE INDEX IF NOT EXISTS claim_reverseClaimID ON claim (REVERSE(claimID))",
            )?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrieConfig;
    use crate::store::ClaimTrie;
    use crate::types::ClaimId;

    fn temp_trie(height: Height) -> (ClaimTrie, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = TrieConfig {
            data_dir: dir.path().to_path_buf(),
            height,
            max_removal_workaround_height: 0,
            min_removal_workaround_height: Height::MAX,
            original_claim_expiration_time: 1_000_000,
            ..TrieConfig::default()
        };
        let trie = ClaimTrie::open(config).unwrap();
        (trie, dir)
    }

    fn cid(seed: u8) -> ClaimId {
        ClaimId([seed; 20])
    }

    fn outpoint(seed: u8) -> OutPoint {
        OutPoint::new(Hash256([seed; 32]), 0)
    }

    #[test]
    fn empty_trie_root_is_the_sentinel() {
        let (mut trie, _dir) = temp_trie(0);
        let mut cache = ClaimTrieCache::new(&mut trie);
        assert_eq!(cache.get_merkle_hash().unwrap(), EMPTY_TRIE_HASH);
    }

    #[test]
    fn single_claim_root_matches_manual_computation() {
        let (mut trie, _dir) = temp_trie(10);
        let mut cache = ClaimTrieCache::new(&mut trie);
        cache
            .add_claim(b"cat", &outpoint(1), &cid(1), 100, 10, None, None)
            .unwrap();
        cache.increment_block().unwrap();

        // Node "cat" hashes its value (takeover at 10) alone; the root then
        // folds the edge bytes 't', 'a' and prepends 'c'.
        let node_hash = double_sha(value_hash(&outpoint(1), 10).as_bytes());
        let lifted = complete_hash(node_hash, b"cat", 0);
        let mut buf = vec![b'c'];
        buf.extend_from_slice(lifted.as_bytes());
        let expected = double_sha(&buf);

        assert_eq!(cache.get_merkle_hash().unwrap(), expected);
    }

    #[test]
    fn merkle_hash_is_idempotent() {
        let (mut trie, _dir) = temp_trie(10);
        let mut cache = ClaimTrieCache::new(&mut trie);
        cache
            .add_claim(b"cat", &outpoint(1), &cid(1), 100, 10, None, None)
            .unwrap();
        cache.increment_block().unwrap();

        let first = cache.get_merkle_hash().unwrap();
        let dirty_after: i64 = cache
            .db()
            .query_row("SELECT COUNT(*) FROM node WHERE hash IS NULL", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(dirty_after, 0);
        assert_eq!(cache.get_merkle_hash().unwrap(), first);
    }

    #[test]
    fn root_covers_every_mutation_in_transaction() {
        let (mut trie, _dir) = temp_trie(10);
        let mut cache = ClaimTrieCache::new(&mut trie);
        cache
            .add_claim(b"cat", &outpoint(1), &cid(1), 100, 10, None, None)
            .unwrap();
        cache.increment_block().unwrap();
        let with_one = cache.get_merkle_hash().unwrap();

        cache
            .add_claim(b"dog", &outpoint(2), &cid(2), 100, 11, None, None)
            .unwrap();
        cache.increment_block().unwrap();
        let with_two = cache.get_merkle_hash().unwrap();
        assert_ne!(with_one, with_two);
    }

    #[test]
    fn proof_verifies_for_single_claim() {
        let (mut trie, _dir) = temp_trie(10);
        let mut cache = ClaimTrieCache::new(&mut trie);
        cache
            .add_claim(b"cat", &outpoint(1), &cid(1), 100, 10, None, None)
            .unwrap();
        cache.increment_block().unwrap();

        let root = cache.get_merkle_hash().unwrap();
        let proof = cache.get_proof_for_name(b"cat", &cid(1)).unwrap();
        assert!(proof.has_value);
        assert_eq!(proof.out_point, Some(outpoint(1)));
        assert_eq!(proof.last_takeover_height, 10);
        assert!(proof.verify(&root));
        assert!(!proof.verify(&EMPTY_TRIE_HASH));
    }

    #[test]
    fn proof_for_wrong_claim_has_no_value() {
        let (mut trie, _dir) = temp_trie(10);
        let mut cache = ClaimTrieCache::new(&mut trie);
        cache
            .add_claim(b"cat", &outpoint(1), &cid(1), 100, 10, None, None)
            .unwrap();
        cache.increment_block().unwrap();

        let proof = cache.get_proof_for_name(b"cat", &cid(9)).unwrap();
        assert!(!proof.has_value);
        assert!(proof.out_point.is_none());
    }

    #[test]
    fn proof_verifies_with_sibling_names() {
        let (mut trie, _dir) = temp_trie(10);
        let mut cache = ClaimTrieCache::new(&mut trie);
        cache
            .add_claim(b"test", &outpoint(1), &cid(1), 100, 10, None, None)
            .unwrap();
        cache
            .add_claim(b"team", &outpoint(2), &cid(2), 50, 10, None, None)
            .unwrap();
        cache.increment_block().unwrap();

        let root = cache.get_merkle_hash().unwrap();
        for (name, id) in [(&b"test"[..], cid(1)), (&b"team"[..], cid(2))] {
            let proof = cache.get_proof_for_name(name, &id).unwrap();
            assert!(proof.has_value, "no value for {name:?}");
            assert!(proof.verify(&root), "proof failed for {name:?}");
        }
    }

    #[test]
    fn proof_serialization_round_trip() {
        let (mut trie, _dir) = temp_trie(10);
        let mut cache = ClaimTrieCache::new(&mut trie);
        cache
            .add_claim(b"cat", &outpoint(1), &cid(1), 100, 10, None, None)
            .unwrap();
        cache.increment_block().unwrap();

        let root = cache.get_merkle_hash().unwrap();
        let proof = cache.get_proof_for_name(b"cat", &cid(1)).unwrap();
        let encoded = bincode::encode_to_vec(&proof, bincode::config::standard()).unwrap();
        let (decoded, _): (TrieProof, usize) =
            bincode::decode_from_slice(&encoded, bincode::config::standard()).unwrap();
        assert_eq!(proof, decoded);
        assert!(decoded.verify(&root));
    }

    #[test]
    fn consistency_check_passes_on_clean_state() {
        let (mut trie, _dir) = temp_trie(10);
        let mut cache = ClaimTrieCache::new(&mut trie);
        cache
            .add_claim(b"cat", &outpoint(1), &cid(1), 100, 10, None, None)
            .unwrap();
        cache.increment_block().unwrap();
        let root = cache.get_merkle_hash().unwrap();
        assert!(cache.flush().unwrap());

        assert!(cache.check_consistency().is_ok());
        assert!(cache.validate_db(10, &root).unwrap());
    }

    #[test]
    fn validate_db_rejects_wrong_root() {
        let (mut trie, _dir) = temp_trie(10);
        let mut cache = ClaimTrieCache::new(&mut trie);
        cache
            .add_claim(b"cat", &outpoint(1), &cid(1), 100, 10, None, None)
            .unwrap();
        cache.increment_block().unwrap();
        cache.get_merkle_hash().unwrap();
        assert!(cache.flush().unwrap());

        assert!(!cache.validate_db(10, &Hash256([0xde; 32])).unwrap());
    }

    #[test]
    fn consistency_detects_corrupted_node_hash() {
        let (mut trie, _dir) = temp_trie(10);
        let mut cache = ClaimTrieCache::new(&mut trie);
        cache
            .add_claim(b"cat", &outpoint(1), &cid(1), 100, 10, None, None)
            .unwrap();
        cache.increment_block().unwrap();
        cache.get_merkle_hash().unwrap();
        assert!(cache.flush().unwrap());

        cache
            .db()
            .execute(
                "UPDATE node SET hash = ? WHERE name = x'636174'",
                params![Hash256([0xee; 32])],
            )
            .unwrap();
        assert!(matches!(
            cache.check_consistency(),
            Err(ClaimTrieError::Consistency(ConsistencyError::HashMismatch(_)))
        ));
    }
}
