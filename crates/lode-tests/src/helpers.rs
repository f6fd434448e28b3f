//! Shared test helpers: fixtures, table dumps, and an independent model of
//! the trie used to cross-check node population and root hashes.
//!
//! The model rebuilds the radix structure from the committed `claim` table
//! alone and recomputes every hash bottom-up from the primitives, so a
//! mismatch pins a defect in the engine's incremental maintenance rather
//! than in the hashing rules.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use rusqlite::Connection;

use lode_claimtrie::config::TrieConfig;
use lode_claimtrie::hashes::{complete_hash, double_sha, value_hash, EMPTY_TRIE_HASH};
use lode_claimtrie::store::ClaimTrie;
use lode_claimtrie::types::{ClaimId, Hash256, Height, OutPoint};

/// Test configuration: tiny cache, no forks in range, long expirations.
pub fn test_config(dir: &Path, height: Height) -> TrieConfig {
    TrieConfig {
        data_dir: dir.to_path_buf(),
        cache_bytes: 1 << 20,
        wipe: false,
        height,
        normalized_name_fork_height: Height::MAX,
        min_removal_workaround_height: Height::MAX,
        max_removal_workaround_height: 0,
        extended_claim_expiration_fork_height: Height::MAX,
        all_claims_in_merkle_fork_height: Height::MAX,
        original_claim_expiration_time: 1_000_000,
        extended_claim_expiration_time: 2_000_000,
        proportional_delay_factor: 32,
    }
}

/// Open a trie under `dir` starting at `height`.
pub fn open_trie(dir: &Path, height: Height) -> ClaimTrie {
    ClaimTrie::open(test_config(dir, height)).unwrap()
}

/// Open the committed database file directly for inspection.
pub fn open_db(dir: &Path) -> Connection {
    Connection::open(dir.join("claims.sqlite")).unwrap()
}

/// Claim id from a seed byte.
pub fn cid(seed: u8) -> ClaimId {
    ClaimId([seed; 20])
}

/// Outpoint for claim number `seed` (distinct txid space from supports).
pub fn claim_outpoint(seed: u8) -> OutPoint {
    let mut txid = [0u8; 32];
    txid[0] = 1;
    txid[1] = seed;
    OutPoint::new(Hash256(txid), 0)
}

/// Outpoint for support number `seed`.
pub fn support_outpoint(seed: u8) -> OutPoint {
    let mut txid = [0u8; 32];
    txid[0] = 2;
    txid[1] = seed;
    OutPoint::new(Hash256(txid), 0)
}

/// Serialize every table row into comparable strings, stable order.
pub fn dump_tables(db: &Connection) -> Vec<String> {
    let mut out = Vec::new();
    for (table, order) in [
        ("node", "name"),
        ("claim", "claimID"),
        ("support", "txID, txN"),
        ("takeover", "name, height"),
    ] {
        let mut stmt = db
            .prepare(&format!("SELECT * FROM {table} ORDER BY {order}"))
            .unwrap();
        let columns = stmt.column_count();
        let mut rows = stmt.query([]).unwrap();
        while let Some(row) = rows.next().unwrap() {
            let mut line = format!("{table}:");
            for i in 0..columns {
                let value: rusqlite::types::Value = row.get(i).unwrap();
                line.push_str(&format!("|{value:?}"));
            }
            out.push(line);
        }
    }
    out
}

struct ClaimRow {
    node_name: Vec<u8>,
    claim_id: ClaimId,
    out_point: OutPoint,
    amount: i64,
    update_height: Height,
}

struct SupportRow {
    node_name: Vec<u8>,
    supported_claim_id: ClaimId,
    amount: i64,
}

fn load_active_claims(db: &Connection, next_height: Height) -> Vec<ClaimRow> {
    let mut stmt = db
        .prepare(
            "SELECT nodeName, claimID, txID, txN, amount, updateHeight FROM claim \
             WHERE activationHeight < ?1 AND expirationHeight >= ?1",
        )
        .unwrap();
    let rows = stmt
        .query_map([next_height], |row| {
            Ok(ClaimRow {
                node_name: row.get(0)?,
                claim_id: row.get(1)?,
                out_point: OutPoint::new(row.get(2)?, row.get(3)?),
                amount: row.get(4)?,
                update_height: row.get(5)?,
            })
        })
        .unwrap();
    rows.collect::<Result<_, _>>().unwrap()
}

fn load_active_supports(db: &Connection, next_height: Height) -> Vec<SupportRow> {
    let mut stmt = db
        .prepare(
            "SELECT nodeName, supportedClaimID, amount FROM support \
             WHERE activationHeight < ?1 AND expirationHeight >= ?1",
        )
        .unwrap();
    let rows = stmt
        .query_map([next_height], |row| {
            Ok(SupportRow {
                node_name: row.get(0)?,
                supported_claim_id: row.get(1)?,
                amount: row.get(2)?,
            })
        })
        .unwrap();
    rows.collect::<Result<_, _>>().unwrap()
}

fn longest_common_prefix(a: &[u8], b: &[u8]) -> Vec<u8> {
    let len = a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count();
    a[..len].to_vec()
}

/// The node set the trie must hold: every name with an active claim, every
/// branch point between two such names, and the root.
pub fn expected_node_set(db: &Connection, next_height: Height) -> BTreeSet<Vec<u8>> {
    let mut names: BTreeSet<Vec<u8>> = load_active_claims(db, next_height)
        .into_iter()
        .map(|c| c.node_name)
        .collect();
    let sorted: Vec<Vec<u8>> = names.iter().cloned().collect();
    for pair in sorted.windows(2) {
        names.insert(longest_common_prefix(&pair[0], &pair[1]));
    }
    names.insert(Vec::new());
    names
}

fn takeover_height(db: &Connection, name: &[u8]) -> Height {
    db.query_row(
        "SELECT CASE WHEN claimID IS NULL THEN 0 ELSE height END FROM takeover \
         WHERE name = ? ORDER BY height DESC LIMIT 1",
        [name],
        |row| row.get(0),
    )
    .unwrap_or(0)
}

/// Winning outpoint on a node name under the effective-amount ordering.
fn best_claim_outpoint(
    claims: &[ClaimRow],
    supports: &[SupportRow],
    name: &[u8],
) -> Option<OutPoint> {
    let mut candidates: Vec<(i64, Height, OutPoint)> = claims
        .iter()
        .filter(|c| c.node_name == name)
        .map(|c| {
            let backing: i64 = supports
                .iter()
                .filter(|s| s.supported_claim_id == c.claim_id && s.node_name == name)
                .map(|s| s.amount)
                .sum();
            (c.amount + backing, c.update_height, c.out_point.clone())
        })
        .collect();
    candidates.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then(a.1.cmp(&b.1))
            .then(a.2.cmp(&b.2))
    });
    candidates.into_iter().next().map(|(_, _, out_point)| out_point)
}

/// Recompute the root hash bottom-up from the committed tables, without
/// consulting the `node` table at all.
pub fn recompute_root(db: &Connection, next_height: Height) -> Hash256 {
    let claims = load_active_claims(db, next_height);
    let supports = load_active_supports(db, next_height);
    let nodes = expected_node_set(db, next_height);

    // Children per node under longest-strict-prefix parentage.
    let mut children: BTreeMap<Vec<u8>, Vec<Vec<u8>>> = BTreeMap::new();
    for name in &nodes {
        if name.is_empty() {
            continue;
        }
        let parent = nodes
            .iter()
            .filter(|p| p.len() < name.len() && name.starts_with(p.as_slice()))
            .max_by_key(|p| p.len())
            .cloned()
            .unwrap_or_default();
        children.entry(parent).or_default().push(name.clone());
    }

    let mut order: Vec<Vec<u8>> = nodes.iter().cloned().collect();
    order.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));

    let mut hashes: BTreeMap<Vec<u8>, Hash256> = BTreeMap::new();
    for name in order {
        let mut buf = Vec::new();
        if let Some(kids) = children.get(&name) {
            let mut kids = kids.clone();
            kids.sort();
            for child in kids {
                let lifted = complete_hash(hashes[&child], &child, name.len());
                buf.push(child[name.len()]);
                buf.extend_from_slice(lifted.as_bytes());
            }
        }
        let takeover = takeover_height(db, &name);
        if takeover > 0 {
            if let Some(out_point) = best_claim_outpoint(&claims, &supports, &name) {
                buf.extend_from_slice(value_hash(&out_point, takeover).as_bytes());
            }
        }
        let hash = if buf.is_empty() {
            EMPTY_TRIE_HASH
        } else {
            double_sha(&buf)
        };
        hashes.insert(name, hash);
    }
    hashes[&Vec::new()]
}

/// Assert the structural invariants over a committed database.
pub fn check_trie_invariants(db: &Connection, next_height: Height) {
    let rows: Vec<(Vec<u8>, Option<Vec<u8>>)> = {
        let mut stmt = db.prepare("SELECT name, parent FROM node").unwrap();
        let mapped = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap();
        mapped.collect::<Result<_, _>>().unwrap()
    };
    let node_names: BTreeSet<Vec<u8>> = rows.iter().map(|(name, _)| name.clone()).collect();

    // The node population is exactly claims plus branch points plus root.
    assert_eq!(
        node_names,
        expected_node_set(db, next_height),
        "node population mismatch at height {next_height}"
    );

    // Every parent link points at the longest existing strict prefix.
    for (name, parent) in &rows {
        if name.is_empty() {
            continue;
        }
        let parent = parent.clone().unwrap_or_default();
        assert!(
            name.starts_with(parent.as_slice()) && parent.len() < name.len(),
            "parent {parent:?} is not a strict prefix of {name:?}"
        );
        let longest = node_names
            .iter()
            .filter(|p| p.len() < name.len() && name.starts_with(p.as_slice()))
            .max_by_key(|p| p.len())
            .cloned()
            .unwrap_or_default();
        assert_eq!(parent, longest, "parent of {name:?} is not the longest prefix");
    }

    // Activation may only ever be pulled earlier than the natural height.
    for table in ["claim", "support"] {
        let violations: i64 = db
            .query_row(
                &format!("SELECT COUNT(*) FROM {table} WHERE activationHeight > validHeight"),
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(violations, 0, "{table} rows activate after their natural height");
    }
}
