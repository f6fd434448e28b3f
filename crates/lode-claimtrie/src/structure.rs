//! Trie structure maintenance.
//!
//! Claims are inserted and removed without touching parent links; before any
//! hash computation the dirty (hash-null) nodes are reconciled here: emptied
//! nodes are pruned upward, parents are recomputed as the longest existing
//! prefix, split nodes are introduced where two names diverge inside a
//! compressed edge, and finally every ancestor of a dirty node is dirtied.

use rusqlite::{params, OptionalExtension};
use tracing::debug;

use crate::cache::ClaimTrieCache;
use crate::error::ClaimTrieError;

/// Longest existing node whose name is a strict prefix of the bound name,
/// found by walking the prefix chain through `POPS`.
const PARENT_QUERY: &str = "SELECT MAX(name) FROM node WHERE \
     name IN (WITH RECURSIVE prefix(p) AS (VALUES(?) UNION ALL \
     SELECT POPS(p) FROM prefix WHERE p != x'') SELECT p FROM prefix)";

const INSERT_NODE_QUERY: &str = "INSERT INTO node(name, parent, hash) VALUES(?, ?, NULL) \
     ON CONFLICT(name) DO UPDATE SET parent = excluded.parent, hash = NULL";

/// Transitively null the hash of every ancestor of a dirty node.
const PERCOLATE_QUERY: &str = "UPDATE node SET hash = NULL WHERE name IN (WITH RECURSIVE prefix(p) AS \
     (SELECT parent FROM node WHERE hash IS NULL UNION SELECT parent FROM prefix, node \
     WHERE name = prefix.p AND prefix.p != x'') SELECT p FROM prefix)";

impl ClaimTrieCache<'_> {
    /// Remove `name` if it is prunable: not root, no active claims, and at
    /// most one child. A single child is rewired to its grandparent.
    ///
    /// On deletion `parent` receives the removed node's parent so the caller
    /// can continue pruning upward; `claims` always receives the node's
    /// active-claim count.
    pub(crate) fn delete_node_if_possible(
        &self,
        name: &[u8],
        parent: &mut Vec<u8>,
        claims: &mut i64,
    ) -> Result<bool, ClaimTrieError> {
        if name.is_empty() {
            return Ok(false);
        }
        *claims = self.db().query_row(
            "SELECT COUNT(*) FROM (SELECT 1 FROM claim \
             WHERE nodeName = ?1 AND activationHeight < ?2 AND expirationHeight >= ?2 LIMIT 1)",
            params![name, self.next_height],
            |row| row.get(0),
        )?;
        if *claims > 0 {
            return Ok(false);
        }

        // Child parents are already correct here: dirty names are processed
        // shortest-first, so descendants were reparented before us.
        let (child_count, child_name): (i64, Option<Vec<u8>>) = self.db().query_row(
            "SELECT COUNT(*), MAX(name) FROM node WHERE parent = ?",
            params![name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if child_count > 1 {
            return Ok(false);
        }
        debug!(
            name = %String::from_utf8_lossy(name),
            children = child_count,
            "removing node"
        );

        let row: Option<Option<Vec<u8>>> = self
            .db()
            .query_row("SELECT parent FROM node WHERE name = ?", params![name], |r| {
                r.get(0)
            })
            .optional()?;
        let Some(own_parent) = row else {
            // Already deleted by an earlier pass; nothing left to clean up.
            return Ok(true);
        };
        *parent = own_parent.unwrap_or_default();

        let deleted = self
            .db()
            .execute("DELETE FROM node WHERE name = ?", params![name])?
            > 0;
        if deleted && child_count == 1 {
            // The orphaned child skips us and points at its grandparent.
            self.db().execute(
                "UPDATE node SET parent = ? WHERE name = ?",
                params![&*parent, child_name],
            )?;
        }
        if deleted {
            self.db().execute(
                "UPDATE node SET hash = NULL WHERE name = ?",
                params![&*parent],
            )?;
        }
        Ok(deleted)
    }

    /// Reconcile node rows with the current claim set so that parent links
    /// and the node population match the trie invariants. Runs before every
    /// root-hash computation; a no-op outside a transaction.
    pub(crate) fn ensure_tree_structure_is_up_to_date(&self) -> Result<(), ClaimTrieError> {
        if !self.transacting {
            return Ok(());
        }

        let mut names: Vec<Vec<u8>> = {
            let mut stmt = self
                .db()
                .prepare_cached("SELECT name FROM node WHERE hash IS NULL")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<Result<_, _>>()?
        };
        if names.is_empty() {
            return Ok(());
        }
        // Shortest (ancestor) names first, so reparenting sees settled
        // ancestors and pruning sees settled descendants.
        names.sort();

        for name in &names {
            let mut claims = 0i64;
            let mut parent: Vec<u8> = Vec::new();
            let mut node = name.clone();
            while self.delete_node_if_possible(&node, &mut parent, &mut claims)? {
                node = parent.clone();
            }
            if node != *name || name.is_empty() || claims <= 0 {
                // Survived with no claims: a legitimate branch point whose
                // links are already right, or the node went away entirely.
                continue;
            }

            let found: Option<Vec<u8>> = self.db().query_row(
                PARENT_QUERY,
                params![&name[..name.len() - 1]],
                |row| row.get(0),
            )?;
            let mut parent = found.unwrap_or_default();

            // A sibling sharing our next byte forces a split node at the
            // longest common prefix.
            let prefix_len = parent.len() + 1;
            let siblings: Vec<Vec<u8>> = {
                let mut stmt = self
                    .db()
                    .prepare_cached("SELECT name FROM node WHERE parent = ?")?;
                let rows = stmt.query_map(params![parent], |row| row.get(0))?;
                rows.collect::<Result<_, _>>()?
            };
            for sibling in siblings {
                if sibling.len() < prefix_len
                    || name.len() < prefix_len
                    || sibling[..prefix_len] != name[..prefix_len]
                {
                    continue;
                }
                let mut split = prefix_len;
                while split < sibling.len() && split < name.len() && sibling[split] == name[split] {
                    split += 1;
                }
                let split_name = &name[..split];
                self.db().execute(
                    "UPDATE node SET parent = ? WHERE name = ?",
                    params![split_name, sibling],
                )?;
                if split == name.len() {
                    // The node being inserted is itself the split point.
                    break;
                }
                debug!(
                    split = %String::from_utf8_lossy(split_name),
                    sibling = %String::from_utf8_lossy(&sibling),
                    "inserting split node"
                );
                self.db()
                    .execute(INSERT_NODE_QUERY, params![split_name, parent])?;
                parent = split_name.to_vec();
                break;
            }

            self.db().execute(INSERT_NODE_QUERY, params![name, parent])?;
        }

        self.db().execute(PERCOLATE_QUERY, [])?;
        Ok(())
    }
}
