//! Transactional cache over the claim-trie store.
//!
//! [`ClaimTrieCache`] borrows the base [`ClaimTrie`] exclusively and wraps
//! every mutation in a single implicit SQLite transaction: the first write
//! begins it, [`flush`](ClaimTrieCache::flush) commits it, and dropping the
//! cache without flushing rolls everything back. Block application is
//! [`increment_block`](ClaimTrieCache::increment_block); rewind is
//! [`decrement_block`](ClaimTrieCache::decrement_block) followed by
//! [`finalize_decrement`](ClaimTrieCache::finalize_decrement), and together
//! they restore the pre-block state exactly.

use std::collections::HashSet;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, error};

use crate::constants::{MAX_ACTIVATION_DELAY, MAX_CLAIM_NAME_SIZE};
use crate::error::ClaimTrieError;
use crate::store::ClaimTrie;
use crate::types::{
    Amount, ClaimId, ClaimValue, ClaimWithSupports, Height, NameClaims, OutPoint, RemovedClaim,
    RemovedSupport, SupportValue,
};
use crate::workarounds::{has_takeover_workaround, TAKEOVER_WORKAROUND_CUTOFF};

/// Children of a node with their stored hashes, in trie order.
pub(crate) const CHILD_HASH_QUERY: &str =
    "SELECT name, hash FROM node WHERE parent = ? ORDER BY name";

/// Active claims on a node name, best first: effective amount (own amount
/// plus matched active supports) descending, then oldest update, then
/// outpoint order.
macro_rules! claim_hash_query {
    () => {
        "SELECT c.txID, c.txN, c.claimID, c.updateHeight, c.activationHeight, c.amount, \
         (SELECT IFNULL(SUM(s.amount),0)+c.amount FROM support s \
         WHERE s.supportedClaimID = c.claimID AND s.nodeName = c.nodeName \
         AND s.activationHeight < ?1 AND s.expirationHeight >= ?1) as effectiveAmount \
         FROM claim c WHERE c.nodeName = ?2 AND c.activationHeight < ?1 AND c.expirationHeight >= ?1 \
         ORDER BY effectiveAmount DESC, c.updateHeight, c.txID, c.txN"
    };
}

pub(crate) const CLAIM_HASH_QUERY: &str = claim_hash_query!();
pub(crate) const CLAIM_HASH_QUERY_LIMIT: &str = concat!(claim_hash_query!(), " LIMIT 1");

/// All existing nodes on the path from the root to a name, with each node's
/// takeover height (0 when the latest takeover row carries no winner).
pub(crate) const PROOF_CLAIM_QUERY: &str =
    "SELECT n.name, IFNULL((SELECT CASE WHEN t.claimID IS NULL THEN 0 ELSE t.height END \
     FROM takeover t WHERE t.name = n.name ORDER BY t.height DESC LIMIT 1), 0) FROM node n \
     WHERE n.name IN (WITH RECURSIVE prefix(p) AS (VALUES(?) UNION ALL \
     SELECT POPS(p) FROM prefix WHERE p != x'') SELECT p FROM prefix) \
     ORDER BY n.name";

/// Transactional view over a [`ClaimTrie`].
///
/// All reads go through the same connection as the writes and therefore see
/// in-progress state. One cache exists per base at a time; the exclusive
/// borrow is the single-writer discipline.
pub struct ClaimTrieCache<'a> {
    pub(crate) base: &'a mut ClaimTrie,
    pub(crate) next_height: Height,
    pub(crate) transacting: bool,
    /// Names whose node survived a claim removal only as an ancestor of
    /// other claims; a later add on such a name gets a zero delay. Only
    /// populated inside the removal-workaround height window.
    pub(crate) removal_workaround: HashSet<Vec<u8>>,
}

impl<'a> ClaimTrieCache<'a> {
    /// Create a cache over the base trie, starting at its next height.
    pub fn new(base: &'a mut ClaimTrie) -> Self {
        let next_height = base.next_height;
        Self {
            base,
            next_height,
            transacting: false,
            removal_workaround: HashSet::new(),
        }
    }

    pub(crate) fn db(&self) -> &Connection {
        &self.base.db
    }

    /// The next block height to be applied.
    pub fn next_height(&self) -> Height {
        self.next_height
    }

    fn ensure_transacting(&mut self) -> Result<(), ClaimTrieError> {
        if !self.transacting {
            debug_assert!(self.db().is_autocommit());
            self.db().execute_batch("BEGIN")?;
            self.transacting = true;
        }
        Ok(())
    }

    /// Claim lifetime in blocks for entries made at the current height.
    fn expiration_time(&self) -> Height {
        if self.next_height >= self.base.config.extended_claim_expiration_fork_height {
            self.base.config.extended_claim_expiration_time
        } else {
            self.base.config.original_claim_expiration_time
        }
    }

    /// Hook mapping a submitted name to its node name.
    ///
    /// Identity here; normalization past the name fork is layered on top of
    /// this cache and overrides only this mapping.
    pub(crate) fn adjust_name_for_valid_height(&self, name: &[u8], _valid_height: Height) -> Vec<u8> {
        name.to_vec()
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Insert a claim.
    ///
    /// `valid_height` and `original_height` are `None` for fresh entries
    /// (the delay rule computes the activation height); undo paths pass the
    /// recorded values to restore the original rows exactly.
    pub fn add_claim(
        &mut self,
        name: &[u8],
        out_point: &OutPoint,
        claim_id: &ClaimId,
        amount: Amount,
        height: Height,
        valid_height: Option<Height>,
        original_height: Option<Height>,
    ) -> Result<bool, ClaimTrieError> {
        self.ensure_transacting()?;

        // An update spends the previous entry before re-adding, so there is
        // never a conflicting row here; the caller carries the spent entry's
        // heights across the remove/add pair.
        let valid_height = match valid_height {
            Some(h) if h > 0 => h,
            _ => height + self.get_delay_for_name(name, claim_id)?,
        };
        let original_height = match original_height {
            Some(h) if h > 0 => h,
            _ => height,
        };

        let node_name = self.adjust_name_for_valid_height(name, valid_height);
        let expires = height + self.expiration_time();

        self.db().execute(
            "INSERT INTO claim(claimID, name, nodeName, txID, txN, amount, originalHeight, \
             updateHeight, validHeight, activationHeight, expirationHeight) \
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                claim_id,
                name,
                node_name,
                out_point.txid,
                out_point.index,
                amount,
                original_height,
                height,
                valid_height,
                valid_height,
                expires
            ],
        )?;

        if valid_height < self.next_height {
            self.db().execute(
                "INSERT INTO node(name) VALUES(?) ON CONFLICT(name) DO UPDATE SET hash = NULL",
                params![node_name],
            )?;
        }
        Ok(true)
    }

    /// Insert a support for a claim. Never creates a node row, only dirties
    /// an existing one.
    pub fn add_support(
        &mut self,
        name: &[u8],
        out_point: &OutPoint,
        supported_claim_id: &ClaimId,
        amount: Amount,
        height: Height,
        valid_height: Option<Height>,
    ) -> Result<bool, ClaimTrieError> {
        self.ensure_transacting()?;

        let valid_height = match valid_height {
            Some(h) if h >= 0 => h,
            _ => height + self.get_delay_for_name(name, supported_claim_id)?,
        };
        let node_name = self.adjust_name_for_valid_height(name, valid_height);
        let expires = height + self.expiration_time();

        self.db().execute(
            "INSERT INTO support(supportedClaimID, name, nodeName, txID, txN, amount, \
             blockHeight, validHeight, activationHeight, expirationHeight) \
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                supported_claim_id,
                name,
                node_name,
                out_point.txid,
                out_point.index,
                amount,
                height,
                valid_height,
                valid_height,
                expires
            ],
        )?;

        if valid_height < self.next_height {
            self.db().execute(
                "UPDATE node SET hash = NULL WHERE name = ?",
                params![node_name],
            )?;
        }
        Ok(true)
    }

    /// Remove an unexpired claim, returning the heights the caller needs for
    /// undo records. `Ok(None)` when no matching row exists.
    pub fn remove_claim(
        &mut self,
        claim_id: &ClaimId,
        out_point: &OutPoint,
    ) -> Result<Option<RemovedClaim>, ClaimTrieError> {
        self.ensure_transacting()?;

        let found: Option<RemovedClaim> = {
            let mut stmt = self.db().prepare_cached(
                "SELECT nodeName, activationHeight, originalHeight FROM claim \
                 WHERE claimID = ? AND txID = ? AND txN = ? AND expirationHeight >= ?",
            )?;
            stmt.query_row(
                params![claim_id, out_point.txid, out_point.index, self.next_height],
                |row| {
                    Ok(RemovedClaim {
                        node_name: row.get(0)?,
                        valid_height: row.get(1)?,
                        original_height: row.get(2)?,
                    })
                },
            )
            .optional()?
        };
        let Some(removed) = found else {
            return Ok(None);
        };

        let deleted = self.db().execute(
            "DELETE FROM claim WHERE claimID = ? AND txID = ? AND txN = ?",
            params![claim_id, out_point.txid, out_point.index],
        )?;
        if deleted == 0 {
            return Ok(None);
        }
        self.db().execute(
            "UPDATE node SET hash = NULL WHERE name = ?",
            params![removed.node_name],
        )?;

        // The node may survive purely as an ancestor of deeper claims. The
        // pre-rewrite cache then granted a zero delay to the next add on
        // this name; reproduce that inside the workaround window.
        if self.next_height >= self.base.config.min_removal_workaround_height
            && self.next_height < self.base.config.max_removal_workaround_height
            && self.empty_node_should_exist_at(&removed.node_name, 1)?
        {
            self.removal_workaround.insert(removed.node_name.clone());
        }
        Ok(Some(removed))
    }

    /// Remove an unexpired support. `Ok(None)` when no matching row exists.
    pub fn remove_support(
        &mut self,
        out_point: &OutPoint,
    ) -> Result<Option<RemovedSupport>, ClaimTrieError> {
        let found: Option<RemovedSupport> = {
            let mut stmt = self.db().prepare_cached(
                "SELECT nodeName, activationHeight FROM support \
                 WHERE txID = ? AND txN = ? AND expirationHeight >= ?",
            )?;
            stmt.query_row(
                params![out_point.txid, out_point.index, self.next_height],
                |row| {
                    Ok(RemovedSupport {
                        node_name: row.get(0)?,
                        valid_height: row.get(1)?,
                    })
                },
            )
            .optional()?
        };
        let Some(removed) = found else {
            return Ok(None);
        };
        self.ensure_transacting()?;

        let deleted = self.db().execute(
            "DELETE FROM support WHERE txID = ? AND txN = ?",
            params![out_point.txid, out_point.index],
        )?;
        if deleted == 0 {
            return Ok(None);
        }
        self.db().execute(
            "UPDATE node SET hash = NULL WHERE name = ?",
            params![removed.node_name],
        )?;
        Ok(Some(removed))
    }

    // ------------------------------------------------------------------
    // Delay rule
    // ------------------------------------------------------------------

    /// Blocks a new entry on `name` must wait before it can contest the
    /// incumbent: proportional to how long the incumbent has held the name,
    /// capped, and zero in the no-contest cases.
    fn get_delay_for_name(
        &mut self,
        name: &[u8],
        claim_id: &ClaimId,
    ) -> Result<Height, ClaimTrieError> {
        let winner = self.winning_takeover(name)?;
        if let Some((takeover_height, winning_id)) = &winner {
            if winning_id == claim_id {
                debug_assert!(*takeover_height <= self.next_height);
                return Ok(0);
            }
        }

        if self.next_height > self.base.config.max_removal_workaround_height {
            if winner.is_none() {
                return Ok(0);
            }
            // A name whose node exists only as a branch point also gets no
            // delay. Wrong, but locked in by history; a hard fork could
            // retire it.
            if self.empty_node_should_exist_at(name, 2)? {
                return Ok(0);
            }
        } else if self.removal_workaround.remove(name) {
            return Ok(0);
        }

        match winner {
            None => Ok(0),
            Some((takeover_height, _)) => Ok(((self.next_height - takeover_height)
                / self.base.config.proportional_delay_factor)
                .min(MAX_ACTIVATION_DELAY)),
        }
    }

    /// Whether `name` is a pure branch point: at least `required_children`
    /// distinct continuation bytes among active claims strictly below it,
    /// and no active claim on `name` itself.
    fn empty_node_should_exist_at(
        &self,
        name: &[u8],
        required_children: usize,
    ) -> Result<bool, ClaimTrieError> {
        let mut end = name.to_vec();
        end.resize(name.len() + MAX_CLAIM_NAME_SIZE + 1, 0xff);
        let mut stmt = self.db().prepare_cached(
            "SELECT DISTINCT nodeName FROM claim \
             WHERE nodeName BETWEEN ?1 AND ?2 \
             AND activationHeight < ?3 AND expirationHeight >= ?3 \
             ORDER BY nodeName",
        )?;
        let rows = stmt.query_map(params![name, end, self.next_height], |row| {
            row.get::<_, Vec<u8>>(0)
        })?;
        let mut continuations = HashSet::new();
        for row in rows {
            let node_name = row?;
            if node_name.as_slice() == name {
                return Ok(false);
            }
            continuations.insert(node_name[name.len()]);
            if continuations.len() >= required_children {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ------------------------------------------------------------------
    // Block application
    // ------------------------------------------------------------------

    /// Apply one block: dirty every node touched by an activation or
    /// expiration, run the takeover pass, and advance the height.
    pub fn increment_block(&mut self) -> Result<(), ClaimTrieError> {
        self.ensure_transacting()?;

        // Claims activating this block may need a fresh node row.
        self.db().execute(
            "INSERT INTO node(name) SELECT nodeName FROM claim INDEXED BY claim_activationHeight \
             WHERE activationHeight = ?1 AND expirationHeight > ?1 \
             ON CONFLICT(name) DO UPDATE SET hash = NULL",
            params![self.next_height],
        )?;

        // Expirations and support changes only dirty nodes that still exist.
        self.db().execute(
            "UPDATE node SET hash = NULL WHERE name IN \
             (SELECT nodeName FROM claim WHERE expirationHeight = ?1 \
             UNION SELECT nodeName FROM support WHERE expirationHeight = ?1 OR activationHeight = ?1)",
            params![self.next_height],
        )?;

        self.insert_takeovers()?;

        self.next_height += 1;
        Ok(())
    }

    /// Evaluate every dirty node for a change of winner and record takeover
    /// events at the current height.
    fn insert_takeovers(&mut self) -> Result<(), ClaimTrieError> {
        let names: Vec<Vec<u8>> = {
            let mut stmt = self
                .db()
                .prepare_cached("SELECT name FROM node WHERE hash IS NULL")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<Result<_, _>>()?
        };

        for name in names {
            // One step of lookahead so items activating this block count.
            let mut candidate = self.get_info_for_name_at(&name, 1)?;
            let current_winner = self.winning_takeover(&name)?.map(|(_, id)| id);

            // A takeover happens when there was no winner, there is no
            // candidate, or the winner is changing.
            let mut takeover_happening = match (&candidate, &current_winner) {
                (Some(c), Some(w)) => c.claim_id != *w,
                _ => true,
            };

            if takeover_happening && self.activate_all_for(&name)? {
                candidate = self.get_info_for_name_at(&name, 1)?;
            }

            if self.next_height < TAKEOVER_WORKAROUND_CUTOFF {
                takeover_happening |= has_takeover_workaround(self.next_height, &name);
            }

            debug!(
                name = %String::from_utf8_lossy(&name),
                height = self.next_height,
                happening = takeover_happening,
                had_winner = current_winner.is_some(),
                "takeover check"
            );

            if takeover_happening {
                self.db().execute(
                    "INSERT INTO takeover(name, height, claimID) VALUES(?, ?, ?)",
                    params![name, self.next_height, candidate.map(|c| c.claim_id)],
                )?;
            }
        }
        Ok(())
    }

    /// Once a takeover is known to happen, every pending claim and support
    /// on the name activates immediately to contest the position. Returns
    /// whether anything moved.
    fn activate_all_for(&mut self, name: &[u8]) -> Result<bool, ClaimTrieError> {
        let claims = self.db().execute(
            "UPDATE claim SET activationHeight = ?1 \
             WHERE nodeName = ?2 AND activationHeight > ?1 AND expirationHeight > ?1",
            params![self.next_height, name],
        )?;
        let supports = self.db().execute(
            "UPDATE support SET activationHeight = ?1 \
             WHERE nodeName = ?2 AND activationHeight > ?1 AND expirationHeight > ?1",
            params![self.next_height, name],
        )?;
        Ok(claims > 0 || supports > 0)
    }

    /// Rewind one block: re-dirty the touched nodes and roll early
    /// activations back to their natural heights.
    pub fn decrement_block(&mut self) -> Result<(), ClaimTrieError> {
        self.ensure_transacting()?;

        self.next_height -= 1;

        // Claims un-expiring at this height may need their node back.
        self.db().execute(
            "INSERT INTO node(name) SELECT nodeName FROM claim \
             WHERE expirationHeight = ? ON CONFLICT(name) DO UPDATE SET hash = NULL",
            params![self.next_height],
        )?;

        self.db().execute(
            "UPDATE node SET hash = NULL WHERE name IN(\
             SELECT nodeName FROM support WHERE expirationHeight = ?1 OR activationHeight = ?1 \
             UNION SELECT nodeName FROM claim WHERE activationHeight = ?1)",
            params![self.next_height],
        )?;

        self.db().execute(
            "UPDATE claim SET activationHeight = validHeight WHERE activationHeight = ?",
            params![self.next_height],
        )?;
        self.db().execute(
            "UPDATE support SET activationHeight = validHeight WHERE activationHeight = ?",
            params![self.next_height],
        )?;
        Ok(())
    }

    /// Finish a rewind sequence: dirty everything the abandoned heights
    /// touched and drop their takeover rows.
    pub fn finalize_decrement(&mut self) -> Result<(), ClaimTrieError> {
        self.ensure_transacting()?;

        self.db().execute(
            "UPDATE node SET hash = NULL WHERE name IN \
             (SELECT nodeName FROM claim WHERE activationHeight = ?1 AND expirationHeight > ?1 \
             UNION SELECT nodeName FROM support WHERE activationHeight = ?1 AND expirationHeight > ?1 \
             UNION SELECT name FROM takeover WHERE height = ?1)",
            params![self.next_height],
        )?;

        self.db().execute(
            "DELETE FROM takeover WHERE height >= ?",
            params![self.next_height],
        )?;
        Ok(())
    }

    /// Commit the transaction, propagating the height to the base.
    ///
    /// Materializes the root hash first so the committed state is clean.
    /// Returns `Ok(false)` if the commit itself failed; the cache is then
    /// still transacting and should be discarded (drop rolls back).
    pub fn flush(&mut self) -> Result<bool, ClaimTrieError> {
        if self.transacting {
            self.get_merkle_hash()?;
            if let Err(err) = self.db().execute_batch("COMMIT") {
                error!("claim trie commit failed: {err}");
                return Ok(false);
            }
            self.transacting = false;
        }
        self.base.next_height = self.next_height;
        self.removal_workaround.clear();
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Latest takeover row for a name: `(height, winner)`. The winner is
    /// `None` when the name was last contested to nobody.
    pub(crate) fn last_takeover(
        &self,
        name: &[u8],
    ) -> Result<Option<(Height, Option<ClaimId>)>, ClaimTrieError> {
        let mut stmt = self.db().prepare_cached(
            "SELECT height, claimID FROM takeover WHERE name = ?1 ORDER BY height DESC LIMIT 1",
        )?;
        stmt.query_row(params![name], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()
            .map_err(Into::into)
    }

    fn winning_takeover(
        &self,
        name: &[u8],
    ) -> Result<Option<(Height, ClaimId)>, ClaimTrieError> {
        Ok(self
            .last_takeover(name)?
            .and_then(|(height, id)| id.map(|id| (height, id))))
    }

    /// The best claim on a name, with its effective amount, or `None` when
    /// the name has no active claims.
    pub fn get_info_for_name(&self, name: &[u8]) -> Result<Option<ClaimValue>, ClaimTrieError> {
        self.get_info_for_name_at(name, 0)
    }

    pub(crate) fn get_info_for_name_at(
        &self,
        name: &[u8],
        height_offset: Height,
    ) -> Result<Option<ClaimValue>, ClaimTrieError> {
        let at_height = self.next_height + height_offset;
        let mut stmt = self.db().prepare_cached(CLAIM_HASH_QUERY_LIMIT)?;
        stmt.query_row(params![at_height, name], |row| {
            Ok(ClaimValue {
                out_point: OutPoint {
                    txid: row.get(0)?,
                    index: row.get(1)?,
                },
                claim_id: row.get(2)?,
                update_height: row.get(3)?,
                activation_height: row.get(4)?,
                amount: row.get(5)?,
                effective_amount: row.get(6)?,
            })
        })
        .optional()
        .map_err(Into::into)
    }

    /// All unexpired claims on a name (active and pending) with their
    /// matched supports, best claim first.
    pub fn get_claims_for_name(&self, name: &[u8]) -> Result<NameClaims, ClaimTrieError> {
        let last_takeover_height = self.last_takeover(name)?.map_or(0, |(height, _)| height);
        let mut supports = self.get_supports_for_name(name)?;

        let rows: Vec<(ClaimValue, Height)> = {
            let mut stmt = self.db().prepare_cached(
                "SELECT claimID, txID, txN, originalHeight, updateHeight, activationHeight, amount \
                 FROM claim WHERE nodeName = ? AND expirationHeight >= ?",
            )?;
            let mapped = stmt.query_map(params![name, self.next_height], |row| {
                Ok((
                    ClaimValue {
                        claim_id: row.get(0)?,
                        out_point: OutPoint {
                            txid: row.get(1)?,
                            index: row.get(2)?,
                        },
                        update_height: row.get(4)?,
                        activation_height: row.get(5)?,
                        amount: row.get(6)?,
                        effective_amount: 0,
                    },
                    row.get::<_, Height>(3)?,
                ))
            })?;
            mapped.collect::<Result<_, _>>()?
        };

        let mut claims = Vec::with_capacity(rows.len());
        for (mut claim, original_height) in rows {
            // Pending claims and supports carry no weight yet.
            let mut effective = if claim.activation_height < self.next_height {
                claim.amount
            } else {
                0
            };
            let mut matched = Vec::new();
            let mut i = 0;
            while i < supports.len() {
                if supports[i].supported_claim_id == claim.claim_id {
                    let support = supports.remove(i);
                    if support.activation_height < self.next_height {
                        effective += support.amount;
                    }
                    matched.push(support);
                } else {
                    i += 1;
                }
            }
            claim.effective_amount = effective;
            claims.push(ClaimWithSupports {
                claim,
                original_height,
                supports: matched,
            });
        }

        claims.sort_by(|a, b| {
            b.claim
                .effective_amount
                .cmp(&a.claim.effective_amount)
                .then(a.claim.update_height.cmp(&b.claim.update_height))
                .then(a.claim.out_point.cmp(&b.claim.out_point))
        });

        Ok(NameClaims {
            name: name.to_vec(),
            last_takeover_height,
            claims,
            unmatched_supports: supports,
        })
    }

    /// All unexpired supports on a node name, including not-yet-active ones.
    pub fn get_supports_for_name(&self, name: &[u8]) -> Result<Vec<SupportValue>, ClaimTrieError> {
        let mut stmt = self.db().prepare_cached(
            "SELECT supportedClaimID, txID, txN, blockHeight, activationHeight, amount \
             FROM support WHERE nodeName = ? AND expirationHeight >= ?",
        )?;
        let rows = stmt.query_map(params![name, self.next_height], |row| {
            Ok(SupportValue {
                supported_claim_id: row.get(0)?,
                out_point: OutPoint {
                    txid: row.get(1)?,
                    index: row.get(2)?,
                },
                block_height: row.get(3)?,
                activation_height: row.get(4)?,
                amount: row.get(5)?,
            })
        })?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    /// Whether an active claim sits on this node name at this outpoint.
    pub fn have_claim(&self, name: &[u8], out_point: &OutPoint) -> Result<bool, ClaimTrieError> {
        let mut stmt = self.db().prepare_cached(
            "SELECT 1 FROM claim WHERE nodeName = ?1 AND txID = ?2 AND txN = ?3 \
             AND activationHeight < ?4 AND expirationHeight >= ?4 LIMIT 1",
        )?;
        stmt.exists(params![
            name,
            out_point.txid,
            out_point.index,
            self.next_height
        ])
        .map_err(Into::into)
    }

    /// Whether an active support sits on this node name at this outpoint.
    pub fn have_support(&self, name: &[u8], out_point: &OutPoint) -> Result<bool, ClaimTrieError> {
        let mut stmt = self.db().prepare_cached(
            "SELECT 1 FROM support WHERE nodeName = ?1 AND txID = ?2 AND txN = ?3 \
             AND activationHeight < ?4 AND expirationHeight >= ?4 LIMIT 1",
        )?;
        stmt.exists(params![
            name,
            out_point.txid,
            out_point.index,
            self.next_height
        ])
        .map_err(Into::into)
    }

    /// Activation height of a pending (queued) claim, if one exists.
    pub fn have_claim_in_queue(
        &self,
        name: &[u8],
        out_point: &OutPoint,
    ) -> Result<Option<Height>, ClaimTrieError> {
        let mut stmt = self.db().prepare_cached(
            "SELECT activationHeight FROM claim WHERE nodeName = ? AND txID = ? AND txN = ? \
             AND activationHeight >= ? AND expirationHeight >= activationHeight LIMIT 1",
        )?;
        stmt.query_row(
            params![name, out_point.txid, out_point.index, self.next_height],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    /// Activation height of a pending (queued) support, if one exists.
    pub fn have_support_in_queue(
        &self,
        name: &[u8],
        out_point: &OutPoint,
    ) -> Result<Option<Height>, ClaimTrieError> {
        let mut stmt = self.db().prepare_cached(
            "SELECT activationHeight FROM support WHERE nodeName = ? AND txID = ? AND txN = ? \
             AND activationHeight >= ? AND expirationHeight >= activationHeight LIMIT 1",
        )?;
        stmt.query_row(
            params![name, out_point.txid, out_point.index, self.next_height],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    /// Find the unique active claim whose id starts with `prefix` (given in
    /// display byte order). `None` when the prefix is ambiguous or unknown.
    pub fn find_name_for_claim(
        &self,
        prefix: &[u8],
    ) -> Result<Option<(Vec<u8>, ClaimValue)>, ClaimTrieError> {
        if prefix.len() > 20 {
            return Ok(None);
        }
        let mut maximum = prefix.to_vec();
        maximum.resize(20, 0xff);
        let mut stmt = self.db().prepare_cached(
            "SELECT nodeName, claimID, txID, txN, amount, activationHeight, updateHeight \
             FROM claim WHERE REVERSE(claimID) BETWEEN ?1 AND ?2 \
             AND activationHeight < ?3 AND expirationHeight >= ?3 LIMIT 2",
        )?;
        let rows: Vec<(Vec<u8>, ClaimValue)> = stmt
            .query_map(params![prefix, maximum, self.next_height], |row| {
                Ok((
                    row.get(0)?,
                    ClaimValue {
                        claim_id: row.get(1)?,
                        out_point: OutPoint {
                            txid: row.get(2)?,
                            index: row.get(3)?,
                        },
                        amount: row.get(4)?,
                        effective_amount: 0,
                        activation_height: row.get(5)?,
                        update_height: row.get(6)?,
                    },
                ))
            })?
            .collect::<Result<_, _>>()?;
        match rows.len() {
            1 => Ok(rows.into_iter().next()),
            _ => Ok(None),
        }
    }

    /// Distinct node names with at least one active claim.
    pub fn get_names_in_trie(&self) -> Result<Vec<Vec<u8>>, ClaimTrieError> {
        let mut stmt = self.db().prepare_cached(
            "SELECT DISTINCT nodeName FROM claim \
             WHERE activationHeight < ?1 AND expirationHeight >= ?1",
        )?;
        let rows = stmt.query_map(params![self.next_height], |row| row.get(0))?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    /// Claims whose delayed activation landed at `height`.
    pub fn get_activated_claims(&self, height: Height) -> Result<Vec<ClaimId>, ClaimTrieError> {
        let mut stmt = self.db().prepare_cached(
            "SELECT DISTINCT claimID FROM claim WHERE activationHeight = ?1 AND updateHeight < ?1",
        )?;
        let rows = stmt.query_map(params![height], |row| row.get(0))?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    /// Claims gaining a delayed support activation at `height`.
    pub fn get_claims_with_activated_supports(
        &self,
        height: Height,
    ) -> Result<Vec<ClaimId>, ClaimTrieError> {
        let mut stmt = self.db().prepare_cached(
            "SELECT DISTINCT supportedClaimID FROM support \
             WHERE activationHeight = ?1 AND blockHeight < ?1",
        )?;
        let rows = stmt.query_map(params![height], |row| row.get(0))?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    /// Claims expiring at `height`.
    pub fn get_expired_claims(&self, height: Height) -> Result<Vec<ClaimId>, ClaimTrieError> {
        let mut stmt = self.db().prepare_cached(
            "SELECT DISTINCT claimID FROM claim WHERE expirationHeight = ?1 AND updateHeight < ?1",
        )?;
        let rows = stmt.query_map(params![height], |row| row.get(0))?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    /// Claims losing a support to expiration at `height`.
    pub fn get_claims_with_expired_supports(
        &self,
        height: Height,
    ) -> Result<Vec<ClaimId>, ClaimTrieError> {
        let mut stmt = self.db().prepare_cached(
            "SELECT DISTINCT supportedClaimID FROM support \
             WHERE expirationHeight = ?1 AND blockHeight < ?1",
        )?;
        let rows = stmt.query_map(params![height], |row| row.get(0))?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    /// Number of distinct names with at least one active claim.
    ///
    /// Counted from the claim table; the node table may be dirty.
    pub fn get_total_names_in_trie(&self) -> Result<usize, ClaimTrieError> {
        let count: i64 = self.db().query_row(
            "SELECT COUNT(DISTINCT nodeName) FROM claim \
             WHERE activationHeight < ?1 AND expirationHeight >= ?1",
            params![self.next_height],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Number of active claims.
    pub fn get_total_claims_in_trie(&self) -> Result<usize, ClaimTrieError> {
        let count: i64 = self.db().query_row(
            "SELECT COUNT(*) FROM claim \
             WHERE activationHeight < ?1 AND expirationHeight >= ?1",
            params![self.next_height],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Total amount locked in active claims; with `controlling_only`, only
    /// the winning claim of each name counts.
    pub fn get_total_value_of_claims_in_trie(
        &self,
        controlling_only: bool,
    ) -> Result<Amount, ClaimTrieError> {
        let sql = if controlling_only {
            "SELECT SUM(amount) FROM (SELECT \
             (SELECT c.amount FROM claim c \
             WHERE c.nodeName = names.nodeName \
             AND c.activationHeight < ?1 AND c.expirationHeight >= ?1 \
             ORDER BY (SELECT IFNULL(SUM(s.amount),0)+c.amount FROM support s \
             WHERE s.supportedClaimID = c.claimID AND s.nodeName = c.nodeName \
             AND s.activationHeight < ?1 AND s.expirationHeight >= ?1) DESC, \
             c.updateHeight, c.txID, c.txN LIMIT 1) as amount \
             FROM (SELECT DISTINCT nodeName FROM claim \
             WHERE activationHeight < ?1 AND expirationHeight >= ?1) names)"
        } else {
            "SELECT SUM(amount) FROM (SELECT c.amount as amount \
             FROM claim c WHERE c.activationHeight < ?1 AND c.expirationHeight >= ?1)"
        };
        let total: Option<Amount> =
            self.db()
                .query_row(sql, params![self.next_height], |row| row.get(0))?;
        Ok(total.unwrap_or(0))
    }
}

impl Drop for ClaimTrieCache<'_> {
    fn drop(&mut self) {
        if self.transacting {
            if let Err(err) = self.db().execute_batch("ROLLBACK") {
                error!("claim trie rollback failed: {err}");
            }
            self.transacting = false;
        }
    }
}
