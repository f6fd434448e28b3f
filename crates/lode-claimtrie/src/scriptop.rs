//! Dispatch of decoded claim-script operations onto the cache.
//!
//! The script layer decodes each output into a [`ClaimScriptOp`] before the
//! engine sees it; connecting and disconnecting blocks then pair every op
//! with one of four [`ClaimScriptAction`]s. The caller drives two phases per
//! transaction: spend all inputs first, collecting the [`SpentClaim`]
//! records, then apply outputs, matching updates against the spent list by
//! claim id so `valid_height` and `original_height` survive the update.

use crate::cache::ClaimTrieCache;
use crate::error::ClaimTrieError;
use crate::types::{Amount, ClaimId, Height, OutPoint};

/// A claim script decoded from a transaction output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClaimScriptOp {
    /// A fresh claim; the decoder derives the claim id from the outpoint.
    ClaimName { name: Vec<u8>, claim_id: ClaimId },
    /// An update carrying the id of the claim being updated.
    UpdateClaim { name: Vec<u8>, claim_id: ClaimId },
    /// A support referencing the supported claim.
    SupportClaim { name: Vec<u8>, claim_id: ClaimId },
}

impl ClaimScriptOp {
    fn name(&self) -> &[u8] {
        match self {
            Self::ClaimName { name, .. }
            | Self::UpdateClaim { name, .. }
            | Self::SupportClaim { name, .. } => name,
        }
    }

    fn claim_id(&self) -> &ClaimId {
        match self {
            Self::ClaimName { claim_id, .. }
            | Self::UpdateClaim { claim_id, .. }
            | Self::SupportClaim { claim_id, .. } => claim_id,
        }
    }
}

/// A spent claim recorded during the input phase of a transaction, used to
/// carry heights into a matching update output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpentClaim {
    pub name: Vec<u8>,
    pub claim_id: ClaimId,
    pub valid_height: Height,
    pub original_height: Height,
}

/// The four ways a claim script touches the trie: applying or undoing an
/// output, and spending or un-spending an input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClaimScriptAction {
    /// Connect an output. Updates matched against a spent claim pass the
    /// preserved heights; fresh entries pass `None` and take the delay rule.
    Add {
        out_point: OutPoint,
        amount: Amount,
        height: Height,
        valid_height: Option<Height>,
        original_height: Option<Height>,
    },
    /// Disconnect an output added by the block being undone.
    UndoAdd { out_point: OutPoint },
    /// Connect an input spending a prior claim or support.
    Spend { out_point: OutPoint },
    /// Disconnect an input: restore the spent entry with its recorded
    /// heights.
    UndoSpend {
        out_point: OutPoint,
        amount: Amount,
        height: Height,
        valid_height: Height,
        original_height: Height,
    },
}

/// Result of applying an action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClaimScriptOutcome {
    /// The row was inserted or restored.
    Applied,
    /// No matching active row; not an error.
    NotFound,
    /// A spend removed a claim; the record feeds the update phase and the
    /// block's undo data.
    Spent(SpentClaim),
}

impl ClaimScriptAction {
    /// Apply this action for the given decoded op.
    pub fn apply(
        &self,
        op: &ClaimScriptOp,
        cache: &mut ClaimTrieCache<'_>,
    ) -> Result<ClaimScriptOutcome, ClaimTrieError> {
        match (self, op) {
            (
                Self::Add {
                    out_point,
                    amount,
                    height,
                    valid_height,
                    original_height,
                },
                ClaimScriptOp::ClaimName { name, claim_id }
                | ClaimScriptOp::UpdateClaim { name, claim_id },
            ) => {
                cache.add_claim(
                    name,
                    out_point,
                    claim_id,
                    *amount,
                    *height,
                    *valid_height,
                    *original_height,
                )?;
                Ok(ClaimScriptOutcome::Applied)
            }
            (
                Self::Add {
                    out_point,
                    amount,
                    height,
                    ..
                },
                ClaimScriptOp::SupportClaim { name, claim_id },
            ) => {
                cache.add_support(name, out_point, claim_id, *amount, *height, None)?;
                Ok(ClaimScriptOutcome::Applied)
            }
            (
                Self::UndoAdd { out_point } | Self::Spend { out_point },
                ClaimScriptOp::SupportClaim { .. },
            ) => match cache.remove_support(out_point)? {
                Some(_) => Ok(ClaimScriptOutcome::Applied),
                None => Ok(ClaimScriptOutcome::NotFound),
            },
            (Self::UndoAdd { out_point }, _) => {
                match cache.remove_claim(op.claim_id(), out_point)? {
                    Some(_) => Ok(ClaimScriptOutcome::Applied),
                    None => Ok(ClaimScriptOutcome::NotFound),
                }
            }
            (Self::Spend { out_point }, _) => {
                match cache.remove_claim(op.claim_id(), out_point)? {
                    Some(removed) => Ok(ClaimScriptOutcome::Spent(SpentClaim {
                        name: op.name().to_vec(),
                        claim_id: *op.claim_id(),
                        valid_height: removed.valid_height,
                        original_height: removed.original_height,
                    })),
                    None => Ok(ClaimScriptOutcome::NotFound),
                }
            }
            (
                Self::UndoSpend {
                    out_point,
                    amount,
                    height,
                    valid_height,
                    original_height,
                },
                ClaimScriptOp::ClaimName { name, claim_id }
                | ClaimScriptOp::UpdateClaim { name, claim_id },
            ) => {
                cache.add_claim(
                    name,
                    out_point,
                    claim_id,
                    *amount,
                    *height,
                    Some(*valid_height),
                    Some(*original_height),
                )?;
                Ok(ClaimScriptOutcome::Applied)
            }
            (
                Self::UndoSpend {
                    out_point,
                    amount,
                    height,
                    valid_height,
                    ..
                },
                ClaimScriptOp::SupportClaim { name, claim_id },
            ) => {
                cache.add_support(
                    name,
                    out_point,
                    claim_id,
                    *amount,
                    *height,
                    Some(*valid_height),
                )?;
                Ok(ClaimScriptOutcome::Applied)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrieConfig;
    use crate::store::ClaimTrie;
    use crate::types::Hash256;

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
    fn add_then_spend_round_trips_through_actions() {
        let (mut trie, _dir) = temp_trie(10);
        let mut cache = ClaimTrieCache::new(&mut trie);

        let op = ClaimScriptOp::ClaimName {
            name: b"cat".to_vec(),
            claim_id: cid(1),
        };
        let add = ClaimScriptAction::Add {
            out_point: outpoint(1),
            amount: 100,
            height: 10,
            valid_height: None,
            original_height: None,
        };
        assert_eq!(
            add.apply(&op, &mut cache).unwrap(),
            ClaimScriptOutcome::Applied
        );
        cache.increment_block().unwrap();

        let spend = ClaimScriptAction::Spend {
            out_point: outpoint(1),
        };
        let outcome = spend.apply(&op, &mut cache).unwrap();
        assert_eq!(
            outcome,
            ClaimScriptOutcome::Spent(SpentClaim {
                name: b"cat".to_vec(),
                claim_id: cid(1),
                valid_height: 10,
                original_height: 10,
            })
        );

        // Spending again finds nothing.
        assert_eq!(
            spend.apply(&op, &mut cache).unwrap(),
            ClaimScriptOutcome::NotFound
        );
    }

    #[test]
    fn undo_spend_restores_recorded_heights() {
        let (mut trie, _dir) = temp_trie(10);
        let mut cache = ClaimTrieCache::new(&mut trie);

        let op = ClaimScriptOp::ClaimName {
            name: b"cat".to_vec(),
            claim_id: cid(1),
        };
        ClaimScriptAction::Add {
            out_point: outpoint(1),
            amount: 100,
            height: 10,
            valid_height: None,
            original_height: None,
        }
        .apply(&op, &mut cache)
        .unwrap();
        cache.increment_block().unwrap();

        let spent = match (ClaimScriptAction::Spend {
            out_point: outpoint(1),
        }
        .apply(&op, &mut cache)
        .unwrap())
        {
            ClaimScriptOutcome::Spent(spent) => spent,
            other => panic!("expected spend, got {other:?}"),
        };

        ClaimScriptAction::UndoSpend {
            out_point: outpoint(1),
            amount: 100,
            height: 10,
            valid_height: spent.valid_height,
            original_height: spent.original_height,
        }
        .apply(&op, &mut cache)
        .unwrap();
        assert!(cache.have_claim(b"cat", &outpoint(1)).unwrap());
    }

    #[test]
    fn support_ops_route_to_support_rows() {
        let (mut trie, _dir) = temp_trie(10);
        let mut cache = ClaimTrieCache::new(&mut trie);

        let claim_op = ClaimScriptOp::ClaimName {
            name: b"cat".to_vec(),
            claim_id: cid(1),
        };
        ClaimScriptAction::Add {
            out_point: outpoint(1),
            amount: 100,
            height: 10,
            valid_height: None,
            original_height: None,
        }
        .apply(&claim_op, &mut cache)
        .unwrap();

        let support_op = ClaimScriptOp::SupportClaim {
            name: b"cat".to_vec(),
            claim_id: cid(1),
        };
        ClaimScriptAction::Add {
            out_point: outpoint(2),
            amount: 40,
            height: 10,
            valid_height: None,
            original_height: None,
        }
        .apply(&support_op, &mut cache)
        .unwrap();
        cache.increment_block().unwrap();

        assert!(cache.have_support(b"cat", &outpoint(2)).unwrap());
        assert_eq!(
            cache
                .get_info_for_name(b"cat")
                .unwrap()
                .unwrap()
                .effective_amount,
            140
        );

        assert_eq!(
            ClaimScriptAction::Spend {
                out_point: outpoint(2),
            }
            .apply(&support_op, &mut cache)
            .unwrap(),
            ClaimScriptOutcome::Applied
        );
        assert!(!cache.have_support(b"cat", &outpoint(2)).unwrap());
    }
}
