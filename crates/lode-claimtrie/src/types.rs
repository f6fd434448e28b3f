//! Core claim-trie types: hashes, claim identifiers, outpoints, and the
//! value types returned by name queries.
//!
//! `name` values are raw byte strings throughout (the trie is a byte-radix
//! trie, not a UTF-8 one). Heights are signed 32-bit, amounts signed 64-bit
//! per protocol convention.

use std::fmt;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Block height. Signed so that rewind arithmetic cannot wrap silently.
pub type Height = i32;

/// Monetary amount in base units.
pub type Amount = i64;

/// A 32-byte hash value.
///
/// Used for transaction IDs and trie node hashes (both double SHA-256).
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes).
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a Hash256 from a byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl ToSql for Hash256 {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(&self.0[..]))
    }
}

impl FromSql for Hash256 {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let blob = value.as_blob()?;
        let bytes: [u8; 32] = blob.try_into().map_err(|_| FromSqlError::InvalidBlobSize {
            expected_size: 32,
            blob_size: blob.len(),
        })?;
        Ok(Self(bytes))
    }
}

/// A 20-byte claim identifier.
///
/// Derived by the script layer from the outpoint that first registered the
/// claim; stable across updates of the same claim.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct ClaimId(pub [u8; 20]);

impl ClaimId {
    /// Create a ClaimId from a byte array.
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 20]> for ClaimId {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for ClaimId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl ToSql for ClaimId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(&self.0[..]))
    }
}

impl FromSql for ClaimId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let blob = value.as_blob()?;
        let bytes: [u8; 20] = blob.try_into().map_err(|_| FromSqlError::InvalidBlobSize {
            expected_size: 20,
            blob_size: blob.len(),
        })?;
        Ok(Self(bytes))
    }
}

/// Reference to a specific output of a previous transaction.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
pub struct OutPoint {
    /// Transaction ID containing the referenced output.
    pub txid: Hash256,
    /// Index of the output within the transaction.
    pub index: u32,
}

impl OutPoint {
    /// Create a new outpoint.
    pub fn new(txid: Hash256, index: u32) -> Self {
        Self { txid, index }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

/// An active or pending claim on a name, as returned by name queries.
///
/// `effective_amount` is the claim's own amount plus all of its active,
/// node-name-matched supports, evaluated at the cache's next height.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ClaimValue {
    /// Stable claim identifier.
    pub claim_id: ClaimId,
    /// Output currently carrying the claim.
    pub out_point: OutPoint,
    /// The claim's own locked amount.
    pub amount: Amount,
    /// Own amount plus matched active support amounts.
    pub effective_amount: Amount,
    /// Height of the claim's current entry (last update).
    pub update_height: Height,
    /// Height at which the claim becomes (or became) active.
    pub activation_height: Height,
}

/// An active or pending support attached to a claim.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SupportValue {
    /// The claim this support adds weight to.
    pub supported_claim_id: ClaimId,
    /// Output carrying the support.
    pub out_point: OutPoint,
    /// Locked support amount.
    pub amount: Amount,
    /// Height the support entered the chain.
    pub block_height: Height,
    /// Height at which the support becomes (or became) active.
    pub activation_height: Height,
}

/// A claim on a name bundled with its matched supports.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ClaimWithSupports {
    /// The claim itself, with `effective_amount` populated.
    pub claim: ClaimValue,
    /// Height the claim was first registered (survives updates).
    pub original_height: Height,
    /// Supports whose `supported_claim_id` matches the claim.
    pub supports: Vec<SupportValue>,
}

/// Everything known about a name: its claims (best first), the supports that
/// matched no claim, and the height of the last takeover event.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct NameClaims {
    /// The queried node name.
    pub name: Vec<u8>,
    /// Height of the most recent takeover row (0 if the name was never won).
    pub last_takeover_height: Height,
    /// Claims ordered best-first (effective amount, then age, then outpoint).
    pub claims: Vec<ClaimWithSupports>,
    /// Supports referencing a claim id with no row on this node name.
    pub unmatched_supports: Vec<SupportValue>,
}

/// Result of removing a claim: the data the caller needs for undo records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemovedClaim {
    /// The node name the claim sat on (post-normalization).
    pub node_name: Vec<u8>,
    /// The claim's activation height at removal time.
    pub valid_height: Height,
    /// Height the claim was first registered.
    pub original_height: Height,
}

/// Result of removing a support.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemovedSupport {
    /// The node name the support sat on.
    pub node_name: Vec<u8>,
    /// The support's activation height at removal time.
    pub valid_height: Height,
}
