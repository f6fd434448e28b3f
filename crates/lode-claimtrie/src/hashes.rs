//! Consensus hashing primitives for the claim trie.
//!
//! Every byte here is consensus: node hashes roll up into the root hash
//! committed by each block header, so the exact concatenation orders and
//! encodings must be reproducible bit-for-bit across implementations.

use sha2::{Digest, Sha256};

use crate::types::{Hash256, Height, OutPoint};

/// Root hash of a trie with no children and no active claims: 32 bytes with
/// only the last byte set.
pub const EMPTY_TRIE_HASH: Hash256 = Hash256([
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1,
]);

/// Double SHA-256 over a byte string.
pub fn double_sha(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    Hash256(Sha256::digest(first).into())
}

/// Encode a height as eight bytes: four zero bytes, then the height
/// big-endian.
pub fn height_bytes(height: Height) -> [u8; 8] {
    let mut out = [0u8; 8];
    out[4..].copy_from_slice(&height.to_be_bytes());
    out
}

/// Hash of a winning claim's value at a node.
///
/// Commits to the outpoint carrying the claim (index in ASCII decimal) and
/// the height of the last takeover on the name.
pub fn value_hash(out_point: &OutPoint, takeover_height: Height) -> Hash256 {
    let txid_hash = double_sha(out_point.txid.as_bytes());
    let index_hash = double_sha(out_point.index.to_string().as_bytes());
    let height_hash = double_sha(&height_bytes(takeover_height));

    let mut buf = Vec::with_capacity(96);
    buf.extend_from_slice(txid_hash.as_bytes());
    buf.extend_from_slice(index_hash.as_bytes());
    buf.extend_from_slice(height_hash.as_bytes());
    double_sha(&buf)
}

/// Lift a child node's stored hash up through its path-compressed edge.
///
/// Walks `key` right to left, folding each byte above position `stop + 1`
/// into the hash: `partial <- doubleSha(byte || partial)`. The byte at
/// `stop` itself is emitted separately by the parent's hash construction.
pub fn complete_hash(mut partial: Hash256, key: &[u8], stop: usize) -> Hash256 {
    for i in (stop + 1..key.len()).rev() {
        let mut buf = [0u8; 33];
        buf[0] = key[i];
        buf[1..].copy_from_slice(partial.as_bytes());
        partial = double_sha(&buf);
    }
    partial
}
