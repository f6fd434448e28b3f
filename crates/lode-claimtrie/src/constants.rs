//! Protocol constants for the claim trie.

use crate::types::Height;

/// Maximum length of a claim name in bytes.
pub const MAX_CLAIM_NAME_SIZE: usize = 255;

/// Upper bound on the proportional activation delay, in blocks (two weeks
/// at the target block interval).
pub const MAX_ACTIVATION_DELAY: Height = 4032;
