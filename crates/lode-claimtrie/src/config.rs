//! Construction parameters for the claim trie.
//!
//! Fork heights and expiration times are consensus values: [`Default`]
//! carries the mainnet schedule. Tests and regtest-style setups override
//! individual fields.

use std::path::PathBuf;

use crate::types::Height;

/// Configuration for a [`ClaimTrie`](crate::store::ClaimTrie) instance.
#[derive(Debug, Clone)]
pub struct TrieConfig {
    /// Directory holding `claims.sqlite`.
    pub data_dir: PathBuf,
    /// Page-cache soft limit in bytes.
    pub cache_bytes: usize,
    /// Truncate all tables on open.
    pub wipe: bool,
    /// Initial next height (the next block to be applied).
    pub height: Height,
    /// Height at which names start being normalized into node names.
    pub normalized_name_fork_height: Height,
    /// Start of the window where node removal feeds the zero-delay
    /// re-add workaround.
    pub min_removal_workaround_height: Height,
    /// End of that window; past it the structural zero-delay rule applies.
    pub max_removal_workaround_height: Height,
    /// Height at which new claims switch to the extended expiration time.
    pub extended_claim_expiration_fork_height: Height,
    /// Height past which the reverse-claim-id lookup index is maintained.
    pub all_claims_in_merkle_fork_height: Height,
    /// Claim lifetime in blocks before the expiration fork.
    pub original_claim_expiration_time: Height,
    /// Claim lifetime in blocks from the expiration fork onward.
    pub extended_claim_expiration_time: Height,
    /// Divisor for the proportional takeover delay.
    pub proportional_delay_factor: Height,
}

impl Default for TrieConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lode");

        Self {
            data_dir,
            cache_bytes: 32 << 20,
            wipe: false,
            height: 0,
            normalized_name_fork_height: 539_940,
            min_removal_workaround_height: 297_706,
            max_removal_workaround_height: 658_300,
            extended_claim_expiration_fork_height: 400_155,
            all_claims_in_merkle_fork_height: 658_309,
            original_claim_expiration_time: 262_974,
            extended_claim_expiration_time: 2_102_400,
            proportional_delay_factor: 32,
        }
    }
}

impl TrieConfig {
    /// Path to the claims database file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("claims.sqlite")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_data_dir_ends_with_lode() {
        let cfg = TrieConfig::default();
        assert!(
            cfg.data_dir.ends_with("lode"),
            "data_dir should end with 'lode': {:?}",
            cfg.data_dir
        );
    }

    #[test]
    fn db_path_is_claims_sqlite() {
        let cfg = TrieConfig {
            data_dir: PathBuf::from("/tmp/x"),
            ..TrieConfig::default()
        };
        assert_eq!(cfg.db_path(), PathBuf::from("/tmp/x/claims.sqlite"));
    }

    #[test]
    fn default_delay_factor() {
        assert_eq!(TrieConfig::default().proportional_delay_factor, 32);
    }

    #[test]
    fn removal_workaround_window_is_ordered() {
        let cfg = TrieConfig::default();
        assert!(cfg.min_removal_workaround_height < cfg.max_removal_workaround_height);
    }
}
