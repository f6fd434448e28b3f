//! Error types for the claim-trie engine.
use thiserror::Error;

/// Failures of the underlying SQLite store.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database: {0}")] Database(#[from] rusqlite::Error),
    #[error("io: {0}")] Io(#[from] std::io::Error),
}

/// Invariant violations detected by the consistency checker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("integrity check failed: {0}")] IntegrityCheck(String),
    #[error("invalid hash at node {0:?}")] HashMismatch(String),
}

/// Top-level error for all claim-trie operations.
#[derive(Error, Debug)]
pub enum ClaimTrieError {
    #[error(transparent)] Storage(#[from] StorageError),
    #[error(transparent)] Consistency(#[from] ConsistencyError),
}

impl From<rusqlite::Error> for ClaimTrieError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(StorageError::Database(err))
    }
}

impl From<std::io::Error> for ClaimTrieError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(StorageError::Io(err))
    }
}
