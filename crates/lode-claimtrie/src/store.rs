//! SQLite-backed persistent store for the claim trie.
//!
//! One database file (`claims.sqlite`) holds four tables: `node` (the radix
//! trie), `claim`, `support`, and `takeover`. The schema keeps names, claim
//! ids, and transaction ids as raw blobs. Journaling runs in WAL mode with
//! `synchronous=OFF`; durability is the caller's responsibility via
//! [`ClaimTrie::sync_to_disk`].
//!
//! [`ClaimTrie`] owns the connection and the consensus configuration;
//! mutation happens through a [`ClaimTrieCache`](crate::cache::ClaimTrieCache)
//! borrowing it exclusively.

use std::path::PathBuf;

use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;

use crate::config::TrieConfig;
use crate::error::ClaimTrieError;
use crate::hashes::EMPTY_TRIE_HASH;
use crate::types::Height;

/// Apply the session pragmas shared by every connection to the database.
///
/// No fsync on commit (`synchronous=OFF`); [`ClaimTrie::sync_to_disk`] is
/// the durability point.
fn apply_pragmas(db: &Connection, cache_kb: usize) -> rusqlite::Result<()> {
    db.execute_batch(&format!(
        "PRAGMA cache_size=-{cache_kb};\n\
         PRAGMA temp_store=MEMORY;\n\
         PRAGMA case_sensitive_like=true;\n\
         PRAGMA synchronous=OFF;"
    ))?;
    // These two report back the value they set and need a row-aware call.
    db.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
    db.query_row("PRAGMA wal_autocheckpoint=4000", [], |_| Ok(()))?;
    Ok(())
}

/// Register the scalar SQL functions the trie queries rely on.
///
/// `POPS(s)` drops the final byte of a byte string (empty stays empty) and
/// drives the recursive prefix walks; `REVERSE(s)` reverses a byte string
/// and backs the claim-id prefix index.
fn register_functions(db: &Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;
    db.create_scalar_function("POPS", 1, flags, |ctx| {
        let mut bytes: Vec<u8> = ctx.get(0)?;
        bytes.pop();
        Ok(bytes)
    })?;
    db.create_scalar_function("REVERSE", 1, flags, |ctx| {
        let mut bytes: Vec<u8> = ctx.get(0)?;
        bytes.reverse();
        Ok(bytes)
    })
}

/// The base claim trie: database handle plus consensus configuration.
pub struct ClaimTrie {
    pub(crate) db: Connection,
    pub(crate) db_file: PathBuf,
    pub(crate) next_height: Height,
    pub(crate) config: TrieConfig,
}

impl ClaimTrie {
    /// Open (or create) the claims database described by `config`.
    ///
    /// Creates the data directory and schema if missing, truncates all
    /// tables when `config.wipe` is set, and seeds the root node with the
    /// empty-trie sentinel hash.
    pub fn open(config: TrieConfig) -> Result<Self, ClaimTrieError> {
        std::fs::create_dir_all(&config.data_dir)?;
        let db_file = config.db_path();
        let db = Connection::open(&db_file)?;
        apply_pragmas(&db, config.cache_bytes >> 10)?;
        register_functions(&db)?;

        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS node (name BLOB NOT NULL PRIMARY KEY, \
             parent BLOB REFERENCES node(name) DEFERRABLE INITIALLY DEFERRED, \
             hash BLOB);\n\
             CREATE TABLE IF NOT EXISTS claim (claimID BLOB NOT NULL PRIMARY KEY, \
             name BLOB NOT NULL, \
             nodeName BLOB NOT NULL REFERENCES node(name) DEFERRABLE INITIALLY DEFERRED, \
             txID BLOB NOT NULL, txN INTEGER NOT NULL, \
             originalHeight INTEGER NOT NULL, updateHeight INTEGER NOT NULL, \
             validHeight INTEGER NOT NULL, activationHeight INTEGER NOT NULL, \
             expirationHeight INTEGER NOT NULL, amount INTEGER NOT NULL);\n\
             CREATE TABLE IF NOT EXISTS support (txID BLOB NOT NULL, txN INTEGER NOT NULL, \
             supportedClaimID BLOB NOT NULL, name BLOB NOT NULL, nodeName BLOB NOT NULL, \
             blockHeight INTEGER NOT NULL, validHeight INTEGER NOT NULL, \
             activationHeight INTEGER NOT NULL, expirationHeight INTEGER NOT NULL, \
             amount INTEGER NOT NULL, PRIMARY KEY(txID, txN));\n\
             CREATE TABLE IF NOT EXISTS takeover (name BLOB NOT NULL, height INTEGER NOT NULL, \
             claimID BLOB, PRIMARY KEY(name, height DESC));",
        )?;

        if config.wipe {
            db.execute_batch(
                "DELETE FROM node;\n\
                 DELETE FROM claim;\n\
                 DELETE FROM support;\n\
                 DELETE FROM takeover;",
            )?;
        }

        db.execute_batch(
            "CREATE INDEX IF NOT EXISTS node_hash_len_name ON node (hash, LENGTH(name) DESC);\n\
             CREATE INDEX IF NOT EXISTS node_parent ON node (parent);\n\
             CREATE INDEX IF NOT EXISTS takeover_height ON takeover (height);\n\
             CREATE INDEX IF NOT EXISTS claim_activationHeight ON claim (activationHeight);\n\
             CREATE INDEX IF NOT EXISTS claim_expirationHeight ON claim (expirationHeight);\n\
             CREATE INDEX IF NOT EXISTS claim_nodeName ON claim (nodeName);\n\
             CREATE INDEX IF NOT EXISTS support_supportedClaimID ON support (supportedClaimID);\n\
             CREATE INDEX IF NOT EXISTS support_activationHeight ON support (activationHeight);\n\
             CREATE INDEX IF NOT EXISTS support_expirationHeight ON support (expirationHeight);\n\
             CREATE INDEX IF NOT EXISTS support_nodeName ON support (nodeName);",
        )?;

        // The root node always exists.
        db.execute(
            "INSERT OR IGNORE INTO node(name, hash) VALUES(x'', ?)",
            [&EMPTY_TRIE_HASH],
        )?;

        let next_height = config.height;
        Ok(Self {
            db,
            db_file,
            next_height,
            config,
        })
    }

    /// The next block height to be applied.
    pub fn next_height(&self) -> Height {
        self.next_height
    }

    /// The configured page-cache soft limit in bytes.
    pub fn cache_bytes(&self) -> usize {
        self.config.cache_bytes
    }

    /// Checkpoint the write-ahead log to the main database file.
    ///
    /// Transactions never fsync on commit (`synchronous=OFF`); callers
    /// invoke this at their own cadence.
    pub fn sync_to_disk(&self) -> bool {
        self.db
            .query_row("PRAGMA wal_checkpoint(FULL)", [], |_| Ok(()))
            .is_ok()
    }

    /// Whether the trie holds no active claims at the current height.
    ///
    /// Opens a short-lived read connection so it can be called while a
    /// cache holds the main one. Only used by tests and startup checks.
    pub fn is_empty(&self) -> Result<bool, ClaimTrieError> {
        let local = Connection::open(&self.db_file)?;
        apply_pragmas(&local, 100)?;
        let count: i64 = local.query_row(
            "SELECT COUNT(*) FROM (SELECT 1 FROM claim \
             WHERE activationHeight < ?1 AND expirationHeight >= ?1 LIMIT 1)",
            [self.next_height],
            |row| row.get(0),
        )?;
        Ok(count == 0)
    }
}
