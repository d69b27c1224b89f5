use fbscan_types::{AddressError, Bytes32, DecodeError};
use thiserror::Error;

/// Errors that may occur while interacting with the ledger store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Error reported by SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Stored block bytes failed to decode.
    #[error("malformed stored data: {0}")]
    Decode(#[from] DecodeError),

    /// A stored address string failed to parse.
    #[error("malformed stored address {address:?}: {source}")]
    InvalidAddress {
        /// The stored string.
        address: String,
        /// Why it failed to parse.
        #[source]
        source: AddressError,
    },

    /// The block does not name the stored predecessor as its previous block.
    #[error(
        "continuity violation at height {height}: stored predecessor is {expected}, block names {found}"
    )]
    ContinuityViolation {
        /// Height of the rejected block.
        height: u32,
        /// Key merkle root stored at `height - 1`.
        expected: Bytes32,
        /// Previous key merkle root named by the rejected block.
        found: Bytes32,
    },

    /// The store holds blocks, but none at the height preceding the inserted block.
    #[error("continuity violation at height {height}: predecessor is not stored")]
    MissingPredecessor {
        /// Height of the rejected block.
        height: u32,
    },

    /// The expected entry was not found in the database.
    #[error("entry not found: {0}")]
    EntryNotFound(String),

    /// A transaction's byte range does not fit inside its block's stored bytes.
    #[error("transaction {id} spans bytes {offset}..{end} but its block holds {len} bytes")]
    TruncatedTransaction {
        /// Row id of the transaction.
        id: i64,
        /// Start of the stored range.
        offset: usize,
        /// End of the stored range.
        end: usize,
        /// Length of the block bytes.
        len: usize,
    },

    /// The file carries another application's identifier.
    #[error("wrong or incompatible store: application id {found:#010x}, expected {expected:#010x}")]
    InvalidApplicationId {
        /// Identifier found in the file.
        found: i32,
        /// Identifier written by this application.
        expected: i32,
    },

    /// The file was written by a newer build.
    #[error(
        "wrong or incompatible store: schema version {found} is newer than supported version {supported}"
    )]
    UnsupportedVersion {
        /// Version found in the file.
        found: u32,
        /// Newest version this build understands.
        supported: u32,
    },

    /// A migration left a row referencing a missing parent row.
    #[error("foreign key violation: {table} row {rowid:?} references a missing {parent} row")]
    ForeignKeyViolation {
        /// Table holding the dangling reference.
        table: String,
        /// Row id of the offending row, if the table has one.
        rowid: Option<i64>,
        /// Referenced table.
        parent: String,
    },

    /// No migration is registered to upgrade from this version.
    #[error("wrong or incompatible store: no migration exists for schema version {0}")]
    NoMigration(u32),
}
