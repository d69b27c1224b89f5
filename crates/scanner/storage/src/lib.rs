//! # fbscan-storage
//!
//! SQLite ledger store for the Factoid block scanner.
//!
//! Blocks are stored whole, transactions as byte ranges into their block, and address
//! balances as running sums of per-transaction links. Every write goes through a
//! [`rusqlite::Savepoint`] owned by the caller, so a batch of blocks either lands entirely
//! or not at all.
//!
//! ## Key Components
//!
//! - [`open`]: opens, identifies and migrates a store.
//! - [`insert_fblock`]: appends a block and its transactions, enforcing chain continuity.
//! - [`insert_address_links`]: applies balance effects, discarding them when the address
//!   filter does not retain the transaction.
//! - [`create_indexes`]: builds the lookup indexes once the store has caught up.

mod error;
pub use error::StorageError;

mod schema;

mod migrations;
pub use migrations::{CURRENT_VERSION, MIGRATIONS, Migration};

mod open;
pub use open::{APPLICATION_ID, StoreOptions, open, open_in_memory, setup};

mod fblock;
pub use fblock::{
    StoredFBlock, insert_fblock, select_fblock_by_height, select_fblock_by_key_mr,
    select_sync_height,
};

mod transaction;
pub use transaction::{
    StoredTransaction, TransactionMeta, insert_transaction, select_transaction_by_hash,
    select_transaction_by_id, select_transaction_meta, select_transactions_by_height,
};

mod address;
pub use address::{
    AddressLink, AddressRecord, Linked, add_to_balance, insert_address_links, select_address,
    select_address_count, select_address_transactions,
};

use rusqlite::Connection;
use tracing::info;

/// Creates the lookup indexes. Safe to call on every catch-up.
pub fn create_indexes(conn: &Connection) -> Result<(), StorageError> {
    info!(target: "storage", "Creating indexes");
    conn.execute_batch(schema::CREATE_INDEXES)?;
    Ok(())
}
