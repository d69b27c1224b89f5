//! Block insertion and lookup.

use crate::{StorageError, address::insert_address_links, transaction::insert_transaction};
use fbscan_types::{AddressFilter, Bytes32, FBlock};
use rusqlite::{Connection, OptionalExtension, Row, Savepoint, params};
use tracing::trace;

/// A block read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFBlock {
    /// The decoded block, with its stored timestamp.
    pub block: FBlock,
    /// Key merkle root recorded at insertion.
    pub key_mr: Bytes32,
    /// USD price observed for the block's timestamp, if any.
    pub price: Option<f64>,
}

/// Inserts `fb` and every transaction it contains inside `sp`.
///
/// The block must extend the stored chain: its previous key merkle root has to match the
/// block stored at `height - 1`. A store without any block accepts any first block, which
/// is how a configured start height is honoured. Transaction rows are always written,
/// while their address balances and links are kept only if `filter` retains them.
///
/// Statements that ran before an error are not undone here. The caller owns `sp` and must
/// roll it back.
pub fn insert_fblock(
    sp: &mut Savepoint<'_>,
    fb: &FBlock,
    price: Option<f64>,
    filter: &AddressFilter,
) -> Result<(), StorageError> {
    check_continuity(sp, fb)?;

    let data = fb.encode();
    let key_mr = fb.key_mr();
    sp.prepare_cached(
        r#"INSERT INTO "fblock"
                ("height", "key_mr", "prev_key_mr", "timestamp", "tx_count", "ec_rate", "price", "data")
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);"#,
    )?
    .execute(params![
        fb.height,
        key_mr.as_bytes().as_slice(),
        fb.prev_key_mr.as_bytes().as_slice(),
        fb.timestamp as i64,
        fb.transactions.len() as i64,
        fb.ec_rate as i64,
        price,
        data,
    ])?;

    for (tx, (offset, size)) in fb.transactions.iter().zip(fb.transaction_ranges()) {
        debug_assert!(offset + size <= data.len());

        let tx_id = insert_transaction(sp, tx, fb.height, offset, size)?;
        let linked = insert_address_links(sp, tx_id, &tx.address_amounts()?, filter)?;
        trace!(
            target: "storage",
            height = fb.height,
            tx_id,
            offset,
            size,
            ?linked,
            "Inserted transaction"
        );
    }
    Ok(())
}

fn check_continuity(conn: &Connection, fb: &FBlock) -> Result<(), StorageError> {
    let Some(prev_height) = fb.height.checked_sub(1) else {
        return Ok(());
    };
    let stored: Option<Vec<u8>> = conn
        .prepare_cached(r#"SELECT "key_mr" FROM "fblock" WHERE "height" = ?1;"#)?
        .query_row([prev_height], |row| row.get(0))
        .optional()?;

    match stored {
        Some(key_mr) if key_mr == fb.prev_key_mr.as_bytes() => Ok(()),
        Some(key_mr) => Err(StorageError::ContinuityViolation {
            height: fb.height,
            expected: Bytes32::from_slice(&key_mr).unwrap_or_default(),
            found: fb.prev_key_mr,
        }),
        None if select_sync_height(conn)?.is_none() => Ok(()),
        None => Err(StorageError::MissingPredecessor { height: fb.height }),
    }
}

/// Height of the newest stored block, or `None` for an empty store.
pub fn select_sync_height(conn: &Connection) -> Result<Option<u32>, StorageError> {
    Ok(conn.query_row(r#"SELECT max("height") FROM "fblock";"#, [], |row| row.get(0))?)
}

/// Looks up a block by height.
pub fn select_fblock_by_height(
    conn: &Connection,
    height: u32,
) -> Result<StoredFBlock, StorageError> {
    select_fblock(conn, r#""height" = ?1"#, params![height], || {
        format!("fblock at height {height}")
    })
}

/// Looks up a block by key merkle root.
pub fn select_fblock_by_key_mr(
    conn: &Connection,
    key_mr: &Bytes32,
) -> Result<StoredFBlock, StorageError> {
    select_fblock(conn, r#""key_mr" = ?1"#, params![key_mr.as_bytes().as_slice()], || {
        format!("fblock with key_mr {key_mr}")
    })
}

fn select_fblock(
    conn: &Connection,
    condition: &str,
    params: &[&dyn rusqlite::ToSql],
    describe: impl FnOnce() -> String,
) -> Result<StoredFBlock, StorageError> {
    let sql = format!(
        r#"SELECT "timestamp", "key_mr", "price", "data" FROM "fblock" WHERE {condition};"#
    );
    let row = conn.prepare_cached(&sql)?.query_row(params, read_fblock_row).optional()?;
    let Some((timestamp, key_mr, price, data)) = row else {
        return Err(StorageError::EntryNotFound(describe()));
    };
    Ok(StoredFBlock {
        block: FBlock::decode(&data)?.with_timestamp(timestamp),
        key_mr: Bytes32::from_slice(&key_mr).unwrap_or_default(),
        price,
    })
}

type FBlockRow = (u64, Vec<u8>, Option<f64>, Vec<u8>);

fn read_fblock_row(row: &Row<'_>) -> rusqlite::Result<FBlockRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}
