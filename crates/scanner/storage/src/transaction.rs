//! Transaction rows and their byte ranges.

use crate::StorageError;
use fbscan_types::{Bytes32, FTransaction, signed_amount};
use rusqlite::{Connection, DatabaseName, OptionalExtension, Row, params};

/// Transaction metadata as stored, without the decoded transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionMeta {
    /// Row id, referenced by address links.
    pub id: i64,
    /// Height of the owning block.
    pub height: u32,
    /// Offset of the transaction within the block's stored bytes.
    pub offset: usize,
    /// Encoded length of the transaction.
    pub size: usize,
    /// Transaction id.
    pub hash: Bytes32,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    /// Sum of the inputs.
    pub total_fct_in: u64,
    /// Sum of the Factoid outputs.
    pub total_fct_out: u64,
    /// Sum of the Entry Credit outputs.
    pub total_ec_out: u64,
    /// Fee burned.
    pub total_fee: u64,
    /// Free-form annotation.
    pub memo: Option<String>,
}

/// A transaction re-derived from its owning block's stored bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTransaction {
    /// Stored metadata.
    pub meta: TransactionMeta,
    /// The decoded transaction. Its minute is not recoverable from the slice and is zero.
    pub tx: FTransaction,
}

/// Stores the metadata row for `tx`, found at `offset .. offset + size` within the block
/// at `height`, and returns its row id.
pub fn insert_transaction(
    conn: &Connection,
    tx: &FTransaction,
    height: u32,
    offset: usize,
    size: usize,
) -> Result<i64, StorageError> {
    conn.prepare_cached(
        r#"INSERT INTO "transaction"
                ("height", "fb_offset", "size", "hash", "timestamp",
                 "total_fct_in", "total_fct_out", "total_ec_out", "total_fee")
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);"#,
    )?
    .execute(params![
        height,
        offset as i64,
        size as i64,
        tx.id().as_bytes().as_slice(),
        tx.timestamp() as i64,
        signed_amount(tx.total_in())?,
        signed_amount(tx.total_fct_out())?,
        signed_amount(tx.total_ec_out())?,
        signed_amount(tx.fee())?,
    ])?;
    Ok(conn.last_insert_rowid())
}

const SELECT_META: &str = r#"SELECT "id", "height", "fb_offset", "size", "hash", "timestamp",
        "total_fct_in", "total_fct_out", "total_ec_out", "total_fee", "memo"
        FROM "transaction""#;

fn read_meta(row: &Row<'_>) -> rusqlite::Result<(TransactionMeta, Vec<u8>)> {
    let meta = TransactionMeta {
        id: row.get(0)?,
        height: row.get(1)?,
        offset: row.get(2)?,
        size: row.get(3)?,
        hash: Bytes32::ZERO,
        timestamp: row.get(5)?,
        total_fct_in: row.get(6)?,
        total_fct_out: row.get(7)?,
        total_ec_out: row.get(8)?,
        total_fee: row.get(9)?,
        memo: row.get(10)?,
    };
    Ok((meta, row.get(4)?))
}

fn with_hash((mut meta, hash): (TransactionMeta, Vec<u8>)) -> TransactionMeta {
    meta.hash = Bytes32::from_slice(&hash).unwrap_or_default();
    meta
}

/// Looks up transaction metadata by row id.
pub fn select_transaction_meta(
    conn: &Connection,
    id: i64,
) -> Result<TransactionMeta, StorageError> {
    conn.prepare_cached(&format!(r#"{SELECT_META} WHERE "id" = ?1;"#))?
        .query_row([id], read_meta)
        .optional()?
        .map(with_hash)
        .ok_or_else(|| StorageError::EntryNotFound(format!("transaction {id}")))
}

/// Lists the metadata of every transaction in the block at `height`, in block order.
pub fn select_transactions_by_height(
    conn: &Connection,
    height: u32,
) -> Result<Vec<TransactionMeta>, StorageError> {
    let mut stmt =
        conn.prepare_cached(&format!(r#"{SELECT_META} WHERE "height" = ?1 ORDER BY "id";"#))?;
    let rows = stmt.query_map([height], read_meta)?;
    rows.map(|row| row.map(with_hash).map_err(StorageError::from)).collect()
}

/// Looks up a transaction by its id (content hash) and decodes it from the block bytes.
pub fn select_transaction_by_hash(
    conn: &Connection,
    hash: &Bytes32,
) -> Result<StoredTransaction, StorageError> {
    let meta = conn
        .prepare_cached(&format!(r#"{SELECT_META} WHERE "hash" = ?1;"#))?
        .query_row([hash.as_bytes().as_slice()], read_meta)
        .optional()?
        .map(with_hash)
        .ok_or_else(|| StorageError::EntryNotFound(format!("transaction {hash}")))?;
    read_transaction(conn, meta)
}

/// Looks up a transaction by row id and decodes it from the block bytes.
pub fn select_transaction_by_id(
    conn: &Connection,
    id: i64,
) -> Result<StoredTransaction, StorageError> {
    let meta = select_transaction_meta(conn, id)?;
    read_transaction(conn, meta)
}

/// Reads only the transaction's byte range out of the block blob. `fblock.height` is the
/// table's integer primary key and therefore its row id.
fn read_transaction(
    conn: &Connection,
    meta: TransactionMeta,
) -> Result<StoredTransaction, StorageError> {
    let blob = conn.blob_open(DatabaseName::Main, "fblock", "data", i64::from(meta.height), true)?;
    let end = meta.offset + meta.size;
    if end > blob.len() {
        return Err(StorageError::TruncatedTransaction {
            id: meta.id,
            offset: meta.offset,
            end,
            len: blob.len(),
        });
    }
    let mut data = vec![0u8; meta.size];
    blob.read_at_exact(&mut data, meta.offset)?;
    let tx = FTransaction::decode(&data)?;
    Ok(StoredTransaction { meta, tx })
}
