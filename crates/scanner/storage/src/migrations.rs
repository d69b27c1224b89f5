//! Versioned migration ladder.
//!
//! The schema version lives in `PRAGMA user_version`. Every [`Migration`] upgrades the
//! store from exactly one version to the next and runs inside its own savepoint nested in
//! the transaction that covers the whole ladder. The new version is stamped inside that
//! same transaction, so a store is never observed half-migrated or migrated but unstamped.
//!
//! Steps rebuild referenced tables, so the ladder runs with foreign key enforcement off and
//! the whole store is checked with `PRAGMA foreign_key_check` before the commit.

use crate::{StorageError, schema};
use fbscan_types::{Bytes32, FBlock};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

/// Schema version written by this build.
pub const CURRENT_VERSION: u32 = 2;

/// A single step of the ladder.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Version this step upgrades from. It leaves the store at `from + 1`.
    pub from: u32,
    /// Human-readable summary, logged when the step runs.
    pub description: &'static str,
    /// Applies the step.
    pub apply: fn(&Connection) -> Result<(), StorageError>,
}

/// Every known migration, ordered by [`Migration::from`].
pub static MIGRATIONS: &[Migration] = &[Migration {
    from: 1,
    description: "explicit row ids, block metadata columns and transaction fees",
    apply: migrate_v1_to_v2,
}];

pub(crate) fn schema_version(conn: &Connection) -> Result<u32, StorageError> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

pub(crate) fn set_schema_version(conn: &Connection, version: u32) -> Result<(), StorageError> {
    Ok(conn.pragma_update(None, "user_version", version)?)
}

fn pending(version: u32) -> Result<Vec<&'static Migration>, StorageError> {
    (version..CURRENT_VERSION)
        .map(|from| {
            MIGRATIONS.iter().find(|m| m.from == from).ok_or(StorageError::NoMigration(from))
        })
        .collect()
}

/// Brings a non-empty store up to [`CURRENT_VERSION`].
pub(crate) fn apply_migrations(conn: &mut Connection) -> Result<(), StorageError> {
    let version = schema_version(conn)?;
    if version == CURRENT_VERSION {
        return Ok(());
    }
    if version > CURRENT_VERSION {
        return Err(StorageError::UnsupportedVersion {
            found: version,
            supported: CURRENT_VERSION,
        });
    }

    let steps = pending(version)?;
    // Enforcement can only be toggled outside a transaction.
    let foreign_keys: bool = conn.pragma_query_value(None, "foreign_keys", |row| row.get(0))?;
    conn.pragma_update(None, "foreign_keys", false)?;
    let result = run_ladder(conn, &steps);
    conn.pragma_update(None, "foreign_keys", foreign_keys)?;
    result?;

    info!(target: "storage", version = CURRENT_VERSION, "Migrations complete, compacting store");
    conn.execute_batch("VACUUM;")?;
    Ok(())
}

fn run_ladder(conn: &mut Connection, steps: &[&Migration]) -> Result<(), StorageError> {
    let mut tx = conn.transaction()?;
    for step in steps {
        info!(
            target: "storage",
            from = step.from,
            to = step.from + 1,
            "Running migration: {}",
            step.description
        );
        let sp = tx.savepoint()?;
        (step.apply)(&sp)?;
        sp.commit()?;
    }
    check_foreign_keys(&tx)?;
    set_schema_version(&tx, CURRENT_VERSION)?;
    tx.commit()?;
    Ok(())
}

fn check_foreign_keys(conn: &Connection) -> Result<(), StorageError> {
    let violation = conn
        .query_row("PRAGMA foreign_key_check;", [], |row| {
            Ok(StorageError::ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
            })
        })
        .optional()?;
    violation.map_or(Ok(()), Err)
}

/// Version 1 keyed transactions by hash and addresses by their string, relying on
/// implicit row ids for the link table, and did not keep block metadata outside the raw
/// bytes. A price of zero was written whenever the price lookup gave up.
///
/// Version 1 also derived each transaction's offset from timestamp deltas, which misplaces
/// transactions relative to the minute markers. Byte ranges are recomputed from the decoded
/// blocks and every transaction row must be found in its block.
fn migrate_v1_to_v2(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        r#"
ALTER TABLE "address_transaction" RENAME TO "address_transaction_v1";
ALTER TABLE "transaction" RENAME TO "transaction_v1";
ALTER TABLE "address" RENAME TO "address_v1";
ALTER TABLE "fblock" RENAME TO "fblock_v1";
"#,
    )?;
    conn.execute_batch(&schema::current_schema())?;

    conn.execute_batch(
        r#"
INSERT INTO "address" ("id", "address", "balance", "memo")
        SELECT "rowid", "address", "balance", "memo" FROM "address_v1";

INSERT INTO "transaction"
        ("id", "height", "fb_offset", "size", "hash", "timestamp",
         "total_fct_in", "total_fct_out", "total_ec_out", "total_fee", "memo")
        SELECT "rowid", "height", -1, "size", "id", "timestamp",
               "total_fct_in", "total_fct_out", "total_ec_out",
               max("total_fct_in" - "total_fct_out" - "total_ec_out", 0), "memo"
        FROM "transaction_v1";

INSERT INTO "address_transaction" ("tx_id", "adr_id", "amount")
        SELECT "tx_id", "adr_id", "amount" FROM "address_transaction_v1";
"#,
    )?;

    {
        let mut select = conn.prepare(
            r#"SELECT "height", "key_mr", "timestamp", "price", "data"
                FROM "fblock_v1" ORDER BY "height";"#,
        )?;
        let mut insert = conn.prepare(
            r#"INSERT INTO "fblock"
                ("height", "key_mr", "prev_key_mr", "timestamp", "tx_count", "ec_rate", "price", "data")
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);"#,
        )?;
        let mut place = conn.prepare(
            r#"UPDATE "transaction" SET "fb_offset" = ?1, "size" = ?2
                WHERE "hash" = ?3 AND "height" = ?4;"#,
        )?;
        let mut rows = select.query([])?;
        while let Some(row) = rows.next()? {
            let height: u32 = row.get(0)?;
            let key_mr: Vec<u8> = row.get(1)?;
            let timestamp: Option<i64> = row.get(2)?;
            let price: Option<f64> = row.get(3)?;
            let data: Vec<u8> = row.get(4)?;
            let fb = FBlock::decode(&data)?;
            insert.execute(params![
                height,
                key_mr,
                fb.prev_key_mr.as_bytes().as_slice(),
                timestamp.unwrap_or_default(),
                fb.transactions.len() as i64,
                fb.ec_rate as i64,
                price.filter(|p| *p != 0.0),
                data,
            ])?;
            for (tx, (offset, size)) in fb.transactions.iter().zip(fb.transaction_ranges()) {
                place.execute(params![
                    offset as i64,
                    size as i64,
                    tx.id().as_bytes().as_slice(),
                    height
                ])?;
            }
        }
    }

    let unplaced: Option<(Vec<u8>, u32)> = conn
        .query_row(
            r#"SELECT "hash", "height" FROM "transaction" WHERE "fb_offset" < 0 LIMIT 1;"#,
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    if let Some((hash, height)) = unplaced {
        let hash = Bytes32::from_slice(&hash).unwrap_or_default();
        return Err(StorageError::EntryNotFound(format!("transaction {hash} in block {height}")));
    }

    conn.execute_batch(
        r#"
DROP TABLE "address_transaction_v1";
DROP TABLE "transaction_v1";
DROP TABLE "address_v1";
DROP TABLE "fblock_v1";
"#,
    )?;
    Ok(())
}
