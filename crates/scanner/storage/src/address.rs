//! Address balances and per-transaction address links.

use crate::StorageError;
use fbscan_types::{AddressFilter, Bytes32, FactoidAddress};
use rusqlite::{Connection, DropBehavior, OptionalExtension, Savepoint, params};

/// Outcome of [`insert_address_links`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linked {
    /// The balances and links were kept.
    Retained,
    /// No address matched the filter and the effects were rolled back.
    Excluded,
}

/// Applies every signed amount of a transaction to its address's balance and records the
/// matching link rows.
///
/// The writes happen inside a savepoint nested in `sp`. When `filter` retains none of the
/// touched addresses, that savepoint is rolled back so neither balances nor links persist,
/// while the transaction row itself is left in place.
pub fn insert_address_links(
    sp: &mut Savepoint<'_>,
    tx_id: i64,
    amounts: &[(FactoidAddress, i64)],
    filter: &AddressFilter,
) -> Result<Linked, StorageError> {
    let mut inner = sp.savepoint()?;
    for (address, amount) in amounts {
        let adr_id = add_to_balance(&inner, address, *amount)?;
        inner
            .prepare_cached(
                r#"INSERT INTO "address_transaction" ("tx_id", "adr_id", "amount")
                VALUES (?1, ?2, ?3)
                ON CONFLICT("tx_id", "adr_id") DO UPDATE
                SET "amount" = "amount" + "excluded"."amount";"#,
            )?
            .execute(params![tx_id, adr_id, amount])?;
    }

    if filter.retains(amounts.iter().map(|(address, _)| address)) {
        inner.commit()?;
        Ok(Linked::Retained)
    } else {
        inner.set_drop_behavior(DropBehavior::Rollback);
        inner.finish()?;
        Ok(Linked::Excluded)
    }
}

/// Adds `delta` to the balance of `address`, creating the row on first sight, and returns
/// the address's row id.
pub fn add_to_balance(
    conn: &Connection,
    address: &FactoidAddress,
    delta: i64,
) -> Result<i64, StorageError> {
    Ok(conn
        .prepare_cached(
            r#"INSERT INTO "address" ("address", "balance") VALUES (?1, ?2)
            ON CONFLICT("address") DO UPDATE
            SET "balance" = "balance" + "excluded"."balance"
            RETURNING "id";"#,
        )?
        .query_row(params![address.to_string(), delta], |row| row.get(0))?)
}

/// An address row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRecord {
    /// Row id, referenced by address links.
    pub id: i64,
    /// The address.
    pub address: FactoidAddress,
    /// Running balance in factoshis. Negative when the scan started after the address was
    /// funded.
    pub balance: i64,
    /// Free-form annotation.
    pub memo: Option<String>,
}

/// Looks up a tracked address.
pub fn select_address(
    conn: &Connection,
    address: &FactoidAddress,
) -> Result<Option<AddressRecord>, StorageError> {
    let row = conn
        .prepare_cached(
            r#"SELECT "id", "address", "balance", "memo" FROM "address" WHERE "address" = ?1;"#,
        )?
        .query_row([address.to_string()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })
        .optional()?;

    row.map(|(id, stored, balance, memo)| -> Result<AddressRecord, StorageError> {
        let address = stored
            .parse::<FactoidAddress>()
            .map_err(|source| StorageError::InvalidAddress { address: stored, source })?;
        Ok(AddressRecord { id, address, balance, memo })
    })
    .transpose()
}

/// Counts stored addresses, optionally only those with a non-zero balance.
pub fn select_address_count(conn: &Connection, non_zero_only: bool) -> Result<u64, StorageError> {
    let sql = if non_zero_only {
        r#"SELECT count(*) FROM "address" WHERE "balance" != 0;"#
    } else {
        r#"SELECT count(*) FROM "address";"#
    };
    Ok(conn.query_row(sql, [], |row| row.get(0))?)
}

/// A transaction touching an address, as seen from that address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressLink {
    /// Row id of the transaction.
    pub tx_id: i64,
    /// Transaction id.
    pub hash: Bytes32,
    /// Height of the owning block.
    pub height: u32,
    /// Signed amount moved. Inputs are negative.
    pub amount: i64,
}

/// Lists every retained transaction touching `address`, oldest first.
pub fn select_address_transactions(
    conn: &Connection,
    address: &FactoidAddress,
) -> Result<Vec<AddressLink>, StorageError> {
    let mut stmt = conn.prepare_cached(
        r#"SELECT "transaction"."id", "transaction"."hash", "transaction"."height",
                "address_transaction"."amount"
            FROM "address_transaction"
            JOIN "address" ON "address"."id" = "address_transaction"."adr_id"
            JOIN "transaction" ON "transaction"."id" = "address_transaction"."tx_id"
            WHERE "address"."address" = ?1
            ORDER BY "transaction"."id";"#,
    )?;
    let rows = stmt.query_map([address.to_string()], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, Vec<u8>>(1)?,
            row.get::<_, u32>(2)?,
            row.get::<_, i64>(3)?,
        ))
    })?;
    rows.map(|row| -> Result<AddressLink, StorageError> {
        let (tx_id, hash, height, amount) = row?;
        Ok(AddressLink {
            tx_id,
            hash: Bytes32::from_slice(&hash).unwrap_or_default(),
            height,
            amount,
        })
    })
    .collect()
}
