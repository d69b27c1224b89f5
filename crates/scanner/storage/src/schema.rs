//! Current schema.
//!
//! Lookup indexes are not part of the tables. [`create_indexes`](crate::create_indexes)
//! builds them over the populated tables once the first catch-up completes.

/// Blocks, keyed by height. `data` holds the full block encoding from which transaction
/// rows are sliced.
pub(crate) const CREATE_TABLE_FBLOCK: &str = r#"
CREATE TABLE "fblock" (
        "height"      INTEGER PRIMARY KEY,
        "key_mr"      BLOB NOT NULL,
        "prev_key_mr" BLOB,
        "timestamp"   INTEGER NOT NULL,
        "tx_count"    INTEGER NOT NULL,
        "ec_rate"     INTEGER NOT NULL,
        "price"       REAL, -- USD, NULL when no observation was available
        "data"        BLOB NOT NULL
);
"#;

/// Addresses and their running balances. `balance` is always the sum of the address's
/// `address_transaction` amounts.
pub(crate) const CREATE_TABLE_ADDRESS: &str = r#"
CREATE TABLE "address" (
        "id"      INTEGER PRIMARY KEY,
        "address" TEXT NOT NULL UNIQUE,
        "balance" INTEGER NOT NULL, -- factoshis
        "memo"    TEXT
);
"#;

/// Transaction metadata. The transaction itself lives in `fblock.data` at
/// `fb_offset .. fb_offset + size`.
pub(crate) const CREATE_TABLE_TRANSACTION: &str = r#"
CREATE TABLE "transaction" (
        "id"            INTEGER PRIMARY KEY,
        "height"        INTEGER NOT NULL REFERENCES "fblock"("height"),
        "fb_offset"     INTEGER NOT NULL,
        "size"          INTEGER NOT NULL,
        "hash"          BLOB NOT NULL,
        "timestamp"     INTEGER NOT NULL,
        "total_fct_in"  INTEGER NOT NULL, -- factoshis
        "total_fct_out" INTEGER NOT NULL, -- factoshis
        "total_ec_out"  INTEGER NOT NULL, -- factoshis
        "total_fee"     INTEGER NOT NULL, -- factoshis
        "memo"          TEXT
);
"#;

/// Signed amounts moved per (transaction, address). Inputs are negative.
pub(crate) const CREATE_TABLE_ADDRESS_TRANSACTION: &str = r#"
CREATE TABLE "address_transaction" (
        "tx_id"  INTEGER NOT NULL REFERENCES "transaction"("id"),
        "adr_id" INTEGER NOT NULL REFERENCES "address"("id"),
        "amount" INTEGER NOT NULL,

        PRIMARY KEY("tx_id", "adr_id")
);
"#;

/// Indexes built once the store has caught up with the chain.
pub(crate) const CREATE_INDEXES: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS "idx_fblock_key_mr" ON "fblock"("key_mr");
CREATE UNIQUE INDEX IF NOT EXISTS "idx_transaction_hash" ON "transaction"("hash");
CREATE INDEX IF NOT EXISTS "idx_transaction_height" ON "transaction"("height");
CREATE INDEX IF NOT EXISTS "idx_address_transaction_adr_id" ON "address_transaction"("adr_id");
"#;

/// Every table of the current schema, in dependency order.
pub(crate) fn current_schema() -> String {
    [
        CREATE_TABLE_FBLOCK,
        CREATE_TABLE_ADDRESS,
        CREATE_TABLE_TRANSACTION,
        CREATE_TABLE_ADDRESS_TRANSACTION,
    ]
    .concat()
}
