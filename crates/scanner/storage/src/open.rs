//! Opening, identifying and tuning a store.

use crate::{
    StorageError,
    migrations::{CURRENT_VERSION, apply_migrations, set_schema_version},
    schema,
};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use tracing::{info, warn};

/// Marker stored in `PRAGMA application_id` to tell scanner stores apart from unrelated
/// SQLite files.
pub const APPLICATION_ID: i32 = 0x0FAC_701D;

/// Options applied when opening a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// Trade crash safety for insert throughput: no synchronous flushes, an in-memory
    /// rollback journal and no foreign key enforcement. A crash may corrupt the store.
    pub speed: bool,
}

/// Opens the store at `path`, creating it if needed, then identifies, migrates and tunes
/// it.
pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Connection, StorageError> {
    let mut conn = Connection::open_with_flags(
        path.as_ref(),
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    setup(&mut conn, options)?;
    Ok(conn)
}

/// Opens a fresh in-memory store.
pub fn open_in_memory(options: StoreOptions) -> Result<Connection, StorageError> {
    let mut conn = Connection::open_in_memory()?;
    setup(&mut conn, options)?;
    Ok(conn)
}

/// Bootstraps or upgrades the schema behind `conn` and applies `options`.
///
/// An empty file receives the current schema, the application id and the current version
/// in one transaction. A non-empty file must carry [`APPLICATION_ID`] and is brought up to
/// date through the migration ladder.
pub fn setup(conn: &mut Connection, options: StoreOptions) -> Result<(), StorageError> {
    if is_empty(conn)? {
        let tx = conn.transaction()?;
        tx.pragma_update(None, "application_id", APPLICATION_ID)?;
        tx.execute_batch(&schema::current_schema())?;
        set_schema_version(&tx, CURRENT_VERSION)?;
        tx.commit()?;
        info!(target: "storage", version = CURRENT_VERSION, "Created new store");
    } else {
        check_application_id(conn)?;
        apply_migrations(conn)?;
    }
    apply_durability(conn, options)
}

fn is_empty(conn: &Connection) -> Result<bool, StorageError> {
    let count: i64 =
        conn.query_row(r#"SELECT count(*) FROM "sqlite_master";"#, [], |row| row.get(0))?;
    Ok(count == 0)
}

fn check_application_id(conn: &Connection) -> Result<(), StorageError> {
    let found: i32 = conn.pragma_query_value(None, "application_id", |row| row.get(0))?;
    if found != APPLICATION_ID {
        return Err(StorageError::InvalidApplicationId { found, expected: APPLICATION_ID });
    }
    Ok(())
}

// Foreign key enforcement can only be toggled outside a transaction, so this runs after
// the schema work has committed.
fn apply_durability(conn: &Connection, options: StoreOptions) -> Result<(), StorageError> {
    if options.speed {
        warn!(target: "storage", "Speed mode enabled: a crash may corrupt the store");
        conn.pragma_update(None, "synchronous", "OFF")?;
        // `OFF` would also disable savepoint rollback, which batching relies on.
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "MEMORY", |row| row.get(0))?;
        conn.pragma_update(None, "foreign_keys", false)?;
        info!(target: "storage", journal_mode = %mode, "Relaxed durability settings");
    } else {
        conn.pragma_update(None, "foreign_keys", true)?;
    }
    Ok(())
}
