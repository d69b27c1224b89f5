//! Ledger behaviour across blocks, filters and rollbacks.

use fbscan_storage::{
    Linked, StorageError, StoreOptions, create_indexes, insert_address_links, insert_fblock,
    insert_transaction, open_in_memory, select_address, select_address_count,
    select_address_transactions, select_fblock_by_height, select_fblock_by_key_mr,
    select_sync_height, select_transaction_by_hash, select_transaction_by_id,
    select_transactions_by_height,
};
use fbscan_types::{
    AddressAmount, AddressFilter, Bytes32, DecodeError, FBlock, FTransaction,
    test_utils::{ChainBuilder, address, transfer},
};
use rusqlite::Connection;

fn store() -> Connection {
    open_in_memory(StoreOptions::default()).unwrap()
}

fn ingest(conn: &mut Connection, blocks: &[FBlock], filter: &AddressFilter) {
    let mut sp = conn.savepoint().unwrap();
    for fb in blocks {
        insert_fblock(&mut sp, fb, Some(1.5), filter).unwrap();
    }
    sp.commit().unwrap();
}

fn link_count(conn: &Connection) -> i64 {
    conn.query_row(r#"SELECT count(*) FROM "address_transaction";"#, [], |row| row.get(0))
        .unwrap()
}

fn balance(conn: &Connection, byte: u8) -> Option<i64> {
    select_address(conn, &address(byte)).unwrap().map(|record| record.balance)
}

#[test]
fn tracked_sender_keeps_both_sides() {
    let mut conn = store();
    let mut chain = ChainBuilder::starting_at(100);
    let fb = chain.block(vec![transfer(address(0xa), address(0xb), 50, 0)]);
    ingest(&mut conn, &[fb], &AddressFilter::from_addresses([address(0xa)]));

    assert_eq!(balance(&conn, 0xa), Some(-50));
    assert_eq!(balance(&conn, 0xb), Some(50));
    assert_eq!(link_count(&conn), 2);
}

#[test]
fn untracked_transaction_keeps_only_its_row() {
    let mut conn = store();
    let mut chain = ChainBuilder::starting_at(100);
    let tx = transfer(address(0xa), address(0xb), 50, 0);
    let fb = chain.block(vec![tx.clone()]);
    ingest(&mut conn, &[fb], &AddressFilter::from_addresses([address(0xc)]));

    assert_eq!(select_transactions_by_height(&conn, 100).unwrap().len(), 1);
    assert_eq!(select_transaction_by_hash(&conn, &tx.id()).unwrap().meta.total_fct_in, 50);
    assert_eq!(link_count(&conn), 0);
    assert_eq!(select_address_count(&conn, false).unwrap(), 0);
}

#[test]
fn excluded_links_do_not_touch_earlier_work() {
    let mut conn = store();
    let fb = ChainBuilder::starting_at(0).block(vec![]);
    ingest(&mut conn, std::slice::from_ref(&fb), &AddressFilter::TrackAll);

    let mut sp = conn.savepoint().unwrap();
    let kept_tx = transfer(address(1), address(2), 5, 0);
    let dropped_tx = transfer(address(1), address(3), 7, 0);
    let kept_id =
        insert_transaction(&sp, &kept_tx, fb.height, fb.header_len(), kept_tx.encoded_len())
            .unwrap();
    let dropped_id =
        insert_transaction(&sp, &dropped_tx, fb.height, fb.header_len(), dropped_tx.encoded_len())
            .unwrap();

    let kept = kept_tx.address_amounts().unwrap();
    assert_eq!(
        insert_address_links(&mut sp, kept_id, &kept, &AddressFilter::TrackAll).unwrap(),
        Linked::Retained
    );
    let dropped = dropped_tx.address_amounts().unwrap();
    let filter = AddressFilter::from_addresses([address(9)]);
    assert_eq!(
        insert_address_links(&mut sp, dropped_id, &dropped, &filter).unwrap(),
        Linked::Excluded
    );
    sp.commit().unwrap();

    assert_eq!(balance(&conn, 1), Some(-5));
    assert_eq!(balance(&conn, 3), None);
    assert_eq!(link_count(&conn), 2);
    assert_eq!(select_transactions_by_height(&conn, fb.height).unwrap().len(), 2);
}

#[test]
fn out_of_range_amount_is_rejected() {
    let mut conn = store();
    let too_big = i64::MAX as u64 + 1;
    let fb = ChainBuilder::starting_at(0).block(vec![transfer(address(1), address(2), too_big, 0)]);

    let mut sp = conn.savepoint().unwrap();
    let err = insert_fblock(&mut sp, &fb, None, &AddressFilter::TrackAll).unwrap_err();
    drop(sp);

    assert!(
        matches!(
            err,
            StorageError::Decode(DecodeError::AmountOutOfRange(amount)) if amount == too_big
        ),
        "{err:?}"
    );
    assert_eq!(select_sync_height(&conn).unwrap(), None);
}

#[test]
fn mismatched_predecessor_is_rejected() {
    let mut conn = store();
    let mut chain = ChainBuilder::starting_at(100);
    ingest(&mut conn, &chain.empty_blocks(1), &AddressFilter::TrackAll);

    let mut forged = chain.block(vec![]);
    forged.prev_key_mr = Bytes32([0xee; 32]);
    let mut sp = conn.savepoint().unwrap();
    let err = insert_fblock(&mut sp, &forged, None, &AddressFilter::TrackAll).unwrap_err();
    drop(sp);

    assert!(matches!(
        err,
        StorageError::ContinuityViolation { height: 101, found, .. } if found == Bytes32([0xee; 32])
    ));
    assert!(matches!(
        select_fblock_by_height(&conn, 101),
        Err(StorageError::EntryNotFound(_))
    ));
    assert_eq!(select_sync_height(&conn).unwrap(), Some(100));
}

#[test]
fn gap_in_heights_is_rejected() {
    let mut conn = store();
    let mut chain = ChainBuilder::starting_at(100);
    ingest(&mut conn, &chain.empty_blocks(1), &AddressFilter::TrackAll);
    chain.block(vec![]);

    let mut sp = conn.savepoint().unwrap();
    let skipped = chain.block(vec![]);
    assert!(matches!(
        insert_fblock(&mut sp, &skipped, None, &AddressFilter::TrackAll),
        Err(StorageError::MissingPredecessor { height: 102 })
    ));
}

#[test]
fn repeated_pair_accumulates_into_one_link() {
    let mut conn = store();
    let mut tx = transfer(address(1), address(2), 50, 0);
    tx.inputs = vec![
        AddressAmount { address: address(1), amount: 30 },
        AddressAmount { address: address(1), amount: 20 },
    ];
    tx.signatures.push(tx.signatures[0]);
    let mut chain = ChainBuilder::starting_at(0);
    ingest(&mut conn, &[chain.block(vec![tx.clone()])], &AddressFilter::TrackAll);

    let links = select_address_transactions(&conn, &address(1)).unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].amount, -50);
    assert_eq!(links[0].hash, tx.id());
    assert_eq!(balance(&conn, 1), Some(-50));
}

#[test]
fn balances_equal_sum_of_links() {
    let mut conn = store();
    let mut chain = ChainBuilder::starting_at(0);
    let blocks = vec![
        chain.block(vec![transfer(address(1), address(2), 100, 0)]),
        chain.block(vec![
            transfer(address(2), address(3), 40, 1),
            transfer(address(3), address(1), 15, 7),
        ]),
        chain.block(vec![transfer(address(2), address(1), 60, 9)]),
    ];
    ingest(&mut conn, &blocks, &AddressFilter::TrackAll);

    for byte in 1..=3 {
        let links = select_address_transactions(&conn, &address(byte)).unwrap();
        let sum: i64 = links.iter().map(|link| link.amount).sum();
        assert_eq!(balance(&conn, byte), Some(sum));
    }
    assert_eq!(balance(&conn, 2), Some(0));
    assert_eq!(select_address_count(&conn, false).unwrap(), 3);
    assert_eq!(select_address_count(&conn, true).unwrap(), 2);
}

#[test]
fn transactions_are_sliced_from_block_bytes() {
    let mut conn = store();
    let mut chain = ChainBuilder::starting_at(7);
    let txs = vec![
        transfer(address(1), address(2), 10, 0),
        transfer(address(2), address(3), 5, 3),
        transfer(address(3), address(4), 1_000_000_000, 3),
        transfer(address(4), address(5), 2, 9),
    ];
    let mut fb = chain.block(txs.clone());
    fb.expansion = vec![0xab; 5];
    ingest(&mut conn, std::slice::from_ref(&fb), &AddressFilter::TrackAll);

    for tx in &txs {
        let stored = select_transaction_by_hash(&conn, &tx.id()).unwrap();
        assert_eq!(stored.tx, FTransaction { minute: 0, ..tx.clone() });
        assert_eq!(stored.meta.size, tx.encoded_len());
        assert_eq!(select_transaction_by_id(&conn, stored.meta.id).unwrap(), stored);
    }

    let stored = select_fblock_by_key_mr(&conn, &fb.key_mr()).unwrap();
    assert_eq!(stored.block, fb);
    assert_eq!(stored.price, Some(1.5));
}

#[test]
fn dropped_outer_savepoint_discards_everything() {
    let mut conn = store();
    let mut chain = ChainBuilder::starting_at(0);
    {
        let mut sp = conn.savepoint().unwrap();
        for fb in chain.empty_blocks(3) {
            insert_fblock(&mut sp, &fb, None, &AddressFilter::TrackAll).unwrap();
        }
        let fb = chain.block(vec![transfer(address(1), address(2), 9, 4)]);
        insert_fblock(&mut sp, &fb, None, &AddressFilter::TrackAll).unwrap();
    }

    assert_eq!(select_sync_height(&conn).unwrap(), None);
    assert_eq!(select_address_count(&conn, false).unwrap(), 0);
    assert_eq!(link_count(&conn), 0);
}

#[test]
fn indexes_can_be_created_repeatedly() {
    let mut conn = store();
    let mut chain = ChainBuilder::starting_at(0);
    ingest(&mut conn, &chain.empty_blocks(2), &AddressFilter::TrackAll);

    create_indexes(&conn).unwrap();
    create_indexes(&conn).unwrap();

    let indexes: i64 = conn
        .query_row(
            r#"SELECT count(*) FROM "sqlite_master" WHERE "type" = 'index' AND "name" LIKE 'idx_%';"#,
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(indexes, 4);
}
