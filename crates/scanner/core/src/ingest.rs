//! The batch ingest worker: the single writer of the store.

use crate::{Metrics, PricedBlock};
use fbscan_storage::{StorageError, create_indexes, insert_fblock, select_sync_height};
use fbscan_types::AddressFilter;
use rusqlite::{Connection, DropBehavior, Savepoint};
use thiserror::Error;
use tokio::{
    runtime::Handle,
    sync::{
        mpsc::{self, error::TryRecvError},
        watch,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Fatal ingest failures.
#[derive(Debug, Error)]
pub enum IngestError {
    /// A block could not be inserted. Its whole batch was rolled back.
    #[error("failed to insert block {height}: {source}")]
    Insert {
        /// Height of the rejected block.
        height: u32,
        /// Underlying error.
        #[source]
        source: StorageError,
    },
    /// Any other store failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<rusqlite::Error> for IngestError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.into())
    }
}

/// Why a batch stopped growing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchEnd {
    /// The batch reached its maximum size.
    Full,
    /// Caught up and nothing else is queued.
    Drained,
    /// The first catch-up just completed.
    Synced,
    /// The scanner dropped its sender.
    Closed,
    /// Shutdown was requested.
    Cancelled,
}

enum Event {
    Block(PricedBlock),
    End(BatchEnd),
}

/// Everything the worker waits on.
#[derive(Debug)]
struct Inbox {
    blocks_rx: mpsc::Receiver<PricedBlock>,
    synced_rx: watch::Receiver<Option<u32>>,
    cancel: CancellationToken,
}

impl Inbox {
    /// Height the scanner reported as caught up, once it has.
    fn synced_height(&self) -> Option<u32> {
        *self.synced_rx.borrow()
    }

    /// Next event for a batch currently holding `pending` blocks.
    ///
    /// After the first catch-up, a non-empty batch does not wait for more blocks.
    fn next(&mut self, handle: &Handle, pending: usize) -> Event {
        if self.cancel.is_cancelled() {
            return Event::End(BatchEnd::Cancelled);
        }

        let caught_up = self.synced_height().is_some();
        if caught_up && pending > 0 {
            return match self.blocks_rx.try_recv() {
                Ok(block) => Event::Block(block),
                Err(TryRecvError::Empty) => Event::End(BatchEnd::Drained),
                Err(TryRecvError::Disconnected) => Event::End(BatchEnd::Closed),
            };
        }

        handle.block_on(async {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Event::End(BatchEnd::Cancelled),
                block = self.blocks_rx.recv() => {
                    block.map_or(Event::End(BatchEnd::Closed), Event::Block)
                }
                Ok(()) = self.synced_rx.changed(), if !caught_up => Event::End(BatchEnd::Synced),
            }
        })
    }
}

/// Drains the block queue into the store in atomic batches.
///
/// Each batch is an outer savepoint holding up to `batch_size` blocks. A batch is
/// committed when it is full, when the queue is closed, or, once the first catch-up has
/// completed, as soon as the queue is empty. Cancellation or an insert error rolls the
/// open batch back in full.
///
/// The lookup indexes are created after the first commit that reaches the height the
/// scanner reported as caught up.
#[derive(Debug)]
pub struct IngestWorker {
    conn: Connection,
    inbox: Inbox,
    filter: AddressFilter,
    batch_size: usize,
}

impl IngestWorker {
    /// Creates a new [`IngestWorker`].
    pub fn new(
        conn: Connection,
        blocks_rx: mpsc::Receiver<PricedBlock>,
        synced_rx: watch::Receiver<Option<u32>>,
        filter: AddressFilter,
        batch_size: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            conn,
            inbox: Inbox { blocks_rx, synced_rx, cancel },
            filter,
            batch_size: batch_size.max(1),
        }
    }

    /// Runs until the queue closes, cancellation, or a fatal error, which also cancels the
    /// shared token so the scanner stops with it.
    ///
    /// Savepoints borrow the connection and cannot cross threads, so this blocks the
    /// calling thread and waits on the queue through `handle`. Run it with
    /// [`tokio::task::spawn_blocking`].
    pub fn run(mut self, handle: &Handle) -> Result<(), IngestError> {
        let result = self.ingest(handle);
        if let Err(err) = &result {
            error!(target: "ingest", %err, "Ingest worker failed");
            self.inbox.cancel.cancel();
        }
        result
    }

    fn ingest(&mut self, handle: &Handle) -> Result<(), IngestError> {
        let mut committed = select_sync_height(&self.conn)?;
        let mut indexed = false;

        loop {
            let mut sp = self.conn.savepoint()?;
            sp.set_drop_behavior(DropBehavior::Rollback);

            let mut batch = Batch::default();
            let filled =
                batch.fill(&mut sp, &mut self.inbox, handle, &self.filter, self.batch_size);
            let end = match filled {
                Ok(end) => end,
                Err(err) => {
                    drop(sp);
                    Metrics::record_rollback();
                    return Err(err);
                }
            };

            if end == BatchEnd::Cancelled {
                sp.finish()?;
                Metrics::record_rollback();
                info!(
                    target: "ingest",
                    discarded = batch.len,
                    "Ingest worker cancellation requested, rolled back open batch"
                );
                return Ok(());
            }

            sp.commit()?;
            if batch.last.is_some() {
                committed = batch.last;
            }
            if batch.len > 0 {
                Metrics::record_commit(batch.len, committed);
                debug!(
                    target: "ingest",
                    blocks = batch.len,
                    height = ?committed,
                    ?end,
                    "Committed batch"
                );
            }

            let reached = |target: u32| committed.is_some_and(|height| height >= target);
            if !indexed && self.inbox.synced_height().is_some_and(reached) {
                create_indexes(&self.conn)?;
                indexed = true;
            }

            if end == BatchEnd::Closed {
                info!(target: "ingest", height = ?committed, "Block queue closed, stopping");
                return Ok(());
            }
        }
    }
}

#[derive(Debug, Default)]
struct Batch {
    len: usize,
    last: Option<u32>,
}

impl Batch {
    fn fill(
        &mut self,
        sp: &mut Savepoint<'_>,
        inbox: &mut Inbox,
        handle: &Handle,
        filter: &AddressFilter,
        batch_size: usize,
    ) -> Result<BatchEnd, IngestError> {
        while self.len < batch_size {
            match inbox.next(handle, self.len) {
                Event::Block(PricedBlock { block, price }) => {
                    insert_fblock(sp, &block, price, filter)
                        .map_err(|source| IngestError::Insert { height: block.height, source })?;
                    self.len += 1;
                    self.last = Some(block.height);
                }
                Event::End(end) => return Ok(end),
            }
        }
        Ok(BatchEnd::Full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fbscan_storage::{StoreOptions, open, select_address};
    use fbscan_types::{
        Bytes32,
        test_utils::{ChainBuilder, address, transfer},
    };
    use crate::test_utils::CountingRecorder;
    use std::{path::Path, time::Duration};
    use tokio::task::JoinHandle;

    struct Harness {
        blocks_tx: mpsc::Sender<PricedBlock>,
        synced_tx: watch::Sender<Option<u32>>,
        cancel: CancellationToken,
        task: JoinHandle<Result<(), IngestError>>,
    }

    fn spawn(path: &Path, batch_size: usize) -> Harness {
        let conn = open(path, StoreOptions::default()).unwrap();
        let (blocks_tx, blocks_rx) = mpsc::channel(20);
        let (synced_tx, synced_rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let worker = IngestWorker::new(
            conn,
            blocks_rx,
            synced_rx,
            AddressFilter::TrackAll,
            batch_size,
            cancel.clone(),
        );
        let handle = Handle::current();
        let task = tokio::task::spawn_blocking(move || worker.run(&handle));
        Harness { blocks_tx, synced_tx, cancel, task }
    }

    fn priced(block: fbscan_types::FBlock) -> PricedBlock {
        PricedBlock { block, price: Some(0.25) }
    }

    fn sync_height(path: &Path) -> Option<u32> {
        select_sync_height(&open(path, StoreOptions::default()).unwrap()).unwrap()
    }

    fn index_count(path: &Path) -> i64 {
        open(path, StoreOptions::default())
            .unwrap()
            .query_row(
                r#"SELECT count(*) FROM "sqlite_master"
                    WHERE "type" = 'index' AND "name" LIKE 'idx_%';"#,
                [],
                |row| row.get(0),
            )
            .unwrap()
    }

    async fn wait_for_height(path: &Path, height: u32) {
        for _ in 0..500 {
            if sync_height(path) == Some(height) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("store never reached height {height}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_closed_queue_commits_every_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.sqlite3");
        let h = spawn(&path, 2);

        let mut chain = ChainBuilder::starting_at(0);
        for block in chain.empty_blocks(4) {
            h.blocks_tx.send(priced(block)).await.unwrap();
        }
        let funded = chain.block(vec![transfer(address(1), address(2), 75, 5)]);
        h.blocks_tx.send(priced(funded)).await.unwrap();
        drop(h.blocks_tx);

        h.task.await.unwrap().unwrap();
        assert_eq!(sync_height(&path), Some(4));
        let conn = open(&path, StoreOptions::default()).unwrap();
        assert_eq!(select_address(&conn, &address(2)).unwrap().unwrap().balance, 75);
        assert!(!h.cancel.is_cancelled());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancellation_rolls_back_open_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.sqlite3");
        let h = spawn(&path, 100);

        let mut chain = ChainBuilder::starting_at(0);
        for block in chain.empty_blocks(3) {
            h.blocks_tx.send(priced(block)).await.unwrap();
        }
        h.cancel.cancel();

        h.task.await.unwrap().unwrap();
        assert_eq!(sync_height(&path), None);
    }

    /// Heights, balances, links and transaction rows, in a comparable form.
    fn ledger_state(path: &Path) -> (Option<u32>, Vec<(String, i64)>, i64, i64) {
        let conn = open(path, StoreOptions::default()).unwrap();
        let balances = conn
            .prepare(r#"SELECT "address", "balance" FROM "address" ORDER BY "address";"#)
            .unwrap()
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        let count = |table: &str| -> i64 {
            conn.query_row(&format!(r#"SELECT count(*) FROM "{table}";"#), [], |row| row.get(0))
                .unwrap()
        };
        (
            select_sync_height(&conn).unwrap(),
            balances,
            count("address_transaction"),
            count("transaction"),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancellation_keeps_committed_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.sqlite3");
        let h = spawn(&path, 2);

        let mut chain = ChainBuilder::starting_at(0);
        h.blocks_tx
            .send(priced(chain.block(vec![transfer(address(1), address(2), 100, 0)])))
            .await
            .unwrap();
        h.blocks_tx
            .send(priced(chain.block(vec![transfer(address(2), address(3), 40, 3)])))
            .await
            .unwrap();
        wait_for_height(&path, 1).await;
        let committed = ledger_state(&path);
        assert_eq!(committed.2, 4);

        // One block of the next batch, touching known and new addresses.
        let open_block = chain.block(vec![
            transfer(address(3), address(1), 15, 1),
            transfer(address(4), address(5), 9, 6),
        ]);
        h.blocks_tx.send(priced(open_block)).await.unwrap();
        while h.blocks_tx.capacity() < h.blocks_tx.max_capacity() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        h.cancel.cancel();
        h.task.await.unwrap().unwrap();

        let after = ledger_state(&path);
        assert_eq!(after, committed);
        assert_eq!(after.0, Some(1));
        let conn = open(&path, StoreOptions::default()).unwrap();
        assert_eq!(select_address(&conn, &address(1)).unwrap().unwrap().balance, -100);
        assert_eq!(select_address(&conn, &address(3)).unwrap().unwrap().balance, 40);
        assert!(select_address(&conn, &address(4)).unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_empty_flushes_are_not_counted_as_batches() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open(dir.path().join("scan.sqlite3"), StoreOptions::default()).unwrap();
        let (blocks_tx, blocks_rx) = mpsc::channel(20);
        let (synced_tx, synced_rx) = watch::channel(None);
        let worker = IngestWorker::new(
            conn,
            blocks_rx,
            synced_rx,
            AddressFilter::TrackAll,
            2,
            CancellationToken::new(),
        );

        // One full batch, then a catch-up report and a closed queue with nothing pending.
        for block in ChainBuilder::starting_at(0).empty_blocks(2) {
            blocks_tx.send(priced(block)).await.unwrap();
        }
        synced_tx.send_replace(Some(1));
        drop(blocks_tx);

        let handle = Handle::current();
        let recorder = tokio::task::spawn_blocking(move || {
            let recorder = CountingRecorder::default();
            metrics::with_local_recorder(&recorder, || worker.run(&handle)).unwrap();
            recorder
        })
        .await
        .unwrap();

        assert_eq!(recorder.get(Metrics::BATCHES_COMMITTED_TOTAL), 1);
        assert_eq!(recorder.get(Metrics::BLOCKS_INGESTED_TOTAL), 2);
        assert_eq!(recorder.get(Metrics::BATCH_ROLLBACKS_TOTAL), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_continuity_violation_rolls_back_batch_and_cancels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.sqlite3");
        let h = spawn(&path, 100);

        let mut chain = ChainBuilder::starting_at(0);
        h.blocks_tx.send(priced(chain.block(vec![]))).await.unwrap();
        let mut forged = chain.block(vec![]);
        forged.prev_key_mr = Bytes32([1; 32]);
        h.blocks_tx.send(priced(forged)).await.unwrap();

        let err = h.task.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            IngestError::Insert { height: 1, source: StorageError::ContinuityViolation { .. } }
        ));
        assert!(h.cancel.is_cancelled());
        assert_eq!(sync_height(&path), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_catch_up_flushes_partial_batch_and_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.sqlite3");
        let h = spawn(&path, 100);

        let mut chain = ChainBuilder::starting_at(0);
        for block in chain.empty_blocks(3) {
            h.blocks_tx.send(priced(block)).await.unwrap();
        }
        h.synced_tx.send_replace(Some(2));
        wait_for_height(&path, 2).await;
        assert_eq!(index_count(&path), 4);

        // Steady state: every block is committed on its own.
        h.blocks_tx.send(priced(chain.block(vec![]))).await.unwrap();
        wait_for_height(&path, 3).await;

        h.cancel.cancel();
        h.task.await.unwrap().unwrap();
        assert_eq!(sync_height(&path), Some(3));
    }
}
