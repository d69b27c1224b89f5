//! Wiring of the scan loop and the ingest worker.

use crate::{
    ChainProvider, EngineConfig, IngestError, IngestWorker, Metrics, NetworkId, PriceProvider,
    ProviderError, RetryingPriceFetcher, ScanError, Scanner,
};
use fbscan_storage::{StorageError, open, select_sync_height};
use std::sync::Arc;
use thiserror::Error;
use tokio::{
    runtime::Handle,
    sync::{mpsc, watch},
    task::{JoinError, JoinHandle},
};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Errors surfaced by [`Engine::start`] and [`ScannerHandle::wait`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// The node could not be asked for its network.
    #[error("failed to query network id: {0}")]
    NetworkId(#[source] ProviderError),
    /// The node serves a different network.
    #[error("connected to factomd on {found} but expected {expected}")]
    WrongNetwork {
        /// Network served by the node.
        found: NetworkId,
        /// Configured network.
        expected: NetworkId,
    },
    /// The store could not be opened.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The scan loop failed.
    #[error(transparent)]
    Scan(#[from] ScanError),
    /// The ingest worker failed.
    #[error(transparent)]
    Ingest(#[from] IngestError),
    /// A task panicked.
    #[error("task failed: {0}")]
    Join(#[from] JoinError),
}

/// Starts the scan pipeline.
#[derive(Debug, Clone, Copy)]
pub struct Engine;

impl Engine {
    /// Verifies the node's network, opens the store and spawns the scan loop and the ingest
    /// worker on the current runtime.
    ///
    /// Scanning resumes at the block after the newest stored one, or at
    /// [`EngineConfig::start_height`] for an empty store. Cancelling `cancel` stops both
    /// tasks. A fatal error in either task cancels it too.
    pub async fn start<C, P>(
        config: EngineConfig,
        chain: Arc<C>,
        prices: Arc<P>,
        cancel: CancellationToken,
    ) -> Result<ScannerHandle, EngineError>
    where
        C: ChainProvider + 'static,
        P: PriceProvider + 'static,
    {
        let found = chain.network_id().await.map_err(EngineError::NetworkId)?;
        if found != config.network_id {
            return Err(EngineError::WrongNetwork { found, expected: config.network_id });
        }

        let conn = open(&config.store_path, config.store_options)?;
        let resume = select_sync_height(&conn)?.map_or(config.start_height, |height| height + 1);
        info!(
            target: "engine",
            path = %config.store_path.display(),
            resume,
            filter = %config.filter,
            "Opened store"
        );
        Metrics::init();

        let (blocks_tx, blocks_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (synced_tx, synced_rx) = watch::channel(None);

        let worker = IngestWorker::new(
            conn,
            blocks_rx,
            synced_rx.clone(),
            config.filter,
            config.batch_size,
            cancel.clone(),
        );
        let handle = Handle::current();
        let ingest = tokio::task::spawn_blocking(move || worker.run(&handle));

        let scanner = Scanner::new(
            chain,
            RetryingPriceFetcher::new(prices, config.retry_policy),
            blocks_tx,
            synced_tx,
            config.poll_interval,
            config.require_price,
            cancel.clone(),
        );
        let scan = tokio::spawn(scanner.run(resume));

        Ok(ScannerHandle { synced: synced_rx, scan, ingest, cancel })
    }
}

/// Handle to a running pipeline.
#[derive(Debug)]
pub struct ScannerHandle {
    synced: watch::Receiver<Option<u32>>,
    scan: JoinHandle<Result<(), ScanError>>,
    ingest: JoinHandle<Result<(), IngestError>>,
    cancel: CancellationToken,
}

impl ScannerHandle {
    /// Watches the height at which the first catch-up completed. It holds `None` until
    /// then and changes once.
    pub fn synced(&self) -> watch::Receiver<Option<u32>> {
        self.synced.clone()
    }

    /// Requests shutdown of both tasks.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Waits for both tasks to stop. The store is closed when this returns.
    ///
    /// A clean cancellation yields `Ok(())`. Otherwise the ingest worker's error wins over
    /// the scanner's, since a worker failure also closes the queue under the scanner.
    pub async fn wait(self) -> Result<(), EngineError> {
        let (scan, ingest) = tokio::join!(self.scan, self.ingest);
        ingest??;
        scan??;
        info!(target: "engine", "Engine stopped");
        Ok(())
    }
}
