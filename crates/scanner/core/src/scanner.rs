//! The scan loop: the single reader of the chain and producer of the block queue.

use crate::{
    ChainProvider, Metrics, PriceError, PriceProvider, ProviderError, RetryingPriceFetcher,
};
use fbscan_types::FBlock;
use futures::FutureExt;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    time::{Instant, Interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A block paired with the price observed at its timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedBlock {
    /// The decoded block.
    pub block: FBlock,
    /// USD price, or `None` if no observation could be made.
    pub price: Option<f64>,
}

/// Fatal scan loop failures.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The chain height could not be fetched.
    #[error("failed to fetch chain height: {0}")]
    ChainHeight(#[source] ProviderError),
    /// A block could not be fetched.
    #[error("failed to fetch block {height}: {source}")]
    Block {
        /// Height being scanned.
        height: u32,
        /// Underlying error.
        #[source]
        source: ProviderError,
    },
    /// Retries ran out and a price is required.
    #[error("no price for block {height}: {source}")]
    Price {
        /// Height being scanned.
        height: u32,
        /// Underlying error.
        #[source]
        source: PriceError,
    },
    /// The ingest worker stopped receiving blocks.
    #[error("block queue closed")]
    QueueClosed,
}

/// Scans the chain from a resume height, forever.
///
/// While the resume height is at or below the known chain height, blocks are fetched
/// back to back and the chain height is refreshed whenever the poll interval has elapsed,
/// without waiting for it. Once every known height has been submitted the scanner is
/// caught up: it reports the height on the `synced` channel once, then waits one poll
/// interval between chain height checks.
#[derive(Debug)]
pub struct Scanner<C, P> {
    chain: Arc<C>,
    prices: RetryingPriceFetcher<P>,
    blocks_tx: mpsc::Sender<PricedBlock>,
    synced_tx: watch::Sender<Option<u32>>,
    poll_interval: Duration,
    require_price: bool,
    cancel: CancellationToken,
}

impl<C, P> Scanner<C, P>
where
    C: ChainProvider,
    P: PriceProvider,
{
    /// Creates a new [`Scanner`].
    pub const fn new(
        chain: Arc<C>,
        prices: RetryingPriceFetcher<P>,
        blocks_tx: mpsc::Sender<PricedBlock>,
        synced_tx: watch::Sender<Option<u32>>,
        poll_interval: Duration,
        require_price: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self { chain, prices, blocks_tx, synced_tx, poll_interval, require_price, cancel }
    }

    /// Scans from `height` until cancelled or until a fatal error, which also cancels the
    /// shared token so the ingest worker stops with it.
    pub async fn run(self, height: u32) -> Result<(), ScanError> {
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                info!(target: "scanner", "Scanner cancellation requested, stopping...");
                Ok(())
            }
            result = self.scan(height) => result,
        };
        if let Err(err) = &result {
            error!(target: "scanner", %err, "Scan loop failed");
            self.cancel.cancel();
        }
        result
    }

    async fn scan(&self, mut height: u32) -> Result<(), ScanError> {
        let mut tip = self.chain_height().await?;
        let mut ticker = self.ticker();
        let mut synced = false;
        info!(target: "scanner", height, tip, "Starting scan");

        loop {
            while height <= tip {
                self.sync_block(height).await?;
                height += 1;

                if ticker.tick().now_or_never().is_some() {
                    tip = self.chain_height().await?;
                    debug!(target: "scanner", height, tip, "Refreshed chain height");
                }
            }

            if !synced {
                synced = true;
                info!(target: "scanner", height = tip, "Scan complete");
                self.synced_tx.send_replace(Some(tip));
            }

            ticker.tick().await;
            tip = self.chain_height().await?;
        }
    }

    async fn sync_block(&self, height: u32) -> Result<(), ScanError> {
        let header = self
            .chain
            .block_header(height)
            .await
            .map_err(|source| ScanError::Block { height, source })?;

        let price = match self.prices.fetch(header.timestamp).await {
            Ok(price) => Some(price),
            Err(source) if self.require_price => return Err(ScanError::Price { height, source }),
            Err(err) => {
                warn!(target: "scanner", height, %err, "Storing block without a price");
                Metrics::record_price_fallback();
                None
            }
        };

        let block = self
            .chain
            .fblock(&header)
            .await
            .map_err(|source| ScanError::Block { height, source })?;
        debug!(
            target: "scanner",
            height,
            transactions = block.transactions.len(),
            ?price,
            "Fetched block"
        );

        self.blocks_tx
            .send(PricedBlock { block, price })
            .await
            .map_err(|_| ScanError::QueueClosed)
    }

    async fn chain_height(&self) -> Result<u32, ScanError> {
        let tip = self.chain.chain_height().await.map_err(ScanError::ChainHeight)?;
        Metrics::record_chain_height(tip);
        Ok(tip)
    }

    fn ticker(&self) -> Interval {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        NetworkId, RetryPolicy,
        provider::{BlockHeader, MockChainProvider, MockPriceProvider},
    };
    use async_trait::async_trait;
    use fbscan_types::{Bytes32, test_utils::ChainBuilder};
    use std::sync::atomic::{AtomicU32, Ordering};

    const POLL: Duration = Duration::from_secs(300);

    /// Serves `blocks` from height `start`, reporting whatever height `tip` holds.
    fn chain(start: u32, blocks: Vec<FBlock>, tip: Arc<AtomicU32>) -> MockChainProvider {
        let blocks = Arc::new(blocks);
        let mut chain = MockChainProvider::new();
        chain.expect_chain_height().returning(move || Ok(tip.load(Ordering::SeqCst)));
        let by_height = Arc::clone(&blocks);
        chain.expect_block_header().returning(move |height| {
            let block = &by_height[(height - start) as usize];
            Ok(BlockHeader { height, key_mr: block.key_mr(), timestamp: block.timestamp })
        });
        chain.expect_fblock().returning(move |header| {
            Ok(blocks[(header.height - start) as usize].clone())
        });
        chain
    }

    fn prices(
        result: impl Fn() -> Result<f64, ProviderError> + Send + 'static,
    ) -> MockPriceProvider {
        let mut prices = MockPriceProvider::new();
        prices.expect_price_at().returning(move |_| result());
        prices
    }

    fn no_retries() -> RetryPolicy {
        RetryPolicy { max_attempts: 1, ..RetryPolicy::default() }
    }

    struct Harness {
        blocks_rx: mpsc::Receiver<PricedBlock>,
        synced_rx: watch::Receiver<Option<u32>>,
        cancel: CancellationToken,
        task: tokio::task::JoinHandle<Result<(), ScanError>>,
    }

    fn spawn<C: ChainProvider + 'static>(
        chain: C,
        prices: MockPriceProvider,
        from: u32,
        require: bool,
    ) -> Harness {
        let (blocks_tx, blocks_rx) = mpsc::channel(4);
        let (synced_tx, synced_rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let scanner = Scanner::new(
            Arc::new(chain),
            RetryingPriceFetcher::new(Arc::new(prices), no_retries()),
            blocks_tx,
            synced_tx,
            POLL,
            require,
            cancel.clone(),
        );
        let task = tokio::spawn(scanner.run(from));
        Harness { blocks_rx, synced_rx, cancel, task }
    }

    #[tokio::test(start_paused = true)]
    async fn test_catches_up_in_order_then_polls() {
        let mut builder = ChainBuilder::starting_at(10);
        let blocks = builder.empty_blocks(6);
        let tip = Arc::new(AtomicU32::new(12));
        let chain = chain(10, blocks.clone(), Arc::clone(&tip));
        let mut h = spawn(chain, prices(|| Ok(0.5)), 10, false);

        for expected in 10..=12 {
            let priced = h.blocks_rx.recv().await.unwrap();
            assert_eq!(priced.block.height, expected);
            assert_eq!(priced.price, Some(0.5));
        }
        h.synced_rx.changed().await.unwrap();
        assert_eq!(*h.synced_rx.borrow(), Some(12));

        tip.store(15, Ordering::SeqCst);
        for expected in 13..=15 {
            assert_eq!(h.blocks_rx.recv().await.unwrap().block, blocks[(expected - 10) as usize]);
        }

        h.cancel.cancel();
        h.task.await.unwrap().unwrap();
        assert!(h.blocks_rx.recv().await.is_none());
    }

    /// Takes half a poll interval per block and grows the chain to `grown_tip` once the
    /// block at `grow_at` is fetched.
    #[derive(Debug)]
    struct SlowChain {
        blocks: Vec<FBlock>,
        tip: AtomicU32,
        grow_at: u32,
        grown_tip: u32,
    }

    #[async_trait]
    impl ChainProvider for SlowChain {
        async fn network_id(&self) -> Result<NetworkId, ProviderError> {
            Ok(NetworkId::MAINNET)
        }

        async fn chain_height(&self) -> Result<u32, ProviderError> {
            Ok(self.tip.load(Ordering::SeqCst))
        }

        async fn block_header(&self, height: u32) -> Result<BlockHeader, ProviderError> {
            let block = &self.blocks[height as usize];
            Ok(BlockHeader { height, key_mr: block.key_mr(), timestamp: block.timestamp })
        }

        async fn fblock(&self, header: &BlockHeader) -> Result<FBlock, ProviderError> {
            if header.height == self.grow_at {
                self.tip.store(self.grown_tip, Ordering::SeqCst);
            }
            tokio::time::sleep(POLL / 2).await;
            Ok(self.blocks[header.height as usize].clone())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tip_is_refreshed_while_catching_up() {
        let chain = SlowChain {
            blocks: ChainBuilder::starting_at(0).empty_blocks(6),
            tip: AtomicU32::new(2),
            grow_at: 1,
            grown_tip: 5,
        };
        let started = Instant::now();
        let mut h = spawn(chain, prices(|| Ok(1.0)), 0, false);

        for expected in 0..=5 {
            assert_eq!(h.blocks_rx.recv().await.unwrap().block.height, expected);
        }
        h.synced_rx.changed().await.unwrap();

        // The first catch-up covers the grown chain, and no poll interval was spent idle.
        assert_eq!(*h.synced_rx.borrow(), Some(5));
        assert_eq!(started.elapsed(), POLL / 2 * 6);

        h.cancel.cancel();
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_is_reported_once() {
        let mut builder = ChainBuilder::starting_at(0);
        let tip = Arc::new(AtomicU32::new(0));
        let chain = chain(0, builder.empty_blocks(3), Arc::clone(&tip));
        let mut h = spawn(chain, prices(|| Ok(1.0)), 0, false);

        h.blocks_rx.recv().await.unwrap();
        h.synced_rx.changed().await.unwrap();

        tip.store(2, Ordering::SeqCst);
        h.blocks_rx.recv().await.unwrap();
        h.blocks_rx.recv().await.unwrap();
        tokio::time::sleep(POLL * 2).await;
        assert!(!h.synced_rx.has_changed().unwrap());

        h.cancel.cancel();
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_price_falls_back_to_none() {
        let mut builder = ChainBuilder::starting_at(0);
        let tip = Arc::new(AtomicU32::new(0));
        let failing = prices(|| Err(ProviderError::Transport("down".to_string())));
        let mut h = spawn(chain(0, builder.empty_blocks(1), tip), failing, 0, false);

        assert_eq!(h.blocks_rx.recv().await.unwrap().price, None);
        h.cancel.cancel();
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_price_is_fatal_when_required() {
        let mut builder = ChainBuilder::starting_at(0);
        let tip = Arc::new(AtomicU32::new(0));
        let failing = prices(|| Err(ProviderError::Transport("down".to_string())));
        let mut h = spawn(chain(0, builder.empty_blocks(1), tip), failing, 0, true);

        let err = h.task.await.unwrap().unwrap_err();
        assert!(matches!(err, ScanError::Price { height: 0, .. }));
        assert!(h.cancel.is_cancelled());
        assert!(h.blocks_rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_fetch_failure_is_fatal() {
        let mut chain = MockChainProvider::new();
        chain.expect_chain_height().returning(|| Ok(5));
        chain.expect_block_header().returning(|height| {
            Ok(BlockHeader { height, key_mr: Bytes32::ZERO, timestamp: 0 })
        });
        chain.expect_fblock().returning(|_| {
            Err(ProviderError::Remote { code: -32008, message: "block not found".to_string() })
        });
        let h = spawn(chain, prices(|| Ok(1.0)), 3, false);

        let err = h.task.await.unwrap().unwrap_err();
        assert!(matches!(err, ScanError::Block { height: 3, .. }));
        assert!(h.cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_applies_backpressure() {
        let blocks = Arc::new(ChainBuilder::starting_at(0).empty_blocks(10));
        let fetched = Arc::new(AtomicU32::new(0));
        let mut chain = MockChainProvider::new();
        chain.expect_chain_height().returning(|| Ok(9));
        let counter = Arc::clone(&fetched);
        chain.expect_block_header().returning(move |height| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(BlockHeader { height, key_mr: Bytes32::ZERO, timestamp: 0 })
        });
        chain.expect_fblock().returning(move |header| Ok(blocks[header.height as usize].clone()));
        let mut h = spawn(chain, prices(|| Ok(1.0)), 0, false);

        tokio::time::sleep(Duration::from_secs(1)).await;
        // Four queued blocks plus one waiting to be sent.
        assert_eq!(fetched.load(Ordering::SeqCst), 5);

        h.blocks_rx.recv().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fetched.load(Ordering::SeqCst), 6);

        h.cancel.cancel();
        h.task.await.unwrap().unwrap();
    }
}
