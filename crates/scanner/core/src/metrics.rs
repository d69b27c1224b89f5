//! Metrics for the scan pipeline.

/// Container for the pipeline's metric names.
#[derive(Debug, Clone)]
pub struct Metrics;

impl Metrics {
    /// Identifier for the counter of ingested blocks.
    pub const BLOCKS_INGESTED_TOTAL: &'static str = "fbscan_blocks_ingested_total";
    /// Identifier for the counter of committed batches.
    pub const BATCHES_COMMITTED_TOTAL: &'static str = "fbscan_batches_committed_total";
    /// Identifier for the counter of rolled back batches.
    pub const BATCH_ROLLBACKS_TOTAL: &'static str = "fbscan_batch_rollbacks_total";
    /// Identifier for the counter of failed price lookups that were retried.
    pub const PRICE_RETRIES_TOTAL: &'static str = "fbscan_price_retries_total";
    /// Identifier for the counter of failed price lookup attempts, retried or not.
    pub const PRICE_LOOKUP_FAILURES_TOTAL: &'static str = "fbscan_price_lookup_failures_total";
    /// Identifier for the counter of blocks stored without a price.
    pub const PRICE_FALLBACKS_TOTAL: &'static str = "fbscan_price_fallbacks_total";
    /// Identifier for the gauge of the node's chain height.
    pub const CHAIN_HEIGHT: &'static str = "fbscan_chain_height";
    /// Identifier for the gauge of the highest committed block.
    pub const SYNC_HEIGHT: &'static str = "fbscan_sync_height";

    /// Initializes metrics for the pipeline.
    ///
    /// This does two things:
    /// * Describes various metrics.
    /// * Initializes metrics to 0 so they can be queried immediately.
    pub fn init() {
        Self::describe();
        Self::zero();
    }

    fn describe() {
        metrics::describe_counter!(
            Self::BLOCKS_INGESTED_TOTAL,
            metrics::Unit::Count,
            "Total number of blocks written to the store",
        );
        metrics::describe_counter!(
            Self::BATCHES_COMMITTED_TOTAL,
            metrics::Unit::Count,
            "Total number of committed ingest batches",
        );
        metrics::describe_counter!(
            Self::BATCH_ROLLBACKS_TOTAL,
            metrics::Unit::Count,
            "Total number of ingest batches rolled back on error or cancellation",
        );
        metrics::describe_counter!(
            Self::PRICE_RETRIES_TOTAL,
            metrics::Unit::Count,
            "Total number of failed price lookups that were retried",
        );
        metrics::describe_counter!(
            Self::PRICE_LOOKUP_FAILURES_TOTAL,
            metrics::Unit::Count,
            "Total number of failed price lookup attempts",
        );
        metrics::describe_counter!(
            Self::PRICE_FALLBACKS_TOTAL,
            metrics::Unit::Count,
            "Total number of blocks stored without a price after retries ran out",
        );
        metrics::describe_gauge!(Self::CHAIN_HEIGHT, "Latest chain height reported by the node");
        metrics::describe_gauge!(Self::SYNC_HEIGHT, "Height of the newest committed block");
    }

    fn zero() {
        metrics::counter!(Self::BLOCKS_INGESTED_TOTAL).increment(0);
        metrics::counter!(Self::BATCHES_COMMITTED_TOTAL).increment(0);
        metrics::counter!(Self::BATCH_ROLLBACKS_TOTAL).increment(0);
        metrics::counter!(Self::PRICE_RETRIES_TOTAL).increment(0);
        metrics::counter!(Self::PRICE_LOOKUP_FAILURES_TOTAL).increment(0);
        metrics::counter!(Self::PRICE_FALLBACKS_TOTAL).increment(0);
        metrics::gauge!(Self::CHAIN_HEIGHT).set(0.0);
        metrics::gauge!(Self::SYNC_HEIGHT).set(0.0);
    }

    pub(crate) fn record_chain_height(height: u32) {
        metrics::gauge!(Self::CHAIN_HEIGHT).set(height as f64);
    }

    pub(crate) fn record_commit(blocks: usize, sync_height: Option<u32>) {
        metrics::counter!(Self::BATCHES_COMMITTED_TOTAL).increment(1);
        metrics::counter!(Self::BLOCKS_INGESTED_TOTAL).increment(blocks as u64);
        if let Some(height) = sync_height {
            metrics::gauge!(Self::SYNC_HEIGHT).set(height as f64);
        }
    }

    pub(crate) fn record_rollback() {
        metrics::counter!(Self::BATCH_ROLLBACKS_TOTAL).increment(1);
    }

    pub(crate) fn record_price_failure(retried: bool) {
        metrics::counter!(Self::PRICE_LOOKUP_FAILURES_TOTAL).increment(1);
        if retried {
            metrics::counter!(Self::PRICE_RETRIES_TOTAL).increment(1);
        }
    }

    pub(crate) fn record_price_fallback() {
        metrics::counter!(Self::PRICE_FALLBACKS_TOTAL).increment(1);
    }
}
