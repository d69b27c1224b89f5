//! Engine configuration.

use crate::{NetworkId, RetryPolicy};
use fbscan_storage::StoreOptions;
use fbscan_types::AddressFilter;
use std::{fmt, path::PathBuf, time::Duration};

/// Blocks committed together by the ingest worker.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Capacity of the queue between the scan loop and the ingest worker.
pub const DEFAULT_QUEUE_CAPACITY: usize = 20;

/// Interval between chain height checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Everything [`Engine::start`](crate::Engine::start) needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Location of the SQLite store.
    pub store_path: PathBuf,
    /// Durability settings for the store.
    pub store_options: StoreOptions,
    /// Addresses whose balance effects are kept.
    pub filter: AddressFilter,
    /// First height scanned when the store is empty.
    pub start_height: u32,
    /// Maximum number of blocks per committed batch.
    pub batch_size: usize,
    /// Capacity of the block queue.
    pub queue_capacity: usize,
    /// Interval between chain height checks.
    pub poll_interval: Duration,
    /// Network the node must serve.
    pub network_id: NetworkId,
    /// Stop scanning instead of storing a block without a price.
    pub require_price: bool,
    /// Retry schedule for price lookups.
    pub retry_policy: RetryPolicy,
}

impl EngineConfig {
    /// Creates a configuration with default settings for the store at `store_path`.
    pub fn new(store_path: impl Into<PathBuf>) -> Self {
        Self {
            store_path: store_path.into(),
            store_options: StoreOptions::default(),
            filter: AddressFilter::TrackAll,
            start_height: 0,
            batch_size: DEFAULT_BATCH_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            network_id: NetworkId::MAINNET,
            require_price: false,
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl fmt::Display for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Store: {}", self.store_path.display())?;
        if self.store_options.speed {
            writeln!(f, "Speed mode: enabled")?;
        }
        writeln!(f, "Network: {}", self.network_id)?;
        writeln!(f, "Start height: {}", self.start_height)?;
        write!(f, "{}", self.filter)
    }
}
