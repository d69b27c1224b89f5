//! # fbscan-core
//!
//! The scan pipeline of the Factoid block scanner.
//!
//! A [`Scanner`] walks the chain height by height, attaches a price to every Factoid
//! block and pushes it into a bounded queue. An [`IngestWorker`] drains the queue into the
//! store in atomic batches. [`Engine::start`] wires the two together around a shared
//! cancellation token, so a fatal error on either side stops both.
//!
//! ## Key Components
//!
//! - [`ChainProvider`] and [`PriceProvider`]: the remote collaborators.
//! - [`RetryingPriceFetcher`]: price lookups under a jittered exponential [`RetryPolicy`].
//! - [`Scanner`]: the producer. Backpressure comes from the queue capacity.
//! - [`IngestWorker`]: the consumer. Each batch is one savepoint.
//! - [`Engine`] and [`ScannerHandle`]: startup, sync notification and shutdown.

mod provider;
pub use provider::{BlockHeader, ChainProvider, NetworkId, PriceProvider, ProviderError};

mod metrics;
pub use metrics::Metrics;

mod price;
pub use price::{PolicyBackoff, PriceError, RetryPolicy, RetryingPriceFetcher};

mod config;
pub use config::{
    DEFAULT_BATCH_SIZE, DEFAULT_POLL_INTERVAL, DEFAULT_QUEUE_CAPACITY, EngineConfig,
};

mod scanner;
pub use scanner::{PricedBlock, ScanError, Scanner};

mod ingest;
pub use ingest::{IngestError, IngestWorker};

mod engine;
pub use engine::{Engine, EngineError, ScannerHandle};

#[cfg(test)]
mod test_utils;
