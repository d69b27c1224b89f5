//! # fbscan-providers-http
//!
//! HTTP implementations of the scanner's collaborators.
//!
//! - [`FactomdClient`]: reads heights, directory blocks and Factoid blocks from a factomd
//!   node over JSON-RPC 2.0. Blocks arrive as hex `rawdata` and are decoded by
//!   [`fbscan_types::FBlock::decode`].
//! - [`CryptoCompareClient`]: reads historical FCT/USD prices.

mod jsonrpc;

mod dblock;

mod factomd;
pub use factomd::{DEFAULT_FACTOMD_URL, FactomdClient};

mod cryptocompare;
pub use cryptocompare::{CRYPTOCOMPARE_URL, CryptoCompareClient};
