//! Collaborators the scanner reads from.

use async_trait::async_trait;
use fbscan_types::{Bytes32, FBlock};
use std::{fmt, fmt::Debug, str::FromStr};
use thiserror::Error;

/// Identifier of the Factom network a node serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkId(pub u32);

impl NetworkId {
    /// Factom mainnet.
    pub const MAINNET: Self = Self(0xFA92_E5A2);
    /// The public testnet.
    pub const TESTNET: Self = Self(0x883E_093F);
}

impl Default for NetworkId {
    fn default() -> Self {
        Self::MAINNET
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::MAINNET => f.write_str("mainnet"),
            Self::TESTNET => f.write_str("testnet"),
            Self(id) => write!(f, "{id:#010x}"),
        }
    }
}

impl FromStr for NetworkId {
    type Err = std::num::ParseIntError;

    /// Accepts `mainnet`, `testnet`, or a hex id such as `0xfa92e5a2`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" => Ok(Self::MAINNET),
            "testnet" => Ok(Self::TESTNET),
            other => {
                let digits = other.strip_prefix("0x").unwrap_or(other);
                u32::from_str_radix(digits, 16).map(Self)
            }
        }
    }
}

/// The directory block data the scanner needs before fetching a Factoid block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Directory block height, which is also the Factoid block height.
    pub height: u32,
    /// Key merkle root of the Factoid block anchored at this height.
    pub key_mr: Bytes32,
    /// Directory block timestamp in seconds since the Unix epoch.
    pub timestamp: u64,
}

/// Errors returned by chain and price collaborators.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The request could not be sent or its response could not be read.
    #[error("transport error: {0}")]
    Transport(String),
    /// The remote answered with an error.
    #[error("remote error {code}: {message}")]
    Remote {
        /// Error code reported by the remote.
        code: i64,
        /// Error message reported by the remote.
        message: String,
    },
    /// The response did not have the expected shape.
    #[error("unexpected response: {0}")]
    InvalidResponse(String),
    /// Block bytes returned by the node failed to decode.
    #[error("malformed block: {0}")]
    Decode(#[from] fbscan_types::DecodeError),
    /// The node returned a block other than the one requested.
    #[error("expected fblock {expected}, node returned {found}")]
    KeyMrMismatch {
        /// Key merkle root named by the directory block.
        expected: Bytes32,
        /// Key merkle root of the returned block.
        found: Bytes32,
    },
}

/// Read access to a Factom node.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainProvider: Debug + Send + Sync {
    /// Network served by the node.
    async fn network_id(&self) -> Result<NetworkId, ProviderError>;

    /// Height of the newest complete directory block.
    async fn chain_height(&self) -> Result<u32, ProviderError>;

    /// Directory block data at `height`.
    async fn block_header(&self, height: u32) -> Result<BlockHeader, ProviderError>;

    /// The Factoid block anchored by `header`, with its timestamp set from the header.
    async fn fblock(&self, header: &BlockHeader) -> Result<FBlock, ProviderError>;
}

/// Historical fiat price source.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceProvider: Debug + Send + Sync {
    /// USD price of one FCT at `timestamp` seconds since the Unix epoch.
    async fn price_at(&self, timestamp: u64) -> Result<f64, ProviderError>;
}
