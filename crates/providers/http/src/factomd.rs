//! A [`ChainProvider`] backed by the factomd JSON-RPC API.

use crate::{
    dblock::DBlockSummary,
    jsonrpc::{Request, parse_response},
};
use async_trait::async_trait;
use fbscan_core::{BlockHeader, ChainProvider, NetworkId, ProviderError};
use fbscan_types::FBlock;
use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tracing::trace;
use url::Url;

/// The factomd API endpoint of a local node.
pub const DEFAULT_FACTOMD_URL: &str = "http://localhost:8088/v2";

#[derive(Debug, Deserialize)]
struct Heights {
    #[serde(rename = "directoryblockheight")]
    directory_block: u32,
    #[serde(rename = "entryblockheight")]
    entry_block: u32,
}

#[derive(Debug, Serialize)]
struct HeightParams {
    height: u32,
}

#[derive(Debug, Deserialize)]
struct RawData {
    #[serde(rename = "rawdata")]
    raw_data: String,
}

/// JSON-RPC client for a factomd node.
#[derive(Debug, Clone)]
pub struct FactomdClient {
    url: Url,
    inner: Client,
    next_id: Arc<AtomicU64>,
}

impl FactomdClient {
    /// Creates a new [`FactomdClient`] for the API endpoint at `url`.
    pub fn new(url: Url) -> Self {
        Self::with_client(url, Client::new())
    }

    /// Creates a new [`FactomdClient`] that sends its requests through `inner`.
    pub fn with_client(url: Url, inner: Client) -> Self {
        Self { url, inner, next_id: Arc::new(AtomicU64::new(1)) }
    }

    /// The API endpoint.
    pub const fn url(&self) -> &Url {
        &self.url
    }

    async fn request<P, T>(&self, method: &str, params: P) -> Result<T, ProviderError>
    where
        P: Serialize + Send,
        T: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        trace!(target: "factomd", method, id, "Sending request");

        let response = self
            .inner
            .post(self.url.clone())
            .json(&Request::new(id, method, params))
            .send()
            .await
            .map_err(|err| ProviderError::Transport(err.to_string()))?;
        let status = response.status();
        let body = response.bytes().await.map_err(|err| ProviderError::Transport(err.to_string()))?;

        // factomd reports most failures in the body. Only a body that does not parse falls
        // back to the HTTP status.
        match parse_response(&body) {
            Err(ProviderError::InvalidResponse(_)) if !status.is_success() => {
                Err(ProviderError::Transport(format!("HTTP status {status}")))
            }
            result => result,
        }
    }

    async fn heights(&self) -> Result<Heights, ProviderError> {
        self.request("heights", serde_json::json!({})).await
    }

    async fn dblock(&self, height: u32) -> Result<DBlockSummary, ProviderError> {
        let raw: RawData = self.request("dblock-by-height", HeightParams { height }).await?;
        Ok(DBlockSummary::decode(&decode_hex(&raw.raw_data)?)?)
    }
}

fn decode_hex(raw: &str) -> Result<Vec<u8>, ProviderError> {
    hex::decode(raw).map_err(|err| ProviderError::InvalidResponse(format!("rawdata: {err}")))
}

/// Builds the header for `height` from its directory block.
fn block_header(height: u32, dblock: DBlockSummary) -> Result<BlockHeader, ProviderError> {
    if dblock.height != height {
        return Err(ProviderError::InvalidResponse(format!(
            "requested dblock {height}, node returned {}",
            dblock.height
        )));
    }
    let key_mr = dblock.fblock_key_mr.ok_or_else(|| {
        ProviderError::InvalidResponse(format!("dblock {height} anchors no fblock"))
    })?;
    Ok(BlockHeader { height, key_mr, timestamp: dblock.timestamp })
}

/// Decodes the Factoid block described by `header` from its hex encoding.
fn decode_fblock(header: &BlockHeader, raw_data: &str) -> Result<FBlock, ProviderError> {
    let fblock = FBlock::decode(&decode_hex(raw_data)?)?;
    let found = fblock.key_mr();
    if found != header.key_mr {
        return Err(ProviderError::KeyMrMismatch { expected: header.key_mr, found });
    }
    Ok(fblock.with_timestamp(header.timestamp))
}

#[async_trait]
impl ChainProvider for FactomdClient {
    async fn network_id(&self) -> Result<NetworkId, ProviderError> {
        let heights = self.heights().await?;
        Ok(self.dblock(heights.directory_block).await?.network_id)
    }

    async fn chain_height(&self) -> Result<u32, ProviderError> {
        // Blocks are only complete once their entry blocks are processed.
        Ok(self.heights().await?.entry_block)
    }

    async fn block_header(&self, height: u32) -> Result<BlockHeader, ProviderError> {
        block_header(height, self.dblock(height).await?)
    }

    async fn fblock(&self, header: &BlockHeader) -> Result<FBlock, ProviderError> {
        let raw: RawData =
            self.request("fblock-by-height", HeightParams { height: header.height }).await?;
        decode_fblock(header, &raw.raw_data)
    }
}
