//! The JSON-RPC 2.0 envelope spoken by factomd.

use fbscan_core::ProviderError;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

#[derive(Debug, Serialize)]
pub(crate) struct Request<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

impl<'a, P: Serialize> Request<'a, P> {
    pub(crate) const fn new(id: u64, method: &'a str, params: P) -> Self {
        Self { jsonrpc: "2.0", id, method, params }
    }
}

#[derive(Debug, Deserialize)]
struct Response<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
    data: Option<serde_json::Value>,
}

impl From<RpcError> for ProviderError {
    fn from(err: RpcError) -> Self {
        let message = match err.data {
            Some(serde_json::Value::String(data)) => format!("{}: {data}", err.message),
            _ => err.message,
        };
        Self::Remote { code: err.code, message }
    }
}

/// Extracts the result of a response body, turning an error member into
/// [`ProviderError::Remote`].
pub(crate) fn parse_response<T: DeserializeOwned>(body: &[u8]) -> Result<T, ProviderError> {
    let response: Response<T> = serde_json::from_slice(body)
        .map_err(|err| ProviderError::InvalidResponse(err.to_string()))?;
    match (response.result, response.error) {
        (_, Some(err)) => Err(err.into()),
        (Some(result), None) => Ok(result),
        (None, None) => {
            Err(ProviderError::InvalidResponse("response has neither result nor error".into()))
        }
    }
}
