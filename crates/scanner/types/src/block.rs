//! Factoid blocks.

use crate::{
    encoding::{DecodeError, Decoder, put_varint, varint_len},
    hash::{Bytes32, merkle_root, sha256},
    transaction::FTransaction,
};
use bytes::BufMut;

/// Chain id of the Factoid chain: 31 zero bytes then `0x0f`.
pub const FACTOID_CHAIN_ID: Bytes32 = {
    let mut id = [0u8; 32];
    id[31] = 0x0f;
    Bytes32(id)
};

/// Number of minute markers closing a block body.
pub const MINUTES_PER_BLOCK: u8 = 10;

/// Byte that closes each minute in a block body. Transactions never start with it since
/// their version varint is non-zero.
pub const MINUTE_MARKER: u8 = 0x00;

/// Header size with an empty expansion: four digests, exchange rate, height, one-byte
/// expansion length, transaction count, body size.
pub const FBLOCK_HEADER_MIN_SIZE: usize = 32 * 4 + 8 + 4 + 1 + 4 + 4;

/// A decoded Factoid block.
///
/// `timestamp` is not carried by the block encoding. It comes from the directory block
/// that anchors this block and must be set by whoever fetched it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FBlock {
    /// Directory block height.
    pub height: u32,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    /// Key merkle root of the previous block.
    pub prev_key_mr: Bytes32,
    /// Ledger key merkle root of the previous block.
    pub prev_ledger_key_mr: Bytes32,
    /// Factoshis per Entry Credit.
    pub ec_rate: u64,
    /// Opaque header expansion.
    pub expansion: Vec<u8>,
    /// Transactions in block order. Minutes must be non-decreasing and below
    /// [`MINUTES_PER_BLOCK`].
    pub transactions: Vec<FTransaction>,
}

impl FBlock {
    /// Returns the block with its anchoring timestamp set.
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Length of the encoded header, i.e. the byte offset at which the body starts.
    pub fn header_len(&self) -> usize {
        FBLOCK_HEADER_MIN_SIZE - 1 + varint_len(self.expansion.len() as u64) + self.expansion.len()
    }

    /// Byte ranges of the transactions within [`Self::encode`]'s output, as
    /// `(offset, size)` pairs in block order.
    ///
    /// Each minute before a transaction's own minute is closed by a one-byte marker that
    /// precedes it.
    pub fn transaction_ranges(&self) -> Vec<(usize, usize)> {
        let mut offset = self.header_len();
        let mut minute = 0u8;
        self.transactions
            .iter()
            .map(|tx| {
                if tx.minute > minute {
                    offset += usize::from(tx.minute - minute);
                    minute = tx.minute;
                }
                let range = (offset, tx.encoded_len());
                offset += range.1;
                range
            })
            .collect()
    }

    fn encode_body(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(
            self.transactions.iter().map(FTransaction::encoded_len).sum::<usize>()
                + MINUTES_PER_BLOCK as usize,
        );
        let mut minute = 0u8;
        for tx in &self.transactions {
            while minute < tx.minute {
                body.put_u8(MINUTE_MARKER);
                minute += 1;
            }
            tx.encode(&mut body);
        }
        while minute < MINUTES_PER_BLOCK {
            body.put_u8(MINUTE_MARKER);
            minute += 1;
        }
        body
    }

    fn encode_header<B: BufMut>(&self, buf: &mut B, body_len: usize) {
        buf.put_slice(FACTOID_CHAIN_ID.as_bytes());
        buf.put_slice(self.body_mr().as_bytes());
        buf.put_slice(self.prev_key_mr.as_bytes());
        buf.put_slice(self.prev_ledger_key_mr.as_bytes());
        buf.put_u64(self.ec_rate);
        buf.put_u32(self.height);
        put_varint(buf, self.expansion.len() as u64);
        buf.put_slice(&self.expansion);
        buf.put_u32(self.transactions.len() as u32);
        buf.put_u32(body_len as u32);
    }

    /// Encodes the block.
    pub fn encode(&self) -> Vec<u8> {
        let body = self.encode_body();
        let mut out = Vec::with_capacity(self.header_len() + body.len());
        self.encode_header(&mut out, body.len());
        out.extend_from_slice(&body);
        out
    }

    /// Merkle root committed to by the header for the body.
    ///
    /// The leaves follow body order: the id of each transaction, which leaves out its
    /// signatures, and `sha256([MINUTE_MARKER])` for each minute marker.
    pub fn body_mr(&self) -> Bytes32 {
        let marker = sha256([MINUTE_MARKER]);
        let mut leaves =
            Vec::with_capacity(self.transactions.len() + MINUTES_PER_BLOCK as usize);
        let mut minute = 0u8;
        for tx in &self.transactions {
            while minute < tx.minute {
                leaves.push(marker);
                minute += 1;
            }
            leaves.push(tx.id());
        }
        while minute < MINUTES_PER_BLOCK {
            leaves.push(marker);
            minute += 1;
        }
        merkle_root(&leaves)
    }

    /// Key merkle root: `sha256(sha256(header) || body_mr)`.
    ///
    /// This is the content hash that the next block names as its predecessor.
    pub fn key_mr(&self) -> Bytes32 {
        let body = self.encode_body();
        let mut header = Vec::with_capacity(self.header_len());
        self.encode_header(&mut header, body.len());
        let mut preimage = [0u8; 64];
        preimage[..32].copy_from_slice(sha256(&header).as_bytes());
        preimage[32..].copy_from_slice(self.body_mr().as_bytes());
        sha256(preimage)
    }

    /// Decodes a block, verifying its body against the header. The timestamp is left at
    /// zero.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut dec = Decoder::new(bytes);

        let chain_id = dec.read_bytes32()?;
        if chain_id != FACTOID_CHAIN_ID {
            return Err(DecodeError::InvalidChainId(chain_id));
        }
        let body_mr = dec.read_bytes32()?;
        let prev_key_mr = dec.read_bytes32()?;
        let prev_ledger_key_mr = dec.read_bytes32()?;
        let ec_rate = dec.read_u64()?;
        let height = dec.read_u32()?;
        let expansion_len = dec.read_varint()?;
        let expansion = dec.read_slice(usize::try_from(expansion_len).unwrap_or(usize::MAX))?;
        let tx_count = dec.read_u32()?;
        let body_size = dec.read_u32()?;

        if dec.remaining() != body_size as usize {
            return Err(DecodeError::BodySizeMismatch {
                declared: body_size,
                actual: dec.remaining(),
            });
        }
        let body = dec.read_slice(body_size as usize)?;

        let mut body = Decoder::new(body);
        let mut transactions = Vec::with_capacity(tx_count as usize);
        let mut minute = 0u8;
        while minute < MINUTES_PER_BLOCK {
            if body.peek_u8()? == MINUTE_MARKER {
                body.read_u8()?;
                minute += 1;
                continue;
            }
            transactions.push(FTransaction::decode_from(&mut body, minute)?);
        }
        body.finish()?;

        if transactions.len() != tx_count as usize {
            return Err(DecodeError::TxCountMismatch {
                declared: tx_count,
                actual: transactions.len(),
            });
        }

        let block = Self {
            height,
            timestamp: 0,
            prev_key_mr,
            prev_ledger_key_mr,
            ec_rate,
            expansion: expansion.to_vec(),
            transactions,
        };
        let computed = block.body_mr();
        if computed != body_mr {
            return Err(DecodeError::BodyRootMismatch { expected: body_mr, computed });
        }
        Ok(block)
    }
}
