//! Directory block header decoding.
//!
//! Only the fields the scanner needs are kept: the network, the timestamp, the height and
//! the key merkle root of the Factoid block anchored in the block's entries.

use fbscan_core::NetworkId;
use fbscan_types::{Bytes32, DecodeError, Decoder, FACTOID_CHAIN_ID};

/// The parts of a directory block the scanner reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DBlockSummary {
    pub(crate) network_id: NetworkId,
    /// Seconds since the Unix epoch.
    pub(crate) timestamp: u64,
    pub(crate) height: u32,
    /// `None` if no Factoid block is anchored, which a valid node never serves.
    pub(crate) fblock_key_mr: Option<Bytes32>,
}

impl DBlockSummary {
    /// Decodes the raw directory block served by factomd.
    ///
    /// Layout: `version u8 | network_id u32 | body_mr | prev_key_mr | prev_full_hash |
    /// timestamp u32 (minutes) | height u32 | block_count u32`, then `block_count` pairs
    /// of `chain_id | key_mr`.
    pub(crate) fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        let mut dec = Decoder::new(raw);
        let _version = dec.read_u8()?;
        let network_id = NetworkId(dec.read_u32()?);
        let _body_mr = dec.read_bytes32()?;
        let _prev_key_mr = dec.read_bytes32()?;
        let _prev_full_hash = dec.read_bytes32()?;
        let timestamp = u64::from(dec.read_u32()?) * 60;
        let height = dec.read_u32()?;
        let block_count = dec.read_u32()?;

        let mut fblock_key_mr = None;
        for _ in 0..block_count {
            let chain_id = dec.read_bytes32()?;
            let key_mr = dec.read_bytes32()?;
            if chain_id == FACTOID_CHAIN_ID {
                fblock_key_mr = Some(key_mr);
            }
        }
        dec.finish()?;

        Ok(Self { network_id, timestamp, height, fblock_key_mr })
    }
}
