//! Builders for hand-made Factoid chains.

use crate::{AddressAmount, Bytes32, FBlock, FTransaction, FactoidAddress, Rcd1Signature};

/// Seconds between consecutive directory blocks.
const BLOCK_TIME: u64 = 600;

/// A deterministic address derived from a single byte.
pub fn address(byte: u8) -> FactoidAddress {
    FactoidAddress::from_public_key(&[byte; 32])
}

/// A one-input, one-output transfer of `amount` factoshis with no fee.
pub fn transfer(from: FactoidAddress, to: FactoidAddress, amount: u64, minute: u8) -> FTransaction {
    FTransaction {
        timestamp_ms: 1_588_000_000_000 + u64::from(minute) * 60_000,
        minute,
        inputs: vec![AddressAmount { address: from, amount }],
        fct_outputs: vec![AddressAmount { address: to, amount }],
        ec_outputs: vec![],
        signatures: vec![Rcd1Signature {
            public_key: *from.rcd_hash().as_bytes(),
            signature: [0x5a; 64],
        }],
    }
}

/// Produces consecutive blocks, each naming its predecessor's key merkle root.
#[derive(Debug, Clone)]
pub struct ChainBuilder {
    next_height: u32,
    prev_key_mr: Bytes32,
    timestamp: u64,
}

impl ChainBuilder {
    /// Starts a chain whose first block sits at `height`.
    pub const fn starting_at(height: u32) -> Self {
        Self { next_height: height, prev_key_mr: Bytes32::ZERO, timestamp: 1_588_000_000 }
    }

    /// Height of the next block [`Self::block`] will produce.
    pub const fn next_height(&self) -> u32 {
        self.next_height
    }

    /// Builds the next block with `transactions` and advances the chain.
    pub fn block(&mut self, transactions: Vec<FTransaction>) -> FBlock {
        let block = FBlock {
            height: self.next_height,
            timestamp: self.timestamp,
            prev_key_mr: self.prev_key_mr,
            prev_ledger_key_mr: Bytes32::ZERO,
            ec_rate: 1_000,
            expansion: vec![],
            transactions,
        };
        self.prev_key_mr = block.key_mr();
        self.next_height += 1;
        self.timestamp += BLOCK_TIME;
        block
    }

    /// Builds `count` empty blocks.
    pub fn empty_blocks(&mut self, count: usize) -> Vec<FBlock> {
        (0..count).map(|_| self.block(vec![])).collect()
    }
}
