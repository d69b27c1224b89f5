//! Factoid transactions.

use crate::{
    address::FactoidAddress,
    encoding::{DecodeError, Decoder, put_varint, varint_len},
    hash::{Bytes32, sha256},
};
use bytes::BufMut;

/// The only transaction version found on the Factoid chain.
pub const TRANSACTION_VERSION: u64 = 2;

/// RCD type byte for a single ed25519 key.
const RCD_TYPE_1: u8 = 0x01;

/// Width of the millisecond timestamp field.
const TIMESTAMP_WIDTH: usize = 6;

/// Encoded size of one RCD type 1 plus its signature.
const RCD1_SIGNATURE_LEN: usize = 1 + 32 + 64;

/// Converts a factoshi amount into the signed form the ledger stores.
pub fn signed_amount(amount: u64) -> Result<i64, DecodeError> {
    i64::try_from(amount).map_err(|_| DecodeError::AmountOutOfRange(amount))
}

/// An amount of factoshis moved into or out of a Factoid address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressAmount {
    /// The address funds move from (input) or to (output).
    pub address: FactoidAddress,
    /// Factoshis.
    pub amount: u64,
}

/// Factoshis converted into Entry Credits for an EC public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcOutput {
    /// The Entry Credit public key.
    pub public_key: Bytes32,
    /// Factoshis.
    pub amount: u64,
}

/// A type 1 RCD and the signature it authorises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rcd1Signature {
    /// The ed25519 public key revealed by the RCD.
    pub public_key: [u8; 32],
    /// The ed25519 signature over the ledger bytes.
    pub signature: [u8; 64],
}

/// A Factoid transaction as it appears inside an [`FBlock`](crate::FBlock).
///
/// `minute` is not part of the transaction encoding. It records which of the block's ten
/// minutes the transaction was placed in, which fixes its byte position relative to the
/// minute markers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FTransaction {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Minute of the owning block, `0..10`.
    pub minute: u8,
    /// Factoid inputs.
    pub inputs: Vec<AddressAmount>,
    /// Factoid outputs.
    pub fct_outputs: Vec<AddressAmount>,
    /// Entry Credit purchases.
    pub ec_outputs: Vec<EcOutput>,
    /// One RCD and signature per input.
    pub signatures: Vec<Rcd1Signature>,
}

impl FTransaction {
    /// Transaction id: SHA-256 over the ledger bytes (everything before the RCDs).
    pub fn id(&self) -> Bytes32 {
        let mut ledger = Vec::with_capacity(self.ledger_len());
        self.encode_ledger(&mut ledger);
        sha256(ledger)
    }

    /// Timestamp in whole seconds.
    pub const fn timestamp(&self) -> u64 {
        self.timestamp_ms / 1000
    }

    /// Sum of all inputs.
    pub fn total_in(&self) -> u64 {
        self.inputs.iter().fold(0, |acc, i| acc.saturating_add(i.amount))
    }

    /// Sum of all Factoid outputs.
    pub fn total_fct_out(&self) -> u64 {
        self.fct_outputs.iter().fold(0, |acc, o| acc.saturating_add(o.amount))
    }

    /// Sum of all Entry Credit outputs.
    pub fn total_ec_out(&self) -> u64 {
        self.ec_outputs.iter().fold(0, |acc, o| acc.saturating_add(o.amount))
    }

    /// Factoshis burned as the transaction fee.
    pub fn fee(&self) -> u64 {
        self.total_in().saturating_sub(self.total_fct_out().saturating_add(self.total_ec_out()))
    }

    /// Signed balance deltas in encoding order: inputs negated, then Factoid outputs.
    ///
    /// An address that appears more than once yields one entry per appearance. Fails if an
    /// amount does not fit in an `i64`.
    pub fn address_amounts(&self) -> Result<Vec<(FactoidAddress, i64)>, DecodeError> {
        let inputs = self.inputs.iter().map(|i| signed_amount(i.amount).map(|a| (i.address, -a)));
        let outputs =
            self.fct_outputs.iter().map(|o| signed_amount(o.amount).map(|a| (o.address, a)));
        inputs.chain(outputs).collect()
    }

    fn ledger_len(&self) -> usize {
        let entry = |amount: u64| varint_len(amount) + 32;
        varint_len(TRANSACTION_VERSION)
            + TIMESTAMP_WIDTH
            + 3
            + self.inputs.iter().map(|i| entry(i.amount)).sum::<usize>()
            + self.fct_outputs.iter().map(|o| entry(o.amount)).sum::<usize>()
            + self.ec_outputs.iter().map(|o| entry(o.amount)).sum::<usize>()
    }

    /// Length of [`Self::encode`]'s output.
    pub fn encoded_len(&self) -> usize {
        self.ledger_len() + self.signatures.len() * RCD1_SIGNATURE_LEN
    }

    fn encode_ledger<B: BufMut>(&self, buf: &mut B) {
        put_varint(buf, TRANSACTION_VERSION);
        buf.put_uint(self.timestamp_ms, TIMESTAMP_WIDTH);
        // Counts are single bytes on the wire.
        debug_assert!(self.inputs.len() <= u8::MAX as usize);
        buf.put_u8(self.inputs.len() as u8);
        buf.put_u8(self.fct_outputs.len() as u8);
        buf.put_u8(self.ec_outputs.len() as u8);
        for input in &self.inputs {
            put_varint(buf, input.amount);
            buf.put_slice(input.address.rcd_hash().as_bytes());
        }
        for output in &self.fct_outputs {
            put_varint(buf, output.amount);
            buf.put_slice(output.address.rcd_hash().as_bytes());
        }
        for output in &self.ec_outputs {
            put_varint(buf, output.amount);
            buf.put_slice(output.public_key.as_bytes());
        }
    }

    /// Appends the full transaction encoding to `buf`.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        self.encode_ledger(buf);
        for sig in &self.signatures {
            buf.put_u8(RCD_TYPE_1);
            buf.put_slice(&sig.public_key);
            buf.put_slice(&sig.signature);
        }
    }

    /// Reads one transaction from `dec`, tagging it with `minute`.
    pub fn decode_from(dec: &mut Decoder<'_>, minute: u8) -> Result<Self, DecodeError> {
        let version = dec.read_varint()?;
        if version != TRANSACTION_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        let timestamp_ms = dec.read_uint(TIMESTAMP_WIDTH)?;
        let input_count = dec.read_u8()? as usize;
        let fct_output_count = dec.read_u8()? as usize;
        let ec_output_count = dec.read_u8()? as usize;

        let mut read_amounts = |count: usize| -> Result<Vec<(u64, Bytes32)>, DecodeError> {
            (0..count).map(|_| Ok((dec.read_varint()?, dec.read_bytes32()?))).collect()
        };
        let inputs = read_amounts(input_count)?
            .into_iter()
            .map(|(amount, hash)| AddressAmount { address: hash.into(), amount })
            .collect::<Vec<_>>();
        let fct_outputs = read_amounts(fct_output_count)?
            .into_iter()
            .map(|(amount, hash)| AddressAmount { address: hash.into(), amount })
            .collect();
        let ec_outputs = read_amounts(ec_output_count)?
            .into_iter()
            .map(|(amount, public_key)| EcOutput { public_key, amount })
            .collect();

        let mut signatures = Vec::with_capacity(inputs.len());
        for _ in 0..inputs.len() {
            let rcd_type = dec.read_u8()?;
            if rcd_type != RCD_TYPE_1 {
                return Err(DecodeError::UnsupportedRcd(rcd_type));
            }
            signatures.push(Rcd1Signature {
                public_key: dec.read_array()?,
                signature: dec.read_array()?,
            });
        }

        let tx = Self { timestamp_ms, minute, inputs, fct_outputs, ec_outputs, signatures };
        // Totals saturate, so an overflowing sum is caught here as well.
        for total in [tx.total_in(), tx.total_fct_out(), tx.total_ec_out()] {
            signed_amount(total)?;
        }
        Ok(tx)
    }

    /// Decodes a transaction that must span all of `bytes`.
    ///
    /// The minute is unknown outside of a block and is set to zero.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut dec = Decoder::new(bytes);
        let tx = Self::decode_from(&mut dec, 0)?;
        dec.finish()?;
        Ok(tx)
    }
}
