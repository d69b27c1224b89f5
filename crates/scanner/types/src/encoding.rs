//! Byte-level helpers shared by the block and transaction codecs.

use crate::hash::Bytes32;
use bytes::{Buf, BufMut};
use thiserror::Error;

/// Errors produced while decoding Factoid blocks and transactions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The input ended before a field could be read.
    #[error("unexpected end of data: needed {needed} more bytes")]
    UnexpectedEof {
        /// Bytes still required by the field being read.
        needed: usize,
    },
    /// Bytes remained after a complete value was decoded.
    #[error("{0} trailing bytes after decoded value")]
    TrailingBytes(usize),
    /// A varint did not terminate within 64 bits.
    #[error("varint overflows 64 bits")]
    VarIntOverflow,
    /// Transaction version other than the one this codec understands.
    #[error("unsupported transaction version {0}")]
    UnsupportedVersion(u64),
    /// Redeem condition type other than a single public key.
    #[error("unsupported RCD type {0:#04x}")]
    UnsupportedRcd(u8),
    /// The header does not name the Factoid chain.
    #[error("block is not a Factoid block: chain id {0}")]
    InvalidChainId(Bytes32),
    /// The header's body size disagrees with the bytes that follow it.
    #[error("body size mismatch: header declares {declared} bytes, found {actual}")]
    BodySizeMismatch {
        /// Declared by the header.
        declared: u32,
        /// Present in the input.
        actual: usize,
    },
    /// The header's transaction count disagrees with the body.
    #[error("transaction count mismatch: header declares {declared}, body holds {actual}")]
    TxCountMismatch {
        /// Declared by the header.
        declared: u32,
        /// Found in the body.
        actual: usize,
    },
    /// An amount or a transaction total does not fit a signed 64-bit ledger value.
    #[error("amount {0} exceeds the ledger's signed 64-bit range")]
    AmountOutOfRange(u64),
    /// The body root committed to in the header does not match the body.
    #[error("body merkle root mismatch: header {expected}, computed {computed}")]
    BodyRootMismatch {
        /// Committed to in the header.
        expected: Bytes32,
        /// Computed over the body.
        computed: Bytes32,
    },
}

/// A forward-only reader over a borrowed byte slice.
///
/// Every read checks the remaining length first so that truncated input surfaces as
/// [`DecodeError::UnexpectedEof`] instead of a panic inside [`Buf`].
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    consumed: usize,
}

impl<'a> Decoder<'a> {
    /// Creates a decoder positioned at the start of `buf`.
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf, consumed: 0 }
    }

    /// Number of bytes read so far.
    pub const fn position(&self) -> usize {
        self.consumed
    }

    /// Number of unread bytes.
    pub const fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Whether every byte has been read.
    pub const fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns the next byte without consuming it.
    pub fn peek_u8(&self) -> Result<u8, DecodeError> {
        self.buf.first().copied().ok_or(DecodeError::UnexpectedEof { needed: 1 })
    }

    fn ensure(&self, len: usize) -> Result<(), DecodeError> {
        if self.buf.len() < len {
            return Err(DecodeError::UnexpectedEof { needed: len - self.buf.len() });
        }
        Ok(())
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        self.ensure(1)?;
        self.consumed += 1;
        Ok(self.buf.get_u8())
    }

    /// Reads a big-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.ensure(4)?;
        self.consumed += 4;
        Ok(self.buf.get_u32())
    }

    /// Reads a big-endian `u64`.
    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        self.ensure(8)?;
        self.consumed += 8;
        Ok(self.buf.get_u64())
    }

    /// Reads a big-endian unsigned integer of `width` bytes (at most 8).
    pub fn read_uint(&mut self, width: usize) -> Result<u64, DecodeError> {
        self.ensure(width)?;
        self.consumed += width;
        Ok(self.buf.get_uint(width))
    }

    /// Borrows the next `len` bytes.
    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        self.ensure(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        self.consumed += len;
        Ok(head)
    }

    /// Reads a fixed-size array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_slice(N)?);
        Ok(out)
    }

    /// Reads a 32-byte digest.
    pub fn read_bytes32(&mut self) -> Result<Bytes32, DecodeError> {
        self.read_array::<32>().map(Bytes32)
    }

    /// Reads a Factom varint: 7-bit groups, most significant first, high bit set on
    /// every byte except the last.
    pub fn read_varint(&mut self) -> Result<u64, DecodeError> {
        let mut value: u64 = 0;
        loop {
            let byte = self.read_u8()?;
            if value > u64::MAX >> 7 {
                return Err(DecodeError::VarIntOverflow);
            }
            value = (value << 7) | u64::from(byte & 0x7f);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
    }

    /// Fails with [`DecodeError::TrailingBytes`] if anything is left unread.
    pub const fn finish(&self) -> Result<(), DecodeError> {
        if self.buf.is_empty() { Ok(()) } else { Err(DecodeError::TrailingBytes(self.buf.len())) }
    }
}

/// Writes `value` as a Factom varint.
pub fn put_varint<B: BufMut>(buf: &mut B, value: u64) {
    let len = varint_len(value);
    for group in (0..len).rev() {
        let mut byte = ((value >> (7 * group)) & 0x7f) as u8;
        if group != 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
    }
}

/// Encoded length of `value` as a Factom varint.
pub const fn varint_len(value: u64) -> usize {
    let mut len = 1;
    let mut rest = value >> 7;
    while rest != 0 {
        len += 1;
        rest >>= 7;
    }
    len
}
