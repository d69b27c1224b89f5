//! Factoid addresses and their base58check form.

use crate::hash::{Bytes32, sha256d};
use std::{fmt, str::FromStr};
use thiserror::Error;

const BASE58_ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Two-byte prefix that makes every human-readable Factoid address start with `FA`.
const FA_PREFIX: [u8; 2] = [0x5f, 0xb1];

/// RCD type 1: a single ed25519 public key.
const RCD_TYPE_1: u8 = 0x01;

/// Errors returned when parsing a human-readable Factoid address.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AddressError {
    /// The string contains a character outside the base58 alphabet.
    #[error("invalid base58 character")]
    InvalidCharacter,
    /// The decoded payload is not prefix + 32 bytes + checksum.
    #[error("invalid address length")]
    InvalidLength,
    /// The payload does not carry the Factoid address prefix.
    #[error("not a Factoid address")]
    UnknownPrefix,
    /// The trailing four bytes do not match the payload digest.
    #[error("invalid address checksum")]
    InvalidChecksum,
}

/// A Factoid address, identified by the hash of its redeem condition datastructure (RCD).
///
/// [`Display`](fmt::Display) renders the base58check `FA…` string that the store uses as
/// the address identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FactoidAddress(Bytes32);

impl FactoidAddress {
    /// Wraps a raw RCD hash.
    pub const fn new(rcd_hash: Bytes32) -> Self {
        Self(rcd_hash)
    }

    /// Derives the address controlled by a type 1 RCD for `public_key`.
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        let mut rcd = [0u8; 33];
        rcd[0] = RCD_TYPE_1;
        rcd[1..].copy_from_slice(public_key);
        Self(sha256d(rcd))
    }

    /// Returns the RCD hash.
    pub const fn rcd_hash(&self) -> &Bytes32 {
        &self.0
    }
}

impl From<Bytes32> for FactoidAddress {
    fn from(rcd_hash: Bytes32) -> Self {
        Self(rcd_hash)
    }
}

impl fmt::Display for FactoidAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut payload = Vec::with_capacity(FA_PREFIX.len() + 32);
        payload.extend_from_slice(&FA_PREFIX);
        payload.extend_from_slice(self.0.as_bytes());
        f.write_str(&base58check_encode(&payload))
    }
}

impl fmt::Debug for FactoidAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FactoidAddress({self})")
    }
}

impl FromStr for FactoidAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let payload = base58check_decode(s.trim())?;
        let Some(rcd_hash) = payload.strip_prefix(&FA_PREFIX[..]) else {
            return Err(AddressError::UnknownPrefix);
        };
        Bytes32::from_slice(rcd_hash).map(Self).ok_or(AddressError::InvalidLength)
    }
}

fn base58check_encode(payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(payload.len() + 4);
    data.extend_from_slice(payload);
    let checksum = sha256d(payload);
    data.extend_from_slice(&checksum.as_bytes()[..4]);
    base58_encode(&data)
}

fn base58check_decode(input: &str) -> Result<Vec<u8>, AddressError> {
    let bytes = base58_decode(input)?;
    if bytes.len() < 4 {
        return Err(AddressError::InvalidLength);
    }
    let (payload, checksum) = bytes.split_at(bytes.len() - 4);
    if checksum != &sha256d(payload).as_bytes()[..4] {
        return Err(AddressError::InvalidChecksum);
    }
    Ok(payload.to_vec())
}

fn base58_encode(data: &[u8]) -> String {
    // Big-endian base58 digits.
    let mut digits: Vec<u8> = Vec::with_capacity(data.len() * 138 / 100 + 1);
    for byte in data {
        let mut carry = *byte as u32;
        for digit in digits.iter_mut().rev() {
            let value = (*digit as u32) * 256 + carry;
            *digit = (value % 58) as u8;
            carry = value / 58;
        }
        while carry > 0 {
            digits.insert(0, (carry % 58) as u8);
            carry /= 58;
        }
    }
    let leading_zeros = data.iter().take_while(|b| **b == 0).count();
    let mut out = String::with_capacity(leading_zeros + digits.len());
    out.extend(std::iter::repeat_n('1', leading_zeros));
    out.extend(digits.into_iter().map(|d| BASE58_ALPHABET[d as usize] as char));
    out
}

fn base58_decode(input: &str) -> Result<Vec<u8>, AddressError> {
    if input.is_empty() {
        return Err(AddressError::InvalidLength);
    }
    let mut bytes: Vec<u8> = Vec::new();
    for ch in input.bytes() {
        let mut carry = base58_value(ch).ok_or(AddressError::InvalidCharacter)? as u32;
        for byte in bytes.iter_mut().rev() {
            let value = (*byte as u32) * 58 + carry;
            *byte = (value & 0xff) as u8;
            carry = value >> 8;
        }
        while carry > 0 {
            bytes.insert(0, (carry & 0xff) as u8);
            carry >>= 8;
        }
    }
    let leading_zeros = input.bytes().take_while(|b| *b == b'1').count();
    let mut out = vec![0u8; leading_zeros];
    out.extend_from_slice(&bytes);
    Ok(out)
}

fn base58_value(byte: u8) -> Option<u8> {
    BASE58_ALPHABET.iter().position(|value| *value == byte).map(|pos| pos as u8)
}
