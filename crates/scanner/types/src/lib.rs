//! # fbscan-types
//!
//! Primitives for the Factoid transfer ledger: 32-byte digests, Factoid addresses, the
//! Factoid block and transaction model, and the binary codec that moves them between
//! the node's wire form and the bytes persisted by the store.
//!
//! ## Key Components
//!
//! - [`FBlock`]: a decoded Factoid block. [`FBlock::encode`] and [`FBlock::decode`] are
//!   exact inverses, so the stored bytes can always be re-sliced per transaction.
//! - [`FTransaction`]: a Factoid transaction together with the minute it was included in.
//! - [`AddressFilter`]: the set of addresses whose balance effects are retained.

mod hash;
pub use hash::{Bytes32, merkle_root, sha256, sha256d};

mod address;
pub use address::{AddressError, FactoidAddress};

mod encoding;
pub use encoding::{DecodeError, Decoder, put_varint, varint_len};

mod transaction;
pub use transaction::{
    AddressAmount, EcOutput, FTransaction, Rcd1Signature, TRANSACTION_VERSION, signed_amount,
};

mod block;
pub use block::{
    FACTOID_CHAIN_ID, FBLOCK_HEADER_MIN_SIZE, FBlock, MINUTE_MARKER, MINUTES_PER_BLOCK,
};

mod filter;
pub use filter::AddressFilter;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
