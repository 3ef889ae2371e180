//! Primitive consensus types of the staged state engine.
//!
//! Everything here is defined against [`alloy_primitives`] scalars; canonical
//! encodings go through [`alloy_rlp`]. The execution layer above consumes
//! these types, it never re-encodes them ad hoc.

pub use alloy_primitives::{
    self, Address, B256, Bloom, Bytes, ChainId, TxKind, U256, address, b256, hex, keccak256,
};
pub use alloy_trie::{EMPTY_ROOT_HASH, KECCAK_EMPTY};

mod account;
pub mod chainspec;
mod header;
mod receipt;
mod signature;
mod transaction;
mod withdrawal;

pub use account::Account;
pub use chainspec::{ChainSpec, Revision};
pub use header::{Header, SealedHeader};
pub use receipt::{Log, Receipt};
pub use signature::{Signature, SignatureError};
pub use transaction::{
    AccessList, AccessListItem, Authorization, SignedAuthorization, SignedTransaction,
    Transaction, TxEip1559, TxEip2930, TxEip4844, TxEip7702, TxLegacy, TxType,
};
pub use withdrawal::Withdrawal;

/// Block and body container types.
pub mod block;
pub use block::{Block, BlockBody};

/// A global, monotonically increasing index assigned to every transaction
/// across all blocks. Independent of block number.
pub type TxNumber = u64;

/// Block number.
pub type BlockNumber = u64;

/// Keccak-256 of the RLP encoding of an empty list.
///
/// Uncle hash of a body without ommers.
pub const EMPTY_LIST_HASH: B256 =
    b256!("1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347");

/// Gas units consumed by a single blob (EIP-4844).
pub const GAS_PER_BLOB: u64 = 131_072;

/// Address of the EIP-4788 beacon roots contract.
pub const BEACON_ROOTS_ADDRESS: Address = address!("000F3df6D732807Ef1319fB7B8bB8522d0Beac02");

/// Length of the beacon roots ring buffer (EIP-4788).
pub const BEACON_ROOTS_HISTORY_BUFFER_LENGTH: u64 = 8191;

/// The RIPEMD-160 precompile address, exempted from touch reversal since the
/// 2016 state-clearing incident.
pub const RIPEMD_ADDRESS: Address = address!("0000000000000000000000000000000000000003");
