//! Transactional in-block state: the journaled mutation layer between the
//! execution stage and the flat domains.
//!
//! [`IntraBlockState`] aggregates the journal, the EIP-2929 access list,
//! EIP-1153 transient storage and the per-account state objects, and is the
//! facade the external EVM drives through the [`Host`] trait.

mod access_list;
mod evm;
mod intra_block;
mod journal;
mod object;
mod transient;

pub use access_list::{
    AccessTracker, COLD_ACCOUNT_ACCESS_COST, COLD_SLOAD_COST, WARM_STORAGE_READ_COST,
};
pub use evm::{BlockContext, CallKind, CallResult, Evm, Host, HostAdapter, Message};
pub use intra_block::{IntraBlockState, StateWrite};
pub use journal::{Journal, JournalEntry};
pub use object::StateObject;
pub use transient::TransientStorage;

use sse_primitives::{Account, Address, B256, Bytes, U256};

/// Errors of the state layer.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Failure in the backing store a [`StateReader`] wraps.
    #[error("state backend: {0}")]
    Backend(#[from] Box<dyn std::error::Error + Send + Sync>),
    /// A code hash with no matching code word.
    #[error("missing code for hash {0}")]
    MissingCode(B256),
}

/// Result alias.
pub type Result<T, E = StateError> = std::result::Result<T, E>;

/// Read access to the persistent state backing an [`IntraBlockState`].
///
/// Implemented by the execution stage over the flat domains; state objects
/// load through it lazily and cache the answers.
#[auto_impl::auto_impl(&, Box)]
pub trait StateReader {
    /// The latest persisted account, if any.
    fn read_account(&self, address: Address) -> Result<Option<Account>>;
    /// The latest persisted value of a storage slot; zero when absent.
    fn read_storage(&self, address: Address, slot: B256) -> Result<U256>;
    /// Contract code by hash.
    fn read_code(&self, code_hash: B256) -> Result<Bytes>;
}

/// A reader over nothing, for genesis processing and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyReader;

impl StateReader for EmptyReader {
    fn read_account(&self, _address: Address) -> Result<Option<Account>> {
        Ok(None)
    }
    fn read_storage(&self, _address: Address, _slot: B256) -> Result<U256> {
        Ok(U256::ZERO)
    }
    fn read_code(&self, code_hash: B256) -> Result<Bytes> {
        Err(StateError::MissingCode(code_hash))
    }
}
