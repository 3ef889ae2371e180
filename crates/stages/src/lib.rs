//! The staged synchronization pipeline: ordered, resumable, unwindable
//! transformations from a stream of blocks into verified persistent state.
//!
//! Each stage reads a contiguous block range from its input tables, writes
//! derived data, and commits a progress marker in the same transaction. The
//! coordinator advances stages in dependency order and unwinds them in
//! reverse when a block is invalidated or the chain reorganizes.

mod api;
mod consensus;
mod freeze;
mod genesis;
mod progress;
mod reader;
mod root;
mod source;
mod stages;
mod status;
mod sync;

pub use api::{AnyStage, Domains, ExecOutput, Stage, StageContext, StageId, StageInput};
pub use consensus::{AlwaysValid, HeaderValidator};
pub use freeze::{collate_below, merge_all};
pub use genesis::{GenesisAccount, init_genesis};
pub use progress::{read_progress, save_progress};
pub use reader::DomainReader;
pub use root::compute_state_root;
pub use source::{BlockSource, SharedSource, VecBlockSource, shared_source};
pub use stages::{
    BodiesStage, ExecutionStage, FinishStage, HeadersStage, SendersStage, TxLookupStage,
};
pub use status::{block_by_number, head, state_at, storage_at, sync_status, SyncStatus};
pub use sync::Pipeline;

use sse_primitives::BlockNumber;

/// Why a block was rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BadBlockReason {
    /// Header consensus or shape check failed.
    InvalidHeader(&'static str),
    /// Body roots did not match the header.
    InvalidBody(&'static str),
    /// A transaction signature did not recover.
    SenderRecovery,
    /// A transaction failed pre-execution validation.
    InvalidTransaction(&'static str),
    /// A computed field disagreed with the header after execution.
    ExecutionMismatch(&'static str),
}

/// Errors of the staged-sync layer.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// A block failed validation; the coordinator unwinds past it and asks
    /// the source for an alternative.
    #[error("invalid block {number}: {reason:?}")]
    InvalidBlock {
        /// Offending height.
        number: BlockNumber,
        /// Classification.
        reason: BadBlockReason,
    },
    /// The source switched to a chain branching below our head.
    #[error("chain reorganization, common ancestor {ancestor}")]
    Reorg {
        /// Highest block shared with the new chain.
        ancestor: BlockNumber,
    },
    /// Cooperative shutdown observed between blocks.
    #[error("shutdown requested")]
    Shutdown,
    /// A table row the stage depends on is missing.
    #[error("missing {what} for block {number}")]
    MissingData {
        /// Affected height.
        number: BlockNumber,
        /// Missing item.
        what: &'static str,
    },
    /// KV backend failure; fatal.
    #[error(transparent)]
    Kv(#[from] sse_kv::KvError),
    /// Temporal store failure; fatal.
    #[error(transparent)]
    Temporal(#[from] sse_temporal::TemporalError),
    /// In-block state failure; fatal.
    #[error(transparent)]
    State(#[from] sse_state::StateError),
    /// Commitment failure; fatal.
    #[error(transparent)]
    Trie(#[from] sse_trie::TrieError),
    /// Malformed persisted data; fatal.
    #[error("decode failure: {0}")]
    Decode(&'static str),
}

impl From<alloy_rlp::Error> for StageError {
    fn from(_: alloy_rlp::Error) -> Self {
        StageError::Decode("rlp")
    }
}

/// Result alias.
pub type Result<T, E = StageError> = std::result::Result<T, E>;
