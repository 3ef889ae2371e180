//! Merkle-Patricia commitment over the flat state.
//!
//! A node-level sparse trie plus the root builders the execution stage needs:
//! ordered roots for transactions, receipts and withdrawals, and the
//! account/storage state root rebuilt from domain iteration.

mod node;
mod roots;

pub use node::{Node, TrieError};
pub use roots::{ordered_trie_root, state_root, storage_root};

/// Result alias.
pub type Result<T, E = TrieError> = std::result::Result<T, E>;
