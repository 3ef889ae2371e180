use rustc_hash::FxHashMap;
use sse_primitives::{Account, B256, Bytes, U256};

/// Cached view of one account with three-tier storage layering.
///
/// `origin_storage` holds values read from the backing store and is never
/// mutated by writes; `block_origin_storage` pins the value a slot had when
/// the current block first touched it; `dirty_storage` carries the pending
/// writes of the block, journaled entry by entry.
#[derive(Clone, Debug, Default)]
pub struct StateObject {
    /// Current account fields.
    pub account: Account,
    /// Lazily loaded code; `None` until someone asks.
    pub code: Option<Bytes>,
    /// Values as read from the backing store.
    pub origin_storage: FxHashMap<B256, U256>,
    /// Values as of the start of the current block.
    pub block_origin_storage: FxHashMap<B256, U256>,
    /// Pending writes of the current block.
    pub dirty_storage: FxHashMap<B256, U256>,
    /// Overridden slots, bypassing real storage entirely.
    pub fake_storage: FxHashMap<B256, U256>,
    /// Marked by SELFDESTRUCT; deletion happens at transaction end.
    pub self_destructed: bool,
    /// Created within the current transaction (EIP-6780 gate).
    pub newly_created: bool,
    /// Deleted at a previous transaction boundary of this block.
    pub deleted: bool,
    /// The account did not exist in the backing store.
    pub fresh: bool,
}

impl StateObject {
    /// An object wrapping a loaded account.
    pub fn existing(account: Account) -> Self {
        Self {
            account,
            ..Default::default()
        }
    }

    /// An object for an address absent from the backing store.
    pub fn fresh() -> Self {
        Self {
            fresh: true,
            ..Default::default()
        }
    }

    /// Storage value visible to execution: dirty first, then origin.
    pub fn pending_storage(&self, slot: B256) -> Option<U256> {
        if let Some(value) = self.fake_storage.get(&slot) {
            return Some(*value);
        }
        self.dirty_storage
            .get(&slot)
            .or_else(|| self.origin_storage.get(&slot))
            .copied()
    }

    /// EIP-161: empty means zero nonce, zero balance, empty code.
    pub fn is_empty(&self) -> bool {
        self.account.is_empty()
    }

    /// Whether the object currently represents a live account.
    pub fn is_live(&self) -> bool {
        !self.deleted && !(self.fresh && self.account.is_empty() && self.dirty_storage.is_empty())
    }
}
