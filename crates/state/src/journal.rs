use crate::object::StateObject;
use rustc_hash::FxHashMap;
use sse_primitives::{Address, B256, Bytes, U256};

/// One reversible state mutation.
///
/// Each entry carries exactly what its reversal needs; the reversal itself
/// is applied by [`crate::IntraBlockState::revert_to_snapshot`] in LIFO
/// order.
#[derive(Clone, Debug)]
pub enum JournalEntry {
    /// A fresh state object was created.
    CreateObject {
        /// Created address.
        address: Address,
    },
    /// An existing object was overwritten by contract creation.
    ResetObject {
        /// Recreated address.
        address: Address,
        /// Full prior object.
        prior: Box<StateObject>,
    },
    /// An object was marked self-destructed.
    SelfDestruct {
        /// Destructed address.
        address: Address,
        /// Prior flag value.
        prior_destructed: bool,
    },
    /// Balance overwritten.
    BalanceChange {
        /// Changed address.
        address: Address,
        /// Prior balance.
        prior: U256,
    },
    /// Coalesced balance increase on a not-yet-loaded object.
    BalanceIncrease {
        /// Credited address.
        address: Address,
        /// Credited amount.
        amount: U256,
    },
    /// A pending increase was folded into a loaded object.
    BalanceIncreaseTransfer {
        /// Affected address.
        address: Address,
        /// Folded amount.
        amount: U256,
    },
    /// Nonce overwritten.
    NonceChange {
        /// Changed address.
        address: Address,
        /// Prior nonce.
        prior: u64,
    },
    /// Storage slot overwritten.
    StorageChange {
        /// Changed address.
        address: Address,
        /// Changed slot.
        slot: B256,
        /// Prior dirty-or-origin value.
        prior: U256,
        /// Whether a dirty entry existed before this write.
        had_dirty: bool,
    },
    /// Fake (overridden) storage slot written.
    FakeStorageChange {
        /// Changed address.
        address: Address,
        /// Changed slot.
        slot: B256,
        /// Prior override, if any.
        prior: Option<U256>,
    },
    /// Code overwritten.
    CodeChange {
        /// Changed address.
        address: Address,
        /// Prior code hash.
        prior_hash: B256,
        /// Prior code bytes.
        prior_code: Bytes,
    },
    /// Refund counter overwritten.
    RefundChange {
        /// Prior refund.
        prior: u64,
    },
    /// A log was appended.
    AddLog,
    /// An account was touched (EIP-161).
    Touch {
        /// Touched address.
        address: Address,
        /// Whether it was already touched.
        prior: bool,
    },
    /// An address entered the access list.
    AccessListAddress {
        /// Warmed address.
        address: Address,
    },
    /// A storage slot entered the access list.
    AccessListSlot {
        /// Warmed address.
        address: Address,
        /// Warmed slot.
        slot: B256,
    },
    /// Transient storage slot overwritten.
    TransientStorage {
        /// Changed address.
        address: Address,
        /// Changed slot.
        slot: B256,
        /// Prior value.
        prior: U256,
    },
}

impl JournalEntry {
    /// The address this entry dirties, if any.
    fn dirtied(&self) -> Option<Address> {
        match self {
            JournalEntry::CreateObject { address }
            | JournalEntry::ResetObject { address, .. }
            | JournalEntry::SelfDestruct { address, .. }
            | JournalEntry::BalanceChange { address, .. }
            | JournalEntry::BalanceIncrease { address, .. }
            | JournalEntry::NonceChange { address, .. }
            | JournalEntry::StorageChange { address, .. }
            | JournalEntry::CodeChange { address, .. }
            | JournalEntry::Touch { address, .. } => Some(*address),
            _ => None,
        }
    }
}

/// LIFO log of undo records with a per-address dirty count.
#[derive(Debug, Default)]
pub struct Journal {
    entries: Vec<JournalEntry>,
    dirty: FxHashMap<Address, u32>,
}

impl Journal {
    /// Append an entry, updating the dirty count.
    pub fn append(&mut self, entry: JournalEntry) {
        if let Some(address) = entry.dirtied() {
            *self.dirty.entry(address).or_default() += 1;
        }
        self.entries.push(entry);
    }

    /// Current length; doubles as the snapshot id.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the journal is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any live entry dirties `address`.
    pub fn is_dirty(&self, address: Address) -> bool {
        self.dirty.get(&address).copied().unwrap_or(0) > 0
    }

    /// Addresses with a positive dirty count.
    pub fn dirty_addresses(&self) -> impl Iterator<Item = Address> + '_ {
        self.dirty
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(address, _)| *address)
    }

    /// Detach entries past `snapshot`, newest first, decrementing dirty
    /// counts. The caller applies the reversals.
    pub fn detach_to(&mut self, snapshot: usize) -> Vec<JournalEntry> {
        let mut detached = Vec::with_capacity(self.entries.len().saturating_sub(snapshot));
        while self.entries.len() > snapshot {
            let entry = self.entries.pop().expect("len checked");
            if let Some(address) = entry.dirtied() {
                if let Some(count) = self.dirty.get_mut(&address) {
                    *count = count.saturating_sub(1);
                }
            }
            detached.push(entry);
        }
        detached
    }

    /// Drop everything, e.g. at transaction end.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.dirty.clear();
    }

    /// All live entries, oldest first.
    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirty_counts_follow_detach() {
        let mut journal = Journal::default();
        let address = Address::repeat_byte(1);
        journal.append(JournalEntry::BalanceChange {
            address,
            prior: U256::ZERO,
        });
        let snapshot = journal.len();
        journal.append(JournalEntry::NonceChange { address, prior: 0 });
        journal.append(JournalEntry::RefundChange { prior: 0 });
        assert!(journal.is_dirty(address));

        let detached = journal.detach_to(snapshot);
        assert_eq!(detached.len(), 2);
        // One balance entry remains live.
        assert!(journal.is_dirty(address));

        journal.detach_to(0);
        assert!(!journal.is_dirty(address));
    }
}
