use rustc_hash::FxHashSet;
use sse_primitives::{Address, B256};

/// Gas for touching a cold account (EIP-2929).
pub const COLD_ACCOUNT_ACCESS_COST: u64 = 2600;
/// Gas for reading a cold storage slot (EIP-2929).
pub const COLD_SLOAD_COST: u64 = 2100;
/// Gas for a warm account or slot access (EIP-2929).
pub const WARM_STORAGE_READ_COST: u64 = 100;

/// EIP-2929/2930 warm set: addresses and storage slots touched within the
/// current transaction. Reset at transaction start; membership changes are
/// journaled by the owner so reverts restore coldness.
#[derive(Debug, Default)]
pub struct AccessTracker {
    addresses: FxHashSet<Address>,
    slots: FxHashSet<(Address, B256)>,
}

impl AccessTracker {
    /// Warm an address. Returns whether it was cold.
    pub fn add_address(&mut self, address: Address) -> bool {
        self.addresses.insert(address)
    }

    /// Warm a slot. Returns whether it was cold.
    pub fn add_slot(&mut self, address: Address, slot: B256) -> bool {
        self.slots.insert((address, slot))
    }

    /// Whether an address is warm.
    pub fn contains_address(&self, address: Address) -> bool {
        self.addresses.contains(&address)
    }

    /// Whether a slot is warm.
    pub fn contains_slot(&self, address: Address, slot: B256) -> bool {
        self.slots.contains(&(address, slot))
    }

    /// Reversal of [`Self::add_address`].
    pub fn remove_address(&mut self, address: Address) {
        self.addresses.remove(&address);
    }

    /// Reversal of [`Self::add_slot`].
    pub fn remove_slot(&mut self, address: Address, slot: B256) {
        self.slots.remove(&(address, slot));
    }

    /// Drop everything, at transaction start.
    pub fn clear(&mut self) {
        self.addresses.clear();
        self.slots.clear();
    }
}
