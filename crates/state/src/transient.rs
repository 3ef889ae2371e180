use rustc_hash::FxHashMap;
use sse_primitives::{Address, B256, U256};

/// EIP-1153 transient storage: per-transaction ephemeral slots, cleared at
/// transaction end. Reads of absent keys are zero; writes are journaled by
/// the owner.
#[derive(Debug, Default)]
pub struct TransientStorage {
    slots: FxHashMap<(Address, B256), U256>,
}

impl TransientStorage {
    /// Current value of a slot.
    pub fn get(&self, address: Address, slot: B256) -> U256 {
        self.slots
            .get(&(address, slot))
            .copied()
            .unwrap_or(U256::ZERO)
    }

    /// Set a slot, returning the prior value for journaling.
    pub fn set(&mut self, address: Address, slot: B256, value: U256) -> U256 {
        self.slots
            .insert((address, slot), value)
            .unwrap_or(U256::ZERO)
    }

    /// End-of-transaction wipe.
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_reads_zero_and_clear_wipes() {
        let mut transient = TransientStorage::default();
        let address = Address::repeat_byte(1);
        let slot = B256::repeat_byte(2);
        assert_eq!(transient.get(address, slot), U256::ZERO);
        assert_eq!(transient.set(address, slot, U256::from(7)), U256::ZERO);
        assert_eq!(transient.set(address, slot, U256::from(9)), U256::from(7));
        transient.clear();
        assert_eq!(transient.get(address, slot), U256::ZERO);
    }
}
