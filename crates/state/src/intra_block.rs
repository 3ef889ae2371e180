use crate::{
    AccessTracker, COLD_ACCOUNT_ACCESS_COST, COLD_SLOAD_COST, Journal, JournalEntry, Result,
    StateObject, StateReader, TransientStorage, WARM_STORAGE_READ_COST,
};
use rustc_hash::{FxHashMap, FxHashSet};
use sse_primitives::{
    Account, AccessListItem, Address, B256, Bytes, KECCAK_EMPTY, Log, RIPEMD_ADDRESS, U256,
    keccak256,
};

/// One persistent-state mutation produced by a finalized transaction, in
/// execution order. The execution stage flushes these through the domains.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateWrite {
    /// Account created, changed, or deleted (`None`).
    Account {
        /// Affected address.
        address: Address,
        /// Assigning transaction number.
        txnum: u64,
        /// New state, `None` for deletion.
        account: Option<Account>,
    },
    /// Storage slot changed; zero deletes.
    Storage {
        /// Affected address.
        address: Address,
        /// Affected slot.
        slot: B256,
        /// Assigning transaction number.
        txnum: u64,
        /// New value.
        value: U256,
    },
    /// New contract code, content-addressed.
    Code {
        /// Keccak-256 of the code.
        code_hash: B256,
        /// Assigning transaction number.
        txnum: u64,
        /// The code bytes.
        code: Bytes,
    },
}

#[derive(Debug, Default)]
struct BalanceIncrease {
    increase: U256,
    transferred: bool,
}

/// Transactional state facade over the flat domains.
///
/// All mutation is journaled; [`Self::snapshot`] and
/// [`Self::revert_to_snapshot`] give transaction-level atomicity, and
/// [`Self::finalize`] settles a transaction into [`StateWrite`]s while
/// clearing the per-transaction structures.
#[derive(Debug)]
pub struct IntraBlockState<R> {
    reader: R,
    objects: FxHashMap<Address, StateObject>,
    journal: Journal,
    access_list: AccessTracker,
    transient: TransientStorage,
    logs: Vec<Log>,
    refund: u64,
    touched: FxHashSet<Address>,
    balance_inc: FxHashMap<Address, BalanceIncrease>,
    new_code: Vec<(B256, Bytes)>,
    emitted_accounts: FxHashMap<Address, Option<Account>>,
    emitted_slots: FxHashMap<(Address, B256), U256>,
    writes: Vec<StateWrite>,
}

impl<R: StateReader> IntraBlockState<R> {
    /// A fresh per-block state over `reader`.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            objects: FxHashMap::default(),
            journal: Journal::default(),
            access_list: AccessTracker::default(),
            transient: TransientStorage::default(),
            logs: Vec::new(),
            refund: 0,
            touched: FxHashSet::default(),
            balance_inc: FxHashMap::default(),
            new_code: Vec::new(),
            emitted_accounts: FxHashMap::default(),
            emitted_slots: FxHashMap::default(),
            writes: Vec::new(),
        }
    }

    fn ensure_loaded(&mut self, address: Address) -> Result<()> {
        if !self.objects.contains_key(&address) {
            let object = match self.reader.read_account(address)? {
                Some(account) => StateObject::existing(account),
                None => StateObject::fresh(),
            };
            self.objects.insert(address, object);
        }
        // Fold a pending coalesced increase into the loaded object.
        if let Some(inc) = self.balance_inc.get_mut(&address) {
            if !inc.transferred && !inc.increase.is_zero() {
                let amount = inc.increase;
                inc.transferred = true;
                let object = self.objects.get_mut(&address).expect("just loaded");
                object.account.balance += amount;
                self.journal
                    .append(JournalEntry::BalanceIncreaseTransfer { address, amount });
            }
        }
        Ok(())
    }

    fn object(&mut self, address: Address) -> Result<&mut StateObject> {
        self.ensure_loaded(address)?;
        Ok(self.objects.get_mut(&address).expect("ensured"))
    }

    fn touch(&mut self, address: Address) {
        if self.touched.insert(address) {
            self.journal.append(JournalEntry::Touch {
                address,
                prior: false,
            });
        }
    }

    /// Whether an account exists (or was created this block).
    pub fn exist(&mut self, address: Address) -> Result<bool> {
        if let Some(object) = self.objects.get(&address) {
            return Ok(object.is_live());
        }
        Ok(self.reader.read_account(address)?.is_some())
    }

    /// EIP-161 empty check.
    pub fn empty(&mut self, address: Address) -> Result<bool> {
        if !self.exist(address)? {
            return Ok(true);
        }
        Ok(self.object(address)?.is_empty())
    }

    /// Balance, including pending coalesced increases.
    pub fn get_balance(&mut self, address: Address) -> Result<U256> {
        self.ensure_loaded(address)?;
        Ok(self.objects[&address].account.balance)
    }

    /// Credit `amount`. Credits to untouched objects are coalesced without
    /// loading them.
    pub fn add_balance(&mut self, address: Address, amount: U256) -> Result<()> {
        self.touch(address);
        if !self.objects.contains_key(&address) {
            self.journal
                .append(JournalEntry::BalanceIncrease { address, amount });
            self.balance_inc.entry(address).or_default().increase += amount;
            return Ok(());
        }
        let prior = self.objects[&address].account.balance;
        self.journal
            .append(JournalEntry::BalanceChange { address, prior });
        self.objects.get_mut(&address).expect("checked").account.balance = prior + amount;
        Ok(())
    }

    /// Debit `amount`. The caller has verified sufficiency.
    pub fn sub_balance(&mut self, address: Address, amount: U256) -> Result<()> {
        self.touch(address);
        let prior = {
            let object = self.object(address)?;
            object.account.balance
        };
        self.journal
            .append(JournalEntry::BalanceChange { address, prior });
        self.objects.get_mut(&address).expect("loaded").account.balance = prior - amount;
        Ok(())
    }

    /// Account nonce.
    pub fn get_nonce(&mut self, address: Address) -> Result<u64> {
        self.ensure_loaded(address)?;
        Ok(self.objects[&address].account.nonce)
    }

    /// Set the nonce, journaled.
    pub fn set_nonce(&mut self, address: Address, nonce: u64) -> Result<()> {
        self.touch(address);
        let prior = self.object(address)?.account.nonce;
        self.journal
            .append(JournalEntry::NonceChange { address, prior });
        self.objects.get_mut(&address).expect("loaded").account.nonce = nonce;
        Ok(())
    }

    /// Code hash, `KECCAK_EMPTY` for code-less accounts.
    pub fn get_code_hash(&mut self, address: Address) -> Result<B256> {
        self.ensure_loaded(address)?;
        Ok(self.objects[&address].account.code_hash)
    }

    /// Contract code, lazily loaded by hash.
    pub fn get_code(&mut self, address: Address) -> Result<Bytes> {
        self.ensure_loaded(address)?;
        let code_hash = self.objects[&address].account.code_hash;
        if code_hash == KECCAK_EMPTY {
            return Ok(Bytes::new());
        }
        if let Some(code) = &self.objects[&address].code {
            return Ok(code.clone());
        }
        let code = self.reader.read_code(code_hash)?;
        self.objects.get_mut(&address).expect("loaded").code = Some(code.clone());
        Ok(code)
    }

    /// Code size in bytes.
    pub fn get_code_size(&mut self, address: Address) -> Result<usize> {
        Ok(self.get_code(address)?.len())
    }

    /// Install code, journaled.
    pub fn set_code(&mut self, address: Address, code: Bytes) -> Result<()> {
        self.touch(address);
        let prior_code = self.get_code(address)?;
        let object = self.object(address)?;
        let prior_hash = object.account.code_hash;
        let code_hash = keccak256(&code);
        object.account.code_hash = code_hash;
        object.code = Some(code.clone());
        self.journal.append(JournalEntry::CodeChange {
            address,
            prior_hash,
            prior_code,
        });
        if code_hash != KECCAK_EMPTY {
            self.new_code.push((code_hash, code));
        }
        Ok(())
    }

    fn load_origin_slot(&mut self, address: Address, slot: B256) -> Result<U256> {
        self.ensure_loaded(address)?;
        let object = self.objects.get_mut(&address).expect("ensured");
        if let Some(value) = object.origin_storage.get(&slot) {
            return Ok(*value);
        }
        let value = if object.fresh || object.newly_created {
            U256::ZERO
        } else {
            self.reader.read_storage(address, slot)?
        };
        let object = self.objects.get_mut(&address).expect("ensured");
        object.origin_storage.insert(slot, value);
        Ok(value)
    }

    /// Current storage value: dirty tier first, then origin.
    pub fn get_state(&mut self, address: Address, slot: B256) -> Result<U256> {
        self.ensure_loaded(address)?;
        if let Some(value) = self.objects[&address].pending_storage(slot) {
            return Ok(value);
        }
        self.load_origin_slot(address, slot)
    }

    /// Value as of block start, required by SSTORE gas accounting.
    pub fn get_committed_state(&mut self, address: Address, slot: B256) -> Result<U256> {
        self.ensure_loaded(address)?;
        if let Some(value) = self.objects[&address].block_origin_storage.get(&slot) {
            return Ok(*value);
        }
        self.load_origin_slot(address, slot)
    }

    /// Write a storage slot, journaled with the prior dirty-or-origin value.
    pub fn set_state(&mut self, address: Address, slot: B256, value: U256) -> Result<()> {
        let origin = self.load_origin_slot(address, slot)?;
        let object = self.objects.get_mut(&address).expect("loaded");
        let had_dirty = object.dirty_storage.contains_key(&slot);
        let prior = object.dirty_storage.get(&slot).copied().unwrap_or(origin);
        object.block_origin_storage.entry(slot).or_insert(origin);
        object.dirty_storage.insert(slot, value);
        self.journal.append(JournalEntry::StorageChange {
            address,
            slot,
            prior,
            had_dirty,
        });
        Ok(())
    }

    /// Override a slot, bypassing real storage (debug/call overrides).
    pub fn set_fake_state(&mut self, address: Address, slot: B256, value: U256) -> Result<()> {
        let object = self.object(address)?;
        let prior = object.fake_storage.insert(slot, value);
        self.journal.append(JournalEntry::FakeStorageChange {
            address,
            slot,
            prior,
        });
        Ok(())
    }

    /// Transient storage read (EIP-1153).
    pub fn get_transient_state(&self, address: Address, slot: B256) -> U256 {
        self.transient.get(address, slot)
    }

    /// Transient storage write, journaled.
    pub fn set_transient_state(&mut self, address: Address, slot: B256, value: U256) {
        let prior = self.transient.set(address, slot, value);
        self.journal
            .append(JournalEntry::TransientStorage {
                address,
                slot,
                prior,
            });
    }

    /// Create a state object for `address`, keeping any existing balance.
    /// Contract creation over anything worth restoring journals a full
    /// reset; creation out of nothing journals the cheap create mark.
    pub fn create_contract(&mut self, address: Address) -> Result<()> {
        self.touch(address);
        self.ensure_loaded(address)?;
        let existing = self.objects.get(&address).cloned().expect("ensured");
        let nothing_to_restore = existing.fresh
            && !existing.deleted
            && existing.account.is_empty()
            && existing.dirty_storage.is_empty()
            && existing.origin_storage.is_empty();
        if nothing_to_restore {
            self.journal.append(JournalEntry::CreateObject { address });
        } else {
            self.journal.append(JournalEntry::ResetObject {
                address,
                prior: Box::new(existing.clone()),
            });
        }
        let mut object = StateObject::fresh();
        if existing.is_live() {
            object.account.balance = existing.account.balance;
        }
        object.newly_created = true;
        self.objects.insert(address, object);
        Ok(())
    }

    /// Mark for deletion at transaction end. Returns whether the mark was
    /// newly set.
    pub fn self_destruct(&mut self, address: Address) -> Result<bool> {
        self.touch(address);
        let object = self.object(address)?;
        if object.self_destructed {
            return Ok(false);
        }
        self.journal.append(JournalEntry::SelfDestruct {
            address,
            prior_destructed: false,
        });
        self.objects.get_mut(&address).expect("loaded").self_destructed = true;
        Ok(true)
    }

    /// EIP-6780: deletion only applies to contracts created in the same
    /// transaction; otherwise only the mark's balance-sweep side effects
    /// happen (in the EVM).
    pub fn self_destruct_6780(&mut self, address: Address) -> Result<bool> {
        self.ensure_loaded(address)?;
        if self.objects[&address].newly_created {
            return self.self_destruct(address);
        }
        Ok(false)
    }

    /// Append a log, journaled.
    pub fn add_log(&mut self, log: Log) {
        self.journal.append(JournalEntry::AddLog);
        self.logs.push(log);
    }

    /// Logs of the current transaction so far.
    pub fn logs(&self) -> &[Log] {
        &self.logs
    }

    /// Current refund counter.
    pub fn get_refund(&self) -> u64 {
        self.refund
    }

    /// Raise the refund counter, journaled.
    pub fn add_refund(&mut self, amount: u64) {
        self.journal
            .append(JournalEntry::RefundChange { prior: self.refund });
        self.refund += amount;
    }

    /// Lower the refund counter, journaled.
    pub fn sub_refund(&mut self, amount: u64) {
        self.journal
            .append(JournalEntry::RefundChange { prior: self.refund });
        self.refund = self.refund.saturating_sub(amount);
    }

    /// EIP-2929 address access: `(gas, was_cold)`.
    pub fn access_address(&mut self, address: Address) -> (u64, bool) {
        if self.access_list.add_address(address) {
            self.journal
                .append(JournalEntry::AccessListAddress { address });
            (COLD_ACCOUNT_ACCESS_COST, true)
        } else {
            (WARM_STORAGE_READ_COST, false)
        }
    }

    /// EIP-2929 slot access: `(gas, was_cold)`.
    pub fn access_slot(&mut self, address: Address, slot: B256) -> (u64, bool) {
        if self.access_list.add_slot(address, slot) {
            self.journal
                .append(JournalEntry::AccessListSlot { address, slot });
            (COLD_SLOAD_COST, true)
        } else {
            (WARM_STORAGE_READ_COST, false)
        }
    }

    /// Transaction-start warm set: origin, recipient, precompiles, coinbase
    /// (post-Shanghai) and the transaction's declared entries. Not
    /// journaled; it precedes the first snapshot.
    pub fn prepare_access_list(
        &mut self,
        origin: Address,
        to: Option<Address>,
        precompiles: &[Address],
        declared: &[AccessListItem],
        coinbase: Option<Address>,
    ) {
        self.access_list.clear();
        self.access_list.add_address(origin);
        if let Some(to) = to {
            self.access_list.add_address(to);
        }
        for precompile in precompiles {
            self.access_list.add_address(*precompile);
        }
        if let Some(coinbase) = coinbase {
            self.access_list.add_address(coinbase);
        }
        for item in declared {
            self.access_list.add_address(item.address);
            for slot in &item.storage_keys {
                self.access_list.add_slot(item.address, *slot);
            }
        }
    }

    /// Journal position for a later [`Self::revert_to_snapshot`].
    pub fn snapshot(&self) -> usize {
        self.journal.len()
    }

    /// Undo every mutation after `snapshot`, newest first.
    pub fn revert_to_snapshot(&mut self, snapshot: usize) {
        for entry in self.journal.detach_to(snapshot) {
            match entry {
                JournalEntry::CreateObject { address } => {
                    self.objects.remove(&address);
                }
                JournalEntry::ResetObject { address, prior } => {
                    self.objects.insert(address, *prior);
                }
                JournalEntry::SelfDestruct {
                    address,
                    prior_destructed,
                } => {
                    if let Some(object) = self.objects.get_mut(&address) {
                        object.self_destructed = prior_destructed;
                    }
                }
                JournalEntry::BalanceChange { address, prior } => {
                    if let Some(object) = self.objects.get_mut(&address) {
                        object.account.balance = prior;
                    }
                }
                JournalEntry::BalanceIncrease { address, amount } => {
                    if let Some(inc) = self.balance_inc.get_mut(&address) {
                        inc.increase -= amount;
                        if inc.increase.is_zero() && !inc.transferred {
                            self.balance_inc.remove(&address);
                        }
                    }
                }
                JournalEntry::BalanceIncreaseTransfer { address, amount } => {
                    if let Some(object) = self.objects.get_mut(&address) {
                        object.account.balance -= amount;
                    }
                    if let Some(inc) = self.balance_inc.get_mut(&address) {
                        inc.transferred = false;
                    }
                }
                JournalEntry::NonceChange { address, prior } => {
                    if let Some(object) = self.objects.get_mut(&address) {
                        object.account.nonce = prior;
                    }
                }
                JournalEntry::StorageChange {
                    address,
                    slot,
                    prior,
                    had_dirty,
                } => {
                    if let Some(object) = self.objects.get_mut(&address) {
                        if had_dirty {
                            object.dirty_storage.insert(slot, prior);
                        } else {
                            object.dirty_storage.remove(&slot);
                        }
                    }
                }
                JournalEntry::FakeStorageChange {
                    address,
                    slot,
                    prior,
                } => {
                    if let Some(object) = self.objects.get_mut(&address) {
                        match prior {
                            Some(value) => object.fake_storage.insert(slot, value),
                            None => object.fake_storage.remove(&slot),
                        };
                    }
                }
                JournalEntry::CodeChange {
                    address,
                    prior_hash,
                    prior_code,
                } => {
                    if let Some(object) = self.objects.get_mut(&address) {
                        object.account.code_hash = prior_hash;
                        object.code = Some(prior_code);
                    }
                }
                JournalEntry::RefundChange { prior } => {
                    self.refund = prior;
                }
                JournalEntry::AddLog => {
                    self.logs.pop();
                }
                JournalEntry::Touch { address, prior } => {
                    // The RIPEMD precompile stays touched even across
                    // reverts, a mainnet consensus quirk.
                    if !prior && address != RIPEMD_ADDRESS {
                        self.touched.remove(&address);
                    }
                }
                JournalEntry::AccessListAddress { address } => {
                    self.access_list.remove_address(address);
                }
                JournalEntry::AccessListSlot { address, slot } => {
                    self.access_list.remove_slot(address, slot);
                }
                JournalEntry::TransientStorage {
                    address,
                    slot,
                    prior,
                } => {
                    self.transient.set(address, slot, prior);
                }
            }
        }
    }

    /// Settle the current transaction: fold pending increases, prune
    /// empty-touched accounts, apply self-destructs, emit the transaction's
    /// [`StateWrite`]s at `txnum`, and clear the per-transaction structures.
    pub fn finalize(&mut self, txnum: u64, prune_empty: bool) -> Result<()> {
        let mut candidate_set: FxHashSet<Address> = self.journal.dirty_addresses().collect();
        candidate_set.extend(self.touched.iter().copied());
        candidate_set.extend(self.balance_inc.keys().copied());
        let mut candidates: Vec<Address> = candidate_set.into_iter().collect();
        candidates.sort_unstable();

        for address in candidates.iter().copied().collect::<Vec<_>>() {
            if self.balance_inc.get(&address).is_some_and(|i| !i.transferred) {
                self.ensure_loaded(address)?;
            }
        }

        // EIP-161 pruning and self-destruct settlement.
        for address in &candidates {
            let Some(object) = self.objects.get_mut(address) else {
                continue;
            };
            if object.deleted {
                continue;
            }
            let prune = object.self_destructed
                || (prune_empty && self.touched.contains(address) && object.is_empty()
                    && !object.fresh);
            let prune_fresh_empty =
                prune_empty && self.touched.contains(address) && object.is_empty() && object.fresh;
            if prune {
                object.deleted = true;
            } else if prune_fresh_empty {
                // Never persisted and still empty: nothing to delete.
                object.deleted = true;
                object.fresh = true;
            }
        }

        // Emit writes where the settled value differs from the last
        // persisted one.
        for address in &candidates {
            let Some(object) = self.objects.get(address) else {
                continue;
            };
            let current = object.is_live().then_some(object.account);
            let baseline = match self.emitted_accounts.get(address) {
                Some(value) => *value,
                None => self.reader.read_account(*address)?,
            };
            if current != baseline && !(current.is_none() && baseline.is_none()) {
                self.writes.push(StateWrite::Account {
                    address: *address,
                    txnum,
                    account: current,
                });
            }
            self.emitted_accounts.insert(*address, current);

            let mut slots: Vec<(B256, U256)> = object
                .dirty_storage
                .iter()
                .map(|(slot, value)| (*slot, *value))
                .collect();
            slots.sort_unstable_by_key(|(slot, _)| *slot);
            let gone = !object.is_live();
            for (slot, value) in slots {
                let value = if gone { U256::ZERO } else { value };
                let baseline = match self.emitted_slots.get(&(*address, slot)) {
                    Some(value) => *value,
                    None => self.reader.read_storage(*address, slot)?,
                };
                if value != baseline {
                    self.writes.push(StateWrite::Storage {
                        address: *address,
                        slot,
                        txnum,
                        value,
                    });
                }
                self.emitted_slots.insert((*address, slot), value);
            }
        }
        for (code_hash, code) in self.new_code.drain(..) {
            self.writes.push(StateWrite::Code {
                code_hash,
                txnum,
                code,
            });
        }

        // Reset deleted objects to absent and drop per-transaction state.
        for object in self.objects.values_mut() {
            if object.deleted {
                *object = StateObject {
                    deleted: true,
                    ..StateObject::fresh()
                };
            }
            object.newly_created = false;
            object.self_destructed = false;
        }
        self.journal.clear();
        self.access_list.clear();
        self.transient.clear();
        self.logs.clear();
        self.refund = 0;
        // Every increase is settled by now and the journal that could
        // reference the map is gone.
        self.balance_inc.clear();
        self.touched.clear();
        Ok(())
    }

    /// Drain the buffered writes of all finalized transactions, in order.
    pub fn take_writes(&mut self) -> Vec<StateWrite> {
        std::mem::take(&mut self.writes)
    }

    /// Whether `address` is dirtied by a live journal entry.
    pub fn is_dirty(&self, address: Address) -> bool {
        self.journal.is_dirty(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EmptyReader;
    use proptest::prelude::*;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[derive(Clone, Debug, Default)]
    struct FixtureReader {
        accounts: std::collections::HashMap<Address, Account>,
        storage: std::collections::HashMap<(Address, B256), U256>,
    }

    impl StateReader for FixtureReader {
        fn read_account(&self, address: Address) -> Result<Option<Account>> {
            Ok(self.accounts.get(&address).copied())
        }
        fn read_storage(&self, address: Address, slot: B256) -> Result<U256> {
            Ok(self
                .storage
                .get(&(address, slot))
                .copied()
                .unwrap_or(U256::ZERO))
        }
        fn read_code(&self, code_hash: B256) -> Result<Bytes> {
            Err(crate::StateError::MissingCode(code_hash))
        }
    }

    #[test]
    fn revert_restores_balances_and_nonces() {
        let mut state = IntraBlockState::new(EmptyReader);
        let a = addr(1);
        state.add_balance(a, U256::from(100)).unwrap();
        // Force a load so further changes go through the object.
        assert_eq!(state.get_balance(a).unwrap(), U256::from(100));
        let snapshot = state.snapshot();
        state.sub_balance(a, U256::from(30)).unwrap();
        state.set_nonce(a, 5).unwrap();
        assert_eq!(state.get_balance(a).unwrap(), U256::from(70));

        state.revert_to_snapshot(snapshot);
        assert_eq!(state.get_balance(a).unwrap(), U256::from(100));
        assert_eq!(state.get_nonce(a).unwrap(), 0);
        // Reverting twice is a no-op.
        state.revert_to_snapshot(snapshot);
        assert_eq!(state.get_balance(a).unwrap(), U256::from(100));
    }

    #[test]
    fn revert_to_zero_restores_pristine_state() {
        let mut state = IntraBlockState::new(EmptyReader);
        let a = addr(1);
        let slot = B256::repeat_byte(9);
        state.add_balance(a, U256::from(1)).unwrap();
        state.set_state(a, slot, U256::from(3)).unwrap();
        state.set_transient_state(a, slot, U256::from(4));
        state.add_log(Log::default());
        state.add_refund(10);

        state.revert_to_snapshot(0);
        assert_eq!(state.get_state(a, slot).unwrap(), U256::ZERO);
        assert_eq!(state.get_transient_state(a, slot), U256::ZERO);
        assert_eq!(state.logs().len(), 0);
        assert_eq!(state.get_refund(), 0);
        assert_eq!(state.get_balance(a).unwrap(), U256::ZERO);
        assert!(!state.is_dirty(a));
    }

    #[test]
    fn storage_tiers_and_committed_state() {
        let mut reader = FixtureReader::default();
        let a = addr(1);
        let slot = B256::repeat_byte(2);
        reader.accounts.insert(a, Account::default());
        reader.storage.insert((a, slot), U256::from(10));

        let mut state = IntraBlockState::new(reader);
        assert_eq!(state.get_state(a, slot).unwrap(), U256::from(10));
        state.set_state(a, slot, U256::from(20)).unwrap();
        state.set_state(a, slot, U256::from(30)).unwrap();
        // Committed state pins the block-start value across writes.
        assert_eq!(state.get_state(a, slot).unwrap(), U256::from(30));
        assert_eq!(state.get_committed_state(a, slot).unwrap(), U256::from(10));
    }

    #[test]
    fn access_list_warm_cold_cycle() {
        let mut state = IntraBlockState::new(EmptyReader);
        let a = addr(0xbb);
        let snapshot = state.snapshot();
        assert_eq!(state.access_address(a), (COLD_ACCOUNT_ACCESS_COST, true));
        assert_eq!(state.access_address(a), (WARM_STORAGE_READ_COST, false));
        state.revert_to_snapshot(snapshot);
        assert_eq!(state.access_address(a), (COLD_ACCOUNT_ACCESS_COST, true));

        let slot = B256::repeat_byte(1);
        assert_eq!(state.access_slot(a, slot), (COLD_SLOAD_COST, true));
        assert_eq!(state.access_slot(a, slot), (WARM_STORAGE_READ_COST, false));
    }

    #[test]
    fn prepare_access_list_prewarms() {
        let mut state = IntraBlockState::new(EmptyReader);
        let origin = addr(1);
        let to = addr(2);
        let precompile = addr(3);
        let coinbase = addr(4);
        let listed = addr(5);
        let slot = B256::repeat_byte(6);
        state.prepare_access_list(
            origin,
            Some(to),
            &[precompile],
            &[AccessListItem {
                address: listed,
                storage_keys: vec![slot],
            }],
            Some(coinbase),
        );
        for address in [origin, to, precompile, coinbase, listed] {
            assert_eq!(
                state.access_address(address),
                (WARM_STORAGE_READ_COST, false)
            );
        }
        assert_eq!(state.access_slot(listed, slot), (WARM_STORAGE_READ_COST, false));
        assert_eq!(state.access_slot(listed, B256::ZERO), (COLD_SLOAD_COST, true));
    }

    #[test]
    fn finalize_emits_minimal_writes() {
        let mut reader = FixtureReader::default();
        let funded = addr(1);
        reader.accounts.insert(
            funded,
            Account {
                balance: U256::from(1000),
                ..Default::default()
            },
        );
        let mut state = IntraBlockState::new(reader);
        let receiver = addr(2);

        state.sub_balance(funded, U256::from(100)).unwrap();
        state.set_nonce(funded, 1).unwrap();
        state.add_balance(receiver, U256::from(100)).unwrap();
        state.finalize(7, true).unwrap();

        let writes = state.take_writes();
        assert_eq!(writes.len(), 2);
        assert!(writes.contains(&StateWrite::Account {
            address: funded,
            txnum: 7,
            account: Some(Account {
                nonce: 1,
                balance: U256::from(900),
                ..Default::default()
            }),
        }));
        assert!(writes.contains(&StateWrite::Account {
            address: receiver,
            txnum: 7,
            account: Some(Account {
                balance: U256::from(100),
                ..Default::default()
            }),
        }));

        // An untouched second transaction emits nothing.
        state.finalize(8, true).unwrap();
        assert!(state.take_writes().is_empty());
    }

    #[test]
    fn reverted_transaction_emits_nothing() {
        let mut state = IntraBlockState::new(EmptyReader);
        let a = addr(1);
        let snapshot = state.snapshot();
        state.add_balance(a, U256::from(5)).unwrap();
        state.set_state(a, B256::ZERO, U256::from(1)).unwrap();
        state.revert_to_snapshot(snapshot);
        state.finalize(3, true).unwrap();
        assert!(state.take_writes().is_empty());
    }

    #[test]
    fn empty_touched_accounts_are_pruned() {
        let mut reader = FixtureReader::default();
        let empty = addr(9);
        reader.accounts.insert(empty, Account::default());
        let mut state = IntraBlockState::new(reader);

        // A zero-value transfer touches without changing anything.
        state.add_balance(empty, U256::ZERO).unwrap();
        state.finalize(1, true).unwrap();
        let writes = state.take_writes();
        assert_eq!(
            writes,
            vec![StateWrite::Account {
                address: empty,
                txnum: 1,
                account: None,
            }]
        );
        assert!(!state.exist(empty).unwrap());
    }

    #[test]
    fn self_destruct_6780_only_same_tx_creations() {
        let mut reader = FixtureReader::default();
        let old = addr(1);
        reader.accounts.insert(
            old,
            Account {
                balance: U256::from(5),
                ..Default::default()
            },
        );
        let mut state = IntraBlockState::new(reader);

        assert!(!state.self_destruct_6780(old).unwrap());

        let fresh = addr(2);
        state.create_contract(fresh).unwrap();
        assert!(state.self_destruct_6780(fresh).unwrap());
        state.finalize(1, true).unwrap();
        assert!(!state.exist(fresh).unwrap());
        assert!(state.exist(old).unwrap());
    }

    #[test]
    fn coalesced_increases_settle_without_loads() {
        let mut state = IntraBlockState::new(EmptyReader);
        let coinbase = addr(0xcc);
        state.add_balance(coinbase, U256::from(10)).unwrap();
        state.add_balance(coinbase, U256::from(5)).unwrap();
        state.finalize(2, true).unwrap();
        let writes = state.take_writes();
        assert_eq!(
            writes,
            vec![StateWrite::Account {
                address: coinbase,
                txnum: 2,
                account: Some(Account {
                    balance: U256::from(15),
                    ..Default::default()
                }),
            }]
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]
        #[test]
        fn journal_full_revert_is_identity(ops in proptest::collection::vec(0u8..6, 1..40)) {
            let mut state = IntraBlockState::new(EmptyReader);
            let a = addr(1);
            // Pin a baseline value.
            state.add_balance(a, U256::from(1000)).unwrap();
            state.get_balance(a).unwrap();
            let snapshot = state.snapshot();

            for (i, op) in ops.iter().enumerate() {
                let slot = B256::repeat_byte(*op);
                match op % 6 {
                    0 => state.add_balance(a, U256::from(i as u64 + 1)).unwrap(),
                    1 => state.sub_balance(a, U256::from(1)).unwrap(),
                    2 => state.set_state(a, slot, U256::from(i as u64)).unwrap(),
                    3 => state.set_transient_state(a, slot, U256::from(i as u64)),
                    4 => { state.access_address(addr(*op)); },
                    _ => state.set_nonce(a, i as u64).unwrap(),
                }
            }
            state.revert_to_snapshot(snapshot);

            prop_assert_eq!(state.get_balance(a).unwrap(), U256::from(1000));
            prop_assert_eq!(state.get_nonce(a).unwrap(), 0);
            for byte in 0u8..6 {
                let slot = B256::repeat_byte(byte);
                prop_assert_eq!(state.get_state(a, slot).unwrap(), U256::ZERO);
                prop_assert_eq!(state.get_transient_state(a, slot), U256::ZERO);
            }
            // Nothing to persist after a full revert.
            state.finalize(0, true).unwrap();
            let writes = state.take_writes();
            prop_assert!(writes.iter().all(|w| !matches!(
                w,
                StateWrite::Storage { .. }
            )), "expected no storage writes");
        }
    }
}
