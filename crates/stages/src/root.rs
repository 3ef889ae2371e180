use crate::{Domains, Result, StageError};
use sse_kv::RoTx;
use sse_primitives::{Account, Address, B256, U256};
use std::collections::BTreeMap;

/// World state root rebuilt from the flat domains.
///
/// A full sparse-trie rebuild over the latest account and storage values;
/// the representation is encapsulated here so an incremental commitment
/// domain can replace it without touching the execution stage.
pub fn compute_state_root(tx: &impl RoTx, domains: &Domains) -> Result<B256> {
    // Group live storage by owning account.
    let mut storage_by_account: BTreeMap<Address, Vec<(B256, U256)>> = BTreeMap::new();
    for (key, payload) in domains.storage.iter_latest(tx)? {
        if key.len() != 52 {
            return Err(StageError::Decode("storage domain key width"));
        }
        let address = Address::from_slice(&key[..20]);
        let slot = B256::from_slice(&key[20..]);
        let value = U256::from_be_slice(&payload);
        if !value.is_zero() {
            storage_by_account.entry(address).or_default().push((slot, value));
        }
    }

    let mut accounts = Vec::new();
    for (key, payload) in domains.accounts.iter_latest(tx)? {
        if key.len() != 20 {
            return Err(StageError::Decode("account domain key width"));
        }
        let address = Address::from_slice(&key);
        let account =
            Account::decode_flat(&payload).map_err(|_| StageError::Decode("flat account"))?;
        let storage_root = match storage_by_account.remove(&address) {
            Some(slots) => sse_trie::storage_root(slots)?,
            None => sse_primitives::EMPTY_ROOT_HASH,
        };
        accounts.push((address, account, storage_root));
    }
    Ok(sse_trie::state_root(accounts)?)
}
