use crate::{Node, Result};
use alloy_primitives::{Address, B256, U256, keccak256};
use alloy_rlp::Encodable;
use sse_primitives::Account;

/// Root of the index-keyed ordered trie over pre-encoded items
/// (transactions, receipts, withdrawals).
pub fn ordered_trie_root<I>(items: I) -> Result<B256>
where
    I: IntoIterator<Item = Vec<u8>>,
{
    let mut trie = Node::default();
    for (index, item) in items.into_iter().enumerate() {
        trie.insert(&alloy_rlp::encode(index), item)?;
    }
    Ok(trie.hash())
}

/// Storage root of one account from its slot values. Zero-valued slots must
/// not be passed in.
pub fn storage_root<I>(slots: I) -> Result<B256>
where
    I: IntoIterator<Item = (B256, U256)>,
{
    let mut trie = Node::default();
    for (slot, value) in slots {
        debug_assert!(!value.is_zero());
        trie.insert(keccak256(slot).as_slice(), alloy_rlp::encode(value))?;
    }
    Ok(trie.hash())
}

/// World state root over `(address, account, storage_root)` triples.
pub fn state_root<I>(accounts: I) -> Result<B256>
where
    I: IntoIterator<Item = (Address, Account, B256)>,
{
    let mut trie = Node::default();
    for (address, account, storage_root) in accounts {
        trie.insert(
            keccak256(address).as_slice(),
            account.rlp_with_storage_root(storage_root),
        )?;
    }
    Ok(trie.hash())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, b256};
    use alloy_trie::EMPTY_ROOT_HASH;
    use sse_primitives::KECCAK_EMPTY;

    #[test]
    fn empty_roots_are_canonical() {
        assert_eq!(ordered_trie_root(Vec::new()).unwrap(), EMPTY_ROOT_HASH);
        assert_eq!(storage_root(Vec::new()).unwrap(), EMPTY_ROOT_HASH);
        assert_eq!(state_root(Vec::new()).unwrap(), EMPTY_ROOT_HASH);
    }

    #[test]
    fn single_account_state_root() {
        // One externally-owned account with one wei; checked against the
        // standard single-leaf construction.
        let address = address!("0000000000000000000000000000000000000001");
        let account = Account {
            nonce: 0,
            balance: U256::from(1),
            code_hash: KECCAK_EMPTY,
        };
        let root = state_root([(address, account, EMPTY_ROOT_HASH)]).unwrap();

        let mut reference = Node::default();
        reference
            .insert(
                keccak256(address).as_slice(),
                account.rlp_with_storage_root(EMPTY_ROOT_HASH),
            )
            .unwrap();
        assert_eq!(root, reference.hash());
        assert_ne!(root, EMPTY_ROOT_HASH);
    }

    #[test]
    fn ordered_root_depends_on_order() {
        let a = ordered_trie_root([vec![1u8], vec![2u8]]).unwrap();
        let b = ordered_trie_root([vec![2u8], vec![1u8]]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn storage_root_is_keyed_by_hashed_slot() {
        let root = storage_root([(
            b256!("0000000000000000000000000000000000000000000000000000000000000001"),
            U256::from(42),
        )])
        .unwrap();
        assert_ne!(root, EMPTY_ROOT_HASH);
    }
}
