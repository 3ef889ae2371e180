use crate::{Result, StageContext, compute_state_root, reader::storage_key};
use alloy_rlp::Encodable;
use sse_kv::{Kv, RwTx, Table};
use sse_primitives::{
    Address, BlockBody, Bytes, Header, SealedHeader, U256, keccak256,
};

/// One genesis allocation entry.
#[derive(Clone, Debug, Default)]
pub struct GenesisAccount {
    /// Allocated address.
    pub address: Address,
    /// Initial balance.
    pub balance: U256,
    /// Initial nonce.
    pub nonce: u64,
    /// Predeployed code.
    pub code: Option<Bytes>,
    /// Preset storage slots.
    pub storage: Vec<(sse_primitives::B256, U256)>,
}

/// Seed block zero: write the allocation into the domains at transaction
/// number zero, derive the genesis state root, and persist the sealed
/// genesis header with an empty body.
///
/// `template` carries everything but the state root, which is overwritten
/// with the derived one.
pub fn init_genesis<K: Kv>(
    store: &K,
    ctx: &StageContext<'_>,
    mut template: Header,
    alloc: &[GenesisAccount],
) -> Result<SealedHeader> {
    let mut tx = store.begin_rw()?;

    for entry in alloc {
        let mut account = sse_primitives::Account {
            nonce: entry.nonce,
            balance: entry.balance,
            ..Default::default()
        };
        if let Some(code) = &entry.code {
            account.code_hash = keccak256(code);
            ctx.domains
                .code
                .put(&mut tx, account.code_hash.as_slice(), code, 0)?;
        }
        ctx.domains
            .accounts
            .put(&mut tx, entry.address.as_slice(), &account.encode_flat(), 0)?;
        for (slot, value) in &entry.storage {
            ctx.domains.storage.put(
                &mut tx,
                &storage_key(entry.address, *slot),
                &value.to_be_bytes_trimmed_vec(),
                0,
            )?;
        }
    }

    template.number = 0;
    template.state_root = compute_state_root(&tx, ctx.domains)?;
    let sealed = template.seal();

    let number_key = 0u64.to_be_bytes();
    let mut header_rlp = Vec::new();
    sealed.header().encode(&mut header_rlp);
    tx.put(Table::Headers, &number_key, &header_rlp)?;
    tx.put(Table::HeaderNumbers, sealed.hash().as_slice(), &number_key)?;
    tx.put(Table::CanonicalHashes, &number_key, sealed.hash().as_slice())?;
    tx.put(Table::Bodies, &number_key, &alloy_rlp::encode(BlockBody::default()))?;
    tx.put(Table::Senders, &number_key, &[])?;
    // Block zero reserves its two system transaction slots.
    tx.put(Table::MaxTxNum, &number_key, &1u64.to_be_bytes())?;

    tx.commit()?;
    Ok(sealed)
}
