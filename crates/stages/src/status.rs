use crate::{
    Domains, Result, StageError, StageId, read_progress,
    reader::storage_key,
    stages::{block_key, max_txnum, read_body, read_header},
};
use sse_kv::{RoTx, Table};
use sse_primitives::{Account, Address, B256, Block, BlockNumber, U256};

/// Consumer-facing snapshot of pipeline progress.
#[derive(Clone, Debug)]
pub struct SyncStatus {
    /// Current progress of every stage, in pipeline order.
    pub stages: Vec<(StageId, BlockNumber)>,
    /// Highest block the header chain knows.
    pub known_head: BlockNumber,
    /// Fully processed head.
    pub head: BlockNumber,
}

/// Per-stage progress and the current heads.
pub fn sync_status(tx: &impl RoTx) -> Result<SyncStatus> {
    let mut stages = Vec::with_capacity(StageId::ORDER.len());
    for stage in StageId::ORDER {
        stages.push((stage, read_progress(tx, stage)?));
    }
    Ok(SyncStatus {
        known_head: read_progress(tx, StageId::Headers)?,
        head: read_progress(tx, StageId::Finish)?,
        stages,
    })
}

/// The processed head: number and canonical hash.
pub fn head(tx: &impl RoTx) -> Result<(BlockNumber, B256)> {
    let number = read_progress(tx, StageId::Finish)?;
    let hash = tx
        .get(Table::CanonicalHashes, &block_key(number))?
        .ok_or(StageError::MissingData {
            number,
            what: "canonical hash",
        })?;
    Ok((number, B256::from_slice(&hash)))
}

/// Full block by height, when both header and body are stored.
pub fn block_by_number(tx: &impl RoTx, number: BlockNumber) -> Result<Option<Block>> {
    if tx.get(Table::Headers, &block_key(number))?.is_none() {
        return Ok(None);
    }
    Ok(Some(Block {
        header: read_header(tx, number)?,
        body: read_body(tx, number)?,
    }))
}

/// Account state as of the end of `block`, through the time-travel index.
pub fn state_at(
    tx: &impl RoTx,
    domains: &Domains,
    address: Address,
    block: BlockNumber,
) -> Result<Option<Account>> {
    let txnum = max_txnum(tx, block)?;
    match domains.accounts.get_as_of(tx, address.as_slice(), txnum)? {
        Some(payload) => Ok(Some(
            Account::decode_flat(&payload).map_err(|_| StageError::Decode("flat account"))?,
        )),
        None => Ok(None),
    }
}

/// Storage slot value as of the end of `block`.
pub fn storage_at(
    tx: &impl RoTx,
    domains: &Domains,
    address: Address,
    slot: B256,
    block: BlockNumber,
) -> Result<U256> {
    let txnum = max_txnum(tx, block)?;
    Ok(domains
        .storage
        .get_as_of(tx, &storage_key(address, slot), txnum)?
        .map(|payload| U256::from_be_slice(&payload))
        .unwrap_or(U256::ZERO))
}
