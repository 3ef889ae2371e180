//! The six pipeline stages.

mod bodies;
mod execution;
mod finish;
mod headers;
mod senders;
mod tx_lookup;

pub use bodies::BodiesStage;
pub use execution::ExecutionStage;
pub use finish::FinishStage;
pub use headers::HeadersStage;
pub use senders::SendersStage;
pub use tx_lookup::TxLookupStage;

use crate::{Result, StageError};
use alloy_rlp::Decodable;
use sse_kv::{RoTx, Table};
use sse_primitives::{Address, BlockBody, BlockNumber, Header, TxNumber};

pub(crate) fn block_key(number: BlockNumber) -> [u8; 8] {
    number.to_be_bytes()
}

pub(crate) fn read_header(tx: &impl RoTx, number: BlockNumber) -> Result<Header> {
    let bytes = tx
        .get(Table::Headers, &block_key(number))?
        .ok_or(StageError::MissingData {
            number,
            what: "header",
        })?;
    Ok(Header::decode(&mut bytes.as_slice())?)
}

pub(crate) fn read_body(tx: &impl RoTx, number: BlockNumber) -> Result<BlockBody> {
    let bytes = tx
        .get(Table::Bodies, &block_key(number))?
        .ok_or(StageError::MissingData {
            number,
            what: "body",
        })?;
    Ok(BlockBody::decode(&mut bytes.as_slice())?)
}

pub(crate) fn read_senders(tx: &impl RoTx, number: BlockNumber) -> Result<Vec<Address>> {
    let bytes = tx
        .get(Table::Senders, &block_key(number))?
        .ok_or(StageError::MissingData {
            number,
            what: "senders",
        })?;
    if bytes.len() % 20 != 0 {
        return Err(StageError::Decode("senders row width"));
    }
    Ok(bytes.chunks_exact(20).map(Address::from_slice).collect())
}

/// Last transaction number assigned to `number`, including its trailing
/// system slot.
pub(crate) fn max_txnum(tx: &impl RoTx, number: BlockNumber) -> Result<TxNumber> {
    let bytes = tx
        .get(Table::MaxTxNum, &block_key(number))?
        .ok_or(StageError::MissingData {
            number,
            what: "max txnum",
        })?;
    let array: [u8; 8] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| StageError::Decode("max txnum width"))?;
    Ok(u64::from_be_bytes(array))
}
