use crate::{
    ExecOutput, Result, Stage, StageContext, StageError, StageId, StageInput, read_progress,
    stages::{block_key, read_body},
};
use sse_kv::{RwTx, Table};
use sse_primitives::BlockNumber;

/// Maintains the `tx_hash -> block_number` lookup index.
#[derive(Debug, Default)]
pub struct TxLookupStage;

impl<TX: RwTx> Stage<TX> for TxLookupStage {
    fn id(&self) -> StageId {
        StageId::TxLookup
    }

    fn execute(
        &mut self,
        ctx: &StageContext<'_>,
        tx: &mut TX,
        input: StageInput,
    ) -> Result<ExecOutput> {
        let mut progress = input.from;
        let target = input.target.min(read_progress(tx, StageId::Execution)?);
        while progress < target {
            if ctx.aborted() {
                return Err(StageError::Shutdown);
            }
            let number = progress + 1;
            let body = read_body(tx, number)?;
            for transaction in &body.transactions {
                tx.put(
                    Table::TxLookup,
                    transaction.hash().as_slice(),
                    &block_key(number),
                )?;
            }
            progress = number;
        }
        Ok(ExecOutput {
            progress,
            done: true,
        })
    }

    fn unwind(&mut self, _ctx: &StageContext<'_>, tx: &mut TX, to: BlockNumber) -> Result<()> {
        let progress = read_progress(tx, StageId::TxLookup)?;
        for number in (to + 1..=progress).rev() {
            let body = read_body(tx, number)?;
            for transaction in &body.transactions {
                tx.delete(Table::TxLookup, transaction.hash().as_slice())?;
            }
        }
        Ok(())
    }
}
