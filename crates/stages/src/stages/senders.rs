use crate::{
    BadBlockReason, ExecOutput, Result, Stage, StageContext, StageError, StageId, StageInput,
    read_progress,
    stages::{block_key, read_body},
};
use rayon::prelude::*;
use sse_kv::{RwTx, Table};
use sse_primitives::BlockNumber;

/// Recovers transaction senders from signatures and stores them per block
/// as concatenated addresses. Recovery is embarrassingly parallel and runs
/// on a worker pool; all writes stay on the stage transaction.
#[derive(Debug, Default)]
pub struct SendersStage;

impl<TX: RwTx> Stage<TX> for SendersStage {
    fn id(&self) -> StageId {
        StageId::Senders
    }

    fn execute(
        &mut self,
        ctx: &StageContext<'_>,
        tx: &mut TX,
        input: StageInput,
    ) -> Result<ExecOutput> {
        let mut progress = input.from;
        let target = input.target.min(read_progress(tx, StageId::Bodies)?);

        while progress < target {
            if ctx.aborted() {
                return Err(StageError::Shutdown);
            }
            let number = progress + 1;
            let body = read_body(tx, number)?;

            let recovered: std::result::Result<Vec<_>, _> = body
                .transactions
                .par_iter()
                .map(|tx| tx.recover_sender())
                .collect();
            let senders = recovered.map_err(|_| StageError::InvalidBlock {
                number,
                reason: BadBlockReason::SenderRecovery,
            })?;

            let mut row = Vec::with_capacity(senders.len() * 20);
            for sender in senders {
                row.extend_from_slice(sender.as_slice());
            }
            tx.put(Table::Senders, &block_key(number), &row)?;
            progress = number;
        }
        tracing::debug!(progress, target, "senders advanced");
        Ok(ExecOutput {
            progress,
            done: true,
        })
    }

    fn unwind(&mut self, _ctx: &StageContext<'_>, tx: &mut TX, to: BlockNumber) -> Result<()> {
        let progress = read_progress(tx, StageId::Senders)?;
        for number in (to + 1..=progress).rev() {
            tx.delete(Table::Senders, &block_key(number))?;
        }
        Ok(())
    }
}
