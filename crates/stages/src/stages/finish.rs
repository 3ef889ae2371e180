use crate::{
    ExecOutput, Result, Stage, StageContext, StageId, StageInput, read_progress,
};
use sse_kv::RwTx;
use sse_primitives::BlockNumber;

/// Advances the canonical head pointer: its progress marker is the global
/// head the consumer-facing APIs serve from.
#[derive(Debug, Default)]
pub struct FinishStage;

impl<TX: RwTx> Stage<TX> for FinishStage {
    fn id(&self) -> StageId {
        StageId::Finish
    }

    fn execute(
        &mut self,
        _ctx: &StageContext<'_>,
        tx: &mut TX,
        input: StageInput,
    ) -> Result<ExecOutput> {
        let progress = input.target.min(read_progress(tx, StageId::TxLookup)?);
        Ok(ExecOutput {
            progress: progress.max(input.from),
            done: true,
        })
    }

    fn unwind(&mut self, _ctx: &StageContext<'_>, _tx: &mut TX, _to: BlockNumber) -> Result<()> {
        Ok(())
    }
}
