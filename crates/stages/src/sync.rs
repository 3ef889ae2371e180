use crate::{
    AnyStage, ExecOutput, Result, Stage, StageContext, StageError, StageId, StageInput,
    read_progress, save_progress,
};
use sse_kv::{Kv, RwTx};
use sse_primitives::BlockNumber;

/// How many times the same block may be re-attempted after an unwind before
/// the failure is surfaced to the operator.
const MAX_RETRIES: u32 = 3;

enum Round {
    Done(BlockNumber),
    Retry,
}

/// The staged-sync coordinator: owns the ordered stage list, advances every
/// stage toward a target with one commit per stage, and converts invalid
/// blocks and reorganizations into reverse-order unwinds.
#[derive(Debug)]
pub struct Pipeline {
    stages: Vec<AnyStage>,
    last_failure: Option<(BlockNumber, u32)>,
}

impl Pipeline {
    /// A pipeline over the canonical stage order.
    pub fn new(stages: Vec<AnyStage>) -> Self {
        Self {
            stages,
            last_failure: None,
        }
    }

    /// Drive every stage to `target` (or as far as the source allows),
    /// handling unwinds, and return the committed head. Re-enters stages
    /// that report `done = false` and repeats rounds after unwinds.
    pub fn run_to<K: Kv>(
        &mut self,
        store: &K,
        ctx: &StageContext<'_>,
        target: BlockNumber,
    ) -> Result<BlockNumber> {
        loop {
            match self.round(store, ctx, target)? {
                Round::Done(head) => {
                    self.last_failure = None;
                    return Ok(head);
                }
                Round::Retry => continue,
            }
        }
    }

    fn note_failure(&mut self, number: BlockNumber) -> Result<()> {
        let count = match self.last_failure {
            Some((failed, count)) if failed == number => count + 1,
            _ => 1,
        };
        if count > MAX_RETRIES {
            return Err(StageError::InvalidBlock {
                number,
                reason: crate::BadBlockReason::InvalidHeader("persistent failure"),
            });
        }
        self.last_failure = Some((number, count));
        Ok(())
    }

    fn round<K: Kv>(
        &mut self,
        store: &K,
        ctx: &StageContext<'_>,
        target: BlockNumber,
    ) -> Result<Round> {
        for index in 0..self.stages.len() {
            loop {
                let mut tx = store.begin_rw()?;
                let stage = &mut self.stages[index];
                let id = stage.id();
                let from = read_progress(&tx, id)?;
                let outcome = stage.execute(ctx, &mut tx, StageInput { from, target });
                let ExecOutput { progress, done } = match outcome {
                    Ok(output) => output,
                    Err(StageError::InvalidBlock { number, reason }) => {
                        tx.abort();
                        tracing::warn!(number, ?reason, stage = id.name(), "invalid block, unwinding");
                        self.note_failure(number)?;
                        self.unwind(store, ctx, number.saturating_sub(1))?;
                        return Ok(Round::Retry);
                    }
                    Err(StageError::Reorg { ancestor }) => {
                        tx.abort();
                        tracing::info!(ancestor, "reorg, unwinding");
                        self.note_failure(ancestor + 1)?;
                        self.unwind(store, ctx, ancestor)?;
                        return Ok(Round::Retry);
                    }
                    Err(error) => {
                        tx.abort();
                        return Err(error);
                    }
                };
                // Progress advances inside the same transaction as the
                // stage's writes, so a crash resumes exactly here.
                if progress != from {
                    save_progress(&mut tx, id, progress)?;
                }
                tx.commit()?;
                if done {
                    break;
                }
            }
        }
        let tx = store.begin_ro()?;
        let head = read_progress(&tx, StageId::Finish)?;
        Ok(Round::Done(head))
    }

    /// Unwind every stage that progressed past `to`, in reverse order.
    pub fn unwind<K: Kv>(
        &mut self,
        store: &K,
        ctx: &StageContext<'_>,
        to: BlockNumber,
    ) -> Result<()> {
        for index in (0..self.stages.len()).rev() {
            let mut tx = store.begin_rw()?;
            let stage = &mut self.stages[index];
            let id = stage.id();
            let progress = read_progress(&tx, id)?;
            if progress <= to {
                tx.abort();
                continue;
            }
            stage.unwind(ctx, &mut tx, to)?;
            save_progress(&mut tx, id, to)?;
            tx.commit()?;
            tracing::debug!(stage = id.name(), to, "stage unwound");
        }
        Ok(())
    }
}
