use crate::{
    BadBlockReason, ExecOutput, Result, SharedSource, Stage, StageContext, StageError, StageId,
    StageInput, read_progress,
    stages::{block_key, max_txnum, read_header},
};
use sse_kv::{RwTx, Table};
use sse_primitives::{BlockBody, BlockNumber, EMPTY_ROOT_HASH};

/// Fetches bodies and verifies them against the stored headers: transaction
/// root, ommer hash (at most two ommers), withdrawals root. Also assigns
/// the per-block transaction-number range.
#[derive(Debug)]
pub struct BodiesStage {
    source: SharedSource,
}

impl BodiesStage {
    /// A bodies stage over `source`.
    pub fn new(source: SharedSource) -> Self {
        Self { source }
    }

    fn verify(body: &BlockBody, header: &sse_primitives::Header) -> Result<(), &'static str> {
        if body.ommers.len() > 2 {
            return Err("more than two ommers");
        }
        if body.ommers_hash() != header.ommers_hash {
            return Err("ommer hash mismatch");
        }
        let tx_root = sse_trie::ordered_trie_root(
            body.transactions.iter().map(|tx| tx.encoded_canonical()),
        )
        .map_err(|_| "transactions root")?;
        if tx_root != header.transactions_root {
            return Err("transactions root mismatch");
        }
        match (&body.withdrawals, header.withdrawals_root) {
            (None, None) => {}
            (Some(withdrawals), Some(expected)) => {
                let root = sse_trie::ordered_trie_root(
                    withdrawals.iter().map(alloy_rlp::encode),
                )
                .map_err(|_| "withdrawals root")?;
                if root != expected {
                    return Err("withdrawals root mismatch");
                }
            }
            _ => return Err("withdrawals presence mismatch"),
        }
        Ok(())
    }
}

impl<TX: RwTx> Stage<TX> for BodiesStage {
    fn id(&self) -> StageId {
        StageId::Bodies
    }

    fn execute(
        &mut self,
        ctx: &StageContext<'_>,
        tx: &mut TX,
        input: StageInput,
    ) -> Result<ExecOutput> {
        let mut progress = input.from;
        let target = input.target.min(read_progress(tx, StageId::Headers)?);

        while progress < target {
            if ctx.aborted() {
                return Err(StageError::Shutdown);
            }
            let number = progress + 1;
            let header = read_header(tx, number)?;
            let body = self.source.lock().unwrap().body(number);
            let Some(body) = body else {
                break;
            };
            if let Err(reason) = Self::verify(&body, &header) {
                return Err(StageError::InvalidBlock {
                    number,
                    reason: BadBlockReason::InvalidBody(reason),
                });
            }

            tx.put(Table::Bodies, &block_key(number), &alloy_rlp::encode(&body))?;
            // Each block owns a leading and a trailing system transaction
            // slot besides its user transactions.
            let last = max_txnum(tx, number - 1)? + body.transactions.len() as u64 + 2;
            tx.put(Table::MaxTxNum, &block_key(number), &last.to_be_bytes())?;
            progress = number;
        }
        tracing::debug!(progress, target, "bodies advanced");
        Ok(ExecOutput {
            progress,
            done: true,
        })
    }

    fn unwind(&mut self, _ctx: &StageContext<'_>, tx: &mut TX, to: BlockNumber) -> Result<()> {
        let progress = read_progress(tx, StageId::Bodies)?;
        for number in (to + 1..=progress).rev() {
            tx.delete(Table::Bodies, &block_key(number))?;
            tx.delete(Table::MaxTxNum, &block_key(number))?;
        }
        Ok(())
    }
}
