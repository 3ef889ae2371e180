use crate::{
    BadBlockReason, ExecOutput, HeaderValidator, Result, SharedSource, Stage, StageContext,
    StageError, StageId, StageInput,
    stages::{block_key, read_header},
};
use alloy_rlp::Encodable;
use sse_kv::{RwTx, Table};
use sse_primitives::{BlockNumber, Header, Revision};

/// Pulls headers from the block source, verifies the chain linkage and the
/// per-fork field shape, and persists the header chain.
#[derive(Debug)]
pub struct HeadersStage {
    source: SharedSource,
    validator: Box<dyn HeaderValidator>,
}

impl HeadersStage {
    /// A headers stage over `source` with consensus checks delegated to
    /// `validator`.
    pub fn new(source: SharedSource, validator: Box<dyn HeaderValidator>) -> Self {
        Self { source, validator }
    }

    /// The source's announced head.
    pub fn source_head(&self) -> BlockNumber {
        self.source.lock().unwrap().chain_head()
    }

    /// Structural checks independent of the consensus engine.
    fn check_shape(
        &self,
        ctx: &StageContext<'_>,
        header: &Header,
        parent: &Header,
    ) -> Result<(), &'static str> {
        if header.timestamp <= parent.timestamp {
            return Err("timestamp not after parent");
        }
        if header.gas_used > header.gas_limit {
            return Err("gas used above limit");
        }
        if header.extra_data.len() > 32 {
            return Err("extra data too long");
        }
        let revision = ctx.spec.revision_at(header.number, header.timestamp);
        if header.base_fee_per_gas.is_some() != (revision >= Revision::London) {
            return Err("base fee presence");
        }
        if header.withdrawals_root.is_some() != (revision >= Revision::Shanghai) {
            return Err("withdrawals root presence");
        }
        let cancun = revision >= Revision::Cancun;
        if header.blob_gas_used.is_some() != cancun
            || header.excess_blob_gas.is_some() != cancun
            || header.parent_beacon_block_root.is_some() != cancun
        {
            return Err("blob field presence");
        }
        if header.requests_hash.is_some() != (revision >= Revision::Prague) {
            return Err("requests hash presence");
        }
        Ok(())
    }

    /// Highest stored block whose hash the source still agrees with.
    fn common_ancestor<TX: RwTx>(
        &mut self,
        tx: &TX,
        from: BlockNumber,
    ) -> Result<BlockNumber> {
        let mut number = from;
        loop {
            let stored = read_header(tx, number)?;
            match self.source.lock().unwrap().header(number) {
                Some(offered) if offered.hash() == stored.hash() => return Ok(number),
                _ if number == 0 => return Ok(0),
                _ => number -= 1,
            }
        }
    }
}

impl<TX: RwTx> Stage<TX> for HeadersStage {
    fn id(&self) -> StageId {
        StageId::Headers
    }

    fn execute(
        &mut self,
        ctx: &StageContext<'_>,
        tx: &mut TX,
        input: StageInput,
    ) -> Result<ExecOutput> {
        let mut progress = input.from;
        let target = input.target.min(self.source.lock().unwrap().chain_head());

        // Detect a source that switched branches below our progress.
        if progress > 0 {
            let stored = read_header(tx, progress)?;
            let offered = self.source.lock().unwrap().header(progress);
            if let Some(offered) = offered {
                if offered.hash() != stored.hash() {
                    let ancestor = self.common_ancestor(tx, progress)?;
                    return Err(StageError::Reorg { ancestor });
                }
            }
        }

        while progress < target {
            if ctx.aborted() {
                return Err(StageError::Shutdown);
            }
            let number = progress + 1;
            let header = self.source.lock().unwrap().header(number);
            let Some(header) = header else {
                break;
            };
            let parent = read_header(tx, number - 1)?;
            if header.parent_hash != parent.hash() {
                let ancestor = self.common_ancestor(tx, progress)?;
                return Err(StageError::Reorg { ancestor });
            }
            if let Err(reason) = self.check_shape(ctx, &header, &parent) {
                return Err(StageError::InvalidBlock {
                    number,
                    reason: BadBlockReason::InvalidHeader(reason),
                });
            }
            if let Err(reason) = self.validator.validate(&header, &parent) {
                return Err(StageError::InvalidBlock {
                    number,
                    reason: BadBlockReason::InvalidHeader(reason),
                });
            }

            let hash = header.hash();
            let mut encoded = Vec::with_capacity(header.length());
            header.encode(&mut encoded);
            tx.put(Table::Headers, &block_key(number), &encoded)?;
            tx.put(Table::HeaderNumbers, hash.as_slice(), &block_key(number))?;
            tx.put(Table::CanonicalHashes, &block_key(number), hash.as_slice())?;
            progress = number;
        }
        tracing::debug!(progress, target, "headers advanced");
        Ok(ExecOutput {
            progress,
            done: true,
        })
    }

    fn unwind(&mut self, _ctx: &StageContext<'_>, tx: &mut TX, to: BlockNumber) -> Result<()> {
        let progress = crate::read_progress(tx, StageId::Headers)?;
        for number in (to + 1..=progress).rev() {
            if let Ok(header) = read_header(tx, number) {
                tx.delete(Table::HeaderNumbers, header.hash().as_slice())?;
            }
            tx.delete(Table::Headers, &block_key(number))?;
            tx.delete(Table::CanonicalHashes, &block_key(number))?;
        }
        Ok(())
    }
}
