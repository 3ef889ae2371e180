use crate::{
    Result,
    stages::{
        BodiesStage, ExecutionStage, FinishStage, HeadersStage, SendersStage, TxLookupStage,
    },
};
use sse_kv::RwTx;
use sse_primitives::{BlockNumber, ChainSpec};
use sse_temporal::{Domain, StepSize};
use std::sync::atomic::{AtomicBool, Ordering};

/// Stable identifiers of the pipeline stages, in execution order. The ASCII
/// name keys the `SyncStageProgress` table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageId {
    /// Header chain download and validation.
    Headers,
    /// Body reconstitution and root verification.
    Bodies,
    /// Sender recovery.
    Senders,
    /// Transaction execution and commitment.
    Execution,
    /// Transaction hash lookup index.
    TxLookup,
    /// Canonical head advancement.
    Finish,
}

impl StageId {
    /// All stages, in pipeline order.
    pub const ORDER: [StageId; 6] = [
        StageId::Headers,
        StageId::Bodies,
        StageId::Senders,
        StageId::Execution,
        StageId::TxLookup,
        StageId::Finish,
    ];

    /// ASCII name persisted as the progress key.
    pub const fn name(self) -> &'static str {
        match self {
            StageId::Headers => "Headers",
            StageId::Bodies => "Bodies",
            StageId::Senders => "Senders",
            StageId::Execution => "Execution",
            StageId::TxLookup => "TxLookup",
            StageId::Finish => "Finish",
        }
    }
}

/// The flat state domains the pipeline writes through.
#[derive(Debug)]
pub struct Domains {
    /// Account domain, history-backed.
    pub accounts: Domain,
    /// Storage domain, history-backed.
    pub storage: Domain,
    /// Code domain, content-addressed, no history.
    pub code: Domain,
}

/// Shared per-round context handed to every stage call.
#[derive(Debug)]
pub struct StageContext<'a> {
    /// Chain parameters.
    pub spec: &'a ChainSpec,
    /// Flat state domains.
    pub domains: &'a Domains,
    /// Step width of the temporal store.
    pub step: StepSize,
    /// Cooperative cancellation flag, checked between blocks.
    pub abort: &'a AtomicBool,
}

impl StageContext<'_> {
    /// Whether shutdown was requested.
    pub fn aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }
}

/// Block range of one stage invocation.
#[derive(Clone, Copy, Debug)]
pub struct StageInput {
    /// Progress the stage committed previously; work starts at `from + 1`.
    pub from: BlockNumber,
    /// Round target, clamped by each stage to its input stage's progress.
    pub target: BlockNumber,
}

/// Result of one stage invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecOutput {
    /// New progress marker.
    pub progress: BlockNumber,
    /// `false` when the stage hit a batch limit and wants re-entry.
    pub done: bool,
}

/// A resumable, unwindable block-range transformation.
pub trait Stage<TX: RwTx> {
    /// Stable identifier.
    fn id(&self) -> StageId;

    /// Advance from `input.from` toward `input.target`, writing derived
    /// data through `tx`. Progress is persisted by the coordinator in the
    /// same transaction.
    fn execute(
        &mut self,
        ctx: &StageContext<'_>,
        tx: &mut TX,
        input: StageInput,
    ) -> Result<ExecOutput>;

    /// Reverse this stage's effects above `to`.
    fn unwind(&mut self, ctx: &StageContext<'_>, tx: &mut TX, to: BlockNumber) -> Result<()>;
}

/// The closed set of pipeline stages, dispatch by enum rather than trait
/// objects so stages stay generic over the transaction type.
#[derive(Debug)]
pub enum AnyStage {
    /// Header chain.
    Headers(HeadersStage),
    /// Bodies.
    Bodies(BodiesStage),
    /// Senders.
    Senders(SendersStage),
    /// Execution.
    Execution(ExecutionStage),
    /// Transaction lookup.
    TxLookup(TxLookupStage),
    /// Finish.
    Finish(FinishStage),
}

impl AnyStage {
    /// Stable identifier, without committing to a transaction type.
    pub fn id(&self) -> StageId {
        match self {
            AnyStage::Headers(_) => StageId::Headers,
            AnyStage::Bodies(_) => StageId::Bodies,
            AnyStage::Senders(_) => StageId::Senders,
            AnyStage::Execution(_) => StageId::Execution,
            AnyStage::TxLookup(_) => StageId::TxLookup,
            AnyStage::Finish(_) => StageId::Finish,
        }
    }
}

impl<TX: RwTx> Stage<TX> for AnyStage {
    fn id(&self) -> StageId {
        AnyStage::id(self)
    }

    fn execute(
        &mut self,
        ctx: &StageContext<'_>,
        tx: &mut TX,
        input: StageInput,
    ) -> Result<ExecOutput> {
        match self {
            AnyStage::Headers(s) => s.execute(ctx, tx, input),
            AnyStage::Bodies(s) => s.execute(ctx, tx, input),
            AnyStage::Senders(s) => s.execute(ctx, tx, input),
            AnyStage::Execution(s) => s.execute(ctx, tx, input),
            AnyStage::TxLookup(s) => s.execute(ctx, tx, input),
            AnyStage::Finish(s) => s.execute(ctx, tx, input),
        }
    }

    fn unwind(&mut self, ctx: &StageContext<'_>, tx: &mut TX, to: BlockNumber) -> Result<()> {
        match self {
            AnyStage::Headers(s) => s.unwind(ctx, tx, to),
            AnyStage::Bodies(s) => s.unwind(ctx, tx, to),
            AnyStage::Senders(s) => s.unwind(ctx, tx, to),
            AnyStage::Execution(s) => s.unwind(ctx, tx, to),
            AnyStage::TxLookup(s) => s.unwind(ctx, tx, to),
            AnyStage::Finish(s) => s.unwind(ctx, tx, to),
        }
    }
}
