//! Temporal flat-state storage: [`Domain`] (latest values), [`History`]
//! (per-change previous values) and [`InvertedIndex`] (per-key change
//! marks), with background collation into immutable segment files and
//! merging of adjacent segments.
//!
//! Hot data lives in KV tables; once a step of transaction numbers is
//! complete it is collated into `.kv`/`.v`/`.ef` files plus their accessory
//! indices, and the covered hot rows are pruned. Readers consult hot data
//! first and fall through to segments newest-to-oldest.

mod domain;
mod history;
mod inverted_index;
mod registry;
mod step;

pub use domain::{Domain, DomainConfig};
pub use history::History;
pub use inverted_index::InvertedIndex;
pub use registry::{FrozenFiles, Segment, SegmentRegistry};
pub use step::{DEFAULT_STEP_SIZE, StepSize};

use sse_kv::KvError;
use sse_seg::SegError;

/// Errors of the temporal store.
#[derive(Debug, thiserror::Error)]
pub enum TemporalError {
    /// KV backend failure.
    #[error(transparent)]
    Kv(#[from] KvError),
    /// Segment file failure.
    #[error(transparent)]
    Seg(#[from] SegError),
    /// File system failure during collation or merge.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A hot row or segment word violated the expected key layout.
    #[error("malformed temporal row: {0}")]
    MalformedRow(&'static str),
}

/// Result alias.
pub type Result<T, E = TemporalError> = std::result::Result<T, E>;
