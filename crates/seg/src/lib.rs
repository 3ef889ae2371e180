//! Immutable segment files: the Huffman+pattern word codec, the Elias-Fano
//! integer codec, and the accessory lookup indices (`.bt`, `.kvi`, `.kvei`).
//!
//! Segment files are written once by collation or merge, published
//! atomically, and thereafter only read through shared memory maps.

mod compress;
mod decompress;
mod elias_fano;
mod files;
mod huffman;
mod index;
mod varint;

pub use compress::{Compressor, pattern_sample};
pub use decompress::{Decompressor, Getter, WordIter};
pub use elias_fano::EliasFano;
pub use files::SegmentFileName;
pub use index::{BtIndex, BtIndexBuilder, ExistenceFilter, HashIndex, HashIndexBuilder};

/// Maximum Huffman code depth accepted by the decoder.
pub const MAX_HUFFMAN_DEPTH: u64 = 50;

/// Errors of the segment layer.
#[derive(Debug, thiserror::Error)]
pub enum SegError {
    /// Underlying file I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A segment file violated a format invariant. Fatal for the file; the
    /// caller renames it aside and recomputes from hot data where possible.
    #[error("corrupt segment {}: {reason}", .file.as_deref().unwrap_or("<unnamed>"))]
    CorruptSegment {
        /// Offending file, when known.
        file: Option<String>,
        /// Violated invariant.
        reason: &'static str,
    },
    /// Malformed segment file name.
    #[error("malformed segment file name: {0}")]
    BadFileName(String),
}

impl SegError {
    pub(crate) fn corrupt(reason: &'static str) -> Self {
        Self::CorruptSegment { file: None, reason }
    }
}

/// Result alias.
pub type Result<T, E = SegError> = std::result::Result<T, E>;
