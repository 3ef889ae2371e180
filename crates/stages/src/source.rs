use sse_primitives::{Block, BlockBody, BlockNumber, Header};
use std::sync::{Arc, Mutex};

/// A block source shared between the headers and bodies stages.
pub type SharedSource = Arc<Mutex<dyn BlockSource>>;

/// Wrap a source for sharing across stages.
pub fn shared_source<S: BlockSource + 'static>(source: S) -> SharedSource {
    Arc::new(Mutex::new(source))
}

/// The opaque block provider the pipeline consumes. Concrete realizations
/// (devp2p, trusted RPC) live outside the engine.
pub trait BlockSource: std::fmt::Debug + Send {
    /// Highest block the source can currently serve.
    fn chain_head(&self) -> BlockNumber;
    /// Header of `number` on the source's canonical chain.
    fn header(&mut self, number: BlockNumber) -> Option<Header>;
    /// Body of `number` on the source's canonical chain.
    fn body(&mut self, number: BlockNumber) -> Option<BlockBody>;
}

/// A source backed by an in-memory chain; the test realization, also used
/// for import from static files.
#[derive(Debug, Default)]
pub struct VecBlockSource {
    chain: Vec<Block>,
}

impl VecBlockSource {
    /// A source serving the given chain; `chain[i]` must be block `i`.
    pub fn new(chain: Vec<Block>) -> Self {
        Self { chain }
    }

    /// Replace the served chain, e.g. with a reorged branch.
    pub fn set_chain(&mut self, chain: Vec<Block>) {
        self.chain = chain;
    }

    /// Append one block.
    pub fn push(&mut self, block: Block) {
        self.chain.push(block);
    }
}

impl BlockSource for VecBlockSource {
    fn chain_head(&self) -> BlockNumber {
        self.chain.len().saturating_sub(1) as BlockNumber
    }

    fn header(&mut self, number: BlockNumber) -> Option<Header> {
        self.chain.get(number as usize).map(|b| b.header.clone())
    }

    fn body(&mut self, number: BlockNumber) -> Option<BlockBody> {
        self.chain.get(number as usize).map(|b| b.body.clone())
    }
}
