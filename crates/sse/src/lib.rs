//! Umbrella crate of the staged state engine.

pub use sse_kv as kv;
pub use sse_primitives as primitives;
pub use sse_seg as seg;
pub use sse_stages as stages;
pub use sse_state as state;
pub use sse_temporal as temporal;
pub use sse_trie as trie;
