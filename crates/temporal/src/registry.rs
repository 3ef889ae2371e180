use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// The on-disk files backing one published segment.
///
/// Files are immutable once published and reference counted through the
/// owning `Arc`; a retired segment is unlinked from disk only when the last
/// in-flight reader drops it.
#[derive(Debug, Default)]
pub struct FrozenFiles {
    paths: Vec<PathBuf>,
    retired: AtomicBool,
}

impl FrozenFiles {
    /// Track the given paths.
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            retired: AtomicBool::new(false),
        }
    }

    /// Schedule deletion once the last reader is gone.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }
}

impl Drop for FrozenFiles {
    fn drop(&mut self) {
        if self.retired.load(Ordering::Acquire) {
            for path in &self.paths {
                if let Err(e) = std::fs::remove_file(path) {
                    tracing::warn!(path = %path.display(), error = %e, "retired segment unlink failed");
                }
            }
        }
    }
}

/// A published segment that knows its step range.
pub trait Segment {
    /// `[step_from, step_to)` covered by this file set.
    fn step_range(&self) -> (u64, u64);
    /// The backing files.
    fn frozen(&self) -> &FrozenFiles;
}

/// Ordered set of published segments of one domain.
///
/// Readers take a cheap snapshot of the current list; publish and merge swap
/// the list atomically.
#[derive(Debug)]
pub struct SegmentRegistry<S> {
    segments: RwLock<Vec<Arc<S>>>,
}

impl<S> Default for SegmentRegistry<S> {
    fn default() -> Self {
        Self {
            segments: RwLock::new(Vec::new()),
        }
    }
}

impl<S: Segment> SegmentRegistry<S> {
    /// Current segments, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<S>> {
        self.segments.read().clone()
    }

    /// Largest covered step end, i.e. the frozen boundary.
    pub fn frozen_step(&self) -> u64 {
        self.segments
            .read()
            .iter()
            .map(|s| s.step_range().1)
            .max()
            .unwrap_or(0)
    }

    /// Publish a newly collated segment.
    pub fn publish(&self, segment: S) {
        let mut segments = self.segments.write();
        segments.push(Arc::new(segment));
        segments.sort_by_key(|s| s.step_range());
    }

    /// Replace every segment fully inside `[step_from, step_to)` with the
    /// merged one. Replaced files are retired for deferred unlink.
    pub fn replace_merged(&self, step_from: u64, step_to: u64, merged: S) {
        let mut segments = self.segments.write();
        segments.retain(|segment| {
            let (from, to) = segment.step_range();
            let absorbed = from >= step_from && to <= step_to;
            if absorbed {
                segment.frozen().retire();
            }
            !absorbed
        });
        segments.push(Arc::new(merged));
        segments.sort_by_key(|s| s.step_range());
    }
}
