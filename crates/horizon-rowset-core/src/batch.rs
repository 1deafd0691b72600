//! Reentrant update batching.
//!
//! Mutating operations on a dataset frequently call each other: inserting
//! rows re-sorts, re-sorting moves focus, moving focus changes selection.
//! Each step reports what it touched, and [`UpdateBatch`] coalesces those
//! reports so observers see exactly one notification when the outermost
//! operation finishes.
//!
//! # Example
//!
//! ```
//! use horizon_rowset_core::{Coalesce, UpdateBatch};
//!
//! #[derive(Debug, Default, PartialEq)]
//! struct Touched(u32);
//!
//! impl Coalesce for Touched {
//!     fn coalesce(&mut self, other: Self) {
//!         self.0 |= other.0;
//!     }
//!     fn is_empty(&self) -> bool {
//!         self.0 == 0
//!     }
//! }
//!
//! let mut batch = UpdateBatch::<Touched>::new();
//! batch.begin();
//! batch.begin();
//! assert!(batch.push(Touched(1)).is_none());
//! assert!(batch.end().is_none());
//! assert!(batch.push(Touched(2)).is_none());
//! assert_eq!(batch.end(), Some(Touched(3)));
//! ```

/// A set of pending changes that can be merged together.
pub trait Coalesce: Default {
    /// Merge `other` into `self`.
    fn coalesce(&mut self, other: Self);

    /// Returns `true` if there is nothing to report.
    fn is_empty(&self) -> bool;
}

/// Depth-counted accumulator that flushes once at depth zero.
#[derive(Debug, Default)]
pub struct UpdateBatch<P> {
    depth: usize,
    pending: P,
}

impl<P: Coalesce> UpdateBatch<P> {
    /// Create an idle batch.
    pub fn new() -> Self {
        Self {
            depth: 0,
            pending: P::default(),
        }
    }

    /// Current nesting depth. Zero means no batch is open.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Returns `true` while at least one batch is open.
    pub fn is_open(&self) -> bool {
        self.depth > 0
    }

    /// Open a (possibly nested) batch.
    pub fn begin(&mut self) {
        self.depth += 1;
    }

    /// Record a change.
    ///
    /// When no batch is open the change is returned to the caller for
    /// immediate delivery; otherwise it is merged into the pending set.
    pub fn push(&mut self, change: P) -> Option<P> {
        if self.depth == 0 {
            return (!change.is_empty()).then_some(change);
        }
        self.pending.coalesce(change);
        None
    }

    /// Close a batch.
    ///
    /// Returns the merged changes when the outermost batch closes and
    /// something was recorded.
    pub fn end(&mut self) -> Option<P> {
        debug_assert!(self.depth > 0, "UpdateBatch::end without matching begin");
        self.depth = self.depth.saturating_sub(1);
        if self.depth > 0 {
            return None;
        }
        let pending = std::mem::take(&mut self.pending);
        (!pending.is_empty()).then_some(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Names(Vec<&'static str>);

    impl Coalesce for Names {
        fn coalesce(&mut self, other: Self) {
            for name in other.0 {
                if !self.0.contains(&name) {
                    self.0.push(name);
                }
            }
        }

        fn is_empty(&self) -> bool {
            self.0.is_empty()
        }
    }

    #[test]
    fn test_push_without_batch_is_immediate() {
        let mut batch = UpdateBatch::<Names>::new();
        assert_eq!(batch.push(Names(vec!["rows"])), Some(Names(vec!["rows"])));
        assert_eq!(batch.push(Names::default()), None);
    }

    #[test]
    fn test_nested_batches_flush_once() {
        let mut batch = UpdateBatch::<Names>::new();
        batch.begin();
        batch.push(Names(vec!["rows"]));
        batch.begin();
        batch.push(Names(vec!["vals", "rows"]));
        assert_eq!(batch.depth(), 2);
        assert_eq!(batch.end(), None);
        assert_eq!(batch.end(), Some(Names(vec!["rows", "vals"])));
        assert!(!batch.is_open());
    }

    #[test]
    fn test_empty_batch_flushes_nothing() {
        let mut batch = UpdateBatch::<Names>::new();
        batch.begin();
        assert_eq!(batch.end(), None);
    }
}
