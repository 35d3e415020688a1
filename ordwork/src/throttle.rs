//! Bounds how many workers are alive on the ordered path.
//!
//! A run starts [`Throttle::slots`] launch chains. Each chain holds one slot:
//! it claims an index, runs it, reports completion and only then releases the
//! slot by claiming the next index for a freshly spawned task. So there are
//! never more than `max` workers alive, and the next index is launched only
//! after a finished worker has handed its result over.

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
pub(crate) struct Throttle {
    n: usize,
    slots: usize,
    next: AtomicUsize,
}

impl Throttle {
    pub(crate) fn new(n: usize, max: usize) -> Throttle {
        Throttle {
            n,
            slots: n.min(max),
            next: AtomicUsize::new(0),
        }
    }

    /// The number of launch chains to start.
    pub(crate) fn slots(&self) -> usize {
        self.slots
    }

    /// Claim the next index to launch, if any remain.
    pub(crate) fn acquire(&self) -> Option<usize> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed);
        // fetch_add keeps counting past n, indices >= n are simply refused
        (idx < self.n).then_some(idx)
    }

    /// How many indices have been handed out.
    pub(crate) fn launched(&self) -> usize {
        self.next.load(Ordering::Relaxed).min(self.n)
    }
}
