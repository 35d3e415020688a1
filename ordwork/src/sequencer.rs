//! Turns out-of-order completions into in-order finalizer calls.

use std::collections::HashSet;

use crossbeam_channel::Receiver;
use log::{debug, trace};

use crate::cell::{finalizer_error, Outcome};

/// Releases indices to the finalizer strictly in ascending order.
///
/// Completions that arrive ahead of the cursor wait in `pending` until every
/// lower index has been finalized.
#[derive(Debug)]
pub(crate) struct Sequencer {
    n: usize,
    // next index eligible for finalization
    pos: usize,
    // completed, not yet finalized; every entry is > pos
    pending: HashSet<usize>,
}

impl Sequencer {
    pub(crate) fn new(n: usize) -> Sequencer {
        Sequencer {
            n,
            pos: 0,
            pending: HashSet::new(),
        }
    }

    /// The next index the finalizer will see.
    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    /// Completions waiting on a lower index.
    pub(crate) fn buffered(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_done(&self) -> bool {
        self.pos == self.n
    }

    /// Note that `idx` completed and finalize everything that is now in order.
    ///
    /// Stops at the first index that hasn't completed, at `n`, or as soon as
    /// the run has failed. A failing finalizer leaves the cursor on the
    /// failing index.
    pub(crate) fn accept<E, F>(&mut self, idx: usize, finalizer: &mut F, outcome: &Outcome<E>)
    where
        F: FnMut(usize) -> Result<(), E>,
    {
        debug_assert!(
            idx >= self.pos && idx < self.n,
            "completion {idx} outside {}..{}",
            self.pos,
            self.n
        );
        if !self.pending.insert(idx) {
            debug_assert!(false, "Repeat signals for completion of {idx}");
            return;
        }

        while !self.is_done() && !outcome.failed() && self.pending.remove(&self.pos) {
            let pos = self.pos;
            trace!("Finalize {pos}");
            if !outcome.guard(pos, finalizer_error, || finalizer(pos)) {
                return;
            }
            self.pos += 1;
        }
        if !self.pending.is_empty() {
            trace!(
                "{} completions buffered waiting on {}",
                self.pending.len(),
                self.pos
            );
        }
    }

    /// Consume completions until every sender is gone.
    ///
    /// Once the run has failed, completions still in flight are received and
    /// dropped so no worker stays blocked on a send nobody reads.
    pub(crate) fn run<E, F>(
        mut self,
        completions: &Receiver<usize>,
        mut finalizer: F,
        outcome: &Outcome<E>,
    ) where
        F: FnMut(usize) -> Result<(), E>,
    {
        let mut discarded = 0;
        for idx in completions.iter() {
            if outcome.failed() {
                trace!("Discard completion of {idx}, run has failed");
                discarded += 1;
                continue;
            }
            self.accept(idx, &mut finalizer, outcome);
        }
        debug!(
            "Sequencer finished at {}/{}, {} buffered, {discarded} discarded",
            self.position(),
            self.n,
            self.buffered()
        );
    }
}
