//! Runs a worker over `0..n` with at most `max` tasks in flight.

use log::{debug, trace};

use crate::{
    cell::{worker_error, Outcome},
    pool,
};

/// How indices are handed to tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    /// One task per index.
    FanOut,
    /// `max` tasks, task k takes k, k + max, k + 2 * max, ...
    Strided,
}

impl Dispatch {
    pub(crate) fn for_run(n: usize, max: usize) -> Dispatch {
        if n <= max {
            Dispatch::FanOut
        } else {
            Dispatch::Strided
        }
    }

    /// How many tasks run at once, each on its own thread.
    fn tasks(self, n: usize, max: usize) -> usize {
        match self {
            Dispatch::FanOut => n,
            Dispatch::Strided => max,
        }
    }
}

/// Invoke `worker` for every index in `0..n`, returning once every launched
/// task has joined.
///
/// Tasks check `outcome` before each index and stop once anything failed. A
/// task already inside `worker` is never interrupted.
pub(crate) fn execute<E, W>(n: usize, max: usize, worker: &W, outcome: &Outcome<E>)
where
    W: Fn(usize) -> Result<(), E> + Sync,
    E: Send,
{
    let dispatch = Dispatch::for_run(n, max);
    debug!("Executing {n} indices, max {max} in flight, {dispatch:?}");

    pool::in_place_scope(dispatch.tasks(n, max), |scope| match dispatch {
        Dispatch::FanOut => {
            for idx in 0..n {
                scope.spawn(move |_| {
                    if outcome.failed() {
                        trace!("Skip {idx}");
                        return;
                    }
                    trace!("Start {idx}");
                    outcome.guard(idx, worker_error, || worker(idx));
                });
            }
        }
        Dispatch::Strided => {
            for first in 0..max {
                scope.spawn(move |_| {
                    for idx in (first..n).step_by(max) {
                        if outcome.failed() {
                            trace!("Stride {first} stopping before {idx}");
                            break;
                        }
                        trace!("Start {idx}");
                        if !outcome.guard(idx, worker_error, || worker(idx)) {
                            break;
                        }
                    }
                });
            }
        }
    });
}
