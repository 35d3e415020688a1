//! The threads a single run executes on.

use log::{trace, warn};
use rayon::{Scope, ThreadPool, ThreadPoolBuilder};

/// Run `op` on the calling thread with a scope whose spawns land on a pool
/// of exactly `threads` threads, returning once every spawn has joined.
///
/// The pool belongs to this run alone, so every task spawned into the scope
/// gets a thread of its own even when the caller is itself a pool thread.
pub(crate) fn in_place_scope<'scope, OP, R>(threads: usize, op: OP) -> R
where
    OP: FnOnce(&Scope<'scope>) -> R,
{
    match build(threads) {
        Ok(pool) => {
            trace!("Running on a dedicated pool of {threads} threads");
            pool.in_place_scope(op)
        }
        Err(e) => {
            warn!("Unable to start {threads} threads, sharing the global pool instead: {e}");
            rayon::in_place_scope(op)
        }
    }
}

fn build(threads: usize) -> Result<ThreadPool, rayon::ThreadPoolBuildError> {
    // Do NOT assign custom thread names because it makes flamegraph root each thread individually
    ThreadPoolBuilder::new().num_threads(threads.max(1)).build()
}
