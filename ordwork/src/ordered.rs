//! The finalizer path: throttled workers feeding the sequencer.

use crossbeam_channel::Sender;
use log::{debug, trace};
use rayon::Scope;

use crate::{
    cell::{worker_error, Outcome},
    pool,
    sequencer::Sequencer,
    throttle::Throttle,
};

/// Run `worker` over `0..n`, at most `max` alive at once, passing each
/// completed index to `finalizer` in ascending order.
///
/// The sequencer runs on the calling thread; workers run on a pool with one
/// thread per launch slot and hand completions over a rendezvous channel.
/// Workers only ever block on that hand-off and the receiving end never waits
/// for a thread the caller might be holding, so this makes progress even when
/// called from inside another rayon pool.
///
/// Returns once every worker has joined and the sequencer has drained.
pub(crate) fn execute_ordered<E, W, F>(
    n: usize,
    max: usize,
    worker: &W,
    finalizer: F,
    outcome: &Outcome<E>,
) where
    W: Fn(usize) -> Result<(), E> + Sync,
    F: FnMut(usize) -> Result<(), E>,
    E: Send,
{
    let throttle = Throttle::new(n, max);
    debug!(
        "Executing {n} indices in order, {} launch slots",
        throttle.slots()
    );
    // Zero capacity: a finished worker waits until the sequencer takes its index
    let (send, recv) = crossbeam_channel::bounded::<usize>(0);

    pool::in_place_scope(throttle.slots(), |scope| {
        for _ in 0..throttle.slots() {
            launch(scope, &throttle, worker, outcome, send.clone());
        }
        // Only workers hold senders now, the channel closes as the last one exits
        drop(send);
        Sequencer::new(n).run(&recv, finalizer, outcome);
    });

    debug!("{}/{n} indices launched", throttle.launched());
}

/// Spawn a worker for the next unclaimed index, if the run is still healthy.
///
/// The worker reports its completion, then releases its slot by launching
/// the next index in its place.
fn launch<'scope, E, W>(
    scope: &Scope<'scope>,
    throttle: &'scope Throttle,
    worker: &'scope W,
    outcome: &'scope Outcome<E>,
    send: Sender<usize>,
) where
    W: Fn(usize) -> Result<(), E> + Sync,
    E: Send,
{
    if outcome.failed() {
        return;
    }
    let Some(idx) = throttle.acquire() else {
        return;
    };
    scope.spawn(move |scope| {
        trace!("Start {idx}");
        if !outcome.guard(idx, worker_error, || worker(idx)) {
            return;
        }
        if send.send(idx).is_err() {
            // Receiver is gone, nobody wants further results
            trace!("Unable to report {idx}, sequencer has exited");
            return;
        }
        launch(scope, throttle, worker, outcome, send);
    });
}
