//! Run a closure over `0..n` with bounded parallelism, optionally finalizing
//! results in index order.
//!
//! Workers may finish in any order. A finalizer, if given, sees every index
//! exactly once, strictly ascending. The fallible variants stop launching work
//! at the first error and return it once everything already launched has
//! finished.
//!
//! ```
//! use std::sync::atomic::{AtomicI64, Ordering};
//!
//! let list = [1, 2, 4, 5];
//! let results: Vec<_> = list.iter().map(|_| AtomicI64::new(0)).collect();
//! let mut printed = Vec::new();
//!
//! ordwork::run(
//!     list.len(),
//!     |idx| results[idx].store(list[idx] * 2, Ordering::Relaxed),
//!     Some(|idx: usize| printed.push(results[idx].load(Ordering::Relaxed))),
//! );
//! assert_eq!(vec![2, 4, 8, 10], printed);
//! ```

mod cell;
mod config;
mod error;
mod executor;
mod ordered;
mod pool;
mod sequencer;
mod throttle;
pub mod timing;

#[cfg(feature = "cli")]
mod args;

#[cfg(feature = "cli")]
pub use args::Args;
pub use config::Config;
pub use error::{ConfigError, Error};

use std::convert::Infallible;

use log::{debug, warn};

use cell::{finalizer_error, worker_error, Outcome};

/// Names the finalizer type when passing `None` to [`run`] or
/// [`run_with_limit`].
pub type NoFinalizer = fn(usize);

/// Names the finalizer type when passing `None` to [`try_run`] or
/// [`try_run_with_limit`].
pub type NoFallibleFinalizer<E> = fn(usize) -> Result<(), E>;

/// Runs index workloads with a fixed concurrency limit.
///
/// The limit is captured when the runner is built; nothing is read from
/// global state afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Runner {
    max_concurrency: usize,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// A runner allowing as many workers as the rayon pool has threads,
    /// normally the number of logical processors.
    pub fn new() -> Runner {
        Runner::with_max_concurrency(rayon::current_num_threads())
    }

    /// A runner allowing at most `max` workers at once.
    ///
    /// A limit of 0 would never make progress and is treated as 1.
    pub fn with_max_concurrency(max: usize) -> Runner {
        if max == 0 {
            warn!("A concurrency limit of 0 cannot make progress, using 1");
        }
        Runner {
            max_concurrency: max.max(1),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Invoke `worker` once for every index in `0..n`.
    pub fn run<W>(&self, n: usize, worker: W)
    where
        W: Fn(usize) + Sync,
    {
        infallible(self.try_run(n, |idx| {
            worker(idx);
            Ok::<(), Infallible>(())
        }))
    }

    /// Invoke `worker` once for every index in `0..n`, then `finalizer` for
    /// each index in ascending order as soon as it and every lower index
    /// have completed.
    pub fn run_ordered<W, F>(&self, n: usize, worker: W, mut finalizer: F)
    where
        W: Fn(usize) + Sync,
        F: FnMut(usize),
    {
        infallible(self.try_run_ordered(
            n,
            |idx| {
                worker(idx);
                Ok::<(), Infallible>(())
            },
            |idx| {
                finalizer(idx);
                Ok(())
            },
        ))
    }

    /// Like [`Runner::run`] but stops launching at the first error.
    ///
    /// The first error recorded is returned once every launched worker has
    /// finished. Workers already running are not interrupted.
    pub fn try_run<W, E>(&self, n: usize, worker: W) -> Result<(), Error<E>>
    where
        W: Fn(usize) -> Result<(), E> + Sync,
        E: Send,
    {
        match n {
            0 => return Ok(()),
            1 => return worker(0).map_err(|e| worker_error(0, e)),
            _ => (),
        }
        let outcome = Outcome::new();
        executor::execute(n, self.max_concurrency, &worker, &outcome);
        let result = outcome.finish();
        debug!("Ran {n} indices, ok: {}", result.is_ok());
        result
    }

    /// Like [`Runner::run_ordered`] but stops at the first error from either
    /// a worker or the finalizer.
    ///
    /// No finalizer call for an index above a failing one ever happens.
    pub fn try_run_ordered<W, F, E>(
        &self,
        n: usize,
        worker: W,
        mut finalizer: F,
    ) -> Result<(), Error<E>>
    where
        W: Fn(usize) -> Result<(), E> + Sync,
        F: FnMut(usize) -> Result<(), E>,
        E: Send,
    {
        match n {
            0 => return Ok(()),
            1 => {
                worker(0).map_err(|e| worker_error(0, e))?;
                return finalizer(0).map_err(|e| finalizer_error(0, e));
            }
            _ => (),
        }
        let outcome = Outcome::new();
        ordered::execute_ordered(n, self.max_concurrency, &worker, finalizer, &outcome);
        let result = outcome.finish();
        debug!("Ran and finalized {n} indices, ok: {}", result.is_ok());
        result
    }
}

fn infallible(result: Result<(), Error<Infallible>>) {
    let Ok(()) = result;
}

/// Invoke `worker` for every index in `0..n` with the default concurrency
/// limit, then `finalizer`, if any, for each index in ascending order.
pub fn run<W, F>(n: usize, worker: W, finalizer: Option<F>)
where
    W: Fn(usize) + Sync,
    F: FnMut(usize),
{
    run_with_limit(n, Runner::new().max_concurrency(), worker, finalizer)
}

/// [`run`] with at most `max` workers at once.
pub fn run_with_limit<W, F>(n: usize, max: usize, worker: W, finalizer: Option<F>)
where
    W: Fn(usize) + Sync,
    F: FnMut(usize),
{
    let runner = Runner::with_max_concurrency(max);
    match finalizer {
        Some(finalizer) => runner.run_ordered(n, worker, finalizer),
        None => runner.run(n, worker),
    }
}

/// Fallible [`run`]: the first error from a worker or the finalizer stops
/// further launches and is returned.
pub fn try_run<W, F, E>(n: usize, worker: W, finalizer: Option<F>) -> Result<(), Error<E>>
where
    W: Fn(usize) -> Result<(), E> + Sync,
    F: FnMut(usize) -> Result<(), E>,
    E: Send,
{
    try_run_with_limit(n, Runner::new().max_concurrency(), worker, finalizer)
}

/// [`try_run`] with at most `max` workers at once.
pub fn try_run_with_limit<W, F, E>(
    n: usize,
    max: usize,
    worker: W,
    finalizer: Option<F>,
) -> Result<(), Error<E>>
where
    W: Fn(usize) -> Result<(), E> + Sync,
    F: FnMut(usize) -> Result<(), E>,
    E: Send,
{
    let runner = Runner::with_max_concurrency(max);
    match finalizer {
        Some(finalizer) => runner.try_run_ordered(n, worker, finalizer),
        None => runner.try_run(n, worker),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        panic::{self, AssertUnwindSafe},
        sync::{
            atomic::{AtomicI64, AtomicUsize, Ordering},
            Barrier,
        },
        thread,
        time::Duration,
    };

    use more_asserts::assert_le;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[derive(Debug, PartialEq, thiserror::Error)]
    #[error("fail")]
    struct Fail;

    /// Every n from 0 to twice the pool size, as the sizes most likely to
    /// straddle fan-out and strided dispatch.
    fn sizes() -> std::ops::Range<usize> {
        0..2 * rayon::current_num_threads().max(2) + 1
    }

    fn marks(n: usize) -> Vec<AtomicUsize> {
        (0..n).map(|_| AtomicUsize::new(0)).collect()
    }

    fn counts(marks: &[AtomicUsize]) -> Vec<usize> {
        marks.iter().map(|m| m.load(Ordering::SeqCst)).collect()
    }

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn run_visits_every_index_once() {
        init_logging();
        for n in sizes() {
            let visits = marks(n);
            run(
                n,
                |idx| {
                    visits[idx].fetch_add(1, Ordering::SeqCst);
                },
                None::<NoFinalizer>,
            );
            assert_eq!(vec![1; n], counts(&visits), "n={n}");
        }
    }

    #[test]
    fn run_finalizes_in_order() {
        init_logging();
        for n in sizes() {
            let visits = marks(n);
            // final[idx] = the order in which idx was finalized, starting at 1
            let mut finalized = vec![0; n];
            let mut pos = 0;
            run(
                n,
                |idx| {
                    visits[idx].fetch_add(1, Ordering::SeqCst);
                },
                Some(|idx: usize| {
                    pos += 1;
                    finalized[idx] = pos;
                }),
            );
            assert_eq!(vec![1; n], counts(&visits), "n={n}");
            assert_eq!((1..=n).collect::<Vec<_>>(), finalized, "n={n}");
        }
    }

    #[test]
    fn try_run_without_error() {
        for n in sizes() {
            let visits = marks(n);
            let result = try_run(
                n,
                |idx| {
                    visits[idx].fetch_add(1, Ordering::SeqCst);
                    Ok::<(), Fail>(())
                },
                None::<NoFallibleFinalizer<Fail>>,
            );
            assert!(result.is_ok(), "n={n}");
            assert_eq!(vec![1; n], counts(&visits), "n={n}");
        }
    }

    #[test]
    fn try_run_with_worker_error() {
        for n in sizes().skip(1) {
            let result = try_run(
                n,
                |idx| {
                    if n == 1 || idx % 2 == 1 {
                        Err(Fail)
                    } else {
                        Ok(())
                    }
                },
                None::<NoFallibleFinalizer<Fail>>,
            );
            let err = result.expect_err("expected an error");
            assert!(!err.is_finalizer());
            assert_eq!(Fail, err.into_source());
        }
    }

    #[test]
    fn try_run_finalizes_in_order() {
        for n in sizes() {
            let visits = marks(n);
            let mut finalized = vec![0; n];
            let mut pos = 0;
            let result = try_run(
                n,
                |idx| {
                    visits[idx].fetch_add(1, Ordering::SeqCst);
                    Ok::<(), Fail>(())
                },
                Some(|idx: usize| {
                    pos += 1;
                    finalized[idx] = pos;
                    Ok(())
                }),
            );
            assert!(result.is_ok(), "n={n}");
            assert_eq!(vec![1; n], counts(&visits), "n={n}");
            assert_eq!((1..=n).collect::<Vec<_>>(), finalized, "n={n}");
        }
    }

    #[test]
    fn try_run_with_finalizer_error() {
        for n in sizes().skip(2) {
            let mut finalized = Vec::new();
            let result = try_run(
                n,
                |_| Ok(()),
                Some(|idx: usize| {
                    finalized.push(idx);
                    if idx % 2 == 1 {
                        Err(Fail)
                    } else {
                        Ok(())
                    }
                }),
            );
            let err = result.expect_err("expected an error");
            assert!(err.is_finalizer());
            assert_eq!(1, err.index());
            // nothing above the failing index was finalized
            assert_eq!(vec![0, 1], finalized, "n={n}");
        }
    }

    #[test]
    fn try_run_with_worker_error_and_finalizer() {
        for n in sizes().skip(2) {
            let mut finalized = Vec::new();
            let result = try_run(
                n,
                |idx| if idx % 2 == 1 { Err(Fail) } else { Ok(()) },
                Some(|idx: usize| {
                    finalized.push(idx);
                    Ok(())
                }),
            );
            let err = result.expect_err("expected an error");
            assert!(!err.is_finalizer());
            // only index 0 can precede the first odd index
            assert_le!(finalized.len(), 1);
        }
    }

    #[test]
    fn single_failing_worker_skips_finalizer() {
        let mut finalized = false;
        let result = try_run(
            1,
            |_| Err(Fail),
            Some(|_: usize| {
                finalized = true;
                Ok(())
            }),
        );
        let err = result.expect_err("expected an error");
        assert_eq!(0, err.index());
        assert!(!finalized);
    }

    #[test]
    fn single_index_runs_on_calling_thread() {
        let caller = thread::current().id();
        let ran_on = parking_lot::Mutex::new(None);
        run(
            1,
            |_| *ran_on.lock() = Some(thread::current().id()),
            Some(|idx: usize| assert_eq!(0, idx)),
        );
        assert_eq!(Some(caller), ran_on.into_inner());
    }

    #[test]
    fn zero_invokes_nothing() {
        let result = try_run(
            0,
            |_| -> Result<(), Fail> { panic!("worker called for n=0") },
            Some(|_: usize| -> Result<(), Fail> { panic!("finalizer called for n=0") }),
        );
        assert!(result.is_ok());
        run(
            0,
            |_| panic!("worker called for n=0"),
            Some(|_: usize| panic!("finalizer called for n=0")),
        );
    }

    #[rstest]
    #[case::sequential(1, 20)]
    #[case::two(2, 20)]
    #[case::strided(3, 50)]
    #[case::fan_out(64, 10)]
    fn concurrency_never_exceeds_max(#[case] max: usize, #[case] n: usize) {
        for ordered in [false, true] {
            let active = AtomicUsize::new(0);
            let peak = AtomicUsize::new(0);
            let worker = |_: usize| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(1));
                active.fetch_sub(1, Ordering::SeqCst);
            };
            if ordered {
                run_with_limit(n, max, worker, Some(|_: usize| ()));
            } else {
                run_with_limit(n, max, worker, None::<NoFinalizer>);
            }
            assert_le!(peak.load(Ordering::SeqCst), max, "ordered={ordered}");
        }
    }

    #[rstest]
    #[case::fan_out(32, 32)]
    #[case::fan_out_with_room(64, 10)]
    #[case::strided(4, 50)]
    fn concurrency_reaches_max(#[case] max: usize, #[case] n: usize) {
        for ordered in [false, true] {
            // the first min(n, max) indices only get past the barrier together
            let wave = n.min(max);
            let barrier = Barrier::new(wave);
            let active = AtomicUsize::new(0);
            let peak = AtomicUsize::new(0);
            let worker = |idx: usize| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                if idx < wave {
                    barrier.wait();
                }
                active.fetch_sub(1, Ordering::SeqCst);
            };
            if ordered {
                run_with_limit(n, max, worker, Some(|_: usize| ()));
            } else {
                run_with_limit(n, max, worker, None::<NoFinalizer>);
            }
            assert_eq!(wave, peak.load(Ordering::SeqCst), "ordered={ordered}");
        }
    }

    fn finalized_after_slow_workers() -> Vec<usize> {
        let mut order = Vec::new();
        run(
            4,
            |_| thread::sleep(Duration::from_millis(10)),
            Some(|idx: usize| order.push(idx)),
        );
        order
    }

    #[rstest]
    #[case::one_thread(1)]
    #[case::two_threads(2)]
    fn ordered_runs_nest_inside_a_rayon_pool(#[case] threads: usize) {
        let (done, finished) = crossbeam_channel::bounded(1);
        // a deadlock strands this thread, the timeout below still fails the test
        thread::spawn(move || {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .unwrap();
            let orders = pool.install(|| {
                rayon::join(finalized_after_slow_workers, finalized_after_slow_workers)
            });
            let _ = done.send(orders);
        });

        let (left, right) = finished
            .recv_timeout(Duration::from_secs(30))
            .expect("ordered runs inside a rayon pool never finished");
        assert_eq!(vec![0, 1, 2, 3], left);
        assert_eq!(vec![0, 1, 2, 3], right);
    }

    #[test]
    fn doubles_in_order() {
        let list = [1, 2, 4, 5];
        let results: Vec<_> = list.iter().map(|_| AtomicI64::new(0)).collect();
        let mut printed = Vec::new();

        run(
            list.len(),
            |idx| {
                // finish in reverse
                thread::sleep(Duration::from_millis(5 * (list.len() - idx) as u64));
                results[idx].store(list[idx] * 2, Ordering::SeqCst);
            },
            Some(|idx: usize| printed.push(results[idx].load(Ordering::SeqCst))),
        );

        assert_eq!(vec![2, 4, 8, 10], printed);
    }

    #[test]
    fn zero_limit_is_clamped() {
        assert_eq!(1, Runner::with_max_concurrency(0).max_concurrency());
        let visits = marks(5);
        run_with_limit(
            5,
            0,
            |idx| {
                visits[idx].fetch_add(1, Ordering::SeqCst);
            },
            None::<NoFinalizer>,
        );
        assert_eq!(vec![1; 5], counts(&visits));
    }

    #[test]
    fn default_runner_uses_pool_size() {
        assert_eq!(
            rayon::current_num_threads().max(1),
            Runner::default().max_concurrency()
        );
    }

    #[test]
    fn worker_panic_resumes_on_caller() {
        let launched = AtomicUsize::new(0);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            Runner::with_max_concurrency(1).run_ordered(
                100,
                |idx| {
                    launched.fetch_add(1, Ordering::SeqCst);
                    if idx == 3 {
                        panic!("worker {idx} exploded");
                    }
                },
                |_| (),
            )
        }));
        let payload = result.expect_err("panic should propagate");
        assert_eq!(
            Some("worker 3 exploded"),
            payload.downcast_ref::<String>().map(String::as_str)
        );
        // the panic stopped further launches
        assert_eq!(4, launched.load(Ordering::SeqCst));
    }

    #[test]
    fn unordered_worker_panic_resumes_on_caller() {
        let launched = AtomicUsize::new(0);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            // a single stride, so nothing after the panic may start
            Runner::with_max_concurrency(1).run(100, |idx| {
                launched.fetch_add(1, Ordering::SeqCst);
                if idx == 3 {
                    panic!("worker {idx} exploded");
                }
            })
        }));
        let payload = result.expect_err("panic should propagate");
        assert_eq!(
            Some("worker 3 exploded"),
            payload.downcast_ref::<String>().map(String::as_str)
        );
        assert_eq!(4, launched.load(Ordering::SeqCst));
    }

    #[test]
    fn finalizer_panic_does_not_strand_workers() {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            Runner::with_max_concurrency(4).run_ordered(
                64,
                |_| (),
                |idx| {
                    if idx == 10 {
                        panic!("finalizer gave up");
                    }
                },
            )
        }));
        assert!(result.is_err());
    }

    #[test]
    fn runner_methods_match_free_functions() {
        let runner = Runner::with_max_concurrency(3);
        let visits = marks(10);
        runner.run(10, |idx| {
            visits[idx].fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(vec![1; 10], counts(&visits));

        let mut order = Vec::new();
        runner
            .try_run_ordered(
                10,
                |_| Ok::<(), Fail>(()),
                |idx| {
                    order.push(idx);
                    Ok(())
                },
            )
            .unwrap();
        assert_eq!((0..10).collect::<Vec<_>>(), order);

        let err = runner
            .try_run(10, |idx| if idx == 7 { Err(Fail) } else { Ok(()) })
            .unwrap_err();
        assert_eq!(7, err.index());
    }
}
