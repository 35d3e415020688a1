//! First-wins result cells shared by every task of a run.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::atomic::{AtomicBool, Ordering},
};

use log::{error, trace};
use parking_lot::Mutex;

use crate::Error;

/// A slot that keeps the first value stored and ignores the rest.
///
/// [`ErrorCell::is_set`] never blocks, so tasks can poll it between units of
/// work.
#[derive(Debug)]
pub(crate) struct ErrorCell<T> {
    set: AtomicBool,
    value: Mutex<Option<T>>,
}

impl<T> Default for ErrorCell<T> {
    fn default() -> Self {
        Self {
            set: AtomicBool::new(false),
            value: Mutex::new(None),
        }
    }
}

impl<T> ErrorCell<T> {
    pub(crate) fn new() -> Self {
        Default::default()
    }

    /// Store `value` unless something got here first.
    ///
    /// Returns true if `value` was kept.
    pub(crate) fn set(&self, value: T) -> bool {
        let mut slot = self.value.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        self.set.store(true, Ordering::Release);
        true
    }

    pub(crate) fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }

    pub(crate) fn into_inner(self) -> Option<T> {
        self.value.into_inner()
    }
}

type PanicPayload = Box<dyn Any + Send + 'static>;

/// The shared failure state of one run: the first error and the first panic.
///
/// Either one stops further launches.
#[derive(Debug)]
pub(crate) struct Outcome<E> {
    error: ErrorCell<Error<E>>,
    panic: ErrorCell<PanicPayload>,
}

impl<E> Default for Outcome<E> {
    fn default() -> Self {
        Self {
            error: ErrorCell::new(),
            panic: ErrorCell::new(),
        }
    }
}

impl<E> Outcome<E> {
    pub(crate) fn new() -> Self {
        Default::default()
    }

    /// Has anything failed yet?
    pub(crate) fn failed(&self) -> bool {
        self.error.is_set() || self.panic.is_set()
    }

    pub(crate) fn record(&self, err: Error<E>) {
        let index = err.index();
        if self.error.set(err) {
            error!("index {index} failed, no further work will be launched");
        } else {
            trace!("index {index} failed after an earlier failure, ignored");
        }
    }

    /// Run one worker or finalizer call, capturing its error or panic.
    ///
    /// `wrap` attaches the index and role to the caller's error. Returns true
    /// if the call succeeded.
    pub(crate) fn guard(
        &self,
        index: usize,
        wrap: fn(usize, E) -> Error<E>,
        call: impl FnOnce() -> Result<(), E>,
    ) -> bool {
        // # Unwind Safety
        //
        // A panic stops all further launches and is resumed on the calling
        // thread once every task has joined, so nothing observes state the
        // panicking call may have left half-written.
        match panic::catch_unwind(AssertUnwindSafe(call)) {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                self.record(wrap(index, e));
                false
            }
            Err(payload) => {
                error!(
                    "index {index} panicked: '{}'",
                    get_panic_message(payload.as_ref())
                );
                self.panic.set(payload);
                false
            }
        }
    }

    /// Consume the outcome once every task has joined.
    ///
    /// A captured panic is resumed here, on the calling thread.
    pub(crate) fn finish(self) -> Result<(), Error<E>> {
        if let Some(payload) = self.panic.into_inner() {
            panic::resume_unwind(payload);
        }
        match self.error.into_inner() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

pub(crate) fn worker_error<E>(index: usize, source: E) -> Error<E> {
    Error::Worker { index, source }
}

pub(crate) fn finalizer_error<E>(index: usize, source: E) -> Error<E> {
    Error::Finalizer { index, source }
}

// taken from std:
// <https://github.com/rust-lang/rust/blob/d5a82bbd26e1ad8b7401f6a718a9c57c96905483/library/std/src/panicking.rs#L247-L253>
fn get_panic_message(msg: &(dyn Any + Send)) -> &str {
    match msg.downcast_ref::<&'static str>() {
        Some(s) => s,
        None => match msg.downcast_ref::<String>() {
            Some(s) => s.as_str(),
            None => "Box<dyn Any>",
        },
    }
}
