//! Dispatch policies decide on which execution context a promise callback runs.
//!
//! The crate owns no threads of its own. Hosts plug their queues in through
//! [`Executor`], and optionally install one [`MainContext`] that the default
//! [`Dispatch::Unspecified`] policy routes to.
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::Error;

/// A unit of work handed to an [`Executor`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// An execution context that can run jobs asynchronously, e.g. a named queue.
pub trait Executor: Send + Sync + 'static {
    /// Schedules `job` to run later. Must not run it inline.
    fn execute(&self, job: Job) -> Result<(), Error>;

    /// Name used in diagnostics.
    fn label(&self) -> &str {
        "executor"
    }
}

/// The designated "main" context, usually the host's UI or event loop.
pub trait MainContext: Executor {
    /// Whether the calling thread is currently running on this context.
    fn is_current(&self) -> bool;
}

static MAIN_CONTEXT: RwLock<Option<Arc<dyn MainContext>>> = parking_lot::const_rwlock(None);

/// Installs the process-wide main context and returns the previous one.
///
/// # Examples
///
/// ```
/// use promise_dispatch::{clear_main_context, install_main_context, ManualQueue, MainContext};
/// use std::sync::Arc;
///
/// let main = Arc::new(ManualQueue::new("main"));
/// install_main_context(main.clone());
/// assert!(main.is_current());
/// clear_main_context();
/// ```
pub fn install_main_context(context: Arc<dyn MainContext>) -> Option<Arc<dyn MainContext>> {
    tracing::debug!(context = context.label(), "installing main context");
    MAIN_CONTEXT.write().replace(context)
}

/// Removes the installed main context, returning it.
pub fn clear_main_context() -> Option<Arc<dyn MainContext>> {
    MAIN_CONTEXT.write().take()
}

/// The currently installed main context, if any.
pub fn main_context() -> Option<Arc<dyn MainContext>> {
    MAIN_CONTEXT.read().clone()
}

/// Where the callbacks of a source run. Fixed when the source is created.
#[derive(Clone, Default)]
pub enum Dispatch {
    /// Inline when triggered on the main context, otherwise scheduled onto
    /// it. Runs inline when no main context is installed.
    #[default]
    Unspecified,
    /// Always inline, on whichever thread settles or subscribes.
    Synchronous,
    /// Always scheduled onto the given executor, even when already on it.
    On(Arc<dyn Executor>),
}

impl Dispatch {
    pub fn on<X: Executor>(executor: Arc<X>) -> Self {
        Dispatch::On(executor)
    }

    /// Runs one callback according to the policy.
    pub(crate) fn run(&self, job: Job) {
        match self {
            Dispatch::Synchronous => run_guarded(job),
            Dispatch::Unspecified => match main_context() {
                Some(main) if !main.is_current() => submit(main.as_ref(), job),
                _ => run_guarded(job),
            },
            Dispatch::On(executor) => submit(executor.as_ref(), job),
        }
    }
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dispatch::Unspecified => f.write_str("Unspecified"),
            Dispatch::Synchronous => f.write_str("Synchronous"),
            Dispatch::On(executor) => f.debug_tuple("On").field(&executor.label()).finish(),
        }
    }
}

fn submit<X: Executor + ?Sized>(executor: &X, job: Job) {
    if let Err(error) = executor.execute(Box::new(move || run_guarded(job))) {
        tracing::warn!(executor = executor.label(), %error, "dropping promise callback");
    }
}

/// Runs a callback, containing any panic so it cannot unwind into the
/// settling thread or an executor's worker.
pub(crate) fn run_guarded(job: Job) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
        tracing::error!(panic = panic_message(&*panic), "promise callback panicked");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}

#[cfg(test)]
mod tests {
    use super::{run_guarded, Dispatch};
    use crate::ManualQueue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_synchronous_runs_inline() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        Dispatch::Synchronous.run(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unspecified_without_main_context_runs_inline() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        Dispatch::default().run(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_on_target_never_runs_inline() {
        let queue = Arc::new(ManualQueue::new("target"));
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        Dispatch::on(queue.clone()).run(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_job_is_contained() {
        run_guarded(Box::new(|| panic!("boom")));
        run_guarded(Box::new(|| std::panic::panic_any(7_u8)));
    }

    #[test]
    fn test_debug_names_the_executor() {
        let queue = Arc::new(ManualQueue::new("io"));
        assert_eq!(format!("{:?}", Dispatch::on(queue)), "On(\"io\")");
        assert_eq!(format!("{:?}", Dispatch::Synchronous), "Synchronous");
    }
}
