//! Two small executors for hosts without a queue of their own.
//!
//! [`SerialQueue`] owns one named worker thread fed by a multi-producer,
//! single-consumer channel. [`ManualQueue`] only buffers jobs until someone
//! calls [`ManualQueue::run_pending`], which makes it a handy stand-in for a
//! host's main loop.
use std::collections::VecDeque;
use std::fmt;
use std::sync::mpsc::{channel, Sender};
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;

use crate::dispatch::{run_guarded, Executor, Job, MainContext};
use crate::Error;

/// A named worker thread that runs jobs one at a time, in submission order.
///
/// # Examples
///
/// ```
/// use promise_dispatch::{Dispatch, Producer, SerialQueue};
/// use futures::executor::block_on;
/// use std::sync::Arc;
///
/// let queue = Arc::new(SerialQueue::new("io").expect("spawn io queue"));
/// let (producer, promise) = Producer::<String, ()>::with_dispatch(Dispatch::on(queue.clone()));
/// let on_queue = promise.map(|_| std::thread::current().name().map(str::to_owned));
/// producer.resolve("🍓".into());
/// assert_eq!(block_on(on_queue.settled()), Ok(Some("io".to_owned())));
/// ```
#[derive(Debug)]
pub struct SerialQueue {
    label: String,
    sender: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl SerialQueue {
    pub fn new(label: impl Into<String>) -> Result<Self, Error> {
        let label = label.into();
        let (sender, receiver) = channel::<Job>();
        let worker = thread::Builder::new()
            .name(label.clone())
            .spawn(move || {
                for job in receiver {
                    run_guarded(job);
                }
            })
            .map_err(|source| Error::Spawn {
                label: label.clone(),
                source,
            })?;
        tracing::debug!(queue = %label, "serial queue started");
        Ok(Self {
            worker_id: worker.thread().id(),
            label,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Stops accepting jobs, lets the worker drain what was already queued
    /// and joins it. Called from the worker itself it only stops intake.
    pub fn shutdown(&self) {
        drop(self.sender.lock().take());
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        if thread::current().id() == self.worker_id {
            return;
        }
        if worker.join().is_err() {
            tracing::warn!(queue = %self.label, "serial queue worker panicked");
        }
        tracing::debug!(queue = %self.label, "serial queue stopped");
    }

    fn closed(&self) -> Error {
        Error::ExecutorClosed {
            label: self.label.clone(),
        }
    }
}

impl Executor for SerialQueue {
    fn execute(&self, job: Job) -> Result<(), Error> {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(job).map_err(|_| self.closed()),
            None => Err(self.closed()),
        }
    }

    fn label(&self) -> &str {
        &self.label
    }
}

impl MainContext for SerialQueue {
    fn is_current(&self) -> bool {
        thread::current().id() == self.worker_id
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A queue that runs nothing until it is explicitly drained.
///
/// The thread that creates it counts as "on" the queue for
/// [`MainContext::is_current`].
pub struct ManualQueue {
    label: String,
    jobs: Mutex<VecDeque<Job>>,
    owner: ThreadId,
}

impl ManualQueue {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            jobs: Mutex::new(VecDeque::new()),
            owner: thread::current().id(),
        }
    }

    /// Runs queued jobs, including the ones they enqueue, until the queue is
    /// empty. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.jobs.lock().pop_front();
            match next {
                Some(job) => {
                    run_guarded(job);
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}

impl fmt::Debug for ManualQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualQueue")
            .field("label", &self.label)
            .field("pending", &self.len())
            .finish()
    }
}

impl Executor for ManualQueue {
    fn execute(&self, job: Job) -> Result<(), Error> {
        self.jobs.lock().push_back(job);
        Ok(())
    }

    fn label(&self) -> &str {
        &self.label
    }
}

impl MainContext for ManualQueue {
    fn is_current(&self) -> bool {
        thread::current().id() == self.owner
    }
}

#[cfg(test)]
mod tests {
    use super::{ManualQueue, SerialQueue};
    use crate::dispatch::{Executor, MainContext};
    use crate::{Dispatch, Error, Producer};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::channel;
    use std::sync::Arc;
    use std::thread;
    use tracing_test::traced_test;

    #[test]
    fn test_serial_queue_runs_in_order() {
        let queue = SerialQueue::new("ordered").expect("spawn queue");
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..100 {
            let seen = seen.clone();
            queue
                .execute(Box::new(move || seen.lock().push(i)))
                .expect("queue accepts jobs");
        }
        queue.shutdown();
        assert_eq!(*seen.lock(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_serial_queue_runs_on_its_own_thread() {
        let queue = SerialQueue::new("worker-name").expect("spawn queue");
        let (tx, rx) = channel();
        queue
            .execute(Box::new(move || {
                tx.send(thread::current().name().map(str::to_owned)).unwrap();
            }))
            .unwrap();
        assert_eq!(rx.recv().unwrap().as_deref(), Some("worker-name"));
        assert!(!queue.is_current());
    }

    #[test]
    fn test_serial_queue_refuses_jobs_after_shutdown() {
        let queue = SerialQueue::new("closing").expect("spawn queue");
        queue.shutdown();
        let refused = queue.execute(Box::new(|| {}));
        assert!(matches!(refused, Err(Error::ExecutorClosed { ref label }) if label == "closing"));
    }

    #[traced_test]
    #[test]
    fn test_callback_refused_by_a_closed_queue_is_logged_and_dropped() {
        let queue = Arc::new(SerialQueue::new("retired").expect("spawn queue"));
        let (producer, promise) = Producer::<i32, ()>::with_dispatch(Dispatch::on(queue.clone()));
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        promise.on_success(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        queue.shutdown();
        assert!(producer.resolve(1));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(logs_contain("dropping promise callback"));
        assert!(logs_contain("retired"));
        assert_eq!(promise.value(), Some(1));
    }

    #[test]
    fn test_serial_queue_survives_panicking_job() {
        let queue = SerialQueue::new("sturdy").expect("spawn queue");
        let (tx, rx) = channel();
        queue.execute(Box::new(|| panic!("boom"))).unwrap();
        queue.execute(Box::new(move || tx.send(()).unwrap())).unwrap();
        assert!(rx.recv().is_ok());
    }

    #[test]
    fn test_manual_queue_drains_nested_jobs() {
        let queue = Arc::new(ManualQueue::new("manual"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (inner_queue, inner_seen) = (queue.clone(), seen.clone());
        queue
            .execute(Box::new(move || {
                inner_seen.lock().push("outer");
                let nested = inner_seen.clone();
                inner_queue
                    .execute(Box::new(move || nested.lock().push("inner")))
                    .unwrap();
            }))
            .unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.run_pending(), 2);
        assert!(queue.is_empty());
        assert_eq!(*seen.lock(), vec!["outer", "inner"]);
    }

    #[test]
    fn test_manual_queue_is_current_on_owner_thread_only() {
        let queue = Arc::new(ManualQueue::new("owner"));
        assert!(queue.is_current());
        let remote = queue.clone();
        let elsewhere = thread::spawn(move || remote.is_current())
            .join()
            .expect("The remote thread has panicked");
        assert!(!elsewhere);
    }
}
