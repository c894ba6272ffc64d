use std::io;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use crate::poller::{Poller, Shared};

/// The reactor's event loop: owns the kernel multiplexer and dispatches
/// completions.
///
/// Exactly one thread drives a context; every completion callback runs on
/// that thread, inside one of the drivers below. The context is deliberately
/// neither [`Send`] nor [`Sync`]; the sanctioned cross-thread entry point is
/// a [`Handle`], whose [`post`] interrupts a blocked loop through the waker
/// pipe.
///
/// The drivers differ only in their termination condition:
///
/// * [`run`]: poll while work is outstanding and the context is open.
/// * [`run_pending`]: poll until the pending count reaches zero.
/// * [`run_one`]: one blocking poll.
/// * [`poll_one`]: one non-blocking poll, `Ok(false)` when nothing was
///   ready.
///
/// "Outstanding work" is the pending count: armed readiness interests plus
/// posted-but-not-yet-run tasks.
///
/// [`run`]: IoContext::run
/// [`run_pending`]: IoContext::run_pending
/// [`run_one`]: IoContext::run_one
/// [`poll_one`]: IoContext::poll_one
/// [`post`]: Handle::post
#[derive(Debug)]
pub struct IoContext {
    poller: Rc<Poller>,
}

impl IoContext {
    /// Creates a context, its kernel multiplexer and its waker pipe.
    pub fn new() -> io::Result<IoContext> {
        Ok(IoContext {
            poller: Rc::new(Poller::new()?),
        })
    }

    /// Runs the loop until no work is outstanding or the context is closed.
    pub fn run(&self) -> io::Result<()> {
        while !self.is_closed() && self.pending() > 0 {
            self.poller.poll(None)?;
        }
        Ok(())
    }

    /// Runs the loop until the pending count reaches zero.
    pub fn run_pending(&self) -> io::Result<()> {
        while self.pending() > 0 {
            self.poller.poll(None)?;
        }
        Ok(())
    }

    /// Blocks for one multiplexer turn and dispatches whatever became ready.
    pub fn run_one(&self) -> io::Result<()> {
        self.poller.poll(None).map(|_| ())
    }

    /// One non-blocking turn. Returns `Ok(true)` if any callback or posted
    /// task ran, `Ok(false)` if nothing was ready.
    pub fn poll_one(&self) -> io::Result<bool> {
        self.poller.poll(Some(Duration::ZERO)).map(|n| n > 0)
    }

    /// Posts a task to run on the driving thread during the next poll turn.
    ///
    /// Tasks run in FIFO order relative to one another. This is the only
    /// operation that may also be reached from other threads, via
    /// [`Handle::post`].
    pub fn post<F>(&self, task: F) -> io::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.poller.shared().post(Box::new(task))
    }

    /// A cloneable, thread-safe handle for posting into this loop.
    pub fn handle(&self) -> Handle {
        Handle {
            shared: Arc::clone(self.poller.shared()),
        }
    }

    /// Armed readiness interests plus posted tasks not yet run.
    pub fn pending(&self) -> usize {
        self.poller.pending()
    }

    /// Marks the context closed and wakes a blocked driver. Idempotent.
    ///
    /// No further callbacks are delivered; operations on the context or on
    /// objects bound to it fail from here on.
    pub fn close(&self) {
        self.poller.close();
    }

    pub fn is_closed(&self) -> bool {
        self.poller.is_closed()
    }

    pub(crate) fn poller(&self) -> &Rc<Poller> {
        &self.poller
    }
}

impl Drop for IoContext {
    fn drop(&mut self) {
        self.close();
    }
}

/// Thread-safe handle to an [`IoContext`], capable only of posting tasks.
///
/// ```no_run
/// use tern::IoContext;
///
/// let ioc = IoContext::new().unwrap();
/// let handle = ioc.handle();
/// std::thread::spawn(move || {
///     handle.post(|| println!("from another thread")).unwrap();
/// });
/// ioc.run_pending().unwrap();
/// ```
#[derive(Clone, Debug)]
pub struct Handle {
    shared: Arc<Shared>,
}

impl Handle {
    /// Appends `task` to the posted queue and wakes the loop.
    ///
    /// Fails when the context is closed.
    pub fn post<F>(&self, task: F) -> io::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.post(Box::new(task))
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}
