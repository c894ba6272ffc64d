use std::cell::{Cell, RefCell};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, RawFd};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{trace, warn};

use crate::sys;
use crate::token::WAKER_TOKEN;
use crate::{Interest, Token};

/// Output buffer handed to the kernel on every wait.
const EVENTS_CAPACITY: usize = 128;

/// Completion stored per (fd, direction); swapped out of its slot before it
/// runs so re-arming from inside the callback lands in a fresh slot. Invoked
/// with `Ok(())` on readiness delivery, with an error when arming failed.
pub(crate) type EventCallback = Box<dyn FnOnce(io::Result<()>)>;

/// Task posted into the loop, possibly from another thread.
pub(crate) type Task = Box<dyn FnOnce() + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Direction {
    Read,
    Write,
}

impl Direction {
    fn interest(self) -> Interest {
        match self {
            Direction::Read => Interest::READABLE,
            Direction::Write => Interest::WRITABLE,
        }
    }
}

pub(crate) fn closed_err() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "I/O context is closed")
}

/// Per-fd record binding the descriptor to its armed interests and parked
/// callbacks.
///
/// The kernel never sees this struct; its user-data carries the token of the
/// slab slot holding the owning `Rc`, so the record stays valid (and
/// reachable) for as long as the fd is registered, however the `Rc` moves.
pub(crate) struct PollData {
    fd: RawFd,
    token: Cell<Option<Token>>,
    registered: Cell<bool>,
    interests: Cell<Option<Interest>>,
    read_cb: RefCell<Option<EventCallback>>,
    write_cb: RefCell<Option<EventCallback>>,
}

impl PollData {
    pub(crate) fn new(fd: RawFd) -> PollData {
        PollData {
            fd,
            token: Cell::new(None),
            registered: Cell::new(false),
            interests: Cell::new(None),
            read_cb: RefCell::new(None),
            write_cb: RefCell::new(None),
        }
    }

    pub(crate) fn set_callback(&self, direction: Direction, cb: EventCallback) {
        let slot = match direction {
            Direction::Read => &self.read_cb,
            Direction::Write => &self.write_cb,
        };
        *slot.borrow_mut() = Some(cb);
    }

    pub(crate) fn take_callback(&self, direction: Direction) -> Option<EventCallback> {
        let slot = match direction {
            Direction::Read => &self.read_cb,
            Direction::Write => &self.write_cb,
        };
        slot.borrow_mut().take()
    }
}

impl std::fmt::Debug for PollData {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("PollData")
            .field("fd", &self.fd)
            .field("token", &self.token.get())
            .field("interests", &self.interests.get())
            .finish()
    }
}

/// State reachable from other threads: the posted-task queue, the pending
/// counter, the closed flag and the waker pipe.
pub(crate) struct Shared {
    waker: sys::Waker,
    tasks: Mutex<Vec<Task>>,
    pending: AtomicUsize,
    closed: AtomicBool,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("Shared")
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Shared {
    pub(crate) fn post(&self, task: Task) -> io::Result<()> {
        if self.is_closed() {
            return Err(closed_err());
        }
        {
            let mut tasks = self.tasks.lock().unwrap();
            tasks.push(task);
            // Incremented under the lock so a draining loop observes the
            // count before the queue unlocks.
            self.pending.fetch_add(1, Ordering::Relaxed);
        }
        self.waker.wake()
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// The reactor: one kernel multiplexer, the source registry, and dispatch.
///
/// Owned by an `IoContext` and shared (via `Rc`) with every I/O object bound
/// to it; only the driving thread touches it.
pub(crate) struct Poller {
    selector: sys::Selector,
    events: RefCell<sys::Events>,
    sources: RefCell<Slab>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("Poller")
            .field("selector", &self.selector)
            .field("shared", &self.shared)
            .finish()
    }
}

impl Poller {
    pub(crate) fn new() -> io::Result<Poller> {
        let selector = sys::Selector::new()?;
        let waker = sys::Waker::new()?;
        // The waker's registration is permanent and level-triggered; it is
        // not user work and never counts towards `pending`.
        selector.register_waker(waker.as_raw_fd(), WAKER_TOKEN)?;

        Ok(Poller {
            selector,
            events: RefCell::new(Vec::with_capacity(EVENTS_CAPACITY)),
            sources: RefCell::new(Slab::new()),
            shared: Arc::new(Shared {
                waker,
                tasks: Mutex::new(Vec::new()),
                pending: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub(crate) fn pending(&self) -> usize {
        self.shared.pending()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Idempotent; wakes the loop so a blocked driver observes the flag.
    /// The multiplexer and pipe fds are released when the last owner drops.
    pub(crate) fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shared.waker.wake();
    }

    pub(crate) fn set_read(&self, pd: &Rc<PollData>) -> io::Result<()> {
        self.arm(pd, Direction::Read)
    }

    pub(crate) fn set_write(&self, pd: &Rc<PollData>) -> io::Result<()> {
        self.arm(pd, Direction::Write)
    }

    /// Arm one-shot readiness for one direction. Idempotent: an already
    /// armed direction leaves the registration and the pending count alone.
    fn arm(&self, pd: &Rc<PollData>, direction: Direction) -> io::Result<()> {
        if self.is_closed() {
            return Err(closed_err());
        }

        let which = direction.interest();
        let prev = pd.interests.get();
        if prev.map_or(false, |i| i.contains(which)) {
            return Ok(());
        }
        let full = prev.map_or(which, |i| i.add(which));

        let token = self.ensure_token(pd);
        trace!("arming fd={} {:?} as {:?}", pd.fd, direction, token);
        self.selector
            .arm(pd.fd, token, pd.registered.get(), which, full)?;
        pd.registered.set(true);
        pd.interests.set(Some(full));
        self.shared.pending.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn del_read(&self, pd: &Rc<PollData>) -> io::Result<()> {
        self.disarm(pd, Direction::Read)
    }

    pub(crate) fn del_write(&self, pd: &Rc<PollData>) -> io::Result<()> {
        self.disarm(pd, Direction::Write)
    }

    pub(crate) fn del(&self, pd: &Rc<PollData>) -> io::Result<()> {
        self.del_read(pd)?;
        self.del_write(pd)
    }

    /// Disarm one direction and drop its parked callback. The pending count
    /// only moves when the direction was actually armed.
    fn disarm(&self, pd: &Rc<PollData>, direction: Direction) -> io::Result<()> {
        let which = direction.interest();
        let prev = match pd.interests.get() {
            Some(prev) if prev.contains(which) => prev,
            _ => return Ok(()),
        };
        let remaining = prev.remove(which);

        if let Some(token) = pd.token.get() {
            trace!("disarming fd={} {:?}", pd.fd, direction);
            self.selector.disarm(pd.fd, token, which, remaining)?;
        }
        pd.interests.set(remaining);
        drop(pd.take_callback(direction));
        self.shared.pending.fetch_sub(1, Ordering::Relaxed);
        Ok(())
    }

    /// Full teardown for a closing object: disarm everything and drop the
    /// slab slot and kernel registration.
    pub(crate) fn remove(&self, pd: &Rc<PollData>) {
        let _ = self.del(pd);
        if let Some(token) = pd.token.get() {
            if pd.registered.get() && pd.fd >= 0 {
                let _ = self.selector.deregister(pd.fd);
            }
            self.sources.borrow_mut().remove(token);
            pd.token.set(None);
            pd.registered.set(false);
        }
    }

    /// One multiplexer turn: wait up to `timeout` (`None` = forever), run
    /// posted tasks if the waker fired, and deliver ready events to the
    /// armed callbacks. Returns the number of callbacks and tasks run; zero
    /// with a non-`None` timeout means the wait timed out.
    pub(crate) fn poll(&self, timeout: Option<Duration>) -> io::Result<usize> {
        if self.is_closed() {
            return Err(closed_err());
        }

        let mut events = mem::take(&mut *self.events.borrow_mut());
        if events.capacity() == 0 {
            events.reserve(EVENTS_CAPACITY);
        }

        let mut remaining = timeout;
        loop {
            let now = Instant::now();
            match self.selector.select(&mut events, remaining) {
                Ok(()) => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {
                    // Interrupted by a signal; adjust the timeout if
                    // necessary and retry.
                    if let Some(to) = remaining {
                        let elapsed = now.elapsed();
                        if elapsed >= to {
                            break;
                        }
                        remaining = Some(to - elapsed);
                    }
                }
                Err(err) => {
                    *self.events.borrow_mut() = events;
                    return Err(err);
                }
            }
        }

        let mut dispatched = 0;
        for event in events.iter() {
            // A callback may close the context mid-batch; nothing further
            // is delivered once that happens.
            if self.is_closed() {
                break;
            }

            let token = sys::event::token(event);

            if token == WAKER_TOKEN {
                dispatched += self.run_posted();
                continue;
            }

            // The source may have been closed by an earlier callback in
            // this same batch.
            let pd = self.sources.borrow().get(token).cloned();
            let pd = match pd {
                Some(pd) => pd,
                None => continue,
            };

            // Error and hang-up conditions wake every armed direction; the
            // callback's next syscall reports the concrete error.
            let err = sys::event::is_error(event);
            let readable = sys::event::is_readable(event) || err;
            let writable = sys::event::is_writable(event) || err;
            dispatched += self.deliver(&pd, readable, writable);
        }

        events.clear();
        *self.events.borrow_mut() = events;
        Ok(dispatched)
    }

    /// Deliver one ready event: clear the fired directions, keep the
    /// accounting straight, re-submit the surviving one-shot, then run the
    /// callbacks.
    fn deliver(&self, pd: &Rc<PollData>, readable: bool, writable: bool) -> usize {
        let armed = match pd.interests.get() {
            Some(armed) => armed,
            None => return 0,
        };

        let mut remaining = Some(armed);
        let mut read_cb = None;
        let mut write_cb = None;

        if readable && armed.is_readable() {
            remaining = remaining.and_then(|i| i.remove(Interest::READABLE));
            read_cb = pd.take_callback(Direction::Read);
            self.shared.pending.fetch_sub(1, Ordering::Relaxed);
        }
        if writable && armed.is_writable() {
            remaining = remaining.and_then(|i| i.remove(Interest::WRITABLE));
            write_cb = pd.take_callback(Direction::Write);
            self.shared.pending.fetch_sub(1, Ordering::Relaxed);
        }
        if remaining == Some(armed) {
            // Readiness for directions nobody is armed for (stale one-shot
            // after a token reuse, or a spurious wakeup).
            return 0;
        }

        pd.interests.set(remaining);
        if let Some(rest) = remaining {
            if let Some(token) = pd.token.get() {
                if let Err(err) = self.selector.resubmit(pd.fd, token, rest) {
                    warn!("failed to re-submit interest for fd={}: {}", pd.fd, err);
                }
            }
        }

        let mut fired = 0;
        if let Some(cb) = read_cb {
            cb(Ok(()));
            fired += 1;
        }
        if let Some(cb) = write_cb {
            cb(Ok(()));
            fired += 1;
        }
        fired
    }

    /// Drain the waker and run every task posted so far, in FIFO order. The
    /// queue is swapped out under the lock and run outside it; tasks posted
    /// while running land in the next poll turn, so posted work cannot
    /// starve I/O.
    fn run_posted(&self) -> usize {
        self.shared.waker.drain();
        let tasks = mem::take(&mut *self.shared.tasks.lock().unwrap());
        let n = tasks.len();
        for task in tasks {
            task();
            self.shared.pending.fetch_sub(1, Ordering::Relaxed);
        }
        n
    }

    fn ensure_token(&self, pd: &Rc<PollData>) -> Token {
        if let Some(token) = pd.token.get() {
            return token;
        }
        let token = self.sources.borrow_mut().insert(Rc::clone(pd));
        pd.token.set(Some(token));
        token
    }
}

#[cfg(any(
    target_os = "dragonfly",
    target_os = "freebsd",
    target_os = "ios",
    target_os = "macos",
    target_os = "netbsd",
    target_os = "openbsd",
))]
impl Poller {
    /// Arm a kernel timer keyed by the poll-data's token; fires as a read
    /// event.
    pub(crate) fn set_timer(
        &self,
        pd: &Rc<PollData>,
        delay: Duration,
        repeating: bool,
    ) -> io::Result<()> {
        if self.is_closed() {
            return Err(closed_err());
        }
        let token = self.ensure_token(pd);
        self.selector.set_timer(token, delay, repeating)?;
        self.mark_timer_armed(pd);
        Ok(())
    }

    /// A periodic kernel timer stays armed across deliveries; only the
    /// bookkeeping needs to be re-established for the next tick.
    pub(crate) fn rearm_timer(&self, pd: &Rc<PollData>) -> io::Result<()> {
        if self.is_closed() {
            return Err(closed_err());
        }
        self.mark_timer_armed(pd);
        Ok(())
    }

    pub(crate) fn cancel_timer(&self, pd: &Rc<PollData>) -> io::Result<()> {
        let prev = match pd.interests.get() {
            Some(prev) if prev.is_readable() => prev,
            _ => return Ok(()),
        };
        if let Some(token) = pd.token.get() {
            self.selector.cancel_timer(token)?;
        }
        pd.interests.set(prev.remove(Interest::READABLE));
        drop(pd.take_callback(Direction::Read));
        self.shared.pending.fetch_sub(1, Ordering::Relaxed);
        Ok(())
    }

    fn mark_timer_armed(&self, pd: &Rc<PollData>) {
        let prev = pd.interests.get();
        if prev.map_or(false, |i| i.is_readable()) {
            return;
        }
        pd.interests
            .set(Some(prev.map_or(Interest::READABLE, |i| {
                i.add(Interest::READABLE)
            })));
        self.shared.pending.fetch_add(1, Ordering::Relaxed);
    }
}

/// Token-indexed registry of live poll-data records; slots are reused.
struct Slab {
    entries: Vec<Option<Rc<PollData>>>,
    free: Vec<usize>,
}

impl Slab {
    fn new() -> Slab {
        Slab {
            entries: Vec::new(),
            free: Vec::new(),
        }
    }

    fn insert(&mut self, pd: Rc<PollData>) -> Token {
        match self.free.pop() {
            Some(index) => {
                self.entries[index] = Some(pd);
                Token(index)
            }
            None => {
                self.entries.push(Some(pd));
                Token(self.entries.len() - 1)
            }
        }
    }

    fn get(&self, token: Token) -> Option<&Rc<PollData>> {
        self.entries.get(token.0).and_then(Option::as_ref)
    }

    fn remove(&mut self, token: Token) {
        if let Some(entry) = self.entries.get_mut(token.0) {
            if entry.take().is_some() {
                self.free.push(token.0);
            }
        }
    }
}

impl std::fmt::Debug for Slab {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("Slab")
            .field("len", &(self.entries.len() - self.free.len()))
            .finish()
    }
}
