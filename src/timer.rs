use std::cell::Cell;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use log::warn;

use crate::IoContext;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TimerState {
    Idle,
    Scheduled,
    Repeating,
}

/// A single-shot or repeating timer expressed as a reactor event.
///
/// On Linux the timer is a nonblocking `timerfd` flowing through the same
/// one-shot read path as every socket; on the kqueue platforms it is an
/// `EVFILT_TIMER` keyed by the timer's registration.
///
/// Scheduling over an armed timer replaces the previous schedule.
/// [`cancel`] disarms the timer and guarantees the callback is never
/// invoked afterwards.
///
/// ```no_run
/// use std::time::Duration;
/// use tern::{IoContext, Timer};
///
/// let ioc = IoContext::new().unwrap();
/// let timer = Timer::new(&ioc).unwrap();
/// timer
///     .schedule_once(Duration::from_millis(10), || println!("fired"))
///     .unwrap();
/// ioc.run_pending().unwrap();
/// ```
///
/// [`cancel`]: Timer::cancel
#[derive(Clone, Debug)]
pub struct Timer {
    inner: Rc<Inner>,
}

impl Timer {
    /// Fires `cb` once, `delay` from now.
    pub fn schedule_once<F>(&self, delay: Duration, cb: F) -> io::Result<()>
    where
        F: FnOnce() + 'static,
    {
        self.cancel();
        self.inner.arm_once(&self.inner, delay, Box::new(cb))?;
        self.inner.state.set(TimerState::Scheduled);
        Ok(())
    }

    /// Fires `cb` every `period`, starting one period from now.
    pub fn schedule_repeating<F>(&self, period: Duration, cb: F) -> io::Result<()>
    where
        F: FnMut() + 'static,
    {
        self.cancel();
        self.inner.arm_repeating(&self.inner, period, Box::new(cb))?;
        self.inner.state.set(TimerState::Repeating);
        Ok(())
    }

    /// Disarms the timer; the stored callback is dropped without running.
    /// A no-op on an idle timer.
    pub fn cancel(&self) {
        if self.inner.state.replace(TimerState::Idle) == TimerState::Idle {
            return;
        }
        self.inner.disarm();
    }

    /// Whether a schedule is currently armed.
    pub fn is_armed(&self) -> bool {
        self.inner.state.get() != TimerState::Idle
    }
}

// ===== Linux: timerfd through the regular read-arming path =====

#[cfg(any(target_os = "linux", target_os = "android"))]
mod imp {
    use super::*;
    use crate::object::IoObject;
    use crate::poller::Direction;
    use crate::sys;

    #[derive(Debug)]
    pub(super) struct Inner {
        pub(super) state: Cell<TimerState>,
        io: IoObject,
    }

    impl Timer {
        /// Creates an idle timer bound to `ioc`.
        pub fn new(ioc: &IoContext) -> io::Result<Timer> {
            let fd = sys::timerfd::new()?;
            Ok(Timer {
                inner: Rc::new(Inner {
                    state: Cell::new(TimerState::Idle),
                    io: IoObject::new(Rc::clone(ioc.poller()), fd),
                }),
            })
        }
    }

    impl Inner {
        pub(super) fn arm_once(
            &self,
            rc: &Rc<Inner>,
            delay: Duration,
            cb: Box<dyn FnOnce()>,
        ) -> io::Result<()> {
            sys::timerfd::set(self.io.raw_fd(), delay, None)?;
            let inner = Rc::clone(rc);
            self.io
                .try_schedule(
                    Direction::Read,
                    Box::new(move |res| {
                        if res.is_err() {
                            return;
                        }
                        let _ = sys::timerfd::read_expirations(inner.io.raw_fd());
                        inner.state.set(TimerState::Idle);
                        cb();
                    }),
                )
                .map_err(|err| {
                    let _ = sys::timerfd::clear(self.io.raw_fd());
                    err
                })
        }

        pub(super) fn arm_repeating(
            &self,
            rc: &Rc<Inner>,
            period: Duration,
            cb: Box<dyn FnMut()>,
        ) -> io::Result<()> {
            sys::timerfd::set(self.io.raw_fd(), period, Some(period))?;
            arm_tick(rc, cb).map_err(|err| {
                let _ = sys::timerfd::clear(self.io.raw_fd());
                err
            })
        }

        pub(super) fn disarm(&self) {
            let _ = sys::timerfd::clear(self.io.raw_fd());
            let _ = self.io.poller().del_read(self.io.pd());
        }
    }

    /// Parks the next tick's continuation; the kernel timer itself stays
    /// periodic, only the read interest is one-shot.
    fn arm_tick(inner: &Rc<Inner>, mut cb: Box<dyn FnMut()>) -> io::Result<()> {
        let handle = Rc::clone(inner);
        inner.io.try_schedule(
            Direction::Read,
            Box::new(move |res| {
                if res.is_err() {
                    return;
                }
                let _ = sys::timerfd::read_expirations(handle.io.raw_fd());
                cb();
                if handle.state.get() == TimerState::Repeating {
                    if let Err(err) = arm_tick(&handle, cb) {
                        warn!("failed to re-arm repeating timer: {}", err);
                        handle.state.set(TimerState::Idle);
                    }
                }
            }),
        )
    }
}

// ===== kqueue: EVFILT_TIMER keyed by the timer's token =====

#[cfg(any(
    target_os = "dragonfly",
    target_os = "freebsd",
    target_os = "ios",
    target_os = "macos",
    target_os = "netbsd",
    target_os = "openbsd",
))]
mod imp {
    use super::*;
    use crate::poller::{Direction, PollData, Poller};

    #[derive(Debug)]
    pub(super) struct Inner {
        pub(super) state: Cell<TimerState>,
        poller: Rc<Poller>,
        pd: Rc<PollData>,
    }

    impl Timer {
        /// Creates an idle timer bound to `ioc`.
        pub fn new(ioc: &IoContext) -> io::Result<Timer> {
            Ok(Timer {
                inner: Rc::new(Inner {
                    state: Cell::new(TimerState::Idle),
                    poller: Rc::clone(ioc.poller()),
                    // No fd of its own; the kernel timer is keyed by the
                    // slab token.
                    pd: Rc::new(PollData::new(-1)),
                }),
            })
        }
    }

    impl Inner {
        pub(super) fn arm_once(
            &self,
            rc: &Rc<Inner>,
            delay: Duration,
            cb: Box<dyn FnOnce()>,
        ) -> io::Result<()> {
            let inner = Rc::clone(rc);
            self.pd.set_callback(
                Direction::Read,
                Box::new(move |res| {
                    if res.is_err() {
                        return;
                    }
                    inner.state.set(TimerState::Idle);
                    cb();
                }),
            );
            self.poller.set_timer(&self.pd, delay, false)
        }

        pub(super) fn arm_repeating(
            &self,
            rc: &Rc<Inner>,
            period: Duration,
            cb: Box<dyn FnMut()>,
        ) -> io::Result<()> {
            arm_tick(rc, cb);
            self.poller.set_timer(&self.pd, period, true)
        }

        pub(super) fn disarm(&self) {
            let _ = self.poller.cancel_timer(&self.pd);
        }
    }

    fn arm_tick(inner: &Rc<Inner>, mut cb: Box<dyn FnMut()>) {
        let handle = Rc::clone(inner);
        inner.pd.set_callback(
            Direction::Read,
            Box::new(move |res| {
                if res.is_err() {
                    return;
                }
                cb();
                if handle.state.get() == TimerState::Repeating {
                    let inner = Rc::clone(&handle);
                    arm_tick(&inner, cb);
                    if let Err(err) = handle.poller.rearm_timer(&handle.pd) {
                        warn!("failed to re-arm repeating timer: {}", err);
                        handle.state.set(TimerState::Idle);
                    }
                }
            }),
        );
    }

    impl Drop for Inner {
        fn drop(&mut self) {
            self.disarm();
            self.poller.remove(&self.pd);
        }
    }
}

use imp::Inner;
