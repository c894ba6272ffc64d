use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::time::Duration;

use libc::{EPOLLIN, EPOLLONESHOT, EPOLLOUT, EPOLLRDHUP};

use crate::{Interest, Token};

#[derive(Debug)]
pub(crate) struct Selector {
    ep: OwnedFd,
}

impl Selector {
    pub fn new() -> io::Result<Selector> {
        // SAFETY: `epoll_create1(2)` ensures the fd is valid.
        let ep = unsafe { OwnedFd::from_raw_fd(syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?) };
        Ok(Selector { ep })
    }

    pub fn select(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        let timeout = timeout
            .map(|to| {
                // `Duration::as_millis` truncates, so round up. This avoids
                // turning sub-millisecond timeouts into a zero timeout,
                // unless the caller explicitly requests that by specifying a
                // zero timeout.
                to.checked_add(Duration::from_nanos(999_999))
                    .unwrap_or(to)
                    .as_millis() as libc::c_int
            })
            .unwrap_or(-1);

        events.clear();
        syscall!(epoll_wait(
            self.ep.as_raw_fd(),
            events.as_mut_ptr(),
            events.capacity() as i32,
            timeout,
        ))
        .map(|n_events| {
            // SAFETY: `epoll_wait` ensures that `n_events` are assigned.
            unsafe { events.set_len(n_events as usize) };
        })
    }

    /// Permanent level-triggered read registration for the waker pipe.
    pub fn register_waker(&self, fd: RawFd, token: Token) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: EPOLLIN as u32,
            u64: usize::from(token) as u64,
        };
        syscall!(epoll_ctl(
            self.ep.as_raw_fd(),
            libc::EPOLL_CTL_ADD,
            fd,
            &mut event
        ))
        .map(|_| ())
    }

    /// Arm one-shot interest. `registered` says whether the fd already has a
    /// (possibly disabled) entry in the interest list; `added` is unused
    /// here, epoll rewrites the whole mask.
    pub fn arm(
        &self,
        fd: RawFd,
        token: Token,
        registered: bool,
        _added: Interest,
        full: Interest,
    ) -> io::Result<()> {
        let op = if registered {
            libc::EPOLL_CTL_MOD
        } else {
            libc::EPOLL_CTL_ADD
        };
        let mut event = libc::epoll_event {
            events: interests_to_epoll(full),
            u64: usize::from(token) as u64,
        };
        syscall!(epoll_ctl(self.ep.as_raw_fd(), op, fd, &mut event)).map(|_| ())
    }

    /// Drop interest in `removed`; the registration itself stays (with an
    /// empty mask when nothing remains) until the fd is deregistered.
    pub fn disarm(
        &self,
        fd: RawFd,
        token: Token,
        _removed: Interest,
        remaining: Option<Interest>,
    ) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: remaining.map_or(0, interests_to_epoll),
            u64: usize::from(token) as u64,
        };
        syscall!(epoll_ctl(
            self.ep.as_raw_fd(),
            libc::EPOLL_CTL_MOD,
            fd,
            &mut event
        ))
        .map(|_| ())
    }

    /// Reinstall the one-shot mask for the directions that did not fire.
    /// `EPOLLONESHOT` disables the whole registration on delivery, so the
    /// surviving direction has to be put back explicitly.
    pub fn resubmit(&self, fd: RawFd, token: Token, interests: Interest) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interests_to_epoll(interests),
            u64: usize::from(token) as u64,
        };
        syscall!(epoll_ctl(
            self.ep.as_raw_fd(),
            libc::EPOLL_CTL_MOD,
            fd,
            &mut event
        ))
        .map(|_| ())
    }

    pub fn deregister(&self, fd: RawFd) -> io::Result<()> {
        syscall!(epoll_ctl(
            self.ep.as_raw_fd(),
            libc::EPOLL_CTL_DEL,
            fd,
            ptr::null_mut()
        ))
        .map(|_| ())
    }
}

impl AsRawFd for Selector {
    fn as_raw_fd(&self) -> RawFd {
        self.ep.as_raw_fd()
    }
}

fn interests_to_epoll(interests: Interest) -> u32 {
    let mut kind = EPOLLONESHOT;

    if interests.is_readable() {
        kind = kind | EPOLLIN | EPOLLRDHUP;
    }

    if interests.is_writable() {
        kind |= EPOLLOUT;
    }

    kind as u32
}

pub(crate) type Event = libc::epoll_event;
pub(crate) type Events = Vec<Event>;

pub(crate) mod event {
    use super::Event;
    use crate::Token;

    pub(crate) fn token(event: &Event) -> Token {
        Token(event.u64 as usize)
    }

    pub(crate) fn is_readable(event: &Event) -> bool {
        (event.events as libc::c_int & libc::EPOLLIN) != 0
            || (event.events as libc::c_int & libc::EPOLLRDHUP) != 0
    }

    pub(crate) fn is_writable(event: &Event) -> bool {
        (event.events as libc::c_int & libc::EPOLLOUT) != 0
    }

    /// Error and hang-up conditions are reported regardless of the armed
    /// mask; they are delivered to every armed direction so the next
    /// syscall can surface the concrete error.
    pub(crate) fn is_error(event: &Event) -> bool {
        (event.events as libc::c_int & (libc::EPOLLERR | libc::EPOLLHUP)) != 0
    }
}
