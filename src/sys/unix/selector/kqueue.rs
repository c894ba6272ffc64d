use std::cell::RefCell;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;
use std::{cmp, io, ptr};

use log::warn;

use crate::{Interest, Token};

// Type of the `nchanges` and `nevents` parameters in the `kevent` function.
#[cfg(not(target_os = "netbsd"))]
type Count = libc::c_int;
#[cfg(target_os = "netbsd")]
type Count = libc::size_t;

// Type of the `filter` field in the `kevent` structure.
#[cfg(any(target_os = "dragonfly", target_os = "freebsd", target_os = "openbsd"))]
type Filter = libc::c_short;
#[cfg(any(target_os = "macos", target_os = "ios"))]
type Filter = i16;
#[cfg(target_os = "netbsd")]
type Filter = u32;

// Type of the `flags` field in the `kevent` structure.
#[cfg(any(target_os = "dragonfly", target_os = "freebsd", target_os = "openbsd"))]
type Flags = libc::c_ushort;
#[cfg(any(target_os = "macos", target_os = "ios"))]
type Flags = u16;
#[cfg(target_os = "netbsd")]
type Flags = u32;

// Type of the `udata` field in the `kevent` structure.
#[cfg(not(target_os = "netbsd"))]
type UData = *mut libc::c_void;
#[cfg(target_os = "netbsd")]
type UData = libc::intptr_t;

macro_rules! kevent {
    ($id: expr, $filter: expr, $flags: expr, $data: expr) => {
        libc::kevent {
            ident: $id as libc::uintptr_t,
            filter: $filter as Filter,
            flags: $flags as Flags,
            fflags: 0,
            data: 0,
            udata: $data as UData,
        }
    };
}

/// kqueue-backed selector.
///
/// Interest changes are accumulated in a scratch list and submitted together
/// with the next `kevent(2)` wait, the idiom kqueue is designed around.
/// Errors for individual changes come back in the event list flagged
/// `EV_ERROR` and are filtered out in [`select`], since the conditions they
/// report (filter already auto-deleted, fd closed before the flush) are
/// expected under one-shot semantics.
///
/// [`select`]: Selector::select
pub(crate) struct Selector {
    kq: OwnedFd,
    changes: RefCell<Vec<libc::kevent>>,
}

impl std::fmt::Debug for Selector {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("Selector").field("kq", &self.kq).finish()
    }
}

impl Selector {
    pub fn new() -> io::Result<Selector> {
        let kq = syscall!(kqueue())
            .and_then(|kq| syscall!(fcntl(kq, libc::F_SETFD, libc::FD_CLOEXEC)).map(|_| kq))?;
        // SAFETY: `kqueue(2)` ensures the fd is valid.
        let kq = unsafe { OwnedFd::from_raw_fd(kq) };
        Ok(Selector {
            kq,
            changes: RefCell::new(Vec::with_capacity(128)),
        })
    }

    pub fn select(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        let timeout = timeout.map(|to| libc::timespec {
            tv_sec: cmp::min(to.as_secs(), libc::time_t::MAX as u64) as libc::time_t,
            // `Duration::subsec_nanos` is guaranteed to be less than one
            // billion, making the cast to i32 safe; the cast itself is
            // needed for platforms where C's long is only 32 bits.
            tv_nsec: libc::c_long::from(to.subsec_nanos() as i32),
        });
        let timeout = timeout
            .as_ref()
            .map(|s| s as *const _)
            .unwrap_or(ptr::null());

        let mut changes = self.changes.borrow_mut();
        events.clear();
        let res = syscall!(kevent(
            self.kq.as_raw_fd(),
            changes.as_ptr(),
            changes.len() as Count,
            events.as_mut_ptr(),
            events.capacity() as Count,
            timeout,
        ))
        .map(|n_events| {
            // SAFETY: `kevent` ensures that `n_events` are assigned.
            unsafe { events.set_len(n_events as usize) };
        });
        changes.clear();
        res?;

        events.retain(|event| {
            if (event.flags & libc::EV_ERROR as Flags) == 0 {
                return true;
            }
            match event.data as i32 {
                0 | libc::ENOENT | libc::EPIPE | libc::EBADF => {}
                err => warn!("unexpected kevent change error: {}", err),
            }
            false
        });
        Ok(())
    }

    /// Permanent level-triggered read registration for the waker pipe.
    pub fn register_waker(&self, fd: RawFd, token: Token) -> io::Result<()> {
        let mut kevent = kevent!(fd, libc::EVFILT_READ, libc::EV_ADD, usize::from(token));
        syscall!(kevent(
            self.kq.as_raw_fd(),
            &kevent,
            1,
            &mut kevent,
            0,
            ptr::null()
        ))
        .map(|_| ())
    }

    /// Arm one-shot filters for the directions in `added`; filters are
    /// independent on kqueue, so the existing ones are left alone.
    pub fn arm(
        &self,
        fd: RawFd,
        token: Token,
        _registered: bool,
        added: Interest,
        _full: Interest,
    ) -> io::Result<()> {
        let flags = libc::EV_ADD | libc::EV_ONESHOT;
        let mut changes = self.changes.borrow_mut();
        if added.is_readable() {
            changes.push(kevent!(fd, libc::EVFILT_READ, flags, usize::from(token)));
        }
        if added.is_writable() {
            changes.push(kevent!(fd, libc::EVFILT_WRITE, flags, usize::from(token)));
        }
        Ok(())
    }

    pub fn disarm(
        &self,
        fd: RawFd,
        token: Token,
        removed: Interest,
        _remaining: Option<Interest>,
    ) -> io::Result<()> {
        let mut changes = self.changes.borrow_mut();
        if removed.is_readable() {
            changes.push(kevent!(
                fd,
                libc::EVFILT_READ,
                libc::EV_DELETE,
                usize::from(token)
            ));
        }
        if removed.is_writable() {
            changes.push(kevent!(
                fd,
                libc::EVFILT_WRITE,
                libc::EV_DELETE,
                usize::from(token)
            ));
        }
        Ok(())
    }

    /// One-shot delivery only removes the filter that fired; nothing to do
    /// for the surviving direction.
    pub fn resubmit(&self, _fd: RawFd, _token: Token, _interests: Interest) -> io::Result<()> {
        Ok(())
    }

    pub fn deregister(&self, fd: RawFd) -> io::Result<()> {
        let mut changes = self.changes.borrow_mut();
        changes.push(kevent!(fd, libc::EVFILT_READ, libc::EV_DELETE, 0));
        changes.push(kevent!(fd, libc::EVFILT_WRITE, libc::EV_DELETE, 0));
        Ok(())
    }

    /// Kernel timer keyed by the owning source's token; single-shot or
    /// periodic.
    pub fn set_timer(&self, token: Token, delay: Duration, repeating: bool) -> io::Result<()> {
        let mut flags = libc::EV_ADD;
        if !repeating {
            flags |= libc::EV_ONESHOT;
        }
        let mut kevent = kevent!(
            usize::from(token),
            libc::EVFILT_TIMER,
            flags,
            usize::from(token)
        );
        // Nanosecond units where the platform has them; the EVFILT_TIMER
        // default unit is milliseconds.
        #[cfg(any(
            target_os = "freebsd",
            target_os = "ios",
            target_os = "macos",
            target_os = "netbsd",
        ))]
        {
            kevent.fflags = libc::NOTE_NSECONDS;
            kevent.data = cmp::min(delay.as_nanos(), i64::MAX as u128) as _;
        }
        #[cfg(any(target_os = "dragonfly", target_os = "openbsd"))]
        {
            kevent.data = cmp::min(delay.as_millis().max(1), i64::MAX as u128) as _;
        }
        self.changes.borrow_mut().push(kevent);
        Ok(())
    }

    pub fn cancel_timer(&self, token: Token) -> io::Result<()> {
        let kevent = kevent!(
            usize::from(token),
            libc::EVFILT_TIMER,
            libc::EV_DELETE,
            usize::from(token)
        );
        self.changes.borrow_mut().push(kevent);
        Ok(())
    }
}

impl AsRawFd for Selector {
    fn as_raw_fd(&self) -> RawFd {
        self.kq.as_raw_fd()
    }
}

pub(crate) type Event = libc::kevent;
pub(crate) type Events = Vec<Event>;

pub(crate) mod event {
    use super::{Event, Flags};
    use crate::Token;

    pub(crate) fn token(event: &Event) -> Token {
        Token(event.udata as usize)
    }

    pub(crate) fn is_readable(event: &Event) -> bool {
        event.filter == libc::EVFILT_READ as super::Filter
            || event.filter == libc::EVFILT_TIMER as super::Filter
    }

    pub(crate) fn is_writable(event: &Event) -> bool {
        event.filter == libc::EVFILT_WRITE as super::Filter
    }

    pub(crate) fn is_error(event: &Event) -> bool {
        (event.flags & libc::EV_EOF as Flags) != 0 && event.fflags != 0
    }
}
