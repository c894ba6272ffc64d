use std::io;
use std::mem::MaybeUninit;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::time::Duration;

/// Nonblocking monotonic timer fd; expirations are consumed with `read(2)`
/// through the ordinary readiness path.
pub(crate) fn new() -> io::Result<OwnedFd> {
    let fd = syscall!(timerfd_create(
        libc::CLOCK_MONOTONIC,
        libc::TFD_NONBLOCK | libc::TFD_CLOEXEC
    ))?;
    // SAFETY: `timerfd_create(2)` ensures the fd is valid.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

pub(crate) fn set(fd: RawFd, initial: Duration, interval: Option<Duration>) -> io::Result<()> {
    let spec = libc::itimerspec {
        // An all-zero `it_value` would disarm the timer; an immediate
        // schedule still has to fire.
        it_value: to_timespec(initial.max(Duration::from_nanos(1))),
        it_interval: to_timespec(interval.unwrap_or(Duration::ZERO)),
    };
    syscall!(timerfd_settime(fd, 0, &spec, ptr::null_mut())).map(|_| ())
}

pub(crate) fn clear(fd: RawFd) -> io::Result<()> {
    // SAFETY: all-zeroes is a valid itimerspec, and disarms the timer.
    let spec: libc::itimerspec = unsafe { std::mem::zeroed() };
    syscall!(timerfd_settime(fd, 0, &spec, ptr::null_mut())).map(|_| ())
}

/// Number of expirations since the last read; `WouldBlock` when none.
pub(crate) fn read_expirations(fd: RawFd) -> io::Result<u64> {
    let mut count = MaybeUninit::<u64>::uninit();
    let n = syscall!(read(
        fd,
        count.as_mut_ptr() as *mut libc::c_void,
        std::mem::size_of::<u64>()
    ))?;
    debug_assert_eq!(n as usize, std::mem::size_of::<u64>());
    // SAFETY: a successful read of 8 bytes initialised the counter.
    Ok(unsafe { count.assume_init() })
}

fn to_timespec(dur: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: dur.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
        tv_nsec: libc::c_long::from(dur.subsec_nanos() as i32),
    }
}
