use std::io;
use std::os::fd::RawFd;

/// Create a new nonblocking, close-on-exec pipe; `[read, write]`.
pub(crate) fn new_raw() -> io::Result<[RawFd; 2]> {
    let mut fds: [RawFd; 2] = [-1, -1];

    #[cfg(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux",
        target_os = "netbsd",
        target_os = "openbsd",
    ))]
    syscall!(pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK))?;

    // Darwin has no `pipe2(2)`, so the flags are applied in a second step.
    // The window in which another thread could `fork` is accepted.
    #[cfg(any(target_os = "ios", target_os = "macos"))]
    {
        syscall!(pipe(fds.as_mut_ptr()))?;
        for fd in &fds {
            if let Err(err) = syscall!(fcntl(*fd, libc::F_SETFL, libc::O_NONBLOCK))
                .and_then(|_| syscall!(fcntl(*fd, libc::F_SETFD, libc::FD_CLOEXEC)))
            {
                unsafe {
                    libc::close(fds[0]);
                    libc::close(fds[1]);
                }
                return Err(err);
            }
        }
    }

    Ok(fds)
}
