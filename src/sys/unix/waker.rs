use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};

use crate::sys::unix::pipe;

/// Waker backed by a unix pipe.
///
/// One sentinel byte is written per wake; the receiving end is drained to
/// `WouldBlock` by the driving thread once the multiplexer reports it
/// readable. Both ends live for as long as the poller's shared state.
#[derive(Debug)]
pub(crate) struct Waker {
    sender: File,
    receiver: File,
}

impl Waker {
    pub(crate) fn new() -> io::Result<Waker> {
        let [receiver, sender] = pipe::new_raw()?;
        // SAFETY: `new_raw` returns two valid, owned file descriptors.
        let sender = unsafe { File::from_raw_fd(sender) };
        let receiver = unsafe { File::from_raw_fd(receiver) };
        Ok(Waker { sender, receiver })
    }

    pub(crate) fn wake(&self) -> io::Result<()> {
        match (&self.sender).write(&[1]) {
            Ok(_) => Ok(()),
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                // The pipe is full, which already guarantees a pending
                // wakeup. Empty it and try once more so the next waker is
                // not lost to an unlucky interleaving.
                self.drain();
                self.wake()
            }
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => self.wake(),
            Err(err) => Err(err),
        }
    }

    /// Empty the pipe's buffer. Errors are ignored; an empty pipe is the goal
    /// either way.
    pub(crate) fn drain(&self) {
        let mut buf = [0; 4096];
        loop {
            match (&self.receiver).read(&mut buf) {
                Ok(n) if n > 0 => continue,
                _ => return,
            }
        }
    }
}

impl AsRawFd for Waker {
    fn as_raw_fd(&self) -> RawFd {
        self.receiver.as_raw_fd()
    }
}
