use std::cell::RefCell;
use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::rc::Rc;

use crate::poller::{closed_err, Direction, EventCallback, PollData, Poller};
use crate::sys;

pub(crate) fn would_block(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

pub(crate) fn interrupted(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::Interrupted
}

fn eof_err() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "end of stream")
}

/// An fd bound to a poller: the building block under every socket and timer.
///
/// Closing disarms any readiness interest, drops parked callbacks without
/// invoking them, removes the kernel registration and releases the fd.
pub(crate) struct IoObject {
    poller: Rc<Poller>,
    fd: RefCell<Option<OwnedFd>>,
    pd: Rc<PollData>,
}

impl IoObject {
    pub(crate) fn new(poller: Rc<Poller>, fd: OwnedFd) -> IoObject {
        let pd = Rc::new(PollData::new(fd.as_raw_fd()));
        IoObject {
            poller,
            fd: RefCell::new(Some(fd)),
            pd,
        }
    }

    pub(crate) fn poller(&self) -> &Rc<Poller> {
        &self.poller
    }

    pub(crate) fn pd(&self) -> &Rc<PollData> {
        &self.pd
    }

    /// `-1` once closed; every syscall on it then fails with `EBADF`, which
    /// is never reached because the operations check [`is_closed`] first.
    ///
    /// [`is_closed`]: IoObject::is_closed
    pub(crate) fn raw_fd(&self) -> RawFd {
        self.fd.borrow().as_ref().map_or(-1, AsRawFd::as_raw_fd)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.fd.borrow().is_none()
    }

    /// Parks `cb` for `direction` and arms one-shot readiness. On arm
    /// failure the callback is invoked inline with the error. Parking a
    /// second callback for the same direction replaces the first.
    pub(crate) fn schedule(&self, direction: Direction, cb: EventCallback) {
        if self.is_closed() {
            return cb(Err(closed_err()));
        }
        self.pd.set_callback(direction, cb);
        let res = match direction {
            Direction::Read => self.poller.set_read(&self.pd),
            Direction::Write => self.poller.set_write(&self.pd),
        };
        if let Err(err) = res {
            if let Some(cb) = self.pd.take_callback(direction) {
                cb(Err(err));
            }
        }
    }

    /// Like [`schedule`], but an arm failure drops the callback and returns
    /// the error to the caller instead; a parked callback is only ever
    /// invoked on readiness delivery.
    ///
    /// [`schedule`]: IoObject::schedule
    #[cfg_attr(
        not(any(target_os = "linux", target_os = "android")),
        allow(dead_code)
    )]
    pub(crate) fn try_schedule(&self, direction: Direction, cb: EventCallback) -> io::Result<()> {
        if self.is_closed() {
            return Err(closed_err());
        }
        self.pd.set_callback(direction, cb);
        let res = match direction {
            Direction::Read => self.poller.set_read(&self.pd),
            Direction::Write => self.poller.set_write(&self.pd),
        };
        if let Err(err) = res {
            drop(self.pd.take_callback(direction));
            return Err(err);
        }
        Ok(())
    }

    pub(crate) fn close(&self) {
        let fd = self.fd.borrow_mut().take();
        if fd.is_some() {
            self.poller.remove(&self.pd);
        }
        // fd drops here, after the kernel registration is gone.
    }
}

impl Drop for IoObject {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for IoObject {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("IoObject").field("pd", &self.pd).finish()
    }
}

// ===== attempt-then-arm operation helpers =====
//
// Each operation issues the nonblocking syscall first and completes inline
// when it makes progress; only a `WouldBlock` parks a continuation and arms
// readiness. The continuation re-runs the whole operation, which also
// absorbs spurious wakeups.

/// Best-effort single read. Zero bytes on a connection-oriented socket is
/// reported as `UnexpectedEof` (`eof_is_error`); for packet sockets an empty
/// datagram is a valid read.
pub(crate) fn start_read<F>(io: Rc<IoObject>, mut buf: Vec<u8>, eof_is_error: bool, cb: F)
where
    F: FnOnce(io::Result<usize>, Vec<u8>) + 'static,
{
    if io.is_closed() {
        return cb(Err(closed_err()), buf);
    }
    loop {
        match sys::net::recv(io.raw_fd(), &mut buf) {
            Ok(0) if eof_is_error && !buf.is_empty() => return cb(Err(eof_err()), buf),
            Ok(n) => return cb(Ok(n), buf),
            Err(ref err) if would_block(err) => {
                let obj = Rc::clone(&io);
                return io.schedule(
                    Direction::Read,
                    Box::new(move |res| match res {
                        Ok(()) => start_read(obj, buf, eof_is_error, cb),
                        Err(err) => cb(Err(err), buf),
                    }),
                );
            }
            Err(ref err) if interrupted(err) => {}
            Err(err) => return cb(Err(err), buf),
        }
    }
}

/// Reads until `buf` is full; short reads shrink the window and re-arm.
/// Completes with the full length, or with the first error (`UnexpectedEof`
/// if the stream ends early).
pub(crate) fn start_read_exact<F>(io: Rc<IoObject>, mut buf: Vec<u8>, mut done: usize, cb: F)
where
    F: FnOnce(io::Result<usize>, Vec<u8>) + 'static,
{
    if io.is_closed() {
        return cb(Err(closed_err()), buf);
    }
    loop {
        if done == buf.len() {
            return cb(Ok(done), buf);
        }
        match sys::net::recv(io.raw_fd(), &mut buf[done..]) {
            Ok(0) => return cb(Err(eof_err()), buf),
            Ok(n) => done += n,
            Err(ref err) if would_block(err) => {
                let obj = Rc::clone(&io);
                return io.schedule(
                    Direction::Read,
                    Box::new(move |res| match res {
                        Ok(()) => start_read_exact(obj, buf, done, cb),
                        Err(err) => cb(Err(err), buf),
                    }),
                );
            }
            Err(ref err) if interrupted(err) => {}
            Err(err) => return cb(Err(err), buf),
        }
    }
}

/// Best-effort single write.
pub(crate) fn start_write<F>(io: Rc<IoObject>, buf: Vec<u8>, cb: F)
where
    F: FnOnce(io::Result<usize>, Vec<u8>) + 'static,
{
    if io.is_closed() {
        return cb(Err(closed_err()), buf);
    }
    loop {
        match sys::net::send(io.raw_fd(), &buf) {
            Ok(n) => return cb(Ok(n), buf),
            Err(ref err) if would_block(err) => {
                let obj = Rc::clone(&io);
                return io.schedule(
                    Direction::Write,
                    Box::new(move |res| match res {
                        Ok(()) => start_write(obj, buf, cb),
                        Err(err) => cb(Err(err), buf),
                    }),
                );
            }
            Err(ref err) if interrupted(err) => {}
            Err(err) => return cb(Err(err), buf),
        }
    }
}

/// Writes until the kernel has accepted all of `buf`.
pub(crate) fn start_write_all<F>(io: Rc<IoObject>, buf: Vec<u8>, mut done: usize, cb: F)
where
    F: FnOnce(io::Result<usize>, Vec<u8>) + 'static,
{
    if io.is_closed() {
        return cb(Err(closed_err()), buf);
    }
    loop {
        if done == buf.len() {
            return cb(Ok(done), buf);
        }
        match sys::net::send(io.raw_fd(), &buf[done..]) {
            Ok(n) => done += n,
            Err(ref err) if would_block(err) => {
                let obj = Rc::clone(&io);
                return io.schedule(
                    Direction::Write,
                    Box::new(move |res| match res {
                        Ok(()) => start_write_all(obj, buf, done, cb),
                        Err(err) => cb(Err(err), buf),
                    }),
                );
            }
            Err(ref err) if interrupted(err) => {}
            Err(err) => return cb(Err(err), buf),
        }
    }
}

/// Single datagram receive with the sender's address.
pub(crate) fn start_recv_from<F>(io: Rc<IoObject>, mut buf: Vec<u8>, cb: F)
where
    F: FnOnce(io::Result<(usize, SocketAddr)>, Vec<u8>) + 'static,
{
    if io.is_closed() {
        return cb(Err(closed_err()), buf);
    }
    loop {
        match sys::net::recv_from(io.raw_fd(), &mut buf) {
            Ok(res) => return cb(Ok(res), buf),
            Err(ref err) if would_block(err) => {
                let obj = Rc::clone(&io);
                return io.schedule(
                    Direction::Read,
                    Box::new(move |res| match res {
                        Ok(()) => start_recv_from(obj, buf, cb),
                        Err(err) => cb(Err(err), buf),
                    }),
                );
            }
            Err(ref err) if interrupted(err) => {}
            Err(err) => return cb(Err(err), buf),
        }
    }
}

/// Single datagram send to `target`.
pub(crate) fn start_send_to<F>(io: Rc<IoObject>, buf: Vec<u8>, target: SocketAddr, cb: F)
where
    F: FnOnce(io::Result<usize>, Vec<u8>) + 'static,
{
    if io.is_closed() {
        return cb(Err(closed_err()), buf);
    }
    loop {
        match sys::net::send_to(io.raw_fd(), &buf, target) {
            Ok(n) => return cb(Ok(n), buf),
            Err(ref err) if would_block(err) => {
                let obj = Rc::clone(&io);
                return io.schedule(
                    Direction::Write,
                    Box::new(move |res| match res {
                        Ok(()) => start_send_to(obj, buf, target, cb),
                        Err(err) => cb(Err(err), buf),
                    }),
                );
            }
            Err(ref err) if interrupted(err) => {}
            Err(err) => return cb(Err(err), buf),
        }
    }
}
