use std::io;
use std::net::{Shutdown, SocketAddr, ToSocketAddrs};
use std::os::fd::OwnedFd;
use std::rc::Rc;

use crate::object::{self, interrupted, would_block, IoObject};
use crate::poller::{closed_err, Direction, Poller};
use crate::sys;
use crate::IoContext;

/// A nonblocking TCP connection bound to an [`IoContext`].
///
/// `TcpConn` is a cheap handle; clones refer to the same connection, which
/// is what completion callbacks capture to issue follow-up operations.
///
/// An asynchronous operation owns its buffer while outstanding and returns
/// it through the callback. At most one read and one write may be
/// outstanding at a time; issuing a second replaces the first.
#[derive(Clone, Debug)]
pub struct TcpConn {
    io: Rc<IoObject>,
}

impl TcpConn {
    /// Connects to `addr` (resolved with the platform resolver) and binds
    /// the resulting nonblocking stream to `ioc`.
    pub fn connect<A: ToSocketAddrs>(ioc: &IoContext, addr: A) -> io::Result<TcpConn> {
        let stream = std::net::TcpStream::connect(addr)?;
        stream.set_nonblocking(true)?;
        #[cfg(any(target_os = "ios", target_os = "macos"))]
        {
            use std::os::fd::AsRawFd;
            sys::net::set_no_sigpipe(stream.as_raw_fd())?;
        }
        Ok(TcpConn::from_fd(Rc::clone(ioc.poller()), stream.into()))
    }

    pub(crate) fn from_fd(poller: Rc<Poller>, fd: OwnedFd) -> TcpConn {
        TcpConn {
            io: Rc::new(IoObject::new(poller, fd)),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        sys::net::local_addr(self.io.raw_fd())
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        sys::net::peer_addr(self.io.raw_fd())
    }

    /// Single nonblocking read; may fail with `WouldBlock`. A return of
    /// `Ok(0)` on a nonempty buffer means the peer closed the stream.
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        sys::net::recv(self.io.raw_fd(), buf)
    }

    /// Single nonblocking write; may fail with `WouldBlock`.
    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        sys::net::send(self.io.raw_fd(), buf)
    }

    /// Best-effort asynchronous read: completes inline when the socket is
    /// already readable, otherwise after the next readiness. The callback
    /// receives the byte count and the buffer back; a closed stream
    /// completes with [`UnexpectedEof`].
    ///
    /// [`UnexpectedEof`]: std::io::ErrorKind::UnexpectedEof
    pub fn async_read<F>(&self, buf: Vec<u8>, cb: F)
    where
        F: FnOnce(io::Result<usize>, Vec<u8>) + 'static,
    {
        object::start_read(Rc::clone(&self.io), buf, true, cb);
    }

    /// Reads until the buffer is full, re-arming across short reads.
    pub fn async_read_exact<F>(&self, buf: Vec<u8>, cb: F)
    where
        F: FnOnce(io::Result<usize>, Vec<u8>) + 'static,
    {
        object::start_read_exact(Rc::clone(&self.io), buf, 0, cb);
    }

    /// Best-effort asynchronous write.
    pub fn async_write<F>(&self, buf: Vec<u8>, cb: F)
    where
        F: FnOnce(io::Result<usize>, Vec<u8>) + 'static,
    {
        object::start_write(Rc::clone(&self.io), buf, cb);
    }

    /// Writes until the kernel has accepted the whole buffer. A dead peer
    /// surfaces as [`BrokenPipe`] or [`ConnectionReset`].
    ///
    /// [`BrokenPipe`]: std::io::ErrorKind::BrokenPipe
    /// [`ConnectionReset`]: std::io::ErrorKind::ConnectionReset
    pub fn async_write_all<F>(&self, buf: Vec<u8>, cb: F)
    where
        F: FnOnce(io::Result<usize>, Vec<u8>) + 'static,
    {
        object::start_write_all(Rc::clone(&self.io), buf, 0, cb);
    }

    /// Shuts down one or both halves of the connection, letting the peer
    /// observe the teardown before [`close`] drops the fd.
    ///
    /// [`close`]: TcpConn::close
    pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        sys::net::shutdown(self.io.raw_fd(), how)
    }

    /// Disarms interest, drops any parked callbacks uninvoked and releases
    /// the fd. Outstanding operations never complete.
    pub fn close(&self) {
        self.io.close();
    }

    pub fn is_closed(&self) -> bool {
        self.io.is_closed()
    }
}

/// A nonblocking TCP listener bound to an [`IoContext`].
#[derive(Clone, Debug)]
pub struct TcpListener {
    io: Rc<IoObject>,
}

impl TcpListener {
    pub fn bind<A: ToSocketAddrs>(ioc: &IoContext, addr: A) -> io::Result<TcpListener> {
        let listener = std::net::TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(TcpListener {
            io: Rc::new(IoObject::new(Rc::clone(ioc.poller()), listener.into())),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        sys::net::local_addr(self.io.raw_fd())
    }

    /// Accepts one connection, inline if one is already queued. The new
    /// connection is nonblocking and bound to the same context.
    pub fn async_accept<F>(&self, cb: F)
    where
        F: FnOnce(io::Result<TcpConn>) + 'static,
    {
        start_accept(Rc::clone(&self.io), cb);
    }

    /// Synchronous accept; may fail with `WouldBlock`.
    pub fn accept(&self) -> io::Result<(TcpConn, SocketAddr)> {
        let (fd, addr) = sys::net::accept(self.io.raw_fd())?;
        Ok((TcpConn::from_fd(Rc::clone(self.io.poller()), fd), addr))
    }

    pub fn close(&self) {
        self.io.close();
    }

    pub fn is_closed(&self) -> bool {
        self.io.is_closed()
    }
}

fn start_accept<F>(io: Rc<IoObject>, cb: F)
where
    F: FnOnce(io::Result<TcpConn>) + 'static,
{
    if io.is_closed() {
        return cb(Err(closed_err()));
    }
    loop {
        match sys::net::accept(io.raw_fd()) {
            Ok((fd, _)) => return cb(Ok(TcpConn::from_fd(Rc::clone(io.poller()), fd))),
            Err(ref err) if would_block(err) => {
                let obj = Rc::clone(&io);
                return io.schedule(
                    Direction::Read,
                    Box::new(move |res| match res {
                        Ok(()) => start_accept(obj, cb),
                        Err(err) => cb(Err(err)),
                    }),
                );
            }
            Err(ref err) if interrupted(err) => {}
            Err(err) => return cb(Err(err)),
        }
    }
}
