use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::rc::Rc;

use crate::object::{self, IoObject};
use crate::sys;
use crate::IoContext;

/// A nonblocking UDP endpoint bound to an [`IoContext`].
///
/// Two shapes share the type, mirroring the two ways of constructing it:
/// [`bind`] produces a packet socket addressed per datagram with
/// `send_to`/`recv_from`, while [`connect`] produces a connected socket with
/// a fixed peer and plain `send`/`recv`.
///
/// [`bind`]: UdpSocket::bind
/// [`connect`]: UdpSocket::connect
#[derive(Clone, Debug)]
pub struct UdpSocket {
    io: Rc<IoObject>,
    peer: Option<SocketAddr>,
}

impl UdpSocket {
    /// Binds a packet socket to `addr`.
    pub fn bind(ioc: &IoContext, addr: SocketAddr) -> io::Result<UdpSocket> {
        let fd = sys::net::new_socket(domain(&addr), libc::SOCK_DGRAM)?;
        {
            use std::os::fd::AsRawFd;
            sys::net::bind(fd.as_raw_fd(), addr)?;
        }
        Ok(UdpSocket {
            io: Rc::new(IoObject::new(Rc::clone(ioc.poller()), fd)),
            peer: None,
        })
    }

    /// Creates a socket connected to `addr` (resolved with the platform
    /// resolver); `send`/`recv` then address the fixed peer.
    pub fn connect<A: ToSocketAddrs>(ioc: &IoContext, addr: A) -> io::Result<UdpSocket> {
        let addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing")
        })?;
        let fd = sys::net::new_socket(domain(&addr), libc::SOCK_DGRAM)?;
        {
            use std::os::fd::AsRawFd;
            sys::net::connect(fd.as_raw_fd(), addr)?;
        }
        Ok(UdpSocket {
            io: Rc::new(IoObject::new(Rc::clone(ioc.poller()), fd)),
            peer: Some(addr),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        sys::net::local_addr(self.io.raw_fd())
    }

    /// The connected peer, if this socket was built with [`connect`].
    ///
    /// [`connect`]: UdpSocket::connect
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        sys::net::recv(self.io.raw_fd(), buf)
    }

    pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
        sys::net::send(self.io.raw_fd(), buf)
    }

    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        sys::net::recv_from(self.io.raw_fd(), buf)
    }

    pub fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        sys::net::send_to(self.io.raw_fd(), buf, target)
    }

    /// Receives one datagram from the connected peer. An empty datagram is
    /// a valid zero-length read, not end-of-stream.
    pub fn async_recv<F>(&self, buf: Vec<u8>, cb: F)
    where
        F: FnOnce(io::Result<usize>, Vec<u8>) + 'static,
    {
        object::start_read(Rc::clone(&self.io), buf, false, cb);
    }

    /// Sends `buf` as one datagram to the connected peer.
    pub fn async_send<F>(&self, buf: Vec<u8>, cb: F)
    where
        F: FnOnce(io::Result<usize>, Vec<u8>) + 'static,
    {
        object::start_write(Rc::clone(&self.io), buf, cb);
    }

    /// Receives one datagram and the address it came from.
    pub fn async_recv_from<F>(&self, buf: Vec<u8>, cb: F)
    where
        F: FnOnce(io::Result<(usize, SocketAddr)>, Vec<u8>) + 'static,
    {
        object::start_recv_from(Rc::clone(&self.io), buf, cb);
    }

    /// Sends `buf` as one datagram to `target`.
    pub fn async_send_to<F>(&self, buf: Vec<u8>, target: SocketAddr, cb: F)
    where
        F: FnOnce(io::Result<usize>, Vec<u8>) + 'static,
    {
        object::start_send_to(Rc::clone(&self.io), buf, target, cb);
    }

    /// Disarms interest, drops any parked callbacks uninvoked and releases
    /// the fd.
    pub fn close(&self) {
        self.io.close();
    }

    pub fn is_closed(&self) -> bool {
        self.io.is_closed()
    }
}

fn domain(addr: &SocketAddr) -> libc::c_int {
    match addr {
        SocketAddr::V4(..) => libc::AF_INET,
        SocketAddr::V6(..) => libc::AF_INET6,
    }
}
