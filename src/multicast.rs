//! IPv4 multicast over UDP: group membership, outbound interface selection
//! and packet I/O against an [`IoContext`].
//!
//! [`IoContext`]: crate::IoContext

use std::cell::RefCell;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::rc::Rc;

use crate::object::{self, interrupted, would_block, IoObject};
use crate::sys;
use crate::IoContext;

/// A UDP peer for IPv4 multicast.
///
/// The peer owns a nonblocking UDP socket with `SO_REUSEADDR` set, so
/// several receivers can share a group port. Construction pins down the
/// platform-dependent socket options: multicast loopback is explicitly
/// disabled and the TTL explicitly set to 1, making the defaults observable
/// and portable.
///
/// Sends go out on the interface selected with [`set_outbound`] (the
/// routing default until then); group membership via [`join`] applies to the
/// same interface.
///
/// [`set_outbound`]: UdpPeer::set_outbound
/// [`join`]: UdpPeer::join
#[derive(Clone, Debug)]
pub struct UdpPeer {
    io: Rc<IoObject>,
    state: Rc<RefCell<PeerState>>,
}

#[derive(Debug)]
struct PeerState {
    local_addr: SocketAddr,
    outbound: Option<(String, Ipv4Addr)>,
    joined: Vec<Ipv4Addr>,
}

impl UdpPeer {
    /// Binds a peer to `addr`.
    ///
    /// The grammar follows the usual conventions: an empty string and `":0"`
    /// mean any address on an ephemeral port, `":5000"` means any address on
    /// that port, and `ip:port` / `host:port` go through the platform
    /// resolver. A bare address or hostname without a port is rejected.
    pub fn bind(ioc: &IoContext, addr: &str) -> io::Result<UdpPeer> {
        let addr = resolve_bind_addr(addr)?;

        let fd = sys::net::new_socket(libc::AF_INET, libc::SOCK_DGRAM)?;
        let local_addr = {
            use std::os::fd::AsRawFd;
            let raw = fd.as_raw_fd();
            sys::net::set_reuseaddr(raw)?;
            sys::net::bind(raw, addr)?;
            // Loopback off and TTL 1, whatever the OS default was.
            sys::net::set_multicast_loop_v4(raw, false)?;
            sys::net::set_multicast_ttl_v4(raw, 1)?;
            sys::net::local_addr(raw)?
        };

        Ok(UdpPeer {
            io: Rc::new(IoObject::new(Rc::clone(ioc.poller()), fd)),
            state: Rc::new(RefCell::new(PeerState {
                local_addr,
                outbound: None,
                joined: Vec::new(),
            })),
        })
    }

    /// The effective local address captured after bind.
    pub fn local_addr(&self) -> SocketAddr {
        self.state.borrow().local_addr
    }

    /// Joins `group` on the selected outbound interface, or the system
    /// default interface when none was selected. The address must be IPv4
    /// multicast (`224.0.0.0/4`).
    pub fn join(&self, group: Ipv4Addr) -> io::Result<()> {
        if !group.is_multicast() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a multicast address: {}", group),
            ));
        }
        let iface = self.outbound_ip();
        sys::net::add_membership_v4(self.io.raw_fd(), group, iface)?;
        self.state.borrow_mut().joined.push(group);
        Ok(())
    }

    /// Drops membership of `group`; a no-op if it was never joined.
    pub fn leave(&self, group: Ipv4Addr) -> io::Result<()> {
        {
            let mut state = self.state.borrow_mut();
            match state.joined.iter().position(|g| *g == group) {
                Some(index) => state.joined.remove(index),
                None => return Ok(()),
            };
        }
        let iface = self.outbound_ip();
        sys::net::drop_membership_v4(self.io.raw_fd(), group, iface)
    }

    /// Groups currently joined through this peer.
    pub fn joined(&self) -> Vec<Ipv4Addr> {
        self.state.borrow().joined.clone()
    }

    /// Selects the outbound interface for multicast sends. The interface
    /// must have the multicast capability and at least one IPv4 address; its
    /// first IPv4 address is written to `IP_MULTICAST_IF`.
    pub fn set_outbound(&self, ifname: &str) -> io::Result<()> {
        let addr = sys::net::multicast_interface_addr_v4(ifname)?;
        sys::net::set_multicast_if_v4(self.io.raw_fd(), addr)?;
        self.state.borrow_mut().outbound = Some((ifname.to_string(), addr));
        Ok(())
    }

    /// The explicitly selected outbound interface, `None` until
    /// [`set_outbound`] succeeds.
    ///
    /// [`set_outbound`]: UdpPeer::set_outbound
    pub fn outbound(&self) -> Option<(String, Ipv4Addr)> {
        self.state.borrow().outbound.clone()
    }

    /// Toggles `IP_MULTICAST_LOOP`: whether this host's own multicast sends
    /// are delivered back to local receivers.
    pub fn set_loop(&self, on: bool) -> io::Result<()> {
        sys::net::set_multicast_loop_v4(self.io.raw_fd(), on)
    }

    /// Queries `IP_MULTICAST_LOOP`.
    pub fn loop_enabled(&self) -> io::Result<bool> {
        sys::net::multicast_loop_v4(self.io.raw_fd())
    }

    /// Sets `IP_MULTICAST_TTL`. The default of 1 keeps packets on the local
    /// network.
    pub fn set_ttl(&self, ttl: u8) -> io::Result<()> {
        sys::net::set_multicast_ttl_v4(self.io.raw_fd(), ttl)
    }

    /// Queries `IP_MULTICAST_TTL`.
    pub fn ttl(&self) -> io::Result<u8> {
        sys::net::multicast_ttl_v4(self.io.raw_fd())
    }

    /// Sends one datagram to `target`, retrying until the kernel accepts it.
    pub fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        loop {
            match sys::net::send_to(self.io.raw_fd(), buf, target) {
                Err(ref err) if would_block(err) || interrupted(err) => {}
                res => return res,
            }
        }
    }

    /// Receives one datagram; may fail with `WouldBlock`.
    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        sys::net::recv_from(self.io.raw_fd(), buf)
    }

    /// Sends one datagram to `target`, arming write interest if the kernel
    /// pushes back.
    pub fn async_send_to<F>(&self, buf: Vec<u8>, target: SocketAddr, cb: F)
    where
        F: FnOnce(io::Result<usize>, Vec<u8>) + 'static,
    {
        object::start_send_to(Rc::clone(&self.io), buf, target, cb);
    }

    /// Receives one datagram and the source address it came from.
    pub fn async_recv_from<F>(&self, buf: Vec<u8>, cb: F)
    where
        F: FnOnce(io::Result<(usize, SocketAddr)>, Vec<u8>) + 'static,
    {
        object::start_recv_from(Rc::clone(&self.io), buf, cb);
    }

    /// Disarms interest, drops any parked callbacks uninvoked and releases
    /// the socket. Memberships die with the fd.
    pub fn close(&self) {
        self.io.close();
    }

    pub fn is_closed(&self) -> bool {
        self.io.is_closed()
    }

    fn outbound_ip(&self) -> Ipv4Addr {
        self.state
            .borrow()
            .outbound
            .as_ref()
            .map_or(Ipv4Addr::UNSPECIFIED, |(_, ip)| *ip)
    }
}

fn resolve_bind_addr(addr: &str) -> io::Result<SocketAddr> {
    if addr.is_empty() {
        return Ok(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)));
    }
    if let Some(port) = addr.strip_prefix(':') {
        let port = port.parse::<u16>().map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("bad port in {:?}", addr))
        })?;
        return Ok(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)));
    }
    // `ip:port` or `host:port`; a missing port fails resolution. The peer's
    // socket is IPv4, so IPv6-only results are rejected.
    addr.to_socket_addrs()?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no IPv4 address for {:?}", addr),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::resolve_bind_addr;
    use std::net::{Ipv4Addr, SocketAddr};

    #[test]
    fn bind_addr_grammar() {
        assert_eq!(
            resolve_bind_addr("").unwrap(),
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        );
        assert_eq!(
            resolve_bind_addr(":0").unwrap(),
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        );
        assert_eq!(
            resolve_bind_addr(":4555").unwrap(),
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 4555))
        );
        assert_eq!(
            resolve_bind_addr("127.0.0.1:8080").unwrap(),
            SocketAddr::from((Ipv4Addr::LOCALHOST, 8080))
        );

        // A missing port is user error, not something to guess.
        assert!(resolve_bind_addr("0.0.0.0").is_err());
        assert!(resolve_bind_addr("localhost").is_err());
        assert!(resolve_bind_addr(":not-a-port").is_err());
    }
}
