use std::ffi::CStr;
use std::io;
use std::mem::{self, MaybeUninit};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

/// Writes never raise `SIGPIPE`; a dead peer surfaces as `EPIPE` on the
/// operation instead.
#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

pub(crate) fn new_socket(domain: libc::c_int, socket_type: libc::c_int) -> io::Result<OwnedFd> {
    #[cfg(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux",
        target_os = "netbsd",
        target_os = "openbsd",
    ))]
    let socket_type = socket_type | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC;

    let fd = syscall!(socket(domain, socket_type, 0))?;
    // SAFETY: `socket(2)` ensures the fd is valid.
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    // Darwin doesn't have `SOCK_NONBLOCK` or `SOCK_CLOEXEC`; fall back to
    // fcntl, and set `SO_NOSIGPIPE` (mirrors what libstd does).
    #[cfg(any(target_os = "ios", target_os = "macos"))]
    {
        use std::os::fd::AsRawFd;
        let raw = fd.as_raw_fd();
        syscall!(fcntl(raw, libc::F_SETFL, libc::O_NONBLOCK))?;
        syscall!(fcntl(raw, libc::F_SETFD, libc::FD_CLOEXEC))?;
        set_no_sigpipe(raw)?;
    }

    Ok(fd)
}

#[cfg(any(target_os = "ios", target_os = "macos"))]
pub(crate) fn set_no_sigpipe(fd: RawFd) -> io::Result<()> {
    let nosigpipe: libc::c_int = 1;
    syscall!(setsockopt(
        fd,
        libc::SOL_SOCKET,
        libc::SO_NOSIGPIPE,
        &nosigpipe as *const _ as *const libc::c_void,
        mem::size_of::<libc::c_int>() as libc::socklen_t,
    ))
    .map(|_| ())
}

pub(crate) fn set_reuseaddr(fd: RawFd) -> io::Result<()> {
    let yes: libc::c_int = 1;
    syscall!(setsockopt(
        fd,
        libc::SOL_SOCKET,
        libc::SO_REUSEADDR,
        &yes as *const _ as *const libc::c_void,
        mem::size_of::<libc::c_int>() as libc::socklen_t,
    ))
    .map(|_| ())
}

// ===== sockaddr conversion =====

/// `sockaddr_storage` filled from a `SocketAddr`, plus the populated length.
pub(crate) fn to_sockaddr(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    // SAFETY: all-zeroes is a valid sockaddr_storage.
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(addr) => {
            let sin = &mut storage as *mut _ as *mut libc::sockaddr_in;
            // SAFETY: sockaddr_in fits in sockaddr_storage.
            unsafe {
                (*sin).sin_family = libc::AF_INET as libc::sa_family_t;
                (*sin).sin_port = addr.port().to_be();
                (*sin).sin_addr = to_in_addr(addr.ip());
            }
            mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(addr) => {
            let sin6 = &mut storage as *mut _ as *mut libc::sockaddr_in6;
            // SAFETY: sockaddr_in6 fits in sockaddr_storage.
            unsafe {
                (*sin6).sin6_family = libc::AF_INET6 as libc::sa_family_t;
                (*sin6).sin6_port = addr.port().to_be();
                (*sin6).sin6_addr = libc::in6_addr {
                    s6_addr: addr.ip().octets(),
                };
                (*sin6).sin6_flowinfo = addr.flowinfo();
                (*sin6).sin6_scope_id = addr.scope_id();
            }
            mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as libc::socklen_t)
}

/// `storage` must hold a `sockaddr_in` or `sockaddr_in6` written by the
/// kernel.
pub(crate) unsafe fn from_sockaddr(
    storage: *const libc::sockaddr_storage,
) -> io::Result<SocketAddr> {
    match (*storage).ss_family as libc::c_int {
        libc::AF_INET => {
            let sin = storage as *const libc::sockaddr_in;
            let ip = Ipv4Addr::from((*sin).sin_addr.s_addr.to_ne_bytes());
            Ok(SocketAddr::V4(SocketAddrV4::new(
                ip,
                u16::from_be((*sin).sin_port),
            )))
        }
        libc::AF_INET6 => {
            let sin6 = storage as *const libc::sockaddr_in6;
            Ok(SocketAddr::V6(SocketAddrV6::new(
                (*sin6).sin6_addr.s6_addr.into(),
                u16::from_be((*sin6).sin6_port),
                (*sin6).sin6_flowinfo,
                (*sin6).sin6_scope_id,
            )))
        }
        _ => Err(io::ErrorKind::InvalidInput.into()),
    }
}

fn to_in_addr(ip: &Ipv4Addr) -> libc::in_addr {
    // `s_addr` is stored in network byte order; the octets already are.
    libc::in_addr {
        s_addr: u32::from_ne_bytes(ip.octets()),
    }
}

// ===== basic socket calls =====

pub(crate) fn bind(fd: RawFd, addr: SocketAddr) -> io::Result<()> {
    let (storage, len) = to_sockaddr(&addr);
    syscall!(bind(fd, &storage as *const _ as *const libc::sockaddr, len)).map(|_| ())
}

pub(crate) fn connect(fd: RawFd, addr: SocketAddr) -> io::Result<()> {
    let (storage, len) = to_sockaddr(&addr);
    syscall!(connect(fd, &storage as *const _ as *const libc::sockaddr, len)).map(|_| ())
}

pub(crate) fn local_addr(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: MaybeUninit<libc::sockaddr_storage> = MaybeUninit::zeroed();
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    syscall!(getsockname(
        fd,
        storage.as_mut_ptr() as *mut libc::sockaddr,
        &mut len
    ))?;
    // SAFETY: the kernel initialised `len` bytes of the storage.
    unsafe { from_sockaddr(storage.as_ptr()) }
}

pub(crate) fn peer_addr(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: MaybeUninit<libc::sockaddr_storage> = MaybeUninit::zeroed();
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    syscall!(getpeername(
        fd,
        storage.as_mut_ptr() as *mut libc::sockaddr,
        &mut len
    ))?;
    // SAFETY: the kernel initialised `len` bytes of the storage.
    unsafe { from_sockaddr(storage.as_ptr()) }
}

pub(crate) fn recv(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    syscall!(read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len())).map(|n| n as usize)
}

pub(crate) fn send(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    syscall!(send(
        fd,
        buf.as_ptr() as *const libc::c_void,
        buf.len(),
        SEND_FLAGS
    ))
    .map(|n| n as usize)
}

pub(crate) fn recv_from(fd: RawFd, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
    let mut storage: MaybeUninit<libc::sockaddr_storage> = MaybeUninit::zeroed();
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let n = syscall!(recvfrom(
        fd,
        buf.as_mut_ptr() as *mut libc::c_void,
        buf.len(),
        0,
        storage.as_mut_ptr() as *mut libc::sockaddr,
        &mut len,
    ))?;
    // SAFETY: the kernel initialised `len` bytes of the storage.
    let addr = unsafe { from_sockaddr(storage.as_ptr())? };
    Ok((n as usize, addr))
}

pub(crate) fn send_to(fd: RawFd, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
    let (storage, len) = to_sockaddr(&target);
    syscall!(sendto(
        fd,
        buf.as_ptr() as *const libc::c_void,
        buf.len(),
        SEND_FLAGS,
        &storage as *const _ as *const libc::sockaddr,
        len,
    ))
    .map(|n| n as usize)
}

pub(crate) fn accept(fd: RawFd) -> io::Result<(OwnedFd, SocketAddr)> {
    let mut storage: MaybeUninit<libc::sockaddr_storage> = MaybeUninit::zeroed();
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

    #[cfg(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux",
        target_os = "netbsd",
        target_os = "openbsd",
    ))]
    let stream = {
        let stream = syscall!(accept4(
            fd,
            storage.as_mut_ptr() as *mut libc::sockaddr,
            &mut len,
            libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
        ))?;
        // SAFETY: `accept4(2)` ensures the fd is valid.
        unsafe { OwnedFd::from_raw_fd(stream) }
    };

    #[cfg(any(target_os = "ios", target_os = "macos"))]
    let stream = {
        let stream = syscall!(accept(
            fd,
            storage.as_mut_ptr() as *mut libc::sockaddr,
            &mut len,
        ))?;
        // SAFETY: `accept(2)` ensures the fd is valid.
        let stream = unsafe { OwnedFd::from_raw_fd(stream) };
        {
            use std::os::fd::AsRawFd;
            let raw = stream.as_raw_fd();
            syscall!(fcntl(raw, libc::F_SETFL, libc::O_NONBLOCK))?;
            syscall!(fcntl(raw, libc::F_SETFD, libc::FD_CLOEXEC))?;
            set_no_sigpipe(raw)?;
        }
        stream
    };

    // SAFETY: the kernel initialised `len` bytes of the storage.
    let addr = unsafe { from_sockaddr(storage.as_ptr())? };
    Ok((stream, addr))
}

pub(crate) fn shutdown(fd: RawFd, how: std::net::Shutdown) -> io::Result<()> {
    let how = match how {
        std::net::Shutdown::Read => libc::SHUT_RD,
        std::net::Shutdown::Write => libc::SHUT_WR,
        std::net::Shutdown::Both => libc::SHUT_RDWR,
    };
    syscall!(shutdown(fd, how)).map(|_| ())
}

// ===== IPv4 multicast options =====

pub(crate) fn set_multicast_if_v4(fd: RawFd, addr: Ipv4Addr) -> io::Result<()> {
    let addr = to_in_addr(&addr);
    syscall!(setsockopt(
        fd,
        libc::IPPROTO_IP,
        libc::IP_MULTICAST_IF,
        &addr as *const _ as *const libc::c_void,
        mem::size_of::<libc::in_addr>() as libc::socklen_t,
    ))
    .map(|_| ())
}

pub(crate) fn set_multicast_ttl_v4(fd: RawFd, ttl: u8) -> io::Result<()> {
    let ttl = libc::c_int::from(ttl);
    syscall!(setsockopt(
        fd,
        libc::IPPROTO_IP,
        libc::IP_MULTICAST_TTL,
        &ttl as *const _ as *const libc::c_void,
        mem::size_of::<libc::c_int>() as libc::socklen_t,
    ))
    .map(|_| ())
}

pub(crate) fn multicast_ttl_v4(fd: RawFd) -> io::Result<u8> {
    let mut ttl: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    syscall!(getsockopt(
        fd,
        libc::IPPROTO_IP,
        libc::IP_MULTICAST_TTL,
        &mut ttl as *mut _ as *mut libc::c_void,
        &mut len,
    ))?;
    Ok(ttl as u8)
}

pub(crate) fn set_multicast_loop_v4(fd: RawFd, on: bool) -> io::Result<()> {
    let on = libc::c_int::from(on);
    syscall!(setsockopt(
        fd,
        libc::IPPROTO_IP,
        libc::IP_MULTICAST_LOOP,
        &on as *const _ as *const libc::c_void,
        mem::size_of::<libc::c_int>() as libc::socklen_t,
    ))
    .map(|_| ())
}

pub(crate) fn multicast_loop_v4(fd: RawFd) -> io::Result<bool> {
    let mut on: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    syscall!(getsockopt(
        fd,
        libc::IPPROTO_IP,
        libc::IP_MULTICAST_LOOP,
        &mut on as *mut _ as *mut libc::c_void,
        &mut len,
    ))?;
    Ok(on != 0)
}

pub(crate) fn add_membership_v4(fd: RawFd, group: Ipv4Addr, iface: Ipv4Addr) -> io::Result<()> {
    let mreq = libc::ip_mreq {
        imr_multiaddr: to_in_addr(&group),
        imr_interface: to_in_addr(&iface),
    };
    syscall!(setsockopt(
        fd,
        libc::IPPROTO_IP,
        libc::IP_ADD_MEMBERSHIP,
        &mreq as *const _ as *const libc::c_void,
        mem::size_of::<libc::ip_mreq>() as libc::socklen_t,
    ))
    .map(|_| ())
}

pub(crate) fn drop_membership_v4(fd: RawFd, group: Ipv4Addr, iface: Ipv4Addr) -> io::Result<()> {
    let mreq = libc::ip_mreq {
        imr_multiaddr: to_in_addr(&group),
        imr_interface: to_in_addr(&iface),
    };
    syscall!(setsockopt(
        fd,
        libc::IPPROTO_IP,
        libc::IP_DROP_MEMBERSHIP,
        &mreq as *const _ as *const libc::c_void,
        mem::size_of::<libc::ip_mreq>() as libc::socklen_t,
    ))
    .map(|_| ())
}

// ===== interface lookup =====

/// First IPv4 address of the named interface, which must exist and have the
/// multicast capability. Used to select the outbound multicast interface.
pub(crate) fn multicast_interface_addr_v4(name: &str) -> io::Result<Ipv4Addr> {
    let mut ifap: *mut libc::ifaddrs = std::ptr::null_mut();
    syscall!(getifaddrs(&mut ifap))?;

    let mut found = false;
    let mut multicast = false;
    let mut addr = None;

    let mut cur = ifap;
    while !cur.is_null() {
        // SAFETY: `cur` walks the list returned by `getifaddrs(3)`.
        unsafe {
            let ifa = &*cur;
            cur = ifa.ifa_next;

            if ifa.ifa_name.is_null() || CStr::from_ptr(ifa.ifa_name).to_bytes() != name.as_bytes()
            {
                continue;
            }
            found = true;
            if ifa.ifa_flags & libc::IFF_MULTICAST as libc::c_uint != 0 {
                multicast = true;
            }
            if addr.is_none()
                && !ifa.ifa_addr.is_null()
                && (*ifa.ifa_addr).sa_family == libc::AF_INET as libc::sa_family_t
            {
                let sin = ifa.ifa_addr as *const libc::sockaddr_in;
                addr = Some(Ipv4Addr::from((*sin).sin_addr.s_addr.to_ne_bytes()));
            }
        }
    }
    unsafe { libc::freeifaddrs(ifap) };

    if !found {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("no such interface: {}", name),
        ));
    }
    if !multicast {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("interface does not support multicast: {}", name),
        ));
    }
    addr.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("interface has no IPv4 address assigned: {}", name),
        )
    })
}
