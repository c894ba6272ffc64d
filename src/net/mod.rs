//! TCP and UDP primitives bound to an [`IoContext`].
//!
//! All endpoints are nonblocking from construction. Synchronous methods are
//! thin wrappers over the corresponding syscall and surface [`WouldBlock`];
//! the `async_*` methods follow attempt-then-arm and never do.
//!
//! [`IoContext`]: crate::IoContext
//! [`WouldBlock`]: std::io::ErrorKind::WouldBlock

mod tcp;
mod udp;

pub use self::tcp::{TcpConn, TcpListener};
pub use self::udp::UdpSocket;
