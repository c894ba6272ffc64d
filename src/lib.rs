//! A callback-based non-blocking I/O reactor for latency-sensitive network
//! applications.
//!
//! Tern drives sockets, timers and packet endpoints from a single-threaded
//! event loop wrapping the operating system's readiness interface (epoll on
//! Linux, kqueue on the BSD family). Every asynchronous operation follows the
//! same discipline: attempt the nonblocking syscall first, and only if the
//! kernel reports [`WouldBlock`] register one-shot readiness interest and
//! park the completion callback. Hot paths therefore complete inline without
//! a reactor turn.
//!
//! [`WouldBlock`]: std::io::ErrorKind::WouldBlock
//!
//! # The I/O context
//!
//! [`IoContext`] owns the reactor. User code creates sockets bound to a
//! context, issues asynchronous operations taking completion callbacks, and
//! then drives the context with [`IoContext::run`] (or one of the finer
//! grained drivers). All callbacks run on the driving thread. The only
//! cross-thread entry point is posting a task through a [`Handle`], which
//! interrupts a blocked loop through a self-pipe.
//!
//! ```
//! use tern::IoContext;
//!
//! let ioc = IoContext::new().unwrap();
//! ioc.post(|| println!("ran on the event loop")).unwrap();
//! ioc.run_pending().unwrap();
//! ```
//!
//! # Buffers
//!
//! Asynchronous operations take their buffer by value and hand it back
//! through the completion callback. The buffer is owned by the operation for
//! exactly as long as it is outstanding, which makes the classic
//! use-after-free of callback I/O unrepresentable.
//!
//! [`BipBuffer`] complements the socket layer with a wrap-around byte buffer
//! whose read and write windows are always contiguous, for parsing and
//! emitting frames without copying.
//!
//! # Cancellation
//!
//! Closing an object disarms its readiness interest and drops any parked
//! callback without invoking it; an outstanding operation on a closed object
//! simply never completes. Pair `close` with an explicit protocol-level
//! shutdown when the peer needs to observe the teardown.
//!
//! Lifecycle is explicit: a parked continuation keeps its object alive, so
//! dropping every handle while an operation is still armed leaks the
//! descriptor. Close the object (or let the operation complete) before
//! abandoning it.

#![warn(missing_debug_implementations)]

mod buffer;
mod context;
mod interest;
mod object;
mod poller;
mod sys;
mod timer;
mod token;

pub mod multicast;
pub mod net;

pub use buffer::BipBuffer;
pub use context::{Handle, IoContext};
pub use timer::Timer;

pub(crate) use interest::Interest;
pub(crate) use token::Token;
