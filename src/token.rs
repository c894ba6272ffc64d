/// Associates readiness events with the source that produced them.
///
/// The token is stored as opaque user-data in the kernel's interest list and
/// comes back attached to each ready event. Internally it indexes the
/// poller's source slab; `Token(usize::MAX)` is reserved for the waker.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct Token(pub usize);

impl From<Token> for usize {
    fn from(val: Token) -> usize {
        val.0
    }
}

/// Reserved for the waker pipe's permanent registration.
pub(crate) const WAKER_TOKEN: Token = Token(usize::MAX);
