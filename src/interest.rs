use std::fmt;
use std::num::NonZeroU8;

/// Readiness interest in a file descriptor.
///
/// Interest is a non-empty set of directions; an fd with no remaining
/// interest is represented as `Option<Interest>` being `None`, which keeps
/// the two states impossible to confuse.
#[derive(Copy, PartialEq, Eq, Clone, PartialOrd, Ord)]
#[repr(transparent)]
pub(crate) struct Interest(NonZeroU8);

const READABLE: u8 = 0b01;
const WRITABLE: u8 = 0b10;

impl Interest {
    pub const READABLE: Interest = Interest(unsafe { NonZeroU8::new_unchecked(READABLE) });
    pub const WRITABLE: Interest = Interest(unsafe { NonZeroU8::new_unchecked(WRITABLE) });

    /// Add together two `Interest`s.
    pub const fn add(self, other: Interest) -> Interest {
        Interest(unsafe { NonZeroU8::new_unchecked(self.0.get() | other.0.get()) })
    }

    /// Remove `other` from `self`, `None` if nothing remains.
    pub fn remove(self, other: Interest) -> Option<Interest> {
        NonZeroU8::new(self.0.get() & !other.0.get()).map(Interest)
    }

    pub const fn is_readable(self) -> bool {
        (self.0.get() & READABLE) != 0
    }

    pub const fn is_writable(self) -> bool {
        (self.0.get() & WRITABLE) != 0
    }

    pub const fn contains(self, other: Interest) -> bool {
        (self.0.get() & other.0.get()) == other.0.get()
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut one = false;
        if self.is_readable() {
            write!(fmt, "READABLE")?;
            one = true;
        }
        if self.is_writable() {
            if one {
                write!(fmt, " | ")?;
            }
            write!(fmt, "WRITABLE")?;
            one = true;
        }
        debug_assert!(one, "printing empty interests");
        Ok(())
    }
}
