use std::fmt;

/// A bipartite wrap-around byte buffer with claim/commit/consume semantics.
///
/// A `BipBuffer` stores bytes in at most two contiguous regions of a fixed
/// backing store: the primary region and, after a wrap, a second region at
/// the start of the store. The producer reserves a contiguous write window
/// with [`claim`], fills it in place, and publishes it with [`commit`]; the
/// consumer reads the contiguous head region via [`head`] and releases bytes
/// with [`consume`]. Neither side ever copies or reallocates, which is what
/// makes the buffer suitable for staging packets and parsing framed
/// protocols in the I/O hot path.
///
/// Committed bytes are handed to the consumer in FIFO order within each
/// region; bytes committed into the wrapped region become visible only once
/// the primary region fully drains.
///
/// ```
/// use tern::BipBuffer;
///
/// let mut buf = BipBuffer::new(8);
/// let w = buf.claim(3);
/// w.copy_from_slice(b"abc");
/// buf.commit(3);
/// assert_eq!(buf.head(), b"abc");
/// buf.consume(2);
/// assert_eq!(buf.head(), b"c");
/// ```
///
/// [`claim`]: BipBuffer::claim
/// [`commit`]: BipBuffer::commit
/// [`head`]: BipBuffer::head
/// [`consume`]: BipBuffer::consume
pub struct BipBuffer {
    data: Box<[u8]>,

    // Primary committed region is [head_a, tail_a); the wrapped region is
    // [0, tail_b) and is nonempty only after a wrap, with tail_b <= head_a.
    head_a: usize,
    tail_a: usize,
    tail_b: usize,

    // Reserved-but-uncommitted window [claim_start, claim_end), placed in
    // whichever free extent was larger at claim time.
    claim_start: usize,
    claim_end: usize,
    claim_wrapped: bool,
}

impl BipBuffer {
    /// Creates a buffer backed by `capacity` zeroed bytes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> BipBuffer {
        assert!(capacity > 0, "bip buffer capacity must be at least 1");
        BipBuffer {
            data: vec![0; capacity].into_boxed_slice(),
            head_a: 0,
            tail_a: 0,
            tail_b: 0,
            claim_start: 0,
            claim_end: 0,
            claim_wrapped: false,
        }
    }

    /// Size of the backing store.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of committed bytes not yet consumed.
    pub fn committed(&self) -> usize {
        (self.tail_a - self.head_a) + self.tail_b
    }

    /// Length of the currently reserved window.
    pub fn claimed(&self) -> usize {
        self.claim_end - self.claim_start
    }

    /// Whether a wrapped region exists.
    pub fn wrapped(&self) -> bool {
        self.tail_b > 0
    }

    /// Reserves a contiguous write window of up to `n` bytes.
    ///
    /// The window is placed in the larger of the two free extents (the space
    /// after the primary region, or the space between the wrapped region and
    /// the primary head) and clamped to that extent's size. When the buffer
    /// is full the returned slice is empty.
    ///
    /// Claiming again without committing re-derives the same window, so a
    /// caller may inspect or rewrite bytes it staged earlier.
    pub fn claim(&mut self, n: usize) -> &mut [u8] {
        let free_a = self.data.len() - self.tail_a;
        let free_b = self.head_a - self.tail_b;

        let (start, len, wrapped) = if free_a >= free_b {
            (self.tail_a, free_a.min(n), false)
        } else {
            (self.tail_b, free_b.min(n), true)
        };

        self.claim_start = start;
        self.claim_end = start + len;
        self.claim_wrapped = wrapped;
        &mut self.data[start..start + len]
    }

    /// Publishes up to `n` bytes of the current claim, returning the newly
    /// committed bytes. Over-commit is clamped to the claim length.
    pub fn commit(&mut self, n: usize) -> &[u8] {
        let len = n.min(self.claimed());
        let start = self.claim_start;
        self.claim_start = 0;
        self.claim_end = 0;

        if len == 0 {
            self.claim_wrapped = false;
            return &[];
        }

        if self.claim_wrapped {
            self.tail_b = start + len;
        } else {
            self.tail_a = start + len;
        }
        self.claim_wrapped = false;

        &self.data[start..start + len]
    }

    /// Releases up to `n` bytes from the head of the committed data.
    ///
    /// When the primary region drains completely the wrapped region, if any,
    /// is promoted to primary.
    pub fn consume(&mut self, n: usize) {
        self.head_a += n.min(self.tail_a - self.head_a);
        if self.head_a == self.tail_a {
            self.head_a = 0;
            self.tail_a = self.tail_b;
            self.tail_b = 0;
        }
    }

    /// The contiguous committed region at the head of the buffer, empty when
    /// no bytes are committed. Wrapped bytes surface here only after the
    /// primary region drains and promotes.
    pub fn head(&self) -> &[u8] {
        &self.data[self.head_a..self.tail_a]
    }

    /// Zeroes all offsets. The backing store is not cleared.
    pub fn reset(&mut self) {
        self.head_a = 0;
        self.tail_a = 0;
        self.tail_b = 0;
        self.claim_start = 0;
        self.claim_end = 0;
        self.claim_wrapped = false;
    }
}

impl fmt::Debug for BipBuffer {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("BipBuffer")
            .field("capacity", &self.data.len())
            .field("committed", &self.committed())
            .field("claimed", &self.claimed())
            .field("wrapped", &self.wrapped())
            .finish()
    }
}
