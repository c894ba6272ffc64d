use tern::BipBuffer;

#[test]
fn claim_sizes() {
    let mut buf = BipBuffer::new(8);
    assert_eq!(buf.claim(3).len(), 3);
    assert_eq!(buf.claim(8).len(), 8);
    assert_eq!(buf.claim(1024).len(), 8);
}

#[test]
fn head_empty() {
    let buf = BipBuffer::new(3);
    assert!(buf.head().is_empty());
    assert_eq!(buf.committed(), 0);
}

#[test]
fn head_ignores_uncommitted() {
    let mut buf = BipBuffer::new(3);
    buf.claim(2);
    assert!(buf.head().is_empty());
}

#[test]
fn over_claim() {
    let mut buf = BipBuffer::new(3);
    assert_eq!(buf.claimed(), 0);

    let w = buf.claim(4);
    assert_eq!(w.len(), 3);
    assert_eq!(buf.claimed(), 3);

    // Over-commit clamps to the claim; a full buffer yields empty claims.
    buf.commit(100);
    assert!(buf.claim(4).is_empty());
}

#[test]
fn commit_returns_new_bytes() {
    let mut buf = BipBuffer::new(4);
    let w = buf.claim(3);
    w[0] = 7;
    w[1] = 22;
    w[2] = 218;
    assert_eq!(buf.committed(), 0);
    assert_eq!(buf.claimed(), 3);

    assert_eq!(buf.commit(3), &[7, 22, 218][..]);
    assert_eq!(buf.committed(), 3);
    assert_eq!(buf.claimed(), 0);
    assert_eq!(buf.head(), &[7, 22, 218][..]);
}

#[test]
fn claim_full() {
    let mut buf = BipBuffer::new(4);
    buf.claim(4);
    buf.commit(4);
    assert!(buf.claim(1).is_empty());
}

#[test]
fn consume() {
    let mut buf = BipBuffer::new(4);
    buf.claim(4).copy_from_slice(&[7, 22, 218, 56]);
    assert_eq!(buf.commit(4), &[7, 22, 218, 56][..]);

    buf.consume(2);
    assert_eq!(buf.head(), &[218, 56][..]);
    buf.consume(1);
    assert_eq!(buf.head(), &[56][..]);
}

#[test]
fn claim_after_wrapping() {
    let mut buf = BipBuffer::new(4);
    buf.claim(4).copy_from_slice(&[7, 22, 218, 56]);
    assert_eq!(buf.commit(4), &[7, 22, 218, 56][..]);
    buf.consume(2);

    {
        // Only the freed prefix is claimable, and the claim alone does not
        // make the buffer wrapped.
        let w = buf.claim(4);
        assert_eq!(w.len(), 2);
        w.copy_from_slice(&[49, 81]);
    }
    assert!(!buf.wrapped());

    assert_eq!(buf.commit(2), &[49, 81][..]);
    assert!(buf.wrapped());

    // The primary region drains first; the wrapped bytes surface after.
    assert_eq!(buf.head(), &[218, 56][..]);
    buf.consume(2);
    assert!(!buf.wrapped());

    assert_eq!(buf.head(), &[49, 81][..]);
    buf.consume(2);
    assert!(buf.head().is_empty());
    assert!(!buf.wrapped());
}

#[test]
fn commit_after_wrapping() {
    let mut buf = BipBuffer::new(4);
    buf.claim(3).copy_from_slice(&[7, 22, 218]);
    assert_eq!(buf.commit(3), &[7, 22, 218][..]);

    {
        // Over-claim and over-commit by one.
        let w = buf.claim(2);
        assert_eq!(w.len(), 1);
        w[0] = 56;
        assert_eq!(buf.commit(2), &[56][..]);
    }

    // Wrap around; the old bytes are still visible through the new claim.
    buf.consume(3);
    {
        let w = buf.claim(3);
        assert_eq!(w, &[7, 22, 218][..]);
        w.copy_from_slice(&[2, 3, 5]);
    }
    assert_eq!(buf.commit(3), &[2, 3, 5][..]);
    assert_eq!(buf.head(), &[56][..]);
}

#[test]
fn reclaim_same_window() {
    let mut buf = BipBuffer::new(4);
    buf.claim(4).copy_from_slice(&[7, 22, 218, 56]);

    // Claiming again without a commit exposes the previously staged bytes.
    {
        let w = buf.claim(4);
        assert_eq!(w, &[7, 22, 218, 56][..]);
        for b in w.iter_mut() {
            *b += 1;
        }
    }
    assert_eq!(buf.claim(4), &[8, 23, 219, 57][..]);
}

#[test]
fn commit_without_claim_is_noop() {
    let mut buf = BipBuffer::new(4);
    buf.claim(3).copy_from_slice(&[1, 2, 3]);
    buf.commit(3);

    assert!(buf.commit(5).is_empty());
    assert_eq!(buf.committed(), 3);
    assert_eq!(buf.head(), &[1, 2, 3][..]);
}

#[test]
fn reset() {
    let mut buf = BipBuffer::new(4);
    buf.claim(4).copy_from_slice(&[7, 22, 218, 56]);
    assert_eq!(buf.claimed(), 4);
    assert_eq!(buf.commit(4), &[7, 22, 218, 56][..]);
    assert_eq!(buf.claimed(), 0);

    buf.reset();
    assert_eq!(buf.committed(), 0);
    assert!(buf.head().is_empty());
    assert!(!buf.wrapped());
    assert_eq!(buf.capacity(), 4);
}

#[test]
fn fifo_within_regions() {
    // Everything committed comes back out, in order, across several wraps.
    let mut buf = BipBuffer::new(8);
    let mut produced = Vec::new();
    let mut consumed = Vec::new();
    let mut next: u8 = 0;

    for step in 0..64 {
        let n = 1 + (step % 5);
        let w = buf.claim(n);
        let len = w.len();
        for b in w.iter_mut() {
            *b = next;
            produced.push(next);
            next = next.wrapping_add(1);
        }
        buf.commit(len);

        let take = buf.head().len().min(3);
        consumed.extend_from_slice(&buf.head()[..take]);
        buf.consume(take);
    }
    while !buf.head().is_empty() {
        consumed.extend_from_slice(buf.head());
        let len = buf.head().len();
        buf.consume(len);
    }

    assert_eq!(produced, consumed);
}
