//! Received-symbol tracking with a 32-bit sliding window.
//!
//! Bit `i` of `received_mask` is set when seqno `max_seqno - i` has been
//! received. Seqnos more than 31 behind the maximum can no longer be told
//! apart from duplicates and are ignored.
//!
//! ```text
//!   max_seqno = 10, received_mask = 0b1011
//!   seqno:  10  9  8  7
//!   bit:     0  1  2  3
//!   seen:    y  y  n  y
//! ```

/// Width of the received mask.
pub const ACK_WINDOW: u32 = 32;

/// Acknowledgement summary for one part, as carried by `rldp2.confirm`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ack {
    /// Highest seqno seen.
    pub max_seqno: u32,
    /// Sliding window relative to `max_seqno`.
    pub received_mask: u32,
    /// Number of distinct seqnos seen.
    pub received_count: u32,
}

impl Ack {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `seqno`. Returns true the first time a seqno is observed.
    pub fn on_got_packet(&mut self, seqno: u32) -> bool {
        if seqno > self.max_seqno {
            let shift = seqno - self.max_seqno;
            self.received_mask = if shift >= ACK_WINDOW {
                0
            } else {
                self.received_mask << shift
            };
            self.max_seqno = seqno;
        }

        let offset = self.max_seqno - seqno;
        if offset < ACK_WINDOW {
            let bit = 1u32 << offset;
            if self.received_mask & bit == 0 {
                self.received_mask |= bit;
                self.received_count += 1;
                return true;
            }
        }
        false
    }

    /// Returns true if bit `offset` of the mask is set.
    pub fn is_acked_offset(&self, offset: u32) -> bool {
        offset < ACK_WINDOW && self.received_mask & (1u32 << offset) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_order() {
        let mut ack = Ack::new();
        for seqno in 0..100 {
            assert!(ack.on_got_packet(seqno));
        }
        assert_eq!(ack.received_count, 100);
        assert_eq!(ack.max_seqno, 99);
        assert_eq!(ack.received_mask, u32::MAX);
    }

    #[test]
    fn test_reverse_order_same_count() {
        let mut ack = Ack::new();
        for seqno in (0..32).rev() {
            assert!(ack.on_got_packet(seqno));
        }
        assert_eq!(ack.received_count, 32);
        assert_eq!(ack.max_seqno, 31);
    }

    #[test]
    fn test_duplicates_ignored() {
        let mut ack = Ack::new();
        let seqnos = [5, 3, 5, 0, 3, 7, 0, 7, 6];
        let mut fresh = 0;
        for seqno in seqnos {
            if ack.on_got_packet(seqno) {
                fresh += 1;
            }
            assert!(ack.received_count <= ack.max_seqno + 1);
        }
        assert_eq!(fresh, 5);
        assert_eq!(ack.received_count, 5);
    }

    #[test]
    fn test_gap_and_mask() {
        let mut ack = Ack::new();
        ack.on_got_packet(0);
        ack.on_got_packet(1);
        ack.on_got_packet(3);

        assert_eq!(ack.max_seqno, 3);
        assert_eq!(ack.received_mask, 0b1101);
        assert!(ack.is_acked_offset(0));
        assert!(!ack.is_acked_offset(1));
        assert!(ack.is_acked_offset(3));
    }

    #[test]
    fn test_large_jump_clears_window() {
        let mut ack = Ack::new();
        ack.on_got_packet(0);
        ack.on_got_packet(100);
        assert_eq!(ack.received_mask, 1);

        // Too old to track: neither counted nor an error.
        assert!(!ack.on_got_packet(50));
        assert_eq!(ack.received_count, 2);
    }
}
