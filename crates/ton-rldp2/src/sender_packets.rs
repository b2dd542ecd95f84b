//! Per-part ledger of sent symbols.
//!
//! Packets live in a dense queue: the packet with seqno `s` sits at index
//! `s - front.seqno`. They leave only from the front, once they are no longer
//! in flight or fall behind the loss limits.
//!
//! The receiver's confirm identifies at most 32 packets explicitly (the
//! mask). Every other newly received symbol becomes an ack credit: when an
//! in-flight packet is dropped it consumes a credit and counts as delivered,
//! or counts as lost if no credit is left.

use std::collections::VecDeque;
use std::time::Instant;

use crate::ack::{ACK_WINDOW, Ack};
use crate::bandwidth::BdwSnapshot;
use crate::error::{RldpError, Result};

/// One sent symbol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SentPacket {
    pub seqno: u32,
    pub sent_at: Instant,
    pub is_in_flight: bool,
    pub bdw_snapshot: BdwSnapshot,
}

/// Result of feeding a confirm into the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AckUpdate {
    /// Increase of the receiver's confirmed symbol count.
    pub new_received: u32,
    /// Set when the highest acknowledged packet advanced.
    pub new_max_packet: Option<SentPacket>,
}

/// Packets older than these limits are classified as delivered or lost.
#[derive(Debug, Clone, Copy)]
pub struct DropLimits {
    /// Packets sent before this instant are dropped.
    pub sent_at: Instant,
    /// Packets with a smaller seqno are dropped.
    pub seqno: u32,
}

/// Classification changes since the previous [`SenderPackets::drop_packets`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropUpdate {
    pub new_ack: u64,
    pub new_lost: u64,
    pub last_loss_at: Option<Instant>,
}

/// Dense queue of the symbols sent for one part.
#[derive(Debug, Clone, Default)]
pub struct SenderPackets {
    packets: VecDeque<SentPacket>,
    next_seqno: u32,
    in_flight_count: u32,
    received_count: u32,
    left_ack: u32,
    max_packet: Option<SentPacket>,
    ack_count: u64,
    lost_count: u64,
    reported_ack: u64,
    reported_lost: u64,
    last_loss_at: Option<Instant>,
}

impl SenderPackets {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seqno the next [`send`](Self::send) must carry.
    pub fn next_seqno(&self) -> u32 {
        self.next_seqno
    }

    /// Number of symbols sent and not yet classified.
    pub fn in_flight_count(&self) -> u32 {
        self.in_flight_count
    }

    /// Receiver's confirmed symbol count.
    pub fn received_count(&self) -> u32 {
        self.received_count
    }

    /// Highest acknowledged packet.
    pub fn max_packet(&self) -> Option<&SentPacket> {
        self.max_packet.as_ref()
    }

    /// Send time of the oldest packet still in flight, or `now`.
    pub fn first_sent_at(&self, now: Instant) -> Instant {
        self.packets
            .iter()
            .find(|packet| packet.is_in_flight)
            .map(|packet| packet.sent_at)
            .unwrap_or(now)
    }

    /// Records a sent packet. Its seqno must be [`next_seqno`](Self::next_seqno).
    pub fn send(&mut self, packet: SentPacket) -> Result<()> {
        if packet.seqno != self.next_seqno {
            return Err(RldpError::InvalidSeqno {
                expected: self.next_seqno,
                got: packet.seqno,
            });
        }

        self.next_seqno += 1;
        if packet.is_in_flight {
            self.in_flight_count += 1;
        }
        self.packets.push_back(packet);
        Ok(())
    }

    fn get_mut(&mut self, seqno: u32) -> Option<&mut SentPacket> {
        let front = self.packets.front()?.seqno;
        let index = seqno.checked_sub(front)?;
        self.packets.get_mut(index as usize)
    }

    fn mark_ack(&mut self, seqno: u32) {
        let Some(packet) = self.get_mut(seqno) else {
            return;
        };
        if !packet.is_in_flight {
            return;
        }
        packet.is_in_flight = false;
        self.in_flight_count -= 1;
        self.ack_count += 1;
        self.left_ack = self.left_ack.saturating_sub(1);
    }

    /// Applies a confirm from the receiver.
    pub fn on_ack(&mut self, ack: &Ack) -> AckUpdate {
        let mut update = AckUpdate::default();
        if self.next_seqno == 0 {
            return update;
        }

        let max_seqno = ack.max_seqno.min(self.next_seqno - 1);
        let received_count = ack.received_count.min(max_seqno + 1);

        if received_count > self.received_count {
            update.new_received = received_count - self.received_count;
            self.received_count = received_count;
            self.left_ack = (self.left_ack + update.new_received).min(self.in_flight_count);
        }

        let advanced = self
            .max_packet
            .is_none_or(|max_packet| max_seqno > max_packet.seqno);
        if advanced && let Some(packet) = self.get_mut(max_seqno).copied() {
            self.max_packet = Some(packet);
            update.new_max_packet = Some(packet);

            for offset in 0..ACK_WINDOW.min(max_seqno + 1) {
                if ack.received_mask & (1u32 << offset) != 0 {
                    self.mark_ack(max_seqno - offset);
                }
            }
            self.left_ack = self.left_ack.min(self.in_flight_count);
        }

        update
    }

    /// Pops packets from the front that are acknowledged or beyond `limits`.
    pub fn drop_packets(&mut self, limits: DropLimits) -> DropUpdate {
        while let Some(front) = self.packets.front() {
            if front.is_in_flight && front.sent_at >= limits.sent_at && front.seqno >= limits.seqno
            {
                break;
            }
            let Some(packet) = self.packets.pop_front() else {
                break;
            };
            if !packet.is_in_flight {
                continue;
            }

            self.in_flight_count -= 1;
            if self.left_ack > 0 {
                self.left_ack -= 1;
                self.ack_count += 1;
            } else {
                self.lost_count += 1;
                self.last_loss_at = Some(packet.sent_at);
            }
        }

        let update = DropUpdate {
            new_ack: self.ack_count - self.reported_ack,
            new_lost: self.lost_count - self.reported_lost,
            last_loss_at: self.last_loss_at.take(),
        };
        self.reported_ack = self.ack_count;
        self.reported_lost = self.lost_count;
        update
    }
}
