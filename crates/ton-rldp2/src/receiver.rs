//! Per-part receiver state machine: symbol tracking and confirm scheduling.

use std::time::{Duration, Instant};

use crate::ack::Ack;

/// Confirm resends after the first flush, with exponential backoff.
const MAX_ACK_RESENDS: u32 = 7;

/// What the receiver wants to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverAction {
    /// Nothing to flush before the given instant (or until new input).
    Wait(Option<Instant>),
    /// Send a confirm carrying this summary.
    SendAck(Ack),
}

/// Receiver for one part.
#[derive(Debug, Clone)]
pub struct RldpReceiver {
    ack: Ack,
    ack_at: Option<Instant>,
    resend_count: u32,
    ack_delay: Duration,
}

impl RldpReceiver {
    /// Creates a receiver that flushes confirms `ack_delay` after new data.
    pub fn new(ack_delay: Duration) -> Self {
        Self {
            ack: Ack::new(),
            ack_at: None,
            resend_count: 0,
            ack_delay,
        }
    }

    /// Records a symbol. Returns true if it was not seen before.
    pub fn on_received(&mut self, seqno: u32, now: Instant) -> bool {
        if !self.ack.on_got_packet(seqno) {
            return false;
        }
        self.resend_count = 0;
        let flush_at = now + self.ack_delay;
        self.ack_at = Some(self.ack_at.map_or(flush_at, |ack_at| ack_at.min(flush_at)));
        true
    }

    /// Returns the pending confirm once its flush time has come.
    pub fn next_action(&self, now: Instant) -> ReceiverAction {
        match self.ack_at {
            Some(ack_at) if now >= ack_at => ReceiverAction::SendAck(self.ack),
            ack_at => ReceiverAction::Wait(ack_at),
        }
    }

    /// Records that a confirm was sent and schedules the next resend.
    pub fn on_ack_sent(&mut self, now: Instant) {
        self.resend_count += 1;
        self.ack_at = (self.resend_count <= MAX_ACK_RESENDS)
            .then(|| now + self.ack_delay * (1u32 << self.resend_count));
    }

    /// Current acknowledgement summary.
    pub fn ack(&self) -> &Ack {
        &self.ack
    }
}
