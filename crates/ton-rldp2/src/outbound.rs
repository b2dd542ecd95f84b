//! Outbound transfer: splits a payload into parts and drives their senders.
//!
//! ```text
//!   payload ─┬─ part 0 ─► FecEncoder + RldpSender ─► dropped on complete(0)
//!            ├─ part 1 ─► ...
//!            └─ ...        (at most `max_parts_in_flight` materialized)
//! ```

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::ack::Ack;
use crate::bandwidth::BdwStats;
use crate::config::RldpConfig;
use crate::error::Result;
use crate::fec::FecEncoder;
use crate::loss::LossStats;
use crate::rtt::RttStats;
use crate::sender::{AckOutcome, RldpSender, SenderAction};
use crate::types::{MessagePart, TransferId};

/// Result of one scheduling step of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundStep {
    /// A symbol to put on the wire.
    Sent(MessagePart),
    /// Nothing to send before the given instant (or until new input).
    Wait(Option<Instant>),
}

struct OutboundPart {
    encoder: FecEncoder,
    sender: RldpSender,
}

/// Sending side of one transfer.
pub struct OutboundTransfer {
    transfer_id: TransferId,
    data: Vec<u8>,
    parts: BTreeMap<u32, OutboundPart>,
    next_part: u32,
    offset: usize,
    part_size: usize,
    max_parts: usize,
    initial_rtt: Duration,
    ack_delay: Duration,
}

impl OutboundTransfer {
    /// Creates a transfer of `data`. Parts are materialized lazily.
    pub fn new(transfer_id: TransferId, data: Vec<u8>, config: &RldpConfig) -> Self {
        Self {
            transfer_id,
            data,
            parts: BTreeMap::new(),
            next_part: 0,
            offset: 0,
            part_size: config.effective_part_size(),
            max_parts: config.max_parts_in_flight.max(1),
            initial_rtt: config.initial_rtt,
            ack_delay: config.ack_delay,
        }
    }

    /// Returns the transfer id.
    pub fn transfer_id(&self) -> TransferId {
        self.transfer_id
    }

    /// Total payload size.
    pub fn total_size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Number of parts currently materialized.
    pub fn parts_count(&self) -> usize {
        self.parts.len()
    }

    /// Symbols of this transfer currently in flight.
    pub fn in_flight_count(&self) -> u64 {
        self.parts
            .values()
            .map(|part| part.sender.in_flight_count() as u64)
            .sum()
    }

    fn all_parts_generated(&self) -> bool {
        self.offset >= self.data.len() && self.next_part > 0
    }

    /// True once every part was generated and completed by the peer.
    pub fn is_done(&self) -> bool {
        self.all_parts_generated() && self.parts.is_empty()
    }

    fn fill_parts(&mut self, loss: &LossStats) {
        while self.parts.len() < self.max_parts && !self.all_parts_generated() {
            let end = (self.offset + self.part_size).min(self.data.len());
            let encoder = FecEncoder::new(&self.data[self.offset..end]);
            let sender = RldpSender::new(
                encoder.symbols_count(),
                loss,
                self.initial_rtt,
                self.ack_delay,
            );

            trace!(
                "Transfer {}: part {} materialized ({} bytes)",
                self.transfer_id,
                self.next_part,
                end - self.offset
            );
            self.parts
                .insert(self.next_part, OutboundPart { encoder, sender });
            self.next_part += 1;
            self.offset = end;
        }
    }

    /// Lets the first part that wants to send emit one symbol.
    pub fn step(
        &mut self,
        now: Instant,
        only_probe: bool,
        rtt: &RttStats,
        bdw: &BdwStats,
        loss: &LossStats,
    ) -> Result<OutboundStep> {
        self.fill_parts(loss);

        let total_size = self.total_size();
        let mut wakeup_at: Option<Instant> = None;

        for (&part, state) in self.parts.iter_mut() {
            match state.sender.next_action(now, only_probe) {
                SenderAction::Send { seqno, is_probe } => {
                    state.sender.on_send(seqno, now, is_probe, rtt, bdw)?;
                    return Ok(OutboundStep::Sent(MessagePart {
                        transfer_id: self.transfer_id,
                        fec_type: state.encoder.fec_type(),
                        part,
                        total_size,
                        seqno,
                        data: state.encoder.gen_symbol(seqno),
                    }));
                }
                SenderAction::Wait(Some(at)) => {
                    wakeup_at = Some(wakeup_at.map_or(at, |current| current.min(at)));
                }
                SenderAction::Wait(None) => {}
            }
        }

        Ok(OutboundStep::Wait(wakeup_at))
    }

    /// Routes a confirm to its part. `None` if the part is not active.
    #[allow(clippy::too_many_arguments)]
    pub fn on_confirm(
        &mut self,
        part: u32,
        ack: &Ack,
        ack_delay: Duration,
        now: Instant,
        rtt: &mut RttStats,
        bdw: &mut BdwStats,
        loss: &mut LossStats,
    ) -> Option<AckOutcome> {
        let state = self.parts.get_mut(&part)?;
        Some(state.sender.on_ack(ack, ack_delay, now, rtt, bdw, loss))
    }

    /// Drops a part the peer has fully received. Returns the number of its
    /// symbols that were still in flight, or `None` if the part is not active.
    pub fn on_complete(&mut self, part: u32) -> Option<u32> {
        let state = self.parts.remove(&part)?;
        trace!("Transfer {}: part {} complete", self.transfer_id, part);
        Some(state.sender.in_flight_count())
    }
}

impl std::fmt::Debug for OutboundTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundTransfer")
            .field("transfer_id", &self.transfer_id)
            .field("total_size", &self.data.len())
            .field("parts", &self.parts.len())
            .field("next_part", &self.next_part)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_parts(part_size: usize) -> RldpConfig {
        RldpConfig {
            part_size,
            ..Default::default()
        }
    }

    fn step_once(transfer: &mut OutboundTransfer, now: Instant) -> OutboundStep {
        transfer
            .step(
                now,
                false,
                &RttStats::new(),
                &BdwStats::new(),
                &LossStats::new(),
            )
            .unwrap()
    }

    #[test]
    fn test_first_symbol() {
        let now = Instant::now();
        let data: Vec<u8> = (0..1000).map(|i| i as u8).collect();
        let id = TransferId([3u8; 32]);
        let mut transfer = OutboundTransfer::new(id, data.clone(), &RldpConfig::default());

        match step_once(&mut transfer, now) {
            OutboundStep::Sent(message) => {
                assert_eq!(message.transfer_id, id);
                assert_eq!(message.part, 0);
                assert_eq!(message.seqno, 0);
                assert_eq!(message.total_size, 1000);
                assert_eq!(message.data.len(), 768);
                assert_eq!(&message.data[..], &data[..768]);
            }
            other => panic!("Expected a symbol, got {:?}", other),
        }
        assert_eq!(transfer.in_flight_count(), 1);
        assert!(!transfer.is_done());
    }

    #[test]
    fn test_part_cap() {
        let now = Instant::now();
        let config = small_parts(1000);
        let mut transfer = OutboundTransfer::new(TransferId([1u8; 32]), vec![9u8; 50_500], &config);

        let mut completed = 0;
        while !transfer.is_done() {
            let step = step_once(&mut transfer, now);
            assert!(transfer.parts_count() <= 20);
            if let OutboundStep::Sent(message) = step {
                // Complete each part as soon as it shows up.
                assert!(transfer.on_complete(message.part).is_some());
                completed += 1;
            }
        }

        assert_eq!(completed, 51);
        assert_eq!(transfer.on_complete(0), None);
    }

    #[test]
    fn test_parts_interleave_in_order() {
        let now = Instant::now();
        let mut transfer =
            OutboundTransfer::new(TransferId([1u8; 32]), vec![1u8; 5_000], &small_parts(1000));

        // The first part sends its whole budget before the second gets a turn.
        let mut parts = Vec::new();
        while let OutboundStep::Sent(message) = step_once(&mut transfer, now) {
            parts.push(message.part);
        }
        assert_eq!(transfer.parts_count(), 5);
        assert!(parts.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(parts.first(), Some(&0));
        assert_eq!(parts.last(), Some(&4));
    }

    #[test]
    fn test_empty_payload_has_one_part() {
        let now = Instant::now();
        let mut transfer =
            OutboundTransfer::new(TransferId([2u8; 32]), Vec::new(), &RldpConfig::default());

        match step_once(&mut transfer, now) {
            OutboundStep::Sent(message) => {
                assert_eq!(message.part, 0);
                assert_eq!(message.total_size, 0);
                assert_eq!(message.fec_type.data_size(), 0);
            }
            other => panic!("Expected a symbol, got {:?}", other),
        }
        assert_eq!(transfer.parts_count(), 1);
        assert_eq!(transfer.on_complete(0), Some(1));
        assert!(transfer.is_done());
    }
}
