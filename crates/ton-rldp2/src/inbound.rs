//! Inbound transfer: admits parts in order and reassembles the payload.
//!
//! The output buffer is allocated once at the declared total size. A part
//! is admitted only when it is the next expected index and its bytes fit in
//! the remaining space; anything else is either stale (answered with
//! `complete`), premature (dropped) or a protocol violation.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::config::RldpConfig;
use crate::error::{RldpError, Result};
use crate::fec::FecDecoder;
use crate::receiver::{ReceiverAction, RldpReceiver};
use crate::types::{Confirm, MessagePart, TransferId};

/// What the connection should do after a message part was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundEvent {
    /// Nothing to reply.
    None,
    /// The part is (or already was) complete: answer with `complete(part)`.
    PartComplete(u32),
}

struct InboundPart {
    decoder: FecDecoder,
    receiver: RldpReceiver,
    offset: usize,
}

/// Receiving side of one transfer.
pub struct InboundTransfer {
    transfer_id: TransferId,
    total_size: u64,
    data: Vec<u8>,
    parts: BTreeMap<u32, InboundPart>,
    next_part: u32,
    offset: usize,
    max_parts: usize,
    ack_delay: Duration,
    delivered: bool,
}

impl InboundTransfer {
    /// Creates a transfer expecting `total_size` bytes.
    ///
    /// The caller is responsible for bounding `total_size`.
    pub fn new(transfer_id: TransferId, total_size: u64, config: &RldpConfig) -> Self {
        Self {
            transfer_id,
            total_size,
            data: vec![0u8; total_size as usize],
            parts: BTreeMap::new(),
            next_part: 0,
            offset: 0,
            max_parts: config.max_parts_in_flight.max(1),
            ack_delay: config.ack_delay,
            delivered: false,
        }
    }

    /// Returns the transfer id.
    pub fn transfer_id(&self) -> TransferId {
        self.transfer_id
    }

    /// Declared total size.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Number of parts currently being decoded.
    pub fn parts_count(&self) -> usize {
        self.parts.len()
    }

    fn all_parts_admitted(&self) -> bool {
        self.offset >= self.data.len() && self.next_part > 0
    }

    /// True once every byte has been recovered.
    pub fn is_done(&self) -> bool {
        self.all_parts_admitted() && self.parts.is_empty()
    }

    /// Hands out the payload. Returns `Some` exactly once, after completion.
    pub fn take_data(&mut self) -> Option<Vec<u8>> {
        if !self.is_done() || self.delivered {
            return None;
        }
        self.delivered = true;
        Some(std::mem::take(&mut self.data))
    }

    fn admit(&mut self, message: &MessagePart) -> Result<bool> {
        if message.part != self.next_part
            || self.parts.len() >= self.max_parts
            || self.all_parts_admitted()
        {
            return Ok(false);
        }

        let decoder = FecDecoder::new(&message.fec_type)?;
        let data_size = decoder.data_size();

        if data_size == 0 && self.total_size != 0 {
            return Err(RldpError::violation(format!(
                "empty part {} in a transfer of {} bytes",
                message.part, self.total_size
            )));
        }
        if self.offset as u64 + data_size as u64 > self.total_size {
            return Err(RldpError::violation(format!(
                "part {} at offset {} with {} bytes overflows total size {}",
                message.part, self.offset, data_size, self.total_size
            )));
        }

        trace!(
            "Transfer {}: part {} admitted ({} bytes at {})",
            self.transfer_id, message.part, data_size, self.offset
        );
        self.parts.insert(
            message.part,
            InboundPart {
                decoder,
                receiver: RldpReceiver::new(self.ack_delay),
                offset: self.offset,
            },
        );
        self.next_part += 1;
        self.offset += data_size;
        Ok(true)
    }

    /// Processes one symbol.
    pub fn on_message_part(&mut self, message: &MessagePart, now: Instant) -> Result<InboundEvent> {
        if message.total_size != self.total_size {
            return Err(RldpError::violation(format!(
                "total size changed from {} to {}",
                self.total_size, message.total_size
            )));
        }

        if !self.parts.contains_key(&message.part) {
            if message.part < self.next_part {
                return Ok(InboundEvent::PartComplete(message.part));
            }
            if !self.admit(message)? {
                return Ok(InboundEvent::None);
            }
        }

        let Some(state) = self.parts.get_mut(&message.part) else {
            return Ok(InboundEvent::None);
        };
        if state.decoder.data_size() != message.fec_type.data_size() as usize {
            return Err(RldpError::violation(format!(
                "part {} changed its data size",
                message.part
            )));
        }

        state.receiver.on_received(message.seqno, now);
        if !state.decoder.add_symbol(message.seqno, &message.data)? {
            return Ok(InboundEvent::None);
        }

        let offset = state.offset;
        let bytes = state.decoder.take_decoded().unwrap_or_default();
        let end = offset + bytes.len();
        let Some(target) = self.data.get_mut(offset..end) else {
            return Err(RldpError::violation("decoded part does not fit the buffer"));
        };
        target.copy_from_slice(&bytes);
        self.parts.remove(&message.part);

        trace!(
            "Transfer {}: part {} decoded ({} bytes)",
            self.transfer_id,
            message.part,
            bytes.len()
        );
        Ok(InboundEvent::PartComplete(message.part))
    }

    /// Collects confirms due at `now` and returns the next flush time.
    pub fn flush_acks(&mut self, now: Instant, out: &mut Vec<Confirm>) -> Option<Instant> {
        let mut wakeup_at: Option<Instant> = None;

        for (&part, state) in self.parts.iter_mut() {
            if let ReceiverAction::SendAck(ack) = state.receiver.next_action(now) {
                out.push(Confirm::new(self.transfer_id, part, &ack));
                state.receiver.on_ack_sent(now);
            }
            if let ReceiverAction::Wait(Some(at)) = state.receiver.next_action(now) {
                wakeup_at = Some(wakeup_at.map_or(at, |current| current.min(at)));
            }
        }

        wakeup_at
    }
}

impl std::fmt::Debug for InboundTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundTransfer")
            .field("transfer_id", &self.transfer_id)
            .field("total_size", &self.total_size)
            .field("parts", &self.parts.len())
            .field("next_part", &self.next_part)
            .finish()
    }
}
