//! RLDP2 connection: transfer multiplexer and packet dispatcher.
//!
//! A connection owns every transfer exchanged with one peer plus the shared
//! congestion state (RTT, bandwidth, loss, BBR, pacer). It performs no I/O:
//! datagrams come in through [`RldpConnection::on_datagram`], go out through
//! [`RldpConnection::poll_transmit`], and the host calls
//! [`RldpConnection::run`] whenever a datagram arrived or the returned
//! wake-up time has passed.
//!
//! ```text
//!   send() ─► OutboundTransfer ─┐                      ┌─► poll_transmit()
//!                               ├─ run(now): bbr, pacer ┤
//!   on_datagram() ─► dispatch ──┘  round-robin, acks    └─► poll_event()
//!        │
//!        ├─ messagePart ─► InboundTransfer ─► complete / Received
//!        ├─ confirm     ─► OutboundTransfer part sender (rtt, bdw, loss)
//!        └─ complete    ─► OutboundTransfer part dropped ─► Sent
//! ```

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::{debug, trace, warn};

use crate::bandwidth::BdwStats;
use crate::bbr::{Bbr, BbrState};
use crate::config::RldpConfig;
use crate::error::{RldpError, Result};
use crate::inbound::{InboundEvent, InboundTransfer};
use crate::loss::LossStats;
use crate::outbound::{OutboundStep, OutboundTransfer};
use crate::pacer::Pacer;
use crate::rtt::RttStats;
use crate::types::{Complete, Confirm, MessagePart, RldpMessage, TransferId};

/// Completion of a transfer, delivered through [`RldpConnection::poll_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RldpEvent {
    /// An outbound transfer finished or failed.
    Sent {
        transfer_id: TransferId,
        result: Result<()>,
    },
    /// An inbound transfer finished or failed.
    Received {
        transfer_id: TransferId,
        result: Result<Vec<u8>>,
    },
}

/// Snapshot of the connection state.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStats {
    pub outbound_transfers: usize,
    pub inbound_transfers: usize,
    pub in_flight: u64,
    pub window: u64,
    pub pacing_rate: f64,
    pub bdw_max: f64,
    pub smoothed_rtt: Duration,
    pub min_rtt: Duration,
    pub loss: f64,
    pub bbr_state: BbrState,
}

/// Size ceiling and deadline registered for an expected inbound transfer.
#[derive(Debug, Clone, Copy)]
struct InboundLimit {
    deadline: Option<Instant>,
    max_size: u64,
}

fn earliest(current: Option<Instant>, other: Option<Instant>) -> Option<Instant> {
    match (current, other) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// One RLDP2 connection.
pub struct RldpConnection {
    config: RldpConfig,

    outbound: HashMap<TransferId, OutboundTransfer>,
    outbound_queue: VecDeque<TransferId>,
    outbound_deadlines: HashMap<TransferId, Instant>,

    inbound: HashMap<TransferId, InboundTransfer>,
    inbound_limits: HashMap<TransferId, InboundLimit>,
    completed: LruCache<TransferId, ()>,

    rtt: RttStats,
    bdw: BdwStats,
    loss: LossStats,
    bbr: Bbr,
    pacer: Pacer,
    in_flight: u64,
    window: u64,

    transmit: VecDeque<Vec<u8>>,
    events: VecDeque<RldpEvent>,
}

impl Default for RldpConnection {
    fn default() -> Self {
        Self::new(RldpConfig::default())
    }
}

impl RldpConnection {
    /// Creates a connection with the given configuration.
    pub fn new(config: RldpConfig) -> Self {
        let bbr = Bbr::new();
        let pacer = Pacer::new(
            config.min_pacing_rate,
            config.pacer_capacity,
            config.pacer_granularity,
        );
        let window = bbr.get_window_size();

        Self {
            completed: LruCache::new(config.completed_cache_size),
            config,
            outbound: HashMap::new(),
            outbound_queue: VecDeque::new(),
            outbound_deadlines: HashMap::new(),
            inbound: HashMap::new(),
            inbound_limits: HashMap::new(),
            rtt: RttStats::new(),
            bdw: BdwStats::new(),
            loss: LossStats::new(),
            bbr,
            pacer,
            in_flight: 0,
            window,
            transmit: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RldpConfig {
        &self.config
    }

    // ========================================================================
    // Caller API
    // ========================================================================

    /// Starts sending `data`. A zero `transfer_id` is replaced by a random
    /// one. A transfer id that is already being sent is ignored.
    pub fn send(
        &mut self,
        transfer_id: TransferId,
        data: Vec<u8>,
        deadline: Option<Instant>,
    ) -> TransferId {
        let transfer_id = if transfer_id.is_zero() {
            TransferId::random()
        } else {
            transfer_id
        };

        if self.outbound.contains_key(&transfer_id) {
            debug!("Transfer {} is already being sent, ignored", transfer_id);
            return transfer_id;
        }

        debug!("Sending transfer {} ({} bytes)", transfer_id, data.len());
        if let Some(deadline) = deadline {
            self.outbound_deadlines.insert(transfer_id, deadline);
        }
        self.outbound.insert(
            transfer_id,
            OutboundTransfer::new(transfer_id, data, &self.config),
        );
        self.outbound_queue.push_back(transfer_id);
        transfer_id
    }

    /// Registers the size ceiling and deadline of an expected inbound
    /// transfer before any of its data arrives.
    pub fn set_receive_limits(
        &mut self,
        transfer_id: TransferId,
        deadline: Option<Instant>,
        max_size: u64,
    ) {
        self.inbound_limits.insert(
            transfer_id,
            InboundLimit { deadline, max_size },
        );
    }

    /// Next datagram to put on the wire.
    pub fn poll_transmit(&mut self) -> Option<Vec<u8>> {
        self.transmit.pop_front()
    }

    /// Next finished transfer.
    pub fn poll_event(&mut self) -> Option<RldpEvent> {
        self.events.pop_front()
    }

    /// Current connection statistics.
    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            outbound_transfers: self.outbound.len(),
            inbound_transfers: self.inbound.len(),
            in_flight: self.in_flight,
            window: self.window,
            pacing_rate: self.pacer.speed(),
            bdw_max: self.bdw.bdw_max(),
            smoothed_rtt: self.rtt.smoothed_rtt(),
            min_rtt: self.rtt.windowed_min_rtt(),
            loss: self.loss.loss(),
            bbr_state: self.bbr.state(),
        }
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Runs one scheduling tick. Returns the instant at which `run` should
    /// be called again if nothing arrives before.
    pub fn run(&mut self, now: Instant) -> Option<Instant> {
        self.bbr.step(&self.rtt, &self.bdw, self.in_flight, now);
        self.window = self.bbr.get_window_size();
        self.pacer
            .set_speed(self.bbr.get_rate().max(self.config.min_pacing_rate));

        let mut wakeup_at = self.send_symbols(now);

        if self.in_flight > self.window {
            self.bdw.on_pause(now);
        }

        wakeup_at = earliest(wakeup_at, self.flush_acks(now));
        wakeup_at = earliest(wakeup_at, self.expire_limits(now));
        wakeup_at
    }

    fn send_symbols(&mut self, now: Instant) -> Option<Instant> {
        let mut wakeup_at = None;
        let mut waiting = Vec::new();

        while let Some(transfer_id) = self.outbound_queue.pop_front() {
            if self.pacer.is_blocked(now) {
                self.outbound_queue.push_front(transfer_id);
                wakeup_at = earliest(wakeup_at, self.pacer.wakeup_at());
                break;
            }
            let Some(transfer) = self.outbound.get_mut(&transfer_id) else {
                continue;
            };

            let only_probe = self.in_flight >= self.window;
            match transfer.step(now, only_probe, &self.rtt, &self.bdw, &self.loss) {
                Ok(OutboundStep::Sent(message)) => {
                    self.in_flight += 1;
                    self.pacer.send(1.0, now);
                    self.transmit
                        .push_back(RldpMessage::MessagePart(message).to_bytes());
                    // Back of the queue: one symbol per turn, more turns while the pacer allows.
                    self.outbound_queue.push_back(transfer_id);
                }
                Ok(OutboundStep::Wait(at)) => {
                    wakeup_at = earliest(wakeup_at, at);
                    waiting.push(transfer_id);
                }
                Err(e) => {
                    warn!("Transfer {} failed: {}", transfer_id, e);
                    self.finish_outbound(transfer_id, Err(e));
                }
            }
        }

        self.outbound_queue.extend(waiting);
        wakeup_at
    }

    fn flush_acks(&mut self, now: Instant) -> Option<Instant> {
        let mut confirms = Vec::new();
        let mut wakeup_at = None;

        for transfer in self.inbound.values_mut() {
            wakeup_at = earliest(wakeup_at, transfer.flush_acks(now, &mut confirms));
        }
        for confirm in confirms {
            self.transmit
                .push_back(RldpMessage::Confirm(confirm).to_bytes());
        }
        wakeup_at
    }

    fn expire_limits(&mut self, now: Instant) -> Option<Instant> {
        let mut wakeup_at = None;

        let expired: Vec<TransferId> = self
            .outbound_deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(transfer_id, _)| *transfer_id)
            .collect();
        for transfer_id in expired {
            debug!("Outbound transfer {} timed out", transfer_id);
            self.finish_outbound(transfer_id, Err(RldpError::Timeout));
        }
        for deadline in self.outbound_deadlines.values() {
            wakeup_at = earliest(wakeup_at, Some(*deadline));
        }

        let expired: Vec<TransferId> = self
            .inbound_limits
            .iter()
            .filter(|(_, limit)| limit.deadline.is_some_and(|deadline| deadline <= now))
            .map(|(transfer_id, _)| *transfer_id)
            .collect();
        for transfer_id in expired {
            debug!("Inbound transfer {} timed out", transfer_id);
            self.finish_inbound(transfer_id, Err(RldpError::Timeout));
        }
        for limit in self.inbound_limits.values() {
            wakeup_at = earliest(wakeup_at, limit.deadline);
        }

        wakeup_at
    }

    fn finish_outbound(&mut self, transfer_id: TransferId, result: Result<()>) {
        self.outbound_deadlines.remove(&transfer_id);
        let Some(transfer) = self.outbound.remove(&transfer_id) else {
            return;
        };
        self.in_flight = self.in_flight.saturating_sub(transfer.in_flight_count());
        self.outbound_queue.retain(|id| *id != transfer_id);
        self.events.push_back(RldpEvent::Sent {
            transfer_id,
            result,
        });
    }

    fn finish_inbound(&mut self, transfer_id: TransferId, result: Result<Vec<u8>>) {
        self.inbound.remove(&transfer_id);
        self.inbound_limits.remove(&transfer_id);
        self.completed.put(transfer_id, ());
        self.events.push_back(RldpEvent::Received {
            transfer_id,
            result,
        });
    }

    // ========================================================================
    // Incoming datagrams
    // ========================================================================

    /// Processes one datagram received from the peer.
    pub fn on_datagram(&mut self, datagram: &[u8], now: Instant) {
        let message = match RldpMessage::from_bytes(datagram) {
            Ok(message) => message,
            Err(e) => {
                debug!("Dropping malformed RLDP2 datagram: {}", e);
                return;
            }
        };

        match message {
            RldpMessage::MessagePart(part) => self.on_message_part(part, now),
            RldpMessage::Confirm(confirm) => self.on_confirm(confirm, now),
            RldpMessage::Complete(complete) => self.on_complete(complete),
        }
    }

    fn send_complete(&mut self, transfer_id: TransferId, part: u32) {
        self.transmit
            .push_back(RldpMessage::Complete(Complete::new(transfer_id, part)).to_bytes());
    }

    fn on_message_part(&mut self, message: MessagePart, now: Instant) {
        let transfer_id = message.transfer_id;

        if self.completed.contains(&transfer_id) {
            trace!("Part for completed transfer {}, answering complete", transfer_id);
            self.send_complete(transfer_id, message.part);
            return;
        }

        if !self.inbound.contains_key(&transfer_id) {
            let max_size = self
                .inbound_limits
                .get(&transfer_id)
                .map(|limit| limit.max_size)
                .unwrap_or(self.config.default_mtu as u64);
            if message.total_size > max_size {
                debug!(
                    "Dropping transfer {}: {} bytes exceeds limit of {}",
                    transfer_id, message.total_size, max_size
                );
                return;
            }
            debug!(
                "Receiving transfer {} ({} bytes)",
                transfer_id, message.total_size
            );
            self.inbound_limits
                .entry(transfer_id)
                .or_insert_with(|| InboundLimit {
                    deadline: Some(now + self.config.default_receive_timeout),
                    max_size,
                });
            self.inbound.insert(
                transfer_id,
                InboundTransfer::new(transfer_id, message.total_size, &self.config),
            );
        }

        let Some(transfer) = self.inbound.get_mut(&transfer_id) else {
            return;
        };
        match transfer.on_message_part(&message, now) {
            Ok(InboundEvent::None) => {}
            Ok(InboundEvent::PartComplete(part)) => {
                let data = transfer.take_data();
                self.send_complete(transfer_id, part);
                if let Some(data) = data {
                    debug!("Transfer {} received ({} bytes)", transfer_id, data.len());
                    self.finish_inbound(transfer_id, Ok(data));
                }
            }
            Err(e) => {
                warn!("Inbound transfer {} failed: {}", transfer_id, e);
                self.finish_inbound(transfer_id, Err(e));
            }
        }
    }

    fn on_confirm(&mut self, confirm: Confirm, now: Instant) {
        let Some(transfer) = self.outbound.get_mut(&confirm.transfer_id) else {
            trace!("Confirm for unknown transfer {}", confirm.transfer_id);
            return;
        };

        let outcome = transfer.on_confirm(
            confirm.part,
            &confirm.ack(),
            self.config.ack_delay,
            now,
            &mut self.rtt,
            &mut self.bdw,
            &mut self.loss,
        );
        if let Some(outcome) = outcome {
            self.in_flight = self.in_flight.saturating_sub(outcome.left_flight as u64);
        }
    }

    fn on_complete(&mut self, complete: Complete) {
        let transfer_id = complete.transfer_id;
        let Some(transfer) = self.outbound.get_mut(&transfer_id) else {
            trace!("Complete for unknown transfer {}", transfer_id);
            return;
        };

        if let Some(in_flight) = transfer.on_complete(complete.part) {
            self.in_flight = self.in_flight.saturating_sub(in_flight as u64);
        }
        if transfer.is_done() {
            debug!("Transfer {} sent", transfer_id);
            self.finish_outbound(transfer_id, Ok(()));
        }
    }
}

impl std::fmt::Debug for RldpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RldpConnection")
            .field("outbound", &self.outbound.len())
            .field("inbound", &self.inbound.len())
            .field("in_flight", &self.in_flight)
            .field("window", &self.window)
            .finish()
    }
}
