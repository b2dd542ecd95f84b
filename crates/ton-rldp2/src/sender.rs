//! Per-part sender state machine.
//!
//! The sender keeps `extra_symbols` symbols in flight: the number the
//! receiver still needs (see [`FecHelper`]) inflated for the estimated loss.
//! When that budget is used up, or the connection is over its congestion
//! window, the sender only probes: one fresh symbol per probe timeout, with
//! exponential backoff, so a stalled part keeps the confirm stream alive
//! without busy-looping.

use std::time::{Duration, Instant};

use crate::ack::Ack;
use crate::bandwidth::BdwStats;
use crate::error::Result;
use crate::fec::FecHelper;
use crate::loss::LossStats;
use crate::rtt::RttStats;
use crate::sender_packets::{DropLimits, SenderPackets, SentPacket};

/// Packets trailing the highest acknowledged one by more than this are
/// classified.
const PACKET_THRESHOLD: u32 = 3;

/// Cap of the probe backoff multiplier.
const MAX_PROBE_BACKOFF: u32 = 10;

/// What the sender wants to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderAction {
    /// Nothing to send before the given instant (or until new input).
    Wait(Option<Instant>),
    /// Send the symbol with this seqno.
    Send { seqno: u32, is_probe: bool },
}

/// Effect of a confirm on the connection-wide accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckOutcome {
    /// Symbols that are no longer in flight.
    pub left_flight: u32,
    /// Symbols classified as lost.
    pub new_lost: u64,
}

/// Sender for one part.
#[derive(Debug, Clone)]
pub struct RldpSender {
    packets: SenderPackets,
    fec_helper: FecHelper,
    extra_symbols: u32,
    probe_timeout: Option<Instant>,
    probe_backoff: u32,
    initial_rtt: Duration,
    max_ack_delay: Duration,
}

impl RldpSender {
    /// Creates a sender for a part of `symbols_count` source symbols.
    pub fn new(
        symbols_count: u32,
        loss: &LossStats,
        initial_rtt: Duration,
        max_ack_delay: Duration,
    ) -> Self {
        let fec_helper = FecHelper::new(symbols_count);
        let extra_symbols = loss.send_n(fec_helper.left_fec_symbols_count());
        Self {
            packets: SenderPackets::new(),
            fec_helper,
            extra_symbols,
            probe_timeout: None,
            probe_backoff: 1,
            initial_rtt,
            max_ack_delay,
        }
    }

    /// Decides the next action. With `only_probe` set, regular sends are
    /// suppressed and only an expired probe timeout yields a send.
    pub fn next_action(&self, now: Instant, only_probe: bool) -> SenderAction {
        let seqno = self.packets.next_seqno();

        if !only_probe && self.extra_symbols > self.packets.in_flight_count() {
            return SenderAction::Send {
                seqno,
                is_probe: false,
            };
        }

        match self.probe_timeout {
            Some(probe_timeout) if now >= probe_timeout => SenderAction::Send {
                seqno,
                is_probe: true,
            },
            probe_timeout => SenderAction::Wait(probe_timeout),
        }
    }

    /// Records that `seqno` went out at `now`.
    pub fn on_send(
        &mut self,
        seqno: u32,
        now: Instant,
        is_probe: bool,
        rtt: &RttStats,
        bdw: &BdwStats,
    ) -> Result<()> {
        let bdw_snapshot = bdw.on_packet_send(self.packets.first_sent_at(now));
        self.packets.send(SentPacket {
            seqno,
            sent_at: now,
            is_in_flight: true,
            bdw_snapshot,
        })?;

        self.probe_backoff = if is_probe {
            (self.probe_backoff * 2).min(MAX_PROBE_BACKOFF)
        } else {
            1
        };
        self.probe_timeout = Some(now + self.probe_delay(rtt));
        Ok(())
    }

    fn probe_delay(&self, rtt: &RttStats) -> Duration {
        if !rtt.has_sample() {
            return self.initial_rtt * 2;
        }
        (rtt.smoothed_rtt() + rtt.rtt_var() * 4 + self.max_ack_delay) * self.probe_backoff
    }

    /// Applies a confirm received at `now`.
    pub fn on_ack(
        &mut self,
        ack: &Ack,
        ack_delay: Duration,
        now: Instant,
        rtt: &mut RttStats,
        bdw: &mut BdwStats,
        loss: &mut LossStats,
    ) -> AckOutcome {
        let in_flight_before = self.packets.in_flight_count();
        let update = self.packets.on_ack(ack);

        if update.new_received > 0 {
            bdw.on_update(now, update.new_received as u64);
            self.fec_helper
                .set_received_symbols_count(self.packets.received_count());
        }

        if let Some(max_packet) = update.new_max_packet {
            rtt.on_rtt_sample(
                now.saturating_duration_since(max_packet.sent_at),
                ack_delay,
                now,
            );
            bdw.on_packet_ack(&max_packet.bdw_snapshot, max_packet.sent_at, now);
        }

        let loss_delay = if rtt.has_sample() {
            rtt.smoothed_rtt().max(rtt.last_rtt()) * 9 / 8
        } else {
            self.initial_rtt * 9 / 8
        };
        let first_sent_at = self.packets.first_sent_at(now);
        let limits = DropLimits {
            sent_at: now.checked_sub(loss_delay).unwrap_or(first_sent_at),
            seqno: self
                .packets
                .max_packet()
                .map(|packet| packet.seqno.saturating_sub(PACKET_THRESHOLD))
                .unwrap_or(0),
        };

        let dropped = self.packets.drop_packets(limits);
        loss.on_update(dropped.new_ack, dropped.new_lost);

        self.extra_symbols = loss.send_n(self.fec_helper.left_fec_symbols_count());

        AckOutcome {
            left_flight: in_flight_before - self.packets.in_flight_count(),
            new_lost: dropped.new_lost,
        }
    }

    /// Symbols of this part currently in flight.
    pub fn in_flight_count(&self) -> u32 {
        self.packets.in_flight_count()
    }

    /// Symbols the sender currently wants in flight.
    pub fn extra_symbols(&self) -> u32 {
        self.extra_symbols
    }

    /// Receiver's confirmed symbol count.
    pub fn received_count(&self) -> u32 {
        self.packets.received_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    struct Stats {
        rtt: RttStats,
        bdw: BdwStats,
        loss: LossStats,
    }

    fn stats() -> Stats {
        Stats {
            rtt: RttStats::new(),
            bdw: BdwStats::new(),
            loss: LossStats::new(),
        }
    }

    fn send_all(sender: &mut RldpSender, s: &Stats, now: Instant) -> u32 {
        let mut sent = 0;
        while let SenderAction::Send { seqno, is_probe } = sender.next_action(now, false) {
            assert!(!is_probe);
            sender.on_send(seqno, now, false, &s.rtt, &s.bdw).unwrap();
            sent += 1;
        }
        sent
    }

    #[test]
    fn test_sends_budget_then_waits_for_probe() {
        let start = Instant::now();
        let s = stats();
        let mut sender = RldpSender::new(10, &s.loss, ms(500), ms(10));

        // left = 10 + 5, inflated for the initial 10% loss.
        let budget = s.loss.send_n(15);
        assert_eq!(sender.extra_symbols(), budget);
        assert_eq!(send_all(&mut sender, &s, start), budget);
        assert_eq!(sender.in_flight_count(), budget);

        // No RTT sample yet: probe after 2 * initial_rtt.
        assert_eq!(
            sender.next_action(start, false),
            SenderAction::Wait(Some(start + ms(1000)))
        );
        assert_eq!(
            sender.next_action(start + ms(1000), false),
            SenderAction::Send {
                seqno: budget,
                is_probe: true
            }
        );
    }

    #[test]
    fn test_only_probe_suppresses_regular_sends() {
        let start = Instant::now();
        let s = stats();
        let sender = RldpSender::new(10, &s.loss, ms(500), ms(10));

        assert_eq!(sender.next_action(start, true), SenderAction::Wait(None));
        assert!(matches!(
            sender.next_action(start, false),
            SenderAction::Send {
                seqno: 0,
                is_probe: false
            }
        ));
    }

    #[test]
    fn test_probe_backoff_doubles_and_resets() {
        let start = Instant::now();
        let mut s = stats();
        s.rtt.on_rtt_sample(ms(100), ms(0), start);
        let mut sender = RldpSender::new(1, &s.loss, ms(500), ms(10));

        // 100 + 4 * 50 + 10 = 310ms base delay.
        sender.on_send(0, start, false, &s.rtt, &s.bdw).unwrap();
        assert_eq!(sender.probe_timeout, Some(start + ms(310)));

        sender.on_send(1, start, true, &s.rtt, &s.bdw).unwrap();
        assert_eq!(sender.probe_timeout, Some(start + ms(620)));
        sender.on_send(2, start, true, &s.rtt, &s.bdw).unwrap();
        assert_eq!(sender.probe_timeout, Some(start + ms(1240)));
        sender.on_send(3, start, true, &s.rtt, &s.bdw).unwrap();
        sender.on_send(4, start, true, &s.rtt, &s.bdw).unwrap();
        assert_eq!(sender.probe_timeout, Some(start + ms(3100)));

        sender.on_send(5, start, false, &s.rtt, &s.bdw).unwrap();
        assert_eq!(sender.probe_timeout, Some(start + ms(310)));
    }

    #[test]
    fn test_ack_samples_rtt_and_frees_flight() {
        let start = Instant::now();
        let mut s = stats();
        let mut sender = RldpSender::new(4, &s.loss, ms(500), ms(10));
        let sent = send_all(&mut sender, &s, start);

        let now = start + ms(40);
        let mut ack = Ack::new();
        for seqno in 0..sent {
            ack.on_got_packet(seqno);
        }
        let outcome = sender.on_ack(&ack, ms(0), now, &mut s.rtt, &mut s.bdw, &mut s.loss);

        assert_eq!(outcome.left_flight, sent);
        assert_eq!(outcome.new_lost, 0);
        assert_eq!(sender.in_flight_count(), 0);
        assert_eq!(s.rtt.smoothed_rtt(), ms(40));
        assert!(s.bdw.bdw_max() > 0.0);

        // Receiver has everything counted but has not completed: margin step.
        assert_eq!(sender.received_count(), sent);
        assert!(sender.extra_symbols() >= 1);
    }

    #[test]
    fn test_trailing_packets_declared_lost() {
        let start = Instant::now();
        let mut s = stats();
        let mut sender = RldpSender::new(20, &s.loss, ms(500), ms(10));
        for seqno in 0..10 {
            sender
                .on_send(seqno, start + ms(seqno as u64), false, &s.rtt, &s.bdw)
                .unwrap();
        }

        // Only seqno 9 arrived: 0..=5 trail it by more than three.
        let mut ack = Ack::new();
        ack.on_got_packet(9);
        let outcome = sender.on_ack(
            &ack,
            ms(0),
            start + ms(50),
            &mut s.rtt,
            &mut s.bdw,
            &mut s.loss,
        );

        assert_eq!(outcome.new_lost, 6);
        assert_eq!(outcome.left_flight, 7);
        assert_eq!(sender.in_flight_count(), 3);
    }
}
