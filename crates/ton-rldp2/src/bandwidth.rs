//! Delivery-rate (bandwidth) estimation.
//!
//! Every sent packet carries a [`BdwSnapshot`] of the delivery counters at
//! send time. When the packet is acknowledged, the symbols delivered since
//! the snapshot divided by the elapsed time give one rate sample; the
//! estimate is the maximum sample over the last five seconds.
//!
//! While the sender is limited by something other than the network (in
//! flight above the congestion window) the samples understate the real
//! bandwidth, so decreasing samples taken during such a pause are ignored.

use std::time::{Duration, Instant};

use crate::windowed::WindowedMaxFilter;

/// Window of the bandwidth max filter.
const BDW_WINDOW: Duration = Duration::from_secs(5);

/// Samples over a shorter interval are discarded.
const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(1);

/// Delivery counters captured when a packet is sent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BdwSnapshot {
    /// Time of the last delivery update before the send.
    pub delivered_now: Instant,
    /// Symbols delivered before the send.
    pub delivered_count: u64,
    /// Send time of the oldest packet still in flight.
    pub first_sent_at: Instant,
    /// Whether a pause was in effect at send time.
    pub is_paused: bool,
}

/// Windowed-max bandwidth estimator, in symbols per second.
#[derive(Debug, Clone)]
pub struct BdwStats {
    delivered_now: Option<Instant>,
    delivered_count: u64,
    paused_at: Option<Instant>,
    windowed_max_bdw: WindowedMaxFilter<f64>,
}

impl Default for BdwStats {
    fn default() -> Self {
        Self::new()
    }
}

impl BdwStats {
    /// Creates an estimator with no samples.
    pub fn new() -> Self {
        Self {
            delivered_now: None,
            delivered_count: 0,
            paused_at: None,
            windowed_max_bdw: WindowedMaxFilter::new(BDW_WINDOW),
        }
    }

    /// Records `delta` newly delivered symbols at `now`.
    pub fn on_update(&mut self, now: Instant, delta: u64) {
        self.delivered_now = Some(now);
        self.delivered_count += delta;
    }

    /// Snapshot to attach to a packet being sent.
    pub fn on_packet_send(&self, first_sent_at: Instant) -> BdwSnapshot {
        BdwSnapshot {
            delivered_now: self.delivered_now.unwrap_or(first_sent_at),
            delivered_count: self.delivered_count,
            first_sent_at,
            is_paused: self.paused_at.is_some(),
        }
    }

    /// Takes a rate sample for an acknowledged packet.
    pub fn on_packet_ack(&mut self, snapshot: &BdwSnapshot, sent_at: Instant, now: Instant) {
        if let Some(paused_at) = self.paused_at
            && paused_at < snapshot.delivered_now
        {
            self.paused_at = None;
        }

        let elapsed = sent_at
            .saturating_duration_since(snapshot.first_sent_at)
            .max(now.saturating_duration_since(snapshot.delivered_now));
        if elapsed < MIN_SAMPLE_INTERVAL {
            return;
        }

        let delivered = self.delivered_count.saturating_sub(snapshot.delivered_count);
        let rate = delivered as f64 / elapsed.as_secs_f64();

        let is_paused = snapshot.is_paused || self.paused_at.is_some();
        if is_paused && rate < self.bdw_max() {
            return;
        }
        self.windowed_max_bdw.update(rate, now);
    }

    /// Marks the start of an application- or window-limited period.
    pub fn on_pause(&mut self, now: Instant) {
        if self.paused_at.is_none() {
            self.paused_at = Some(now);
        }
    }

    /// Returns true while a pause is in effect.
    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Windowed maximum delivery rate (zero before the first sample).
    pub fn bdw_max(&self) -> f64 {
        self.windowed_max_bdw.value().unwrap_or(0.0)
    }

    /// Total symbols delivered.
    pub fn delivered_count(&self) -> u64 {
        self.delivered_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_rate_sample() {
        let start = Instant::now();
        let mut bdw = BdwStats::new();

        let snapshot = bdw.on_packet_send(start);
        assert_eq!(snapshot.delivered_count, 0);
        assert_eq!(snapshot.delivered_now, start);

        bdw.on_update(start + ms(100), 50);
        bdw.on_packet_ack(&snapshot, start, start + ms(100));

        assert!((bdw.bdw_max() - 500.0).abs() < 1e-6);
    }

    #[test]
    fn test_short_interval_ignored() {
        let start = Instant::now();
        let mut bdw = BdwStats::new();
        let snapshot = bdw.on_packet_send(start);

        bdw.on_update(start, 10);
        bdw.on_packet_ack(&snapshot, start, start + Duration::from_micros(100));
        assert_eq!(bdw.bdw_max(), 0.0);
    }

    #[test]
    fn test_paused_decrease_ignored() {
        let start = Instant::now();
        let mut bdw = BdwStats::new();

        let first = bdw.on_packet_send(start);
        bdw.on_update(start + ms(100), 100);
        bdw.on_packet_ack(&first, start, start + ms(100));
        assert!((bdw.bdw_max() - 1000.0).abs() < 1e-6);

        bdw.on_pause(start + ms(150));
        let second = bdw.on_packet_send(start + ms(150));
        assert!(second.is_paused);

        // 10 symbols over 1s while paused: lower, ignored.
        bdw.on_update(start + ms(1150), 10);
        bdw.on_packet_ack(&second, start + ms(150), start + ms(1150));
        assert!((bdw.bdw_max() - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn test_pause_cleared_by_later_snapshot() {
        let start = Instant::now();
        let mut bdw = BdwStats::new();

        bdw.on_pause(start);
        bdw.on_update(start + ms(10), 1);
        let snapshot = bdw.on_packet_send(start + ms(10));

        bdw.on_update(start + ms(110), 20);
        bdw.on_packet_ack(&snapshot, start + ms(10), start + ms(110));

        assert!(!bdw.is_paused());
        assert!(bdw.bdw_max() > 0.0);
    }
}
