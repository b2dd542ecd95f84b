//! Round-trip time statistics.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::windowed::WindowedMinFilter;

/// Samples below this are treated as bogus.
const MIN_VALID_SAMPLE: Duration = Duration::from_millis(1);

/// Samples (and ack delays) above this are treated as bogus.
const MAX_VALID_SAMPLE: Duration = Duration::from_secs(10);

/// Valid samples are raised to at least this.
const MIN_RTT_CLAMP: Duration = Duration::from_millis(10);

/// Window of the windowed minimum RTT.
const MIN_RTT_WINDOW: Duration = Duration::from_secs(5);

/// Smoothed RTT, RTT variance, minimum RTT and an RTT round counter.
#[derive(Debug, Clone)]
pub struct RttStats {
    min_rtt: Duration,
    windowed_min_rtt: WindowedMinFilter<Duration>,
    smoothed_rtt: Duration,
    rtt_var: Duration,
    last_rtt: Duration,
    round: u64,
    round_at: Option<Instant>,
    has_sample: bool,
}

impl Default for RttStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RttStats {
    /// Creates statistics with no samples.
    pub fn new() -> Self {
        Self {
            min_rtt: Duration::ZERO,
            windowed_min_rtt: WindowedMinFilter::new(MIN_RTT_WINDOW),
            smoothed_rtt: Duration::ZERO,
            rtt_var: Duration::ZERO,
            last_rtt: Duration::ZERO,
            round: 0,
            round_at: None,
            has_sample: false,
        }
    }

    /// Feeds one RTT sample measured at `now`; `ack_delay` is the time the
    /// peer held the acknowledgement.
    pub fn on_rtt_sample(&mut self, rtt_sample: Duration, ack_delay: Duration, now: Instant) {
        if !(MIN_VALID_SAMPLE..=MAX_VALID_SAMPLE).contains(&rtt_sample) {
            debug!("Suspicious rtt sample {:?}, ignored", rtt_sample);
            return;
        }
        if ack_delay > MAX_VALID_SAMPLE {
            debug!("Suspicious ack delay {:?}, ignored", ack_delay);
            return;
        }

        let sample = rtt_sample.max(MIN_RTT_CLAMP);
        self.windowed_min_rtt.update(sample, now);
        self.last_rtt = sample;

        if !self.has_sample {
            self.has_sample = true;
            self.min_rtt = sample;
            self.smoothed_rtt = sample;
            self.rtt_var = sample / 2;
        } else {
            self.min_rtt = self.min_rtt.min(sample);

            let mut adjusted = sample;
            if let Some(without_delay) = sample.checked_sub(ack_delay)
                && without_delay >= self.min_rtt
            {
                adjusted = without_delay;
            }

            self.smoothed_rtt = self.smoothed_rtt * 7 / 8 + adjusted / 8;
            self.rtt_var = self.rtt_var * 3 / 4 + self.smoothed_rtt.abs_diff(adjusted) / 4;
        }

        match self.round_at {
            Some(round_at) if now < round_at => {}
            _ => {
                self.round += 1;
                self.round_at = Some(now + self.smoothed_rtt);
            }
        }
    }

    /// Returns true once a valid sample has been taken.
    pub fn has_sample(&self) -> bool {
        self.has_sample
    }

    /// Exponentially smoothed RTT (zero before the first sample).
    pub fn smoothed_rtt(&self) -> Duration {
        self.smoothed_rtt
    }

    /// RTT variance estimate.
    pub fn rtt_var(&self) -> Duration {
        self.rtt_var
    }

    /// All-time minimum RTT.
    pub fn min_rtt(&self) -> Duration {
        self.min_rtt
    }

    /// Minimum RTT over the last five seconds of samples.
    pub fn windowed_min_rtt(&self) -> Duration {
        self.windowed_min_rtt.value().unwrap_or(Duration::ZERO)
    }

    /// Most recent accepted sample.
    pub fn last_rtt(&self) -> Duration {
        self.last_rtt
    }

    /// Number of RTT rounds observed.
    pub fn round(&self) -> u64 {
        self.round
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_first_sample() {
        let now = Instant::now();
        let mut rtt = RttStats::new();
        assert!(!rtt.has_sample());

        rtt.on_rtt_sample(ms(100), ms(0), now);
        assert!(rtt.has_sample());
        assert_eq!(rtt.smoothed_rtt(), ms(100));
        assert_eq!(rtt.min_rtt(), ms(100));
        assert_eq!(rtt.rtt_var(), ms(50));
        assert_eq!(rtt.windowed_min_rtt(), ms(100));
        assert_eq!(rtt.round(), 1);
    }

    #[test]
    fn test_ewma() {
        let now = Instant::now();
        let mut rtt = RttStats::new();
        rtt.on_rtt_sample(ms(100), ms(0), now);
        rtt.on_rtt_sample(ms(180), ms(0), now);

        // 100 + (180 - 100) / 8 = 110; 50 * 3/4 + |110 - 180| / 4 = 55
        assert_eq!(rtt.smoothed_rtt(), ms(110));
        assert_eq!(rtt.rtt_var(), ms(55));
        assert_eq!(rtt.min_rtt(), ms(100));
        assert_eq!(rtt.last_rtt(), ms(180));
    }

    #[test]
    fn test_ack_delay_subtracted_only_above_min() {
        let now = Instant::now();
        let mut rtt = RttStats::new();
        rtt.on_rtt_sample(ms(100), ms(0), now);

        // 180 - 40 = 140 >= 100: subtracted.
        rtt.on_rtt_sample(ms(180), ms(40), now);
        assert_eq!(rtt.smoothed_rtt(), ms(105));

        let mut rtt = RttStats::new();
        rtt.on_rtt_sample(ms(100), ms(0), now);
        // 120 - 40 = 80 < 100: kept as is.
        rtt.on_rtt_sample(ms(120), ms(40), now);
        assert_eq!(rtt.smoothed_rtt(), Duration::from_micros(102_500));
    }

    #[test]
    fn test_rejects_and_clamps() {
        let now = Instant::now();
        let mut rtt = RttStats::new();

        rtt.on_rtt_sample(Duration::from_micros(500), ms(0), now);
        rtt.on_rtt_sample(Duration::from_secs(11), ms(0), now);
        rtt.on_rtt_sample(ms(50), Duration::from_secs(11), now);
        assert!(!rtt.has_sample());

        rtt.on_rtt_sample(ms(2), ms(0), now);
        assert_eq!(rtt.smoothed_rtt(), ms(10));
    }

    #[test]
    fn test_round_advances_once_per_rtt() {
        let start = Instant::now();
        let mut rtt = RttStats::new();

        rtt.on_rtt_sample(ms(100), ms(0), start);
        rtt.on_rtt_sample(ms(100), ms(0), start + ms(50));
        assert_eq!(rtt.round(), 1);

        rtt.on_rtt_sample(ms(100), ms(0), start + ms(100));
        assert_eq!(rtt.round(), 2);
    }
}
