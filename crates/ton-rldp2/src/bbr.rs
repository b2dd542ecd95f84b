//! BBR-style congestion control.
//!
//! ```text
//!   Start ──(3 rounds without 25% bandwidth growth)──► Drain
//!   Drain ──(in flight < bdw_max × rtt_min)──────────► ProbeBandwidth
//!   ProbeBandwidth: gain cycle advanced every rtt_min
//! ```
//!
//! Rates are in symbols per second, windows in symbols.

use std::time::{Duration, Instant};

use rand::Rng;
use tracing::debug;

use crate::bandwidth::BdwStats;
use crate::rtt::RttStats;

/// Pacing/window gain used while starting up and draining.
const STARTUP_GAIN: f64 = 2.8;

/// Window gain in ProbeBandwidth.
const PROBE_BW_WINDOW_GAIN: f64 = 2.0;

/// Growth required for a new bandwidth peak.
const PEAK_GROWTH: f64 = 1.25;

/// Rounds without a new peak before leaving Start.
const STARTUP_ROUNDS: u64 = 3;

/// Pacing gains of the ProbeBandwidth cycle.
const PROBE_BW_GAIN: [f64; 6] = [0.75, 1.0, 1.0, 1.0, 1.0, 1.25];

/// Smallest window handed out.
const MIN_WINDOW: f64 = 10.0;

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BbrState {
    Start,
    Drain,
    ProbeBandwidth,
}

/// Rate and window controller shared by all transfers of a connection.
#[derive(Debug, Clone)]
pub struct Bbr {
    state: BbrState,
    rtt_min: Duration,
    bdw_max: f64,
    bdw_peak: f64,
    peak_round: u64,
    probe_bdw_cycle: usize,
    probe_bdw_cycle_start: Option<Instant>,
}

impl Default for Bbr {
    fn default() -> Self {
        Self::new()
    }
}

impl Bbr {
    /// Creates a controller in the Start state.
    pub fn new() -> Self {
        Self {
            state: BbrState::Start,
            rtt_min: Duration::ZERO,
            bdw_max: 0.0,
            bdw_peak: 0.0,
            peak_round: 0,
            probe_bdw_cycle: 0,
            probe_bdw_cycle_start: None,
        }
    }

    /// Advances the state machine from the current statistics.
    pub fn step(&mut self, rtt: &RttStats, bdw: &BdwStats, in_flight: u64, now: Instant) {
        self.on_sample(
            rtt.windowed_min_rtt(),
            rtt.round(),
            bdw.bdw_max(),
            in_flight,
            now,
        );
    }

    pub(crate) fn on_sample(
        &mut self,
        rtt_min: Duration,
        round: u64,
        bdw_max: f64,
        in_flight: u64,
        now: Instant,
    ) {
        self.rtt_min = rtt_min;
        self.bdw_max = bdw_max;

        if bdw_max > self.bdw_peak * PEAK_GROWTH {
            self.bdw_peak = bdw_max;
            self.peak_round = round;
        }

        match self.state {
            BbrState::Start => {
                if round >= self.peak_round + STARTUP_ROUNDS {
                    debug!(
                        "BBR: Start -> Drain (bdw_max={:.1}, rtt_min={:?})",
                        bdw_max, rtt_min
                    );
                    self.state = BbrState::Drain;
                }
            }
            BbrState::Drain => {
                if (in_flight as f64) < bdw_max * rtt_min.as_secs_f64() {
                    self.probe_bdw_cycle = rand::thread_rng().gen_range(1..=5);
                    self.probe_bdw_cycle_start = Some(now);
                    debug!(
                        "BBR: Drain -> ProbeBandwidth (cycle={})",
                        self.probe_bdw_cycle
                    );
                    self.state = BbrState::ProbeBandwidth;
                }
            }
            BbrState::ProbeBandwidth => {
                if let Some(cycle_start) = self.probe_bdw_cycle_start
                    && now.saturating_duration_since(cycle_start) >= rtt_min
                {
                    self.probe_bdw_cycle = (self.probe_bdw_cycle + 1) % PROBE_BW_GAIN.len();
                    self.probe_bdw_cycle_start = Some(now);
                }
            }
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> BbrState {
        self.state
    }

    /// Returns the ProbeBandwidth gain cycle index.
    pub fn cycle(&self) -> usize {
        self.probe_bdw_cycle
    }

    /// Target pacing rate in symbols per second.
    pub fn get_rate(&self) -> f64 {
        match self.state {
            BbrState::Start => self.bdw_max * STARTUP_GAIN,
            BbrState::Drain => self.bdw_max / STARTUP_GAIN,
            BbrState::ProbeBandwidth => self.bdw_max * PROBE_BW_GAIN[self.probe_bdw_cycle],
        }
    }

    /// Congestion window in symbols.
    pub fn get_window_size(&self) -> u64 {
        let bdp = self.bdw_max * self.rtt_min.as_secs_f64();
        let gain = match self.state {
            BbrState::Start | BbrState::Drain => STARTUP_GAIN,
            BbrState::ProbeBandwidth => PROBE_BW_WINDOW_GAIN,
        };
        (bdp * gain + 1.0).max(MIN_WINDOW) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_initial_state() {
        let bbr = Bbr::new();
        assert_eq!(bbr.state(), BbrState::Start);
        assert_eq!(bbr.get_rate(), 0.0);
        assert_eq!(bbr.get_window_size(), 10);
    }

    #[test]
    fn test_state_transitions() {
        let start = Instant::now();
        let rtt_min = ms(100);
        let mut bbr = Bbr::new();

        // Growing bandwidth keeps us in Start.
        bbr.on_sample(rtt_min, 1, 1000.0, 0, start);
        bbr.on_sample(rtt_min, 2, 2000.0, 0, start + ms(100));
        assert_eq!(bbr.state(), BbrState::Start);
        assert_eq!(bbr.get_rate(), 2000.0 * 2.8);
        // 2000 * 0.1 * 2.8 + 1 = 561
        assert_eq!(bbr.get_window_size(), 561);

        // Plateau: rounds 3 and 4 are not yet three rounds past the peak.
        bbr.on_sample(rtt_min, 3, 2100.0, 0, start + ms(200));
        bbr.on_sample(rtt_min, 4, 2100.0, 0, start + ms(300));
        assert_eq!(bbr.state(), BbrState::Start);

        bbr.on_sample(rtt_min, 5, 2100.0, 1000, start + ms(400));
        assert_eq!(bbr.state(), BbrState::Drain);
        assert_eq!(bbr.get_rate(), 2100.0 / 2.8);
        assert_eq!(bbr.get_window_size(), (2100.0 * 0.1 * 2.8 + 1.0) as u64);

        // Queue still above the bandwidth-delay product (210).
        bbr.on_sample(rtt_min, 5, 2100.0, 300, start + ms(450));
        assert_eq!(bbr.state(), BbrState::Drain);

        bbr.on_sample(rtt_min, 6, 2100.0, 100, start + ms(500));
        assert_eq!(bbr.state(), BbrState::ProbeBandwidth);
        assert!((1..=5).contains(&bbr.cycle()));
        assert_eq!(bbr.get_rate(), 2100.0 * PROBE_BW_GAIN[bbr.cycle()]);
        assert_eq!(bbr.get_window_size(), (2100.0 * 0.1 * 2.0 + 1.0) as u64);
    }

    #[test]
    fn test_probe_cycle_advances_every_rtt_min() {
        let start = Instant::now();
        let rtt_min = ms(100);
        let mut bbr = Bbr::new();

        bbr.on_sample(rtt_min, 1, 1000.0, 0, start);
        bbr.on_sample(rtt_min, 4, 1000.0, 0, start);
        bbr.on_sample(rtt_min, 4, 1000.0, 0, start);
        assert_eq!(bbr.state(), BbrState::ProbeBandwidth);

        let cycle = bbr.cycle();
        bbr.on_sample(rtt_min, 4, 1000.0, 0, start + ms(50));
        assert_eq!(bbr.cycle(), cycle);

        bbr.on_sample(rtt_min, 5, 1000.0, 0, start + ms(100));
        assert_eq!(bbr.cycle(), (cycle + 1) % 6);
    }

    #[test]
    fn test_window_floor() {
        let mut bbr = Bbr::new();
        bbr.on_sample(ms(10), 1, 10.0, 0, Instant::now());
        assert_eq!(bbr.get_window_size(), 10);
    }
}
