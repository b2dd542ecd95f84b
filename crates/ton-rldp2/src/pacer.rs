//! Token-bucket pacer.
//!
//! The bucket refills at the congestion controller's rate. A send that does
//! not fit is still accounted: the bucket is emptied and the caller is told
//! when the remaining deficit will have been paid off. Nothing may be sent
//! before that instant.
//!
//! ```text
//!   capacity ──send(size)──► fits?  yes ─► debit, send now
//!                                   no  ─► capacity = 0,
//!                                          wake = now + deficit / speed
//! ```

use std::time::{Duration, Instant};

/// Lowest accepted speed, in units per second.
const MIN_SPEED: f64 = 1.0;

/// Token bucket gating symbol emission.
#[derive(Debug, Clone)]
pub struct Pacer {
    speed: f64,
    capacity: f64,
    max_capacity: f64,
    time_granularity: Duration,
    last_update: Option<Instant>,
    wakeup_at: Option<Instant>,
}

impl Pacer {
    /// Creates a full bucket of `max_capacity` refilling at `speed`.
    pub fn new(speed: f64, max_capacity: f64, time_granularity: Duration) -> Self {
        Self {
            speed: speed.max(MIN_SPEED),
            capacity: max_capacity,
            max_capacity,
            time_granularity,
            last_update: None,
            wakeup_at: None,
        }
    }

    /// Changes the refill rate; values below 1 are raised to 1.
    pub fn set_speed(&mut self, speed: f64) {
        self.speed = if speed.is_finite() {
            speed.max(MIN_SPEED)
        } else {
            MIN_SPEED
        };
    }

    /// Current refill rate.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Accounts a send of `size` units at `now`.
    ///
    /// Returns `None` if it fit in the bucket, otherwise the instant before
    /// which nothing else may be sent.
    pub fn send(&mut self, size: f64, now: Instant) -> Option<Instant> {
        self.update_capacity(now);

        if size <= self.capacity {
            self.capacity -= size;
            return None;
        }

        let deficit = size - self.capacity;
        self.capacity = 0.0;

        let wakeup_at = now + Duration::from_secs_f64(deficit / self.speed);
        self.last_update = Some(wakeup_at);
        self.wakeup_at = Some(wakeup_at);
        Some(wakeup_at)
    }

    /// Instant returned by the last send that did not fit.
    pub fn wakeup_at(&self) -> Option<Instant> {
        self.wakeup_at
    }

    /// Returns true if nothing may be sent at `now`.
    pub fn is_blocked(&self, now: Instant) -> bool {
        self.wakeup_at.is_some_and(|wakeup_at| wakeup_at > now)
    }

    fn update_capacity(&mut self, now: Instant) {
        let Some(last_update) = self.last_update else {
            self.last_update = Some(now);
            return;
        };
        if now <= last_update {
            return;
        }

        let elapsed = (now - last_update).as_secs_f64();
        let limit = self
            .max_capacity
            .max(self.speed * self.time_granularity.as_secs_f64());
        self.capacity = (self.capacity + elapsed * self.speed).min(limit);
        self.last_update = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_burst_then_wait() {
        let now = Instant::now();
        let mut pacer = Pacer::new(1000.0, 5.0, ms(1));

        for _ in 0..5 {
            assert_eq!(pacer.send(1.0, now), None);
        }
        // Sixth symbol: one unit deficit at 1000/s.
        let wakeup = pacer.send(1.0, now).unwrap();
        assert_eq!(wakeup, now + ms(1));
        assert!(pacer.is_blocked(now));
        assert!(!pacer.is_blocked(wakeup));
    }

    #[test]
    fn test_speed_clamped() {
        let mut pacer = Pacer::new(0.0, 1.0, ms(1));
        assert_eq!(pacer.speed(), 1.0);

        pacer.set_speed(-5.0);
        assert_eq!(pacer.speed(), 1.0);
        pacer.set_speed(f64::NAN);
        assert_eq!(pacer.speed(), 1.0);
        pacer.set_speed(250.0);
        assert_eq!(pacer.speed(), 250.0);
    }

    #[test]
    fn test_refill_is_capped() {
        let now = Instant::now();
        let mut pacer = Pacer::new(100.0, 3.0, ms(1));
        pacer.send(3.0, now);

        // A long idle period refills only up to max_capacity.
        let later = now + Duration::from_secs(10);
        for _ in 0..3 {
            assert_eq!(pacer.send(1.0, later), None);
        }
        assert!(pacer.send(1.0, later).is_some());
    }

    #[test]
    fn test_conservation() {
        let start = Instant::now();
        let rate = 500.0;
        let max_capacity = 10.0;
        let mut pacer = Pacer::new(rate, max_capacity, ms(1));

        let mut now = start;
        let mut admitted = 0.0;
        let mut horizon = start;

        for step in 0..5000u64 {
            // Greedy sender polling every 0.3ms, honouring wake-ups.
            now += Duration::from_micros(300);
            if pacer.is_blocked(now) {
                continue;
            }
            let size = if step % 7 == 0 { 3.0 } else { 1.0 };
            if let Some(wakeup) = pacer.send(size, now) {
                horizon = horizon.max(wakeup);
            }
            admitted += size;
            horizon = horizon.max(now);

            let elapsed = (horizon - start).as_secs_f64();
            assert!(
                admitted <= rate * elapsed + max_capacity + 1e-3,
                "admitted {} over {}s",
                admitted,
                elapsed
            );
        }
        assert!(admitted > rate * 1.0);
    }
}
