//! Loss estimation and the extra-symbol budget derived from it.

use tracing::debug;

/// Loss assumed before enough observations are collected.
pub const INITIAL_LOSS: f64 = 0.1;

/// Bounds of the estimate.
const MIN_LOSS: f64 = 0.001;
const MAX_LOSS: f64 = 0.2;

/// Observations required before the estimate is recomputed.
const SAMPLE_COUNT: u64 = 1000;

/// Minimum change that triggers a rebuild of [`LossProbability`].
const UPDATE_THRESHOLD: f64 = 0.005;

/// Size of the precomputed `send_n` table.
const TABLE_SIZE: usize = 1024;

/// `send_n` for a fixed loss probability.
///
/// `send_n(k) = ceil((k + 3·sqrt(k·p)) / (1 − p))`: enough symbols that `k`
/// of them arrive with roughly three standard deviations of headroom.
#[derive(Debug, Clone)]
pub struct LossProbability {
    loss: f64,
    table: Vec<u32>,
}

impl LossProbability {
    /// Builds the table for loss probability `loss`.
    pub fn new(loss: f64) -> Self {
        let loss = loss.clamp(0.0, MAX_LOSS);
        let table = (0..TABLE_SIZE as u32)
            .map(|k| Self::compute(loss, k))
            .collect();
        Self { loss, table }
    }

    fn compute(loss: f64, k: u32) -> u32 {
        if k == 0 {
            return 0;
        }
        let k = k as f64;
        ((k + 3.0 * (k * loss).sqrt()) / (1.0 - loss)).ceil() as u32
    }

    /// Loss probability this table was built for.
    pub fn loss(&self) -> f64 {
        self.loss
    }

    /// Symbols to send so that about `k` of them get through.
    pub fn send_n(&self, k: u32) -> u32 {
        match self.table.get(k as usize) {
            Some(n) => *n,
            None => Self::compute(self.loss, k),
        }
    }
}

/// Counts acknowledged and lost symbols and keeps a loss estimate.
#[derive(Debug, Clone)]
pub struct LossStats {
    ack: u64,
    lost: u64,
    loss: f64,
    prob: LossProbability,
}

impl Default for LossStats {
    fn default() -> Self {
        Self::new()
    }
}

impl LossStats {
    /// Creates statistics with the initial estimate.
    pub fn new() -> Self {
        Self {
            ack: 0,
            lost: 0,
            loss: INITIAL_LOSS,
            prob: LossProbability::new(INITIAL_LOSS),
        }
    }

    /// Records newly classified symbols.
    pub fn on_update(&mut self, ack: u64, lost: u64) {
        self.ack += ack;
        self.lost += lost;

        let total = self.ack + self.lost;
        if total <= SAMPLE_COUNT {
            return;
        }

        let loss = (self.lost as f64 / total as f64).clamp(MIN_LOSS, MAX_LOSS);
        self.ack = 0;
        self.lost = 0;

        if (loss - self.loss).abs() > UPDATE_THRESHOLD {
            debug!("Loss estimate updated: {:.4} -> {:.4}", self.loss, loss);
            self.loss = loss;
            self.prob = LossProbability::new(loss);
        }
    }

    /// Current loss estimate.
    pub fn loss(&self) -> f64 {
        self.loss
    }

    /// See [`LossProbability::send_n`].
    pub fn send_n(&self, k: u32) -> u32 {
        self.prob.send_n(k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_loss_is_identity() {
        let prob = LossProbability::new(0.0);
        for k in [0, 1, 10, 1023, 1024, 5000] {
            assert_eq!(prob.send_n(k), k);
        }
    }

    #[test]
    fn test_monotone_in_k_and_loss() {
        let losses = [0.001, 0.01, 0.05, 0.1, 0.2];
        let tables: Vec<_> = losses.iter().map(|&p| LossProbability::new(p)).collect();

        for table in &tables {
            for k in 1..2000 {
                assert!(table.send_n(k) >= table.send_n(k - 1));
                assert!(table.send_n(k) >= k);
            }
        }
        for pair in tables.windows(2) {
            for k in [1, 10, 100, 1000, 3000] {
                assert!(pair[1].send_n(k) >= pair[0].send_n(k));
            }
        }
    }

    #[test]
    fn test_known_value() {
        // (100 + 3 * sqrt(10)) / 0.9 = 121.65...
        assert_eq!(LossProbability::new(0.1).send_n(100), 122);
    }

    #[test]
    fn test_estimate_update() {
        let mut stats = LossStats::new();
        assert_eq!(stats.loss(), INITIAL_LOSS);

        stats.on_update(990, 10);
        assert_eq!(stats.loss(), INITIAL_LOSS);

        stats.on_update(1, 0);
        assert!((stats.loss() - 10.0 / 1001.0).abs() < 1e-9);
    }

    #[test]
    fn test_estimate_clamped_and_sticky() {
        let mut stats = LossStats::new();
        stats.on_update(0, 2000);
        assert_eq!(stats.loss(), MAX_LOSS);

        // Within the update threshold: kept.
        stats.on_update(805, 196);
        assert_eq!(stats.loss(), MAX_LOSS);

        stats.on_update(2000, 0);
        assert_eq!(stats.loss(), MIN_LOSS);
        assert_eq!(stats.send_n(0), 0);
    }
}
