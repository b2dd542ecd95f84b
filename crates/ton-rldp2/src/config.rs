//! Connection configuration.

use std::num::NonZeroUsize;
use std::time::Duration;

use crate::fec::PART_SIZE;

/// Largest transfer accepted without a registered receive limit
/// (ten symbols, the datagram-native default).
pub const DEFAULT_MTU: usize = 7680;

/// Maximum number of parts materialized per transfer and direction.
pub const MAX_PARTS_IN_FLIGHT: usize = 20;

/// Delay between receiving a new symbol and flushing a confirm.
pub const DEFAULT_ACK_DELAY: Duration = Duration::from_millis(10);

/// RTT assumed before the first sample arrives.
pub const DEFAULT_INITIAL_RTT: Duration = Duration::from_millis(500);

/// Number of completed inbound transfer ids remembered.
pub const COMPLETED_CACHE_SIZE: usize = 128;

/// Pacer burst capacity, in symbols.
pub const DEFAULT_PACER_CAPACITY: f64 = 20.0;

/// Smallest time step the pacer schedules.
pub const DEFAULT_PACER_GRANULARITY: Duration = Duration::from_millis(1);

/// Pacing floor in symbols per second, used until bandwidth is measured.
pub const DEFAULT_MIN_PACING_RATE: f64 = 1000.0;

/// Lifetime of an inbound transfer nobody registered a receive limit for.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration for an RLDP2 connection.
#[derive(Debug, Clone)]
pub struct RldpConfig {
    /// Bytes per part on the outbound side (at most 2,000,000).
    pub part_size: usize,
    /// Ceiling for inbound transfers without an explicit receive limit.
    pub default_mtu: usize,
    /// Materialized parts per transfer.
    pub max_parts_in_flight: usize,
    /// Receiver ack flush delay; also the sender's assumed peer ack delay.
    pub ack_delay: Duration,
    /// RTT used for probe timing before the first sample.
    pub initial_rtt: Duration,
    /// Capacity of the completed-transfer LRU.
    pub completed_cache_size: NonZeroUsize,
    /// Pacer bucket size in symbols.
    pub pacer_capacity: f64,
    /// Pacer time granularity.
    pub pacer_granularity: Duration,
    /// Minimum pacing rate in symbols per second.
    pub min_pacing_rate: f64,
    /// Deadline given to unsolicited inbound transfers on their first symbol.
    pub default_receive_timeout: Duration,
}

impl Default for RldpConfig {
    fn default() -> Self {
        Self {
            part_size: PART_SIZE,
            default_mtu: DEFAULT_MTU,
            max_parts_in_flight: MAX_PARTS_IN_FLIGHT,
            ack_delay: DEFAULT_ACK_DELAY,
            initial_rtt: DEFAULT_INITIAL_RTT,
            completed_cache_size: NonZeroUsize::new(COMPLETED_CACHE_SIZE)
                .unwrap_or(NonZeroUsize::MIN),
            pacer_capacity: DEFAULT_PACER_CAPACITY,
            pacer_granularity: DEFAULT_PACER_GRANULARITY,
            min_pacing_rate: DEFAULT_MIN_PACING_RATE,
            default_receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
        }
    }
}

impl RldpConfig {
    /// Part size clamped to the wire maximum.
    pub(crate) fn effective_part_size(&self) -> usize {
        self.part_size.clamp(1, PART_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RldpConfig::default();
        assert_eq!(config.part_size, 2_000_000);
        assert_eq!(config.default_mtu, 7680);
        assert_eq!(config.max_parts_in_flight, 20);
        assert_eq!(config.completed_cache_size.get(), 128);
        assert_eq!(config.ack_delay, Duration::from_millis(10));
        assert_eq!(config.default_receive_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_part_size_clamped() {
        let config = RldpConfig {
            part_size: 10_000_000,
            ..Default::default()
        };
        assert_eq!(config.effective_part_size(), PART_SIZE);

        let config = RldpConfig {
            part_size: 0,
            ..Default::default()
        };
        assert_eq!(config.effective_part_size(), 1);
    }
}
