//! Windowed minimum / maximum statistics.
//!
//! A sample replaces the current value if it is at least as good (smaller
//! for [`MinFilter`], larger for [`MaxFilter`]) or if the current value is
//! older than the window. Used for the 5-second min-RTT and max-bandwidth
//! estimates.
//!
//! Adapted from the s2n-quic BBR `windowed_filter` (Apache-2.0).

use std::marker::PhantomData;
use std::time::{Duration, Instant};

/// Decides whether a new sample replaces the current value.
pub(crate) trait Filter<T> {
    fn supersedes(new: T, current: Option<T>) -> bool;
}

#[derive(Clone, Debug)]
pub(crate) struct MaxFilter;

#[derive(Clone, Debug)]
pub(crate) struct MinFilter;

impl<T: PartialOrd> Filter<T> for MaxFilter {
    fn supersedes(new: T, current: Option<T>) -> bool {
        current.is_none_or(|current| new >= current)
    }
}

impl<T: PartialOrd> Filter<T> for MinFilter {
    fn supersedes(new: T, current: Option<T>) -> bool {
        current.is_none_or(|current| new <= current)
    }
}

/// Tracks the best value seen over `window`.
#[derive(Clone, Debug)]
pub(crate) struct WindowedFilter<T, F> {
    current_value: Option<T>,
    last_updated: Option<Instant>,
    window: Duration,
    filter: PhantomData<F>,
}

pub(crate) type WindowedMinFilter<T> = WindowedFilter<T, MinFilter>;
pub(crate) type WindowedMaxFilter<T> = WindowedFilter<T, MaxFilter>;

impl<T: Copy + PartialOrd, F: Filter<T>> WindowedFilter<T, F> {
    pub fn new(window: Duration) -> Self {
        Self {
            current_value: None,
            last_updated: None,
            window,
            filter: PhantomData,
        }
    }

    /// Feeds a sample taken at `now`.
    pub fn update(&mut self, sample: T, now: Instant) {
        if self.window_expired(now) || F::supersedes(sample, self.current_value) {
            self.current_value = Some(sample);
            self.last_updated = Some(now);
        }
    }

    pub fn value(&self) -> Option<T> {
        self.current_value
    }

    fn window_expired(&self, now: Instant) -> bool {
        self.last_updated
            .is_some_and(|last| now.saturating_duration_since(last) >= self.window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_filter() {
        let now = Instant::now();
        let mut filter = WindowedMinFilter::new(Duration::from_secs(5));
        assert_eq!(filter.value(), None);

        filter.update(10, now);
        filter.update(12, now + Duration::from_secs(1));
        assert_eq!(filter.value(), Some(10));

        filter.update(7, now + Duration::from_secs(2));
        assert_eq!(filter.value(), Some(7));

        // Window of the 7 expires; a larger sample takes over.
        filter.update(9, now + Duration::from_secs(7));
        assert_eq!(filter.value(), Some(9));
    }

    #[test]
    fn max_filter() {
        let now = Instant::now();
        let mut filter = WindowedMaxFilter::new(Duration::from_secs(5));

        filter.update(100.0, now);
        filter.update(50.0, now + Duration::from_secs(4));
        assert_eq!(filter.value(), Some(100.0));

        filter.update(50.0, now + Duration::from_secs(5));
        assert_eq!(filter.value(), Some(50.0));
    }
}
