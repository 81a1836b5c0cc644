//! Rolling median of recently closed sessions' durations — the `avgServiceTime`
//! input to queue ETA (§4.5).

use std::collections::VecDeque;
use std::time::Duration;

const DEFAULT_SERVICE_TIME: Duration = Duration::from_secs(180);
const WINDOW: usize = 50;
const MIN_SAMPLES: usize = 3;

#[derive(Debug, Clone)]
pub struct ServiceTimeTracker {
    samples: VecDeque<Duration>,
}

impl Default for ServiceTimeTracker {
    fn default() -> Self {
        Self {
            samples: VecDeque::with_capacity(WINDOW),
        }
    }
}

impl ServiceTimeTracker {
    pub fn record(&mut self, duration: Duration) {
        if self.samples.len() == WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(duration);
    }

    /// The rolling median, or the default 3 minutes when too few sessions
    /// have closed yet for a median to be meaningful (§4.5).
    pub fn median(&self) -> Duration {
        if self.samples.len() < MIN_SAMPLES {
            return DEFAULT_SERVICE_TIME;
        }
        let mut sorted: Vec<Duration> = self.samples.iter().copied().collect();
        sorted.sort();
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2
        } else {
            sorted[mid]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_three_minutes_with_too_few_samples() {
        let mut tracker = ServiceTimeTracker::default();
        tracker.record(Duration::from_secs(60));
        assert_eq!(tracker.median(), DEFAULT_SERVICE_TIME);
    }

    #[test]
    fn median_of_odd_sample_count() {
        let mut tracker = ServiceTimeTracker::default();
        for secs in [60, 600, 120] {
            tracker.record(Duration::from_secs(secs));
        }
        assert_eq!(tracker.median(), Duration::from_secs(120));
    }

    #[test]
    fn median_of_even_sample_count_averages_the_middle_pair() {
        let mut tracker = ServiceTimeTracker::default();
        for secs in [60, 120, 180, 240] {
            tracker.record(Duration::from_secs(secs));
        }
        assert_eq!(tracker.median(), Duration::from_secs(150));
    }

    #[test]
    fn window_evicts_the_oldest_sample() {
        let mut tracker = ServiceTimeTracker::default();
        for _ in 0..WINDOW {
            tracker.record(Duration::from_secs(600));
        }
        tracker.record(Duration::from_secs(60));
        assert_eq!(tracker.median(), Duration::from_secs(600));
    }
}
