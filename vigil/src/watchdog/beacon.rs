//! Beacon cadence classification.
//!
//! Servers announce themselves at a steady period. A gap well above the
//! running average means beacons were lost; a gap well below it means the
//! server restarted and is beaconing from scratch. Either way the receive
//! watchdog stops trusting beacons until a real message arrives.

use std::time::Duration;

use minstant::Instant;

/// Gaps at least this many average periods long mean beacons were missed.
const MISSED_RATIO: f64 = 1.25;

/// Gaps at most this many average periods long mean the server restarted.
const RESTART_RATIO: f64 = 0.80;

/// Intervals folded into the average before it becomes a moving average.
const AVERAGE_WINDOW: u32 = 16;

/// Classification of one beacon arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeaconVerdict {
    /// Consistent with the observed cadence.
    Regular,
    /// Beacons were missed or the server restarted.
    Anomaly,
}

/// Running beacon-period estimate for one server.
#[derive(Debug, Clone, Default)]
pub struct BeaconTracker {
    last: Option<Instant>,
    average: Option<Duration>,
    samples: u32,
}

impl BeaconTracker {
    /// Creates a tracker that has seen no beacons.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Estimated beacon period, once two beacons have been seen.
    #[must_use]
    pub fn average_period(&self) -> Option<Duration> {
        self.average
    }

    /// Records a beacon arriving at `now` and classifies it.
    pub fn observe(&mut self, now: Instant) -> BeaconVerdict {
        let Some(last) = self.last else {
            self.last = Some(now);
            return BeaconVerdict::Regular;
        };
        let interval = now.saturating_duration_since(last);
        if interval.is_zero() {
            // Same beacon heard twice (several interfaces) or out of order.
            return BeaconVerdict::Regular;
        }
        self.last = Some(now);
        let Some(average) = self.average else {
            self.average = Some(interval);
            self.samples = 1;
            return BeaconVerdict::Regular;
        };

        let ratio = interval.as_secs_f64() / average.as_secs_f64();
        if ratio >= MISSED_RATIO {
            BeaconVerdict::Anomaly
        } else if ratio <= RESTART_RATIO {
            self.average = None;
            self.samples = 0;
            BeaconVerdict::Anomaly
        } else {
            let n = (self.samples + 1).min(AVERAGE_WINDOW);
            let avg = average.as_secs_f64();
            let folded = avg + (interval.as_secs_f64() - avg) / f64::from(n);
            self.average = Some(Duration::from_secs_f64(folded.max(0.0)));
            self.samples = n;
            BeaconVerdict::Regular
        }
    }
}
