//! Weighted service-time distributions.
//!
//! A distribution is an ordered list of `(service_time, weight)` pairs with a
//! cached weight sum. Sampling is uniform over weight mass, not over entry
//! count: a draw in `[0, weight_sum)` selects the first entry whose running
//! weight prefix strictly exceeds the drawn value.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

fn default_weight() -> u32 {
    1
}

/// One point in a service-time distribution.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WeightedServiceTime {
    /// Simulated work time the server performs for a matching request.
    #[serde(with = "humantime_serde")]
    pub service_time: Duration,

    /// Relative weight of this entry within the distribution.
    #[serde(default = "default_weight")]
    pub weight: u32,
}

/// Ordered sequence of weighted service times with a cached weight sum.
///
/// Entries are immutable once parsed; the weight sum is computed at
/// construction time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "Vec<WeightedServiceTime>", into = "Vec<WeightedServiceTime>")]
pub struct WeightedServiceTimes {
    entries: Vec<WeightedServiceTime>,
    weight_sum: u32,
}

impl From<Vec<WeightedServiceTime>> for WeightedServiceTimes {
    fn from(entries: Vec<WeightedServiceTime>) -> Self {
        let weight_sum = entries.iter().map(|e| e.weight).sum();
        Self {
            entries,
            weight_sum,
        }
    }
}

impl From<WeightedServiceTimes> for Vec<WeightedServiceTime> {
    fn from(times: WeightedServiceTimes) -> Self {
        times.entries
    }
}

impl WeightedServiceTimes {
    /// Sum of all entry weights.
    pub fn weight_sum(&self) -> u32 {
        self.weight_sum
    }

    /// Whether the distribution has no weight mass at all.
    pub fn is_empty(&self) -> bool {
        self.weight_sum == 0
    }

    /// Largest service time in the distribution.
    pub fn max_service_time(&self) -> Duration {
        self.entries
            .iter()
            .map(|e| e.service_time)
            .max()
            .unwrap_or(Duration::ZERO)
    }

    /// Deterministic selection: the first entry whose running weight prefix
    /// strictly exceeds `offset`. Falls through to zero for offsets at or
    /// beyond the weight sum.
    pub fn pick(&self, offset: u32) -> Duration {
        let mut remaining = offset as i64;
        for entry in &self.entries {
            remaining -= entry.weight as i64;
            if remaining < 0 {
                return entry.service_time;
            }
        }
        Duration::ZERO
    }

    /// Draws a service time uniformly over weight mass.
    ///
    /// Precondition: `weight_sum() > 0`. Callers gate on [`is_empty`] before
    /// sampling; an empty distribution yields zero in release builds.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        debug_assert!(self.weight_sum > 0, "sampling an empty distribution");
        if self.weight_sum == 0 {
            return Duration::ZERO;
        }
        self.pick(rng.gen_range(0..self.weight_sum))
    }
}
