//! Size-based render throttling
//!
//! Rendering a large image is expensive, so after each image render the
//! monitor's minimum update interval is looked up from its element count.
//! Larger payloads throttle their own delivery cadence.

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct ThrottleStep {
    /// Applies to payloads with strictly more elements than this.
    pub above: usize,
    pub interval_s: f64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThrottleTable {
    pub steps: Vec<ThrottleStep>,
    /// Interval for payloads below every step.
    pub floor_s: f64,
}

impl Default for ThrottleTable {
    fn default() -> Self {
        ThrottleTable {
            steps: vec![
                ThrottleStep {
                    above: 10_000,
                    interval_s: 0.1,
                },
                ThrottleStep {
                    above: 250_000,
                    interval_s: 0.25,
                },
                ThrottleStep {
                    above: 1_000_000,
                    interval_s: 0.5,
                },
            ],
            floor_s: 0.05,
        }
    }
}

impl ThrottleTable {
    pub fn interval_for(&self, elements: usize) -> Duration {
        let secs = self
            .steps
            .iter()
            .filter(|step| elements > step.above)
            .max_by_key(|step| step.above)
            .map(|step| step.interval_s)
            .unwrap_or(self.floor_s);
        Duration::from_secs_f64(secs)
    }

    /// The table must describe an interval that never decreases as the
    /// payload grows.
    pub fn validate(&self) -> Result<(), String> {
        let mut steps = self.steps.clone();
        steps.sort_by_key(|s| s.above);
        let mut last = self.floor_s;
        if !(last.is_finite() && last >= 0.0) {
            return Err(format!("invalid throttle floor {}", last));
        }
        for step in &steps {
            if !(step.interval_s.is_finite() && step.interval_s >= last) {
                return Err(format!(
                    "throttle interval {} above {} elements would decrease the interval",
                    step.interval_s, step.above
                ));
            }
            last = step.interval_s;
        }
        Ok(())
    }
}
