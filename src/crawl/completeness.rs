//! Termination rule for incremental-reveal loops (infinite scroll, "load
//! more" buttons, paginated listings).
//!
//! The detector only ever sees numbers: a step counter, the content extent
//! before and after the last reveal, and optionally the item count the page
//! claims to contain. It cannot tell a finished list from a stalled one; two
//! consecutive unchanged readings are taken as completion.

use serde::{Deserialize, Serialize};

/// Bounds on the number of reveal steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadLimits {
    /// Expected items revealed by one step.
    pub items_per_step: u32,
    /// Floor for the ceiling derived from an expected count.
    pub min_steps: u32,
    /// Absolute ceiling.
    pub max_steps: u32,
    /// Ceiling when the page declares no expected count.
    pub fallback_steps: u32,
}

impl Default for LoadLimits {
    fn default() -> Self {
        Self {
            items_per_step: 5,
            min_steps: 10,
            max_steps: 100,
            fallback_steps: 30,
        }
    }
}

impl LoadLimits {
    /// Step ceiling for a page declaring `expected` items.
    pub fn ceiling(&self, expected: Option<u32>) -> u32 {
        match expected {
            Some(n) if n > 0 => {
                let per_step = self.items_per_step.max(1);
                n.div_ceil(per_step)
                    .max(self.min_steps)
                    .min(self.max_steps)
            }
            _ => self.fallback_steps.min(self.max_steps),
        }
    }
}

/// Measurements for one step of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadState {
    /// 1-based index of the reveal step just performed.
    pub step: u32,
    pub extent_before: u64,
    pub extent_after: u64,
    pub expected_count: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Extent unchanged across the reveal and its confirmation.
    Stagnated,
    /// Step ceiling reached.
    CeilingReached,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Stagnated => "stagnated",
            StopReason::CeilingReached => "ceiling_reached",
        }
    }
}

/// Stateful stop rule; one instance per page.
#[derive(Debug, Clone)]
pub struct CompletenessDetector {
    limits: LoadLimits,
    unchanged_readings: u32,
    stop_reason: Option<StopReason>,
}

impl CompletenessDetector {
    pub fn new(limits: LoadLimits) -> Self {
        Self {
            limits,
            unchanged_readings: 0,
            stop_reason: None,
        }
    }

    /// Called once per reveal step. Returns true when the loop may stop.
    ///
    /// An unchanged reading arms a confirmation step; only a second unchanged
    /// reading in a row ends the loop, since reveals can settle after the
    /// measurement was taken.
    pub fn should_stop_loading(&mut self, state: &LoadState) -> bool {
        if state.step >= self.limits.ceiling(state.expected_count) {
            self.stop_reason = Some(StopReason::CeilingReached);
            return true;
        }

        if state.extent_after == state.extent_before {
            self.unchanged_readings += 1;
            if self.unchanged_readings >= 2 {
                self.stop_reason = Some(StopReason::Stagnated);
                return true;
            }
        } else {
            self.unchanged_readings = 0;
        }
        false
    }

    /// True while the next step is a confirmation of an unchanged reading.
    pub fn confirming(&self) -> bool {
        self.unchanged_readings == 1
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }
}

/// Post-loop completeness estimate, for logs only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    /// At least 90% of the declared count survived filtering.
    High,
    /// 70% up to 90%.
    Partial,
    /// Below 70%.
    Low,
}

impl ConfidenceBand {
    /// `None` when the page declared no count.
    pub fn classify(expected: Option<u32>, found: usize) -> Option<Self> {
        let expected = expected.filter(|n| *n > 0)?;
        let ratio = found as f64 / f64::from(expected);
        Some(if ratio >= 0.9 {
            ConfidenceBand::High
        } else if ratio >= 0.7 {
            ConfidenceBand::Partial
        } else {
            ConfidenceBand::Low
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceBand::High => "high",
            ConfidenceBand::Partial => "partial",
            ConfidenceBand::Low => "low",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed a scripted extent sequence (first entry is the pre-loop reading)
    /// and return the step at which the detector stopped.
    fn run_script(extents: &[u64], expected: Option<u32>, limits: LoadLimits) -> Option<u32> {
        let mut detector = CompletenessDetector::new(limits);
        for (i, pair) in extents.windows(2).enumerate() {
            let state = LoadState {
                step: i as u32 + 1,
                extent_before: pair[0],
                extent_after: pair[1],
                expected_count: expected,
            };
            if detector.should_stop_loading(&state) {
                return Some(state.step);
            }
        }
        None
    }

    #[test]
    fn stops_after_confirmed_stagnation() {
        // 400 is read three times; the stop must land on the third reading.
        let stopped = run_script(&[100, 250, 400, 400, 400], None, LoadLimits::default());
        assert_eq!(stopped, Some(4));
    }

    #[test]
    fn single_unchanged_reading_is_not_enough() {
        let mut detector = CompletenessDetector::new(LoadLimits::default());
        let state = LoadState {
            step: 1,
            extent_before: 400,
            extent_after: 400,
            expected_count: None,
        };
        assert!(!detector.should_stop_loading(&state));
        assert!(detector.confirming());
        assert_eq!(detector.stop_reason(), None);
    }

    #[test]
    fn growth_after_a_pause_resets_confirmation() {
        let stopped = run_script(&[100, 100, 300, 300, 500, 500, 500], None, LoadLimits::default());
        assert_eq!(stopped, Some(6));
    }

    #[test]
    fn ceiling_bounds_endless_content() {
        let extents: Vec<u64> = (0..200).map(|i| i * 10).collect();
        let stopped = run_script(&extents, None, LoadLimits::default());
        assert_eq!(stopped, Some(30));
    }

    #[test]
    fn ceiling_scales_with_expected_count() {
        let limits = LoadLimits::default();
        assert_eq!(limits.ceiling(None), 30);
        assert_eq!(limits.ceiling(Some(0)), 30);
        assert_eq!(limits.ceiling(Some(12)), 10);
        assert_eq!(limits.ceiling(Some(240)), 48);
        assert_eq!(limits.ceiling(Some(241)), 49);
        assert_eq!(limits.ceiling(Some(10_000)), 100);
    }

    #[test]
    fn ceiling_reason_is_recorded() {
        let mut detector = CompletenessDetector::new(LoadLimits::default());
        let state = LoadState {
            step: 10,
            extent_before: 1,
            extent_after: 2,
            expected_count: Some(20),
        };
        assert!(detector.should_stop_loading(&state));
        assert_eq!(detector.stop_reason(), Some(StopReason::CeilingReached));
    }

    #[test]
    fn confidence_bands() {
        assert_eq!(ConfidenceBand::classify(None, 10), None);
        assert_eq!(ConfidenceBand::classify(Some(0), 10), None);
        assert_eq!(ConfidenceBand::classify(Some(100), 90), Some(ConfidenceBand::High));
        assert_eq!(ConfidenceBand::classify(Some(100), 120), Some(ConfidenceBand::High));
        assert_eq!(ConfidenceBand::classify(Some(100), 89), Some(ConfidenceBand::Partial));
        assert_eq!(ConfidenceBand::classify(Some(100), 70), Some(ConfidenceBand::Partial));
        assert_eq!(ConfidenceBand::classify(Some(100), 69), Some(ConfidenceBand::Low));
    }
}
