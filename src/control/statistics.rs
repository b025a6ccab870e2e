//! Per-point statistics accumulation.

use serde::{Deserialize, Serialize};

use super::types::ShotResult;

/// How accepted shots are reduced to the point statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AccumulationMode {
    /// Fraction of accepted shots whose raw count is below `threshold`
    Thresholded {
        /// Counts strictly below this are dark events
        threshold: u32,
    },
    /// Mean raw count over accepted shots
    Raw,
}

impl Default for AccumulationMode {
    fn default() -> Self {
        AccumulationMode::Thresholded { threshold: 1 }
    }
}

/// Running counters of one scan point.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScanPointStatistics {
    /// Shots counted toward the point
    pub accepted_sample_count: u32,
    /// Accepted shots below the event threshold (thresholded mode)
    pub thresholded_event_count: u32,
    /// Sum of accepted raw counts (raw mode)
    pub accumulated_sum: f64,
}

/// Accumulates accepted shots of one point into its final statistic.
#[derive(Debug, Clone)]
pub struct StatisticsAccumulator {
    mode: AccumulationMode,
    stats: ScanPointStatistics,
}

impl StatisticsAccumulator {
    /// Empty accumulator.
    pub fn new(mode: AccumulationMode) -> Self {
        Self {
            mode,
            stats: ScanPointStatistics::default(),
        }
    }

    /// Count one accepted shot.
    pub fn record(&mut self, shot: &ShotResult) {
        self.stats.accepted_sample_count += 1;
        match self.mode {
            AccumulationMode::Thresholded { threshold } => {
                if shot.raw_count < threshold {
                    self.stats.thresholded_event_count += 1;
                }
            }
            AccumulationMode::Raw => {
                self.stats.accumulated_sum += f64::from(shot.raw_count);
            }
        }
    }

    /// Accepted shots so far.
    pub fn accepted_sample_count(&self) -> u32 {
        self.stats.accepted_sample_count
    }

    /// Snapshot of the running counters.
    pub fn statistics(&self) -> ScanPointStatistics {
        self.stats
    }

    /// Accumulation mode.
    pub fn mode(&self) -> AccumulationMode {
        self.mode
    }

    /// Final statistic, `None` when nothing was accepted ("no data").
    pub fn finalize(&self) -> Option<f64> {
        if self.stats.accepted_sample_count == 0 {
            return None;
        }
        let n = f64::from(self.stats.accepted_sample_count);
        let value = match self.mode {
            AccumulationMode::Thresholded { .. } => f64::from(self.stats.thresholded_event_count) / n,
            AccumulationMode::Raw => self.stats.accumulated_sum / n,
        };
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::IonConfiguration;

    fn shot(raw_count: u32) -> ShotResult {
        ShotResult {
            configuration: IonConfiguration::Position1,
            raw_count,
        }
    }

    #[test]
    fn test_thresholded_fraction_is_exact() {
        let mut acc = StatisticsAccumulator::new(AccumulationMode::Thresholded { threshold: 3 });
        for count in [0, 1, 2, 5, 9, 12, 0] {
            acc.record(&shot(count));
        }
        // 4 of 7 below threshold
        assert_eq!(acc.finalize(), Some(4.0 / 7.0));
        assert_eq!(acc.statistics().thresholded_event_count, 4);
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut acc = StatisticsAccumulator::new(AccumulationMode::Thresholded { threshold: 3 });
        acc.record(&shot(3));
        assert_eq!(acc.finalize(), Some(0.0));
    }

    #[test]
    fn test_raw_mean() {
        let mut acc = StatisticsAccumulator::new(AccumulationMode::Raw);
        acc.record(&shot(10));
        acc.record(&shot(20));
        acc.record(&shot(33));
        assert_eq!(acc.finalize(), Some(21.0));
    }

    #[test]
    fn test_no_data_without_samples() {
        let acc = StatisticsAccumulator::new(AccumulationMode::Raw);
        assert_eq!(acc.accepted_sample_count(), 0);
        assert_eq!(acc.finalize(), None);
    }
}
