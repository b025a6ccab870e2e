//! Ion configuration classification from detector snapshots.

use super::types::{DetectorSnapshot, IonConfiguration};

/// Maps one detector snapshot to an ion configuration.
///
/// Implementations must be pure: the same snapshot always yields the same
/// configuration.
pub trait Classifier: Send + Sync {
    /// Classify a readout.
    fn classify(&self, snapshot: &DetectorSnapshot) -> IonConfiguration;
}

/// Per-region threshold classifier.
///
/// A region is bright when its count is strictly greater than its threshold.
/// With one region the result is `Dark` or `Position1`; with two, region A
/// maps to `Position1` and region B to `Position2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdClassifier {
    thresholds: Vec<u32>,
}

impl ThresholdClassifier {
    /// One monitored region (one-ion experiments).
    pub fn single(threshold: u32) -> Self {
        Self {
            thresholds: vec![threshold],
        }
    }

    /// Two monitored regions.
    pub fn pair(threshold_a: u32, threshold_b: u32) -> Self {
        Self {
            thresholds: vec![threshold_a, threshold_b],
        }
    }

    /// Build from a threshold list; only one- and two-region setups exist.
    pub fn from_thresholds(thresholds: &[u32]) -> Option<Self> {
        match thresholds {
            [a] => Some(Self::single(*a)),
            [a, b] => Some(Self::pair(*a, *b)),
            _ => None,
        }
    }

    /// Configured thresholds, one per region.
    pub fn thresholds(&self) -> &[u32] {
        &self.thresholds
    }

    fn bright(&self, snapshot: &DetectorSnapshot, region: usize) -> bool {
        snapshot.region(region) > self.thresholds[region]
    }
}

impl Classifier for ThresholdClassifier {
    fn classify(&self, snapshot: &DetectorSnapshot) -> IonConfiguration {
        if self.thresholds.len() == 1 {
            return if self.bright(snapshot, 0) {
                IonConfiguration::Position1
            } else {
                IonConfiguration::Dark
            };
        }

        match (self.bright(snapshot, 0), self.bright(snapshot, 1)) {
            (true, false) => IonConfiguration::Position1,
            (false, true) => IonConfiguration::Position2,
            (true, true) => IonConfiguration::BothBright,
            (false, false) => IonConfiguration::Dark,
        }
    }
}
