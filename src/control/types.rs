//! Shared value types for shot sampling.

use serde::{Deserialize, Serialize};

/// Discretized ion configuration inferred from one detector snapshot.
///
/// Has no identity across shots: it only describes the current readout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IonConfiguration {
    /// No region above threshold
    Dark,
    /// Ion fluorescing in the first monitored region
    Position1,
    /// Ion fluorescing in the second monitored region
    Position2,
    /// Both regions above threshold
    BothBright,
}

impl IonConfiguration {
    /// All configurations, in declaration order.
    pub const ALL: [IonConfiguration; 4] = [
        IonConfiguration::Dark,
        IonConfiguration::Position1,
        IonConfiguration::Position2,
        IonConfiguration::BothBright,
    ];

    /// True for the two configurations a sample may be taken in.
    pub fn is_single_ion(&self) -> bool {
        matches!(self, IonConfiguration::Position1 | IonConfiguration::Position2)
    }

    /// Detector region index of a single-ion position.
    pub fn region(&self) -> Option<usize> {
        match self {
            IonConfiguration::Position1 => Some(0),
            IonConfiguration::Position2 => Some(1),
            _ => None,
        }
    }
}

impl std::fmt::Display for IonConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IonConfiguration::Dark => write!(f, "dark"),
            IonConfiguration::Position1 => write!(f, "position_1"),
            IonConfiguration::Position2 => write!(f, "position_2"),
            IonConfiguration::BothBright => write!(f, "both_bright"),
        }
    }
}

/// Photon counts of one readout, one entry per monitored detector region.
///
/// A photon-counter readout is a single-region snapshot; a camera readout has
/// one entry per region of interest.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DetectorSnapshot {
    counts: Vec<u32>,
}

impl DetectorSnapshot {
    /// Snapshot from a single photon counter.
    pub fn photon_count(count: u32) -> Self {
        Self {
            counts: vec![count],
        }
    }

    /// Snapshot from several detector regions.
    pub fn regions(counts: impl Into<Vec<u32>>) -> Self {
        Self {
            counts: counts.into(),
        }
    }

    /// Count in region `index`, zero if the region was not read out.
    pub fn region(&self, index: usize) -> u32 {
        self.counts.get(index).copied().unwrap_or(0)
    }

    /// Number of regions in this snapshot.
    pub fn region_count(&self) -> usize {
        self.counts.len()
    }

    /// Sum over all regions.
    pub fn total(&self) -> u32 {
        self.counts.iter().sum()
    }

    /// The count attributed to `configuration`.
    ///
    /// Single-ion positions use their own region; anything else uses the total.
    pub fn count_for(&self, configuration: IonConfiguration) -> u32 {
        match configuration.region() {
            Some(index) if index < self.counts.len() => self.region(index),
            _ => self.total(),
        }
    }
}

/// Outcome of one executed pulse sequence plus readout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShotResult {
    /// Configuration the shot is attributed to
    pub configuration: IonConfiguration,
    /// Photon count used for statistics
    pub raw_count: u32,
}

impl ShotResult {
    /// Build a shot result from a classified snapshot.
    pub fn from_snapshot(configuration: IonConfiguration, snapshot: &DetectorSnapshot) -> Self {
        Self {
            configuration,
            raw_count: snapshot.count_for(configuration),
        }
    }
}

/// One parameter setting of a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanPoint {
    /// Position of the point in the scan
    pub index: usize,
    /// Swept parameter value handed to the peer link and the pulse sequence
    pub parameter: f64,
}

impl ScanPoint {
    /// Create a scan point.
    pub fn new(index: usize, parameter: f64) -> Self {
        Self { index, parameter }
    }

    /// Evenly spaced points from `start` to `stop` inclusive.
    pub fn linspace(start: f64, stop: f64, count: usize) -> Vec<ScanPoint> {
        match count {
            0 => Vec::new(),
            1 => vec![ScanPoint::new(0, start)],
            _ => {
                let step = (stop - start) / (count - 1) as f64;
                (0..count)
                    .map(|i| ScanPoint::new(i, start + step * i as f64))
                    .collect()
            }
        }
    }
}

/// Readout handed back by a calibration routine.
///
/// Calibration routines cool and read out the ion themselves; their last
/// snapshot lets the controller reclassify without another readout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationHint {
    /// Last readout taken by the routine
    pub snapshot: DetectorSnapshot,
}

impl ConfigurationHint {
    /// Wrap a snapshot.
    pub fn new(snapshot: DetectorSnapshot) -> Self {
        Self { snapshot }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_ion_positions() {
        assert!(IonConfiguration::Position1.is_single_ion());
        assert!(IonConfiguration::Position2.is_single_ion());
        assert!(!IonConfiguration::Dark.is_single_ion());
        assert!(!IonConfiguration::BothBright.is_single_ion());
    }

    #[test]
    fn test_count_for_uses_position_region() {
        let snapshot = DetectorSnapshot::regions([40, 3]);
        assert_eq!(snapshot.count_for(IonConfiguration::Position1), 40);
        assert_eq!(snapshot.count_for(IonConfiguration::Position2), 3);
        assert_eq!(snapshot.count_for(IonConfiguration::Dark), 43);

        let single = DetectorSnapshot::photon_count(7);
        assert_eq!(single.count_for(IonConfiguration::Position2), 7);
        assert_eq!(single.region(3), 0);
    }

    #[test]
    fn test_shot_result_from_reattributed_snapshot() {
        // A dark shot later confirmed at Position1 keeps Position1's region count
        let snapshot = DetectorSnapshot::regions([1, 0]);
        let shot = ShotResult::from_snapshot(IonConfiguration::Position1, &snapshot);
        assert_eq!(shot.configuration, IonConfiguration::Position1);
        assert_eq!(shot.raw_count, 1);
    }

    #[test]
    fn test_linspace() {
        let points = ScanPoint::linspace(0.0, 1.0, 5);
        assert_eq!(points.len(), 5);
        assert_eq!(points[4].index, 4);
        assert!((points[2].parameter - 0.5).abs() < 1e-12);
        assert_eq!(ScanPoint::linspace(2.0, 3.0, 1)[0].parameter, 2.0);
        assert!(ScanPoint::linspace(0.0, 1.0, 0).is_empty());
    }
}
