//! Shot-sampling control.
//!
//! Leaf to root: `trigger` (sync waits) → `classifier` (readout to ion
//! configuration) → `recovery` (accept / retry / abandon) → `calibration`
//! (between-point routines) → `statistics` (per-point value) →
//! `controller` (the scan loop).

pub mod calibration;
pub mod classifier;
pub mod controller;
pub mod recovery;
pub mod report;
pub mod statistics;
pub mod trigger;
pub mod types;

pub use calibration::{CalibrationScheduler, CalibrationTask, CalibrationTaskConfig};
pub use classifier::{Classifier, ThresholdClassifier};
pub use controller::{ControllerState, SamplingConfig, ShotController};
pub use recovery::{
    Decision, RecoveryConfig, RecoveryPolicy, RecoveryState, RetryAction, TrackingState,
};
pub use report::{PointCounters, PointReport, PointStatus, ScanEvent, ScanExit, ScanReport};
pub use statistics::{AccumulationMode, ScanPointStatistics, StatisticsAccumulator};
pub use trigger::TriggerGate;
pub use types::{ConfigurationHint, DetectorSnapshot, IonConfiguration, ScanPoint, ShotResult};
