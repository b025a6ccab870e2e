//! Configuration System using Figment
//!
//! Strongly-typed configuration for a scan. Configuration is loaded from:
//! 1. a TOML file (base configuration, default `config/ion_daq.toml`)
//! 2. Environment variables prefixed with `ION_DAQ_`, with `__` separating
//!    nested keys
//!
//! Every section has defaults, so a missing file or a partial file loads.
//!
//! # Example
//! ```no_run
//! use ion_daq::config::IonDaqConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // ION_DAQ_RECOVERY__LOSS_CEILING=8 overrides recovery.loss_ceiling
//! let config = IonDaqConfig::load()?;
//! config.validate()?;
//! println!("Samples per point: {}", config.scan.samples_per_point);
//! # Ok(())
//! # }
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;

use crate::control::{
    AccumulationMode, CalibrationTask, CalibrationTaskConfig, RecoveryConfig, SamplingConfig,
    ScanPoint, ThresholdClassifier,
};
use crate::error::{ControlResult, ShotError};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/ion_daq.toml";

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "ION_DAQ_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IonDaqConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Timing reference and peer handshake
    pub trigger: TriggerConfig,
    /// Readout classification
    pub classifier: ClassifierConfig,
    /// Switch / kick / loss recovery
    pub recovery: RecoveryConfig,
    /// Per-point statistic
    pub statistics: AccumulationMode,
    /// Scan shape
    pub scan: ScanSettings,
    /// Background calibration tasks, run in listed order
    pub calibration: Vec<CalibrationTaskConfig>,
    /// Simulated trap used by the binary
    pub simulation: SimulationConfig,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, colored
    #[default]
    Pretty,
    /// Single-line, no colors
    Compact,
    /// One JSON object per line
    Json,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "ion_daq".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// Trigger gate configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Longest single wait for a reference edge
    #[serde(with = "humantime_serde")]
    pub sync_timeout: Duration,
    /// Budget for one shot's sync before a stall is logged
    #[serde(with = "humantime_serde")]
    pub sync_deadline: Duration,
    /// Longest wait for the peer handshake before re-arming
    #[serde(with = "humantime_serde")]
    pub peer_armed_timeout: Duration,
    /// Whether a peer waveform generator takes part
    pub use_peer: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        let sampling = SamplingConfig::default();
        Self {
            sync_timeout: sampling.sync_timeout,
            sync_deadline: sampling.sync_deadline,
            peer_armed_timeout: sampling.peer_armed_timeout,
            use_peer: true,
        }
    }
}

/// Classifier configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// One threshold per monitored region (one or two regions)
    pub thresholds: Vec<u32>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            thresholds: vec![7, 7],
        }
    }
}

/// Scan shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Accepted samples per point
    pub samples_per_point: u32,
    /// First parameter value
    pub start: f64,
    /// Last parameter value
    pub stop: f64,
    /// Number of points
    pub points: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            samples_per_point: 100,
            start: 0.0,
            stop: 1.0,
            points: 21,
        }
    }
}

/// Parameters of the simulated trap driven by the `ion_daq scan` binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// RNG seed; equal seeds give equal scans
    pub seed: u64,
    /// Mean counts of a fluorescing region
    pub bright_mean: u32,
    /// Mean background counts of a dark region
    pub dark_mean: u32,
    /// Per-shot probability that the ion is kicked to the second position
    pub kick_probability: f64,
    /// Per-shot probability that the ion is lost
    pub loss_probability: f64,
    /// Probability that a nudge returns a kicked ion
    pub nudge_success: f64,
    /// Probability that a recapture brings a lost ion back
    pub recapture_success: f64,
    /// Line-trigger period
    #[serde(with = "humantime_serde")]
    pub line_period: Duration,
    /// Pulse sequence duration
    #[serde(with = "humantime_serde")]
    pub shot_duration: Duration,
    /// Nudge maneuver duration
    #[serde(with = "humantime_serde")]
    pub nudge_duration: Duration,
    /// Recapture maneuver duration
    #[serde(with = "humantime_serde")]
    pub recapture_duration: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 7,
            bright_mean: 30,
            dark_mean: 1,
            kick_probability: 0.01,
            loss_probability: 0.002,
            nudge_success: 0.9,
            recapture_success: 0.6,
            line_period: Duration::from_micros(16_667),
            shot_duration: Duration::from_millis(2),
            nudge_duration: Duration::from_millis(5),
            recapture_duration: Duration::from_millis(50),
        }
    }
}

impl IonDaqConfig {
    /// Load configuration from `config/ion_daq.toml` and environment variables
    ///
    /// Environment variables override with prefix ION_DAQ_
    /// Example: ION_DAQ_APPLICATION__LOG_LEVEL=debug
    pub fn load() -> ControlResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> ControlResult<Self> {
        Ok(Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> ControlResult<()> {
        self.check().map_err(ShotError::Configuration)
    }

    fn check(&self) -> Result<(), String> {
        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.trigger.sync_timeout.is_zero() {
            return Err("trigger.sync_timeout must be greater than zero".to_string());
        }
        if self.trigger.peer_armed_timeout.is_zero() {
            return Err("trigger.peer_armed_timeout must be greater than zero".to_string());
        }

        if !matches!(self.classifier.thresholds.len(), 1 | 2) {
            return Err(format!(
                "classifier.thresholds must list one or two regions, got {}",
                self.classifier.thresholds.len()
            ));
        }

        if self.recovery.loss_ceiling == 0 {
            return Err("recovery.loss_ceiling must be at least 1".to_string());
        }

        if let AccumulationMode::Thresholded { threshold: 0 } = self.statistics {
            return Err("statistics.threshold must be at least 1".to_string());
        }

        if self.scan.samples_per_point == 0 {
            return Err("scan.samples_per_point must be at least 1".to_string());
        }
        if self.scan.points == 0 {
            return Err("scan.points must be at least 1".to_string());
        }

        // Validate calibration names are unique
        let mut names = std::collections::HashSet::new();
        for task in &self.calibration {
            if !names.insert(&task.name) {
                return Err(format!("Duplicate calibration task: {}", task.name));
            }
            if task.interval.is_zero() {
                return Err(format!("Calibration task '{}' has a zero interval", task.name));
            }
        }

        let probabilities = [
            ("kick_probability", self.simulation.kick_probability),
            ("loss_probability", self.simulation.loss_probability),
            ("nudge_success", self.simulation.nudge_success),
            ("recapture_success", self.simulation.recapture_success),
        ];
        for (name, p) in probabilities {
            if !(0.0..=1.0).contains(&p) {
                return Err(format!("simulation.{} must be within 0..=1, got {}", name, p));
            }
        }

        Ok(())
    }

    /// Sampling settings for the controller
    pub fn sampling(&self) -> SamplingConfig {
        SamplingConfig {
            samples_per_point: self.scan.samples_per_point,
            sync_timeout: self.trigger.sync_timeout,
            sync_deadline: self.trigger.sync_deadline,
            peer_armed_timeout: self.trigger.peer_armed_timeout,
            accumulation: self.statistics,
        }
    }

    /// Classifier for the configured thresholds
    pub fn threshold_classifier(&self) -> ControlResult<ThresholdClassifier> {
        ThresholdClassifier::from_thresholds(&self.classifier.thresholds).ok_or_else(|| {
            ShotError::Configuration(format!(
                "unsupported threshold list {:?}",
                self.classifier.thresholds
            ))
        })
    }

    /// Scan points described by the `scan` section
    pub fn scan_points(&self) -> Vec<ScanPoint> {
        ScanPoint::linspace(self.scan.start, self.scan.stop, self.scan.points)
    }

    /// Calibration tasks whose first interval counts from `started_at`
    pub fn calibration_tasks(&self, started_at: Instant) -> Vec<CalibrationTask> {
        self.calibration
            .iter()
            .map(|task| CalibrationTask::from_config(task, started_at))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = IonDaqConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sampling().samples_per_point, 100);
        assert_eq!(config.scan_points().len(), 21);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = IonDaqConfig::default();
        config.application.log_level = "verbose".to_string();
        assert!(matches!(config.validate(), Err(ShotError::Configuration(_))));
    }

    #[test]
    fn test_threshold_count_checked() {
        let mut config = IonDaqConfig::default();
        config.classifier.thresholds = vec![1, 2, 3];
        assert!(config.validate().is_err());
        assert!(config.threshold_classifier().is_err());

        config.classifier.thresholds = vec![4];
        assert!(config.validate().is_ok());
        assert_eq!(
            config.threshold_classifier().unwrap(),
            ThresholdClassifier::single(4)
        );
    }

    #[test]
    fn test_zero_loss_ceiling_rejected() {
        let mut config = IonDaqConfig::default();
        config.recovery.loss_ceiling = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_calibration_names() {
        let mut config = IonDaqConfig::default();
        let task = CalibrationTaskConfig {
            name: "frequency".to_string(),
            interval: Duration::from_secs(10),
            enabled: true,
        };
        config.calibration = vec![task.clone(), task];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate calibration task"));
    }

    #[test]
    fn test_probability_range() {
        let mut config = IonDaqConfig::default();
        config.simulation.loss_probability = 1.5;
        assert!(config.validate().is_err());
    }
}
