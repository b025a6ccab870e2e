//! Error types for the shot-sampling controller.
//!
//! This module defines `ShotError`, the only error type that escapes a scan.
//! Using the `thiserror` crate, it separates the conditions the controller
//! cannot absorb locally from the ones it retries or reports as data.
//!
//! ## Error Hierarchy
//!
//! Most trouble during a scan never becomes an error value:
//!
//! - **Transient** (trigger timeout, a single dark reading): retried inside the
//!   point and never surfaced.
//! - **Recoverable-with-cost** (position switch, kicked ion): handled by a
//!   maneuver and a bounded counter, surfaced as logs and `PointReport` counters.
//! - **Point-fatal** (loss escalation exhausted): the point is reported as
//!   abandoned with no data and the scan moves on.
//!
//! What remains is scan-fatal and is carried by `ShotError`:
//!
//! - **`AmbiguousConfiguration`**: both ions fluoresce; the scan cannot tell
//!   which configuration it is measuring.
//! - **`IonLost`**: too many points abandoned in a row, recapture is not
//!   bringing the ion back.
//! - **`Hardware`**: a collaborator (pulse sequence, maneuver, readout) failed
//!   outright. The underlying `anyhow::Error` is kept as the source.
//! - **`Configuration`** / **`Figment`**: startup problems, raised before any
//!   hardware is touched.

use thiserror::Error;

use crate::control::IonConfiguration;

/// Convenience alias for results using the controller error type.
pub type ControlResult<T> = std::result::Result<T, ShotError>;

/// Scan-fatal and startup errors.
#[derive(Error, Debug)]
pub enum ShotError {
    /// A readout classified as a configuration no recovery can resolve.
    ///
    /// **Error Type**: Scan-fatal. The run is stopped before any further
    /// point is attempted.
    #[error("Ambiguous ion configuration {configuration} at scan point {point}")]
    AmbiguousConfiguration {
        /// Index of the scan point being sampled (or about to be sampled)
        point: usize,
        /// The offending classification
        configuration: IonConfiguration,
    },

    /// The ion could not be recaptured across consecutive scan points.
    #[error("Ion lost: {abandoned_points} consecutive scan points abandoned (last point {point})")]
    IonLost {
        /// Index of the last abandoned point
        point: usize,
        /// Number of consecutive abandoned points
        abandoned_points: u32,
    },

    /// A hardware collaborator returned an error.
    ///
    /// **Recovery Strategy**: hardware is put into the store state and the
    /// scan is reported as failed. Not retried: the controller cannot know
    /// whether the physical outputs are consistent.
    #[error("Hardware error during {operation}: {source}")]
    Hardware {
        /// The controller operation that was running
        operation: String,
        /// Error returned by the collaborator
        #[source]
        source: anyhow::Error,
    },

    /// Configuration values parsed but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Configuration could not be loaded or deserialized.
    #[error("Configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),
}

impl ShotError {
    /// Wrap a collaborator failure with the operation that was running.
    pub fn hardware(operation: impl Into<String>, source: anyhow::Error) -> Self {
        ShotError::Hardware {
            operation: operation.into(),
            source,
        }
    }

    /// Whether this error ended a scan that had already touched hardware.
    pub fn is_scan_fatal(&self) -> bool {
        matches!(
            self,
            ShotError::AmbiguousConfiguration { .. }
                | ShotError::IonLost { .. }
                | ShotError::Hardware { .. }
        )
    }
}

impl From<figment::Error> for ShotError {
    fn from(value: figment::Error) -> Self {
        ShotError::Figment(Box::new(value))
    }
}
