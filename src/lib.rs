//! # ion_daq
//!
//! Shot-sampling control for trapped-ion experiments. For every point of a
//! parameter scan the controller synchronizes with an external timing
//! reference, runs a pulse sequence, classifies the readout into an ion
//! configuration and decides whether the shot counts, must be retried, or
//! calls for recovering the ion first.
//!
//! ## Crate Structure
//!
//! - **`control`**: the trigger gate, classifier, recovery policy,
//!   calibration scheduler, statistics accumulator and the `ShotController`
//!   that composes them.
//! - **`hardware`**: capability traits the controller drives
//!   (`hardware::capabilities`) plus scripted and simulated implementations
//!   (`hardware::mock`).
//! - **`config`**: figment-based configuration (TOML + `ION_DAQ_` environment).
//! - **`logging`**: `tracing-subscriber` initialization.
//! - **`error`**: `ShotError`, the scan-fatal error type.
//! - **`safety`**: cooperative scan cancellation.

pub mod config;
pub mod control;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod safety;

pub use error::{ControlResult, ShotError};
