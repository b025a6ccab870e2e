//! Hardware Abstractions
//!
//! Capability traits the shot controller drives, and mock implementations
//! for tests and the simulated demo.

pub mod capabilities;
pub mod mock;

pub use capabilities::{CalibrationRoutine, Maneuver, PeerLink, ShotSequence, SyncReference};
