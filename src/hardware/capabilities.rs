//! Hardware Capabilities Consumed by the Shot Controller
//!
//! The controller never talks to a synthesizer, a switch, or a camera directly.
//! It drives a handful of small capability traits, each describing one thing the
//! experiment hardware can do for it:
//!
//! - `SyncReference` - the external periodic timing reference (line trigger)
//! - `PeerLink` - the cooperating waveform generator and its armed handshake
//! - `ShotSequence` - pulse sequence execution plus detector readout
//! - `Maneuver` - corrective actions (nudge, recapture)
//! - `CalibrationRoutine` - opaque background recalibration
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Focuses on ONE thing
//!
//! Every call is awaited strictly in sequence by a single controller task. The
//! timing hardware is a single shared real-time resource; implementations do
//! not need to support concurrent calls.
//!
//! # Example
//!
//! ```rust,ignore
//! struct PhotonCounterSequence { /* ... */ }
//!
//! #[async_trait]
//! impl ShotSequence for PhotonCounterSequence {
//!     async fn run_shot(&self, point: &ScanPoint) -> Result<DetectorSnapshot> {
//!         self.program(point.parameter).await?;
//!         self.start().await?;
//!         Ok(DetectorSnapshot::photon_count(self.read_counts().await?))
//!     }
//!
//!     async fn recool(&self) -> Result<DetectorSnapshot> { /* ... */ }
//!     async fn probe(&self) -> Result<DetectorSnapshot> { /* ... */ }
//!     async fn store(&self) -> Result<()> { /* ... */ }
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;

use crate::control::{ConfigurationHint, DetectorSnapshot, ScanPoint};

/// Capability: External Timing Reference
///
/// A periodic signal (typically the AC line) that shots are phase-locked to.
///
/// # Contract
/// - `rising_edge()` resolves at the next rising edge after the call
/// - It may wait arbitrarily long; the caller bounds it with a timeout
/// - Errors are read failures of the reference input, not timeouts
#[async_trait]
pub trait SyncReference: Send + Sync {
    /// Wait for the next rising edge.
    async fn rising_edge(&self) -> Result<()>;
}

/// Capability: Peer Waveform Generator
///
/// A cooperating signal-generation subsystem that must prepare a new waveform
/// for every scan point and confirms with a one-shot handshake pulse.
///
/// # Contract
/// - `arm()` is fire-and-forget: it returns once the request is sent
/// - `armed()` resolves when the handshake pulse arrives
/// - A lost handshake is a retried hardware fault, not a scan failure
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Ask the peer to prepare the waveform for `point`.
    async fn arm(&self, point: &ScanPoint) -> Result<()>;

    /// Wait for the armed handshake pulse.
    async fn armed(&self) -> Result<()>;
}

/// Capability: Pulse Sequence Execution and Readout
///
/// # Contract
/// - `run_shot()` runs the measurement sequence for a point and returns the
///   detector snapshot of its final readout; it is hard real-time and must
///   never be interrupted once started
/// - `recool()` runs a cooling cycle followed by a detection readout
/// - `probe()` is a plain cool + detect cycle used to establish the ion
///   configuration outside of a point
/// - `store()` brings all outputs to the safe idle ("store") state
#[async_trait]
pub trait ShotSequence: Send + Sync {
    /// Run one measurement shot at `point`.
    async fn run_shot(&self, point: &ScanPoint) -> Result<DetectorSnapshot>;

    /// Re-cool the ion and read it out again.
    async fn recool(&self) -> Result<DetectorSnapshot>;

    /// Cool and read out without a measurement sequence.
    async fn probe(&self) -> Result<DetectorSnapshot>;

    /// Bring hardware outputs to the safe store state.
    async fn store(&self) -> Result<()>;
}

/// Capability: Corrective Maneuver
///
/// Nudge/settle and recapture actions. A maneuver may take seconds of wall time
/// and returns nothing beyond success; the next readout tells whether it worked.
#[async_trait]
pub trait Maneuver: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Perform the maneuver.
    async fn run(&self) -> Result<()>;
}

/// Capability: Background Calibration
///
/// Frequency trackers, motional-mode trackers and similar routines. They are
/// built from the same primitives as a shot but the scheduler treats them as
/// opaque.
///
/// # Returns
/// - `Ok(Some(hint))` - calibration ran and left the ion read out in `hint`
/// - `Ok(None)` - no usable signal
/// - `Err` - the routine itself failed; treated like `Ok(None)`
#[async_trait]
pub trait CalibrationRoutine: Send + Sync {
    /// Run the calibration once.
    async fn run(&self) -> Result<Option<ConfigurationHint>>;
}
