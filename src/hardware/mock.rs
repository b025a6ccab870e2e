//! Mock Hardware Implementations
//!
//! Provides stand-in collaborators for testing and demos without a trap.
//! All mock devices use async-safe operations (tokio::time::sleep, not std::thread::sleep).
//!
//! # Available Mocks
//!
//! Scripted (deterministic, for tests):
//! - `ScriptedReference` - timing reference that times out on demand
//! - `MockPeerLink` - peer generator that can drop handshakes
//! - `ScriptedSequence` - pulse sequence returning queued readouts
//! - `CountingManeuver` - maneuver that only counts its runs
//! - `MockCalibration` - calibration routine with a fixed outcome
//!
//! Simulated (seeded random, for the demo binary):
//! - `PeriodicReference` - line-trigger edges every `period`
//! - `SimulatedIonTrap` - one ion that gets shelved, kicked and lost
//! - `SimulatedManeuver` / `SimulatedCalibration` - act on the same trap

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

use crate::config::SimulationConfig;
use crate::control::{
    ConfigurationHint, DetectorSnapshot, IonConfiguration, ScanPoint, ThresholdClassifier,
};
use crate::hardware::capabilities::{
    CalibrationRoutine, Maneuver, PeerLink, ShotSequence, SyncReference,
};

/// Counts a scripted bright region reads out.
pub const SCRIPTED_BRIGHT_COUNTS: u32 = 40;

/// Per-region threshold that separates scripted bright and dark readouts.
pub const SCRIPTED_THRESHOLD: u32 = 10;

fn pop_or(queue: &Mutex<VecDeque<DetectorSnapshot>>, fallback: &DetectorSnapshot) -> DetectorSnapshot {
    queue
        .lock()
        .ok()
        .and_then(|mut q| q.pop_front())
        .unwrap_or_else(|| fallback.clone())
}

// =============================================================================
// ScriptedReference - Timing Reference
// =============================================================================

/// Timing reference driven by a script.
///
/// Each `rising_edge()` call consumes one script entry: `true` delivers an
/// edge, `false` never does (the caller's timeout fires). Once the script is
/// exhausted every call delivers an edge.
///
/// # Example
///
/// ```rust,ignore
/// // Two timeouts, then edges
/// let reference = ScriptedReference::new([false, false]);
/// ```
pub struct ScriptedReference {
    script: Mutex<VecDeque<bool>>,
    failing: bool,
    period: Duration,
    requested: AtomicUsize,
}

impl ScriptedReference {
    /// Reference following `script`, then always edging.
    pub fn new(script: impl IntoIterator<Item = bool>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            failing: false,
            period: Duration::ZERO,
            requested: AtomicUsize::new(0),
        }
    }

    /// Reference that edges on every call.
    pub fn always() -> Self {
        Self::new([])
    }

    /// Reference whose input read always fails.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::always()
        }
    }

    /// Delay every delivered edge by `period`.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Number of `rising_edge()` calls so far.
    pub fn edges_requested(&self) -> usize {
        self.requested.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncReference for ScriptedReference {
    async fn rising_edge(&self) -> Result<()> {
        self.requested.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(anyhow!("ScriptedReference: reference input disconnected"));
        }

        let edge = self
            .script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or(true);
        if !edge {
            std::future::pending::<()>().await;
        }

        sleep(self.period).await;
        Ok(())
    }
}

// =============================================================================
// MockPeerLink - Peer Waveform Generator
// =============================================================================

/// Peer generator whose first `n` handshakes never arrive.
pub struct MockPeerLink {
    dropped_remaining: AtomicUsize,
    arms: AtomicUsize,
    handshake_waits: AtomicUsize,
    armed_points: Mutex<Vec<usize>>,
}

impl MockPeerLink {
    /// Peer that always answers.
    pub fn reliable() -> Self {
        Self::dropping_handshakes(0)
    }

    /// Peer that ignores the first `n` handshake waits.
    pub fn dropping_handshakes(n: usize) -> Self {
        Self {
            dropped_remaining: AtomicUsize::new(n),
            arms: AtomicUsize::new(0),
            handshake_waits: AtomicUsize::new(0),
            armed_points: Mutex::new(Vec::new()),
        }
    }

    /// Arm requests received.
    pub fn arm_requests(&self) -> usize {
        self.arms.load(Ordering::SeqCst)
    }

    /// Handshake waits started.
    pub fn handshake_waits(&self) -> usize {
        self.handshake_waits.load(Ordering::SeqCst)
    }

    /// Indices of the points armed, in order (re-arms repeat the index).
    pub fn armed_points(&self) -> Vec<usize> {
        self.armed_points
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PeerLink for MockPeerLink {
    async fn arm(&self, point: &ScanPoint) -> Result<()> {
        self.arms.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut points) = self.armed_points.lock() {
            points.push(point.index);
        }
        debug!(point = point.index, parameter = point.parameter, "MockPeerLink: arm requested");
        Ok(())
    }

    async fn armed(&self) -> Result<()> {
        self.handshake_waits.fetch_add(1, Ordering::SeqCst);
        let dropped = self
            .dropped_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if dropped {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

// =============================================================================
// ScriptedSequence - Pulse Sequence and Readout
// =============================================================================

/// Pulse sequence that replays queued readouts.
///
/// Readouts are scripted as ion configurations and rendered as two-region
/// snapshots that `ScriptedSequence::classifier()` maps back exactly. When a
/// queue runs dry its fallback is used: shots and probes read `Position1`,
/// re-cools read `Dark`.
pub struct ScriptedSequence {
    shots: Mutex<VecDeque<DetectorSnapshot>>,
    recools: Mutex<VecDeque<DetectorSnapshot>>,
    probes: Mutex<VecDeque<DetectorSnapshot>>,
    shot_fallback: DetectorSnapshot,
    recool_fallback: DetectorSnapshot,
    probe_fallback: DetectorSnapshot,
    failing_shot: Option<usize>,
    shot_duration: Duration,
    shots_run: AtomicUsize,
    recools_run: AtomicUsize,
    probes_run: AtomicUsize,
    stores: AtomicUsize,
    parameters: Mutex<Vec<f64>>,
}

impl Default for ScriptedSequence {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSequence {
    /// Sequence with empty scripts.
    pub fn new() -> Self {
        Self {
            shots: Mutex::new(VecDeque::new()),
            recools: Mutex::new(VecDeque::new()),
            probes: Mutex::new(VecDeque::new()),
            shot_fallback: Self::snapshot(IonConfiguration::Position1),
            recool_fallback: Self::snapshot(IonConfiguration::Dark),
            probe_fallback: Self::snapshot(IonConfiguration::Position1),
            failing_shot: None,
            shot_duration: Duration::ZERO,
            shots_run: AtomicUsize::new(0),
            recools_run: AtomicUsize::new(0),
            probes_run: AtomicUsize::new(0),
            stores: AtomicUsize::new(0),
            parameters: Mutex::new(Vec::new()),
        }
    }

    /// Readout rendered for a scripted configuration.
    pub fn snapshot(configuration: IonConfiguration) -> DetectorSnapshot {
        let b = SCRIPTED_BRIGHT_COUNTS;
        match configuration {
            IonConfiguration::Dark => DetectorSnapshot::regions([0, 0]),
            IonConfiguration::Position1 => DetectorSnapshot::regions([b, 0]),
            IonConfiguration::Position2 => DetectorSnapshot::regions([0, b]),
            IonConfiguration::BothBright => DetectorSnapshot::regions([b, b]),
        }
    }

    /// Classifier that inverts `snapshot()`.
    pub fn classifier() -> ThresholdClassifier {
        ThresholdClassifier::pair(SCRIPTED_THRESHOLD, SCRIPTED_THRESHOLD)
    }

    /// Queue measurement shot readouts.
    pub fn with_shots(self, shots: impl IntoIterator<Item = IonConfiguration>) -> Self {
        self.with_shot_snapshots(shots.into_iter().map(Self::snapshot))
    }

    /// Queue raw measurement shot readouts.
    pub fn with_shot_snapshots(self, shots: impl IntoIterator<Item = DetectorSnapshot>) -> Self {
        if let Ok(mut q) = self.shots.lock() {
            q.extend(shots);
        }
        self
    }

    /// Queue re-cool readouts.
    pub fn with_recools(self, recools: impl IntoIterator<Item = IonConfiguration>) -> Self {
        if let Ok(mut q) = self.recools.lock() {
            q.extend(recools.into_iter().map(Self::snapshot));
        }
        self
    }

    /// Queue probe readouts.
    pub fn with_probes(self, probes: impl IntoIterator<Item = IonConfiguration>) -> Self {
        if let Ok(mut q) = self.probes.lock() {
            q.extend(probes.into_iter().map(Self::snapshot));
        }
        self
    }

    /// Readout of shots once the shot script is exhausted.
    pub fn with_shot_fallback(mut self, configuration: IonConfiguration) -> Self {
        self.shot_fallback = Self::snapshot(configuration);
        self
    }

    /// Readout of re-cools once the re-cool script is exhausted.
    pub fn with_recool_fallback(mut self, configuration: IonConfiguration) -> Self {
        self.recool_fallback = Self::snapshot(configuration);
        self
    }

    /// Make the `n`th shot (1-based) fail with a hardware error.
    pub fn failing_at_shot(mut self, n: usize) -> Self {
        self.failing_shot = Some(n);
        self
    }

    /// Wall time each shot takes.
    pub fn with_shot_duration(mut self, duration: Duration) -> Self {
        self.shot_duration = duration;
        self
    }

    /// Shots executed.
    pub fn shots_run(&self) -> usize {
        self.shots_run.load(Ordering::SeqCst)
    }

    /// Re-cool cycles executed.
    pub fn recools_run(&self) -> usize {
        self.recools_run.load(Ordering::SeqCst)
    }

    /// Probe cycles executed.
    pub fn probes_run(&self) -> usize {
        self.probes_run.load(Ordering::SeqCst)
    }

    /// Times the hardware was put into the store state.
    pub fn store_calls(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }

    /// Parameters of every executed shot, in order.
    pub fn shot_parameters(&self) -> Vec<f64> {
        self.parameters.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ShotSequence for ScriptedSequence {
    async fn run_shot(&self, point: &ScanPoint) -> Result<DetectorSnapshot> {
        let n = self.shots_run.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_shot == Some(n) {
            return Err(anyhow!("ScriptedSequence: sequencer underflow on shot {}", n));
        }
        if let Ok(mut p) = self.parameters.lock() {
            p.push(point.parameter);
        }
        sleep(self.shot_duration).await;
        Ok(pop_or(&self.shots, &self.shot_fallback))
    }

    async fn recool(&self) -> Result<DetectorSnapshot> {
        self.recools_run.fetch_add(1, Ordering::SeqCst);
        Ok(pop_or(&self.recools, &self.recool_fallback))
    }

    async fn probe(&self) -> Result<DetectorSnapshot> {
        self.probes_run.fetch_add(1, Ordering::SeqCst);
        Ok(pop_or(&self.probes, &self.probe_fallback))
    }

    async fn store(&self) -> Result<()> {
        self.stores.fetch_add(1, Ordering::SeqCst);
        debug!("ScriptedSequence: outputs stored");
        Ok(())
    }
}

// =============================================================================
// CountingManeuver - Corrective Maneuver
// =============================================================================

/// Maneuver that counts its runs and optionally fails.
pub struct CountingManeuver {
    name: String,
    runs: AtomicUsize,
    duration: Duration,
    failing: bool,
}

impl CountingManeuver {
    /// Instant maneuver that always succeeds.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            runs: AtomicUsize::new(0),
            duration: Duration::ZERO,
            failing: false,
        }
    }

    /// Maneuver whose actuator always fails.
    pub fn failing(name: impl Into<String>) -> Self {
        Self {
            failing: true,
            ..Self::new(name)
        }
    }

    /// Wall time each run takes.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Runs so far.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Maneuver for CountingManeuver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        sleep(self.duration).await;
        if self.failing {
            anyhow::bail!("CountingManeuver: {} actuator fault", self.name);
        }
        Ok(())
    }
}

// =============================================================================
// MockCalibration - Background Calibration
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum CalibrationOutcome {
    Hint(IonConfiguration),
    NoSignal,
    Fail,
}

/// Calibration routine with a fixed outcome.
pub struct MockCalibration {
    name: String,
    outcome: CalibrationOutcome,
    runs: AtomicUsize,
    journal: Option<Arc<Mutex<Vec<String>>>>,
}

impl MockCalibration {
    fn with_outcome(name: impl Into<String>, outcome: CalibrationOutcome) -> Self {
        Self {
            name: name.into(),
            outcome,
            runs: AtomicUsize::new(0),
            journal: None,
        }
    }

    /// Routine that leaves the ion read out as `configuration`.
    pub fn with_hint(name: impl Into<String>, configuration: IonConfiguration) -> Self {
        Self::with_outcome(name, CalibrationOutcome::Hint(configuration))
    }

    /// Routine that finds no usable signal.
    pub fn no_signal(name: impl Into<String>) -> Self {
        Self::with_outcome(name, CalibrationOutcome::NoSignal)
    }

    /// Routine that errors out.
    pub fn failing(name: impl Into<String>) -> Self {
        Self::with_outcome(name, CalibrationOutcome::Fail)
    }

    /// Append the routine name to `journal` on every run.
    pub fn with_journal(mut self, journal: Arc<Mutex<Vec<String>>>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Runs so far.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CalibrationRoutine for MockCalibration {
    async fn run(&self) -> Result<Option<ConfigurationHint>> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if let Some(journal) = &self.journal {
            if let Ok(mut j) = journal.lock() {
                j.push(self.name.clone());
            }
        }

        match self.outcome {
            CalibrationOutcome::Hint(configuration) => Ok(Some(ConfigurationHint::new(
                ScriptedSequence::snapshot(configuration),
            ))),
            CalibrationOutcome::NoSignal => Ok(None),
            CalibrationOutcome::Fail => Err(anyhow!("MockCalibration: {} lost lock", self.name)),
        }
    }
}

// =============================================================================
// Simulated Ion Trap
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrapPosition {
    Position1,
    Position2,
    Lost,
}

struct TrapState {
    rng: StdRng,
    position: TrapPosition,
}

impl TrapState {
    fn readout(&mut self, config: &SimulationConfig, shelved: bool) -> DetectorSnapshot {
        let signal = if shelved {
            self.background(config)
        } else {
            self.fluorescence(config)
        };
        let background = self.background(config);
        let position = self.position;
        match position {
            TrapPosition::Position1 => DetectorSnapshot::regions([signal, background]),
            TrapPosition::Position2 => DetectorSnapshot::regions([background, signal]),
            TrapPosition::Lost => {
                let other = self.background(config);
                DetectorSnapshot::regions([background, other])
            }
        }
    }

    fn fluorescence(&mut self, config: &SimulationConfig) -> u32 {
        config.bright_mean / 2 + self.rng.gen_range(0..=config.bright_mean)
    }

    fn background(&mut self, config: &SimulationConfig) -> u32 {
        self.rng.gen_range(0..=config.dark_mean * 2)
    }
}

/// Seeded single-ion trap with a Rabi-flop measurement.
///
/// The scan parameter is a pulse area in units of pi: a shot shelves the ion
/// (reads dark) with probability `sin²(π·θ/2)`. Re-cooling and probing never
/// shelve. Between shots the ion may be kicked to the second position or lost.
pub struct SimulatedIonTrap {
    config: SimulationConfig,
    state: Arc<Mutex<TrapState>>,
}

impl SimulatedIonTrap {
    /// Trap with the ion loaded in the first position.
    pub fn new(config: SimulationConfig) -> Self {
        let state = TrapState {
            rng: StdRng::seed_from_u64(config.seed),
            position: TrapPosition::Position1,
        };
        Self {
            config,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Threshold that splits the simulated bright and dark count ranges.
    pub fn threshold(&self) -> u32 {
        (self.config.dark_mean * 2).max(self.config.bright_mean / 4)
    }

    /// Classifier matched to the simulated count levels.
    pub fn classifier(&self) -> ThresholdClassifier {
        let t = self.threshold();
        ThresholdClassifier::pair(t, t)
    }

    /// Nudge maneuver acting on this trap.
    pub fn nudge(&self) -> SimulatedManeuver {
        SimulatedManeuver {
            kind: ManeuverKind::Nudge,
            config: self.config.clone(),
            state: Arc::clone(&self.state),
        }
    }

    /// Recapture maneuver acting on this trap.
    pub fn recapture(&self) -> SimulatedManeuver {
        SimulatedManeuver {
            kind: ManeuverKind::Recapture,
            config: self.config.clone(),
            state: Arc::clone(&self.state),
        }
    }

    /// Calibration routine reading out this trap.
    pub fn calibration(&self, name: impl Into<String>) -> SimulatedCalibration {
        SimulatedCalibration {
            name: name.into(),
            config: self.config.clone(),
            state: Arc::clone(&self.state),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, TrapState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("SimulatedIonTrap: state lock poisoned"))
    }
}

#[async_trait]
impl ShotSequence for SimulatedIonTrap {
    async fn run_shot(&self, point: &ScanPoint) -> Result<DetectorSnapshot> {
        sleep(self.config.shot_duration).await;

        let mut state = self.lock()?;
        let roll: f64 = state.rng.gen();
        if state.position != TrapPosition::Lost {
            if roll < self.config.loss_probability {
                state.position = TrapPosition::Lost;
            } else if roll < self.config.loss_probability + self.config.kick_probability
                && state.position == TrapPosition::Position1
            {
                state.position = TrapPosition::Position2;
            }
        }

        let shelve = (std::f64::consts::PI * point.parameter / 2.0)
            .sin()
            .powi(2)
            .clamp(0.0, 1.0);
        let shelved = state.rng.gen_bool(shelve);
        Ok(state.readout(&self.config, shelved))
    }

    async fn recool(&self) -> Result<DetectorSnapshot> {
        let mut state = self.lock()?;
        Ok(state.readout(&self.config, false))
    }

    async fn probe(&self) -> Result<DetectorSnapshot> {
        let mut state = self.lock()?;
        Ok(state.readout(&self.config, false))
    }

    async fn store(&self) -> Result<()> {
        debug!("SimulatedIonTrap: outputs stored");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ManeuverKind {
    Nudge,
    Recapture,
}

/// Nudge or recapture acting on a `SimulatedIonTrap`.
pub struct SimulatedManeuver {
    kind: ManeuverKind,
    config: SimulationConfig,
    state: Arc<Mutex<TrapState>>,
}

#[async_trait]
impl Maneuver for SimulatedManeuver {
    fn name(&self) -> &str {
        match self.kind {
            ManeuverKind::Nudge => "nudge",
            ManeuverKind::Recapture => "recapture",
        }
    }

    async fn run(&self) -> Result<()> {
        let duration = match self.kind {
            ManeuverKind::Nudge => self.config.nudge_duration,
            ManeuverKind::Recapture => self.config.recapture_duration,
        };
        sleep(duration).await;

        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("SimulatedManeuver: state lock poisoned"))?;
        let (from, success) = match self.kind {
            ManeuverKind::Nudge => (TrapPosition::Position2, self.config.nudge_success),
            ManeuverKind::Recapture => (TrapPosition::Lost, self.config.recapture_success),
        };
        if state.position == from && state.rng.gen_bool(success.clamp(0.0, 1.0)) {
            state.position = TrapPosition::Position1;
        }
        Ok(())
    }
}

/// Calibration routine that leaves the simulated ion read out.
pub struct SimulatedCalibration {
    name: String,
    config: SimulationConfig,
    state: Arc<Mutex<TrapState>>,
}

#[async_trait]
impl CalibrationRoutine for SimulatedCalibration {
    async fn run(&self) -> Result<Option<ConfigurationHint>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("SimulatedCalibration: state lock poisoned"))?;
        debug!(routine = %self.name, "SimulatedCalibration: tracking");
        Ok(Some(ConfigurationHint::new(state.readout(&self.config, false))))
    }
}

/// Line-trigger reference with edges every `period` since creation.
pub struct PeriodicReference {
    origin: Instant,
    period: Duration,
}

impl PeriodicReference {
    /// Reference whose first edge is one period from now.
    pub fn new(period: Duration) -> Self {
        Self {
            origin: Instant::now(),
            period,
        }
    }
}

#[async_trait]
impl SyncReference for PeriodicReference {
    async fn rising_edge(&self) -> Result<()> {
        let period = self.period.as_nanos().max(1);
        let elapsed = self.origin.elapsed().as_nanos();
        let wait = period - elapsed % period;
        sleep(Duration::from_nanos(u64::try_from(wait).unwrap_or(u64::MAX))).await;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::Classifier;

    #[tokio::test]
    async fn test_scripted_sequence_replays_then_falls_back() {
        let sequence = ScriptedSequence::new()
            .with_shots([IonConfiguration::Position2, IonConfiguration::Dark])
            .with_recools([IonConfiguration::Position1]);
        let classifier = ScriptedSequence::classifier();
        let point = ScanPoint::new(0, 0.25);

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(classifier.classify(&sequence.run_shot(&point).await.unwrap()));
        }
        assert_eq!(
            seen,
            vec![
                IonConfiguration::Position2,
                IonConfiguration::Dark,
                IonConfiguration::Position1
            ]
        );

        let recools = [
            classifier.classify(&sequence.recool().await.unwrap()),
            classifier.classify(&sequence.recool().await.unwrap()),
        ];
        assert_eq!(recools, [IonConfiguration::Position1, IonConfiguration::Dark]);
        assert_eq!(sequence.shots_run(), 3);
        assert_eq!(sequence.shot_parameters(), vec![0.25; 3]);
    }

    #[test]
    fn test_scripted_snapshots_round_trip_through_classifier() {
        let classifier = ScriptedSequence::classifier();
        for configuration in IonConfiguration::ALL {
            assert_eq!(
                classifier.classify(&ScriptedSequence::snapshot(configuration)),
                configuration
            );
        }
    }

    #[tokio::test]
    async fn test_scripted_sequence_failing_shot() {
        let sequence = ScriptedSequence::new().failing_at_shot(2);
        let point = ScanPoint::new(0, 0.0);
        assert!(sequence.run_shot(&point).await.is_ok());
        assert!(sequence.run_shot(&point).await.is_err());
        assert!(sequence.run_shot(&point).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_link_drops_handshakes() {
        let peer = MockPeerLink::dropping_handshakes(1);
        peer.arm(&ScanPoint::new(4, 1.0)).await.unwrap();
        let first = tokio::time::timeout(Duration::from_millis(5), peer.armed()).await;
        assert!(first.is_err());
        let second = tokio::time::timeout(Duration::from_millis(5), peer.armed()).await;
        assert!(second.is_ok());
        assert_eq!(peer.armed_points(), vec![4]);
        assert_eq!(peer.handshake_waits(), 2);
    }

    #[tokio::test]
    async fn test_mock_calibration_outcomes() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let hint = MockCalibration::with_hint("frequency", IonConfiguration::Position2)
            .with_journal(journal.clone());
        let none = MockCalibration::no_signal("mode").with_journal(journal.clone());

        let readout = hint.run().await.unwrap().unwrap();
        assert_eq!(
            ScriptedSequence::classifier().classify(&readout.snapshot),
            IonConfiguration::Position2
        );
        assert!(none.run().await.unwrap().is_none());
        assert!(MockCalibration::failing("x").run().await.is_err());
        assert_eq!(*journal.lock().unwrap(), vec!["frequency", "mode"]);
    }

    #[tokio::test]
    async fn test_counting_maneuver() {
        let maneuver = CountingManeuver::new("nudge");
        maneuver.run().await.unwrap();
        maneuver.run().await.unwrap();
        assert_eq!(maneuver.runs(), 2);
        assert!(CountingManeuver::failing("recapture").run().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_trap_is_seed_deterministic() {
        let config = SimulationConfig {
            kick_probability: 0.2,
            loss_probability: 0.05,
            ..SimulationConfig::default()
        };
        let a = SimulatedIonTrap::new(config.clone());
        let b = SimulatedIonTrap::new(config);
        let point = ScanPoint::new(0, 0.5);
        for _ in 0..50 {
            assert_eq!(a.run_shot(&point).await.unwrap(), b.run_shot(&point).await.unwrap());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_trap_unshelved_ion_reads_bright() {
        let trap = SimulatedIonTrap::new(SimulationConfig {
            kick_probability: 0.0,
            loss_probability: 0.0,
            ..SimulationConfig::default()
        });
        let classifier = trap.classifier();
        // Zero pulse area never shelves
        let point = ScanPoint::new(0, 0.0);
        for _ in 0..20 {
            let snapshot = trap.run_shot(&point).await.unwrap();
            assert_eq!(classifier.classify(&snapshot), IonConfiguration::Position1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_reference_waits_one_period() {
        let reference = PeriodicReference::new(Duration::from_millis(20));
        let start = Instant::now();
        reference.rising_edge().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(start.elapsed() < Duration::from_millis(21));
    }
}
