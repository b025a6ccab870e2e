//! ShotController - scan-level orchestration of shots, recovery and calibration.
//!
//! The controller owns every piece of per-scan state (accumulator, recovery
//! state, calibration tasks) and drives its collaborators strictly in
//! sequence from a single task.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐ run_scan ┌─────────────┐ armed ┌──────────┐ target reached ┌───────────────┐
//! │ Idle │─────────▶│ ArmingPoint │──────▶│ Sampling │───────────────▶│ PointComplete │
//! └──────┘          └─────────────┘       └────┬─────┘                └───────┬───────┘
//!                          ▲                   │ loss escalation              │
//!                          │                   ▼ exhausted                    │
//!                          │           ┌────────────────┐                     │
//!                          │           │ PointAbandoned │─────────────────────┤
//!                          │           └────────────────┘                     ▼
//!                          │                                          ┌─────────────┐
//!                          └──────────────────────────────────────────│ Calibrating │
//!                                                                     └─────────────┘
//!
//! last point ──▶ Finished     cancel ──▶ Cancelled     scan-fatal ──▶ ScanAborted
//! ```
//!
//! Every exit path puts the hardware into the store state before returning.
//!
//! # Usage
//!
//! ```rust,ignore
//! let gate = TriggerGate::new(reference).with_peer(peer);
//! let mut controller = ShotController::new(sequence, classifier, gate, nudge, recapture)
//!     .with_sampling(sampling)
//!     .with_policy(RecoveryPolicy::new(recovery));
//!
//! let mut events = controller.subscribe();
//! let report = controller.run_scan(&ScanPoint::linspace(0.0, 1.0, 21)).await?;
//! ```

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info, instrument, trace, warn, Span};
use uuid::Uuid;

use super::calibration::{CalibrationScheduler, CalibrationTask};
use super::classifier::Classifier;
use super::recovery::{Decision, RecoveryPolicy, RecoveryState, RetryAction, TrackingState};
use super::report::{PointCounters, PointReport, PointStatus, ScanEvent, ScanExit, ScanReport};
use super::statistics::{AccumulationMode, StatisticsAccumulator};
use super::trigger::TriggerGate;
use super::types::{DetectorSnapshot, IonConfiguration, ScanPoint, ShotResult};
use crate::error::{ControlResult, ShotError};
use crate::hardware::capabilities::{CalibrationRoutine, Maneuver, ShotSequence};
use crate::safety::CancellationFlag;

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// No scan running
    Idle,
    /// Waiting for the peer generator to arm the next point
    ArmingPoint,
    /// Taking shots for the current point
    Sampling,
    /// Running background calibration between points
    Calibrating,
    /// The current point reached its sample target
    PointComplete,
    /// The current point was given up
    PointAbandoned,
    /// The scan stopped on a scan-fatal error
    ScanAborted,
    /// The scan stopped on request
    Cancelled,
    /// Every point was processed
    Finished,
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerState::Idle => write!(f, "idle"),
            ControllerState::ArmingPoint => write!(f, "arming_point"),
            ControllerState::Sampling => write!(f, "sampling"),
            ControllerState::Calibrating => write!(f, "calibrating"),
            ControllerState::PointComplete => write!(f, "point_complete"),
            ControllerState::PointAbandoned => write!(f, "point_abandoned"),
            ControllerState::ScanAborted => write!(f, "scan_aborted"),
            ControllerState::Cancelled => write!(f, "cancelled"),
            ControllerState::Finished => write!(f, "finished"),
        }
    }
}

/// Per-point sampling settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingConfig {
    /// Accepted samples needed to complete a point
    pub samples_per_point: u32,
    /// Longest single wait for a reference edge
    pub sync_timeout: Duration,
    /// Budget for one shot's sync; exceeding it is logged and the budget restarts
    pub sync_deadline: Duration,
    /// Longest wait for the peer handshake before re-arming
    pub peer_armed_timeout: Duration,
    /// Statistic computed per point
    pub accumulation: AccumulationMode,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            samples_per_point: 100,
            sync_timeout: Duration::from_millis(50),
            sync_deadline: Duration::from_secs(1),
            peer_armed_timeout: Duration::from_millis(500),
            accumulation: AccumulationMode::default(),
        }
    }
}

/// Outcome of sampling one point.
enum PointOutcome {
    Finished(PointReport),
    Cancelled,
}

/// Drives a scan: sync, shoot, classify, decide, recover, calibrate.
pub struct ShotController<S: ShotSequence, C: Classifier> {
    sequence: S,
    classifier: C,
    gate: TriggerGate,
    nudge: Arc<dyn Maneuver>,
    recapture: Arc<dyn Maneuver>,
    policy: RecoveryPolicy,
    scheduler: CalibrationScheduler,
    sampling: SamplingConfig,
    cancel: CancellationFlag,
    events: broadcast::Sender<ScanEvent>,
    observed: TrackingState,
    state: ControllerState,
}

impl<S: ShotSequence, C: Classifier> ShotController<S, C> {
    /// Create a controller with default sampling and recovery settings.
    pub fn new(
        sequence: S,
        classifier: C,
        gate: TriggerGate,
        nudge: Arc<dyn Maneuver>,
        recapture: Arc<dyn Maneuver>,
    ) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            sequence,
            classifier,
            gate,
            nudge,
            recapture,
            policy: RecoveryPolicy::default(),
            scheduler: CalibrationScheduler::new(),
            sampling: SamplingConfig::default(),
            cancel: CancellationFlag::new(),
            events,
            observed: TrackingState::Unknown,
            state: ControllerState::Idle,
        }
    }

    /// Replace the sampling settings.
    pub fn with_sampling(mut self, sampling: SamplingConfig) -> Self {
        self.sampling = sampling;
        self
    }

    /// Replace the recovery policy.
    pub fn with_policy(mut self, policy: RecoveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Share a cancellation flag with the caller.
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Register a background calibration routine.
    ///
    /// Intervals restart when a scan starts.
    pub fn register_calibration(
        &mut self,
        name: impl Into<String>,
        interval: Duration,
        routine: Box<dyn CalibrationRoutine>,
    ) {
        self.scheduler
            .register(CalibrationTask::new(name, interval, Instant::now()), routine);
    }

    /// Register a calibration task built elsewhere (e.g. from configuration).
    pub fn register_calibration_task(
        &mut self,
        task: CalibrationTask,
        routine: Box<dyn CalibrationRoutine>,
    ) {
        self.scheduler.register(task, routine);
    }

    /// Subscribe to scan events.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.events.subscribe()
    }

    /// Handle for requesting cancellation.
    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    /// Current controller state.
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Configuration believed to be in the trap between points.
    pub fn observed(&self) -> TrackingState {
        self.observed
    }

    /// The pulse sequence collaborator.
    pub fn sequence(&self) -> &S {
        &self.sequence
    }

    /// The calibration scheduler.
    pub fn scheduler(&self) -> &CalibrationScheduler {
        &self.scheduler
    }

    /// Run a scan over `points`.
    ///
    /// Returns the report on completion or cancellation. Scan-fatal
    /// conditions (ambiguous configuration, ion lost, hardware failure)
    /// return `Err`. Hardware is stored in every case.
    #[instrument(skip_all, fields(run_uid = tracing::field::Empty, points = points.len()))]
    pub async fn run_scan(&mut self, points: &[ScanPoint]) -> ControlResult<ScanReport> {
        let run_uid = Uuid::new_v4();
        Span::current().record("run_uid", tracing::field::display(run_uid));
        let started_at = Utc::now();

        info!(points = points.len(), "Scan started");
        self.emit(ScanEvent::ScanStarted {
            run_uid,
            points: points.len(),
        });
        self.scheduler.reset(Instant::now());

        let mut reports = Vec::with_capacity(points.len());
        let outcome = self.scan_points(points, &mut reports).await;
        let stored = self.sequence.store().await;

        match outcome {
            Ok(exit) => {
                if let Err(e) = stored {
                    self.set_state(ControllerState::ScanAborted);
                    error!(error = %e, "Failed to store hardware outputs");
                    return Err(ShotError::hardware("store", e));
                }

                let final_state = match exit {
                    ScanExit::Completed => ControllerState::Finished,
                    ScanExit::Cancelled { .. } => ControllerState::Cancelled,
                };
                self.set_state(final_state);
                info!(
                    points_processed = reports.len(),
                    state = %final_state,
                    "Scan ended"
                );
                self.emit(ScanEvent::ScanFinished {
                    run_uid,
                    exit: exit.clone(),
                });

                Ok(ScanReport {
                    run_uid,
                    started_at,
                    finished_at: Utc::now(),
                    points: reports,
                    exit,
                })
            }
            Err(err) => {
                if let Err(e) = stored {
                    error!(error = %e, "Failed to store hardware outputs after scan failure");
                }
                self.set_state(ControllerState::ScanAborted);
                error!(error = %err, points_processed = reports.len(), "Scan aborted");
                self.emit(ScanEvent::ScanAborted {
                    run_uid,
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn scan_points(
        &mut self,
        points: &[ScanPoint],
        reports: &mut Vec<PointReport>,
    ) -> ControlResult<ScanExit> {
        let Some(first) = points.first() else {
            return Ok(ScanExit::Completed);
        };

        let seed = self.probe_configuration(first.index).await?;
        self.observed = TrackingState::from_observation(seed);
        debug!(configuration = %seed, "Initial ion configuration");

        let mut abandoned_in_row = 0u32;
        for point in points {
            if self.cancel.is_cancelled() {
                return Ok(self.cancelled_exit());
            }

            // A point abandoned without a later calibration hint leaves no reference
            if abandoned_in_row > 0 && self.observed == TrackingState::Unknown {
                let configuration = self.probe_configuration(point.index).await?;
                self.observed = TrackingState::from_observation(configuration);
                debug!(configuration = %configuration, "Ion configuration read after abandoned point");
            }

            let report = match self.sample_point(point).await? {
                PointOutcome::Finished(report) => report,
                PointOutcome::Cancelled => return Ok(self.cancelled_exit()),
            };

            let status = report.status;
            self.emit(ScanEvent::PointFinished(report.clone()));
            reports.push(report);

            if status == PointStatus::Abandoned {
                abandoned_in_row += 1;
                let limit = self.policy.config().max_consecutive_abandoned_points;
                if abandoned_in_row > limit {
                    error!(
                        point = point.index,
                        abandoned_points = abandoned_in_row,
                        "Ion could not be recaptured"
                    );
                    return Err(ShotError::IonLost {
                        point: point.index,
                        abandoned_points: abandoned_in_row,
                    });
                }
            } else {
                abandoned_in_row = 0;
            }

            if self.run_calibrations(point.index).await? {
                return Ok(self.cancelled_exit());
            }
        }

        Ok(ScanExit::Completed)
    }

    /// Sample one point until its target is reached or it is abandoned.
    #[instrument(skip(self, point), fields(point = point.index, parameter = point.parameter))]
    async fn sample_point(&mut self, point: &ScanPoint) -> ControlResult<PointOutcome> {
        self.set_state(ControllerState::ArmingPoint);
        self.emit(ScanEvent::PointStarted {
            index: point.index,
            parameter: point.parameter,
        });

        let mut counters = PointCounters::default();
        if !self.arm_peer(point, &mut counters).await? {
            return Ok(PointOutcome::Cancelled);
        }

        self.set_state(ControllerState::Sampling);
        let mut recovery = RecoveryState::new(self.observed);
        let mut accumulator = StatisticsAccumulator::new(self.sampling.accumulation);
        let target = self.sampling.samples_per_point;

        let status = loop {
            if accumulator.accepted_sample_count() >= target {
                break PointStatus::Complete;
            }
            if self.cancel.is_cancelled() {
                return Ok(PointOutcome::Cancelled);
            }
            if !self.await_sync(&mut counters).await {
                return Ok(PointOutcome::Cancelled);
            }

            let snapshot = self
                .sequence
                .run_shot(point)
                .await
                .map_err(|e| ShotError::hardware("run_shot", e))?;
            counters.shots += 1;

            let configuration = self.classifier.classify(&snapshot);
            let mut decision = self.policy.evaluate(&mut recovery, configuration);
            trace!(configuration = %configuration, ?decision, "Shot classified");

            if decision == Decision::Retry(RetryAction::Reclassify) {
                counters.count_retry(RetryAction::Reclassify);
                let readout = self
                    .sequence
                    .recool()
                    .await
                    .map_err(|e| ShotError::hardware("recool", e))?;
                let reclassified = self.classifier.classify(&readout);
                decision = self.policy.reevaluate(&mut recovery, reclassified);
                if reclassified == IonConfiguration::Dark {
                    counters.losses += 1;
                    warn!(
                        consecutive_losses = recovery.consecutive_loss_attempts(),
                        "Ion dark after re-cooling"
                    );
                }
            }

            match decision {
                Decision::Accepted(accepted) => {
                    self.record(point, &snapshot, accepted, &mut accumulator);
                }
                Decision::Retry(action) => {
                    self.perform(point, action, &mut counters).await?;
                }
                Decision::Abandoned => break PointStatus::Abandoned,
                Decision::Fatal(configuration) => {
                    error!(configuration = %configuration, "Ambiguous ion configuration");
                    return Err(ShotError::AmbiguousConfiguration {
                        point: point.index,
                        configuration,
                    });
                }
            }
        };

        // Samples taken while the ion was being lost are not reported
        let value = match status {
            PointStatus::Complete => accumulator.finalize(),
            PointStatus::Abandoned => None,
        };
        let report = PointReport {
            index: point.index,
            parameter: point.parameter,
            status,
            value,
            accepted_samples: accumulator.accepted_sample_count(),
            tracked_configuration: recovery.last_accepted_configuration(),
            counters,
            finished_at: Utc::now(),
        };

        match status {
            PointStatus::Complete => {
                self.set_state(ControllerState::PointComplete);
                self.observed = recovery.tracking();
                info!(
                    value = ?report.value,
                    shots = counters.shots,
                    trigger_timeouts = counters.trigger_timeouts,
                    "Point complete"
                );
            }
            PointStatus::Abandoned => {
                self.set_state(ControllerState::PointAbandoned);
                self.observed = TrackingState::Unknown;
                warn!(
                    accepted_samples = report.accepted_samples,
                    recaptures = counters.recaptures,
                    "Point abandoned, no data"
                );
            }
        }

        Ok(PointOutcome::Finished(report))
    }

    /// Arm the peer, re-arming on every lost handshake. `Ok(false)` on cancellation.
    async fn arm_peer(&self, point: &ScanPoint, counters: &mut PointCounters) -> ControlResult<bool> {
        let Some(peer) = self.gate.peer() else {
            return Ok(true);
        };

        let mut attempt = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Ok(false);
            }
            peer.arm(point)
                .await
                .map_err(|e| ShotError::hardware("peer arm", e))?;
            if self
                .gate
                .wait_for_peer_armed(self.sampling.peer_armed_timeout)
                .await
            {
                return Ok(true);
            }

            attempt += 1;
            counters.peer_faults += 1;
            warn!(attempt, "Peer generator handshake timed out, re-arming");
            self.emit(ScanEvent::PeerFault {
                index: point.index,
                attempt,
            });
        }
    }

    /// Wait for a reference edge, retrying timeouts. `false` on cancellation.
    async fn await_sync(&self, counters: &mut PointCounters) -> bool {
        let mut deadline = Instant::now() + self.sampling.sync_deadline;
        loop {
            if self
                .gate
                .wait_for_sync(deadline, self.sampling.sync_timeout)
                .await
            {
                return true;
            }

            counters.trigger_timeouts += 1;
            trace!(timeouts = counters.trigger_timeouts, "Sync wait timed out");
            if self.cancel.is_cancelled() {
                return false;
            }
            if Instant::now() >= deadline {
                warn!(
                    deadline_ms = %self.sampling.sync_deadline.as_millis(),
                    "No timing reference edge before the shot deadline"
                );
                deadline = Instant::now() + self.sampling.sync_deadline;
            }
        }
    }

    fn record(
        &self,
        point: &ScanPoint,
        snapshot: &DetectorSnapshot,
        configuration: IonConfiguration,
        accumulator: &mut StatisticsAccumulator,
    ) {
        let shot = ShotResult::from_snapshot(configuration, snapshot);
        accumulator.record(&shot);
        debug!(
            configuration = %shot.configuration,
            raw_count = shot.raw_count,
            accepted = accumulator.accepted_sample_count(),
            "Sample accepted"
        );
        self.emit(ScanEvent::SampleAccepted {
            index: point.index,
            configuration: shot.configuration,
            raw_count: shot.raw_count,
        });
    }

    async fn perform(
        &self,
        point: &ScanPoint,
        action: RetryAction,
        counters: &mut PointCounters,
    ) -> ControlResult<()> {
        match action {
            RetryAction::None | RetryAction::Reclassify => return Ok(()),
            RetryAction::Nudge => {
                warn!(maneuver = self.nudge.name(), "Ion kicked, nudging");
                self.nudge
                    .run()
                    .await
                    .map_err(|e| ShotError::hardware("nudge", e))?;
            }
            RetryAction::CoolDown => {
                let cooldown = self.policy.config().switch_cooldown;
                info!(cooldown_ms = %cooldown.as_millis(), "Ion switched position, cooling down");
                sleep(cooldown).await;
            }
            RetryAction::Recapture => {
                warn!(maneuver = self.recapture.name(), "Loss ceiling reached, recapturing");
                self.recapture
                    .run()
                    .await
                    .map_err(|e| ShotError::hardware("recapture", e))?;
            }
        }

        counters.count_retry(action);
        self.emit(ScanEvent::Recovery {
            index: point.index,
            action,
        });
        Ok(())
    }

    /// Run due calibration tasks in registration order. `Ok(true)` on cancellation.
    async fn run_calibrations(&mut self, point_index: usize) -> ControlResult<bool> {
        let due = self.scheduler.due_indices(Instant::now());
        if due.is_empty() {
            return Ok(false);
        }
        self.set_state(ControllerState::Calibrating);

        for index in due {
            if self.cancel.is_cancelled() {
                return Ok(true);
            }
            let Some(name) = self.scheduler.task(index).map(|t| t.name.clone()) else {
                continue;
            };

            let outcome = match self.scheduler.routine(index) {
                Some(routine) => routine.run().await,
                None => continue,
            };
            let hint = match outcome {
                Ok(hint) => hint,
                Err(e) => {
                    warn!(routine = %name, error = %e, "Calibration routine failed");
                    None
                }
            };

            let configuration = match hint {
                Some(hint) => self.classifier.classify(&hint.snapshot),
                None => self.probe_configuration(point_index).await?,
            };
            if configuration == IonConfiguration::BothBright {
                error!(routine = %name, "Ambiguous ion configuration after calibration");
                return Err(ShotError::AmbiguousConfiguration {
                    point: point_index,
                    configuration,
                });
            }

            self.observed = TrackingState::from_observation(configuration);
            self.scheduler.mark_run(index, Instant::now());
            debug!(routine = %name, configuration = %configuration, "Calibration ran");
            self.emit(ScanEvent::CalibrationRan {
                name,
                configuration,
            });
        }

        Ok(false)
    }

    /// Cool, read out and classify outside of a point.
    async fn probe_configuration(&self, point_index: usize) -> ControlResult<IonConfiguration> {
        let snapshot = self
            .sequence
            .probe()
            .await
            .map_err(|e| ShotError::hardware("probe", e))?;
        let configuration = self.classifier.classify(&snapshot);
        if configuration == IonConfiguration::BothBright {
            error!(configuration = %configuration, "Ambiguous ion configuration on probe");
            return Err(ShotError::AmbiguousConfiguration {
                point: point_index,
                configuration,
            });
        }
        Ok(configuration)
    }

    fn cancelled_exit(&self) -> ScanExit {
        let reason = self.cancel.reason();
        info!(reason = ?reason, "Scan cancelled");
        ScanExit::Cancelled { reason }
    }

    fn set_state(&mut self, state: ControllerState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "Controller state change");
            self.state = state;
        }
    }

    fn emit(&self, event: ScanEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }
}
