//! Shared builders for scan integration tests.

#![allow(dead_code)]

use ion_daq::control::{
    AccumulationMode, RecoveryConfig, RecoveryPolicy, SamplingConfig, ShotController,
    ThresholdClassifier, TriggerGate,
};
use ion_daq::hardware::mock::{
    CountingManeuver, ScriptedReference, ScriptedSequence, SCRIPTED_THRESHOLD,
};
use std::sync::Arc;
use std::time::Duration;

pub type ScriptedController = ShotController<ScriptedSequence, ThresholdClassifier>;

/// Controller plus handles on its maneuvers.
pub struct Rig {
    pub controller: ScriptedController,
    pub nudge: Arc<CountingManeuver>,
    pub recapture: Arc<CountingManeuver>,
}

/// Sampling settings with short waits and a dark-fraction statistic.
pub fn sampling(samples_per_point: u32) -> SamplingConfig {
    SamplingConfig {
        samples_per_point,
        sync_timeout: Duration::from_millis(10),
        sync_deadline: Duration::from_millis(100),
        peer_armed_timeout: Duration::from_millis(20),
        accumulation: AccumulationMode::Thresholded {
            threshold: SCRIPTED_THRESHOLD,
        },
    }
}

pub fn rig_with_gate(
    sequence: ScriptedSequence,
    gate: TriggerGate,
    samples_per_point: u32,
    recovery: RecoveryConfig,
) -> Rig {
    let nudge = Arc::new(CountingManeuver::new("nudge"));
    let recapture = Arc::new(CountingManeuver::new("recapture"));
    let controller = ShotController::new(
        sequence,
        ScriptedSequence::classifier(),
        gate,
        nudge.clone(),
        recapture.clone(),
    )
    .with_sampling(sampling(samples_per_point))
    .with_policy(RecoveryPolicy::new(recovery));

    Rig {
        controller,
        nudge,
        recapture,
    }
}

pub fn rig(sequence: ScriptedSequence, samples_per_point: u32, recovery: RecoveryConfig) -> Rig {
    let gate = TriggerGate::new(Arc::new(ScriptedReference::always()));
    rig_with_gate(sequence, gate, samples_per_point, recovery)
}
