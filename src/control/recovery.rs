//! Recovery policy: the per-shot accept / retry / recover / abandon decision.
//!
//! # State Machine
//!
//! ```text
//!                  single position c
//! ┌─────────┐   (reference established)   ┌──────────────┐
//! │ Unknown │────────────────────────────▶│ Tracking(p)  │◀──┐ c == p: accept
//! └─────────┘                             └──────┬───────┘───┘
//!                                                │
//!            c != p, kicked ──▶ nudge, stay Tracking(p)
//!            c != p, switched ─▶ cool down, Tracking(c)
//!            Dark ────────────▶ re-cool, reclassify once
//!                               still Dark ─▶ loss++
//!                               loss == ceiling ─▶ recapture / abandon
//!            BothBright ──────▶ fatal
//! ```
//!
//! The policy never touches hardware. It mutates the `RecoveryState` it is
//! handed and returns a `Decision`; the controller performs whatever physical
//! action the decision names.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::types::IonConfiguration;

/// Tunables of the recovery policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Consecutive confirmed dark readings that trigger escalation
    pub loss_ceiling: u32,
    /// Recapture maneuvers attempted before the point is abandoned
    pub max_recapture_attempts: u32,
    /// Treat Position1 → Position2 as a kicked ion that a nudge can return
    pub kick_recovery: bool,
    /// Nudges in a row before a kick is accepted as a real switch
    pub max_consecutive_nudges: u32,
    /// Settle time after a confirmed position switch
    #[serde(with = "humantime_serde")]
    pub switch_cooldown: Duration,
    /// Abandoned points in a row tolerated before the scan stops
    pub max_consecutive_abandoned_points: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            loss_ceiling: 5,
            max_recapture_attempts: 3,
            kick_recovery: true,
            max_consecutive_nudges: 3,
            switch_cooldown: Duration::from_millis(200),
            max_consecutive_abandoned_points: 3,
        }
    }
}

/// What the policy currently believes about the ion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingState {
    /// No single-ion position confirmed yet
    Unknown,
    /// Samples are accepted only in this position
    Tracking(IonConfiguration),
}

impl TrackingState {
    /// Tracking state implied by an observed configuration.
    pub fn from_observation(configuration: IonConfiguration) -> Self {
        if configuration.is_single_ion() {
            TrackingState::Tracking(configuration)
        } else {
            TrackingState::Unknown
        }
    }
}

/// Mutable recovery bookkeeping for one scan point.
///
/// Seeded from the configuration observed just before the point starts and
/// dropped when the point completes or is abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryState {
    tracking: TrackingState,
    consecutive_loss_attempts: u32,
    recapture_attempts: u32,
    consecutive_nudges: u32,
}

impl RecoveryState {
    /// Fresh state with the given tracking belief and zeroed counters.
    pub fn new(tracking: TrackingState) -> Self {
        Self {
            tracking,
            consecutive_loss_attempts: 0,
            recapture_attempts: 0,
            consecutive_nudges: 0,
        }
    }

    /// Current tracking belief.
    pub fn tracking(&self) -> TrackingState {
        self.tracking
    }

    /// The position samples are currently accepted in.
    pub fn last_accepted_configuration(&self) -> Option<IonConfiguration> {
        match self.tracking {
            TrackingState::Tracking(position) => Some(position),
            TrackingState::Unknown => None,
        }
    }

    /// Confirmed dark readings since the last single-ion classification.
    pub fn consecutive_loss_attempts(&self) -> u32 {
        self.consecutive_loss_attempts
    }

    /// Recapture maneuvers since the last accepted sample.
    pub fn recapture_attempts(&self) -> u32 {
        self.recapture_attempts
    }
}

/// Physical action attached to a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryAction {
    /// Re-cool, read out again and call `reevaluate`
    Reclassify,
    /// Short nudge/settle maneuver for a kicked ion
    Nudge,
    /// Wait out the switch cool-down
    CoolDown,
    /// Long recapture maneuver
    Recapture,
    /// Just take the next shot
    None,
}

/// Outcome of one policy step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// Count the shot, attributed to this configuration
    Accepted(IonConfiguration),
    /// Do not count the shot; perform the action and continue
    Retry(RetryAction),
    /// Stop sampling this point
    Abandoned,
    /// Stop the whole scan
    Fatal(IonConfiguration),
}

/// The switch / kick / loss state machine.
#[derive(Debug, Clone, Default)]
pub struct RecoveryPolicy {
    config: RecoveryConfig,
}

impl RecoveryPolicy {
    /// Create a policy.
    pub fn new(config: RecoveryConfig) -> Self {
        Self { config }
    }

    /// Policy tunables.
    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Decide on the classification of a freshly executed shot.
    ///
    /// A `Dark` shot is not judged yet: it returns `Retry(Reclassify)` and the
    /// caller must follow up with [`RecoveryPolicy::reevaluate`].
    pub fn evaluate(&self, state: &mut RecoveryState, configuration: IonConfiguration) -> Decision {
        match configuration {
            IonConfiguration::BothBright => Decision::Fatal(configuration),
            IonConfiguration::Dark => Decision::Retry(RetryAction::Reclassify),
            position => self.on_position(state, position),
        }
    }

    /// Decide on the reclassification that followed a dark shot.
    ///
    /// Never asks for another reclassification: a second dark reading is a loss.
    pub fn reevaluate(
        &self,
        state: &mut RecoveryState,
        configuration: IonConfiguration,
    ) -> Decision {
        match configuration {
            IonConfiguration::BothBright => Decision::Fatal(configuration),
            IonConfiguration::Dark => self.on_loss(state),
            position => self.on_position(state, position),
        }
    }

    fn on_position(&self, state: &mut RecoveryState, position: IonConfiguration) -> Decision {
        state.consecutive_loss_attempts = 0;

        match state.tracking {
            TrackingState::Tracking(tracked) if tracked == position => {
                state.recapture_attempts = 0;
                state.consecutive_nudges = 0;
                Decision::Accepted(position)
            }
            TrackingState::Tracking(tracked) => {
                if self.is_kick(tracked, position, state) {
                    state.consecutive_nudges += 1;
                    Decision::Retry(RetryAction::Nudge)
                } else {
                    state.consecutive_nudges = 0;
                    state.tracking = TrackingState::Tracking(position);
                    Decision::Retry(RetryAction::CoolDown)
                }
            }
            TrackingState::Unknown => {
                state.consecutive_nudges = 0;
                state.tracking = TrackingState::Tracking(position);
                Decision::Retry(RetryAction::None)
            }
        }
    }

    fn is_kick(&self, tracked: IonConfiguration, seen: IonConfiguration, state: &RecoveryState) -> bool {
        self.config.kick_recovery
            && tracked == IonConfiguration::Position1
            && seen == IonConfiguration::Position2
            && state.consecutive_nudges < self.config.max_consecutive_nudges
    }

    fn on_loss(&self, state: &mut RecoveryState) -> Decision {
        state.consecutive_loss_attempts += 1;
        if state.consecutive_loss_attempts < self.config.loss_ceiling {
            return Decision::Retry(RetryAction::None);
        }

        if state.recapture_attempts < self.config.max_recapture_attempts {
            state.recapture_attempts += 1;
            state.consecutive_loss_attempts = 0;
            Decision::Retry(RetryAction::Recapture)
        } else {
            Decision::Abandoned
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use IonConfiguration::*;

    fn policy(loss_ceiling: u32, max_recapture_attempts: u32) -> RecoveryPolicy {
        RecoveryPolicy::new(RecoveryConfig {
            loss_ceiling,
            max_recapture_attempts,
            ..RecoveryConfig::default()
        })
    }

    fn tracking(position: IonConfiguration) -> RecoveryState {
        RecoveryState::new(TrackingState::Tracking(position))
    }

    #[test]
    fn test_same_position_is_accepted() {
        let policy = RecoveryPolicy::default();
        let mut state = tracking(Position1);
        assert_eq!(policy.evaluate(&mut state, Position1), Decision::Accepted(Position1));
        assert_eq!(state.last_accepted_configuration(), Some(Position1));
    }

    #[test]
    fn test_both_bright_is_fatal_in_any_state() {
        let policy = RecoveryPolicy::default();
        for start in [TrackingState::Unknown, TrackingState::Tracking(Position2)] {
            let mut state = RecoveryState::new(start);
            assert_eq!(policy.evaluate(&mut state, BothBright), Decision::Fatal(BothBright));
            assert_eq!(policy.reevaluate(&mut state, BothBright), Decision::Fatal(BothBright));
        }
    }

    #[test]
    fn test_dark_asks_for_reclassification_without_counting_loss() {
        let policy = RecoveryPolicy::default();
        let mut state = tracking(Position1);
        assert_eq!(
            policy.evaluate(&mut state, Dark),
            Decision::Retry(RetryAction::Reclassify)
        );
        assert_eq!(state.consecutive_loss_attempts(), 0);
    }

    #[test]
    fn test_dark_confirmed_in_position_is_accepted() {
        let policy = RecoveryPolicy::default();
        let mut state = tracking(Position2);
        policy.evaluate(&mut state, Dark);
        assert_eq!(policy.reevaluate(&mut state, Position2), Decision::Accepted(Position2));
    }

    #[test]
    fn test_loss_counter_resets_on_single_position() {
        let policy = policy(5, 0);
        let mut state = tracking(Position1);
        for _ in 0..3 {
            assert_eq!(policy.reevaluate(&mut state, Dark), Decision::Retry(RetryAction::None));
        }
        assert_eq!(state.consecutive_loss_attempts(), 3);
        policy.evaluate(&mut state, Position1);
        assert_eq!(state.consecutive_loss_attempts(), 0);
    }

    #[test]
    fn test_loss_ceiling_abandons_without_recapture_budget() {
        let policy = policy(4, 0);
        let mut state = tracking(Position1);
        for _ in 0..3 {
            assert_eq!(policy.reevaluate(&mut state, Dark), Decision::Retry(RetryAction::None));
        }
        assert_eq!(policy.reevaluate(&mut state, Dark), Decision::Abandoned);
    }

    #[test]
    fn test_loss_ceiling_escalates_to_recapture() {
        let policy = policy(2, 2);
        let mut state = tracking(Position1);

        let decisions: Vec<Decision> = (0..6).map(|_| policy.reevaluate(&mut state, Dark)).collect();
        assert_eq!(
            decisions,
            vec![
                Decision::Retry(RetryAction::None),
                Decision::Retry(RetryAction::Recapture),
                Decision::Retry(RetryAction::None),
                Decision::Retry(RetryAction::Recapture),
                Decision::Retry(RetryAction::None),
                Decision::Abandoned,
            ]
        );
        assert_eq!(state.recapture_attempts(), 2);
    }

    #[test]
    fn test_recapture_budget_restored_by_accepted_sample() {
        let policy = policy(1, 1);
        let mut state = tracking(Position1);
        assert_eq!(policy.reevaluate(&mut state, Dark), Decision::Retry(RetryAction::Recapture));
        assert_eq!(policy.evaluate(&mut state, Position1), Decision::Accepted(Position1));
        assert_eq!(state.recapture_attempts(), 0);
        assert_eq!(policy.reevaluate(&mut state, Dark), Decision::Retry(RetryAction::Recapture));
    }

    #[test]
    fn test_kicked_ion_is_nudged_and_tracking_kept() {
        let policy = RecoveryPolicy::default();
        let mut state = tracking(Position1);
        assert_eq!(policy.evaluate(&mut state, Position2), Decision::Retry(RetryAction::Nudge));
        assert_eq!(state.tracking(), TrackingState::Tracking(Position1));
        assert_eq!(state.consecutive_loss_attempts(), 0);
    }

    #[test]
    fn test_repeated_kicks_become_a_switch() {
        let policy = RecoveryPolicy::new(RecoveryConfig {
            max_consecutive_nudges: 2,
            ..RecoveryConfig::default()
        });
        let mut state = tracking(Position1);
        assert_eq!(policy.evaluate(&mut state, Position2), Decision::Retry(RetryAction::Nudge));
        assert_eq!(policy.evaluate(&mut state, Position2), Decision::Retry(RetryAction::Nudge));
        assert_eq!(policy.evaluate(&mut state, Position2), Decision::Retry(RetryAction::CoolDown));
        assert_eq!(state.tracking(), TrackingState::Tracking(Position2));
        assert_eq!(policy.evaluate(&mut state, Position2), Decision::Accepted(Position2));
    }

    #[test]
    fn test_switch_back_to_position1_is_not_a_kick() {
        let policy = RecoveryPolicy::default();
        let mut state = tracking(Position2);
        assert_eq!(policy.evaluate(&mut state, Position1), Decision::Retry(RetryAction::CoolDown));
        assert_eq!(state.tracking(), TrackingState::Tracking(Position1));
    }

    #[test]
    fn test_kick_recovery_disabled_switches() {
        let policy = RecoveryPolicy::new(RecoveryConfig {
            kick_recovery: false,
            ..RecoveryConfig::default()
        });
        let mut state = tracking(Position1);
        assert_eq!(policy.evaluate(&mut state, Position2), Decision::Retry(RetryAction::CoolDown));
    }

    #[test]
    fn test_unknown_establishes_reference_without_accepting() {
        let policy = RecoveryPolicy::default();
        let mut state = RecoveryState::new(TrackingState::Unknown);
        assert_eq!(policy.evaluate(&mut state, Position2), Decision::Retry(RetryAction::None));
        assert_eq!(state.last_accepted_configuration(), Some(Position2));
        assert_eq!(policy.evaluate(&mut state, Position2), Decision::Accepted(Position2));
    }

    #[test]
    fn test_tracking_state_from_observation() {
        assert_eq!(
            TrackingState::from_observation(Position1),
            TrackingState::Tracking(Position1)
        );
        assert_eq!(TrackingState::from_observation(Dark), TrackingState::Unknown);
        assert_eq!(TrackingState::from_observation(BothBright), TrackingState::Unknown);
    }
}
