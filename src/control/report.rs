//! Scan results and the live event stream.
//!
//! A finished point becomes a `PointReport`; the whole run becomes a
//! `ScanReport`. While the scan runs, the controller broadcasts `ScanEvent`s
//! so a results sink can plot or store points as they complete.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::recovery::RetryAction;
use super::types::IonConfiguration;

/// How sampling of a point ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointStatus {
    /// Target number of accepted samples reached
    Complete,
    /// Loss escalation exhausted; the value is "no data"
    Abandoned,
}

impl std::fmt::Display for PointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PointStatus::Complete => write!(f, "complete"),
            PointStatus::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Retry bookkeeping of one point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PointCounters {
    /// Shots attempted (executed pulse sequences)
    pub shots: u32,
    /// Sync waits that timed out
    pub trigger_timeouts: u32,
    /// Dark shots re-cooled and read out again
    pub reclassifications: u32,
    /// Dark readings confirmed by reclassification
    pub losses: u32,
    /// Kicked-ion nudges
    pub kicks: u32,
    /// Confirmed position switches
    pub switches: u32,
    /// Recapture maneuvers
    pub recaptures: u32,
    /// Peer handshakes that timed out and were re-armed
    pub peer_faults: u32,
}

impl PointCounters {
    /// Count the physical action attached to a retry decision.
    pub fn count_retry(&mut self, action: RetryAction) {
        match action {
            RetryAction::Reclassify => self.reclassifications += 1,
            RetryAction::Nudge => self.kicks += 1,
            RetryAction::CoolDown => self.switches += 1,
            RetryAction::Recapture => self.recaptures += 1,
            RetryAction::None => {}
        }
    }
}

/// Result of one scan point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointReport {
    /// Position of the point in the scan
    pub index: usize,
    /// Swept parameter value
    pub parameter: f64,
    /// Completion status
    pub status: PointStatus,
    /// Final statistic; `None` is the "no data" marker
    pub value: Option<f64>,
    /// Shots counted toward the statistic
    pub accepted_samples: u32,
    /// Position the samples were attributed to at the end of the point
    pub tracked_configuration: Option<IonConfiguration>,
    /// Retry bookkeeping
    pub counters: PointCounters,
    /// Wall-clock completion time
    pub finished_at: DateTime<Utc>,
}

/// How a scan ended without a scan-fatal error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "exit", rename_all = "snake_case")]
pub enum ScanExit {
    /// Every point was processed
    Completed,
    /// The cancellation flag was raised
    Cancelled {
        /// Reason given to the flag
        reason: Option<String>,
    },
}

/// Result of a whole scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    /// Unique run identifier
    pub run_uid: Uuid,
    /// Wall-clock start time
    pub started_at: DateTime<Utc>,
    /// Wall-clock end time
    pub finished_at: DateTime<Utc>,
    /// Processed points, in scan order
    pub points: Vec<PointReport>,
    /// How the scan ended
    pub exit: ScanExit,
}

impl ScanReport {
    /// Points reported as abandoned.
    pub fn abandoned_points(&self) -> impl Iterator<Item = &PointReport> {
        self.points
            .iter()
            .filter(|p| p.status == PointStatus::Abandoned)
    }

    /// Whether the scan ran to the end.
    pub fn is_completed(&self) -> bool {
        self.exit == ScanExit::Completed
    }
}

/// Live notification broadcast during a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScanEvent {
    /// The scan started
    ScanStarted {
        /// Run identifier
        run_uid: Uuid,
        /// Number of points to process
        points: usize,
    },
    /// Sampling of a point started
    PointStarted {
        /// Point index
        index: usize,
        /// Swept parameter value
        parameter: f64,
    },
    /// The peer handshake timed out and the peer was re-armed
    PeerFault {
        /// Point index
        index: usize,
        /// Re-arm attempt number
        attempt: u32,
    },
    /// A shot was counted
    SampleAccepted {
        /// Point index
        index: usize,
        /// Configuration the shot was attributed to
        configuration: IonConfiguration,
        /// Counted photons
        raw_count: u32,
    },
    /// A corrective action was taken
    Recovery {
        /// Point index
        index: usize,
        /// Action performed
        action: RetryAction,
    },
    /// A point finished
    PointFinished(PointReport),
    /// A calibration routine ran
    CalibrationRan {
        /// Routine name
        name: String,
        /// Configuration observed afterwards
        configuration: IonConfiguration,
    },
    /// The scan ended
    ScanFinished {
        /// Run identifier
        run_uid: Uuid,
        /// How the scan ended
        exit: ScanExit,
    },
    /// The scan stopped on a scan-fatal error
    ScanAborted {
        /// Run identifier
        run_uid: Uuid,
        /// Error message
        error: String,
    },
}
