//! Interleaved background calibration scheduling.
//!
//! Calibration tasks are checked between scan points only, never mid-shot.
//! A task is due once its interval has elapsed since it last ran. The run is
//! recorded whether or not the routine produced a usable signal, so a broken
//! reference is retried a full interval later instead of after every point.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use crate::hardware::capabilities::CalibrationRoutine;

/// Configuration of one calibration task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationTaskConfig {
    /// Routine name, unique within a scan
    pub name: String,
    /// Minimum time between runs
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Disabled tasks are never due
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Scheduling state of one background routine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationTask {
    /// Routine name
    pub name: String,
    /// Minimum time between runs
    pub interval: Duration,
    /// When the routine last ran (or when the scan started)
    pub last_run: Instant,
    /// Disabled tasks are never due
    pub enabled: bool,
}

impl CalibrationTask {
    /// Task that counts its first interval from `started_at`.
    pub fn new(name: impl Into<String>, interval: Duration, started_at: Instant) -> Self {
        Self {
            name: name.into(),
            interval,
            last_run: started_at,
            enabled: true,
        }
    }

    /// Task built from configuration.
    pub fn from_config(config: &CalibrationTaskConfig, started_at: Instant) -> Self {
        Self {
            name: config.name.clone(),
            interval: config.interval,
            last_run: started_at,
            enabled: config.enabled,
        }
    }
}

/// A task together with the routine it schedules.
struct ScheduledCalibration {
    task: CalibrationTask,
    routine: Box<dyn CalibrationRoutine>,
}

/// Registration-ordered set of calibration tasks.
#[derive(Default)]
pub struct CalibrationScheduler {
    entries: Vec<ScheduledCalibration>,
}

impl CalibrationScheduler {
    /// Empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a routine; tasks run in registration order.
    pub fn register(&mut self, task: CalibrationTask, routine: Box<dyn CalibrationRoutine>) {
        self.entries.push(ScheduledCalibration { task, routine });
    }

    /// Whether `task` is due at `now`.
    pub fn due(task: &CalibrationTask, now: Instant) -> bool {
        task.enabled && now.saturating_duration_since(task.last_run) >= task.interval
    }

    /// Indices of due tasks, in registration order.
    pub fn due_indices(&self, now: Instant) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| Self::due(&entry.task, now))
            .map(|(index, _)| index)
            .collect()
    }

    /// Record that task `index` ran at `now`.
    pub fn mark_run(&mut self, index: usize, now: Instant) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.task.last_run = now;
        }
    }

    /// Task at `index`.
    pub fn task(&self, index: usize) -> Option<&CalibrationTask> {
        self.entries.get(index).map(|entry| &entry.task)
    }

    /// Routine at `index`.
    pub fn routine(&self, index: usize) -> Option<&dyn CalibrationRoutine> {
        self.entries.get(index).map(|entry| entry.routine.as_ref())
    }

    /// Restart every interval from `now` (start of a scan).
    pub fn reset(&mut self, now: Instant) {
        for entry in &mut self.entries {
            entry.task.last_run = now;
        }
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no task is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockCalibration;

    #[test]
    fn test_due_after_interval() {
        let t0 = Instant::now();
        let task = CalibrationTask::new("frequency", Duration::from_secs(10), t0);
        assert!(!CalibrationScheduler::due(&task, t0 + Duration::from_secs(9)));
        assert!(CalibrationScheduler::due(&task, t0 + Duration::from_secs(10)));
    }

    #[test]
    fn test_due_is_idempotent() {
        let t0 = Instant::now();
        let task = CalibrationTask::new("frequency", Duration::from_secs(10), t0);
        for now in [t0 + Duration::from_secs(3), t0 + Duration::from_secs(30)] {
            let first = CalibrationScheduler::due(&task, now);
            for _ in 0..5 {
                assert_eq!(CalibrationScheduler::due(&task, now), first);
            }
        }
    }

    #[test]
    fn test_disabled_task_never_due() {
        let t0 = Instant::now();
        let mut task = CalibrationTask::new("mode", Duration::ZERO, t0);
        task.enabled = false;
        assert!(!CalibrationScheduler::due(&task, t0 + Duration::from_secs(1000)));
    }

    #[test]
    fn test_mark_run_postpones() {
        let t0 = Instant::now();
        let mut scheduler = CalibrationScheduler::new();
        scheduler.register(
            CalibrationTask::new("frequency", Duration::from_secs(10), t0),
            Box::new(MockCalibration::failing("frequency")),
        );
        let t = t0 + Duration::from_secs(12);
        assert_eq!(scheduler.due_indices(t), vec![0]);
        scheduler.mark_run(0, t);
        assert!(scheduler.due_indices(t + Duration::from_secs(9)).is_empty());
        assert_eq!(scheduler.due_indices(t + Duration::from_secs(10)), vec![0]);
    }

    #[test]
    fn test_task_from_config() {
        let t0 = Instant::now();
        let config = CalibrationTaskConfig {
            name: "motional_mode".into(),
            interval: Duration::from_secs(100),
            enabled: false,
        };
        let task = CalibrationTask::from_config(&config, t0);
        assert_eq!(task.name, "motional_mode");
        assert_eq!(task.last_run, t0);
        assert!(!task.enabled);
    }
}
