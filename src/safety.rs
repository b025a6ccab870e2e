//! Scan cancellation.
//!
//! Cancellation is cooperative. The controller polls the flag between shots,
//! between peer re-arm attempts and between calibration tasks; a pulse
//! sequence that has started always runs to completion. Timeouts never set
//! this flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// =============================================================================
// Cancellation Flag
// =============================================================================

/// Shared, clonable cancellation request.
///
/// # Example
///
/// ```rust,ignore
/// let cancel = CancellationFlag::new();
/// let handle = cancel.clone();
/// tokio::spawn(async move {
///     tokio::signal::ctrl_c().await.ok();
///     handle.cancel("Ctrl-C");
/// });
/// controller.with_cancellation(cancel);
/// ```
#[derive(Clone, Debug)]
pub struct CancellationFlag {
    flag: Arc<AtomicBool>,
    reason: Arc<std::sync::RwLock<Option<String>>>,
}

impl Default for CancellationFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationFlag {
    /// Create an unset flag.
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            reason: Arc::new(std::sync::RwLock::new(None)),
        }
    }

    /// Request cancellation. The first reason given is kept.
    pub fn cancel(&self, reason: impl Into<String>) {
        if let Ok(mut r) = self.reason.write() {
            if r.is_none() {
                *r = Some(reason.into());
            }
        }
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Reason passed to the first `cancel()`.
    pub fn reason(&self) -> Option<String> {
        self.reason.read().ok().and_then(|r| r.clone())
    }

    /// Clear the flag before reusing it for another scan.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
        if let Ok(mut r) = self.reason.write() {
            *r = None;
        }
    }
}
