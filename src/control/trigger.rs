//! Trigger gate: bounded waits on the timing reference and the peer handshake.
//!
//! Neither wait ever fails. A timeout or a read error comes back as `false`;
//! what to do about it is the caller's decision.

use std::sync::Arc;

use tokio::time::{timeout, Duration, Instant};
use tracing::{trace, warn};

use crate::hardware::capabilities::{PeerLink, SyncReference};

/// Synchronization waits shared by every shot.
pub struct TriggerGate {
    reference: Arc<dyn SyncReference>,
    peer: Option<Arc<dyn PeerLink>>,
}

impl TriggerGate {
    /// Gate on a timing reference, without a peer generator.
    pub fn new(reference: Arc<dyn SyncReference>) -> Self {
        Self {
            reference,
            peer: None,
        }
    }

    /// Attach the peer waveform generator whose handshake is awaited per point.
    pub fn with_peer(mut self, peer: Arc<dyn PeerLink>) -> Self {
        self.peer = Some(peer);
        self
    }

    /// The attached peer link, if any.
    pub fn peer(&self) -> Option<&Arc<dyn PeerLink>> {
        self.peer.as_ref()
    }

    /// Wait for the next reference edge inside `[now, min(now + timeout, deadline)]`.
    ///
    /// Returns `false` on timeout, when `deadline` has already passed, or when
    /// the reference input reports an error. The caller retries by calling again.
    pub async fn wait_for_sync(&self, deadline: Instant, timeout_after: Duration) -> bool {
        let now = Instant::now();
        if deadline <= now {
            trace!("sync deadline already passed");
            return false;
        }
        let window = timeout_after.min(deadline - now);

        match timeout(window, self.reference.rising_edge()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "Timing reference read failed");
                false
            }
            Err(_) => {
                trace!(window_ms = %window.as_millis(), "sync wait timed out");
                false
            }
        }
    }

    /// Wait for the peer generator's armed handshake.
    ///
    /// Returns `true` immediately when no peer is attached. On `false` the
    /// caller logs a hardware fault and re-issues the arm request.
    pub async fn wait_for_peer_armed(&self, timeout_after: Duration) -> bool {
        let Some(peer) = &self.peer else {
            return true;
        };

        match timeout(timeout_after, peer.armed()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "Peer handshake line read failed");
                false
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{MockPeerLink, ScriptedReference};

    #[tokio::test(start_paused = true)]
    async fn test_sync_succeeds_on_edge() {
        let gate = TriggerGate::new(Arc::new(ScriptedReference::always()));
        let deadline = Instant::now() + Duration::from_millis(100);
        assert!(gate.wait_for_sync(deadline, Duration::from_millis(50)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_times_out_without_edge() {
        let gate = TriggerGate::new(Arc::new(ScriptedReference::new([false])));
        let start = Instant::now();
        let deadline = start + Duration::from_secs(1);
        assert!(!gate.wait_for_sync(deadline, Duration::from_millis(30)).await);
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(start.elapsed() < Duration::from_millis(31));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_window_clamped_to_deadline() {
        let gate = TriggerGate::new(Arc::new(ScriptedReference::new([false])));
        let start = Instant::now();
        let deadline = start + Duration::from_millis(10);
        assert!(!gate.wait_for_sync(deadline, Duration::from_secs(5)).await);
        assert!(start.elapsed() >= Duration::from_millis(10));
        assert!(start.elapsed() < Duration::from_millis(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_past_deadline_returns_immediately() {
        let reference = Arc::new(ScriptedReference::always());
        let gate = TriggerGate::new(reference.clone());
        let deadline = Instant::now();
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!gate.wait_for_sync(deadline, Duration::from_secs(1)).await);
        assert_eq!(reference.edges_requested(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_reference_error_is_not_fatal() {
        let gate = TriggerGate::new(Arc::new(ScriptedReference::failing()));
        let deadline = Instant::now() + Duration::from_secs(1);
        assert!(!gate.wait_for_sync(deadline, Duration::from_millis(50)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_armed_without_peer() {
        let gate = TriggerGate::new(Arc::new(ScriptedReference::always()));
        assert!(gate.wait_for_peer_armed(Duration::from_millis(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_armed_timeout() {
        let peer = Arc::new(MockPeerLink::dropping_handshakes(1));
        let gate = TriggerGate::new(Arc::new(ScriptedReference::always())).with_peer(peer);
        assert!(!gate.wait_for_peer_armed(Duration::from_millis(20)).await);
        assert!(gate.wait_for_peer_armed(Duration::from_millis(20)).await);
    }
}
