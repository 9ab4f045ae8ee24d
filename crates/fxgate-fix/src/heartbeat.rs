//! Heartbeat management for FIX sessions.
//!
//! Tracks send/receive activity and decides when to emit Heartbeat (35=0),
//! when to escalate to TestRequest (35=1), and when the session is dead.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::time::Duration;

/// Heartbeat manager for one FIX session.
///
/// - A Heartbeat is due when nothing was *sent* for `interval`.
/// - A TestRequest is due when nothing was *received* for `interval * 1.5`.
/// - The session is timed out when a TestRequest is outstanding and nothing
///   was received for another full interval.
pub struct HeartbeatManager {
    interval_ms: u64,
    last_sent: RwLock<DateTime<Utc>>,
    last_received: RwLock<DateTime<Utc>>,
    outstanding_test_req: RwLock<Option<String>>,
}

impl HeartbeatManager {
    pub fn new(interval_secs: u32) -> Self {
        let now = Utc::now();
        Self {
            interval_ms: u64::from(interval_secs) * 1000,
            last_sent: RwLock::new(now),
            last_received: RwLock::new(now),
            outstanding_test_req: RwLock::new(None),
        }
    }

    /// Reset all timers (called on logon).
    pub fn reset(&self) {
        let now = Utc::now();
        *self.last_sent.write() = now;
        *self.last_received.write() = now;
        *self.outstanding_test_req.write() = None;
    }

    /// Record that any message was sent.
    pub fn record_sent(&self) {
        *self.last_sent.write() = Utc::now();
    }

    /// Record that any message was received.
    pub fn record_received(&self) {
        *self.last_received.write() = Utc::now();
        *self.outstanding_test_req.write() = None;
    }

    /// Record that a TestRequest went out with the given id.
    pub fn record_test_request(&self, id: String) {
        *self.outstanding_test_req.write() = Some(id);
    }

    pub fn ms_since_sent(&self) -> i64 {
        (Utc::now() - *self.last_sent.read()).num_milliseconds()
    }

    pub fn ms_since_received(&self) -> i64 {
        (Utc::now() - *self.last_received.read()).num_milliseconds()
    }

    /// A Heartbeat is due when we have been quiet for an interval.
    pub fn heartbeat_due(&self) -> bool {
        self.ms_since_sent() >= self.interval_ms as i64
    }

    /// A TestRequest is due when the peer has been quiet for 1.5 intervals
    /// and none is already outstanding.
    pub fn test_request_due(&self) -> bool {
        self.outstanding_test_req.read().is_none()
            && self.ms_since_received() >= (self.interval_ms as i64 * 3) / 2
    }

    /// Dead when a TestRequest is outstanding and the peer stayed quiet
    /// for a further interval beyond the TestRequest threshold.
    pub fn is_timed_out(&self) -> bool {
        self.outstanding_test_req.read().is_some()
            && self.ms_since_received() >= (self.interval_ms as i64 * 5) / 2
    }

    /// Check cadence for the session select loop.
    pub async fn wait_for_check(&self) {
        tokio::time::sleep(Duration::from_millis((self.interval_ms / 4).max(250))).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_quiet() {
        let hb = HeartbeatManager::new(30);
        assert!(!hb.heartbeat_due());
        assert!(!hb.test_request_due());
        assert!(!hb.is_timed_out());
    }

    #[test]
    fn test_receive_clears_outstanding_test_request() {
        let hb = HeartbeatManager::new(30);
        hb.record_test_request("tr-1".to_string());
        assert!(hb.outstanding_test_req.read().is_some());
        hb.record_received();
        assert!(hb.outstanding_test_req.read().is_none());
        assert!(!hb.is_timed_out());
    }

    #[test]
    fn test_not_timed_out_without_outstanding_request() {
        let hb = HeartbeatManager::new(30);
        // Even a silent peer is not "timed out" until a TestRequest is out.
        assert!(!hb.is_timed_out());
    }
}
