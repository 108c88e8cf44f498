//! Dispatch telemetry
//!
//! Every dispatch attempt lands in a bounded ring buffer. Recording never
//! influences control flow, except the "meaningful dispatch" timestamp the
//! router consults when verifying focus-routed delivery.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use touch_protocol::GesturePhase;
use uuid::Uuid;

use crate::FailureKind;
use crate::backends::BackendKind;

/// Outcome of one phase delivered (or not) through one backend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchAttempt {
    /// Shared by every attempt of one logical gesture
    pub gesture_id: Uuid,
    pub gesture: &'static str,
    /// `None` when the request was refused before choosing a backend
    pub backend: Option<BackendKind>,
    pub phase: GesturePhase,
    pub target_pid: Option<i32>,
    pub success: bool,
    /// Wall-clock time in microseconds
    pub timestamp_us: u64,
    pub failure: Option<FailureKind>,
    pub reason: Option<String>,
}

impl DispatchAttempt {
    pub fn succeeded(
        gesture_id: Uuid,
        gesture: &'static str,
        backend: BackendKind,
        phase: GesturePhase,
        target_pid: Option<i32>,
    ) -> Self {
        Self {
            gesture_id,
            gesture,
            backend: Some(backend),
            phase,
            target_pid,
            success: true,
            timestamp_us: wall_clock_us(),
            failure: None,
            reason: None,
        }
    }

    pub fn failed(
        gesture_id: Uuid,
        gesture: &'static str,
        backend: Option<BackendKind>,
        phase: GesturePhase,
        target_pid: Option<i32>,
        error: &crate::InjectorError,
    ) -> Self {
        Self {
            gesture_id,
            gesture,
            backend,
            phase,
            target_pid,
            success: false,
            timestamp_us: wall_clock_us(),
            failure: Some(error.failure_kind()),
            reason: Some(error.to_string()),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.map(|b| b.name()).unwrap_or("none")
    }
}

fn wall_clock_us() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Counters since creation or the last `clear`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
}

pub struct Diagnostics {
    capacity: usize,
    history: Mutex<VecDeque<DispatchAttempt>>,
    stats: Mutex<DispatchStats>,
    last_meaningful: Mutex<Option<Instant>>,
}

impl Diagnostics {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            history: Mutex::new(VecDeque::with_capacity(capacity)),
            stats: Mutex::new(DispatchStats::default()),
            last_meaningful: Mutex::new(None),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an attempt, evicting the oldest when full
    pub fn record(&self, attempt: DispatchAttempt) {
        let success = attempt.success;
        {
            let mut history = self.history.lock();
            if history.len() == self.capacity {
                history.pop_front();
            }
            history.push_back(attempt);
        }
        let mut stats = self.stats.lock();
        stats.attempts += 1;
        if success {
            stats.successes += 1;
        } else {
            stats.failures += 1;
        }
    }

    /// Up to `limit` most recent attempts, oldest first. Zero means all.
    pub fn snapshot(&self, limit: usize) -> Vec<DispatchAttempt> {
        let history = self.history.lock();
        let skip = if limit == 0 {
            0
        } else {
            history.len().saturating_sub(limit)
        };
        history.iter().skip(skip).cloned().collect()
    }

    pub fn last(&self) -> Option<DispatchAttempt> {
        self.history.lock().back().cloned()
    }

    /// Attempts belonging to one gesture, oldest first
    pub fn gesture(&self, gesture_id: Uuid) -> Vec<DispatchAttempt> {
        self.history
            .lock()
            .iter()
            .filter(|a| a.gesture_id == gesture_id)
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> DispatchStats {
        *self.stats.lock()
    }

    /// Drop history, counters and the meaningful-dispatch mark
    pub fn clear(&self) {
        self.history.lock().clear();
        *self.stats.lock() = DispatchStats::default();
        *self.last_meaningful.lock() = None;
    }

    /// Note that a dispatch reached a live consumer
    pub fn record_meaningful_dispatch(&self) {
        *self.last_meaningful.lock() = Some(Instant::now());
    }

    pub fn last_meaningful_dispatch(&self) -> Option<Instant> {
        *self.last_meaningful.lock()
    }

    /// Whether a meaningful dispatch happened within the trailing window
    pub fn recent_meaningful_dispatch(&self, max_age: Duration) -> bool {
        self.last_meaningful_dispatch()
            .is_some_and(|at| at.elapsed() <= max_age)
    }

    /// Like `recent_meaningful_dispatch`, ignoring dispatches before `since`
    pub fn meaningful_dispatch_since(&self, since: Instant, max_age: Duration) -> bool {
        self.last_meaningful_dispatch()
            .is_some_and(|at| at >= since && at.elapsed() <= max_age)
    }
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics")
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InjectorError;

    fn attempt(phase: GesturePhase) -> DispatchAttempt {
        DispatchAttempt::succeeded(Uuid::nil(), "tap", BackendKind::DirectBus, phase, None)
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let diagnostics = Diagnostics::new(3);
        for phase in [
            GesturePhase::Down,
            GesturePhase::Move,
            GesturePhase::Move,
            GesturePhase::Up,
        ] {
            diagnostics.record(attempt(phase));
        }

        let snapshot = diagnostics.snapshot(0);
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].phase, GesturePhase::Move);
        assert_eq!(snapshot[2].phase, GesturePhase::Up);
        assert_eq!(diagnostics.stats().attempts, 4);
    }

    #[test]
    fn test_snapshot_limit_keeps_newest() {
        let diagnostics = Diagnostics::new(10);
        diagnostics.record(attempt(GesturePhase::Down));
        diagnostics.record(attempt(GesturePhase::Up));

        let last_one = diagnostics.snapshot(1);
        assert_eq!(last_one.len(), 1);
        assert_eq!(last_one[0].phase, GesturePhase::Up);
        assert_eq!(diagnostics.snapshot(50).len(), 2);
    }

    #[test]
    fn test_failure_carries_reason() {
        let diagnostics = Diagnostics::new(4);
        let err = InjectorError::BackendUnavailable("no client".into());
        diagnostics.record(DispatchAttempt::failed(
            Uuid::nil(),
            "tap",
            Some(BackendKind::Connection),
            GesturePhase::Down,
            None,
            &err,
        ));

        let last = diagnostics.last().unwrap();
        assert!(!last.success);
        assert_eq!(last.failure, Some(FailureKind::BackendUnavailable));
        assert_eq!(last.backend_name(), "conn");
        assert_eq!(diagnostics.stats().failures, 1);
    }

    #[test]
    fn test_meaningful_dispatch_window() {
        let diagnostics = Diagnostics::new(4);
        assert!(!diagnostics.recent_meaningful_dispatch(Duration::from_secs(1)));
        diagnostics.record_meaningful_dispatch();
        assert!(diagnostics.recent_meaningful_dispatch(Duration::from_secs(1)));
        std::thread::sleep(Duration::from_millis(20));
        assert!(!diagnostics.recent_meaningful_dispatch(Duration::from_millis(5)));
    }

    #[test]
    fn test_meaningful_dispatch_since_ignores_earlier() {
        let diagnostics = Diagnostics::new(4);
        diagnostics.record_meaningful_dispatch();
        std::thread::sleep(Duration::from_millis(2));
        let started = Instant::now();
        assert!(diagnostics.recent_meaningful_dispatch(Duration::from_secs(1)));
        assert!(!diagnostics.meaningful_dispatch_since(started, Duration::from_secs(1)));

        diagnostics.record_meaningful_dispatch();
        assert!(diagnostics.meaningful_dispatch_since(started, Duration::from_secs(1)));
    }

    #[test]
    fn test_clear_resets_counters() {
        let diagnostics = Diagnostics::new(4);
        diagnostics.record(attempt(GesturePhase::Down));
        diagnostics.record_meaningful_dispatch();

        diagnostics.clear();
        assert!(diagnostics.snapshot(0).is_empty());
        assert_eq!(diagnostics.stats().attempts, 0);
        assert_eq!(diagnostics.last_meaningful_dispatch(), None);
    }
}
