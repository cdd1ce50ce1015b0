//! Scoped Session Timers
//!
//! Deadline timers owned by one player session. Deadlines are absolute
//! millisecond timestamps and are polled from the frame loop, so a slow or
//! skipped frame can never stretch a delay. `teardown` cancels everything
//! exactly once; after it the set refuses new timers.

use tracing::debug;

/// Handle returned by [`SessionTimers::schedule`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Clone, Debug)]
struct Scheduled<A> {
    id: TimerId,
    due_ms: u64,
    action: A,
}

/// A set of pending delayed actions for one session.
#[derive(Clone, Debug)]
pub struct SessionTimers<A> {
    next_id: u64,
    pending: Vec<Scheduled<A>>,
    closed: bool,
}

impl<A> Default for SessionTimers<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> SessionTimers<A> {
    /// Create an empty, open timer set.
    pub fn new() -> Self {
        Self {
            next_id: 0,
            pending: Vec::new(),
            closed: false,
        }
    }

    /// Schedule `action` to fire once `now_ms >= due_ms`.
    ///
    /// Returns `None` once the set has been torn down.
    pub fn schedule(&mut self, due_ms: u64, action: A) -> Option<TimerId> {
        if self.closed {
            return None;
        }
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.pending.push(Scheduled { id, due_ms, action });
        Some(id)
    }

    /// Cancel a pending timer. Returns true if it was still pending.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|t| t.id != id);
        before != self.pending.len()
    }

    /// Remove and return every action whose deadline has passed,
    /// ordered by deadline then by scheduling order.
    pub fn poll(&mut self, now_ms: u64) -> Vec<A> {
        if self.pending.iter().all(|t| t.due_ms > now_ms) {
            return Vec::new();
        }

        let mut due = Vec::new();
        let mut keep = Vec::with_capacity(self.pending.len());
        for timer in self.pending.drain(..) {
            if timer.due_ms <= now_ms {
                due.push(timer);
            } else {
                keep.push(timer);
            }
        }
        self.pending = keep;

        due.sort_by_key(|t| (t.due_ms, t.id));
        due.into_iter().map(|t| t.action).collect()
    }

    /// Deadline of a pending timer.
    pub fn due_at(&self, id: TimerId) -> Option<u64> {
        self.pending.iter().find(|t| t.id == id).map(|t| t.due_ms)
    }

    /// Number of pending timers.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// True after `teardown`.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Cancel all pending timers but keep the set open. Returns the number
    /// cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let cancelled = self.pending.len();
        self.pending.clear();
        cancelled
    }

    /// Cancel all pending timers and close the set.
    ///
    /// Returns the number cancelled. A second call is a no-op returning 0.
    pub fn teardown(&mut self) -> usize {
        if self.closed {
            return 0;
        }
        self.closed = true;
        let cancelled = self.pending.len();
        self.pending.clear();
        debug!("Session timers torn down, {} cancelled", cancelled);
        cancelled
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_fires_only_due() {
        let mut timers = SessionTimers::new();
        timers.schedule(100, "a");
        timers.schedule(50, "b");
        timers.schedule(200, "c");

        assert!(timers.poll(49).is_empty());
        assert_eq!(timers.poll(100), vec!["b", "a"]);
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.poll(1_000), vec!["c"]);
        assert!(timers.is_empty());
    }

    #[test]
    fn test_late_poll_fires_once() {
        let mut timers = SessionTimers::new();
        timers.schedule(10, 1u8);
        assert_eq!(timers.poll(10_000), vec![1]);
        assert!(timers.poll(20_000).is_empty());
    }

    #[test]
    fn test_cancel() {
        let mut timers = SessionTimers::new();
        let id = timers.schedule(10, ()).unwrap();
        assert_eq!(timers.due_at(id), Some(10));
        assert!(timers.cancel(id));
        assert!(!timers.cancel(id));
        assert!(timers.poll(100).is_empty());
    }

    #[test]
    fn test_teardown_exactly_once() {
        let mut timers = SessionTimers::new();
        timers.schedule(10, ());
        timers.schedule(20, ());

        assert_eq!(timers.teardown(), 2);
        assert_eq!(timers.teardown(), 0);
        assert!(timers.is_closed());
        assert!(timers.schedule(30, ()).is_none());
        assert!(timers.poll(100).is_empty());
    }

    #[test]
    fn test_cancel_all_keeps_set_open() {
        let mut timers = SessionTimers::new();
        timers.schedule(10, "a");
        timers.schedule(20, "b");

        assert_eq!(timers.cancel_all(), 2);
        assert!(!timers.is_closed());
        assert!(timers.poll(100).is_empty());

        timers.schedule(150, "c");
        assert_eq!(timers.poll(200), vec!["c"]);
    }
}
