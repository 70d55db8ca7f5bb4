//! One-shot timer queue ordered by deadline, then priority, then insertion.
//!
//! The reactor asks [`TimerScheduler::next_deadline`] for its wait timeout and
//! drains due entries with [`TimerScheduler::pop_due`]. Cancellation is lazy:
//! cancelled entries stay in the heap until they reach the head.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::Duration;

use tokio::time::Instant;

/// Priority used when the caller has no preference. Lower fires first.
pub const DEFAULT_PRIORITY: i32 = 100;

/// Opaque token returned by [`TimerScheduler::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

/// Snapshot taken at the start of a due pass.
///
/// Entries scheduled after the snapshot never fire in the same pass, so a
/// payload that reschedules itself with a zero delay cannot spin forever.
#[derive(Debug, Clone, Copy)]
pub struct DuePass {
    now: Instant,
    cutoff: u64,
}

struct ScheduledCall<T> {
    fire_at: Instant,
    priority: i32,
    seq: u64,
    payload: T,
}

impl<T> ScheduledCall<T> {
    fn key(&self) -> (Instant, i32, u64) {
        (self.fire_at, self.priority, self.seq)
    }
}

impl<T> PartialEq for ScheduledCall<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<T> Eq for ScheduledCall<T> {}

impl<T> PartialOrd for ScheduledCall<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for ScheduledCall<T> {
    // BinaryHeap is a max-heap; invert so the earliest key sits on top.
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

/// Priority/time ordered queue of one-shot payloads.
pub struct TimerScheduler<T> {
    queue: BinaryHeap<ScheduledCall<T>>,
    live: HashSet<u64>,
    next_seq: u64,
}

impl<T> Default for TimerScheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerScheduler<T> {
    pub fn new() -> Self {
        Self {
            queue: BinaryHeap::new(),
            live: HashSet::new(),
            next_seq: 0,
        }
    }

    /// Schedule `payload` to fire after `delay`.
    pub fn schedule(&mut self, delay: Duration, priority: i32, payload: T) -> TimerHandle {
        self.schedule_at(Instant::now() + delay, priority, payload)
    }

    /// Schedule `payload` to fire at an absolute instant.
    pub fn schedule_at(&mut self, fire_at: Instant, priority: i32, payload: T) -> TimerHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.live.insert(seq);
        self.queue.push(ScheduledCall {
            fire_at,
            priority,
            seq,
            payload,
        });
        TimerHandle(seq)
    }

    /// Cancel a pending entry. Returns false if it already fired or was cancelled.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.live.remove(&handle.0)
    }

    #[cfg(test)]
    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.live.contains(&handle.0)
    }

    /// Number of entries that will still fire.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Heap entries, counting cancelled ones not yet discarded.
    #[cfg(test)]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Earliest deadline among live entries, or `None` to wait indefinitely.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.discard_cancelled();
        self.queue.peek().map(|call| call.fire_at)
    }

    /// Start a due pass at `now`.
    pub fn begin_pass(&self, now: Instant) -> DuePass {
        DuePass {
            now,
            cutoff: self.next_seq,
        }
    }

    /// Remove and return the next entry that is due within `pass`.
    pub fn pop_due(&mut self, pass: &DuePass) -> Option<(TimerHandle, T)> {
        self.discard_cancelled();
        let head = self.queue.peek()?;
        if head.fire_at > pass.now || head.seq >= pass.cutoff {
            return None;
        }
        let call = self.queue.pop()?;
        self.live.remove(&call.seq);
        Some((TimerHandle(call.seq), call.payload))
    }

    /// Fire every entry due at `now`, in order. Returns how many fired.
    #[cfg(test)]
    pub fn run_due(&mut self, now: Instant, mut fire: impl FnMut(TimerHandle, T)) -> usize {
        let pass = self.begin_pass(now);
        let mut fired = 0;
        while let Some((handle, payload)) = self.pop_due(&pass) {
            fire(handle, payload);
            fired += 1;
        }
        fired
    }

    fn discard_cancelled(&mut self) {
        while let Some(head) = self.queue.peek() {
            if self.live.contains(&head.seq) {
                break;
            }
            self.queue.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_deadline_lower_priority_first() {
        let mut timers = TimerScheduler::new();
        let t0 = Instant::now();
        let at = t0 + Duration::from_secs(10);
        timers.schedule_at(at, 5, "A");
        timers.schedule_at(at, 1, "B");

        let mut fired = Vec::new();
        timers.run_due(at, |_, name| fired.push(name));
        assert_eq!(fired, vec!["B", "A"]);
    }

    #[test]
    fn test_deadline_then_insertion_order() {
        let mut timers = TimerScheduler::new();
        let t0 = Instant::now();
        timers.schedule_at(t0 + Duration::from_secs(2), 0, 1);
        timers.schedule_at(t0 + Duration::from_secs(1), 100, 2);
        timers.schedule_at(t0 + Duration::from_secs(1), 100, 3);

        let mut fired = Vec::new();
        timers.run_due(t0 + Duration::from_secs(5), |_, n| fired.push(n));
        assert_eq!(fired, vec![2, 3, 1]);
    }

    #[test]
    fn test_not_due_does_not_fire() {
        let mut timers = TimerScheduler::new();
        let t0 = Instant::now();
        timers.schedule_at(t0 + Duration::from_secs(10), DEFAULT_PRIORITY, ());
        assert_eq!(timers.run_due(t0 + Duration::from_secs(9), |_, _| {}), 0);
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.next_deadline(), Some(t0 + Duration::from_secs(10)));
    }

    #[test]
    fn test_cancel_twice_is_noop() {
        let mut timers = TimerScheduler::new();
        let t0 = Instant::now();
        let handle = timers.schedule_at(t0, DEFAULT_PRIORITY, "x");
        assert!(timers.cancel(handle));
        assert!(!timers.cancel(handle));
        assert_eq!(timers.run_due(t0 + Duration::from_secs(1), |_, _| panic!("fired")), 0);
        assert_eq!(timers.next_deadline(), None);
    }

    #[test]
    fn test_cancel_after_fire_is_noop() {
        let mut timers = TimerScheduler::new();
        let t0 = Instant::now();
        let handle = timers.schedule_at(t0, DEFAULT_PRIORITY, "x");

        let mut count = 0;
        timers.run_due(t0, |_, _| count += 1);
        assert!(!timers.cancel(handle));
        timers.run_due(t0 + Duration::from_secs(60), |_, _| count += 1);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_reschedule_during_pass_waits_for_next_pass() {
        let mut timers = TimerScheduler::new();
        let t0 = Instant::now();
        timers.schedule_at(t0, DEFAULT_PRIORITY, 0u32);

        let pass = timers.begin_pass(t0);
        let (_, n) = timers.pop_due(&pass).unwrap();
        // Reschedule at the same instant; must not come back in this pass.
        timers.schedule_at(t0, DEFAULT_PRIORITY, n + 1);
        assert!(timers.pop_due(&pass).is_none());

        let next = timers.begin_pass(t0);
        assert_eq!(timers.pop_due(&next).map(|(_, n)| n), Some(1));
    }

    #[test]
    fn test_next_deadline_skips_cancelled_head() {
        let mut timers = TimerScheduler::new();
        let t0 = Instant::now();
        let first = timers.schedule_at(t0 + Duration::from_secs(1), DEFAULT_PRIORITY, 1);
        timers.schedule_at(t0 + Duration::from_secs(3), DEFAULT_PRIORITY, 2);
        timers.cancel(first);
        assert_eq!(timers.next_deadline(), Some(t0 + Duration::from_secs(3)));
        assert!(!timers.is_pending(first));
    }
}
