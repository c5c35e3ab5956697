/// Timers and clocks behind the runtime.
///
/// State never sleeps: it emits `ScheduleTimer` / `CancelTimer` effects and
/// gets `handle_timer(kind)` back when one fires. At most one timer per
/// [`TimerKind`] is pending; scheduling a kind again replaces it.
///
/// [`TokioTimers`] backs the live runtime with a `DelayQueue`.
/// [`ManualTimers`] + [`ManualClock`] give tests virtual time.
use std::collections::HashMap;
use std::future::poll_fn;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::time::{delay_queue, DelayQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    /// Attempt to claim the rendezvous identity.
    Election,
    /// Probe the rendezvous identity after a failed claim.
    Discovery,
    /// Give up on a join that never got host-ready.
    JoinTimeout,
    /// Periodic liveness sweep.
    Sweep,
}

pub trait Clock: Send + Sync {
    /// Milliseconds on this clock's timeline.
    fn now_ms(&self) -> u64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        crate::types::now_ms()
    }
}

/// Shared virtual clock; clones observe the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self(Arc::new(AtomicU64::new(start_ms)))
    }

    pub fn set(&self, ms: u64) {
        self.0.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.0.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

pub trait TimerScheduler {
    /// Arm `kind` to fire after `after`, replacing any pending one.
    fn schedule(&mut self, kind: TimerKind, after: Duration);

    fn cancel(&mut self, kind: TimerKind);

    fn is_scheduled(&self, kind: TimerKind) -> bool;
}

// ── TokioTimers ──────────────────────────────────────────────────────

/// `DelayQueue`-backed timers for the live event loop.
#[derive(Default)]
pub struct TokioTimers {
    queue: DelayQueue<TimerKind>,
    keys: HashMap<TimerKind, delay_queue::Key>,
}

impl TokioTimers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Wait for the next timer to fire.
    ///
    /// Resolves to `None` immediately when nothing is pending, so callers
    /// in a `select!` must guard on [`is_empty`](Self::is_empty).
    pub async fn next_expired(&mut self) -> Option<TimerKind> {
        let expired = poll_fn(|cx| self.queue.poll_expired(cx)).await?;
        let kind = expired.into_inner();
        self.keys.remove(&kind);
        Some(kind)
    }
}

impl TimerScheduler for TokioTimers {
    fn schedule(&mut self, kind: TimerKind, after: Duration) {
        match self.keys.get(&kind) {
            Some(key) => self.queue.reset(key, after),
            None => {
                let key = self.queue.insert(kind, after);
                self.keys.insert(kind, key);
            }
        }
    }

    fn cancel(&mut self, kind: TimerKind) {
        if let Some(key) = self.keys.remove(&kind) {
            self.queue.remove(&key);
        }
    }

    fn is_scheduled(&self, kind: TimerKind) -> bool {
        self.keys.contains_key(&kind)
    }
}

// ── ManualTimers ─────────────────────────────────────────────────────

/// Virtual-time timers. Deadlines are absolute times on a [`ManualClock`].
#[derive(Debug, Clone)]
pub struct ManualTimers {
    clock: ManualClock,
    deadlines: HashMap<TimerKind, u64>,
}

impl ManualTimers {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            deadlines: HashMap::new(),
        }
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<u64> {
        self.deadlines.values().copied().min()
    }

    /// Remove and return every timer due at the clock's current time,
    /// earliest first.
    pub fn pop_due(&mut self) -> Vec<TimerKind> {
        let now = self.clock.now_ms();
        let mut due: Vec<(u64, TimerKind)> = self
            .deadlines
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(kind, at)| (*at, *kind))
            .collect();
        due.sort();
        for (_, kind) in &due {
            self.deadlines.remove(kind);
        }
        due.into_iter().map(|(_, kind)| kind).collect()
    }
}

impl TimerScheduler for ManualTimers {
    fn schedule(&mut self, kind: TimerKind, after: Duration) {
        let at = self.clock.now_ms() + after.as_millis() as u64;
        self.deadlines.insert(kind, at);
    }

    fn cancel(&mut self, kind: TimerKind) {
        self.deadlines.remove(&kind);
    }

    fn is_scheduled(&self, kind: TimerKind) -> bool {
        self.deadlines.contains_key(&kind)
    }
}
