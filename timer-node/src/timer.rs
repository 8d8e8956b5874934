//! # timer
//!
//! One-shot / periodic scheduling unit. Paces the sampling loop, drives the
//! once-per-second statistics line, and serves as the debounce window of
//! every gate channel.
//!
//! A timer carries an optional typed action instead of a callback pointer;
//! [`process_timers`] hands expired actions to a handler and reports how long
//! the caller may sleep until the next deadline.

use sft_types::Millis;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timer<A = ()> {
    start: Millis,
    duration: Millis,
    /// Absolute deadline, `0` = inactive
    deadline: Millis,
    action: Option<A>,
}

impl<A> Default for Timer<A> {
    fn default() -> Self {
        Self { start: 0, duration: 0, deadline: 0, action: None }
    }
}

impl<A> Timer<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer. A zero duration is raised to 1 ms.
    pub fn start(&mut self, now: Millis, duration: Millis, action: Option<A>) {
        self.start = now;
        self.duration = duration.max(1);
        self.deadline = now + self.duration;
        self.action = action;
    }

    /// `Some(overshoot)` once the deadline has passed, `None` while pending.
    ///
    /// The first expired read disarms the timer, so every firing is observed
    /// exactly once; an inactive timer reads as expired with no overshoot.
    pub fn is_over(&mut self, now: Millis) -> Option<Millis> {
        if self.deadline == 0 {
            return Some(0);
        }
        if now < self.deadline {
            return None;
        }
        let overshoot = now - self.deadline;
        self.deadline = 0;
        Some(overshoot)
    }

    /// Same check as [`Timer::is_over`] without disarming.
    pub fn expired(&self, now: Millis) -> bool {
        self.deadline == 0 || now >= self.deadline
    }

    /// Re-arm with the full duration, minus the overshoot of the last
    /// firing so a periodic timer keeps its cadence.
    pub fn restart(&mut self, now: Millis, overshoot: Millis) {
        let next = self.duration.saturating_sub(overshoot).max(1);
        self.start = now;
        self.deadline = now + next;
    }

    pub fn stop(&mut self) {
        self.deadline = 0;
    }

    pub fn is_active(&self) -> bool {
        self.deadline != 0
    }

    pub fn remaining(&self, now: Millis) -> Millis {
        if self.deadline == 0 {
            0
        } else {
            self.deadline.saturating_sub(now)
        }
    }

    pub fn started_at(&self) -> Millis {
        self.start
    }

    pub fn action(&self) -> Option<&A> {
        self.action.as_ref()
    }
}

// ── Cooperative Scheduling ────────────────────────────────────────────────────

/// What to do with a timer after its action ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerControl {
    /// Re-arm, compensating the overshoot
    Restart,
    /// Leave the timer inactive
    Stop,
    /// Re-arm and stop processing the remaining timers this round
    BreakLoop,
}

/// Poll a set of timers. Expired timers that carry an action are passed to
/// `handler`; the return value is the shortest wait until the next active
/// deadline, or `None` when no timer is armed.
pub fn process_timers<A, F>(timers: &mut [Timer<A>], now: Millis, mut handler: F) -> Option<Millis>
where
    F: FnMut(&A, Millis) -> TimerControl,
{
    for timer in timers.iter_mut() {
        if !timer.is_active() {
            continue;
        }
        let Some(overshoot) = timer.is_over(now) else {
            continue;
        };
        let Some(action) = timer.action.as_ref() else {
            continue;
        };
        match handler(action, overshoot) {
            TimerControl::Restart => timer.restart(now, overshoot),
            TimerControl::Stop => {}
            TimerControl::BreakLoop => {
                timer.restart(now, overshoot);
                break;
            }
        }
    }

    timers
        .iter()
        .filter(|t| t.is_active())
        .map(|t| t.remaining(now))
        .min()
}
