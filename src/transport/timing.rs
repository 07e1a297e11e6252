//! Retransmission timers and keep-alive scheduling.
//!
//! Both are driven by explicit [`Instant`]s passed in by the caller, so the
//! engine stays deterministic under test.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Fixed-interval retry policy for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Time between transmissions.
    pub timeout: Duration,
    /// Retransmissions after the initial send.
    pub max_retries: u8,
}

impl RetryPolicy {
    /// Create a retry policy.
    pub fn new(timeout: Duration, max_retries: u8) -> Self {
        Self {
            timeout,
            max_retries,
        }
    }
}

#[derive(Debug)]
struct Timer<T> {
    dest: SocketAddr,
    frame: Vec<u8>,
    policy: RetryPolicy,
    retries_left: u8,
    deadline: Instant,
    value: T,
}

/// What a timer asks the caller to do.
#[derive(Debug, PartialEq, Eq)]
pub enum TimerAction<K, T> {
    /// Send the stored frame again.
    Retransmit {
        /// Request being retried.
        key: K,
        /// Where the frame goes.
        dest: SocketAddr,
        /// The frame as originally sent, or as last refreshed.
        frame: Vec<u8>,
    },
    /// Retries exhausted. The timer is gone and its value is handed back.
    Expired {
        /// Request that ran out of retries.
        key: K,
        /// Value stored when the timer was armed.
        value: T,
    },
}

/// Timers for requests awaiting acknowledgment, keyed by correlation key.
///
/// A request armed at `t` is retransmitted at `t + T`, `t + 2T`, ... up to
/// `max_retries` times, and expires one timeout after the last
/// retransmission.
///
/// The failure therefore lands at `(max_retries + 1) × T`, not at
/// `max_retries × T`: with the defaults (3 retries, 10 s) a request fails 40 s
/// after it was first sent, because the last retransmission is given a full
/// timeout to be answered.
#[derive(Debug)]
pub struct RetransmitTimers<K, T> {
    timers: BTreeMap<K, Timer<T>>,
}

impl<K: Ord + Copy, T> Default for RetransmitTimers<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Copy, T> RetransmitTimers<K, T> {
    /// Create an empty timer set.
    pub fn new() -> Self {
        Self {
            timers: BTreeMap::new(),
        }
    }

    /// Start tracking a request that was just sent.
    ///
    /// Returns the value of a timer already armed under `key`, which is
    /// replaced.
    pub fn arm(
        &mut self,
        key: K,
        now: Instant,
        policy: RetryPolicy,
        dest: SocketAddr,
        frame: Vec<u8>,
        value: T,
    ) -> Option<T> {
        let timer = Timer {
            dest,
            frame,
            policy,
            retries_left: policy.max_retries,
            deadline: now + policy.timeout,
            value,
        };
        self.timers.insert(key, timer).map(|old| old.value)
    }

    /// Stop the timer for `key`, usually because its ack arrived.
    pub fn cancel(&mut self, key: &K) -> Option<T> {
        self.timers.remove(key).map(|timer| timer.value)
    }

    /// Replace the frame retransmitted for `key` and restart its retry budget.
    ///
    /// Used when a multi-step exchange moves on to its next frame.
    pub fn refresh(&mut self, key: &K, frame: Vec<u8>, now: Instant) -> bool {
        match self.timers.get_mut(key) {
            Some(timer) => {
                timer.frame = frame;
                timer.retries_left = timer.policy.max_retries;
                timer.deadline = now + timer.policy.timeout;
                true
            }
            None => false,
        }
    }

    /// Fire every timer whose deadline has passed.
    ///
    /// Expired timers are removed; retransmitted ones are re-armed one
    /// timeout from `now`.
    pub fn tick(&mut self, now: Instant) -> Vec<TimerAction<K, T>> {
        let due: Vec<K> = self
            .timers
            .iter()
            .filter(|(_, timer)| timer.deadline <= now)
            .map(|(key, _)| *key)
            .collect();

        let mut actions = Vec::with_capacity(due.len());
        for key in due {
            let Some(timer) = self.timers.get_mut(&key) else {
                continue;
            };
            if timer.retries_left > 0 {
                timer.retries_left -= 1;
                timer.deadline = now + timer.policy.timeout;
                actions.push(TimerAction::Retransmit {
                    key,
                    dest: timer.dest,
                    frame: timer.frame.clone(),
                });
            } else if let Some(timer) = self.timers.remove(&key) {
                actions.push(TimerAction::Expired {
                    key,
                    value: timer.value,
                });
            }
        }
        actions
    }

    /// Remove every timer, returning their values in key order.
    pub fn drain(&mut self) -> Vec<(K, T)> {
        std::mem::take(&mut self.timers)
            .into_iter()
            .map(|(key, timer)| (key, timer.value))
            .collect()
    }

    /// Earliest deadline among all timers.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().map(|timer| timer.deadline).min()
    }

    /// True if a timer is armed for `key`.
    pub fn contains(&self, key: &K) -> bool {
        self.timers.contains_key(key)
    }

    /// Stored value for `key`.
    pub fn get(&self, key: &K) -> Option<&T> {
        self.timers.get(key).map(|timer| &timer.value)
    }

    /// Retransmissions left for `key`.
    pub fn retries_left(&self, key: &K) -> Option<u8> {
        self.timers.get(key).map(|timer| timer.retries_left)
    }

    /// Number of armed timers.
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// True if no timer is armed.
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

/// What the keep-alive scheduler wants done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveAction {
    /// Send PINGREQ now.
    Ping,
    /// The PINGREQ went unanswered. The session is lost.
    Lost,
}

/// Keep-alive scheduler for a connected session.
///
/// A PINGREQ goes out once the interval has passed without anything sent or
/// without anything received. The session is lost if no PINGRESP arrives
/// within `interval × margin` of that PINGREQ.
#[derive(Debug, Clone)]
pub struct KeepAlive {
    interval: Duration,
    margin: f64,
    last_sent: Instant,
    last_received: Instant,
    ping_deadline: Option<Instant>,
}

impl KeepAlive {
    /// Start keeping a session alive. An interval of zero disables it.
    pub fn new(interval: Duration, margin: f64, now: Instant) -> Self {
        Self {
            interval,
            margin,
            last_sent: now,
            last_received: now,
            ping_deadline: None,
        }
    }

    /// True if keep-alive is disabled.
    pub fn is_disabled(&self) -> bool {
        self.interval.is_zero()
    }

    /// Record an outbound frame.
    pub fn on_send(&mut self, now: Instant) {
        self.last_sent = now;
    }

    /// Record an inbound frame from the gateway.
    pub fn on_receive(&mut self, now: Instant) {
        self.last_received = now;
    }

    /// Record a PINGRESP.
    pub fn on_ping_response(&mut self, now: Instant) {
        self.last_received = now;
        self.ping_deadline = None;
    }

    /// True while a PINGREQ is unanswered.
    pub fn awaiting_response(&self) -> bool {
        self.ping_deadline.is_some()
    }

    /// Check the schedule at `now`.
    ///
    /// Returning [`KeepAliveAction::Ping`] starts the response deadline, so the
    /// caller must send the PINGREQ.
    pub fn poll(&mut self, now: Instant) -> Option<KeepAliveAction> {
        if self.is_disabled() {
            return None;
        }
        if let Some(deadline) = self.ping_deadline {
            return (now >= deadline).then_some(KeepAliveAction::Lost);
        }
        if now >= self.idle_deadline() {
            self.ping_deadline = Some(now + self.interval.mul_f64(self.margin));
            return Some(KeepAliveAction::Ping);
        }
        None
    }

    /// When [`poll`](Self::poll) next has something to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.is_disabled() {
            return None;
        }
        Some(self.ping_deadline.unwrap_or_else(|| self.idle_deadline()))
    }

    fn idle_deadline(&self) -> Instant {
        self.last_sent.min(self.last_received) + self.interval
    }
}
