//! Reconnect scheduling with multiplicative backoff.
//!
//! The controller tracks *whether* a reconnect attempt is scheduled and
//! *how long* the next schedule should wait; actually sleeping is the
//! driver's job. A schedule is taken out at the current interval, after
//! which the interval grows by the configured step (clamped to
//! `[start, max]`) for use by the next schedule — growth never alters
//! an attempt that is already scheduled. Any successful connect resets
//! the interval back to the start value.

use std::time::Duration;

/// Backoff state machine for reconnect attempts.
///
/// `scheduled` mirrors the session invariant: a reconnect attempt is
/// scheduled if and only if the session is in `WaitingForReconnect`.
/// `reconnecting` spans the whole cycle — it stays set across failed
/// attempts and clears only on a successful connect or an explicit
/// stop, which is what distinguishes a reconnect (triggering service
/// reauthorization) from a first connect.
#[derive(Debug)]
pub struct ReconnectController {
    enabled: bool,
    start: Duration,
    max: Duration,
    growth: f64,
    current_interval: Duration,
    scheduled: bool,
    reconnecting: bool,
}

impl ReconnectController {
    /// Create a controller from externally configured policy.
    ///
    /// A growth step below 1.0 or a max below the start interval is
    /// corrected with a warning rather than rejected — reconnect policy
    /// must never take the session down.
    #[must_use]
    pub fn new(enabled: bool, start: Duration, max: Duration, growth: f64) -> Self {
        let growth = if growth < 1.0 {
            log::warn!("Reconnect growth step {growth} below 1.0, using 1.0");
            1.0
        } else {
            growth
        };
        let max = if max < start {
            log::warn!("Reconnect max interval below start interval, using start");
            start
        } else {
            max
        };

        Self {
            enabled,
            start,
            max,
            growth,
            current_interval: start,
            scheduled: false,
            reconnecting: false,
        }
    }

    /// Request a reconnect schedule.
    ///
    /// Returns the interval to wait before the next attempt, or `None`
    /// when reconnects are disabled by policy or an attempt is already
    /// scheduled (idempotent start). Taking a schedule grows the
    /// interval used by the *next* call.
    pub fn schedule(&mut self) -> Option<Duration> {
        if !self.enabled || self.scheduled {
            return None;
        }

        let interval = self.current_interval;
        self.scheduled = true;
        self.reconnecting = true;

        // Grow for the next schedule, not the one just taken.
        self.current_interval = self
            .current_interval
            .mul_f64(self.growth)
            .clamp(self.start, self.max);

        Some(interval)
    }

    /// Note that a scheduled attempt has fired and a connect is in
    /// flight. The schedule is consumed; the cycle stays open.
    pub fn on_attempt_started(&mut self) {
        self.scheduled = false;
    }

    /// Note a successful connect. Cancels any schedule and resets the
    /// interval. Returns whether a reconnect cycle was in progress —
    /// the caller uses this to trigger service reauthorization.
    pub fn on_connect_succeeded(&mut self) -> bool {
        let was_reconnecting = self.reconnecting;
        self.scheduled = false;
        self.reconnecting = false;
        self.current_interval = self.start;
        was_reconnecting
    }

    /// Deterministically cancel any schedule and reset, used on
    /// session shutdown.
    pub fn stop(&mut self) {
        self.scheduled = false;
        self.reconnecting = false;
        self.current_interval = self.start;
    }

    /// Whether an attempt is currently scheduled.
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    /// Interval the next schedule will use.
    #[must_use]
    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }
}
