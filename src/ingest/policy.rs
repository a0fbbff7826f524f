//! Reconnect policy
//!
//! Pure decision logic: given the worker's failure counters and timestamps,
//! decide whether to keep reading, wait out the cooldown, or reconnect now.
//! The cooldown is a flat gate measured from the previous attempt; it keeps a
//! dead camera from being hammered without backing off exponentially.

use std::time::{Duration, Instant};

use crate::registry::RegistryConfig;

/// Link health as seen by the worker
#[derive(Debug, Clone, Copy)]
pub struct LinkHealth {
    /// Consecutive failed reads
    pub consecutive_failures: u32,
    /// Last successful frame (or session start)
    pub last_frame_at: Instant,
    /// Last reconnect attempt, if any
    pub last_attempt_at: Option<Instant>,
    /// Whether the worker currently holds an open session
    pub session_open: bool,
}

impl LinkHealth {
    /// Healthy link with an open session, as of `now`
    pub fn new(now: Instant) -> Self {
        Self {
            consecutive_failures: 0,
            last_frame_at: now,
            last_attempt_at: None,
            session_open: true,
        }
    }

    /// Record a successful read
    pub fn on_frame(&mut self, now: Instant) {
        self.consecutive_failures = 0;
        self.last_frame_at = now;
    }

    /// Record a failed read
    pub fn on_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    /// Record a reconnect attempt and its outcome
    pub fn on_attempt(&mut self, now: Instant, reopened: bool) {
        self.last_attempt_at = Some(now);
        self.session_open = reopened;
        if reopened {
            self.consecutive_failures = 0;
            self.last_frame_at = now;
        }
    }
}

/// What the worker should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Link is healthy; keep reading
    Proceed,
    /// Link is unhealthy but the cooldown has not elapsed
    Wait(Duration),
    /// Tear down and reopen now
    Reconnect,
}

/// Degrade and reconnect thresholds
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    /// Consecutive failures that mark the link unhealthy
    pub failure_threshold: u32,
    /// Time without a frame that marks the link unhealthy
    pub stall_timeout: Duration,
    /// Minimum time between attempts
    pub cooldown: Duration,
}

impl ReconnectPolicy {
    /// Build the policy from registry configuration
    pub fn from_config(config: &RegistryConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            stall_timeout: config.stall_timeout,
            cooldown: config.reconnect_cooldown,
        }
    }

    /// Whether the link needs a reconnect, ignoring the cooldown
    pub fn is_unhealthy(&self, health: &LinkHealth, now: Instant) -> bool {
        !health.session_open
            || health.consecutive_failures >= self.failure_threshold
            || now.saturating_duration_since(health.last_frame_at) >= self.stall_timeout
    }

    /// Decide the next step
    pub fn decide(&self, health: &LinkHealth, now: Instant) -> ReconnectDecision {
        if !self.is_unhealthy(health, now) {
            return ReconnectDecision::Proceed;
        }

        match health.last_attempt_at {
            Some(at) => {
                let since = now.saturating_duration_since(at);
                if since < self.cooldown {
                    ReconnectDecision::Wait(self.cooldown - since)
                } else {
                    ReconnectDecision::Reconnect
                }
            }
            None => ReconnectDecision::Reconnect,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            failure_threshold: 10,
            stall_timeout: Duration::from_secs(30),
            cooldown: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_healthy_proceeds() {
        let now = Instant::now();
        let mut health = LinkHealth::new(now);
        for _ in 0..9 {
            health.on_failure();
        }
        assert_eq!(policy().decide(&health, now), ReconnectDecision::Proceed);
    }

    #[test]
    fn test_failure_threshold_triggers_reconnect() {
        let now = Instant::now();
        let mut health = LinkHealth::new(now);
        for _ in 0..10 {
            health.on_failure();
        }
        assert_eq!(policy().decide(&health, now), ReconnectDecision::Reconnect);
    }

    #[test]
    fn test_stall_triggers_reconnect() {
        let start = Instant::now();
        let health = LinkHealth::new(start);
        let later = start + Duration::from_secs(31);
        assert_eq!(policy().decide(&health, later), ReconnectDecision::Reconnect);
    }

    #[test]
    fn test_cooldown_gates_attempts() {
        let start = Instant::now();
        let mut health = LinkHealth::new(start);
        health.on_attempt(start, false);

        let soon = start + Duration::from_secs(4);
        assert_eq!(
            policy().decide(&health, soon),
            ReconnectDecision::Wait(Duration::from_secs(6))
        );

        let later = start + Duration::from_secs(10);
        assert_eq!(policy().decide(&health, later), ReconnectDecision::Reconnect);
    }

    #[test]
    fn test_successful_attempt_resets_streak() {
        let start = Instant::now();
        let mut health = LinkHealth::new(start);
        for _ in 0..12 {
            health.on_failure();
        }
        health.on_attempt(start, true);

        assert_eq!(health.consecutive_failures, 0);
        assert!(health.session_open);
        assert_eq!(policy().decide(&health, start), ReconnectDecision::Proceed);
    }

    #[test]
    fn test_frame_resets_streak() {
        let now = Instant::now();
        let mut health = LinkHealth::new(now);
        for _ in 0..5 {
            health.on_failure();
        }
        health.on_frame(now);
        assert_eq!(health.consecutive_failures, 0);
    }

    #[test]
    fn test_from_config() {
        let config = RegistryConfig::default()
            .failure_threshold(12)
            .reconnect_cooldown(Duration::from_secs(3));
        let policy = ReconnectPolicy::from_config(&config);

        assert_eq!(policy.failure_threshold, 12);
        assert_eq!(policy.cooldown, Duration::from_secs(3));
        assert_eq!(policy.stall_timeout, config.stall_timeout);
    }
}
