//! Reconnect governor.
//!
//! Decides, after an unexpected close, whether another connect attempt
//! should be scheduled and after what delay. The attempt counter only grows
//! between successful opens; once it reaches the configured maximum the
//! governor becomes exhausted and stays that way until the next successful
//! open or an explicit reset.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

/// Backoff delay function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Backoff {
    /// Same delay before every attempt.
    Fixed { delay_ms: u64 },
    /// `base * 2^(attempt-1)`, capped at `max_ms`.
    Exponential { base_ms: u64, max_ms: u64 },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            base_ms: 1000,
            max_ms: 60000,
        }
    }
}

impl Backoff {
    /// Minimum delay before the given attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential { base_ms, max_ms } => {
                // attempt=1 -> base, attempt=2 -> 2*base, attempt=3 -> 4*base
                let exponent = attempt.saturating_sub(1).min(10);
                let delay = base_ms.saturating_mul(1u64 << exponent).min(max_ms);
                Duration::from_millis(delay)
            }
        }
    }
}

/// Reconnection policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Whether unexpected closes trigger reconnection at all.
    pub enabled: bool,
    /// Maximum consecutive attempts without a successful open (0 = unlimited).
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Random extra delay added on top of the backoff (0..=jitter_ms).
    pub jitter_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            backoff: Backoff::default(),
            jitter_ms: 500,
        }
    }
}

impl ReconnectPolicy {
    /// Policy that never reconnects.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Outcome of consulting the governor after an unexpected close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Reconnect after `delay`; `attempt` is the 1-based attempt number.
    Schedule { attempt: u32, delay: Duration },
    /// Maximum reached; further connects are refused until reset.
    Exhausted { attempts: u32 },
    /// Reconnection is turned off.
    Disabled,
}

/// Retry bookkeeping for one logical connection.
#[derive(Debug, Clone)]
pub struct ReconnectGovernor {
    policy: ReconnectPolicy,
    attempts: u32,
    exhausted: bool,
}

impl ReconnectGovernor {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            exhausted: false,
        }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Attempts made since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Decide what to do after an unexpected close.
    pub fn on_unexpected_close(&mut self) -> ReconnectDecision {
        if !self.policy.enabled {
            return ReconnectDecision::Disabled;
        }

        if self.exhausted
            || (self.policy.max_attempts > 0 && self.attempts >= self.policy.max_attempts)
        {
            if !self.exhausted {
                error!(attempts = self.attempts, "Max reconnection attempts reached");
            }
            self.exhausted = true;
            return ReconnectDecision::Exhausted {
                attempts: self.attempts,
            };
        }

        self.attempts += 1;
        let delay = self.delay_for(self.attempts);
        warn!(
            attempt = self.attempts,
            max = self.policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        ReconnectDecision::Schedule {
            attempt: self.attempts,
            delay,
        }
    }

    /// Record a successful open: the counter and the exhausted flag clear.
    pub fn record_open(&mut self) {
        if self.attempts > 0 {
            info!(attempts = self.attempts, "Reconnected");
        }
        self.attempts = 0;
        self.exhausted = false;
    }

    /// Clear the counter and the exhausted flag without an open.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.exhausted = false;
    }

    /// Delay before `attempt`: backoff minimum plus jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let extra = Duration::from_millis(jitter(self.policy.jitter_ms));
        self.policy.backoff.delay_for(attempt).saturating_add(extra)
    }
}

/// Pseudo-random jitter in `0..=max_ms`.
fn jitter(max_ms: u64) -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    if max_ms == 0 {
        return 0;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    u64::from(nanos) % max_ms.saturating_add(1)
}
