//! Reconnect delay policy.

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Which base delay a reconnect uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    /// The pairing code expired unscanned; retry quickly with a fresh one.
    PairingTimeout,
    /// Any other non-terminal disconnect.
    Transient,
}

/// Exponential backoff: `min(base * 2^(attempt - 1), cap)`.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    pairing_timeout_base: Duration,
    transient_base: Duration,
    cap: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            pairing_timeout_base: config.pairing_timeout_base(),
            transient_base: config.transient_base(),
            cap: config.max_delay(),
        }
    }

    /// Attempt count at which reconnecting is abandoned.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }

    /// Delay before reconnect number `attempt` (1-based). Never exceeds the cap.
    pub fn delay(&self, kind: BackoffKind, attempt: u32) -> Duration {
        let base = match kind {
            BackoffKind::PairingTimeout => self.pairing_timeout_base,
            BackoffKind::Transient => self.transient_base,
        };
        let factor = 2u32
            .checked_pow(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        base.saturating_mul(factor).min(self.cap)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}
