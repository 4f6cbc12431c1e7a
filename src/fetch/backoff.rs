//! Exponential backoff between retry attempts: `unit * base^retry_index`.

use crate::config::ConfigError;
use std::time::Duration;

pub const DEFAULT_BACKOFF_BASE: u32 = 2;
pub const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_secs(1);

/// Pure delay schedule. Retry index 1 is the first retry; index 0 (the initial attempt) has no delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: u32,
    unit: Duration,
    max_delay: Option<Duration>,
}

impl Default for Backoff {
    /// Base 2 in seconds: 2s, 4s, 8s, ...
    fn default() -> Self {
        Self {
            base: DEFAULT_BACKOFF_BASE,
            unit: DEFAULT_BACKOFF_UNIT,
            max_delay: None,
        }
    }
}

impl Backoff {
    /// A base of 0 would make every retry immediate and is rejected; 1 gives a constant delay of `unit`.
    pub fn new(base: u32, unit: Duration) -> Result<Self, ConfigError> {
        if base == 0 {
            return Err(ConfigError::InvalidBackoffBase(base));
        }
        Ok(Self {
            base,
            unit,
            max_delay: None,
        })
    }

    /// Upper bound on any single delay.
    pub fn with_max_delay(mut self, max: Duration) -> Self {
        self.max_delay = Some(max);
        self
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn unit(&self) -> Duration {
        self.unit
    }

    /// Delay before the given retry. Saturates instead of overflowing.
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        if retry_index == 0 {
            return Duration::ZERO;
        }
        let factor = self.base.checked_pow(retry_index).unwrap_or(u32::MAX);
        let delay = self.unit.checked_mul(factor).unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}
