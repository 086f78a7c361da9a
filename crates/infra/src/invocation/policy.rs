//! Retry policies for partner calls.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use cardrecon_core::ResultCode;

/// Which outcomes are worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryMode {
    /// Retry failures and every result code outside the terminal set.
    #[default]
    AnyNonTerminal,
    /// Retry failures only; any returned code ends the loop.
    TransientOnly,
}

/// Retry policy for one invocation.
///
/// Backoff is exponential with a fixed 2x multiplier: attempt `n` is
/// followed by a wait of `initial_delay * 2^(n-1)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = call once).
    pub max_retries: u32,
    /// Wait after the first failed attempt.
    pub initial_delay: Duration,
    /// Result codes that end the loop immediately.
    pub terminal_codes: BTreeSet<ResultCode>,
    pub mode: RetryMode,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            terminal_codes: Self::default_terminal_codes(),
            mode: RetryMode::AnyNonTerminal,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            ..Default::default()
        }
    }

    /// Call exactly once.
    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn default_terminal_codes() -> BTreeSet<ResultCode> {
        [ResultCode::Success, ResultCode::Created].into_iter().collect()
    }

    /// Replace the terminal set.
    pub fn with_terminal_codes(mut self, codes: impl IntoIterator<Item = ResultCode>) -> Self {
        self.terminal_codes = codes.into_iter().collect();
        self
    }

    pub fn with_mode(mut self, mode: RetryMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn is_terminal(&self, code: ResultCode) -> bool {
        self.terminal_codes.contains(&code)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Wait after attempt `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.initial_delay.saturating_mul(factor)
    }

    /// Longest time one invocation can spend waiting between attempts.
    ///
    /// Worker pools hold a worker for this long when a partner is down.
    pub fn worst_case_wait(&self) -> Duration {
        (1..=self.max_retries).fold(Duration::ZERO, |total, attempt| {
            total.saturating_add(self.delay_for_attempt(attempt))
        })
    }
}
