//! Retry loop around a single partner call.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use cardrecon_core::ResultCode;

use super::error::{BenignFailure, InvocationError, PartnerCallError, default_benign_failures};
use super::policy::{RetryMode, RetryPolicy};

/// Waits between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

/// Tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Runs partner calls under a [`RetryPolicy`].
#[derive(Clone)]
pub struct InvocationEngine {
    sleeper: Arc<dyn Sleeper>,
    shutdown: Option<watch::Receiver<bool>>,
    benign: Arc<[BenignFailure]>,
}

impl InvocationEngine {
    pub fn new() -> Self {
        Self {
            sleeper: Arc::new(TokioSleeper),
            shutdown: None,
            benign: default_benign_failures().into(),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Cancel pending waits once the channel reads `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn with_benign_failures(mut self, benign: Vec<BenignFailure>) -> Self {
        self.benign = benign.into();
        self
    }

    /// Invoke `call` until it yields a terminal code or the budget runs out.
    ///
    /// - `Ok(code)` with a terminal code returns at once; in
    ///   [`RetryMode::TransientOnly`] every `Ok` returns at once.
    /// - A non-terminal code on the last attempt is returned as is.
    /// - `Err` on the last attempt becomes [`InvocationError::Exhausted`].
    pub async fn invoke<F, Fut>(
        &self,
        mut call: F,
        policy: &RetryPolicy,
    ) -> Result<ResultCode, InvocationError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<ResultCode, PartnerCallError>> + Send,
    {
        let max_attempts = policy.max_attempts();
        let mut attempt: u32 = 1;

        loop {
            match call().await {
                Ok(code) if policy.is_terminal(code) => {
                    debug!(attempt, result = %code, "partner call returned a terminal result");
                    return Ok(code);
                }
                Ok(code) if policy.mode == RetryMode::TransientOnly => {
                    debug!(attempt, result = %code, "partner call returned; not retrying results");
                    return Ok(code);
                }
                Ok(code) if attempt >= max_attempts => {
                    warn!(attempts = attempt, result = %code, "retry budget spent; returning last result");
                    return Ok(code);
                }
                Ok(code) => {
                    warn!(attempt, result = %code, "partner call returned a non-terminal result");
                }
                Err(err) if attempt >= max_attempts => {
                    error!(attempts = attempt, partner = %err.partner, error = %err, "partner call failed; giving up");
                    return Err(InvocationError::Exhausted {
                        attempts: attempt,
                        source: err,
                    });
                }
                Err(err) => {
                    if self.is_benign(&err) {
                        debug!(attempt, partner = %err.partner, error = %err, "expected partner failure");
                    } else {
                        warn!(attempt, partner = %err.partner, error = %err, "partner call failed");
                    }
                }
            }

            let delay = policy.delay_for_attempt(attempt);
            info!(attempt, delay_ms = delay.as_millis() as u64, "waiting before retrying partner call");
            if !self.wait(delay).await {
                warn!(attempts = attempt, "shutdown requested during retry wait");
                return Err(InvocationError::Cancelled { attempts: attempt });
            }
            attempt += 1;
        }
    }

    fn is_benign(&self, err: &PartnerCallError) -> bool {
        self.benign.iter().any(|b| b.matches(err))
    }

    /// `false` when shutdown won the race.
    async fn wait(&self, delay: Duration) -> bool {
        let Some(shutdown) = &self.shutdown else {
            self.sleeper.sleep(delay).await;
            return true;
        };

        let mut shutdown = shutdown.clone();
        if *shutdown.borrow() {
            return false;
        }
        let stopped = async move {
            let signalled = shutdown.wait_for(|stop| *stop).await.is_ok();
            if !signalled {
                // Sender dropped: nothing can cancel us any more.
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            _ = self.sleeper.sleep(delay) => true,
            _ = stopped => false,
        }
    }
}

impl Default for InvocationEngine {
    fn default() -> Self {
        Self::new()
    }
}
