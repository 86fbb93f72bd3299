use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::{Duration, sleep, timeout};
use tracing::warn;

use crate::error::DispatchError;
use crate::metrics::RETRIES_TOTAL;
use crate::models::{Completion, Request};

// Backoff never sleeps longer than this between attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(20);

/// Provider seam. Implementations translate the canonical request into one
/// vendor call; the rest of the engine stays agnostic to the wire format.
#[async_trait]
pub trait Adapter: Send + Sync {
    async fn send(&self, request: &Request) -> Result<Completion, DispatchError>;
}

/// Wraps one provider call with a timeout, error classification and a
/// bounded exponential-backoff retry loop. Transient failures and timeouts
/// are retried up to `max_retries` times; validation and permanent
/// failures return immediately.
pub struct Executor {
    adapter: Arc<dyn Adapter>,
    timeout: Option<Duration>,
    max_retries: u32,
    backoff_base: Duration,
}

impl Executor {
    pub fn new(
        adapter: Arc<dyn Adapter>,
        timeout: Option<Duration>,
        max_retries: u32,
        backoff_base: Duration,
    ) -> Self {
        Self {
            adapter,
            timeout,
            max_retries,
            backoff_base,
        }
    }

    pub async fn execute(&self, request: &Request) -> Result<Completion, DispatchError> {
        let mut attempt: u32 = 0;
        loop {
            match self.attempt(request).await {
                Ok(completion) => return Ok(completion),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    RETRIES_TOTAL.inc();
                    let delay = backoff_delay(self.backoff_base, attempt);
                    warn!(
                        model = %request.model,
                        attempt = attempt + 1,
                        delay_secs = delay.as_secs_f64(),
                        %err,
                        "transient failure, backing off"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn attempt(&self, request: &Request) -> Result<Completion, DispatchError> {
        match self.timeout {
            Some(limit) => match timeout(limit, self.adapter.send(request)).await {
                Ok(result) => result,
                Err(_) => Err(DispatchError::Timeout(limit.as_secs())),
            },
            None => self.adapter.send(request).await,
        }
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt)).min(MAX_BACKOFF)
}
