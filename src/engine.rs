use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{CacheStore, fingerprint};
use crate::config::{DispatchConfig, ErrorMode};
use crate::error::DispatchError;
use crate::executor::{Adapter, Executor};
use crate::gate::ConcurrencyGate;
use crate::metrics::{
    CACHE_HITS, CACHE_MISSES, INFLIGHT_REQUESTS, REQUEST_LATENCY, REQUESTS_TOTAL,
};
use crate::models::{Prompt, Request, RequestParameters, Response};
use crate::rate_limit::RateLimiter;

type ProgressFn = dyn Fn(usize, usize) + Send + Sync;

/// Drives a batch of prompts through cache lookup, rate admission, the
/// concurrency gate and the executor, and hands results back in submission
/// order regardless of completion order.
pub struct DispatchEngine {
    model: String,
    executor: Arc<Executor>,
    cache: Option<Arc<CacheStore>>,
    limiter: Arc<RateLimiter>,
    gate: ConcurrencyGate,
    error_mode: ErrorMode,
    cancel: CancellationToken,
    progress: Option<Arc<ProgressFn>>,
}

impl DispatchEngine {
    pub fn new(
        model: impl Into<String>,
        adapter: Arc<dyn Adapter>,
        config: DispatchConfig,
    ) -> Result<Self, DispatchError> {
        let cache = match &config.cache_dir {
            Some(dir) => Some(Arc::new(CacheStore::open(dir)?)),
            None => None,
        };
        let timeout = (config.timeout_secs > 0).then(|| Duration::from_secs(config.timeout_secs));
        let executor = Arc::new(Executor::new(
            adapter,
            timeout,
            config.max_retries,
            Duration::from_secs_f64(config.backoff_base_secs),
        ));
        Ok(Self {
            model: model.into(),
            executor,
            cache,
            limiter: Arc::new(RateLimiter::per_minute(config.max_requests_per_minute)),
            gate: ConcurrencyGate::new(config.async_capacity),
            error_mode: config.error_mode,
            cancel: CancellationToken::new(),
            progress: None,
        })
    }

    /// Share one limiter between engines that target the same provider, so
    /// their combined admissions respect a single throughput ceiling.
    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Callback invoked with `(completed, total)` after each item resolves.
    pub fn on_progress(mut self, callback: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    /// Token that cancels every pending and in-flight item of any running
    /// batch on this engine. Cancelled items release their slots, abandon
    /// retries and are never cached.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cache_store(&self) -> Option<&CacheStore> {
        self.cache.as_deref()
    }

    /// Dispatch all prompts and return one response per prompt, in
    /// submission order.
    ///
    /// Under `ErrorMode::Raise` the first terminal failure aborts the batch
    /// and is returned as the error. Under `ErrorMode::Ignore` failures are
    /// recorded as error-tagged responses at their item's position and the
    /// result always has one entry per prompt.
    pub async fn run(
        &self,
        prompts: Vec<Prompt>,
        parameters: &RequestParameters,
    ) -> Result<Vec<Response>, DispatchError> {
        let total = prompts.len();
        let completed = Arc::new(AtomicUsize::new(0));
        let cancel = self.cancel.child_token();

        let mut join_set = JoinSet::new();
        for (index, prompt) in prompts.into_iter().enumerate() {
            let request = Request::new(self.model.clone(), prompt, parameters.clone());
            join_set.spawn(run_item(self.item_context(cancel.clone()), index, request));
        }

        let mut results: Vec<Option<Response>> = Vec::new();
        results.resize_with(total, || None);

        while let Some(joined) = join_set.join_next().await {
            let (index, outcome) = match joined {
                Ok(pair) => pair,
                Err(err) if err.is_cancelled() => continue,
                Err(err) => std::panic::resume_unwind(err.into_panic()),
            };
            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(callback) = &self.progress {
                callback(done, total);
            }
            match outcome {
                Ok(response) => results[index] = Some(response),
                Err(err) => match self.error_mode {
                    ErrorMode::Ignore => results[index] = Some(Response::from_error(&err)),
                    ErrorMode::Raise => {
                        // first terminal failure aborts the whole batch
                        cancel.cancel();
                        join_set.shutdown().await;
                        return Err(err);
                    }
                },
            }
        }

        Ok(results
            .into_iter()
            .map(|slot| slot.expect("every item reports exactly once"))
            .collect())
    }

    /// Dispatch all prompts, yielding `(index, response)` pairs as items
    /// complete. Completion order is not submission order; the index ties
    /// each response back to its prompt.
    ///
    /// Under `ErrorMode::Raise` the first terminal failure cancels the
    /// remaining items, which are then yielded as cancelled failures; the
    /// channel always delivers one pair per prompt.
    pub fn run_stream(
        &self,
        prompts: Vec<Prompt>,
        parameters: &RequestParameters,
    ) -> mpsc::Receiver<(usize, Response)> {
        let total = prompts.len();
        let (tx, rx) = mpsc::channel(total.max(1));
        let cancel = self.cancel.child_token();

        let mut join_set = JoinSet::new();
        for (index, prompt) in prompts.into_iter().enumerate() {
            let request = Request::new(self.model.clone(), prompt, parameters.clone());
            join_set.spawn(run_item(self.item_context(cancel.clone()), index, request));
        }

        let progress = self.progress.clone();
        let error_mode = self.error_mode;
        let completed = Arc::new(AtomicUsize::new(0));
        tokio::spawn(async move {
            while let Some(joined) = join_set.join_next().await {
                let Ok((index, outcome)) = joined else { continue };
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(callback) = &progress {
                    callback(done, total);
                }
                let response = match outcome {
                    Ok(response) => response,
                    Err(err) => {
                        if error_mode == ErrorMode::Raise {
                            // first terminal failure aborts the rest
                            cancel.cancel();
                        }
                        Response::from_error(&err)
                    }
                };
                if tx.send((index, response)).await.is_err() {
                    // receiver gone, stop driving the batch
                    cancel.cancel();
                    break;
                }
            }
        });
        rx
    }

    fn item_context(&self, cancel: CancellationToken) -> ItemContext {
        ItemContext {
            executor: self.executor.clone(),
            cache: self.cache.clone(),
            limiter: self.limiter.clone(),
            gate: self.gate.clone(),
            cancel,
        }
    }
}

#[derive(Clone)]
struct ItemContext {
    executor: Arc<Executor>,
    cache: Option<Arc<CacheStore>>,
    limiter: Arc<RateLimiter>,
    gate: ConcurrencyGate,
    cancel: CancellationToken,
}

async fn run_item(
    ctx: ItemContext,
    index: usize,
    request: Request,
) -> (usize, Result<Response, DispatchError>) {
    let outcome = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(DispatchError::Cancelled),
        result = dispatch_one(&ctx, &request) => result,
    };
    (index, outcome)
}

// Cache -> limiter -> gate -> executor, write-through on success.
async fn dispatch_one(ctx: &ItemContext, request: &Request) -> Result<Response, DispatchError> {
    request.validate()?;
    REQUESTS_TOTAL.inc();
    let key = fingerprint(request);

    if let Some(cache) = &ctx.cache {
        if let Some(hit) = cache.lookup(&key) {
            CACHE_HITS.inc();
            debug!(fingerprint = %key, "cache hit");
            return Ok(Response::from_cache(hit));
        }
        CACHE_MISSES.inc();
    }

    // rate admission strictly before taking a concurrency slot
    ctx.limiter.acquire().await;
    let slot = ctx.gate.acquire_slot().await;

    let inflight = InflightGuard::new();
    let started = std::time::Instant::now();
    let result = ctx.executor.execute(request).await;
    REQUEST_LATENCY.observe(started.elapsed().as_secs_f64());
    drop(inflight);
    slot.release();

    let completion = result?;
    if let Some(cache) = &ctx.cache {
        // a cache write failure must not fail an already-successful item
        if let Err(err) = cache.store(&key, request, &completion) {
            warn!(fingerprint = %key, %err, "failed to persist cache record");
        }
    }
    Ok(Response::completed(completion))
}

// Keeps the in-flight gauge honest on every exit path, including drops
// caused by cancellation.
struct InflightGuard;

impl InflightGuard {
    fn new() -> Self {
        INFLIGHT_REQUESTS.inc();
        InflightGuard
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        INFLIGHT_REQUESTS.dec();
    }
}
