//! Batch dispatch engine for language-model requests: bounded concurrency,
//! rolling-window rate limiting, content-addressed response caching and a
//! two-mode failure policy over pluggable provider adapters.

pub mod adapters;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod gate;
pub mod metrics;
pub mod models;
pub mod rate_limit;

pub use cache::{CacheRecord, CacheStore, fingerprint};
pub use config::{Args, DispatchConfig, ErrorMode};
pub use engine::DispatchEngine;
pub use error::{DispatchError, ErrorKind};
pub use executor::{Adapter, Executor};
pub use gate::{ConcurrencyGate, Slot};
pub use models::{Completion, Message, Prompt, Request, RequestParameters, Response, Role};
pub use rate_limit::RateLimiter;
