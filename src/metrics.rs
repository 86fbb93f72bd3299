use lazy_static::lazy_static;
use prometheus::{Counter, Gauge, Histogram, register_counter, register_gauge, register_histogram};

lazy_static! {
    pub static ref REQUESTS_TOTAL: Counter =
        register_counter!("lm_dispatch_requests_total", "Total number of dispatched items").unwrap();
    pub static ref CACHE_HITS: Counter =
        register_counter!("lm_dispatch_cache_hits_total", "Total cache hits").unwrap();
    pub static ref CACHE_MISSES: Counter =
        register_counter!("lm_dispatch_cache_misses_total", "Total cache misses").unwrap();
    pub static ref RETRIES_TOTAL: Counter =
        register_counter!("lm_dispatch_retries_total", "Total retried provider calls").unwrap();
    pub static ref INFLIGHT_REQUESTS: Gauge =
        register_gauge!("lm_dispatch_inflight_requests", "Provider calls currently in flight").unwrap();
    pub static ref REQUEST_LATENCY: Histogram = register_histogram!(
        "lm_dispatch_request_latency_seconds",
        "Provider call latency in seconds"
    )
    .unwrap();
}
