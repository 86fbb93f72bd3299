use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::{Duration, Instant, sleep};

use lm_dispatch::{
    Adapter, Completion, DispatchConfig, DispatchEngine, DispatchError, ErrorKind, ErrorMode,
    Prompt, Request, RequestParameters,
};

// Counting in-process provider. Echoes the prompt back, optionally after a
// content-dependent delay, optionally rejecting prompts that contain a
// marker substring.
struct MockAdapter {
    calls: AtomicUsize,
    inflight: AtomicUsize,
    peak_inflight: AtomicUsize,
    delay_fn: Box<dyn Fn(&str) -> Duration + Send + Sync>,
    fail_containing: Option<String>,
}

impl MockAdapter {
    fn with_delay(delay_fn: impl Fn(&str) -> Duration + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            inflight: AtomicUsize::new(0),
            peak_inflight: AtomicUsize::new(0),
            delay_fn: Box::new(delay_fn),
            fail_containing: None,
        })
    }

    fn instant() -> Arc<Self> {
        Self::with_delay(|_| Duration::ZERO)
    }

    fn fixed_delay(delay: Duration) -> Arc<Self> {
        Self::with_delay(move |_| delay)
    }

    fn failing_on(marker: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            inflight: AtomicUsize::new(0),
            peak_inflight: AtomicUsize::new(0),
            delay_fn: Box::new(|_| Duration::ZERO),
            fail_containing: Some(marker.to_string()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn peak_inflight(&self) -> usize {
        self.peak_inflight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    async fn send(&self, request: &Request) -> Result<Completion, DispatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_inflight.fetch_max(current, Ordering::SeqCst);

        let content = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        sleep((self.delay_fn)(&content)).await;
        self.inflight.fetch_sub(1, Ordering::SeqCst);

        if let Some(marker) = &self.fail_containing {
            if content.contains(marker.as_str()) {
                return Err(DispatchError::Permanent(format!("provider rejected: {content}")));
            }
        }
        Ok(Completion {
            model: request.model.clone(),
            content: format!("echo: {content}"),
        })
    }
}

// Unlimited rate and no timeout so tests control timing themselves.
fn test_config() -> DispatchConfig {
    DispatchConfig {
        max_requests_per_minute: 0,
        timeout_secs: 0,
        ..Default::default()
    }
}

fn engine(adapter: Arc<MockAdapter>, config: DispatchConfig) -> DispatchEngine {
    DispatchEngine::new("test-model", adapter, config).unwrap()
}

fn prompts(n: usize) -> Vec<Prompt> {
    (0..n).map(|i| Prompt::from(format!("prompt-{i}"))).collect()
}

#[tokio::test(start_paused = true)]
async fn results_preserve_submission_order() {
    // later prompts finish first, results must still line up by index
    let adapter = MockAdapter::with_delay(|content| {
        let index: u64 = content.trim_start_matches("prompt-").parse().unwrap();
        Duration::from_millis((6 - index) * 10)
    });
    let config = DispatchConfig {
        async_capacity: 6,
        ..test_config()
    };

    let responses = engine(adapter, config)
        .run(prompts(6), &RequestParameters::default())
        .await
        .unwrap();

    assert_eq!(responses.len(), 6);
    for (index, response) in responses.iter().enumerate() {
        assert_eq!(response.content(), Some(format!("echo: prompt-{index}").as_str()));
    }
}

#[tokio::test]
async fn identical_prompt_is_served_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = MockAdapter::instant();
    let config = DispatchConfig {
        cache_dir: Some(dir.path().to_path_buf()),
        ..test_config()
    };
    let engine_one = engine(adapter.clone(), config.clone());

    let first = engine_one
        .run(vec![Prompt::from("Hello")], &RequestParameters::default())
        .await
        .unwrap();
    assert!(first[0].is_success());
    assert!(!first[0].is_cached());
    assert_eq!(adapter.calls(), 1);

    let second = engine_one
        .run(vec![Prompt::from("Hello")], &RequestParameters::default())
        .await
        .unwrap();
    assert!(second[0].is_cached());
    assert_eq!(second[0].content(), first[0].content());
    assert_eq!(adapter.calls(), 1);

    // a fresh engine over the same directory still finds the durable record
    let fresh_adapter = MockAdapter::instant();
    let third = engine(fresh_adapter.clone(), config)
        .run(vec![Prompt::from("Hello")], &RequestParameters::default())
        .await
        .unwrap();
    assert!(third[0].is_cached());
    assert_eq!(fresh_adapter.calls(), 0);
}

#[tokio::test]
async fn changed_parameters_bypass_the_cached_entry() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = MockAdapter::instant();
    let config = DispatchConfig {
        cache_dir: Some(dir.path().to_path_buf()),
        ..test_config()
    };
    let engine = engine(adapter.clone(), config);

    engine
        .run(vec![Prompt::from("Hello")], &RequestParameters::default())
        .await
        .unwrap();
    engine
        .run(
            vec![Prompt::from("Hello")],
            &RequestParameters {
                temperature: Some(0.9),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(adapter.calls(), 2);
}

#[tokio::test]
async fn failures_are_never_cached() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = MockAdapter::failing_on("prompt");
    let config = DispatchConfig {
        cache_dir: Some(dir.path().to_path_buf()),
        error_mode: ErrorMode::Ignore,
        ..test_config()
    };
    let engine = engine(adapter.clone(), config);

    let first = engine.run(prompts(1), &RequestParameters::default()).await.unwrap();
    assert_eq!(first[0].error_kind(), Some(ErrorKind::Permanent));

    // resubmission dispatches again instead of replaying the failure
    let second = engine.run(prompts(1), &RequestParameters::default()).await.unwrap();
    assert_eq!(second[0].error_kind(), Some(ErrorKind::Permanent));
    assert_eq!(adapter.calls(), 2);
}

#[tokio::test]
async fn ignore_mode_records_failures_in_place() {
    let adapter = MockAdapter::failing_on("fail");
    let config = DispatchConfig {
        error_mode: ErrorMode::Ignore,
        ..test_config()
    };

    let batch = vec![
        Prompt::from("first"),
        Prompt::from("please fail"),
        Prompt::from("third"),
    ];
    let responses = engine(adapter, config)
        .run(batch, &RequestParameters::default())
        .await
        .unwrap();

    assert_eq!(responses.len(), 3);
    assert_eq!(responses[0].content(), Some("echo: first"));
    assert_eq!(responses[1].error_kind(), Some(ErrorKind::Permanent));
    assert_eq!(responses[2].content(), Some("echo: third"));
}

#[tokio::test]
async fn raise_mode_aborts_the_batch_on_first_terminal_failure() {
    let adapter = MockAdapter::failing_on("fail");
    let batch = vec![
        Prompt::from("first"),
        Prompt::from("please fail"),
        Prompt::from("third"),
    ];

    let result = engine(adapter, test_config())
        .run(batch, &RequestParameters::default())
        .await;

    assert!(matches!(result, Err(DispatchError::Permanent(_))));
}

#[tokio::test(start_paused = true)]
async fn rate_limit_spaces_admissions_across_the_window() {
    let adapter = MockAdapter::instant();
    let config = DispatchConfig {
        max_requests_per_minute: 2,
        ..test_config()
    };

    let start = Instant::now();
    let responses = engine(adapter, config)
        .run(prompts(3), &RequestParameters::default())
        .await
        .unwrap();

    // the third admission waits for the first to age out of the window
    assert_eq!(responses.len(), 3);
    assert!(start.elapsed() >= Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn inflight_calls_never_exceed_async_capacity() {
    let adapter = MockAdapter::fixed_delay(Duration::from_millis(20));
    let config = DispatchConfig {
        async_capacity: 2,
        ..test_config()
    };

    let responses = engine(adapter.clone(), config)
        .run(prompts(8), &RequestParameters::default())
        .await
        .unwrap();

    assert_eq!(responses.len(), 8);
    assert_eq!(adapter.calls(), 8);
    assert!(adapter.peak_inflight() <= 2);
}

#[tokio::test(start_paused = true)]
async fn cancellation_keeps_completed_results_and_stops_pending_items() {
    let adapter = MockAdapter::fixed_delay(Duration::from_millis(100));
    let config = DispatchConfig {
        async_capacity: 1,
        error_mode: ErrorMode::Ignore,
        ..test_config()
    };
    let engine = engine(adapter.clone(), config);
    let token = engine.cancellation_token();

    let mut rx = engine.run_stream(prompts(5), &RequestParameters::default());
    let mut received = Vec::new();
    while let Some(item) = rx.recv().await {
        received.push(item);
        if received.len() == 2 {
            token.cancel();
        }
    }

    assert_eq!(received.len(), 5);
    let successes: Vec<_> = received.iter().filter(|(_, r)| r.is_success()).collect();
    let cancelled = received
        .iter()
        .filter(|(_, r)| r.error_kind() == Some(ErrorKind::Cancelled))
        .count();
    assert_eq!(successes.len(), 2);
    assert_eq!(cancelled, 3);
    // completed responses stay retrievable and correct
    for (index, response) in &successes {
        assert_eq!(response.content(), Some(format!("echo: prompt-{index}").as_str()));
    }
    // at most async_capacity additional items went in flight after cancel
    assert!(adapter.calls() <= 3);
}

#[tokio::test]
async fn invalid_prompts_fail_before_any_dispatch() {
    let adapter = MockAdapter::instant();
    let config = DispatchConfig {
        error_mode: ErrorMode::Ignore,
        ..test_config()
    };

    let batch = vec![Prompt::from(""), Prompt::from("fine")];
    let responses = engine(adapter.clone(), config)
        .run(batch, &RequestParameters::default())
        .await
        .unwrap();

    assert_eq!(responses[0].error_kind(), Some(ErrorKind::Validation));
    assert_eq!(responses[1].content(), Some("echo: fine"));
    // the invalid item never reached the provider
    assert_eq!(adapter.calls(), 1);
}

#[tokio::test]
async fn progress_callback_counts_every_resolution() {
    let adapter = MockAdapter::instant();
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();

    let engine = DispatchEngine::new("test-model", adapter, test_config())
        .unwrap()
        .on_progress(move |done, total| sink.lock().unwrap().push((done, total)));

    engine.run(prompts(4), &RequestParameters::default()).await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(*seen, vec![(1, 4), (2, 4), (3, 4), (4, 4)]);
}

#[tokio::test]
async fn empty_batch_returns_empty_results() {
    let adapter = MockAdapter::instant();
    let responses = engine(adapter.clone(), test_config())
        .run(Vec::new(), &RequestParameters::default())
        .await
        .unwrap();
    assert!(responses.is_empty());
    assert_eq!(adapter.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn run_stream_tags_responses_with_their_submission_index() {
    let adapter = MockAdapter::with_delay(|content| {
        let index: u64 = content.trim_start_matches("prompt-").parse().unwrap();
        Duration::from_millis((4 - index) * 10)
    });
    let config = DispatchConfig {
        async_capacity: 4,
        ..test_config()
    };

    let mut rx = engine(adapter, config).run_stream(prompts(4), &RequestParameters::default());
    let mut received = Vec::new();
    while let Some((index, response)) = rx.recv().await {
        assert_eq!(response.content(), Some(format!("echo: prompt-{index}").as_str()));
        received.push(index);
    }

    assert_eq!(received.len(), 4);
    // reverse delays mean completion order differs from submission order
    assert_ne!(received, vec![0, 1, 2, 3]);
}
