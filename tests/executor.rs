use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use fetch_hook::{
    append, Body, CachePolicy, Clock, Fetch, FetchArgs, FetchError, Interceptors, MemoryStore,
    Method, Options, Outcome, RequestInit, ResponseType, Result, RetryDelay, Settled, Transport,
    TransportResponse,
};
use serde_json::{json, Value};

enum Step {
    Respond {
        status: u16,
        body: Value,
        delay: Duration,
    },
    Fail(FetchError),
}

impl Step {
    fn ok(body: Value) -> Self {
        Self::Respond {
            status: 200,
            body,
            delay: Duration::ZERO,
        }
    }

    fn slow(body: Value, delay: Duration) -> Self {
        Self::Respond {
            status: 200,
            body,
            delay,
        }
    }

    fn status(status: u16) -> Self {
        Self::Respond {
            status,
            body: Value::Null,
            delay: Duration::ZERO,
        }
    }
}

/// Scripted transport; an exhausted script hangs until the signal fires.
/// Routed URLs always answer with their own body.
#[derive(Default)]
struct MockTransport {
    steps: Mutex<VecDeque<Step>>,
    routes: HashMap<String, Value>,
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl MockTransport {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            ..Self::default()
        })
    }

    fn routed(routes: &[(&str, Value)]) -> Arc<Self> {
        Arc::new(Self {
            routes: routes
                .iter()
                .map(|(url, body)| ((*url).to_owned(), body.clone()))
                .collect(),
            ..Self::default()
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    async fn invoke(&self, url: &str, init: RequestInit) -> Result<TransportResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls
            .lock()
            .expect("urls mutex must not be poisoned")
            .push(url.to_owned());
        if let Some(body) = self.routes.get(url) {
            return Ok(TransportResponse::json(200, body));
        }
        let step = self
            .steps
            .lock()
            .expect("steps mutex must not be poisoned")
            .pop_front();

        match step {
            Some(Step::Respond {
                status,
                body,
                delay,
            }) => {
                tokio::select! {
                    () = init.signal.cancelled() => Err(FetchError::Aborted),
                    () = tokio::time::sleep(delay) => Ok(TransportResponse::json(status, &body)),
                }
            }
            Some(Step::Fail(err)) => Err(err),
            None => {
                init.signal.cancelled().await;
                Err(FetchError::Aborted)
            }
        }
    }
}

#[derive(Default)]
struct ManualClock(AtomicU64);

impl ManualClock {
    fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

fn base() -> Options {
    Options::new().url("https://api.test").path("/people")
}

fn connect_error() -> FetchError {
    FetchError::transport("ConnectError", "connection refused")
}

#[tokio::test]
async fn failing_request_runs_retries_plus_one_attempts() {
    let transport = MockTransport::new(vec![
        Step::Fail(connect_error()),
        Step::Fail(connect_error()),
        Step::Fail(connect_error()),
    ]);
    let errors = counter();
    let fetch = Fetch::new(Arc::clone(&transport), {
        let errors = Arc::clone(&errors);
        base()
            .retries(2)
            .retry_delay(RetryDelay::Fixed(100))
            .on_error(move |_| {
                errors.fetch_add(1, Ordering::SeqCst);
            })
    })
    .expect("config must resolve");

    let outcome = fetch.get("").await.expect("get must run");

    assert_eq!(outcome, Outcome::Failed(connect_error()));
    assert_eq!(transport.calls(), 3);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    let snapshot = fetch.snapshot();
    assert_eq!(snapshot.error, Some(connect_error()));
    assert!(!snapshot.loading);
    assert_eq!(snapshot.settled, Some(Settled::Failed));
}

#[tokio::test]
async fn computed_delay_receives_zero_based_retry_index() {
    let transport = MockTransport::new(vec![
        Step::Fail(connect_error()),
        Step::Fail(connect_error()),
        Step::ok(json!(["ok"])),
    ]);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let fetch = Fetch::new(Arc::clone(&transport), {
        let seen = Arc::clone(&seen);
        base()
            .retries(2)
            .retry_delay(RetryDelay::computed(move |attempt| {
                seen.lock().expect("seen mutex must not be poisoned").push(attempt);
                u64::from(attempt + 1) * 100
            }))
    })
    .expect("config must resolve");

    let outcome = fetch.get("").await.expect("get must run");

    assert_eq!(outcome, Outcome::Success(json!(["ok"])));
    assert_eq!(*seen.lock().expect("seen mutex must not be poisoned"), vec![0, 1]);
}

#[tokio::test]
async fn each_timed_out_attempt_fires_timeout_and_abort() {
    let transport = MockTransport::new(vec![
        Step::slow(json!([]), Duration::from_secs(10)),
        Step::slow(json!([]), Duration::from_secs(10)),
    ]);
    let timeouts = counter();
    let aborts = counter();
    let fetch = Fetch::new(Arc::clone(&transport), {
        let timeouts = Arc::clone(&timeouts);
        let aborts = Arc::clone(&aborts);
        base()
            .timeout_ms(50)
            .retries(1)
            .retry_delay(RetryDelay::Fixed(10))
            .on_timeout(move || {
                timeouts.fetch_add(1, Ordering::SeqCst);
            })
            .on_abort(move || {
                aborts.fetch_add(1, Ordering::SeqCst);
            })
    })
    .expect("config must resolve");

    let outcome = fetch.get("").await.expect("get must run");

    assert_eq!(outcome, Outcome::Failed(FetchError::Timeout));
    assert_eq!(transport.calls(), 2);
    assert_eq!(timeouts.load(Ordering::SeqCst), 2);
    assert_eq!(aborts.load(Ordering::SeqCst), 2);
    let error = fetch.error().expect("timeout must surface");
    assert_eq!(error.name(), "AbortError");
    assert_eq!(error.message(), "Timeout Error");
}

#[tokio::test]
async fn newer_request_supersedes_in_flight_one() {
    let transport = MockTransport::new(vec![
        Step::slow(json!(["stale"]), Duration::from_secs(1)),
        Step::slow(json!(["fresh"]), Duration::from_millis(10)),
    ]);
    let aborts = counter();
    let fetch = Fetch::new(Arc::clone(&transport), {
        let aborts = Arc::clone(&aborts);
        base().on_abort(move || {
            aborts.fetch_add(1, Ordering::SeqCst);
        })
    })
    .expect("config must resolve");

    let first = tokio::spawn({
        let fetch = fetch.clone();
        async move { fetch.get("/a").await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;
    let second = fetch.get("/b").await.expect("get must run");

    let first = first.await.expect("task must join").expect("get must run");
    assert_eq!(first, Outcome::Superseded);
    assert_eq!(second, Outcome::Success(json!(["fresh"])));
    assert_eq!(fetch.data(), json!(["fresh"]));
    assert_eq!(fetch.aborted_count(), 1);
    assert_eq!(aborts.load(Ordering::SeqCst), 1);
    assert!(!fetch.loading());
}

#[tokio::test]
async fn abort_during_retry_wait_settles_without_error() {
    let transport = MockTransport::new(vec![Step::Fail(connect_error())]);
    let fetch = Fetch::new(
        Arc::clone(&transport),
        base().retries(3).retry_delay(RetryDelay::Fixed(10_000)),
    )
    .expect("config must resolve");

    let pending = tokio::spawn({
        let fetch = fetch.clone();
        async move { fetch.get("").await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    fetch.abort();

    let outcome = pending.await.expect("task must join").expect("get must run");
    assert_eq!(outcome, Outcome::Aborted);
    assert_eq!(transport.calls(), 1);
    let snapshot = fetch.snapshot();
    assert!(snapshot.error.is_none());
    assert!(!snapshot.loading);
    assert_eq!(snapshot.settled, Some(Settled::Aborted));
}

#[tokio::test]
async fn error_is_cleared_when_next_cycle_starts() {
    let transport = MockTransport::new(vec![Step::status(500), Step::ok(json!([1]))]);
    let fetch = Fetch::new(Arc::clone(&transport), base()).expect("config must resolve");

    let failed = fetch.get("").await.expect("get must run");
    assert!(matches!(failed, Outcome::Failed(FetchError::Http { status: 500, .. })));
    assert_eq!(fetch.error().map(|err| err.name()), Some("500".to_owned()));

    let mut updates = fetch.subscribe();
    let ok = fetch.get("").await.expect("get must run");
    assert_eq!(ok, Outcome::Success(json!([1])));
    assert!(fetch.error().is_none());
    assert!(updates.has_changed().expect("sender must be alive"));
    assert!(updates.borrow_and_update().error.is_none());
}

#[tokio::test]
async fn seed_data_survives_failures_and_empty_responses() {
    let transport = MockTransport::new(vec![Step::Fail(connect_error()), Step::ok(Value::Null)]);
    let fetch = Fetch::new(Arc::clone(&transport), base().data(json!([])).loading(true))
        .expect("config must resolve");
    assert!(fetch.loading());

    fetch.get("").await.expect("get must run");
    assert_eq!(fetch.data(), json!([]));

    let outcome = fetch.get("").await.expect("get must run");
    assert_eq!(outcome, Outcome::Success(json!([])));
    assert_eq!(fetch.data(), json!([]));
}

#[tokio::test]
async fn request_interceptor_failure_is_retried() {
    let transport = MockTransport::new(vec![Step::ok(json!(["ok"]))]);
    let attempts = counter();
    let fetch = Fetch::new(Arc::clone(&transport), {
        let attempts = Arc::clone(&attempts);
        base()
            .retries(1)
            .retry_delay(RetryDelay::Fixed(10))
            .interceptors(Interceptors::new().request(move |mut init, ctx| {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(FetchError::interceptor("token not ready"));
                }
                assert_eq!(ctx.route, "/me");
                init.headers.insert("x-attempt", "2".parse().expect("valid header value"));
                Ok(init)
            }))
    })
    .expect("config must resolve");

    let outcome = fetch.get("/me").await.expect("get must run");

    assert_eq!(outcome, Outcome::Success(json!(["ok"])));
    assert_eq!(transport.calls(), 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn response_interceptor_reshapes_data() {
    let transport = MockTransport::new(vec![Step::ok(json!({"items": [1, 2]}))]);
    let fetch = Fetch::new(
        Arc::clone(&transport),
        base().interceptors(Interceptors::new().response(|mut res| {
            assert!(res.ok);
            res.data = res.data["items"].clone();
            Ok(res)
        })),
    )
    .expect("config must resolve");

    let outcome = fetch.get("").await.expect("get must run");

    assert_eq!(outcome, Outcome::Success(json!([1, 2])));
    assert_eq!(fetch.response().map(|res| res.data), Some(json!([1, 2])));
}

#[tokio::test]
async fn cache_only_miss_fails_without_network() {
    let transport = MockTransport::new(vec![]);
    let fetch = Fetch::new(
        Arc::clone(&transport),
        base().cache_policy(CachePolicy::CacheOnly),
    )
    .expect("config must resolve");

    let outcome = fetch.get("").await.expect("get must run");

    assert_eq!(outcome, Outcome::Failed(FetchError::NotCached));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn cache_first_entry_expires_after_cache_life() {
    let transport = MockTransport::new(vec![Step::ok(json!([1])), Step::ok(json!([2]))]);
    let clock = Arc::new(ManualClock::default());
    let fetch = Fetch::builder(Arc::clone(&transport))
        .clock(clock.clone())
        .build(base().cache_life_ms(1_000))
        .expect("config must resolve");

    assert_eq!(fetch.get("").await.expect("get must run"), Outcome::Success(json!([1])));
    clock.advance(999);
    assert_eq!(fetch.get("").await.expect("get must run"), Outcome::Success(json!([1])));
    assert_eq!(transport.calls(), 1);

    clock.advance(1);
    assert_eq!(fetch.get("").await.expect("get must run"), Outcome::Success(json!([2])));
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn no_cache_always_hits_network_and_stores_nothing() {
    let transport = MockTransport::new(vec![Step::ok(json!([1])), Step::ok(json!([2]))]);
    let fetch = Fetch::new(Arc::clone(&transport), base().cache_policy(CachePolicy::NoCache))
        .expect("config must resolve");

    fetch.get("").await.expect("get must run");
    fetch.get("").await.expect("get must run");

    assert_eq!(transport.calls(), 2);
    assert_eq!(fetch.data(), json!([2]));
}

#[tokio::test]
async fn stale_while_revalidate_serves_cache_then_refreshes() {
    let transport = MockTransport::new(vec![Step::ok(json!(["v1"])), Step::ok(json!(["v2"]))]);
    let store = Arc::new(MemoryStore::new());
    let fetch = Fetch::builder(Arc::clone(&transport))
        .store(store.clone())
        .build(base().cache_policy(CachePolicy::StaleWhileRevalidate))
        .expect("config must resolve");

    assert_eq!(fetch.get("").await.expect("get must run"), Outcome::Success(json!(["v1"])));
    assert_eq!(fetch.get("").await.expect("get must run"), Outcome::Success(json!(["v1"])));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(transport.calls(), 2);
    assert_eq!(fetch.data(), json!(["v2"]));
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn shared_store_is_keyed_by_method_url_and_body() {
    let transport = MockTransport::new(vec![
        Step::ok(json!({"id": 1})),
        Step::ok(json!({"id": 2})),
    ]);
    let store = Arc::new(MemoryStore::new());
    let fetch = Fetch::builder(Arc::clone(&transport))
        .store(store.clone())
        .build(base())
        .expect("config must resolve");

    fetch
        .post("", Some(Body::Json(json!({"name": "a"}))))
        .await
        .expect("post must run");
    fetch
        .post("", Some(Body::Json(json!({"name": "b"}))))
        .await
        .expect("post must run");
    fetch
        .post("", Some(Body::Json(json!({"name": "a"}))))
        .await
        .expect("post must run");

    assert_eq!(transport.calls(), 2);
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn pagination_stops_dependency_triggers_after_short_page() {
    let transport = MockTransport::new(vec![
        Step::ok(json!([1, 2])),
        Step::ok(json!([3])),
        Step::ok(json!([4, 5])),
    ]);
    let fetch = Fetch::new(
        Arc::clone(&transport),
        FetchArgs::config(
            base()
                .per_page(2)
                .on_mount(true)
                .cache_policy(CachePolicy::NoCache)
                .on_new_data(append),
        )
        .with_dependencies(vec![json!(1)]),
    )
    .expect("config must resolve");

    assert!(fetch.loading());
    assert!(fetch.mount().await.expect("mount must run").is_some());
    assert!(fetch.mount().await.expect("mount must run").is_none());
    assert_eq!(fetch.data(), json!([1, 2]));
    assert!(fetch.has_more());

    assert!(fetch.update(vec![json!(1)], "").await.expect("update must run").is_none());
    let outcome = fetch.update(vec![json!(2)], "").await.expect("update must run");
    assert_eq!(outcome, Some(Outcome::Success(json!([1, 2, 3]))));
    assert!(!fetch.has_more());

    assert!(fetch.update(vec![json!(3)], "").await.expect("update must run").is_none());
    assert_eq!(transport.calls(), 2);

    fetch.reset_pagination();
    let outcome = fetch.update(vec![json!(4)], "").await.expect("update must run");
    assert_eq!(outcome, Some(Outcome::Success(json!([1, 2, 3, 4, 5]))));
}

#[tokio::test]
async fn cached_pages_are_keyed_by_route_and_short_page_stops_updates() {
    let transport = MockTransport::routed(&[
        ("https://api.test/people", json!([1, 2, 3])),
        ("https://api.test/people?page=2", json!([4])),
        ("https://api.test/people?page=3", json!([5, 6, 7])),
    ]);
    let fetch = Fetch::new(
        Arc::clone(&transport),
        FetchArgs::config(base().per_page(3).on_mount(true).on_new_data(append))
            .with_dependencies(vec![json!(1)]),
    )
    .expect("config must resolve");
    assert_eq!(fetch.config().cache_policy, CachePolicy::CacheFirst);

    fetch.mount().await.expect("mount must run");
    assert_eq!(fetch.data(), json!([1, 2, 3]));
    assert!(fetch.has_more());

    let outcome = fetch
        .update(vec![json!(2)], "?page=2")
        .await
        .expect("update must run");
    assert_eq!(outcome, Some(Outcome::Success(json!([1, 2, 3, 4]))));
    assert!(!fetch.has_more());

    let skipped = fetch
        .update(vec![json!(3)], "?page=3")
        .await
        .expect("update must run");
    assert!(skipped.is_none());
    assert_eq!(fetch.data(), json!([1, 2, 3, 4]));
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn non_ok_status_wins_over_strict_json_decoding() {
    let transport = Arc::new(HtmlErrorTransport);
    let fetch = Fetch::new(
        Arc::clone(&transport),
        base().response_type(ResponseType::Json),
    )
    .expect("config must resolve");

    let outcome = fetch.get("").await.expect("get must run");

    let expected = FetchError::Http {
        status: 503,
        status_text: "Service Unavailable".to_owned(),
    };
    assert_eq!(outcome, Outcome::Failed(expected));
    assert_eq!(fetch.error().map(|err| err.name()), Some("503".to_owned()));
}

#[tokio::test]
async fn strict_json_decoding_still_rejects_ok_non_json_bodies() {
    let fetch = Fetch::new(
        Arc::new(PlainTextTransport),
        base().response_type(ResponseType::Json),
    )
    .expect("config must resolve");

    let outcome = fetch.get("").await.expect("get must run");

    assert!(matches!(outcome, Outcome::Failed(FetchError::Decode(_))));
}

struct HtmlErrorTransport;

impl Transport for HtmlErrorTransport {
    async fn invoke(&self, _url: &str, _init: RequestInit) -> Result<TransportResponse> {
        Ok(TransportResponse::new(503, "<html>down</html>"))
    }
}

struct PlainTextTransport;

impl Transport for PlainTextTransport {
    async fn invoke(&self, _url: &str, _init: RequestInit) -> Result<TransportResponse> {
        Ok(TransportResponse::new(200, "plain words"))
    }
}

#[tokio::test]
async fn update_is_ignored_without_dependency_list() {
    let transport = MockTransport::new(vec![Step::ok(json!([]))]);
    let fetch = Fetch::new(Arc::clone(&transport), base()).expect("config must resolve");

    assert!(fetch.mount().await.expect("mount must run").is_none());
    assert!(fetch.update(vec![json!(1)], "").await.expect("update must run").is_none());
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn configuration_errors_surface_before_any_call() {
    let transport = MockTransport::new(vec![]);
    let missing_url = Fetch::new(Arc::clone(&transport), FetchArgs::new());
    assert!(matches!(missing_url, Err(FetchError::Configuration(_))));

    let negative = Fetch::new(Arc::clone(&transport), base().retries(-1));
    assert!(matches!(negative, Err(FetchError::Configuration(_))));

    let fetch = Fetch::new(Arc::clone(&transport), base()).expect("config must resolve");
    let with_body = fetch
        .send(Method::Get, "", Some(Body::Json(json!({"a": 1}))))
        .await;
    assert!(matches!(with_body, Err(FetchError::Configuration(_))));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn verb_helpers_build_route_urls() {
    let transport = MockTransport::new(vec![
        Step::ok(json!({})),
        Step::ok(json!({})),
        Step::ok(json!({})),
    ]);
    let fetch = Fetch::new(
        Arc::clone(&transport),
        base().cache_policy(CachePolicy::NoCache),
    )
    .expect("config must resolve");

    fetch.get("/1").await.expect("get must run");
    fetch.del("/2", None).await.expect("delete must run");
    fetch
        .mutate("mutation { ping }", json!({}))
        .await
        .expect("mutate must run");

    let urls = transport.urls.lock().expect("urls mutex must not be poisoned").clone();
    assert_eq!(
        urls,
        vec![
            "https://api.test/people/1".to_owned(),
            "https://api.test/people/2".to_owned(),
            "https://api.test/people".to_owned(),
        ]
    );
}

#[tokio::test]
async fn destructure_yields_request_response_loading_error() {
    let transport = MockTransport::new(vec![Step::ok(json!({"a": 1}))]);
    let fetch = Fetch::new(
        Arc::clone(&transport),
        Options::new()
            .url("https://x.test/todos")
            .cache_policy(CachePolicy::NoCache),
    )
    .expect("config must resolve");

    let (request, response, loading, error) = fetch.destructure();
    assert!(response.is_none());
    assert!(!loading);
    assert!(error.is_none());

    request.get("").await.expect("get must run");

    let (_, response, loading, error) = fetch.destructure();
    assert_eq!(response.map(|res| res.data), Some(json!({"a": 1})));
    assert!(!loading);
    assert!(error.is_none());
    assert_eq!(fetch.data(), json!({"a": 1}));
}
