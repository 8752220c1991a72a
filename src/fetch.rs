use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{
    cache::{Cache, CacheStore, Clock, MemoryStore, SystemClock},
    config::{resolve, RequestConfig},
    interceptor::InterceptContext,
    merge::{merge, Pagination},
    request::{prepare, PreparedRequest},
    state::{Phase, Settled, Snapshot},
    Body, CachePolicy, FetchArgs, FetchError, Method, Provider, ResponseEnvelope, ResponseType,
    Result, RetryContext, Transport, TransportResponse,
};

/// How one invocation cycle ended.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// `data` was updated; carries the merged data.
    Success(Value),
    /// `error` was set.
    Failed(FetchError),
    /// Cancelled through [`Fetch::abort`]; no error is surfaced.
    Aborted,
    /// A newer cycle on the same instance took over; nothing was written.
    Superseded,
}

impl Outcome {
    /// Merged data of a successful cycle.
    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Success(data) => Some(data),
            _ => None,
        }
    }

    /// Error of a failed cycle; aborted and superseded cycles carry none.
    pub fn error(&self) -> Option<&FetchError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Builder for a [`Fetch`] instance.
pub struct FetchBuilder<T> {
    transport: T,
    provider: Option<Provider>,
    store: Option<Arc<dyn CacheStore>>,
    clock: Option<Arc<dyn Clock>>,
}

impl<T: Transport> FetchBuilder<T> {
    /// Ambient scope consulted by the resolver.
    pub fn provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Shares a cache store with other instances.
    pub fn store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Time source for cache expiry, [`SystemClock`] by default.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Resolves the configuration and creates the instance.
    ///
    /// Configuration errors surface here, before any network activity.
    pub fn build(self, args: impl Into<FetchArgs>) -> Result<Fetch<T>> {
        let resolved = resolve(self.provider.as_ref(), args.into())?;
        let config = resolved.config;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn CacheStore>);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let cache = Cache::new(store, clock, config.cache_life_ms);
        let (state, _) = watch::channel(Snapshot::initial(
            resolved.initial.data.clone(),
            resolved.initial.loading,
        ));

        Ok(Fetch {
            inner: Arc::new(Inner {
                transport: self.transport,
                pagination: Mutex::new(Pagination::new(config.per_page)),
                lifecycle: Mutex::new(Lifecycle::default()),
                initial_data: resolved.initial.data,
                config,
                cache,
                state,
                cycle: AtomicU64::new(0),
                active: Mutex::new(None),
            }),
        })
    }
}

/// One logical request instance bound to a UI component.
///
/// Cloning is cheap and yields a handle to the same instance. At most one
/// network operation per instance is authoritative at a time: starting a
/// request cancels the previous one, whose late result is discarded.
pub struct Fetch<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Fetch<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Fetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetch")
            .field("config", &self.inner.config)
            .field("snapshot", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}

struct Inner<T> {
    transport: T,
    config: RequestConfig,
    cache: Cache,
    state: watch::Sender<Snapshot>,
    initial_data: Value,
    cycle: AtomicU64,
    active: Mutex<Option<ActiveCycle>>,
    pagination: Mutex<Pagination>,
    lifecycle: Mutex<Lifecycle>,
}

struct ActiveCycle {
    id: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct Lifecycle {
    mounted: bool,
    dependencies: Option<Vec<Value>>,
}

/// Per-cycle retry bookkeeping, discarded when the cycle ends.
struct AttemptContext {
    attempts_remaining: u32,
    retry_index: u32,
    timed_out: bool,
    token: CancellationToken,
}

impl AttemptContext {
    fn new(retries: u32, cycle_token: &CancellationToken) -> Self {
        Self {
            attempts_remaining: retries,
            retry_index: 0,
            timed_out: false,
            token: cycle_token.child_token(),
        }
    }

    fn should_retry(
        &self,
        config: &RequestConfig,
        error: &FetchError,
        response: Option<&TransportResponse>,
    ) -> bool {
        if self.attempts_remaining == 0 || !error.is_retryable() {
            return false;
        }
        config.retry_on.as_ref().map_or(true, |retry_on| {
            retry_on.should_retry(&RetryContext {
                attempt: self.retry_index,
                error,
                response,
            })
        })
    }

    /// Moves to the next attempt with a fresh signal.
    fn advance(&mut self, cycle_token: &CancellationToken) {
        self.attempts_remaining -= 1;
        self.retry_index += 1;
        self.timed_out = false;
        self.token = cycle_token.child_token();
    }
}

enum Failure {
    Error(FetchError, Option<TransportResponse>),
    Stale,
}

impl<T: Transport> Fetch<T> {
    /// Starts a builder for instances that need an ambient [`Provider`], a
    /// shared [`CacheStore`] or a custom [`Clock`].
    ///
    /// # Example
    ///
    /// ```no_run
    /// # fn example() -> fetch_hook::Result<()> {
    /// use fetch_hook::{Fetch, Options, Provider, ReqwestTransport};
    ///
    /// let people = Fetch::builder(ReqwestTransport::new())
    ///     .provider(Provider::new("https://x.test"))
    ///     .build(Options::new().path("/people").retries(2))?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn builder(transport: T) -> FetchBuilder<T> {
        FetchBuilder {
            transport,
            provider: None,
            store: None,
            clock: None,
        }
    }

    /// Creates an instance without an ambient scope and with a private cache.
    pub fn new(transport: T, args: impl Into<FetchArgs>) -> Result<Self> {
        Self::builder(transport).build(args)
    }

    /// Resolved configuration this instance runs with.
    pub fn config(&self) -> &RequestConfig {
        &self.inner.config
    }

    /// Cache view used by this instance; shared when built with
    /// [`FetchBuilder::store`].
    pub fn cache(&self) -> &Cache {
        &self.inner.cache
    }

    /// Current observable record.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.inner.state.subscribe()
    }

    /// Latest merged data, or the seed `data` until a cycle succeeds.
    pub fn data(&self) -> Value {
        self.inner.state.borrow().data.clone()
    }

    /// True from the start of a cycle until it settles, across retries.
    pub fn loading(&self) -> bool {
        self.inner.state.borrow().loading
    }

    /// Terminal error of the last cycle; cleared when a new cycle starts.
    pub fn error(&self) -> Option<FetchError> {
        self.inner.state.borrow().error.clone()
    }

    /// Envelope of the last successful response, `data` already merged.
    pub fn response(&self) -> Option<ResponseEnvelope> {
        self.inner.state.borrow().response.clone()
    }

    /// Cycles cancelled so far by supersession or [`Fetch::abort`].
    pub fn aborted_count(&self) -> usize {
        self.inner.state.borrow().aborted_count
    }

    /// Positional view `(request, response, loading, error)` taken from a
    /// single snapshot.
    pub fn destructure(&self) -> (&Self, Option<ResponseEnvelope>, bool, Option<FetchError>) {
        let state = self.inner.state.borrow();
        (self, state.response.clone(), state.loading, state.error.clone())
    }

    /// Runs a GET cycle for `url + path + route`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # async fn example() -> fetch_hook::Result<()> {
    /// use fetch_hook::{Fetch, ReqwestTransport};
    ///
    /// let todos = Fetch::new(ReqwestTransport::new(), "https://x.test/todos")?;
    /// todos.get("?page=2").await?;
    /// println!("{}", todos.data());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get(&self, route: &str) -> Result<Outcome> {
        self.send(Method::Get, route, None).await
    }

    /// Runs a POST cycle; `body` replaces the configured body when present.
    pub async fn post(&self, route: &str, body: Option<Body>) -> Result<Outcome> {
        self.send(Method::Post, route, body).await
    }

    /// Runs a PUT cycle; `body` replaces the configured body when present.
    pub async fn put(&self, route: &str, body: Option<Body>) -> Result<Outcome> {
        self.send(Method::Put, route, body).await
    }

    /// Runs a PATCH cycle; `body` replaces the configured body when present.
    pub async fn patch(&self, route: &str, body: Option<Body>) -> Result<Outcome> {
        self.send(Method::Patch, route, body).await
    }

    /// Runs a DELETE cycle; `body` replaces the configured body when present.
    pub async fn delete(&self, route: &str, body: Option<Body>) -> Result<Outcome> {
        self.send(Method::Delete, route, body).await
    }

    /// Alias of [`Fetch::delete`].
    pub async fn del(&self, route: &str, body: Option<Body>) -> Result<Outcome> {
        self.delete(route, body).await
    }

    /// POSTs a GraphQL query as `{query, variables}`.
    pub async fn query(&self, query: &str, variables: Value) -> Result<Outcome> {
        let body = json!({ "query": query, "variables": variables });
        self.post("", Some(Body::Json(body))).await
    }

    /// POSTs a GraphQL mutation as `{mutation, variables}`.
    pub async fn mutate(&self, mutation: &str, variables: Value) -> Result<Outcome> {
        let body = json!({ "mutation": mutation, "variables": variables });
        self.post("", Some(Body::Json(body))).await
    }

    /// Cancels the in-flight cycle, if any. The cycle settles as
    /// [`Outcome::Aborted`] without setting `error`.
    pub fn abort(&self) {
        let token = {
            let active = self.inner.active.lock();
            active.as_ref().map(|cycle| cycle.token.clone())
        };
        if let Some(token) = token.filter(|token| !token.is_cancelled()) {
            self.inner.state.send_modify(|s| s.aborted_count += 1);
            self.signal_abort(&token);
        }
    }

    /// Whether automatic triggers may still fetch further pages.
    pub fn has_more(&self) -> bool {
        self.inner.pagination.lock().has_more()
    }

    /// Re-enables automatic triggers after a short page.
    pub fn reset_pagination(&self) {
        self.inner.pagination.lock().reset();
    }

    /// Mount signal from the UI binding.
    ///
    /// Runs the configured request (no route) once, the first time the
    /// instance becomes active, when `on_mount` is set. Returns `None` when
    /// nothing ran.
    pub async fn mount(&self) -> Result<Option<Outcome>> {
        let fire = {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.mounted {
                false
            } else {
                lifecycle.mounted = true;
                lifecycle.dependencies = self.inner.config.dependencies.clone();
                self.inner.config.on_mount
            }
        };
        if !fire {
            return Ok(None);
        }
        self.send(self.inner.config.method, "", None)
            .await
            .map(Some)
    }

    /// Dependency-change signal from the UI binding.
    ///
    /// Runs the configured method against `url + path + route` once per
    /// change of the dependency list after mount. The route is what moves a
    /// paginated instance to its next page, so every page gets its own cache
    /// identity. Ignored for instances created without a dependency list,
    /// before mount, and after pagination reported the last page.
    pub async fn update(&self, dependencies: Vec<Value>, route: &str) -> Result<Option<Outcome>> {
        if self
            .inner
            .config
            .dependencies
            .as_ref()
            .map_or(true, Vec::is_empty)
        {
            return Ok(None);
        }
        let fire = {
            let mut lifecycle = self.inner.lifecycle.lock();
            if !lifecycle.mounted || lifecycle.dependencies.as_ref() == Some(&dependencies) {
                false
            } else {
                lifecycle.dependencies = Some(dependencies);
                true
            }
        };
        if !fire {
            return Ok(None);
        }
        if !self.has_more() {
            #[cfg(feature = "tracing")]
            tracing::debug!(url = %self.inner.config.url, "no more pages, skipping update");
            return Ok(None);
        }
        self.send(self.inner.config.method, route, None)
            .await
            .map(Some)
    }

    /// Runs one cycle: `route` is appended to `url + path`, `body` replaces
    /// the configured body.
    ///
    /// Only configuration errors are returned as `Err`; every runtime failure
    /// is settled into the observable state and reported as an [`Outcome`].
    pub async fn send(&self, method: Method, route: &str, body: Option<Body>) -> Result<Outcome> {
        let prepared = prepare(&self.inner.config, method, route, body)?;
        let (id, cycle_token, base) = self.begin_cycle();

        #[cfg(feature = "tracing")]
        tracing::debug!(cycle = id, %method, url = %prepared.url, "request cycle started");

        let (outcome, revalidate) = self.run_cycle(id, &cycle_token, &prepared, &base).await;
        self.finish_cycle(id, &outcome, revalidate);

        if revalidate {
            self.spawn_revalidation(id, cycle_token, prepared, base);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(cycle = id, outcome = ?outcome, "request cycle settled");

        Ok(outcome)
    }

    fn begin_cycle(&self) -> (u64, CancellationToken, Value) {
        let token = CancellationToken::new();
        let (id, previous, base) = {
            let mut active = self.inner.active.lock();
            let id = self.inner.cycle.fetch_add(1, Ordering::SeqCst) + 1;
            let previous = active.replace(ActiveCycle {
                id,
                token: token.clone(),
            });
            let superseding = previous.is_some();
            self.inner.state.send_modify(|s| {
                if superseding {
                    s.aborted_count += 1;
                }
                s.loading = true;
                s.error = None;
                s.phase = Phase::Requesting;
            });
            let base = self.inner.state.borrow().data.clone();
            (id, previous, base)
        };

        if let Some(previous) = previous {
            #[cfg(feature = "tracing")]
            tracing::debug!(cycle = previous.id, by = id, "superseding in-flight cycle");
            self.signal_abort(&previous.token);
        }
        (id, token, base)
    }

    fn finish_cycle(&self, id: u64, outcome: &Outcome, keep_token: bool) {
        let mut active = self.inner.active.lock();
        if !keep_token && active.as_ref().is_some_and(|cycle| cycle.id == id) {
            *active = None;
        }
        if self.inner.cycle.load(Ordering::SeqCst) != id {
            return;
        }
        let settled = match outcome {
            Outcome::Success(_) => Settled::Success,
            Outcome::Failed(_) => Settled::Failed,
            Outcome::Aborted => Settled::Aborted,
            Outcome::Superseded => return,
        };
        self.inner.state.send_modify(|s| {
            s.loading = false;
            s.phase = Phase::Idle;
            s.settled = Some(settled);
        });
    }

    fn is_current(&self, id: u64) -> bool {
        self.inner.cycle.load(Ordering::SeqCst) == id
    }

    /// Applies `f` only while `id` is still the authoritative cycle.
    fn update_if_current(&self, id: u64, f: impl FnOnce(&mut Snapshot)) -> bool {
        let _active = self.inner.active.lock();
        if !self.is_current(id) {
            return false;
        }
        self.inner.state.send_modify(f);
        true
    }

    fn signal_abort(&self, token: &CancellationToken) {
        token.cancel();
        if let Some(on_abort) = &self.inner.config.on_abort {
            on_abort();
        }
    }

    async fn run_cycle(
        &self,
        id: u64,
        cycle_token: &CancellationToken,
        prepared: &PreparedRequest,
        base: &Value,
    ) -> (Outcome, bool) {
        let config = &self.inner.config;
        let key = prepared.identity.as_str();

        if config.cache_policy.reads_cache() {
            match self.inner.cache.get(key) {
                Some(cached) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(cycle = id, key, "cache hit");

                    let revalidate = config.cache_policy == CachePolicy::StaleWhileRevalidate;
                    return match self.settle(id, base, &cached, true) {
                        Ok(Some(data)) => (Outcome::Success(data), revalidate),
                        Ok(None) => (Outcome::Superseded, false),
                        Err(err) => (self.fail(id, err), false),
                    };
                }
                None if config.cache_policy == CachePolicy::CacheOnly => {
                    return (self.fail(id, FetchError::NotCached), false);
                }
                None => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(cycle = id, key, "cache miss");
                }
            }
        }

        let mut attempt = AttemptContext::new(config.retries, cycle_token);
        loop {
            let failure = match self.attempt(&mut attempt, prepared).await {
                _ if !self.is_current(id) => Failure::Stale,
                Ok(response) => match self.settle(id, base, &response, true) {
                    Ok(Some(data)) => {
                        if config.cache_policy.writes_cache() {
                            self.inner.cache.set(key, response);
                        }
                        return (Outcome::Success(data), false);
                    }
                    Ok(None) => Failure::Stale,
                    Err(err) => Failure::Error(err, Some(response)),
                },
                Err(err) => Failure::Error(err, None),
            };

            let (error, response) = match failure {
                Failure::Stale => return (Outcome::Superseded, false),
                Failure::Error(FetchError::Aborted, _) if !attempt.timed_out => {
                    return (Outcome::Aborted, false)
                }
                Failure::Error(_, response) if attempt.timed_out => (FetchError::Timeout, response),
                Failure::Error(error, response) => (error, response),
            };

            if !attempt.should_retry(config, &error, response.as_ref()) {
                return (self.fail(id, error), false);
            }

            let delay = config.retry_delay.delay_for_attempt(attempt.retry_index);
            #[cfg(feature = "tracing")]
            tracing::debug!(
                cycle = id,
                error = %error,
                remaining = attempt.attempts_remaining,
                "retrying request after {} ms",
                delay.as_millis()
            );

            attempt.advance(cycle_token);
            self.update_if_current(id, |s| s.phase = Phase::Retrying);
            tokio::select! {
                () = cycle_token.cancelled() => {
                    return if self.is_current(id) {
                        (Outcome::Aborted, false)
                    } else {
                        (Outcome::Superseded, false)
                    };
                }
                () = sleep(delay) => {}
            }
            self.update_if_current(id, |s| s.phase = Phase::Requesting);
        }
    }

    /// One transport call, raced against the timeout timer.
    async fn attempt(
        &self,
        attempt: &mut AttemptContext,
        prepared: &PreparedRequest,
    ) -> Result<TransportResponse> {
        let config = &self.inner.config;
        let ctx = InterceptContext {
            url: &config.url,
            path: &config.path,
            route: &prepared.route,
        };
        let init = config
            .interceptors
            .intercept_request(prepared.init_for_attempt(attempt.token.clone()), &ctx)?;

        let call = self.inner.transport.invoke(&prepared.url, init);
        if config.timeout_ms == 0 {
            return call.await;
        }

        tokio::pin!(call);
        tokio::select! {
            result = &mut call => result,
            () = sleep(Duration::from_millis(config.timeout_ms)) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(url = %prepared.url, timeout_ms = config.timeout_ms, "request timed out");

                attempt.timed_out = true;
                self.signal_abort(&attempt.token);
                if let Some(on_timeout) = &config.on_timeout {
                    on_timeout();
                }
                call.await
            }
        }
    }

    /// Decodes, intercepts and merges a response, then publishes it.
    ///
    /// Returns `Ok(None)` when the cycle was superseded before publishing.
    fn settle(
        &self,
        id: u64,
        base: &Value,
        response: &TransportResponse,
        paginate: bool,
    ) -> Result<Option<Value>> {
        let config = &self.inner.config;
        // Error pages are often not JSON; their status must win over decoding.
        let response_type = if response.ok() {
            config.response_type
        } else {
            ResponseType::Auto
        };
        let data = response.data(response_type)?;
        let envelope = config
            .interceptors
            .intercept_response(ResponseEnvelope::new(response, data))?;
        if !envelope.ok {
            return Err(FetchError::Http {
                status: envelope.status,
                status_text: envelope.status_text,
            });
        }

        let fresh = if is_empty(&envelope.data) && !self.inner.initial_data.is_null() {
            self.inner.initial_data.clone()
        } else {
            envelope.data.clone()
        };
        let merged = merge(config.on_new_data.as_ref(), base, fresh);

        let published = self.update_if_current(id, |s| {
            s.data = merged.clone();
            s.response = Some(ResponseEnvelope {
                data: merged.clone(),
                ..envelope
            });
            s.error = None;
        });
        if !published {
            return Ok(None);
        }
        if paginate {
            self.inner.pagination.lock().observe(base, &merged);
        }
        Ok(Some(merged))
    }

    fn fail(&self, id: u64, error: FetchError) -> Outcome {
        if !self.update_if_current(id, |s| s.error = Some(error.clone())) {
            return Outcome::Superseded;
        }

        #[cfg(feature = "tracing")]
        tracing::warn!(cycle = id, error = %error, "request cycle failed");

        if let Some(on_error) = &self.inner.config.on_error {
            on_error(&error);
        }
        Outcome::Failed(error)
    }

    /// Refreshes a stale-while-revalidate hit in the background.
    ///
    /// The fresh response always replaces the cache record; it replaces
    /// `data` only while the cycle that served the cached copy is still the
    /// latest one.
    fn spawn_revalidation(
        &self,
        id: u64,
        cycle_token: CancellationToken,
        prepared: PreparedRequest,
        base: Value,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut attempt = AttemptContext::new(0, &cycle_token);
            match this.attempt(&mut attempt, &prepared).await {
                Ok(response) if response.ok() => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(cycle = id, url = %prepared.url, "revalidated cached response");

                    this.inner
                        .cache
                        .set(prepared.identity.as_str(), response.clone());
                    if let Err(_err) = this.settle(id, &base, &response, false) {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(cycle = id, error = %_err, "revalidated response rejected");
                    }
                }
                Ok(_) | Err(_) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(cycle = id, url = %prepared.url, "revalidation failed");
                }
            }

            let mut active = this.inner.active.lock();
            if active.as_ref().is_some_and(|cycle| cycle.id == id) {
                *active = None;
            }
        });
    }
}

fn is_empty(data: &Value) -> bool {
    match data {
        Value::Null => true,
        Value::String(text) => text.is_empty(),
        _ => false,
    }
}
