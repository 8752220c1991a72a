use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{merge::MergeFn, FetchError, Interceptors, Result, TransportResponse};

/// HTTP verb of a request.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Head,
    Options,
    Delete,
    Patch,
    Post,
    Put,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Post => "POST",
            Self::Put => "PUT",
        }
    }

    /// Methods that get `Content-Type: application/json` unless told otherwise.
    pub fn defaults_to_json(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch | Self::Delete)
    }

    /// GET and HEAD never carry a body.
    pub fn allows_body(self) -> bool {
        !matches!(self, Self::Get | Self::Head)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            "DELETE" => Ok(Self::Delete),
            "PATCH" => Ok(Self::Patch),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            other => Err(FetchError::configuration(format!(
                "unsupported HTTP method '{other}'"
            ))),
        }
    }
}

/// Rule governing cache reads and writes around a network call.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CachePolicy {
    #[default]
    CacheFirst,
    NetworkOnly,
    CacheOnly,
    NoCache,
    StaleWhileRevalidate,
}

impl CachePolicy {
    pub fn reads_cache(self) -> bool {
        matches!(
            self,
            Self::CacheFirst | Self::CacheOnly | Self::StaleWhileRevalidate
        )
    }

    pub fn writes_cache(self) -> bool {
        !matches!(self, Self::NoCache | Self::CacheOnly)
    }
}

/// How a response body is turned into `data`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    /// Structured JSON, falling back to raw text.
    #[default]
    Auto,
    Json,
    Text,
}

/// Request payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    /// Serialized as JSON.
    Json(Value),
    Text(String),
    /// Opaque binary payload; never gets a default `Content-Type`.
    Bytes(Vec<u8>),
    /// Multipart form fields; never gets a default `Content-Type`.
    Form(Vec<(String, String)>),
}

impl Body {
    pub fn json(value: impl Serialize) -> Result<Self> {
        serde_json::to_value(value)
            .map(Self::Json)
            .map_err(|err| FetchError::configuration(format!("body is not serializable: {err}")))
    }

    pub fn is_binary_or_multipart(&self) -> bool {
        matches!(self, Self::Bytes(_) | Self::Form(_))
    }

    /// Stable textual form used for request identity.
    pub fn normalized(&self) -> String {
        match self {
            Self::Json(value) => value.to_string(),
            Self::Text(text) => text.clone(),
            Self::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            Self::Form(fields) => fields
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("&"),
        }
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

/// Delay between retry attempts.
#[derive(Clone)]
pub enum RetryDelay {
    /// Constant delay in milliseconds.
    Fixed(i64),
    /// Delay computed from the zero-based retry index, in milliseconds.
    Computed(Arc<dyn Fn(u32) -> u64 + Send + Sync>),
}

impl RetryDelay {
    pub fn computed(f: impl Fn(u32) -> u64 + Send + Sync + 'static) -> Self {
        Self::Computed(Arc::new(f))
    }

    /// Resolves the delay before retry number `attempt` (zero-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed(ms) => Duration::from_millis(u64::try_from(*ms).unwrap_or(0)),
            Self::Computed(f) => Duration::from_millis(f(attempt)),
        }
    }
}

impl Default for RetryDelay {
    fn default() -> Self {
        Self::Fixed(1000)
    }
}

impl fmt::Debug for RetryDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(ms) => f.debug_tuple("Fixed").field(ms).finish(),
            Self::Computed(_) => f.write_str("Computed(<fn>)"),
        }
    }
}

/// What a retry decision can look at.
#[derive(Debug)]
pub struct RetryContext<'a> {
    /// Zero-based index of the retry being considered.
    pub attempt: u32,
    pub error: &'a FetchError,
    /// Present when the transport answered with a non-ok response.
    pub response: Option<&'a TransportResponse>,
}

/// Which failures are worth another attempt.
#[derive(Clone)]
pub enum RetryOn {
    /// Retry only when the response status is one of these codes.
    Statuses(Vec<i64>),
    /// Retry when the predicate returns true.
    When(Arc<dyn Fn(&RetryContext<'_>) -> bool + Send + Sync>),
}

impl RetryOn {
    pub fn when(f: impl Fn(&RetryContext<'_>) -> bool + Send + Sync + 'static) -> Self {
        Self::When(Arc::new(f))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if let Self::Statuses(codes) = self {
            if let Some(bad) = codes
                .iter()
                .find(|code| **code <= 0 || **code > i64::from(u16::MAX))
            {
                return Err(FetchError::configuration(format!(
                    "`retry_on` must only contain positive status codes, got {bad}"
                )));
            }
        }
        Ok(())
    }

    pub fn should_retry(&self, ctx: &RetryContext<'_>) -> bool {
        match self {
            Self::Statuses(codes) => ctx
                .response
                .is_some_and(|response| codes.contains(&i64::from(response.status))),
            Self::When(predicate) => predicate(ctx),
        }
    }
}

impl fmt::Debug for RetryOn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Statuses(codes) => f.debug_tuple("Statuses").field(codes).finish(),
            Self::When(_) => f.write_str("When(<fn>)"),
        }
    }
}

pub type Callback = Arc<dyn Fn() + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&FetchError) + Send + Sync>;

/// One configuration layer.
///
/// Every field is optional; a layer only says something about the fields it
/// sets. Call-site layers win over the ambient [`Provider`] layer, which wins
/// over built-in defaults.
#[derive(Clone, Default)]
pub struct Options {
    pub url: Option<String>,
    pub path: Option<String>,
    pub method: Option<Method>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Body>,
    pub credentials: Option<String>,
    pub mode: Option<String>,
    pub redirect: Option<String>,
    pub referrer: Option<String>,
    pub cache_mode: Option<String>,
    pub integrity: Option<String>,
    pub keepalive: Option<bool>,
    pub timeout_ms: Option<i64>,
    pub retries: Option<i64>,
    pub retry_delay: Option<RetryDelay>,
    pub retry_on: Option<RetryOn>,
    pub cache_policy: Option<CachePolicy>,
    pub cache_life_ms: Option<i64>,
    pub per_page: Option<i64>,
    pub response_type: Option<ResponseType>,
    pub interceptors: Interceptors,
    pub on_abort: Option<Callback>,
    pub on_timeout: Option<Callback>,
    pub on_error: Option<ErrorCallback>,
    pub on_new_data: Option<MergeFn>,
    pub on_mount: Option<bool>,
    pub on_update: Option<Vec<Value>>,
    pub data: Option<Value>,
    pub loading: Option<bool>,
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("url", &self.url)
            .field("path", &self.path)
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("timeout_ms", &self.timeout_ms)
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .field("retry_on", &self.retry_on)
            .field("cache_policy", &self.cache_policy)
            .field("cache_life_ms", &self.cache_life_ms)
            .field("per_page", &self.per_page)
            .field("interceptors", &self.interceptors)
            .finish_non_exhaustive()
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Sets a header, replacing any earlier value in this layer (case-insensitive).
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    /// Drops a header from this layer; meant for overwrite functions.
    pub fn remove_header(&mut self, name: &str) {
        self.headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn credentials(mut self, credentials: impl Into<String>) -> Self {
        self.credentials = Some(credentials.into());
        self
    }

    #[must_use]
    pub fn mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    #[must_use]
    pub fn redirect(mut self, redirect: impl Into<String>) -> Self {
        self.redirect = Some(redirect.into());
        self
    }

    #[must_use]
    pub fn referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }

    #[must_use]
    pub fn cache_mode(mut self, cache_mode: impl Into<String>) -> Self {
        self.cache_mode = Some(cache_mode.into());
        self
    }

    #[must_use]
    pub fn integrity(mut self, integrity: impl Into<String>) -> Self {
        self.integrity = Some(integrity.into());
        self
    }

    #[must_use]
    pub fn keepalive(mut self, keepalive: bool) -> Self {
        self.keepalive = Some(keepalive);
        self
    }

    #[must_use]
    pub fn timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    #[must_use]
    pub fn retries(mut self, retries: i64) -> Self {
        self.retries = Some(retries);
        self
    }

    #[must_use]
    pub fn retry_delay(mut self, retry_delay: RetryDelay) -> Self {
        self.retry_delay = Some(retry_delay);
        self
    }

    #[must_use]
    pub fn retry_on(mut self, retry_on: RetryOn) -> Self {
        self.retry_on = Some(retry_on);
        self
    }

    #[must_use]
    pub fn cache_policy(mut self, cache_policy: CachePolicy) -> Self {
        self.cache_policy = Some(cache_policy);
        self
    }

    #[must_use]
    pub fn cache_life_ms(mut self, cache_life_ms: i64) -> Self {
        self.cache_life_ms = Some(cache_life_ms);
        self
    }

    #[must_use]
    pub fn per_page(mut self, per_page: i64) -> Self {
        self.per_page = Some(per_page);
        self
    }

    #[must_use]
    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = Some(response_type);
        self
    }

    #[must_use]
    pub fn interceptors(mut self, interceptors: Interceptors) -> Self {
        self.interceptors = interceptors;
        self
    }

    #[must_use]
    pub fn on_abort(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_abort = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_timeout(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_timeout = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_error(mut self, f: impl Fn(&FetchError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_new_data(mut self, f: impl Fn(&Value, Value) -> Value + Send + Sync + 'static) -> Self {
        self.on_new_data = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_mount(mut self, on_mount: bool) -> Self {
        self.on_mount = Some(on_mount);
        self
    }

    #[must_use]
    pub fn on_update(mut self, dependencies: Vec<Value>) -> Self {
        self.on_update = Some(dependencies);
        self
    }

    #[must_use]
    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn loading(mut self, loading: bool) -> Self {
        self.loading = Some(loading);
        self
    }
}

/// Ambient scope shared by many request instances.
///
/// The resolver reads it but never mutates it; an overwrite function receives
/// a copy of [`Provider::options`] and its result replaces the ambient layer
/// for that one instance only.
#[derive(Clone, Debug, Default)]
pub struct Provider {
    pub url: Option<String>,
    pub options: Options,
}

impl Provider {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            options: Options::default(),
        }
    }

    /// Applies ambient options shared by every instance under this provider.
    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Loads an ambient scope from a JSON document.
    ///
    /// Only plain-data options can be expressed this way; callbacks and
    /// interceptors have to be attached in code.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: ProviderFile = serde_json::from_str(json)
            .map_err(|err| FetchError::configuration(format!("invalid provider JSON: {err}")))?;
        Ok(file.into())
    }

    /// Creates an ambient scope from environment variables.
    ///
    /// Reads `FETCH_HOOK_URL`; returns an error if it is missing or empty.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("FETCH_HOOK_URL").map_err(|_| {
            FetchError::configuration("missing FETCH_HOOK_URL environment variable")
        })?;
        if url.trim().is_empty() {
            return Err(FetchError::configuration("FETCH_HOOK_URL is set but empty"));
        }
        Ok(Self::new(url.trim()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProviderFile {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    options: PlainOptions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PlainOptions {
    path: Option<String>,
    method: Option<Method>,
    headers: BTreeMap<String, String>,
    body: Option<Value>,
    credentials: Option<String>,
    mode: Option<String>,
    redirect: Option<String>,
    referrer: Option<String>,
    cache_mode: Option<String>,
    integrity: Option<String>,
    keepalive: Option<bool>,
    timeout_ms: Option<i64>,
    retries: Option<i64>,
    retry_delay_ms: Option<i64>,
    retry_on: Option<Vec<i64>>,
    cache_policy: Option<CachePolicy>,
    cache_life_ms: Option<i64>,
    per_page: Option<i64>,
    response_type: Option<ResponseType>,
}

impl From<ProviderFile> for Provider {
    fn from(file: ProviderFile) -> Self {
        let plain = file.options;
        let options = Options {
            path: plain.path,
            method: plain.method,
            headers: plain.headers.into_iter().collect(),
            body: plain.body.map(Body::Json),
            credentials: plain.credentials,
            mode: plain.mode,
            redirect: plain.redirect,
            referrer: plain.referrer,
            cache_mode: plain.cache_mode,
            integrity: plain.integrity,
            keepalive: plain.keepalive,
            timeout_ms: plain.timeout_ms,
            retries: plain.retries,
            retry_delay: plain.retry_delay_ms.map(RetryDelay::Fixed),
            retry_on: plain.retry_on.map(RetryOn::Statuses),
            cache_policy: plain.cache_policy,
            cache_life_ms: plain.cache_life_ms,
            per_page: plain.per_page,
            response_type: plain.response_type,
            ..Options::default()
        };
        Self {
            url: file.url,
            options,
        }
    }
}
