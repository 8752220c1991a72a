//! Configuration resolution.
//!
//! Each field of the final [`RequestConfig`] comes from the first layer that
//! sets it: call site, then ambient scope, then the built-in default.

use std::fmt;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde_json::Value;

use crate::{
    args::{FetchArgs, Overwrite, SecondArg, UrlArg},
    merge::MergeFn,
    options::{Callback, ErrorCallback},
    Body, CachePolicy, FetchError, Interceptors, Method, Options, Provider, ResponseType, Result,
    RetryDelay, RetryOn,
};

const DEFAULT_RETRY_DELAY_MS: i64 = 1000;

/// Canonical, validated configuration of one request instance.
#[derive(Clone)]
pub struct RequestConfig {
    pub url: String,
    pub path: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Body>,
    pub credentials: Option<String>,
    pub mode: Option<String>,
    pub redirect: Option<String>,
    pub referrer: Option<String>,
    pub cache_mode: Option<String>,
    pub integrity: Option<String>,
    pub keepalive: Option<bool>,
    /// `0` disables the timer.
    pub timeout_ms: u64,
    pub retries: u32,
    pub retry_delay: RetryDelay,
    pub retry_on: Option<RetryOn>,
    pub cache_policy: CachePolicy,
    /// `0` means cached responses never go stale.
    pub cache_life_ms: u64,
    /// `0` disables the pagination cutoff.
    pub per_page: u32,
    pub response_type: ResponseType,
    pub interceptors: Interceptors,
    pub on_abort: Option<Callback>,
    pub on_timeout: Option<Callback>,
    pub on_error: Option<ErrorCallback>,
    pub on_new_data: Option<MergeFn>,
    pub on_mount: bool,
    pub dependencies: Option<Vec<Value>>,
    /// Whether some layer set `Content-Type` itself.
    pub(crate) explicit_content_type: bool,
}

impl fmt::Debug for RequestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestConfig")
            .field("url", &self.url)
            .field("path", &self.path)
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("timeout_ms", &self.timeout_ms)
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .field("retry_on", &self.retry_on)
            .field("cache_policy", &self.cache_policy)
            .field("cache_life_ms", &self.cache_life_ms)
            .field("per_page", &self.per_page)
            .field("on_mount", &self.on_mount)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// Initial observable values before any request runs.
#[derive(Clone, Debug, PartialEq)]
pub struct InitialState {
    pub data: Value,
    pub loading: bool,
}

#[derive(Clone, Debug)]
pub struct Resolved {
    pub config: RequestConfig,
    pub initial: InitialState,
}

/// Resolves call-site arguments against an optional ambient scope.
///
/// Fails before any network activity when the arguments are ambiguous, no
/// URL can be found, or a numeric/retry field is out of range.
pub fn resolve(ambient: Option<&Provider>, args: FetchArgs) -> Result<Resolved> {
    let FetchArgs {
        first,
        second,
        dependencies,
    } = args;

    let (url_arg, call_site, first_overwrite) = match first {
        Some(UrlArg::Url(url)) => (Some(url), None, None),
        Some(UrlArg::Config(options)) => (None, Some(options), None),
        Some(UrlArg::Overwrite(f)) => (None, None, Some(f)),
        None => (None, None, None),
    };

    let mut second_overwrite: Option<Overwrite> = None;
    let mut second_dependencies = None;
    let call_site = match second {
        Some(SecondArg::Options(options)) => {
            if call_site.is_some() {
                return Err(FetchError::configuration(
                    "cannot pass a second options argument when the first argument is a config",
                ));
            }
            if options.url.is_some() {
                return Err(FetchError::configuration(
                    "the second argument cannot carry a url; pass it as the first argument",
                ));
            }
            Some(options)
        }
        Some(SecondArg::Overwrite(f)) => {
            second_overwrite = Some(f);
            call_site
        }
        Some(SecondArg::Dependencies(deps)) => {
            second_dependencies = Some(deps);
            call_site
        }
        None => call_site,
    }
    .unwrap_or_default();

    let overwrite = match (first_overwrite, second_overwrite) {
        (Some(_), Some(_)) => {
            return Err(FetchError::configuration(
                "only one argument may overwrite the ambient options",
            ))
        }
        (first, second) => first.or(second),
    };

    let provider_url = ambient.and_then(|provider| provider.url.clone());
    let ambient = {
        let base = ambient
            .map(|provider| provider.options.clone())
            .unwrap_or_default();
        match overwrite {
            Some(f) => f(base),
            None => base,
        }
    };

    let url = url_arg
        .filter(|url| !url.is_empty())
        .or_else(|| call_site.url.clone().filter(|url| !url.is_empty()))
        .or_else(|| ambient.url.clone().filter(|url| !url.is_empty()))
        .or_else(|| provider_url.filter(|url| !url.is_empty()))
        .ok_or_else(|| {
            FetchError::configuration(
                "a url is required unless the ambient scope provides one",
            )
        })?;

    let method = call_site.method.or(ambient.method).unwrap_or_default();
    let body = call_site.body.clone().or_else(|| ambient.body.clone());

    let mut headers = merge_headers(&[ambient.headers.as_slice(), call_site.headers.as_slice()])?;
    let explicit_content_type = headers.contains_key(CONTENT_TYPE);
    inject_json_content_type(&mut headers, method, body.as_ref());

    let retries = non_negative("retries", call_site.retries.or(ambient.retries).unwrap_or(0))?;
    let cache_life_ms = non_negative(
        "cache_life_ms",
        call_site.cache_life_ms.or(ambient.cache_life_ms).unwrap_or(0),
    )?;
    let timeout_ms = non_negative(
        "timeout_ms",
        call_site.timeout_ms.or(ambient.timeout_ms).unwrap_or(0),
    )?;
    let per_page = non_negative("per_page", call_site.per_page.or(ambient.per_page).unwrap_or(0))?;

    let retry_delay = call_site
        .retry_delay
        .clone()
        .or_else(|| ambient.retry_delay.clone())
        .unwrap_or(RetryDelay::Fixed(DEFAULT_RETRY_DELAY_MS));
    if let RetryDelay::Fixed(ms) = retry_delay {
        non_negative::<u64>("retry_delay", ms)?;
    }

    let retry_on = call_site.retry_on.clone().or_else(|| ambient.retry_on.clone());
    if let Some(retry_on) = &retry_on {
        retry_on.validate()?;
    }

    let on_mount = call_site.on_mount.or(ambient.on_mount).unwrap_or(false);
    let dependencies = dependencies
        .or(second_dependencies)
        .or_else(|| call_site.on_update.clone())
        .or_else(|| ambient.on_update.clone());

    let initial = InitialState {
        data: call_site
            .data
            .clone()
            .or_else(|| ambient.data.clone())
            .unwrap_or(Value::Null),
        loading: call_site.loading.or(ambient.loading).unwrap_or(false) || on_mount,
    };

    let config = RequestConfig {
        url,
        path: call_site.path.clone().or_else(|| ambient.path.clone()).unwrap_or_default(),
        method,
        headers,
        body,
        credentials: call_site.credentials.clone().or_else(|| ambient.credentials.clone()),
        mode: call_site.mode.clone().or_else(|| ambient.mode.clone()),
        redirect: call_site.redirect.clone().or_else(|| ambient.redirect.clone()),
        referrer: call_site.referrer.clone().or_else(|| ambient.referrer.clone()),
        cache_mode: call_site.cache_mode.clone().or_else(|| ambient.cache_mode.clone()),
        integrity: call_site.integrity.clone().or_else(|| ambient.integrity.clone()),
        keepalive: call_site.keepalive.or(ambient.keepalive),
        timeout_ms,
        retries,
        retry_delay,
        retry_on,
        cache_policy: call_site.cache_policy.or(ambient.cache_policy).unwrap_or_default(),
        cache_life_ms,
        per_page,
        response_type: call_site.response_type.or(ambient.response_type).unwrap_or_default(),
        interceptors: ambient.interceptors.layered(&call_site.interceptors),
        on_abort: call_site.on_abort.clone().or_else(|| ambient.on_abort.clone()),
        on_timeout: call_site.on_timeout.clone().or_else(|| ambient.on_timeout.clone()),
        on_error: call_site.on_error.clone().or_else(|| ambient.on_error.clone()),
        on_new_data: call_site.on_new_data.clone().or_else(|| ambient.on_new_data.clone()),
        on_mount,
        dependencies,
        explicit_content_type,
    };

    #[cfg(feature = "tracing")]
    tracing::debug!(
        url = %config.url,
        method = %config.method,
        cache_policy = ?config.cache_policy,
        retries = config.retries,
        timeout_ms = config.timeout_ms,
        "resolved request configuration"
    );

    Ok(Resolved { config, initial })
}

/// Shallow header merge; later layers replace earlier ones per name.
fn merge_headers(layers: &[&[(String, String)]]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for layer in layers {
        for (name, value) in layer.iter() {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|err| {
                FetchError::configuration(format!("invalid header name '{name}': {err}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|err| {
                FetchError::configuration(format!("invalid value for header '{name}': {err}"))
            })?;
            headers.insert(name, value);
        }
    }
    Ok(headers)
}

/// Adds `Content-Type: application/json` for body-carrying verbs unless the
/// body is binary/multipart or a content type is already present.
pub(crate) fn inject_json_content_type(headers: &mut HeaderMap, method: Method, body: Option<&Body>) {
    if !method.defaults_to_json()
        || headers.contains_key(CONTENT_TYPE)
        || body.is_some_and(Body::is_binary_or_multipart)
    {
        return;
    }
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
}

fn non_negative<T: TryFrom<i64>>(field: &str, value: i64) -> Result<T> {
    if value < 0 {
        return Err(FetchError::configuration(format!(
            "`{field}` must be a number >= 0, got {value}"
        )));
    }
    T::try_from(value)
        .map_err(|_| FetchError::configuration(format!("`{field}` is out of range: {value}")))
}
