use std::fmt;

use reqwest::header::CONTENT_TYPE;
use tokio_util::sync::CancellationToken;

use crate::{config::inject_json_content_type, Body, FetchError, Method, RequestConfig, RequestInit, Result};

/// Cache key of a request: method, full URL and normalized body.
///
/// Headers are deliberately not part of the identity.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct RequestIdentity(String);

impl RequestIdentity {
    pub fn new(url: &str, method: Method, body: Option<&Body>) -> Self {
        let body = body.map(Body::normalized).unwrap_or_default();
        Self(format!("url:{url}||method:{method}||body:{body}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport arguments for one call, before the request interceptor runs.
#[derive(Clone, Debug)]
pub(crate) struct PreparedRequest {
    pub url: String,
    pub route: String,
    pub init: RequestInit,
    pub identity: RequestIdentity,
}

impl PreparedRequest {
    /// Fresh copy of the arguments bound to one attempt's signal.
    pub fn init_for_attempt(&self, signal: CancellationToken) -> RequestInit {
        RequestInit {
            signal,
            ..self.init.clone()
        }
    }
}

/// Builds the transport arguments for a call with an optional route and body.
///
/// A call-time body replaces the configured one. GET and HEAD never send a
/// body; passing one explicitly is a configuration error.
pub(crate) fn prepare(
    config: &RequestConfig,
    method: Method,
    route: &str,
    body: Option<Body>,
) -> Result<PreparedRequest> {
    if body.is_some() && !method.allows_body() {
        return Err(FetchError::configuration(format!(
            "{method} requests can only take a route, not a body"
        )));
    }
    let body = if method.allows_body() {
        body.or_else(|| config.body.clone())
    } else {
        None
    };

    let mut headers = config.headers.clone();
    if !config.explicit_content_type {
        headers.remove(CONTENT_TYPE);
        inject_json_content_type(&mut headers, method, body.as_ref());
    }

    let url = format!("{}{}{}", config.url, config.path, route);
    let identity = RequestIdentity::new(&url, method, body.as_ref());

    Ok(PreparedRequest {
        url,
        route: route.to_owned(),
        init: RequestInit {
            method,
            headers,
            body,
            signal: CancellationToken::new(),
            credentials: config.credentials.clone(),
            mode: config.mode.clone(),
            redirect: config.redirect.clone(),
            referrer: config.referrer.clone(),
            cache_mode: config.cache_mode.clone(),
            integrity: config.integrity.clone(),
            keepalive: config.keepalive,
        },
        identity,
    })
}
