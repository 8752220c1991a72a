//! Request and response interceptors.
//!
//! Both stages are optional. An error returned from either stage enters the
//! executor's failure path exactly like a transport failure, so it is subject
//! to the same retry policy.

use std::fmt;
use std::sync::Arc;

use reqwest::header::HeaderMap;
use serde_json::Value;

use crate::{RequestInit, Result, TransportResponse};

/// Where the outgoing request is headed, for request interceptors.
#[derive(Clone, Copy, Debug)]
pub struct InterceptContext<'a> {
    pub url: &'a str,
    pub path: &'a str,
    /// Call-time route appended after `url` and `path`.
    pub route: &'a str,
}

/// Response metadata plus decoded `data`, as seen by response interceptors
/// and stored in [`Snapshot::response`](crate::Snapshot::response).
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseEnvelope {
    pub status: u16,
    pub status_text: String,
    pub ok: bool,
    pub headers: HeaderMap,
    pub data: Value,
}

impl ResponseEnvelope {
    pub(crate) fn new(response: &TransportResponse, data: Value) -> Self {
        Self {
            status: response.status,
            status_text: response.status_text.clone(),
            ok: response.ok(),
            headers: response.headers.clone(),
            data,
        }
    }
}

pub type RequestInterceptor =
    Arc<dyn Fn(RequestInit, &InterceptContext<'_>) -> Result<RequestInit> + Send + Sync>;
pub type ResponseInterceptor = Arc<dyn Fn(ResponseEnvelope) -> Result<ResponseEnvelope> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Interceptors {
    pub request: Option<RequestInterceptor>,
    pub response: Option<ResponseInterceptor>,
}

impl fmt::Debug for Interceptors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptors")
            .field("request", &self.request.is_some())
            .field("response", &self.response.is_some())
            .finish()
    }
}

impl Interceptors {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn request(
        mut self,
        f: impl Fn(RequestInit, &InterceptContext<'_>) -> Result<RequestInit> + Send + Sync + 'static,
    ) -> Self {
        self.request = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn response(
        mut self,
        f: impl Fn(ResponseEnvelope) -> Result<ResponseEnvelope> + Send + Sync + 'static,
    ) -> Self {
        self.response = Some(Arc::new(f));
        self
    }

    /// Stacks `over` on top of `self`: a stage set in `over` replaces the
    /// same stage in `self`, unset stages are inherited.
    pub(crate) fn layered(&self, over: &Interceptors) -> Interceptors {
        Interceptors {
            request: over.request.clone().or_else(|| self.request.clone()),
            response: over.response.clone().or_else(|| self.response.clone()),
        }
    }

    pub(crate) fn intercept_request(
        &self,
        init: RequestInit,
        ctx: &InterceptContext<'_>,
    ) -> Result<RequestInit> {
        match &self.request {
            Some(stage) => stage(init, ctx),
            None => Ok(init),
        }
    }

    pub(crate) fn intercept_response(&self, envelope: ResponseEnvelope) -> Result<ResponseEnvelope> {
        match &self.response {
            Some(stage) => stage(envelope),
            None => Ok(envelope),
        }
    }
}
