use std::future::Future;
use std::sync::Arc;

use reqwest::header::HeaderMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{Body, FetchError, Method, ResponseType, Result};

/// Arguments handed to a [`Transport`] for one attempt.
///
/// Browser-only options are carried through untouched so that transports
/// backed by a fetch-like primitive can honor them.
#[derive(Clone, Debug)]
pub struct RequestInit {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Body>,
    /// Cancelled when the attempt times out, is superseded or aborted.
    pub signal: CancellationToken,
    pub credentials: Option<String>,
    pub mode: Option<String>,
    pub redirect: Option<String>,
    pub referrer: Option<String>,
    pub cache_mode: Option<String>,
    pub integrity: Option<String>,
    pub keepalive: Option<bool>,
}

/// Fully buffered response returned by a [`Transport`].
#[derive(Clone, Debug, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        let status_text = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|code| code.canonical_reason())
            .unwrap_or_default()
            .to_owned();
        Self {
            status,
            status_text,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// JSON response with the given status.
    pub fn json(status: u16, value: &Value) -> Self {
        Self::new(status, value.to_string())
    }

    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decodes the body into `data`.
    ///
    /// `Auto` tries JSON first and falls back to the raw text; an empty body
    /// decodes to `null`.
    pub fn data(&self, response_type: ResponseType) -> Result<Value> {
        if self.body.is_empty() {
            return Ok(Value::Null);
        }
        match response_type {
            ResponseType::Auto => Ok(serde_json::from_slice(&self.body)
                .unwrap_or_else(|_| Value::String(self.text()))),
            ResponseType::Json => serde_json::from_slice(&self.body)
                .map_err(|err| FetchError::Decode(format!("invalid JSON body: {err}"))),
            ResponseType::Text => Ok(Value::String(self.text())),
        }
    }
}

/// The low-level network primitive.
///
/// Implementations must watch [`RequestInit::signal`] and resolve with
/// [`FetchError::Aborted`] once it is cancelled; the executor never forces a
/// call to stop beyond signalling.
pub trait Transport: Send + Sync + 'static {
    fn invoke(
        &self,
        url: &str,
        init: RequestInit,
    ) -> impl Future<Output = Result<TransportResponse>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn invoke(
        &self,
        url: &str,
        init: RequestInit,
    ) -> impl Future<Output = Result<TransportResponse>> + Send {
        (**self).invoke(url, init)
    }
}

/// [`Transport`] backed by `reqwest`.
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a preconfigured client (proxies, TLS roots, default headers).
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Transport for ReqwestTransport {
    async fn invoke(&self, url: &str, init: RequestInit) -> Result<TransportResponse> {
        let mut request = self
            .http
            .request(reqwest_method(init.method), url)
            .headers(init.headers);

        if let Some(body) = init.body {
            request = match body {
                Body::Json(value) => request.body(value.to_string()),
                Body::Text(text) => request.body(text),
                Body::Bytes(bytes) => request.body(bytes),
                Body::Form(fields) => request.form(&fields),
            };
        }

        let exchange = async {
            let response = request.send().await.map_err(map_transport_error)?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await.map_err(map_transport_error)?;
            Ok(TransportResponse {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_owned(),
                headers,
                body: body.to_vec(),
            })
        };

        tokio::select! {
            () = init.signal.cancelled() => Err(FetchError::Aborted),
            result = exchange => result,
        }
    }
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Head => reqwest::Method::HEAD,
        Method::Options => reqwest::Method::OPTIONS,
        Method::Delete => reqwest::Method::DELETE,
        Method::Patch => reqwest::Method::PATCH,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
    }
}

fn map_transport_error(err: reqwest::Error) -> FetchError {
    let name = if err.is_timeout() {
        "TimeoutError"
    } else if err.is_connect() {
        "ConnectError"
    } else if err.is_body() || err.is_decode() {
        "BodyError"
    } else if err.is_request() {
        "RequestError"
    } else {
        "TransportError"
    };
    FetchError::transport(name, err.to_string())
}
