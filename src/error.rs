/// Error type returned by this crate.
///
/// Only [`FetchError::Configuration`] is ever returned from a request method;
/// every other variant is settled into the observable [`Snapshot`](crate::Snapshot)
/// and reported through [`Outcome::Failed`](crate::Outcome::Failed).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Invalid or ambiguous configuration, detected before any network activity.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Network-level failure surfaced by the transport.
    #[error("transport error ({name}): {message}")]
    Transport {
        /// Failure kind, e.g. `ConnectError`.
        name: String,
        /// Human readable detail.
        message: String,
    },
    /// Response arrived but was not `ok` (non-2xx).
    #[error("http error {status}: {status_text}")]
    Http { status: u16, status_text: String },
    /// The executor's own timer fired before the transport settled.
    #[error("AbortError: Timeout Error")]
    Timeout,
    /// Caller-initiated or supersession-induced cancellation.
    #[error("AbortError: the request was aborted")]
    Aborted,
    /// Value raised by a request or response interceptor.
    #[error("interceptor error: {0}")]
    Interceptor(String),
    /// `CacheOnly` policy found no usable cache record.
    #[error("no cached response for this request")]
    NotCached,
    /// Body could not be decoded as the requested response type.
    #[error("decode error: {0}")]
    Decode(String),
}

impl FetchError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn interceptor(message: impl Into<String>) -> Self {
        Self::Interceptor(message.into())
    }

    pub fn transport(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            name: name.into(),
            message: message.into(),
        }
    }

    /// The `name` half of the `{name, message}` pair exposed to UI bindings.
    pub fn name(&self) -> String {
        match self {
            Self::Configuration(_) => "ConfigurationError".to_owned(),
            Self::Transport { name, .. } => name.clone(),
            Self::Http { status, .. } => status.to_string(),
            Self::Timeout | Self::Aborted => "AbortError".to_owned(),
            Self::Interceptor(_) => "InterceptorError".to_owned(),
            Self::NotCached => "NotCachedError".to_owned(),
            Self::Decode(_) => "DecodeError".to_owned(),
        }
    }

    /// The `message` half of the `{name, message}` pair exposed to UI bindings.
    pub fn message(&self) -> String {
        match self {
            Self::Configuration(message)
            | Self::Interceptor(message)
            | Self::Decode(message) => message.clone(),
            Self::Transport { message, .. } => message.clone(),
            Self::Http { status_text, .. } => status_text.clone(),
            Self::Timeout => "Timeout Error".to_owned(),
            Self::Aborted => "The user aborted a request.".to_owned(),
            Self::NotCached => "no cached response available".to_owned(),
        }
    }

    /// Whether the retry policy may consider this failure at all.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Configuration(_) | Self::Aborted)
    }
}
