//! `fetch-hook` is a request orchestration engine for UI-bound data fetching.
//!
//! A [`Fetch`] instance owns one logical request for one component:
//! - configuration is resolved once from the call site and an optional
//!   ambient [`Provider`]
//! - each trigger runs a cycle with timeout, retry and cancellation, and at
//!   most one cycle per instance is authoritative
//! - responses pass through [`Interceptors`], the [`Cache`] and a merge step
//!   before landing in an observable [`Snapshot`]
//!
//! The network itself sits behind the [`Transport`] trait; [`ReqwestTransport`]
//! is the default implementation.

mod args;
mod cache;
mod config;
mod error;
mod fetch;
mod interceptor;
mod merge;
mod options;
mod request;
mod state;
mod transport;

pub use args::{FetchArgs, Overwrite, SecondArg, UrlArg};
pub use cache::{Cache, CacheRecord, CacheStore, Clock, MemoryStore, SystemClock};
pub use config::{resolve, InitialState, RequestConfig, Resolved};
pub use error::FetchError;
pub use fetch::{Fetch, FetchBuilder, Outcome};
pub use interceptor::{
    InterceptContext, Interceptors, RequestInterceptor, ResponseEnvelope, ResponseInterceptor,
};
pub use merge::{append, merge, MergeFn, Pagination};
pub use options::{
    Body, CachePolicy, Callback, ErrorCallback, Method, Options, Provider, ResponseType,
    RetryContext, RetryDelay, RetryOn,
};
pub use request::RequestIdentity;
pub use state::{Phase, Settled, Snapshot};
pub use transport::{ReqwestTransport, RequestInit, Transport, TransportResponse};

pub type Result<T> = std::result::Result<T, FetchError>;
