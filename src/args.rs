use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::Options;

/// Rewrites a copy of the ambient options for one instance.
pub type Overwrite = Arc<dyn Fn(Options) -> Options + Send + Sync>;

/// First call-site argument.
#[derive(Clone)]
pub enum UrlArg {
    Url(String),
    Config(Options),
    Overwrite(Overwrite),
}

/// Second call-site argument.
#[derive(Clone)]
pub enum SecondArg {
    /// Options without a URL; rejected when the first argument is a config.
    Options(Options),
    Overwrite(Overwrite),
    Dependencies(Vec<Value>),
}

impl fmt::Debug for UrlArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => f.debug_tuple("Url").field(url).finish(),
            Self::Config(options) => f.debug_tuple("Config").field(options).finish(),
            Self::Overwrite(_) => f.write_str("Overwrite(<fn>)"),
        }
    }
}

impl fmt::Debug for SecondArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Options(options) => f.debug_tuple("Options").field(options).finish(),
            Self::Overwrite(_) => f.write_str("Overwrite(<fn>)"),
            Self::Dependencies(deps) => f.debug_tuple("Dependencies").field(deps).finish(),
        }
    }
}

/// Everything a call site passes when creating a request instance.
#[derive(Clone, Debug, Default)]
pub struct FetchArgs {
    pub first: Option<UrlArg>,
    pub second: Option<SecondArg>,
    pub dependencies: Option<Vec<Value>>,
}

impl FetchArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self {
            first: Some(UrlArg::Url(url.into())),
            ..Self::default()
        }
    }

    pub fn config(options: Options) -> Self {
        Self {
            first: Some(UrlArg::Config(options)),
            ..Self::default()
        }
    }

    pub fn overwrite(f: impl Fn(Options) -> Options + Send + Sync + 'static) -> Self {
        Self {
            first: Some(UrlArg::Overwrite(Arc::new(f))),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: Options) -> Self {
        self.second = Some(SecondArg::Options(options));
        self
    }

    #[must_use]
    pub fn with_overwrite(mut self, f: impl Fn(Options) -> Options + Send + Sync + 'static) -> Self {
        self.second = Some(SecondArg::Overwrite(Arc::new(f)));
        self
    }

    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<Value>) -> Self {
        self.dependencies = Some(dependencies);
        self
    }
}

impl From<&str> for FetchArgs {
    fn from(url: &str) -> Self {
        Self::url(url)
    }
}

impl From<String> for FetchArgs {
    fn from(url: String) -> Self {
        Self::url(url)
    }
}

impl From<Options> for FetchArgs {
    fn from(options: Options) -> Self {
        Self::config(options)
    }
}
