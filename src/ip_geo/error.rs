use hyper::StatusCode;
use thiserror::Error;

/// Why a location could not be resolved. Both resolvers report through this type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("network failure: {0}")]
    Network(String),
    #[error("non-success status code: {0}")]
    Status(StatusCode),
    #[error("timed out")]
    Timeout,
    #[error("malformed response: {0}")]
    Parse(String),
    #[error("location permission denied")]
    PermissionDenied,
    #[error("position unavailable: {0}")]
    Unavailable(String),
    #[error("no IP geolocation providers configured")]
    NoProviders,
}

impl From<hyper::Error> for ResolveError {
    fn from(error: hyper::Error) -> Self {
        Self::Network(error.to_string())
    }
}

impl From<hyper::http::Error> for ResolveError {
    fn from(error: hyper::http::Error) -> Self {
        Self::Network(error.to_string())
    }
}

impl From<StatusCode> for ResolveError {
    fn from(status_code: StatusCode) -> Self {
        Self::Status(status_code)
    }
}

impl From<serde_json::Error> for ResolveError {
    fn from(error: serde_json::Error) -> Self {
        Self::Parse(error.to_string())
    }
}
