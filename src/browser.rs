use crate::ip_geo::ResolveError;
use crate::record::LocationRecord;

use hyper::body::{Body, HttpBody};
use serde::Deserialize;
use std::time::Duration;

/// `GeolocationPositionError` codes
const PERMISSION_DENIED: u16 = 1;
const POSITION_UNAVAILABLE: u16 = 2;
const TIMEOUT: u16 = 3;

/// Upper bound for a bridge reply body, a position is well under a kilobyte
const MAX_REPLY_BYTES: u64 = 4096;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BridgeErrorReply {
    pub code: u16,
    #[serde(default)]
    pub message: String,
}

/// What the page posts back after calling `navigator.geolocation.getCurrentPosition`.
/// A bare `null` is decoded as `None` by [`read_bridge_reply`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum BridgeReply {
    Position {
        latitude: f64,
        longitude: f64,
        accuracy: f64,
    },
    Error {
        error: BridgeErrorReply,
    },
}

/// Reads one bridge reply from a request body, bounded by `timeout`
pub async fn read_bridge_reply(
    body: Body,
    timeout: Duration,
) -> Result<Option<BridgeReply>, ResolveError> {
    if body.size_hint().lower() > MAX_REPLY_BYTES {
        return Err(ResolveError::Parse("bridge reply is too large".into()));
    }
    let bytes = tokio::time::timeout(timeout, hyper::body::to_bytes(body))
        .await
        .map_err(|_| ResolveError::Timeout)??;
    if bytes.len() as u64 > MAX_REPLY_BYTES {
        return Err(ResolveError::Parse("bridge reply is too large".into()));
    }
    Ok(serde_json::from_slice(&bytes)?)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BrowserResolver;

impl BrowserResolver {
    pub fn resolve(&self, reply: Option<BridgeReply>) -> Result<LocationRecord, ResolveError> {
        match reply {
            Some(BridgeReply::Position {
                latitude,
                longitude,
                accuracy,
            }) => LocationRecord::from_browser(latitude, longitude, accuracy),
            Some(BridgeReply::Error { error }) => Err(match error.code {
                PERMISSION_DENIED => ResolveError::PermissionDenied,
                POSITION_UNAVAILABLE => ResolveError::Unavailable(error.message),
                TIMEOUT => ResolveError::Timeout,
                code => ResolveError::Unavailable(format!("error code {code}: {}", error.message)),
            }),
            // Page had no geolocation API, or the user dismissed the prompt
            None => Err(ResolveError::PermissionDenied),
        }
    }
}
