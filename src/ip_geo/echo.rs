use crate::ip_geo::ResolveError;

use hyper::http::uri::Uri;
use lazy_static::lazy_static;
use serde::Deserialize;
use std::net::IpAddr;

lazy_static! {
    static ref ECHO_URI: Uri = "https://api.ipify.org?format=json".parse().unwrap();
}

/// "What is my IP" service used when the request carries no public address
pub fn default_echo_uri() -> Uri {
    ECHO_URI.clone()
}

#[derive(Deserialize)]
struct EchoResponse {
    ip: String,
}

pub fn parse_echo_response(body: &[u8]) -> Result<IpAddr, ResolveError> {
    let response: EchoResponse = serde_json::from_slice(body)?;
    response
        .ip
        .trim()
        .parse()
        .map_err(|_| ResolveError::Parse(format!("{:?} is not an IP address", response.ip)))
}
