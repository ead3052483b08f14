use crate::ip_geo::{base_string, IpGeoProviderTrait, ResolveError};
use crate::record::{IpPlace, LocationRecord};

use hyper::http::uri::Uri;
use lazy_static::lazy_static;
use serde::Deserialize;
use std::net::IpAddr;

lazy_static! {
    static ref IPINFO_URI: Uri = "https://ipinfo.io".parse().unwrap();
}

pub const IPINFO_SOURCE: &str = "ipinfo.io";

/// ipinfo.io: `/{ip}/json`, coordinates packed into `loc` as "lat,lon"
pub struct IpInfoProvider {
    base: String,
}

impl IpInfoProvider {
    pub fn new(uri: Option<Uri>) -> Self {
        Self {
            base: base_string(uri.as_ref().unwrap_or(&IPINFO_URI)),
        }
    }
}

impl Default for IpInfoProvider {
    fn default() -> Self {
        Self::new(None)
    }
}

#[derive(Deserialize)]
struct IpInfoResponse {
    loc: Option<String>,
    city: Option<String>,
    region: Option<String>,
    country: Option<String>,
    ip: Option<String>,
}

fn parse_loc(loc: &str) -> Result<(f64, f64), ResolveError> {
    let invalid = || ResolveError::Parse(format!(r#"invalid "loc" value {loc:?}"#));
    let (latitude, longitude) = loc.split_once(',').ok_or_else(invalid)?;
    let latitude = latitude.trim().parse().map_err(|_| invalid())?;
    let longitude = longitude.trim().parse().map_err(|_| invalid())?;
    Ok((latitude, longitude))
}

impl IpGeoProviderTrait for IpInfoProvider {
    fn source(&self) -> &'static str {
        IPINFO_SOURCE
    }

    fn lookup_uri(&self, ip: Option<IpAddr>) -> Result<Uri, ResolveError> {
        let uri = match ip {
            Some(ip) => format!("{}/{ip}/json", self.base),
            None => format!("{}/json", self.base),
        };
        uri.parse()
            .map_err(|e: hyper::http::uri::InvalidUri| ResolveError::Network(e.to_string()))
    }

    fn parse_response(&self, body: &[u8], ip: Option<IpAddr>) -> Result<LocationRecord, ResolveError> {
        let response: IpInfoResponse = serde_json::from_slice(body)?;
        // Bogon addresses come back without "loc"
        let loc = response
            .loc
            .ok_or_else(|| ResolveError::Parse(r#""loc" is missing"#.into()))?;
        let (latitude, longitude) = parse_loc(&loc)?;
        let place = IpPlace {
            city: response.city,
            region: response.region,
            country: response.country,
            ip_address: response.ip.or_else(|| ip.map(|ip| ip.to_string())),
        };
        LocationRecord::from_ip(latitude, longitude, place, self.source())
    }
}
