use crate::ip_geo::{base_string, IpGeoProviderTrait, ResolveError};
use crate::record::{IpPlace, LocationRecord};

use hyper::http::uri::Uri;
use lazy_static::lazy_static;
use serde::Deserialize;
use std::net::IpAddr;

lazy_static! {
    static ref IPAPI_URI: Uri = "https://ipapi.co".parse().unwrap();
}

pub const IPAPI_SOURCE: &str = "ipapi.co";

/// ipapi.co: `/{ip}/json/`, plain coordinates, country as `country_name`
pub struct IpApiProvider {
    base: String,
}

impl IpApiProvider {
    pub fn new(uri: Option<Uri>) -> Self {
        Self {
            base: base_string(uri.as_ref().unwrap_or(&IPAPI_URI)),
        }
    }
}

impl Default for IpApiProvider {
    fn default() -> Self {
        Self::new(None)
    }
}

#[derive(Deserialize)]
struct IpApiResponse {
    #[serde(default)]
    error: bool,
    reason: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    city: Option<String>,
    region: Option<String>,
    country_name: Option<String>,
    ip: Option<String>,
}

impl IpGeoProviderTrait for IpApiProvider {
    fn source(&self) -> &'static str {
        IPAPI_SOURCE
    }

    fn lookup_uri(&self, ip: Option<IpAddr>) -> Result<Uri, ResolveError> {
        let uri = match ip {
            Some(ip) => format!("{}/{ip}/json/", self.base),
            None => format!("{}/json/", self.base),
        };
        uri.parse()
            .map_err(|e: hyper::http::uri::InvalidUri| ResolveError::Network(e.to_string()))
    }

    fn parse_response(&self, body: &[u8], ip: Option<IpAddr>) -> Result<LocationRecord, ResolveError> {
        let response: IpApiResponse = serde_json::from_slice(body)?;
        // Rate limiting and reserved ranges come back as 200 with an error flag
        if response.error {
            return Err(ResolveError::Parse(
                response.reason.unwrap_or_else(|| "error flag set".into()),
            ));
        }
        let (latitude, longitude) = response
            .latitude
            .zip(response.longitude)
            .ok_or_else(|| ResolveError::Parse("latitude or longitude is missing".into()))?;
        let place = IpPlace {
            city: response.city,
            region: response.region,
            country: response.country_name,
            ip_address: response.ip.or_else(|| ip.map(|ip| ip.to_string())),
        };
        LocationRecord::from_ip(latitude, longitude, place, self.source())
    }
}
