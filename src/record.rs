use crate::ip_geo::ResolveError;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    #[serde(rename = "IP")]
    Ip,
    Browser,
}

/// A single location observation, either IP-derived or browser-reported.
///
/// Built only through [`LocationRecord::from_ip`] and [`LocationRecord::from_browser`], so the
/// method always matches the set of optional fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    timestamp: DateTime<Utc>,
    method: Method,
    latitude: f64,
    longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpPlace {
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub ip_address: Option<String>,
}

fn check_coordinates(latitude: f64, longitude: f64) -> Result<(), ResolveError> {
    if !(latitude.is_finite() && (-90.0..=90.0).contains(&latitude)) {
        return Err(ResolveError::Parse(format!("latitude {latitude} is out of range")));
    }
    if !(longitude.is_finite() && (-180.0..=180.0).contains(&longitude)) {
        return Err(ResolveError::Parse(format!("longitude {longitude} is out of range")));
    }
    Ok(())
}

/// Empty strings from providers mean "unknown"
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

impl LocationRecord {
    pub fn from_ip(
        latitude: f64,
        longitude: f64,
        place: IpPlace,
        source: &str,
    ) -> Result<Self, ResolveError> {
        check_coordinates(latitude, longitude)?;
        Ok(Self {
            timestamp: Utc::now(),
            method: Method::Ip,
            latitude,
            longitude,
            accuracy: None,
            city: non_empty(place.city),
            region: non_empty(place.region),
            country: non_empty(place.country),
            ip_address: non_empty(place.ip_address),
            source: Some(source.to_owned()),
        })
    }

    pub fn from_browser(latitude: f64, longitude: f64, accuracy: f64) -> Result<Self, ResolveError> {
        check_coordinates(latitude, longitude)?;
        if !(accuracy.is_finite() && accuracy >= 0.0) {
            return Err(ResolveError::Parse(format!("accuracy {accuracy} is invalid")));
        }
        Ok(Self {
            timestamp: Utc::now(),
            method: Method::Browser,
            latitude,
            longitude,
            accuracy: Some(accuracy),
            city: None,
            region: None,
            country: None,
            ip_address: None,
            source: None,
        })
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn accuracy(&self) -> Option<f64> {
        self.accuracy
    }

    pub fn city(&self) -> Option<&str> {
        self.city.as_deref()
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn country(&self) -> Option<&str> {
        self.country.as_deref()
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }
}

impl fmt::Display for LocationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let place: Vec<&str> = [self.city(), self.region(), self.country()]
            .into_iter()
            .flatten()
            .collect();
        if place.is_empty() {
            write!(f, "{:.4}, {:.4}", self.latitude, self.longitude)
        } else {
            write!(
                f,
                "{} ({:.4}, {:.4})",
                place.join(", "),
                self.latitude,
                self.longitude
            )
        }
    }
}
