use crate::canonical_ip::CanonicalIpAddr;

use hyper::HeaderMap;
use std::net::IpAddr;

/// Address found in the first of `header_names` that is present
///
/// With `recursive` the left-most (client-most) value of a comma-separated list is taken,
/// otherwise the right-most one appended by the nearest proxy.
pub fn header_ip(headers: &HeaderMap, header_names: &[String], recursive: bool) -> Option<IpAddr> {
    header_names
        .iter()
        .filter_map(|name| {
            let values = headers.get_all(name.as_str());
            let mut it_values = values.iter();
            if recursive {
                it_values.next()
            } else {
                it_values.next_back()
            }
        })
        .next()
        .and_then(|value| {
            let value = value.to_str().ok()?;
            let mut split = value.split(',');
            if recursive {
                split.next()
            } else {
                split.next_back()
            }
        })
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

/// Best-effort public address of the visitor: forwarding headers first, then the socket peer.
/// `None` when neither gives an address a geolocation provider could use.
pub fn client_ip(
    headers: &HeaderMap,
    socket_ip: Option<IpAddr>,
    header_names: &[String],
    recursive: bool,
) -> Option<IpAddr> {
    header_ip(headers, header_names, recursive)
        .or(socket_ip)
        .map(|ip| ip.to_canonical_ip())
        .filter(|ip| ip.is_public_ip())
}
