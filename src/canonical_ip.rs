/// Implementation of unstable IpAddr::to_canonical and a reduced IpAddr::is_global
/// https://github.com/rust-lang/rust/issues/27709
use std::net::IpAddr;

pub trait CanonicalIpAddr {
    fn to_canonical_ip(&self) -> Self;

    /// Whether an IP-geolocation provider can say anything useful about the address
    fn is_public_ip(&self) -> bool;
}

impl CanonicalIpAddr for IpAddr {
    fn to_canonical_ip(&self) -> Self {
        match self {
            IpAddr::V4(v4) => IpAddr::V4(*v4),
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => IpAddr::V4(v4),
                None => IpAddr::V6(*v6),
            },
        }
    }

    fn is_public_ip(&self) -> bool {
        match self.to_canonical_ip() {
            IpAddr::V4(v4) => {
                !(v4.is_loopback()
                    || v4.is_private()
                    || v4.is_link_local()
                    || v4.is_unspecified()
                    || v4.is_broadcast())
            }
            IpAddr::V6(v6) => {
                let first_segment = v6.segments()[0];
                !(v6.is_loopback()
                    || v6.is_unspecified()
                    // fc00::/7 unique local
                    || (first_segment & 0xfe00) == 0xfc00
                    // fe80::/10 link local
                    || (first_segment & 0xffc0) == 0xfe80)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapped_v6_becomes_v4() {
        let ip: IpAddr = "::ffff:1.2.3.4".parse().unwrap();
        assert_eq!(ip.to_canonical_ip(), "1.2.3.4".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn public_ip_filter() {
        for private in ["127.0.0.1", "10.1.2.3", "192.168.0.7", "169.254.1.1", "0.0.0.0", "::1", "fd00::1", "fe80::1", "::ffff:192.168.1.1"] {
            let ip: IpAddr = private.parse().unwrap();
            assert!(!ip.is_public_ip(), "{private}");
        }
        for public in ["1.2.3.4", "128.174.199.60", "2001:4860:4860::8888", "::ffff:8.8.8.8"] {
            let ip: IpAddr = public.parse().unwrap();
            assert!(ip.is_public_ip(), "{public}");
        }
    }
}
