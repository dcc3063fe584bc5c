//! Outbound endpoint policy for broker and JWKS URLs.

use std::net::IpAddr;
use url::{Host, Url};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndpointPolicy {
    /// Only publicly routable hosts.
    #[default]
    PublicOnly,
    /// Loopback and private ranges are accepted (local development, tests).
    AllowPrivate,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("unsupported scheme '{0}' (expected http or https)")]
    Scheme(String),
    #[error("use of unsafe IP address in endpoint: {0}")]
    UnsafeIp(IpAddr),
    #[error("endpoint has no host: {0}")]
    NoHost(String),
}

pub fn validate(url: &Url, policy: EndpointPolicy) -> Result<(), EndpointError> {
    match url.scheme() {
        "https" | "http" => {}
        other => return Err(EndpointError::Scheme(other.to_string())),
    }

    let ip = match url.host() {
        Some(Host::Ipv4(addr)) => IpAddr::V4(addr),
        Some(Host::Ipv6(addr)) => IpAddr::V6(addr),
        // Domain names are allowed; resolving them here would need network access.
        Some(Host::Domain(_)) => return Ok(()),
        None => return Err(EndpointError::NoHost(url.to_string())),
    };

    if policy == EndpointPolicy::PublicOnly && is_unsafe_ip(&ip) {
        return Err(EndpointError::UnsafeIp(ip));
    }
    Ok(())
}

fn is_unsafe_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => {
            let octets = addr.octets();
            addr.is_loopback()
                || addr.is_link_local()
                || addr.is_multicast()
                || addr.is_unspecified()
                || octets[0] == 10
                || (octets[0] == 192 && octets[1] == 168)
                || (octets[0] == 172 && (16..=31).contains(&octets[1]))
        }
        IpAddr::V6(addr) => {
            if let Some(v4) = addr.to_ipv4_mapped() {
                return is_unsafe_ip(&IpAddr::V4(v4));
            }
            let first = addr.segments()[0];
            addr.is_loopback()
                || addr.is_multicast()
                || addr.is_unspecified()
                // fc00::/7 unique local
                || (first & 0xfe00) == 0xfc00
                // fe80::/10 link-local
                || (first & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_private_and_metadata_addresses() {
        let unsafe_uris = [
            "https://127.0.0.1/jwks.json",
            "https://[::1]/jwks.json",
            "https://10.0.0.5/token",
            "https://192.168.1.1/token",
            "https://172.16.0.1/token",
            "https://172.31.255.255/token",
            "https://169.254.169.254/latest/meta-data",
            "https://[fd00::1]/token",
        ];
        for u in unsafe_uris {
            let url = Url::parse(u).unwrap();
            match validate(&url, EndpointPolicy::PublicOnly) {
                Err(EndpointError::UnsafeIp(_)) => {}
                other => panic!("should block {u}: {other:?}"),
            }
        }
    }

    #[test]
    fn blocks_ipv6_link_local_and_mapped_private_v4() {
        for u in [
            "https://[fe80::1]/token",
            "https://[febf::abcd]/token",
            "https://[::ffff:127.0.0.1]/token",
            "https://[::ffff:169.254.169.254]/latest/meta-data",
            "https://[::ffff:10.1.2.3]/token",
        ] {
            let url = Url::parse(u).unwrap();
            assert!(
                matches!(validate(&url, EndpointPolicy::PublicOnly), Err(EndpointError::UnsafeIp(_))),
                "should block {u}"
            );
        }
        for u in ["https://[::ffff:8.8.8.8]/jwks", "https://[fec0::1]/jwks", "https://[2001:db8::1]/jwks"] {
            assert!(validate(&Url::parse(u).unwrap(), EndpointPolicy::PublicOnly).is_ok(), "{u}");
        }
    }

    #[test]
    fn allows_public_hosts_and_private_when_permitted() {
        for u in ["https://zone.keycard.cloud/oauth/2/token", "https://8.8.8.8/jwks"] {
            assert!(validate(&Url::parse(u).unwrap(), EndpointPolicy::PublicOnly).is_ok());
        }
        let local = Url::parse("http://127.0.0.1:9999/token").unwrap();
        assert!(validate(&local, EndpointPolicy::AllowPrivate).is_ok());
    }

    #[test]
    fn rejects_non_http_schemes() {
        let url = Url::parse("file:///etc/passwd").unwrap();
        assert!(matches!(
            validate(&url, EndpointPolicy::AllowPrivate),
            Err(EndpointError::Scheme(_))
        ));
    }
}
