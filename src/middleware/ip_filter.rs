//! Client-IP extraction and allow-list matching.
//!
//! The client IP is the first value of `X-Forwarded-For` when present,
//! otherwise the connection peer. IPv4-mapped IPv6 addresses are unmapped
//! before matching so `::ffff:203.0.113.5` satisfies a `203.0.113.0/24`
//! entry. Entries are single addresses or CIDR blocks.

use axum::http::HeaderMap;
use ipnet::IpNet;
use std::net::{IpAddr, SocketAddr};

pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse::<IpAddr>().ok());

    forwarded.or_else(|| peer.map(|addr| addr.ip())).map(unmap)
}

fn unmap(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

/// Whether `ip` matches any configured entry. An empty list never matches:
/// a merchant with the filter enabled and nothing configured has locked
/// themselves out, not opened the door.
pub fn is_allowed(ip: IpAddr, entries: &[String]) -> bool {
    entries.iter().any(|entry| {
        let entry = entry.trim();
        if let Ok(net) = entry.parse::<IpNet>() {
            return net.contains(&ip);
        }
        if let Ok(single) = entry.parse::<IpAddr>() {
            return unmap(single) == ip;
        }
        false
    })
}

/// Allow-list entries are stored as a JSON array of strings.
pub fn parse_entries(raw: Option<&str>) -> Vec<String> {
    raw.and_then(|json| serde_json::from_str::<Vec<String>>(json).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_xff(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn first_forwarded_value_wins() {
        let headers = headers_with_xff("203.0.113.55, 198.51.100.7");
        let ip = client_ip(&headers, None).unwrap();
        assert_eq!(ip, "203.0.113.55".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn peer_address_is_the_fallback() {
        let peer: SocketAddr = "198.51.100.9:4431".parse().unwrap();
        let ip = client_ip(&HeaderMap::new(), Some(peer)).unwrap();
        assert_eq!(ip, "198.51.100.9".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn malformed_forwarded_header_falls_back_to_peer() {
        let peer: SocketAddr = "198.51.100.9:4431".parse().unwrap();
        let headers = headers_with_xff("not-an-ip");
        let ip = client_ip(&headers, Some(peer)).unwrap();
        assert_eq!(ip, "198.51.100.9".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn mapped_v6_is_unmapped() {
        let headers = headers_with_xff("::ffff:203.0.113.5");
        let ip = client_ip(&headers, None).unwrap();
        assert_eq!(ip, "203.0.113.5".parse::<IpAddr>().unwrap());
        assert!(is_allowed(ip, &["203.0.113.0/24".to_string()]));
    }

    #[test]
    fn cidr_and_single_entries_match() {
        let ip: IpAddr = "203.0.113.77".parse().unwrap();
        assert!(is_allowed(ip, &["203.0.113.0/24".to_string()]));
        assert!(is_allowed(ip, &["203.0.113.77".to_string()]));
        assert!(!is_allowed(ip, &["198.51.100.0/24".to_string()]));
    }

    #[test]
    fn empty_list_matches_nothing() {
        let ip: IpAddr = "203.0.113.77".parse().unwrap();
        assert!(!is_allowed(ip, &[]));
    }

    #[test]
    fn garbage_entries_are_ignored() {
        let ip: IpAddr = "203.0.113.77".parse().unwrap();
        assert!(!is_allowed(ip, &["nonsense".to_string()]));
        assert!(is_allowed(
            ip,
            &["nonsense".to_string(), "203.0.113.0/24".to_string()]
        ));
    }

    #[test]
    fn entries_parse_from_json() {
        assert_eq!(
            parse_entries(Some(r#"["10.0.0.1", "10.0.0.0/8"]"#)),
            vec!["10.0.0.1".to_string(), "10.0.0.0/8".to_string()]
        );
        assert!(parse_entries(Some("not json")).is_empty());
        assert!(parse_entries(None).is_empty());
    }
}
