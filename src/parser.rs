//! Best-effort URI light-parser.
//!
//! Subscription feeds carry opaque share links (`vmess://<base64>`,
//! `vless://uuid@host:port?...`). Full protocol decoding is out of scope; the
//! probe engine only needs a transport address. This module recovers
//! `(proto, host, port, path, tls)` heuristically and leaves anything it
//! cannot parse empty; the probe layer treats empty host / zero port as
//! untestable rather than failed.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha1::{Digest, Sha1};

/// Fields recovered from a raw share URI. Empty / zero where recovery failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedUri {
    pub proto: String,
    pub host: String,
    pub port: u16,
    /// `"/"` when the URI advertises a path (web/WS transport, prefer HTTP
    /// probe); empty otherwise. The real path is not recovered.
    pub path: String,
    pub tls: bool,
    /// Not currently recovered; probes fall back to `host` for SNI.
    pub sni: String,
}

/// Stable content-addressed identifier: URL-safe unpadded base64 of the SHA-1
/// of the raw URI. Identical raw URIs share one record.
pub fn config_id(raw: &str) -> String {
    let digest = Sha1::digest(raw.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Recovers what it can from a raw share URI without decoding the payload.
pub fn parse_minimal(raw: &str) -> ParsedUri {
    let lower = raw.trim().to_ascii_lowercase();
    let (host, port) = find_host_port(raw);

    let proto = ["vmess", "vless", "trojan", "ss", "socks5"]
        .iter()
        .find(|p| lower.starts_with(&format!("{p}://")))
        .map(|p| p.to_string())
        .unwrap_or_default();

    let path = if raw.contains("path=") { "/".to_string() } else { String::new() };
    let tls = raw.contains("security=tls") || raw.contains("tls=");

    ParsedUri {
        proto,
        host,
        port,
        path,
        tls,
        sni: String::new(),
    }
}

/// Crude host:port scan: split on whitespace and `/`, take the first segment
/// whose text after its last `:` starts with a port number in 1..=65535.
fn find_host_port(raw: &str) -> (String, u16) {
    for seg in raw.replace('/', " ").split_whitespace() {
        if let Some(i) = seg.rfind(':') {
            if i == 0 || i == seg.len() - 1 {
                continue;
            }
            if let Some(port) = leading_port(&seg[i + 1..]) {
                return (trim_host(&seg[..i]), port);
            }
        }
    }
    (String::new(), 0)
}

/// Parses the leading digit run as a port. Query strings routinely trail the
/// port (`example.com:443?security=tls`), so anything after the digits is
/// ignored.
fn leading_port(s: &str) -> Option<u16> {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    match digits.parse::<u32>() {
        Ok(p) if (1..=65535).contains(&p) => Some(p as u16),
        _ => None,
    }
}

fn trim_host(h: &str) -> String {
    h.trim_matches(|c| c == '[' || c == ']')
        .trim_end_matches(',')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_id_is_deterministic_and_url_safe() {
        let a = config_id("vmess://AAAA");
        let b = config_id("vmess://AAAA");
        assert_eq!(a, b);
        assert!(!a.is_empty());
        assert!(!a.contains('+') && !a.contains('/') && !a.contains('='));
        assert_ne!(a, config_id("vmess://BBBB"));
    }

    #[test]
    fn test_parse_vless_with_query() {
        let p = parse_minimal("vless://uuid@example.com:443?security=tls&type=ws&path=%2Fws");
        assert_eq!(p.proto, "vless");
        assert_eq!(p.host, "uuid@example.com");
        assert_eq!(p.port, 443);
        assert_eq!(p.path, "/");
        assert!(p.tls);
    }

    #[test]
    fn test_parse_trojan_plain() {
        let p = parse_minimal("trojan://pw@node.example.net:8443");
        assert_eq!(p.proto, "trojan");
        assert_eq!(p.host, "pw@node.example.net");
        assert_eq!(p.port, 8443);
        assert_eq!(p.path, "");
        assert!(!p.tls);
    }

    #[test]
    fn test_parse_strips_brackets_and_trailing_comma() {
        let (host, port) = find_host_port("ss://x [2001:db8::1]:8388,");
        assert_eq!(port, 8388);
        assert_eq!(host, "2001:db8::1");
    }

    #[test]
    fn test_parse_unparseable_yields_empty() {
        let p = parse_minimal("vmess://eyJhZGQiOiJub3BvcnQifQ");
        assert_eq!(p.proto, "vmess");
        assert_eq!(p.host, "");
        assert_eq!(p.port, 0);
    }

    #[test]
    fn test_port_out_of_range_is_rejected() {
        assert_eq!(find_host_port("host:99999"), (String::new(), 0));
        assert_eq!(find_host_port("host:0"), (String::new(), 0));
        assert_eq!(find_host_port("host:"), (String::new(), 0));
        assert_eq!(find_host_port(":443"), (String::new(), 0));
    }

    #[test]
    fn test_proto_prefix_is_case_insensitive() {
        assert_eq!(parse_minimal("VMESS://abc").proto, "vmess");
        assert_eq!(parse_minimal("Trojan://x@h:1?a=b").proto, "trojan");
        assert_eq!(parse_minimal("https://example.com").proto, "");
    }
}
