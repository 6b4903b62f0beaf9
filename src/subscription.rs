//! Subscription feed ingest.
//!
//! Feeds are plain text bodies that either list share URIs directly or wrap
//! the whole list in one base64 blob. Extraction is deliberately forgiving:
//! regex sweep plus a line scan, deduplicated in first-seen order. A feed
//! that fails to fetch is skipped; ingest as a whole never aborts.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{bail, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;

static VMESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"vmess://[A-Za-z0-9+/=]+").expect("vmess regex"));
static GENERIC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:vless|trojan|ss|socks5)://\S+").expect("generic regex"));

const SCHEME_PREFIXES: [&str; 5] = ["vmess://", "vless://", "trojan://", "ss://", "socks5://"];

/// Per-request deadline for feed fetches.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(12);

/// HTTP fetcher for subscription sources.
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
        Ok(Self { client })
    }

    /// GETs a feed body. Any non-200 status is an error.
    pub async fn fetch(&self, url: &str) -> Result<String> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if status.as_u16() != 200 {
            bail!("http_status_{}", status.as_u16());
        }
        Ok(resp.text().await?)
    }
}

/// If the body looks like one big base64 block, returns the decoded text;
/// otherwise returns the input unchanged.
///
/// "Looks like" means: at least 60 chars after trimming, at least half of the
/// text drawn from the base64 alphabet, decodes cleanly, and the decoded text
/// contains a supported scheme.
pub fn try_decode_if_base64_block(s: &str) -> String {
    let t = s.trim();
    if t.len() < 60 {
        return s.to_string();
    }
    let candidate: String = t
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=' | '\n' | '\r'))
        .collect();
    if candidate.len() < t.len() / 2 {
        return s.to_string();
    }
    let stripped: String = candidate.chars().filter(|c| *c != '\n' && *c != '\r').collect();
    let Ok(decoded) = STANDARD.decode(stripped.as_bytes()) else {
        return s.to_string();
    };
    let Ok(text) = String::from_utf8(decoded) else {
        return s.to_string();
    };
    if ["vmess://", "vless://", "trojan://", "ss://"]
        .iter()
        .any(|p| text.contains(p))
    {
        text
    } else {
        s.to_string()
    }
}

/// Extracts node URIs from a feed body: base64-unwrap if applicable, regex
/// sweep, full-line scan, then stable first-occurrence dedupe.
pub fn extract_nodes(text: &str) -> Vec<String> {
    let txt = try_decode_if_base64_block(text);
    let mut nodes: Vec<String> = Vec::new();
    nodes.extend(VMESS_RE.find_iter(&txt).map(|m| m.as_str().to_string()));
    nodes.extend(GENERIC_RE.find_iter(&txt).map(|m| m.as_str().to_string()));
    for line in txt.lines() {
        let l = line.trim();
        if l.is_empty() {
            continue;
        }
        let lower = l.to_ascii_lowercase();
        if SCHEME_PREFIXES.iter().any(|p| lower.starts_with(p)) {
            nodes.push(l.to_string());
        }
    }
    let mut seen = HashSet::new();
    nodes.retain(|n| seen.insert(n.clone()));
    nodes
}
