//! Per-domain cookie jar with longest-prefix domain matching.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
}

/// Cookies keyed by the exact domain they were set for. Lookups walk from
/// the most specific subdomain to the bare registrable domain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CookieJar {
    by_domain: HashMap<String, Vec<Cookie>>,
}

impl CookieJar {
    pub fn new() -> Self {
        CookieJar::default()
    }

    pub fn set_cookies(&mut self, cookies: Vec<Cookie>, url: &str) {
        let domain = host_of(url, cookies.first().map(|c| c.domain.as_str()));
        let entry = self.by_domain.entry(domain).or_default();
        for cookie in cookies {
            if let Some(existing) = entry.iter_mut().find(|c| c.name == cookie.name) {
                *existing = cookie;
            } else {
                entry.push(cookie);
            }
        }
    }

    /// Builds a `Cookie:` header value for `url`, merging cookies from every
    /// domain in the host's suffix chain (most specific first, deduped by
    /// name so a closer match wins).
    pub fn header_for(&self, url: &str) -> Option<String> {
        let host = match Url::parse(url) {
            Ok(u) => u.host_str()?.to_string(),
            Err(_) => return None,
        };

        let mut seen = std::collections::HashSet::new();
        let mut parts = Vec::new();
        for candidate in suffixes(&host) {
            if let Some(cookies) = self.by_domain.get(&candidate) {
                for cookie in cookies {
                    if seen.insert(cookie.name.clone()) {
                        parts.push(format!("{}={}", cookie.name, cookie.value));
                    }
                }
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("; "))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_domain.values().all(|v| v.is_empty())
    }
}

fn host_of(url: &str, explicit_domain: Option<&str>) -> String {
    if let Some(domain) = explicit_domain {
        return domain.trim_start_matches('.').to_string();
    }
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_default()
}

/// Yields `a.b.example.com`, `b.example.com`, `example.com`, ... longest
/// prefix first.
fn suffixes(host: &str) -> impl Iterator<Item = String> + '_ {
    let labels: Vec<&str> = host.split('.').collect();
    (0..labels.len()).map(move |i| labels[i..].join("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(name: &str, domain: &str) -> Cookie {
        Cookie {
            name: name.to_string(),
            value: "v".to_string(),
            domain: domain.to_string(),
            path: "/".to_string(),
        }
    }

    #[test]
    fn longest_prefix_wins_on_conflict() {
        let mut jar = CookieJar::new();
        jar.set_cookies(vec![cookie("a", "example.com")], "https://example.com");
        jar.set_cookies(
            vec![cookie("a", "sub.example.com")],
            "https://sub.example.com",
        );
        let header = jar.header_for("https://sub.example.com/page").unwrap();
        assert_eq!(header, "a=v");
    }

    #[test]
    fn merges_cookies_across_suffix_chain() {
        let mut jar = CookieJar::new();
        jar.set_cookies(vec![cookie("root", "example.com")], "https://example.com");
        jar.set_cookies(
            vec![cookie("leaf", "sub.example.com")],
            "https://sub.example.com",
        );
        let header = jar.header_for("https://sub.example.com").unwrap();
        assert!(header.contains("leaf=v"));
        assert!(header.contains("root=v"));
    }
}
