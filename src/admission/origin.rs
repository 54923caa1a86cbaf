use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use tracing::debug;
use url::Url;

// ---------------------------------------------------------------------------
// URL origin validation
// ---------------------------------------------------------------------------

/// Validates source URLs against a hostname allow-list, with a bounded
/// cache of parsed URLs in front of the parser.
///
/// Thread-safe: the cache is behind a `Mutex` so methods take `&self`.
pub struct OriginValidator {
    origins: Vec<String>,
    parsed: Mutex<LruCache<String, Url>>,
}

impl OriginValidator {
    pub fn new(origins: Vec<String>, cache_size: usize) -> Self {
        let cap = NonZeroUsize::new(cache_size.max(1)).expect("cache capacity must be non-zero");
        Self {
            origins,
            parsed: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Validate a source URL. Returns `(allowed, hostname)`.
    ///
    /// - unparsable URL → denied
    /// - empty allow-list → allowed with empty hostname
    /// - scheme outside {http, https} → denied
    /// - otherwise allowed iff the hostname equals an allow-list entry or
    ///   matches a `*` wildcard pattern in it
    pub fn validate(&self, url_str: &str) -> (bool, String) {
        let parsed = {
            let mut cache = self.parsed.lock().unwrap_or_else(|e| e.into_inner());
            cache.get(url_str).cloned()
        };

        let parsed = match parsed {
            Some(u) => u,
            None => {
                let u = match Url::parse(url_str) {
                    Ok(u) => u,
                    Err(_) => return (false, String::new()),
                };
                let mut cache = self.parsed.lock().unwrap_or_else(|e| e.into_inner());
                cache.put(url_str.to_string(), u.clone());
                u
            }
        };

        self.validate_hostname(&parsed)
    }

    fn validate_hostname(&self, parsed: &Url) -> (bool, String) {
        if self.origins.is_empty() {
            return (true, String::new());
        }

        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return (false, String::new());
        }

        let hostname = parsed.host_str().unwrap_or("").to_string();

        // Exact matches first, wildcard patterns second.
        for origin in &self.origins {
            if origin == &hostname {
                debug!(origin, hostname, "origin matched");
                return (true, hostname);
            }
        }
        for origin in &self.origins {
            if origin.contains('*') && wildcard_match(origin, &hostname) {
                debug!(origin, hostname, "origin matched");
                return (true, hostname);
            }
        }

        (false, String::new())
    }

    #[cfg(test)]
    pub fn cached_urls(&self) -> usize {
        self.parsed.lock().unwrap().len()
    }
}

/// Match `pattern` against `text` where `*` spans any run of characters
/// (including the empty run). No other metacharacters.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    // Iterative glob match with single-star backtracking.
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(origins: &[&str]) -> OriginValidator {
        OriginValidator::new(origins.iter().map(|s| s.to_string()).collect(), 10)
    }

    #[test]
    fn empty_allow_list_allows_everything() {
        let v = validator(&[]);
        let (ok, host) = v.validate("https://anything.example/a.jpg");
        assert!(ok);
        assert_eq!(host, "");
    }

    #[test]
    fn exact_hostname_match() {
        let v = validator(&["example.com"]);
        let (ok, host) = v.validate("https://example.com/a.jpg");
        assert!(ok);
        assert_eq!(host, "example.com");

        let (ok, _) = v.validate("https://evil.com/a.jpg");
        assert!(!ok);
    }

    #[test]
    fn wildcard_hostname_match() {
        let v = validator(&["*.example.com"]);
        let (ok, host) = v.validate("https://cdn.example.com/a.jpg");
        assert!(ok);
        assert_eq!(host, "cdn.example.com");

        let (ok, _) = v.validate("https://example.com/a.jpg");
        assert!(!ok);
    }

    #[test]
    fn rejects_non_http_schemes() {
        let v = validator(&["example.com"]);
        let (ok, _) = v.validate("ftp://example.com/a.jpg");
        assert!(!ok);
        let (ok, _) = v.validate("file:///etc/passwd");
        assert!(!ok);
    }

    #[test]
    fn rejects_unparsable_urls() {
        let v = validator(&["example.com"]);
        let (ok, _) = v.validate("http://[not a url");
        assert!(!ok);
    }

    #[test]
    fn parse_cache_is_bounded() {
        let v = OriginValidator::new(vec![], 4);
        for i in 0..20 {
            v.validate(&format!("https://host{}.example/x", i));
        }
        assert!(v.cached_urls() <= 4);
    }

    #[test]
    fn wildcard_matcher_semantics() {
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("*.example.com", "a.example.com"));
        assert!(wildcard_match("*.example.com", "a.b.example.com"));
        assert!(!wildcard_match("*.example.com", "example.com"));
        assert!(wildcard_match("cdn-*.example.com", "cdn-1.example.com"));
        assert!(!wildcard_match("cdn-*.example.com", "api.example.com"));
        assert!(wildcard_match("a*b*c", "aXXbYYc"));
        assert!(!wildcard_match("a*b*c", "aXXbYY"));
    }
}
