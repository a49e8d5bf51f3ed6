//! The HTTP client contract (§6): `get(url, headers) -> Result<bytes>`.
//!
//! Modeled as a trait only — no networking crate is bundled. The core passes CA certificates,
//! proxy settings, and URL-rewrite rules through to whatever client the host installs; this
//! crate never constructs a socket itself (§1: "HTTP client & package server" is an external
//! collaborator with an interface only).

use crate::error::PklError;

/// One `url-rewrite` rule from evaluator settings (§6). Both `from` and `to` must be lowercase
/// host, end in `/`, and use an `http(s)` scheme; hosts configuring this incorrectly get an
/// error at configuration time, not at first use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlRewriteRule {
    pub from: String,
    pub to: String,
}

impl UrlRewriteRule {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Result<Self, PklError> {
        let from = from.into();
        let to = to.into();
        Self::validate(&from)?;
        Self::validate(&to)?;
        Ok(Self { from, to })
    }

    fn validate(side: &str) -> Result<(), PklError> {
        let has_scheme = side.starts_with("http://") || side.starts_with("https://");
        let lowercase_host = side == side.to_lowercase();
        if has_scheme && side.ends_with('/') && lowercase_host {
            Ok(())
        } else {
            Err(PklError::new(
                crate::error::ErrorKind::Security,
                format!("invalid URL rewrite rule side '{side}': must be a lowercase http(s) URL ending in '/'"),
            ))
        }
    }

    /// Rewrites `url` if it starts with this rule's `from` prefix.
    #[must_use]
    pub fn apply(&self, url: &str) -> Option<String> {
        url.strip_prefix(self.from.as_str())
            .map(|rest| format!("{}{rest}", self.to))
    }
}

/// Host-supplied HTTP transport. The package cache (§4.2) is the only internal user.
pub trait HttpClient: std::fmt::Debug {
    fn get(&self, url: &str, headers: &[(String, String)]) -> Result<Vec<u8>, PklError>;
}

/// Applies the configured rewrite rules (first match wins) before delegating to `inner`.
#[derive(Debug)]
pub struct RewritingHttpClient<C> {
    inner: C,
    rules: Vec<UrlRewriteRule>,
}

impl<C: HttpClient> RewritingHttpClient<C> {
    #[must_use]
    pub fn new(inner: C, rules: Vec<UrlRewriteRule>) -> Self {
        Self { inner, rules }
    }
}

impl<C: HttpClient> HttpClient for RewritingHttpClient<C> {
    fn get(&self, url: &str, headers: &[(String, String)]) -> Result<Vec<u8>, PklError> {
        let rewritten = self.rules.iter().find_map(|rule| rule.apply(url));
        self.inner.get(rewritten.as_deref().unwrap_or(url), headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct RecordingClient {
        seen: std::cell::RefCell<Vec<String>>,
    }

    impl HttpClient for RecordingClient {
        fn get(&self, url: &str, _headers: &[(String, String)]) -> Result<Vec<u8>, PklError> {
            self.seen.borrow_mut().push(url.to_string());
            Ok(Vec::new())
        }
    }

    #[test]
    fn rewrite_rule_rejects_non_lowercase_host() {
        assert!(UrlRewriteRule::new("https://Example.com/", "https://mirror.example.com/").is_err());
    }

    #[test]
    fn rewrite_rule_rejects_missing_trailing_slash() {
        assert!(UrlRewriteRule::new("https://example.com", "https://mirror.example.com/").is_err());
    }

    #[test]
    fn matching_rule_rewrites_the_request_url() {
        let rule = UrlRewriteRule::new("https://example.com/", "https://mirror.example.com/").unwrap();
        let client = RewritingHttpClient::new(
            RecordingClient {
                seen: std::cell::RefCell::new(Vec::new()),
            },
            vec![rule],
        );
        client.get("https://example.com/pkg.zip", &[]).unwrap();
        assert_eq!(client.inner.seen.borrow()[0], "https://mirror.example.com/pkg.zip");
    }
}
