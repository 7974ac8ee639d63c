//! Mapping from request path prefixes to upstream repository URLs.

use url::Url;

/// Ordered prefix → upstream base URL table. The longest matching prefix
/// wins; paths with no match are not cacheable.
#[derive(Debug, Clone, Default)]
pub struct UrlMap {
    mappings: Vec<(String, Url)>,
}

impl UrlMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `prefix` as served by `base`. Surrounding slashes on the
    /// prefix are ignored.
    pub fn register(&mut self, prefix: &str, base: Url) {
        let prefix = prefix.trim_matches('/').to_string();
        self.mappings.push((prefix, base));
        // Longest prefix first, so lookup can take the first match.
        self.mappings.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    }

    /// Resolve `path` to its upstream URL, or `None` when no registered
    /// prefix matches. Prefixes match whole path segments only.
    pub fn url(&self, path: &str) -> Option<Url> {
        let path = path.trim_start_matches('/');
        for (prefix, base) in &self.mappings {
            let rest = match path.strip_prefix(prefix.as_str()) {
                Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
                _ => continue,
            };
            let joined = format!("{}{}", base.as_str().trim_end_matches('/'), rest);
            return Url::parse(&joined).ok();
        }
        None
    }
}
