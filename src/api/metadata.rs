// Request metadata seen by the auth interceptor

use std::collections::BTreeMap;

use axum::http::HeaderMap;

/// Metadata key under which the HTTP `cookie` header is exposed
pub const COOKIE_METADATA_KEY: &str = "grpcgateway-cookie";

/// Header prefix for metadata passed through verbatim
const METADATA_HEADER_PREFIX: &str = "grpc-metadata-";

/// Multi-valued, lower-cased request metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMetadata {
    entries: BTreeMap<String, Vec<String>>,
}

impl RequestMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata of an HTTP request
    ///
    /// `cookie` becomes `grpcgateway-cookie` and a `grpc-metadata-` prefix is
    /// stripped. Values that aren't visible ASCII are dropped.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut metadata = Self::new();
        for (name, value) in headers {
            let Ok(value) = value.to_str() else {
                continue;
            };
            let name = name.as_str();
            let key = if name == "cookie" {
                COOKIE_METADATA_KEY
            } else {
                name.strip_prefix(METADATA_HEADER_PREFIX).unwrap_or(name)
            };
            metadata.append(key, value);
        }
        metadata
    }

    pub fn get(&self, key: &str) -> &[String] {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn first(&self, key: &str) -> Option<&str> {
        self.get(key).first().map(String::as_str)
    }

    pub fn append(&mut self, key: &str, value: impl Into<String>) {
        self.entries
            .entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// Replace every value of `key`
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.entries
            .insert(key.to_ascii_lowercase(), vec![value.into()]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_header_mapping() {
        let mut headers = HeaderMap::new();
        headers.insert("cookie", HeaderValue::from_static("auth-token=abc"));
        headers.insert("grpc-metadata-onepanel-auth-token", HeaderValue::from_static("xyz"));
        headers.append("x-original-authority", HeaderValue::from_static("a--b.example.com"));

        let metadata = RequestMetadata::from_headers(&headers);
        assert_eq!(metadata.first(COOKIE_METADATA_KEY), Some("auth-token=abc"));
        assert!(metadata.get("cookie").is_empty());
        assert_eq!(metadata.first("onepanel-auth-token"), Some("xyz"));
        assert_eq!(metadata.first("X-Original-Authority"), Some("a--b.example.com"));
    }

    #[test]
    fn test_set_replaces_values() {
        let mut metadata = RequestMetadata::new();
        metadata.append("onepanel-auth-token", "one");
        metadata.append("onepanel-auth-token", "two");
        assert_eq!(metadata.get("onepanel-auth-token").len(), 2);

        metadata.set("onepanel-auth-token", "three");
        assert_eq!(metadata.get("onepanel-auth-token"), ["three".to_string()]);
    }
}
