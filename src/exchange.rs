//! Recorded exchanges and the request shapes the hooks consume

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::timing::now_millis;

/// Ordered header multimap
pub type Headers = Vec<(String, String)>;

/// Path and decoded query pairs of a request URL
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedUrl {
    /// Path without query string or fragment
    pub path: String,
    /// Query parameters in order of appearance
    pub query: Vec<(String, String)>,
}

impl ParsedUrl {
    /// Split a request target into path and decoded query pairs.
    ///
    /// `+` decodes to a space; malformed escapes are kept verbatim.
    #[must_use]
    pub fn parse(url: &str) -> Self {
        let url = url.split_once('#').map_or(url, |(before, _)| before);
        let (path, query) = url.split_once('?').unwrap_or((url, ""));

        let query = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                (decode_component(key), decode_component(value))
            })
            .collect();

        Self {
            path: path.to_string(),
            query,
        }
    }

    /// First value of a query parameter
    #[must_use]
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced).map_or(spaced.clone(), |decoded| decoded.into_owned())
}

/// Request as handed to the engine by the host pipeline
#[derive(Debug, Clone)]
pub struct InboundRequest {
    /// HTTP method
    pub method: String,
    /// Full request target including query string
    pub url: String,
    /// Request headers
    pub headers: Headers,
    /// Raw body bytes, `None` when the host captured no body
    pub raw_body: Option<Bytes>,
    /// Decoded body, when the host parsed one
    pub body: Option<serde_json::Value>,
    /// Recordset this request belongs to
    pub recordset: Option<String>,
    /// Milliseconds since epoch when the request entered the pipeline
    pub start_time: i64,
}

impl InboundRequest {
    /// Create a request stamped with the current time
    #[must_use]
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            raw_body: None,
            body: None,
            recordset: None,
            start_time: now_millis(),
        }
    }

    /// Set the raw body
    #[must_use]
    pub fn with_raw_body(mut self, body: impl Into<Bytes>) -> Self {
        self.raw_body = Some(body.into());
        self
    }

    /// Set the decoded body
    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Append a header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Associate the request with a recordset
    #[must_use]
    pub fn in_recordset(mut self, recordset: impl Into<String>) -> Self {
        self.recordset = Some(recordset.into());
        self
    }

    /// Override the pipeline entry timestamp
    #[must_use]
    pub fn started_at(mut self, start_time: i64) -> Self {
        self.start_time = start_time;
        self
    }
}

/// Response obtained from the real upstream
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    /// HTTP status code
    pub status: u16,
    /// Reason phrase
    pub status_message: String,
    /// Response headers
    pub headers: Headers,
    /// Response body
    pub body: Bytes,
}

/// Request half of an exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedRequest {
    /// HTTP method
    pub method: String,
    /// Full request target including query string
    pub url: String,
    /// Parsed URL components
    pub parsed_url: ParsedUrl,
    /// Request headers
    pub headers: Headers,
    /// Raw body, `None` is distinct from empty
    pub raw_body: Option<Bytes>,
    /// Decoded body
    pub body: Option<serde_json::Value>,
}

impl RecordedRequest {
    /// Capture the matching-relevant parts of an inbound request
    #[must_use]
    pub fn from_inbound(request: &InboundRequest) -> Self {
        Self {
            method: request.method.clone(),
            url: request.url.clone(),
            parsed_url: ParsedUrl::parse(&request.url),
            headers: request.headers.clone(),
            raw_body: request.raw_body.clone(),
            body: request.body.clone(),
        }
    }

    /// First value of header `name`, compared case-insensitively
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }
}

fn header_value<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Response half of an exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedResponse {
    /// HTTP status code
    pub status: u16,
    /// Reason phrase
    pub status_message: String,
    /// Response headers
    pub headers: Headers,
    /// Response body
    pub body: Bytes,
}

impl From<&UpstreamResponse> for RecordedResponse {
    fn from(response: &UpstreamResponse) -> Self {
        Self {
            status: response.status,
            status_message: response.status_message.clone(),
            headers: response.headers.clone(),
            body: response.body.clone(),
        }
    }
}

/// One recorded request/response pair with capture timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    /// Recorded request
    pub request: RecordedRequest,
    /// Recorded response
    pub response: RecordedResponse,
    /// When the upstream call was issued (ms since epoch)
    pub start: i64,
    /// When the upstream response fully arrived (ms since epoch)
    pub end: i64,
}

impl Exchange {
    /// Build an exchange; `end` is raised to `start` if the clock stepped back
    #[must_use]
    pub fn new(request: RecordedRequest, response: RecordedResponse, start: i64, end: i64) -> Self {
        Self {
            request,
            response,
            start,
            end: end.max(start),
        }
    }

    /// Captured upstream latency in milliseconds
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        self.end.saturating_sub(self.start)
    }

    /// Fingerprint of the fields used for matching
    #[must_use]
    pub fn fingerprint(&self) -> [u8; 32] {
        fingerprint(
            &self.request.method,
            &self.request.url,
            self.request.raw_body.as_deref(),
        )
    }
}

/// Lookup key built from an inbound request during replay.
///
/// Carries the whole request so external matchers can key on headers or
/// the decoded body; the built-in exact match only reads method, URL and
/// raw body.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestKey {
    /// HTTP method
    pub method: String,
    /// Full request target including query string
    pub url: String,
    /// Parsed URL components
    pub parsed_url: ParsedUrl,
    /// Request headers
    pub headers: Headers,
    /// Raw body
    pub raw_body: Option<Bytes>,
    /// Decoded body
    pub body: Option<serde_json::Value>,
}

impl RequestKey {
    /// Build a key from an inbound request
    #[must_use]
    pub fn from_request(request: &InboundRequest) -> Self {
        Self {
            method: request.method.clone(),
            url: request.url.clone(),
            parsed_url: ParsedUrl::parse(&request.url),
            headers: request.headers.clone(),
            raw_body: request.raw_body.clone(),
            body: request.body.clone(),
        }
    }

    /// First value of header `name`, compared case-insensitively
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    /// Exact match on method, URL and raw body.
    ///
    /// No normalization: method is case-sensitive, the query string is
    /// compared verbatim and an absent body never equals an empty one.
    #[must_use]
    pub fn matches(&self, exchange: &Exchange) -> bool {
        self.method == exchange.request.method
            && self.url == exchange.request.url
            && self.raw_body == exchange.request.raw_body
    }

    /// Fingerprint of the fields used for matching
    #[must_use]
    pub fn fingerprint(&self) -> [u8; 32] {
        fingerprint(&self.method, &self.url, self.raw_body.as_deref())
    }
}

/// Compute the SHA-256 fingerprint of a request's match fields.
///
/// Fields are length-prefixed; the body carries a presence tag so that an
/// absent body and an empty body hash differently.
#[must_use]
pub fn fingerprint(method: &str, url: &str, raw_body: Option<&[u8]>) -> [u8; 32] {
    let mut hasher = Sha256::new();

    hasher.update((method.len() as u32).to_le_bytes());
    hasher.update(method.as_bytes());

    hasher.update((url.len() as u32).to_le_bytes());
    hasher.update(url.as_bytes());

    match raw_body {
        Some(body) => {
            hasher.update([1u8]);
            hasher.update((body.len() as u64).to_le_bytes());
            hasher.update(body);
        }
        None => hasher.update([0u8]),
    }

    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(method: &str, url: &str, raw_body: Option<&'static [u8]>) -> Exchange {
        let request = InboundRequest {
            raw_body: raw_body.map(Bytes::from_static),
            ..InboundRequest::new(method, url)
        };
        Exchange::new(
            RecordedRequest::from_inbound(&request),
            RecordedResponse {
                status: 200,
                status_message: "OK".to_string(),
                headers: vec![],
                body: Bytes::new(),
            },
            0,
            10,
        )
    }

    #[test]
    fn test_parse_url() {
        let parsed = ParsedUrl::parse("/api/items?b=2&a=hello%20world&flag&c=x+y#frag");
        assert_eq!(parsed.path, "/api/items");
        assert_eq!(
            parsed.query,
            vec![
                ("b".to_string(), "2".to_string()),
                ("a".to_string(), "hello world".to_string()),
                ("flag".to_string(), String::new()),
                ("c".to_string(), "x y".to_string()),
            ]
        );
        assert_eq!(parsed.query_param("a"), Some("hello world"));
        assert_eq!(parsed.query_param("missing"), None);
    }

    #[test]
    fn test_parse_url_without_query() {
        let parsed = ParsedUrl::parse("/plain");
        assert_eq!(parsed.path, "/plain");
        assert!(parsed.query.is_empty());
    }

    #[test]
    fn test_parse_url_malformed_escape() {
        let parsed = ParsedUrl::parse("/p?k=%zz");
        assert_eq!(parsed.query_param("k"), Some("%zz"));
    }

    #[test]
    fn test_exact_match() {
        let stored = exchange("GET", "/a?x=1", None);

        let key = RequestKey::from_request(&InboundRequest::new("GET", "/a?x=1"));
        assert!(key.matches(&stored));

        let key = RequestKey::from_request(&InboundRequest::new("get", "/a?x=1"));
        assert!(!key.matches(&stored), "Method is case-sensitive");

        let key = RequestKey::from_request(&InboundRequest::new("GET", "/a?x=01"));
        assert!(!key.matches(&stored), "Query string is compared verbatim");
    }

    #[test]
    fn test_key_carries_headers_and_body_without_affecting_match() {
        let stored = exchange("POST", "/a", Some(b"{}"));
        let request = InboundRequest::new("POST", "/a")
            .with_raw_body("{}")
            .with_header("Authorization", "Bearer t1")
            .with_body(serde_json::json!({}));

        let key = RequestKey::from_request(&request);
        assert_eq!(key.header("authorization"), Some("Bearer t1"));
        assert_eq!(key.header("x-missing"), None);
        assert_eq!(key.body, Some(serde_json::json!({})));
        assert!(key.matches(&stored), "Headers play no part in the exact match");
        assert_eq!(key.fingerprint(), stored.fingerprint());
    }

    #[test]
    fn test_absent_body_differs_from_empty() {
        let absent = exchange("POST", "/a", None);
        let empty = exchange("POST", "/a", Some(b""));

        let key = RequestKey::from_request(&InboundRequest::new("POST", "/a").with_raw_body(""));
        assert!(key.matches(&empty));
        assert!(!key.matches(&absent));
        assert_ne!(absent.fingerprint(), empty.fingerprint());
    }

    #[test]
    fn test_fingerprint_agrees_with_key() {
        let stored = exchange("PUT", "/a", Some(b"payload"));
        let key =
            RequestKey::from_request(&InboundRequest::new("PUT", "/a").with_raw_body("payload"));
        assert_eq!(stored.fingerprint(), key.fingerprint());
    }

    #[test]
    fn test_fingerprint_field_boundaries() {
        assert_ne!(
            fingerprint("GET", "/ab", None),
            fingerprint("GETA", "/b", None)
        );
    }

    #[test]
    fn test_exchange_end_not_before_start() {
        let stored = exchange("GET", "/", None);
        let clamped = Exchange::new(stored.request, stored.response, 100, 50);
        assert_eq!(clamped.end, 100);
        assert_eq!(clamped.duration_ms(), 0);
    }
}
