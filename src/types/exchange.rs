//! Captured HTTP exchanges for failure diagnostics.
//!
//! When a remote server answers with an error, the server's own error page is
//! usually the only way to find out what went wrong. The failed request and the
//! full response are captured so operators can inspect them later.

use serde::{Deserialize, Serialize};

/// Upper bound on the captured response body, in bytes.
pub const MAX_CAPTURED_BODY: usize = 64 * 1024;

/// A failed request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedExchange {
    /// HTTP method of the failed request.
    pub method: String,

    /// Final URL the request was sent to (after redirects).
    pub url: String,

    /// Response status code.
    pub status: u16,

    /// Response headers, in the order received.
    pub headers: Vec<(String, String)>,

    /// Response body, lossily decoded and truncated to [`MAX_CAPTURED_BODY`].
    pub body: String,
}

impl FailedExchange {
    /// Builds an exchange from raw response parts, truncating the body.
    pub fn new(
        method: impl Into<String>,
        url: impl Into<String>,
        status: u16,
        headers: Vec<(String, String)>,
        body: &[u8],
    ) -> Self {
        let cut = body.len().min(MAX_CAPTURED_BODY);
        FailedExchange {
            method: method.into(),
            url: url.into(),
            status,
            headers,
            body: String::from_utf8_lossy(&body[..cut]).into_owned(),
        }
    }

    /// Returns the first header value with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_is_truncated() {
        let body = vec![b'x'; MAX_CAPTURED_BODY + 10];
        let exchange = FailedExchange::new("POST", "http://remote/", 500, vec![], &body);
        assert_eq!(exchange.body.len(), MAX_CAPTURED_BODY);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let exchange = FailedExchange::new(
            "GET",
            "http://remote/",
            404,
            vec![("Content-Type".to_string(), "text/html".to_string())],
            b"",
        );
        assert_eq!(exchange.header("content-type"), Some("text/html"));
        assert_eq!(exchange.header("location"), None);
    }
}
