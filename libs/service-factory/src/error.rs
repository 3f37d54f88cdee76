use thiserror::Error;

/// Classification of URL validation failures.
///
/// Provides programmatic matching for different failure modes without
/// relying on unstable error message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// URL could not be parsed (malformed syntax)
    ParseError,
    /// URL is missing required host/authority component
    MissingAuthority,
    /// URL is missing required scheme (http/https)
    MissingScheme,
    /// Relative path could not be resolved against the service base URL
    UnresolvablePath,
}

/// HTTP client error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    /// Request building failed
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Invalid header name
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Request timed out
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Transport error (network, connection, truncated or corrupt body, etc)
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Response body exceeded size limit
    #[error("Response body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },

    /// HTTP non-2xx status
    #[error("HTTP {status}: {body_preview}")]
    HttpStatus {
        status: http::StatusCode,
        body_preview: String,
        content_type: Option<String>,
    },

    /// JSON encoding or parsing error
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// XML parsing error
    #[error("XML parsing failed: {0}")]
    Xml(#[from] quick_xml::DeError),

    /// XML encoding error
    #[error("XML encoding failed: {0}")]
    XmlEncode(#[from] quick_xml::SeError),

    /// Form URL encoding error
    #[error("Form encoding failed: {0}")]
    FormEncode(#[from] serde_urlencoded::ser::Error),

    /// Request buffer full (fail-fast)
    #[error("Service overloaded: request buffer full")]
    Overloaded,

    /// Internal service failure (buffer worker died, channel closed)
    #[error("Service unavailable: internal failure")]
    ServiceClosed,

    /// Invalid URL (failed to parse)
    ///
    /// Use the `kind` field for programmatic matching. The `reason` field contains
    /// a diagnostic message intended for logging only.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        /// The URL that failed to parse
        url: String,
        /// Structured failure classification for programmatic matching
        kind: InvalidUriKind,
        /// Diagnostic message (unstable format, for logging only)
        reason: String,
    },

    /// Invalid URL scheme for transport security configuration
    #[error("URL scheme '{scheme}' not allowed: {reason}")]
    InvalidScheme {
        /// The URL scheme that was rejected
        scheme: String,
        /// Reason the scheme was rejected
        reason: String,
    },

    /// Service base URL is unusable even after normalization
    #[error("Invalid base URL '{url}': {source}")]
    InvalidBaseUrl {
        /// The normalized base URL
        url: String,
        #[source]
        source: url::ParseError,
    },
}

impl From<hyper::Error> for HttpError {
    fn from(err: hyper::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for HttpError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io;

    #[test]
    fn test_transport_error_preserves_io_source() {
        let inner = io::Error::new(io::ErrorKind::UnexpectedEof, "unexpected end of stream");
        let err = HttpError::Transport(Box::new(inner));

        let source = err.source().expect("Transport error should have a source");
        let io_err = source
            .downcast_ref::<io::Error>()
            .expect("should downcast to io::Error");
        assert_eq!(io_err.kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(io_err.to_string(), "unexpected end of stream");
    }

    #[test]
    fn test_wrapped_body_error_reachable() {
        let root = io::Error::new(io::ErrorKind::ConnectionReset, "root cause");
        let err = HttpError::Transport(Box::new(io::Error::other(root)));

        let outer = err
            .source()
            .and_then(|s| s.downcast_ref::<io::Error>())
            .expect("should downcast to io::Error");
        assert_eq!(outer.kind(), io::ErrorKind::Other);

        let root = outer
            .get_ref()
            .and_then(|e| e.downcast_ref::<io::Error>())
            .expect("root io::Error should be reachable");
        assert_eq!(root.kind(), io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn test_invalid_base_url_keeps_parse_error() {
        let err = HttpError::InvalidBaseUrl {
            url: "http://[::1/".to_owned(),
            source: url::ParseError::InvalidIpv6Address,
        };

        assert!(err.to_string().contains("http://[::1/"));
        let source = err.source().and_then(|s| s.downcast_ref::<url::ParseError>());
        assert_eq!(source, Some(&url::ParseError::InvalidIpv6Address));
    }
}
